//! In-process mock broker for integration tests

#![allow(dead_code)]

use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use bw_client::{
    ClientConfig, ClientEvent, Connection, FrameReader, FrameWriter, Message, MessageCodec, Status,
};

/// Upper bound on any single wait in a test
pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config for a client talking to `address`, without auto-reconnect
pub fn test_config(address: &str) -> ClientConfig {
    let mut config = ClientConfig::new(address);
    config.heartbeat_interval = Duration::from_secs(30);
    config.invoke_timeout = Duration::from_secs(2);
    config.connect_timeout = Duration::from_secs(1);
    config.auto_reconnect = false;
    config
}

/// Listener standing in for a broker
pub struct MockBroker {
    listener: TcpListener,
}

impl MockBroker {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock broker");
        Self { listener }
    }

    pub fn address(&self) -> String {
        self.listener
            .local_addr()
            .expect("Mock broker has no address")
            .to_string()
    }

    /// Accept the next client connection as a plain stream
    pub async fn accept_raw(&self) -> TcpStream {
        let (stream, _) = tokio::time::timeout(WAIT, self.listener.accept())
            .await
            .expect("Timed out waiting for client connection")
            .expect("Failed to accept client connection");
        stream
    }

    /// Accept the next client connection
    pub async fn accept<C: MessageCodec>(&self, codec: C) -> BrokerConn<C> {
        let stream = self.accept_raw().await;
        let (reader, writer) = Connection::from_stream(stream, codec)
            .expect("Failed to wrap accepted stream")
            .split();
        BrokerConn { reader, writer }
    }
}

/// Broker side of one client connection
pub struct BrokerConn<C: MessageCodec> {
    pub reader: FrameReader<C>,
    pub writer: FrameWriter<C>,
}

impl<C: MessageCodec> BrokerConn<C> {
    /// Next message from the client, heartbeats included
    pub async fn recv_any(&mut self) -> Message {
        tokio::time::timeout(WAIT, self.reader.read_frame())
            .await
            .expect("Timed out waiting for client message")
            .expect("Failed to read client message")
    }

    /// Next non-heartbeat message from the client
    pub async fn recv(&mut self) -> Message {
        loop {
            let message = self.recv_any().await;
            if !message.is_heartbeat() {
                return message;
            }
        }
    }

    pub async fn send(&self, message: Message) {
        self.writer
            .write_frame(message)
            .await
            .expect("Failed to write to client");
    }

    /// Answer `request` with its own body and status 200
    pub async fn echo(&self, request: &Message) {
        self.send(Message::response_to(request, Status::OK).with_body(request.body().clone()))
            .await;
    }

    /// Answer every request with an echo until the client disconnects
    pub fn spawn_echo(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Ok(message) = self.reader.read_frame().await {
                if message.is_heartbeat() {
                    continue;
                }
                let reply = Message::response_to(&message, Status::OK)
                    .with_body(message.body().clone());
                if self.writer.write_frame(reply).await.is_err() {
                    break;
                }
            }
        })
    }
}

/// Next lifecycle event, skipping over lag
pub async fn next_event(events: &mut broadcast::Receiver<ClientEvent>) -> ClientEvent {
    loop {
        match tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("Timed out waiting for client event")
        {
            Ok(event) => return event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => panic!("Event channel closed"),
        }
    }
}
