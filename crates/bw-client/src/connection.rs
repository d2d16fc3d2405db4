//! Framed TCP transport to the broker
//!
//! A [`Connection`] owns one TCP stream. It splits into a [`FrameReader`],
//! which only the receive loop touches, and a cloneable [`FrameWriter`] whose
//! writes are serialized by a lock so two frames never interleave.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};

use bw_protocol::{Message, MessageCodec};

use crate::error::{classify, ClientError, ConnectionError};

/// Upper bound on flushing and shutting down the write half
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// A live, framed connection to the broker
pub struct Connection<C: MessageCodec> {
    reader: FrameReader<C>,
    writer: FrameWriter<C>,
    peer: SocketAddr,
}

impl<C: MessageCodec> Connection<C> {
    /// Connect to `address`, failing if the connect takes longer than `timeout`
    pub async fn connect(
        address: &str,
        codec: C,
        timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        tracing::debug!(address, codec = codec.name(), "Opening connection");

        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ConnectionError::ConnectTimeout {
                address: address.to_string(),
                timeout,
            })?
            .map_err(|source| ConnectionError::Connect {
                address: address.to_string(),
                source,
            })?;

        Self::from_stream(stream, codec)
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream, codec: C) -> Result<Self, ConnectionError> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: FrameReader {
                inner: FramedRead::new(read_half, codec.fresh()),
            },
            writer: FrameWriter {
                inner: Arc::new(Mutex::new(Some(FramedWrite::new(write_half, codec)))),
                closed: Arc::new(AtomicBool::new(false)),
            },
            peer,
        })
    }

    /// Address of the broker
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Split into the read and write directions
    pub fn split(self) -> (FrameReader<C>, FrameWriter<C>) {
        (self.reader, self.writer)
    }

    /// Close both directions
    pub async fn close(self) {
        self.writer.close().await;
    }
}

/// Read side of a connection
pub struct FrameReader<C: MessageCodec> {
    inner: FramedRead<OwnedReadHalf, C>,
}

impl<C: MessageCodec> FrameReader<C> {
    /// Read and decode the next frame
    ///
    /// Cancel safe: partially received frames stay buffered. End of stream
    /// fails with [`ConnectionError::Closed`].
    pub async fn read_frame(&mut self) -> Result<Message, ClientError> {
        match self.inner.next().await {
            Some(Ok(message)) => Ok(message),
            Some(Err(e)) => Err(classify(e)),
            None => Err(ConnectionError::Closed.into()),
        }
    }
}

/// Write side of a connection, shared by every task that sends
pub struct FrameWriter<C: MessageCodec> {
    inner: Arc<Mutex<Option<FramedWrite<OwnedWriteHalf, C>>>>,
    /// Set by `close` before it takes the lock
    closed: Arc<AtomicBool>,
}

impl<C: MessageCodec> Clone for FrameWriter<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            closed: Arc::clone(&self.closed),
        }
    }
}

impl<C: MessageCodec> FrameWriter<C> {
    /// Encode and flush one message
    ///
    /// The whole frame is written under the lock. Encoding failures leave
    /// the stream untouched and are reported as [`ClientError::Protocol`].
    /// Not bounded in time; callers wrap it in their own deadline.
    pub async fn write_frame(&self, message: Message) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed.into());
        }
        let mut guard = self.inner.lock().await;
        let framed = match guard.as_mut() {
            Some(framed) if !self.is_closed() => framed,
            _ => return Err(ConnectionError::Closed.into()),
        };
        framed.send(message).await.map_err(classify)
    }

    /// Flush and shut down the write half; later writes fail
    ///
    /// Idempotent. Later writes fail even when a stuck write keeps the lock
    /// past the close timeout.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let framed = match tokio::time::timeout(CLOSE_TIMEOUT, self.inner.lock()).await {
            Ok(mut guard) => guard.take(),
            Err(_) => {
                tracing::warn!("Writer busy, abandoning graceful close");
                return;
            }
        };

        if let Some(mut framed) = framed {
            match tokio::time::timeout(CLOSE_TIMEOUT, framed.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "Error while closing writer"),
                Err(_) => tracing::debug!("Timed out flushing writer on close"),
            }
        }
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bw_protocol::{BinaryCodec, CorrelationId, Status};
    use tokio::net::TcpListener;

    async fn pair() -> (Connection<BinaryCodec>, Connection<BinaryCodec>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (client, accepted) = tokio::join!(
            Connection::connect(&addr, BinaryCodec::new(), Duration::from_secs(1)),
            listener.accept()
        );
        let (stream, _) = accepted.unwrap();
        (
            client.unwrap(),
            Connection::from_stream(stream, BinaryCodec::new()).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (client, server) = pair().await;
        let (_client_reader, client_writer) = client.split();
        let (mut server_reader, _server_writer) = server.split();

        let request = Message::new("echo")
            .with_correlation_id(CorrelationId::from("1"))
            .with_body("x");
        client_writer.write_frame(request.clone()).await.unwrap();

        assert_eq!(server_reader.read_frame().await.unwrap(), request);
    }

    #[tokio::test]
    async fn test_concurrent_writers_do_not_interleave() {
        let (client, server) = pair().await;
        let (_client_reader, writer) = client.split();
        let (mut reader, _server_writer) = server.split();

        let mut tasks = Vec::new();
        for task in 0..8 {
            let writer = writer.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..25 {
                    let msg = Message::new("produce")
                        .with_correlation_id(CorrelationId::new(format!("{task}-{i}")))
                        .with_body(vec![task as u8; 4096]);
                    writer.write_frame(msg).await.unwrap();
                }
            }));
        }

        for _ in 0..200 {
            let msg = reader.read_frame().await.unwrap();
            let id = msg.correlation_id().unwrap();
            let task: u8 = id.as_str().split('-').next().unwrap().parse().unwrap();
            assert!(msg.body().iter().all(|b| *b == task));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_eof_is_connection_closed() {
        let (client, server) = pair().await;
        let (mut reader, _writer) = client.split();
        server.close().await;

        assert!(matches!(
            reader.read_frame().await,
            Err(ClientError::Connection(ConnectionError::Closed))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client, _server) = pair().await;
        let (_reader, writer) = client.split();

        writer.close().await;
        writer.close().await;
        assert!(writer.is_closed());
        assert!(matches!(
            writer.write_frame(Message::new("echo")).await,
            Err(ClientError::Connection(ConnectionError::Closed))
        ));
    }

    #[tokio::test]
    async fn test_close_rejects_writes_while_a_write_is_stuck() {
        let (client, _server) = pair().await;
        let (_client_reader, writer) = client.split();

        // The peer never reads, so this write holds the lock indefinitely
        let stuck = tokio::spawn({
            let writer = writer.clone();
            async move {
                let big = Message::new("produce").with_body(vec![0u8; 15 * 1024 * 1024]);
                writer.write_frame(big).await
            }
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!stuck.is_finished());

        writer.close().await;
        assert!(writer.is_closed());
        let result = tokio::time::timeout(
            Duration::from_millis(100),
            writer.write_frame(Message::new("echo")),
        )
        .await
        .unwrap();
        assert!(matches!(
            result,
            Err(ClientError::Connection(ConnectionError::Closed))
        ));
        stuck.abort();
    }

    #[tokio::test]
    async fn test_encode_failure_keeps_stream_usable() {
        let (client, server) = pair().await;
        let (_client_reader, writer) = client.split();
        let (mut reader, _server_writer) = server.split();

        let invalid = Message::new("two words");
        assert!(matches!(
            writer.write_frame(invalid).await,
            Err(ClientError::Protocol(_))
        ));

        let valid = Message::new("echo").with_status(Status::OK);
        writer.write_frame(valid.clone()).await.unwrap();
        assert_eq!(reader.read_frame().await.unwrap(), valid);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = Connection::connect(&addr, BinaryCodec::new(), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ConnectionError::Connect { .. })));
    }
}
