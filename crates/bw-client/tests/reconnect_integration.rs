//! Reconnect integration tests

mod common;

use std::time::Duration;

use bw_client::{
    header, BackoffConfig, BinaryCodec, Client, ClientError, ClientEvent, ConnectionState, Message,
};
use bw_core::time::current_time_millis;
use common::{init_tracing, next_event, test_config, MockBroker, WAIT};

fn fixed_backoff(delay_ms: u64) -> BackoffConfig {
    BackoffConfig::fixed(Duration::from_millis(delay_ms))
}

#[tokio::test]
async fn test_auto_reconnect_after_connection_loss() {
    init_tracing();
    let broker = MockBroker::bind().await;
    let mut config = test_config(&broker.address());
    config.auto_reconnect = true;
    config.heartbeat_interval = Duration::from_millis(25);
    config.reconnect_backoff = fixed_backoff(300);

    let client = Client::new(config).unwrap();
    let mut events = client.events();
    client.connect().await.unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        ClientEvent::Connected { .. }
    ));

    let mut first = broker.accept(BinaryCodec::new()).await;
    assert!(first.recv_any().await.is_heartbeat());
    first.writer.close().await;

    assert!(matches!(
        next_event(&mut events).await,
        ClientEvent::Disconnected { .. }
    ));
    let lost_at = current_time_millis();
    match next_event(&mut events).await {
        ClientEvent::Reconnecting { attempt, delay } => {
            assert_eq!(attempt, 1);
            assert_eq!(delay, Duration::from_millis(300));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // Nothing is sent on the old connection once it is gone, and nothing
    // can be sent while the backoff runs
    while let Ok(Ok(message)) =
        tokio::time::timeout(WAIT, first.reader.read_frame()).await
    {
        assert!(message.is_heartbeat());
        let sent: u64 = message.header(header::TIMESTAMP).unwrap().parse().unwrap();
        assert!(sent <= lost_at);
    }
    assert!(matches!(
        client.heartbeat().await,
        Err(ClientError::NotConnected { .. })
    ));
    assert!(matches!(
        next_event(&mut events).await,
        ClientEvent::Connected { .. }
    ));

    let _echo = broker.accept(BinaryCodec::new()).await.spawn_echo();
    let response = client
        .invoke(Message::new("ECHO").with_body("after"), WAIT)
        .await
        .unwrap();
    assert_eq!(response.body_text(), "after");
}

#[tokio::test]
async fn test_auto_reconnect_gives_up_after_max_attempts() {
    init_tracing();
    let broker = MockBroker::bind().await;
    let mut config = test_config(&broker.address());
    config.auto_reconnect = true;
    config.reconnect_backoff = fixed_backoff(20).with_max_attempts(2);

    let client = Client::new(config).unwrap();
    client.connect().await.unwrap();
    let mut events = client.events();

    // Take the broker away entirely
    let conn = broker.accept(BinaryCodec::new()).await;
    drop(conn);
    drop(broker);

    let mut reconnecting = 0;
    loop {
        match next_event(&mut events).await {
            ClientEvent::Reconnecting { .. } => reconnecting += 1,
            ClientEvent::ReconnectFailed { attempts } => {
                assert_eq!(attempts, 2);
                break;
            }
            ClientEvent::Disconnected { .. } => {}
            other => panic!("unexpected event: {:?}", other),
        }
    }
    assert_eq!(reconnecting, 2);
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_close_stops_auto_reconnect() {
    init_tracing();
    let broker = MockBroker::bind().await;
    let mut config = test_config(&broker.address());
    config.auto_reconnect = true;
    config.reconnect_backoff = fixed_backoff(200);

    let client = Client::new(config).unwrap();
    client.connect().await.unwrap();
    let mut events = client.events();

    drop(broker.accept(BinaryCodec::new()).await);
    loop {
        if let ClientEvent::Reconnecting { .. } = next_event(&mut events).await {
            break;
        }
    }

    client.close().await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(matches!(
        events.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn test_no_auto_reconnect_requires_explicit_call() {
    init_tracing();
    let broker = MockBroker::bind().await;
    let client = Client::new(test_config(&broker.address())).unwrap();
    client.connect().await.unwrap();

    drop(broker.accept(BinaryCodec::new()).await);
    tokio::time::timeout(WAIT, client.wait_for_state(ConnectionState::Disconnected))
        .await
        .unwrap()
        .unwrap();

    // Stays down until asked
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);

    client.reconnect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);

    let _echo = broker.accept(BinaryCodec::new()).await.spawn_echo();
    let response = client
        .invoke(Message::new("ECHO").with_body("manual"), WAIT)
        .await
        .unwrap();
    assert_eq!(response.body_text(), "manual");
}

#[tokio::test]
async fn test_reconnect_replaces_live_connection() {
    init_tracing();
    let broker = MockBroker::bind().await;
    let client = Client::new(test_config(&broker.address())).unwrap();
    client.connect().await.unwrap();
    let mut old = broker.accept(BinaryCodec::new()).await;

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.invoke(Message::new("ECHO"), WAIT).await }
    });
    old.recv().await;

    client.reconnect().await.unwrap();
    assert!(matches!(
        pending.await.unwrap(),
        Err(ClientError::ConnectionLost { .. })
    ));

    let _echo = broker.accept(BinaryCodec::new()).await.spawn_echo();
    assert!(client.invoke(Message::new("ECHO"), WAIT).await.is_ok());
}
