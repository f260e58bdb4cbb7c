mod common;

use std::time::Duration;

use common::{
    MockTransport, OpenBehavior, Recorded, SETTLE, SinkCall, client, connected_client,
};
use duet_session::{
    models::{ConnectionState, SubscriptionEntry, TopicKey},
    transport::TransportEvent,
};
use pretty_assertions::assert_eq;
use tokio::time::sleep;

fn standing_entries() -> Vec<SubscriptionEntry> {
    vec![
        SubscriptionEntry {
            topic_key: TopicKey::Personal,
            topic_address: "/user/queue/personal".to_string(),
            active: true,
        },
        SubscriptionEntry {
            topic_key: TopicKey::Matching,
            topic_address: "/user/queue/matching-result".to_string(),
            active: true,
        },
        SubscriptionEntry {
            topic_key: TopicKey::System,
            topic_address: "/topic/system-status".to_string(),
            active: true,
        },
    ]
}

#[test_log::test(tokio::test(start_paused = true))]
async fn connect_establishes_standing_subscriptions() {
    let transport = MockTransport::new(OpenBehavior::Accept);
    let connects = Recorded::default();
    let client = client(&transport);
    let listener = connects.clone();
    client.on_connect(move || listener.push(()));

    client.connect();
    sleep(SETTLE).await;

    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert_eq!(snapshot.entries, standing_entries());
    assert_eq!(snapshot.reconnect_attempt, 0);
    assert_eq!(client.connection_status(), ConnectionState::Connected);
    assert_eq!(connects.len(), 1);
    assert_eq!(
        transport.latest().sink.subscribed_destinations(),
        vec![
            "/user/queue/personal".to_string(),
            "/user/queue/matching-result".to_string(),
            "/topic/system-status".to_string(),
        ]
    );
}

#[test_log::test(tokio::test(start_paused = true))]
async fn connect_while_connected_is_a_no_op() {
    let transport = MockTransport::new(OpenBehavior::Accept);
    let (client, _connection) = connected_client(&transport).await;

    client.connect();
    sleep(SETTLE).await;

    assert_eq!(transport.opens(), 1);
    assert_eq!(client.snapshot().await.unwrap().entries, standing_entries());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn lost_connection_schedules_a_reconnect() {
    let transport = MockTransport::new(OpenBehavior::Accept);
    let (client, connection) = connected_client(&transport).await;
    let disconnects = Recorded::default();
    let errors = Recorded::default();
    let listener = disconnects.clone();
    client.on_disconnect(move || listener.push(()));
    let listener = errors.clone();
    client.on_error(move |error| listener.push(error.to_string()));

    connection.close(Some("network reset")).await;
    let snapshot = client.snapshot().await.unwrap();

    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert!(snapshot.entries.is_empty());
    assert_eq!(snapshot.reconnect_attempt, 1);
    assert_eq!(snapshot.pending_reconnect, Some(Duration::from_millis(2000)));
    assert_eq!(disconnects.len(), 1);
    assert_eq!(errors.take(), vec!["Connection lost: network reset".to_string()]);
    assert!(connection.sink.is_closed());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn reconnect_resets_the_attempt_counter_and_resubscribes() {
    let transport = MockTransport::new(OpenBehavior::Accept);
    let (client, connection) = connected_client(&transport).await;

    connection.close(None).await;
    sleep(Duration::from_millis(2000) + SETTLE).await;

    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(transport.opens(), 2);
    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert_eq!(snapshot.reconnect_attempt, 0);
    assert_eq!(snapshot.pending_reconnect, None);
    assert_eq!(snapshot.entries, standing_entries());
    assert_eq!(transport.latest().sink.subscribed_destinations().len(), 3);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn reconnect_gives_up_after_the_attempt_bound() {
    let transport = MockTransport::new(OpenBehavior::Refuse);
    let client = client(&transport);
    let errors = Recorded::default();
    let listener = errors.clone();
    client.on_error(move |error| listener.push(error.to_string()));

    client.connect();
    sleep(Duration::from_secs(120)).await;

    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(transport.opens(), 6);
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert_eq!(snapshot.pending_reconnect, None);
    assert_eq!(snapshot.reconnect_attempt, 5);

    let errors = errors.take();
    assert_eq!(errors.len(), 7);
    assert_eq!(
        errors.last().map(String::as_str),
        Some("Gave up reconnecting after 5 attempts")
    );

    transport.set_behavior(OpenBehavior::Accept);
    client.connect();
    sleep(SETTLE).await;

    assert_eq!(client.connection_status(), ConnectionState::Connected);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn reconnect_delays_grow_exponentially() {
    let transport = MockTransport::new(OpenBehavior::Refuse);
    let client = client(&transport);

    client.connect();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(
        client.snapshot().await.unwrap().pending_reconnect,
        Some(Duration::from_millis(2000))
    );

    sleep(Duration::from_millis(2000)).await;
    assert_eq!(
        client.snapshot().await.unwrap().pending_reconnect,
        Some(Duration::from_millis(4000))
    );

    sleep(Duration::from_millis(4000)).await;
    assert_eq!(
        client.snapshot().await.unwrap().pending_reconnect,
        Some(Duration::from_millis(8000))
    );
    assert_eq!(transport.opens(), 3);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn disconnect_cancels_a_pending_reconnect() {
    let transport = MockTransport::new(OpenBehavior::Accept);
    let (client, connection) = connected_client(&transport).await;

    connection.close(None).await;
    client.disconnect();
    sleep(Duration::from_secs(60)).await;

    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(transport.opens(), 1);
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert_eq!(snapshot.pending_reconnect, None);
    assert_eq!(snapshot.reconnect_attempt, 0);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn disconnect_releases_subscriptions_and_closes() {
    let transport = MockTransport::new(OpenBehavior::Accept);
    let (client, connection) = connected_client(&transport).await;
    let disconnects = Recorded::default();
    let listener = disconnects.clone();
    client.on_disconnect(move || listener.push(()));

    client.disconnect();
    client.disconnect();
    let snapshot = client.snapshot().await.unwrap();

    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert!(snapshot.entries.is_empty());
    assert_eq!(disconnects.len(), 1);

    let calls = connection.sink.calls();
    assert_eq!(calls.last(), Some(&SinkCall::Close));
    assert_eq!(
        calls
            .iter()
            .filter(|call| matches!(call, SinkCall::Unsubscribe { .. }))
            .count(),
        3
    );
}

#[test_log::test(tokio::test(start_paused = true))]
async fn unauthorized_is_not_retried() {
    let transport = MockTransport::new(OpenBehavior::Unauthorized);
    let client = client(&transport);
    let errors = Recorded::default();
    let listener = errors.clone();
    client.on_error(move |error| listener.push(error.to_string()));

    client.connect();
    sleep(Duration::from_secs(60)).await;

    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(transport.opens(), 1);
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert_eq!(snapshot.pending_reconnect, None);
    assert_eq!(errors.take(), vec!["Unauthorized".to_string()]);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn server_error_frame_is_reported_and_retried() {
    let transport = MockTransport::new(OpenBehavior::Accept);
    let (client, connection) = connected_client(&transport).await;
    let errors = Recorded::default();
    let listener = errors.clone();
    client.on_error(move |error| listener.push(error.to_string()));

    connection
        .send(TransportEvent::Error("Invalid destination".to_string()))
        .await;
    let snapshot = client.snapshot().await.unwrap();

    assert_eq!(errors.take(), vec!["Server error: Invalid destination".to_string()]);
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert_eq!(snapshot.pending_reconnect, Some(Duration::from_millis(2000)));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn status_changes_are_observable() {
    let transport = MockTransport::new(OpenBehavior::Accept);
    let client = client(&transport);
    let mut status = client.watch_status();

    client.connect();
    status
        .wait_for(|state| *state == ConnectionState::Connected)
        .await
        .unwrap();

    client.disconnect();
    status
        .wait_for(|state| *state == ConnectionState::Disconnected)
        .await
        .unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn shutdown_closes_the_connection() {
    let transport = MockTransport::new(OpenBehavior::Accept);
    let (client, connection) = connected_client(&transport).await;

    client.shutdown().await;

    assert!(connection.sink.is_closed());
    assert!(client.snapshot().await.is_err());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn missing_connected_frame_times_out_and_retries() {
    let transport = MockTransport::new(OpenBehavior::Silent);
    let client = client(&transport);
    let errors = Recorded::default();
    let listener = errors.clone();
    client.on_error(move |error| listener.push(error.to_string()));

    client.connect();
    sleep(Duration::from_secs(9)).await;
    assert_eq!(client.snapshot().await.unwrap().state, ConnectionState::Connecting);

    sleep(Duration::from_secs(1) + Duration::from_millis(1)).await;
    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert_eq!(snapshot.reconnect_attempt, 1);
    assert_eq!(snapshot.pending_reconnect, Some(Duration::from_millis(2000)));
    assert_eq!(errors.take(), vec!["No CONNECTED frame within 10s".to_string()]);
    assert!(transport.latest().sink.is_closed());

    transport.set_behavior(OpenBehavior::Accept);
    sleep(Duration::from_millis(2000) + SETTLE).await;

    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(transport.opens(), 2);
    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert_eq!(snapshot.entries, standing_entries());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn handshake_timer_does_not_fire_once_connected() {
    let transport = MockTransport::new(OpenBehavior::Accept);
    let (client, _connection) = connected_client(&transport).await;

    sleep(Duration::from_secs(30)).await;

    let snapshot = client.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ConnectionState::Connected);
    assert_eq!(transport.opens(), 1);
}
