mod common;

use std::time::Duration;

use candyscale::frame::{encode, Command};
use candyscale::{
    ButtonPressed, ConnectionState, ScaleClient, ScaleConfig, ScaleError, ScaleEvent,
    TransportError, UnitScale,
};
use common::{eventually, wait_for_state, MockTransport};

fn spawn(transport: &MockTransport) -> ScaleClient {
    ScaleClient::spawn(transport.clone(), ScaleConfig::default())
}

fn count(writes: &[Vec<u8>], command: Command) -> usize {
    let bytes = encode(command);
    writes.iter().filter(|w| **w == bytes).count()
}

#[tokio::test(start_paused = true)]
async fn test_connect_runs_handshake_in_order() {
    let transport = MockTransport::new();
    let client = spawn(&transport);

    client.connect().await.unwrap();

    assert_eq!(client.connection_state(), ConnectionState::Connected);
    assert_eq!(
        transport.writes(),
        vec![
            encode(Command::Identify),
            encode(Command::NotificationRequest),
            encode(Command::Heartbeat)
        ]
    );
    let diagnostics = client.diagnostics();
    assert_eq!(diagnostics.write_count, 3);
    assert!(diagnostics.connection_start_time.is_some());
    assert!(diagnostics.last_heartbeat_time.is_some());
    assert_eq!(client.last_error(), None);
}

#[tokio::test(start_paused = true)]
async fn test_connect_twice_is_a_no_op() {
    let transport = MockTransport::new();
    let client = spawn(&transport);

    client.connect().await.unwrap();
    client.connect().await.unwrap();

    assert_eq!(transport.scans(), 1);
    assert_eq!(transport.writes().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_split_frame_yields_one_weight() {
    let transport = MockTransport::new();
    let client = spawn(&transport);
    client.connect().await.unwrap();
    let mut events = client.subscribe_events();

    transport.push(&hex::decode("efdd05").unwrap()).await;
    transport.push(&hex::decode("0400001388efdd080200d4").unwrap()).await;

    let mut battery = client.watch_battery();
    battery.wait_for(|level| level.is_some()).await.unwrap();

    let sample = client.weight().unwrap();
    assert_eq!(sample.unit_scale, UnitScale::Deci);
    assert_eq!(client.current_weight_grams(), 500.0);
    assert_eq!(client.battery_percent(), Some(84));

    assert!(matches!(events.recv().await, Ok(ScaleEvent::Weight(w)) if w == sample));
    assert!(matches!(events.recv().await, Ok(ScaleEvent::Battery(b)) if b.percent() == 84));
    assert!(events.try_recv().is_err());
    assert_eq!(client.diagnostics().notification_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_button_events_are_broadcast() {
    let transport = MockTransport::new();
    let client = spawn(&transport);
    client.connect().await.unwrap();
    let mut events = client.subscribe_events();

    transport.push(&hex::decode("efdd0c03080005").unwrap()).await;

    let event = events.recv().await.unwrap();
    assert_eq!(event, ScaleEvent::Button(ButtonPressed::Tare));
    assert_eq!(client.weight(), None);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_frames_are_counted() {
    let transport = MockTransport::new();
    let client = spawn(&transport);
    client.connect().await.unwrap();

    // No marker, unknown type, negative weight
    transport.push(&hex::decode("0102030405").unwrap()).await;
    transport.push(&hex::decode("efdd0702aabb").unwrap()).await;
    transport.push(&hex::decode("efdd050402010064").unwrap()).await;

    eventually(|| client.diagnostics().notification_count == 3).await;
    let diagnostics = client.diagnostics();
    assert_eq!(diagnostics.malformed_scans, 1);
    assert_eq!(diagnostics.discarded_bytes, 5);
    assert_eq!(diagnostics.ignored_frames, 2);
    assert_eq!(diagnostics.implausible_readings, 1);
    assert_eq!(client.weight(), None);
}

#[tokio::test(start_paused = true)]
async fn test_tare_requires_connection() {
    let transport = MockTransport::new();
    let client = spawn(&transport);

    assert_eq!(client.tare().await, Err(ScaleError::NotConnected));
    assert!(transport.writes().is_empty());

    client.connect().await.unwrap();
    client.tare().await.unwrap();
    assert_eq!(transport.writes().last(), Some(&encode(Command::Tare)));
    assert_eq!(client.diagnostics().write_count, 4);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_on_interval() {
    let transport = MockTransport::new();
    let client = spawn(&transport);
    client.connect().await.unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;

    // One from the handshake, then every three seconds
    assert_eq!(count(&transport.writes(), Command::Heartbeat), 4);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_timers_and_clears_buffer() {
    let transport = MockTransport::new();
    let client = spawn(&transport);
    client.connect().await.unwrap();
    transport.push(&hex::decode("efdd0504").unwrap()).await;

    client.disconnect().await.unwrap();
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(transport.disconnects(), 1);

    let writes = transport.writes().len();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.writes().len(), writes);
    assert_eq!(transport.scans(), 1);

    // The half frame from the first session must not complete in the second
    client.connect().await.unwrap();
    transport.push(&hex::decode("00001388").unwrap()).await;
    transport.push(&hex::decode("efdd050400010064").unwrap()).await;
    let mut weight = client.watch_weight();
    weight.wait_for(|w| w.is_some()).await.unwrap();
    assert_eq!(client.current_weight_grams(), 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_when_idle() {
    let transport = MockTransport::new();
    let client = spawn(&transport);

    client.disconnect().await.unwrap();

    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(transport.disconnects(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_connect() {
    let transport = MockTransport::new();
    transport.hang_scans();
    let client = spawn(&transport);

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    wait_for_state(&client, ConnectionState::Scanning).await;
    assert_eq!(
        client.connect().await,
        Err(ScaleError::InvalidState(ConnectionState::Scanning))
    );

    client.disconnect().await.unwrap();

    assert_eq!(pending.await.unwrap(), Err(ScaleError::Cancelled));
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_drop_reconnects_once() {
    let transport = MockTransport::new();
    let client = spawn(&transport);
    client.connect().await.unwrap();

    let dropped_at = tokio::time::Instant::now();
    transport.drop_link();
    wait_for_state(&client, ConnectionState::Reconnecting).await;

    let diagnostics = client.diagnostics();
    assert_eq!(diagnostics.unexpected_disconnects, 1);
    assert_eq!(diagnostics.session_history.len(), 1);
    assert_eq!(diagnostics.session_history[0].writes, 3);
    assert!(diagnostics.connection_start_time.is_none());

    wait_for_state(&client, ConnectionState::Connected).await;
    assert_eq!(transport.scans(), 2);
    assert_eq!(transport.connects(), 2);

    let backoff = ScaleConfig::default().reconnect_backoff;
    let rescan = transport.scan_times()[1].duration_since(dropped_at);
    assert!(rescan >= backoff, "rescanned after {rescan:?}");
    assert!(rescan < backoff + Duration::from_millis(100), "rescanned after {rescan:?}");
}

#[tokio::test(start_paused = true)]
async fn test_failed_reconnect_disables_auto_reconnect() {
    let transport = MockTransport::new();
    let client = spawn(&transport);
    client.connect().await.unwrap();

    transport.fail_next_scan(TransportError::NotFound);
    transport.drop_link();
    wait_for_state(&client, ConnectionState::Reconnecting).await;
    wait_for_state(&client, ConnectionState::Disconnected).await;

    assert_eq!(client.last_error(), Some(ScaleError::DeviceNotFound));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.scans(), 2);
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    // An explicit connect re-enables it
    client.connect().await.unwrap();
    assert_eq!(client.last_error(), None);
    transport.drop_link();
    wait_for_state(&client, ConnectionState::Reconnecting).await;
}

#[tokio::test(start_paused = true)]
async fn test_drop_without_auto_reconnect() {
    let transport = MockTransport::new();
    let config = ScaleConfig::default().with_auto_reconnect(false);
    let client = ScaleClient::spawn(transport.clone(), config);
    client.connect().await.unwrap();

    transport.drop_link();
    wait_for_state(&client, ConnectionState::Disconnected).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.scans(), 1);
    assert_eq!(client.diagnostics().unexpected_disconnects, 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_backoff() {
    let transport = MockTransport::new();
    let client = spawn(&transport);
    client.connect().await.unwrap();

    transport.drop_link();
    wait_for_state(&client, ConnectionState::Reconnecting).await;
    client.disconnect().await.unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.scans(), 1);
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_scan_timeout_reports_device_not_found() {
    let transport = MockTransport::new();
    transport.hang_scans();
    let client = spawn(&transport);

    assert_eq!(client.connect().await, Err(ScaleError::DeviceNotFound));
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.scans(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_matching_device() {
    let transport = MockTransport::with_device_name("BT_HC6172");
    let client = spawn(&transport);

    assert_eq!(client.connect().await, Err(ScaleError::DeviceNotFound));
    assert_eq!(transport.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_adapter_failure_is_reported() {
    let transport = MockTransport::new();
    transport.fail_next_scan(TransportError::Unavailable("powered off".to_string()));
    let client = spawn(&transport);

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, ScaleError::TransportUnavailable(_)), "{err:?}");
    assert_eq!(client.last_error(), Some(err));
}

#[tokio::test(start_paused = true)]
async fn test_handshake_write_failure() {
    let transport = MockTransport::new();
    transport.fail_writes_after(1);
    let client = spawn(&transport);

    let err = client.connect().await.unwrap_err();

    assert!(matches!(err, ScaleError::HandshakeFailed(_)), "{err:?}");
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(transport.disconnects(), 1);
    assert_eq!(transport.writes(), vec![encode(Command::Identify)]);
}

#[tokio::test(start_paused = true)]
async fn test_session_history_is_bounded() {
    let transport = MockTransport::new();
    let config = ScaleConfig::default().with_session_history_len(2);
    let client = ScaleClient::spawn(transport.clone(), config);

    for _ in 0..3 {
        client.connect().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        client.disconnect().await.unwrap();
    }

    let history = client.diagnostics().session_history;
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|s| s.duration >= Duration::from_secs(1)));
}

#[tokio::test(start_paused = true)]
async fn test_button_weight_is_published() {
    let transport = MockTransport::new();
    let client = spawn(&transport);
    client.connect().await.unwrap();
    let mut events = client.subscribe_events();

    // Tare pressed at 0.5 g
    transport.push(&hex::decode("efdd0c09080005320000000200").unwrap()).await;

    assert_eq!(events.recv().await.unwrap(), ScaleEvent::Button(ButtonPressed::Tare));
    assert!(matches!(events.recv().await, Ok(ScaleEvent::Weight(_))));
    assert_eq!(client.current_weight_grams(), 0.5);
}

#[tokio::test(start_paused = true)]
async fn test_failing_heartbeats_count_as_a_drop() {
    let transport = MockTransport::new();
    let client = spawn(&transport);
    client.connect().await.unwrap();
    let connected_at = tokio::time::Instant::now();

    transport.fail_writes_after(3);
    wait_for_state(&client, ConnectionState::Reconnecting).await;

    // Three rejected heartbeats, three seconds apart
    assert!(connected_at.elapsed() >= Duration::from_secs(9));
    assert_eq!(client.diagnostics().unexpected_disconnects, 1);
    assert_eq!(transport.disconnects(), 1);

    // The reconnection handshake is rejected too, so the link gives up
    wait_for_state(&client, ConnectionState::Disconnected).await;
    assert!(matches!(client.last_error(), Some(ScaleError::HandshakeFailed(_))));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.scans(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_to_vanished_device_is_a_drop() {
    let transport = MockTransport::new();
    let client = spawn(&transport);
    client.connect().await.unwrap();
    let connected_at = tokio::time::Instant::now();

    transport.fail_writes_after_with(3, TransportError::NotConnected);
    wait_for_state(&client, ConnectionState::Reconnecting).await;

    let elapsed = connected_at.elapsed();
    assert!(elapsed >= Duration::from_secs(3), "dropped after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(4), "dropped after {elapsed:?}");
    assert_eq!(client.diagnostics().unexpected_disconnects, 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_is_reported() {
    let transport = MockTransport::new();
    transport.fail_next_connect(TransportError::Other("refused".to_string()));
    let client = spawn(&transport);

    let err = client.connect().await.unwrap_err();

    assert!(matches!(err, ScaleError::ConnectFailed(_)), "{err:?}");
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(client.last_error(), Some(err));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.scans(), 1);
    assert_eq!(transport.connects(), 1);
    assert!(transport.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_failure_closes_session() {
    let transport = MockTransport::new();
    transport.fail_next_subscribe(TransportError::Other("notify refused".to_string()));
    let client = spawn(&transport);

    let err = client.connect().await.unwrap_err();

    assert!(matches!(err, ScaleError::ConnectFailed(_)), "{err:?}");
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(transport.disconnects(), 1);
    assert!(transport.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_connecting() {
    let transport = MockTransport::new();
    transport.hang_connects();
    let client = spawn(&transport);

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    wait_for_state(&client, ConnectionState::Connecting).await;

    client.disconnect().await.unwrap();

    assert_eq!(pending.await.unwrap(), Err(ScaleError::Cancelled));
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    // The connect timeout must not fire into the next session
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(client.last_error(), None);
    assert_eq!(transport.scans(), 1);
    assert_eq!(transport.disconnects(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_handshake() {
    let transport = MockTransport::new();
    let client = spawn(&transport);

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    wait_for_state(&client, ConnectionState::Handshaking).await;

    client.disconnect().await.unwrap();

    assert_eq!(pending.await.unwrap(), Err(ScaleError::Cancelled));
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(transport.disconnects(), 1);

    let writes = transport.writes();
    assert_eq!(count(&writes, Command::Heartbeat), 0);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.writes(), writes);
    assert_eq!(client.diagnostics().session_history.len(), 0);
}
