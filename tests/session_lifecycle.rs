use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use ble_led_controller::fake::{FakeBackend, FakeEvent};
use ble_led_controller::observer::{ChannelObserver, ObserverRegistry};
use ble_led_controller::protocol::NOTIFY_CHAR_UUID;
use ble_led_controller::{
    Backend, CommandError, ControllerConfig, Error, NotificationObserver, Session, SessionState,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

const ADDRESS: &str = "AA:BB:CC:DD:EE:01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POWER_ON: [u8; 3] = [0xcc, 0x23, 0x33];
const POWER_OFF: [u8; 3] = [0xcc, 0x24, 0x33];

fn config() -> ControllerConfig {
    ControllerConfig::default().with_command_delay(Duration::ZERO)
}

fn session_with(fake: &FakeBackend, observers: Arc<ObserverRegistry>) -> Session {
    Session::new(ADDRESS, fake.transport(), observers, &config())
}

fn session(fake: &FakeBackend) -> Session {
    session_with(fake, Arc::new(ObserverRegistry::new()))
}

#[tokio::test]
async fn open_connects_then_subscribes() -> ble_led_controller::Result<()> {
    let fake = FakeBackend::default();
    let session = session(&fake);
    assert_eq!(SessionState::Disconnected, session.state());

    session.open(CONNECT_TIMEOUT).await?;

    assert_eq!(SessionState::Connected, session.state());
    assert_eq!(
        vec![
            FakeEvent::Connect {
                transport: 0,
                address: ADDRESS.to_string()
            },
            FakeEvent::Subscribe {
                transport: 0,
                characteristic: NOTIFY_CHAR_UUID
            },
        ],
        fake.events()
    );
    Ok(())
}

#[tokio::test]
async fn opening_twice_is_a_no_op() -> ble_led_controller::Result<()> {
    let fake = FakeBackend::default();
    let session = session(&fake);

    session.open(CONNECT_TIMEOUT).await?;
    session.open(CONNECT_TIMEOUT).await?;

    assert_eq!(SessionState::Connected, session.state());
    assert_eq!(2, fake.events().len());
    Ok(())
}

#[tokio::test]
async fn connect_failure_leaves_session_disconnected() {
    let fake = FakeBackend::default().fail_connect();
    let session = session(&fake);

    let err = session.open(CONNECT_TIMEOUT).await.unwrap_err();

    assert_matches!(err, Error::ConnectionFailure { ref address, .. } if address == ADDRESS);
    assert_eq!(SessionState::Disconnected, session.state());
    assert!(!fake
        .events()
        .iter()
        .any(|e| matches!(e, FakeEvent::Subscribe { .. })));
}

#[tokio::test]
async fn subscribe_failure_rolls_back_the_connection() {
    let fake = FakeBackend::default().fail_subscribe();
    let session = session(&fake);

    let err = session.open(CONNECT_TIMEOUT).await.unwrap_err();

    assert_matches!(err, Error::ConnectionFailure { .. });
    assert_eq!(SessionState::Disconnected, session.state());
    assert_eq!(Some(&FakeEvent::Disconnect { transport: 0 }), fake.events().last());
    assert!(!fake.is_link_up(0));
}

#[tokio::test(start_paused = true)]
async fn slow_connect_times_out_and_rolls_back() {
    let fake = FakeBackend::default().delay_connect(Duration::from_secs(30));
    let session = session(&fake);

    let err = session.open(CONNECT_TIMEOUT).await.unwrap_err();

    assert!(err.is_timeout());
    assert_matches!(err, Error::Timeout { operation: "connect", after } if after == CONNECT_TIMEOUT);
    assert_eq!(SessionState::Disconnected, session.state());
    assert_eq!(Some(&FakeEvent::Disconnect { transport: 0 }), fake.events().last());
}

#[tokio::test]
async fn link_left_up_by_failed_connect_is_dropped() {
    let fake = FakeBackend::default().fail_after_link();
    let session = session(&fake);

    let err = session.open(CONNECT_TIMEOUT).await.unwrap_err();

    assert_matches!(err, Error::ConnectionFailure { .. });
    assert_eq!(SessionState::Disconnected, session.state());
    assert_eq!(Some(&FakeEvent::Disconnect { transport: 0 }), fake.events().last());
    assert!(!fake.is_link_up(0));
}

#[tokio::test(start_paused = true)]
async fn slow_subscribe_times_out_and_rolls_back() {
    let fake = FakeBackend::default().delay_subscribe(Duration::from_secs(30));
    let session = session(&fake);

    let err = session.open(CONNECT_TIMEOUT).await.unwrap_err();

    assert_matches!(err, Error::Timeout { operation: "connect", .. });
    assert_eq!(SessionState::Disconnected, session.state());
    let events = fake.events();
    assert!(events.iter().any(|e| matches!(e, FakeEvent::Subscribe { .. })));
    assert_eq!(Some(&FakeEvent::Disconnect { transport: 0 }), events.last());
    assert!(!fake.is_link_up(0));
}

#[tokio::test(start_paused = true)]
async fn slow_write_times_out_and_keeps_session() -> ble_led_controller::Result<()> {
    let fake = FakeBackend::default().delay_writes(Duration::from_secs(60));
    let session = session(&fake);
    session.open(CONNECT_TIMEOUT).await?;

    let err = session.write(&POWER_ON).await.unwrap_err();

    assert!(err.is_timeout());
    assert_matches!(
        err,
        Error::Timeout { operation: "write", after } if after == config().write_timeout
    );
    assert_eq!(SessionState::Connected, session.state());
    assert!(fake.writes().is_empty());
    Ok(())
}

#[tokio::test]
async fn write_requires_connected_state() -> ble_led_controller::Result<()> {
    let fake = FakeBackend::default();
    let session = session(&fake);

    let err = session.write(&POWER_ON).await.unwrap_err();
    assert_matches!(
        err,
        Error::Command(CommandError::NotConnected {
            state: SessionState::Disconnected
        })
    );

    session.open(CONNECT_TIMEOUT).await?;
    session.close().await;

    let err = session.write(&POWER_ON).await.unwrap_err();
    assert_matches!(err, Error::Command(CommandError::NotConnected { .. }));
    assert!(fake.writes().is_empty());
    Ok(())
}

#[tokio::test]
async fn writes_from_one_caller_keep_their_order() -> ble_led_controller::Result<()> {
    let fake = FakeBackend::default();
    let session = session(&fake);
    session.open(CONNECT_TIMEOUT).await?;

    session.write(&POWER_ON).await?;
    session.write(&POWER_OFF).await?;

    assert_eq!(vec![POWER_ON.to_vec(), POWER_OFF.to_vec()], fake.writes());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn concurrent_writes_never_overlap() -> ble_led_controller::Result<()> {
    let fake = FakeBackend::default().delay_writes(Duration::from_millis(50));
    let session = session(&fake);
    session.open(CONNECT_TIMEOUT).await?;

    let frames: Vec<[u8; 3]> = (0..5).map(|i| [0xcc, 0x23 + (i % 2), 0x33]).collect();
    let results = futures::future::join_all(frames.iter().map(|f| session.write(f))).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(5, fake.writes().len());
    assert_eq!(1, fake.max_concurrent_writes());
    Ok(())
}

#[tokio::test]
async fn failed_write_keeps_session_while_link_is_up() -> ble_led_controller::Result<()> {
    let fake = FakeBackend::default();
    let session = session(&fake);
    session.open(CONNECT_TIMEOUT).await?;

    fake.set_fail_write(true, false);
    let err = session.write(&POWER_ON).await.unwrap_err();
    assert_matches!(err, Error::Command(CommandError::WriteFailed(_)));
    assert_eq!(SessionState::Connected, session.state());

    fake.set_fail_write(false, false);
    session.write(&POWER_ON).await?;
    assert_eq!(vec![POWER_ON.to_vec()], fake.writes());
    Ok(())
}

#[tokio::test]
async fn failed_write_on_dead_link_disconnects() -> ble_led_controller::Result<()> {
    let fake = FakeBackend::default();
    let session = session(&fake);
    session.open(CONNECT_TIMEOUT).await?;

    fake.set_fail_write(true, true);
    let err = session.write(&POWER_ON).await.unwrap_err();

    assert_matches!(err, Error::Command(CommandError::WriteFailed(_)));
    assert_eq!(SessionState::Disconnected, session.state());
    Ok(())
}

#[tokio::test]
async fn close_unsubscribes_before_disconnecting() -> ble_led_controller::Result<()> {
    let fake = FakeBackend::default();
    let session = session(&fake);
    session.open(CONNECT_TIMEOUT).await?;

    session.close().await;

    let events = fake.events();
    assert_eq!(
        &[
            FakeEvent::Unsubscribe {
                transport: 0,
                characteristic: NOTIFY_CHAR_UUID
            },
            FakeEvent::Disconnect { transport: 0 },
        ],
        &events[2..]
    );
    assert_eq!(SessionState::Disconnected, session.state());
    Ok(())
}

#[tokio::test]
async fn close_swallows_transport_errors() -> ble_led_controller::Result<()> {
    let fake = FakeBackend::default().fail_disconnect();
    let session = session(&fake);
    session.open(CONNECT_TIMEOUT).await?;

    session.close().await;
    session.close().await;

    assert_eq!(SessionState::Disconnected, session.state());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn close_waits_for_in_flight_write() -> ble_led_controller::Result<()> {
    let fake = FakeBackend::default().delay_writes(Duration::from_secs(1));
    let session = Arc::new(session(&fake));
    session.open(CONNECT_TIMEOUT).await?;

    let writer = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.write(&POWER_ON).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    session.close().await;

    assert_matches!(writer.await, Ok(Ok(())));
    let events = fake.events();
    let write = events
        .iter()
        .position(|e| matches!(e, FakeEvent::Write { .. }));
    let unsubscribe = events
        .iter()
        .position(|e| matches!(e, FakeEvent::Unsubscribe { .. }));
    assert!(write < unsubscribe);
    Ok(())
}

#[tokio::test]
async fn state_changes_are_observable() -> ble_led_controller::Result<()> {
    let fake = FakeBackend::default();
    let session = session(&fake);
    let mut states = session.watch_state();

    session.open(CONNECT_TIMEOUT).await?;
    assert_eq!(SessionState::Connected, *states.borrow_and_update());

    session.close().await;
    assert_eq!(SessionState::Disconnected, *states.borrow_and_update());
    Ok(())
}

#[tokio::test]
async fn notifications_reach_observers_in_order() -> ble_led_controller::Result<()> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let observers = Arc::new(ObserverRegistry::new());
    {
        let log = Arc::clone(&log);
        observers.register(Arc::new(move |data: &[u8]| log.lock().push(data.to_vec())));
    }
    let panicking: Arc<dyn NotificationObserver> =
        Arc::new(|_: &[u8]| panic!("observer failure"));
    observers.register(panicking);
    let (tail, mut received) = ChannelObserver::channel();
    observers.register(Arc::new(tail));

    let fake = FakeBackend::default();
    let session = session_with(&fake, observers);
    session.open(CONNECT_TIMEOUT).await?;

    assert!(fake.notify(&[0x66, 0x01]));
    assert!(fake.notify(&[0x66, 0x02]));

    for expected in [[0x66, 0x01], [0x66, 0x02]] {
        let data = tokio::time::timeout(Duration::from_secs(1), received.recv())
            .await
            .ok()
            .flatten();
        assert_eq!(Some(expected.to_vec()), data);
    }
    assert_eq!(vec![vec![0x66, 0x01], vec![0x66, 0x02]], *log.lock());

    session.close().await;
    assert!(!fake.notify(&[0x66, 0x03]));
    Ok(())
}
