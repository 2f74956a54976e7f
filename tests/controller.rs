use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use ble_led_controller::fake::{FakeBackend, FakeEvent};
use ble_led_controller::observer::ChannelObserver;
use ble_led_controller::{
    Advertisement, Backend, Color, CommandError, ControllerConfig, DeviceFamily, Error,
    LedController, MusicInput, ProtocolViolation, SessionRegistry, SessionState, Timer,
    TimerAction,
};
use chrono::NaiveDate;
use pretty_assertions::assert_eq;

const ADDRESS: &str = "AA:BB:CC:DD:EE:01";

fn config() -> ControllerConfig {
    ControllerConfig::default()
        .with_command_delay(Duration::ZERO)
        .with_scan_duration(Duration::from_secs(1))
}

fn backend(fake: &FakeBackend) -> Arc<dyn Backend> {
    Arc::new(fake.clone())
}

async fn connected(fake: &FakeBackend) -> ble_led_controller::Result<LedController> {
    let mut controller = LedController::new(backend(fake), ADDRESS, config());
    controller.connect().await?;
    Ok(controller)
}

#[tokio::test]
async fn operations_write_their_frames() -> ble_led_controller::Result<()> {
    let fake = FakeBackend::default();
    let controller = connected(&fake).await?;

    controller.power_on().await?;
    controller.set_rgb(255, 0, 0, 50).await?;
    controller.set_rgbw(0, 0, 0, 255, 100).await?;
    controller.set_white(100).await?;
    controller.set_mode_by_id(0x26, 100).await?;
    controller.set_speed(300).await?;
    controller.set_music_mode(255, 0, MusicInput::LineIn).await?;
    controller.query_status().await?;
    controller.query_time().await?;
    controller.read_color_data().await?;
    controller.read_device_info().await?;
    controller.power_off().await?;

    assert_eq!(
        vec![
            vec![0xcc, 0x23, 0x33],
            vec![0x56, 0x7f, 0x00, 0x00, 0x00, 0xf0, 0xaa],
            vec![0x56, 0x00, 0x00, 0x00, 0xff, 0xf0, 0xaa],
            vec![0x56, 0x00, 0x00, 0x00, 0xff, 0xf0, 0xaa],
            vec![0xbb, 0x26, 0x64, 0x44],
            vec![0xff, 0xff, 0x00, 0x00],
            vec![0x64, 0x0f, 0xff, 0x00, 0x00, 0x0f, 0x76],
            vec![0xef, 0x01, 0x77],
            vec![0x24, 0x2a, 0x2b, 0x42],
            vec![0x1d, 0xf0, 0x00, 0xf1],
            vec![0xe5, 0xf0, 0x5e],
            vec![0xcc, 0x24, 0x33],
        ],
        fake.writes()
    );
    Ok(())
}

#[tokio::test]
async fn clock_and_timer_frames() -> ble_led_controller::Result<()> {
    let fake = FakeBackend::default();
    let controller = connected(&fake).await?;

    // A Wednesday
    let timestamp = NaiveDate::from_ymd_opt(2024, 3, 13)
        .and_then(|d| d.and_hms_opt(14, 5, 9))
        .expect("valid timestamp");
    controller.set_date_time(timestamp).await?;

    let timer = Timer::new(3, 7, 45)
        .with_days(0x3e)
        .with_action(TimerAction::TurnOff);
    controller.set_timer(&timer).await?;

    assert_eq!(
        vec![
            vec![0x10, 0x14, 0x09, 0x05, 0x0e, 0x0d, 0x03, 0x18, 0x03, 0x00, 0x00],
            vec![0x43, 0x43, 0xf0, 0x07, 0x2d, 0x00, 0x3e, 0x0f],
        ],
        fake.writes()
    );
    Ok(())
}

#[tokio::test]
async fn mode_names_resolve_through_the_catalog() -> ble_led_controller::Result<()> {
    let fake = FakeBackend::default();
    let controller = connected(&fake).await?;

    controller.set_mode_named("rainbow", 50).await?;
    controller.set_mode_named("0x2d", 20).await?;
    controller.set_mode_named("MODE_21", 5).await?;

    assert_eq!(
        vec![
            vec![0xbb, 0x2b, 0x32, 0x44],
            vec![0xbb, 0x2d, 0x14, 0x44],
            vec![0xbb, 0x61, 0x05, 0x44],
        ],
        fake.writes()
    );
    Ok(())
}

#[tokio::test]
async fn invalid_values_fail_before_any_write() -> ble_led_controller::Result<()> {
    let fake = FakeBackend::default();
    let controller = connected(&fake).await?;

    let err = controller.set_mode_by_id(0x99, 100).await.unwrap_err();
    assert_matches!(err, Error::Protocol(ProtocolViolation::UnknownMode(0x99)));

    let err = controller.set_mode_named("disco", 100).await.unwrap_err();
    assert_matches!(err, Error::Protocol(ProtocolViolation::UnknownModeName(_)));

    let err = controller.set_timer(&Timer::new(6, 8, 0)).await.unwrap_err();
    assert_matches!(err, Error::Protocol(ProtocolViolation::TimerSlotOutOfRange(6)));

    assert!(fake.writes().is_empty());
    assert!(controller.is_connected());
    Ok(())
}

#[tokio::test]
async fn protocol_violation_wins_over_missing_connection() {
    let fake = FakeBackend::default();
    let controller = LedController::new(backend(&fake), ADDRESS, config());

    let err = controller.set_timer(&Timer::new(9, 8, 0)).await.unwrap_err();
    assert_matches!(err, Error::Protocol(ProtocolViolation::TimerSlotOutOfRange(9)));

    let err = controller.power_on().await.unwrap_err();
    assert_matches!(
        err,
        Error::Command(CommandError::NotConnected {
            state: SessionState::Disconnected
        })
    );
    assert!(fake.events().is_empty());
}

#[tokio::test]
async fn out_of_range_color_is_clamped_not_rejected() -> ble_led_controller::Result<()> {
    let fake = FakeBackend::default();
    let controller = connected(&fake).await?;

    controller.set_rgb(300, -5, 128, 150).await?;
    controller.set_color(&Color::from_rgb(10, 20, 30, 0)).await?;

    assert_eq!(
        vec![
            vec![0x56, 0xff, 0x00, 0x80, 0x00, 0xf0, 0xaa],
            vec![0x56, 0x00, 0x00, 0x00, 0x00, 0xf0, 0xaa],
        ],
        fake.writes()
    );
    Ok(())
}

#[tokio::test]
async fn disconnect_then_commands_fail() -> ble_led_controller::Result<()> {
    let fake = FakeBackend::default();
    let mut controller = connected(&fake).await?;

    controller.disconnect().await;
    controller.disconnect().await;

    assert_eq!(SessionState::Disconnected, controller.state());
    assert_matches!(
        controller.power_on().await,
        Err(Error::Command(CommandError::NotConnected { .. }))
    );
    assert!(controller.registry().is_empty().await);
    Ok(())
}

#[tokio::test]
async fn second_controller_replaces_session_for_same_address() -> ble_led_controller::Result<()> {
    let fake = FakeBackend::default();
    let registry = Arc::new(SessionRegistry::new());

    let mut first = LedController::new(backend(&fake), ADDRESS, config())
        .with_registry(Arc::clone(&registry));
    first.connect().await?;
    let mut second = LedController::new(backend(&fake), &ADDRESS.to_lowercase(), config())
        .with_registry(Arc::clone(&registry));
    second.connect().await?;

    assert_eq!(SessionState::Disconnected, first.state());
    assert_eq!(SessionState::Connected, second.state());
    assert_eq!(vec![ADDRESS.to_string()], registry.addresses().await);

    // The old session was closed before the new one connected
    let events = fake.events();
    let closed = events
        .iter()
        .position(|e| *e == FakeEvent::Disconnect { transport: 0 });
    let reconnected = events
        .iter()
        .position(|e| matches!(e, FakeEvent::Connect { transport: 1, .. }));
    assert!(closed < reconnected);

    // Dropping the superseded controller must not evict the live session
    first.disconnect().await;
    assert_eq!(1, registry.len().await);

    second.disconnect().await;
    assert!(registry.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn failed_connect_leaves_no_registry_entry() {
    let fake = FakeBackend::default().fail_connect();
    let mut controller = LedController::new(backend(&fake), ADDRESS, config());

    assert_matches!(controller.connect().await, Err(Error::ConnectionFailure { .. }));
    assert_eq!(SessionState::Disconnected, controller.state());
    assert!(controller.registry().is_empty().await);
}

#[tokio::test]
async fn observers_receive_device_replies() -> ble_led_controller::Result<()> {
    let fake = FakeBackend::default();
    let controller = connected(&fake).await?;
    let (observer, mut replies) = ChannelObserver::channel();
    let id = controller.add_observer(Arc::new(observer));

    controller.query_status().await?;
    fake.notify(&[0x66, 0x15, 0x23, 0x41]);

    let reply = tokio::time::timeout(Duration::from_secs(1), replies.recv())
        .await
        .ok()
        .flatten();
    assert_eq!(Some(vec![0x66, 0x15, 0x23, 0x41]), reply);
    assert!(controller.remove_observer(id));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn connect_to_first_picks_strongest_known_device() -> ble_led_controller::Result<()> {
    let fake = FakeBackend::new(vec![
        Advertisement::new("11:11:11:11:11:11", Some("Speaker"), -20),
        Advertisement::new("22:22:22:22:22:22", Some("QHM-0C3F"), -71),
        Advertisement::new("33:33:33:33:33:33", Some("Triones-5A21"), -48),
    ]);

    let controller = LedController::connect_to_first(backend(&fake), config()).await?;

    assert_eq!("33:33:33:33:33:33", controller.address());
    assert_eq!(Some("Triones-5A21"), controller.name());
    assert_eq!(DeviceFamily::Triones, controller.family());
    assert!(controller.is_connected());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn connect_to_first_without_candidates_fails() {
    let fake = FakeBackend::new(vec![Advertisement::new("A", Some("Speaker"), -20)]);

    let result = LedController::connect_to_first(backend(&fake), config()).await;

    assert_matches!(result, Err(Error::NoCompatibleDevice));
}

#[tokio::test(start_paused = true)]
async fn explicit_address_must_be_a_known_family() {
    let fake = FakeBackend::new(vec![
        Advertisement::new("11:11:11:11:11:11", Some("Speaker"), -20),
        Advertisement::new("22:22:22:22:22:22", Some("QHM-0C3F"), -71),
    ]);

    let err = LedController::connect_to_address(backend(&fake), "11:11:11:11:11:11", config())
        .await
        .unwrap_err();
    assert_matches!(
        err,
        Error::UnsupportedDevice { ref name, .. } if name.as_deref() == Some("Speaker")
    );
    assert_eq!(0, fake.transports_created());

    let err = LedController::connect_to_address(backend(&fake), "99:99:99:99:99:99", config())
        .await
        .unwrap_err();
    assert_matches!(err, Error::DeviceNotFound(_));

    let controller =
        LedController::connect_to_address(backend(&fake), "22:22:22:22:22:22", config()).await;
    assert_matches!(controller, Ok(c) if c.family() == DeviceFamily::Qhm);
}
