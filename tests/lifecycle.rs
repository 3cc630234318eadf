//! End-to-end lifecycle tests: the public registry API driven against
//! the scripted mock platform, from connect through authentication to
//! teardown.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ridewheel_bridge::core::bluetooth::{
    UUID_PASSCODE_CHAR, UUID_RIDE_MODE_CHAR, UUID_SERIAL_NUMBER_CHAR,
};
use ridewheel_bridge::{
    ConnectionListener, ConnectionRegistry, ConnectionState, DeviceHandle, MockLink, MockPlatform,
    PasscodeTable, RideMode, WheelError,
};
use tokio::sync::watch;
use uuid::Uuid;

const WHEEL_ID: &str = "wheel-1";

/// Records every listener hook in arrival order
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
    errors: Mutex<Vec<WheelError>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn errors(&self) -> Vec<WheelError> {
        self.errors.lock().unwrap().clone()
    }

    fn count_of(&self, label: &str) -> usize {
        self.events()
            .iter()
            .filter(|event| event.split(' ').next() == Some(label))
            .count()
    }
}

impl ConnectionListener for Recorder {
    fn on_setup_complete(&self, _device: &DeviceHandle) {
        self.events.lock().unwrap().push("ready".to_string());
    }

    fn on_disconnect(&self, _device: &DeviceHandle) {
        self.events.lock().unwrap().push("disconnected".to_string());
    }

    fn on_characteristic_read(&self, _device: &DeviceHandle, uuid: Uuid, value: &[u8]) {
        self.events
            .lock()
            .unwrap()
            .push(format!("read {} {:02x?}", uuid, value));
    }

    fn on_characteristic_write(&self, _device: &DeviceHandle, uuid: Uuid) {
        self.events.lock().unwrap().push(format!("write {}", uuid));
    }

    fn on_characteristic_changed(&self, _device: &DeviceHandle, uuid: Uuid, value: &[u8]) {
        self.events
            .lock()
            .unwrap()
            .push(format!("changed {} {:02x?}", uuid, value));
    }

    fn on_error(&self, _device: &DeviceHandle, error: &WheelError) {
        self.events.lock().unwrap().push(format!("error {}", error));
        self.errors.lock().unwrap().push(error.clone());
    }
}

fn provisioned_link() -> Arc<MockLink> {
    let link = MockLink::with_wheel_service();
    link.set_read_value(UUID_SERIAL_NUMBER_CHAR, b"ABCDEFGHIJKLMN".to_vec());
    link
}

fn registry_with(
    platform: Arc<MockPlatform>,
    passcodes: PasscodeTable,
) -> (ConnectionRegistry, Arc<Recorder>) {
    let registry = ConnectionRegistry::new(
        platform,
        Arc::new(passcodes),
        Duration::from_millis(500),
        Duration::from_millis(200),
    );
    let recorder = Arc::new(Recorder::default());
    registry.register_listener(recorder.clone());
    (registry, recorder)
}

/// Connects a provisioned wheel and waits until it is Ready
async fn ready_registry() -> (
    ConnectionRegistry,
    Arc<Recorder>,
    Arc<MockLink>,
    watch::Receiver<ConnectionState>,
) {
    let platform = MockPlatform::new();
    let link = provisioned_link();
    platform.add_device(WHEEL_ID, link.clone());
    let (registry, recorder) =
        registry_with(platform, PasscodeTable::parse("ABCDEFGHIJKLMN,A1B2C3"));

    let mut state = registry.connect(WHEEL_ID).expect("connect accepted");
    let reached = wait_for_state(&mut state, |s| s.is_ready()).await;
    assert_eq!(reached, ConnectionState::Ready);
    (registry, recorder, link, state)
}

async fn wait_for_state(
    state: &mut watch::Receiver<ConnectionState>,
    want: impl FnMut(&ConnectionState) -> bool,
) -> ConnectionState {
    match tokio::time::timeout(Duration::from_secs(2), state.wait_for(want)).await {
        Ok(Ok(reached)) => reached.clone(),
        Ok(Err(_)) => panic!("session state channel closed"),
        Err(_) => panic!("timed out waiting for a state change"),
    }
}

/// Polls a condition for up to two seconds before giving up
async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..80 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn wheel_authenticates_and_reports_ready_once() {
    let (_registry, recorder, link, _state) = ready_registry().await;

    eventually("setup completion", || recorder.count_of("ready") == 1).await;

    // Authentication wrote the decoded passcode, nothing else
    assert_eq!(
        link.writes(),
        vec![(UUID_PASSCODE_CHAR, vec![0xa1, 0xb2, 0xc3])]
    );

    // Serial read, passcode write, then the completion hook, in order
    let events = recorder.events();
    let read = events
        .iter()
        .position(|e| e.starts_with("read "))
        .expect("serial read event");
    let write = events
        .iter()
        .position(|e| e.starts_with("write "))
        .expect("passcode write event");
    let ready = events.iter().position(|e| e == "ready").expect("ready event");
    assert!(
        read < write && write < ready,
        "events out of order: {:?}",
        events
    );
    assert!(recorder.errors().is_empty());
}

#[tokio::test]
async fn back_to_back_connects_share_one_session() {
    let platform = MockPlatform::new();
    let link = provisioned_link();
    platform.add_device(WHEEL_ID, link.clone());
    let (registry, recorder) =
        registry_with(platform, PasscodeTable::parse("ABCDEFGHIJKLMN,A1B2C3"));

    // The second connect lands before the first session's task has run
    // at all; it must not displace the live attempt
    let mut state = registry.connect(WHEEL_ID).expect("connect accepted");
    assert!(matches!(
        registry.connect(WHEEL_ID),
        Err(WheelError::AlreadyConnecting)
    ));

    let reached = wait_for_state(&mut state, |s| s.is_ready()).await;
    assert_eq!(reached, ConnectionState::Ready);
    assert!(matches!(
        registry.connect(WHEEL_ID),
        Err(WheelError::AlreadyConnected)
    ));

    eventually("setup completion", || recorder.count_of("ready") == 1).await;
    // A duplicate session would authenticate well within this window
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.count_of("ready"), 1);
    assert_eq!(
        link.writes(),
        vec![(UUID_PASSCODE_CHAR, vec![0xa1, 0xb2, 0xc3])]
    );
}

#[tokio::test]
async fn unknown_serial_fails_with_no_passcode() {
    let platform = MockPlatform::new();
    let link = provisioned_link();
    platform.add_device(WHEEL_ID, link.clone());
    let (registry, recorder) = registry_with(platform, PasscodeTable::default());

    let mut state = registry.connect(WHEEL_ID).expect("connect accepted");
    wait_for_state(&mut state, |s| matches!(s, ConnectionState::Disconnected)).await;

    eventually("disconnect hook", || recorder.count_of("disconnected") == 1).await;
    assert_eq!(recorder.errors(), vec![WheelError::NoPasscode]);
    assert_eq!(recorder.count_of("ready"), 0);
    // Failure teardown still closes the platform link
    assert_eq!(link.disconnect_count(), 1);
}

#[tokio::test]
async fn hung_wheel_times_out_and_tears_down() {
    let platform = MockPlatform::new();
    let link = provisioned_link();
    link.hang_read(UUID_SERIAL_NUMBER_CHAR);
    platform.add_device(WHEEL_ID, link.clone());
    let (registry, recorder) =
        registry_with(platform, PasscodeTable::parse("ABCDEFGHIJKLMN,A1B2C3"));

    let mut state = registry.connect(WHEEL_ID).expect("connect accepted");
    wait_for_state(&mut state, |s| matches!(s, ConnectionState::Disconnected)).await;

    eventually("timeout error", || !recorder.errors().is_empty()).await;
    assert_eq!(recorder.errors(), vec![WheelError::OperationTimeout]);
    assert_eq!(recorder.count_of("ready"), 0);
}

#[tokio::test]
async fn requested_disconnect_drops_queued_operations() {
    let (registry, recorder, link, mut state) = ready_registry().await;
    link.hang_write(UUID_RIDE_MODE_CHAR);

    // Three writes stack up behind the first (hung) one
    registry
        .write_characteristic(WHEEL_ID, UUID_RIDE_MODE_CHAR, vec![0x01])
        .expect("write accepted");
    registry
        .write_characteristic(WHEEL_ID, UUID_RIDE_MODE_CHAR, vec![0x02])
        .expect("write accepted");
    registry
        .write_characteristic(WHEEL_ID, UUID_RIDE_MODE_CHAR, vec![0x03])
        .expect("write accepted");
    registry.disconnect(WHEEL_ID).expect("disconnect accepted");

    wait_for_state(&mut state, |s| matches!(s, ConnectionState::Disconnected)).await;
    eventually("disconnect hook", || recorder.count_of("disconnected") == 1).await;

    // The hung write was abandoned and the queued ones never ran
    assert_eq!(
        link.writes(),
        vec![(UUID_PASSCODE_CHAR, vec![0xa1, 0xb2, 0xc3])]
    );
    // An abandoned operation during a requested teardown is not an error
    assert!(recorder.errors().is_empty());
}

#[tokio::test]
async fn link_loss_ends_the_session() {
    let (registry, recorder, link, mut state) = ready_registry().await;

    link.drop_link();
    wait_for_state(&mut state, |s| matches!(s, ConnectionState::Disconnected)).await;

    eventually("disconnect hook", || recorder.count_of("disconnected") == 1).await;
    assert_eq!(link.disconnect_count(), 1);

    // The registry slot frees up and a fresh attempt is accepted
    eventually("registry entry removal", || {
        registry.state_of(WHEEL_ID).is_none()
    })
    .await;
    assert!(registry.connect(WHEEL_ID).is_ok());
}

#[tokio::test]
async fn notifications_reach_listeners() {
    let (registry, recorder, link, _state) = ready_registry().await;

    registry
        .enable_notifications(WHEEL_ID, UUID_RIDE_MODE_CHAR)
        .expect("subscribe accepted");
    eventually("subscription", || {
        link.push_notification(UUID_RIDE_MODE_CHAR, vec![0x2a])
    })
    .await;

    eventually("change event", || recorder.count_of("changed") >= 1).await;
    let events = recorder.events();
    let changed = events
        .iter()
        .find(|e| e.starts_with("changed"))
        .expect("changed event");
    assert_eq!(changed, &format!("changed {} [2a]", UUID_RIDE_MODE_CHAR));
}

#[tokio::test]
async fn ride_mode_switches_write_the_framed_commands() {
    let (registry, _recorder, link, _state) = ready_registry().await;

    for mode in [RideMode::Eco, RideMode::Standard, RideMode::Turbo] {
        registry
            .set_ride_mode(WHEEL_ID, mode)
            .expect("mode change accepted");
    }

    eventually("three mode writes", || link.writes().len() == 4).await;
    let writes = link.writes();
    let expected: Vec<(Uuid, Vec<u8>)> = [RideMode::Eco, RideMode::Standard, RideMode::Turbo]
        .into_iter()
        .map(|mode| (UUID_RIDE_MODE_CHAR, mode.wire_command().to_vec()))
        .collect();
    assert_eq!(&writes[1..], expected.as_slice());
}
