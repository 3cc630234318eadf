//! Owned registry of device sessions: the public entry point for
//! connecting, driving and observing wheel controllers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info};
use tokio::sync::watch;
use uuid::Uuid;

use crate::core::bluetooth::connection::{DeviceSession, SessionCommand, SessionHandle};
use crate::core::bluetooth::constants::UUID_RIDE_MODE_CHAR;
use crate::core::bluetooth::error::WheelError;
use crate::core::bluetooth::frame::RideMode;
use crate::core::bluetooth::platform::BlePlatform;
use crate::core::bluetooth::types::{ConnectionListener, ConnectionState, DeviceHandle, ListenerSet};
use crate::passcodes::PasscodeTable;

struct RegistryEntry {
    generation: u64,
    handle: SessionHandle,
}

struct RegistryInner {
    platform: Arc<dyn BlePlatform>,
    passcodes: Arc<PasscodeTable>,
    listeners: ListenerSet,
    connect_timeout: Duration,
    operation_timeout: Duration,
    entries: Mutex<HashMap<String, RegistryEntry>>,
    next_generation: AtomicU64,
}

impl RegistryInner {
    /// Removes the entry only while it still belongs to the session
    /// generation that ended; a newer session keeps its slot.
    fn remove_entry(&self, device_id: &str, generation: u64) {
        let mut entries = self.entries.lock().unwrap();
        if entries
            .get(device_id)
            .is_some_and(|e| e.generation == generation)
        {
            entries.remove(device_id);
            debug!("session entry for {} removed", device_id);
        }
    }
}

/// Maps device ids to live sessions and fans events out to one shared
/// listener set. An owned instance; construct it once with its platform
/// backend and passcode table and hand clones to callers.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new(
        platform: Arc<dyn BlePlatform>,
        passcodes: Arc<PasscodeTable>,
        connect_timeout: Duration,
        operation_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                platform,
                passcodes,
                listeners: ListenerSet::new(),
                connect_timeout,
                operation_timeout,
                entries: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Adds a listener; registering the same instance twice is a no-op
    pub fn register_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.inner.listeners.register(listener);
    }

    /// Removes a listener; unknown instances are ignored
    pub fn unregister_listener(&self, listener: &Arc<dyn ConnectionListener>) {
        self.inner.listeners.unregister(listener);
    }

    /// Starts a session for the device and returns its state watch.
    ///
    /// Fails fast with `AlreadyConnected` when a Ready session exists
    /// and `AlreadyConnecting` when a session is in any other live
    /// state (setup or teardown included).
    pub fn connect(&self, device_id: &str) -> Result<watch::Receiver<ConnectionState>, WheelError> {
        let mut entries = self.inner.entries.lock().unwrap();
        if let Some(entry) = entries.get(device_id) {
            match entry.handle.state() {
                ConnectionState::Ready => return Err(WheelError::AlreadyConnected),
                // Sessions are born Connecting, so Disconnected here
                // means the session ended but its removal has not run
                // yet
                ConnectionState::Disconnected => {
                    entries.remove(device_id);
                }
                _ => return Err(WheelError::AlreadyConnecting),
            }
        }

        info!("connecting to {}", device_id);
        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let (session, handle) = DeviceSession::new(
            DeviceHandle::new(device_id.to_string(), None),
            Arc::clone(&self.inner.platform),
            Arc::clone(&self.inner.passcodes),
            self.inner.listeners.clone(),
            self.inner.connect_timeout,
            self.inner.operation_timeout,
        );
        let state = handle.watch_state();
        entries.insert(device_id.to_string(), RegistryEntry { generation, handle });
        drop(entries);

        let registry = Arc::downgrade(&self.inner);
        let id = device_id.to_string();
        tokio::spawn(async move {
            session.run().await;
            if let Some(inner) = registry.upgrade() {
                inner.remove_entry(&id, generation);
            }
        });

        Ok(state)
    }

    /// Asks the device's session to tear itself down
    pub fn disconnect(&self, device_id: &str) -> Result<(), WheelError> {
        let entries = self.inner.entries.lock().unwrap();
        let entry = entries.get(device_id).ok_or(WheelError::NotConnected)?;
        if !entry.handle.send(SessionCommand::Disconnect) {
            return Err(WheelError::NotConnected);
        }
        Ok(())
    }

    /// Queues a characteristic read on a Ready session
    pub fn read_characteristic(&self, device_id: &str, uuid: Uuid) -> Result<(), WheelError> {
        self.send_ready_command(device_id, SessionCommand::Read(uuid))
    }

    /// Queues a characteristic write on a Ready session
    pub fn write_characteristic(
        &self,
        device_id: &str,
        uuid: Uuid,
        value: Vec<u8>,
    ) -> Result<(), WheelError> {
        self.send_ready_command(device_id, SessionCommand::Write(uuid, value))
    }

    /// Subscribes to a characteristic; values surface through
    /// `on_characteristic_changed`
    pub fn enable_notifications(&self, device_id: &str, uuid: Uuid) -> Result<(), WheelError> {
        self.send_ready_command(device_id, SessionCommand::EnableNotifications(uuid))
    }

    /// Builds the 20-byte mode command and writes it to the ride-mode
    /// characteristic
    pub fn set_ride_mode(&self, device_id: &str, mode: RideMode) -> Result<(), WheelError> {
        info!("setting ride mode {:?} on {}", mode, device_id);
        let command = mode.wire_command();
        self.send_ready_command(
            device_id,
            SessionCommand::Write(UUID_RIDE_MODE_CHAR, command.to_vec()),
        )
    }

    /// Current state of the device's session, if one is tracked
    pub fn state_of(&self, device_id: &str) -> Option<ConnectionState> {
        self.inner
            .entries
            .lock()
            .unwrap()
            .get(device_id)
            .map(|e| e.handle.state())
    }

    /// State watch for the device's session, if one is tracked
    pub fn watch_state(&self, device_id: &str) -> Option<watch::Receiver<ConnectionState>> {
        self.inner
            .entries
            .lock()
            .unwrap()
            .get(device_id)
            .map(|e| e.handle.watch_state())
    }

    /// True when the device has a session accepting operations
    pub fn is_ready(&self, device_id: &str) -> bool {
        self.state_of(device_id).is_some_and(|s| s.is_ready())
    }

    fn send_ready_command(
        &self,
        device_id: &str,
        command: SessionCommand,
    ) -> Result<(), WheelError> {
        let entries = self.inner.entries.lock().unwrap();
        let entry = entries.get(device_id).ok_or(WheelError::NotConnected)?;
        if !entry.handle.state().is_ready() {
            return Err(WheelError::NotReady);
        }
        if !entry.handle.send(command) {
            return Err(WheelError::NotConnected);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::core::bluetooth::constants::UUID_SERIAL_NUMBER_CHAR;
    use crate::core::bluetooth::mock::{MockLink, MockPlatform};

    const TEST_TIMEOUT: Duration = Duration::from_millis(200);

    fn provisioned_platform() -> (Arc<MockPlatform>, Arc<MockLink>) {
        let platform = MockPlatform::new();
        let link = MockLink::with_wheel_service();
        link.set_read_value(UUID_SERIAL_NUMBER_CHAR, b"ABCDEFGHIJKLMN\x00\x00".to_vec());
        platform.add_device("wheel-1", link.clone());
        (platform, link)
    }

    fn registry(platform: Arc<MockPlatform>) -> ConnectionRegistry {
        ConnectionRegistry::new(
            platform,
            Arc::new(PasscodeTable::parse("ABCDEFGHIJKLMN,A1B2C3")),
            TEST_TIMEOUT,
            TEST_TIMEOUT,
        )
    }

    async fn wait_until_ready(state: &mut watch::Receiver<ConnectionState>) {
        tokio::time::timeout(Duration::from_secs(2), state.wait_for(|s| s.is_ready()))
            .await
            .expect("ready wait timed out")
            .expect("state channel closed");
    }

    #[tokio::test]
    async fn second_connect_fails_fast_while_an_attempt_runs() {
        let platform = MockPlatform::new();
        platform.hang_connect("wheel-1");
        let registry = registry(platform);

        registry.connect("wheel-1").unwrap();
        assert!(matches!(
            registry.connect("wheel-1"),
            Err(WheelError::AlreadyConnecting)
        ));
    }

    #[tokio::test]
    async fn connect_on_ready_device_reports_already_connected() {
        let (platform, _link) = provisioned_platform();
        let registry = registry(platform);

        let mut state = registry.connect("wheel-1").unwrap();
        wait_until_ready(&mut state).await;

        assert!(matches!(
            registry.connect("wheel-1"),
            Err(WheelError::AlreadyConnected)
        ));
    }

    #[tokio::test]
    async fn operations_are_gated_on_readiness() {
        let platform = MockPlatform::new();
        platform.hang_connect("wheel-1");
        let registry = registry(platform);

        assert!(matches!(
            registry.read_characteristic("wheel-1", UUID_RIDE_MODE_CHAR),
            Err(WheelError::NotConnected)
        ));
        assert!(matches!(
            registry.disconnect("wheel-1"),
            Err(WheelError::NotConnected)
        ));

        registry.connect("wheel-1").unwrap();
        assert!(matches!(
            registry.read_characteristic("wheel-1", UUID_RIDE_MODE_CHAR),
            Err(WheelError::NotReady)
        ));
        assert!(!registry.is_ready("wheel-1"));
    }

    #[tokio::test]
    async fn set_ride_mode_writes_the_wire_command() {
        let (platform, link) = provisioned_platform();
        let registry = registry(platform);

        let mut state = registry.connect("wheel-1").unwrap();
        wait_until_ready(&mut state).await;

        registry.set_ride_mode("wheel-1", RideMode::Eco).unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if let Some((uuid, bytes)) = link.writes().last() {
                if *uuid == UUID_RIDE_MODE_CHAR {
                    assert_eq!(bytes.as_slice(), RideMode::Eco.wire_command().as_slice());
                    break;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "mode write never landed"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn entries_are_removed_once_a_session_ends() {
        let (platform, _link) = provisioned_platform();
        let registry = registry(platform);

        let mut state = registry.connect("wheel-1").unwrap();
        wait_until_ready(&mut state).await;

        registry.disconnect("wheel-1").unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while registry.state_of("wheel-1").is_some() {
            assert!(
                tokio::time::Instant::now() < deadline,
                "entry never removed"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // the slot can be reused for a fresh attempt
        registry.connect("wheel-1").unwrap();
    }
}
