//! Defines shared data structures for the Bluetooth module.

use std::fmt;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::core::bluetooth::constants::DEVICE_NAME_FALLBACK;
use crate::core::bluetooth::error::WheelError;

/// Represents a discovered wheel controller
#[derive(Debug, Clone)]
pub struct WheelDevice {
    /// Platform-specific unique identifier for the device (especially important on macOS)
    pub id: String,
    /// The name of the device, if available
    pub name: Option<String>,
    /// The MAC address when it can be derived from the platform id
    pub address: Option<String>,
    /// The signal strength (RSSI) of the device
    pub rssi: Option<i16>,
}

impl WheelDevice {
    /// Creates a new WheelDevice instance
    pub fn new(id: String, name: Option<String>, address: Option<String>, rssi: Option<i16>) -> Self {
        Self { id, name, address, rssi }
    }

    /// The identity handed to listeners once a session exists
    pub fn handle(&self) -> DeviceHandle {
        DeviceHandle::new(self.id.clone(), self.name.clone())
    }
}

/// Identity of a peripheral as seen by listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    /// Registry key for the device
    pub id: String,
    /// Display name, when the platform could supply one
    pub name: Option<String>,
}

impl DeviceHandle {
    pub fn new(id: String, name: Option<String>) -> Self {
        Self { id, name }
    }

    /// Name to show a user, falling back to a generic placeholder
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEVICE_NAME_FALLBACK)
    }
}

/// Lifecycle state of one device session.
/// Exactly one state holds per device at any instant; only the session
/// task mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    DiscoveringServices,
    Authenticating,
    Ready,
    Disconnecting,
    Failed(WheelError),
}

impl ConnectionState {
    /// True iff caller reads/writes are currently accepted
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    /// Whether the lifecycle may move from `self` to `next`
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            // forward setup progress
            (Disconnected, Connecting)
                | (Connecting, DiscoveringServices)
                | (DiscoveringServices, Authenticating)
                | (Authenticating, Ready)
                // requested teardown from any live state
                | (Connecting | DiscoveringServices | Authenticating | Ready, Disconnecting)
                // setup failures
                | (Connecting | DiscoveringServices | Authenticating, Failed(_))
                // terminal edges back to rest
                | (Disconnecting | Failed(_), Disconnected)
                // link loss drops straight out of any live state
                | (Connecting | DiscoveringServices | Authenticating | Ready, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::DiscoveringServices => write!(f, "discovering services"),
            ConnectionState::Authenticating => write!(f, "authenticating"),
            ConnectionState::Ready => write!(f, "ready"),
            ConnectionState::Disconnecting => write!(f, "disconnecting"),
            ConnectionState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// A GATT operation waiting in, or dispatched from, a device queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOperation {
    Connect,
    Disconnect,
    DiscoverServices,
    ReadCharacteristic(Uuid),
    WriteCharacteristic(Uuid, Vec<u8>),
    EnableNotifications(Uuid),
}

impl PendingOperation {
    /// Short tag for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            PendingOperation::Connect => "connect",
            PendingOperation::Disconnect => "disconnect",
            PendingOperation::DiscoverServices => "discover-services",
            PendingOperation::ReadCharacteristic(_) => "read",
            PendingOperation::WriteCharacteristic(_, _) => "write",
            PendingOperation::EnableNotifications(_) => "enable-notifications",
        }
    }
}

/// Callback hooks observed by callers.
/// Every hook has an empty default body, so implementors override only
/// the events they care about.
pub trait ConnectionListener: Send + Sync {
    /// The device finished connect, discovery and authentication
    fn on_setup_complete(&self, _device: &DeviceHandle) {}
    /// The device reached Disconnected, whether requested or not
    fn on_disconnect(&self, _device: &DeviceHandle) {}
    /// A read completed (setup-internal reads included)
    fn on_characteristic_read(&self, _device: &DeviceHandle, _uuid: Uuid, _value: &[u8]) {}
    /// A write was acknowledged (setup-internal writes included)
    fn on_characteristic_write(&self, _device: &DeviceHandle, _uuid: Uuid) {}
    /// A subscribed characteristic pushed a new value
    fn on_characteristic_changed(&self, _device: &DeviceHandle, _uuid: Uuid, _value: &[u8]) {}
    /// An operation or the connection itself failed
    fn on_error(&self, _device: &DeviceHandle, _error: &WheelError) {}
}

/// Broadcast set of listeners shared by every device session.
/// Registration is idempotent by `Arc` identity. Broadcasts snapshot
/// the set before iterating, so a listener may register or unregister
/// others (or itself) from inside a callback.
#[derive(Clone, Default)]
pub struct ListenerSet {
    listeners: Arc<Mutex<Vec<Arc<dyn ConnectionListener>>>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener unless that exact instance is already present
    pub fn register(&self, listener: Arc<dyn ConnectionListener>) {
        let mut listeners = self.listeners.lock().unwrap();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Removes a listener; unknown instances are ignored
    pub fn unregister(&self, listener: &Arc<dyn ConnectionListener>) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Invokes `notify` on a snapshot of the current set
    pub fn broadcast(&self, notify: impl Fn(&dyn ConnectionListener)) {
        let snapshot: Vec<Arc<dyn ConnectionListener>> = self.listeners.lock().unwrap().clone();
        for listener in snapshot {
            notify(listener.as_ref());
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
