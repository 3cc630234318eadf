//! Abstract capability set required from the platform BLE stack.
//! The session and registry only ever talk to these traits; the bluest
//! backend implements them for real hardware and the mock backend
//! implements them for tests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::error::WheelError;

/// Factory for device links.
/// Implementations resolve a previously discovered device id and
/// establish the platform-level connection.
#[async_trait]
pub trait BlePlatform: Send + Sync {
    /// Connects to a device and hands back its live link
    async fn connect(&self, device_id: &str) -> Result<Arc<dyn DeviceLink>, WheelError>;
}

/// One live GATT connection.
///
/// The transport supports exactly one outstanding operation per device;
/// callers (the session queue) are responsible for serialization, a
/// link only executes what it is handed.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Lists the characteristics found under the wheel service
    async fn discover_characteristics(&self) -> Result<Vec<Uuid>, WheelError>;

    /// Reads the current value of a characteristic
    async fn read(&self, uuid: Uuid) -> Result<Vec<u8>, WheelError>;

    /// Writes bytes to a characteristic and awaits the ack
    async fn write(&self, uuid: Uuid, value: &[u8]) -> Result<(), WheelError>;

    /// Subscribes to notifications; values arrive on the returned
    /// channel until the link drops or the receiver is closed
    async fn subscribe(&self, uuid: Uuid) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, WheelError>;

    /// Tears the platform connection down
    async fn disconnect(&self) -> Result<(), WheelError>;

    /// Resolves once the platform reports the link as lost.
    /// Backends that cannot observe link loss simply never resolve.
    async fn link_lost(&self);

    /// Display name of the peer, when the platform knows one
    fn display_name(&self) -> Option<String>;
}
