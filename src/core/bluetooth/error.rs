//! Error types surfaced by the connection registry and its sessions.

use thiserror::Error;
use uuid::Uuid;

/// Everything that can go wrong while talking to a wheel.
///
/// Values are cloneable and comparable so they can travel inside
/// `ConnectionState::Failed` and through listener callbacks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WheelError {
    /// The platform did not report a connect result before the deadline
    #[error("connect attempt timed out")]
    ConnectTimeout,

    /// The platform reported the connect attempt as failed
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// Service discovery failed or the wheel service is missing
    #[error("service discovery failed: {0}")]
    ServiceDiscoveryFailed(String),

    /// A characteristic required for the requested operation is absent
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    /// An in-flight operation's completion never arrived
    #[error("operation timed out")]
    OperationTimeout,

    /// The platform returned a non-success status for an operation
    #[error("operation rejected: {0}")]
    OperationRejected(String),

    /// The passcode table has no row for the wheel's serial number
    #[error("no passcode known for this serial number")]
    NoPasscode,

    /// The passcode string found in the table is not valid hex
    #[error("passcode is not valid hex")]
    MalformedPasscode,

    /// A caller operation was issued outside the Ready state
    #[error("device is not ready")]
    NotReady,

    /// connect() was called while a connection attempt is in progress
    #[error("a connection attempt is already in progress")]
    AlreadyConnecting,

    /// connect() was called on an already connected device
    #[error("device is already connected")]
    AlreadyConnected,

    /// An operation referenced a device with no active entry
    #[error("device is not connected")]
    NotConnected,
}
