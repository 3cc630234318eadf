//! Scriptable in-memory backend for exercising the connection stack
//! without hardware. Each step of a link's behavior can be programmed
//! per characteristic, and everything the stack does is recorded.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    UUID_PASSCODE_CHAR, UUID_RIDE_MODE_CHAR, UUID_SERIAL_NUMBER_CHAR,
};
use crate::core::bluetooth::error::WheelError;
use crate::core::bluetooth::platform::{BlePlatform, DeviceLink};

/// Mock platform: a directory of scripted links keyed by device id.
#[derive(Default)]
pub struct MockPlatform {
    links: Mutex<HashMap<String, Arc<MockLink>>>,
    connect_errors: Mutex<HashMap<String, WheelError>>,
    hanging_connects: Mutex<HashSet<String>>,
    connects: AtomicUsize,
}

impl MockPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a link to hand out for `device_id`
    pub fn add_device(&self, device_id: &str, link: Arc<MockLink>) {
        self.links.lock().unwrap().insert(device_id.to_string(), link);
    }

    /// Makes connect() fail for `device_id`
    pub fn fail_connect(&self, device_id: &str, error: WheelError) {
        self.connect_errors
            .lock()
            .unwrap()
            .insert(device_id.to_string(), error);
    }

    /// Makes connect() for `device_id` never resolve
    pub fn hang_connect(&self, device_id: &str) {
        self.hanging_connects
            .lock()
            .unwrap()
            .insert(device_id.to_string());
    }

    /// Number of connect() calls observed
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlePlatform for MockPlatform {
    async fn connect(&self, device_id: &str) -> Result<Arc<dyn DeviceLink>, WheelError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        if self.hanging_connects.lock().unwrap().contains(device_id) {
            std::future::pending::<()>().await;
        }
        if let Some(error) = self.connect_errors.lock().unwrap().get(device_id) {
            return Err(error.clone());
        }

        let link = self.links.lock().unwrap().get(device_id).cloned();
        link.map(|l| l as Arc<dyn DeviceLink>)
            .ok_or_else(|| WheelError::ConnectFailed(format!("unknown device {}", device_id)))
    }
}

/// Scripted per-device link.
pub struct MockLink {
    name: Mutex<Option<String>>,
    characteristics: Mutex<Vec<Uuid>>,
    discover_error: Mutex<Option<WheelError>>,
    read_values: Mutex<HashMap<Uuid, Result<Vec<u8>, WheelError>>>,
    hanging_reads: Mutex<HashSet<Uuid>>,
    write_errors: Mutex<HashMap<Uuid, WheelError>>,
    hanging_writes: Mutex<HashSet<Uuid>>,
    writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
    notify_senders: Mutex<HashMap<Uuid, mpsc::UnboundedSender<Vec<u8>>>>,
    link_loss: watch::Sender<bool>,
    disconnects: AtomicUsize,
}

impl MockLink {
    /// A link with no characteristics at all
    pub fn new() -> Arc<Self> {
        let (link_loss, _) = watch::channel(false);
        Arc::new(Self {
            name: Mutex::new(None),
            characteristics: Mutex::new(Vec::new()),
            discover_error: Mutex::new(None),
            read_values: Mutex::new(HashMap::new()),
            hanging_reads: Mutex::new(HashSet::new()),
            write_errors: Mutex::new(HashMap::new()),
            hanging_writes: Mutex::new(HashSet::new()),
            writes: Mutex::new(Vec::new()),
            notify_senders: Mutex::new(HashMap::new()),
            link_loss,
            disconnects: AtomicUsize::new(0),
        })
    }

    /// A link exposing the wheel service's characteristic set
    pub fn with_wheel_service() -> Arc<Self> {
        let link = Self::new();
        link.set_characteristics(vec![
            UUID_SERIAL_NUMBER_CHAR,
            UUID_PASSCODE_CHAR,
            UUID_RIDE_MODE_CHAR,
        ]);
        link
    }

    pub fn set_name(&self, name: &str) {
        *self.name.lock().unwrap() = Some(name.to_string());
    }

    pub fn set_characteristics(&self, uuids: Vec<Uuid>) {
        *self.characteristics.lock().unwrap() = uuids;
    }

    pub fn set_discover_error(&self, error: WheelError) {
        *self.discover_error.lock().unwrap() = Some(error);
    }

    /// Scripts a successful read result for a characteristic
    pub fn set_read_value(&self, uuid: Uuid, value: Vec<u8>) {
        self.read_values.lock().unwrap().insert(uuid, Ok(value));
    }

    /// Scripts a failing read for a characteristic
    pub fn set_read_error(&self, uuid: Uuid, error: WheelError) {
        self.read_values.lock().unwrap().insert(uuid, Err(error));
    }

    /// Makes reads of `uuid` never complete
    pub fn hang_read(&self, uuid: Uuid) {
        self.hanging_reads.lock().unwrap().insert(uuid);
    }

    /// Scripts a failing write for a characteristic
    pub fn set_write_error(&self, uuid: Uuid, error: WheelError) {
        self.write_errors.lock().unwrap().insert(uuid, error);
    }

    /// Makes writes to `uuid` never complete
    pub fn hang_write(&self, uuid: Uuid) {
        self.hanging_writes.lock().unwrap().insert(uuid);
    }

    /// Every write observed so far, in submission order
    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.writes.lock().unwrap().clone()
    }

    /// Pushes a notification value to a subscribed characteristic.
    /// Returns false when nothing subscribed to it.
    pub fn push_notification(&self, uuid: Uuid, value: Vec<u8>) -> bool {
        match self.notify_senders.lock().unwrap().get(&uuid) {
            Some(sender) => sender.send(value).is_ok(),
            None => false,
        }
    }

    /// Simulates the platform reporting the link as lost
    pub fn drop_link(&self) {
        let _ = self.link_loss.send(true);
    }

    /// Number of disconnect() calls observed
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceLink for MockLink {
    async fn discover_characteristics(&self) -> Result<Vec<Uuid>, WheelError> {
        if let Some(error) = self.discover_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.characteristics.lock().unwrap().clone())
    }

    async fn read(&self, uuid: Uuid) -> Result<Vec<u8>, WheelError> {
        if self.hanging_reads.lock().unwrap().contains(&uuid) {
            std::future::pending::<()>().await;
        }
        match self.read_values.lock().unwrap().get(&uuid) {
            Some(result) => result.clone(),
            None => Err(WheelError::OperationRejected(format!(
                "no scripted read for {}",
                uuid
            ))),
        }
    }

    async fn write(&self, uuid: Uuid, value: &[u8]) -> Result<(), WheelError> {
        if self.hanging_writes.lock().unwrap().contains(&uuid) {
            std::future::pending::<()>().await;
        }
        self.writes.lock().unwrap().push((uuid, value.to_vec()));
        match self.write_errors.lock().unwrap().get(&uuid) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn subscribe(&self, uuid: Uuid) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, WheelError> {
        if !self.characteristics.lock().unwrap().contains(&uuid) {
            return Err(WheelError::CharacteristicNotFound(uuid));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.notify_senders.lock().unwrap().insert(uuid, tx);
        Ok(rx)
    }

    async fn disconnect(&self) -> Result<(), WheelError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn link_lost(&self) {
        let mut lost = self.link_loss.subscribe();
        loop {
            if *lost.borrow() {
                return;
            }
            if lost.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    fn display_name(&self) -> Option<String> {
        self.name.lock().unwrap().clone()
    }
}
