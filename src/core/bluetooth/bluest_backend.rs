//! bluest-backed implementation of the platform traits: adapter
//! acquisition, device cache, connect retry and the per-link GATT
//! plumbing against real hardware.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use bluest::{Adapter, Characteristic, ConnectionEvent, Device};
use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    CONNECT_RETRY_DELAY_MS, MAX_CONNECT_RETRIES, UUID_WHEEL_SERVICE,
};
use crate::core::bluetooth::error::WheelError;
use crate::core::bluetooth::platform::{BlePlatform, DeviceLink};
use crate::core::bluetooth::scanner::WheelScanner;

/// Devices the scanner has resolved, keyed by platform id.
/// Shared between the scanner (writer) and the platform (reader).
pub type SharedDeviceMap = Arc<Mutex<HashMap<String, Device>>>;

impl From<bluest::Error> for WheelError {
    fn from(error: bluest::Error) -> Self {
        WheelError::OperationRejected(error.to_string())
    }
}

/// Platform backend for real hardware
pub struct BluestPlatform {
    adapter: Adapter,
    devices: SharedDeviceMap,
}

impl BluestPlatform {
    /// Acquires the default adapter and waits for it to come up
    pub async fn new() -> anyhow::Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!("no Bluetooth adapter found"))?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter available");
        Ok(Self {
            adapter,
            devices: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// A scanner feeding this platform's device cache
    pub fn scanner(&self, min_rssi: i16) -> WheelScanner {
        WheelScanner::new(self.adapter.clone(), Arc::clone(&self.devices), min_rssi)
    }
}

#[async_trait]
impl BlePlatform for BluestPlatform {
    async fn connect(&self, device_id: &str) -> Result<Arc<dyn DeviceLink>, WheelError> {
        let device = self
            .devices
            .lock()
            .unwrap()
            .get(device_id)
            .cloned()
            .ok_or_else(|| {
                WheelError::ConnectFailed(format!("device {} has not been discovered", device_id))
            })?;

        let mut last_error: Option<bluest::Error> = None;
        for attempt in 1..=MAX_CONNECT_RETRIES {
            if device.is_connected().await {
                last_error = None;
                break;
            }
            info!(
                "connecting to {} (attempt {}/{})",
                device_id, attempt, MAX_CONNECT_RETRIES
            );
            match self.adapter.connect_device(&device).await {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(error) => {
                    warn!("connection attempt {} failed: {}", attempt, error);
                    last_error = Some(error);
                    if attempt < MAX_CONNECT_RETRIES {
                        sleep(Duration::from_millis(CONNECT_RETRY_DELAY_MS)).await;
                    }
                }
            }
        }
        if let Some(error) = last_error {
            return Err(WheelError::ConnectFailed(error.to_string()));
        }

        Ok(Arc::new(BluestLink {
            adapter: self.adapter.clone(),
            device,
            characteristics: Mutex::new(HashMap::new()),
        }))
    }
}

/// One live hardware connection
pub struct BluestLink {
    adapter: Adapter,
    device: Device,
    characteristics: Mutex<HashMap<Uuid, Characteristic>>,
}

impl BluestLink {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, WheelError> {
        self.characteristics
            .lock()
            .unwrap()
            .get(&uuid)
            .cloned()
            .ok_or(WheelError::CharacteristicNotFound(uuid))
    }
}

#[async_trait]
impl DeviceLink for BluestLink {
    async fn discover_characteristics(&self) -> Result<Vec<Uuid>, WheelError> {
        let services = self
            .device
            .services()
            .await
            .map_err(|e| WheelError::ServiceDiscoveryFailed(e.to_string()))?;
        let wheel_service = services
            .iter()
            .find(|s| s.uuid() == UUID_WHEEL_SERVICE)
            .cloned()
            .ok_or_else(|| {
                for service in &services {
                    debug!("available service: {}", service.uuid());
                }
                WheelError::ServiceDiscoveryFailed(format!(
                    "wheel service {} not present",
                    UUID_WHEEL_SERVICE
                ))
            })?;

        let characteristics = wheel_service
            .characteristics()
            .await
            .map_err(|e| WheelError::ServiceDiscoveryFailed(e.to_string()))?;

        let mut table = self.characteristics.lock().unwrap();
        table.clear();
        for characteristic in characteristics {
            table.insert(characteristic.uuid(), characteristic);
        }
        debug!("{} wheel characteristics cached", table.len());
        Ok(table.keys().copied().collect())
    }

    async fn read(&self, uuid: Uuid) -> Result<Vec<u8>, WheelError> {
        let characteristic = self.characteristic(uuid)?;
        let value = characteristic.read().await?;
        debug!("read {} bytes from {}", value.len(), uuid);
        Ok(value.to_vec())
    }

    async fn write(&self, uuid: Uuid, value: &[u8]) -> Result<(), WheelError> {
        let characteristic = self.characteristic(uuid)?;
        debug!("writing {} bytes to {}", value.len(), uuid);
        characteristic.write(value).await?;
        Ok(())
    }

    async fn subscribe(&self, uuid: Uuid) -> Result<mpsc::UnboundedReceiver<Vec<u8>>, WheelError> {
        let characteristic = self.characteristic(uuid)?;
        let (values_tx, values_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        // The notify stream borrows the characteristic, so both move
        // into the pump task; the oneshot reports whether subscribing
        // itself worked.
        tokio::spawn(async move {
            match characteristic.notify().await {
                Ok(mut stream) => {
                    let _ = ready_tx.send(Ok(()));
                    while let Some(result) = stream.next().await {
                        match result {
                            Ok(value) => {
                                if values_tx.send(value.to_vec()).is_err() {
                                    break;
                                }
                            }
                            Err(error) => {
                                warn!("notification stream error on {}: {}", uuid, error);
                                break;
                            }
                        }
                    }
                    debug!("notification stream for {} ended", uuid);
                }
                Err(error) => {
                    let _ = ready_tx.send(Err(error));
                }
            }
        });

        match ready_rx.await {
            Ok(Ok(())) => Ok(values_rx),
            Ok(Err(error)) => Err(error.into()),
            Err(_) => Err(WheelError::OperationRejected(
                "subscription task ended early".to_string(),
            )),
        }
    }

    async fn disconnect(&self) -> Result<(), WheelError> {
        if self.device.is_connected().await {
            info!("disconnecting from {}", self.device.id());
            self.adapter.disconnect_device(&self.device).await?;
        } else {
            debug!("{} already disconnected", self.device.id());
        }
        Ok(())
    }

    async fn link_lost(&self) {
        match self.adapter.device_connection_events(&self.device).await {
            Ok(mut events) => {
                while let Some(event) = events.next().await {
                    if matches!(event, ConnectionEvent::Disconnected) {
                        info!("{} reported disconnected by the platform", self.device.id());
                        return;
                    }
                }
                // Event stream ended; loss is no longer observable here
                std::future::pending::<()>().await;
            }
            Err(error) => {
                debug!(
                    "connection events unavailable for {}: {}",
                    self.device.id(),
                    error
                );
                std::future::pending::<()>().await;
            }
        }
    }

    fn display_name(&self) -> Option<String> {
        self.device.name().ok()
    }
}
