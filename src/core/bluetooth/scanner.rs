//! Advertisement scanner for wheel controllers: service-filtered,
//! RSSI-floored, stoppable.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bluest::{Adapter, Device};
use futures_util::StreamExt;
use log::{debug, info, warn};
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::bluest_backend::SharedDeviceMap;
use crate::core::bluetooth::constants::UUID_WHEEL_SERVICE;
use crate::core::bluetooth::types::WheelDevice;

/// Scans for devices advertising the wheel service and records them in
/// the shared device map so the platform can connect to them later.
pub struct WheelScanner {
    adapter: Adapter,
    devices: SharedDeviceMap,
    min_rssi: i16,
    cancel_token: Arc<CancellationToken>,
    scan_task_handle: Option<JoinHandle<Result<()>>>,
}

impl WheelScanner {
    pub fn new(adapter: Adapter, devices: SharedDeviceMap, min_rssi: i16) -> Self {
        Self {
            adapter,
            devices,
            min_rssi,
            cancel_token: Arc::new(CancellationToken::new()),
            scan_task_handle: None,
        }
    }

    /// Starts scanning. Discovered wheels arrive on the returned
    /// channel until the scan is stopped.
    pub async fn start_scan(&mut self) -> Result<mpsc::UnboundedReceiver<WheelDevice>> {
        self.devices.lock().unwrap().clear();
        if self.scan_task_handle.is_some() {
            self.stop_scan().await;
        }

        self.cancel_token = Arc::new(CancellationToken::new());
        let cancel_token = self.cancel_token.clone();
        let adapter = self.adapter.clone();
        let devices = Arc::clone(&self.devices);
        let min_rssi = self.min_rssi;
        let (found_tx, found_rx) = mpsc::unbounded_channel();

        self.scan_task_handle = Some(tokio::spawn(async move {
            scan_task(adapter, devices, min_rssi, found_tx, cancel_token).await
        }));
        info!("Wheel scan started");
        Ok(found_rx)
    }

    /// Stops the scan task and waits for it to wind down
    pub async fn stop_scan(&mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.scan_task_handle.take() {
            match handle.await {
                Ok(Ok(())) => info!("Scan task finished"),
                Ok(Err(error)) => warn!("Scan task ended with an error: {}", error),
                Err(error) => warn!("Scan task join failed: {}", error),
            }
        }
    }

    /// Scans until one acceptable wheel shows up, then stops
    pub async fn find_first(&mut self, timeout: Duration) -> Result<Option<WheelDevice>> {
        let mut found = self.start_scan().await?;
        let device = tokio::time::timeout(timeout, found.recv())
            .await
            .ok()
            .flatten();
        self.stop_scan().await;
        Ok(device)
    }
}

async fn scan_task(
    adapter: Adapter,
    devices: SharedDeviceMap,
    min_rssi: i16,
    found: mpsc::UnboundedSender<WheelDevice>,
    cancel_token: Arc<CancellationToken>,
) -> Result<()> {
    // Already-connected wheels never advertise; pick them up first
    info!("Checking for connected wheels");
    let connected = adapter
        .connected_devices_with_services(&[UUID_WHEEL_SERVICE])
        .await?;
    for device in connected {
        let snapshot = describe_device(&device, None).await;
        info!("Found connected wheel: {:?} ({})", snapshot.name, snapshot.id);
        devices.lock().unwrap().insert(snapshot.id.clone(), device);
        if found.send(snapshot).is_err() {
            return Ok(());
        }
    }

    info!("Scanning for wheel advertisements");
    let mut scan_stream = adapter.scan(&[UUID_WHEEL_SERVICE]).await?;
    loop {
        tokio::select! {
            result = scan_stream.next() => {
                match result {
                    Some(discovered) => {
                        if let Some(signal) = discovered.rssi {
                            if signal < min_rssi {
                                debug!("Ignoring weak advertisement (rssi {})", signal);
                                continue;
                            }
                            let device = discovered.device;
                            let snapshot = describe_device(&device, Some(signal)).await;
                            let is_new = devices
                                .lock()
                                .unwrap()
                                .insert(snapshot.id.clone(), device)
                                .is_none();
                            if is_new {
                                info!("Found wheel: {:?} ({})", snapshot.name, snapshot.id);
                                if found.send(snapshot).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    None => {
                        info!("Bluetooth scan stream has ended");
                        break;
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                debug!("Scan cancelled");
                break;
            }
        }
    }
    Ok(())
}

async fn describe_device(device: &Device, rssi: Option<i16>) -> WheelDevice {
    let id = device.id().to_string();
    let name = device.name().ok();
    let rssi = match rssi {
        Some(value) => Some(value),
        None => device.rssi().await.ok(),
    };
    let address = extract_mac_address(&id);
    WheelDevice::new(id, name, address, rssi)
}

/// Pulls a MAC address out of a platform device id, when there is one.
/// macOS ids are opaque UUIDs, so this can come up empty.
fn extract_mac_address(device_id: &str) -> Option<String> {
    let re = Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").unwrap();
    re.find_iter(device_id)
        .last()
        .map(|m| m.as_str().to_uppercase())
}
