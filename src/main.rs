//! Interactive demo: scan for a wheel, connect and authenticate, then
//! switch ride modes from stdin.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use ridewheel_bridge::core::bluetooth::DEVICE_NAME_FALLBACK;
use ridewheel_bridge::utils::encode_hex;
use ridewheel_bridge::{
    setup_logging, BluestPlatform, BridgeConfig, ConnectionListener, ConnectionRegistry,
    ConnectionState, DeviceHandle, PasscodeTable, RideMode, WheelError,
};

const CONFIG_FILE: &str = "bridge_config.json";

/// Prints connection events so the demo is legible without RUST_LOG
struct PrintListener;

impl ConnectionListener for PrintListener {
    fn on_setup_complete(&self, device: &DeviceHandle) {
        println!("{} is ready", device.display_name());
    }

    fn on_disconnect(&self, device: &DeviceHandle) {
        println!("{} disconnected", device.display_name());
    }

    fn on_characteristic_changed(&self, device: &DeviceHandle, uuid: uuid::Uuid, value: &[u8]) {
        println!(
            "{} notified {}: {}",
            device.display_name(),
            uuid,
            encode_hex(value)
        );
    }

    fn on_error(&self, device: &DeviceHandle, error: &WheelError) {
        println!("{}: {}", device.display_name(), error);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let config = BridgeConfig::load_config(Path::new(CONFIG_FILE)).await?;
    let passcodes = match PasscodeTable::load(&config.passcode_file).await {
        Ok(table) => Arc::new(table),
        Err(error) => {
            warn!(
                "Could not load passcodes from {:?} ({}); wheels will fail authentication",
                config.passcode_file, error
            );
            Arc::new(PasscodeTable::default())
        }
    };

    let platform = Arc::new(BluestPlatform::new().await?);
    let mut scanner = platform.scanner(config.min_rssi);

    println!("Scanning for a wheel...");
    let Some(wheel) = scanner.find_first(config.scan_timeout()).await? else {
        bail!("no wheel found within {} seconds", config.scan_timeout_secs);
    };
    println!(
        "Found {} ({})",
        wheel.name.as_deref().unwrap_or(DEVICE_NAME_FALLBACK),
        wheel.id
    );

    let registry = ConnectionRegistry::new(
        platform,
        passcodes,
        config.connect_timeout(),
        config.operation_timeout(),
    );
    registry.register_listener(Arc::new(PrintListener));

    let mut state = registry.connect(&wheel.id)?;
    match state
        .wait_for(|s| s.is_ready() || matches!(s, ConnectionState::Disconnected))
        .await
    {
        Ok(reached) if reached.is_ready() => {}
        _ => bail!("wheel did not become ready"),
    }

    println!("Commands: eco | standard | turbo | status | quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = line.trim().to_ascii_lowercase();
        match command.as_str() {
            "" => {}
            "status" => match registry.state_of(&wheel.id) {
                Some(state) => println!("state: {}", state),
                None => println!("state: no session"),
            },
            "quit" | "exit" => break,
            other => match RideMode::from_name(other) {
                Some(mode) => {
                    if let Err(error) = registry.set_ride_mode(&wheel.id, mode) {
                        warn!("Could not set ride mode: {}", error);
                    } else {
                        println!("switched to {:?}", mode);
                    }
                }
                None => println!("unknown command: {}", other),
            },
        }
    }

    // Wind the connection down before exiting
    if registry.disconnect(&wheel.id).is_ok() {
        if let Some(mut state) = registry.watch_state(&wheel.id) {
            let _ = tokio::time::timeout(
                Duration::from_secs(5),
                state.wait_for(|s| matches!(s, ConnectionState::Disconnected)),
            )
            .await;
        }
    }
    info!("Demo finished");
    Ok(())
}
