//! Desk link over the bluest stack

use std::time::Duration;

use bluest::{Adapter, Characteristic, ConnectionEvent, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;

use crate::core::bluetooth::adapter::DeskAdapter;
use crate::core::bluetooth::constants::{
    BLUETOOTH_OPERATION_TIMEOUT_SECS, NOTIFICATION_CHANNEL_CAPACITY, UUID_COMMAND_CHAR,
    UUID_HEIGHT_CHAR,
};
use crate::core::bluetooth::scanner::extract_mac_address;
use crate::core::bluetooth::types::ConnectedDeviceState;
use crate::core::error::{DeskError, DeskResult};

/// A desk reached through the system Bluetooth adapter
pub struct BluestDesk {
    adapter: Adapter,
    session: Mutex<Option<ConnectedDeviceState>>,
}

impl BluestDesk {
    /// Opens the default adapter and waits until it is powered on
    pub async fn new() -> DeskResult<Self> {
        let adapter = Adapter::default().await.ok_or(DeskError::NoAdapter)?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");
        Ok(Self {
            adapter,
            session: Mutex::new(None),
        })
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    async fn session(&self) -> DeskResult<ConnectedDeviceState> {
        self.session
            .lock()
            .await
            .clone()
            .ok_or(DeskError::NotConnected)
    }

    fn matches_address(device: &Device, address: &str) -> bool {
        let id = device.id().to_string();
        if id.eq_ignore_ascii_case(address) {
            return true;
        }
        extract_mac_address(&id)
            .map(|mac| mac.eq_ignore_ascii_case(address))
            .unwrap_or(false)
    }

    async fn find_device(&self, address: &str) -> DeskResult<Device> {
        for device in self.adapter.connected_devices().await? {
            if Self::matches_address(&device, address) {
                info!("Desk {} is already connected to the system", address);
                return Ok(device);
            }
        }

        let window = Duration::from_secs(BLUETOOTH_OPERATION_TIMEOUT_SECS);
        match timeout(window, self.scan_for(address)).await {
            Ok(result) => result,
            Err(_) => Err(DeskError::DeviceNotFound(address.to_string())),
        }
    }

    async fn scan_for(&self, address: &str) -> DeskResult<Device> {
        info!("Scanning for desk {}", address);
        let mut scan_stream = self.adapter.scan(&[]).await?;
        while let Some(discovered) = scan_stream.next().await {
            debug!("Found device - Device: {:?}, RSSI: {:?}", discovered.device, discovered.rssi);
            if Self::matches_address(&discovered.device, address) {
                return Ok(discovered.device);
            }
        }
        Err(DeskError::DeviceNotFound(address.to_string()))
    }

    async fn resolve_characteristics(device: &Device) -> DeskResult<(Characteristic, Characteristic)> {
        let mut height_char = None;
        let mut command_char = None;

        for service in device.services().await? {
            for characteristic in service.characteristics().await? {
                let uuid = characteristic.uuid();
                if uuid == UUID_HEIGHT_CHAR {
                    info!("Found height characteristic: {}", uuid);
                    height_char = Some(characteristic);
                } else if uuid == UUID_COMMAND_CHAR {
                    info!("Found command characteristic: {}", uuid);
                    command_char = Some(characteristic);
                }
            }
        }

        let height_char = height_char.ok_or(DeskError::CharacteristicNotFound(UUID_HEIGHT_CHAR))?;
        let command_char = command_char.ok_or(DeskError::CharacteristicNotFound(UUID_COMMAND_CHAR))?;
        Ok((height_char, command_char))
    }

    async fn forward_notifications(characteristic: Characteristic, tx: mpsc::Sender<Vec<u8>>) {
        match characteristic.notify().await {
            Ok(mut notification_stream) => {
                while let Some(result) = notification_stream.next().await {
                    match result {
                        Ok(value) => {
                            if tx.send(value).await.is_err() {
                                debug!("Notification receiver dropped");
                                break;
                            }
                        }
                        Err(e) => {
                            error!("Error in notification stream: {}", e);
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                error!("Failed to subscribe to notifications: {}", e);
            }
        }
        info!("Notification stream ended");
    }
}

#[async_trait::async_trait]
impl DeskAdapter for BluestDesk {
    async fn connect(&self, address: &str) -> DeskResult<()> {
        let device = self.find_device(address).await?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Device details - ID: {}, Name: {:?}", device.id(), name);

        if !device.is_connected().await {
            info!("Initiating connection to {}...", device.id());
            let window = Duration::from_secs(BLUETOOTH_OPERATION_TIMEOUT_SECS);
            timeout(window, self.adapter.connect_device(&device))
                .await
                .map_err(|_| DeskError::Timeout("connecting to the desk"))??;
        }

        info!("Connection successful, discovering services...");
        let (height_characteristic, command_characteristic) =
            Self::resolve_characteristics(&device).await?;

        *self.session.lock().await = Some(ConnectedDeviceState {
            device,
            height_characteristic,
            command_characteristic,
        });
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        match self.session().await {
            Ok(state) => state.device.is_connected().await,
            Err(_) => false,
        }
    }

    async fn read_height(&self) -> DeskResult<Vec<u8>> {
        let state = self.session().await?;
        Ok(state.height_characteristic.read().await?)
    }

    async fn write_command(&self, data: &[u8]) -> DeskResult<()> {
        let state = self.session().await?;
        state.command_characteristic.write(data).await?;
        Ok(())
    }

    async fn subscribe_height(&self) -> DeskResult<mpsc::Receiver<Vec<u8>>> {
        let characteristic = self.session().await?.height_characteristic;
        let (tx, rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        info!("Subscribing to height notifications...");
        tokio::spawn(Self::forward_notifications(characteristic, tx));
        Ok(rx)
    }

    async fn wait_for_disconnect(&self) {
        let Ok(state) = self.session().await else {
            return;
        };

        match self.adapter.device_connection_events(&state.device).await {
            Ok(mut events) => {
                while let Some(event) = events.next().await {
                    if matches!(event, ConnectionEvent::Disconnected) {
                        warn!("Adapter reported desk {} disconnected", state.device.id());
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("Connection events unavailable, relying on the monitor: {}", e);
            }
        }
        futures_util::future::pending::<()>().await;
    }

    async fn disconnect(&self) -> DeskResult<()> {
        let Some(state) = self.session.lock().await.take() else {
            info!("No desk connected");
            return Ok(());
        };

        if state.device.is_connected().await {
            info!("Disconnecting from device {}", state.device.id());
            self.adapter.disconnect_device(&state.device).await?;
            info!("Successfully disconnected");
        } else {
            info!("Device {} not connected", state.device.id());
        }
        Ok(())
    }
}
