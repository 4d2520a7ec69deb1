//! Defines shared data structures for the Bluetooth module.

use bluest::{Characteristic, Device};

/// Represents a discovered desk
#[derive(Debug, Clone, serde::Serialize)]
pub struct DiscoveredDesk {
    /// The name of the device
    pub name: String,
    /// MAC address extracted from the platform id, if it carries one
    pub address: Option<String>,
    /// Platform-specific unique identifier for the device
    pub id: String,
    /// The signal strength (RSSI) of the device
    pub rssi: Option<i16>,
}

/// Represents the state of a successfully connected desk.
/// This struct holds the active handles needed for interaction.
#[derive(Clone)]
pub struct ConnectedDeviceState {
    /// The device handle, used for checking connection status or disconnecting.
    pub device: Device,
    /// Height/speed characteristic, read and subscribed.
    pub height_characteristic: Characteristic,
    /// Characteristic for writing motion commands.
    pub command_characteristic: Characteristic,
}

/// Connection lifecycle of the desk link
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}
