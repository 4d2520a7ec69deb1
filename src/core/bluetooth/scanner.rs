//! One-shot desk discovery

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use bluest::{Adapter, Device};
use futures_util::StreamExt;
use log::{debug, info};
use regex::Regex;
use tokio::time::timeout;

use crate::core::bluetooth::constants::DESK_NAME_FRAGMENT;
use crate::core::bluetooth::types::DiscoveredDesk;
use crate::core::error::DeskResult;

static MAC_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").expect("MAC address pattern is valid")
});

/// Pulls the last MAC-looking token out of a platform device id
pub fn extract_mac_address(device_id_str: &str) -> Option<String> {
    MAC_ADDRESS
        .find_iter(device_id_str)
        .last()
        .map(|m| m.as_str().replace('-', ":").to_uppercase())
}

pub fn is_desk_name(name: &str) -> bool {
    name.contains(DESK_NAME_FRAGMENT)
}

/// Lists desks that are connected or advertising within `scan_window`
pub async fn discover_desks(adapter: &Adapter, scan_window: Duration) -> DeskResult<Vec<DiscoveredDesk>> {
    let mut found: HashMap<String, DiscoveredDesk> = HashMap::new();

    info!("Checking for connected devices");
    for device in adapter.connected_devices().await? {
        if let Some(desk) = describe(&device, None) {
            found.insert(desk.id.clone(), desk);
        }
    }

    info!("Starting bluetooth scan for {:?}", scan_window);
    let mut scan_stream = adapter.scan(&[]).await?;
    let scan = async {
        while let Some(discovered) = scan_stream.next().await {
            debug!("Found device - Device: {:?}, RSSI: {:?}", discovered.device, discovered.rssi);
            if let Some(desk) = describe(&discovered.device, discovered.rssi) {
                found.entry(desk.id.clone()).or_insert(desk);
            }
        }
    };
    if timeout(scan_window, scan).await.is_ok() {
        info!("Bluetooth scan stream has ended.");
    }

    let mut desks: Vec<DiscoveredDesk> = found.into_values().collect();
    desks.sort_by(|a, b| b.rssi.cmp(&a.rssi));
    info!("Discovered {} desk(s)", desks.len());
    Ok(desks)
}

fn describe(device: &Device, rssi: Option<i16>) -> Option<DiscoveredDesk> {
    let name = device.name().ok()?;
    if !is_desk_name(&name) {
        return None;
    }
    let id = device.id().to_string();
    Some(DiscoveredDesk {
        name,
        address: extract_mac_address(&id),
        id,
        rssi,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_mac_from_platform_id() {
        assert_eq!(
            extract_mac_address("/org/bluez/hci0/dev_E7_D2_6F_3E_C6_84"),
            None
        );
        assert_eq!(
            extract_mac_address("BluetoothLE#BluetoothLE00:1a:7d:da:71:13-e7:d2:6f:3e:c6:84"),
            Some("E7:D2:6F:3E:C6:84".to_string())
        );
        assert_eq!(
            extract_mac_address("e7-d2-6f-3e-c6-84"),
            Some("E7:D2:6F:3E:C6:84".to_string())
        );
    }

    #[test]
    fn test_desk_name_filter() {
        assert!(is_desk_name("Desk 4711"));
        assert!(!is_desk_name("Gear VR Controller"));
    }
}
