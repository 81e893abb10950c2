//! Host-facing request payloads.
//!
//! These mirror the argument objects hosts pass to the plugin methods, e.g.
//! `connect({ deviceId: 2, baudRate: 9600 })`.

use bridge_traits::{DeviceSelection, SerialOptions};
use serde::{Deserialize, Serialize};

/// Arguments of `requestPermission`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<u32>,
}

impl DeviceRequest {
    pub fn selection(&self) -> DeviceSelection {
        self.device_id.into()
    }
}

/// Arguments of `connect`. Line settings sit next to the device id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<u32>,
    #[serde(flatten)]
    pub options: SerialOptions,
}

impl ConnectRequest {
    pub fn selection(&self) -> DeviceSelection {
        self.device_id.into()
    }
}

/// Result of `requestPermission`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionStatus {
    pub granted: bool,
    pub device_id: u32,
}
