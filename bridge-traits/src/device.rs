//! Device Discovery Abstraction
//!
//! Enumeration, permission and hot-plug notifications for USB/serial devices.

use serde::{Deserialize, Serialize};

use crate::{
    error::{BridgeError, Result},
    serial::{DeviceSelection, UsbDevice},
};

/// Hot-plug notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// A device appeared
    Attached(UsbDevice),
    /// A previously reported device went away
    Detached { device_id: u32 },
}

impl DeviceEvent {
    pub fn device_id(&self) -> u32 {
        match self {
            DeviceEvent::Attached(device) => device.device_id,
            DeviceEvent::Detached { device_id } => *device_id,
        }
    }
}

/// Device provider trait
///
/// Lets the core discover devices without knowing which OS registry backs
/// them. Device ids handed out here are the ids accepted by
/// [`SerialTransport::open`](crate::serial::SerialTransport::open).
///
/// # Platform Support
///
/// - **Desktop**: `serialport::available_ports()` polling
/// - **iOS**: `EAAccessoryManager.connectedAccessories` + connect/disconnect notifications
/// - **Android**: `UsbManager.getDeviceList()` + attach/detach broadcasts
/// - **Web**: `navigator.serial.getPorts()` + `connect`/`disconnect` events
///
/// # Example
///
/// ```ignore
/// use bridge_traits::device::DeviceProvider;
/// use bridge_traits::serial::DeviceSelection;
///
/// async fn pick(provider: &dyn DeviceProvider) -> Option<u32> {
///     let device = provider.find_device(DeviceSelection::FirstAvailable).await.ok()?;
///     Some(device.device_id)
/// }
/// ```
#[async_trait::async_trait]
pub trait DeviceProvider: Send + Sync {
    /// List devices currently attached
    async fn list_devices(&self) -> Result<Vec<UsbDevice>>;

    /// Ask the platform for access to the device
    ///
    /// Platforms without a permission model report `true`.
    async fn request_permission(&self, device: &UsbDevice) -> Result<bool>;

    /// Resolve a selection policy against the current device list
    async fn find_device(&self, selection: DeviceSelection) -> Result<UsbDevice> {
        let devices = self.list_devices().await?;
        match selection.resolve(&devices) {
            Some(device) => Ok(device.clone()),
            None => match selection {
                DeviceSelection::Id(id) => Err(BridgeError::DeviceNotFound(id)),
                DeviceSelection::FirstAvailable => Err(BridgeError::NoDeviceAvailable),
            },
        }
    }

    /// Subscribe to attach/detach notifications
    async fn subscribe_changes(&self) -> Result<Box<dyn DeviceChangeStream>>;
}

/// Stream of hot-plug notifications
#[async_trait::async_trait]
pub trait DeviceChangeStream: Send {
    /// Get the next notification
    ///
    /// Returns `None` when the stream is closed.
    async fn next(&mut self) -> Option<DeviceEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        Provider {}

        #[async_trait::async_trait]
        impl DeviceProvider for Provider {
            async fn list_devices(&self) -> Result<Vec<UsbDevice>>;
            async fn request_permission(&self, device: &UsbDevice) -> Result<bool>;
            async fn subscribe_changes(&self) -> Result<Box<dyn DeviceChangeStream>>;
        }
    }

    fn provider_with(devices: Vec<UsbDevice>) -> MockProvider {
        let mut provider = MockProvider::new();
        provider
            .expect_list_devices()
            .returning(move || Ok(devices.clone()));
        provider
    }

    #[tokio::test]
    async fn test_find_device_by_id() {
        let provider = provider_with(vec![UsbDevice::new(1, "a"), UsbDevice::new(2, "b")]);
        let device = provider.find_device(DeviceSelection::Id(2)).await.unwrap();
        assert_eq!(device.device_name, "b");
    }

    #[tokio::test]
    async fn test_find_device_missing_id() {
        let provider = provider_with(vec![UsbDevice::new(1, "a")]);
        let err = provider
            .find_device(DeviceSelection::Id(9))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::DeviceNotFound(9)));
    }

    #[tokio::test]
    async fn test_find_device_empty_list() {
        let provider = provider_with(Vec::new());
        let err = provider
            .find_device(DeviceSelection::FirstAvailable)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::NoDeviceAvailable));
    }

    #[test]
    fn test_device_event_id() {
        let attached = DeviceEvent::Attached(UsbDevice::new(4, "x"));
        assert_eq!(attached.device_id(), 4);
        assert_eq!(DeviceEvent::Detached { device_id: 5 }.device_id(), 5);
    }
}
