//! Device Discovery Implementation

use async_trait::async_trait;
use bridge_traits::{
    device::{DeviceChangeStream, DeviceEvent, DeviceProvider},
    error::{BridgeError, Result},
    serial::{describe_device, UsbDevice},
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::registry::PortRegistry;

/// How often the hot-plug stream re-enumerates ports.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Desktop device provider
///
/// Enumerates ports with `serialport::available_ports()`. Desktop systems
/// have no per-device permission prompt, so permission is granted for any
/// device that is currently present.
///
/// Note: there is no portable hot-plug notification for serial ports, so
/// [`subscribe_changes`](DeviceProvider::subscribe_changes) polls.
#[derive(Clone)]
pub struct DesktopDeviceProvider {
    registry: Arc<PortRegistry>,
    poll_interval: Duration,
}

impl DesktopDeviceProvider {
    pub fn new(registry: Arc<PortRegistry>) -> Self {
        Self {
            registry,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn scan(&self) -> Result<Vec<UsbDevice>> {
        let ports = tokio::task::spawn_blocking(serialport::available_ports)
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Port scan task failed: {}", e)))?
            .map_err(|e| {
                BridgeError::OperationFailed(format!("Failed to enumerate ports: {}", e))
            })?;

        let devices = ports
            .into_iter()
            // On macOS only the /dev/cu.* (calling unit) nodes are usable for
            // outgoing connections; /dev/tty.* blocks on carrier detect.
            .filter(|_p| {
                #[cfg(target_os = "macos")]
                {
                    !_p.port_name.starts_with("/dev/tty.")
                }
                #[cfg(not(target_os = "macos"))]
                {
                    true
                }
            })
            .map(|p| {
                let device_id = self.registry.id_for(&p.port_name);
                match p.port_type {
                    serialport::SerialPortType::UsbPort(info) => usb_device(
                        device_id,
                        &p.port_name,
                        info.vid,
                        info.pid,
                        info.manufacturer,
                        info.serial_number,
                    ),
                    _ => usb_device(device_id, &p.port_name, 0, 0, None, None),
                }
            })
            .collect();

        Ok(devices)
    }
}

/// Build the host-facing descriptor for one enumerated port.
pub(crate) fn usb_device(
    device_id: u32,
    port_name: &str,
    vendor_id: u16,
    product_id: u16,
    manufacturer: Option<String>,
    serial_number: Option<String>,
) -> UsbDevice {
    UsbDevice {
        device_id,
        vendor_id,
        product_id,
        device_name: describe_device(vendor_id, port_name),
        manufacturer_name: manufacturer,
        serial_number,
    }
}

/// Compare a fresh scan against the last known set.
pub(crate) fn diff_devices(
    known: &HashMap<u32, UsbDevice>,
    current: &[UsbDevice],
) -> Vec<DeviceEvent> {
    let mut events: Vec<DeviceEvent> = current
        .iter()
        .filter(|d| !known.contains_key(&d.device_id))
        .cloned()
        .map(DeviceEvent::Attached)
        .collect();

    let mut gone: Vec<u32> = known
        .keys()
        .filter(|id| !current.iter().any(|d| d.device_id == **id))
        .copied()
        .collect();
    gone.sort_unstable();
    events.extend(gone.into_iter().map(|device_id| DeviceEvent::Detached { device_id }));

    events
}

#[async_trait]
impl DeviceProvider for DesktopDeviceProvider {
    async fn list_devices(&self) -> Result<Vec<UsbDevice>> {
        let devices = self.scan().await?;
        debug!(count = devices.len(), "Serial ports enumerated");
        Ok(devices)
    }

    async fn request_permission(&self, device: &UsbDevice) -> Result<bool> {
        let present = self
            .scan()
            .await?
            .iter()
            .any(|d| d.device_id == device.device_id);

        if present {
            Ok(true)
        } else {
            Err(BridgeError::DeviceNotFound(device.device_id))
        }
    }

    async fn subscribe_changes(&self) -> Result<Box<dyn DeviceChangeStream>> {
        let known = self
            .scan()
            .await?
            .into_iter()
            .map(|d| (d.device_id, d))
            .collect();

        Ok(Box::new(PollingDeviceStream {
            provider: self.clone(),
            known,
            pending: VecDeque::new(),
        }))
    }
}

/// Hot-plug stream that re-scans on a fixed interval
struct PollingDeviceStream {
    provider: DesktopDeviceProvider,
    known: HashMap<u32, UsbDevice>,
    pending: VecDeque<DeviceEvent>,
}

#[async_trait]
impl DeviceChangeStream for PollingDeviceStream {
    async fn next(&mut self) -> Option<DeviceEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }

            tokio::time::sleep(self.provider.poll_interval).await;

            let current = match self.provider.scan().await {
                Ok(devices) => devices,
                Err(e) => {
                    warn!(error = %e, "Port scan failed, retrying");
                    continue;
                }
            };

            self.pending.extend(diff_devices(&self.known, &current));
            self.known = current.into_iter().map(|d| (d.device_id, d)).collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usb_device_names_known_vendor() {
        let device = usb_device(
            2,
            "/dev/ttyUSB0",
            0x10C4,
            0xEA60,
            Some("Silicon Labs".to_string()),
            None,
        );
        assert_eq!(device.device_name, "Silicon Labs CP210x (/dev/ttyUSB0)");
        assert_eq!(device.vendor_id, 0x10C4);
        assert_eq!(device.manufacturer_name.as_deref(), Some("Silicon Labs"));
    }

    #[test]
    fn test_usb_device_names_unknown_vendor() {
        let device = usb_device(0, "COM1", 0, 0, None, None);
        assert_eq!(device.device_name, "Unknown (COM1)");
    }

    #[test]
    fn test_diff_reports_attach_and_detach() {
        let mut known = HashMap::new();
        known.insert(1, UsbDevice::new(1, "a"));
        known.insert(2, UsbDevice::new(2, "b"));

        let current = vec![UsbDevice::new(2, "b"), UsbDevice::new(3, "c")];
        let events = diff_devices(&known, &current);

        assert_eq!(
            events,
            vec![
                DeviceEvent::Attached(UsbDevice::new(3, "c")),
                DeviceEvent::Detached { device_id: 1 },
            ]
        );
    }

    #[test]
    fn test_diff_no_change() {
        let mut known = HashMap::new();
        known.insert(1, UsbDevice::new(1, "a"));
        assert!(diff_devices(&known, &[UsbDevice::new(1, "a")]).is_empty());
    }

    #[tokio::test]
    async fn test_list_devices_does_not_panic() {
        let provider = DesktopDeviceProvider::new(Arc::new(PortRegistry::new()));
        // Enumeration may legitimately fail on CI machines without udev.
        let _ = provider.list_devices().await;
    }
}
