//! Serial Transport Abstraction
//!
//! Byte-level access to a single open serial link. Each host platform backs
//! this with its native facility (Web Serial, External Accessory, Android USB
//! host, `serialport` on desktop); the framing engine in `core-serial` is
//! written once against [`SerialTransport`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// Baud rate used when the caller does not supply one.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Parity checking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
    Mark,
    Space,
}

/// Line configuration applied when a port is opened.
///
/// Unspecified fields fall back to 115200 baud, 8 data bits, 1 stop bit and
/// no parity. `dtr`/`rts` are only driven when explicitly set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SerialOptions {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtr: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rts: Option<bool>,
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            dtr: None,
            rts: None,
        }
    }
}

impl SerialOptions {
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_data_bits(mut self, data_bits: u8) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: u8) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn with_dtr(mut self, dtr: bool) -> Self {
        self.dtr = Some(dtr);
        self
    }

    pub fn with_rts(mut self, rts: bool) -> Self {
        self.rts = Some(rts);
        self
    }

    /// Rejects line settings no UART can honour.
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(BridgeError::InvalidOptions(
                "Baud rate must be greater than 0".to_string(),
            ));
        }

        if !(5..=8).contains(&self.data_bits) {
            return Err(BridgeError::InvalidOptions(format!(
                "Data bits must be between 5 and 8, got {}",
                self.data_bits
            )));
        }

        if !(1..=2).contains(&self.stop_bits) {
            return Err(BridgeError::InvalidOptions(format!(
                "Stop bits must be 1 or 2, got {}",
                self.stop_bits
            )));
        }

        Ok(())
    }
}

/// Descriptor of an attached USB/serial device as reported to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsbDevice {
    pub device_id: u32,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

impl UsbDevice {
    pub fn new(device_id: u32, device_name: impl Into<String>) -> Self {
        Self {
            device_id,
            vendor_id: 0,
            product_id: 0,
            device_name: device_name.into(),
            manufacturer_name: None,
            serial_number: None,
        }
    }

    pub fn with_usb_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self.product_id = product_id;
        self
    }

    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer_name = Some(manufacturer.into());
        self
    }

    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }
}

/// Returns the chip family for common USB-to-UART bridge vendors.
pub fn known_vendor_name(vendor_id: u16) -> Option<&'static str> {
    match vendor_id {
        0x10C4 => Some("Silicon Labs CP210x"),
        0x1A86 => Some("QinHeng CH340"),
        0x0403 => Some("FTDI"),
        0x303A => Some("Espressif ESP32"),
        _ => None,
    }
}

/// Human-readable device label, e.g. `"FTDI (/dev/ttyUSB0)"`.
pub fn describe_device(vendor_id: u16, designation: &str) -> String {
    let vendor = known_vendor_name(vendor_id).unwrap_or("Unknown");
    format!("{} ({})", vendor, designation)
}

/// Policy for choosing which device an operation targets.
///
/// Hosts that omit a device id get [`DeviceSelection::FirstAvailable`],
/// which picks the first entry in enumeration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceSelection {
    Id(u32),
    #[default]
    FirstAvailable,
}

impl DeviceSelection {
    pub fn resolve<'a>(&self, devices: &'a [UsbDevice]) -> Option<&'a UsbDevice> {
        match self {
            DeviceSelection::Id(id) => devices.iter().find(|d| d.device_id == *id),
            DeviceSelection::FirstAvailable => devices.first(),
        }
    }

    pub fn device_id(&self) -> Option<u32> {
        match self {
            DeviceSelection::Id(id) => Some(*id),
            DeviceSelection::FirstAvailable => None,
        }
    }
}

impl From<Option<u32>> for DeviceSelection {
    fn from(device_id: Option<u32>) -> Self {
        device_id.map_or(DeviceSelection::FirstAvailable, DeviceSelection::Id)
    }
}

/// Serial transport trait
///
/// One open link at a time. Implementations must allow [`write`](Self::write)
/// to run while a [`read`](Self::read) is suspended, and must make
/// [`close`](Self::close) release the handle so that an in-flight read
/// resolves (with `Ok(None)` or an error) instead of hanging.
///
/// # Platform Support
///
/// - **Desktop**: `serialport` crate (`bridge-desktop`)
/// - **iOS**: External Accessory `EASession` streams
/// - **Android**: USB host API via a serial driver prober
/// - **Web**: Web Serial API readable/writable streams
///
/// # Example
///
/// ```ignore
/// use bridge_traits::serial::{SerialOptions, SerialTransport};
///
/// async fn echo(transport: &dyn SerialTransport) -> bridge_traits::error::Result<()> {
///     transport.open(0, &SerialOptions::default()).await?;
///     while let Some(chunk) = transport.read().await? {
///         transport.write(&chunk).await?;
///     }
///     transport.close().await
/// }
/// ```
#[async_trait::async_trait]
pub trait SerialTransport: Send + Sync {
    /// Open the device with the given line settings.
    async fn open(&self, device_id: u32, options: &SerialOptions) -> Result<()>;

    /// Suspend until bytes arrive. `Ok(None)` signals end of stream.
    async fn read(&self) -> Result<Option<Bytes>>;

    /// Write the payload and return the number of bytes accepted.
    async fn write(&self, data: &[u8]) -> Result<usize>;

    /// Release the handle. Closing an already-closed transport is a no-op.
    async fn close(&self) -> Result<()>;
}
