//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `SerialTransport` using the `serialport` crate, with blocking I/O moved
//!   onto Tokio's blocking pool
//! - `DeviceProvider` using `serialport::available_ports()`, with a polling
//!   hot-plug stream
//!
//! Both share one [`PortRegistry`] so device ids reported by enumeration are
//! the ids the transport accepts.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::desktop_bridges;
//! use bridge_traits::{DeviceProvider, SerialOptions, SerialTransport};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (transport, provider) = desktop_bridges();
//!     let devices = provider.list_devices().await.unwrap();
//!     transport.open(devices[0].device_id, &SerialOptions::default()).await.unwrap();
//! }
//! ```

mod devices;
mod registry;
mod serial;

pub use devices::{DesktopDeviceProvider, DEFAULT_POLL_INTERVAL};
pub use registry::PortRegistry;
pub use serial::SerialPortTransport;

use std::sync::Arc;

/// Build a transport and device provider that share one port registry.
pub fn desktop_bridges() -> (Arc<SerialPortTransport>, Arc<DesktopDeviceProvider>) {
    let registry = Arc::new(PortRegistry::new());
    (
        Arc::new(SerialPortTransport::new(Arc::clone(&registry))),
        Arc::new(DesktopDeviceProvider::new(registry)),
    )
}
