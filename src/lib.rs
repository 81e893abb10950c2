//! Workspace umbrella crate.
//!
//! Host applications depend on `usb-serial-bridge` and pick a feature instead
//! of wiring the individual workspace crates:
//!
//! - `desktop-shims` (default): the full [`core_service::UsbSerialService`]
//!   façade with the `serialport`-backed desktop adapters.
//! - `framing-only`: just the stream framer/classifier from `core-serial`,
//!   for hosts that drive their own transport.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;

#[cfg(feature = "framing-only")]
pub use core_serial::framing;
