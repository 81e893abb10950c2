//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the serial core and the
//! platform-specific adapters. The browser, iOS and Android hosts each reach
//! USB/serial hardware through a different native API; behind these traits
//! they all look the same, so the framing engine is written exactly once.
//!
//! ## Traits
//!
//! ### Device I/O
//! - [`SerialTransport`](serial::SerialTransport) - open/read/write/close on one serial link
//! - [`DeviceProvider`](device::DeviceProvider) - enumeration, permission, hot-plug stream
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for record timestamps
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ Available |
//! | iOS      | host-injected       | 📋 Planned |
//! | Android  | host-injected       | 📋 Planned |
//! | Web      | host-injected       | 📋 Planned |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Adapters should
//! convert platform errors into it and keep the message actionable (port
//! name, device id, OS error text).
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so one adapter instance can be
//! shared between the drain task and operator calls.

pub mod device;
pub mod error;
pub mod serial;
pub mod time;

pub use error::BridgeError;

pub use device::{DeviceChangeStream, DeviceEvent, DeviceProvider};
pub use serial::{
    describe_device, known_vendor_name, DeviceSelection, Parity, SerialOptions, SerialTransport,
    UsbDevice, DEFAULT_BAUD_RATE,
};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, SystemClock};
