//! # Core Serial
//!
//! The framing engine and session state machine shared by every platform.
//!
//! ## Overview
//!
//! - [`framing`] - newline framing, hex classification and rendering
//! - [`decode`] - incremental UTF-8 decoding of transport chunks
//! - [`session`] - connect/disconnect, one-shot read/write and the drain loop
//!   that turns a live stream into `dataReceived` events
//!
//! Everything here is written against [`bridge_traits::SerialTransport`], so
//! the Web Serial, External Accessory, Android USB host and desktop adapters
//! all share one implementation.

pub mod decode;
pub mod error;
pub mod framing;
pub mod session;

pub use error::{Result, SerialError};
pub use framing::{is_hex_like, to_hex, Frame, StreamFramer};
pub use session::SerialSession;
