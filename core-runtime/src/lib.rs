//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the serial bridge core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus and listener subscriptions
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the session and service crates
//! depend on. It fixes the logging conventions, the shape of every
//! notification delivered to the host, and how bridge capabilities are
//! collected and validated before a service starts.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
