//! # Bridge Configuration Module
//!
//! Collects the platform capabilities and settings the serial core needs.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a
//! `BridgeConfig` holding every injected bridge. It enforces fail-fast
//! validation so a host that forgot to supply a capability learns about it
//! at startup, not on the first `connect`.
//!
//! ## Required Capabilities
//!
//! - `SerialTransport` - open/read/write/close on the serial link
//! - `DeviceProvider` - enumeration, permission and hot-plug events
//!
//! ## Optional Capabilities
//!
//! - `Clock` - record timestamps (default: system clock)
//!
//! When the `desktop-shims` feature is enabled and neither the transport nor
//! the provider was supplied, the `serialport`-backed desktop pair is injected
//! automatically. The two must share a port registry, so supplying only one of
//! them is always an error.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::BridgeConfig;
//! use std::sync::Arc;
//!
//! let config = BridgeConfig::builder()
//!     .transport(Arc::new(MyWebSerialTransport::new()))
//!     .device_provider(Arc::new(MyWebSerialProvider::new()))
//!     .default_serial_options(SerialOptions::default().with_baud_rate(9600))
//!     .build()
//!     .expect("Failed to build config");
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{Clock, DeviceProvider, SerialOptions, SerialTransport, SystemClock};
use std::sync::Arc;

/// Upper bound for the event channel capacity.
pub const MAX_EVENT_BUFFER_SIZE: usize = 65_536;

/// Configuration for the serial bridge core.
///
/// Use [`BridgeConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct BridgeConfig {
    pub transport: Arc<dyn SerialTransport>,

    pub device_provider: Arc<dyn DeviceProvider>,

    /// Time source for record timestamps
    pub clock: Arc<dyn Clock>,

    /// Line settings used when `connect` is called without options
    pub default_serial_options: SerialOptions,

    /// Capacity of the event broadcast channel
    pub event_buffer_size: usize,

    pub features: FeatureFlags,
}

impl std::fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("default_serial_options", &self.default_serial_options)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("features", &self.features)
            .finish_non_exhaustive()
    }
}

/// Feature flags control optional behavior of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Forward hot-plug notifications as `deviceAttached`/`deviceDetached`
    pub watch_devices: bool,

    /// Tear the session down when the connected device is unplugged.
    /// Only takes effect while `watch_devices` is enabled.
    pub disconnect_on_detach: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            watch_devices: true,
            disconnect_on_detach: true,
        }
    }
}

impl BridgeConfig {
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Event buffer size is within `1..=MAX_EVENT_BUFFER_SIZE`
    /// - Default serial options are valid line settings
    pub fn validate(&self) -> Result<()> {
        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.event_buffer_size > MAX_EVENT_BUFFER_SIZE {
            return Err(Error::Config(format!(
                "Event buffer size exceeds maximum of {}",
                MAX_EVENT_BUFFER_SIZE
            )));
        }

        self.default_serial_options
            .validate()
            .map_err(|e| Error::Config(format!("Invalid default serial options: {}", e)))?;

        Ok(())
    }
}

fn transport_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SerialTransport".to_string(),
        message: "SerialTransport implementation is required for device I/O. \
                 Desktop: enable the 'desktop-shims' feature to use the serialport-backed transport. \
                 Web: inject a Web Serial transport. \
                 Mobile: inject the External Accessory (iOS) or USB host (Android) transport."
            .to_string(),
    }
}

fn provider_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "DeviceProvider".to_string(),
        message: "DeviceProvider implementation is required for enumeration and permission. \
                 Desktop: enable the 'desktop-shims' feature to use the serialport-backed provider. \
                 Web/Mobile: inject the provider that pairs with your transport."
            .to_string(),
    }
}

type Bridges = (Arc<dyn SerialTransport>, Arc<dyn DeviceProvider>);

#[cfg(feature = "desktop-shims")]
fn provide_default_bridges() -> Result<Bridges> {
    let (transport, provider) = bridge_desktop::desktop_bridges();
    let transport: Arc<dyn SerialTransport> = transport;
    let provider: Arc<dyn DeviceProvider> = provider;
    Ok((transport, provider))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_bridges() -> Result<Bridges> {
    Err(transport_missing_error())
}

/// Builder for constructing [`BridgeConfig`] instances.
#[derive(Default)]
pub struct BridgeConfigBuilder {
    transport: Option<Arc<dyn SerialTransport>>,
    device_provider: Option<Arc<dyn DeviceProvider>>,
    clock: Option<Arc<dyn Clock>>,
    default_serial_options: Option<SerialOptions>,
    event_buffer_size: Option<usize>,
    features: FeatureFlags,
}

impl BridgeConfigBuilder {
    /// Sets the serial transport.
    pub fn transport(mut self, transport: Arc<dyn SerialTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the device provider. Device ids it reports must be accepted by
    /// the transport.
    pub fn device_provider(mut self, provider: Arc<dyn DeviceProvider>) -> Self {
        self.device_provider = Some(provider);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn default_serial_options(mut self, options: SerialOptions) -> Self {
        self.default_serial_options = Some(options);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn watch_devices(mut self, enabled: bool) -> Self {
        self.features.watch_devices = enabled;
        self
    }

    pub fn disconnect_on_detach(mut self, enabled: bool) -> Self {
        self.features.disconnect_on_detach = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Builds the final `BridgeConfig` instance.
    ///
    /// # Errors
    ///
    /// - [`Error::CapabilityMissing`] if the transport or device provider is
    ///   missing and no platform default applies
    /// - [`Error::Config`] if a setting is out of range
    pub fn build(self) -> Result<BridgeConfig> {
        let (transport, device_provider) = match (self.transport, self.device_provider) {
            (Some(transport), Some(provider)) => (transport, provider),
            (None, None) => provide_default_bridges()?,
            (None, Some(_)) => return Err(transport_missing_error()),
            (Some(_), None) => return Err(provider_missing_error()),
        };

        let config = BridgeConfig {
            transport,
            device_provider,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            default_serial_options: self.default_serial_options.unwrap_or_default(),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            features: self.features,
        };

        config.validate()?;

        Ok(config)
    }
}
