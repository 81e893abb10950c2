//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (serial transport,
//! device provider, clock) into the shared serial core and exposes the plugin
//! surface hosts call: `requestPermission`, `listDevices`, `connect`,
//! `disconnect`, `write`, `read`, `startListening`, `stopListening` and
//! `addListener`.
//!
//! Desktop apps typically enable the `desktop-shims` feature and call
//! [`UsbSerialService::desktop`]. Other hosts inject their adapters through
//! [`BridgeConfig`].
//!
//! ```ignore
//! use core_service::{UsbSerialService, ConnectRequest};
//!
//! let service = UsbSerialService::desktop().await?;
//! let _data = service.add_listener("dataReceived", |event| println!("{:?}", event))?;
//! service.connect_request(ConnectRequest::default()).await?;
//! service.start_listening()?;
//! ```

pub mod error;
pub mod requests;
mod watcher;

pub use error::{Result, ServiceError};
pub use requests::{ConnectRequest, DeviceRequest, PermissionStatus};

pub use bridge_traits::{DeviceSelection, Parity, SerialOptions, UsbDevice};
pub use core_runtime::config::{BridgeConfig, FeatureFlags};
pub use core_runtime::events::{
    BridgeEvent, ConnectionState, DataRecord, ErrorNotice, EventKind, EventStream, ListenerHandle,
};
pub use core_serial::SerialError;

use std::sync::{Arc, Mutex, PoisonError};

use bridge_traits::{BridgeError, DeviceProvider};
use core_runtime::events::EventBus;
use core_serial::SerialSession;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::watcher::DeviceWatcher;

/// Primary façade exposed to host applications.
pub struct UsbSerialService {
    config: BridgeConfig,
    events: EventBus,
    session: SerialSession,
    listener_scope: Mutex<CancellationToken>,
    watcher: Mutex<Option<DeviceWatcher>>,
}

impl UsbSerialService {
    /// Create a service without starting the device watcher.
    pub fn new(config: BridgeConfig) -> Self {
        let events = EventBus::new(config.event_buffer_size);
        let session = SerialSession::new(
            Arc::clone(&config.transport),
            events.clone(),
            Arc::clone(&config.clock),
        );

        Self {
            config,
            events,
            session,
            listener_scope: Mutex::new(CancellationToken::new()),
            watcher: Mutex::new(None),
        }
    }

    /// Create a service and, if enabled, start forwarding hot-plug events.
    ///
    /// A provider without hot-plug support is not fatal: the service runs
    /// without `deviceAttached`/`deviceDetached` and reports an `error` event.
    pub async fn start(config: BridgeConfig) -> Result<Self> {
        let service = Self::new(config);
        if service.config.features.watch_devices {
            service.watch_devices().await?;
        }
        Ok(service)
    }

    /// Build a service from the desktop `serialport` adapters.
    #[cfg(feature = "desktop-shims")]
    pub async fn desktop() -> Result<Self> {
        let config = BridgeConfig::builder().build()?;
        Self::start(config).await
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    fn provider(&self) -> &dyn DeviceProvider {
        self.config.device_provider.as_ref()
    }

    async fn watch_devices(&self) -> Result<()> {
        let changes = match self.provider().subscribe_changes().await {
            Ok(changes) => changes,
            Err(BridgeError::NotAvailable(reason)) => {
                warn!(%reason, "Hot-plug notifications unavailable");
                self.events.publish(BridgeEvent::error(format!(
                    "Device change notifications unavailable: {}",
                    reason
                )));
                return Ok(());
            }
            Err(e) => {
                return Err(ServiceError::InitializationFailed(format!(
                    "Failed to watch devices: {}",
                    e
                )))
            }
        };

        let watcher = DeviceWatcher::spawn(
            changes,
            self.events.clone(),
            self.session.clone(),
            self.config.features.disconnect_on_detach,
        );

        let previous = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(watcher);
        if let Some(previous) = previous {
            previous.cancel();
        }

        debug!("Device watcher started");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Devices
    // ------------------------------------------------------------------

    pub async fn list_devices(&self) -> Result<Vec<UsbDevice>> {
        let devices = self.provider().list_devices().await?;
        debug!(count = devices.len(), "Listed devices");
        Ok(devices)
    }

    /// Ask the platform for access to the selected device.
    pub async fn request_permission(&self, selection: DeviceSelection) -> Result<PermissionStatus> {
        let device = self.provider().find_device(selection).await?;
        let granted = self.provider().request_permission(&device).await?;

        info!(device_id = device.device_id, granted, "Permission requested");
        Ok(PermissionStatus {
            granted,
            device_id: device.device_id,
        })
    }

    // ------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------

    /// Connect to the selected device. `None` options use the configured defaults.
    pub async fn connect(
        &self,
        selection: DeviceSelection,
        options: Option<SerialOptions>,
    ) -> Result<UsbDevice> {
        let device = match self.provider().find_device(selection).await {
            Ok(device) => device,
            Err(e) => {
                warn!(?selection, error = %e, "No device to connect to");
                self.events
                    .publish(BridgeEvent::error(format!("Failed to connect: {}", e)));
                return Err(e.into());
            }
        };

        let options = options.unwrap_or_else(|| self.config.default_serial_options.clone());
        self.session.connect(device.device_id, &options).await?;
        Ok(device)
    }

    /// [`connect`](Self::connect) with a host request object.
    pub async fn connect_request(&self, request: ConnectRequest) -> Result<UsbDevice> {
        let selection = request.selection();
        self.connect(selection, Some(request.options)).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.session.disconnect().await?;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn connected_device(&self) -> Option<u32> {
        self.session.connected_device()
    }

    // ------------------------------------------------------------------
    // I/O
    // ------------------------------------------------------------------

    /// Returns the number of bytes accepted by the transport.
    pub async fn write(&self, data: &str) -> Result<usize> {
        Ok(self.session.write(data).await?)
    }

    pub async fn read(&self) -> Result<String> {
        Ok(self.session.read().await?)
    }

    pub fn start_listening(&self) -> Result<()> {
        Ok(self.session.start_listening()?)
    }

    pub fn stop_listening(&self) {
        self.session.stop_listening();
    }

    pub fn is_listening(&self) -> bool {
        self.session.is_listening()
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Register `callback` for a host event name such as `"dataReceived"`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn add_listener<F>(&self, event_name: &str, callback: F) -> Result<ListenerHandle>
    where
        F: Fn(BridgeEvent) + Send + Sync + 'static,
    {
        let kind: EventKind = event_name.parse()?;
        Ok(self.add_listener_for(kind, callback))
    }

    pub fn add_listener_for<F>(&self, kind: EventKind, callback: F) -> ListenerHandle
    where
        F: Fn(BridgeEvent) + Send + Sync + 'static,
    {
        let scope = self
            .listener_scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        debug!(event = %kind, "Listener added");
        self.events.add_scoped_listener(kind, &scope, callback)
    }

    /// Detach every listener registered through this service.
    pub fn remove_all_listeners(&self) {
        let previous = std::mem::replace(
            &mut *self
                .listener_scope
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            CancellationToken::new(),
        );
        previous.cancel();
        debug!("All listeners removed");
    }

    /// Raw event stream, for hosts that prefer pulling over callbacks.
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.events.subscribe())
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Stop the watcher, stop listening and close any open link.
    pub async fn shutdown(&self) -> Result<()> {
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(watcher) = watcher {
            watcher.stop().await;
        }

        self.session.stop_listening();
        if self.session.is_connected() {
            self.session.disconnect().await?;
        }

        info!("Service shut down");
        Ok(())
    }
}

impl Drop for UsbSerialService {
    fn drop(&mut self) {
        if let Some(watcher) = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            watcher.cancel();
        }
    }
}

impl std::fmt::Debug for UsbSerialService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbSerialService")
            .field("session", &self.session)
            .field("config", &self.config)
            .finish()
    }
}
