//! Façade behavior against a fake provider and transport

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::{
    DeviceChangeStream, DeviceEvent, DeviceProvider, DeviceSelection, SerialOptions,
    SerialTransport, UsbDevice,
};
use bytes::Bytes;
use core_service::{
    BridgeConfig, BridgeEvent, ConnectRequest, EventKind, EventStream, SerialError, ServiceError,
    UsbSerialService,
};
use mockall::mock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

mock! {
    pub Transport {}

    #[async_trait]
    impl SerialTransport for Transport {
        async fn open(&self, device_id: u32, options: &SerialOptions) -> BridgeResult<()>;
        async fn read(&self) -> BridgeResult<Option<Bytes>>;
        async fn write(&self, data: &[u8]) -> BridgeResult<usize>;
        async fn close(&self) -> BridgeResult<()>;
    }
}

/// Provider backed by a fixed device list and a test-fed change channel.
struct FakeProvider {
    devices: Vec<UsbDevice>,
    granted: bool,
    changes: Mutex<Option<mpsc::UnboundedReceiver<DeviceEvent>>>,
}

impl FakeProvider {
    fn with_devices(devices: Vec<UsbDevice>) -> (Arc<Self>, mpsc::UnboundedSender<DeviceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let provider = Arc::new(Self {
            devices,
            granted: true,
            changes: Mutex::new(Some(rx)),
        });
        (provider, tx)
    }

    fn without_hotplug(devices: Vec<UsbDevice>) -> Arc<Self> {
        Arc::new(Self {
            devices,
            granted: false,
            changes: Mutex::new(None),
        })
    }
}

struct ChannelChanges(mpsc::UnboundedReceiver<DeviceEvent>);

#[async_trait]
impl DeviceChangeStream for ChannelChanges {
    async fn next(&mut self) -> Option<DeviceEvent> {
        self.0.recv().await
    }
}

#[async_trait]
impl DeviceProvider for FakeProvider {
    async fn list_devices(&self) -> BridgeResult<Vec<UsbDevice>> {
        Ok(self.devices.clone())
    }

    async fn request_permission(&self, _device: &UsbDevice) -> BridgeResult<bool> {
        Ok(self.granted)
    }

    async fn subscribe_changes(&self) -> BridgeResult<Box<dyn DeviceChangeStream>> {
        match self.changes.lock().unwrap().take() {
            Some(rx) => Ok(Box::new(ChannelChanges(rx))),
            None => Err(BridgeError::NotAvailable("no hot-plug".to_string())),
        }
    }
}

/// Transport that opens anything and never produces data.
#[derive(Default)]
struct IdleTransport {
    opened: Mutex<Vec<u32>>,
    close_calls: AtomicUsize,
}

#[async_trait]
impl SerialTransport for IdleTransport {
    async fn open(&self, device_id: u32, _options: &SerialOptions) -> BridgeResult<()> {
        self.opened.lock().unwrap().push(device_id);
        Ok(())
    }

    async fn read(&self) -> BridgeResult<Option<Bytes>> {
        std::future::pending().await
    }

    async fn write(&self, data: &[u8]) -> BridgeResult<usize> {
        Ok(data.len())
    }

    async fn close(&self) -> BridgeResult<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn devices() -> Vec<UsbDevice> {
    vec![
        UsbDevice::new(3, "/dev/ttyUSB0").with_usb_ids(0x0403, 0x6001),
        UsbDevice::new(7, "/dev/ttyACM0").with_usb_ids(0x2341, 0x0043),
    ]
}

fn config(transport: Arc<dyn SerialTransport>, provider: Arc<dyn DeviceProvider>) -> BridgeConfig {
    BridgeConfig::builder()
        .transport(transport)
        .device_provider(provider)
        .build()
        .unwrap()
}

async fn next_event(stream: &mut EventStream) -> BridgeEvent {
    tokio::time::timeout(Duration::from_secs(1), stream.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed")
}

// ---------------------------------------------------------------------------
// Devices and permission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_list_devices() {
    let provider = FakeProvider::without_hotplug(devices());
    let service = UsbSerialService::new(config(Arc::new(IdleTransport::default()), provider));

    let listed = service.list_devices().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].device_id, 3);
    assert_eq!(listed[1].device_name, "/dev/ttyACM0");
}

#[tokio::test]
async fn test_request_permission_first_available() {
    let (provider, _changes) = FakeProvider::with_devices(devices());
    let service = UsbSerialService::new(config(Arc::new(IdleTransport::default()), provider));

    let status = service
        .request_permission(DeviceSelection::FirstAvailable)
        .await
        .unwrap();
    assert!(status.granted);
    assert_eq!(status.device_id, 3);
}

#[tokio::test]
async fn test_request_permission_reports_denial() {
    let provider = FakeProvider::without_hotplug(devices());
    let service = UsbSerialService::new(config(Arc::new(IdleTransport::default()), provider));

    let status = service
        .request_permission(DeviceSelection::Id(7))
        .await
        .unwrap();
    assert!(!status.granted);
    assert_eq!(status.device_id, 7);
}

#[tokio::test]
async fn test_request_permission_unknown_device() {
    let provider = FakeProvider::without_hotplug(devices());
    let service = UsbSerialService::new(config(Arc::new(IdleTransport::default()), provider));

    let err = service
        .request_permission(DeviceSelection::Id(42))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Serial(SerialError::DeviceNotFound(42))
    ));
}

#[tokio::test]
async fn test_request_permission_without_devices() {
    let provider = FakeProvider::without_hotplug(Vec::new());
    let service = UsbSerialService::new(config(Arc::new(IdleTransport::default()), provider));

    let err = service
        .request_permission(DeviceSelection::FirstAvailable)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Serial(SerialError::NoDeviceAvailable)
    ));
}

// ---------------------------------------------------------------------------
// Connect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_connect_first_available_with_default_options() {
    let mut transport = MockTransport::new();
    transport
        .expect_open()
        .withf(|device_id, options| *device_id == 3 && *options == SerialOptions::default())
        .times(1)
        .returning(|_, _| Ok(()));

    let provider = FakeProvider::without_hotplug(devices());
    let service = UsbSerialService::new(config(Arc::new(transport), provider));

    let device = service
        .connect(DeviceSelection::FirstAvailable, None)
        .await
        .unwrap();
    assert_eq!(device.device_id, 3);
    assert!(service.is_connected());
    assert_eq!(service.connected_device(), Some(3));
}

#[tokio::test]
async fn test_connect_request_passes_line_settings() {
    let mut transport = MockTransport::new();
    transport
        .expect_open()
        .withf(|device_id, options| *device_id == 7 && options.baud_rate == 115_200)
        .times(1)
        .returning(|_, _| Ok(()));

    let provider = FakeProvider::without_hotplug(devices());
    let service = UsbSerialService::new(config(Arc::new(transport), provider));

    let request: ConnectRequest =
        serde_json::from_str(r#"{"deviceId": 7, "baudRate": 115200}"#).unwrap();
    let device = service.connect_request(request).await.unwrap();
    assert_eq!(device.device_id, 7);
}

#[tokio::test]
async fn test_connect_without_devices_reports_error() {
    let mut transport = MockTransport::new();
    transport.expect_open().never();

    let provider = FakeProvider::without_hotplug(Vec::new());
    let service = UsbSerialService::new(config(Arc::new(transport), provider));
    let mut events = service.subscribe();

    let err = service
        .connect(DeviceSelection::FirstAvailable, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Serial(SerialError::NoDeviceAvailable)
    ));

    match next_event(&mut events).await {
        BridgeEvent::Error(notice) => assert!(notice.message.starts_with("Failed to connect")),
        other => panic!("expected error event, got {:?}", other),
    }
    assert!(!service.is_connected());
}

#[tokio::test]
async fn test_io_rejected_before_connect() {
    let mut transport = MockTransport::new();
    transport.expect_write().never();
    transport.expect_read().never();

    let provider = FakeProvider::without_hotplug(devices());
    let service = UsbSerialService::new(config(Arc::new(transport), provider));

    assert!(matches!(
        service.write("ping").await,
        Err(ServiceError::Serial(SerialError::NotConnected))
    ));
    assert!(matches!(
        service.read().await,
        Err(ServiceError::Serial(SerialError::NotConnected))
    ));
    assert!(matches!(
        service.start_listening(),
        Err(ServiceError::Serial(SerialError::NotConnected))
    ));
}

// ---------------------------------------------------------------------------
// Hot-plug
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_hotplug_events_are_forwarded() {
    let (provider, changes) = FakeProvider::with_devices(devices());
    let service = UsbSerialService::start(config(Arc::new(IdleTransport::default()), provider))
        .await
        .unwrap();
    let mut events = service.subscribe();

    let attached = UsbDevice::new(9, "/dev/ttyUSB1");
    changes.send(DeviceEvent::Attached(attached.clone())).unwrap();
    changes.send(DeviceEvent::Detached { device_id: 9 }).unwrap();

    assert_eq!(next_event(&mut events).await, BridgeEvent::DeviceAttached(attached));
    assert_eq!(
        next_event(&mut events).await,
        BridgeEvent::DeviceDetached { device_id: 9 }
    );
}

#[tokio::test]
async fn test_detach_of_connected_device_disconnects() {
    let transport = Arc::new(IdleTransport::default());
    let (provider, changes) = FakeProvider::with_devices(devices());
    let service = UsbSerialService::start(config(transport.clone(), provider))
        .await
        .unwrap();

    service.connect(DeviceSelection::Id(7), None).await.unwrap();
    service.start_listening().unwrap();
    let mut events = service.subscribe();

    changes.send(DeviceEvent::Detached { device_id: 7 }).unwrap();

    assert_eq!(
        next_event(&mut events).await,
        BridgeEvent::DeviceDetached { device_id: 7 }
    );
    assert_eq!(next_event(&mut events).await, BridgeEvent::disconnected(Some(7)));
    assert!(!service.is_connected());
    assert!(!service.is_listening());
    assert_eq!(transport.close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_detach_of_other_device_keeps_link() {
    let transport = Arc::new(IdleTransport::default());
    let (provider, changes) = FakeProvider::with_devices(devices());
    let service = UsbSerialService::start(config(transport.clone(), provider))
        .await
        .unwrap();

    service.connect(DeviceSelection::Id(3), None).await.unwrap();
    let mut events = service.subscribe();

    changes.send(DeviceEvent::Detached { device_id: 7 }).unwrap();
    assert_eq!(
        next_event(&mut events).await,
        BridgeEvent::DeviceDetached { device_id: 7 }
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(service.is_connected());
    assert_eq!(transport.close_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_detach_without_auto_disconnect() {
    let transport = Arc::new(IdleTransport::default());
    let (provider, changes) = FakeProvider::with_devices(devices());
    let config = BridgeConfig::builder()
        .transport(transport.clone())
        .device_provider(provider)
        .disconnect_on_detach(false)
        .build()
        .unwrap();
    let service = UsbSerialService::start(config).await.unwrap();

    service.connect(DeviceSelection::Id(3), None).await.unwrap();
    let mut events = service.subscribe();

    changes.send(DeviceEvent::Detached { device_id: 3 }).unwrap();
    assert_eq!(
        next_event(&mut events).await,
        BridgeEvent::DeviceDetached { device_id: 3 }
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(service.is_connected());
}

#[tokio::test]
async fn test_start_without_hotplug_support() {
    let provider = FakeProvider::without_hotplug(devices());
    let service = UsbSerialService::start(config(Arc::new(IdleTransport::default()), provider))
        .await
        .unwrap();

    assert_eq!(service.list_devices().await.unwrap().len(), 2);
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_add_listener_by_event_name() {
    let (provider, _changes) = FakeProvider::with_devices(devices());
    let service = UsbSerialService::new(config(Arc::new(IdleTransport::default()), provider));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = service
        .add_listener("connectionStateChanged", move |event| {
            let _ = tx.send(event);
        })
        .unwrap();
    assert_eq!(handle.kind(), EventKind::ConnectionStateChanged);

    service.connect(DeviceSelection::Id(3), None).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, BridgeEvent::connected(3));
}

#[tokio::test]
async fn test_add_listener_unknown_event_name() {
    let provider = FakeProvider::without_hotplug(devices());
    let service = UsbSerialService::new(config(Arc::new(IdleTransport::default()), provider));

    let err = service.add_listener("dataArrived", |_| {}).unwrap_err();
    assert!(matches!(err, ServiceError::Config(_)));
}

#[tokio::test]
async fn test_remove_all_listeners() {
    let provider = FakeProvider::without_hotplug(devices());
    let service = UsbSerialService::new(config(Arc::new(IdleTransport::default()), provider));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let removed_tx = tx.clone();
    let removed = service.add_listener_for(EventKind::ConnectionStateChanged, move |event| {
        let _ = removed_tx.send(("removed", event));
    });

    service.remove_all_listeners();
    assert!(!removed.is_active());

    let _kept = service.add_listener_for(EventKind::ConnectionStateChanged, move |event| {
        let _ = tx.send(("kept", event));
    });

    service.connect(DeviceSelection::Id(3), None).await.unwrap();

    let (source, event) = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(source, "kept");
    assert_eq!(event, BridgeEvent::connected(3));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_shutdown_closes_link_and_stops_watcher() {
    let transport = Arc::new(IdleTransport::default());
    let (provider, changes) = FakeProvider::with_devices(devices());
    let service = UsbSerialService::start(config(transport.clone(), provider))
        .await
        .unwrap();

    service.connect(DeviceSelection::Id(3), None).await.unwrap();
    service.start_listening().unwrap();

    service.shutdown().await.unwrap();

    assert!(!service.is_connected());
    assert!(!service.is_listening());
    assert_eq!(transport.close_calls.load(Ordering::SeqCst), 1);
    assert!(changes.is_closed());
}

#[tokio::test]
async fn test_shutdown_when_idle() {
    let transport = Arc::new(IdleTransport::default());
    let provider = FakeProvider::without_hotplug(devices());
    let service = UsbSerialService::new(config(transport.clone(), provider));

    service.shutdown().await.unwrap();
    assert_eq!(transport.close_calls.load(Ordering::SeqCst), 0);
}
