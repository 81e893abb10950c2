//! Hot-plug forwarding.

use bridge_traits::{DeviceChangeStream, DeviceEvent};
use core_runtime::events::{BridgeEvent, EventBus};
use core_serial::SerialSession;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Background task turning provider notifications into bus events.
pub(crate) struct DeviceWatcher {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl DeviceWatcher {
    pub(crate) fn spawn(
        mut changes: Box<dyn DeviceChangeStream>,
        events: EventBus,
        session: SerialSession,
        disconnect_on_detach: bool,
    ) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let task = tokio::spawn(async move {
            loop {
                let change = tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    change = changes.next() => change,
                };

                let Some(change) = change else {
                    debug!("Device change stream ended");
                    break;
                };

                forward(change, &events, &session, disconnect_on_detach).await;
            }
        });

        Self { token, task }
    }

    /// Stop forwarding and wait for the task to finish.
    pub(crate) async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!(error = %e, "Device watcher task failed");
            }
        }
    }

    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }
}

async fn forward(
    change: DeviceEvent,
    events: &EventBus,
    session: &SerialSession,
    disconnect_on_detach: bool,
) {
    match change {
        DeviceEvent::Attached(device) => {
            info!(device_id = device.device_id, name = %device.device_name, "USB device attached");
            events.publish(BridgeEvent::DeviceAttached(device));
        }
        DeviceEvent::Detached { device_id } => {
            info!(device_id, "USB device detached");
            events.publish(BridgeEvent::DeviceDetached { device_id });

            if disconnect_on_detach && session.connected_device() == Some(device_id) {
                info!(device_id, "Connected device was unplugged, disconnecting");
                if let Err(e) = session.disconnect().await {
                    warn!(device_id, error = %e, "Disconnect after detach reported an error");
                }
            }
        }
    }
}
