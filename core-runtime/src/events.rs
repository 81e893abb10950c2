//! # Event Bus System
//!
//! Provides the notification channel between the serial core and the host
//! application using `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: [`BridgeEvent`] and its payloads ([`DataRecord`],
//!   [`ConnectionState`], [`ErrorNotice`])
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//! - **Listener Handles**: Callback registrations that detach on drop
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐    emit     ┌───────────┐
//! │ Drain loop    ├────────────>│           │    add_listener   ┌──────────────┐
//! └───────────────┘             │ EventBus  ├──────────────────>│ Host callback│
//! ┌───────────────┐    emit     │ (broadcast│                   └──────────────┘
//! │ SerialSession ├────────────>│  channel) │    subscribe      ┌──────────────┐
//! └───────────────┘             │           ├──────────────────>│ EventStream  │
//! ┌───────────────┐    emit     │           │                   └──────────────┘
//! │ Device watcher├────────────>│           │
//! └───────────────┘             └───────────┘
//! ```
//!
//! ## Event Names
//!
//! Host listeners register by name. The names are fixed by the host contract:
//!
//! | Name                     | Payload |
//! |--------------------------|---------|
//! | `dataReceived`           | [`DataRecord`] |
//! | `connectionStateChanged` | [`ConnectionState`] |
//! | `deviceAttached`         | [`UsbDevice`] |
//! | `deviceDetached`         | `{ deviceId }` |
//! | `error`                  | [`ErrorNotice`] |
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{BridgeEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut subscriber = bus.subscribe();
//!
//! bus.emit(BridgeEvent::error("port vanished")).ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event.event_name(), "error");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; listener tasks log it and keep receiving.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.
//!
//! Emitting with no subscribers is not an error for the serial core: events
//! are fire-and-forget and nobody is obliged to listen.

use bridge_traits::UsbDevice;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::error::Error;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Serial telemetry can arrive in bursts of many short lines, so this is
/// larger than a typical UI event queue.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Event Types
// ============================================================================

/// One framed unit of received data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DataRecord {
    /// Trimmed text of the line or flushed hex run
    #[serde(rename = "data")]
    pub raw_text: String,
    /// Uppercase hex rendering of `raw_text`
    #[serde(rename = "hexData")]
    pub hex_text: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub device_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorNotice {
    pub message: String,
}

/// Every notification delivered to the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum BridgeEvent {
    DataReceived(DataRecord),
    ConnectionStateChanged(ConnectionState),
    DeviceAttached(UsbDevice),
    #[serde(rename_all = "camelCase")]
    DeviceDetached {
        device_id: u32,
    },
    Error(ErrorNotice),
}

impl BridgeEvent {
    pub fn connected(device_id: u32) -> Self {
        BridgeEvent::ConnectionStateChanged(ConnectionState {
            connected: true,
            device_id: Some(device_id),
        })
    }

    pub fn disconnected(device_id: Option<u32>) -> Self {
        BridgeEvent::ConnectionStateChanged(ConnectionState {
            connected: false,
            device_id,
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        BridgeEvent::Error(ErrorNotice {
            message: message.into(),
        })
    }

    pub fn kind(&self) -> EventKind {
        match self {
            BridgeEvent::DataReceived(_) => EventKind::DataReceived,
            BridgeEvent::ConnectionStateChanged(_) => EventKind::ConnectionStateChanged,
            BridgeEvent::DeviceAttached(_) => EventKind::DeviceAttached,
            BridgeEvent::DeviceDetached { .. } => EventKind::DeviceDetached,
            BridgeEvent::Error(_) => EventKind::Error,
        }
    }

    /// Host-facing event name, e.g. `"dataReceived"`.
    pub fn event_name(&self) -> &'static str {
        self.kind().name()
    }
}

/// Discriminant of [`BridgeEvent`], used to register listeners by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    DataReceived,
    ConnectionStateChanged,
    DeviceAttached,
    DeviceDetached,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::DataReceived,
        EventKind::ConnectionStateChanged,
        EventKind::DeviceAttached,
        EventKind::DeviceDetached,
        EventKind::Error,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::DataReceived => "dataReceived",
            EventKind::ConnectionStateChanged => "connectionStateChanged",
            EventKind::DeviceAttached => "deviceAttached",
            EventKind::DeviceDetached => "deviceDetached",
            EventKind::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| Error::UnknownEvent(s.to_string()))
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel for [`BridgeEvent`]s.
///
/// Cloning is cheap; all clones publish into the same channel.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{BridgeEvent, EventBus};
///
/// # #[tokio::main]
/// # async fn main() {
/// let event_bus = EventBus::new(100);
///
/// let mut subscriber1 = event_bus.subscribe();
/// let mut subscriber2 = event_bus.subscribe();
///
/// event_bus.emit(BridgeEvent::connected(3)).ok();
///
/// assert_eq!(subscriber1.recv().await.unwrap(), BridgeEvent::connected(3));
/// assert_eq!(subscriber2.recv().await.unwrap(), BridgeEvent::connected(3));
/// # }
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BridgeEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per subscriber.
    ///   When a subscriber falls behind by more than this amount, it will
    ///   receive a `RecvError::Lagged` error.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new event bus with the default buffer size.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// Returns an error if there are no active subscribers.
    pub fn emit(&self, event: BridgeEvent) -> Result<usize, SendError<BridgeEvent>> {
        self.sender.send(event)
    }

    /// Publishes an event, ignoring the absence of subscribers.
    pub fn publish(&self, event: BridgeEvent) {
        if self.sender.send(event).is_err() {
            trace!("Event dropped, no subscribers");
        }
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Each call creates an independent receiver that will receive all future events.
    /// Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<BridgeEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    ///
    /// # Example
    ///
    /// ```rust
    /// use core_runtime::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.subscriber_count(), 0);
    ///
    /// let _subscriber = event_bus.subscribe();
    /// assert_eq!(event_bus.subscriber_count(), 1);
    /// ```
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Registers `callback` for every event of `kind`.
    ///
    /// The receiver is created before this returns, so events emitted right
    /// after registration are delivered. The callback runs on a spawned
    /// Tokio task; this must be called from within a runtime.
    pub fn add_listener<F>(&self, kind: EventKind, callback: F) -> ListenerHandle
    where
        F: Fn(BridgeEvent) + Send + Sync + 'static,
    {
        self.add_scoped_listener(kind, &CancellationToken::new(), callback)
    }

    /// Like [`add_listener`](Self::add_listener), but the listener also
    /// stops when `scope` is cancelled.
    pub fn add_scoped_listener<F>(
        &self,
        kind: EventKind,
        scope: &CancellationToken,
        callback: F,
    ) -> ListenerHandle
    where
        F: Fn(BridgeEvent) + Send + Sync + 'static,
    {
        let mut stream = EventStream::new(self.subscribe()).filter(move |e| e.kind() == kind);
        let token = scope.child_token();
        let cancelled = token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    received = stream.recv() => match received {
                        Ok(event) => callback(event),
                        Err(RecvError::Lagged(missed)) => {
                            warn!(event = %kind, missed, "Listener fell behind, events dropped");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });

        ListenerHandle {
            id: Uuid::new_v4(),
            kind,
            token,
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Listener Handles
// ============================================================================

/// A registered callback. Dropping the handle detaches the callback.
pub struct ListenerHandle {
    id: Uuid,
    kind: EventKind,
    token: CancellationToken,
}

impl ListenerHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// False once removed, dropped or released by its scope.
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Detach the callback. An event already being delivered may still complete.
    pub fn remove(self) {
        // Drop cancels the token.
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("active", &self.is_active())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&BridgeEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with additional filtering capabilities.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{BridgeEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let data_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, BridgeEvent::DataReceived(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<BridgeEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<BridgeEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Adds a filter function to this stream.
    ///
    /// Only events that match the filter will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&BridgeEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &BridgeEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<BridgeEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<BridgeEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
