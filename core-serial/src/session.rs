//! Serial session: connection bookkeeping, one-shot I/O and the drain loop.
//!
//! A session owns at most one open link. While listening, a single spawned
//! drain task owns the transport's read side; it decodes each chunk, frames
//! it and publishes `dataReceived` records on the event bus.
//!
//! ```text
//!            start_listening (connected)
//!   Idle ──────────────────────────────> Draining
//!    ^                                      │
//!    └──────────────────────────────────────┘
//!      stop_listening / end of stream / read error / disconnect
//! ```
//!
//! Stopping is cooperative. The drain task checks the listening state before
//! each read and again before publishing what the read returned, under the
//! same lock `stop_listening` takes. Once `stop_listening` returns, nothing
//! else is published by that loop.

use bridge_traits::{Clock, SerialOptions, SerialTransport};
use core_runtime::events::{BridgeEvent, EventBus};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::decode::Utf8StreamDecoder;
use crate::error::{Result, SerialError};
use crate::framing::StreamFramer;

#[derive(Debug, Default)]
struct DrainState {
    listening: bool,
    /// Bumped on every start so a stale loop can tell it was superseded.
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl DrainState {
    fn is_current(&self, generation: u64) -> bool {
        self.listening && self.generation == generation
    }
}

#[derive(Debug, Default)]
struct SessionState {
    device_id: Option<u32>,
}

struct Shared {
    session: Mutex<SessionState>,
    drain: Mutex<DrainState>,
    read_decoder: Mutex<Utf8StreamDecoder>,
}

impl Shared {
    fn session(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn drain(&self) -> MutexGuard<'_, DrainState> {
        self.drain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_decoder(&self) -> MutexGuard<'_, Utf8StreamDecoder> {
        self.read_decoder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// One serial link plus its listening state.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct SerialSession {
    transport: Arc<dyn SerialTransport>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
}

impl SerialSession {
    pub fn new(transport: Arc<dyn SerialTransport>, events: EventBus, clock: Arc<dyn Clock>) -> Self {
        Self {
            transport,
            events,
            clock,
            shared: Arc::new(Shared {
                session: Mutex::new(SessionState::default()),
                drain: Mutex::new(DrainState::default()),
                read_decoder: Mutex::new(Utf8StreamDecoder::new()),
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.session().device_id.is_some()
    }

    /// Device id of the open link, if any.
    pub fn connected_device(&self) -> Option<u32> {
        self.shared.session().device_id
    }

    pub fn is_listening(&self) -> bool {
        self.shared.drain().listening
    }

    /// Open `device_id`. An existing link is torn down first.
    #[instrument(skip(self, options), fields(baud_rate = options.baud_rate))]
    pub async fn connect(&self, device_id: u32, options: &SerialOptions) -> Result<()> {
        options.validate()?;

        if self.is_connected() {
            debug!("Replacing existing connection");
            // Close errors are already broadcast; the new open decides the outcome.
            if let Err(e) = self.disconnect().await {
                warn!(error = %e, "Previous connection did not close cleanly");
            }
        }

        if let Err(e) = self.transport.open(device_id, options).await {
            error!(device_id, error = %e, "Failed to open serial device");
            self.events
                .publish(BridgeEvent::error(format!("Failed to connect: {}", e)));
            return Err(e.into());
        }

        self.shared.session().device_id = Some(device_id);
        self.shared.read_decoder().reset();

        info!(device_id, "Serial device connected");
        self.events.publish(BridgeEvent::connected(device_id));
        Ok(())
    }

    /// Close the link. Always reports `connectionStateChanged{connected: false}`.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) -> Result<()> {
        let stale = {
            let mut drain = self.shared.drain();
            drain.listening = false;
            drain.task.take()
        };

        let closed = self.transport.close().await;

        if let Some(task) = stale {
            task.abort();
        }

        let device_id = self.shared.session().device_id.take();
        self.shared.read_decoder().reset();

        self.events.publish(BridgeEvent::disconnected(device_id));

        match closed {
            Ok(()) => {
                info!(?device_id, "Serial device disconnected");
                Ok(())
            }
            Err(e) => {
                warn!(?device_id, error = %e, "Transport reported an error on close");
                self.events
                    .publish(BridgeEvent::error(format!("Failed to disconnect: {}", e)));
                Err(e.into())
            }
        }
    }

    /// Write `data` and return the number of bytes the transport accepted.
    pub async fn write(&self, data: &str) -> Result<usize> {
        let device_id = self.connected_device().ok_or(SerialError::NotConnected)?;

        match self.transport.write(data.as_bytes()).await {
            Ok(written) => {
                debug!(device_id, bytes = written, "Wrote to serial device");
                Ok(written)
            }
            Err(e) => {
                error!(device_id, error = %e, "Serial write failed");
                self.events
                    .publish(BridgeEvent::error(format!("Write error: {}", e)));
                Err(e.into())
            }
        }
    }

    /// Read the next chunk directly, bypassing the framer.
    ///
    /// Not available while listening: the drain loop owns the read side.
    pub async fn read(&self) -> Result<String> {
        let device_id = self.connected_device().ok_or(SerialError::NotConnected)?;
        let stale = {
            let mut drain = self.shared.drain();
            if drain.listening {
                return Err(SerialError::ListenerActive);
            }
            drain.task.take()
        };

        // A stopped loop may still be parked in a read; it must not take our chunk.
        if let Some(task) = stale {
            task.abort();
            let _ = task.await;
            debug!(device_id, "Retired stopped drain loop before one-shot read");
        }

        match self.transport.read().await {
            Ok(Some(chunk)) => {
                debug!(device_id, bytes = chunk.len(), "Read from serial device");
                Ok(self.shared.read_decoder().decode(&chunk))
            }
            Ok(None) => {
                debug!(device_id, "Serial stream ended");
                Err(SerialError::StreamClosed)
            }
            Err(e) => {
                error!(device_id, error = %e, "Serial read failed");
                self.events
                    .publish(BridgeEvent::error(format!("Read error: {}", e)));
                Err(e.into())
            }
        }
    }

    /// Start the drain loop. A no-op while already listening.
    pub fn start_listening(&self) -> Result<()> {
        let device_id = self.connected_device().ok_or(SerialError::NotConnected)?;

        let mut drain = self.shared.drain();
        if drain.listening {
            debug!(device_id, "Already listening");
            return Ok(());
        }

        // A previous loop may still be parked in a read; only one may read.
        if let Some(stale) = drain.task.take() {
            stale.abort();
        }

        drain.generation = drain.generation.wrapping_add(1);
        drain.listening = true;
        let generation = drain.generation;

        let task = tokio::spawn(drain_loop(
            Arc::clone(&self.transport),
            self.events.clone(),
            Arc::clone(&self.clock),
            Arc::clone(&self.shared),
            device_id,
            generation,
        ));
        drain.task = Some(task);

        info!(device_id, "Started listening");
        Ok(())
    }

    /// Ask the drain loop to stop. Does not interrupt an in-flight read.
    pub fn stop_listening(&self) {
        let mut drain = self.shared.drain();
        if drain.listening {
            drain.listening = false;
            info!("Stopped listening");
        }
    }
}

impl std::fmt::Debug for SerialSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialSession")
            .field("device_id", &self.connected_device())
            .field("listening", &self.is_listening())
            .finish()
    }
}

async fn drain_loop(
    transport: Arc<dyn SerialTransport>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
    device_id: u32,
    generation: u64,
) {
    let mut framer = StreamFramer::new();
    let mut decoder = Utf8StreamDecoder::new();

    loop {
        if !shared.drain().is_current(generation) {
            break;
        }

        match transport.read().await {
            Ok(Some(chunk)) => {
                let text = decoder.decode(&chunk);

                let drain = shared.drain();
                if !drain.is_current(generation) {
                    debug!(device_id, bytes = chunk.len(), "Dropping data read after stop");
                    break;
                }

                let frames = framer.push(&text);
                if !frames.is_empty() {
                    let timestamp = clock.unix_timestamp_millis();
                    debug!(device_id, records = frames.len(), "Framed incoming data");
                    for frame in frames {
                        events.publish(BridgeEvent::DataReceived(
                            frame.into_record(timestamp, device_id),
                        ));
                    }
                }
            }
            Ok(None) => {
                info!(device_id, "Serial stream ended, listening stopped");
                break;
            }
            Err(e) => {
                if shared.drain().is_current(generation) {
                    error!(device_id, error = %e, "Read failed while listening");
                    events.publish(BridgeEvent::error(format!("Read error: {}", e)));
                }
                break;
            }
        }
    }

    let discarded = framer.pending().len() + decoder.pending_len();
    if discarded > 0 {
        debug!(device_id, bytes = discarded, "Discarding unterminated tail");
    }

    let mut drain = shared.drain();
    if drain.generation == generation {
        drain.listening = false;
        drain.task = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_state_generation() {
        let mut state = DrainState::default();
        assert!(!state.is_current(0));

        state.listening = true;
        state.generation = 2;
        assert!(state.is_current(2));
        assert!(!state.is_current(1));

        state.listening = false;
        assert!(!state.is_current(2));
    }
}
