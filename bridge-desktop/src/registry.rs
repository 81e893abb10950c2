//! Port name ↔ device id bookkeeping
//!
//! Desktop operating systems identify serial ports by path (`/dev/ttyUSB0`,
//! `COM3`) while the host contract uses integer device ids. The registry hands
//! out a stable id per port name for the lifetime of the process, so a device
//! that is unplugged and plugged back in keeps its id.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
struct RegistryState {
    ids: HashMap<String, u32>,
    next_id: u32,
}

/// Shared between the device provider (which assigns ids) and the transport
/// (which resolves them back to port names).
#[derive(Debug, Default)]
pub struct PortRegistry {
    state: Mutex<RegistryState>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `port_name`, assigning the next free one on first sight.
    pub fn id_for(&self, port_name: &str) -> u32 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = state.ids.get(port_name) {
            return *id;
        }
        let id = state.next_id;
        state.next_id += 1;
        state.ids.insert(port_name.to_string(), id);
        id
    }

    pub fn port_name(&self, device_id: u32) -> Option<String> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .ids
            .iter()
            .find(|(_, id)| **id == device_id)
            .map(|(name, _)| name.clone())
    }
}
