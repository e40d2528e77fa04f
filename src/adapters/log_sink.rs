//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured [`Notification`]s to the
//! ESP-IDF logger (which goes to UART / USB-CDC in production). A future
//! RPC or remote-diagnostics adapter would implement the same trait.

use log::{info, warn};

use crate::service::Notification;
use crate::zigbee::ports::EventSink;

/// Adapter that logs every [`Notification`] to the serial console.
#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &Notification) {
        match event {
            Notification::BindState { slot, state } => {
                info!("BIND  | slot={slot} -> {state:?}");
            }
            Notification::CommandFailed { slot } => {
                warn!("BIND  | slot={slot} command exhausted retries");
            }
            Notification::Occupancy(occupied) => {
                info!("PRESENCE | fused={occupied}");
            }
            Notification::ConfigSaved => {
                info!("CONFIG | saved");
            }
            Notification::ConfigSaveFailed => {
                warn!("CONFIG | save failed");
            }
            Notification::RestartGuardTripped => {
                warn!("ALARM | counter of death tripped, restarting");
            }
        }
    }
}
