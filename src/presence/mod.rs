//! Presence fusion & on/off dispatch (C5).
//!
//! Unlike the bind lifecycle (C7), this is not state-table shaped: it is
//! the five-clause rule from spec §4.5, expressed as ordinary control flow
//! over a small blackboard ([`PresenceContext`]).

pub mod context;

pub use context::PresenceContext;

use crate::events::PresenceTimerKind;

/// Alarm-pool trampoline for the local on/off re-arm timer
/// (`OnOffMode::TimedOnLocal`). Mirrors `command_engine::deadline_alarm_fired`:
/// the pool's callback type is a bare `fn(u8)`, so firing posts to a static
/// queue instead of touching `PresenceContext` directly.
pub fn local_timer_fired(_arg: u8) {
    crate::events::push_presence_timer(PresenceTimerKind::Local);
}

/// Alarm-pool trampoline for the external on/off-cluster timeout.
pub fn external_timer_fired(_arg: u8) {
    crate::events::push_presence_timer(PresenceTimerKind::External);
}
