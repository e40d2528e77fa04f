//! Static, ISR/callback-safe channels into the domain core.
//!
//! Two producers exist outside the normal call stack: the Zigbee stack
//! thread (send-status, responses, attribute writes, APSDE indications —
//! all delivered as [`ZigbeeInboundEvent`]s) and the alarm pool's scheduler
//! callback trampoline, which can only hand back a bare slot index (see
//! [`crate::alarm::AlarmCallback`]). Both post into a [`StaticQueue`] here;
//! the service loop drains them once per tick.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::ld2412::protocol::PresenceSample;
use crate::queue::StaticQueue;
use crate::zigbee::ports::ZigbeeInboundEvent;

/// Which of presence fusion's two re-arm timers (spec §4.5) fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceTimerKind {
    Local,
    External,
}

/// A presence-relevant signal produced by the LD2412 fast queue or a GPIO
/// ISR, queued for the Zigbee stack thread to fold into [`crate::service::Service`].
/// Spec §5 keeps attribute-state access to one thread ("any access to
/// attribute state from other threads acquires the API lock and must be
/// brief"); rather than have the fast task and the reset-button ISR reach
/// into `Service` directly, they post here and the stack thread drains it
/// the same way it drains `ZIGBEE_INBOUND`.
#[derive(Debug, Clone, Copy)]
pub enum PresenceSignal {
    MmSample(PresenceSample),
    RadarPresenceIntr(bool),
    PirPresenceIntr(bool),
}

static ZIGBEE_INBOUND: StaticQueue<ZigbeeInboundEvent, 32> = StaticQueue::new();
static COMMAND_DEADLINES: StaticQueue<u8, 32> = StaticQueue::new();
static PRESENCE_TIMERS: StaticQueue<PresenceTimerKind, 4> = StaticQueue::new();
static PRESENCE_SIGNALS: StaticQueue<PresenceSignal, 64> = StaticQueue::new();

/// Set by the alarm pool's bind-rescan trampoline (see
/// `service::Service::handle_zigbee_event`'s `ApsBindChange` arm), cleared by
/// the service loop once it has re-verified every live bind. A plain flag
/// rather than a queue: repeated bind/unbind churn within the 2s window
/// should collapse into a single re-scan pass, not one per announcement.
static BIND_RESCAN_DUE: AtomicBool = AtomicBool::new(false);

/// Posts a Zigbee-stack callback into the inbound queue. Safe to call from
/// any context; drops the event if the queue is full.
pub fn push_zigbee_event(event: ZigbeeInboundEvent) -> bool {
    ZIGBEE_INBOUND.push(event)
}

pub fn drain_zigbee_events(handler: impl FnMut(ZigbeeInboundEvent)) {
    ZIGBEE_INBOUND.drain(handler);
}

/// Posts a response-deadline slot index. Called from the alarm pool's
/// bare `fn(u8)` callback, which has no way to reach back into
/// [`crate::command_engine::CommandEngine`] directly.
pub fn push_command_deadline(slot: u8) -> bool {
    COMMAND_DEADLINES.push(slot)
}

pub fn drain_command_deadlines(handler: impl FnMut(u8)) {
    COMMAND_DEADLINES.drain(handler);
}

/// Posts a presence re-arm timer firing. Called from the alarm pool's bare
/// `fn(u8)` callback trampolines (`presence::local_timer_fired` /
/// `presence::external_timer_fired`).
pub fn push_presence_timer(kind: PresenceTimerKind) -> bool {
    PRESENCE_TIMERS.push(kind)
}

pub fn drain_presence_timers(handler: impl FnMut(PresenceTimerKind)) {
    PRESENCE_TIMERS.drain(handler);
}

/// Posts a presence-relevant signal from the LD2412 fast task or a GPIO
/// ISR. Safe to call from any context; drops the signal if the queue is
/// full rather than block.
pub fn push_presence_signal(signal: PresenceSignal) -> bool {
    PRESENCE_SIGNALS.push(signal)
}

pub fn drain_presence_signals(handler: impl FnMut(PresenceSignal)) {
    PRESENCE_SIGNALS.drain(handler);
}

/// Alarm-pool trampoline: arms 2s after an `ApsBindChange` observation.
pub fn request_bind_rescan(_arg: u8) {
    BIND_RESCAN_DUE.store(true, Ordering::Relaxed);
}

/// Takes and clears the pending bind-rescan flag.
pub fn take_bind_rescan_due() -> bool {
    BIND_RESCAN_DUE.swap(false, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zigbee::ports::{BindTarget, ResponsePayload};

    #[test]
    fn zigbee_events_roundtrip_fifo() {
        push_zigbee_event(ZigbeeInboundEvent::ApsBindChange);
        push_zigbee_event(ZigbeeInboundEvent::SendStatus { sequence_number: 7, success: true });
        let mut seen = 0;
        drain_zigbee_events(|_| seen += 1);
        assert_eq!(seen, 2);
    }

    #[test]
    fn command_deadlines_roundtrip() {
        push_command_deadline(3);
        push_command_deadline(9);
        let mut out = Vec::new();
        drain_command_deadlines(|s| out.push(s));
        assert_eq!(out, vec![3, 9]);
    }

    #[test]
    fn presence_timers_roundtrip() {
        push_presence_timer(PresenceTimerKind::Local);
        push_presence_timer(PresenceTimerKind::External);
        let mut out = Vec::new();
        drain_presence_timers(|k| out.push(k));
        assert_eq!(out, vec![PresenceTimerKind::Local, PresenceTimerKind::External]);
    }

    #[test]
    fn presence_signals_roundtrip() {
        push_presence_signal(PresenceSignal::RadarPresenceIntr(true));
        push_presence_signal(PresenceSignal::PirPresenceIntr(false));
        let mut out = 0;
        drain_presence_signals(|_| out += 1);
        assert_eq!(out, 2);
    }

    #[test]
    fn response_payload_carries_bool() {
        let t = BindTarget { ieee_addr: 1, short_addr: 2, endpoint: 1 };
        let ev = ZigbeeInboundEvent::Response {
            cluster: 6,
            command_id: 0,
            source: t,
            success: true,
            payload: ResponsePayload::Bool(true),
        };
        if let ZigbeeInboundEvent::Response { payload: ResponsePayload::Bool(v), .. } = ev {
            assert!(v);
        } else {
            panic!("expected Bool payload");
        }
    }
}
