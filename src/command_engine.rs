//! Outgoing command engine (C6).
//!
//! Ported field-for-field from `original_source/main/zb_helpers/zbh_cmd_sender.hpp`'s
//! `CmdWithRetries`: each sendable command owns a retry context keyed by
//! sequence number (send-status) and by (cluster, command id) (response).
//! `Send()` enforces mutual exclusion, `SendAgain()` re-dispatches and
//! re-arms the per-try deadline, and the outcome matrix in spec §4.6
//! decides whether to retry or report success/total failure.

use crate::alarm::AlarmPool;
use crate::error::{CommandError, Error};
use crate::zigbee::ports::{BindTarget, ResponsePayload, SchedulerPort, ZigbeeCommandPort};

/// Default retry budget per spec §3 ("Outgoing command").
pub const DEFAULT_RETRIES: u8 = 2;
/// Per-try response deadline.
pub const RESPONSE_DEADLINE_MS: u32 = 700;

/// Which ZCL/ZDO exchange a slot is driving. Each maps to one
/// [`ZigbeeCommandPort`] method and to a (cluster, command id) pair used to
/// correlate the eventual response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    On,
    Off,
    OnWithTimedOff { on_time_ds: u16 },
    MgmtBindReq,
    BindToMe,
    ReadReportingConfig,
    ConfigureReport,
    ReadOnOffAttribute,
    Unbind,
}

/// Alarm-pool trampoline: the pool's callback type is `fn(u8)` (mirroring
/// the Zigbee scheduler's own signature), but posting to the deadline queue
/// returns whether the push succeeded. This adapts one to the other.
fn deadline_alarm_fired(slot: u8) {
    crate::events::push_command_deadline(slot);
}

impl CommandKind {
    /// Synthetic (cluster, command id) correlation key. ZDO-shaped
    /// exchanges (bind/unbind/mgmt-bind) use the 0x8000-range reserved for
    /// profile-wide responses; On/Off uses the real ZCL cluster id (0x0006)
    /// so external tooling watching the wire still makes sense of it.
    fn correlation_key(self) -> (u16, u16) {
        match self {
            Self::On => (0x0006, 0x01),
            Self::Off => (0x0006, 0x00),
            Self::OnWithTimedOff { .. } => (0x0006, 0x42),
            Self::MgmtBindReq => (0x8000, 0x33),
            Self::BindToMe => (0x8000, 0x21),
            Self::ReadReportingConfig => (0x0006, 0x09),
            Self::ConfigureReport => (0x0006, 0x06),
            Self::ReadOnOffAttribute => (0x0006, 0x0c),
            Self::Unbind => (0x8000, 0x22),
        }
    }

    fn dispatch(self, port: &mut impl ZigbeeCommandPort, target: BindTarget) -> Result<u8, Error> {
        match self {
            Self::On => port.send_on(target),
            Self::Off => port.send_off(target),
            Self::OnWithTimedOff { on_time_ds } => port.send_on_with_timed_off(target, on_time_ds),
            Self::MgmtBindReq => port.send_mgmt_bind_req(target),
            Self::BindToMe => port.send_bind_to_me(target),
            Self::ReadReportingConfig => port.send_read_reporting_config(target),
            Self::ConfigureReport => port.send_configure_report(target),
            Self::ReadOnOffAttribute => port.send_read_on_off_attribute(target),
            Self::Unbind => port.send_unbind(target),
        }
    }
}

/// Final disposition of a `Send()`, surfaced through [`CommandEngine::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success(ResponsePayload),
    TotalFailure,
}

struct Slot {
    kind: CommandKind,
    target: BindTarget,
    retries_left: u8,
    sequence_number: Option<u8>,
    send_status_seen: bool,
    response_seen: bool,
    deadline_handle: Option<u8>,
    outcome: Option<Outcome>,
}

/// One engine instance serves every in-flight command across the bind
/// lifecycle and presence on/off dispatch. `N` bounds how many commands can
/// be in flight at once (one per active bind plus a couple for presence).
pub struct CommandEngine<const N: usize> {
    slots: [Option<Slot>; N],
}

impl<const N: usize> CommandEngine<N> {
    pub fn new() -> Self {
        Self { slots: [const { None }; N] }
    }

    /// Starts (or restarts) sending `kind` to `target` in slot `idx`.
    /// Returns `AlreadyInFlight` — a no-op — if that slot already has an
    /// unresolved command, matching spec §4.6's mutual-exclusion rule.
    pub fn send(
        &mut self,
        idx: usize,
        target: BindTarget,
        kind: CommandKind,
        port: &mut impl ZigbeeCommandPort,
        alarms: &mut AlarmPool,
        scheduler: &mut impl SchedulerPort,
    ) -> Result<(), CommandError> {
        if self.slots[idx].is_some() {
            return Err(CommandError::AlreadyInFlight);
        }
        self.slots[idx] = Some(Slot {
            kind,
            target,
            retries_left: DEFAULT_RETRIES,
            sequence_number: None,
            send_status_seen: false,
            response_seen: false,
            deadline_handle: None,
            outcome: None,
        });
        self.send_again(idx, port, alarms, scheduler);
        Ok(())
    }

    fn send_again(
        &mut self,
        idx: usize,
        port: &mut impl ZigbeeCommandPort,
        alarms: &mut AlarmPool,
        scheduler: &mut impl SchedulerPort,
    ) {
        let (kind, target) = {
            let slot = self.slots[idx].as_mut().expect("send_again on empty slot");
            slot.send_status_seen = false;
            slot.response_seen = false;
            (slot.kind, slot.target)
        };

        match kind.dispatch(port, target) {
            Ok(seq) => {
                let slot = self.slots[idx].as_mut().unwrap();
                slot.sequence_number = Some(seq);
                slot.deadline_handle = alarms
                    .setup(
                        scheduler,
                        slot.deadline_handle,
                        deadline_alarm_fired,
                        idx as u8,
                        RESPONSE_DEADLINE_MS,
                    )
                    .ok();
            }
            Err(_) => self.fail_attempt(idx, port, alarms, scheduler),
        }
    }

    /// Call with every `ZigbeeInboundEvent::SendStatus` whose sequence
    /// number you haven't already matched to a slot.
    pub fn on_send_status(
        &mut self,
        sequence_number: u8,
        success: bool,
        port: &mut impl ZigbeeCommandPort,
        alarms: &mut AlarmPool,
        scheduler: &mut impl SchedulerPort,
    ) {
        let Some(idx) = self.find_by_sequence(sequence_number) else { return };
        let already_responded = self.slots[idx].as_ref().unwrap().response_seen;
        if already_responded {
            // A response already arrived — ignore a late send-status per
            // spec §4.6 ("send-status is ignored" once a response landed).
            return;
        }
        self.slots[idx].as_mut().unwrap().send_status_seen = true;
        if !success {
            self.fail_attempt(idx, port, alarms, scheduler);
        }
        // SUCCESS alone (no response yet) just waits for the response or
        // the deadline — nothing else to do here.
    }

    /// Call with every `ZigbeeInboundEvent::Response` matching a (cluster,
    /// command id) this engine is waiting on. Coordinator sources (short
    /// address 0, or the device's own IEEE) are ignored for accounting per
    /// spec §4.6.
    pub fn on_response(
        &mut self,
        cluster: u16,
        command_id: u16,
        source: BindTarget,
        success: bool,
        payload: ResponsePayload,
        own_ieee: u64,
        port: &mut impl ZigbeeCommandPort,
        alarms: &mut AlarmPool,
        scheduler: &mut impl SchedulerPort,
    ) {
        if source.short_addr == 0 || source.ieee_addr == own_ieee {
            return;
        }
        let Some(idx) = self.find_by_correlation(cluster, command_id) else { return };
        self.slots[idx].as_mut().unwrap().response_seen = true;
        if let Some(handle) = self.slots[idx].as_ref().unwrap().deadline_handle {
            alarms.cancel(scheduler, handle);
        }
        if success {
            self.finish(idx, Outcome::Success(payload));
        } else {
            self.fail_attempt(idx, port, alarms, scheduler);
        }
    }

    /// Call when `slot` (a value previously drained from
    /// [`crate::events::drain_command_deadlines`]) has expired without a
    /// response.
    pub fn on_deadline(
        &mut self,
        idx: usize,
        port: &mut impl ZigbeeCommandPort,
        alarms: &mut AlarmPool,
        scheduler: &mut impl SchedulerPort,
    ) {
        if self.slots[idx].is_none() {
            return;
        }
        self.fail_attempt(idx, port, alarms, scheduler);
    }

    /// Takes (and clears) the final outcome for `idx`, if one is ready.
    pub fn poll(&mut self, idx: usize) -> Option<Outcome> {
        let Some(slot) = self.slots[idx].as_ref() else { return None };
        if slot.outcome.is_some() {
            self.slots[idx].take().and_then(|s| s.outcome)
        } else {
            None
        }
    }

    fn fail_attempt(
        &mut self,
        idx: usize,
        port: &mut impl ZigbeeCommandPort,
        alarms: &mut AlarmPool,
        scheduler: &mut impl SchedulerPort,
    ) {
        self.retry_or_fail(idx, alarms, scheduler);
        if self.slots[idx].as_ref().is_some_and(|s| s.outcome.is_none()) {
            self.send_again(idx, port, alarms, scheduler);
        }
    }

    fn retry_or_fail(&mut self, idx: usize, alarms: &mut AlarmPool, scheduler: &mut impl SchedulerPort) {
        let slot = self.slots[idx].as_mut().unwrap();
        if let Some(handle) = slot.deadline_handle.take() {
            alarms.cancel(scheduler, handle);
        }
        if slot.retries_left == 0 {
            self.finish(idx, Outcome::TotalFailure);
        } else {
            slot.retries_left -= 1;
        }
    }

    fn finish(&mut self, idx: usize, outcome: Outcome) {
        if let Some(slot) = self.slots[idx].as_mut() {
            slot.outcome = Some(outcome);
        }
    }

    fn find_by_sequence(&self, sequence_number: u8) -> Option<usize> {
        self.slots.iter().position(|s| {
            s.as_ref().is_some_and(|s| s.sequence_number == Some(sequence_number) && s.outcome.is_none())
        })
    }

    fn find_by_correlation(&self, cluster: u16, command_id: u16) -> Option<usize> {
        self.slots.iter().position(|s| {
            s.as_ref().is_some_and(|s| s.kind.correlation_key() == (cluster, command_id) && s.outcome.is_none())
        })
    }
}

impl<const N: usize> Default for CommandEngine<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakePort {
        next_seq: u8,
        sends: Vec<CommandKind>,
        fail_dispatch: bool,
    }
    impl FakePort {
        fn new() -> Self {
            Self { next_seq: 1, sends: Vec::new(), fail_dispatch: false }
        }
        fn seq(&mut self) -> Result<u8, Error> {
            if self.fail_dispatch {
                return Err(Error::Init("dispatch failed"));
            }
            let s = self.next_seq;
            self.next_seq += 1;
            Ok(s)
        }
    }
    impl ZigbeeCommandPort for FakePort {
        fn send_on(&mut self, _t: BindTarget) -> Result<u8, Error> {
            self.sends.push(CommandKind::On);
            self.seq()
        }
        fn send_off(&mut self, _t: BindTarget) -> Result<u8, Error> {
            self.sends.push(CommandKind::Off);
            self.seq()
        }
        fn send_on_with_timed_off(&mut self, _t: BindTarget, on_time_ds: u16) -> Result<u8, Error> {
            self.sends.push(CommandKind::OnWithTimedOff { on_time_ds });
            self.seq()
        }
        fn send_mgmt_bind_req(&mut self, _t: BindTarget) -> Result<u8, Error> {
            self.sends.push(CommandKind::MgmtBindReq);
            self.seq()
        }
        fn send_bind_to_me(&mut self, _t: BindTarget) -> Result<u8, Error> {
            self.sends.push(CommandKind::BindToMe);
            self.seq()
        }
        fn send_read_reporting_config(&mut self, _t: BindTarget) -> Result<u8, Error> {
            self.sends.push(CommandKind::ReadReportingConfig);
            self.seq()
        }
        fn send_configure_report(&mut self, _t: BindTarget) -> Result<u8, Error> {
            self.sends.push(CommandKind::ConfigureReport);
            self.seq()
        }
        fn send_read_on_off_attribute(&mut self, _t: BindTarget) -> Result<u8, Error> {
            self.sends.push(CommandKind::ReadOnOffAttribute);
            self.seq()
        }
        fn send_unbind(&mut self, _t: BindTarget) -> Result<u8, Error> {
            self.sends.push(CommandKind::Unbind);
            self.seq()
        }
    }

    struct FakeScheduler;
    impl SchedulerPort for FakeScheduler {
        fn register_alarm(&mut self, _handle: u8, _delay_ms: u32) {}
        fn cancel_alarm(&mut self, _handle: u8) {}
        fn restart_device(&mut self) -> ! {
            panic!("restart not expected in test");
        }
    }

    fn target() -> BindTarget {
        BindTarget { ieee_addr: 0x1122_3344_5566_7788, short_addr: 0xBEEF, endpoint: 1 }
    }

    #[test]
    fn send_status_then_response_success() {
        let mut engine: CommandEngine<4> = CommandEngine::new();
        let mut port = FakePort::new();
        let mut alarms = AlarmPool::new();
        let mut sched = FakeScheduler;
        engine.send(0, target(), CommandKind::On, &mut port, &mut alarms, &mut sched).unwrap();
        engine.on_send_status(1, true, &mut port, &mut alarms, &mut sched);
        engine.on_response(0x0006, 0x01, target(), true, ResponsePayload::None, 0, &mut port, &mut alarms, &mut sched);
        assert_eq!(engine.poll(0), Some(Outcome::Success(ResponsePayload::None)));
    }

    #[test]
    fn already_in_flight_is_rejected() {
        let mut engine: CommandEngine<4> = CommandEngine::new();
        let mut port = FakePort::new();
        let mut alarms = AlarmPool::new();
        let mut sched = FakeScheduler;
        engine.send(0, target(), CommandKind::On, &mut port, &mut alarms, &mut sched).unwrap();
        assert_eq!(
            engine.send(0, target(), CommandKind::Off, &mut port, &mut alarms, &mut sched),
            Err(CommandError::AlreadyInFlight)
        );
    }

    #[test]
    fn retries_then_total_failure() {
        let mut engine: CommandEngine<4> = CommandEngine::new();
        let mut port = FakePort::new();
        let mut alarms = AlarmPool::new();
        let mut sched = FakeScheduler;
        engine.send(0, target(), CommandKind::On, &mut port, &mut alarms, &mut sched).unwrap();
        // fail DEFAULT_RETRIES + 1 times total.
        for _ in 0..=DEFAULT_RETRIES {
            let seq = port.sends.len() as u8; // last dispatched sequence
            engine.on_send_status(seq, false, &mut port, &mut alarms, &mut sched);
        }
        assert_eq!(engine.poll(0), Some(Outcome::TotalFailure));
        // Initial send plus DEFAULT_RETRIES retries, no dispatch after total failure.
        assert_eq!(port.sends.len() as u8, DEFAULT_RETRIES + 1);
    }

    #[test]
    fn response_failure_retries_then_total_failure() {
        let mut engine: CommandEngine<4> = CommandEngine::new();
        let mut port = FakePort::new();
        let mut alarms = AlarmPool::new();
        let mut sched = FakeScheduler;
        engine.send(0, target(), CommandKind::On, &mut port, &mut alarms, &mut sched).unwrap();
        for _ in 0..=DEFAULT_RETRIES {
            engine.on_response(0x0006, 0x01, target(), false, ResponsePayload::None, 0, &mut port, &mut alarms, &mut sched);
        }
        assert_eq!(engine.poll(0), Some(Outcome::TotalFailure));
        assert_eq!(port.sends.len() as u8, DEFAULT_RETRIES + 1);
    }

    #[test]
    fn coordinator_response_ignored() {
        let mut engine: CommandEngine<4> = CommandEngine::new();
        let mut port = FakePort::new();
        let mut alarms = AlarmPool::new();
        let mut sched = FakeScheduler;
        engine.send(0, target(), CommandKind::On, &mut port, &mut alarms, &mut sched).unwrap();
        let coordinator = BindTarget { ieee_addr: 0, short_addr: 0, endpoint: 1 };
        engine.on_response(0x0006, 0x01, coordinator, true, ResponsePayload::None, 0, &mut port, &mut alarms, &mut sched);
        assert_eq!(engine.poll(0), None, "coordinator response must not resolve the command");
    }

    #[test]
    fn late_send_status_after_response_is_ignored() {
        let mut engine: CommandEngine<4> = CommandEngine::new();
        let mut port = FakePort::new();
        let mut alarms = AlarmPool::new();
        let mut sched = FakeScheduler;
        engine.send(0, target(), CommandKind::On, &mut port, &mut alarms, &mut sched).unwrap();
        engine.on_response(0x0006, 0x01, target(), true, ResponsePayload::None, 0, &mut port, &mut alarms, &mut sched);
        // A stray late send-status failure must not retry a slot that's
        // already finished (and been taken by poll()).
        assert_eq!(engine.poll(0), Some(Outcome::Success(ResponsePayload::None)));
        engine.on_send_status(1, false, &mut port, &mut alarms, &mut sched);
        assert_eq!(port.sends.len(), 1);
    }
}
