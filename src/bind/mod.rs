//! Bind lifecycle engine (C7).
//!
//! Adapts the function-pointer state-table pattern used elsewhere in this
//! firmware to the bind lifecycle. Every record shares the same transition
//! table ([`states::build_state_table`]); what differs per bind is just the
//! [`context::BindRecord`] data and the [`states::BindStateId`] stored
//! alongside it in [`pool::BindPool`]. `tick()` is therefore a stateless
//! driver rather than an owned engine instance per bind.

pub mod context;
pub mod pool;
pub mod states;

use context::BindRecord;
use log::info;
use states::BindStateId;

pub use states::BindEnv;

/// Upper bound on same-tick chained transitions (a state deciding its next
/// step without sending a command, like `New` or `CheckReportingAbility`)
/// before bailing out — guards against an accidental transition cycle.
const MAX_CHAIN_PER_TICK: usize = BindStateId::COUNT;

/// Advances one bind record by one tick: runs the current state's
/// `on_update`, and on a transition runs the new state's `on_enter`,
/// looping inline for states that decide their next step without an
/// outbound command — mirrors `BindInfo::Do()`'s recursive self-calls in
/// the original.
pub fn tick<const N: usize>(record: &mut BindRecord, state: &mut BindStateId, slot: usize, env: &mut BindEnv<'_, N>) {
    let table = states::build_state_table::<N>();
    for _ in 0..MAX_CHAIN_PER_TICK {
        let row = &table[*state as usize];
        let Some(next) = (row.on_update)(record, slot, env) else { break };
        if next == *state {
            break;
        }
        info!("bind[{slot}] {} -> {}", row.name, table[next as usize].name);
        *state = next;
        if let Some(enter) = table[next as usize].on_enter {
            enter(record, slot, env);
        }
    }
}

/// Starts a freshly-inserted record (always in `BindStateId::New`), driving
/// it straight into `VerifyBinds` and issuing its first outbound command.
pub fn start<const N: usize>(record: &mut BindRecord, state: &mut BindStateId, slot: usize, env: &mut BindEnv<'_, N>) {
    debug_assert_eq!(*state, BindStateId::New);
    tick(record, state, slot, env);
}

/// External re-check request: an attribute write, an explicit command, or
/// an APSDE.indication observing a Bind/Unbind on our On/Off cluster all
/// drive a live record back through `VerifyBinds` (spec §4.7, "passive
/// records transition via VerifyBinds").
pub fn request_recheck<const N: usize>(record: &mut BindRecord, state: &mut BindStateId, slot: usize, env: &mut BindEnv<'_, N>) {
    enter_state(record, state, slot, env, BindStateId::VerifyBinds);
}

/// User-requested (or disappearance-triggered) unbind.
pub fn request_unbind<const N: usize>(record: &mut BindRecord, state: &mut BindStateId, slot: usize, env: &mut BindEnv<'_, N>) {
    enter_state(record, state, slot, env, BindStateId::Unbind);
}

fn enter_state<const N: usize>(record: &mut BindRecord, state: &mut BindStateId, slot: usize, env: &mut BindEnv<'_, N>, next: BindStateId) {
    *state = next;
    let table = states::build_state_table::<N>();
    if let Some(enter) = table[next as usize].on_enter {
        enter(record, slot, env);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_engine::CommandEngine;
    use crate::config::{LocalConfig, TriState};
    use crate::error::Error;
    use crate::zigbee::ports::{BindTarget, ResponsePayload, SchedulerPort, ZigbeeCommandPort};

    #[derive(Default)]
    struct FakePort {
        next_seq: u8,
        last_kind: Option<&'static str>,
    }
    impl FakePort {
        fn seq(&mut self, kind: &'static str) -> Result<u8, Error> {
            self.last_kind = Some(kind);
            self.next_seq += 1;
            Ok(self.next_seq)
        }
    }
    impl ZigbeeCommandPort for FakePort {
        fn send_on(&mut self, _t: BindTarget) -> Result<u8, Error> {
            self.seq("on")
        }
        fn send_off(&mut self, _t: BindTarget) -> Result<u8, Error> {
            self.seq("off")
        }
        fn send_on_with_timed_off(&mut self, _t: BindTarget, _d: u16) -> Result<u8, Error> {
            self.seq("timed_off")
        }
        fn send_mgmt_bind_req(&mut self, _t: BindTarget) -> Result<u8, Error> {
            self.seq("mgmt_bind_req")
        }
        fn send_bind_to_me(&mut self, _t: BindTarget) -> Result<u8, Error> {
            self.seq("bind_to_me")
        }
        fn send_read_reporting_config(&mut self, _t: BindTarget) -> Result<u8, Error> {
            self.seq("read_reporting_config")
        }
        fn send_configure_report(&mut self, _t: BindTarget) -> Result<u8, Error> {
            self.seq("configure_report")
        }
        fn send_read_on_off_attribute(&mut self, _t: BindTarget) -> Result<u8, Error> {
            self.seq("read_on_off_attribute")
        }
        fn send_unbind(&mut self, _t: BindTarget) -> Result<u8, Error> {
            self.seq("unbind")
        }
    }

    struct FakeScheduler;
    impl SchedulerPort for FakeScheduler {
        fn register_alarm(&mut self, _h: u8, _d: u32) {}
        fn cancel_alarm(&mut self, _h: u8) {}
        fn restart_device(&mut self) -> ! {
            panic!("not expected");
        }
    }

    fn respond(
        engine: &mut CommandEngine<4>,
        cluster: u16,
        command_id: u16,
        payload: ResponsePayload,
        port: &mut FakePort,
        alarms: &mut crate::alarm::AlarmPool,
        sched: &mut FakeScheduler,
    ) {
        let target = BindTarget { ieee_addr: 0xAABB, short_addr: 0x1234, endpoint: 1 };
        engine.on_response(cluster, command_id, target, true, payload, 0, port, alarms, sched);
    }

    #[test]
    fn new_bind_reaches_functional_when_not_already_in_remote_table() {
        let mut record = BindRecord::new(0xAABB, 0x1234, 1);
        let mut state = BindStateId::New;
        let mut engine: CommandEngine<4> = CommandEngine::new();
        let mut port = FakePort::default();
        let mut alarms = crate::alarm::AlarmPool::new();
        let mut sched = FakeScheduler;
        let mut config = LocalConfig::default();

        {
            let mut env = BindEnv { engine: &mut engine, commands: &mut port, alarms: &mut alarms, scheduler: &mut sched, config: &mut config, own_ieee: 0 };
            start(&mut record, &mut state, 0, &mut env);
        }
        assert_eq!(state, BindStateId::VerifyBinds);

        // Remote's own binding table does not list us.
        respond(&mut engine, 0x8000, 0x33, ResponsePayload::Bool(false), &mut port, &mut alarms, &mut sched);
        {
            let mut env = BindEnv { engine: &mut engine, commands: &mut port, alarms: &mut alarms, scheduler: &mut sched, config: &mut config, own_ieee: 0 };
            tick(&mut record, &mut state, 0, &mut env);
        }
        assert_eq!(state, BindStateId::SendBindToMeReq);

        respond(&mut engine, 0x8000, 0x21, ResponsePayload::None, &mut port, &mut alarms, &mut sched);
        {
            let mut env = BindEnv { engine: &mut engine, commands: &mut port, alarms: &mut alarms, scheduler: &mut sched, config: &mut config, own_ieee: 0 };
            tick(&mut record, &mut state, 0, &mut env);
        }
        // CheckReportingAbility (Undefined) chains straight to
        // CheckConfigureReport and issues ReadReportingConfig.
        assert_eq!(state, BindStateId::CheckConfigureReport);

        respond(&mut engine, 0x0006, 0x09, ResponsePayload::Bool(false), &mut port, &mut alarms, &mut sched);
        {
            let mut env = BindEnv { engine: &mut engine, commands: &mut port, alarms: &mut alarms, scheduler: &mut sched, config: &mut config, own_ieee: 0 };
            tick(&mut record, &mut state, 0, &mut env);
        }
        assert_eq!(state, BindStateId::SendConfigureReport);

        respond(&mut engine, 0x0006, 0x06, ResponsePayload::None, &mut port, &mut alarms, &mut sched);
        {
            let mut env = BindEnv { engine: &mut engine, commands: &mut port, alarms: &mut alarms, scheduler: &mut sched, config: &mut config, own_ieee: 0 };
            tick(&mut record, &mut state, 0, &mut env);
        }
        assert_eq!(state, BindStateId::TryReadAttribute);

        respond(&mut engine, 0x0006, 0x0c, ResponsePayload::Bool(true), &mut port, &mut alarms, &mut sched);
        {
            let mut env = BindEnv { engine: &mut engine, commands: &mut port, alarms: &mut alarms, scheduler: &mut sched, config: &mut config, own_ieee: 0 };
            tick(&mut record, &mut state, 0, &mut env);
        }
        assert_eq!(state, BindStateId::Functional);
        assert!(!record.initial);
        assert!(record.initial_value);
        assert_eq!(config.bind_reporting_capability[0], TriState::True);
    }

    #[test]
    fn already_in_remote_table_skips_bind_to_me_req() {
        let mut record = BindRecord::new(0xAABB, 0x1234, 1);
        let mut state = BindStateId::New;
        let mut engine: CommandEngine<4> = CommandEngine::new();
        let mut port = FakePort::default();
        let mut alarms = crate::alarm::AlarmPool::new();
        let mut sched = FakeScheduler;
        let mut config = LocalConfig::default();
        config.bind_reporting_capability[0] = TriState::True;

        {
            let mut env = BindEnv { engine: &mut engine, commands: &mut port, alarms: &mut alarms, scheduler: &mut sched, config: &mut config, own_ieee: 0 };
            start(&mut record, &mut state, 0, &mut env);
        }
        respond(&mut engine, 0x8000, 0x33, ResponsePayload::Bool(true), &mut port, &mut alarms, &mut sched);
        {
            let mut env = BindEnv { engine: &mut engine, commands: &mut port, alarms: &mut alarms, scheduler: &mut sched, config: &mut config, own_ieee: 0 };
            tick(&mut record, &mut state, 0, &mut env);
        }
        // CheckReportingAbility sees a persisted True and skips straight to
        // TryReadAttribute, issuing the read-attribute command directly.
        assert_eq!(state, BindStateId::TryReadAttribute);
    }

    #[test]
    fn unbind_always_lands_on_non_functional() {
        let mut record = BindRecord::new(0xAABB, 0x1234, 1);
        let mut state = BindStateId::Functional;
        let mut engine: CommandEngine<4> = CommandEngine::new();
        let mut port = FakePort::default();
        let mut alarms = crate::alarm::AlarmPool::new();
        let mut sched = FakeScheduler;
        let mut config = LocalConfig::default();

        {
            let mut env = BindEnv { engine: &mut engine, commands: &mut port, alarms: &mut alarms, scheduler: &mut sched, config: &mut config, own_ieee: 0 };
            request_unbind(&mut record, &mut state, 0, &mut env);
        }
        assert_eq!(state, BindStateId::Unbind);

        respond(&mut engine, 0x8000, 0x22, ResponsePayload::None, &mut port, &mut alarms, &mut sched);
        {
            let mut env = BindEnv { engine: &mut engine, commands: &mut port, alarms: &mut alarms, scheduler: &mut sched, config: &mut config, own_ieee: 0 };
            tick(&mut record, &mut state, 0, &mut env);
        }
        assert_eq!(state, BindStateId::NonFunctional);
        assert!(!record.bound_to_me);
    }
}
