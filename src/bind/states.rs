//! Bind lifecycle state table (C7).
//!
//! Grounded on `original_source/main/zb_binds.cpp`'s `BindInfo::Do()`
//! dispatch and its `OnBindRequestResult`/`OnGetBindTableChunk`/
//! `ReadAttrRespNode::Notify` families of response handlers, flattened here
//! into enter/update pairs driven by [`crate::command_engine::CommandEngine`]
//! instead of per-callback ZCL notification nodes.
//!
//! `CheckReportingAbility` and `TryReadAttribute` are fully implemented
//! here (the tri-state gate and the attribute read respectively) rather
//! than left as the unimplemented placeholder the original carried.

use crate::command_engine::{CommandEngine, CommandKind, Outcome};
use crate::config::{LocalConfig, TriState};
use crate::zigbee::ports::{ResponsePayload, SchedulerPort, ZigbeeCommandPort};

use super::context::BindRecord;

pub const MAX_CONFIG_ATTEMPTS: u8 = super::context::MAX_CONFIG_ATTEMPTS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BindStateId {
    New = 0,
    VerifyBinds = 1,
    SendBindToMeReq = 2,
    CheckReportingAbility = 3,
    CheckConfigureReport = 4,
    SendConfigureReport = 5,
    TryReadAttribute = 6,
    NonFunctional = 7,
    Functional = 8,
    Unbind = 9,
}

impl BindStateId {
    pub const COUNT: usize = 10;

    pub fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::New,
            1 => Self::VerifyBinds,
            2 => Self::SendBindToMeReq,
            3 => Self::CheckReportingAbility,
            4 => Self::CheckConfigureReport,
            5 => Self::SendConfigureReport,
            6 => Self::TryReadAttribute,
            7 => Self::NonFunctional,
            8 => Self::Functional,
            _ => Self::Unbind,
        }
    }
}

/// Everything a state handler needs beyond the record itself, bundled so
/// the function-pointer signatures stay manageable. Built fresh by the
/// caller on every call — never stored.
pub struct BindEnv<'a, const N: usize> {
    pub engine: &'a mut CommandEngine<N>,
    pub commands: &'a mut dyn ZigbeeCommandPort,
    pub alarms: &'a mut crate::alarm::AlarmPool,
    pub scheduler: &'a mut dyn SchedulerPort,
    pub config: &'a mut LocalConfig,
    pub own_ieee: u64,
}

pub type StateEnterFn<const N: usize> = fn(&mut BindRecord, usize, &mut BindEnv<'_, N>);
pub type StateUpdateFn<const N: usize> = fn(&mut BindRecord, usize, &mut BindEnv<'_, N>) -> Option<BindStateId>;

pub struct StateDescriptor<const N: usize> {
    pub id: BindStateId,
    pub name: &'static str,
    pub on_enter: Option<StateEnterFn<N>>,
    pub on_update: StateUpdateFn<N>,
}

fn send<const N: usize>(
    record: &mut BindRecord,
    slot: usize,
    env: &mut BindEnv<'_, N>,
    kind: CommandKind,
) {
    let target = record.target();
    // A slot that is somehow already in flight (shouldn't happen — each
    // slot is owned by exactly one bind record) is left alone; the next
    // tick's poll will simply keep waiting.
    let _ = env.engine.send(slot, target, kind, env.commands, env.alarms, env.scheduler);
}

/// Applies the persisted tri-state, then (when a check actually ran)
/// writes the new verdict back — mirrors spec §4.7's "Reporting-capability
/// tri-state is persisted per bind index" rule.
fn persist_reporting_capability<const N: usize>(record: &mut BindRecord, slot: usize, env: &mut BindEnv<'_, N>, value: TriState) {
    if record.check_reporting_requested {
        env.config.bind_reporting_capability[slot] = value;
        record.check_reporting_requested = false;
    }
}

fn on_update_new<const N: usize>(_r: &mut BindRecord, _slot: usize, _env: &mut BindEnv<'_, N>) -> Option<BindStateId> {
    Some(BindStateId::VerifyBinds)
}

fn on_enter_verify_binds<const N: usize>(r: &mut BindRecord, slot: usize, env: &mut BindEnv<'_, N>) {
    r.reset_attempts();
    send(r, slot, env, CommandKind::MgmtBindReq);
}

fn on_update_verify_binds<const N: usize>(r: &mut BindRecord, slot: usize, env: &mut BindEnv<'_, N>) -> Option<BindStateId> {
    match env.engine.poll(slot)? {
        Outcome::Success(ResponsePayload::Bool(found_in_table)) => {
            r.bind_checked = true;
            r.bound_to_me = found_in_table;
            Some(if found_in_table { BindStateId::CheckReportingAbility } else { BindStateId::SendBindToMeReq })
        }
        Outcome::Success(ResponsePayload::None) => Some(BindStateId::SendBindToMeReq),
        Outcome::TotalFailure => retry_or_fail(r, slot, env, CommandKind::MgmtBindReq),
    }
}

fn on_enter_send_bind_to_me<const N: usize>(r: &mut BindRecord, slot: usize, env: &mut BindEnv<'_, N>) {
    send(r, slot, env, CommandKind::BindToMe);
}

fn on_update_send_bind_to_me<const N: usize>(r: &mut BindRecord, slot: usize, env: &mut BindEnv<'_, N>) -> Option<BindStateId> {
    match env.engine.poll(slot)? {
        Outcome::Success(_) => {
            r.bound_to_me = true;
            Some(BindStateId::CheckReportingAbility)
        }
        Outcome::TotalFailure => retry_or_fail(r, slot, env, CommandKind::BindToMe),
    }
}

/// Pure gate: decided the same tick it is entered, no outbound command.
fn on_update_check_reporting_ability<const N: usize>(r: &mut BindRecord, slot: usize, env: &mut BindEnv<'_, N>) -> Option<BindStateId> {
    match env.config.bind_reporting_capability[slot] {
        TriState::True => Some(BindStateId::TryReadAttribute),
        TriState::False => Some(BindStateId::NonFunctional),
        TriState::Undefined => {
            r.check_reporting_requested = true;
            Some(BindStateId::CheckConfigureReport)
        }
    }
}

fn on_enter_check_configure_report<const N: usize>(r: &mut BindRecord, slot: usize, env: &mut BindEnv<'_, N>) {
    send(r, slot, env, CommandKind::ReadReportingConfig);
}

fn on_update_check_configure_report<const N: usize>(r: &mut BindRecord, slot: usize, env: &mut BindEnv<'_, N>) -> Option<BindStateId> {
    match env.engine.poll(slot)? {
        Outcome::Success(ResponsePayload::Bool(configured)) => {
            r.report_configured = configured;
            Some(if configured { BindStateId::TryReadAttribute } else { BindStateId::SendConfigureReport })
        }
        Outcome::Success(ResponsePayload::None) => Some(BindStateId::SendConfigureReport),
        Outcome::TotalFailure => retry_or_fail(r, slot, env, CommandKind::ReadReportingConfig),
    }
}

fn on_enter_send_configure_report<const N: usize>(r: &mut BindRecord, slot: usize, env: &mut BindEnv<'_, N>) {
    send(r, slot, env, CommandKind::ConfigureReport);
}

fn on_update_send_configure_report<const N: usize>(r: &mut BindRecord, slot: usize, env: &mut BindEnv<'_, N>) -> Option<BindStateId> {
    match env.engine.poll(slot)? {
        Outcome::Success(_) => {
            r.report_configured = true;
            Some(BindStateId::TryReadAttribute)
        }
        Outcome::TotalFailure => {
            persist_reporting_capability(r, slot, env, TriState::False);
            Some(BindStateId::NonFunctional)
        }
    }
}

fn on_enter_try_read_attribute<const N: usize>(r: &mut BindRecord, slot: usize, env: &mut BindEnv<'_, N>) {
    send(r, slot, env, CommandKind::ReadOnOffAttribute);
}

fn on_update_try_read_attribute<const N: usize>(r: &mut BindRecord, slot: usize, env: &mut BindEnv<'_, N>) -> Option<BindStateId> {
    match env.engine.poll(slot)? {
        Outcome::Success(ResponsePayload::Bool(value)) => {
            r.initial = false;
            r.initial_value = value;
            persist_reporting_capability(r, slot, env, TriState::True);
            Some(BindStateId::Functional)
        }
        Outcome::Success(ResponsePayload::None) => {
            persist_reporting_capability(r, slot, env, TriState::False);
            Some(BindStateId::NonFunctional)
        }
        Outcome::TotalFailure => {
            persist_reporting_capability(r, slot, env, TriState::False);
            Some(BindStateId::NonFunctional)
        }
    }
}

fn on_update_terminal<const N: usize>(_r: &mut BindRecord, _slot: usize, _env: &mut BindEnv<'_, N>) -> Option<BindStateId> {
    None
}

fn on_enter_unbind<const N: usize>(r: &mut BindRecord, slot: usize, env: &mut BindEnv<'_, N>) {
    r.reset_attempts();
    send(r, slot, env, CommandKind::Unbind);
}

fn on_update_unbind<const N: usize>(r: &mut BindRecord, slot: usize, env: &mut BindEnv<'_, N>) -> Option<BindStateId> {
    // Both outcomes converge on NonFunctional — spec §4.7: "Send Unbind →
    // NonFunctional, queued for cleanup", regardless of whether the remote
    // actually acknowledged it.
    env.engine.poll(slot)?;
    r.report_configured = false;
    r.bound_to_me = false;
    Some(BindStateId::NonFunctional)
}

/// Handles a `TotalFailure` from the command engine: re-issues `kind` while
/// the bind's own outer attempts budget (separate from the engine's inner
/// retry budget) allows it, otherwise falls back to `NonFunctional`.
/// Returns `None` while retrying (caller stays in the same state) or
/// `Some(NonFunctional)` once the budget is exhausted.
fn retry_or_fail<const N: usize>(r: &mut BindRecord, slot: usize, env: &mut BindEnv<'_, N>, kind: CommandKind) -> Option<BindStateId> {
    if r.consume_attempt() {
        send(r, slot, env, kind);
        None
    } else {
        persist_reporting_capability(r, slot, env, TriState::False);
        Some(BindStateId::NonFunctional)
    }
}

pub fn build_state_table<const N: usize>() -> [StateDescriptor<N>; BindStateId::COUNT] {
    [
        StateDescriptor { id: BindStateId::New, name: "New", on_enter: None, on_update: on_update_new },
        StateDescriptor {
            id: BindStateId::VerifyBinds,
            name: "VerifyBinds",
            on_enter: Some(on_enter_verify_binds),
            on_update: on_update_verify_binds,
        },
        StateDescriptor {
            id: BindStateId::SendBindToMeReq,
            name: "SendBindToMeReq",
            on_enter: Some(on_enter_send_bind_to_me),
            on_update: on_update_send_bind_to_me,
        },
        StateDescriptor {
            id: BindStateId::CheckReportingAbility,
            name: "CheckReportingAbility",
            on_enter: None,
            on_update: on_update_check_reporting_ability,
        },
        StateDescriptor {
            id: BindStateId::CheckConfigureReport,
            name: "CheckConfigureReport",
            on_enter: Some(on_enter_check_configure_report),
            on_update: on_update_check_configure_report,
        },
        StateDescriptor {
            id: BindStateId::SendConfigureReport,
            name: "SendConfigureReport",
            on_enter: Some(on_enter_send_configure_report),
            on_update: on_update_send_configure_report,
        },
        StateDescriptor {
            id: BindStateId::TryReadAttribute,
            name: "TryReadAttribute",
            on_enter: Some(on_enter_try_read_attribute),
            on_update: on_update_try_read_attribute,
        },
        StateDescriptor { id: BindStateId::NonFunctional, name: "NonFunctional", on_enter: None, on_update: on_update_terminal },
        StateDescriptor { id: BindStateId::Functional, name: "Functional", on_enter: None, on_update: on_update_terminal },
        StateDescriptor { id: BindStateId::Unbind, name: "Unbind", on_enter: Some(on_enter_unbind), on_update: on_update_unbind },
    ]
}
