//! Runtime service loop (C8).
//!
//! Owns every domain-core subsystem and is the one place `main.rs` calls
//! into: `handle_zigbee_event` for anything the Zigbee stack thread hands
//! us, and `tick` once a second for the seven-step reconciliation pass
//! (spec §4.8). A single struct holding the pure domain state, with one
//! method per external stimulus so the binary crate stays a thin dispatch
//! loop.

use log::info;

use crate::alarm::AlarmPool;
use crate::bind::pool::{BindPool, POOL_SIZE};
use crate::bind::states::BindStateId;
use crate::bind::{self, BindEnv};
use crate::command_engine::{CommandEngine, Outcome};
use crate::config::{LocalConfig, OnOffMode, PresenceDetectionConfig};
use crate::ld2412::protocol::{PresenceSample, SystemMode};
use crate::presence::{context::Env as PresenceEnv, PresenceContext};
use crate::zigbee::ports::{
    AttributeWrite, ConfigPort, ExternalOnOffCommand, SchedulerPort, ZigbeeAttributePort,
    ZigbeeCommandPort, ZigbeeInboundEvent,
};

/// Delay between observing a bind/unbind on the APS layer and re-verifying
/// every live bind's standing in the remote binding table (spec §4.8 step e).
const BIND_RESCAN_DELAY_MS: u32 = 2_000;

/// One [`CommandEngine`] slot per bind-pool slot — a bind's
/// [`crate::bind::pool::BindHandle::index`] doubles as its command-engine
/// slot, since only one outgoing command per bind may be in flight
/// regardless of whether presence fusion (C5) or the bind lifecycle (C7)
/// issued it.
pub type Commands = CommandEngine<POOL_SIZE>;

/// User-visible events worth surfacing through [`crate::zigbee::ports::EventSink`].
/// Kept deliberately coarse — the bind lifecycle and command engine already
/// log their own step-by-step detail; this is the handful of events an
/// operator watching the sink would actually want to see.
#[derive(Debug, Clone, Copy)]
pub enum Notification {
    /// A bind reached `Functional` or fell back to `NonFunctional`.
    BindState { slot: usize, state: BindStateId },
    /// An outgoing command exhausted its retry budget.
    CommandFailed { slot: usize },
    /// Fused occupancy changed.
    Occupancy(bool),
    /// The persisted config was (re)written to storage.
    ConfigSaved,
    ConfigSaveFailed,
    /// The alarm pool's restart guard fired; a restart is imminent.
    RestartGuardTripped,
}

/// A config change the service loop cannot apply itself because the
/// affected subsystem — the LD2412 manager task — is not reachable from
/// here (spec §5: "LD2412 channel owned exclusively by the manager
/// thread"). The caller forwards it as a `ManagerMsg` on the next manager
/// queue push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadarConfigChange {
    SystemMode(SystemMode),
}

/// Snapshot of the compacted per-bind attributes pushed in step (d). Kept as
/// a plain tuple of bitmaps rather than a single integer: `internals` tracks
/// which slots are `Functional`, `internals2` which are actively
/// `bound_to_me`, `internals3` which are waiting on cleanup having failed or
/// been unbound. `failure_status` is the live count of that last group —
/// the nearest thing this firmware has to a single "something needs
/// attention" scalar for the custom cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct AttributeSnapshot {
    internals: u32,
    internals2: u32,
    internals3: u32,
    failure_status: u16,
    restarts_count: u16,
    armed: bool,
    light: Option<u8>,
}

pub struct Service {
    pub alarms: AlarmPool,
    pub binds: BindPool,
    pub engine: Commands,
    pub presence: PresenceContext,
    pub config: LocalConfig,
    own_ieee: u64,
    last_saved_reporting: [crate::config::TriState; crate::config::MAX_BINDS],
    last_attrs: AttributeSnapshot,
    last_fused: bool,
    last_pir: bool,
    bind_rescan_handle: Option<u8>,
}

impl Service {
    pub fn new(config: LocalConfig, own_ieee: u64) -> Self {
        let last_saved_reporting = config.bind_reporting_capability;
        Self {
            alarms: AlarmPool::new(),
            binds: BindPool::new(),
            engine: CommandEngine::new(),
            presence: PresenceContext::new(),
            config,
            own_ieee,
            last_saved_reporting,
            last_attrs: AttributeSnapshot::default(),
            last_fused: false,
            last_pir: false,
            bind_rescan_handle: None,
        }
    }

    // -----------------------------------------------------------------
    // Bind lifecycle entry points
    // -----------------------------------------------------------------

    /// Allocates a bind record for a freshly-discovered actuator endpoint
    /// and drives it into `VerifyBinds` (spec §4.7).
    pub fn start_bind(
        &mut self,
        ieee_addr: u64,
        short_addr: u16,
        endpoint: u8,
        commands: &mut impl ZigbeeCommandPort,
        scheduler: &mut impl SchedulerPort,
    ) -> Result<(), crate::error::Error> {
        let handle = self.binds.insert(ieee_addr, short_addr, endpoint)?;
        let (record, state) = self.binds.get_mut(handle).expect("just inserted");
        let mut env = BindEnv {
            engine: &mut self.engine,
            commands,
            alarms: &mut self.alarms,
            scheduler,
            config: &mut self.config,
            own_ieee: self.own_ieee,
        };
        bind::start(record, state, handle.index(), &mut env);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Presence stimuli — each mirrors fusion, then reports occupancy/PIR
    // through the attribute port if the composite state actually moved.
    // -----------------------------------------------------------------

    pub fn on_mm_sample(
        &mut self,
        sample: PresenceSample,
        commands: &mut impl ZigbeeCommandPort,
        scheduler: &mut impl SchedulerPort,
        attrs: &mut impl ZigbeeAttributePort,
    ) {
        let mut env = PresenceEnv { binds: &self.binds, engine: &mut self.engine, commands, alarms: &mut self.alarms, scheduler, config: &self.config };
        self.presence.on_mm_sample(sample, &mut env);
        self.report_presence_changes(attrs);
    }

    pub fn on_radar_presence_intr(
        &mut self,
        present: bool,
        commands: &mut impl ZigbeeCommandPort,
        scheduler: &mut impl SchedulerPort,
        attrs: &mut impl ZigbeeAttributePort,
    ) {
        let mut env = PresenceEnv { binds: &self.binds, engine: &mut self.engine, commands, alarms: &mut self.alarms, scheduler, config: &self.config };
        self.presence.on_radar_presence_intr(present, &mut env);
        self.report_presence_changes(attrs);
    }

    pub fn on_pir_presence_intr(
        &mut self,
        present: bool,
        commands: &mut impl ZigbeeCommandPort,
        scheduler: &mut impl SchedulerPort,
        attrs: &mut impl ZigbeeAttributePort,
    ) {
        let mut env = PresenceEnv { binds: &self.binds, engine: &mut self.engine, commands, alarms: &mut self.alarms, scheduler, config: &self.config };
        self.presence.on_pir_presence_intr(present, &mut env);
        self.report_presence_changes(attrs);
    }

    fn report_presence_changes(&mut self, attrs: &mut impl ZigbeeAttributePort) {
        let fused = self.presence.fused();
        if fused != self.last_fused {
            self.last_fused = fused;
            attrs.report_occupancy(fused);
        }
        let pir = self.presence.pir_present();
        if pir != self.last_pir {
            self.last_pir = pir;
            attrs.report_pir_presence(pir);
        }
    }

    // -----------------------------------------------------------------
    // Zigbee inbound events — the manager/fast-queue-style channel spec §5
    // describes for the reset-button thread, applied here to every
    // callback the Zigbee stack thread can deliver.
    // -----------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn handle_zigbee_event(
        &mut self,
        event: ZigbeeInboundEvent,
        commands: &mut impl ZigbeeCommandPort,
        scheduler: &mut impl SchedulerPort,
        attrs: &mut impl ZigbeeAttributePort,
        config_port: &mut impl ConfigPort,
    ) -> Option<RadarConfigChange> {
        match event {
            ZigbeeInboundEvent::SendStatus { sequence_number, success } => {
                self.engine.on_send_status(sequence_number, success, commands, &mut self.alarms, scheduler);
                None
            }
            ZigbeeInboundEvent::Response { cluster, command_id, source, success, payload } => {
                self.engine.on_response(cluster, command_id, source, success, payload, self.own_ieee, commands, &mut self.alarms, scheduler);
                None
            }
            ZigbeeInboundEvent::ApsBindChange => {
                self.bind_rescan_handle = self
                    .alarms
                    .setup(scheduler, self.bind_rescan_handle, crate::events::request_bind_rescan, 0, BIND_RESCAN_DELAY_MS)
                    .ok();
                None
            }
            ZigbeeInboundEvent::ExternalOnOff(cmd) => {
                let on = !matches!(cmd, ExternalOnOffCommand::Off);
                let mut env = PresenceEnv { binds: &self.binds, engine: &mut self.engine, commands, alarms: &mut self.alarms, scheduler, config: &self.config };
                self.presence.on_external_on_off(on, &mut env);
                self.report_presence_changes(attrs);
                None
            }
            ZigbeeInboundEvent::AttributeWrite(write) => {
                self.handle_attribute_write(write, commands, scheduler, attrs, config_port)
            }
            ZigbeeInboundEvent::IasZoneStatusChanged { bit0_alarm } => {
                let mut env = PresenceEnv { binds: &self.binds, engine: &mut self.engine, commands, alarms: &mut self.alarms, scheduler, config: &self.config };
                self.presence.on_ias_zone_status(bit0_alarm, &mut env);
                self.report_presence_changes(attrs);
                None
            }
            ZigbeeInboundEvent::BoundDeviceOnOffReport { source, on } => {
                if let Some(handle) = self.binds.find_by_ieee(source.ieee_addr) {
                    let mut env = PresenceEnv { binds: &self.binds, engine: &mut self.engine, commands, alarms: &mut self.alarms, scheduler, config: &self.config };
                    self.presence.on_bound_device_on_off(handle.index(), on, &mut env);
                    self.report_presence_changes(attrs);
                }
                None
            }
            ZigbeeInboundEvent::IlluminanceReport { raw } => {
                self.presence.note_external_illuminance(raw);
                None
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_attribute_write(
        &mut self,
        write: AttributeWrite,
        commands: &mut impl ZigbeeCommandPort,
        scheduler: &mut impl SchedulerPort,
        attrs: &mut impl ZigbeeAttributePort,
        config_port: &mut impl ConfigPort,
    ) -> Option<RadarConfigChange> {
        match write {
            AttributeWrite::OnOffTimeoutSecs(v) => {
                self.config.on_off_timeout_secs = v;
                self.save_config(config_port);
                None
            }
            AttributeWrite::ExternalOnOffTimeoutSecs(v) => {
                self.config.external_on_off_timeout_secs = v;
                self.save_config(config_port);
                None
            }
            AttributeWrite::OnOffMode(v) => {
                self.config.on_off_mode = decode_on_off_mode(v);
                self.save_config(config_port);
                None
            }
            AttributeWrite::PresenceDetectionConfig(v) => {
                self.config.presence_detection = PresenceDetectionConfig::from_bits(v);
                self.save_config(config_port);
                None
            }
            AttributeWrite::IlluminanceThreshold(v) => {
                self.config.illuminance_threshold = v;
                self.save_config(config_port);
                None
            }
            AttributeWrite::RadarMode(v) => {
                let change = SystemMode::from_wire(v).map(|mode| {
                    self.config.radar_mode = mode;
                    RadarConfigChange::SystemMode(mode)
                });
                if change.is_some() {
                    self.save_config(config_port);
                }
                change
            }
            AttributeWrite::ExternalPresence(present) => {
                let mut env = PresenceEnv { binds: &self.binds, engine: &mut self.engine, commands, alarms: &mut self.alarms, scheduler, config: &self.config };
                self.presence.on_attribute_write_external_presence(present, &mut env);
                self.report_presence_changes(attrs);
                None
            }
        }
    }

    /// Writes `self.config` to storage synchronously, per spec §3's local-config
    /// lifecycle ("written synchronously on every setter") — mirrors the
    /// original's `on_change()` callback fired after every `LocalConfig::Set*`.
    fn save_config(&mut self, config_port: &mut impl ConfigPort) {
        match config_port.save(&self.config) {
            Ok(()) => {
                self.last_saved_reporting = self.config.bind_reporting_capability;
            }
            Err(_) => log::warn!("service: failed to persist config after attribute write"),
        }
    }

    /// Called when a deadline previously drained from
    /// [`crate::events::drain_command_deadlines`] expires.
    pub fn on_command_deadline(&mut self, slot: u8, commands: &mut impl ZigbeeCommandPort, scheduler: &mut impl SchedulerPort) {
        self.engine.on_deadline(slot as usize, commands, &mut self.alarms, scheduler);
    }

    /// Called when a presence re-arm timer (drained from
    /// [`crate::events::drain_presence_timers`]) fires.
    pub fn on_presence_timer(
        &mut self,
        kind: crate::events::PresenceTimerKind,
        commands: &mut impl ZigbeeCommandPort,
        scheduler: &mut impl SchedulerPort,
        attrs: &mut impl ZigbeeAttributePort,
    ) {
        let mut env = PresenceEnv { binds: &self.binds, engine: &mut self.engine, commands, alarms: &mut self.alarms, scheduler, config: &self.config };
        match kind {
            crate::events::PresenceTimerKind::Local => self.presence.on_local_timer_fired(&mut env),
            crate::events::PresenceTimerKind::External => self.presence.on_external_timer_fired(&mut env),
        }
        self.report_presence_changes(attrs);
    }

    /// Polls every bind slot for a resolved outcome and drives its state
    /// machine's next tick. Call once per manager/fast cadence alongside
    /// draining the inbound event queues — a response or send-status landing
    /// doesn't itself advance a bind past what the state machine already
    /// decided on entry, but a freshly-resolved command does.
    pub fn poll_binds(&mut self, commands: &mut impl ZigbeeCommandPort, scheduler: &mut impl SchedulerPort, sink: &mut impl crate::zigbee::ports::EventSink) {
        let live: heapless::Vec<(crate::bind::pool::BindHandle, BindStateId), POOL_SIZE> =
            self.binds.iter().map(|(h, _, s)| (h, s)).collect();
        for (handle, prev_state) in live {
            let Some((record, state)) = self.binds.get_mut(handle) else { continue };
            let mut env = BindEnv {
                engine: &mut self.engine,
                commands: &mut *commands,
                alarms: &mut self.alarms,
                scheduler: &mut *scheduler,
                config: &mut self.config,
                own_ieee: self.own_ieee,
            };
            bind::tick(record, state, handle.index(), &mut env);
            let new_state = *state;
            if new_state != prev_state {
                sink.emit(&Notification::BindState { slot: handle.index(), state: new_state });
                if new_state == BindStateId::NonFunctional {
                    self.binds.mark_cleanup_pending(handle);
                }
            }
            // A `Functional` bind's state machine is terminal and never
            // polls its own engine slot again, but presence dispatch keeps
            // sending through it (`dispatch_to_all`). Reap the outcome here
            // so the slot frees up for the next On/Off — otherwise the first
            // dispatch through a Functional bind would wedge it in
            // `AlreadyInFlight` forever.
            if new_state == BindStateId::Functional {
                if let Some(Outcome::TotalFailure) = self.engine.poll(handle.index()) {
                    sink.emit(&Notification::CommandFailed { slot: handle.index() });
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // 1 Hz service tick (spec §4.8)
    // -----------------------------------------------------------------

    pub fn tick(
        &mut self,
        commands: &mut impl ZigbeeCommandPort,
        scheduler: &mut impl SchedulerPort,
        attrs: &mut impl ZigbeeAttributePort,
        config_port: &mut impl ConfigPort,
        sink: &mut impl crate::zigbee::ports::EventSink,
    ) {
        // (a) reap finished bind records.
        let reaped = self.binds.reap_cleanup_pending();
        if reaped > 0 {
            info!("service: reaped {reaped} finished bind slot(s)");
        }

        // (b) recompute the per-bind validity bitmaps the custom cluster
        // exposes as `internals`/`internals2`/`internals3`/`failure-status`.
        let snapshot = self.compute_attribute_snapshot();

        // (c) persist reporting-capability drift picked up by the bind
        // lifecycle's `CheckReportingAbility` state.
        if self.config.bind_reporting_capability != self.last_saved_reporting {
            match config_port.save(&self.config) {
                Ok(()) => {
                    self.last_saved_reporting = self.config.bind_reporting_capability;
                    sink.emit(&Notification::ConfigSaved);
                }
                Err(_) => sink.emit(&Notification::ConfigSaveFailed),
            }
        }

        // (d) push every attribute that moved since the last tick.
        if snapshot.internals != self.last_attrs.internals {
            attrs.report_internals(snapshot.internals);
        }
        if snapshot.internals2 != self.last_attrs.internals2 {
            attrs.report_internals2(snapshot.internals2);
        }
        if snapshot.internals3 != self.last_attrs.internals3 {
            attrs.report_internals3(snapshot.internals3);
        }
        if snapshot.failure_status != self.last_attrs.failure_status {
            attrs.report_failure_status(snapshot.failure_status);
        }
        if snapshot.restarts_count != self.last_attrs.restarts_count {
            attrs.report_restarts_count(snapshot.restarts_count);
        }
        if snapshot.armed != self.last_attrs.armed {
            attrs.report_armed_for_trigger(snapshot.armed);
        }
        self.last_attrs = snapshot;

        // (e) if a bind/unbind was observed on the APS layer, the 2s alarm
        // armed in `handle_zigbee_event` fires into this flag; re-verify
        // every live bind's place in the remote binding table.
        if crate::events::take_bind_rescan_due() {
            self.rescan_binds(commands, scheduler);
        }

        // (f) refresh the illuminance attribute if the radar or an external
        // report has produced a new sample since the last tick.
        if let Some(light) = self.presence.light_sample() {
            if Some(light) != self.last_attrs.light {
                attrs.report_engineering_light(light);
            }
        }
        self.last_attrs.light = self.presence.light_sample();

        // (g) drive the alarm pool's restart guard. Paused whenever the node
        // is not quiet — a restart mid-session would be disruptive.
        if self.presence.is_quiet() {
            if self.alarms.check_counter_of_death() {
                sink.emit(&Notification::RestartGuardTripped);
                scheduler.restart_device();
            }
        } else {
            self.alarms.deactivate_counter_of_death();
        }
    }

    fn rescan_binds(&mut self, commands: &mut impl ZigbeeCommandPort, scheduler: &mut impl SchedulerPort) {
        let live: heapless::Vec<crate::bind::pool::BindHandle, POOL_SIZE> = self.binds.iter().map(|(h, _, _)| h).collect();
        for handle in live {
            let Some((record, state)) = self.binds.get_mut(handle) else { continue };
            if *state == BindStateId::Functional {
                let mut env = BindEnv {
                    engine: &mut self.engine,
                    commands: &mut *commands,
                    alarms: &mut self.alarms,
                    scheduler: &mut *scheduler,
                    config: &mut self.config,
                    own_ieee: self.own_ieee,
                };
                bind::request_recheck(record, state, handle.index(), &mut env);
            }
        }
    }

    fn compute_attribute_snapshot(&self) -> AttributeSnapshot {
        let mut internals = 0u32;
        let mut internals2 = 0u32;
        let mut internals3 = 0u32;
        let mut failure_count = 0u16;
        for (handle, record, state) in self.binds.iter() {
            let bit = 1u32 << handle.index();
            if state == BindStateId::Functional {
                internals |= bit;
            }
            if record.bound_to_me {
                internals2 |= bit;
            }
            if state == BindStateId::NonFunctional {
                internals3 |= bit;
                failure_count += 1;
            }
        }
        AttributeSnapshot {
            internals,
            internals2,
            internals3,
            failure_status: failure_count,
            restarts_count: self.config.restart_count.min(u32::from(u16::MAX)) as u16,
            armed: self.presence.trigger_armed(),
            light: self.presence.light_sample(),
        }
    }
}

fn decode_on_off_mode(v: u8) -> OnOffMode {
    match v {
        0 => OnOffMode::Nothing,
        1 => OnOffMode::OnOnly,
        2 => OnOffMode::OffOnly,
        3 => OnOffMode::OnOff,
        4 => OnOffMode::TimedOn,
        _ => OnOffMode::TimedOnLocal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zigbee::ports::{BindTarget, EventSink};

    struct FakeCommands;
    impl ZigbeeCommandPort for FakeCommands {
        fn send_on(&mut self, _t: BindTarget) -> Result<u8, crate::error::Error> {
            Ok(1)
        }
        fn send_off(&mut self, _t: BindTarget) -> Result<u8, crate::error::Error> {
            Ok(1)
        }
        fn send_on_with_timed_off(&mut self, _t: BindTarget, _d: u16) -> Result<u8, crate::error::Error> {
            Ok(1)
        }
        fn send_mgmt_bind_req(&mut self, _t: BindTarget) -> Result<u8, crate::error::Error> {
            Ok(1)
        }
        fn send_bind_to_me(&mut self, _t: BindTarget) -> Result<u8, crate::error::Error> {
            Ok(1)
        }
        fn send_read_reporting_config(&mut self, _t: BindTarget) -> Result<u8, crate::error::Error> {
            Ok(1)
        }
        fn send_configure_report(&mut self, _t: BindTarget) -> Result<u8, crate::error::Error> {
            Ok(1)
        }
        fn send_read_on_off_attribute(&mut self, _t: BindTarget) -> Result<u8, crate::error::Error> {
            Ok(1)
        }
        fn send_unbind(&mut self, _t: BindTarget) -> Result<u8, crate::error::Error> {
            Ok(1)
        }
    }

    struct FakeScheduler;
    impl SchedulerPort for FakeScheduler {
        fn register_alarm(&mut self, _h: u8, _d: u32) {}
        fn cancel_alarm(&mut self, _h: u8) {}
        fn restart_device(&mut self) -> ! {
            panic!("restart_device called in test");
        }
    }

    #[derive(Default)]
    struct FakeAttrs {
        occupancy: Vec<bool>,
        internals: Vec<u32>,
    }
    impl ZigbeeAttributePort for FakeAttrs {
        fn report_occupancy(&mut self, occupied: bool) {
            self.occupancy.push(occupied);
        }
        fn report_pir_presence(&mut self, _present: bool) {}
        fn report_engineering_light(&mut self, _light: u8) {}
        fn report_failure_status(&mut self, _status: u16) {}
        fn report_internals(&mut self, internals: u32) {
            self.internals.push(internals);
        }
        fn report_internals2(&mut self, _v: u32) {}
        fn report_internals3(&mut self, _v: u32) {}
        fn report_restarts_count(&mut self, _count: u16) {}
        fn report_armed_for_trigger(&mut self, _armed: bool) {}
    }

    #[derive(Default)]
    struct NullSink;
    impl EventSink for NullSink {
        fn emit(&mut self, _event: &Notification) {}
    }

    struct FakeConfigPort {
        saved: Vec<LocalConfig>,
    }
    impl ConfigPort for FakeConfigPort {
        fn load(&self) -> Result<LocalConfig, crate::error::ConfigError> {
            Ok(LocalConfig::default())
        }
        fn save(&mut self, config: &LocalConfig) -> Result<(), crate::error::ConfigError> {
            self.saved.push(config.clone());
            Ok(())
        }
    }

    #[test]
    fn radar_presence_edge_reports_occupancy() {
        let mut svc = Service::new(LocalConfig::default(), 0);
        let mut commands = FakeCommands;
        let mut sched = FakeScheduler;
        let mut attrs = FakeAttrs::default();
        svc.on_radar_presence_intr(true, &mut commands, &mut sched, &mut attrs);
        assert_eq!(attrs.occupancy, vec![true]);
    }

    #[test]
    fn aps_bind_change_arms_rescan_alarm_not_yet_due() {
        let mut svc = Service::new(LocalConfig::default(), 0);
        let mut commands = FakeCommands;
        let mut sched = FakeScheduler;
        let mut attrs = FakeAttrs::default();
        let mut config_port = FakeConfigPort { saved: Vec::new() };
        svc.handle_zigbee_event(ZigbeeInboundEvent::ApsBindChange, &mut commands, &mut sched, &mut attrs, &mut config_port);
        assert!(svc.bind_rescan_handle.is_some());
        assert!(!crate::events::take_bind_rescan_due());
    }

    #[test]
    fn attribute_write_persists_config_immediately() {
        let mut svc = Service::new(LocalConfig::default(), 0);
        let mut commands = FakeCommands;
        let mut sched = FakeScheduler;
        let mut attrs = FakeAttrs::default();
        let mut config_port = FakeConfigPort { saved: Vec::new() };
        svc.handle_zigbee_event(
            ZigbeeInboundEvent::AttributeWrite(AttributeWrite::OnOffTimeoutSecs(42)),
            &mut commands,
            &mut sched,
            &mut attrs,
            &mut config_port,
        );
        assert_eq!(svc.config.on_off_timeout_secs, 42);
        assert_eq!(config_port.saved.len(), 1);
        assert_eq!(config_port.saved[0].on_off_timeout_secs, 42);
    }

    #[test]
    fn reporting_capability_drift_triggers_save() {
        let mut svc = Service::new(LocalConfig::default(), 0);
        svc.config.bind_reporting_capability[0] = crate::config::TriState::True;
        let mut commands = FakeCommands;
        let mut sched = FakeScheduler;
        let mut attrs = FakeAttrs::default();
        let mut config_port = FakeConfigPort { saved: Vec::new() };
        let mut sink = NullSink;
        svc.tick(&mut commands, &mut sched, &mut attrs, &mut config_port, &mut sink);
        assert_eq!(config_port.saved.len(), 1);
    }

    #[test]
    fn functional_bind_sets_internals_bit() {
        let mut svc = Service::new(LocalConfig::default(), 0);
        let mut commands = FakeCommands;
        let mut sched = FakeScheduler;
        svc.start_bind(0x1122, 0xBEEF, 1, &mut commands, &mut sched).unwrap();
        let handle = svc.binds.find_by_ieee(0x1122).unwrap();
        let (_, state) = svc.binds.get_mut(handle).unwrap();
        *state = BindStateId::Functional;

        let mut attrs = FakeAttrs::default();
        let mut config_port = FakeConfigPort { saved: Vec::new() };
        let mut sink = NullSink;
        svc.tick(&mut commands, &mut sched, &mut attrs, &mut config_port, &mut sink);
        assert_eq!(attrs.internals, vec![1u32 << handle.index()]);
    }
}
