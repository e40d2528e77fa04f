//! LD2412 component (C4): manager queue + fast queue.
//!
//! The manager queue is drained by a normal-priority task that owns the
//! [`UartChannel`] exclusively (spec §5: "LD2412 channel owned exclusively
//! by the manager thread"); the fast queue is drained by a high-priority
//! task that only forwards decoded samples and GPIO edges out to the
//! presence-fusion callbacks, never touching the UART. ISRs post only to
//! the fast queue, following `drivers/button.rs`'s ISR-writes-atomic-only
//! discipline — no parsing or blocking I/O ever runs in interrupt context.

use super::protocol::{self, Configuration, DecodedFrame, Drain, DistanceRes, NUM_GATES, PresenceSample, SystemMode};
use super::uart_channel::{ConfigBlock, UartChannel};
use crate::error::Error;
use crate::queue::StaticQueue;

/// Manager queue depth (spec §4.4: "depth ~16").
pub const MANAGER_QUEUE_DEPTH: usize = 16;
/// Fast queue depth (spec §4.4: "depth ~256").
pub const FAST_QUEUE_DEPTH: usize = 256;

/// A changed sub-field must move by more than this many centimetres before
/// a fresh `Presence` message is posted to the fast queue (spec §4.4).
pub const REPORT_DISTANCE_THRESHOLD_CM: u16 = 10;
/// Same, for energy values.
pub const REPORT_ENERGY_THRESHOLD: u8 = 10;

pub type ManagerQueue = StaticQueue<ManagerMsg, MANAGER_QUEUE_DEPTH>;
pub type FastQueue = StaticQueue<FastMsg, FAST_QUEUE_DEPTH>;

/// Messages drained by the manager (UART-owning) task.
#[derive(Debug, Clone, Copy)]
pub enum ManagerMsg {
    SetMode(SystemMode),
    SetTimeout(u16),
    SetMinDistance(u8),
    SetMaxDistance(u8),
    SetMoveSensitivity([u8; NUM_GATES]),
    SetStillSensitivity([u8; NUM_GATES]),
    SetDistanceRes(DistanceRes),
    StartCalibrate,
    StopCalibrate,
    ResetEnergyStat,
    Restart,
    FactoryReset,
    DynamicBackgroundAnalysis,
    SwitchBluetooth(bool),
    /// A UART `Data` event fired — read and decode exactly one frame.
    ReadData,
    /// A UART `BufferFull`/`FifoOverflow` event fired — drop and resync.
    Flush,
}

/// Messages drained by the fast (callback-dispatching) task.
#[derive(Debug, Clone, Copy)]
pub enum FastMsg {
    Presence(PresenceSample),
    PresenceIntr(bool),
    PirPresenceIntr(bool),
    GatesEnergyState {
        move_energies: [u8; NUM_GATES],
        still_energies: [u8; NUM_GATES],
    },
    DynamicBackgroundAnalysisRunning,
    DynamicBackgroundAnalysisDone,
    StartCalibrate,
    StopCalibrate,
}

/// The movement/measurement callbacks C5 registers against the fast queue.
/// Every method but `on_presence` has a no-op default since most consumers
/// only care about the fused presence sample.
pub trait FastQueueSink {
    fn on_presence(&mut self, sample: PresenceSample);
    fn on_radar_presence_intr(&mut self, _present: bool) {}
    fn on_pir_presence_intr(&mut self, _present: bool) {}
    fn on_gates_energy(&mut self, _move_energies: [u8; NUM_GATES], _still_energies: [u8; NUM_GATES]) {}
    fn on_dynamic_background_analysis_done(&mut self) {}
}

/// Drains every message currently queued, dispatching to `sink`.
pub fn drain_fast_queue(queue: &FastQueue, sink: &mut impl FastQueueSink) {
    queue.drain(|msg| match msg {
        FastMsg::Presence(sample) => sink.on_presence(sample),
        FastMsg::PresenceIntr(level) => sink.on_radar_presence_intr(level),
        FastMsg::PirPresenceIntr(level) => sink.on_pir_presence_intr(level),
        FastMsg::GatesEnergyState { move_energies, still_energies } => {
            sink.on_gates_energy(move_energies, still_energies);
        }
        FastMsg::DynamicBackgroundAnalysisDone => sink.on_dynamic_background_analysis_done(),
        FastMsg::DynamicBackgroundAnalysisRunning | FastMsg::StartCalibrate | FastMsg::StopCalibrate => {}
    });
}

/// Per-gate calibration/reporting bookkeeping owned by the manager task.
struct ManagerState {
    base: Configuration,
    last_reported: Option<PresenceSample>,
    calibrating: bool,
    pre_calibration_mode: Option<SystemMode>,
    move_max: [u8; NUM_GATES],
    still_max: [u8; NUM_GATES],
    dynamic_background_running: bool,
}

impl ManagerState {
    fn new(base: Configuration) -> Self {
        Self {
            base,
            last_reported: None,
            calibrating: false,
            pre_calibration_mode: None,
            move_max: [0; NUM_GATES],
            still_max: [0; NUM_GATES],
            dynamic_background_running: false,
        }
    }
}

/// Owns the UART channel and every piece of state a configuration session
/// or calibration run needs across manager-queue messages.
pub struct Ld2412Manager<'a> {
    channel: UartChannel<'a>,
    state: ManagerState,
}

impl<'a> Ld2412Manager<'a> {
    pub fn new(channel: UartChannel<'a>, base: Configuration) -> Self {
        Self { channel, state: ManagerState::new(base) }
    }

    pub fn handle(&mut self, msg: ManagerMsg, fast_queue: &FastQueue) -> Result<(), Error> {
        match msg {
            ManagerMsg::ReadData => self.read_data(fast_queue),
            ManagerMsg::Flush => {
                self.channel.flush();
                Ok(())
            }
            ManagerMsg::SetMode(mode) => self.apply_base(|b| b.system_mode = mode),
            ManagerMsg::SetTimeout(secs) => self.apply_base(|b| b.unoccupied_delay_secs = secs),
            ManagerMsg::SetMinDistance(gate) => self.apply_base(|b| b.min_gate = gate),
            ManagerMsg::SetMaxDistance(gate) => self.apply_base(|b| b.max_gate = gate),
            ManagerMsg::SetMoveSensitivity(thresholds) => {
                let mut block = ConfigBlock::new();
                block.set_move_thresholds(thresholds);
                block.end_change(&mut self.channel)
            }
            ManagerMsg::SetStillSensitivity(thresholds) => {
                let mut block = ConfigBlock::new();
                block.set_still_thresholds(thresholds);
                block.end_change(&mut self.channel)
            }
            ManagerMsg::SetDistanceRes(res) => {
                let mut block = ConfigBlock::new();
                block.set_distance_res(res);
                block.end_change(&mut self.channel)
            }
            ManagerMsg::StartCalibrate => self.start_calibrate(fast_queue),
            ManagerMsg::StopCalibrate => self.stop_calibrate(fast_queue),
            ManagerMsg::ResetEnergyStat => {
                self.state.move_max = [0; NUM_GATES];
                self.state.still_max = [0; NUM_GATES];
                Ok(())
            }
            ManagerMsg::Restart => {
                let was_engineering = self.state.base.system_mode == SystemMode::Energy;
                self.channel.restart(was_engineering)
            }
            ManagerMsg::FactoryReset => self.channel.send_command(protocol::Cmd::FactoryReset, &[]).map(|_| ()),
            ManagerMsg::DynamicBackgroundAnalysis => self.run_dynamic_background_analysis(fast_queue),
            ManagerMsg::SwitchBluetooth(on) => {
                self.channel.send_command(protocol::Cmd::SwitchBluetooth, &[on as u8]).map(|_| ())
            }
        }
    }

    /// Polls `QueryDynamicBackgroundAnalysis` while a run is in progress;
    /// call once per manager-task iteration alongside draining the queue.
    /// No-op when no analysis is running.
    pub fn poll_dynamic_background_analysis(&mut self, fast_queue: &FastQueue) -> Result<(), Error> {
        if !self.state.dynamic_background_running {
            return Ok(());
        }
        let resp = self.channel.send_command(protocol::Cmd::QueryDynamicBackgroundAnalysis, &[])?;
        let done = resp.data.first().copied().unwrap_or(0) != 0;
        if done {
            self.state.dynamic_background_running = false;
            let _ = fast_queue.push(FastMsg::DynamicBackgroundAnalysisDone);
        }
        Ok(())
    }

    fn apply_base(&mut self, f: impl FnOnce(&mut Configuration)) -> Result<(), Error> {
        let mut cfg = self.state.base;
        f(&mut cfg);
        let mut block = ConfigBlock::new();
        block.set_base(cfg);
        block.end_change(&mut self.channel)?;
        self.state.base = cfg;
        Ok(())
    }

    fn read_data(&mut self, fast_queue: &FastQueue) -> Result<(), Error> {
        if self.state.dynamic_background_running {
            return Ok(());
        }
        let frame = self.channel.try_read_frame(3, true, Drain::Try)?;
        match frame {
            DecodedFrame::Command(_) => {}
            DecodedFrame::Presence(sample) => self.report_sample(sample, fast_queue),
            DecodedFrame::Engineering(eng) => {
                if self.state.calibrating {
                    for i in 0..NUM_GATES {
                        self.state.move_max[i] = self.state.move_max[i].max(eng.move_energies[i]);
                        self.state.still_max[i] = self.state.still_max[i].max(eng.still_energies[i]);
                    }
                }
                let _ = fast_queue.push(FastMsg::GatesEnergyState {
                    move_energies: eng.move_energies,
                    still_energies: eng.still_energies,
                });
                self.report_sample(eng.presence, fast_queue);
            }
        }
        Ok(())
    }

    fn report_sample(&mut self, sample: PresenceSample, fast_queue: &FastQueue) {
        let changed = match self.state.last_reported {
            None => true,
            Some(prev) => sample_changed(prev, sample),
        };
        if changed {
            let _ = fast_queue.push(FastMsg::Presence(sample));
        }
        self.state.last_reported = Some(sample);
    }

    fn start_calibrate(&mut self, fast_queue: &FastQueue) -> Result<(), Error> {
        self.state.pre_calibration_mode = Some(self.state.base.system_mode);
        self.state.move_max = [0; NUM_GATES];
        self.state.still_max = [0; NUM_GATES];
        self.state.calibrating = true;
        self.apply_base(|b| b.system_mode = SystemMode::Energy)?;
        let _ = fast_queue.push(FastMsg::StartCalibrate);
        Ok(())
    }

    fn stop_calibrate(&mut self, fast_queue: &FastQueue) -> Result<(), Error> {
        if !self.state.calibrating {
            return Ok(());
        }
        let (move_thresholds, still_thresholds) = compute_calibration_thresholds(&self.state.move_max, &self.state.still_max);
        let mut block = ConfigBlock::new();
        block.set_move_thresholds(move_thresholds);
        block.set_still_thresholds(still_thresholds);
        block.end_change(&mut self.channel)?;
        if let Some(mode) = self.state.pre_calibration_mode.take() {
            self.apply_base(|b| b.system_mode = mode)?;
        }
        self.state.calibrating = false;
        let _ = fast_queue.push(FastMsg::StopCalibrate);
        Ok(())
    }

    fn run_dynamic_background_analysis(&mut self, fast_queue: &FastQueue) -> Result<(), Error> {
        self.channel.send_command(protocol::Cmd::RunDynamicBackgroundAnalysis, &[])?;
        self.state.dynamic_background_running = true;
        let _ = fast_queue.push(FastMsg::DynamicBackgroundAnalysisRunning);
        Ok(())
    }
}

fn sample_changed(prev: PresenceSample, next: PresenceSample) -> bool {
    prev.target_state != next.target_state
        || prev.move_distance_cm.abs_diff(next.move_distance_cm) > REPORT_DISTANCE_THRESHOLD_CM
        || prev.still_distance_cm.abs_diff(next.still_distance_cm) > REPORT_DISTANCE_THRESHOLD_CM
        || prev.move_energy.abs_diff(next.move_energy) > REPORT_ENERGY_THRESHOLD
        || prev.still_energy.abs_diff(next.still_energy) > REPORT_ENERGY_THRESHOLD
}

/// still := max × 1.1, move := max × 1.3, both truncated to `[0, 100]` (spec §4.4).
fn compute_calibration_thresholds(move_max: &[u8; NUM_GATES], still_max: &[u8; NUM_GATES]) -> ([u8; NUM_GATES], [u8; NUM_GATES]) {
    let mut move_t = [0u8; NUM_GATES];
    let mut still_t = [0u8; NUM_GATES];
    for i in 0..NUM_GATES {
        move_t[i] = scale_threshold(move_max[i], 13, 10);
        still_t[i] = scale_threshold(still_max[i], 11, 10);
    }
    (move_t, still_t)
}

fn scale_threshold(max: u8, mult: u16, div: u16) -> u8 {
    ((u16::from(max) * mult) / div).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error as CrateError;
    use crate::zigbee::ports::UartPort;
    use std::collections::VecDeque;

    struct FakePort {
        inbox: VecDeque<u8>,
        sent: Vec<u8>,
    }
    impl FakePort {
        fn new(bytes: &[u8]) -> Self {
            Self { inbox: bytes.iter().copied().collect(), sent: Vec::new() }
        }
    }
    impl UartPort for FakePort {
        fn send(&mut self, bytes: &[u8]) -> Result<(), CrateError> {
            self.sent.extend_from_slice(bytes);
            Ok(())
        }
        fn send_with_break(&mut self, bytes: &[u8], _break_len_us: u32) -> Result<(), CrateError> {
            self.send(bytes)
        }
        fn read(&mut self, buf: &mut [u8], _wait_ms: u32) -> Result<usize, CrateError> {
            let mut n = 0;
            while n < buf.len() {
                match self.inbox.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }
        fn peek_byte(&mut self, _wait_ms: u32) -> Result<Option<u8>, CrateError> {
            Ok(self.inbox.front().copied())
        }
        fn flush(&mut self) {}
        fn wait_all_sent(&mut self) {}
        fn ready_to_read_len(&self) -> usize {
            self.inbox.len()
        }
    }

    fn default_configuration() -> Configuration {
        Configuration {
            min_gate: 1,
            max_gate: 8,
            unoccupied_delay_secs: 5,
            output_pin_active_high: true,
            move_thresholds: [30; NUM_GATES],
            still_thresholds: [20; NUM_GATES],
            system_mode: SystemMode::Simple,
            distance_res: DistanceRes::Coarse,
        }
    }

    fn command_response_bytes(cmd: u16, status: u16) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&protocol::CMD_HEADER);
        let payload_len = 2u16 + 2;
        out.extend_from_slice(&payload_len.to_le_bytes());
        out.extend_from_slice(&cmd.to_le_bytes());
        out.extend_from_slice(&status.to_le_bytes());
        out.extend_from_slice(&protocol::CMD_FOOTER);
        out
    }

    fn engineering_payload(
        target: u8,
        move_dist: u16,
        move_e: u8,
        still_e: u8,
        max_move_gate: u8,
        max_still_gate: u8,
        move_energies: [u8; NUM_GATES],
        still_energies: [u8; NUM_GATES],
        light: u8,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(target);
        out.extend_from_slice(&move_dist.to_le_bytes());
        out.push(move_e);
        out.extend_from_slice(&0u16.to_le_bytes()); // still_distance_cm
        out.push(still_e);
        out.push(max_move_gate);
        out.push(max_still_gate);
        out.extend_from_slice(&move_energies);
        out.extend_from_slice(&still_energies);
        out.push(light);
        out
    }

    fn engineering_data_frame(payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&protocol::DATA_HEADER);
        let body_len = (1 + 1 + payload.len() + 1 + 1) as u16;
        frame.extend_from_slice(&body_len.to_le_bytes());
        frame.push(SystemMode::Energy as u8);
        frame.push(0xAA);
        frame.extend_from_slice(payload);
        frame.push(0x55);
        frame.push(0);
        frame.extend_from_slice(&protocol::DATA_FOOTER);
        frame
    }

    #[test]
    fn read_data_reports_presence_on_first_sample() {
        let payload = engineering_payload(2, 150, 80, 60, 3, 2, [5; NUM_GATES], [5; NUM_GATES], 10);
        let frame = engineering_data_frame(&payload);
        let mut port = FakePort::new(&frame);
        let channel = UartChannel::new(&mut port);
        let mut mgr = Ld2412Manager::new(channel, default_configuration());
        let fast_queue: FastQueue = StaticQueue::new();

        mgr.handle(ManagerMsg::ReadData, &fast_queue).unwrap();

        let mut last = None;
        fast_queue.drain(|m| last = Some(m));
        match last {
            Some(FastMsg::Presence(sample)) => {
                assert_eq!(sample.move_distance_cm, 150);
                assert_eq!(sample.move_energy, 80);
            }
            other => panic!("expected a Presence message last, got {other:?}"),
        }
    }

    #[test]
    fn read_data_is_blocked_while_dynamic_background_analysis_runs() {
        let mut port = FakePort::new(&[]);
        let channel = UartChannel::new(&mut port);
        let mut mgr = Ld2412Manager::new(channel, default_configuration());
        mgr.state.dynamic_background_running = true;
        let fast_queue: FastQueue = StaticQueue::new();

        mgr.handle(ManagerMsg::ReadData, &fast_queue).unwrap();

        assert!(fast_queue.is_empty());
    }

    #[test]
    fn set_move_sensitivity_brackets_command_mode() {
        let mut bytes = Vec::new();
        bytes.extend(command_response_bytes(protocol::Cmd::OpenCmdMode as u16 | protocol::RESPONSE_BIT, 0));
        bytes.extend(command_response_bytes(protocol::Cmd::SetMoveSensitivity as u16 | protocol::RESPONSE_BIT, 0));
        bytes.extend(command_response_bytes(protocol::Cmd::CloseCmdMode as u16 | protocol::RESPONSE_BIT, 0));
        let mut port = FakePort::new(&bytes);
        let channel = UartChannel::new(&mut port);
        let mut mgr = Ld2412Manager::new(channel, default_configuration());
        let fast_queue: FastQueue = StaticQueue::new();

        mgr.handle(ManagerMsg::SetMoveSensitivity([42; NUM_GATES]), &fast_queue).unwrap();
    }

    #[test]
    fn calibration_thresholds_clamp_to_one_hundred() {
        let (move_t, still_t) = compute_calibration_thresholds(&[80; NUM_GATES], &[95; NUM_GATES]);
        assert_eq!(move_t[0], 100); // 80 * 1.3 = 104, clamped
        assert_eq!(still_t[0], 100); // 95 * 1.1 = 104.5, clamped
    }

    #[test]
    fn calibration_thresholds_scale_without_clamping() {
        let (move_t, still_t) = compute_calibration_thresholds(&[50; NUM_GATES], &[40; NUM_GATES]);
        assert_eq!(move_t[0], 65);
        assert_eq!(still_t[0], 44);
    }
}
