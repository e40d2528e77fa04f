//! LD2412 framed wire protocol (C3).
//!
//! Two frame shapes travel over the same UART channel:
//!
//! ```text
//! Command frame:  FD FC FB FA | len:u16 LE | cmd:u16 LE | params... | 04 03 02 01
//! Data frame:     F4 F3 F2 F1 | len:u16 LE | mode:u8 | AA | payload... | 55 | check:u8 | F8 F7 F6 F5
//! ```
//!
//! All multi-byte integers are little-endian; the length field counts
//! payload bytes only (the bytes strictly between the header and footer).
//! Command responses carry `cmd | 0x0100`. Every struct that crosses the
//! wire is one-byte aligned and serialized field-by-field rather than
//! relying on `#[repr(C)]` layout, per the little-endian/no-compiler-packing
//! design note.

use crate::error::{Error, FrameStep, ProtocolError};

// ── Frame markers ──────────────────────────────────────────────

pub const CMD_HEADER: [u8; 4] = [0xFD, 0xFC, 0xFB, 0xFA];
pub const CMD_FOOTER: [u8; 4] = [0x04, 0x03, 0x02, 0x01];
pub const DATA_HEADER: [u8; 4] = [0xF4, 0xF3, 0xF2, 0xF1];
pub const DATA_FOOTER: [u8; 4] = [0xF8, 0xF7, 0xF6, 0xF5];

const REPORT_BEGIN: u8 = 0xAA;
const REPORT_END: u8 = 0x55;

/// Bit set on a command id to mark it as the response to that command.
pub const RESPONSE_BIT: u16 = 0x0100;

/// Largest body (everything after the 2-byte length field, footer included)
/// this decoder will buffer. Bounds memory with no heap allocation.
const MAX_BODY: usize = 128;

// ── Enumerations ────────────────────────────────────────────────

/// Radar reporting mode. Discriminants match the wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum SystemMode {
    Energy = 0x01,
    Simple = 0x02,
}

impl SystemMode {
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Energy),
            0x02 => Some(Self::Simple),
            _ => None,
        }
    }
}

/// Distance resolution per gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum DistanceRes {
    /// 0.75 m per gate.
    Coarse = 0,
    /// 0.20 m per gate.
    Fine = 1,
}

/// Fused target classification reported by a data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TargetState {
    Clear = 0,
    Move = 1,
    Still = 2,
    MoveAndStill = 3,
}

impl TargetState {
    fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Clear),
            1 => Some(Self::Move),
            2 => Some(Self::Still),
            3 => Some(Self::MoveAndStill),
            _ => None,
        }
    }
}

/// How much to drain the channel before giving up, used around `Restart`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    No,
    Try,
    Only,
}

/// Command codes, numbered exactly as the module's documented command set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Cmd {
    WriteBaseParams = 0x0002,
    SetMoveSensitivity = 0x0003,
    SetStillSensitivity = 0x0004,
    RunDynamicBackgroundAnalysis = 0x000B,
    ReadBaseParams = 0x0012,
    GetMoveSensitivity = 0x0013,
    GetStillSensitivity = 0x0014,
    QueryDynamicBackgroundAnalysis = 0x001B,
    EnterEngMode = 0x0062,
    LeaveEngMode = 0x0063,
    ReadVersion = 0x00A0,
    FactoryReset = 0x00A2,
    Restart = 0x00A3,
    SwitchBluetooth = 0x00A4,
    GetMac = 0x00A5,
    SetDistanceRes = 0x00AA,
    GetDistanceRes = 0x00AB,
    CloseCmdMode = 0x00FE,
    OpenCmdMode = 0x00FF,
}

// ── Data model (DATA MODEL §3) ──────────────────────────────────

pub const NUM_GATES: usize = 14;

/// Radar configuration: gate range, timing, thresholds. `min_gate <= max_gate`
/// and every threshold is in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Configuration {
    pub min_gate: u8,
    pub max_gate: u8,
    pub unoccupied_delay_secs: u16,
    pub output_pin_active_high: bool,
    pub move_thresholds: [u8; NUM_GATES],
    pub still_thresholds: [u8; NUM_GATES],
    pub system_mode: SystemMode,
    pub distance_res: DistanceRes,
}

impl Configuration {
    pub fn is_valid(&self) -> bool {
        self.min_gate >= 1
            && self.max_gate <= 12
            && self.min_gate <= self.max_gate
            && self.move_thresholds.iter().all(|&t| t <= 100)
            && self.still_thresholds.iter().all(|&t| t <= 100)
    }
}

/// A single data frame in Simple mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceSample {
    pub target_state: TargetState,
    pub move_distance_cm: u16,
    pub move_energy: u8,
    pub still_distance_cm: u16,
    pub still_energy: u8,
}

/// A data frame in Energy mode: the presence sample plus per-gate detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineeringSample {
    pub presence: PresenceSample,
    pub max_move_gate: u8,
    pub max_still_gate: u8,
    pub move_energies: [u8; NUM_GATES],
    pub still_energies: [u8; NUM_GATES],
    pub light: u8,
}

/// Parsed command response: echoed command id (with [`RESPONSE_BIT`] set),
/// status (0 = success), and any trailing return data.
#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub cmd: u16,
    pub status: u16,
    pub data: heapless::Vec<u8, MAX_BODY>,
}

/// Either frame kind the decoder can produce.
#[derive(Debug, Clone)]
pub enum DecodedFrame {
    Command(CommandResponse),
    Presence(PresenceSample),
    Engineering(EngineeringSample),
}

// ── Encode ────────────────────────────────────────────────────────

/// Encode a command frame (request direction: `cmd` has [`RESPONSE_BIT`] clear).
pub fn encode_command_frame(cmd: u16, params: &[u8], out: &mut heapless::Vec<u8, 160>) {
    out.clear();
    let payload_len = 2 + params.len();
    out.extend_from_slice(&CMD_HEADER).ok();
    out.extend_from_slice(&(payload_len as u16).to_le_bytes()).ok();
    out.extend_from_slice(&cmd.to_le_bytes()).ok();
    out.extend_from_slice(params).ok();
    out.extend_from_slice(&CMD_FOOTER).ok();
}

// ── Decode ────────────────────────────────────────────────────────

/// Streaming decoder over incrementally-delivered bytes.
///
/// Buffers a whole frame body (length-prefixed, footer included) before
/// parsing it in one shot — a two-phase `ReadingHeader`/`ReadingPayload`
/// shape, generalised here to disambiguate between the command and data
/// header at the first byte.
enum DecoderState {
    ScanHeader { collected: u8 },
    Length { buf: [u8; 2], collected: u8 },
    Body { expected: usize, buf: [u8; MAX_BODY], collected: usize },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Command,
    Data,
}

pub struct FrameDecoder {
    state: DecoderState,
    kind: Kind,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::ScanHeader { collected: 0 },
            kind: Kind::Command,
        }
    }

    pub fn reset(&mut self) {
        self.state = DecoderState::ScanHeader { collected: 0 };
    }

    fn fail(&mut self, step: FrameStep) -> Error {
        self.reset();
        Error::Protocol(ProtocolError::RecvFrameMalformed(step))
    }

    /// Feed one byte. Returns `Ok(Some(frame))` once a complete frame has
    /// been assembled and validated, `Ok(None)` if more bytes are needed,
    /// or `Err` at the step a mismatch was found. On error the decoder has
    /// already reset itself to re-scan for the next header.
    pub fn feed_byte(&mut self, byte: u8) -> Result<Option<DecodedFrame>, Error> {
        match &mut self.state {
            DecoderState::ScanHeader { collected } => {
                if *collected == 0 {
                    match byte {
                        0xFD => {
                            self.kind = Kind::Command;
                            self.state = DecoderState::ScanHeader { collected: 1 };
                        }
                        0xF4 => {
                            self.kind = Kind::Data;
                            self.state = DecoderState::ScanHeader { collected: 1 };
                        }
                        _ => {}
                    }
                    return Ok(None);
                }
                let expected_byte = match self.kind {
                    Kind::Command => CMD_HEADER[*collected as usize],
                    Kind::Data => DATA_HEADER[*collected as usize],
                };
                if byte != expected_byte {
                    return Err(self.fail(FrameStep::Header));
                }
                let next = *collected + 1;
                if next == 4 {
                    self.state = DecoderState::Length { buf: [0; 2], collected: 0 };
                } else {
                    self.state = DecoderState::ScanHeader { collected: next };
                }
                Ok(None)
            }

            DecoderState::Length { buf, collected } => {
                buf[*collected as usize] = byte;
                let next = *collected + 1;
                if next == 2 {
                    let payload_len = u16::from_le_bytes(*buf) as usize;
                    let footer_len = 4;
                    let body_len = payload_len + footer_len;
                    if body_len == 0 || body_len > MAX_BODY {
                        return Err(self.fail(FrameStep::Length));
                    }
                    self.state = DecoderState::Body {
                        expected: body_len,
                        buf: [0; MAX_BODY],
                        collected: 0,
                    };
                } else {
                    self.state = DecoderState::Length { buf: *buf, collected: next };
                }
                Ok(None)
            }

            DecoderState::Body { expected, buf, collected } => {
                buf[*collected] = byte;
                *collected += 1;
                if *collected < *expected {
                    return Ok(None);
                }
                let body = &buf[..*collected];
                let kind = self.kind;
                self.reset();
                match kind {
                    Kind::Command => parse_command_body(body).map(|r| Some(DecodedFrame::Command(r))),
                    Kind::Data => parse_data_body(body).map(Some),
                }
            }
        }
    }
}

fn parse_command_body(body: &[u8]) -> Result<CommandResponse, Error> {
    let footer_at = body.len() - 4;
    if body[footer_at..] != CMD_FOOTER {
        return Err(Error::Protocol(ProtocolError::RecvFrameMalformed(
            FrameStep::Footer,
        )));
    }
    let payload = &body[..footer_at];
    if payload.len() < 2 {
        return Err(Error::Protocol(ProtocolError::RecvFrameMalformed(
            FrameStep::Payload,
        )));
    }
    let cmd = u16::from_le_bytes([payload[0], payload[1]]);
    let rest = &payload[2..];
    let (status, data) = if cmd & RESPONSE_BIT != 0 && rest.len() >= 2 {
        (u16::from_le_bytes([rest[0], rest[1]]), &rest[2..])
    } else {
        (0u16, rest)
    };
    let mut data_vec = heapless::Vec::new();
    data_vec.extend_from_slice(data).ok();
    Ok(CommandResponse { cmd, status, data: data_vec })
}

fn parse_data_body(body: &[u8]) -> Result<DecodedFrame, Error> {
    let footer_at = body.len() - 4;
    if body[footer_at..] != DATA_FOOTER {
        return Err(Error::Protocol(ProtocolError::RecvFrameMalformed(
            FrameStep::Footer,
        )));
    }
    if footer_at < 4 {
        return Err(Error::Protocol(ProtocolError::RecvFrameMalformed(
            FrameStep::Payload,
        )));
    }
    let check_at = footer_at - 1;
    let report_end_at = check_at - 1;
    let mode = body[0];
    if body[1] != REPORT_BEGIN {
        return Err(Error::Protocol(ProtocolError::RecvFrameMalformed(
            FrameStep::ReportBegin,
        )));
    }
    if body[report_end_at] != REPORT_END {
        return Err(Error::Protocol(ProtocolError::RecvFrameMalformed(
            FrameStep::ReportEnd,
        )));
    }
    let payload = &body[2..report_end_at];
    let sample = decode_presence_payload(payload)?;
    match SystemMode::from_wire(mode) {
        Some(SystemMode::Simple) => Ok(DecodedFrame::Presence(sample)),
        Some(SystemMode::Energy) => decode_engineering_tail(sample, &payload[PRESENCE_PAYLOAD_LEN..]).map(DecodedFrame::Engineering),
        None => Err(Error::Protocol(ProtocolError::RecvFrameMalformed(
            FrameStep::Mode,
        ))),
    }
}

/// `state(1) + move_distance(2 LE) + move_energy(1) + still_distance(2 LE) +
/// still_energy(1)`, matching `original_source/main/ld2412.hpp`'s
/// `#pragma pack(push,1)` `PresenceResult`.
const PRESENCE_PAYLOAD_LEN: usize = 7;

fn decode_presence_payload(payload: &[u8]) -> Result<PresenceSample, Error> {
    if payload.len() < PRESENCE_PAYLOAD_LEN {
        return Err(Error::Protocol(ProtocolError::RecvFrameMalformed(
            FrameStep::Payload,
        )));
    }
    let target_state = TargetState::from_wire(payload[0]).ok_or(Error::Protocol(
        ProtocolError::RecvFrameMalformed(FrameStep::Payload),
    ))?;
    Ok(PresenceSample {
        target_state,
        move_distance_cm: u16::from_le_bytes([payload[1], payload[2]]),
        move_energy: payload[3],
        still_distance_cm: u16::from_le_bytes([payload[4], payload[5]]),
        still_energy: payload[6],
    })
}

fn decode_engineering_tail(presence: PresenceSample, tail: &[u8]) -> Result<EngineeringSample, Error> {
    let needed = 2 + NUM_GATES * 2 + 1;
    if tail.len() < needed {
        return Err(Error::Protocol(ProtocolError::RecvFrameMalformed(
            FrameStep::Payload,
        )));
    }
    let max_move_gate = tail[0];
    let max_still_gate = tail[1];
    let mut move_energies = [0u8; NUM_GATES];
    move_energies.copy_from_slice(&tail[2..2 + NUM_GATES]);
    let mut still_energies = [0u8; NUM_GATES];
    still_energies.copy_from_slice(&tail[2 + NUM_GATES..2 + 2 * NUM_GATES]);
    let light = tail[2 + 2 * NUM_GATES];
    // One reserved/dummy byte may follow; it is intentionally not modelled.
    Ok(EngineeringSample {
        presence,
        max_move_gate,
        max_still_gate,
        move_energies,
        still_energies,
        light,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(dec: &mut FrameDecoder, bytes: &[u8]) -> Result<Option<DecodedFrame>, Error> {
        let mut last = None;
        for &b in bytes {
            if let Some(frame) = dec.feed_byte(b)? {
                last = Some(frame);
            }
        }
        Ok(last)
    }

    fn simple_data_frame(target: u8, move_dist: u16, move_e: u8, still_e: u8) -> heapless::Vec<u8, 64> {
        simple_data_frame_full(target, move_dist, move_e, 0, still_e)
    }

    fn simple_data_frame_full(target: u8, move_dist: u16, move_e: u8, still_dist: u16, still_e: u8) -> heapless::Vec<u8, 64> {
        let mut payload = heapless::Vec::<u8, 8>::new();
        payload.push(target).ok();
        payload.extend_from_slice(&move_dist.to_le_bytes()).ok();
        payload.push(move_e).ok();
        payload.extend_from_slice(&still_dist.to_le_bytes()).ok();
        payload.push(still_e).ok();
        let mut frame = heapless::Vec::<u8, 64>::new();
        frame.extend_from_slice(&DATA_HEADER).ok();
        let body_len = (1 + 1 + payload.len() + 1 + 1) as u16; // mode+AA+payload+55+check
        frame.extend_from_slice(&body_len.to_le_bytes()).ok();
        frame.push(SystemMode::Simple as u8).ok();
        frame.push(REPORT_BEGIN).ok();
        frame.extend_from_slice(&payload).ok();
        frame.push(REPORT_END).ok();
        frame.push(0).ok(); // check byte, unvalidated here
        frame.extend_from_slice(&DATA_FOOTER).ok();
        frame
    }

    #[test]
    fn decodes_simple_presence_frame() {
        let frame = simple_data_frame(TargetState::Still as u8, 150, 80, 60);
        let mut dec = FrameDecoder::new();
        let decoded = feed_all(&mut dec, &frame).unwrap().unwrap();
        match decoded {
            DecodedFrame::Presence(p) => {
                assert_eq!(p.target_state, TargetState::Still);
                assert_eq!(p.move_distance_cm, 150);
                assert_eq!(p.move_energy, 80);
                assert_eq!(p.still_energy, 60);
            }
            _ => panic!("expected presence frame"),
        }
    }

    #[test]
    fn decodes_still_distance_independently_of_move_distance() {
        let frame = simple_data_frame_full(TargetState::Still as u8, 150, 80, 320, 60);
        let mut dec = FrameDecoder::new();
        let decoded = feed_all(&mut dec, &frame).unwrap().unwrap();
        match decoded {
            DecodedFrame::Presence(p) => {
                assert_eq!(p.move_distance_cm, 150);
                assert_eq!(p.still_distance_cm, 320);
                assert_eq!(p.still_energy, 60);
            }
            _ => panic!("expected presence frame"),
        }
    }

    #[test]
    fn rejects_bad_footer() {
        let mut frame = simple_data_frame(TargetState::Clear as u8, 0, 0, 0);
        let last = frame.len() - 1;
        frame[last] = 0x00;
        let mut dec = FrameDecoder::new();
        let err = feed_all(&mut dec, &frame).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::RecvFrameMalformed(FrameStep::Footer))
        ));
    }

    #[test]
    fn decoder_resets_and_resyncs_after_error() {
        let mut frame = simple_data_frame(TargetState::Clear as u8, 0, 0, 0);
        let last = frame.len() - 1;
        frame[last] = 0x00;
        let mut dec = FrameDecoder::new();
        assert!(feed_all(&mut dec, &frame).is_err());

        let good = simple_data_frame(TargetState::Move as u8, 90, 40, 10);
        let decoded = feed_all(&mut dec, &good).unwrap().unwrap();
        assert!(matches!(decoded, DecodedFrame::Presence(_)));
    }

    #[test]
    fn encodes_command_frame_with_params() {
        let mut out = heapless::Vec::new();
        encode_command_frame(Cmd::OpenCmdMode as u16, &[0x01, 0x00], &mut out);
        assert_eq!(&out[..4], &CMD_HEADER);
        assert_eq!(&out[out.len() - 4..], &CMD_FOOTER);
        let len = u16::from_le_bytes([out[4], out[5]]);
        assert_eq!(len as usize, 2 + 2);
    }

    #[test]
    fn decodes_command_response_with_status() {
        let mut out = heapless::Vec::<u8, 160>::new();
        out.extend_from_slice(&CMD_HEADER).ok();
        let cmd = Cmd::OpenCmdMode as u16 | RESPONSE_BIT;
        let status: u16 = 0;
        let payload_len = 2 + 2;
        out.extend_from_slice(&(payload_len as u16).to_le_bytes()).ok();
        out.extend_from_slice(&cmd.to_le_bytes()).ok();
        out.extend_from_slice(&status.to_le_bytes()).ok();
        out.extend_from_slice(&CMD_FOOTER).ok();

        let mut dec = FrameDecoder::new();
        let decoded = feed_all(&mut dec, &out).unwrap().unwrap();
        match decoded {
            DecodedFrame::Command(resp) => {
                assert_eq!(resp.cmd, cmd);
                assert_eq!(resp.status, 0);
            }
            _ => panic!("expected command frame"),
        }
    }

    #[test]
    fn configuration_validity_bounds() {
        let mut cfg = Configuration {
            min_gate: 1,
            max_gate: 12,
            unoccupied_delay_secs: 5,
            output_pin_active_high: true,
            move_thresholds: [50; NUM_GATES],
            still_thresholds: [40; NUM_GATES],
            system_mode: SystemMode::Simple,
            distance_res: DistanceRes::Coarse,
        };
        assert!(cfg.is_valid());
        cfg.min_gate = 13;
        assert!(!cfg.is_valid());
    }
}
