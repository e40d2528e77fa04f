//! UART channel to the LD2412 (C2).
//!
//! A thin, testable layer over [`crate::zigbee::ports::UartPort`]: a
//! one-byte peek cache sits in front of the driver read so protocol code
//! can look ahead without consuming, `SendCommand` brackets a request/
//! response exchange with a flush and a bounded retry of `ReadFrame`, and
//! `EndChange` drives a [`ConfigBlock`]'s accumulated writes through the
//! OpenCmdMode/CloseCmdMode bracket the module requires around every
//! configuration session.

use super::protocol::{
    self, CommandResponse, Configuration, DecodedFrame, Drain, FrameDecoder, SystemMode,
};
use crate::error::{Error, ProtocolError, UartError};
use crate::zigbee::ports::UartPort;

/// Default per-operation wait for one `SendCommand` round trip.
pub const DEFAULT_WAIT_MS: u32 = 250;
/// Default outer retry count for `ReadFrame` within `SendCommand`.
pub const DEFAULT_RETRIES: u8 = 3;
/// How long to drain the channel after issuing `Restart`.
pub const RESTART_DRAIN_MS: u32 = 2_000;

/// One-byte peek cache over a [`UartPort`].
pub struct UartChannel<'a> {
    port: &'a mut dyn UartPort,
    peeked: Option<u8>,
}

/// What a UART driver event implies for the component's manager queue.
/// Overflow conditions always take priority over a plain data event
/// (spec §4.2: "overflow events always precede any subsequent DATA").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartEvent {
    Data,
    BufferFull,
    FifoOverflow,
}

impl<'a> UartChannel<'a> {
    pub fn new(port: &'a mut dyn UartPort) -> Self {
        Self { port, peeked: None }
    }

    pub fn send(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.port.send(bytes)
    }

    pub fn send_with_break(&mut self, bytes: &[u8], break_len_us: u32) -> Result<(), Error> {
        self.port.send_with_break(bytes, break_len_us)
    }

    /// Reads up to `buf.len()` bytes, consuming the peek cache first.
    pub fn read(&mut self, buf: &mut [u8], wait_ms: u32) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut written = 0;
        if let Some(b) = self.peeked.take() {
            buf[0] = b;
            written = 1;
        }
        if written < buf.len() {
            written += self.port.read(&mut buf[written..], wait_ms)?;
        }
        Ok(written)
    }

    pub fn peek_byte(&mut self, wait_ms: u32) -> Result<Option<u8>, Error> {
        if self.peeked.is_none() {
            self.peeked = self.port.peek_byte(wait_ms)?;
        }
        Ok(self.peeked)
    }

    pub fn flush(&mut self) {
        self.peeked = None;
        self.port.flush();
    }

    pub fn wait_all_sent(&mut self) {
        self.port.wait_all_sent();
    }

    pub fn ready_to_read_len(&self) -> usize {
        self.port.ready_to_read_len() + self.peeked.is_some() as usize
    }

    /// Reads and decodes one complete frame, retrying `attempts` times on a
    /// malformed/incomplete scan. `flush` clears the cache and driver
    /// buffer before the first attempt; `drain` governs how aggressively
    /// stale bytes are discarded (used around `Restart`).
    pub fn try_read_frame(&mut self, attempts: u8, flush: bool, drain: Drain) -> Result<DecodedFrame, Error> {
        if flush {
            self.flush();
        }
        if drain != Drain::No {
            self.drain_for(RESTART_DRAIN_MS, drain == Drain::Only);
        }
        let mut last_err = Error::Uart(UartError::RecvFrameIncomplete);
        for _ in 0..attempts.max(1) {
            match self.read_one_frame() {
                Ok(frame) => return Ok(frame),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    fn read_one_frame(&mut self) -> Result<DecodedFrame, Error> {
        let mut decoder = FrameDecoder::new();
        let mut byte = [0u8; 1];
        loop {
            let n = self.read(&mut byte, DEFAULT_WAIT_MS)?;
            if n == 0 {
                return Err(Error::Uart(UartError::RecvFrameIncomplete));
            }
            if let Some(frame) = decoder.feed_byte(byte[0])? {
                return Ok(frame);
            }
        }
    }

    /// Sends `cmd` (with `params`) and waits for the matching response. See
    /// spec §4.3: response command id is `cmd | RESPONSE_BIT`, a non-zero
    /// status fails the call.
    pub fn send_command(&mut self, cmd: protocol::Cmd, params: &[u8]) -> Result<CommandResponse, Error> {
        self.flush();
        let mut out = heapless::Vec::<u8, 160>::new();
        protocol::encode_command_frame(cmd as u16, params, &mut out);
        self.send(&out)?;
        self.wait_all_sent();

        let expected = cmd as u16 | protocol::RESPONSE_BIT;
        let mut last_err = Error::Uart(UartError::RecvFrameIncomplete);
        for _ in 0..DEFAULT_RETRIES {
            match self.read_one_frame() {
                Ok(DecodedFrame::Command(resp)) if resp.cmd == expected => {
                    if resp.status != 0 {
                        return Err(Error::Protocol(ProtocolError::CommandStatus(resp.status)));
                    }
                    return Ok(resp);
                }
                Ok(_) => continue, // a stray data frame interleaved — keep scanning
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    /// Issues `Restart`, then drains the channel for up to
    /// [`RESTART_DRAIN_MS`]; if `was_engineering`, re-enters engineering
    /// mode once the module has come back up.
    pub fn restart(&mut self, was_engineering: bool) -> Result<(), Error> {
        self.send_command(protocol::Cmd::Restart, &[])?;
        self.drain_for(RESTART_DRAIN_MS, false);
        if was_engineering {
            self.send_command(protocol::Cmd::OpenCmdMode, &[0x01, 0x00])?;
            self.send_command(protocol::Cmd::EnterEngMode, &[])?;
            self.send_command(protocol::Cmd::CloseCmdMode, &[])?;
        }
        Ok(())
    }

    fn drain_for(&mut self, total_wait_ms: u32, only: bool) {
        self.flush();
        let mut buf = [0u8; 32];
        let mut waited = 0;
        let step = 50;
        while waited < total_wait_ms {
            let n = self.port.read(&mut buf, step).unwrap_or(0);
            if n == 0 && !only {
                break;
            }
            waited += step;
        }
    }
}

/// Maps a driver-level UART event to the manager-queue message it implies.
/// `BufferFull`/`FifoOverflow` translate to a flush request that always
/// takes priority over a plain data-ready notification.
pub fn event_to_manager_message(event: UartEvent) -> super::component::ManagerMsg {
    match event {
        UartEvent::Data => super::component::ManagerMsg::ReadData,
        UartEvent::BufferFull | UartEvent::FifoOverflow => super::component::ManagerMsg::Flush,
    }
}

/// A dirty-flag-tracked builder for a full radar reconfiguration. Grounded
/// on spec §4.3's `ConfigBlock`: accumulates intended changes, then
/// `end_change` opens command mode, emits only the writes actually needed,
/// and closes command mode. A no-op `ConfigBlock` never touches the wire.
#[derive(Default)]
pub struct ConfigBlock {
    base: Option<Configuration>,
    move_thresholds: Option<[u8; protocol::NUM_GATES]>,
    still_thresholds: Option<[u8; protocol::NUM_GATES]>,
    distance_res: Option<super::protocol::DistanceRes>,
}

impl ConfigBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_base(&mut self, config: Configuration) -> &mut Self {
        self.base = Some(config);
        self
    }

    pub fn set_move_thresholds(&mut self, thresholds: [u8; protocol::NUM_GATES]) -> &mut Self {
        self.move_thresholds = Some(thresholds);
        self
    }

    pub fn set_still_thresholds(&mut self, thresholds: [u8; protocol::NUM_GATES]) -> &mut Self {
        self.still_thresholds = Some(thresholds);
        self
    }

    pub fn set_distance_res(&mut self, res: super::protocol::DistanceRes) -> &mut Self {
        self.distance_res = Some(res);
        self
    }

    pub fn is_dirty(&self) -> bool {
        self.base.is_some() || self.move_thresholds.is_some() || self.still_thresholds.is_some() || self.distance_res.is_some()
    }

    pub fn end_change(&mut self, channel: &mut UartChannel<'_>) -> Result<(), Error> {
        if !self.is_dirty() {
            return Ok(());
        }
        channel.send_command(protocol::Cmd::OpenCmdMode, &[0x01, 0x00])?;

        if let Some(cfg) = self.base {
            let mut params = heapless::Vec::<u8, 16>::new();
            params.push(cfg.min_gate).ok();
            params.push(cfg.max_gate).ok();
            params.extend_from_slice(&cfg.unoccupied_delay_secs.to_le_bytes()).ok();
            params.push(cfg.output_pin_active_high as u8).ok();
            params.push(cfg.system_mode as u8).ok();
            channel.send_command(protocol::Cmd::WriteBaseParams, &params)?;
        }
        if let Some(t) = self.move_thresholds {
            channel.send_command(protocol::Cmd::SetMoveSensitivity, &t)?;
        }
        if let Some(t) = self.still_thresholds {
            channel.send_command(protocol::Cmd::SetStillSensitivity, &t)?;
        }
        if let Some(res) = self.distance_res {
            channel.send_command(protocol::Cmd::SetDistanceRes, &[res as u8])?;
        }

        channel.send_command(protocol::Cmd::CloseCmdMode, &[])?;
        *self = Self::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
        fn send(&mut self, bytes: &[u8]) -> Result<(), Error> {
            self.sent.extend_from_slice(bytes);
            Ok(())
        }
        fn send_with_break(&mut self, bytes: &[u8], _break_len_us: u32) -> Result<(), Error> {
            self.send(bytes)
        }
        fn read(&mut self, buf: &mut [u8], _wait_ms: u32) -> Result<usize, Error> {
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
        fn peek_byte(&mut self, _wait_ms: u32) -> Result<Option<u8>, Error> {
            Ok(self.inbox.front().copied())
        }
        fn flush(&mut self) {}
        fn wait_all_sent(&mut self) {}
        fn ready_to_read_len(&self) -> usize {
            self.inbox.len()
        }
    }

    fn command_response_bytes(cmd: u16, status: u16) -> Vec<u8> {
        let mut out = heapless::Vec::<u8, 160>::new();
        out.extend_from_slice(&protocol::CMD_HEADER).ok();
        let payload_len = (2 + 2) as u16;
        out.extend_from_slice(&payload_len.to_le_bytes()).ok();
        out.extend_from_slice(&cmd.to_le_bytes()).ok();
        out.extend_from_slice(&status.to_le_bytes()).ok();
        out.extend_from_slice(&protocol::CMD_FOOTER).ok();
        out.to_vec()
    }

    #[test]
    fn peek_then_read_sees_same_byte_first() {
        let mut port = FakePort::new(&[0xAB, 0xCD]);
        let mut channel = UartChannel::new(&mut port);
        assert_eq!(channel.peek_byte(10).unwrap(), Some(0xAB));
        let mut buf = [0u8; 2];
        let n = channel.read(&mut buf, 10).unwrap();
        assert_eq!(n, 2);
        assert_eq!(buf, [0xAB, 0xCD]);
    }

    #[test]
    fn send_command_round_trip_success() {
        let cmd = protocol::Cmd::OpenCmdMode;
        let bytes = command_response_bytes(cmd as u16 | protocol::RESPONSE_BIT, 0);
        let mut port = FakePort::new(&bytes);
        let mut channel = UartChannel::new(&mut port);
        let resp = channel.send_command(cmd, &[0x01, 0x00]).unwrap();
        assert_eq!(resp.status, 0);
    }

    #[test]
    fn send_command_propagates_nonzero_status() {
        let cmd = protocol::Cmd::ReadVersion;
        let bytes = command_response_bytes(cmd as u16 | protocol::RESPONSE_BIT, 1);
        let mut port = FakePort::new(&bytes);
        let mut channel = UartChannel::new(&mut port);
        let err = channel.send_command(cmd, &[]).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::CommandStatus(1))));
    }

    #[test]
    fn empty_config_block_touches_nothing() {
        let mut port = FakePort::new(&[]);
        let mut channel = UartChannel::new(&mut port);
        let mut block = ConfigBlock::new();
        block.end_change(&mut channel).unwrap();
        assert!(port.sent.is_empty());
    }
}
