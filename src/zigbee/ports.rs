//! Port traits — the hexagonal boundary between the domain core and every
//! external collaborator: the UART-attached radar, GPIO-level peripherals,
//! the Zigbee stack's scheduler/attribute store/ZCL dispatch, the status
//! LED, and persisted storage.
//!
//! `adapters/` holds the concrete implementations (simulation backends for
//! host tests, `#[cfg(target_os = "espidf")]` FFI-backed ones for real
//! hardware). The core never reaches past these traits.

use crate::error::{ConfigError, Error, StorageError};

// ---------------------------------------------------------------------------
// C2 — UART channel to the LD2412
// ---------------------------------------------------------------------------

/// Byte-level transport to the radar module. One implementation wraps
/// `esp-idf-hal`'s UART driver; another is an in-memory byte pipe for tests.
pub trait UartPort {
    fn send(&mut self, bytes: &[u8]) -> Result<(), Error>;
    fn send_with_break(&mut self, bytes: &[u8], break_len_us: u32) -> Result<(), Error>;
    /// Reads up to `buf.len()` bytes, blocking up to `wait_ms`. Returns the
    /// number of bytes actually read (may be fewer than requested).
    fn read(&mut self, buf: &mut [u8], wait_ms: u32) -> Result<usize, Error>;
    /// Returns the cached or next byte, blocking up to `wait_ms`.
    fn peek_byte(&mut self, wait_ms: u32) -> Result<Option<u8>, Error>;
    fn flush(&mut self);
    fn wait_all_sent(&mut self);
    fn ready_to_read_len(&self) -> usize;
}

// ---------------------------------------------------------------------------
// GPIO level inputs (radar presence pin, PIR pin) — ISRs post edges to the
// fast queue directly; this trait only backs startup-time level reads.
// ---------------------------------------------------------------------------

pub trait GpioPort {
    fn read_radar_presence_level(&self) -> bool;
    fn read_pir_presence_level(&self) -> bool;
}

// ---------------------------------------------------------------------------
// C1 — scheduler primitive behind the alarm pool
// ---------------------------------------------------------------------------

pub trait SchedulerPort {
    fn register_alarm(&mut self, handle: u8, delay_ms: u32);
    fn cancel_alarm(&mut self, handle: u8);
    /// Perform a full device restart. Never returns.
    fn restart_device(&mut self) -> !;
}

// ---------------------------------------------------------------------------
// C6 / C7 — outgoing Zigbee commands
// ---------------------------------------------------------------------------

/// Address of a remote actuator endpoint, as recorded in a bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindTarget {
    pub ieee_addr: u64,
    pub short_addr: u16,
    pub endpoint: u8,
}

/// Every outbound ZCL exchange the core needs to make, funneled through one
/// trait so [`crate::command_engine::CommandEngine`] has a single dispatch
/// surface. Each `send_*` call is fire-and-forget from the core's point of
/// view: it returns the sequence number the stack assigned, and the
/// eventual send-status/response arrive later as
/// [`ZigbeeInboundEvent`]s fed back through `CommandEngine::on_send_status`
/// / `on_response`.
pub trait ZigbeeCommandPort {
    fn send_on(&mut self, target: BindTarget) -> Result<u8, Error>;
    fn send_off(&mut self, target: BindTarget) -> Result<u8, Error>;
    fn send_on_with_timed_off(&mut self, target: BindTarget, on_time_ds: u16) -> Result<u8, Error>;
    fn send_mgmt_bind_req(&mut self, target: BindTarget) -> Result<u8, Error>;
    fn send_bind_to_me(&mut self, target: BindTarget) -> Result<u8, Error>;
    fn send_read_reporting_config(&mut self, target: BindTarget) -> Result<u8, Error>;
    fn send_configure_report(&mut self, target: BindTarget) -> Result<u8, Error>;
    fn send_read_on_off_attribute(&mut self, target: BindTarget) -> Result<u8, Error>;
    fn send_unbind(&mut self, target: BindTarget) -> Result<u8, Error>;
}

/// Payload riding along with a correlated response, kept deliberately small
/// — every response this firmware cares about reduces to "it worked" plus
/// at most one boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsePayload {
    None,
    Bool(bool),
}

/// An inbound signal from the Zigbee stack thread that the core reacts to
/// but never originates. Delivered through the manager/fast-queue style
/// plain channel described in spec §5 for the reset-button thread, applied
/// here to every Zigbee-stack callback.
#[derive(Debug, Clone, Copy)]
pub enum ZigbeeInboundEvent {
    /// A send-status callback fired for `sequence_number`.
    SendStatus { sequence_number: u8, success: bool },
    /// A response arrived correlated by (cluster, command id).
    Response { cluster: u16, command_id: u16, source: BindTarget, success: bool, payload: ResponsePayload },
    /// APSDE.indication observed a Bind or Unbind addressed to our On/Off
    /// cluster — triggers a binding-table re-scan per spec §4.7/§4.8.
    ApsBindChange,
    /// The on/off server cluster received an inbound command.
    ExternalOnOff(ExternalOnOffCommand),
    /// An attribute write landed on one of our custom cluster attributes,
    /// or on the On/Off/Occupancy server attributes exposed to clients.
    AttributeWrite(AttributeWrite),
    /// IAS-Zone status changed; bit 0 carries alarm1 (occupancy-like).
    IasZoneStatusChanged { bit0_alarm: bool },
    /// A bound actuator reported its own On/Off attribute (used for
    /// already-on suppression).
    BoundDeviceOnOffReport { source: BindTarget, on: bool },
    /// An illuminance measurement report arrived from the client cluster.
    IlluminanceReport { raw: u16 },
}

#[derive(Debug, Clone, Copy)]
pub enum ExternalOnOffCommand {
    On,
    Off,
    OnWithTimedOff { on_time_ds: u16 },
}

#[derive(Debug, Clone, Copy)]
pub enum AttributeWrite {
    OnOffTimeoutSecs(u16),
    ExternalOnOffTimeoutSecs(u16),
    OnOffMode(u8),
    PresenceDetectionConfig(u8),
    IlluminanceThreshold(u8),
    RadarMode(u8),
    ExternalPresence(bool),
}

// ---------------------------------------------------------------------------
// Attribute reporting (core -> Zigbee attribute store)
// ---------------------------------------------------------------------------

/// Push-only: the core reports changed attribute values; reads of
/// coordinator-writable attributes arrive as [`AttributeWrite`] events
/// instead, since the attribute store itself lives in the (external)
/// Zigbee stack.
pub trait ZigbeeAttributePort {
    fn report_occupancy(&mut self, occupied: bool);
    fn report_pir_presence(&mut self, present: bool);
    fn report_engineering_light(&mut self, light: u8);
    fn report_failure_status(&mut self, status: u16);
    fn report_internals(&mut self, internals: u32);
    fn report_internals2(&mut self, internals2: u32);
    fn report_internals3(&mut self, internals3: u32);
    fn report_restarts_count(&mut self, count: u16);
    fn report_armed_for_trigger(&mut self, armed: bool);
}

// ---------------------------------------------------------------------------
// Status LED (external collaborator, driven only through this interface)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedPattern {
    Idle,
    StackStartupFailure,
    NetworkSteeringFailure,
    CommandFailure,
    Off,
}

pub trait LedIndicatorPort {
    fn set_pattern(&mut self, pattern: LedPattern);
}

// ---------------------------------------------------------------------------
// Persisted configuration + generic storage
// ---------------------------------------------------------------------------

pub trait ConfigPort {
    fn load(&self) -> Result<crate::config::LocalConfig, ConfigError>;
    fn save(&mut self, config: &crate::config::LocalConfig) -> Result<(), ConfigError>;
}

pub trait StoragePort {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ---------------------------------------------------------------------------
// Diagnostics / notification sink
// ---------------------------------------------------------------------------

pub trait EventSink {
    fn emit(&mut self, event: &crate::service::Notification);
}
