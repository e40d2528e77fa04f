//! Unified error types for the presence-node firmware.
//!
//! Follows embedded best practice: a single `Error` enum that every
//! subsystem can convert into, keeping the top-level control loop's error
//! handling uniform. All variants are `Copy` so they can be cheaply passed
//! through the command engine and bind state machine without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The UART channel to the radar failed (read timeout, short read).
    Uart(UartError),
    /// The LD2412 framed protocol failed (bad header/footer/length/check).
    Protocol(ProtocolError),
    /// An outgoing Zigbee command exhausted its retry budget.
    Command(CommandError),
    /// A bind-lifecycle step failed.
    Bind(BindError),
    /// Persisted configuration is invalid or could not be loaded.
    Config(ConfigError),
    /// Peripheral or subsystem initialisation failed.
    Init(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uart(e) => write!(f, "uart: {e}"),
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::Command(e) => write!(f, "command: {e}"),
            Self::Bind(e) => write!(f, "bind: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Init(msg) => write!(f, "init: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// UART channel errors (C2)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartError {
    /// Read returned fewer bytes than requested before `wait_ms` elapsed.
    SendFrameIncomplete,
    /// Frame scan did not collect a full frame before the retry budget ran out.
    RecvFrameIncomplete,
    /// Underlying driver reported an I/O fault.
    DriverFault,
}

impl fmt::Display for UartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SendFrameIncomplete => write!(f, "send frame incomplete"),
            Self::RecvFrameIncomplete => write!(f, "recv frame incomplete"),
            Self::DriverFault => write!(f, "driver fault"),
        }
    }
}

impl From<UartError> for Error {
    fn from(e: UartError) -> Self {
        Self::Uart(e)
    }
}

// ---------------------------------------------------------------------------
// LD2412 protocol errors (C3)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Header, footer, length, or check byte did not match what was expected.
    /// The field identifies which step of the scan failed.
    RecvFrameMalformed(FrameStep),
    /// A command's response carried a non-zero status code.
    CommandStatus(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStep {
    Header,
    Length,
    Mode,
    ReportBegin,
    Payload,
    ReportEnd,
    Check,
    Footer,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecvFrameMalformed(step) => write!(f, "malformed frame at {step:?}"),
            Self::CommandStatus(code) => write!(f, "command status {code}"),
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

// ---------------------------------------------------------------------------
// Outgoing command engine errors (C6)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// `Send()` was called while a previous attempt was still in flight.
    AlreadyInFlight,
    /// Retry budget exhausted without a successful response.
    TotalFailure,
    /// No free alarm slot was available to arm the response-deadline timer.
    NoAlarmSlot,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInFlight => write!(f, "command already in flight"),
            Self::TotalFailure => write!(f, "retry budget exhausted"),
            Self::NoAlarmSlot => write!(f, "no free alarm slot"),
        }
    }
}

impl From<CommandError> for Error {
    fn from(e: CommandError) -> Self {
        Self::Command(e)
    }
}

// ---------------------------------------------------------------------------
// Bind lifecycle errors (C7)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindError {
    /// A step's timeout/retry budget (`kMaxConfigAttempts`) was exhausted.
    StepTimedOut,
    /// The bind arena has no free slot for a new record (7th+ bind).
    PoolExhausted,
    /// Operation referenced a bind index that is no longer live.
    StaleIndex,
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StepTimedOut => write!(f, "bind step timed out"),
            Self::PoolExhausted => write!(f, "bind pool exhausted"),
            Self::StaleIndex => write!(f, "stale bind index"),
        }
    }
}

impl From<BindError> for Error {
    fn from(e: BindError) -> Self {
        Self::Bind(e)
    }
}

// ---------------------------------------------------------------------------
// Config/storage errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed integrity / deserialization check, or its
    /// version prefix does not match the current format.
    Corrupted,
    /// A config field failed range validation.
    ValidationFailed(&'static str),
    /// Underlying storage is full.
    StorageFull,
    /// Generic I/O error from the storage backend.
    IoError,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Errors from [`crate::zigbee::ports::StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    NotFound,
    Full,
    IoError,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
