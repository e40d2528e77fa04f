//! Persisted local configuration.
//!
//! A single `serde`-derived struct saved as one blob; the on-disk format
//! additionally carries an explicit format version ahead of the struct,
//! because `postcard` alone does not version its wire format.
//! [`LocalConfig::decode`] handles the version check and falls back to
//! defaults (preserving nothing) on mismatch: a mismatch reformats rather
//! than attempting a field-by-field migration.

use serde::{Deserialize, Serialize};

/// Current on-disk format version. Bump when `LocalConfig`'s shape changes.
pub const FORMAT_VERSION: u32 = 1;

/// Maximum number of bind slots with persisted reporting-capability state.
pub const MAX_BINDS: usize = 6;

// ---------------------------------------------------------------------------
// On/off policy
// ---------------------------------------------------------------------------

/// How a Clear↔Present edge drives the bound on/off client cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnOffMode {
    /// Never dispatch on/off commands.
    Nothing,
    /// Clear→Present dispatches On; Present→Clear does nothing.
    OnOnly,
    /// Present→Clear dispatches Off; Clear→Present does nothing.
    OffOnly,
    /// Clear→Present dispatches On, Present→Clear dispatches Off.
    OnOff,
    /// Clear→Present dispatches `OnWithTimedOff(timeout)`; no separate Off.
    TimedOn,
    /// Clear→Present dispatches On and (re-)arms a local timer that sends
    /// Off on expiry if presence has since cleared.
    TimedOnLocal,
}

impl Default for OnOffMode {
    fn default() -> Self {
        Self::OnOff
    }
}

/// Which sources may trigger (edge) or sustain (keep) fused presence.
/// Packed as 6 bits: edge.{mm,pir,ext} then keep.{mm,pir,ext}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PresenceDetectionConfig {
    pub edge_mm: bool,
    pub edge_pir: bool,
    pub edge_ext: bool,
    pub keep_mm: bool,
    pub keep_pir: bool,
    pub keep_ext: bool,
}

impl PresenceDetectionConfig {
    /// Default: mmWave is both an edge and keep source; PIR and external
    /// are disabled until the coordinator opts them in.
    pub fn mmwave_only() -> Self {
        Self {
            edge_mm: true,
            keep_mm: true,
            ..Default::default()
        }
    }

    /// Pack into the `presence-detection-config` Zigbee attribute's wire
    /// bitfield (edge.{mm,pir,ext} then keep.{mm,pir,ext}).
    pub fn to_bits(self) -> u8 {
        (self.edge_mm as u8)
            | (self.edge_pir as u8) << 1
            | (self.edge_ext as u8) << 2
            | (self.keep_mm as u8) << 3
            | (self.keep_pir as u8) << 4
            | (self.keep_ext as u8) << 5
    }

    pub fn from_bits(bits: u8) -> Self {
        Self {
            edge_mm: bits & 0b0000_0001 != 0,
            edge_pir: bits & 0b0000_0010 != 0,
            edge_ext: bits & 0b0000_0100 != 0,
            keep_mm: bits & 0b0000_1000 != 0,
            keep_pir: bits & 0b0001_0000 != 0,
            keep_ext: bits & 0b0010_0000 != 0,
        }
    }
}

/// Per-bind reporting-capability tri-state, persisted across reboots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriState {
    Undefined,
    True,
    False,
}

impl Default for TriState {
    fn default() -> Self {
        Self::Undefined
    }
}

impl TriState {
    /// 2-bit encoding: 00 = Undefined, 01 = True, 10 = False.
    pub fn to_bits(self) -> u8 {
        match self {
            Self::Undefined => 0b00,
            Self::True => 0b01,
            Self::False => 0b10,
        }
    }

    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b01 => Self::True,
            0b10 => Self::False,
            _ => Self::Undefined,
        }
    }
}

// ---------------------------------------------------------------------------
// LocalConfig
// ---------------------------------------------------------------------------

/// Every persisted tunable for the node, written synchronously on every
/// setter and incremented-and-rewritten on every boot (`restart_count`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Local on/off re-arm timeout, seconds (0 disables the local timer).
    pub on_off_timeout_secs: u16,
    /// External on/off-cluster timer, seconds (0 disables the external timer).
    pub external_on_off_timeout_secs: u16,
    pub on_off_mode: OnOffMode,
    pub presence_detection: PresenceDetectionConfig,
    /// Radar system mode mirrored from the last `ConfigBlock` applied.
    pub radar_mode: crate::ld2412::protocol::SystemMode,
    /// 0..255; 255 disables illuminance-based suppression.
    pub illuminance_threshold: u8,
    pub restart_count: u32,
    /// Reporting-capability tri-state, indexed by bind slot.
    pub bind_reporting_capability: [TriState; MAX_BINDS],
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            on_off_timeout_secs: 10,
            external_on_off_timeout_secs: 0,
            on_off_mode: OnOffMode::default(),
            presence_detection: PresenceDetectionConfig::mmwave_only(),
            radar_mode: crate::ld2412::protocol::SystemMode::Simple,
            illuminance_threshold: 255,
            restart_count: 0,
            bind_reporting_capability: [TriState::Undefined; MAX_BINDS],
        }
    }
}

/// Every field of `LocalConfig` is already range-total (enums, or `u8`/`u16`
/// with no invalid bit patterns), so there is nothing to reject here beyond
/// what the type system already guarantees. Kept as a named hook for the
/// Zigbee attribute-write path, which narrows `u16`/`u8` wire values before
/// they reach this struct.
fn validate(_cfg: &LocalConfig) -> Result<(), crate::error::ConfigError> {
    Ok(())
}

impl LocalConfig {
    /// Decode a `config.dat` blob: 4-byte LE version prefix, then the
    /// postcard-encoded struct. A version mismatch or corrupt body returns
    /// `Err(Corrupted)` — the caller reformats with defaults, per spec §6.
    pub fn decode(bytes: &[u8]) -> Result<Self, crate::error::ConfigError> {
        if bytes.len() < 4 {
            return Err(crate::error::ConfigError::Corrupted);
        }
        let version = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if version != FORMAT_VERSION {
            return Err(crate::error::ConfigError::Corrupted);
        }
        let cfg: Self =
            postcard::from_bytes(&bytes[4..]).map_err(|_| crate::error::ConfigError::Corrupted)?;
        validate(&cfg)?;
        Ok(cfg)
    }

    /// Encode with the version prefix. Validates before serializing so a
    /// rejected write never reaches storage half-applied.
    pub fn encode(&self) -> Result<heapless::Vec<u8, 256>, crate::error::ConfigError> {
        validate(self)?;
        let mut out = heapless::Vec::new();
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes())
            .map_err(|()| crate::error::ConfigError::StorageFull)?;
        let body: heapless::Vec<u8, 192> =
            postcard::to_vec(self).map_err(|_| crate::error::ConfigError::IoError)?;
        out.extend_from_slice(&body)
            .map_err(|()| crate::error::ConfigError::StorageFull)?;
        Ok(out)
    }
}
