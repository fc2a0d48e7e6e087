//! Error types shared across the link, tag and bus layers.
//!
//! None of these ever escape a control-loop step. Decode failures are counted
//! and logged by the component that saw them, bus failures are folded into
//! per-group health flags. Only configuration and construction hand errors
//! back to the caller.

use thiserror::Error;

/// Reasons a received or constructed status frame is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Frame did not start with `0xAA 0x55`
    #[error("sync mismatch: got {0:#04X} {1:#04X}")]
    SyncMismatch(u8, u8),
    /// XOR checksum did not match the body
    #[error("checksum mismatch: expected {expected:#04X}, found {found:#04X}")]
    ChecksumMismatch { expected: u8, found: u8 },
    /// A presence/polarity byte was neither 0 nor 1
    #[error("invalid flag byte {value:#04X} at offset {offset}")]
    InvalidFlag { offset: usize, value: u8 },
    /// Buffer was not exactly one frame long
    #[error("bad frame length {0}")]
    BadLength(usize),
}

/// Reasons a tag payload read from a jumper cable end is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("payload truncated: {0} bytes")]
    Truncated(usize),
    #[error("unknown polarity marker {0:02X?}")]
    UnknownKind([u8; 3]),
    #[error("cable id {0} out of range 1..=4")]
    CableIdOutOfRange(u8),
    #[error("tag checksum mismatch: expected {expected:#04X}, found {found:#04X}")]
    ChecksumMismatch { expected: u8, found: u8 },
}

/// Failures reported by the I2C mux / reader collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("no acknowledge from device at {0:#04X}")]
    Nack(u8),
    #[error("bus timeout")]
    Timeout,
    #[error("device fault: {0}")]
    Device(String),
}

/// Rejected timing or layout configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("debounce window ({debounce_ms} ms) must be shorter than the absence timeout ({absence_ms} ms)")]
    DebounceNotBelowAbsence { debounce_ms: u64, absence_ms: u64 },
    #[error("{0} must be non-zero")]
    Zero(&'static str),
    #[error("poll interval ({poll_ms} ms) must exceed the per-group settle budget ({settle_ms} ms)")]
    PollBelowSettle { poll_ms: u64, settle_ms: u64 },
    #[error("battery layout is empty")]
    NoBatteries,
    #[error("mux channel {0} out of range 0..=7")]
    ChannelOutOfRange(u8),
}
