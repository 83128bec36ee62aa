//! Error kinds shared across the acquisition stack.
//!
//! Configuration errors are raised before any state is touched, protocol
//! errors describe data coming back from the board that does not make sense,
//! and transport errors come from the USB bridge itself.

use thiserror::Error;

/// A requested setting cannot be applied.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{what} of {value} is outside the supported range {min}..={max}")]
    OutOfRange {
        what: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("Amplifier channel {0} does not exist (chips have 32 channels)")]
    ChannelOutOfRange(usize),
    #[error("Cable of {meters:.2} m needs MISO delay {delay}, the board supports at most 15")]
    CableTooLong { meters: f64, delay: u32 },
    #[error("Invalid port index: {0}")]
    InvalidPort(usize),
    #[error("Invalid stream index: {0}")]
    InvalidStream(usize),
    #[error("Unknown name: {0}")]
    UnknownName(String),
    #[error("Command sequence of {0} commands does not fit a command RAM bank")]
    SequenceLength(usize),
    #[error("Board must be stopped before it can be reconfigured")]
    Running,
    #[error("Acquisition is not streaming")]
    NotStreaming,
    #[error("Invalid DAC setting: {0}")]
    InvalidDac(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Data returned by the board is inconsistent with what was asked for.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Register {register} read back {actual:#06x}, expected {expected:#04x}")]
    RegisterMismatch { register: u8, expected: u8, actual: u16 },
    #[error("Frame {frame} has magic {found:#018x}")]
    BadMagic { frame: usize, found: u64 },
    #[error("Frame {frame} does not start {expected} bytes after the previous one")]
    BadFrameSize { frame: usize, expected: usize },
    #[error("Lost frame sync: expected timestamp {expected}, found {found}")]
    LostSync { expected: u32, found: u32 },
    #[error("Unexpected board id {board_id}, is the Rhythm bitstream loaded?")]
    WrongFirmware { board_id: u32 },
    #[error("Buffer of {got} bytes is too short, need {needed}")]
    ShortBuffer { needed: usize, got: usize },
}

/// The USB bridge failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Transport is not open")]
    NotOpen,
    #[error("Transfer error: {0}")]
    Transfer(String),
    #[error("Short read: requested {requested} frames, got {got}")]
    ShortRead { requested: usize, got: usize },
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
}

/// Any failure of the acquisition stack.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DaqError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DaqError {
    /// Errors after which the board can no longer be trusted to stream.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DaqError::Config(_))
    }
}
