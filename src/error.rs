//! Error taxonomy for the receiver.
//!
//! Mirrors §7 of the design: each per-layer failure kind is counted and
//! dropped by its own layer. Only [`Error::Transport`] is meant to
//! propagate out of the pipeline and terminate the process.

/// Receiver result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Underlying transport failed. Fatal; the pipeline aborts.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The frame source ran out of data (end of a replay capture).
    #[error("frame source closed")]
    SourceClosed,

    /// A link frame failed outer validation (short, bad CRC, ...).
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// A file-service record couldn't be parsed.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// A block's inner CRC didn't match.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Writing a reconstructed file failed.
    #[error("output error: {0}")]
    Output(String),
}

/// Outer link-frame framing failures (§4.1, §4.2).
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingError {
    /// Frame shorter than the minimum (service id + CRC).
    #[error("short frame")]
    ShortFrame,

    /// Trailing CRC-16 didn't match.
    #[error("bad crc")]
    BadCrc,

    /// A byte-stuffing escape sequence was invalid.
    #[error("bad escape sequence")]
    BadEscape,
}

/// Outcome of the LDPC outer decode (§4.8).
///
/// `Insufficient` is explicitly not an error per §7: the assembly simply
/// stays open, waiting for more blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// All `k` systematic blocks recovered, in index order.
    Recovered(Vec<Vec<u8>>),
    /// The received equations don't yet determine all unknowns.
    Insufficient,
}
