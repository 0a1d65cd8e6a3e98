use thiserror::Error;

use crate::codec::CodecError;
use crate::writer::WriterState;

/// Errors raised by the multiplexer, the demultiplexer and the block codec.
#[derive(Error, Debug)]
pub enum Error {
    /// Underlying I/O errors from the byte sink or source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A block could not be serialized.
    #[error("Block encoding failed: {0}")]
    Encode(String),

    /// Bytes were available but did not form a well-formed block.
    #[error("Malformed block: {0}")]
    Decode(String),

    /// A writer operation was called outside its allowed state.
    #[error("Operation `{operation}` is not valid in writer state {state:?}")]
    InvalidState { operation: &'static str, state: WriterState },

    /// A block of unexpected kind or position for the part state machine.
    #[error("Invalid block{}: {message}", part_suffix(.part))]
    InvalidBlock { part: Option<usize>, message: String },

    /// The plaintext of a part does not match its END block.
    #[error("Integrity check failed on part {part}: {failure}")]
    Integrity { part: usize, failure: IntegrityFailure },

    /// The container ended inside a part, before its END block.
    #[error("Unexpected end of container inside part {part}")]
    UnexpectedEof { part: usize },

    /// The next part was requested before the previous one reached its END block.
    #[error("Part {part} was not fully drained before advancing the container")]
    PartNotDrained { part: usize },

    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedHashAlgorithm(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Why a part failed its integrity check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityFailure {
    #[error("digest mismatch: expected {expected}, calculated {calculated}")]
    DigestMismatch { expected: String, calculated: String },

    #[error("a hash algorithm was declared but the END block carries no digest")]
    MissingDigest,

    #[error("size mismatch: declared {declared} bytes, read {actual}")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("a data block could not be decompressed: {reason}")]
    Undecodable { reason: String },
}

impl Error {
    pub fn invalid_block(part: Option<usize>, message: impl Into<String>) -> Self {
        Self::InvalidBlock { part, message: message.into() }
    }

    pub fn invalid_state(operation: &'static str, state: WriterState) -> Self {
        Self::InvalidState { operation, state }
    }

    pub fn digest_mismatch(part: usize, expected: &[u8], calculated: &[u8]) -> Self {
        Self::Integrity {
            part,
            failure: IntegrityFailure::DigestMismatch {
                expected:   hex::encode(expected),
                calculated: hex::encode(calculated),
            },
        }
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, Error::Integrity { .. })
    }
}

fn part_suffix(part: &Option<usize>) -> String {
    match part {
        Some(p) => format!(" in part {p}"),
        None    => String::new(),
    }
}

/// Result type alias for the library operations.
pub type Result<T> = std::result::Result<T, Error>;
