//! Error types for softplayer
//!
//! This module defines the error taxonomy of the playback pipeline. We use
//! thiserror for the library error types and anyhow for application-level
//! error handling in the binary and integration tests.

use crate::player::PlayerState;
use thiserror::Error;

/// Main error type for softplayer
#[derive(Error, Debug)]
pub enum PlayerError {
    /// I/O failure while reading the encoded byte stream
    #[error("Stream error: {0}")]
    Stream(#[from] std::io::Error),

    /// Malformed or corrupt bitstream
    #[error("Decode error at byte {offset}: {cause}")]
    Decode {
        /// Absolute offset into the stream where the problem starts
        offset: u64,

        /// What was wrong with the bytes found there
        cause: DecodeCause,
    },

    /// A blocking wait was interrupted by stop() or destroy()
    #[error("Playback cancelled")]
    Cancelled,

    /// The requested operation is not allowed from the current state
    #[error("Cannot {action} while {from:?}")]
    InvalidTransition {
        from: PlayerState,
        action: &'static str,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error for unexpected situations
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a bitstream was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeCause {
    #[error("missing YUV4MPEG2 signature")]
    BadSignature,

    #[error("stream header has no {0} tag")]
    MissingDimension(char),

    #[error("invalid header tag '{0}'")]
    InvalidTag(String),

    #[error("unsupported colorspace '{0}'")]
    UnsupportedColorspace(String),

    #[error("invalid picture size {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("header line longer than {0} bytes")]
    HeaderTooLong(usize),

    #[error("unexpected token '{0}' where a picture was expected")]
    UnexpectedToken(String),

    #[error("stream ended in the middle of a header or picture")]
    UnexpectedEof,
}

impl PlayerError {
    /// Create a decode error at the given stream offset
    pub fn decode(offset: u64, cause: DecodeCause) -> Self {
        PlayerError::Decode { offset, cause }
    }

    /// Whether this is the internal stop/destroy signal rather than a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PlayerError::Cancelled)
    }

    /// Stream offset of a decode error
    pub fn offset(&self) -> Option<u64> {
        match self {
            PlayerError::Decode { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

/// Convenience type alias for Results in softplayer
pub type Result<T> = std::result::Result<T, PlayerError>;

/// Helper macro for creating internal errors with file and line information
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::utils::error::PlayerError::Internal(
            format!("{} at {}:{}", $msg, file!(), line!())
        )
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::utils::error::PlayerError::Internal(
            format!("{} at {}:{}", format!($fmt, $($arg)*), file!(), line!())
        )
    };
}
