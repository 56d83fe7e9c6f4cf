//! Error types for mkvmux

use thiserror::Error;

/// Result type alias for mkvmux operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mkvmux
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Container format error
    #[error("Format error: {0}")]
    Format(String),

    /// Codec bitstream error
    #[error("Codec error: {0}")]
    Codec(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unsupported feature or codec configuration
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// More data required before a frame can be produced
    #[error("Need more data")]
    NeedMoreData,

    /// Insufficient bits left in a fixed buffer
    #[error("Insufficient data: need {need} bits, have {have}")]
    InsufficientBits { need: usize, have: usize },

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration error (append mappings, split rules, track selection)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a format error
    pub fn format<S: Into<String>>(msg: S) -> Self {
        Error::Format(msg.into())
    }

    /// Create a codec error
    pub fn codec<S: Into<String>>(msg: S) -> Self {
        Error::Codec(msg.into())
    }

    /// Create an unsupported error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }
}
