//! Common utilities and data structures

pub mod bits;
pub mod buffer;
pub mod rational;
pub mod timestamp;

pub use bits::{BitReader, BitWriter};
pub use buffer::{Buffer, ByteAccumulator};
pub use rational::Rational;
pub use timestamp::{Timecode, Timescale, NSECS_PER_SEC};

use std::fmt;

/// Common media types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// Video stream
    Video,
    /// Audio stream
    Audio,
    /// Subtitle stream
    Subtitle,
    /// Unknown stream type
    Unknown,
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Video => write!(f, "video"),
            MediaType::Audio => write!(f, "audio"),
            MediaType::Subtitle => write!(f, "subtitle"),
            MediaType::Unknown => write!(f, "unknown"),
        }
    }
}
