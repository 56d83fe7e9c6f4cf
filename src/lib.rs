//! mkvmux - a Matroska/WebM remuxing library written in Rust
//!
//! mkvmux reads AAC and DTS elementary streams and QuickTime/MP4
//! containers and rewrites their tracks into Matroska or WebM files,
//! with splitting, appending, chapters and tags.
//!
//! # Architecture
//!
//! The pipeline is demux, packetize, mux:
//!
//! - `demux`: input format detection, frame parsing and table building
//! - `codec`: AAC and DTS bitstream parsers shared by the demuxers
//! - `packetize`: per-track reframing and timecode normalization
//! - `mux`: EBML rendering, cluster assembly, splitting and appending
//! - `session`: the pull loop orchestrating one whole run
//! - `diag`: structured diagnostics and progress for the embedding layer
//! - `util`: common utilities and data structures

pub mod codec;
pub mod demux;
pub mod diag;
pub mod error;
pub mod mux;
pub mod packetize;
pub mod session;
pub mod util;

pub use diag::{Diag, DiagSink, Severity};
pub use error::{Error, Result};
pub use session::{CancelToken, MuxConfig, MuxReport, MuxSession, SourceConfig};

/// mkvmux version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 1;
pub const VERSION_PATCH: u32 = 0;

/// Configuration for library-level logging
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Enable verbose logging
    pub verbose: bool,
    /// Enable debug output
    pub debug: bool,
}

/// Initialize library logging with the given configuration
pub fn init(config: Config) -> Result<()> {
    if config.verbose || config.debug {
        let level = if config.debug { "debug" } else { "info" };
        tracing_subscriber::fmt()
            .with_env_filter(level)
            .try_init()
            .map_err(|e| Error::config(format!("failed to initialize logging: {}", e)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION_MAJOR, 0);
        assert_eq!(VERSION_MINOR, 1);
        assert_eq!(VERSION_PATCH, 0);
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.verbose);
        assert!(!config.debug);
    }
}
