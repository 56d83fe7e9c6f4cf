//! Input format detection and demuxing
//!
//! A [`Reader`] wraps one input file and serves [`SourceFrame`]s in
//! presentation order. Container inputs (QuickTime/MP4) carry their
//! own timecodes; raw elementary streams (AAC, DTS) leave the
//! timecode unset and rely on the packetizer to re-time frames from
//! their sample counts.

pub mod aac;
pub mod dts;
pub mod qtmp4;

use crate::codec::{aac as aac_codec, dts as dts_codec, AudioParams, CodecId, Frame, VideoParams};
use crate::diag::DiagSink;
use crate::error::{Error, Result};
use crate::util::MediaType;
use std::io::{Read, Seek, SeekFrom};

/// Bytes sniffed from the head of a file for format detection
pub const PROBE_WINDOW: usize = 128 * 1024;

/// Frame runs required before a raw elementary stream is trusted
const PROBE_MIN_FRAMES: usize = 2;

/// Detected input format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    QuickTime,
    Aac,
    Dts,
}

impl std::fmt::Display for InputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputFormat::QuickTime => write!(f, "QuickTime/MP4"),
            InputFormat::Aac => write!(f, "AAC"),
            InputFormat::Dts => write!(f, "DTS"),
        }
    }
}

/// Sniff the format from the head of a file. Container detection runs
/// first; the raw-stream sync scans only get a say when no container
/// structure is present.
pub fn probe_format(data: &[u8]) -> Option<InputFormat> {
    if qtmp4::probe(data) {
        return Some(InputFormat::QuickTime);
    }
    if aac_codec::probe(data, PROBE_MIN_FRAMES) {
        return Some(InputFormat::Aac);
    }
    if dts_codec::probe(data, PROBE_MIN_FRAMES) {
        return Some(InputFormat::Dts);
    }
    None
}

/// Static description of one demuxed track
#[derive(Debug, Clone)]
pub struct TrackInfo {
    /// Track identifier, unique within its source file
    pub id: usize,
    pub media_type: MediaType,
    pub codec: CodecId,
    pub audio: Option<AudioParams>,
    pub video: Option<VideoParams>,
    /// Codec private data (AudioSpecificConfig, avcC, ...)
    pub decoder_config: Option<Vec<u8>>,
    /// Nominal frame duration in nanoseconds, when constant
    pub default_duration_ns: Option<i64>,
    /// ISO 639-2 language code, when the container stores one
    pub language: Option<String>,
}

/// One frame attributed to its source track
#[derive(Debug, Clone)]
pub struct SourceFrame {
    pub track_id: usize,
    pub frame: Frame,
}

/// Demuxer for one input file, dispatching on the detected format
pub enum Reader<R: Read + Seek> {
    QuickTime(qtmp4::QtReader<R>),
    Aac(aac::AacReader<R>),
    Dts(dts::DtsReader<R>),
}

impl<R: Read + Seek> Reader<R> {
    /// Probe and open one input. `source_idx` tags diagnostics with
    /// the file they came from.
    pub fn open(mut reader: R, source_idx: usize, diag: &mut DiagSink) -> Result<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let mut window = vec![0u8; PROBE_WINDOW];
        let mut filled = 0;
        while filled < window.len() {
            let n = reader.read(&mut window[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        window.truncate(filled);
        reader.seek(SeekFrom::Start(0))?;

        let format = probe_format(&window)
            .ok_or_else(|| Error::unsupported("unrecognized input file format"))?;
        diag.info(Some(source_idx), format!("detected {} input", format));

        match format {
            InputFormat::QuickTime => Ok(Reader::QuickTime(qtmp4::QtReader::open(
                reader, source_idx, diag,
            )?)),
            InputFormat::Aac => Ok(Reader::Aac(aac::AacReader::open(reader)?)),
            InputFormat::Dts => Ok(Reader::Dts(dts::DtsReader::open(reader)?)),
        }
    }

    /// The detected format of this input
    pub fn format(&self) -> InputFormat {
        match self {
            Reader::QuickTime(_) => InputFormat::QuickTime,
            Reader::Aac(_) => InputFormat::Aac,
            Reader::Dts(_) => InputFormat::Dts,
        }
    }

    /// Describe the tracks this input provides
    pub fn describe(&self) -> Vec<TrackInfo> {
        match self {
            Reader::QuickTime(r) => r.describe(),
            Reader::Aac(r) => vec![r.describe()],
            Reader::Dts(r) => vec![r.describe()],
        }
    }

    /// Next frame in presentation order, or `None` at end of input
    pub fn read_next(&mut self) -> Result<Option<SourceFrame>> {
        match self {
            Reader::QuickTime(r) => r.read_next(),
            Reader::Aac(r) => r.read_next(),
            Reader::Dts(r) => r.read_next(),
        }
    }

    /// (consumed, total) bytes for progress reporting
    pub fn progress(&self) -> (u64, u64) {
        match self {
            Reader::QuickTime(r) => r.progress(),
            Reader::Aac(r) => r.progress(),
            Reader::Dts(r) => r.progress(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_format_rejects_noise() {
        let data = [0x55u8; 1024];
        assert_eq!(probe_format(&data), None);
    }

    #[test]
    fn test_probe_format_quicktime_wins_over_sync_noise() {
        // A valid ftyp head must not be mistaken for an elementary
        // stream even if sync-like bytes follow
        let mut data = Vec::new();
        data.extend_from_slice(&16u32.to_be_bytes());
        data.extend_from_slice(b"ftyp");
        data.extend_from_slice(b"qt  \0\0\0\0");
        data.extend_from_slice(&[0xFF, 0xF1, 0x50, 0x80, 0x01, 0x00]);
        assert_eq!(probe_format(&data), Some(InputFormat::QuickTime));
    }
}
