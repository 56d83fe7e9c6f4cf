//! Codec frame parsers and shared frame model

pub mod aac;
pub mod dts;

use crate::util::{Buffer, MediaType, Rational, Timecode};

/// Codec identifier for a parsed track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    Aac,
    Dts,
    Pcm,
    H264,
    Mpeg4Part2,
    Other(u32),
}

impl CodecId {
    /// Matroska codec id string for this codec
    pub fn matroska_id(&self) -> &'static str {
        match self {
            CodecId::Aac => "A_AAC",
            CodecId::Dts => "A_DTS",
            CodecId::Pcm => "A_PCM/INT/LIT",
            CodecId::H264 => "V_MPEG4/ISO/AVC",
            CodecId::Mpeg4Part2 => "V_MPEG4/ISO/ASP",
            CodecId::Other(_) => "V_QUICKTIME",
        }
    }

    /// Whether this codec may appear in a webm doc type
    pub fn webm_compatible(&self) -> bool {
        // None of the codecs this crate demuxes are valid in webm;
        // the muxer downgrades the doc type with a diagnostic.
        false
    }
}

/// Audio stream parameters carried by a frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParams {
    pub sample_rate: u32,
    pub channels: u8,
    pub bit_depth: Option<u8>,
    /// Output sample rate when SBR doubles it
    pub output_sample_rate: Option<u32>,
}

/// Video stream parameters carried by a frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub fps: Rational,
}

/// Descriptor attached to every parsed frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameHeader {
    pub codec: CodecId,
    pub media_type: MediaType,
    pub audio: Option<AudioParams>,
    pub video: Option<VideoParams>,
    /// Codec profile / object type where the bitstream declares one
    pub profile: Option<u8>,
}

impl FrameHeader {
    /// Header for an audio codec
    pub fn audio(codec: CodecId, params: AudioParams) -> Self {
        FrameHeader {
            codec,
            media_type: MediaType::Audio,
            audio: Some(params),
            video: None,
            profile: None,
        }
    }

    /// Header for a video codec
    pub fn video(codec: CodecId, params: VideoParams) -> Self {
        FrameHeader {
            codec,
            media_type: MediaType::Video,
            audio: None,
            video: Some(params),
            profile: None,
        }
    }
}

/// A parsed elementary frame. Immutable once emitted by a parser.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub data: Buffer,
    /// Byte offset of the frame in the source stream
    pub stream_offset: u64,
    pub timecode: Timecode,
    /// Duration in nanoseconds; zero when the source does not say
    pub duration: i64,
    pub keyframe: bool,
}

/// Result of a streaming header probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderStatus {
    /// A valid header was found at the current position
    Success,
    /// No valid header in the buffered data
    Failure,
    /// Not enough buffered data to decide
    NeedMoreData,
}
