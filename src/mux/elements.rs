//! Matroska element IDs and header-level element rendering
//!
//! IDs are written exactly as registered, including their length
//! marker bits. Only the elements this muxer emits are listed.

use crate::codec::CodecId;
use crate::demux::TrackInfo;
use crate::error::Result;
use crate::mux::ebml::{
    binary_element, float_element, master_element, string_element, uint_element, void_element,
};
use crate::util::MediaType;
use serde::{Deserialize, Serialize};

// EBML header
pub const ID_EBML: u32 = 0x1A45DFA3;
pub const ID_EBML_VERSION: u32 = 0x4286;
pub const ID_EBML_READ_VERSION: u32 = 0x42F7;
pub const ID_EBML_MAX_ID_LENGTH: u32 = 0x42F2;
pub const ID_EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
pub const ID_DOCTYPE: u32 = 0x4282;
pub const ID_DOCTYPE_VERSION: u32 = 0x4287;
pub const ID_DOCTYPE_READ_VERSION: u32 = 0x4285;

// Segment and seeking
pub const ID_SEGMENT: u32 = 0x18538067;
pub const ID_SEEK_HEAD: u32 = 0x114D9B74;
pub const ID_SEEK: u32 = 0x4DBB;
pub const ID_SEEK_ID: u32 = 0x53AB;
pub const ID_SEEK_POSITION: u32 = 0x53AC;

// Segment information
pub const ID_INFO: u32 = 0x1549A966;
pub const ID_TIMECODE_SCALE: u32 = 0x2AD7B1;
pub const ID_MUXING_APP: u32 = 0x4D80;
pub const ID_WRITING_APP: u32 = 0x5741;
pub const ID_DURATION: u32 = 0x4489;
pub const ID_TITLE: u32 = 0x7BA9;
pub const ID_SEGMENT_UID: u32 = 0x73A4;
pub const ID_PREV_UID: u32 = 0x3CB923;
pub const ID_NEXT_UID: u32 = 0x3EB923;

// Tracks
pub const ID_TRACKS: u32 = 0x1654AE6B;
pub const ID_TRACK_ENTRY: u32 = 0xAE;
pub const ID_TRACK_NUMBER: u32 = 0xD7;
pub const ID_TRACK_UID: u32 = 0x73C5;
pub const ID_TRACK_TYPE: u32 = 0x83;
pub const ID_FLAG_LACING: u32 = 0x9C;
pub const ID_LANGUAGE: u32 = 0x22B59C;
pub const ID_CODEC_ID: u32 = 0x86;
pub const ID_CODEC_PRIVATE: u32 = 0x63A2;
pub const ID_DEFAULT_DURATION: u32 = 0x23E383;
pub const ID_VIDEO: u32 = 0xE0;
pub const ID_PIXEL_WIDTH: u32 = 0xB0;
pub const ID_PIXEL_HEIGHT: u32 = 0xBA;
pub const ID_AUDIO: u32 = 0xE1;
pub const ID_SAMPLING_FREQUENCY: u32 = 0xB5;
pub const ID_OUTPUT_SAMPLING_FREQUENCY: u32 = 0x78B5;
pub const ID_CHANNELS: u32 = 0x9F;
pub const ID_BIT_DEPTH: u32 = 0x6264;

// Clusters
pub const ID_CLUSTER: u32 = 0x1F43B675;
pub const ID_CLUSTER_TIMECODE: u32 = 0xE7;
pub const ID_SIMPLE_BLOCK: u32 = 0xA3;
pub const ID_BLOCK_GROUP: u32 = 0xA0;
pub const ID_BLOCK: u32 = 0xA1;
pub const ID_BLOCK_DURATION: u32 = 0x9B;

// Cues
pub const ID_CUES: u32 = 0x1C53BB6B;
pub const ID_CUE_POINT: u32 = 0xBB;
pub const ID_CUE_TIME: u32 = 0xB3;
pub const ID_CUE_TRACK_POSITIONS: u32 = 0xB7;
pub const ID_CUE_TRACK: u32 = 0xF7;
pub const ID_CUE_CLUSTER_POSITION: u32 = 0xF1;

// Chapters
pub const ID_CHAPTERS: u32 = 0x1043A770;
pub const ID_EDITION_ENTRY: u32 = 0x45B9;
pub const ID_EDITION_UID: u32 = 0x45BC;
pub const ID_EDITION_FLAG_DEFAULT: u32 = 0x45DB;
pub const ID_EDITION_FLAG_HIDDEN: u32 = 0x45BD;
pub const ID_CHAPTER_ATOM: u32 = 0xB6;
pub const ID_CHAPTER_UID: u32 = 0x73C4;
pub const ID_CHAPTER_TIME_START: u32 = 0x91;
pub const ID_CHAPTER_TIME_END: u32 = 0x92;
pub const ID_CHAPTER_FLAG_HIDDEN: u32 = 0x98;
pub const ID_CHAPTER_FLAG_ENABLED: u32 = 0x4598;
pub const ID_CHAPTER_DISPLAY: u32 = 0x80;
pub const ID_CHAP_STRING: u32 = 0x85;
pub const ID_CHAP_LANGUAGE: u32 = 0x437C;

// Tags
pub const ID_TAGS: u32 = 0x1254C367;
pub const ID_TAG: u32 = 0x7373;
pub const ID_TARGETS: u32 = 0x63C0;
pub const ID_TARGET_TYPE_VALUE: u32 = 0x68CA;
pub const ID_TAG_TRACK_UID: u32 = 0x63C5;
pub const ID_SIMPLE_TAG: u32 = 0x67C8;
pub const ID_TAG_NAME: u32 = 0x45A3;
pub const ID_TAG_STRING: u32 = 0x4487;
pub const ID_TAG_LANGUAGE: u32 = 0x447A;

/// Output document type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DocType {
    #[default]
    Matroska,
    Webm,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Matroska => "matroska",
            DocType::Webm => "webm",
        }
    }
}

/// Matroska track type codes
fn track_type_code(media: MediaType) -> u64 {
    match media {
        MediaType::Video => 1,
        MediaType::Audio => 2,
        MediaType::Subtitle => 17,
        MediaType::Unknown => 0,
    }
}

/// Render the EBML document header
pub fn render_ebml_header(doctype: DocType) -> Vec<u8> {
    let mut body = Vec::new();
    uint_element(&mut body, ID_EBML_VERSION, 1);
    uint_element(&mut body, ID_EBML_READ_VERSION, 1);
    uint_element(&mut body, ID_EBML_MAX_ID_LENGTH, 4);
    uint_element(&mut body, ID_EBML_MAX_SIZE_LENGTH, 8);
    string_element(&mut body, ID_DOCTYPE, doctype.as_str());
    uint_element(&mut body, ID_DOCTYPE_VERSION, 4);
    uint_element(&mut body, ID_DOCTYPE_READ_VERSION, 2);

    let mut out = Vec::new();
    master_element(&mut out, ID_EBML, &body);
    out
}

/// Everything needed to render one TrackEntry
#[derive(Debug, Clone)]
pub struct TrackSpec {
    pub number: u64,
    pub uid: u64,
    pub info: TrackInfo,
}

/// Render one TrackEntry element body
fn render_track_entry(spec: &TrackSpec) -> Vec<u8> {
    let info = &spec.info;
    let mut body = Vec::new();
    uint_element(&mut body, ID_TRACK_NUMBER, spec.number);
    uint_element(&mut body, ID_TRACK_UID, spec.uid);
    uint_element(&mut body, ID_TRACK_TYPE, track_type_code(info.media_type));
    uint_element(&mut body, ID_FLAG_LACING, 0);
    string_element(
        &mut body,
        ID_LANGUAGE,
        info.language.as_deref().unwrap_or("und"),
    );
    string_element(&mut body, ID_CODEC_ID, info.codec.matroska_id());
    if let Some(private) = &info.decoder_config {
        binary_element(&mut body, ID_CODEC_PRIVATE, private);
    }
    if let Some(dur) = info.default_duration_ns {
        if dur > 0 {
            uint_element(&mut body, ID_DEFAULT_DURATION, dur as u64);
        }
    }
    if let Some(video) = info.video {
        let mut v = Vec::new();
        uint_element(&mut v, ID_PIXEL_WIDTH, video.width as u64);
        uint_element(&mut v, ID_PIXEL_HEIGHT, video.height as u64);
        master_element(&mut body, ID_VIDEO, &v);
    }
    if let Some(audio) = info.audio {
        let mut a = Vec::new();
        float_element(&mut a, ID_SAMPLING_FREQUENCY, audio.sample_rate as f64);
        if let Some(osr) = audio.output_sample_rate {
            float_element(&mut a, ID_OUTPUT_SAMPLING_FREQUENCY, osr as f64);
        }
        uint_element(&mut a, ID_CHANNELS, audio.channels as u64);
        if let Some(depth) = audio.bit_depth {
            uint_element(&mut a, ID_BIT_DEPTH, depth as u64);
        }
        master_element(&mut body, ID_AUDIO, &a);
    }
    body
}

/// Render the full Tracks element
pub fn render_tracks(specs: &[TrackSpec]) -> Vec<u8> {
    let mut body = Vec::new();
    for spec in specs {
        let entry = render_track_entry(spec);
        master_element(&mut body, ID_TRACK_ENTRY, &entry);
    }
    let mut out = Vec::new();
    master_element(&mut out, ID_TRACKS, &body);
    out
}

/// Reject tracks a WebM output may not carry
pub fn webm_check(specs: &[TrackSpec]) -> Option<CodecId> {
    specs
        .iter()
        .find(|s| !s.info.codec.webm_compatible())
        .map(|s| s.info.codec)
}

/// Render a SeekHead pointing the listed (element id, position) pairs.
/// Positions are relative to the start of the segment data.
pub fn render_seek_head(entries: &[(u32, u64)]) -> Vec<u8> {
    let mut body = Vec::new();
    for &(id, position) in entries {
        let mut seek = Vec::new();
        let mut id_bytes = Vec::new();
        crate::mux::ebml::write_id(&mut id_bytes, id);
        binary_element(&mut seek, ID_SEEK_ID, &id_bytes);
        uint_element(&mut seek, ID_SEEK_POSITION, position);
        master_element(&mut body, ID_SEEK, &seek);
    }
    let mut out = Vec::new();
    master_element(&mut out, ID_SEEK_HEAD, &body);
    out
}

/// Render the Cues element from recorded (time ticks, track, cluster
/// position) entries
pub fn render_cues(entries: &[CueEntry]) -> Vec<u8> {
    let mut body = Vec::new();
    for entry in entries {
        let mut positions = Vec::new();
        uint_element(&mut positions, ID_CUE_TRACK, entry.track);
        uint_element(&mut positions, ID_CUE_CLUSTER_POSITION, entry.cluster_position);

        let mut point = Vec::new();
        uint_element(&mut point, ID_CUE_TIME, entry.time_ticks);
        master_element(&mut point, ID_CUE_TRACK_POSITIONS, &positions);
        master_element(&mut body, ID_CUE_POINT, &point);
    }
    let mut out = Vec::new();
    master_element(&mut out, ID_CUES, &body);
    out
}

/// One cue: a keyframe at `time_ticks` inside the cluster starting at
/// `cluster_position` (segment-relative)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CueEntry {
    pub time_ticks: u64,
    pub track: u64,
    pub cluster_position: u64,
}

/// Render a Void placeholder of exactly `total` bytes
pub fn render_void(total: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    void_element(&mut out, total)?;
    Ok(out)
}
