//! Segment assembly and finalization
//!
//! One `SegmentWriter` owns one output file from headers to the final
//! patch-up. The layout is: EBML header, segment with an 8-byte size
//! written as "unknown" while open, a Void reserved for the seek head,
//! the Info element with a patchable 8-byte Duration, the Tracks
//! element followed by a Void reserve, then clusters. Finalize
//! rerenders the tracks in place when they fit and relocates the
//! cluster tail forward when they do not, fixing up every recorded
//! byte offset past the insertion point.

use crate::error::{Error, Result};
use crate::mux::chapters::{ChapterSet, TagSet};
use crate::mux::cluster::PendingCue;
use crate::mux::ebml::{
    float_element, known_size_8, master_element, string_element, uint_element, vint_size,
    write_id, UNKNOWN_SIZE,
};
use crate::mux::elements::*;
use std::io::{Read, Seek, SeekFrom, Write};

/// Chunk size for the backward tail copy during relocation
const RELOCATE_CHUNK: usize = 1024 * 1024;

const MUXING_APP: &str = concat!("mkvmux ", env!("CARGO_PKG_VERSION"));

/// Per-file segment parameters
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    pub doctype: DocType,
    /// Nanoseconds per timecode tick
    pub timecode_scale: u64,
    pub writing_app: String,
    pub title: Option<String>,
    pub segment_uid: Option<[u8; 16]>,
    pub prev_uid: Option<[u8; 16]>,
    pub next_uid: Option<[u8; 16]>,
    /// Bytes reserved for the seek head
    pub seek_head_reserve: usize,
    /// Bytes of Void left after the provisional Tracks element
    pub tracks_reserve: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        SegmentConfig {
            doctype: DocType::Matroska,
            timecode_scale: 1_000_000,
            writing_app: MUXING_APP.into(),
            title: None,
            segment_uid: None,
            prev_uid: None,
            next_uid: None,
            seek_head_reserve: 256,
            tracks_reserve: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    HeadersWritten,
    Finalized,
}

pub struct SegmentWriter<W: Read + Write + Seek> {
    writer: W,
    config: SegmentConfig,
    state: State,
    /// Current logical end of the file
    end: u64,
    /// Position of the 8-byte segment size field
    segment_size_pos: u64,
    /// First byte after the segment size field; all segment-relative
    /// offsets are measured from here
    data_start: u64,
    seek_head_pos: u64,
    info_pos: u64,
    /// Absolute position of the 8 Duration payload bytes
    duration_pos: u64,
    tracks_pos: u64,
    /// Rendered tracks plus reserve, i.e. bytes up to the first cluster
    tracks_region: usize,
    clusters_start: u64,
    cues: Vec<CueEntry>,
}

impl<W: Read + Write + Seek> SegmentWriter<W> {
    pub fn new(writer: W, config: SegmentConfig) -> Self {
        SegmentWriter {
            writer,
            config,
            state: State::Open,
            end: 0,
            segment_size_pos: 0,
            data_start: 0,
            seek_head_pos: 0,
            info_pos: 0,
            duration_pos: 0,
            tracks_pos: 0,
            tracks_region: 0,
            clusters_start: 0,
            cues: Vec::new(),
        }
    }

    fn write_at_end(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.seek(SeekFrom::Start(self.end))?;
        self.writer.write_all(bytes)?;
        self.end += bytes.len() as u64;
        Ok(())
    }

    fn write_at(&mut self, pos: u64, bytes: &[u8]) -> Result<()> {
        self.writer.seek(SeekFrom::Start(pos))?;
        self.writer.write_all(bytes)?;
        Ok(())
    }

    /// Render the Info element, recording where the Duration payload
    /// will land relative to the start of the returned buffer
    fn render_info(&self) -> (Vec<u8>, usize) {
        let mut body = Vec::new();
        uint_element(&mut body, ID_TIMECODE_SCALE, self.config.timecode_scale);
        string_element(&mut body, ID_MUXING_APP, MUXING_APP);
        string_element(&mut body, ID_WRITING_APP, &self.config.writing_app);
        if let Some(uid) = &self.config.segment_uid {
            crate::mux::chapters::render_uid_element(&mut body, ID_SEGMENT_UID, uid);
        }
        if let Some(uid) = &self.config.prev_uid {
            crate::mux::chapters::render_uid_element(&mut body, ID_PREV_UID, uid);
        }
        if let Some(uid) = &self.config.next_uid {
            crate::mux::chapters::render_uid_element(&mut body, ID_NEXT_UID, uid);
        }
        if let Some(title) = &self.config.title {
            string_element(&mut body, ID_TITLE, title);
        }
        // Duration id (2 bytes) + size (1 byte) precede the payload
        let duration_in_body = body.len() + 3;
        float_element(&mut body, ID_DURATION, 0.0);

        let header = crate::mux::ebml::id_size(ID_INFO) + vint_size(body.len() as u64);
        let mut out = Vec::new();
        master_element(&mut out, ID_INFO, &body);
        (out, header + duration_in_body)
    }

    /// Write the EBML header, open the segment and lay out the
    /// provisional header area
    pub fn write_headers(&mut self, tracks: &[TrackSpec]) -> Result<()> {
        if self.state != State::Open {
            return Err(Error::invalid_state("segment headers already written"));
        }
        if self.config.doctype == DocType::Webm {
            if let Some(codec) = webm_check(tracks) {
                return Err(Error::config(format!(
                    "codec {:?} cannot be stored in a WebM file",
                    codec
                )));
            }
        }

        self.write_at_end(&render_ebml_header(self.config.doctype))?;

        let mut seg = Vec::new();
        write_id(&mut seg, ID_SEGMENT);
        self.segment_size_pos = self.end + seg.len() as u64;
        seg.extend_from_slice(&UNKNOWN_SIZE);
        self.write_at_end(&seg)?;
        self.data_start = self.end;

        self.seek_head_pos = self.end;
        let void = render_void(self.config.seek_head_reserve)?;
        self.write_at_end(&void)?;

        self.info_pos = self.end;
        let (info, duration_off) = self.render_info();
        self.duration_pos = self.info_pos + duration_off as u64;
        self.write_at_end(&info)?;

        self.tracks_pos = self.end;
        let rendered = render_tracks(tracks);
        self.tracks_region = rendered.len() + self.config.tracks_reserve;
        self.write_at_end(&rendered)?;
        let void = render_void(self.config.tracks_reserve)?;
        self.write_at_end(&void)?;

        self.clusters_start = self.end;
        self.state = State::HeadersWritten;
        Ok(())
    }

    /// Append one rendered cluster, resolving its cue candidates to
    /// this cluster's byte position
    pub fn add_cluster(&mut self, bytes: &[u8], pending: &[PendingCue]) -> Result<()> {
        if self.state != State::HeadersWritten {
            return Err(Error::invalid_state("segment is not accepting clusters"));
        }
        let position = self.end;
        self.write_at_end(bytes)?;
        for cue in pending {
            self.cues.push(CueEntry {
                time_ticks: cue.time_ticks,
                track: cue.track,
                // Stored absolute until finalize, when relocation can
                // no longer move clusters
                cluster_position: position,
            });
        }
        Ok(())
    }

    /// Total bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.end
    }

    pub fn is_finalized(&self) -> bool {
        self.state == State::Finalized
    }

    /// Shift the file tail starting at `from` forward by `delta`
    /// bytes, copying chunks in reverse order so the regions never
    /// overlap mid-copy
    fn relocate_tail(&mut self, from: u64, delta: u64) -> Result<()> {
        let mut remaining = self.end - from;
        let mut chunk = vec![0u8; RELOCATE_CHUNK];
        while remaining > 0 {
            let n = remaining.min(RELOCATE_CHUNK as u64) as usize;
            let src = from + remaining - n as u64;
            self.writer.seek(SeekFrom::Start(src))?;
            self.writer.read_exact(&mut chunk[..n])?;
            self.writer.seek(SeekFrom::Start(src + delta))?;
            self.writer.write_all(&chunk[..n])?;
            remaining -= n as u64;
        }
        self.end += delta;

        // Every recorded offset at or past the insertion point moves
        for cue in &mut self.cues {
            if cue.cluster_position >= from {
                cue.cluster_position += delta;
            }
        }
        self.clusters_start += delta;
        Ok(())
    }

    /// Rerender the Tracks element over its reserved region, growing
    /// the file when the new rendering no longer fits
    fn rerender_tracks(&mut self, tracks: &[TrackSpec]) -> Result<()> {
        let rendered = render_tracks(tracks);
        let region = self.tracks_region;

        if rendered.len() == region {
            return self.write_at(self.tracks_pos, &rendered);
        }
        if rendered.len() + 2 <= region {
            let mut bytes = rendered;
            let filler = render_void(region - bytes.len())?;
            bytes.extend_from_slice(&filler);
            return self.write_at(self.tracks_pos, &bytes);
        }

        // Overflow: grow the region to the new size plus a minimal
        // Void and push the clusters out of the way
        let needed = rendered.len() + 2;
        let delta = (needed - region) as u64;
        self.relocate_tail(self.clusters_start, delta)?;

        let mut bytes = rendered;
        let filler = render_void(2)?;
        bytes.extend_from_slice(&filler);
        self.tracks_region = needed;
        self.write_at(self.tracks_pos, &bytes)
    }

    /// Close the segment: rerender tracks, append chapters, tags and
    /// cues, fill in the seek head, patch the duration and the segment
    /// size. Safe to call at any progress point; calling it again is a
    /// no-op.
    pub fn finalize(
        &mut self,
        tracks: &[TrackSpec],
        chapters: Option<&ChapterSet>,
        tags: Option<&TagSet>,
        duration_ns: i64,
    ) -> Result<()> {
        match self.state {
            State::Open => {
                // Cancelled before headers: write them so the file is
                // structurally valid, then fall through
                self.write_headers(tracks)?;
            }
            State::HeadersWritten => {}
            State::Finalized => return Ok(()),
        }

        self.rerender_tracks(tracks)?;

        let mut seeks: Vec<(u32, u64)> = vec![
            (ID_INFO, self.info_pos - self.data_start),
            (ID_TRACKS, self.tracks_pos - self.data_start),
        ];

        if let Some(set) = chapters {
            if !set.is_empty() {
                seeks.push((ID_CHAPTERS, self.end - self.data_start));
                let rendered = set.render();
                self.write_at_end(&rendered)?;
            }
        }
        if let Some(set) = tags {
            if !set.is_empty() {
                seeks.push((ID_TAGS, self.end - self.data_start));
                let rendered = set.render();
                self.write_at_end(&rendered)?;
            }
        }
        if !self.cues.is_empty() {
            seeks.push((ID_CUES, self.end - self.data_start));
            let entries: Vec<CueEntry> = self
                .cues
                .iter()
                .map(|c| CueEntry {
                    cluster_position: c.cluster_position - self.data_start,
                    ..*c
                })
                .collect();
            let rendered = render_cues(&entries);
            self.write_at_end(&rendered)?;
        }

        let seek_head = render_seek_head(&seeks);
        if seek_head.len() + 2 <= self.config.seek_head_reserve
            || seek_head.len() == self.config.seek_head_reserve
        {
            let mut bytes = seek_head;
            if bytes.len() < self.config.seek_head_reserve {
                let filler = render_void(self.config.seek_head_reserve - bytes.len())?;
                bytes.extend_from_slice(&filler);
            }
            self.write_at(self.seek_head_pos, &bytes)?;
        } else {
            // No room: leave the Void and put the seek head at the end
            self.write_at_end(&seek_head)?;
        }

        let ticks = duration_ns.max(0) as f64 / self.config.timecode_scale as f64;
        self.write_at(self.duration_pos, &ticks.to_be_bytes())?;

        let size = known_size_8(self.end - self.data_start);
        self.write_at(self.segment_size_pos, &size)?;

        self.writer.flush()?;
        self.state = State::Finalized;
        Ok(())
    }

    /// Recorded cue entries, absolute byte positions
    pub fn cues(&self) -> &[CueEntry] {
        &self.cues
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AudioParams, CodecId};
    use crate::demux::TrackInfo;
    use crate::util::MediaType;
    use std::io::Cursor;

    fn track_spec(codec_private: Option<Vec<u8>>) -> TrackSpec {
        TrackSpec {
            number: 1,
            uid: 0xCAFE,
            info: TrackInfo {
                id: 1,
                media_type: MediaType::Audio,
                codec: CodecId::Aac,
                audio: Some(AudioParams {
                    sample_rate: 48000,
                    channels: 2,
                    bit_depth: None,
                    output_sample_rate: None,
                }),
                video: None,
                decoder_config: codec_private,
                default_duration_ns: Some(21_333_333),
                language: None,
            },
        }
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    /// Extract all CueClusterPosition values from a finalized file
    fn cue_positions(data: &[u8]) -> Vec<u64> {
        let cues_at = find(data, &[0x1C, 0x53, 0xBB, 0x6B]).expect("cues present");
        let mut out = Vec::new();
        let mut i = cues_at;
        while let Some(rel) = find(&data[i + 1..], &[0xF1]) {
            let pos = i + 1 + rel;
            let size = (data[pos + 1] & 0x7F) as usize;
            if size == 0 || size > 8 || pos + 2 + size > data.len() {
                break;
            }
            let mut v = 0u64;
            for b in &data[pos + 2..pos + 2 + size] {
                v = (v << 8) | *b as u64;
            }
            out.push(v);
            i = pos;
        }
        out
    }

    fn dummy_cluster(tag: u8) -> Vec<u8> {
        let mut body = Vec::new();
        uint_element(&mut body, ID_CLUSTER_TIMECODE, 0);
        body.extend_from_slice(&[0xA3, 0x84, 0x81, 0x00, 0x00, tag]);
        let mut out = Vec::new();
        master_element(&mut out, ID_CLUSTER, &body);
        out
    }

    #[test]
    fn test_header_layout_and_finalize_in_place() {
        let mut w = SegmentWriter::new(Cursor::new(Vec::new()), SegmentConfig::default());
        let specs = [track_spec(Some(vec![0x11, 0x90]))];
        w.write_headers(&specs).unwrap();

        w.add_cluster(
            &dummy_cluster(0x80),
            &[PendingCue {
                track: 1,
                time_ticks: 0,
            }],
        )
        .unwrap();
        w.finalize(&specs, None, None, 1_000_000_000).unwrap();

        let data = w.into_inner().into_inner();
        // EBML header magic
        assert_eq!(&data[0..4], &[0x1A, 0x45, 0xDF, 0xA3]);
        // Segment id present
        assert!(find(&data, &[0x18, 0x53, 0x80, 0x67]).is_some());
        // Segment size is no longer unknown
        assert!(find(&data, &UNKNOWN_SIZE).is_none());
        // Seek head rendered over its placeholder
        assert!(find(&data, &[0x11, 0x4D, 0x9B, 0x74]).is_some());
        // Duration patched: 1000 ticks at the default 1 ms scale
        let dur = 1000.0f64.to_be_bytes();
        assert!(find(&data, &dur).is_some());
    }

    #[test]
    fn test_cue_positions_point_at_clusters() {
        let mut w = SegmentWriter::new(Cursor::new(Vec::new()), SegmentConfig::default());
        let specs = [track_spec(None)];
        w.write_headers(&specs).unwrap();

        for tag in [0xA0u8, 0xA1] {
            w.add_cluster(
                &dummy_cluster(tag),
                &[PendingCue {
                    track: 1,
                    time_ticks: tag as u64,
                }],
            )
            .unwrap();
        }
        let data_start = w.data_start;
        w.finalize(&specs, None, None, 0).unwrap();
        let data = w.into_inner().into_inner();

        for rel in cue_positions(&data) {
            let abs = (data_start + rel) as usize;
            assert_eq!(&data[abs..abs + 4], &[0x1F, 0x43, 0xB6, 0x75]);
        }
    }

    #[test]
    fn test_relocation_shifts_clusters_and_cues() {
        let config = SegmentConfig {
            tracks_reserve: 16,
            ..SegmentConfig::default()
        };
        let mut w = SegmentWriter::new(Cursor::new(Vec::new()), config);
        let provisional = [track_spec(None)];
        w.write_headers(&provisional).unwrap();

        w.add_cluster(
            &dummy_cluster(0x5A),
            &[PendingCue {
                track: 1,
                time_ticks: 7,
            }],
        )
        .unwrap();

        let before = w.cues()[0].cluster_position;
        // Final tracks carry codec private data far larger than the
        // 16-byte reserve
        let grown = [track_spec(Some(vec![0x42; 600]))];
        let data_start = w.data_start;
        w.finalize(&grown, None, None, 0).unwrap();

        let after = w.cues()[0].cluster_position;
        assert!(after > before);

        let data = w.into_inner().into_inner();
        // The cluster really lives at the adjusted offset
        assert_eq!(
            &data[after as usize..after as usize + 4],
            &[0x1F, 0x43, 0xB6, 0x75]
        );
        // And the written cue agrees
        let rels = cue_positions(&data);
        assert_eq!(rels, vec![after - data_start]);
        // The grown codec private data landed in the header area
        let private_at = find(&data, &[0x42; 600]).unwrap();
        assert!((private_at as u64) < after);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut w = SegmentWriter::new(Cursor::new(Vec::new()), SegmentConfig::default());
        let specs = [track_spec(None)];
        w.write_headers(&specs).unwrap();
        assert!(!w.is_finalized());
        w.finalize(&specs, None, None, 0).unwrap();
        assert!(w.is_finalized());
        let len = w.bytes_written();
        w.finalize(&specs, None, None, 0).unwrap();
        assert_eq!(w.bytes_written(), len);
    }

    #[test]
    fn test_finalize_before_headers_yields_valid_file() {
        let mut w = SegmentWriter::new(Cursor::new(Vec::new()), SegmentConfig::default());
        let specs = [track_spec(None)];
        w.finalize(&specs, None, None, 0).unwrap();
        let data = w.into_inner().into_inner();
        assert_eq!(&data[0..4], &[0x1A, 0x45, 0xDF, 0xA3]);
        assert!(find(&data, &[0x16, 0x54, 0xAE, 0x6B]).is_some());
    }

    #[test]
    fn test_webm_rejects_dts() {
        let mut spec = track_spec(None);
        spec.info.codec = CodecId::Dts;
        let config = SegmentConfig {
            doctype: DocType::Webm,
            ..SegmentConfig::default()
        };
        let mut w = SegmentWriter::new(Cursor::new(Vec::new()), config);
        assert!(w.write_headers(&[spec]).is_err());
    }
}
