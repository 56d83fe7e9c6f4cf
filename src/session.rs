//! Mux session orchestration
//!
//! One [`MuxSession`] owns everything a run needs: the open inputs,
//! the per-track packetizers, the staged chapters and tags, and the
//! current output segment. Scheduling is a single pull loop: fill
//! every active packetizer, pick the globally lowest output timecode,
//! hand the winner to the cluster builder. Appending and splitting
//! happen inside the same loop.

use crate::demux::Reader;
use crate::diag::DiagSink;
use crate::error::{Error, Result};
use crate::mux::chapters::{new_segment_uid, ChapterSet, TagSet};
use crate::mux::cluster::ClusterBuilder;
use crate::mux::split::{SplitCheck, SplitMode};
use crate::mux::{
    validate_mappings, AppendMapping, DocType, FileDesc, SegmentConfig, SegmentWriter, TrackSpec,
};
use crate::packetize::{Connect, CuePolicy, Packetizer, TrackOptions};
use crate::util::MediaType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Seek, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Out-of-band cancellation flag. Cloning shares the flag; any clone
/// can request cancellation and the session notices at its next loop
/// iteration, finalizing the current output into a valid file.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-input configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// This file continues an earlier one instead of adding tracks
    pub continuation: bool,
    /// Overrides keyed by source track id
    pub track_options: HashMap<usize, TrackOptions>,
    /// Chapters carried alongside this source
    pub chapters: Option<ChapterSet>,
    pub tags: Option<TagSet>,
}

/// Session-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    pub doctype: DocType,
    /// Nanoseconds per output timecode tick
    pub timecode_scale: u64,
    pub title: Option<String>,
    pub max_blocks_per_cluster: u32,
    pub max_ns_per_cluster: i64,
    pub split: SplitMode,
    /// Link split files through previous/next segment UIDs
    pub link_files: bool,
    pub append_mappings: Vec<AppendMapping>,
    /// Chapters for the whole run, on the output timeline
    pub chapters: ChapterSet,
    pub tags: TagSet,
    pub writing_app: String,
}

impl Default for MuxConfig {
    fn default() -> Self {
        MuxConfig {
            doctype: DocType::Matroska,
            timecode_scale: 1_000_000,
            title: None,
            max_blocks_per_cluster: 65535,
            max_ns_per_cluster: 5_000_000_000,
            split: SplitMode::None,
            link_files: false,
            append_mappings: Vec::new(),
            chapters: ChapterSet::default(),
            tags: TagSet::default(),
            writing_app: concat!("mkvmux ", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

/// What a finished run reports back
#[derive(Debug, Clone, Serialize)]
pub struct MuxReport {
    pub files_written: usize,
    /// Total muxed duration on the output timeline
    pub duration_ns: i64,
    pub cancelled: bool,
}

struct OpenSource<R: Read + Seek> {
    reader: Reader<R>,
    /// Source track id to packetizer index
    routes: HashMap<usize, usize>,
    eof: bool,
    chapters: Option<ChapterSet>,
    tags: Option<TagSet>,
}

struct Chain {
    /// File indices, head first
    files: Vec<usize>,
    pos: usize,
    done: bool,
}

impl Chain {
    fn current(&self) -> Option<usize> {
        if self.done {
            None
        } else {
            self.files.get(self.pos).copied()
        }
    }
}

pub struct MuxSession<W: Read + Write + Seek> {
    config: MuxConfig,
    cancel: CancelToken,
    next_output: Box<dyn FnMut(usize) -> std::io::Result<W>>,
}

impl<W: Read + Write + Seek> MuxSession<W> {
    /// `next_output` supplies the writer for each output file index;
    /// index 0 is the first file, later indices only occur when
    /// splitting is configured.
    pub fn new(config: MuxConfig, next_output: Box<dyn FnMut(usize) -> std::io::Result<W>>) -> Self {
        MuxSession {
            config,
            cancel: CancelToken::new(),
            next_output,
        }
    }

    /// A handle the caller can use to interrupt the run
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the whole mux. Returns the report; structured diagnostics
    /// accumulate in `diag`.
    pub fn run<R: Read + Seek>(
        &mut self,
        inputs: Vec<(R, SourceConfig)>,
        diag: &mut DiagSink,
    ) -> Result<MuxReport> {
        if inputs.is_empty() {
            return Err(Error::config("no input files given"));
        }
        self.config.split.validate()?;

        // Open and describe every input
        let mut sources: Vec<OpenSource<R>> = Vec::new();
        let mut descs: Vec<FileDesc> = Vec::new();
        let mut source_tracks: Vec<Vec<crate::demux::TrackInfo>> = Vec::new();
        let mut source_configs: Vec<SourceConfig> = Vec::new();
        for (idx, (input, sconfig)) in inputs.into_iter().enumerate() {
            let reader = Reader::open(input, idx, diag)?;
            let tracks = reader.describe();
            descs.push(FileDesc {
                continuation: sconfig.continuation,
                track_ids: tracks.iter().map(|t| t.id).collect(),
            });
            sources.push(OpenSource {
                reader,
                routes: HashMap::new(),
                eof: false,
                chapters: sconfig.chapters.clone(),
                tags: sconfig.tags.clone(),
            });
            source_tracks.push(tracks);
            source_configs.push(sconfig);
        }

        let mappings = validate_mappings(&self.config.append_mappings, &descs, diag)?;

        // Packetizers for every head file's tracks, in file order
        let mut packetizers: Vec<Packetizer> = Vec::new();
        let mut pkt_media: Vec<MediaType> = Vec::new();
        for (fidx, desc) in descs.iter().enumerate() {
            if desc.continuation {
                continue;
            }
            for info in &source_tracks[fidx] {
                let opts = source_configs[fidx]
                    .track_options
                    .get(&info.id)
                    .cloned()
                    .unwrap_or_default();
                let number = packetizers.len() as u64 + 1;
                match Packetizer::new(number, info.clone(), opts) {
                    Ok(p) => {
                        sources[fidx].routes.insert(info.id, packetizers.len());
                        pkt_media.push(p.info().media_type);
                        packetizers.push(p);
                    }
                    Err(e) => {
                        diag.warning(
                            Some(fidx),
                            format!("track {}: {}, skipping", info.id, e),
                        );
                    }
                }
            }
        }
        if packetizers.is_empty() {
            return Err(Error::format("no usable track in any input"));
        }

        // Resolve continuation routes transitively through the mapping
        // table onto the head packetizers
        loop {
            let mut changed = false;
            for m in &mappings {
                if sources[m.src_file].routes.contains_key(&m.src_track) {
                    continue;
                }
                if let Some(&p) = sources[m.dst_file].routes.get(&m.dst_track) {
                    sources[m.src_file].routes.insert(m.src_track, p);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        for (fidx, desc) in descs.iter().enumerate() {
            if !desc.continuation {
                continue;
            }
            for info in &source_tracks[fidx] {
                if !sources[fidx].routes.contains_key(&info.id) {
                    diag.warning(
                        Some(fidx),
                        format!("track {} has no append mapping, dropping it", info.id),
                    );
                }
            }
        }

        // File chains: heads first, then their successors in order.
        // One appended file per predecessor.
        let mut successor: HashMap<usize, usize> = HashMap::new();
        for m in &mappings {
            if let Some(prev) = successor.insert(m.dst_file, m.src_file) {
                if prev != m.src_file {
                    return Err(Error::config(format!(
                        "files {} and {} are both appended to file {}",
                        prev, m.src_file, m.dst_file
                    )));
                }
            }
        }
        let mut chains: Vec<Chain> = Vec::new();
        for (fidx, desc) in descs.iter().enumerate() {
            if desc.continuation {
                continue;
            }
            let mut files = vec![fidx];
            let mut cur = fidx;
            while let Some(&next) = successor.get(&cur) {
                files.push(next);
                cur = next;
            }
            chains.push(Chain {
                files,
                pos: 0,
                done: false,
            });
        }

        // Staged chapters: the configured set plus every head file's
        let mut chapters = self.config.chapters.clone();
        let mut tags = self.config.tags.clone();
        for chain in &chains {
            let head = chain.files[0];
            if let Some(set) = sources[head].chapters.take() {
                chapters.merge(set);
            }
            if let Some(set) = sources[head].tags.take() {
                tags.merge(set);
            }
        }
        chapters.validate()?;

        // Cluster spans are capped by the 16-bit relative timecode
        let rel_cap = i16::MAX as i64 * self.config.timecode_scale as i64;
        let mut max_span = self.config.max_ns_per_cluster;
        if max_span > rel_cap {
            diag.info(
                None,
                format!("limiting cluster span to {} ns", rel_cap),
            );
            max_span = rel_cap;
        }

        let has_video = pkt_media.iter().any(|m| *m == MediaType::Video);
        let specs: Vec<TrackSpec> = packetizers
            .iter()
            .map(|p| TrackSpec {
                number: p.track_number(),
                uid: crate::mux::chapters::new_uid(),
                info: p.info().clone(),
            })
            .collect();
        let cue_policies: HashMap<u64, CuePolicy> = packetizers
            .iter()
            .map(|p| (p.track_number(), p.cue_policy()))
            .collect();

        let mut engine = Engine {
            config: &self.config,
            next_output: &mut self.next_output,
            out_index: 0,
            segment: None,
            cluster: ClusterBuilder::new(
                self.config.timecode_scale,
                self.config.max_blocks_per_cluster,
                max_span,
            ),
            split: SplitCheck::new(self.config.split.clone(), chapters.starts())?,
            specs,
            chapters,
            tags,
            current_uid: new_segment_uid(),
            prev_uid: None,
            file_base_ns: 0,
            max_end_ns: 0,
            has_video,
            cue_policies,
        };
        engine.open_output()?;

        let report = run_pull_loop(
            &self.cancel,
            &mut sources,
            &mut chains,
            &mut packetizers,
            &pkt_media,
            &source_tracks,
            &mappings,
            &mut engine,
            diag,
        );

        match report {
            Ok(cancelled) => {
                engine.finalize_current(true)?;
                Ok(MuxReport {
                    files_written: engine.out_index + 1,
                    duration_ns: engine.max_end_ns,
                    cancelled,
                })
            }
            Err(e) => {
                // Leave a structurally valid file behind even on error
                let _ = engine.finalize_current(true);
                Err(e)
            }
        }
    }

}

/// The driving loop. Returns whether the run was cancelled.
#[allow(clippy::too_many_arguments)]
fn run_pull_loop<R: Read + Seek, W: Read + Write + Seek>(
    cancel: &CancelToken,
    sources: &mut [OpenSource<R>],
    chains: &mut [Chain],
    packetizers: &mut [Packetizer],
    pkt_media: &[MediaType],
    source_tracks: &[Vec<crate::demux::TrackInfo>],
    mappings: &[AppendMapping],
    engine: &mut Engine<'_, W>,
    diag: &mut DiagSink,
) -> Result<bool> {
    loop {
        if cancel.is_cancelled() {
            diag.warning(None, "cancellation requested, finalizing output".to_string());
            return Ok(true);
        }

        // Keep every packetizer of every active file supplied
        for chain in chains.iter_mut() {
            loop {
                let Some(fidx) = chain.current() else { break };
                fill_source(&mut sources[fidx], packetizers, fidx, diag)?;
                if !sources[fidx].eof {
                    break;
                }

                // File drained: flush, then connect its successor
                for &p in sources[fidx].routes.values() {
                    packetizers[p].flush(diag)?;
                }
                if sources[fidx].routes.values().any(|&p| packetizers[p].packets_ready() > 0) {
                    break;
                }

                chain.pos += 1;
                let Some(next) = chain.current() else {
                    chain.done = true;
                    break;
                };

                let offset = sources[fidx]
                    .routes
                    .values()
                    .map(|&p| packetizers[p].max_seen_timecode())
                    .max()
                    .unwrap_or(0);
                connect_file(
                    next,
                    offset,
                    sources,
                    packetizers,
                    source_tracks,
                    mappings,
                    engine,
                    diag,
                )?;
            }
        }

        // Global k-way merge: lowest ready timecode wins, ties go
        // to the earliest registered packetizer
        let mut winner: Option<(usize, i64)> = None;
        for (i, p) in packetizers.iter().enumerate() {
            if let Some(tc) = p.peek_timecode() {
                match winner {
                    Some((_, best)) if best <= tc => {}
                    _ => winner = Some((i, tc)),
                }
            }
        }
        let Some((idx, _)) = winner else {
            // Nothing ready anywhere: done when all chains are
            if chains.iter().all(|c| c.done) {
                return Ok(false);
            }
            continue;
        };

        let packet = match packetizers[idx].next_packet() {
            Some(p) => p,
            None => continue,
        };
        engine.emit(&packet, pkt_media[idx] == MediaType::Subtitle)?;
    }
}

/// Read frames from one source until every packetizer it feeds has a
/// packet ready or the source runs dry
fn fill_source<R: Read + Seek>(
    source: &mut OpenSource<R>,
    packetizers: &mut [Packetizer],
    fidx: usize,
    diag: &mut DiagSink,
) -> Result<()> {
    while !source.eof
        && source
            .routes
            .values()
            .any(|&p| packetizers[p].packets_ready() == 0)
    {
        match source.reader.read_next()? {
            Some(sf) => {
                if let Some(&p) = source.routes.get(&sf.track_id) {
                    packetizers[p].process(sf.frame, diag)?;
                }
            }
            None => source.eof = true,
        }
        let (consumed, total) = source.reader.progress();
        diag.progress(fidx, consumed, total);
    }
    Ok(())
}

/// Connect a continuation file onto the running output tracks
#[allow(clippy::too_many_arguments)]
fn connect_file<R: Read + Seek>(
    fidx: usize,
    offset_ns: i64,
    sources: &mut [OpenSource<R>],
    packetizers: &mut [Packetizer],
    source_tracks: &[Vec<crate::demux::TrackInfo>],
    mappings: &[AppendMapping],
    engine: &mut Engine<'_, impl Read + Write + Seek>,
    diag: &mut DiagSink,
) -> Result<()> {
    for m in mappings.iter().filter(|m| m.src_file == fidx) {
        let Some(&p) = sources[fidx].routes.get(&m.src_track) else {
            continue;
        };
        let info = source_tracks[fidx]
            .iter()
            .find(|t| t.id == m.src_track)
            .ok_or_else(|| {
                Error::config(format!(
                    "append mapping source track {}:{} vanished",
                    fidx, m.src_track
                ))
            })?;
        match packetizers[p].connect_check(info) {
            Connect::Compatible => {}
            Connect::Maybe(reason) => diag.warning(Some(fidx), reason),
            Connect::Incompatible(reason) => {
                return Err(Error::invalid_input(format!(
                    "cannot append track {}:{}: {}",
                    fidx, m.src_track, reason
                )))
            }
        }
        packetizers[p].set_timecode_offset(offset_ns);
    }
    diag.info(
        Some(fidx),
        format!("appending at output timecode {} ns", offset_ns),
    );

    if let Some(mut set) = sources[fidx].chapters.take() {
        set.shift(offset_ns);
        engine.chapters.merge(set);
        engine.chapters.validate()?;
    }
    if let Some(set) = sources[fidx].tags.take() {
        engine.tags.merge(set);
    }
    Ok(())
}

/// Per-output-file assembly state, shared by the loop and finalize
struct Engine<'a, W: Read + Write + Seek> {
    config: &'a MuxConfig,
    next_output: &'a mut Box<dyn FnMut(usize) -> std::io::Result<W>>,
    out_index: usize,
    segment: Option<SegmentWriter<W>>,
    cluster: ClusterBuilder,
    split: SplitCheck,
    specs: Vec<TrackSpec>,
    chapters: ChapterSet,
    tags: TagSet,
    current_uid: [u8; 16],
    prev_uid: Option<[u8; 16]>,
    /// First output timecode of the current file
    file_base_ns: i64,
    /// Highest packet end time seen over the whole run
    max_end_ns: i64,
    has_video: bool,
    cue_policies: HashMap<u64, CuePolicy>,
}

impl<W: Read + Write + Seek> Engine<'_, W> {
    fn open_output(&mut self) -> Result<()> {
        let link = self.config.link_files && self.split.is_active();
        let config = SegmentConfig {
            doctype: self.config.doctype,
            timecode_scale: self.config.timecode_scale,
            writing_app: self.config.writing_app.clone(),
            title: self.config.title.clone(),
            segment_uid: Some(self.current_uid),
            prev_uid: if link { self.prev_uid } else { None },
            next_uid: None,
            ..SegmentConfig::default()
        };
        let writer = (self.next_output)(self.out_index)?;
        let mut segment = SegmentWriter::new(writer, config);
        segment.write_headers(&self.specs)?;
        self.segment = Some(segment);
        Ok(())
    }

    fn segment(&mut self) -> Result<&mut SegmentWriter<W>> {
        self.segment
            .as_mut()
            .ok_or_else(|| Error::invalid_state("no output file open"))
    }

    fn flush_cluster(&mut self) -> Result<()> {
        if self.cluster.is_empty() {
            return Ok(());
        }
        let (bytes, cues) = self.cluster.finish();
        self.segment()?.add_cluster(&bytes, &cues)
    }

    /// Close the current file. `last` skips preparing a successor.
    fn finalize_current(&mut self, last: bool) -> Result<()> {
        self.flush_cluster()?;

        let rebase = self.split.is_active() && !self.config.link_files;
        let from = self.file_base_ns;
        let set = if last {
            self.chapters.subset(from, None, rebase)
        } else {
            self.chapters.subset(from, Some(self.max_end_ns), rebase)
        };
        let file_duration = self.max_end_ns - from;

        let specs = self.specs.clone();
        let tags = self.tags.clone();
        if let Some(segment) = self.segment.as_mut() {
            segment.finalize(
                &specs,
                if set.is_empty() { None } else { Some(&set) },
                if tags.is_empty() { None } else { Some(&tags) },
                file_duration,
            )?;
        }
        Ok(())
    }

    /// Base subtracted from packet timecodes: split files restart at
    /// zero unless the segments are linked
    fn timecode_base(&self) -> i64 {
        if self.split.is_active() && !self.config.link_files {
            self.file_base_ns
        } else {
            0
        }
    }

    /// Feed one packet: handles cluster boundaries and file splits
    fn emit(&mut self, packet: &crate::packetize::Packet, subtitle: bool) -> Result<()> {
        if !self.cluster.fits(packet.timecode - self.timecode_base()) {
            self.flush_cluster()?;
        }

        if self.cluster.is_empty() && self.split.is_active() {
            let written = self.segment()?.bytes_written();
            if self.split.should_split(written, packet.timecode) {
                self.finalize_current(false)?;
                self.prev_uid = Some(self.current_uid);
                self.current_uid = new_segment_uid();
                self.out_index += 1;
                self.split.begin_file();
                self.file_base_ns = packet.timecode;
                self.open_output()?;
            }
        }

        let mut local = packet.clone();
        local.timecode = packet.timecode - self.timecode_base();
        let record_cue = self.record_cue(&local, subtitle);
        self.cluster.add(&local, subtitle, record_cue)?;
        self.max_end_ns = self.max_end_ns.max(packet.timecode + packet.duration.max(0));
        Ok(())
    }

    fn record_cue(&self, packet: &crate::packetize::Packet, subtitle: bool) -> bool {
        match self
            .cue_policies
            .get(&packet.track)
            .copied()
            .unwrap_or_default()
        {
            CuePolicy::None => false,
            CuePolicy::All => true,
            CuePolicy::Keyframes => packet.keyframe,
            CuePolicy::Default => {
                if subtitle {
                    false
                } else if self.has_video {
                    packet.keyframe && self.is_video_track(packet.track)
                } else {
                    // Audio only: one cue per cluster
                    self.cluster.is_empty()
                }
            }
        }
    }

    fn is_video_track(&self, number: u64) -> bool {
        self.specs
            .iter()
            .any(|s| s.number == number && s.info.media_type == MediaType::Video)
    }
}
