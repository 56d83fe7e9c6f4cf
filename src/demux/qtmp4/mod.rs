//! QuickTime/MP4 container demuxer
//!
//! Walks the atom tree, builds per-track sample tables and serves
//! frames in global presentation order. Compressed movie headers
//! (`cmov`) are inflated and re-walked transparently.

pub mod atom;
pub mod track;

use crate::codec::{self, AudioParams, CodecId, Frame, FrameHeader, VideoParams};
use crate::demux::{SourceFrame, TrackInfo};
use crate::diag::DiagSink;
use crate::error::{Error, Result};
use crate::util::{Buffer, MediaType, Rational, Timecode, Timescale};
use atom::{read_atom, read_payload, Atom};
use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use flate2::read::ZlibDecoder;
use std::io::{Cursor, Read, Seek, SeekFrom};
use track::{ChunkmapEntry, DurmapEntry, EditEntry, FrameOffsetEntry, QtAudioDesc, QtTrack,
    QtVideoDesc};

/// Probe: an `ftyp`, `moov`, `mdat` or related tag in the first atom
/// position marks a QuickTime/MP4 file
pub fn probe(data: &[u8]) -> bool {
    if data.len() < 8 {
        return false;
    }
    matches!(
        &data[4..8],
        b"ftyp" | b"moov" | b"mdat" | b"free" | b"skip" | b"wide" | b"pnot"
    )
}

/// State of one demuxed track during reading
#[derive(Debug)]
struct TrackCursor {
    /// Next index entry to serve
    next: usize,
    /// Template header cloned into every frame
    header: FrameHeader,
}

/// QuickTime/MP4 demuxer over a seekable input
pub struct QtReader<R: Read + Seek> {
    reader: R,
    file_size: u64,
    movie_timescale: Timescale,
    tracks: Vec<QtTrack>,
    cursors: Vec<TrackCursor>,
    /// Bytes of payload served so far, for progress
    consumed: u64,
    total_payload: u64,
}

impl<R: Read + Seek> QtReader<R> {
    /// Open and fully parse the container header. Tracks that cannot
    /// be parsed are dropped with a diagnostic; the open fails only if
    /// no usable track remains.
    pub fn open(mut reader: R, source_idx: usize, diag: &mut DiagSink) -> Result<Self> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut qt = QtReader {
            reader,
            file_size,
            movie_timescale: Timescale(0),
            tracks: Vec::new(),
            cursors: Vec::new(),
            consumed: 0,
            total_payload: 0,
        };
        qt.parse_header(source_idx, diag)?;
        Ok(qt)
    }

    fn parse_header(&mut self, source_idx: usize, diag: &mut DiagSink) -> Result<()> {
        let mut moov_seen = false;
        let mut pos = 0u64;

        while pos + 8 <= self.file_size {
            self.reader.seek(SeekFrom::Start(pos))?;
            let atom = read_atom(&mut self.reader, self.file_size)?;
            if atom.fourcc == b"moov" {
                let movie_timescale = &mut self.movie_timescale;
                let tracks = &mut self.tracks;
                walk_moov(
                    &mut self.reader,
                    &atom,
                    self.file_size,
                    movie_timescale,
                    tracks,
                    source_idx,
                    diag,
                )?;
                moov_seen = true;
            }
            pos = atom.end();
        }

        if !moov_seen {
            return Err(Error::format("no 'moov' atom found"));
        }

        self.finish_tracks(source_idx, diag)?;
        Ok(())
    }

    /// Build tables and indexes, drop broken tracks, normalize
    /// negative timecodes across the remaining ones
    fn finish_tracks(&mut self, source_idx: usize, diag: &mut DiagSink) -> Result<()> {
        let movie_timescale = self.movie_timescale;
        let mut kept = Vec::new();
        for mut track in self.tracks.drain(..) {
            if track.media_type == MediaType::Unknown {
                diag.warning(
                    Some(source_idx),
                    format!("track {}: unsupported handler or codec, skipping", track.id),
                );
                continue;
            }
            let built = track
                .update_tables(movie_timescale)
                .and_then(|_| track.build_index());
            match built {
                Ok(()) if !track.index.is_empty() => kept.push(track),
                Ok(()) => {
                    diag.warning(
                        Some(source_idx),
                        format!("track {}: no samples, skipping", track.id),
                    );
                }
                Err(e) => {
                    diag.warning(
                        Some(source_idx),
                        format!("track {}: invalid sample tables ({}), skipping", track.id, e),
                    );
                }
            }
        }
        self.tracks = kept;

        if self.tracks.is_empty() {
            return Err(Error::format("no usable track in this file"));
        }

        // Cross-track normalization: shift everything so the earliest
        // timecode is zero, and say so
        let min_tc = self
            .tracks
            .iter()
            .filter_map(|t| t.min_timecode())
            .min()
            .unwrap_or(0);
        if min_tc < 0 {
            diag.info(
                Some(source_idx),
                format!(
                    "shifting all track timecodes by {} ns so the earliest is zero",
                    -min_tc
                ),
            );
            for track in &mut self.tracks {
                track.shift_timecodes(-min_tc);
            }
        }

        self.total_payload = self
            .tracks
            .iter()
            .flat_map(|t| t.index.iter())
            .map(|e| e.size as u64)
            .sum();

        self.cursors = self
            .tracks
            .iter()
            .map(|t| TrackCursor {
                next: 0,
                header: track_frame_header(t),
            })
            .collect();

        Ok(())
    }

    /// Describe the usable tracks
    pub fn describe(&self) -> Vec<TrackInfo> {
        self.tracks
            .iter()
            .map(|t| TrackInfo {
                id: t.id as usize,
                media_type: t.media_type,
                codec: t.codec,
                audio: track_audio_params(t),
                video: track_video_params(t),
                decoder_config: t.decoder_config.clone(),
                default_duration_ns: t.default_duration_ns(),
                language: t.language.clone(),
            })
            .collect()
    }

    /// Read the next frame in global presentation order, or `None` at
    /// the end of the file
    pub fn read_next(&mut self) -> Result<Option<SourceFrame>> {
        // Choose the track whose next index entry is earliest
        let mut best: Option<(usize, i64)> = None;
        for (i, (track, cursor)) in self.tracks.iter().zip(&self.cursors).enumerate() {
            if let Some(entry) = track.index.get(cursor.next) {
                match best {
                    Some((_, tc)) if tc <= entry.timecode => {}
                    _ => best = Some((i, entry.timecode)),
                }
            }
        }
        let Some((track_idx, _)) = best else {
            return Ok(None);
        };

        let entry = self.tracks[track_idx].index[self.cursors[track_idx].next];
        self.cursors[track_idx].next += 1;

        let mut payload = vec![0u8; entry.size as usize];
        self.reader.seek(SeekFrom::Start(entry.file_pos))?;
        self.reader.read_exact(&mut payload)?;
        self.consumed += entry.size as u64;

        let frame = Frame {
            header: self.cursors[track_idx].header.clone(),
            data: Buffer::from_vec(payload),
            stream_offset: entry.file_pos,
            timecode: Timecode::from_nsecs(entry.timecode),
            duration: entry.duration,
            keyframe: entry.keyframe,
        };
        Ok(Some(SourceFrame {
            track_id: self.tracks[track_idx].id as usize,
            frame,
        }))
    }

    /// (consumed, total) payload bytes for progress reporting
    pub fn progress(&self) -> (u64, u64) {
        (self.consumed, self.total_payload)
    }
}

fn track_audio_params(t: &QtTrack) -> Option<AudioParams> {
    let desc = t.audio?;
    Some(AudioParams {
        sample_rate: desc.sample_rate,
        channels: desc.channels.min(255) as u8,
        bit_depth: Some(desc.bit_depth.min(255) as u8),
        output_sample_rate: None,
    })
}

fn track_video_params(t: &QtTrack) -> Option<VideoParams> {
    let desc = t.video?;
    let fps = t.calculate_fps();
    Some(VideoParams {
        width: desc.width as u32,
        height: desc.height as u32,
        fps: Rational::new((fps * 1000.0).round() as i64, 1000),
    })
}

fn track_frame_header(t: &QtTrack) -> FrameHeader {
    match t.media_type {
        MediaType::Audio => FrameHeader::audio(
            t.codec,
            track_audio_params(t).unwrap_or(AudioParams {
                sample_rate: 0,
                channels: 0,
                bit_depth: None,
                output_sample_rate: None,
            }),
        ),
        _ => FrameHeader::video(
            t.codec,
            track_video_params(t).unwrap_or(VideoParams {
                width: 0,
                height: 0,
                fps: Rational::default(),
            }),
        ),
    }
}

/// Walk one `moov`, including a compressed `cmov` if present
fn walk_moov<R: Read + Seek>(
    reader: &mut R,
    moov: &Atom,
    file_size: u64,
    movie_timescale: &mut Timescale,
    tracks: &mut Vec<QtTrack>,
    source_idx: usize,
    diag: &mut DiagSink,
) -> Result<()> {
    let mut pos = moov.position + moov.header_size;
    while pos + 8 <= moov.end().min(file_size) {
        reader.seek(SeekFrom::Start(pos))?;
        let atom = read_atom(reader, file_size)?;
        if atom.fourcc == b"mvhd" {
            let payload = read_payload(reader, &atom)?;
            *movie_timescale = parse_mvhd(&payload)?;
        } else if atom.fourcc == b"trak" {
            let mut track = QtTrack::new(tracks.len() as u32 + 1);
            walk_trak(reader, &atom, file_size, &mut track, source_idx, diag)?;
            tracks.push(track);
        } else if atom.fourcc == b"cmov" {
            let inflated = inflate_cmov(reader, &atom, file_size)?;
            let len = inflated.len() as u64;
            let mut cursor = Cursor::new(inflated);
            let inner = read_atom(&mut cursor, len)?;
            if inner.fourcc != b"moov" {
                return Err(Error::format("compressed movie header is not a 'moov'"));
            }
            walk_moov(
                &mut cursor,
                &inner,
                len,
                movie_timescale,
                tracks,
                source_idx,
                diag,
            )?;
        }
        pos = atom.end();
    }
    Ok(())
}

/// Inflate a `cmov`: a `dcom` naming the compressor and a `cmvd`
/// holding the deflated `moov`
fn inflate_cmov<R: Read + Seek>(reader: &mut R, cmov: &Atom, file_size: u64) -> Result<Vec<u8>> {
    let mut compressor = None;
    let mut compressed = None;

    let mut pos = cmov.position + cmov.header_size;
    while pos + 8 <= cmov.end().min(file_size) {
        reader.seek(SeekFrom::Start(pos))?;
        let atom = read_atom(reader, file_size)?;
        if atom.fourcc == b"dcom" {
            let payload = read_payload(reader, &atom)?;
            if payload.len() >= 4 {
                compressor = Some([payload[0], payload[1], payload[2], payload[3]]);
            }
        } else if atom.fourcc == b"cmvd" {
            compressed = Some(read_payload(reader, &atom)?);
        }
        pos = atom.end();
    }

    match compressor {
        Some(tag) if &tag == b"zlib" => {}
        Some(tag) => {
            return Err(Error::unsupported(format!(
                "compressed movie header uses '{}'",
                String::from_utf8_lossy(&tag)
            )))
        }
        None => return Err(Error::format("'cmov' without a 'dcom' atom")),
    }

    let compressed = compressed.ok_or_else(|| Error::format("'cmov' without a 'cmvd' atom"))?;
    if compressed.len() < 4 {
        return Err(Error::format("'cmvd' atom too small"));
    }
    let uncompressed_size = BigEndian::read_u32(&compressed[0..4]) as usize;

    let mut out = Vec::with_capacity(uncompressed_size);
    ZlibDecoder::new(&compressed[4..]).read_to_end(&mut out)?;
    if out.len() != uncompressed_size {
        return Err(Error::format(format!(
            "'cmvd' inflated to {} bytes, header says {}",
            out.len(),
            uncompressed_size
        )));
    }
    Ok(out)
}

fn parse_mvhd(payload: &[u8]) -> Result<Timescale> {
    if payload.is_empty() {
        return Err(Error::format("'mvhd' atom too small"));
    }
    let version = payload[0];
    let timescale_offset = if version == 1 { 4 + 8 + 8 } else { 4 + 4 + 4 };
    if payload.len() < timescale_offset + 4 {
        return Err(Error::format("'mvhd' atom too small"));
    }
    Ok(Timescale(BigEndian::read_u32(
        &payload[timescale_offset..timescale_offset + 4],
    )))
}

fn walk_trak<R: Read + Seek>(
    reader: &mut R,
    trak: &Atom,
    file_size: u64,
    track: &mut QtTrack,
    source_idx: usize,
    diag: &mut DiagSink,
) -> Result<()> {
    let mut pos = trak.position + trak.header_size;
    while pos + 8 <= trak.end().min(file_size) {
        reader.seek(SeekFrom::Start(pos))?;
        let atom = read_atom(reader, file_size)?;
        if atom.fourcc == b"tkhd" {
            let payload = read_payload(reader, &atom)?;
            parse_tkhd(&payload, track)?;
        } else if atom.fourcc == b"edts" {
            walk_container(reader, &atom, file_size, |fourcc, payload, track| {
                if fourcc == b"elst" {
                    parse_elst(payload, track)?;
                }
                Ok(())
            }, track)?;
        } else if atom.fourcc == b"mdia" {
            walk_mdia(reader, &atom, file_size, track, source_idx, diag)?;
        }
        pos = atom.end();
    }
    Ok(())
}

/// Walk a container whose children are all loaded whole
fn walk_container<R: Read + Seek, F>(
    reader: &mut R,
    container: &Atom,
    file_size: u64,
    mut f: F,
    track: &mut QtTrack,
) -> Result<()>
where
    F: FnMut(atom::Fourcc, &[u8], &mut QtTrack) -> Result<()>,
{
    let mut pos = container.position + container.header_size;
    while pos + 8 <= container.end().min(file_size) {
        reader.seek(SeekFrom::Start(pos))?;
        let atom = read_atom(reader, file_size)?;
        let payload = read_payload(reader, &atom)?;
        f(atom.fourcc, &payload, track)?;
        pos = atom.end();
    }
    Ok(())
}

fn walk_mdia<R: Read + Seek>(
    reader: &mut R,
    mdia: &Atom,
    file_size: u64,
    track: &mut QtTrack,
    source_idx: usize,
    diag: &mut DiagSink,
) -> Result<()> {
    let mut pos = mdia.position + mdia.header_size;
    while pos + 8 <= mdia.end().min(file_size) {
        reader.seek(SeekFrom::Start(pos))?;
        let atom = read_atom(reader, file_size)?;
        if atom.fourcc == b"mdhd" {
            let payload = read_payload(reader, &atom)?;
            parse_mdhd(&payload, track)?;
        } else if atom.fourcc == b"hdlr" {
            let payload = read_payload(reader, &atom)?;
            parse_hdlr(&payload, track);
        } else if atom.fourcc == b"minf" {
            walk_minf(reader, &atom, file_size, track, source_idx, diag)?;
        }
        pos = atom.end();
    }
    Ok(())
}

fn walk_minf<R: Read + Seek>(
    reader: &mut R,
    minf: &Atom,
    file_size: u64,
    track: &mut QtTrack,
    source_idx: usize,
    diag: &mut DiagSink,
) -> Result<()> {
    let mut pos = minf.position + minf.header_size;
    while pos + 8 <= minf.end().min(file_size) {
        reader.seek(SeekFrom::Start(pos))?;
        let atom = read_atom(reader, file_size)?;
        if atom.fourcc == b"stbl" {
            walk_stbl(reader, &atom, file_size, track, source_idx, diag)?;
        }
        pos = atom.end();
    }
    Ok(())
}

fn walk_stbl<R: Read + Seek>(
    reader: &mut R,
    stbl: &Atom,
    file_size: u64,
    track: &mut QtTrack,
    source_idx: usize,
    diag: &mut DiagSink,
) -> Result<()> {
    let mut pos = stbl.position + stbl.header_size;
    while pos + 8 <= stbl.end().min(file_size) {
        reader.seek(SeekFrom::Start(pos))?;
        let atom = read_atom(reader, file_size)?;
        let payload = read_payload(reader, &atom)?;

        if atom.fourcc == b"stsd" {
            if let Err(e) = parse_stsd(&payload, track) {
                diag.warning(
                    Some(source_idx),
                    format!("track {}: sample description: {}", track.id, e),
                );
            }
        } else if atom.fourcc == b"stts" {
            parse_stts(&payload, track)?;
        } else if atom.fourcc == b"stsc" {
            parse_stsc(&payload, track)?;
        } else if atom.fourcc == b"stsz" {
            parse_stsz(&payload, track)?;
        } else if atom.fourcc == b"stco" {
            parse_stco(&payload, track, false)?;
        } else if atom.fourcc == b"co64" {
            parse_stco(&payload, track, true)?;
        } else if atom.fourcc == b"stss" {
            parse_stss(&payload, track)?;
        } else if atom.fourcc == b"ctts" {
            parse_ctts(&payload, track)?;
        }
        pos = atom.end();
    }
    Ok(())
}

fn full_atom_body(payload: &[u8]) -> Result<&[u8]> {
    if payload.len() < 4 {
        return Err(Error::format("full atom shorter than version/flags"));
    }
    Ok(&payload[4..])
}

fn parse_tkhd(payload: &[u8], track: &mut QtTrack) -> Result<()> {
    if payload.is_empty() {
        return Err(Error::format("'tkhd' atom too small"));
    }
    let version = payload[0];
    let flags = BigEndian::read_u32(&payload[0..4]) & 0x00FF_FFFF;
    track.enabled = flags & 1 != 0;

    let id_offset = if version == 1 { 4 + 8 + 8 } else { 4 + 4 + 4 };
    if payload.len() >= id_offset + 4 {
        track.id = BigEndian::read_u32(&payload[id_offset..id_offset + 4]);
    }
    Ok(())
}

fn parse_mdhd(payload: &[u8], track: &mut QtTrack) -> Result<()> {
    if payload.is_empty() {
        return Err(Error::format("'mdhd' atom too small"));
    }
    let version = payload[0];
    let (ts_off, lang_off) = if version == 1 {
        (4 + 8 + 8, 4 + 8 + 8 + 4 + 8)
    } else {
        (4 + 4 + 4, 4 + 4 + 4 + 4 + 4)
    };
    if payload.len() < ts_off + 4 {
        return Err(Error::format("'mdhd' atom too small"));
    }
    track.timescale = Timescale(BigEndian::read_u32(&payload[ts_off..ts_off + 4]));

    // Packed ISO 639-2: three 5-bit letters, each offset from 0x60
    if payload.len() >= lang_off + 2 {
        let packed = BigEndian::read_u16(&payload[lang_off..lang_off + 2]);
        let letters = [
            ((packed >> 10) & 0x1F) as u8 + 0x60,
            ((packed >> 5) & 0x1F) as u8 + 0x60,
            (packed & 0x1F) as u8 + 0x60,
        ];
        if letters.iter().all(|c| c.is_ascii_lowercase()) {
            track.language = Some(String::from_utf8_lossy(&letters).into_owned());
        }
    }
    Ok(())
}

fn parse_hdlr(payload: &[u8], track: &mut QtTrack) {
    if payload.len() < 12 {
        return;
    }
    let handler = &payload[8..12];
    track.media_type = match handler {
        b"vide" => MediaType::Video,
        b"soun" => MediaType::Audio,
        b"text" | b"sbtl" | b"subp" => MediaType::Subtitle,
        _ => MediaType::Unknown,
    };
}

fn parse_elst(payload: &[u8], track: &mut QtTrack) -> Result<()> {
    if payload.len() < 8 {
        return Err(Error::format("'elst' atom too small"));
    }
    let version = payload[0];
    let count = BigEndian::read_u32(&payload[4..8]) as usize;
    let mut cur = Cursor::new(&payload[8..]);
    for _ in 0..count {
        let (segment_duration, media_time) = if version == 1 {
            (
                cur.read_u64::<BigEndian>()?,
                cur.read_i64::<BigEndian>()?,
            )
        } else {
            (
                cur.read_u32::<BigEndian>()? as u64,
                cur.read_i32::<BigEndian>()? as i64,
            )
        };
        let media_rate = cur.read_u32::<BigEndian>()?;
        track.editlist.push(EditEntry {
            segment_duration,
            media_time,
            media_rate,
        });
    }
    Ok(())
}

fn parse_stts(payload: &[u8], track: &mut QtTrack) -> Result<()> {
    let body = full_atom_body(payload)?;
    if body.len() < 4 {
        return Err(Error::format("'stts' atom too small"));
    }
    let count = BigEndian::read_u32(&body[0..4]) as usize;
    let mut cur = Cursor::new(&body[4..]);
    for _ in 0..count {
        track.durmap.push(DurmapEntry {
            count: cur.read_u32::<BigEndian>()?,
            duration: cur.read_u32::<BigEndian>()?,
        });
    }
    Ok(())
}

fn parse_stsc(payload: &[u8], track: &mut QtTrack) -> Result<()> {
    let body = full_atom_body(payload)?;
    if body.len() < 4 {
        return Err(Error::format("'stsc' atom too small"));
    }
    let count = BigEndian::read_u32(&body[0..4]) as usize;
    let mut cur = Cursor::new(&body[4..]);
    for _ in 0..count {
        track.chunkmap.push(ChunkmapEntry {
            first_chunk: cur.read_u32::<BigEndian>()?,
            samples_per_chunk: cur.read_u32::<BigEndian>()?,
            desc_id: cur.read_u32::<BigEndian>()?,
        });
    }
    Ok(())
}

fn parse_stsz(payload: &[u8], track: &mut QtTrack) -> Result<()> {
    let body = full_atom_body(payload)?;
    if body.len() < 8 {
        return Err(Error::format("'stsz' atom too small"));
    }
    track.fixed_sample_size = BigEndian::read_u32(&body[0..4]);
    let count = BigEndian::read_u32(&body[4..8]) as usize;
    if track.fixed_sample_size == 0 {
        let mut cur = Cursor::new(&body[8..]);
        for _ in 0..count {
            track.sample_sizes.push(cur.read_u32::<BigEndian>()?);
        }
    }
    Ok(())
}

fn parse_stco(payload: &[u8], track: &mut QtTrack, wide: bool) -> Result<()> {
    let body = full_atom_body(payload)?;
    if body.len() < 4 {
        return Err(Error::format("chunk offset atom too small"));
    }
    let count = BigEndian::read_u32(&body[0..4]) as usize;
    let mut cur = Cursor::new(&body[4..]);
    for _ in 0..count {
        let offset = if wide {
            cur.read_u64::<BigEndian>()?
        } else {
            cur.read_u32::<BigEndian>()? as u64
        };
        track.chunk_offsets.push(offset);
    }
    Ok(())
}

fn parse_stss(payload: &[u8], track: &mut QtTrack) -> Result<()> {
    let body = full_atom_body(payload)?;
    if body.len() < 4 {
        return Err(Error::format("'stss' atom too small"));
    }
    let count = BigEndian::read_u32(&body[0..4]) as usize;
    let mut cur = Cursor::new(&body[4..]);
    track.has_keyframe_table = true;
    for _ in 0..count {
        let sample = cur.read_u32::<BigEndian>()?;
        // Table is 1-based
        track.keyframes.push(sample.saturating_sub(1) as u64);
    }
    track.keyframes.sort_unstable();
    Ok(())
}

fn parse_ctts(payload: &[u8], track: &mut QtTrack) -> Result<()> {
    let body = full_atom_body(payload)?;
    if body.len() < 4 {
        return Err(Error::format("'ctts' atom too small"));
    }
    let count = BigEndian::read_u32(&body[0..4]) as usize;
    let mut cur = Cursor::new(&body[4..]);
    for _ in 0..count {
        track.frame_offsets.push(FrameOffsetEntry {
            count: cur.read_u32::<BigEndian>()?,
            offset: cur.read_i32::<BigEndian>()?,
        });
    }
    Ok(())
}

fn parse_stsd(payload: &[u8], track: &mut QtTrack) -> Result<()> {
    let body = full_atom_body(payload)?;
    if body.len() < 4 {
        return Err(Error::format("'stsd' atom too small"));
    }
    let count = BigEndian::read_u32(&body[0..4]);
    if count == 0 {
        return Err(Error::unsupported("no sample description"));
    }

    // Only the first description matters; multi-description tracks are
    // not remuxable anyway
    let entry = &body[4..];
    if entry.len() < 16 {
        return Err(Error::format("sample description entry too small"));
    }
    let entry_size = BigEndian::read_u32(&entry[0..4]) as usize;
    let format = [entry[4], entry[5], entry[6], entry[7]];
    let entry = &entry[..entry_size.min(entry.len())];

    match track.media_type {
        MediaType::Audio => parse_stsd_audio(entry, format, track),
        MediaType::Video => parse_stsd_video(entry, format, track),
        _ => Err(Error::unsupported(format!(
            "sample descriptions for {} tracks",
            track.media_type
        ))),
    }
}

fn parse_stsd_audio(entry: &[u8], format: [u8; 4], track: &mut QtTrack) -> Result<()> {
    // 8 byte entry header + 8 reserved, then the sound description
    if entry.len() < 36 {
        return Err(Error::format("audio sample description too small"));
    }
    let version = BigEndian::read_u16(&entry[16..18]);
    let channels = BigEndian::read_u16(&entry[24..26]);
    let bit_depth = BigEndian::read_u16(&entry[26..28]);
    // 16.16 fixed point
    let sample_rate = BigEndian::read_u32(&entry[32..36]) >> 16;

    track.audio = Some(QtAudioDesc {
        channels,
        bit_depth,
        sample_rate,
    });

    let children_start = match version {
        0 => 36,
        1 => 36 + 16,
        2 => 36 + 36,
        _ => 36,
    };

    match &format {
        b"mp4a" => {
            let config = find_esds_config(&entry[children_start.min(entry.len())..])?;
            track.codec = esds_audio_codec(config.object_type)?;
            if track.codec == CodecId::Aac {
                // Trust the AudioSpecificConfig over the stsd fields
                if let Ok(asc) = codec::aac::parse_audio_specific_config(&config.decoder_config) {
                    track.audio = Some(QtAudioDesc {
                        channels: asc.channels as u16,
                        bit_depth,
                        sample_rate: asc.sample_rate,
                    });
                }
            }
            track.decoder_config = Some(config.decoder_config);
            Ok(())
        }
        b"twos" | b"sowt" | b"raw " | b"lpcm" | b"in24" => {
            track.codec = CodecId::Pcm;
            Ok(())
        }
        b"dtsc" | b"dtsl" | b"dtsh" => {
            track.codec = CodecId::Dts;
            Ok(())
        }
        other => Err(Error::unsupported(format!(
            "audio codec '{}'",
            String::from_utf8_lossy(other)
        ))),
    }
}

fn parse_stsd_video(entry: &[u8], format: [u8; 4], track: &mut QtTrack) -> Result<()> {
    if entry.len() < 86 {
        return Err(Error::format("video sample description too small"));
    }
    let width = BigEndian::read_u16(&entry[32..34]);
    let height = BigEndian::read_u16(&entry[34..36]);
    track.video = Some(QtVideoDesc { width, height });

    match &format {
        b"avc1" | b"avc3" => {
            track.codec = CodecId::H264;
            track.decoder_config = find_child_atom(&entry[86..], b"avcC");
            if track.decoder_config.is_none() {
                return Err(Error::format("AVC track without an 'avcC' atom"));
            }
            Ok(())
        }
        b"mp4v" => {
            track.codec = CodecId::Mpeg4Part2;
            if let Ok(config) = find_esds_config(&entry[86..]) {
                track.decoder_config = Some(config.decoder_config);
            }
            Ok(())
        }
        other => Err(Error::unsupported(format!(
            "video codec '{}'",
            String::from_utf8_lossy(other)
        ))),
    }
}

/// Scan child atoms of a sample description for one with the given tag
fn find_child_atom(mut data: &[u8], tag: &[u8; 4]) -> Option<Vec<u8>> {
    while data.len() >= 8 {
        let size = BigEndian::read_u32(&data[0..4]) as usize;
        if size < 8 || size > data.len() {
            return None;
        }
        if &data[4..8] == tag {
            return Some(data[8..size].to_vec());
        }
        data = &data[size..];
    }
    None
}

/// Decoder configuration pulled out of an `esds` atom
struct EsdsConfig {
    object_type: u8,
    decoder_config: Vec<u8>,
}

fn esds_audio_codec(object_type: u8) -> Result<CodecId> {
    match object_type {
        0x40 | 0x66 | 0x67 | 0x68 => Ok(CodecId::Aac),
        0xA9 | 0xAA | 0xAB | 0xAC => Ok(CodecId::Dts),
        other => Err(Error::unsupported(format!(
            "MP4 audio object type {:#04x}",
            other
        ))),
    }
}

fn find_esds_config(children: &[u8]) -> Result<EsdsConfig> {
    let esds = find_child_atom(children, b"esds")
        .ok_or_else(|| Error::format("no 'esds' atom in sample description"))?;
    let body = full_atom_body(&esds)?;
    parse_es_descriptor(body)
}

/// Read one descriptor header: tag byte plus a 7-bit-per-byte length
fn read_descriptor(data: &[u8]) -> Result<(u8, usize, usize)> {
    if data.is_empty() {
        return Err(Error::format("empty descriptor"));
    }
    let tag = data[0];
    let mut len = 0usize;
    let mut pos = 1usize;
    loop {
        if pos >= data.len() || pos > 4 {
            return Err(Error::format("descriptor length field runs off the end"));
        }
        let byte = data[pos];
        len = (len << 7) | (byte & 0x7F) as usize;
        pos += 1;
        if byte & 0x80 == 0 {
            break;
        }
    }
    Ok((tag, len, pos))
}

fn parse_es_descriptor(data: &[u8]) -> Result<EsdsConfig> {
    let (tag, _, header) = read_descriptor(data)?;
    if tag != 0x03 {
        return Err(Error::format(format!("expected ES descriptor, got tag {:#04x}", tag)));
    }
    let mut pos = header;

    // es_id + flags byte; optional fields follow depending on flags
    if data.len() < pos + 3 {
        return Err(Error::format("ES descriptor too small"));
    }
    let flags = data[pos + 2];
    pos += 3;
    if flags & 0x80 != 0 {
        pos += 2; // dependsOn_ES_ID
    }
    if flags & 0x40 != 0 {
        // URL string with a length prefix
        if data.len() <= pos {
            return Err(Error::format("ES descriptor URL runs off the end"));
        }
        pos += 1 + data[pos] as usize;
    }
    if flags & 0x20 != 0 {
        pos += 2; // OCR_ES_ID
    }

    // DecoderConfigDescriptor
    let (tag, _, header) = read_descriptor(&data[pos.min(data.len())..])?;
    if tag != 0x04 {
        return Err(Error::format("no decoder config descriptor"));
    }
    pos += header;
    if data.len() < pos + 13 {
        return Err(Error::format("decoder config descriptor too small"));
    }
    let object_type = data[pos];
    pos += 13;

    // DecoderSpecificInfo
    let (tag, len, header) = read_descriptor(&data[pos.min(data.len())..])?;
    if tag != 0x05 {
        return Err(Error::format("no decoder specific info"));
    }
    pos += header;
    if data.len() < pos + len {
        return Err(Error::format("decoder specific info runs off the end"));
    }

    Ok(EsdsConfig {
        object_type,
        decoder_config: data[pos..pos + len].to_vec(),
    })
}
