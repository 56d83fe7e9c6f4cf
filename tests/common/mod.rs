//! Common helpers for mkvmux integration tests
//!
//! Three groups of utilities live here: builders for synthetic AAC and
//! DTS elementary streams, a small EBML scanner for picking apart the
//! muxed output, and the plumbing that runs a whole session against
//! files in a temp directory.

#![allow(dead_code)]

use mkvmux_lib::diag::DiagSink;
use mkvmux_lib::error::Result;
use mkvmux_lib::mux::elements::{ID_EBML, ID_DOCTYPE, ID_SEGMENT};
use mkvmux_lib::session::{MuxConfig, MuxReport, MuxSession, SourceConfig};
use mkvmux_lib::util::BitWriter;
use std::cell::RefCell;
use std::fs::OpenOptions;
use std::io::Cursor;
use std::rc::Rc;

// ============================================================================
// Synthetic elementary streams
// ============================================================================

/// One ADTS frame: MPEG-4 LC, no CRC, filler payload
pub fn make_adts_frame(sfi: u8, channels: u8, payload_len: usize) -> Vec<u8> {
    let frame_len = payload_len + 7;
    let mut bw = BitWriter::new();
    bw.write_bits(0xFFF, 12); // sync
    bw.write_bits(0, 1); // MPEG-4
    bw.write_bits(0, 2); // layer
    bw.write_bits(1, 1); // no CRC
    bw.write_bits(1, 2); // profile LC-1
    bw.write_bits(sfi as u32, 4);
    bw.write_bits(0, 1); // private
    bw.write_bits(channels as u32, 3);
    bw.write_bits(0, 4); // orig/home/copyright
    bw.write_bits(frame_len as u32, 13);
    bw.write_bits(0x7FF, 11); // fullness
    bw.write_bits(0, 2); // raw blocks
    let mut frame = bw.into_bytes();
    frame.extend(std::iter::repeat(0xA5).take(payload_len));
    frame
}

/// `count` back-to-back ADTS frames
pub fn adts_stream(count: usize, sfi: u8, channels: u8, payload_len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for _ in 0..count {
        out.extend(make_adts_frame(sfi, channels, payload_len));
    }
    out
}

/// One 16-bit BE DTS core frame: 48 kHz stereo, 8 PCM blocks
pub fn make_dts_frame(payload_len: usize) -> Vec<u8> {
    let frame_size = 96 + payload_len;
    let mut bw = BitWriter::new();
    bw.write_bits(0x7FFE8001, 32); // sync
    bw.write_bits(1, 1); // frame type: normal
    bw.write_bits(31, 5); // samples deficit: none
    bw.write_bits(0, 1); // no CRC
    bw.write_bits(7, 7); // nblks: 8 blocks = 256 samples
    bw.write_bits((frame_size - 1) as u32, 14);
    bw.write_bits(2, 6); // amode: stereo
    bw.write_bits(13, 4); // sfreq: 48000
    bw.write_bits(13, 5); // bit rate code
    bw.write_bits(0, 1); // fixed
    bw.write_bits(0, 4);
    bw.write_bits(0, 3);
    bw.write_bits(0, 1);
    bw.write_bits(0, 1);
    bw.write_bits(0, 2); // no LFE
    let mut frame = bw.into_bytes();
    frame.resize(frame_size, 0x55);
    frame
}

pub fn dts_stream(count: usize, payload_len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for _ in 0..count {
        out.extend(make_dts_frame(payload_len));
    }
    out
}

/// Nanoseconds covered by one synthetic DTS frame (256 samples, 48 kHz)
pub const DTS_FRAME_NS: i64 = 256 * 1_000_000_000 / 48000;

// ============================================================================
// EBML scanning
// ============================================================================

/// One parsed element: id plus the payload span within the scanned data
#[derive(Debug, Clone, Copy)]
pub struct Element {
    pub id: u32,
    /// Byte offset of the element id itself
    pub header_start: usize,
    /// Byte offset of the first payload byte
    pub start: usize,
    pub size: usize,
}

impl Element {
    pub fn end(&self) -> usize {
        self.start + self.size
    }
}

/// Read an EBML element id, marker bits included
pub fn read_id(data: &[u8], pos: usize) -> (u32, usize) {
    let b0 = data[pos];
    let len = if b0 & 0x80 != 0 {
        1
    } else if b0 & 0x40 != 0 {
        2
    } else if b0 & 0x20 != 0 {
        3
    } else if b0 & 0x10 != 0 {
        4
    } else {
        panic!("invalid EBML id byte {:#04x} at {}", b0, pos);
    };
    let mut id = 0u32;
    for &b in &data[pos..pos + len] {
        id = (id << 8) | b as u32;
    }
    (id, len)
}

/// Read an EBML size or integer vint, marker bit stripped
pub fn read_vint(data: &[u8], pos: usize) -> (u64, usize) {
    let b0 = data[pos];
    let mut len = 1;
    let mut mask = 0x80u8;
    while mask != 0 && b0 & mask == 0 {
        len += 1;
        mask >>= 1;
    }
    assert!(mask != 0, "invalid vint byte {:#04x} at {}", b0, pos);
    let mut value = (b0 & (mask - 1)) as u64;
    for &b in &data[pos + 1..pos + len] {
        value = (value << 8) | b as u64;
    }
    (value, len)
}

/// Scan the children of a master element spanning `start..end`
pub fn children(data: &[u8], start: usize, end: usize) -> Vec<Element> {
    let mut out = Vec::new();
    let mut pos = start;
    while pos < end {
        let (id, id_len) = read_id(data, pos);
        let (size, size_len) = read_vint(data, pos + id_len);
        let payload = pos + id_len + size_len;
        out.push(Element {
            id,
            header_start: pos,
            start: payload,
            size: size as usize,
        });
        pos = payload + size as usize;
    }
    assert_eq!(pos, end, "child elements overrun their parent");
    out
}

pub fn find(elements: &[Element], id: u32) -> Option<Element> {
    elements.iter().copied().find(|e| e.id == id)
}

pub fn find_all(elements: &[Element], id: u32) -> Vec<Element> {
    elements.iter().copied().filter(|e| e.id == id).collect()
}

pub fn uint(data: &[u8], el: Element) -> u64 {
    let mut v = 0u64;
    for &b in &data[el.start..el.end()] {
        v = (v << 8) | b as u64;
    }
    v
}

pub fn float(data: &[u8], el: Element) -> f64 {
    match el.size {
        4 => {
            let mut b = [0u8; 4];
            b.copy_from_slice(&data[el.start..el.end()]);
            f32::from_be_bytes(b) as f64
        }
        8 => {
            let mut b = [0u8; 8];
            b.copy_from_slice(&data[el.start..el.end()]);
            f64::from_be_bytes(b)
        }
        n => panic!("float element with {} bytes", n),
    }
}

pub fn string(data: &[u8], el: Element) -> String {
    String::from_utf8_lossy(&data[el.start..el.end()]).into_owned()
}

/// A muxed file cracked open at the top level
pub struct Mkv {
    pub doctype: String,
    /// The Segment element; its payload span is segment-relative
    /// position zero for cues and seek entries
    pub segment: Element,
}

/// Parse the EBML header and Segment envelope, asserting the segment
/// size was patched to cover exactly the rest of the file
pub fn parse_mkv(data: &[u8]) -> Mkv {
    let (id, id_len) = read_id(data, 0);
    assert_eq!(id, ID_EBML, "file does not start with an EBML header");
    let (size, size_len) = read_vint(data, id_len);
    let header_end = id_len + size_len + size as usize;

    let header_children = children(data, id_len + size_len, header_end);
    let doctype = find(&header_children, ID_DOCTYPE)
        .map(|e| string(data, e))
        .unwrap_or_default();

    let (seg_id, seg_id_len) = read_id(data, header_end);
    assert_eq!(seg_id, ID_SEGMENT, "EBML header not followed by a Segment");
    let (seg_size, seg_size_len) = read_vint(data, header_end + seg_id_len);
    let start = header_end + seg_id_len + seg_size_len;
    assert_eq!(
        start + seg_size as usize,
        data.len(),
        "segment size does not cover the rest of the file"
    );

    Mkv {
        doctype,
        segment: Element {
            id: seg_id,
            header_start: header_end,
            start,
            size: seg_size as usize,
        },
    }
}

/// One block pulled out of a cluster
#[derive(Debug, Clone, Copy)]
pub struct Block {
    pub track: u64,
    pub rel_ticks: i16,
    pub keyframe: bool,
    /// Came wrapped in a BlockGroup with an explicit duration
    pub duration_ticks: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ClusterView {
    pub timecode: u64,
    /// Byte offset of the cluster element id within the file
    pub header_start: usize,
    pub blocks: Vec<Block>,
}

fn parse_block(data: &[u8], el: Element, duration_ticks: Option<u64>) -> Block {
    let (track, track_len) = read_vint(data, el.start);
    let rel = i16::from_be_bytes([data[el.start + track_len], data[el.start + track_len + 1]]);
    let flags = data[el.start + track_len + 2];
    Block {
        track,
        rel_ticks: rel,
        keyframe: flags & 0x80 != 0,
        duration_ticks,
    }
}

/// All clusters of a segment, blocks in file order
pub fn clusters(data: &[u8], mkv: &Mkv) -> Vec<ClusterView> {
    use mkvmux_lib::mux::elements::{
        ID_BLOCK, ID_BLOCK_DURATION, ID_BLOCK_GROUP, ID_CLUSTER, ID_CLUSTER_TIMECODE,
        ID_SIMPLE_BLOCK,
    };

    let top = children(data, mkv.segment.start, mkv.segment.end());
    let mut out = Vec::new();
    for cluster in find_all(&top, ID_CLUSTER) {
        let kids = children(data, cluster.start, cluster.end());
        let timecode = find(&kids, ID_CLUSTER_TIMECODE)
            .map(|e| uint(data, e))
            .unwrap_or(0);
        let mut blocks = Vec::new();
        for kid in &kids {
            if kid.id == ID_SIMPLE_BLOCK {
                blocks.push(parse_block(data, *kid, None));
            } else if kid.id == ID_BLOCK_GROUP {
                let parts = children(data, kid.start, kid.end());
                let duration = find(&parts, ID_BLOCK_DURATION).map(|e| uint(data, e));
                let block = find(&parts, ID_BLOCK).expect("BlockGroup without a Block");
                blocks.push(parse_block(data, block, duration));
            }
        }
        out.push(ClusterView {
            timecode,
            header_start: cluster.header_start,
            blocks,
        });
    }
    out
}

/// Every block of every cluster with its absolute tick timecode
pub fn all_blocks(data: &[u8], mkv: &Mkv) -> Vec<(i64, Block)> {
    let mut out = Vec::new();
    for cluster in clusters(data, mkv) {
        for block in cluster.blocks {
            out.push((cluster.timecode as i64 + block.rel_ticks as i64, block));
        }
    }
    out
}

// ============================================================================
// Session plumbing
// ============================================================================

/// Run a whole session over in-memory inputs, writing outputs to a
/// temp directory and reading them back
pub fn run_session(
    config: MuxConfig,
    inputs: Vec<(Vec<u8>, SourceConfig)>,
) -> (Result<MuxReport>, Vec<Vec<u8>>, DiagSink) {
    let dir = tempfile::tempdir().expect("temp dir");
    let base = dir.path().to_path_buf();
    let paths: Rc<RefCell<Vec<std::path::PathBuf>>> = Rc::new(RefCell::new(Vec::new()));
    let paths_cb = Rc::clone(&paths);

    let mut session = MuxSession::new(
        config,
        Box::new(move |idx| {
            let path = base.join(format!("out_{:03}.mkv", idx));
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            paths_cb.borrow_mut().push(path);
            Ok(file)
        }),
    );

    let mut diag = DiagSink::new();
    let sources = inputs
        .into_iter()
        .map(|(data, sconfig)| (Cursor::new(data), sconfig))
        .collect();
    let report = session.run(sources, &mut diag);

    let outputs = paths
        .borrow()
        .iter()
        .map(|p| std::fs::read(p).expect("read output file"))
        .collect();
    (report, outputs, diag)
}
