//! Cluster accumulation
//!
//! Blocks are rendered straight into an owned buffer as they arrive;
//! the finished cluster comes out as one contiguous element. A block
//! belongs to the current cluster only while the block count limit,
//! the configured time span, and the 16-bit relative timecode all
//! still hold.

use crate::error::{Error, Result};
use crate::mux::ebml::{master_element, uint_element, write_vint};
use crate::mux::elements::{
    ID_BLOCK, ID_BLOCK_DURATION, ID_BLOCK_GROUP, ID_CLUSTER, ID_CLUSTER_TIMECODE, ID_SIMPLE_BLOCK,
};
use crate::packetize::Packet;

/// Hard ceiling from the 16-bit relative block timecode
const MAX_REL_TICKS: i64 = i16::MAX as i64;

/// Cue candidates collected while building, resolved to byte offsets
/// once the cluster lands in the file
#[derive(Debug, Clone, Copy)]
pub struct PendingCue {
    pub track: u64,
    pub time_ticks: u64,
}

pub struct ClusterBuilder {
    /// Nanoseconds per timecode tick
    timecode_scale: u64,
    max_blocks: u32,
    max_span_ns: i64,
    base_ns: Option<i64>,
    max_ns: i64,
    body: Vec<u8>,
    block_count: u32,
    cues: Vec<PendingCue>,
}

impl ClusterBuilder {
    pub fn new(timecode_scale: u64, max_blocks: u32, max_span_ns: i64) -> Self {
        ClusterBuilder {
            timecode_scale,
            max_blocks: max_blocks.max(1),
            max_span_ns: max_span_ns.max(timecode_scale as i64),
            base_ns: None,
            max_ns: 0,
            body: Vec::new(),
            block_count: 0,
            cues: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.block_count == 0
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// Span of this cluster so far, in nanoseconds
    pub fn span_ns(&self) -> i64 {
        match self.base_ns {
            Some(base) => self.max_ns - base,
            None => 0,
        }
    }

    /// Would `timecode_ns` still fit this cluster?
    pub fn fits(&self, timecode_ns: i64) -> bool {
        let Some(base) = self.base_ns else {
            return true;
        };
        if self.block_count >= self.max_blocks {
            return false;
        }
        let span = timecode_ns.max(self.max_ns) - base;
        span <= self.max_span_ns && span / self.timecode_scale as i64 <= MAX_REL_TICKS
    }

    /// Render one block into the cluster. `duration_block` selects a
    /// BlockGroup with an explicit BlockDuration (subtitles); all other
    /// packets become SimpleBlocks.
    pub fn add(&mut self, packet: &Packet, duration_block: bool, record_cue: bool) -> Result<()> {
        let base = *self.base_ns.get_or_insert(packet.timecode);
        let rel = (packet.timecode - base) / self.timecode_scale as i64;
        if !(0..=MAX_REL_TICKS).contains(&rel) {
            return Err(Error::invalid_state(format!(
                "relative block timecode {} out of range",
                rel
            )));
        }

        let mut block = Vec::new();
        write_vint(&mut block, packet.track);
        block.extend_from_slice(&(rel as i16).to_be_bytes());
        block.push(if duration_block {
            0
        } else if packet.keyframe {
            0x80
        } else {
            0
        });
        block.extend_from_slice(packet.data.as_slice());

        if duration_block {
            let mut group = Vec::new();
            master_element(&mut group, ID_BLOCK, &block);
            let ticks = (packet.duration.max(0) as u64) / self.timecode_scale;
            uint_element(&mut group, ID_BLOCK_DURATION, ticks);
            master_element(&mut self.body, ID_BLOCK_GROUP, &group);
        } else {
            master_element(&mut self.body, ID_SIMPLE_BLOCK, &block);
        }

        if record_cue {
            self.cues.push(PendingCue {
                track: packet.track,
                time_ticks: (packet.timecode / self.timecode_scale as i64) as u64,
            });
        }

        self.block_count += 1;
        self.max_ns = self.max_ns.max(packet.timecode);
        Ok(())
    }

    /// Render the finished cluster element and reset for the next one.
    /// Returns the wire bytes and the cue candidates it contained.
    pub fn finish(&mut self) -> (Vec<u8>, Vec<PendingCue>) {
        let base = self.base_ns.unwrap_or(0);
        let mut inner = Vec::new();
        uint_element(
            &mut inner,
            ID_CLUSTER_TIMECODE,
            (base / self.timecode_scale as i64) as u64,
        );
        inner.extend_from_slice(&self.body);

        let mut out = Vec::new();
        master_element(&mut out, ID_CLUSTER, &inner);

        self.base_ns = None;
        self.max_ns = 0;
        self.body.clear();
        self.block_count = 0;
        (out, std::mem::take(&mut self.cues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Buffer;

    fn packet(track: u64, tc: i64, keyframe: bool) -> Packet {
        Packet {
            track,
            timecode: tc,
            duration: 20_000_000,
            keyframe,
            data: Buffer::from_vec(vec![0xAB; 8]),
        }
    }

    #[test]
    fn test_span_bound_respected() {
        let mut c = ClusterBuilder::new(1_000_000, 1000, 100_000_000);
        assert!(c.fits(0));
        c.add(&packet(1, 0, true), false, false).unwrap();
        assert!(c.fits(100_000_000));
        assert!(!c.fits(100_000_001));
    }

    #[test]
    fn test_block_count_bound() {
        let mut c = ClusterBuilder::new(1_000_000, 2, i64::MAX / 4);
        c.add(&packet(1, 0, true), false, false).unwrap();
        assert!(c.fits(1_000_000));
        c.add(&packet(1, 1_000_000, true), false, false).unwrap();
        assert!(!c.fits(2_000_000));
    }

    #[test]
    fn test_simple_block_wire_shape() {
        let mut c = ClusterBuilder::new(1_000_000, 1000, 5_000_000_000);
        c.add(&packet(3, 40_000_000, true), false, true).unwrap();
        c.add(&packet(3, 60_000_000, false), false, false).unwrap();
        let (bytes, cues) = c.finish();

        // Cluster id
        assert_eq!(&bytes[0..4], &[0x1F, 0x43, 0xB6, 0x75]);
        // Cluster timecode = 40 ticks
        let tc_pos = bytes.iter().position(|&b| b == 0xE7).unwrap();
        assert_eq!(&bytes[tc_pos..tc_pos + 3], &[0xE7, 0x81, 40]);
        // First SimpleBlock: track 3, rel 0, keyframe flag
        let sb = bytes.iter().position(|&b| b == 0xA3).unwrap();
        assert_eq!(&bytes[sb + 2..sb + 6], &[0x83, 0x00, 0x00, 0x80]);

        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].time_ticks, 40);
    }

    #[test]
    fn test_duration_block_renders_group() {
        let mut c = ClusterBuilder::new(1_000_000, 1000, 5_000_000_000);
        let mut p = packet(2, 0, true);
        p.duration = 500_000_000;
        c.add(&p, true, false).unwrap();
        let (bytes, _) = c.finish();
        assert!(bytes.iter().any(|&b| b == 0xA0));
        // BlockDuration of 500 ticks = 0x01F4
        assert!(bytes.windows(4).any(|w| w == [0x9B, 0x82, 0x01, 0xF4]));
    }

    #[test]
    fn test_finish_resets() {
        let mut c = ClusterBuilder::new(1_000_000, 10, 1_000_000_000);
        c.add(&packet(1, 5_000_000_000, true), false, false).unwrap();
        c.finish();
        assert!(c.is_empty());
        // New base establishes fresh
        assert!(c.fits(9_000_000_000));
    }
}
