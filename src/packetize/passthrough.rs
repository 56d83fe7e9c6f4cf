//! Passthrough packetizer for video and subtitle tracks
//!
//! Frames already carry container timecodes and keyframe flags; only
//! the common monotonicity and offset handling applies.

use crate::codec::Frame;
use crate::error::Result;
use crate::packetize::RawPacket;

pub struct PassthroughPacketizer {
    position_ns: i64,
}

impl PassthroughPacketizer {
    pub fn new() -> Self {
        PassthroughPacketizer { position_ns: 0 }
    }

    pub(crate) fn handle(&mut self, frame: Frame) -> Result<Vec<RawPacket>> {
        let timecode = if frame.timecode.is_set() {
            frame.timecode.nsecs()
        } else {
            self.position_ns
        };
        self.position_ns = timecode + frame.duration.max(0);

        Ok(vec![RawPacket {
            timecode,
            duration: frame.duration,
            keyframe: frame.keyframe,
            data: frame.data,
        }])
    }

    pub(crate) fn flush(&mut self) -> Result<Vec<RawPacket>> {
        Ok(Vec::new())
    }

    pub(crate) fn rebase(&mut self) {
        self.position_ns = 0;
    }
}

impl Default for PassthroughPacketizer {
    fn default() -> Self {
        Self::new()
    }
}
