//! DTS packetizer
//!
//! Frames come out of the parser normalized to 16-bit big endian with
//! a known per-frame duration; elementary streams are re-timed by
//! accumulating those durations.

use crate::codec::Frame;
use crate::demux::TrackInfo;
use crate::error::{Error, Result};
use crate::packetize::RawPacket;

pub struct DtsPacketizer {
    position_ns: i64,
}

impl DtsPacketizer {
    pub fn new(info: &TrackInfo) -> Result<Self> {
        if info.audio.is_none() {
            return Err(Error::invalid_input("DTS track without audio parameters"));
        }
        Ok(DtsPacketizer { position_ns: 0 })
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
            keyframe: true,
            data: frame.data,
        }])
    }

    pub(crate) fn flush(&mut self) -> Result<Vec<RawPacket>> {
        Ok(Vec::new())
    }

    /// Restart the running position for an appended continuation
    pub(crate) fn rebase(&mut self) {
        self.position_ns = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecId;
    use crate::packetize::tests::{audio_info, timed_frame};
    use crate::util::Timecode;

    #[test]
    fn test_retiming_accumulates_durations() {
        let info = audio_info(CodecId::Dts, 48000, 2);
        let mut p = DtsPacketizer::new(&info).unwrap();

        let mut frame = timed_frame(CodecId::Dts, 0, 10_666_666, 32);
        frame.timecode = Timecode::unset();
        let first = p.handle(frame.clone()).unwrap().remove(0);
        let second = p.handle(frame).unwrap().remove(0);

        assert_eq!(first.timecode, 0);
        assert_eq!(second.timecode, 10_666_666);
    }
}
