//! PCM packetizer
//!
//! Raw samples are regrouped into packets covering a quarter second
//! each, always an integral number of sample frames. The trailing
//! remainder comes out of `flush` as one smaller final packet.

use crate::codec::Frame;
use crate::demux::TrackInfo;
use crate::error::{Error, Result};
use crate::packetize::RawPacket;
use crate::util::{Buffer, ByteAccumulator, NSECS_PER_SEC};

pub struct PcmPacketizer {
    sample_rate: u32,
    /// Bytes per sample frame across all channels
    frame_bytes: usize,
    /// Sample frames per full packet
    packet_samples: u64,
    acc: ByteAccumulator,
    samples_emitted: u64,
    base_ns: Option<i64>,
}

impl PcmPacketizer {
    pub fn new(info: &TrackInfo) -> Result<Self> {
        let params = info
            .audio
            .ok_or_else(|| Error::invalid_input("PCM track without audio parameters"))?;
        let bit_depth = params
            .bit_depth
            .ok_or_else(|| Error::invalid_input("PCM track without a bit depth"))?;
        if params.sample_rate == 0 || params.channels == 0 || bit_depth % 8 != 0 {
            return Err(Error::invalid_input(format!(
                "unusable PCM parameters: {} Hz, {} channels, {} bits",
                params.sample_rate, params.channels, bit_depth
            )));
        }

        Ok(PcmPacketizer {
            sample_rate: params.sample_rate,
            frame_bytes: params.channels as usize * (bit_depth / 8) as usize,
            packet_samples: params.sample_rate as u64 / 4,
            acc: ByteAccumulator::new(),
            samples_emitted: 0,
            base_ns: None,
        })
    }

    fn timecode_at(&self, samples: u64) -> i64 {
        self.base_ns.unwrap_or(0)
            + (samples as i128 * NSECS_PER_SEC as i128 / self.sample_rate as i128) as i64
    }

    fn emit(&mut self, samples: u64) -> RawPacket {
        let bytes = samples as usize * self.frame_bytes;
        let timecode = self.timecode_at(self.samples_emitted);
        let data = Buffer::from_slice(&self.acc.as_slice()[..bytes]);
        self.acc.consume(bytes);
        self.samples_emitted += samples;
        RawPacket {
            timecode,
            duration: samples as i64 * NSECS_PER_SEC / self.sample_rate as i64,
            keyframe: true,
            data,
        }
    }

    pub(crate) fn handle(&mut self, frame: Frame) -> Result<Vec<RawPacket>> {
        if self.base_ns.is_none() && frame.timecode.is_set() {
            self.base_ns = Some(frame.timecode.nsecs());
        }
        self.acc.add(frame.data.as_slice());

        let mut out = Vec::new();
        while self.acc.len() >= self.packet_samples as usize * self.frame_bytes {
            out.push(self.emit(self.packet_samples));
        }
        Ok(out)
    }

    pub(crate) fn flush(&mut self) -> Result<Vec<RawPacket>> {
        let whole = self.acc.len() / self.frame_bytes;
        if whole == 0 {
            self.acc.clear();
            return Ok(Vec::new());
        }
        let packet = self.emit(whole as u64);
        self.acc.clear();
        Ok(vec![packet])
    }

    /// Restart the sample clock for an appended continuation
    pub(crate) fn rebase(&mut self) {
        self.samples_emitted = 0;
        self.base_ns = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecId;
    use crate::packetize::tests::{audio_info, timed_frame};
    use crate::util::Timecode;

    fn pcm_frame(len: usize) -> Frame {
        let mut frame = timed_frame(CodecId::Pcm, 0, 0, len);
        frame.timecode = Timecode::unset();
        frame
    }

    #[test]
    fn test_reframing_to_quarter_second() {
        // 8 kHz stereo 16-bit: packet = 2000 samples = 8000 bytes
        let info = audio_info(CodecId::Pcm, 8000, 2);
        let mut p = PcmPacketizer::new(&info).unwrap();

        let out = p.handle(pcm_frame(20_000)).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].data.len(), 8000);
        assert_eq!(out[0].timecode, 0);
        assert_eq!(out[1].timecode, 250_000_000);
        assert_eq!(out[0].duration, 250_000_000);

        // 4000 bytes = 1000 samples remain
        let tail = p.flush().unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].data.len(), 4000);
        assert_eq!(tail[0].timecode, 500_000_000);
        assert_eq!(tail[0].duration, 125_000_000);
    }

    #[test]
    fn test_flush_drops_partial_sample_frame() {
        let info = audio_info(CodecId::Pcm, 8000, 2);
        let mut p = PcmPacketizer::new(&info).unwrap();
        p.handle(pcm_frame(3)).unwrap();
        assert!(p.flush().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_odd_bit_depth() {
        let mut info = audio_info(CodecId::Pcm, 8000, 2);
        if let Some(a) = info.audio.as_mut() {
            a.bit_depth = Some(12);
        }
        assert!(PcmPacketizer::new(&info).is_err());
    }
}
