//! AAC packetizer
//!
//! Payloads arrive already stripped to raw AAC access units. Frames
//! from elementary streams carry no timecodes and are re-timed from
//! the running sample count at the core sample rate; SBR doubling
//! only affects the declared output sample rate, never the timing.

use crate::codec::aac::{
    create_audio_specific_config, parse_audio_specific_config, AudioConfig, SAMPLES_PER_FRAME,
};
use crate::codec::Frame;
use crate::demux::TrackInfo;
use crate::error::{Error, Result};
use crate::packetize::RawPacket;
use crate::util::NSECS_PER_SEC;

pub struct AacPacketizer {
    config: AudioConfig,
    samples_emitted: u64,
}

impl AacPacketizer {
    /// Resolve the effective configuration and write it back into the
    /// track headers. `sbr_override` forces SBR signalling on or off.
    pub fn new(info: &mut TrackInfo, sbr_override: Option<bool>) -> Result<Self> {
        let mut config = match &info.decoder_config {
            Some(asc) => parse_audio_specific_config(asc)?,
            None => {
                let params = info
                    .audio
                    .ok_or_else(|| Error::invalid_input("AAC track without audio parameters"))?;
                AudioConfig {
                    // Only the object type is unknowable here; LC is
                    // the only sane assumption
                    profile: 2,
                    channels: params.channels,
                    sample_rate: params.sample_rate,
                    output_sample_rate: params.output_sample_rate,
                    sbr: false,
                }
            }
        };
        if config.sample_rate == 0 {
            return Err(Error::invalid_input("AAC track with zero sample rate"));
        }

        match sbr_override {
            Some(true) => {
                config.sbr = true;
                if config.output_sample_rate.is_none() {
                    config.output_sample_rate = Some(config.sample_rate * 2);
                }
            }
            Some(false) => {
                config.sbr = false;
                config.output_sample_rate = None;
            }
            None => {}
        }

        info.decoder_config = Some(create_audio_specific_config(&config));
        info.audio = Some(config.audio_params());
        info.default_duration_ns = Some(Self::frame_duration(&config));

        Ok(AacPacketizer {
            config,
            samples_emitted: 0,
        })
    }

    fn frame_duration(config: &AudioConfig) -> i64 {
        SAMPLES_PER_FRAME as i64 * NSECS_PER_SEC / config.sample_rate as i64
    }

    pub(crate) fn handle(&mut self, frame: Frame) -> Result<Vec<RawPacket>> {
        let timecode = if frame.timecode.is_set() {
            frame.timecode.nsecs()
        } else {
            (self.samples_emitted as i128 * NSECS_PER_SEC as i128
                / self.config.sample_rate as i128) as i64
        };
        self.samples_emitted += SAMPLES_PER_FRAME as u64;

        let duration = if frame.duration > 0 {
            frame.duration
        } else {
            Self::frame_duration(&self.config)
        };

        Ok(vec![RawPacket {
            timecode,
            duration,
            keyframe: true,
            data: frame.data,
        }])
    }

    pub(crate) fn flush(&mut self) -> Result<Vec<RawPacket>> {
        Ok(Vec::new())
    }

    /// Restart the sample clock for an appended continuation
    pub(crate) fn rebase(&mut self) {
        self.samples_emitted = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecId;
    use crate::packetize::tests::audio_info;
    use crate::util::{Buffer, Timecode};

    fn headerless_frame(len: usize) -> Frame {
        Frame {
            header: crate::codec::FrameHeader::audio(
                CodecId::Aac,
                audio_info(CodecId::Aac, 48000, 2).audio.unwrap(),
            ),
            data: Buffer::from_vec(vec![0u8; len]),
            stream_offset: 0,
            timecode: Timecode::unset(),
            duration: 0,
            keyframe: true,
        }
    }

    #[test]
    fn test_retiming_from_sample_count() {
        let mut info = audio_info(CodecId::Aac, 48000, 2);
        let mut p = AacPacketizer::new(&mut info, None).unwrap();

        let first = p.handle(headerless_frame(64)).unwrap().remove(0);
        let second = p.handle(headerless_frame(64)).unwrap().remove(0);
        assert_eq!(first.timecode, 0);
        // 1024 samples at 48 kHz
        assert_eq!(second.timecode, 21_333_333);
    }

    #[test]
    fn test_sbr_override_rewrites_headers() {
        let mut info = audio_info(CodecId::Aac, 24000, 2);
        AacPacketizer::new(&mut info, Some(true)).unwrap();

        let params = info.audio.unwrap();
        assert_eq!(params.output_sample_rate, Some(48000));
        let asc = parse_audio_specific_config(info.decoder_config.as_deref().unwrap()).unwrap();
        assert!(asc.sbr);
        assert_eq!(asc.output_sample_rate, Some(48000));
    }

    #[test]
    fn test_container_timecodes_pass_through() {
        let mut info = audio_info(CodecId::Aac, 48000, 2);
        let mut p = AacPacketizer::new(&mut info, None).unwrap();

        let mut frame = headerless_frame(64);
        frame.timecode = Timecode::from_nsecs(500_000_000);
        let raw = p.handle(frame).unwrap().remove(0);
        assert_eq!(raw.timecode, 500_000_000);
    }
}
