//! Packetizer layer
//!
//! Turns demuxed frames into output packets with per-track monotonic
//! timecodes. Format-specific reframing lives in the submodules: AAC
//! and DTS re-time headerless streams from their sample counts, PCM
//! regroups raw bytes into fixed-duration packets, everything else
//! passes through.

pub mod aac;
pub mod dts;
pub mod passthrough;
pub mod pcm;

use crate::codec::{CodecId, Frame};
use crate::demux::TrackInfo;
use crate::diag::DiagSink;
use crate::error::{Error, Result};
use crate::util::{Buffer, MediaType};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One output unit: a codec payload with its final timing, ready for
/// cluster assembly
#[derive(Debug, Clone)]
pub struct Packet {
    /// Output track number this packet belongs to
    pub track: u64,
    /// Output timecode in nanoseconds
    pub timecode: i64,
    pub duration: i64,
    pub keyframe: bool,
    pub data: Buffer,
}

/// Compatibility verdict for connecting a continuation track
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connect {
    Compatible,
    /// Core parameters match but codec private data differs; muxing
    /// proceeds with a warning
    Maybe(String),
    Incompatible(String),
}

/// Outcome of feeding one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Frame absorbed, nothing emitted yet
    NeedMoreData,
    /// At least one packet is ready
    PacketsReady,
}

/// When to write cue entries for a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CuePolicy {
    /// Keyframes for video, sparse entries for audio-only outputs
    #[default]
    Default,
    /// Every keyframe packet
    Keyframes,
    /// Every packet
    All,
    /// No cue entries
    None,
}

/// Per-track overrides handed down from the configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackOptions {
    /// Language override, ISO 639-2
    pub language: Option<String>,
    /// Constant shift applied to every timecode
    pub sync_offset_ns: i64,
    /// Force SBR on or off for AAC; `None` trusts the bitstream
    pub aac_is_sbr: Option<bool>,
    pub cue_policy: CuePolicy,
}

/// Payload with source-timeline timing, produced by a kind before the
/// common offset and monotonicity pass
#[derive(Debug)]
pub(crate) struct RawPacket {
    pub timecode: i64,
    pub duration: i64,
    pub keyframe: bool,
    pub data: Buffer,
}

pub(crate) enum PacketizerKind {
    Aac(aac::AacPacketizer),
    Dts(dts::DtsPacketizer),
    Pcm(pcm::PcmPacketizer),
    Passthrough(passthrough::PassthroughPacketizer),
}

/// One output track's packetizer: format-specific reframing plus the
/// common timecode bookkeeping
pub struct Packetizer {
    track_number: u64,
    info: TrackInfo,
    opts: TrackOptions,
    kind: PacketizerKind,
    /// Offset carried over from an appended predecessor
    offset_ns: i64,
    last_timecode: Option<i64>,
    /// End of the furthest packet handed out so far
    max_seen: i64,
    warned_backwards: bool,
    queue: VecDeque<Packet>,
}

impl Packetizer {
    /// Build the right packetizer for a track. AAC applies the SBR
    /// override here so the track headers already reflect it.
    pub fn new(track_number: u64, info: TrackInfo, opts: TrackOptions) -> Result<Self> {
        let mut info = info;
        if let Some(lang) = &opts.language {
            info.language = Some(lang.clone());
        }

        let kind = match (info.codec, info.media_type) {
            (CodecId::Aac, MediaType::Audio) => {
                let p = aac::AacPacketizer::new(&mut info, opts.aac_is_sbr)?;
                PacketizerKind::Aac(p)
            }
            (CodecId::Dts, MediaType::Audio) => {
                PacketizerKind::Dts(dts::DtsPacketizer::new(&info)?)
            }
            (CodecId::Pcm, MediaType::Audio) => {
                PacketizerKind::Pcm(pcm::PcmPacketizer::new(&info)?)
            }
            (_, MediaType::Video) | (_, MediaType::Subtitle) => {
                PacketizerKind::Passthrough(passthrough::PassthroughPacketizer::new())
            }
            (codec, media) => {
                return Err(Error::unsupported(format!(
                    "no packetizer for {:?} {} tracks",
                    codec, media
                )))
            }
        };

        Ok(Packetizer {
            track_number,
            info,
            opts,
            kind,
            offset_ns: 0,
            last_timecode: None,
            max_seen: 0,
            warned_backwards: false,
            queue: VecDeque::new(),
        })
    }

    /// Track headers as they should appear in the output, with all
    /// overrides applied
    pub fn info(&self) -> &TrackInfo {
        &self.info
    }

    pub fn track_number(&self) -> u64 {
        self.track_number
    }

    pub fn cue_policy(&self) -> CuePolicy {
        self.opts.cue_policy
    }

    /// Shift every future timecode, used when connecting this track as
    /// the continuation of an appended predecessor. The internal sample
    /// clock restarts so elementary streams re-time from zero again.
    pub fn set_timecode_offset(&mut self, offset_ns: i64) {
        self.offset_ns = offset_ns;
        match &mut self.kind {
            PacketizerKind::Aac(p) => p.rebase(),
            PacketizerKind::Dts(p) => p.rebase(),
            PacketizerKind::Pcm(p) => p.rebase(),
            PacketizerKind::Passthrough(p) => p.rebase(),
        }
    }

    /// End of the furthest packet emitted so far; a continuation of
    /// this track starts here
    pub fn max_seen_timecode(&self) -> i64 {
        self.max_seen
    }

    /// Feed one demuxed frame
    pub fn process(&mut self, frame: Frame, diag: &mut DiagSink) -> Result<ProcessStatus> {
        let raw = match &mut self.kind {
            PacketizerKind::Aac(p) => p.handle(frame)?,
            PacketizerKind::Dts(p) => p.handle(frame)?,
            PacketizerKind::Pcm(p) => p.handle(frame)?,
            PacketizerKind::Passthrough(p) => p.handle(frame)?,
        };
        self.enqueue(raw, diag);
        if self.queue.is_empty() {
            Ok(ProcessStatus::NeedMoreData)
        } else {
            Ok(ProcessStatus::PacketsReady)
        }
    }

    /// Emit any partial trailing payload as one final shorter packet
    pub fn flush(&mut self, diag: &mut DiagSink) -> Result<()> {
        let raw = match &mut self.kind {
            PacketizerKind::Aac(p) => p.flush()?,
            PacketizerKind::Dts(p) => p.flush()?,
            PacketizerKind::Pcm(p) => p.flush()?,
            PacketizerKind::Passthrough(p) => p.flush()?,
        };
        self.enqueue(raw, diag);
        Ok(())
    }

    fn enqueue(&mut self, raw: Vec<RawPacket>, diag: &mut DiagSink) {
        for r in raw {
            let mut tc = r.timecode + self.opts.sync_offset_ns + self.offset_ns;
            if let Some(last) = self.last_timecode {
                if tc < last {
                    if !self.warned_backwards {
                        diag.warning(
                            None,
                            format!(
                                "track {}: timecode went backwards ({} < {} ns), clamping",
                                self.track_number, tc, last
                            ),
                        );
                        self.warned_backwards = true;
                    }
                    tc = last;
                }
            }
            self.last_timecode = Some(tc);
            self.max_seen = self.max_seen.max(tc + r.duration.max(0));
            self.queue.push_back(Packet {
                track: self.track_number,
                timecode: tc,
                duration: r.duration,
                keyframe: r.keyframe,
                data: r.data,
            });
        }
    }

    /// Timecode of the next ready packet, for the global merge
    pub fn peek_timecode(&self) -> Option<i64> {
        self.queue.front().map(|p| p.timecode)
    }

    pub fn next_packet(&mut self) -> Option<Packet> {
        self.queue.pop_front()
    }

    pub fn packets_ready(&self) -> usize {
        self.queue.len()
    }

    /// Can `next` continue this track after an append?
    pub fn connect_check(&self, next: &TrackInfo) -> Connect {
        if next.codec != self.info.codec {
            return Connect::Incompatible(format!(
                "codec mismatch: {:?} continued by {:?}",
                self.info.codec, next.codec
            ));
        }
        if next.media_type != self.info.media_type {
            return Connect::Incompatible(format!(
                "media type mismatch: {} continued by {}",
                self.info.media_type, next.media_type
            ));
        }
        match (self.info.audio, next.audio) {
            (Some(a), Some(b)) => {
                if a.sample_rate != b.sample_rate {
                    return Connect::Incompatible(format!(
                        "sample rate mismatch: {} vs {}",
                        a.sample_rate, b.sample_rate
                    ));
                }
                if a.channels != b.channels {
                    return Connect::Incompatible(format!(
                        "channel count mismatch: {} vs {}",
                        a.channels, b.channels
                    ));
                }
                if a.bit_depth.is_some() && b.bit_depth.is_some() && a.bit_depth != b.bit_depth {
                    return Connect::Incompatible(format!(
                        "bit depth mismatch: {:?} vs {:?}",
                        a.bit_depth, b.bit_depth
                    ));
                }
            }
            _ => {}
        }
        if let (Some(a), Some(b)) = (self.info.video, next.video) {
            if a.width != b.width || a.height != b.height {
                return Connect::Incompatible(format!(
                    "frame size mismatch: {}x{} vs {}x{}",
                    a.width, a.height, b.width, b.height
                ));
            }
        }
        if self.info.decoder_config != next.decoder_config {
            return Connect::Maybe(
                "codec private data differs; playback of the appended part may glitch".into(),
            );
        }
        Connect::Compatible
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::{AudioParams, FrameHeader};
    use crate::util::Timecode;

    pub(crate) fn audio_info(codec: CodecId, rate: u32, channels: u8) -> TrackInfo {
        TrackInfo {
            id: 1,
            media_type: MediaType::Audio,
            codec,
            audio: Some(AudioParams {
                sample_rate: rate,
                channels,
                bit_depth: Some(16),
                output_sample_rate: None,
            }),
            video: None,
            decoder_config: None,
            default_duration_ns: None,
            language: None,
        }
    }

    pub(crate) fn timed_frame(codec: CodecId, tc_ns: i64, duration: i64, len: usize) -> Frame {
        Frame {
            header: FrameHeader::audio(
                codec,
                AudioParams {
                    sample_rate: 48000,
                    channels: 2,
                    bit_depth: Some(16),
                    output_sample_rate: None,
                },
            ),
            data: Buffer::from_vec(vec![0u8; len]),
            stream_offset: 0,
            timecode: Timecode::from_nsecs(tc_ns),
            duration,
            keyframe: true,
        }
    }

    #[test]
    fn test_offset_applies_to_source_timecodes() {
        let info = audio_info(CodecId::Dts, 48000, 2);
        let mut p = Packetizer::new(1, info, TrackOptions::default()).unwrap();
        p.set_timecode_offset(5_000_000_000);

        let mut diag = DiagSink::new();
        p.process(timed_frame(CodecId::Dts, 200_000_000, 10_000_000, 32), &mut diag)
            .unwrap();
        let pkt = p.next_packet().unwrap();
        assert_eq!(pkt.timecode, 5_200_000_000);
    }

    #[test]
    fn test_backwards_timecode_clamped_with_warning() {
        let info = audio_info(CodecId::Dts, 48000, 2);
        let mut p = Packetizer::new(1, info, TrackOptions::default()).unwrap();

        let mut diag = DiagSink::new();
        p.process(timed_frame(CodecId::Dts, 100_000_000, 10_000_000, 32), &mut diag)
            .unwrap();
        p.process(timed_frame(CodecId::Dts, 50_000_000, 10_000_000, 32), &mut diag)
            .unwrap();

        let first = p.next_packet().unwrap();
        let second = p.next_packet().unwrap();
        assert_eq!(second.timecode, first.timecode);
        assert!(diag.diags().iter().any(|d| d.message.contains("backwards")));
    }

    #[test]
    fn test_connect_check_verdicts() {
        let info = audio_info(CodecId::Aac, 44100, 2);
        let p = Packetizer::new(1, info.clone(), TrackOptions::default()).unwrap();

        assert_eq!(p.connect_check(&p.info().clone()), Connect::Compatible);

        let mut other = audio_info(CodecId::Aac, 48000, 2);
        other.decoder_config = p.info().decoder_config.clone();
        assert!(matches!(p.connect_check(&other), Connect::Incompatible(_)));

        let mut maybe = p.info().clone();
        maybe.decoder_config = Some(vec![0x12, 0x34]);
        assert!(matches!(p.connect_check(&maybe), Connect::Maybe(_)));
    }
}
