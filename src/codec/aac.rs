//! AAC elementary stream parsing
//!
//! Covers the three framings this crate accepts -- ADTS, LOAS/LATM and
//! ADIF -- plus AudioSpecificConfig decoding and encoding per MPEG-4
//! Part 3. The streaming [`AacParser`] locates frame syncs in arbitrary
//! byte input, strips the framing headers and emits raw AAC frames.

use crate::codec::{AudioParams, CodecId, Frame, FrameHeader, HeaderStatus};
use crate::error::{Error, Result};
use crate::util::{BitReader, BitWriter, Buffer, ByteAccumulator, Timecode, NSECS_PER_SEC};
use std::collections::VecDeque;

/// Samples per AAC frame
pub const SAMPLES_PER_FRAME: u32 = 1024;

/// LOAS/LATM sync word (11 bits)
const LOAS_SYNC_WORD: u32 = 0x2b7;

/// Sync-extension marker inside an AudioSpecificConfig (11 bits)
const SYNC_EXTENSION_TYPE: u32 = 0x2b7;

/// MPEG-4 sampling frequency table, indexed by the 4-bit frequency index
const SAMPLING_FREQS: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// AAC object types this crate understands
pub const AOT_MAIN: u8 = 1;
pub const AOT_LC: u8 = 2;
pub const AOT_SSR: u8 = 3;
pub const AOT_LTP: u8 = 4;
pub const AOT_SBR: u8 = 5;
pub const AOT_PS: u8 = 29;

/// Look up the sampling frequency index for a rate.
///
/// Rates not in the table map to the nearest table entry at or below
/// the requested rate, matching decoder expectations for oddball rates.
pub fn get_sampling_freq_idx(sampling_freq: u32) -> u8 {
    for (idx, &freq) in SAMPLING_FREQS.iter().enumerate() {
        if sampling_freq >= freq {
            return idx as u8;
        }
    }
    (SAMPLING_FREQS.len() - 1) as u8
}

/// Decoded AAC configuration (from an AudioSpecificConfig or a framing
/// header)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    /// Audio object type (profile)
    pub profile: u8,
    pub channels: u8,
    pub sample_rate: u32,
    /// Present when SBR raises the output rate
    pub output_sample_rate: Option<u32>,
    pub sbr: bool,
}

impl AudioConfig {
    pub fn audio_params(&self) -> AudioParams {
        AudioParams {
            sample_rate: self.sample_rate,
            channels: self.channels,
            bit_depth: None,
            output_sample_rate: self.output_sample_rate,
        }
    }
}

fn read_object_type(br: &mut BitReader) -> Result<u8> {
    let aot = br.read_bits(5)?;
    if aot == 31 {
        // Escape to the extended 6-bit code
        Ok((32 + br.read_bits(6)?) as u8)
    } else {
        Ok(aot as u8)
    }
}

fn read_sample_rate(br: &mut BitReader) -> Result<u32> {
    let idx = br.read_bits(4)?;
    if idx == 15 {
        return br.read_bits(24);
    }
    SAMPLING_FREQS
        .get(idx as usize)
        .copied()
        .ok_or_else(|| Error::codec(format!("reserved sampling frequency index {}", idx)))
}

/// Parse an AudioSpecificConfig bitstream
pub fn parse_audio_specific_config(data: &[u8]) -> Result<AudioConfig> {
    let mut br = BitReader::new(data);

    let mut profile = read_object_type(&mut br)?;
    let sample_rate = read_sample_rate(&mut br)?;
    let channels = br.read_bits(4)? as u8;

    let mut config = AudioConfig {
        profile,
        channels,
        sample_rate,
        output_sample_rate: None,
        sbr: false,
    };

    if profile == AOT_SBR || profile == AOT_PS {
        // Explicit hierarchical signaling: the extension rate comes
        // first, then the actual object type
        config.sbr = true;
        config.output_sample_rate = Some(read_sample_rate(&mut br)?);
        profile = read_object_type(&mut br)?;
        config.profile = profile;
    } else {
        // Scan the trailing bits for a sync extension announcing SBR
        while br.remaining() >= 16 {
            if br.peek_bits(11)? == SYNC_EXTENSION_TYPE {
                br.skip_bits(11)?;
                let ext_type = read_object_type(&mut br)?;
                if ext_type == AOT_SBR {
                    config.sbr = br.read_bit()?;
                    if config.sbr {
                        config.output_sample_rate = Some(read_sample_rate(&mut br)?);
                    }
                }
                break;
            }
            br.skip_bits(1)?;
        }
    }

    if config.channels == 0 && config.profile != AOT_SBR {
        return Err(Error::unsupported(
            "AudioSpecificConfig with channel configuration 0 (PCE-defined layouts)",
        ));
    }

    Ok(config)
}

fn write_sample_rate(bw: &mut BitWriter, rate: u32) {
    match SAMPLING_FREQS.iter().position(|&f| f == rate) {
        Some(idx) => bw.write_bits(idx as u32, 4),
        None => {
            bw.write_bits(15, 4);
            bw.write_bits(rate, 24);
        }
    }
}

fn write_object_type(bw: &mut BitWriter, aot: u8) {
    if aot < 31 {
        bw.write_bits(aot as u32, 5);
    } else {
        bw.write_bits(31, 5);
        bw.write_bits((aot - 32) as u32, 6);
    }
}

/// Build an AudioSpecificConfig from decoder parameters.
///
/// The inverse of [`parse_audio_specific_config`] for every valid
/// parameter combination.
pub fn create_audio_specific_config(config: &AudioConfig) -> Vec<u8> {
    let mut bw = BitWriter::new();

    write_object_type(&mut bw, config.profile);
    write_sample_rate(&mut bw, config.sample_rate);
    bw.write_bits(config.channels as u32, 4);

    if config.sbr {
        bw.write_bits(SYNC_EXTENSION_TYPE, 11);
        write_object_type(&mut bw, AOT_SBR);
        bw.write_bits(1, 1);
        let out_rate = config
            .output_sample_rate
            .unwrap_or(config.sample_rate * 2);
        write_sample_rate(&mut bw, out_rate);
    }

    bw.into_bytes()
}

/// Framing variant detected in the input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacFraming {
    Adts,
    Loas,
    Adif,
}

/// Decoded ADTS frame header
#[derive(Debug, Clone, Copy)]
pub struct AdtsHeader {
    pub mpeg4: bool,
    pub profile: u8,
    pub sample_rate: u32,
    pub channels: u8,
    /// Total frame length including the header
    pub frame_length: usize,
    /// Header size: 7 bytes, or 9 with CRC
    pub header_size: usize,
}

/// True if a 24-bit window may start an ADTS header (12-bit sync 0xFFF)
#[inline]
pub fn is_adts_candidate(window: u32) -> bool {
    (window & 0xfff000) == 0xfff000
}

/// Decode an ADTS header at the start of `data`
pub fn parse_adts_header(data: &[u8]) -> Result<AdtsHeader> {
    if data.len() < 7 {
        return Err(Error::NeedMoreData);
    }

    let mut br = BitReader::new(data);
    let sync = br.read_bits(12)?;
    if sync != 0xFFF {
        return Err(Error::codec("ADTS sync word not found"));
    }

    let id = br.read_bits(1)?; // 0 = MPEG-4, 1 = MPEG-2
    let layer = br.read_bits(2)?;
    if layer != 0 {
        return Err(Error::codec("ADTS layer field must be zero"));
    }
    let protection_absent = br.read_bit()?;
    let profile = br.read_bits(2)? as u8;
    let sfi = br.read_bits(4)? as usize;
    let sample_rate = *SAMPLING_FREQS
        .get(sfi)
        .ok_or_else(|| Error::codec(format!("ADTS reserved frequency index {}", sfi)))?;
    br.skip_bits(1)?; // private
    let channels = br.read_bits(3)? as u8;
    br.skip_bits(4)?; // original, home, copyright id, copyright start
    let frame_length = br.read_bits(13)? as usize;
    br.skip_bits(11)?; // buffer fullness
    br.skip_bits(2)?; // raw data blocks

    let header_size = if protection_absent { 7 } else { 9 };
    if frame_length < header_size {
        return Err(Error::codec(format!(
            "ADTS frame length {} shorter than its header",
            frame_length
        )));
    }

    Ok(AdtsHeader {
        mpeg4: id == 0,
        // ADTS stores the object type minus one
        profile: profile + 1,
        sample_rate,
        channels,
        frame_length,
        header_size,
    })
}

/// LATM value reader: 2-bit byte count, then that many bytes plus one
fn latm_get_value(br: &mut BitReader) -> Result<u32> {
    let bytes = br.read_bits(2)? + 1;
    br.read_bits((bytes * 8) as u8)
}

/// Mux state parsed from a LOAS StreamMuxConfig
#[derive(Debug, Clone, Default)]
struct LatmState {
    config: Option<AudioConfig>,
    frame_length_type: u32,
    /// Error-protection configuration for ER object types
    ep_config: Option<u32>,
}

impl LatmState {
    /// Parse a StreamMuxConfig. Only single-program, single-layer
    /// streams are supported, which covers LOAS in practice.
    fn parse_stream_mux_config(&mut self, br: &mut BitReader) -> Result<()> {
        let audio_mux_version = br.read_bits(1)?;
        let mut audio_mux_version_a = 0;
        if audio_mux_version == 1 {
            audio_mux_version_a = br.read_bits(1)?;
        }
        if audio_mux_version_a != 0 {
            return Err(Error::unsupported("LATM audioMuxVersionA != 0"));
        }
        if audio_mux_version == 1 {
            latm_get_value(br)?; // taraBufferFullness
        }

        br.skip_bits(1)?; // allStreamsSameTimeFraming
        let num_sub_frames = br.read_bits(6)?;
        let num_program = br.read_bits(4)?;
        let num_layer = br.read_bits(3)?;
        if num_sub_frames != 0 || num_program != 0 || num_layer != 0 {
            return Err(Error::unsupported(
                "LATM multiplex with multiple programs, layers or subframes",
            ));
        }

        let config = if audio_mux_version == 0 {
            parse_asc_bits(br)?
        } else {
            let asc_len = latm_get_value(br)? as usize;
            let start = br.position();
            let cfg = parse_asc_bits(br)?;
            let used = br.position() - start;
            if used < asc_len {
                br.skip_bits(asc_len - used)?;
            }
            cfg
        };

        self.frame_length_type = br.read_bits(3)?;
        match self.frame_length_type {
            0 => {
                br.skip_bits(8)?; // latmBufferFullness
            }
            1 => {
                br.skip_bits(9)?; // fixed frameLength
            }
            3 | 4 | 5 => {
                br.skip_bits(6)?; // CELP frame length table index
            }
            6 | 7 => {
                br.skip_bits(1)?; // HVXC frame length table index
            }
            _ => {}
        }

        // ER object types carry an error-protection config
        if config.profile >= 17 {
            self.ep_config = Some(br.read_bits(2)?);
        }

        let other_data_present = br.read_bit()?;
        if other_data_present {
            loop {
                let esc = br.read_bit()?;
                br.skip_bits(8)?;
                if !esc {
                    break;
                }
            }
        }
        if br.read_bit()? {
            br.skip_bits(8)?; // crcCheckSum
        }

        self.config = Some(config);
        Ok(())
    }
}

/// Parse an AudioSpecificConfig directly from a bit reader positioned
/// inside a larger structure (no sync-extension scan; LATM signals SBR
/// hierarchically)
fn parse_asc_bits(br: &mut BitReader) -> Result<AudioConfig> {
    let mut profile = read_object_type(br)?;
    let sample_rate = read_sample_rate(br)?;
    let channels = br.read_bits(4)? as u8;

    let mut config = AudioConfig {
        profile,
        channels,
        sample_rate,
        output_sample_rate: None,
        sbr: false,
    };

    if profile == AOT_SBR || profile == AOT_PS {
        config.sbr = true;
        config.output_sample_rate = Some(read_sample_rate(br)?);
        profile = read_object_type(br)?;
        config.profile = profile;
    }

    // GASpecificConfig for the common object types
    if matches!(profile, AOT_MAIN | AOT_LC | AOT_SSR | AOT_LTP) {
        br.skip_bits(1)?; // frameLengthFlag
        if br.read_bit()? {
            br.skip_bits(14)?; // coreCoderDelay
        }
        let extension_flag = br.read_bit()?;
        if channels == 0 {
            return Err(Error::unsupported("LATM PCE-defined channel layout"));
        }
        if extension_flag {
            br.skip_bits(1)?; // extensionFlag3 for AOT 1..4
        }
    }

    Ok(config)
}

/// Decoded ADIF header (file-start framing, no per-frame sync)
#[derive(Debug, Clone, Copy)]
pub struct AdifHeader {
    pub profile: u8,
    pub sample_rate: u32,
    pub channels: u8,
}

/// Parse the fixed part of an ADIF header, enough to describe the
/// stream. ADIF carries one program config element per program.
pub fn parse_adif_header(data: &[u8]) -> Result<AdifHeader> {
    if data.len() < 20 {
        return Err(Error::NeedMoreData);
    }
    if &data[0..4] != b"ADIF" {
        return Err(Error::codec("ADIF magic not found"));
    }

    let mut br = BitReader::new(&data[4..]);
    if br.read_bit()? {
        br.skip_bits(72)?; // copyright id
    }
    br.skip_bits(2)?; // original/copy, home
    let bitstream_type = br.read_bit()?;
    br.skip_bits(23)?; // bitrate
    let num_pce = br.read_bits(4)? + 1;
    if num_pce != 1 {
        return Err(Error::unsupported("ADIF with multiple program config elements"));
    }
    if !bitstream_type {
        br.skip_bits(20)?; // adif_buffer_fullness
    }

    // program_config_element
    br.skip_bits(4)?; // element_instance_tag
    let profile = br.read_bits(2)? as u8 + 1;
    let sfi = br.read_bits(4)? as usize;
    let sample_rate = *SAMPLING_FREQS
        .get(sfi)
        .ok_or_else(|| Error::codec("ADIF reserved frequency index"))?;
    let num_front = br.read_bits(4)?;
    let num_side = br.read_bits(4)?;
    let num_back = br.read_bits(4)?;
    let num_lfe = br.read_bits(2)?;

    // Stereo pairs count double; good enough for a descriptor
    let channels = (num_front + num_side + num_back + num_lfe) as u8;

    Ok(AdifHeader {
        profile,
        sample_rate,
        channels: channels.max(1),
    })
}

/// Streaming AAC frame parser.
///
/// Feed bytes with [`AacParser::add_bytes`]; complete frames accumulate
/// and are drained with [`AacParser::get_frame`]. The first sync also
/// fixes the framing variant for the rest of the stream.
pub struct AacParser {
    acc: ByteAccumulator,
    frames: VecDeque<Frame>,
    framing: Option<AacFraming>,
    config: Option<AudioConfig>,
    latm: LatmState,
    /// Bytes consumed from the stream so far
    stream_position: u64,
    frames_parsed: u64,
    /// Probing switch: stop parsing after this many frames (0 = never)
    abort_after_num_frames: u64,
    /// Probing switch: the first frame must start at the first byte
    require_frame_at_first_byte: bool,
    finished: bool,
}

impl AacParser {
    /// Create a parser in normal (non-probing) mode
    pub fn new() -> Self {
        AacParser {
            acc: ByteAccumulator::new(),
            frames: VecDeque::new(),
            framing: None,
            config: None,
            latm: LatmState::default(),
            stream_position: 0,
            frames_parsed: 0,
            abort_after_num_frames: 0,
            require_frame_at_first_byte: false,
            finished: false,
        }
    }

    /// Probing-mode switch: abort after `n` parsed frames
    pub fn set_abort_after_num_frames(&mut self, n: u64) {
        self.abort_after_num_frames = n;
    }

    /// Probing-mode switch: require the first frame at byte zero
    pub fn set_require_frame_at_first_byte(&mut self, require: bool) {
        self.require_frame_at_first_byte = require;
    }

    /// The detected framing variant, once a sync has been found
    pub fn framing(&self) -> Option<AacFraming> {
        self.framing
    }

    /// The decoded stream configuration, once known
    pub fn config(&self) -> Option<AudioConfig> {
        self.config
    }

    /// Append input bytes and parse any complete frames
    pub fn add_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.acc.add(bytes);
        self.parse()
    }

    /// Number of complete frames waiting to be drained
    pub fn frames_available(&self) -> usize {
        self.frames.len()
    }

    /// Pop the next parsed frame
    pub fn get_frame(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    /// Try to decode a header at the front of the accumulator without
    /// consuming anything
    pub fn decode_header(&self) -> HeaderStatus {
        let data = self.acc.as_slice();
        match self.framing {
            Some(AacFraming::Adts) => Self::adts_status(data),
            Some(AacFraming::Loas) => Self::loas_status(data),
            Some(AacFraming::Adif) => {
                if data.len() >= 4 && &data[0..4] == b"ADIF" {
                    HeaderStatus::Success
                } else {
                    HeaderStatus::Failure
                }
            }
            None => {
                if data.len() < 3 {
                    return HeaderStatus::NeedMoreData;
                }
                let window =
                    ((data[0] as u32) << 16) | ((data[1] as u32) << 8) | data[2] as u32;
                if is_adts_candidate(window) {
                    Self::adts_status(data)
                } else if Self::is_loas_candidate(data) {
                    Self::loas_status(data)
                } else if &data[0..3.min(data.len())] == &b"ADI"[..] {
                    HeaderStatus::NeedMoreData
                } else {
                    HeaderStatus::Failure
                }
            }
        }
    }

    fn adts_status(data: &[u8]) -> HeaderStatus {
        match parse_adts_header(data) {
            Ok(hdr) => {
                if data.len() < hdr.frame_length {
                    HeaderStatus::NeedMoreData
                } else {
                    HeaderStatus::Success
                }
            }
            Err(Error::NeedMoreData) => HeaderStatus::NeedMoreData,
            Err(_) => HeaderStatus::Failure,
        }
    }

    fn is_loas_candidate(data: &[u8]) -> bool {
        data.len() >= 2 && data[0] == 0x56 && (data[1] & 0xE0) == 0xE0
    }

    fn loas_status(data: &[u8]) -> HeaderStatus {
        if data.len() < 3 {
            return HeaderStatus::NeedMoreData;
        }
        if !Self::is_loas_candidate(data) {
            return HeaderStatus::Failure;
        }
        let length = (((data[1] & 0x1F) as usize) << 8) | data[2] as usize;
        if data.len() < 3 + length {
            HeaderStatus::NeedMoreData
        } else {
            HeaderStatus::Success
        }
    }

    /// Scan for the first position with `min_run` consecutive valid
    /// headers of one framing. Returns the framing and byte offset.
    pub fn find_consecutive_frames(data: &[u8], min_run: usize) -> Option<(AacFraming, usize)> {
        for start in 0..data.len().saturating_sub(2) {
            if let Some(framing) = Self::run_at(&data[start..], min_run) {
                return Some((framing, start));
            }
        }
        None
    }

    fn run_at(data: &[u8], min_run: usize) -> Option<AacFraming> {
        // ADTS run
        let mut pos = 0;
        let mut found = 0;
        while found < min_run {
            match parse_adts_header(&data[pos.min(data.len())..]) {
                Ok(hdr) => {
                    found += 1;
                    pos += hdr.frame_length;
                    if pos > data.len() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        if found >= min_run {
            return Some(AacFraming::Adts);
        }

        // LOAS run
        let mut pos = 0;
        let mut found = 0;
        while found < min_run && pos + 3 <= data.len() {
            let window = &data[pos..];
            if !Self::is_loas_candidate(window) {
                break;
            }
            let length = (((window[1] & 0x1F) as usize) << 8) | window[2] as usize;
            if length == 0 || pos + 3 + length > data.len() {
                break;
            }
            found += 1;
            pos += 3 + length;
        }
        if found >= min_run {
            return Some(AacFraming::Loas);
        }

        if data.len() >= 4 && &data[0..4] == b"ADIF" {
            return Some(AacFraming::Adif);
        }

        None
    }

    fn frame_duration_ns(config: &AudioConfig) -> i64 {
        SAMPLES_PER_FRAME as i64 * NSECS_PER_SEC / config.sample_rate as i64
    }

    fn emit_frame(&mut self, payload: Buffer, offset: u64, config: AudioConfig) {
        let mut header = FrameHeader::audio(CodecId::Aac, config.audio_params());
        header.profile = Some(config.profile);
        self.frames.push_back(Frame {
            header,
            data: payload,
            stream_offset: offset,
            timecode: Timecode::unset(),
            duration: Self::frame_duration_ns(&config),
            keyframe: true,
        });
        self.frames_parsed += 1;
    }

    fn parse(&mut self) -> Result<()> {
        loop {
            if self.finished {
                return Ok(());
            }
            if self.abort_after_num_frames > 0 && self.frames_parsed >= self.abort_after_num_frames
            {
                self.finished = true;
                return Ok(());
            }

            // Establish the framing on first contact
            if self.framing.is_none() {
                let data = self.acc.as_slice();
                if data.len() < 8 {
                    return Ok(());
                }
                match Self::find_consecutive_frames(data, 2) {
                    Some((framing, offset)) => {
                        if offset != 0 && self.require_frame_at_first_byte {
                            return Err(Error::codec("no AAC frame at the first byte"));
                        }
                        self.framing = Some(framing);
                        self.stream_position += offset as u64;
                        self.acc.consume(offset);
                    }
                    None => {
                        // Unbounded garbage would pin the accumulator;
                        // drop all but a window that could still hold
                        // the start of a frame pair.
                        if data.len() > 64 * 1024 {
                            if self.require_frame_at_first_byte {
                                return Err(Error::codec("no AAC frame at the first byte"));
                            }
                            let drop = data.len() - 16 * 1024;
                            self.stream_position += drop as u64;
                            self.acc.consume(drop);
                        }
                        return Ok(());
                    }
                }
            }

            match self.framing {
                Some(AacFraming::Adts) => {
                    if !self.parse_one_adts()? {
                        return Ok(());
                    }
                }
                Some(AacFraming::Loas) => {
                    if !self.parse_one_loas()? {
                        return Ok(());
                    }
                }
                Some(AacFraming::Adif) => {
                    self.parse_adif()?;
                    return Ok(());
                }
                None => return Ok(()),
            }
        }
    }

    /// Parse one ADTS frame; false means more data is needed
    fn parse_one_adts(&mut self) -> Result<bool> {
        let data = self.acc.as_slice();
        let hdr = match parse_adts_header(data) {
            Ok(hdr) => hdr,
            Err(Error::NeedMoreData) => return Ok(false),
            Err(_) => {
                // Lost sync mid-stream: resynchronize
                return self.resync();
            }
        };
        if data.len() < hdr.frame_length {
            return Ok(false);
        }

        let config = AudioConfig {
            profile: hdr.profile,
            channels: hdr.channels,
            sample_rate: hdr.sample_rate,
            output_sample_rate: None,
            sbr: false,
        };
        if self.config.is_none() {
            self.config = Some(config);
        }

        let payload =
            Buffer::from_slice(&data[hdr.header_size..hdr.frame_length]);
        let offset = self.stream_position;
        self.stream_position += hdr.frame_length as u64;
        self.acc.consume(hdr.frame_length);
        self.emit_frame(payload, offset, config);
        Ok(true)
    }

    /// Parse one LOAS frame; false means more data is needed
    fn parse_one_loas(&mut self) -> Result<bool> {
        let data = self.acc.as_slice();
        if data.len() < 3 {
            return Ok(false);
        }
        if !Self::is_loas_candidate(data) {
            return self.resync();
        }
        let length = (((data[1] & 0x1F) as usize) << 8) | data[2] as usize;
        if data.len() < 3 + length {
            return Ok(false);
        }

        let mux = &data[3..3 + length];
        let mut br = BitReader::new(mux);

        // AudioMuxElement with muxConfigPresent = 1
        let use_same_config = br.read_bit()?;
        if !use_same_config {
            self.latm.parse_stream_mux_config(&mut br)?;
        }
        let config = match self.latm.config {
            Some(cfg) => cfg,
            None => {
                // Payload before any mux config: skip the frame
                let skip = 3 + length;
                self.stream_position += skip as u64;
                self.acc.consume(skip);
                return Ok(true);
            }
        };
        if self.config.is_none() {
            self.config = Some(config);
        }

        // PayloadLengthInfo for frameLengthType 0: 255-escaped bytes
        let mut payload_len = 0usize;
        if self.latm.frame_length_type == 0 {
            loop {
                let tmp = br.read_bits(8)? as usize;
                payload_len += tmp;
                if tmp != 255 {
                    break;
                }
            }
        } else {
            return Err(Error::unsupported(format!(
                "LATM frame length type {}",
                self.latm.frame_length_type
            )));
        }

        br.byte_align();
        let payload_start = br.position() / 8;
        if payload_start + payload_len > mux.len() {
            return Err(Error::codec("LATM payload length exceeds mux element"));
        }
        let payload = Buffer::from_slice(&mux[payload_start..payload_start + payload_len]);

        let offset = self.stream_position;
        self.stream_position += (3 + length) as u64;
        self.acc.consume(3 + length);
        self.emit_frame(payload, offset, config);
        Ok(true)
    }

    /// ADIF is one header followed by raw blocks with no frame sync;
    /// emit the remainder as one blob and mark the stream finished.
    fn parse_adif(&mut self) -> Result<()> {
        let data = self.acc.as_slice();
        let hdr = match parse_adif_header(data) {
            Ok(hdr) => hdr,
            Err(Error::NeedMoreData) => return Ok(()),
            Err(e) => return Err(e),
        };
        let config = AudioConfig {
            profile: hdr.profile,
            channels: hdr.channels,
            sample_rate: hdr.sample_rate,
            output_sample_rate: None,
            sbr: false,
        };
        self.config = Some(config);
        Err(Error::unsupported(
            "ADIF AAC cannot be reframed into timestamped packets",
        ))
    }

    /// Skip one byte and retry the sync search from the next position
    fn resync(&mut self) -> Result<bool> {
        self.stream_position += 1;
        self.acc.consume(1);
        Ok(true)
    }
}

impl Default for AacParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Probe a buffer for an AAC stream: at least `min_frames` consecutive
/// valid frames starting near the front
pub fn probe(data: &[u8], min_frames: usize) -> bool {
    match AacParser::find_consecutive_frames(data, min_frames) {
        // A real AAC file syncs at or close to its first byte
        Some((_, offset)) => offset < 8192,
        None => false,
    }
}
