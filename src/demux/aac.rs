//! Raw AAC elementary stream reader (ADTS, LOAS/LATM, ADIF)

use crate::codec::aac::{create_audio_specific_config, AacParser, SAMPLES_PER_FRAME};
use crate::codec::{CodecId, Frame};
use crate::demux::{SourceFrame, TrackInfo};
use crate::error::{Error, Result};
use crate::util::{MediaType, NSECS_PER_SEC};
use std::io::{Read, Seek, SeekFrom};

const CHUNK_SIZE: usize = 64 * 1024;

/// Reader over a raw AAC file. Frames come out with unset timecodes;
/// downstream re-times them from the constant frame duration.
pub struct AacReader<R: Read + Seek> {
    reader: R,
    parser: AacParser,
    file_size: u64,
    consumed: u64,
    eof: bool,
    /// First frame, parsed during open to pin down the configuration
    pending: Option<Frame>,
    info: TrackInfo,
}

impl<R: Read + Seek> AacReader<R> {
    pub fn open(mut reader: R) -> Result<Self> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut parser = AacParser::new();
        let mut consumed = 0u64;
        let mut eof = false;
        let mut chunk = vec![0u8; CHUNK_SIZE];
        while parser.frames_available() == 0 {
            let n = reader.read(&mut chunk)?;
            if n == 0 {
                eof = true;
                break;
            }
            consumed += n as u64;
            parser.add_bytes(&chunk[..n])?;
        }

        let pending = parser.get_frame();
        let config = match (parser.config(), &pending) {
            (Some(config), Some(_)) => config,
            _ => return Err(Error::format("no AAC frames found")),
        };

        let info = TrackInfo {
            id: 1,
            media_type: MediaType::Audio,
            codec: CodecId::Aac,
            audio: Some(config.audio_params()),
            video: None,
            decoder_config: Some(create_audio_specific_config(&config)),
            default_duration_ns: Some(
                SAMPLES_PER_FRAME as i64 * NSECS_PER_SEC / config.sample_rate as i64,
            ),
            language: None,
        };

        Ok(AacReader {
            reader,
            parser,
            file_size,
            consumed,
            eof,
            pending,
            info,
        })
    }

    pub fn describe(&self) -> TrackInfo {
        self.info.clone()
    }

    pub fn read_next(&mut self) -> Result<Option<SourceFrame>> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(SourceFrame { track_id: 1, frame }));
        }
        loop {
            if let Some(frame) = self.parser.get_frame() {
                return Ok(Some(SourceFrame { track_id: 1, frame }));
            }
            if self.eof {
                return Ok(None);
            }
            let mut chunk = vec![0u8; CHUNK_SIZE];
            let n = self.reader.read(&mut chunk)?;
            if n == 0 {
                self.eof = true;
                continue;
            }
            self.consumed += n as u64;
            self.parser.add_bytes(&chunk[..n])?;
        }
    }

    pub fn progress(&self) -> (u64, u64) {
        (self.consumed, self.file_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::aac::tests::make_adts_frame;
    use std::io::Cursor;

    #[test]
    fn test_open_and_drain() {
        let mut data = Vec::new();
        for _ in 0..5 {
            data.extend_from_slice(&make_adts_frame(3, 2, 64));
        }
        let mut reader = AacReader::open(Cursor::new(data)).unwrap();

        let info = reader.describe();
        assert_eq!(info.codec, CodecId::Aac);
        assert_eq!(info.audio.unwrap().sample_rate, 48000);
        assert!(info.decoder_config.is_some());

        let mut count = 0;
        while let Some(sf) = reader.read_next().unwrap() {
            assert_eq!(sf.track_id, 1);
            assert!(!sf.frame.timecode.is_set());
            count += 1;
        }
        assert_eq!(count, 5);

        let (consumed, total) = reader.progress();
        assert_eq!(consumed, total);
    }

    #[test]
    fn test_open_empty_fails() {
        assert!(AacReader::open(Cursor::new(Vec::new())).is_err());
    }
}
