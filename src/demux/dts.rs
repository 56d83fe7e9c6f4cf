//! Raw DTS elementary stream reader
//!
//! All four byte arrangements (16/14 bit, big/little endian) come out
//! normalized to 16-bit big endian frames.

use crate::codec::dts::DtsParser;
use crate::codec::{CodecId, Frame};
use crate::demux::{SourceFrame, TrackInfo};
use crate::error::{Error, Result};
use crate::util::MediaType;
use std::io::{Read, Seek, SeekFrom};

const CHUNK_SIZE: usize = 64 * 1024;

pub struct DtsReader<R: Read + Seek> {
    reader: R,
    parser: DtsParser,
    file_size: u64,
    consumed: u64,
    eof: bool,
    pending: Option<Frame>,
    info: TrackInfo,
}

impl<R: Read + Seek> DtsReader<R> {
    pub fn open(mut reader: R) -> Result<Self> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut parser = DtsParser::new();
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

        let pending = parser
            .get_frame()
            .ok_or_else(|| Error::format("no DTS frames found"))?;

        let info = TrackInfo {
            id: 1,
            media_type: MediaType::Audio,
            codec: CodecId::Dts,
            audio: pending.header.audio,
            video: None,
            decoder_config: None,
            default_duration_ns: Some(pending.duration),
            language: None,
        };

        Ok(DtsReader {
            reader,
            parser,
            file_size,
            consumed,
            eof,
            pending: Some(pending),
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
    use crate::codec::dts::tests::make_dts_frame;
    use std::io::Cursor;

    #[test]
    fn test_open_and_drain() {
        let mut data = Vec::new();
        for _ in 0..4 {
            data.extend_from_slice(&make_dts_frame(512));
        }
        let mut reader = DtsReader::open(Cursor::new(data)).unwrap();

        let info = reader.describe();
        assert_eq!(info.codec, CodecId::Dts);
        assert_eq!(info.audio.unwrap().sample_rate, 48000);

        let mut count = 0;
        while let Some(sf) = reader.read_next().unwrap() {
            assert!(sf.frame.keyframe);
            count += 1;
        }
        assert_eq!(count, 4);
    }

    #[test]
    fn test_open_garbage_fails() {
        let data = vec![0xA5u8; 4096];
        assert!(DtsReader::open(Cursor::new(data)).is_err());
    }
}
