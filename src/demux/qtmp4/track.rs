//! Per-track sample table construction for QuickTime/MP4
//!
//! The raw `stbl` child atoms land here as flat tables; `update_tables`
//! merges them into one per-sample table of (pts, size, file offset),
//! and `build_index` materializes the ordered read plan the demuxer
//! consumes. All intermediate timestamps are in track timescale ticks;
//! only the final index is in nanoseconds.

use crate::codec::CodecId;
use crate::error::{Error, Result};
use crate::util::{MediaType, Timescale};
use std::collections::HashMap;

/// One entry of the duration map (`stts`)
#[derive(Debug, Clone, Copy)]
pub struct DurmapEntry {
    pub count: u32,
    pub duration: u32,
}

/// One entry of the chunk-to-samples map (`stsc`)
#[derive(Debug, Clone, Copy)]
pub struct ChunkmapEntry {
    /// 1-based index of the first chunk this entry applies to
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub desc_id: u32,
}

/// One entry of the edit list (`elst`)
#[derive(Debug, Clone, Copy)]
pub struct EditEntry {
    /// Segment duration in movie timescale ticks
    pub segment_duration: u64,
    /// Start in track media time; -1 marks an empty (delay) edit
    pub media_time: i64,
    /// Fixed-point media rate; only 1.0 plays samples
    pub media_rate: u32,
}

/// One entry of the composition offset table (`ctts`)
#[derive(Debug, Clone, Copy)]
pub struct FrameOffsetEntry {
    pub count: u32,
    pub offset: i32,
}

/// A chunk after the reverse merge of the chunk map
#[derive(Debug, Clone, Copy)]
pub struct Chunk {
    pub samples: u32,
    pub first_sample: u64,
    pub desc_id: u32,
    pub file_offset: u64,
}

/// One fully resolved sample
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    /// Presentation time in track timescale ticks
    pub pts: i64,
    pub size: u32,
    pub file_offset: u64,
}

/// Final index entry handed to sequential reads
#[derive(Debug, Clone, Copy)]
pub struct IndexEntry {
    pub file_pos: u64,
    pub size: u32,
    /// Presentation time in nanoseconds
    pub timecode: i64,
    pub duration: i64,
    pub keyframe: bool,
}

/// Parsed state of one `trak`
#[derive(Debug)]
pub struct QtTrack {
    pub id: u32,
    pub media_type: MediaType,
    pub codec: CodecId,
    pub enabled: bool,
    pub timescale: Timescale,
    pub language: Option<String>,

    // Raw tables from stbl
    pub durmap: Vec<DurmapEntry>,
    pub chunkmap: Vec<ChunkmapEntry>,
    pub chunk_offsets: Vec<u64>,
    pub sample_sizes: Vec<u32>,
    /// Global sample size from stsz; non-zero means fixed-size samples
    pub fixed_sample_size: u32,
    /// 0-based sorted keyframe sample indices from stss; empty with
    /// `has_keyframe_table` unset means every sample is a keyframe
    pub keyframes: Vec<u64>,
    pub has_keyframe_table: bool,
    pub editlist: Vec<EditEntry>,
    pub frame_offsets: Vec<FrameOffsetEntry>,

    // Sample description data
    pub audio: Option<QtAudioDesc>,
    pub video: Option<QtVideoDesc>,
    pub decoder_config: Option<Vec<u8>>,

    // Built by update_tables / build_index
    pub chunk_table: Vec<Chunk>,
    pub sample_table: Vec<Sample>,
    pub index: Vec<IndexEntry>,
}

/// Audio fields of an stsd entry
#[derive(Debug, Clone, Copy)]
pub struct QtAudioDesc {
    pub channels: u16,
    pub bit_depth: u16,
    pub sample_rate: u32,
}

/// Video fields of an stsd entry
#[derive(Debug, Clone, Copy)]
pub struct QtVideoDesc {
    pub width: u16,
    pub height: u16,
}

impl QtTrack {
    pub fn new(id: u32) -> Self {
        QtTrack {
            id,
            media_type: MediaType::Unknown,
            codec: CodecId::Other(0),
            enabled: true,
            timescale: Timescale(0),
            language: None,
            durmap: Vec::new(),
            chunkmap: Vec::new(),
            chunk_offsets: Vec::new(),
            sample_sizes: Vec::new(),
            fixed_sample_size: 0,
            keyframes: Vec::new(),
            has_keyframe_table: false,
            editlist: Vec::new(),
            frame_offsets: Vec::new(),
            audio: None,
            video: None,
            decoder_config: None,
            chunk_table: Vec::new(),
            sample_table: Vec::new(),
            index: Vec::new(),
        }
    }

    /// Total samples declared by the duration map
    fn total_samples(&self) -> u64 {
        self.durmap.iter().map(|e| e.count as u64).sum()
    }

    /// Merge the raw tables into the per-sample table.
    ///
    /// `movie_timescale` converts edit-list durations, which the
    /// container stores in movie ticks rather than track ticks.
    pub fn update_tables(&mut self, movie_timescale: Timescale) -> Result<()> {
        if self.timescale.0 == 0 {
            return Err(Error::format(format!(
                "track {}: media header declares a zero timescale",
                self.id
            )));
        }
        if self.chunk_offsets.is_empty() {
            // An empty track; leave all tables empty
            self.chunk_table.clear();
            self.sample_table.clear();
            return Ok(());
        }

        // Step 1: reverse-scan the chunk map, assigning each chunk its
        // sample count and description id
        self.chunk_table = self
            .chunk_offsets
            .iter()
            .map(|&off| Chunk {
                samples: 0,
                first_sample: 0,
                desc_id: 0,
                file_offset: off,
            })
            .collect();

        let num_chunks = self.chunk_table.len() as u32;
        let mut next_first = num_chunks + 1;
        for entry in self.chunkmap.iter().rev() {
            if entry.first_chunk == 0 || entry.first_chunk > num_chunks {
                return Err(Error::format(format!(
                    "track {}: chunk map references chunk {} of {}",
                    self.id, entry.first_chunk, num_chunks
                )));
            }
            for chunk_idx in (entry.first_chunk - 1)..(next_first - 1) {
                let chunk = &mut self.chunk_table[chunk_idx as usize];
                chunk.samples = entry.samples_per_chunk;
                chunk.desc_id = entry.desc_id;
            }
            next_first = entry.first_chunk;
        }

        // Step 2: prefix-sum sample counts into starting indices
        let mut first_sample = 0u64;
        for chunk in &mut self.chunk_table {
            chunk.first_sample = first_sample;
            first_sample += chunk.samples as u64;
        }
        let num_samples = first_sample;

        // Step 3: synthesize per-sample sizes for fixed-size codecs
        if self.sample_sizes.is_empty() {
            if self.fixed_sample_size == 0 {
                return Err(Error::format(format!(
                    "track {}: no sample sizes and no global sample size",
                    self.id
                )));
            }
            self.sample_sizes = vec![self.fixed_sample_size; num_samples as usize];
        } else if (self.sample_sizes.len() as u64) < num_samples {
            return Err(Error::format(format!(
                "track {}: sample size table has {} entries for {} samples",
                self.id,
                self.sample_sizes.len(),
                num_samples
            )));
        }

        // Step 4: assign presentation times from the duration map
        self.sample_table = Vec::with_capacity(num_samples as usize);
        let mut pts: i64 = 0;
        'outer: for entry in &self.durmap {
            for _ in 0..entry.count {
                if self.sample_table.len() as u64 >= num_samples {
                    break 'outer;
                }
                let size = self.sample_sizes[self.sample_table.len()];
                self.sample_table.push(Sample {
                    pts,
                    size,
                    file_offset: 0,
                });
                pts += entry.duration as i64;
            }
        }
        if (self.sample_table.len() as u64) < num_samples {
            return Err(Error::format(format!(
                "track {}: duration map covers {} of {} samples",
                self.id,
                self.sample_table.len(),
                num_samples
            )));
        }

        // Step 5: assign file offsets chunk by chunk
        let track_id = self.id;
        for chunk in &self.chunk_table {
            let mut offset = chunk.file_offset;
            for i in 0..chunk.samples as u64 {
                let idx = (chunk.first_sample + i) as usize;
                let sample = self.sample_table.get_mut(idx).ok_or_else(|| {
                    Error::format(format!(
                        "track {}: chunk table references sample {} of {}",
                        track_id, idx, num_samples
                    ))
                })?;
                sample.file_offset = offset;
                offset += sample.size as u64;
            }
        }

        // Keyframe indices must stay within the sample table
        if let Some(&last) = self.keyframes.last() {
            if last >= num_samples {
                return Err(Error::format(format!(
                    "track {}: keyframe table references sample {} of {}",
                    self.id, last, num_samples
                )));
            }
        }

        self.apply_frame_offsets()?;
        self.apply_editlist(movie_timescale)?;

        Ok(())
    }

    /// Apply ctts composition offsets to sample presentation times
    fn apply_frame_offsets(&mut self) -> Result<()> {
        if self.frame_offsets.is_empty() {
            return Ok(());
        }
        let mut idx = 0usize;
        for entry in &self.frame_offsets {
            for _ in 0..entry.count {
                match self.sample_table.get_mut(idx) {
                    Some(sample) => sample.pts += entry.offset as i64,
                    // A ctts longer than the sample table happens in the
                    // wild; the excess carries no information
                    None => return Ok(()),
                }
                idx += 1;
            }
        }
        Ok(())
    }

    /// Re-map samples through the edit list. Samples before an edit's
    /// media start are dropped; empty edits shift the timeline.
    fn apply_editlist(&mut self, movie_timescale: Timescale) -> Result<()> {
        if self.editlist.is_empty() {
            return Ok(());
        }
        // The common identity edit needs no rewrite
        if self.editlist.len() == 1 && self.editlist[0].media_time <= 0 {
            if self.editlist[0].media_time < 0 {
                // A single empty edit is a pure delay
                let delay = self.movie_to_track_ticks(
                    self.editlist[0].segment_duration,
                    movie_timescale,
                );
                for sample in &mut self.sample_table {
                    sample.pts += delay;
                }
            }
            return Ok(());
        }

        let mut remapped: Vec<Sample> = Vec::with_capacity(self.sample_table.len());
        let mut remapped_keyframes: Vec<u64> = Vec::new();
        let mut timeline_pos: i64 = 0;

        for edit in &self.editlist {
            let duration = self.movie_to_track_ticks(edit.segment_duration, movie_timescale);
            if edit.media_time < 0 {
                timeline_pos += duration;
                continue;
            }
            if edit.media_rate != 0x0001_0000 {
                return Err(Error::unsupported(format!(
                    "track {}: edit list media rate {:#x}",
                    self.id, edit.media_rate
                )));
            }

            // Per-edit offset keeping track-local and edit timeline
            // consistent
            let pts_offset = timeline_pos - edit.media_time;
            let end = if duration > 0 {
                edit.media_time + duration
            } else {
                i64::MAX
            };

            for (real_idx, sample) in self.sample_table.iter().enumerate() {
                if sample.pts < edit.media_time || sample.pts >= end {
                    continue;
                }
                if self.keyframe_at(real_idx as u64) {
                    remapped_keyframes.push(remapped.len() as u64);
                }
                remapped.push(Sample {
                    pts: sample.pts + pts_offset,
                    ..*sample
                });
            }
            timeline_pos += duration;
        }

        self.sample_table = remapped;
        if self.has_keyframe_table {
            self.keyframes = remapped_keyframes;
        }
        Ok(())
    }

    fn movie_to_track_ticks(&self, movie_ticks: u64, movie_timescale: Timescale) -> i64 {
        if movie_timescale.0 == 0 {
            return movie_ticks as i64;
        }
        (movie_ticks as i128 * self.timescale.0 as i128 / movie_timescale.0 as i128) as i64
    }

    fn keyframe_at(&self, sample_idx: u64) -> bool {
        if !self.has_keyframe_table {
            return true;
        }
        self.keyframes.binary_search(&sample_idx).is_ok()
    }

    /// Infer the frame rate: a single constant-duration entry gives it
    /// directly, otherwise the most frequent inter-sample delta wins.
    pub fn calculate_fps(&self) -> f64 {
        if self.durmap.len() == 1 && self.durmap[0].duration != 0 {
            return self.timescale.0 as f64 / self.durmap[0].duration as f64;
        }

        let mut histogram: HashMap<i64, u64> = HashMap::new();
        for pair in self.sample_table.windows(2) {
            let delta = pair[1].pts - pair[0].pts;
            if delta > 0 {
                *histogram.entry(delta).or_insert(0) += 1;
            }
        }
        let most_frequent = histogram
            .into_iter()
            .max_by_key(|&(delta, count)| (count, std::cmp::Reverse(delta)))
            .map(|(delta, _)| delta);

        match most_frequent {
            Some(delta) if delta > 0 => self.timescale.0 as f64 / delta as f64,
            _ => 0.0,
        }
    }

    /// Representative frame duration in nanoseconds, for the track's
    /// default duration
    pub fn default_duration_ns(&self) -> Option<i64> {
        let fps = self.calculate_fps();
        if fps > 0.0 {
            Some((1_000_000_000f64 / fps).round() as i64)
        } else {
            None
        }
    }

    /// Materialize the final ordered read plan.
    ///
    /// Fixed-sample-size tracks are indexed chunk-wise (one entry per
    /// chunk, sized to the whole chunk); everything else gets one entry
    /// per sample. Entries are ordered by timecode.
    pub fn build_index(&mut self) -> Result<()> {
        self.index.clear();

        if self.fixed_sample_size != 0 {
            self.build_index_chunked();
        } else {
            self.build_index_per_sample();
        }

        self.index
            .sort_by(|a, b| a.timecode.cmp(&b.timecode).then(a.file_pos.cmp(&b.file_pos)));

        // Fill zero durations from the gap to the next entry
        for i in 0..self.index.len().saturating_sub(1) {
            if self.index[i].duration == 0 {
                self.index[i].duration = self.index[i + 1].timecode - self.index[i].timecode;
            }
        }

        Ok(())
    }

    fn build_index_chunked(&mut self) {
        let per_sample_ticks = self.durmap.first().map(|e| e.duration as i64).unwrap_or(0);
        for chunk in &self.chunk_table {
            if chunk.samples == 0 {
                continue;
            }
            let first = chunk.first_sample as usize;
            let Some(sample) = self.sample_table.get(first) else {
                continue;
            };
            let size = chunk.samples as u64 * self.fixed_sample_size as u64;
            let duration_ticks = chunk.samples as i64 * per_sample_ticks;
            self.index.push(IndexEntry {
                file_pos: chunk.file_offset,
                size: size as u32,
                timecode: self.timescale.ticks_to_nsecs(sample.pts),
                duration: self.timescale.ticks_to_nsecs(duration_ticks),
                keyframe: true,
            });
        }
    }

    fn build_index_per_sample(&mut self) {
        for (idx, sample) in self.sample_table.iter().enumerate() {
            self.index.push(IndexEntry {
                file_pos: sample.file_offset,
                size: sample.size,
                timecode: self.timescale.ticks_to_nsecs(sample.pts),
                duration: 0,
                keyframe: self.keyframe_at(idx as u64),
            });
        }
    }

    /// Minimum timecode of the built index, for cross-track
    /// normalization
    pub fn min_timecode(&self) -> Option<i64> {
        self.index.first().map(|e| e.timecode)
    }

    /// Shift every index timecode by `delta` nanoseconds
    pub fn shift_timecodes(&mut self, delta: i64) {
        for entry in &mut self.index {
            entry.timecode += delta;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic_track() -> QtTrack {
        let mut track = QtTrack::new(1);
        track.timescale = Timescale(1000);
        track
    }

    #[test]
    fn test_five_samples_single_duration_entry() {
        // Spec scenario: sample_size 0, five explicit sizes, one
        // duration entry {count: 5, duration: 1000}, timescale 1000
        let mut track = basic_track();
        track.durmap = vec![DurmapEntry {
            count: 5,
            duration: 1000,
        }];
        track.chunkmap = vec![ChunkmapEntry {
            first_chunk: 1,
            samples_per_chunk: 5,
            desc_id: 1,
        }];
        track.chunk_offsets = vec![100];
        track.sample_sizes = vec![10, 20, 30, 40, 50];

        track.update_tables(Timescale(1000)).unwrap();
        track.build_index().unwrap();

        let pts: Vec<i64> = track.sample_table.iter().map(|s| s.pts).collect();
        assert_eq!(pts, vec![0, 1000, 2000, 3000, 4000]);

        let offsets: Vec<u64> = track.sample_table.iter().map(|s| s.file_offset).collect();
        assert_eq!(offsets, vec![100, 110, 130, 160, 200]);

        assert!((track.calculate_fps() - 1.0).abs() < 1e-9);

        // Timecodes in nanoseconds: 0, 1, 2, 3, 4 seconds
        let tcs: Vec<i64> = track.index.iter().map(|e| e.timecode).collect();
        assert_eq!(
            tcs,
            vec![0, 1_000_000_000, 2_000_000_000, 3_000_000_000, 4_000_000_000]
        );
    }

    #[test]
    fn test_reverse_chunk_map_merge() {
        let mut track = basic_track();
        track.durmap = vec![DurmapEntry {
            count: 7,
            duration: 100,
        }];
        // Chunks 1-2 hold 2 samples each, chunk 3 holds 3
        track.chunkmap = vec![
            ChunkmapEntry {
                first_chunk: 1,
                samples_per_chunk: 2,
                desc_id: 1,
            },
            ChunkmapEntry {
                first_chunk: 3,
                samples_per_chunk: 3,
                desc_id: 1,
            },
        ];
        track.chunk_offsets = vec![0, 100, 200];
        track.sample_sizes = vec![10; 7];

        track.update_tables(Timescale(1000)).unwrap();

        let counts: Vec<u32> = track.chunk_table.iter().map(|c| c.samples).collect();
        assert_eq!(counts, vec![2, 2, 3]);
        let firsts: Vec<u64> = track.chunk_table.iter().map(|c| c.first_sample).collect();
        assert_eq!(firsts, vec![0, 2, 4]);

        // Offsets advance within each chunk
        let offs: Vec<u64> = track.sample_table.iter().map(|s| s.file_offset).collect();
        assert_eq!(offs, vec![0, 10, 100, 110, 200, 210, 220]);
    }

    #[test]
    fn test_synthesized_sample_sizes() {
        let mut track = basic_track();
        track.durmap = vec![DurmapEntry {
            count: 4,
            duration: 250,
        }];
        track.chunkmap = vec![ChunkmapEntry {
            first_chunk: 1,
            samples_per_chunk: 4,
            desc_id: 1,
        }];
        track.chunk_offsets = vec![0];
        track.fixed_sample_size = 8;

        track.update_tables(Timescale(1000)).unwrap();
        assert_eq!(track.sample_sizes, vec![8, 8, 8, 8]);

        track.build_index().unwrap();
        // Chunk mode: one entry covering the whole chunk
        assert_eq!(track.index.len(), 1);
        assert_eq!(track.index[0].size, 32);
        assert_eq!(track.index[0].duration, 1_000_000_000);
    }

    #[test]
    fn test_ctts_offsets_and_monotonic_index() {
        let mut track = basic_track();
        track.durmap = vec![DurmapEntry {
            count: 4,
            duration: 100,
        }];
        track.chunkmap = vec![ChunkmapEntry {
            first_chunk: 1,
            samples_per_chunk: 4,
            desc_id: 1,
        }];
        track.chunk_offsets = vec![0];
        track.sample_sizes = vec![10; 4];
        // Decode order I P B B -> presentation reorder via offsets
        track.frame_offsets = vec![
            FrameOffsetEntry { count: 1, offset: 0 },
            FrameOffsetEntry {
                count: 1,
                offset: 200,
            },
            FrameOffsetEntry {
                count: 2,
                offset: -100,
            },
        ];

        track.update_tables(Timescale(1000)).unwrap();
        track.build_index().unwrap();

        // Index timecodes are non-decreasing after reordering
        for pair in track.index.windows(2) {
            assert!(pair[0].timecode <= pair[1].timecode);
        }
    }

    #[test]
    fn test_editlist_drops_and_offsets() {
        let mut track = basic_track();
        track.durmap = vec![DurmapEntry {
            count: 10,
            duration: 100,
        }];
        track.chunkmap = vec![ChunkmapEntry {
            first_chunk: 1,
            samples_per_chunk: 10,
            desc_id: 1,
        }];
        track.chunk_offsets = vec![0];
        track.sample_sizes = vec![1; 10];
        // Play media from tick 300 for 500 ticks: samples 3..8 survive,
        // re-timed to start at zero
        track.editlist = vec![EditEntry {
            segment_duration: 500,
            media_time: 300,
            media_rate: 0x0001_0000,
        }];

        track.update_tables(Timescale(1000)).unwrap();

        let pts: Vec<i64> = track.sample_table.iter().map(|s| s.pts).collect();
        assert_eq!(pts, vec![0, 100, 200, 300, 400]);
    }

    #[test]
    fn test_empty_edit_delays() {
        let mut track = basic_track();
        track.durmap = vec![DurmapEntry {
            count: 3,
            duration: 100,
        }];
        track.chunkmap = vec![ChunkmapEntry {
            first_chunk: 1,
            samples_per_chunk: 3,
            desc_id: 1,
        }];
        track.chunk_offsets = vec![0];
        track.sample_sizes = vec![1; 3];
        track.editlist = vec![EditEntry {
            segment_duration: 200,
            media_time: -1,
            media_rate: 0x0001_0000,
        }];

        track.update_tables(Timescale(1000)).unwrap();
        let pts: Vec<i64> = track.sample_table.iter().map(|s| s.pts).collect();
        assert_eq!(pts, vec![200, 300, 400]);
    }

    #[test]
    fn test_inconsistent_tables_rejected() {
        let mut track = basic_track();
        track.durmap = vec![DurmapEntry {
            count: 5,
            duration: 100,
        }];
        track.chunkmap = vec![ChunkmapEntry {
            first_chunk: 1,
            samples_per_chunk: 5,
            desc_id: 1,
        }];
        track.chunk_offsets = vec![0];
        track.sample_sizes = vec![1, 2, 3]; // too short

        assert!(track.update_tables(Timescale(1000)).is_err());
    }

    #[test]
    fn test_keyframe_out_of_bounds_rejected() {
        let mut track = basic_track();
        track.durmap = vec![DurmapEntry {
            count: 2,
            duration: 100,
        }];
        track.chunkmap = vec![ChunkmapEntry {
            first_chunk: 1,
            samples_per_chunk: 2,
            desc_id: 1,
        }];
        track.chunk_offsets = vec![0];
        track.sample_sizes = vec![1, 1];
        track.has_keyframe_table = true;
        track.keyframes = vec![5];

        assert!(track.update_tables(Timescale(1000)).is_err());
    }

    #[test]
    fn test_fps_histogram() {
        let mut track = basic_track();
        track.timescale = Timescale(90000);
        track.durmap = vec![
            DurmapEntry {
                count: 8,
                duration: 3000,
            },
            DurmapEntry {
                count: 1,
                duration: 4500,
            },
        ];
        track.chunkmap = vec![ChunkmapEntry {
            first_chunk: 1,
            samples_per_chunk: 9,
            desc_id: 1,
        }];
        track.chunk_offsets = vec![0];
        track.sample_sizes = vec![1; 9];

        track.update_tables(Timescale(1000)).unwrap();
        // Most frequent delta is 3000 ticks at 90 kHz -> 30 fps
        assert!((track.calculate_fps() - 30.0).abs() < 1e-9);
    }
}
