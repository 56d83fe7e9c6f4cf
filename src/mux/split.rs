//! Output file splitting

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// When to start a new output file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum SplitMode {
    #[default]
    None,
    /// After roughly this many bytes of output
    Size(u64),
    /// After this much muxed time per file, in nanoseconds
    Duration(i64),
    /// At the given absolute output timecodes, in nanoseconds
    Timecodes(Vec<i64>),
    /// Before every chapter start
    ChapterBoundaries,
}

impl SplitMode {
    pub fn validate(&self) -> Result<()> {
        match self {
            SplitMode::Size(0) => Err(Error::config("split size must not be zero")),
            SplitMode::Duration(d) if *d <= 0 => {
                Err(Error::config("split duration must be positive"))
            }
            SplitMode::Timecodes(tcs) => {
                if tcs.is_empty() {
                    return Err(Error::config("split timecode list is empty"));
                }
                if tcs.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(Error::config("split timecodes must be strictly increasing"));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Evaluates the configured split criterion at cluster boundaries
pub struct SplitCheck {
    mode: SplitMode,
    /// First timecode of the current output file
    file_base_ns: Option<i64>,
    /// Next unconsumed entry of a timecode list
    next_point: usize,
    /// Chapter starts, for chapter-boundary splitting
    chapter_starts: Vec<i64>,
}

impl SplitCheck {
    pub fn new(mode: SplitMode, chapter_starts: Vec<i64>) -> Result<Self> {
        mode.validate()?;
        let mut chapter_starts = chapter_starts;
        chapter_starts.sort_unstable();
        chapter_starts.dedup();
        Ok(SplitCheck {
            mode,
            file_base_ns: None,
            next_point: 0,
            chapter_starts,
        })
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.mode, SplitMode::None)
    }

    /// Decide, at a cluster boundary, whether `next_timecode_ns` must
    /// start a new file. `bytes_written` is the current output size.
    pub fn should_split(&mut self, bytes_written: u64, next_timecode_ns: i64) -> bool {
        let base = *self.file_base_ns.get_or_insert(next_timecode_ns);
        match &self.mode {
            SplitMode::None => false,
            SplitMode::Size(limit) => bytes_written >= *limit,
            SplitMode::Duration(per_file) => next_timecode_ns - base >= *per_file,
            SplitMode::Timecodes(points) => match points.get(self.next_point) {
                Some(&point) => {
                    if next_timecode_ns >= point {
                        self.next_point += 1;
                        true
                    } else {
                        false
                    }
                }
                None => false,
            },
            SplitMode::ChapterBoundaries => {
                // Skip the chapter a file opens with
                while let Some(&start) = self.chapter_starts.get(self.next_point) {
                    if start <= base {
                        self.next_point += 1;
                        continue;
                    }
                    if next_timecode_ns >= start {
                        self.next_point += 1;
                        return true;
                    }
                    return false;
                }
                false
            }
        }
    }

    /// Reset per-file state after a split
    pub fn begin_file(&mut self) {
        self.file_base_ns = None;
    }
}
