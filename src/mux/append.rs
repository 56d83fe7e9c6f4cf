//! Append mapping validation
//!
//! Appended ("continuation") files feed their tracks into the output
//! tracks of an earlier file. The mapping table is validated in full
//! before any output file is opened; invalid configurations are fatal
//! and never partially applied.

use crate::diag::DiagSink;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One entry of the append mapping table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendMapping {
    pub src_file: usize,
    pub src_track: usize,
    pub dst_file: usize,
    pub dst_track: usize,
}

/// What validation needs to know about each input file
#[derive(Debug, Clone)]
pub struct FileDesc {
    /// Marked as a continuation of an earlier file
    pub continuation: bool,
    /// Track ids selected for output
    pub track_ids: Vec<usize>,
}

/// Validate the table and fill in implicit identity mappings for
/// continuation files that have none. Returns the complete mapping.
pub fn validate_mappings(
    explicit: &[AppendMapping],
    files: &[FileDesc],
    diag: &mut DiagSink,
) -> Result<Vec<AppendMapping>> {
    let mut mappings = Vec::new();
    let mut mapped_sources: HashSet<usize> = HashSet::new();

    for m in explicit {
        if m.src_file >= files.len() || m.dst_file >= files.len() {
            return Err(Error::config(format!(
                "append mapping references file {} but only {} files are given",
                m.src_file.max(m.dst_file),
                files.len()
            )));
        }
        if !files[m.src_file].continuation {
            return Err(Error::config(format!(
                "append mapping source file {} is not marked as a continuation",
                m.src_file
            )));
        }
        if m.src_file == m.dst_file {
            return Err(Error::config(format!(
                "append mapping for file {} maps onto itself",
                m.src_file
            )));
        }
        if !files[m.src_file].track_ids.contains(&m.src_track) {
            return Err(Error::config(format!(
                "append mapping source track {}:{} does not exist",
                m.src_file, m.src_track
            )));
        }
        if !files[m.dst_file].track_ids.contains(&m.dst_track) {
            return Err(Error::config(format!(
                "append mapping destination track {}:{} is not selected for output",
                m.dst_file, m.dst_track
            )));
        }
        mappings.push(*m);
        mapped_sources.insert(m.src_file);
    }

    // Implicit one-to-one mappings for unmapped continuation files:
    // each track continues the same track id in the preceding file
    for (idx, file) in files.iter().enumerate() {
        if !file.continuation || mapped_sources.contains(&idx) {
            continue;
        }
        if idx == 0 {
            return Err(Error::config(
                "the first file cannot be marked as a continuation",
            ));
        }
        let dst_file = idx - 1;
        let mut assumed = Vec::new();
        for &track in &file.track_ids {
            if files[dst_file].track_ids.contains(&track) {
                mappings.push(AppendMapping {
                    src_file: idx,
                    src_track: track,
                    dst_file,
                    dst_track: track,
                });
                assumed.push(format!("{}:{} -> {}:{}", idx, track, dst_file, track));
            }
        }
        if assumed.is_empty() {
            return Err(Error::config(format!(
                "continuation file {} shares no track ids with file {}",
                idx, dst_file
            )));
        }
        diag.info(
            Some(idx),
            format!("no append mapping given, assuming {}", assumed.join(", ")),
        );
    }

    // Each destination track takes at most one continuation per source
    // chain step, and the file graph must stay acyclic
    let mut destinations = HashSet::new();
    for m in &mappings {
        if !destinations.insert((m.src_file, m.dst_file, m.dst_track)) {
            return Err(Error::config(format!(
                "track {}:{} receives more than one continuation from file {}",
                m.dst_file, m.dst_track, m.src_file
            )));
        }
    }

    check_acyclic(&mappings, files.len())?;
    Ok(mappings)
}

/// Follow file-level append edges and reject cycles
fn check_acyclic(mappings: &[AppendMapping], file_count: usize) -> Result<()> {
    for start in 0..file_count {
        let mut seen = HashSet::new();
        let mut current = start;
        seen.insert(current);
        while let Some(m) = mappings.iter().find(|m| m.src_file == current) {
            current = m.dst_file;
            if !seen.insert(current) {
                return Err(Error::config(format!(
                    "append mappings form a cycle through file {}",
                    current
                )));
            }
        }
    }
    Ok(())
}
