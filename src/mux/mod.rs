//! Matroska/WebM assembly
//!
//! The submodules layer from wire primitives up to the per-file
//! segment state machine: EBML encoding, element rendering, cluster
//! accumulation, split criteria, append validation and chapter/tag
//! staging. Session orchestration across input files lives in
//! [`crate::session`].

pub mod append;
pub mod chapters;
pub mod cluster;
pub mod ebml;
pub mod elements;
pub mod segment;
pub mod split;

pub use append::{validate_mappings, AppendMapping, FileDesc};
pub use chapters::{ChapterAtom, ChapterDisplay, ChapterEdition, ChapterSet, SimpleTag, Tag, TagSet};
pub use cluster::ClusterBuilder;
pub use elements::{CueEntry, DocType, TrackSpec};
pub use segment::{SegmentConfig, SegmentWriter};
pub use split::{SplitCheck, SplitMode};
