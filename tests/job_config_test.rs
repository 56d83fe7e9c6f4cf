//! Job configuration serialization tests
//!
//! Front ends hand mux jobs around as JSON; the configuration types
//! must survive the round trip with defaults filled in for whatever a
//! hand-written job file leaves out.

use mkvmux_lib::mux::chapters::{ChapterAtom, ChapterEdition, ChapterSet};
use mkvmux_lib::mux::{AppendMapping, SplitMode};
use mkvmux_lib::packetize::{CuePolicy, TrackOptions};
use mkvmux_lib::session::{MuxConfig, SourceConfig};
use std::collections::HashMap;

#[test]
fn test_mux_config_round_trip() {
    let config = MuxConfig {
        timecode_scale: 500_000,
        title: Some("feature".into()),
        split: SplitMode::Timecodes(vec![60_000_000_000, 120_000_000_000]),
        link_files: true,
        append_mappings: vec![AppendMapping {
            src_file: 1,
            src_track: 0,
            dst_file: 0,
            dst_track: 0,
        }],
        chapters: ChapterSet {
            editions: vec![ChapterEdition::new(vec![ChapterAtom::new(0, "Intro")])],
        },
        ..MuxConfig::default()
    };

    let json = serde_json::to_string(&config).unwrap();
    let back: MuxConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(back.timecode_scale, 500_000);
    assert_eq!(back.title.as_deref(), Some("feature"));
    assert!(back.link_files);
    assert_eq!(back.append_mappings, config.append_mappings);
    assert_eq!(back.chapters.editions.len(), 1);
    assert!(matches!(back.split, SplitMode::Timecodes(ref tcs) if tcs.len() == 2));
}

#[test]
fn test_partial_job_file_gets_defaults() {
    let config: MuxConfig = serde_json::from_str(r#"{"title": "short job"}"#).unwrap();
    assert_eq!(config.title.as_deref(), Some("short job"));
    assert_eq!(config.timecode_scale, MuxConfig::default().timecode_scale);
    assert!(matches!(config.split, SplitMode::None));
    assert!(config.chapters.is_empty());

    // Chapter atoms may omit their UID; a random one is assigned
    let set: ChapterSet = serde_json::from_str(
        r#"{"editions": [{"uid": 7, "default": true, "hidden": false,
            "atoms": [{"start_ns": 0, "end_ns": null, "hidden": false,
                       "enabled": true,
                       "displays": [{"name": "One", "language": "eng"}]}]}]}"#,
    )
    .unwrap();
    assert_ne!(set.editions[0].atoms[0].uid, 0);
}

#[test]
fn test_source_config_round_trip() {
    let mut track_options = HashMap::new();
    track_options.insert(
        2,
        TrackOptions {
            language: Some("ger".into()),
            sync_offset_ns: -80_000_000,
            aac_is_sbr: Some(true),
            cue_policy: CuePolicy::All,
        },
    );
    let source = SourceConfig {
        continuation: true,
        track_options,
        chapters: None,
        tags: None,
    };

    let json = serde_json::to_string(&source).unwrap();
    let back: SourceConfig = serde_json::from_str(&json).unwrap();
    assert!(back.continuation);
    let opts = &back.track_options[&2];
    assert_eq!(opts.language.as_deref(), Some("ger"));
    assert_eq!(opts.sync_offset_ns, -80_000_000);
    assert_eq!(opts.aac_is_sbr, Some(true));
    assert_eq!(opts.cue_policy, CuePolicy::All);
}
