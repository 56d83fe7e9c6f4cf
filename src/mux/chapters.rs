//! Chapter and tag staging
//!
//! Chapters arrive from the caller or from appended sources, get
//! shifted onto the output timeline, merged, validated and finally
//! rendered during segment finalization. Splitting carves the staged
//! set into per-file subsets.

use crate::error::{Error, Result};
use crate::mux::ebml::{binary_element, master_element, string_element, uint_element};
use crate::mux::elements::*;
use serde::{Deserialize, Serialize};

/// Non-zero random UID for elements that need one
pub fn new_uid() -> u64 {
    loop {
        let uid = rand::random::<u64>();
        if uid != 0 {
            return uid;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterDisplay {
    pub name: String,
    /// ISO 639-2 code
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterAtom {
    #[serde(default = "new_uid")]
    pub uid: u64,
    pub start_ns: i64,
    pub end_ns: Option<i64>,
    pub hidden: bool,
    pub enabled: bool,
    pub displays: Vec<ChapterDisplay>,
}

impl ChapterAtom {
    pub fn new(start_ns: i64, name: impl Into<String>) -> Self {
        ChapterAtom {
            uid: new_uid(),
            start_ns,
            end_ns: None,
            hidden: false,
            enabled: true,
            displays: vec![ChapterDisplay {
                name: name.into(),
                language: "eng".into(),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterEdition {
    #[serde(default = "new_uid")]
    pub uid: u64,
    pub default: bool,
    pub hidden: bool,
    pub atoms: Vec<ChapterAtom>,
}

impl ChapterEdition {
    pub fn new(atoms: Vec<ChapterAtom>) -> Self {
        ChapterEdition {
            uid: new_uid(),
            default: true,
            hidden: false,
            atoms,
        }
    }
}

/// The staged chapter set for one output run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChapterSet {
    pub editions: Vec<ChapterEdition>,
}

impl ChapterSet {
    pub fn is_empty(&self) -> bool {
        self.editions.iter().all(|e| e.atoms.is_empty())
    }

    /// Shift every timecode, used when appending a continued file's
    /// chapters onto the running timeline
    pub fn shift(&mut self, delta_ns: i64) {
        for edition in &mut self.editions {
            for atom in &mut edition.atoms {
                atom.start_ns += delta_ns;
                if let Some(end) = atom.end_ns.as_mut() {
                    *end += delta_ns;
                }
            }
        }
    }

    /// Merge another set into this one. Editions with the same UID are
    /// combined, everything else is appended; atoms end up re-sorted
    /// by start time.
    pub fn merge(&mut self, other: ChapterSet) {
        for edition in other.editions {
            match self.editions.iter_mut().find(|e| e.uid == edition.uid) {
                Some(existing) => existing.atoms.extend(edition.atoms),
                None => self.editions.push(edition),
            }
        }
        self.sort();
    }

    pub fn sort(&mut self) {
        for edition in &mut self.editions {
            edition.atoms.sort_by_key(|a| a.start_ns);
        }
    }

    /// Structural validation before staging for a finalize
    pub fn validate(&self) -> Result<()> {
        for edition in &self.editions {
            if edition.atoms.is_empty() {
                return Err(Error::invalid_input("chapter edition without any chapters"));
            }
            for atom in &edition.atoms {
                if atom.start_ns < 0 {
                    return Err(Error::invalid_input(format!(
                        "chapter start {} ns is negative",
                        atom.start_ns
                    )));
                }
                if let Some(end) = atom.end_ns {
                    if end < atom.start_ns {
                        return Err(Error::invalid_input(format!(
                            "chapter ends at {} ns before its start {} ns",
                            end, atom.start_ns
                        )));
                    }
                }
                if atom.displays.iter().any(|d| d.name.is_empty()) {
                    return Err(Error::invalid_input("chapter with an empty name"));
                }
            }
        }
        Ok(())
    }

    /// All chapter start times, for chapter-boundary splitting
    pub fn starts(&self) -> Vec<i64> {
        let mut starts: Vec<i64> = self
            .editions
            .iter()
            .flat_map(|e| e.atoms.iter().map(|a| a.start_ns))
            .collect();
        starts.sort_unstable();
        starts.dedup();
        starts
    }

    /// Chapters belonging to one split file: atoms starting inside
    /// `[from_ns, to_ns)`. With linking disabled each file restarts at
    /// timecode zero, so `rebase` subtracts the file's base.
    pub fn subset(&self, from_ns: i64, to_ns: Option<i64>, rebase: bool) -> ChapterSet {
        let mut out = ChapterSet::default();
        for edition in &self.editions {
            let atoms: Vec<ChapterAtom> = edition
                .atoms
                .iter()
                .filter(|a| {
                    a.start_ns >= from_ns && to_ns.map_or(true, |end| a.start_ns < end)
                })
                .cloned()
                .map(|mut a| {
                    if rebase {
                        a.start_ns -= from_ns;
                        if let Some(end) = a.end_ns.as_mut() {
                            *end -= from_ns;
                        }
                    }
                    a
                })
                .collect();
            if !atoms.is_empty() {
                out.editions.push(ChapterEdition {
                    uid: edition.uid,
                    default: edition.default,
                    hidden: edition.hidden,
                    atoms,
                });
            }
        }
        out
    }

    /// Render the Chapters element
    pub fn render(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for edition in &self.editions {
            let mut e = Vec::new();
            uint_element(&mut e, ID_EDITION_UID, edition.uid);
            uint_element(&mut e, ID_EDITION_FLAG_HIDDEN, edition.hidden as u64);
            uint_element(&mut e, ID_EDITION_FLAG_DEFAULT, edition.default as u64);
            for atom in &edition.atoms {
                let mut a = Vec::new();
                uint_element(&mut a, ID_CHAPTER_UID, atom.uid);
                uint_element(&mut a, ID_CHAPTER_TIME_START, atom.start_ns.max(0) as u64);
                if let Some(end) = atom.end_ns {
                    uint_element(&mut a, ID_CHAPTER_TIME_END, end.max(0) as u64);
                }
                uint_element(&mut a, ID_CHAPTER_FLAG_HIDDEN, atom.hidden as u64);
                uint_element(&mut a, ID_CHAPTER_FLAG_ENABLED, atom.enabled as u64);
                for display in &atom.displays {
                    let mut d = Vec::new();
                    string_element(&mut d, ID_CHAP_STRING, &display.name);
                    string_element(&mut d, ID_CHAP_LANGUAGE, &display.language);
                    master_element(&mut a, ID_CHAPTER_DISPLAY, &d);
                }
                master_element(&mut e, ID_CHAPTER_ATOM, &a);
            }
            master_element(&mut body, ID_EDITION_ENTRY, &e);
        }
        let mut out = Vec::new();
        master_element(&mut out, ID_CHAPTERS, &body);
        out
    }
}

/// One name/value pair inside a tag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleTag {
    pub name: String,
    pub value: String,
    pub language: String,
}

/// A tag with its target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    /// 50 = movie level per the tagging conventions
    pub target_type_value: u64,
    /// Track this tag applies to; `None` targets the whole segment
    pub track_uid: Option<u64>,
    pub simple: Vec<SimpleTag>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagSet {
    pub tags: Vec<Tag>,
}

impl TagSet {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn merge(&mut self, other: TagSet) {
        self.tags.extend(other.tags);
    }

    pub fn render(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for tag in &self.tags {
            let mut t = Vec::new();
            let mut targets = Vec::new();
            uint_element(&mut targets, ID_TARGET_TYPE_VALUE, tag.target_type_value);
            if let Some(uid) = tag.track_uid {
                uint_element(&mut targets, ID_TAG_TRACK_UID, uid);
            }
            master_element(&mut t, ID_TARGETS, &targets);
            for simple in &tag.simple {
                let mut s = Vec::new();
                string_element(&mut s, ID_TAG_NAME, &simple.name);
                string_element(&mut s, ID_TAG_LANGUAGE, &simple.language);
                string_element(&mut s, ID_TAG_STRING, &simple.value);
                master_element(&mut t, ID_SIMPLE_TAG, &s);
            }
            master_element(&mut body, ID_TAG, &t);
        }
        let mut out = Vec::new();
        master_element(&mut out, ID_TAGS, &body);
        out
    }
}

/// Random 128-bit UID for segment linking
pub fn new_segment_uid() -> [u8; 16] {
    let mut uid = [0u8; 16];
    for b in uid.iter_mut() {
        *b = rand::random();
    }
    uid
}

/// Render a 16-byte UID element
pub fn render_uid_element(out: &mut Vec<u8>, id: u32, uid: &[u8; 16]) {
    binary_element(out, id, uid);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_with(starts: &[i64]) -> ChapterSet {
        ChapterSet {
            editions: vec![ChapterEdition::new(
                starts
                    .iter()
                    .enumerate()
                    .map(|(i, &s)| ChapterAtom::new(s, format!("Chapter {}", i + 1)))
                    .collect(),
            )],
        }
    }

    #[test]
    fn test_shift_and_merge_resorts() {
        let mut base = set_with(&[0, 60_000]);
        let mut appended = set_with(&[0, 30_000]);
        appended.editions[0].uid = base.editions[0].uid;
        appended.shift(100_000);

        base.merge(appended);
        let starts = base.starts();
        assert_eq!(starts, vec![0, 60_000, 100_000, 130_000]);
        assert_eq!(base.editions.len(), 1);
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let mut set = set_with(&[1000]);
        set.editions[0].atoms[0].end_ns = Some(500);
        assert!(set.validate().is_err());
        set.editions[0].atoms[0].end_ns = Some(2000);
        assert!(set.validate().is_ok());
    }

    #[test]
    fn test_subset_rebases() {
        let set = set_with(&[0, 60_000, 120_000, 180_000]);
        let second = set.subset(60_000, Some(180_000), true);
        assert_eq!(second.starts(), vec![0, 60_000]);

        let linked = set.subset(60_000, Some(180_000), false);
        assert_eq!(linked.starts(), vec![60_000, 120_000]);
    }

    #[test]
    fn test_render_shapes() {
        let set = set_with(&[0]);
        let bytes = set.render();
        assert_eq!(&bytes[0..4], &[0x10, 0x43, 0xA7, 0x70]);
        assert!(bytes.windows(9).any(|w| w == *b"Chapter 1"));

        let tags = TagSet {
            tags: vec![Tag {
                target_type_value: 50,
                track_uid: None,
                simple: vec![SimpleTag {
                    name: "TITLE".into(),
                    value: "Example".into(),
                    language: "eng".into(),
                }],
            }],
        };
        let bytes = tags.render();
        assert_eq!(&bytes[0..4], &[0x12, 0x54, 0xC3, 0x67]);
        assert!(bytes.windows(7).any(|w| w == *b"Example"));
    }
}
