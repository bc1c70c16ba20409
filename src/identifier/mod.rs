//! Authority identifiers: the bridge between matcher index spaces and
//! format identifications.
//!
//! Each authority (PRONOM, a MIME-info database, the LOC format set)
//! contributes signatures to the engine's shared matchers at build time
//! and remembers the base index every matcher assigned it, so a matcher
//! hit index converts back to the authority's format id with
//! `id = ids[index - start]`. At scan time the authority hands out a
//! fresh [`Recorder`] that accumulates evidence and reports ranked
//! identifications.

use std::collections::HashMap;

use crate::container::ContainerKind;
use crate::priority::PriorityList;

mod recorder;

pub use recorder::Recorder;

/// Evidence sources a recorder can receive results from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MatcherKind {
    Name,
    Mime,
    Xml,
    Container(ContainerKind),
    Byte,
    Text,
}

/// The container family a format itself represents, carried through to
/// output so callers know an identification is expandable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContainerFamily {
    #[default]
    None,
    Zip,
    Ole2,
}

/// Descriptive fields for one format id.
#[derive(Clone, Debug, Default)]
pub struct FormatInfo {
    pub name: String,
    pub version: String,
    pub mime: String,
    pub family: ContainerFamily,
}

/// One reported identification.
#[derive(Clone, Debug)]
pub struct Identification {
    pub namespace: String,
    pub id: String,
    pub format: String,
    pub version: String,
    pub mime: String,
    pub basis: Vec<String>,
    pub warning: String,
    pub family: ContainerFamily,
    pub confidence: u32,
}

impl Identification {
    /// True unless this is the synthetic UNKNOWN placeholder.
    #[inline]
    pub fn known(&self) -> bool {
        self.id != UNKNOWN_ID
    }
}

/// Format id of the synthetic no-match identification.
pub const UNKNOWN_ID: &str = "UNKNOWN";

/// Confidence bits. The incremental score is added once per byte or
/// container hit, so multiple hits stack.
pub const EXT_SCORE: u32 = 1;
pub const MIME_SCORE: u32 = 1 << 1;
pub const TEXT_SCORE: u32 = 1 << 2;
pub const INC_SCORE: u32 = 1 << 3;

/// One matcher's slice of an authority: the base index the shared matcher
/// assigned, and the format id behind each subsequent index.
#[derive(Clone, Debug, Default)]
pub struct MatcherIds {
    pub start: usize,
    pub ids: Vec<String>,
}

impl MatcherIds {
    /// The format id for a global matcher index, if it belongs here.
    pub fn hit(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(self.start)
            .and_then(|i| self.ids.get(i))
            .map(String::as_str)
    }

    /// Position of this index among same-id entries: `(pos, total)`,
    /// 1-based, for the "(signature i/n)" basis annotation.
    pub fn place(&self, index: usize) -> (usize, usize) {
        let Some(rel) = index.checked_sub(self.start) else {
            return (0, 0);
        };
        let Some(id) = self.ids.get(rel) else {
            return (0, 0);
        };
        let total = self.ids.iter().filter(|x| *x == id).count();
        let pos = self.ids[..=rel].iter().filter(|x| *x == id).count();
        (pos, total)
    }
}

/// A compiled authority.
#[derive(Clone, Debug, Default)]
pub struct Base {
    pub namespace: String,
    pub infos: HashMap<String, FormatInfo>,
    pub name_ids: MatcherIds,
    pub mime_ids: MatcherIds,
    pub xml_ids: MatcherIds,
    pub zip_ids: MatcherIds,
    pub ole2_ids: MatcherIds,
    pub byte_ids: MatcherIds,
    pub text_ids: MatcherIds,
    /// Priority list over this authority's byte signatures.
    pub byte_priorities: PriorityList,
    /// Priority lists over this authority's container signatures.
    pub zip_priorities: PriorityList,
    pub ole2_priorities: PriorityList,
    /// Format recorded when a container default hit arrives.
    pub zip_default: Option<String>,
    /// This authority's plain-text format, if it has one.
    pub text_id: Option<String>,
    /// Report every candidate at or above the byte floor instead of only
    /// ties with the best.
    pub no_priority: bool,
}

impl Base {
    /// A fresh recorder for one scan.
    pub fn recorder(&self) -> Recorder<'_> {
        Recorder::new(self)
    }

    /// Whether the authority registered anything with a matcher kind.
    pub fn active(&self, kind: MatcherKind) -> bool {
        !self.ids(kind).ids.is_empty()
    }

    pub(crate) fn ids(&self, kind: MatcherKind) -> &MatcherIds {
        match kind {
            MatcherKind::Name => &self.name_ids,
            MatcherKind::Mime => &self.mime_ids,
            MatcherKind::Xml => &self.xml_ids,
            MatcherKind::Container(ContainerKind::Zip) => &self.zip_ids,
            MatcherKind::Container(ContainerKind::Ole2) => &self.ole2_ids,
            MatcherKind::Byte => &self.byte_ids,
            MatcherKind::Text => &self.text_ids,
        }
    }

    /// Whether a format id has any byte or container signature. Formats
    /// without one may be reported on extension/MIME evidence alone.
    pub(crate) fn has_signature(&self, id: &str) -> bool {
        self.byte_ids.ids.iter().any(|x| x == id)
            || self.zip_ids.ids.iter().any(|x| x == id)
            || self.ole2_ids.ids.iter().any(|x| x == id)
    }

    pub(crate) fn info(&self, id: &str) -> FormatInfo {
        self.infos.get(id).cloned().unwrap_or_default()
    }
}
