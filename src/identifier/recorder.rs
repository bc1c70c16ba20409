//! Per-scan evidence accumulation and reporting.
//!
//! # Invariants
//! - Candidates are deduplicated by format id: repeat evidence sums the
//!   confidence and appends the basis.
//! - Once `satisfied` is set, byte and container evidence is ignored (the
//!   conclusive candidate is already in hand).
//! - `report` consumes the candidate list; a recorder reports once.

use super::{
    Base, ContainerFamily, Identification, MatcherKind, EXT_SCORE, INC_SCORE, MIME_SCORE,
    TEXT_SCORE, UNKNOWN_ID,
};

/// Mutable per-scan state for one authority.
pub struct Recorder<'a> {
    base: &'a Base,
    ids: Vec<Identification>,
    cscore: u32,
    satisfied: bool,
    ext_active: bool,
    mime_active: bool,
    text_active: bool,
}

impl<'a> Recorder<'a> {
    pub(super) fn new(base: &'a Base) -> Self {
        Self {
            base,
            ids: Vec::with_capacity(4),
            cscore: 0,
            satisfied: false,
            ext_active: false,
            mime_active: false,
            text_active: false,
        }
    }

    /// Note that a matcher kind participates in this scan (used for the
    /// mismatch warnings at report time).
    pub fn activate(&mut self, kind: MatcherKind) {
        if !self.base.active(kind) {
            return;
        }
        match kind {
            MatcherKind::Name => self.ext_active = true,
            MatcherKind::Mime => self.mime_active = true,
            MatcherKind::Text => self.text_active = true,
            _ => {}
        }
    }

    /// Deliver one matcher result. `index` is the shared matcher's global
    /// index; `None` carries a container default hit. Returns true when
    /// the result belonged to this authority.
    pub fn record(&mut self, kind: MatcherKind, index: Option<usize>, basis: &str) -> bool {
        let base = self.base;
        match kind {
            MatcherKind::Name => self.record_simple(kind, index, basis, EXT_SCORE),
            MatcherKind::Mime => self.record_simple(kind, index, basis, MIME_SCORE),
            MatcherKind::Text => {
                if self.satisfied {
                    return true;
                }
                self.record_simple(kind, index, basis, TEXT_SCORE)
            }
            MatcherKind::Xml => {
                if self.satisfied {
                    return true;
                }
                let Some(id) = index.and_then(|i| base.xml_ids.hit(i)) else {
                    return false;
                };
                self.cscore += INC_SCORE;
                let score = self.cscore;
                self.add(id, basis.to_string(), score);
                true
            }
            MatcherKind::Container(_) => {
                let Some(index) = index else {
                    // Default hit: only meaningful with a registered
                    // fallback container format.
                    if let Some(id) = base.zip_default.as_deref() {
                        self.cscore += INC_SCORE;
                        let score = self.cscore;
                        self.add(id, basis.to_string(), score);
                    }
                    return false;
                };
                let table = base.ids(kind);
                let Some(id) = table.hit(index) else {
                    return false;
                };
                if self.satisfied {
                    return true;
                }
                self.cscore += INC_SCORE;
                let score = self.cscore;
                let basis = placed_basis(table.place(index), basis);
                self.add(id, basis, score);
                true
            }
            MatcherKind::Byte => {
                let Some(index) = index else {
                    return false;
                };
                let Some(id) = base.byte_ids.hit(index) else {
                    return false;
                };
                if self.satisfied {
                    return true;
                }
                self.cscore += INC_SCORE;
                let score = self.cscore;
                let basis = placed_basis(base.byte_ids.place(index), basis);
                self.add(id, basis, score);
                true
            }
        }
    }

    fn record_simple(
        &mut self,
        kind: MatcherKind,
        index: Option<usize>,
        basis: &str,
        score: u32,
    ) -> bool {
        let base = self.base;
        let Some(id) = index.and_then(|i| base.ids(kind).hit(i)) else {
            return false;
        };
        self.add(id, basis.to_string(), score);
        true
    }

    fn add(&mut self, id: &str, basis: String, confidence: u32) {
        for existing in &mut self.ids {
            if existing.id == id {
                existing.confidence += confidence;
                existing.basis.push(basis);
                return;
            }
        }
        let info = self.base.info(id);
        self.ids.push(Identification {
            namespace: self.base.namespace.clone(),
            id: id.to_string(),
            format: info.name,
            version: info.version,
            mime: info.mime,
            basis: vec![basis],
            warning: String::new(),
            family: info.family,
            confidence,
        });
    }

    /// Whether running (or continuing) a matcher of `kind` can still
    /// change this authority's outcome. A `true` return marks the
    /// recorder satisfied; the second value is the authority's byte-index
    /// base for priority clipping.
    pub fn satisfied(&mut self, kind: MatcherKind) -> (bool, usize) {
        // With priorities off, every byte and container match is wanted;
        // nothing short-circuits those matchers.
        if self.base.no_priority
            && matches!(kind, MatcherKind::Byte | MatcherKind::Container(_))
        {
            return (false, 0);
        }
        if self.cscore < INC_SCORE {
            // The strong-evidence matchers always get their chance: weak
            // evidence can never pre-empt a byte, container or XML probe.
            if matches!(
                kind,
                MatcherKind::Byte | MatcherKind::Xml | MatcherKind::Container(_)
            ) {
                return (false, 0);
            }
            if self.ids.is_empty() {
                return (false, 0);
            }
            if let Some(text_id) = &self.base.text_id {
                if self.ids.iter().any(|i| &i.id == text_id) {
                    return (false, 0);
                }
            }
        }
        self.satisfied = true;
        if kind == MatcherKind::Byte {
            (true, self.base.byte_ids.start)
        } else {
            (true, 0)
        }
    }

    /// Rank and emit this authority's identifications.
    pub fn report(&mut self) -> Vec<Identification> {
        if self.ids.is_empty() {
            return vec![self.unknown("no match".into())];
        }
        self.ids.sort_by(|a, b| b.confidence.cmp(&a.confidence));
        let top = self.ids[0].confidence;

        if top <= TEXT_SCORE {
            // The best evidence is no better than a bare text match: only
            // a format with no stronger signature registered may be
            // reported, and only if it is unambiguous.
            let mut survivors: Vec<Identification> = Vec::with_capacity(1);
            for v in &self.ids {
                if top > MIME_SCORE && v.confidence != top {
                    break;
                }
                // A text candidate whose best evidence is weaker than a
                // text match, when the text matcher actually ran, means
                // the content was not text.
                if Some(&v.id) == self.base.text_id.as_ref()
                    && top < TEXT_SCORE
                    && self.text_active
                {
                    continue;
                }
                if !self.base.has_signature(&v.id) {
                    if !survivors.is_empty() {
                        survivors.clear();
                        break;
                    }
                    let mut v = v.clone();
                    append_warning(&mut v.warning, &format!(
                        "match on {} only",
                        low_confidence(v.confidence)
                    ));
                    survivors.push(v);
                }
            }
            if survivors.len() == 1 {
                let id = survivors.remove(0);
                return vec![self.with_mismatch_warnings(id)];
            }
            let mut conf = 0;
            let possibilities: Vec<&str> = self
                .ids
                .iter()
                .map(|v| {
                    conf |= v.confidence;
                    v.id.as_str()
                })
                .collect();
            return vec![self.unknown(format!(
                "no match; possibilities based on {} are {}",
                low_confidence(conf),
                possibilities.join(", ")
            ))];
        }

        // Report the top candidate plus exact-confidence ties; with
        // priorities off, everything with byte-level evidence reports.
        let mut out = Vec::with_capacity(1);
        let ids = std::mem::take(&mut self.ids);
        for (i, v) in ids.into_iter().enumerate() {
            let keep = i == 0
                || v.confidence == top
                || (self.base.no_priority && v.confidence >= INC_SCORE);
            if !keep {
                break;
            }
            out.push(self.with_mismatch_warnings(v));
        }
        out
    }

    fn with_mismatch_warnings(&self, mut id: Identification) -> Identification {
        if id.id == UNKNOWN_ID {
            return id;
        }
        if self.ext_active
            && id.confidence & EXT_SCORE == 0
            && self.base.name_ids.ids.iter().any(|x| *x == id.id)
        {
            append_warning(&mut id.warning, "extension mismatch");
        }
        if self.mime_active
            && id.confidence & MIME_SCORE == 0
            && self.base.mime_ids.ids.iter().any(|x| *x == id.id)
        {
            append_warning(&mut id.warning, "MIME mismatch");
        }
        id
    }

    fn unknown(&self, warning: String) -> Identification {
        Identification {
            namespace: self.base.namespace.clone(),
            id: UNKNOWN_ID.into(),
            format: String::new(),
            version: String::new(),
            mime: String::new(),
            basis: Vec::new(),
            warning,
            family: ContainerFamily::None,
            confidence: 0,
        }
    }
}

fn placed_basis((pos, total): (usize, usize), basis: &str) -> String {
    if total > 1 {
        format!("{basis} (signature {pos}/{total})")
    } else {
        basis.to_string()
    }
}

fn append_warning(warning: &mut String, add: &str) {
    if warning.is_empty() {
        warning.push_str(add);
    } else {
        warning.push_str("; ");
        warning.push_str(add);
    }
}

/// Spell out which weak evidence kinds a confidence value carries.
fn low_confidence(conf: u32) -> String {
    let mut kinds: Vec<&str> = Vec::with_capacity(3);
    if conf & EXT_SCORE != 0 {
        kinds.push("extension");
    }
    if conf & MIME_SCORE != 0 {
        kinds.push("MIME");
    }
    if conf & TEXT_SCORE != 0 {
        kinds.push("text");
    }
    match kinds.len() {
        0 => String::new(),
        1 => kinds[0].into(),
        2 => format!("{} and {}", kinds[0], kinds[1]),
        _ => format!("{} and {}", kinds[..kinds.len() - 1].join(", "), kinds[kinds.len() - 1]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::MatcherIds;

    fn base() -> Base {
        let mut b = Base {
            namespace: "pronom".into(),
            name_ids: MatcherIds { start: 0, ids: vec!["fmt/14".into(), "x-fmt/111".into()] },
            byte_ids: MatcherIds { start: 0, ids: vec!["fmt/14".into()] },
            text_ids: MatcherIds { start: 0, ids: vec!["x-fmt/111".into()] },
            text_id: Some("x-fmt/111".into()),
            ..Base::default()
        };
        b.infos.insert(
            "fmt/14".into(),
            super::super::FormatInfo {
                name: "Acrobat PDF 1.0".into(),
                version: "1.0".into(),
                mime: "application/pdf".into(),
                family: ContainerFamily::None,
            },
        );
        b.infos.insert(
            "x-fmt/111".into(),
            super::super::FormatInfo { name: "Plain Text".into(), ..Default::default() },
        );
        b
    }

    #[test]
    fn byte_match_reports_alone() {
        let b = base();
        let mut r = b.recorder();
        r.activate(MatcherKind::Name);
        assert!(r.record(MatcherKind::Name, Some(0), "extension match"));
        assert!(r.record(MatcherKind::Byte, Some(0), "byte match at 0, 8"));
        let out = r.report();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "fmt/14");
        assert_eq!(out[0].confidence, EXT_SCORE + INC_SCORE);
        assert!(out[0].warning.is_empty());
        assert_eq!(out[0].basis.len(), 2);
    }

    #[test]
    fn extension_only_match_gets_warning() {
        let b = base();
        let mut r = b.recorder();
        r.activate(MatcherKind::Name);
        // x-fmt/111 has no byte signature, so extension-only is admissible.
        assert!(r.record(MatcherKind::Name, Some(1), "extension match"));
        // The text matcher did not run (not activated), so the text-id
        // filter does not apply.
        let out = r.report();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "x-fmt/111");
        assert_eq!(out[0].warning, "match on extension only");
    }

    #[test]
    fn extension_with_missing_byte_sig_is_unknown() {
        let b = base();
        let mut r = b.recorder();
        r.activate(MatcherKind::Name);
        // fmt/14 has a byte signature; extension evidence alone is not
        // enough to report it.
        assert!(r.record(MatcherKind::Name, Some(0), "extension match"));
        let out = r.report();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, UNKNOWN_ID);
        assert_eq!(
            out[0].warning,
            "no match; possibilities based on extension are fmt/14"
        );
    }

    #[test]
    fn text_and_extension_combine() {
        let b = base();
        let mut r = b.recorder();
        r.activate(MatcherKind::Name);
        r.activate(MatcherKind::Text);
        assert!(r.record(MatcherKind::Name, Some(1), "extension match"));
        assert!(r.record(MatcherKind::Text, Some(0), "text match"));
        let out = r.report();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "x-fmt/111");
        // Extension plus text outranks a bare text match, so no
        // low-confidence annotation applies.
        assert_eq!(out[0].confidence, EXT_SCORE + TEXT_SCORE);
        assert_eq!(out[0].warning, "");
    }

    #[test]
    fn non_text_content_drops_the_text_candidate() {
        let b = base();
        let mut r = b.recorder();
        r.activate(MatcherKind::Name);
        r.activate(MatcherKind::Text);
        // Extension said text, but the text matcher ran and stayed silent.
        assert!(r.record(MatcherKind::Name, Some(1), "extension match"));
        let out = r.report();
        assert_eq!(out[0].id, UNKNOWN_ID);
        assert!(out[0].warning.contains("possibilities based on extension"));
    }

    #[test]
    fn no_candidates_is_unknown_no_match() {
        let b = base();
        let mut r = b.recorder();
        let out = r.report();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, UNKNOWN_ID);
        assert_eq!(out[0].warning, "no match");
    }

    #[test]
    fn extension_mismatch_warning_added() {
        let b = base();
        let mut r = b.recorder();
        r.activate(MatcherKind::Name);
        // Byte evidence without the matching extension.
        assert!(r.record(MatcherKind::Byte, Some(0), "byte match at 0, 8"));
        let out = r.report();
        assert_eq!(out[0].id, "fmt/14");
        assert_eq!(out[0].warning, "extension mismatch");
    }

    #[test]
    fn satisfied_gates_by_matcher_kind() {
        let b = base();
        let mut r = b.recorder();
        // Nothing recorded: never satisfied.
        assert!(!r.satisfied(MatcherKind::Byte).0);
        assert!(!r.satisfied(MatcherKind::Text).0);
        // An extension hit on a non-text format satisfies cheap matchers
        // but not the byte matcher.
        r.record(MatcherKind::Name, Some(0), "extension match");
        assert!(!r.satisfied(MatcherKind::Byte).0);
        // A byte hit satisfies everything.
        r.record(MatcherKind::Byte, Some(0), "byte match at 0, 8");
        let (ok, start) = r.satisfied(MatcherKind::Byte);
        assert!(ok);
        assert_eq!(start, 0);
        // Satisfied recorders ignore further byte results.
        let before = r.ids.len();
        r.record(MatcherKind::Byte, Some(0), "byte match at 9, 9");
        assert_eq!(r.ids.len(), before);
        assert_eq!(r.ids[0].basis.len(), 1);
    }

    #[test]
    fn repeat_evidence_dedups_by_id() {
        let mut b = base();
        b.byte_ids.ids.push("fmt/14".into());
        let mut r = b.recorder();
        assert!(r.record(MatcherKind::Byte, Some(0), "byte match at 0, 8"));
        assert!(r.record(MatcherKind::Byte, Some(1), "byte match at 100, 4"));
        let out = r.report();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].confidence, INC_SCORE + 2 * INC_SCORE);
        assert!(out[0].basis[0].contains("(signature 1/2)"));
        assert!(out[0].basis[1].contains("(signature 2/2)"));
    }
}
