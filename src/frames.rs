//! Frames: a pattern bound to an anchor and an offset window.
//!
//! # Invariants
//! - BOF/PREV frames scan forward (window measured from the beginning of
//!   the stream or the preceding frame); SUCC/EOF frames scan backward.
//! - `max == None` means the window is unbounded on the right.

use std::fmt;

use crate::error::CodecError;
use crate::patterns::{Pattern, PatternRegistry};
use crate::persist::{Loader, Saver};

/// What a frame's offset window is measured from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Anchor {
    /// Beginning of file.
    Bof,
    /// End of the preceding frame.
    Prev,
    /// Start of the succeeding frame.
    Succ,
    /// End of file.
    Eof,
}

impl Anchor {
    /// True for anchors scanned left-to-right.
    #[inline]
    pub fn is_forward(self) -> bool {
        matches!(self, Anchor::Bof | Anchor::Prev)
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Anchor::Bof => "BOF",
            Anchor::Prev => "P",
            Anchor::Succ => "S",
            Anchor::Eof => "EOF",
        };
        f.write_str(s)
    }
}

/// A pattern plus its anchor and offset window.
#[derive(Clone, Debug)]
pub struct Frame {
    pub anchor: Anchor,
    pub pattern: Pattern,
    pub min: u64,
    pub max: Option<u64>,
}

impl Frame {
    /// A frame at an exact offset from its anchor.
    pub fn fixed(anchor: Anchor, offset: u64, pattern: Pattern) -> Self {
        Self { anchor, pattern, min: offset, max: Some(offset) }
    }

    /// A frame with a bounded window.
    pub fn window(anchor: Anchor, min: u64, max: u64, pattern: Pattern) -> Self {
        Self { anchor, pattern, min, max: Some(max) }
    }

    /// A frame at any distance from its anchor.
    pub fn wild(anchor: Anchor, pattern: Pattern) -> Self {
        Self { anchor, pattern, min: 0, max: None }
    }

    /// Pattern length bounds, widened to window arithmetic types.
    pub fn length(&self) -> (u64, u64) {
        let (lo, hi) = self.pattern.length();
        (lo as u64, hi as u64)
    }

    /// The same window holding a different pattern. Used when a gap moves
    /// from one frame to its neighbor during segment splitting.
    pub fn with_pattern(&self, pattern: Pattern) -> Frame {
        Frame { anchor: self.anchor, pattern, min: self.min, max: self.max }
    }

    /// A frame equality check strong enough for round-trip tests.
    pub fn equals(&self, other: &Frame) -> bool {
        self.anchor == other.anchor
            && self.min == other.min
            && self.max == other.max
            && self.pattern.equals(&other.pattern)
    }

    /// Whether this frame stays in the same segment as its predecessor.
    ///
    /// A PREV frame is linked when its own gap window is narrow enough; a
    /// SUCC/EOF frame is linked when the *preceding* frame is SUCC-anchored
    /// with a narrow window (SUCC offsets attach to the succeeding frame).
    pub fn linked(&self, prev: &Frame, distance: u64, range: u64) -> bool {
        match self.anchor {
            Anchor::Bof => false,
            Anchor::Prev => match self.max {
                None => false,
                Some(max) => self.min <= distance && max - self.min <= range,
            },
            Anchor::Succ | Anchor::Eof => match (prev.anchor, prev.max) {
                (Anchor::Succ, Some(max)) => prev.min <= distance && max - prev.min <= range,
                _ => false,
            },
        }
    }

    pub fn save(&self, s: &mut Saver) {
        s.save_byte(match self.anchor {
            Anchor::Bof => 0,
            Anchor::Prev => 1,
            Anchor::Succ => 2,
            Anchor::Eof => 3,
        });
        s.save_int(self.min as i64);
        s.save_int(self.max.map_or(-1, |m| m as i64));
        self.pattern.save(s);
    }

    pub fn load(l: &mut Loader<'_>, reg: &PatternRegistry) -> Option<Frame> {
        let anchor = match l.load_byte() {
            0 => Anchor::Bof,
            1 => Anchor::Prev,
            2 => Anchor::Succ,
            3 => Anchor::Eof,
            _ => return None,
        };
        let min = l.load_int().max(0) as u64;
        let max = match l.load_int() {
            v if v < 0 => None,
            v => Some(v as u64),
        };
        let pattern = reg.load(l)?;
        Some(Frame { anchor, pattern, min, max })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "{} {}-{} {}", self.anchor, self.min, max, self.pattern),
            None => write!(f, "{} {}-* {}", self.anchor, self.min, self.pattern),
        }
    }
}

/// Convert plain sequence patterns in context frames to finder-backed ones.
/// Left-context frames are tested right-to-left, so they get the reverse
/// variant.
pub fn bmh_convert(frames: Vec<Frame>, reverse: bool) -> Vec<Frame> {
    frames
        .into_iter()
        .map(|f| match &f.pattern {
            Pattern::Sequence(seq) if seq.len() > 1 => {
                let pat = Pattern::bmh(seq.0.clone(), reverse);
                f.with_pattern(pat)
            }
            _ => f,
        })
        .collect()
}

/// Load helper shared by signature and frame persistence tests.
pub fn load_frames(bytes: &[u8], reg: &PatternRegistry) -> Result<Vec<Frame>, CodecError> {
    let mut l = Loader::new(bytes)?;
    let n = l.load_small_int();
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        match Frame::load(&mut l, reg) {
            Some(f) => out.push(f),
            None => break,
        }
    }
    l.finish()?;
    if out.len() != n {
        return Err(CodecError::Truncated);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linkage_by_window() {
        let a = Frame::fixed(Anchor::Bof, 0, Pattern::sequence(b"a".to_vec()));
        let near = Frame::window(Anchor::Prev, 0, 16, Pattern::sequence(b"b".to_vec()));
        let far = Frame::window(Anchor::Prev, 9000, 9100, Pattern::sequence(b"b".to_vec()));
        let wide = Frame::window(Anchor::Prev, 0, 5000, Pattern::sequence(b"b".to_vec()));
        let wild = Frame::wild(Anchor::Prev, Pattern::sequence(b"b".to_vec()));
        assert!(near.linked(&a, 8192, 2048));
        assert!(!far.linked(&a, 8192, 2048));
        assert!(!wide.linked(&a, 8192, 2048));
        assert!(!wild.linked(&a, 8192, 2048));
    }

    #[test]
    fn succ_linkage_uses_preceding_window() {
        let succ = Frame::window(Anchor::Succ, 0, 8, Pattern::sequence(b"a".to_vec()));
        let eof = Frame::fixed(Anchor::Eof, 0, Pattern::sequence(b"b".to_vec()));
        assert!(eof.linked(&succ, 8192, 2048));
        let wild_succ = Frame::wild(Anchor::Succ, Pattern::sequence(b"a".to_vec()));
        assert!(!eof.linked(&wild_succ, 8192, 2048));
    }

    #[test]
    fn frame_round_trip() {
        let reg = PatternRegistry::core();
        let frames = vec![
            Frame::fixed(Anchor::Bof, 0, Pattern::sequence(b"%PDF-".to_vec())),
            Frame::wild(Anchor::Eof, Pattern::sequence(b"%%EOF".to_vec())),
            Frame::window(Anchor::Prev, 2, 9, Pattern::Mask(0xf0)),
        ];
        let mut s = Saver::new();
        s.save_small_int(frames.len());
        for f in &frames {
            f.save(&mut s);
        }
        let bytes = s.into_bytes();
        let loaded = load_frames(&bytes, &reg).unwrap();
        assert_eq!(loaded.len(), frames.len());
        for (a, b) in frames.iter().zip(&loaded) {
            assert!(a.equals(b));
        }
    }

    #[test]
    fn bmh_convert_leaves_short_patterns() {
        let frames = vec![
            Frame::fixed(Anchor::Prev, 0, Pattern::sequence(b"longish".to_vec())),
            Frame::fixed(Anchor::Prev, 0, Pattern::sequence(b"x".to_vec())),
            Frame::fixed(Anchor::Prev, 0, Pattern::Mask(0x0f)),
        ];
        let out = bmh_convert(frames, true);
        assert!(matches!(out[0].pattern, Pattern::Bmh(_)));
        assert!(matches!(out[1].pattern, Pattern::Sequence(_)));
        assert!(matches!(out[2].pattern, Pattern::Mask(_)));
    }
}
