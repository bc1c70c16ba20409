//! Signatures: ordered frames, validation and segmentation.
//!
//! # Invariants
//! - A signature is a non-empty ordered list of frames whose anchors
//!   progress monotonically: once a frame is SUCC/EOF anchored, no later
//!   frame reverts to BOF/PREV.
//! - Segmentation never changes match semantics; it only decides which
//!   frames seed the automaton search and which are verified as context.

use std::fmt;

use crate::error::{CodecError, SignatureError};
use crate::frames::{Anchor, Frame};
use crate::patterns::PatternRegistry;
use crate::persist::{Loader, Saver};

/// A recipe that recognizes one format: an ordered list of frames.
#[derive(Clone, Debug)]
pub struct Signature {
    pub frames: Vec<Frame>,
}

impl Signature {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Check the structural invariants, reporting against signature `sig`.
    pub fn validate(&self, sig: usize) -> Result<(), SignatureError> {
        if self.frames.is_empty() {
            return Err(SignatureError::EmptySignature { sig });
        }
        let mut reversed = false;
        for (i, f) in self.frames.iter().enumerate() {
            if let Some(max) = f.max {
                if max < f.min {
                    return Err(SignatureError::InvertedWindow { sig, frame: i });
                }
            }
            if f.anchor.is_forward() {
                if reversed {
                    return Err(SignatureError::AnchorRegression { sig, frame: i });
                }
            } else {
                reversed = true;
            }
        }
        Ok(())
    }

    /// Split into segments at wide gaps and orientation flips.
    ///
    /// Each returned slice of frames is searched independently; one frame
    /// per segment will be elected the key frame.
    pub fn segment(&self, distance: u64, range: u64) -> Vec<Vec<Frame>> {
        let mut segments = Vec::new();
        let mut group: Vec<Frame> = Vec::new();
        for f in &self.frames {
            match group.last() {
                Some(prev) if f.linked(prev, distance, range) => group.push(f.clone()),
                Some(_) => {
                    segments.push(std::mem::take(&mut group));
                    group.push(f.clone());
                }
                None => group.push(f.clone()),
            }
        }
        if !group.is_empty() {
            segments.push(group);
        }
        segments
    }

    pub fn save(&self, s: &mut Saver) {
        s.save_small_int(self.frames.len());
        for f in &self.frames {
            f.save(s);
        }
    }

    pub fn load(l: &mut Loader<'_>, reg: &PatternRegistry) -> Option<Signature> {
        let n = l.load_small_int();
        let mut frames = Vec::with_capacity(n);
        for _ in 0..n {
            frames.push(Frame::load(l, reg)?);
        }
        Some(Signature { frames })
    }

    /// Round-trip helper: persist this signature alone.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut s = Saver::new();
        self.save(&mut s);
        s.into_bytes()
    }

    pub fn from_bytes(bytes: &[u8], reg: &PatternRegistry) -> Result<Signature, CodecError> {
        let mut l = Loader::new(bytes)?;
        let sig = Signature::load(&mut l, reg);
        l.finish()?;
        sig.ok_or(CodecError::Truncated)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, fr) in self.frames.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{fr}")?;
        }
        Ok(())
    }
}
