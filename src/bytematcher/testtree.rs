//! Per-segment verification of context frames around a strike.
//!
//! A strike only proves the elected frame matched. The test tree holds the
//! remaining frames of the segment: the left list is verified right-to-left
//! from the strike's start, the right list left-to-right from its end, each
//! frame within its own gap window.
//!
//! # Invariants
//! - Gap windows inside a segment are bounded (wider gaps split segments),
//!   so both context spans are finite and small.
//! - Verification reads through the shared buffer and never assumes the
//!   strike region is still hot.

use crate::error::ScanError;
use crate::frames::Frame;
use crate::streambuf::Buffer;

/// Compiled verifier for one segment.
#[derive(Clone, Debug)]
pub struct TestTree {
    left: Vec<Frame>,
    right: Vec<Frame>,
    max_left: u64,
    max_right: u64,
}

/// Widest span a context run can occupy: gaps plus pattern maxima.
fn span(frames: &[Frame]) -> u64 {
    let mut total = 0u64;
    for f in frames {
        let (_, lmax) = f.length();
        let gap = f.max.unwrap_or(0);
        total = total.saturating_add(gap).saturating_add(lmax);
    }
    total
}

impl TestTree {
    pub fn new(left: Vec<Frame>, right: Vec<Frame>) -> Self {
        let max_left = span(&left);
        let max_right = span(&right);
        Self { left, right, max_left, max_right }
    }

    #[inline]
    pub fn max_left_distance(&self) -> u64 {
        self.max_left
    }

    #[inline]
    pub fn max_right_distance(&self) -> u64 {
        self.max_right
    }

    /// Verify both context runs around a strike at absolute `start` with
    /// matched length `len`.
    pub fn verify(&self, buf: &Buffer, start: u64, len: u64) -> Result<bool, ScanError> {
        if !self.left.is_empty() {
            let win_start = start.saturating_sub(self.max_left);
            let (bytes, _) = buf.slice(win_start, (start - win_start) as usize)?;
            if bytes.len() < (start - win_start) as usize {
                // The stream ended before the strike position; stale strike.
                return Ok(false);
            }
            if !match_left(&self.left, &bytes, bytes.len()) {
                return Ok(false);
            }
        }
        if !self.right.is_empty() {
            let (bytes, _) = buf.slice(start + len, self.max_right as usize)?;
            if !match_right(&self.right, &bytes, 0) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Match the right-context run inside `w` beginning at `pos`.
fn match_right(frames: &[Frame], w: &[u8], pos: usize) -> bool {
    let Some(f) = frames.first() else {
        return true;
    };
    let gap_max = f.max.unwrap_or(u64::MAX);
    let mut gap = f.min;
    loop {
        if gap > gap_max || pos as u64 + gap > w.len() as u64 {
            return false;
        }
        let sub = &w[pos + gap as usize..];
        let (ok, n) = f.pattern.test(sub);
        if ok {
            if match_right(&frames[1..], w, pos + gap as usize + n) {
                return true;
            }
            gap += 1;
        } else if n == 0 {
            return false;
        } else {
            gap += n as u64;
        }
    }
}

/// Match the left-context run inside `w` ending at `pos` (exclusive).
fn match_left(frames: &[Frame], w: &[u8], pos: usize) -> bool {
    let Some(f) = frames.first() else {
        return true;
    };
    let gap_max = f.max.unwrap_or(u64::MAX);
    let mut gap = f.min;
    loop {
        if gap > gap_max || gap > pos as u64 {
            return false;
        }
        let end = pos - gap as usize;
        let sub = &w[..end];
        let (ok, n) = f.pattern.test_r(sub);
        if ok {
            if match_left(&frames[1..], w, end - n) {
                return true;
            }
            gap += 1;
        } else if n == 0 {
            return false;
        } else {
            gap += n as u64;
        }
    }
}
