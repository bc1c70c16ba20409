//! Key frames: the elected search seeds of signature segments.
//!
//! Each segment of a signature is represented by one key frame. The key
//! frame records two windows: the segment's own window relative to its
//! anchor (`seg`), and the absolute window of the elected frame measured
//! from BOF or EOF (`key`). Strikes from the automaton are first checked
//! against `key`; relations between neighboring segments are checked
//! against `rel` (the segment gap widened by the context frames standing
//! between the two elected frames).
//!
//! # Invariants
//! - Forward key frames measure offsets from BOF to the match start;
//!   reverse key frames measure from EOF to the match end.
//! - `key.pmax` is clamped to the configured scan caps when they are set.

use std::fmt;

use crate::config::EngineConfig;
use crate::error::SignatureError;
use crate::frames::{bmh_convert, Anchor, Frame};

/// Identifies a key frame: signature index and segment index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KeyFrameId {
    pub sig: usize,
    pub seg: usize,
}

impl fmt::Display for KeyFrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}]", self.sig, self.seg)
    }
}

/// An offset window plus the length bounds of what sits inside it.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeyFramePos {
    pub pmin: u64,
    /// `None` = unbounded.
    pub pmax: Option<u64>,
    pub lmin: u64,
    pub lmax: u64,
}

/// One segment reduced to its searchable essentials.
#[derive(Clone, Debug)]
pub struct KeyFrame {
    pub anchor: Anchor,
    /// Segment window relative to its anchor (BOF/EOF/neighboring segment).
    pub seg: KeyFramePos,
    /// Elected frame's absolute window from BOF (forward) or EOF (reverse).
    pub key: KeyFramePos,
    /// Allowed gap between this segment's elected frame and the previous
    /// (forward) or next (reverse) segment's elected frame.
    pub rel_min: u64,
    pub rel_max: Option<u64>,
}

impl KeyFrame {
    /// Quick absolute-window check for a strike offset.
    #[inline]
    pub fn check(&self, off: u64) -> bool {
        if off < self.key.pmin {
            return false;
        }
        match self.key.pmax {
            None => true,
            Some(max) => off <= max,
        }
    }

    /// Whether a gap between related elected frames is admissible.
    #[inline]
    pub fn check_gap(&self, gap: u64) -> bool {
        gap >= self.rel_min && self.rel_max.is_none_or(|max| gap <= max)
    }

    /// True when this key frame cannot be reached by a bounded scan.
    #[inline]
    pub fn is_wild(&self) -> bool {
        self.key.pmax.is_none()
    }

    /// Furthest byte the scanner must reach to see this key frame.
    pub fn reach(&self) -> Option<u64> {
        self.key.pmax.map(|p| p + self.key.lmax)
    }
}

impl fmt::Display for KeyFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} seg {}-{} key {}-{}",
            self.anchor,
            self.seg.pmin,
            self.seg.pmax.map_or(-1i64, |v| v as i64),
            self.key.pmin,
            self.key.pmax.map_or(-1i64, |v| v as i64),
        )
    }
}

/// A segment compiled for matching: the key frame geometry, the context
/// frames around the elected frame, and how the elected pattern is found.
#[derive(Clone, Debug)]
pub struct CompiledSegment {
    pub kf: KeyFrame,
    /// Context frames to the left of the elected frame, nearest first.
    pub left: Vec<Frame>,
    /// Context frames to the right, nearest first.
    pub right: Vec<Frame>,
    /// How the elected pattern is searched.
    pub seed: Seed,
}

/// Search strategy for an elected frame.
#[derive(Clone, Debug)]
pub enum Seed {
    /// Unrolled into the automaton; sequences carried here for building.
    Automaton(Vec<Vec<u8>>),
    /// Tested positionally across its bounded window each scan.
    Window(Frame),
}

fn add(a: u64, b: u64) -> u64 {
    a.saturating_add(b)
}

fn add_opt(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(add(a, b)),
        _ => None,
    }
}

/// Length bounds of a segment slice, gaps included (the leading frame's
/// own anchor gap is excluded).
fn calc_len(frames: &[Frame], forward: bool) -> (u64, u64, Option<u64>) {
    let mut min = 0u64;
    let mut max = Some(0u64);
    let iter: Box<dyn Iterator<Item = (usize, &Frame)>> = if forward {
        Box::new(frames.iter().enumerate())
    } else {
        Box::new(frames.iter().enumerate().rev())
    };
    for (step, (i, f)) in iter.enumerate() {
        let (lmin, lmax) = f.length();
        min = add(min, lmin);
        max = add_opt(max, Some(lmax));
        let interior = if forward { i > 0 } else { i < frames.len() - 1 };
        if step > 0 && interior {
            // Gap windows sit on the later frame (forward) or on the
            // earlier frame itself (reverse, SUCC-anchored).
            min = add(min, f.min);
            max = add_opt(max, f.max);
        }
    }
    let lmax_or = max;
    (min, max.unwrap_or(u64::MAX), lmax_or)
}

/// Pick the frame of a segment to seed the search with.
///
/// Candidates must unroll to between 1 and `choices` sequences, each at
/// least `varlen` long when the segment window is unanchored. The best
/// candidate maximizes pattern length per unrolled sequence; ties prefer
/// the frame nearest the segment's anchor.
fn elect(seg: &[Frame], cfg: &EngineConfig, forward: bool) -> Option<usize> {
    let mut best: Option<(usize, u64)> = None;
    let order: Vec<usize> = if forward {
        (0..seg.len()).collect()
    } else {
        (0..seg.len()).rev().collect()
    };
    for i in order {
        let f = &seg[i];
        let num = f.pattern.num_sequences();
        if num == 0 || num > cfg.choices {
            continue;
        }
        let (lmin, _) = f.pattern.length();
        if lmin == 0 {
            continue;
        }
        let score = (lmin as u64 * 1024) / num as u64;
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((i, score));
        }
    }
    best.map(|(i, _)| i)
}

/// Compile one segment into its key frame, context frames and seed.
///
/// `sig`/`seg_idx` are for error reporting only.
pub fn compile_segment(
    seg: &[Frame],
    cfg: &EngineConfig,
    sig: usize,
    seg_idx: usize,
) -> Result<CompiledSegment, SignatureError> {
    debug_assert!(!seg.is_empty());
    let forward = seg[0].anchor.is_forward();

    let (pos, seeded) = match elect(seg, cfg, forward) {
        Some(i) => (i, true),
        // No unrollable frame: fall back to the frame nearest the anchor,
        // tested positionally. Its window must end up bounded.
        None => (if forward { 0 } else { seg.len() - 1 }, false),
    };

    let (kf, left, right) = to_key_frame(seg, pos, forward);

    let elected = &seg[pos];
    // A scan cap bounds even window-less segments, so wildness only
    // disqualifies when the relevant cap is off.
    let capped = if forward { cfg.bof_cap().is_some() } else { cfg.eof_cap().is_some() };
    let seed = if seeded {
        let seqs: Vec<Vec<u8>> = elected.pattern.sequences().into_iter().map(|s| s.0).collect();
        if kf.is_wild() && !capped && seqs.iter().any(|s| s.len() < cfg.varlen) {
            return Err(SignatureError::UnboundedWildcard { sig, segment: seg_idx });
        }
        Seed::Automaton(seqs)
    } else {
        if kf.is_wild() && !capped {
            return Err(SignatureError::UnboundedWildcard { sig, segment: seg_idx });
        }
        Seed::Window(elected.clone())
    };

    Ok(CompiledSegment {
        kf,
        left: bmh_convert(left, true),
        right: bmh_convert(right, false),
        seed,
    })
}

/// Reduce a segment to its key frame plus left/right context frames.
fn to_key_frame(seg: &[Frame], pos: usize, forward: bool) -> (KeyFrame, Vec<Frame>, Vec<Frame>) {
    let mut left: Vec<Frame> = Vec::new();
    let mut right: Vec<Frame> = Vec::new();
    let (seg_lmin, _, seg_lmax) = calc_len(seg, forward);
    let (key_lmin, key_lmax) = seg[pos].length();

    let mut key = KeyFramePos { pmin: 0, pmax: None, lmin: key_lmin, lmax: key_lmax };
    let seg_pos;
    let anchor;

    if forward {
        // The anchor gap lives on the first frame.
        anchor = seg[0].anchor;
        seg_pos = KeyFramePos {
            pmin: seg[0].min,
            pmax: seg[0].max,
            lmin: seg_lmin,
            lmax: seg_lmax.unwrap_or(u64::MAX),
        };
        key.pmin = seg[0].min;
        key.pmax = seg[0].max;
        // Walk up to the elected frame, accumulating lengths and gaps into
        // the key window and collecting switched left-context frames.
        for i in 0..pos {
            let (lmin, lmax) = seg[i].length();
            key.pmin = add(add(key.pmin, lmin), seg[i + 1].min);
            key.pmax = add_opt(add_opt(key.pmax, Some(lmax)), seg[i + 1].max);
            // The gap window between i and i+1 belongs with frame i's
            // pattern when testing leftward from the elected frame.
            left.insert(0, seg[i + 1].with_pattern(seg[i].pattern.clone()));
        }
        right.extend(seg[pos + 1..].iter().cloned());
    } else {
        // The anchor gap lives on the last frame (EOF/SUCC measure toward
        // the end of the stream).
        anchor = seg[seg.len() - 1].anchor;
        seg_pos = KeyFramePos {
            pmin: seg[seg.len() - 1].min,
            pmax: seg[seg.len() - 1].max,
            lmin: seg_lmin,
            lmax: seg_lmax.unwrap_or(u64::MAX),
        };
        key.pmin = seg[seg.len() - 1].min;
        key.pmax = seg[seg.len() - 1].max;
        for i in pos + 1..seg.len() {
            let (lmin, lmax) = seg[i].length();
            key.pmin = add(add(key.pmin, lmin), seg[i - 1].min);
            key.pmax = add_opt(add_opt(key.pmax, Some(lmax)), seg[i - 1].max);
            // The gap window between i-1 and i sits on the earlier frame
            // (SUCC anchors to the successor); pair it with i's pattern for
            // testing rightward from the elected frame.
            right.push(seg[i - 1].with_pattern(seg[i].pattern.clone()));
        }
        left.extend(seg[..pos].iter().rev().cloned());
    }

    let kf = KeyFrame {
        anchor,
        seg: seg_pos,
        key,
        rel_min: 0,
        rel_max: None,
    };
    (kf, left, right)
}

/// Length bounds of a run of context frames including their gap windows.
fn context_len(frames: &[Frame]) -> (u64, Option<u64>) {
    let mut min = 0u64;
    let mut max = Some(0u64);
    for f in frames {
        let (lmin, lmax) = f.length();
        min = add(add(min, lmin), f.min);
        max = add_opt(add_opt(max, Some(lmax)), f.max);
    }
    (min, max)
}

/// Resolve absolute windows and inter-segment gap windows across a whole
/// signature, applying the scan-depth caps.
pub fn update_positions(segs: &mut [CompiledSegment], cfg: &EngineConfig) {
    // Forward sweep: PREV segments accumulate from their predecessor.
    let mut run_min = 0u64;
    let mut run_max = Some(0u64);
    for i in 0..segs.len() {
        if !segs[i].kf.anchor.is_forward() {
            continue;
        }
        if segs[i].kf.anchor == Anchor::Bof {
            run_min = 0;
            run_max = Some(0);
        }
        if segs[i].kf.anchor == Anchor::Prev && i > 0 {
            // Gap between elected frames: segment gap plus the contexts in
            // between (previous segment's right run, this one's left run).
            let (prev_ctx_min, prev_ctx_max) = context_len(&segs[i - 1].right);
            let (this_ctx_min, this_ctx_max) = context_len(&segs[i].left);
            segs[i].kf.rel_min = add(add(segs[i].kf.seg.pmin, prev_ctx_min), this_ctx_min);
            segs[i].kf.rel_max =
                add_opt(add_opt(segs[i].kf.seg.pmax, prev_ctx_max), this_ctx_max);

            segs[i].kf.key.pmin = add(segs[i].kf.key.pmin, run_min);
            segs[i].kf.key.pmax = add_opt(segs[i].kf.key.pmax, run_max);
        }
        // Advance the running BOF distance to this segment's end.
        let seg = segs[i].kf.seg;
        run_min = add(add(run_min, seg.pmin), seg.lmin);
        run_max = add_opt(
            add_opt(run_max, seg.pmax),
            (seg.lmax != u64::MAX).then_some(seg.lmax),
        );
        if let Some(cap) = cfg.bof_cap() {
            if segs[i].kf.key.pmax.is_none_or(|p| p > cap) {
                segs[i].kf.key.pmax = Some(cap);
            }
        }
    }

    // Backward sweep for EOF/SUCC segments.
    run_min = 0;
    run_max = Some(0);
    for i in (0..segs.len()).rev() {
        if segs[i].kf.anchor.is_forward() {
            continue;
        }
        if segs[i].kf.anchor == Anchor::Eof {
            run_min = 0;
            run_max = Some(0);
        }
        if segs[i].kf.anchor == Anchor::Succ && i + 1 < segs.len() {
            let (next_ctx_min, next_ctx_max) = context_len(&segs[i + 1].left);
            let (this_ctx_min, this_ctx_max) = context_len(&segs[i].right);
            segs[i].kf.rel_min = add(add(segs[i].kf.seg.pmin, next_ctx_min), this_ctx_min);
            segs[i].kf.rel_max =
                add_opt(add_opt(segs[i].kf.seg.pmax, next_ctx_max), this_ctx_max);

            segs[i].kf.key.pmin = add(segs[i].kf.key.pmin, run_min);
            segs[i].kf.key.pmax = add_opt(segs[i].kf.key.pmax, run_max);
        }
        let seg = segs[i].kf.seg;
        run_min = add(add(run_min, seg.pmin), seg.lmin);
        run_max = add_opt(
            add_opt(run_max, seg.pmax),
            (seg.lmax != u64::MAX).then_some(seg.lmax),
        );
        if let Some(cap) = cfg.eof_cap() {
            if segs[i].kf.key.pmax.is_none_or(|p| p > cap) {
                segs[i].kf.key.pmax = Some(cap);
            }
        }
    }
}
