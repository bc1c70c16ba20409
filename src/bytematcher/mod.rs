//! Byte matching: signatures compiled into automata plus per-segment
//! verification, scanned concurrently from both ends of a stream.
//!
//! # Algorithm
//! - Compile: segment every signature, elect a key frame per segment,
//!   unroll elected patterns into two Aho-Corasick automata (one for
//!   forward anchors, one over reversed sequences for the end-anchored
//!   set). Segments that cannot unroll are window-tested each scan.
//! - Scan: two scanner threads feed strikes through one channel into a
//!   scorer thread, which verifies windows and context frames, assembles
//!   segments into whole-signature matches, and emits results.
//! - Priority: after every emitted result the scorer blocks for exactly
//!   one wait list on the feedback channel. An empty list stops the scan.
//!
//! # Invariants
//! - Compiled state is immutable after `new`; a matcher is shared freely
//!   across concurrent scans.
//! - Every emitted result is answered by exactly one wait list, or the
//!   scorer deadlocks. This mirrors the container matcher's contract.
//! - Scan workers are detached threads over `Arc`-shared state (the
//!   [`ByteScan`] handle outlives `identify`, so a scope cannot bound
//!   them). They wind down on the stop flag, on exhausting the stream, or
//!   when their channels close: dropping a `ByteScan` unanswered halts
//!   the scorer, which in turn stops both scanners.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use aho_corasick::AhoCorasick;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::config::EngineConfig;
use crate::error::{ScanError, SignatureError};
use crate::frames::Frame;
use crate::signature::Signature;
use crate::streambuf::Buffer;

mod keyframes;
mod scanner;
mod scorer;
mod testtree;

pub use keyframes::{KeyFrame, KeyFrameId, KeyFramePos};
pub use testtree::TestTree;

use keyframes::{compile_segment, update_positions, CompiledSegment, Seed};

/// A raw hit from a scanner: the elected frame of `id` matched.
#[derive(Clone, Copy, Debug)]
pub struct Strike {
    pub id: KeyFrameId,
    /// Forward strikes: absolute offset of the match start. Reverse
    /// strikes: distance from EOF to the match end.
    pub offset: u64,
    pub length: u64,
    pub reverse: bool,
}

/// A confirmed signature match.
#[derive(Clone, Debug)]
pub struct ByteResult {
    pub index: usize,
    pub basis: String,
}

/// Messages from scanners to the scorer.
pub(crate) enum ScanMsg {
    Strike(Strike),
    /// A scanner finished (cleanly or with the first error it hit).
    Done(Result<(), ScanError>),
}

/// Shared scan controls: stop flag plus dynamic depth limits the scorer
/// tightens as the wait list narrows.
pub(crate) struct ScanCtl {
    pub stop: AtomicBool,
    pub bof_limit: AtomicU64,
    pub eof_limit: AtomicU64,
}

/// An automaton entry resolved back to its key frame.
#[derive(Clone, Copy, Debug)]
struct AcEntry {
    id: KeyFrameId,
    len: u64,
}

/// The compiled matcher.
pub struct ByteMatcher {
    /// Per signature, per segment.
    segments: Vec<Vec<CompiledSegment>>,
    tests: Vec<Vec<TestTree>>,
    bof_ac: Option<AhoCorasick>,
    bof_entries: Vec<AcEntry>,
    eof_ac: Option<AhoCorasick>,
    eof_entries: Vec<AcEntry>,
    /// Window-tested key frames per side.
    bof_windows: Vec<(KeyFrameId, Frame)>,
    eof_windows: Vec<(KeyFrameId, Frame)>,
    /// Chunk overlap: longest automaton sequence minus one.
    bof_overlap: usize,
    eof_overlap: usize,
}

/// Handle for one in-flight byte scan.
pub struct ByteScan {
    /// Confirmed results, or the single terminal error.
    pub results: Receiver<Result<ByteResult, ScanError>>,
    /// Wait-list feedback: send exactly one list per received result.
    pub waits: Sender<Vec<usize>>,
    stop: Arc<ScanCtl>,
}

impl ByteScan {
    /// Ask the scan to wind down without waiting for results.
    pub fn halt(&self) {
        self.stop.stop.store(true, Ordering::Release);
    }
}

impl ByteMatcher {
    /// Compile a matcher from signatures.
    pub fn new(sigs: &[Signature], cfg: EngineConfig) -> Result<Self, SignatureError> {
        let mut segments = Vec::with_capacity(sigs.len());
        let mut tests = Vec::with_capacity(sigs.len());
        let mut bof_seqs: Vec<Vec<u8>> = Vec::new();
        let mut bof_entries = Vec::new();
        let mut eof_seqs: Vec<Vec<u8>> = Vec::new();
        let mut eof_entries = Vec::new();
        let mut bof_windows = Vec::new();
        let mut eof_windows = Vec::new();

        for (i, sig) in sigs.iter().enumerate() {
            sig.validate(i)?;
            let mut compiled: Vec<CompiledSegment> = Vec::new();
            for (j, seg) in sig.segment(cfg.distance, cfg.range).iter().enumerate() {
                compiled.push(compile_segment(seg, &cfg, i, j)?);
            }
            update_positions(&mut compiled, &cfg);

            let mut sig_tests = Vec::with_capacity(compiled.len());
            for (j, cs) in compiled.iter().enumerate() {
                let id = KeyFrameId { sig: i, seg: j };
                let forward = cs.kf.anchor.is_forward();
                match &cs.seed {
                    Seed::Automaton(seqs) => {
                        for s in seqs {
                            if forward {
                                bof_seqs.push(s.clone());
                                bof_entries.push(AcEntry { id, len: s.len() as u64 });
                            } else {
                                let mut rev = s.clone();
                                rev.reverse();
                                eof_seqs.push(rev);
                                eof_entries.push(AcEntry { id, len: s.len() as u64 });
                            }
                        }
                    }
                    Seed::Window(frame) => {
                        if forward {
                            bof_windows.push((id, frame.clone()));
                        } else {
                            eof_windows.push((id, frame.clone()));
                        }
                    }
                }
                sig_tests.push(TestTree::new(cs.left.clone(), cs.right.clone()));
            }
            segments.push(compiled);
            tests.push(sig_tests);
        }

        let bof_overlap = bof_seqs.iter().map(Vec::len).max().unwrap_or(1) - 1;
        let eof_overlap = eof_seqs.iter().map(Vec::len).max().unwrap_or(1) - 1;
        let bof_ac = build_automaton(&bof_seqs)?;
        let eof_ac = build_automaton(&eof_seqs)?;

        tracing::debug!(
            signatures = sigs.len(),
            bof_seqs = bof_seqs.len(),
            eof_seqs = eof_seqs.len(),
            bof_windows = bof_windows.len(),
            eof_windows = eof_windows.len(),
            "byte matcher compiled"
        );

        Ok(Self {
            segments,
            tests,
            bof_ac,
            bof_entries,
            eof_ac,
            eof_entries,
            bof_windows,
            eof_windows,
            bof_overlap,
            eof_overlap,
        })
    }

    /// Number of compiled signatures.
    #[inline]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Compiled key frames with their ids, in signature order.
    pub fn key_frames(&self) -> impl Iterator<Item = (KeyFrameId, &KeyFrame)> {
        self.segments.iter().enumerate().flat_map(|(sig, segs)| {
            segs.iter()
                .enumerate()
                .map(move |(seg, cs)| (KeyFrameId { sig, seg }, &cs.kf))
        })
    }

    /// Furthest scan depths any signature can require, `None` = to the end.
    pub fn max_reach(&self) -> (Option<u64>, Option<u64>) {
        let mut bof = Some(0u64);
        let mut eof = Some(0u64);
        for segs in &self.segments {
            for cs in segs {
                let side = if cs.kf.anchor.is_forward() { &mut bof } else { &mut eof };
                *side = match (*side, cs.kf.reach()) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    _ => None,
                };
            }
        }
        (bof, eof)
    }

    /// Start a concurrent scan over `buf`.
    ///
    /// The caller must reply to every `Ok` result with exactly one wait
    /// list on `waits` (empty = stop). Results end with at most one `Err`;
    /// the channel then closes.
    pub fn identify(self: &Arc<Self>, buf: &Buffer) -> ByteScan {
        let (strike_tx, strike_rx) = unbounded::<ScanMsg>();
        let (result_tx, result_rx) = bounded::<Result<ByteResult, ScanError>>(0);
        let (wait_tx, wait_rx) = bounded::<Vec<usize>>(1);

        let ctl = Arc::new(ScanCtl {
            stop: AtomicBool::new(false),
            bof_limit: AtomicU64::new(u64::MAX),
            eof_limit: AtomicU64::new(u64::MAX),
        });

        let m = Arc::clone(self);
        let b = buf.clone();
        let tx = strike_tx.clone();
        let c = Arc::clone(&ctl);
        thread::spawn(move || scanner::scan_bof(&m, &b, &tx, &c));

        let m = Arc::clone(self);
        let b = buf.clone();
        let c = Arc::clone(&ctl);
        thread::spawn(move || scanner::scan_eof(&m, &b, &strike_tx, &c));

        let m = Arc::clone(self);
        let b = buf.clone();
        let c = Arc::clone(&ctl);
        thread::spawn(move || {
            scorer::run(&m, &b, strike_rx, result_tx, wait_rx, &c);
        });

        ByteScan { results: result_rx, waits: wait_tx, stop: ctl }
    }

    pub(crate) fn segment(&self, id: KeyFrameId) -> &CompiledSegment {
        &self.segments[id.sig][id.seg]
    }

    pub(crate) fn test_tree(&self, id: KeyFrameId) -> &TestTree {
        &self.tests[id.sig][id.seg]
    }

    pub(crate) fn signature_segments(&self, sig: usize) -> &[CompiledSegment] {
        &self.segments[sig]
    }
}

fn build_automaton(seqs: &[Vec<u8>]) -> Result<Option<AhoCorasick>, SignatureError> {
    if seqs.is_empty() {
        return Ok(None);
    }
    AhoCorasick::new(seqs)
        .map(Some)
        .map_err(|e| SignatureError::Automaton { detail: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferConfig;
    use crate::frames::Anchor;
    use crate::patterns::Pattern;
    use crate::streambuf::CancelToken;

    fn seq(b: &[u8]) -> Pattern {
        Pattern::sequence(b.to_vec())
    }

    fn mem(data: &[u8]) -> Buffer {
        Buffer::from_bytes(data.to_vec(), BufferConfig::default(), CancelToken::new())
    }

    fn pdf_like() -> Vec<Signature> {
        vec![
            // sig 0: header + trailer
            Signature::new(vec![
                Frame::fixed(Anchor::Bof, 0, seq(b"%PDF-")),
                Frame::window(Anchor::Eof, 0, 1024, seq(b"%%EOF")),
            ]),
            // sig 1: header only
            Signature::new(vec![Frame::fixed(Anchor::Bof, 0, seq(b"HDR!"))]),
        ]
    }

    /// Drive a scan to completion with no priorities, collecting results.
    fn run_scan(m: &Arc<ByteMatcher>, buf: &Buffer) -> Vec<ByteResult> {
        let scan = m.identify(buf);
        let mut out = Vec::new();
        while let Ok(res) = scan.results.recv() {
            match res {
                Ok(r) => {
                    out.push(r);
                    scan.waits.send((0..m.len()).collect()).unwrap();
                }
                Err(e) => panic!("scan error: {e}"),
            }
        }
        out
    }

    #[test]
    fn bof_and_eof_segments_combine() {
        let m = Arc::new(ByteMatcher::new(&pdf_like(), EngineConfig::default()).unwrap());
        let mut doc = b"%PDF-1.4 stuff ".to_vec();
        doc.extend_from_slice(&[b'x'; 100]);
        doc.extend_from_slice(b"%%EOF\n");
        let hits = run_scan(&m, &mem(&doc));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].index, 0);
        assert!(hits[0].basis.contains("byte match"));
    }

    #[test]
    fn missing_trailer_yields_nothing() {
        let m = Arc::new(ByteMatcher::new(&pdf_like(), EngineConfig::default()).unwrap());
        let hits = run_scan(&m, &mem(b"%PDF-1.4 but it just stops"));
        assert!(hits.is_empty());
    }

    #[test]
    fn empty_wait_list_stops_the_scan() {
        let sigs = vec![
            Signature::new(vec![Frame::fixed(Anchor::Bof, 0, seq(b"AB"))]),
            Signature::new(vec![Frame::wild(Anchor::Prev, seq(b"needle"))]),
        ];
        let m = Arc::new(ByteMatcher::new(&sigs, EngineConfig::default()).unwrap());
        let mut doc = b"AB".to_vec();
        doc.extend_from_slice(&[0u8; 4096]);
        doc.extend_from_slice(b"needle");
        let buf = mem(&doc);

        let scan = m.identify(&buf);
        let first = scan.results.recv().unwrap().unwrap();
        assert_eq!(first.index, 0);
        // Nothing further wanted: the scanner must stop without reporting
        // the needle signature.
        scan.waits.send(Vec::new()).unwrap();
        assert!(scan.results.recv().is_err());
    }

    #[test]
    fn window_tested_segment_strikes() {
        // A pattern that cannot unroll: any byte except 'x' at offsets 0-2.
        let sigs = vec![Signature::new(vec![Frame::window(
            Anchor::Bof,
            0,
            2,
            Pattern::not(seq(b"x")),
        )])];
        let m = Arc::new(ByteMatcher::new(&sigs, EngineConfig::default()).unwrap());
        assert_eq!(run_scan(&m, &mem(b"abc")).len(), 1);
        assert!(run_scan(&m, &mem(b"xxx")).is_empty());
    }

    #[test]
    fn related_segments_respect_gap_windows() {
        let sigs = vec![Signature::new(vec![
            Frame::fixed(Anchor::Bof, 0, seq(b"HEAD")),
            Frame::window(Anchor::Prev, 8192 + 1, 8192 + 64, seq(b"TAIL")),
        ])];
        let m = Arc::new(ByteMatcher::new(&sigs, EngineConfig::default()).unwrap());

        let mut good = b"HEAD".to_vec();
        good.extend_from_slice(&vec![0u8; 8192 + 10]);
        good.extend_from_slice(b"TAIL");
        assert_eq!(run_scan(&m, &mem(&good)).len(), 1);

        let mut bad = b"HEAD".to_vec();
        bad.extend_from_slice(&vec![0u8; 10]);
        bad.extend_from_slice(b"TAIL");
        assert!(run_scan(&m, &mem(&bad)).is_empty());
    }

    #[test]
    fn max_reach_accounts_for_wildness() {
        let sigs = vec![
            Signature::new(vec![Frame::fixed(Anchor::Bof, 0, seq(b"AB"))]),
            Signature::new(vec![Frame::wild(Anchor::Prev, seq(b"anywhere"))]),
        ];
        let m = ByteMatcher::new(&sigs, EngineConfig::default()).unwrap();
        let (bof, _) = m.max_reach();
        assert_eq!(bof, None);

        let capped = ByteMatcher::new(
            &sigs,
            EngineConfig { max_bof: 4096, ..EngineConfig::default() },
        )
        .unwrap();
        let (bof, _) = capped.max_reach();
        assert_eq!(bof, Some(4096 + 8));
    }
}
