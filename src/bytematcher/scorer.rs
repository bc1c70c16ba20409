//! The scorer: serial consumer of strikes, owner of all per-scan state.
//!
//! # Algorithm
//! For each strike: wait-list check, absolute-window check, test-tree
//! verification, then segment bookkeeping. A signature completes when all
//! of its segments hold at least one verified strike and every related
//! pair of neighboring segments admits a gap inside its window.
//!
//! After each emitted result the scorer blocks for exactly one wait list
//! from the coordinator; an empty list halts the scan. Narrowed wait lists
//! also tighten the depth limits the scanners poll, so a scan whose
//! remaining candidates are all near the BOF stops early.
//!
//! # Invariants
//! - A signature is emitted at most once per scan.
//! - Errors other than clean EOF abort scoring; whatever was already
//!   emitted stands, and exactly one `Err` is sent before closing.

use std::sync::atomic::Ordering;

use crossbeam_channel::{Receiver, Sender};

use crate::error::ScanError;
use crate::frames::Anchor;
use crate::priority::WaitList;
use crate::streambuf::Buffer;

use super::{ByteMatcher, ByteResult, ScanCtl, ScanMsg, Strike};

/// Verified strikes held per segment: (anchor-space offset, length).
type Hits = Vec<(u64, u64)>;

struct Scorer<'a> {
    m: &'a ByteMatcher,
    buf: &'a Buffer,
    ctl: &'a ScanCtl,
    results: Sender<Result<ByteResult, ScanError>>,
    waits: Receiver<Vec<usize>>,
    wait: WaitList,
    partials: Vec<Vec<Hits>>,
    emitted: Vec<bool>,
    halted: bool,
}

pub(crate) fn run(
    m: &ByteMatcher,
    buf: &Buffer,
    strikes: Receiver<ScanMsg>,
    results: Sender<Result<ByteResult, ScanError>>,
    waits: Receiver<Vec<usize>>,
    ctl: &ScanCtl,
) {
    let partials = (0..m.len())
        .map(|i| vec![Hits::new(); m.signature_segments(i).len()])
        .collect();
    let mut s = Scorer {
        m,
        buf,
        ctl,
        results,
        waits,
        wait: WaitList::everything(),
        partials,
        emitted: vec![false; m.len()],
        halted: false,
    };
    s.publish_limits();

    let mut done = 0;
    let mut err: Option<ScanError> = None;
    while done < 2 {
        match strikes.recv() {
            Err(_) => break,
            Ok(ScanMsg::Done(res)) => {
                done += 1;
                if let Err(e) = res {
                    if err.is_none() {
                        err = Some(e);
                    }
                    ctl.stop.store(true, Ordering::Release);
                }
            }
            Ok(ScanMsg::Strike(strike)) => {
                if s.halted || err.is_some() {
                    continue;
                }
                if let Err(e) = s.process(strike) {
                    err = Some(e);
                    ctl.stop.store(true, Ordering::Release);
                }
            }
        }
    }

    if let Some(e) = err {
        if !s.halted {
            let _ = s.results.send(Err(e));
        }
    }
    // Dropping `results` closes the channel; the coordinator sees the end.
}

impl Scorer<'_> {
    fn process(&mut self, strike: Strike) -> Result<(), ScanError> {
        let sig = strike.id.sig;
        if self.emitted[sig] || !self.wait.check(sig) {
            return Ok(());
        }
        let kf = &self.m.segment(strike.id).kf;
        debug_assert_eq!(
            kf.anchor.is_forward(),
            !strike.reverse,
            "strike direction disagrees with key frame {}",
            strike.id
        );
        if !kf.check(strike.offset) {
            return Ok(());
        }

        // Convert to absolute coordinates for context verification.
        let abs_start = if strike.reverse {
            let size = self.buf.size_now();
            match size.checked_sub(strike.offset + strike.length) {
                Some(v) => v,
                None => return Ok(()),
            }
        } else {
            strike.offset
        };
        if !self.m.test_tree(strike.id).verify(self.buf, abs_start, strike.length)? {
            return Ok(());
        }

        let hits = &mut self.partials[sig][strike.id.seg];
        if !hits.contains(&(strike.offset, strike.length)) {
            hits.push((strike.offset, strike.length));
        }
        if let Some(basis) = self.try_complete(sig) {
            self.emit(sig, basis)?;
        }
        Ok(())
    }

    /// Chain the segments of `sig`; `Some(basis)` when the whole signature
    /// is satisfied.
    fn try_complete(&self, sig: usize) -> Option<String> {
        let segs = self.m.signature_segments(sig);
        let hits = &self.partials[sig];
        if hits.iter().any(Vec::is_empty) {
            return None;
        }

        let mut picked: Vec<(u64, u64)> = Vec::with_capacity(segs.len());

        // Forward chain, left to right.
        let mut viable: Hits = Vec::new();
        for (i, cs) in segs.iter().enumerate() {
            if !cs.kf.anchor.is_forward() {
                continue;
            }
            let chained = cs.kf.anchor == Anchor::Prev
                && i > 0
                && segs[i - 1].kf.anchor.is_forward();
            let next: Hits = if chained {
                hits[i]
                    .iter()
                    .copied()
                    .filter(|&(off, _)| {
                        viable.iter().any(|&(voff, vlen)| {
                            off.checked_sub(voff + vlen)
                                .is_some_and(|gap| cs.kf.check_gap(gap))
                        })
                    })
                    .collect()
            } else {
                hits[i].clone()
            };
            if next.is_empty() {
                return None;
            }
            picked.push(next[0]);
            viable = next;
        }

        // Reverse chain, from the segment nearest EOF back.
        let mut viable: Hits = Vec::new();
        let mut reverse_picks: Vec<(usize, (u64, u64))> = Vec::new();
        for (i, cs) in segs.iter().enumerate().rev() {
            if cs.kf.anchor.is_forward() {
                continue;
            }
            let chained = cs.kf.anchor == Anchor::Succ
                && i + 1 < segs.len()
                && !segs[i + 1].kf.anchor.is_forward();
            let next: Hits = if chained {
                hits[i]
                    .iter()
                    .copied()
                    .filter(|&(off, _)| {
                        viable.iter().any(|&(voff, vlen)| {
                            off.checked_sub(voff + vlen)
                                .is_some_and(|gap| cs.kf.check_gap(gap))
                        })
                    })
                    .collect()
            } else {
                hits[i].clone()
            };
            if next.is_empty() {
                return None;
            }
            reverse_picks.push((i, next[0]));
            viable = next;
        }
        reverse_picks.reverse();

        // Render the basis in stream order, reverse hits as absolute
        // offsets when the stream size is already known.
        let size = self.buf.size();
        let mut parts: Vec<String> = picked
            .iter()
            .map(|&(off, len)| format!("{off}, {len}"))
            .collect();
        for &(_, (off, len)) in &reverse_picks {
            match size {
                Some(sz) if sz >= off + len => {
                    parts.push(format!("{}, {len}", sz - off - len));
                }
                _ => parts.push(format!("EOF-{off}, {len}")),
            }
        }
        Some(format!("byte match at {}", parts.join("; ")))
    }

    fn emit(&mut self, sig: usize, basis: String) -> Result<(), ScanError> {
        self.emitted[sig] = true;
        if self.results.send(Ok(ByteResult { index: sig, basis })).is_err() {
            // Receiver went away: treat as a halt.
            self.halted = true;
            self.ctl.stop.store(true, Ordering::Release);
            return Ok(());
        }
        match self.waits.recv() {
            Ok(list) => {
                self.wait.set(list);
                if self.wait.exhausted() {
                    self.halted = true;
                    self.ctl.stop.store(true, Ordering::Release);
                } else {
                    self.publish_limits();
                }
            }
            Err(_) => {
                self.halted = true;
                self.ctl.stop.store(true, Ordering::Release);
            }
        }
        Ok(())
    }

    /// Tighten the scanner depth limits to what the wait list still needs.
    fn publish_limits(&self) {
        let mut bof = 0u64;
        let mut eof = 0u64;
        for sig in 0..self.m.len() {
            if self.emitted[sig] || !self.wait.check(sig) {
                continue;
            }
            for cs in self.m.signature_segments(sig) {
                let side = if cs.kf.anchor.is_forward() { &mut bof } else { &mut eof };
                *side = match cs.kf.reach() {
                    None => u64::MAX,
                    Some(r) => (*side).max(r),
                };
            }
        }
        self.ctl.bof_limit.store(bof, Ordering::Release);
        self.ctl.eof_limit.store(eof, Ordering::Release);
    }
}
