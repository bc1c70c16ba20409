//! The two scanner halves: forward from BOF, backward from EOF.
//!
//! # Algorithm
//! - Window-tested key frames go first: their windows are small and
//!   anchored, so they cost one bounded slice each.
//! - Automaton scanning walks the stream in chunks with an overlap of the
//!   longest sequence minus one; matches starting inside the overlap are
//!   left for the next chunk so no strike is emitted twice.
//! - Scanners honor the shared stop flag and the dynamic depth limits the
//!   scorer publishes as the wait list narrows.
//!
//! # Invariants
//! - Every scanner sends exactly one `Done` message, error or not.
//! - Reverse strikes report the distance from EOF to the match end.

use std::sync::atomic::Ordering;

use crossbeam_channel::Sender;

use crate::error::ScanError;
use crate::frames::Frame;
use crate::streambuf::Buffer;

use super::{ByteMatcher, KeyFrameId, ScanCtl, ScanMsg, Strike};

/// Chunk length for automaton scans.
const SCAN_CHUNK: usize = 64 * 1024;

pub(crate) fn scan_bof(m: &ByteMatcher, buf: &Buffer, tx: &Sender<ScanMsg>, ctl: &ScanCtl) {
    let res = scan_bof_inner(m, buf, tx, ctl);
    let _ = tx.send(ScanMsg::Done(res));
}

pub(crate) fn scan_eof(m: &ByteMatcher, buf: &Buffer, tx: &Sender<ScanMsg>, ctl: &ScanCtl) {
    let res = scan_eof_inner(m, buf, tx, ctl);
    let _ = tx.send(ScanMsg::Done(res));
}

fn stopped(ctl: &ScanCtl) -> bool {
    ctl.stop.load(Ordering::Acquire)
}

fn scan_bof_inner(
    m: &ByteMatcher,
    buf: &Buffer,
    tx: &Sender<ScanMsg>,
    ctl: &ScanCtl,
) -> Result<(), ScanError> {
    for (id, frame) in &m.bof_windows {
        if stopped(ctl) {
            return Ok(());
        }
        window_strikes_forward(*id, frame, m, buf, tx, ctl)?;
    }

    let Some(ac) = &m.bof_ac else {
        return Ok(());
    };
    let overlap = m.bof_overlap;
    let mut pos = 0u64;
    loop {
        if stopped(ctl) || pos > ctl.bof_limit.load(Ordering::Acquire) {
            return Ok(());
        }
        let (bytes, hit_end) = buf.slice(pos, SCAN_CHUNK + overlap)?;
        for mat in ac.find_overlapping_iter(&bytes) {
            // Matches starting inside the overlap belong to the next chunk.
            if !hit_end && mat.start() >= SCAN_CHUNK {
                continue;
            }
            let entry = m.bof_entries[mat.pattern().as_usize()];
            let strike = Strike {
                id: entry.id,
                offset: pos + mat.start() as u64,
                length: entry.len,
                reverse: false,
            };
            if tx.send(ScanMsg::Strike(strike)).is_err() {
                return Ok(());
            }
        }
        if hit_end {
            return Ok(());
        }
        pos += SCAN_CHUNK as u64;
    }
}

fn scan_eof_inner(
    m: &ByteMatcher,
    buf: &Buffer,
    tx: &Sender<ScanMsg>,
    ctl: &ScanCtl,
) -> Result<(), ScanError> {
    for (id, frame) in &m.eof_windows {
        if stopped(ctl) {
            return Ok(());
        }
        window_strikes_reverse(*id, frame, m, buf, tx, ctl)?;
    }

    let Some(ac) = &m.eof_ac else {
        return Ok(());
    };
    let overlap = m.eof_overlap;
    let mut pos = 0u64;
    loop {
        if stopped(ctl) || pos > ctl.eof_limit.load(Ordering::Acquire) {
            return Ok(());
        }
        let (bytes, hit_start) = buf.eof_slice(pos, SCAN_CHUNK + overlap)?;
        let reversed: Vec<u8> = bytes.iter().rev().copied().collect();
        for mat in ac.find_overlapping_iter(&reversed) {
            if !hit_start && mat.start() >= SCAN_CHUNK {
                continue;
            }
            let entry = m.eof_entries[mat.pattern().as_usize()];
            let strike = Strike {
                id: entry.id,
                offset: pos + mat.start() as u64,
                length: entry.len,
                reverse: true,
            };
            if tx.send(ScanMsg::Strike(strike)).is_err() {
                return Ok(());
            }
        }
        if hit_start {
            return Ok(());
        }
        pos += SCAN_CHUNK as u64;
    }
}

/// Test a window-seeded key frame across its absolute window from BOF.
fn window_strikes_forward(
    id: KeyFrameId,
    frame: &Frame,
    m: &ByteMatcher,
    buf: &Buffer,
    tx: &Sender<ScanMsg>,
    ctl: &ScanCtl,
) -> Result<(), ScanError> {
    let kf = &m.segment(id).kf;
    let pmin = kf.key.pmin;
    let pmax = kf.key.pmax.unwrap_or(ctl.bof_limit.load(Ordering::Acquire));
    let span = pmax
        .saturating_sub(pmin)
        .saturating_add(kf.key.lmax)
        .min(usize::MAX as u64) as usize;
    let (bytes, _) = buf.slice(pmin, span)?;
    let mut off = 0usize;
    while pmin + (off as u64) <= pmax && off < bytes.len() {
        let (ok, n) = frame.pattern.test(&bytes[off..]);
        if ok {
            let strike = Strike {
                id,
                offset: pmin + off as u64,
                length: n as u64,
                reverse: false,
            };
            if tx.send(ScanMsg::Strike(strike)).is_err() {
                return Ok(());
            }
            off += 1;
        } else if n == 0 {
            break;
        } else {
            off += n;
        }
    }
    Ok(())
}

/// Test a window-seeded key frame across its absolute window from EOF.
fn window_strikes_reverse(
    id: KeyFrameId,
    frame: &Frame,
    m: &ByteMatcher,
    buf: &Buffer,
    tx: &Sender<ScanMsg>,
    ctl: &ScanCtl,
) -> Result<(), ScanError> {
    let kf = &m.segment(id).kf;
    let pmin = kf.key.pmin;
    let pmax = kf.key.pmax.unwrap_or(ctl.eof_limit.load(Ordering::Acquire));
    let span = pmax
        .saturating_sub(pmin)
        .saturating_add(kf.key.lmax)
        .min(usize::MAX as u64) as usize;
    let (bytes, _) = buf.eof_slice(pmin, span)?;
    // `bytes` ends `pmin` short of EOF; test suffixes walking leftward.
    let mut off = 0usize;
    while pmin + (off as u64) <= pmax && off < bytes.len() {
        let end = bytes.len() - off;
        let (ok, n) = frame.pattern.test_r(&bytes[..end]);
        if ok {
            let strike = Strike {
                id,
                offset: pmin + off as u64,
                length: n as u64,
                reverse: true,
            };
            if tx.send(ScanMsg::Strike(strike)).is_err() {
                return Ok(());
            }
            off += 1;
        } else if n == 0 {
            break;
        } else {
            off += n;
        }
    }
    Ok(())
}
