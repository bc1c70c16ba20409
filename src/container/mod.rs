//! Container matching: named entries of ZIP and OLE2 files checked
//! against per-entry byte signatures.
//!
//! # Algorithm
//! - A trigger inspects the first 8 bytes; non-matching inputs opt out
//!   entirely (the walker is never built).
//! - If the filename carries the configured default extension, a default
//!   hit short-circuits without opening a single entry.
//! - Otherwise entries are walked in container order; entries whose name
//!   appears in the test table run their name-only and inner-signature
//!   tests, and a container signature reports once all of its parts have
//!   matched.
//!
//! # Invariants
//! - The same part is never counted twice for one signature (per-entry
//!   hit deduplication).
//! - Results follow the same one-wait-list-per-result protocol as the
//!   byte matcher.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::bytematcher::ByteMatcher;
use crate::config::{BufferConfig, EngineConfig};
use crate::error::{ScanError, SignatureError};
use crate::priority::WaitList;
use crate::signature::Signature;
use crate::streambuf::{Buffer, CancelToken};

mod ole2;
mod zip;

pub use ole2::{is_ole2, Ole2Walker};
pub use zip::{is_zip, ZipWalker};

/// The two container families.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Zip,
    Ole2,
}

/// One named part of a container signature: the entry name plus an
/// optional inner byte signature over the entry's content.
#[derive(Clone, Debug)]
pub struct Part {
    pub name: String,
    pub inner: Option<Signature>,
}

/// A confirmed container hit. `index` is `None` for the default-extension
/// short circuit.
#[derive(Clone, Debug)]
pub struct ContainerResult {
    pub index: Option<usize>,
    pub basis: String,
}

/// Entry iteration interface shared by the ZIP and OLE2 walkers.
pub trait EntryWalker {
    fn next_entry(&mut self) -> Result<WalkNext, ScanError>;
}

/// One step of an entry walk.
pub enum WalkNext {
    Entry { name: String, data: Vec<u8> },
    End,
}

/// Tests attached to one entry name.
struct CTest {
    /// Signatures satisfied by the name alone.
    satisfied: Vec<usize>,
    /// Signatures that also need a byte match inside the entry; parallel
    /// to the embedded matcher's signature indices.
    unsatisfied: Vec<usize>,
    bm: Option<Arc<ByteMatcher>>,
}

/// Handle for one in-flight container scan.
pub struct ContainerScan {
    pub results: Receiver<Result<ContainerResult, ScanError>>,
    /// Send exactly one wait list per received `Ok` result.
    pub waits: Sender<Vec<usize>>,
}

/// The compiled matcher for one container family.
pub struct ContainerMatcher {
    kind: ContainerKind,
    tests: HashMap<String, CTest>,
    /// Parts required per container signature.
    parts: Vec<usize>,
    /// Filename extension that short-circuits to a default hit.
    default_ext: Option<String>,
    buf_cfg: BufferConfig,
}

impl ContainerMatcher {
    /// Compile a matcher from per-signature part lists.
    pub fn new(
        kind: ContainerKind,
        sigs: &[Vec<Part>],
        default_ext: Option<String>,
        cfg: EngineConfig,
        buf_cfg: BufferConfig,
    ) -> Result<Self, SignatureError> {
        let mut named: HashMap<String, (Vec<usize>, Vec<(usize, Signature)>)> = HashMap::new();
        let mut parts = Vec::with_capacity(sigs.len());
        for (i, sig_parts) in sigs.iter().enumerate() {
            parts.push(sig_parts.len());
            for part in sig_parts {
                let slot = named.entry(part.name.clone()).or_default();
                match &part.inner {
                    None => slot.0.push(i),
                    Some(inner) => slot.1.push((i, inner.clone())),
                }
            }
        }

        let mut tests = HashMap::with_capacity(named.len());
        for (name, (satisfied, inner)) in named {
            let (unsatisfied, inner_sigs): (Vec<usize>, Vec<Signature>) =
                inner.into_iter().unzip();
            let bm = if inner_sigs.is_empty() {
                None
            } else {
                Some(Arc::new(ByteMatcher::new(&inner_sigs, cfg)?))
            };
            tests.insert(name, CTest { satisfied, unsatisfied, bm });
        }

        Ok(Self { kind, tests, parts, default_ext, buf_cfg })
    }

    #[inline]
    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    /// Number of container signatures.
    #[inline]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Whether the stream's first bytes select this container family.
    pub fn triggered(&self, buf: &Buffer) -> Result<bool, ScanError> {
        let (head, _) = buf.slice(0, 8)?;
        Ok(match self.kind {
            ContainerKind::Zip => is_zip(&head),
            ContainerKind::Ole2 => is_ole2(&head),
        })
    }

    /// Start a scan. `None` when the trigger does not match (the matcher
    /// does not apply to this input at all).
    pub fn identify(
        self: &Arc<Self>,
        name: &str,
        buf: &Buffer,
    ) -> Result<Option<ContainerScan>, ScanError> {
        if !self.triggered(buf)? {
            return Ok(None);
        }
        let (result_tx, result_rx) = bounded::<Result<ContainerResult, ScanError>>(0);
        let (wait_tx, wait_rx) = bounded::<Vec<usize>>(1);

        if let Some(ext) = &self.default_ext {
            if has_extension(name, ext) {
                thread::spawn(move || {
                    let _ = result_tx.send(Ok(ContainerResult {
                        index: None,
                        basis: "container match with trigger and default extension".into(),
                    }));
                    // The default hit takes a wait reply like any result.
                    let _ = wait_rx.recv();
                });
                return Ok(Some(ContainerScan { results: result_rx, waits: wait_tx }));
            }
        }

        let m = Arc::clone(self);
        let b = buf.clone();
        thread::spawn(move || {
            let mut run = ScanRun {
                m: &m,
                results: result_tx,
                waits: wait_rx,
                wait: WaitList::everything(),
                matched: vec![0usize; m.parts.len()],
                last_hit: vec![None; m.parts.len()],
                ruled_out: vec![false; m.parts.len()],
                entry_no: 0,
            };
            let res = run.walk(&b);
            if let Err(e) = res {
                let _ = run.results.send(Err(e));
            }
        });
        Ok(Some(ContainerScan { results: result_rx, waits: wait_tx }))
    }
}

/// Per-scan state for one container walk.
struct ScanRun<'a> {
    m: &'a ContainerMatcher,
    results: Sender<Result<ContainerResult, ScanError>>,
    waits: Receiver<Vec<usize>>,
    wait: WaitList,
    /// Parts matched so far, per signature, with accumulated bases.
    matched: Vec<usize>,
    /// Which entry produced each signature's latest hit.
    last_hit: Vec<Option<u64>>,
    ruled_out: Vec<bool>,
    entry_no: u64,
}

impl ScanRun<'_> {
    fn walk(&mut self, buf: &Buffer) -> Result<(), ScanError> {
        let mut bases: Vec<Vec<String>> = vec![Vec::new(); self.m.parts.len()];
        let mut walker: Box<dyn EntryWalker> = match self.m.kind {
            ContainerKind::Zip => match ZipWalker::open(buf, self.m.buf_cfg.max_entry_sz)? {
                Some(w) => Box::new(w),
                None => return Ok(()),
            },
            ContainerKind::Ole2 => match Ole2Walker::open(buf, self.m.buf_cfg.max_entry_sz)? {
                Some(w) => Box::new(w),
                None => return Ok(()),
            },
        };

        loop {
            let (name, data) = match walker.next_entry()? {
                WalkNext::Entry { name, data } => (name, data),
                WalkNext::End => break,
            };
            let Some(ct) = self.m.tests.get(&name) else {
                continue;
            };
            self.entry_no += 1;
            let hits = self.entry_hits(ct, &name, data)?;
            if self.process_hits(&hits, ct, &mut bases)? {
                break;
            }
        }
        Ok(())
    }

    /// Hits for one entry: name-only signatures plus inner byte matches,
    /// deduplicated per signature.
    fn entry_hits(
        &self,
        ct: &CTest,
        name: &str,
        data: Vec<u8>,
    ) -> Result<Vec<(usize, String)>, ScanError> {
        let mut hits: Vec<(usize, String)> = Vec::new();
        for &sig in &ct.satisfied {
            if self.wait.check(sig) {
                hits.push((sig, format!("container name {name}")));
            }
        }
        if let Some(bm) = &ct.bm {
            let entry_buf =
                Buffer::from_bytes(data, self.m.buf_cfg, CancelToken::new());
            for r in drive_inner(bm, &entry_buf) {
                let r = r?;
                let sig = ct.unsatisfied[r.index];
                if self.wait.check(sig) && !hits.iter().any(|(s, _)| *s == sig) {
                    hits.push((sig, format!("container name {name} with {}", r.basis)));
                }
            }
        }
        Ok(hits)
    }

    /// Record hits, emit completed signatures, rule out missed ones.
    /// Returns true when the walk can stop.
    fn process_hits(
        &mut self,
        hits: &[(usize, String)],
        ct: &CTest,
        bases: &mut [Vec<String>],
    ) -> Result<bool, ScanError> {
        if hits.is_empty() {
            // The entry existed but nothing matched inside it: every
            // signature tied to this name needed it.
            for &sig in ct.satisfied.iter().chain(&ct.unsatisfied) {
                self.ruled_out[sig] = true;
            }
            return Ok(self.exhausted());
        }
        for (sig, basis) in hits {
            self.matched[*sig] += 1;
            self.last_hit[*sig] = Some(self.entry_no);
            bases[*sig].push(basis.clone());
            if self.matched[*sig] == self.m.parts[*sig] && self.wait.check(*sig) {
                let result = ContainerResult {
                    index: Some(*sig),
                    basis: bases[*sig].join("; "),
                };
                if self.results.send(Ok(result)).is_err() {
                    return Ok(true);
                }
                match self.waits.recv() {
                    Ok(list) => {
                        self.wait.set(list);
                        if self.wait.exhausted() {
                            return Ok(true);
                        }
                    }
                    Err(_) => return Ok(true),
                }
            }
        }
        // Signatures tied to this entry whose latest hit is not this entry
        // are dead (an earlier same-named entry may have satisfied them).
        for &sig in ct.satisfied.iter().chain(&ct.unsatisfied) {
            if self.last_hit[sig] != Some(self.entry_no) {
                self.ruled_out[sig] = true;
            }
        }
        Ok(self.exhausted())
    }

    /// True when every still-wanted signature has been ruled out.
    fn exhausted(&self) -> bool {
        match self.wait.current() {
            None => self.ruled_out.iter().all(|&r| r),
            Some(list) => list.iter().all(|&sig| self.ruled_out[sig]),
        }
    }
}

/// Run an embedded byte matcher to completion with no priorities.
fn drive_inner(
    bm: &Arc<ByteMatcher>,
    buf: &Buffer,
) -> Vec<Result<crate::bytematcher::ByteResult, ScanError>> {
    let scan = bm.identify(buf);
    let all: Vec<usize> = (0..bm.len()).collect();
    let mut out = Vec::new();
    while let Ok(res) = scan.results.recv() {
        let ok = res.is_ok();
        out.push(res);
        if ok && scan.waits.send(all.clone()).is_err() {
            break;
        }
    }
    out
}

fn has_extension(name: &str, ext: &str) -> bool {
    match name.rsplit_once('.') {
        Some((_, e)) => e.eq_ignore_ascii_case(ext),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{Anchor, Frame};
    use crate::patterns::Pattern;

    fn seq(b: &[u8]) -> Pattern {
        Pattern::sequence(b.to_vec())
    }

    fn mem(data: Vec<u8>) -> Buffer {
        Buffer::from_bytes(data, BufferConfig::default(), CancelToken::new())
    }

    fn docx_matcher() -> Arc<ContainerMatcher> {
        // Sig 0: DOCX (a content-types entry plus the main document part
        // with an XML probe). Sig 1: name-only ODT-style mimetype match.
        let sigs = vec![
            vec![
                Part { name: "[Content_Types].xml".into(), inner: None },
                Part {
                    name: "word/document.xml".into(),
                    inner: Some(Signature::new(vec![Frame::window(
                        Anchor::Bof,
                        0,
                        64,
                        seq(b"<w:document"),
                    )])),
                },
            ],
            vec![Part { name: "mimetype".into(), inner: None }],
        ];
        Arc::new(
            ContainerMatcher::new(
                ContainerKind::Zip,
                &sigs,
                Some("zip".into()),
                EngineConfig::default(),
                BufferConfig::default(),
            )
            .unwrap(),
        )
    }

    fn drive(m: &Arc<ContainerMatcher>, name: &str, buf: &Buffer) -> Vec<ContainerResult> {
        let scan = m.identify(name, buf).unwrap().expect("trigger");
        let all: Vec<usize> = (0..m.len()).collect();
        let mut out = Vec::new();
        while let Ok(res) = scan.results.recv() {
            match res {
                Ok(r) => {
                    out.push(r);
                    let _ = scan.waits.send(all.clone());
                }
                Err(e) => panic!("container error: {e}"),
            }
        }
        out
    }

    #[test]
    fn docx_parts_all_match() {
        let m = docx_matcher();
        let archive = zip::build_zip(&[
            ("[Content_Types].xml", b"<Types/>"),
            ("word/document.xml", b"<w:document xmlns:w=\"...\"/>"),
        ]);
        let hits = drive(&m, "c.docx", &mem(archive));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].index, Some(0));
        assert!(hits[0].basis.contains("container name word/document.xml with byte match"));
    }

    #[test]
    fn missing_part_reports_nothing() {
        let m = docx_matcher();
        let archive = zip::build_zip(&[("[Content_Types].xml", b"<Types/>")]);
        assert!(drive(&m, "c.docx", &mem(archive)).is_empty());
    }

    #[test]
    fn inner_signature_must_match() {
        let m = docx_matcher();
        let archive = zip::build_zip(&[
            ("[Content_Types].xml", b"<Types/>"),
            ("word/document.xml", b"not the expected root"),
        ]);
        assert!(drive(&m, "c.docx", &mem(archive)).is_empty());
    }

    #[test]
    fn default_extension_short_circuits() {
        let m = docx_matcher();
        // No central directory needed: the default hit never opens entries.
        let buf = mem(b"PK\x03\x04garbage".to_vec());
        let hits = drive(&m, "archive.ZIP", &buf);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].index, None);
        assert!(hits[0].basis.contains("default extension"));
    }

    #[test]
    fn non_trigger_input_opts_out() {
        let m = docx_matcher();
        let buf = mem(b"%PDF-1.4".to_vec());
        assert!(m.identify("x.pdf", &buf).unwrap().is_none());
    }

    #[test]
    fn empty_wait_list_stops_walk() {
        let m = docx_matcher();
        let archive = zip::build_zip(&[
            ("mimetype", b"application/vnd.oasis"),
            ("[Content_Types].xml", b"<Types/>"),
            ("word/document.xml", b"<w:document/>"),
        ]);
        let scan = m.identify("f.odt", &mem(archive)).unwrap().unwrap();
        let first = scan.results.recv().unwrap().unwrap();
        assert_eq!(first.index, Some(1));
        scan.waits.send(Vec::new()).unwrap();
        assert!(scan.results.recv().is_err());
    }
}
