//! The engine: authorities compiled into shared matchers, and the
//! per-input identification coordinator.
//!
//! # Algorithm
//! Matchers run in a fixed order per input: name and declared-MIME
//! lookups, then the container walk (its own thread plus the wait-list
//! protocol), then the XML probe, then the concurrent byte scan, then the
//! text probe. Before each matcher the coordinator asks every recorder
//! whether that matcher can still change its outcome; when all say no,
//! the matcher is skipped. This is what suppresses the generic ZIP byte
//! signature once a container signature has identified the file.
//!
//! # Invariants
//! - Every `Ok` result from a scanning matcher is answered with exactly
//!   one wait list.
//! - The first non-cancellation error is surfaced; remaining results are
//!   drained so no scanner blocks on a dead channel.
//! - Recorders belong to the coordinator; nothing else touches them.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use crate::bytematcher::ByteMatcher;
use crate::config::{BufferConfig, EngineConfig};
use crate::container::{ContainerKind, ContainerMatcher, Part};
use crate::error::{ScanError, SignatureError};
use crate::identifier::{
    Base, ContainerFamily, FormatInfo, Identification, MatcherKind, Recorder,
};
use crate::matchers::{MimeMatcher, NameMatcher, TextMatcher, XmlMatcher};
use crate::priority::{PriorityList, WaitSet};
use crate::signature::Signature;
use crate::streambuf::{Buffer, CancelToken};

/// One format as an authority declares it.
#[derive(Clone, Debug, Default)]
pub struct FormatDecl {
    pub id: String,
    pub name: String,
    pub version: String,
    pub mime: String,
    pub mime_aliases: Vec<String>,
    pub extensions: Vec<String>,
    /// Root-element tests: (local name, namespace URI; empty = any).
    pub xml_roots: Vec<(String, String)>,
    pub signatures: Vec<Signature>,
    pub containers: Vec<(ContainerKind, Vec<Part>)>,
    /// This format is the authority's plain-text format.
    pub is_text: bool,
    pub family: ContainerFamily,
}

/// One authority's contribution to the engine.
#[derive(Clone, Debug, Default)]
pub struct AuthoritySpec {
    pub namespace: String,
    pub formats: Vec<FormatDecl>,
    /// Ordered pairs (winner, loser): a match on `winner` suppresses
    /// further interest in `loser`'s signatures.
    pub superiority: Vec<(String, String)>,
    /// Format recorded on a container default hit.
    pub zip_default: Option<String>,
    /// Report every byte-backed candidate instead of only top ties.
    pub no_priority: bool,
}

/// What one scan produced: the ranked identifications and, if the scan
/// ended early, the error that stopped it.
#[derive(Debug)]
pub struct ScanOutcome {
    pub ids: Vec<Identification>,
    pub error: Option<ScanError>,
}

/// Builds an [`Engine`] from authority specs.
#[derive(Default)]
pub struct EngineBuilder {
    cfg: EngineConfig,
    buf_cfg: BufferConfig,
    name_m: NameMatcher,
    mime_m: MimeMatcher,
    xml_m: XmlMatcher,
    text_m: TextMatcher,
    byte_sigs: Vec<Signature>,
    zip_sigs: Vec<Vec<Part>>,
    ole2_sigs: Vec<Vec<Part>>,
    zip_default_ext: Option<String>,
    identifiers: Vec<Base>,
}

impl EngineBuilder {
    pub fn new(cfg: EngineConfig) -> Self {
        Self { cfg, ..Self::default() }
    }

    pub fn buffer_config(mut self, buf_cfg: BufferConfig) -> Self {
        self.buf_cfg = buf_cfg;
        self
    }

    /// Register an authority. Order matters only for output ordering.
    pub fn add_authority(mut self, spec: AuthoritySpec) -> Self {
        let mut base = Base {
            namespace: spec.namespace,
            zip_default: spec.zip_default.clone(),
            no_priority: spec.no_priority,
            ..Base::default()
        };
        base.name_ids.start = self.name_m.len();
        base.mime_ids.start = self.mime_m.len();
        base.xml_ids.start = self.xml_m.len();
        base.text_ids.start = self.text_m.len();
        base.byte_ids.start = self.byte_sigs.len();
        base.zip_ids.start = self.zip_sigs.len();
        base.ole2_ids.start = self.ole2_sigs.len();

        for f in &spec.formats {
            base.infos.insert(
                f.id.clone(),
                FormatInfo {
                    name: f.name.clone(),
                    version: f.version.clone(),
                    mime: f.mime.clone(),
                    family: f.family,
                },
            );
            for ext in &f.extensions {
                self.name_m.add(ext);
                base.name_ids.ids.push(f.id.clone());
            }
            if !f.mime.is_empty() {
                self.mime_m.add(&f.mime, &f.mime_aliases);
                base.mime_ids.ids.push(f.id.clone());
            }
            for (local, ns) in &f.xml_roots {
                self.xml_m.add(local, ns);
                base.xml_ids.ids.push(f.id.clone());
            }
            if f.is_text {
                self.text_m.add();
                base.text_ids.ids.push(f.id.clone());
                base.text_id = Some(f.id.clone());
            }
            for sig in &f.signatures {
                self.byte_sigs.push(sig.clone());
                base.byte_ids.ids.push(f.id.clone());
            }
            for (kind, parts) in &f.containers {
                match kind {
                    ContainerKind::Zip => {
                        self.zip_sigs.push(parts.clone());
                        base.zip_ids.ids.push(f.id.clone());
                    }
                    ContainerKind::Ole2 => {
                        self.ole2_sigs.push(parts.clone());
                        base.ole2_ids.ids.push(f.id.clone());
                    }
                }
            }
        }

        base.byte_priorities = priorities_from_pairs(&spec.superiority, &base.byte_ids.ids);
        base.zip_priorities = priorities_from_pairs(&spec.superiority, &base.zip_ids.ids);
        base.ole2_priorities = priorities_from_pairs(&spec.superiority, &base.ole2_ids.ids);

        if spec.zip_default.is_some() && self.zip_default_ext.is_none() {
            self.zip_default_ext = Some("zip".into());
        }
        self.identifiers.push(base);
        self
    }

    pub fn build(self) -> Result<Engine, SignatureError> {
        let byte_m = if self.byte_sigs.is_empty() {
            None
        } else {
            Some(Arc::new(ByteMatcher::new(&self.byte_sigs, self.cfg)?))
        };
        let zip_m = if self.zip_sigs.is_empty() && self.zip_default_ext.is_none() {
            None
        } else {
            Some(Arc::new(ContainerMatcher::new(
                ContainerKind::Zip,
                &self.zip_sigs,
                self.zip_default_ext.clone(),
                self.cfg,
                self.buf_cfg,
            )?))
        };
        let ole2_m = if self.ole2_sigs.is_empty() {
            None
        } else {
            Some(Arc::new(ContainerMatcher::new(
                ContainerKind::Ole2,
                &self.ole2_sigs,
                None,
                self.cfg,
                self.buf_cfg,
            )?))
        };

        let mut byte_waits = WaitSet::new();
        let mut zip_waits = WaitSet::new();
        let mut ole2_waits = WaitSet::new();
        for base in &self.identifiers {
            byte_waits.add(
                base.byte_ids.start,
                base.byte_ids.ids.len(),
                base.byte_priorities.clone(),
            );
            zip_waits.add(
                base.zip_ids.start,
                base.zip_ids.ids.len(),
                base.zip_priorities.clone(),
            );
            ole2_waits.add(
                base.ole2_ids.start,
                base.ole2_ids.ids.len(),
                base.ole2_priorities.clone(),
            );
        }

        tracing::debug!(
            identifiers = self.identifiers.len(),
            byte_sigs = self.byte_sigs.len(),
            zip_sigs = self.zip_sigs.len(),
            ole2_sigs = self.ole2_sigs.len(),
            "engine built"
        );

        Ok(Engine {
            buf_cfg: self.buf_cfg,
            name_m: self.name_m,
            mime_m: self.mime_m,
            xml_m: self.xml_m,
            text_m: self.text_m,
            byte_m,
            zip_m,
            ole2_m,
            byte_waits,
            zip_waits,
            ole2_waits,
            identifiers: self.identifiers,
        })
    }
}

/// Survivor lists from (winner, loser) pairs over one authority's ids.
fn priorities_from_pairs(pairs: &[(String, String)], ids: &[String]) -> PriorityList {
    let survivors = ids
        .iter()
        .map(|winner| {
            ids.iter()
                .enumerate()
                .filter(|(_, loser)| {
                    !pairs.iter().any(|(w, l)| w == winner && l == *loser)
                })
                .map(|(j, _)| j)
                .collect()
        })
        .collect();
    PriorityList::new(survivors)
}

/// The compiled engine. Immutable; share it across threads freely.
pub struct Engine {
    buf_cfg: BufferConfig,
    name_m: NameMatcher,
    mime_m: MimeMatcher,
    xml_m: XmlMatcher,
    text_m: TextMatcher,
    byte_m: Option<Arc<ByteMatcher>>,
    zip_m: Option<Arc<ContainerMatcher>>,
    ole2_m: Option<Arc<ContainerMatcher>>,
    byte_waits: WaitSet,
    zip_waits: WaitSet,
    ole2_waits: WaitSet,
    identifiers: Vec<Base>,
}

impl Engine {
    pub fn builder(cfg: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(cfg)
    }

    /// The registered authorities, in registration order.
    pub fn identifiers(&self) -> impl Iterator<Item = &Base> {
        self.identifiers.iter()
    }

    /// Identify a byte stream of unknown length.
    pub fn identify_reader(
        &self,
        r: impl Read + Send + 'static,
        name: &str,
        declared_mime: &str,
    ) -> ScanOutcome {
        let quit = CancelToken::new();
        let buf = Buffer::from_reader(r, self.buf_cfg, Arc::clone(&quit));
        self.identify_buffer_inner(buf, quit, name, declared_mime)
    }

    /// Identify a file on disk. The filename feeds the name matcher.
    pub fn identify_file(&self, path: &Path, declared_mime: &str) -> ScanOutcome {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let quit = CancelToken::new();
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                return ScanOutcome { ids: Vec::new(), error: Some(ScanError::InputIo(e)) }
            }
        };
        let buf = match Buffer::from_file(file, self.buf_cfg, Arc::clone(&quit)) {
            Ok(b) => b,
            Err(e) => return ScanOutcome { ids: Vec::new(), error: Some(e) },
        };
        self.identify_buffer_inner(buf, quit, &name, declared_mime)
    }

    /// Identify in-memory bytes.
    pub fn identify_bytes(&self, data: Vec<u8>, name: &str, declared_mime: &str) -> ScanOutcome {
        let quit = CancelToken::new();
        let buf = Buffer::from_bytes(data, self.buf_cfg, Arc::clone(&quit));
        self.identify_buffer_inner(buf, quit, name, declared_mime)
    }

    /// Identify with an externally supplied cancel token.
    pub fn identify_with_token(
        &self,
        buf: Buffer,
        quit: Arc<CancelToken>,
        name: &str,
        declared_mime: &str,
    ) -> ScanOutcome {
        self.identify_buffer_inner(buf, quit, name, declared_mime)
    }

    fn identify_buffer_inner(
        &self,
        buf: Buffer,
        quit: Arc<CancelToken>,
        name: &str,
        declared_mime: &str,
    ) -> ScanOutcome {
        let mut recorders: Vec<Recorder<'_>> = self.identifiers.iter().map(Base::recorder).collect();
        let mut error: Option<ScanError> = None;

        // Name and declared-MIME: inline lookups.
        if !name.is_empty() {
            for r in &mut recorders {
                r.activate(MatcherKind::Name);
            }
            for idx in self.name_m.identify(name) {
                deliver(&mut recorders, MatcherKind::Name, Some(idx), "extension match");
            }
        }
        if !declared_mime.is_empty() {
            for r in &mut recorders {
                r.activate(MatcherKind::Mime);
            }
            for idx in self.mime_m.identify(declared_mime) {
                deliver(&mut recorders, MatcherKind::Mime, Some(idx), "MIME match");
            }
        }

        // Containers: each family's walk honors the wait-list protocol.
        for m in [self.zip_m.as_ref(), self.ole2_m.as_ref()].into_iter().flatten() {
            if all_satisfied(&mut recorders, MatcherKind::Container(m.kind())) {
                break;
            }
            let waits = match m.kind() {
                ContainerKind::Zip => self.zip_waits.clone(),
                ContainerKind::Ole2 => self.ole2_waits.clone(),
            };
            match self.run_container(m, waits, name, &buf, &mut recorders) {
                Ok(()) => {}
                Err(e) => {
                    error = error.or(Some(e));
                    break;
                }
            }
        }

        // XML root probe.
        if error.is_none() && !all_satisfied(&mut recorders, MatcherKind::Xml) {
            match self.xml_m.identify(&buf) {
                Ok(hits) => {
                    for idx in hits {
                        deliver(&mut recorders, MatcherKind::Xml, Some(idx), "xml match");
                    }
                }
                Err(e) => error = Some(e),
            }
        }

        // Byte scan.
        if error.is_none() && !all_satisfied(&mut recorders, MatcherKind::Byte) {
            if let Some(bm) = &self.byte_m {
                if let Err(e) = self.run_byte(bm, &buf, &mut recorders) {
                    error = Some(e);
                }
            }
        }

        // Text, last and only while something still cares.
        if error.is_none() && !all_satisfied(&mut recorders, MatcherKind::Text) {
            for r in &mut recorders {
                r.activate(MatcherKind::Text);
            }
            match self.text_m.identify(&buf) {
                Ok(hits) => {
                    for idx in hits {
                        deliver(&mut recorders, MatcherKind::Text, Some(idx), "text match");
                    }
                }
                Err(e) => error = Some(e),
            }
        }

        quit.cancel();

        let mut ids = Vec::new();
        for r in &mut recorders {
            ids.extend(r.report());
        }
        ScanOutcome { ids, error }
    }

    /// Drive one container scan to completion, replying with merged wait
    /// lists translated into the matcher's local index space.
    fn run_container(
        &self,
        m: &Arc<ContainerMatcher>,
        mut waits: WaitSet,
        name: &str,
        buf: &Buffer,
        recorders: &mut [Recorder<'_>],
    ) -> Result<(), ScanError> {
        let Some(scan) = m.identify(name, buf)? else {
            return Ok(());
        };
        let kind = MatcherKind::Container(m.kind());
        let mut error = None;
        while let Ok(res) = scan.results.recv() {
            match res {
                Ok(r) => {
                    deliver(recorders, kind, r.index, &r.basis);
                    if let Some(i) = r.index {
                        waits.put(i);
                    }
                    let reply = if all_satisfied(recorders, kind) {
                        Vec::new()
                    } else {
                        waits.filter().unwrap_or_else(|| (0..m.len()).collect())
                    };
                    if scan.waits.send(reply).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error = Some(e);
                    // Keep draining so the walker thread can finish.
                }
            }
        }
        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drive the byte scan to completion.
    fn run_byte(
        &self,
        bm: &Arc<ByteMatcher>,
        buf: &Buffer,
        recorders: &mut [Recorder<'_>],
    ) -> Result<(), ScanError> {
        let mut waits = self.byte_waits.clone();
        let scan = bm.identify(buf);
        let mut error = None;
        while let Ok(res) = scan.results.recv() {
            match res {
                Ok(r) => {
                    deliver(recorders, MatcherKind::Byte, Some(r.index), &r.basis);
                    waits.put(r.index);
                    let reply = if all_satisfied(recorders, MatcherKind::Byte) {
                        Vec::new()
                    } else {
                        waits.filter().unwrap_or_else(|| (0..bm.len()).collect())
                    };
                    if scan.waits.send(reply).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error = Some(e);
                }
            }
        }
        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn deliver(recorders: &mut [Recorder<'_>], kind: MatcherKind, index: Option<usize>, basis: &str) {
    for r in recorders {
        r.record(kind, index, basis);
    }
}

/// Ask every recorder whether `kind` can still matter; all-satisfied
/// means the matcher is skipped (or stopped).
fn all_satisfied(recorders: &mut [Recorder<'_>], kind: MatcherKind) -> bool {
    let mut all = true;
    for r in recorders {
        if !r.satisfied(kind).0 {
            all = false;
        }
    }
    all
}
