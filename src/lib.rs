//! Byte-signature format identification engine.
//!
//! Identifies the format of arbitrary byte streams by matching them
//! against signature catalogs from multiple authorities (PRONOM,
//! MIME-info databases, the Library of Congress format set). Matching is
//! streaming: signatures compile into Aho-Corasick automata scanned
//! concurrently from both ends of the input, with per-signature context
//! verification, container (ZIP/OLE2) entry inspection, and weaker
//! evidence (extension, declared MIME, XML root, UTF text) folded into a
//! ranked confidence score per candidate.
//!
//! High-level flow (single input):
//! 1) Filename and declared-MIME lookups.
//! 2) Container trigger + entry walk when the head bytes say ZIP/OLE2.
//! 3) XML root probe.
//! 4) Concurrent byte scan (BOF and EOF automata + scorer).
//! 5) Text probe, only while no conclusive evidence exists.
//! 6) Per-authority recorders rank and report, with warnings for
//!    extension/MIME mismatches and low-confidence matches.
//!
//! ```
//! use telltale::{
//!     Anchor, AuthoritySpec, Engine, EngineConfig, FormatDecl, Frame, Pattern, Signature,
//! };
//!
//! let pdf = FormatDecl {
//!     id: "fmt/14".into(),
//!     name: "Acrobat PDF".into(),
//!     mime: "application/pdf".into(),
//!     extensions: vec!["pdf".into()],
//!     signatures: vec![Signature::new(vec![
//!         Frame::fixed(Anchor::Bof, 0, Pattern::sequence(b"%PDF-".to_vec())),
//!         Frame::window(Anchor::Eof, 0, 1024, Pattern::sequence(b"%%EOF".to_vec())),
//!     ])],
//!     ..FormatDecl::default()
//! };
//! let engine = Engine::builder(EngineConfig::default())
//!     .add_authority(AuthoritySpec {
//!         namespace: "pronom".into(),
//!         formats: vec![pdf],
//!         ..AuthoritySpec::default()
//!     })
//!     .build()
//!     .unwrap();
//!
//! let outcome = engine.identify_bytes(b"%PDF-1.4 ... %%EOF".to_vec(), "a.pdf", "");
//! assert_eq!(outcome.ids[0].id, "fmt/14");
//! ```

pub mod bytematcher;
pub mod config;
pub mod container;
pub mod error;
pub mod frames;
pub mod identifier;
pub mod matchers;
pub mod patterns;
pub mod persist;
pub mod priority;
pub mod scan;
pub mod signature;
pub mod streambuf;

pub use bytematcher::{ByteMatcher, ByteResult, KeyFrameId, Strike};
pub use config::{BufferConfig, EngineConfig};
pub use container::{ContainerKind, ContainerMatcher, Part};
pub use error::{CodecError, ScanError, SignatureError};
pub use frames::{Anchor, Frame};
pub use identifier::{ContainerFamily, FormatInfo, Identification, MatcherKind, UNKNOWN_ID};
pub use patterns::{Pattern, PatternRegistry, Sequence};
pub use persist::{Loader, Saver};
pub use scan::{AuthoritySpec, Engine, EngineBuilder, FormatDecl, ScanOutcome};
pub use signature::Signature;
pub use streambuf::{Buffer, CancelToken};
