//! Error types for engine build, persistence and scanning.
//!
//! Errors are stage-specific to keep diagnostics precise. All enums are
//! `#[non_exhaustive]` so variants can be added without breaking callers.
//!
//! # Design Notes
//! - I/O errors preserve their source to keep diagnostics actionable.
//! - Cancellation is a distinct kind: callers routinely treat it as a
//!   non-error (the scan was asked to stop) while real read failures are
//!   surfaced.

use std::fmt;
use std::io;

/// Errors raised while building an engine from signatures.
///
/// These occur before any scanning begins; a signature that cannot be
/// compiled is rejected outright rather than silently skipped.
#[derive(Debug)]
#[non_exhaustive]
pub enum SignatureError {
    /// A signature contained no frames.
    EmptySignature { sig: usize },
    /// A segment has no viable key frame and its window is unbounded, so it
    /// cannot be searched without scanning the whole stream.
    UnboundedWildcard { sig: usize, segment: usize },
    /// Frame offsets are inverted (max < min).
    InvertedWindow { sig: usize, frame: usize },
    /// Anchors regress within a signature (a BOF/PREV frame after SUCC/EOF).
    AnchorRegression { sig: usize, frame: usize },
    /// The search automaton could not be built from the unrolled sequences.
    Automaton { detail: String },
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptySignature { sig } => write!(f, "signature {sig}: no frames"),
            Self::UnboundedWildcard { sig, segment } => write!(
                f,
                "signature {sig}: segment {segment} has no key frame and an unbounded window"
            ),
            Self::InvertedWindow { sig, frame } => {
                write!(f, "signature {sig}: frame {frame} has max offset < min offset")
            }
            Self::AnchorRegression { sig, frame } => write!(
                f,
                "signature {sig}: frame {frame} reverts to a forward anchor after a reverse one"
            ),
            Self::Automaton { detail } => write!(f, "automaton build failed: {detail}"),
        }
    }
}

impl std::error::Error for SignatureError {}

/// Errors raised while loading or saving persisted patterns and signatures.
#[derive(Debug)]
#[non_exhaustive]
pub enum CodecError {
    /// Persisted stream was written by an incompatible version.
    VersionMismatch { got: (u8, u8), want: (u8, u8) },
    /// A pattern tag byte has no registered loader.
    UnknownPatternTag { tag: u8 },
    /// The stream ended mid-value or a length prefix overran the input.
    Truncated,
    /// A string value was not valid UTF-8.
    InvalidString,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VersionMismatch { got, want } => write!(
                f,
                "persisted format version {}.{} is incompatible with {}.{}",
                got.0, got.1, want.0, want.1
            ),
            Self::UnknownPatternTag { tag } => write!(f, "no loader registered for pattern tag {tag}"),
            Self::Truncated => write!(f, "persisted stream truncated"),
            Self::InvalidString => write!(f, "persisted string is not valid UTF-8"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Errors surfaced by a scan.
///
/// A scan that fails part-way still reports the identifications gathered
/// before the failure; the error travels alongside them.
#[derive(Debug)]
#[non_exhaustive]
pub enum ScanError {
    /// Unrecoverable read failure from the underlying source.
    InputIo(io::Error),
    /// The scan was cancelled through the quit token.
    Cancelled,
}

impl ScanError {
    /// True when the error is a cancellation rather than a real failure.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InputIo(err) => write!(f, "input read failed: {err}"),
            Self::Cancelled => write!(f, "scan cancelled"),
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InputIo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ScanError {
    fn from(err: io::Error) -> Self {
        Self::InputIo(err)
    }
}
