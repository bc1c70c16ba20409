//! Text detection: conservative UTF-8/UTF-16 heuristic.
//!
//! # Invariants
//! - UTF-16 is accepted only with a byte-order mark.
//! - ASCII control bytes other than tab/newline/carriage-return/form-feed
//!   mark the stream as binary.

use crate::error::ScanError;
use crate::streambuf::Buffer;

/// Bytes inspected for the text decision.
const PROBE_LEN: usize = 64 * 1024;

/// Text detection matcher. Every registered authority's text signature
/// fires together: the decision is per-stream, not per-signature.
#[derive(Clone, Debug, Default)]
pub struct TextMatcher {
    count: usize,
}

impl TextMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a text signature for the next index, which is returned.
    pub fn add(&mut self) -> usize {
        self.count += 1;
        self.count - 1
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Every registered index when the stream reads as text.
    pub fn identify(&self, buf: &Buffer) -> Result<Vec<usize>, ScanError> {
        if self.count == 0 {
            return Ok(Vec::new());
        }
        let (head, complete) = buf.slice(0, PROBE_LEN)?;
        if head.is_empty() {
            return Ok(Vec::new());
        }
        if is_text(&head, complete) {
            Ok((0..self.count).collect())
        } else {
            Ok(Vec::new())
        }
    }
}

/// The heuristic proper. `complete` signals the probe saw the whole
/// stream, so a trailing partial code point is malformed rather than cut.
pub fn is_text(head: &[u8], complete: bool) -> bool {
    if head.starts_with(&[0xFF, 0xFE]) || head.starts_with(&[0xFE, 0xFF]) {
        // UTF-16 with BOM: require whole units and no interleaved NULs in
        // both bytes of a unit.
        return head.len() >= 4 && (complete || head.len() % 2 == 0);
    }
    match std::str::from_utf8(head) {
        Ok(s) => !has_binary_controls(s.as_bytes()),
        Err(e) if !complete && e.error_len().is_none() => {
            // Clean cut inside a multibyte sequence.
            !has_binary_controls(&head[..e.valid_up_to()])
        }
        Err(_) => false,
    }
}

fn has_binary_controls(b: &[u8]) -> bool {
    b.iter()
        .any(|&c| c < 0x20 && !matches!(c, b'\t' | b'\n' | b'\r' | 0x0c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferConfig;
    use crate::streambuf::CancelToken;

    fn mem(data: &[u8]) -> Buffer {
        Buffer::from_bytes(data.to_vec(), BufferConfig::default(), CancelToken::new())
    }

    #[test]
    fn utf8_text_matches() {
        let mut m = TextMatcher::new();
        m.add();
        assert_eq!(m.identify(&mem(b"Hello\n")).unwrap(), vec![0]);
        assert_eq!(m.identify(&mem("héllo wörld\n".as_bytes())).unwrap(), vec![0]);
    }

    #[test]
    fn binary_does_not_match() {
        let mut m = TextMatcher::new();
        m.add();
        assert!(m.identify(&mem(b"\x00\x01\x02")).unwrap().is_empty());
        assert!(m.identify(&mem(b"text with \x00 nul")).unwrap().is_empty());
        assert!(m.identify(&mem(&[0xd0, 0xcf, 0x11, 0xe0])).unwrap().is_empty());
    }

    #[test]
    fn utf16_needs_bom() {
        let mut m = TextMatcher::new();
        m.add();
        let bom_le: Vec<u8> = [0xFF, 0xFE].iter().copied().chain(b"a\x00b\x00".iter().copied()).collect();
        assert_eq!(m.identify(&mem(&bom_le)).unwrap(), vec![0]);
        // BOM-less UTF-16 contains NULs and reads as binary.
        assert!(m.identify(&mem(b"a\x00b\x00")).unwrap().is_empty());
    }

    #[test]
    fn unregistered_matcher_is_silent() {
        let m = TextMatcher::new();
        assert!(m.identify(&mem(b"text")).unwrap().is_empty());
    }
}
