//! Root-element XML matching.
//!
//! A bounded scan finds the first element of the stream (skipping the BOM,
//! the XML declaration, comments, processing instructions and a doctype)
//! and extracts its local name and namespace URI. No general XML parsing
//! happens here; the probe reads one tag.
//!
//! # Invariants
//! - The probe inspects at most `PROBE_LEN` bytes.
//! - An empty namespace in the table matches any document namespace.

use crate::error::ScanError;
use crate::streambuf::Buffer;

/// Bytes inspected for the root element.
const PROBE_LEN: usize = 8 * 1024;

/// A registered root-element test: local name plus namespace URI (empty =
/// any namespace).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XmlRoot {
    pub local: String,
    pub ns: String,
}

/// Table of (local, ns) pairs per signature index.
#[derive(Clone, Debug, Default)]
pub struct XmlMatcher {
    roots: Vec<XmlRoot>,
}

impl XmlMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a root test for the next signature index, which is
    /// returned.
    pub fn add(&mut self, local: &str, ns: &str) -> usize {
        self.roots.push(XmlRoot { local: local.into(), ns: ns.into() });
        self.roots.len() - 1
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Indices whose registered root matches the stream's first element.
    pub fn identify(&self, buf: &Buffer) -> Result<Vec<usize>, ScanError> {
        if self.roots.is_empty() {
            return Ok(Vec::new());
        }
        let (head, _) = buf.slice(0, PROBE_LEN)?;
        let Some((local, ns)) = root_element(&head) else {
            return Ok(Vec::new());
        };
        Ok(self
            .roots
            .iter()
            .enumerate()
            .filter(|(_, r)| r.local == local && (r.ns.is_empty() || r.ns == ns))
            .map(|(i, _)| i)
            .collect())
    }
}

/// Find the first element's (local name, namespace URI).
pub fn root_element(head: &[u8]) -> Option<(String, String)> {
    let text = strip_bom(head);
    let mut pos = 0usize;
    loop {
        pos = skip_whitespace(text, pos);
        if pos >= text.len() || text[pos] != b'<' {
            return None;
        }
        match text.get(pos + 1)? {
            b'?' => pos = skip_until(text, pos, b"?>")?,
            b'!' => {
                if text[pos + 1..].starts_with(b"!--") {
                    pos = skip_until(text, pos, b"-->")?;
                } else {
                    // DOCTYPE: skip to the closing '>' (internal subsets
                    // with nested brackets end the probe instead).
                    pos = skip_until(text, pos, b">")?;
                }
            }
            _ => return parse_start_tag(&text[pos..]),
        }
    }
}

fn strip_bom(b: &[u8]) -> &[u8] {
    b.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(b)
}

fn skip_whitespace(b: &[u8], mut pos: usize) -> usize {
    while pos < b.len() && b[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

fn skip_until(b: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    memchr::memmem::find(&b[from..], needle).map(|i| from + i + needle.len())
}

/// Parse one start tag: name, then attributes for namespace bindings.
fn parse_start_tag(tag: &[u8]) -> Option<(String, String)> {
    let end = memchr::memchr(b'>', tag)?;
    let inner = &tag[1..end];
    let inner = inner.strip_suffix(b"/").unwrap_or(inner);

    let mut fields = split_tag(inner);
    let qname = fields.next()?;
    let (prefix, local) = match qname.split_once(':') {
        Some((p, l)) => (Some(p), l),
        None => (None, qname),
    };

    // Resolve the element's namespace from xmlns declarations on the tag
    // itself. Outer-scope bindings don't exist for a root element.
    let mut default_ns = String::new();
    let mut prefixed_ns = String::new();
    for field in fields {
        let Some((key, val)) = field.split_once('=') else {
            continue;
        };
        let val = val.trim_matches(|c| c == '"' || c == '\'');
        if key == "xmlns" {
            default_ns = val.to_string();
        } else if let Some(p) = key.strip_prefix("xmlns:") {
            if Some(p) == prefix {
                prefixed_ns = val.to_string();
            }
        }
    }
    let ns = if prefix.is_some() { prefixed_ns } else { default_ns };
    Some((local.to_string(), ns))
}

/// Split tag innards into the name and `key="value"` fields, respecting
/// quotes.
fn split_tag(inner: &[u8]) -> impl Iterator<Item = &str> {
    let mut fields = Vec::new();
    let mut start = 0usize;
    let mut quote: Option<u8> = None;
    for (i, &c) in inner.iter().enumerate() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == b'"' || c == b'\'' => quote = Some(c),
            None if c.is_ascii_whitespace() => {
                if i > start {
                    fields.push(&inner[start..i]);
                }
                start = i + 1;
            }
            None => {}
        }
    }
    if inner.len() > start {
        fields.push(&inner[start..]);
    }
    fields.into_iter().filter_map(|f| std::str::from_utf8(f).ok())
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
    fn finds_plain_root() {
        let (local, ns) = root_element(b"<svg width=\"5\">").unwrap();
        assert_eq!(local, "svg");
        assert_eq!(ns, "");
    }

    #[test]
    fn skips_decl_comment_and_doctype() {
        let doc = b"\xEF\xBB\xBF<?xml version=\"1.0\"?>\n<!-- c -->\n<!DOCTYPE svg>\n<svg xmlns=\"http://www.w3.org/2000/svg\"/>";
        let (local, ns) = root_element(doc).unwrap();
        assert_eq!(local, "svg");
        assert_eq!(ns, "http://www.w3.org/2000/svg");
    }

    #[test]
    fn prefixed_root_resolves_its_binding() {
        let doc = b"<x:report xmlns:x='urn:example:report' xmlns='urn:other'>";
        let (local, ns) = root_element(doc).unwrap();
        assert_eq!(local, "report");
        assert_eq!(ns, "urn:example:report");
    }

    #[test]
    fn matcher_filters_on_local_and_ns() {
        let mut m = XmlMatcher::new();
        let svg_any = m.add("svg", "");
        let svg_ns = m.add("svg", "http://www.w3.org/2000/svg");
        let _html = m.add("html", "");

        let buf = mem(b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>");
        assert_eq!(m.identify(&buf).unwrap(), vec![svg_any, svg_ns]);

        let other = mem(b"<svg xmlns=\"urn:not-svg\"/>");
        assert_eq!(m.identify(&other).unwrap(), vec![svg_any]);

        let not_xml = mem(b"just text");
        assert!(m.identify(&not_xml).unwrap().is_empty());
    }
}
