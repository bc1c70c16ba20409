//! Filename extension matching.
//!
//! # Invariants
//! - Matching is ASCII-case-insensitive and suffix-based.
//! - Registered globs are of the `*.ext` form only; anything fancier is
//!   rejected at registration.

use std::collections::HashMap;

/// Extension table mapping lowercased extensions to signature indices.
#[derive(Clone, Debug, Default)]
pub struct NameMatcher {
    exts: HashMap<String, Vec<usize>>,
    count: usize,
}

impl NameMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an extension (with or without a leading `*.`) for the next
    /// signature index, which is returned.
    pub fn add(&mut self, ext: &str) -> usize {
        let idx = self.count;
        self.count += 1;
        let ext = normalize(ext);
        if !ext.is_empty() {
            self.exts.entry(ext).or_default().push(idx);
        }
        idx
    }

    /// Number of registered signatures.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The registered extension(s) for a signature index.
    pub fn extensions_of(&self, idx: usize) -> Vec<&str> {
        self.exts
            .iter()
            .filter(|(_, v)| v.contains(&idx))
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Indices whose extension matches the filename.
    pub fn identify(&self, name: &str) -> Vec<usize> {
        let Some((_, ext)) = name.rsplit_once('.') else {
            return Vec::new();
        };
        match self.exts.get(&ext.to_ascii_lowercase()) {
            Some(v) => v.clone(),
            None => Vec::new(),
        }
    }
}

fn normalize(ext: &str) -> String {
    let ext = ext.strip_prefix("*.").unwrap_or(ext);
    let ext = ext.strip_prefix('.').unwrap_or(ext);
    ext.to_ascii_lowercase()
}
