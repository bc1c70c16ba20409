//! Declared-MIME matching: exact lookup over types and aliases.

use std::collections::HashMap;

/// MIME table mapping normalized types to signature indices.
#[derive(Clone, Debug, Default)]
pub struct MimeMatcher {
    types: HashMap<String, Vec<usize>>,
    count: usize,
}

impl MimeMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a MIME type and aliases for the next signature index.
    pub fn add(&mut self, mime: &str, aliases: &[String]) -> usize {
        let idx = self.count;
        self.count += 1;
        for m in std::iter::once(mime).chain(aliases.iter().map(String::as_str)) {
            let key = normalize(m);
            if !key.is_empty() {
                let slot = self.types.entry(key).or_default();
                if !slot.contains(&idx) {
                    slot.push(idx);
                }
            }
        }
        idx
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The registered types for a signature index.
    pub fn types_of(&self, idx: usize) -> Vec<&str> {
        self.types
            .iter()
            .filter(|(_, v)| v.contains(&idx))
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Indices matching a declared MIME type exactly (parameters ignored).
    pub fn identify(&self, declared: &str) -> Vec<usize> {
        let key = normalize(declared);
        match self.types.get(&key) {
            Some(v) => v.clone(),
            None => Vec::new(),
        }
    }
}

/// Lowercase, strip parameters, and fold the experimental `x-` subtype
/// prefix so `application/x-pdf` and `application/pdf` meet.
fn normalize(mime: &str) -> String {
    let mime = mime.split(';').next().unwrap_or(mime).trim();
    let lower = mime.to_ascii_lowercase();
    match lower.split_once('/') {
        Some((major, minor)) => {
            let minor = minor.strip_prefix("x-").unwrap_or(minor);
            format!("{major}/{minor}")
        }
        None => lower,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_alias_lookup() {
        let mut m = MimeMatcher::new();
        let pdf = m.add("application/pdf", &["application/x-pdf".into()]);
        assert_eq!(m.identify("application/pdf"), vec![pdf]);
        assert_eq!(m.identify("application/x-pdf"), vec![pdf]);
        assert_eq!(m.identify("Application/PDF; charset=binary"), vec![pdf]);
        assert_eq!(m.identify("text/plain"), Vec::<usize>::new());
    }
}
