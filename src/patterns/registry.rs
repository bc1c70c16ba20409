//! Explicit tag-to-loader table for persisted patterns.
//!
//! # Design Notes
//! - The registry is passed to the codec by the caller; custom catalogs can
//!   extend the table with their own tags (11-15 are free) without any
//!   process-global state.

use crate::persist::Loader;

use super::{
    BmhSequence, Pattern, Range, Sequence, TAG_ANY_MASK, TAG_BMH, TAG_CHOICE, TAG_LIST, TAG_MASK,
    TAG_NOT, TAG_RANGE, TAG_RBMH, TAG_SEQUENCE,
};

/// Loads one pattern body (the tag byte has already been consumed).
pub type LoadFn = fn(&mut Loader<'_>, &PatternRegistry) -> Option<Pattern>;

/// Tag table; 16 slots, 0-7 core, 8-10 catalog extensions.
pub struct PatternRegistry {
    loaders: [Option<LoadFn>; 16],
}

impl PatternRegistry {
    /// An empty table. Useful only for custom pattern sets.
    pub fn empty() -> Self {
        Self { loaders: [None; 16] }
    }

    /// The standard table covering every built-in pattern variant.
    pub fn core() -> Self {
        let mut reg = Self::empty();
        reg.register(TAG_SEQUENCE, |l, _| {
            Some(Pattern::Sequence(Sequence(l.load_bytes())))
        });
        reg.register(TAG_CHOICE, |l, reg| {
            let n = l.load_small_int();
            let mut arms = Vec::with_capacity(n);
            for _ in 0..n {
                arms.push(reg.load(l)?);
            }
            Some(Pattern::Choice(arms))
        });
        reg.register(TAG_LIST, |l, reg| {
            let n = l.load_small_int();
            let mut items = Vec::with_capacity(n);
            for _ in 0..n {
                items.push(reg.load(l)?);
            }
            Some(Pattern::List(items))
        });
        reg.register(TAG_NOT, |l, reg| Some(Pattern::not(reg.load(l)?)));
        reg.register(TAG_BMH, |l, _| {
            Some(Pattern::Bmh(BmhSequence::new(l.load_bytes(), false)))
        });
        reg.register(TAG_RBMH, |l, _| {
            Some(Pattern::Bmh(BmhSequence::new(l.load_bytes(), true)))
        });
        reg.register(TAG_RANGE, |l, _| {
            let from = l.load_bytes();
            let to = l.load_bytes();
            if from.len() != to.len() {
                return None;
            }
            Some(Pattern::Range(Range { from, to }))
        });
        reg.register(TAG_MASK, |l, _| Some(Pattern::Mask(l.load_byte())));
        reg.register(TAG_ANY_MASK, |l, _| Some(Pattern::AnyMask(l.load_byte())));
        reg
    }

    /// Install a loader for `tag`, replacing any existing one.
    pub fn register(&mut self, tag: u8, f: LoadFn) {
        self.loaders[tag as usize & 0x0f] = Some(f);
    }

    /// Load one tagged pattern. `None` marks the loader failed.
    pub fn load(&self, l: &mut Loader<'_>) -> Option<Pattern> {
        let tag = l.load_byte();
        if l.failed() {
            return None;
        }
        match self.loaders.get(tag as usize).copied().flatten() {
            Some(f) => {
                let out = f(l, self);
                if out.is_none() {
                    l.fail_tag(tag);
                }
                out
            }
            None => {
                l.fail_tag(tag);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::Saver;

    #[test]
    fn custom_tag_extends_core() {
        let mut reg = PatternRegistry::core();
        // A hypothetical "always the zero byte" pattern persisted as tag 12.
        reg.register(12, |_, _| Some(Pattern::sequence(vec![0u8])));

        let mut s = Saver::new();
        s.save_byte(12);
        let bytes = s.into_bytes();
        let mut l = Loader::new(&bytes).unwrap();
        let p = reg.load(&mut l).unwrap();
        assert!(p.equals(&Pattern::sequence(vec![0u8])));
    }
}
