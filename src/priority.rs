//! Priority lists and wait sets.
//!
//! A priority list maps each signature to the set of signatures still
//! worth reporting after it matches (its "survivors"). The scanner keeps a
//! wait list: the sorted indices it still wants results for. An empty wait
//! list means "stop".
//!
//! # Invariants
//! - Wait lists are sorted ascending and deduplicated; membership checks
//!   are binary searches.
//! - `None` means "no priorities": everything is wanted, forever.

/// Per-signature survivor sets. Empty survivor set = nothing outranks what
/// remains, the scan can stop once that signature matches.
#[derive(Clone, Debug, Default)]
pub struct PriorityList {
    survivors: Vec<Vec<usize>>,
}

impl PriorityList {
    pub fn new(survivors: Vec<Vec<usize>>) -> Self {
        let mut survivors = survivors;
        for s in &mut survivors {
            s.sort_unstable();
            s.dedup();
        }
        Self { survivors }
    }

    /// A list with no ordering at all: every match keeps everything alive.
    pub fn none(len: usize) -> Self {
        Self { survivors: vec![(0..len).collect(); len] }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.survivors.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.survivors.is_empty()
    }

    /// Survivors of a match on `idx`.
    pub fn survivors(&self, idx: usize) -> &[usize] {
        self.survivors.get(idx).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Shift every index by `start` (used when an authority's signatures
    /// are appended to a shared matcher).
    pub fn offset(&self, start: usize) -> PriorityList {
        Self {
            survivors: self
                .survivors
                .iter()
                .map(|s| s.iter().map(|&i| i + start).collect())
                .collect(),
        }
    }
}

/// The scanner-side filter: which indices are still wanted.
#[derive(Clone, Debug, Default)]
pub struct WaitList {
    /// `None` = everything wanted.
    want: Option<Vec<usize>>,
}

impl WaitList {
    pub fn everything() -> Self {
        Self { want: None }
    }

    /// Replace the list. The input must be sorted ascending.
    pub fn set(&mut self, want: Vec<usize>) {
        debug_assert!(want.windows(2).all(|w| w[0] < w[1]), "wait list must be sorted");
        self.want = Some(want);
    }

    /// True when nothing more is wanted.
    pub fn exhausted(&self) -> bool {
        matches!(&self.want, Some(w) if w.is_empty())
    }

    /// Is `idx` still wanted?
    pub fn check(&self, idx: usize) -> bool {
        match &self.want {
            None => true,
            Some(w) => w.binary_search(&idx).is_ok(),
        }
    }

    /// Current list, `None` meaning everything.
    pub fn current(&self) -> Option<&[usize]> {
        self.want.as_deref()
    }
}

/// Tracks what each identifier still wants and merges the result into one
/// wait list for a shared matcher.
#[derive(Clone, Debug)]
pub struct WaitSet {
    /// Per-identifier (start offset, signature count, priority list).
    ranges: Vec<(usize, usize, PriorityList)>,
    /// Per-identifier remaining wants; `None` = everything in range.
    wants: Vec<Option<Vec<usize>>>,
}

impl WaitSet {
    pub fn new() -> Self {
        Self { ranges: Vec::new(), wants: Vec::new() }
    }

    /// Register an identifier's slice of the shared index space. An empty
    /// slice wants nothing from the start.
    pub fn add(&mut self, start: usize, count: usize, priorities: PriorityList) {
        self.ranges.push((start, count, priorities));
        self.wants.push((count == 0).then(Vec::new));
    }

    /// Record a match on the shared index `idx`; narrows the owner's wants
    /// to the survivors of that signature.
    pub fn put(&mut self, idx: usize) {
        for (k, (start, count, prio)) in self.ranges.iter().enumerate() {
            if idx >= *start && idx < start + count {
                let survivors: Vec<usize> =
                    prio.survivors(idx - start).iter().map(|&i| i + start).collect();
                match &mut self.wants[k] {
                    // First match narrows from "everything" to the survivors.
                    w @ None => *w = Some(survivors),
                    // Later matches intersect.
                    Some(cur) => cur.retain(|i| survivors.binary_search(i).is_ok()),
                }
                return;
            }
        }
        debug_assert!(false, "index {idx} outside every identifier range");
    }

    /// Mark an identifier's whole range as no longer wanted (it reported a
    /// conclusive match through some other matcher).
    pub fn drop_range(&mut self, start: usize) {
        for (k, (s, _, _)) in self.ranges.iter().enumerate() {
            if *s == start {
                self.wants[k] = Some(Vec::new());
                return;
            }
        }
    }

    /// The merged wait list across identifiers, `None` when some
    /// identifier still wants everything.
    pub fn filter(&self) -> Option<Vec<usize>> {
        let mut merged = Vec::new();
        for w in &self.wants {
            match w {
                None => return None,
                Some(list) => merged.extend_from_slice(list),
            }
        }
        merged.sort_unstable();
        merged.dedup();
        Some(merged)
    }
}

impl Default for WaitSet {
    fn default() -> Self {
        Self::new()
    }
}
