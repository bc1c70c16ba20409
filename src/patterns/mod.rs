//! Byte-pattern primitives.
//!
//! Patterns are the smallest building blocks of a format signature: exact
//! sequences, ranges, bit masks, choices between alternatives, and ordered
//! lists. Every pattern answers the same seven questions (forward test,
//! reverse test, equality, length bounds, unroll count, unrolled sequences,
//! persistence) so the matcher can treat them uniformly.
//!
//! # Invariants
//! - `test`/`test_r` return the matched length on success and a skip
//!   distance (>= 1) on failure, or 0 when the buffer is too short to
//!   decide. Callers step by the returned distance in either case.
//! - `num_sequences() == 0` means "do not unroll": the pattern either has
//!   no finite sequence expansion or an unreasonably large one.
//!
//! # Design Notes
//! - Long exact sequences use a precomputed `memmem::Finder` so window
//!   searches skip by more than one byte; behavior is identical to the
//!   plain sequence, only the failure skip differs.

use std::fmt;

use memchr::memmem;

use crate::persist::{Loader, Saver};

mod registry;

pub use registry::PatternRegistry;

/// Persist tags for the core pattern variants. Tags 0-7 are reserved for
/// the core set; 8-10 carry the catalog extensions (range and masks).
pub(crate) const TAG_SEQUENCE: u8 = 0;
pub(crate) const TAG_CHOICE: u8 = 1;
pub(crate) const TAG_LIST: u8 = 2;
pub(crate) const TAG_NOT: u8 = 3;
pub(crate) const TAG_BMH: u8 = 4;
pub(crate) const TAG_RBMH: u8 = 5;
pub(crate) const TAG_RANGE: u8 = 8;
pub(crate) const TAG_MASK: u8 = 9;
pub(crate) const TAG_ANY_MASK: u8 = 10;

/// Render bytes for basis strings and diagnostics: printable ASCII is
/// quoted, anything else is hex.
pub fn stringify(b: &[u8]) -> String {
    if !b.is_empty() && b.iter().all(|&c| (0x20..0x7f).contains(&c)) {
        let s: String = b.iter().map(|&c| c as char).collect();
        format!("'{s}'")
    } else {
        b.iter().map(|c| format!("{c:02x}")).collect()
    }
}

/// An exact byte sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sequence(pub Vec<u8>);

impl Sequence {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Byte-reversed copy, used to build the EOF automaton set.
    pub fn reversed(&self) -> Sequence {
        let mut v = self.0.clone();
        v.reverse();
        Sequence(v)
    }

    fn test(&self, b: &[u8]) -> (bool, usize) {
        if b.len() < self.0.len() {
            return (false, 0);
        }
        if b[..self.0.len()] == self.0[..] {
            (true, self.0.len())
        } else {
            (false, 1)
        }
    }

    fn test_r(&self, b: &[u8]) -> (bool, usize) {
        if b.len() < self.0.len() {
            return (false, 0);
        }
        if b[b.len() - self.0.len()..] == self.0[..] {
            (true, self.0.len())
        } else {
            (false, 1)
        }
    }
}

/// A sequence with a precomputed substring finder for larger failure skips.
///
/// `reverse` selects which direction the finder accelerates: a reverse
/// instance is built for testing right-to-left (left-context frames).
#[derive(Clone, Debug)]
pub struct BmhSequence {
    seq: Vec<u8>,
    finder: memmem::Finder<'static>,
    reverse: bool,
}

impl BmhSequence {
    pub fn new(bytes: impl Into<Vec<u8>>, reverse: bool) -> Self {
        let seq: Vec<u8> = bytes.into();
        let finder = memmem::Finder::new(&seq).into_owned();
        Self { seq, finder, reverse }
    }

    #[inline]
    pub fn sequence(&self) -> &[u8] {
        &self.seq
    }

    #[inline]
    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    fn test(&self, b: &[u8]) -> (bool, usize) {
        let n = self.seq.len();
        if b.len() < n {
            return (false, 0);
        }
        if b[..n] == self.seq[..] {
            return (true, n);
        }
        // Skip to the next occurrence anywhere in the window; when there is
        // none, step past every position that could still start a match.
        match self.finder.find(b) {
            Some(pos) => (false, pos.max(1)),
            None => (false, (b.len() - n + 1).max(1)),
        }
    }

    fn test_r(&self, b: &[u8]) -> (bool, usize) {
        let n = self.seq.len();
        if b.len() < n {
            return (false, 0);
        }
        if b[b.len() - n..] == self.seq[..] {
            return (true, n);
        }
        match memmem::rfind(b, &self.seq) {
            Some(pos) => (false, (b.len() - (pos + n)).max(1)),
            None => (false, (b.len() - n + 1).max(1)),
        }
    }
}

impl PartialEq for BmhSequence {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq && self.reverse == other.reverse
    }
}

impl Eq for BmhSequence {}

/// A byte-string range: `from <= b <= to`, compared lexicographically over
/// equal lengths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Range {
    pub from: Vec<u8>,
    pub to: Vec<u8>,
}

impl Range {
    pub fn new(from: impl Into<Vec<u8>>, to: impl Into<Vec<u8>>) -> Self {
        let from = from.into();
        let to = to.into();
        debug_assert_eq!(from.len(), to.len(), "range endpoints must be equal length");
        Self { from, to }
    }

    fn test(&self, b: &[u8]) -> (bool, usize) {
        let n = self.from.len();
        if b.len() < n {
            return (false, 0);
        }
        let w = &b[..n];
        if self.from[..] <= *w && *w <= self.to[..] {
            (true, n)
        } else {
            (false, 1)
        }
    }

    fn test_r(&self, b: &[u8]) -> (bool, usize) {
        let n = self.from.len();
        if b.len() < n {
            return (false, 0);
        }
        let w = &b[b.len() - n..];
        if self.from[..] <= *w && *w <= self.to[..] {
            (true, n)
        } else {
            (false, 1)
        }
    }

    fn num_sequences(&self) -> usize {
        if self.to < self.from {
            return 0;
        }
        match self.from.len() {
            1 => self.to[0] as usize - self.from[0] as usize + 1,
            2 => {
                if self.to[0] - self.from[0] > 1 {
                    return 0;
                }
                (256 * (self.to[0] - self.from[0]) as usize + self.to[1] as usize + 1)
                    .saturating_sub(self.from[1] as usize)
            }
            _ => 0,
        }
    }

    fn sequences(&self) -> Vec<Sequence> {
        let num = self.num_sequences();
        let mut seqs = Vec::with_capacity(num);
        if num == 0 {
            return seqs;
        }
        if self.from.len() == 1 {
            for b in self.from[0]..=self.to[0] {
                seqs.push(Sequence(vec![b]));
            }
            return seqs;
        }
        let mut cur = [self.from[0], self.from[1]];
        loop {
            seqs.push(Sequence(cur.to_vec()));
            if cur == [self.to[0], self.to[1]] {
                break;
            }
            if cur[1] == u8::MAX {
                cur = [cur[0] + 1, 0];
            } else {
                cur[1] += 1;
            }
        }
        seqs
    }
}

fn mask_matches(mask: u8, b: u8) -> bool {
    mask & b == mask
}

fn any_mask_matches(mask: u8, b: u8) -> bool {
    mask & b != 0
}

/// Number of single bytes matching an all-bits mask: 2^(8 - popcount).
fn mask_num(mask: u8) -> usize {
    256 >> mask.count_ones()
}

/// A byte-matching predicate with forward and reverse test semantics.
#[derive(Clone, Debug)]
pub enum Pattern {
    /// Exact byte sequence.
    Sequence(Sequence),
    /// Exact byte sequence with a precomputed finder.
    Bmh(BmhSequence),
    /// Any child may match; the longest successful match wins.
    Choice(Vec<Pattern>),
    /// All children must match contiguously, in order.
    List(Vec<Pattern>),
    /// Succeeds iff the inner pattern fails; consumes the inner minimum.
    Not(Box<Pattern>),
    /// Lexicographic byte-string range.
    Range(Range),
    /// Single byte with all mask bits set.
    Mask(u8),
    /// Single byte with any mask bit set.
    AnyMask(u8),
}

impl Pattern {
    pub fn sequence(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Sequence(Sequence::new(bytes))
    }

    pub fn bmh(bytes: impl Into<Vec<u8>>, reverse: bool) -> Self {
        Self::Bmh(BmhSequence::new(bytes, reverse))
    }

    pub fn range(from: impl Into<Vec<u8>>, to: impl Into<Vec<u8>>) -> Self {
        Self::Range(Range::new(from, to))
    }

    pub fn not(inner: Pattern) -> Self {
        Self::Not(Box::new(inner))
    }

    /// Forward test against the head of `b`. Returns the matched length on
    /// success, a skip distance on failure, 0 when `b` is too short.
    pub fn test(&self, b: &[u8]) -> (bool, usize) {
        match self {
            Self::Sequence(s) => s.test(b),
            Self::Bmh(s) => s.test(b),
            Self::Choice(cs) => choice_test(cs, b, Pattern::test),
            Self::List(ps) => list_test(ps, b),
            Self::Not(inner) => not_test(inner, b, Pattern::test),
            Self::Range(r) => r.test(b),
            Self::Mask(m) => match b.first() {
                None => (false, 0),
                Some(&x) if mask_matches(*m, x) => (true, 1),
                Some(_) => (false, 1),
            },
            Self::AnyMask(m) => match b.first() {
                None => (false, 0),
                Some(&x) if any_mask_matches(*m, x) => (true, 1),
                Some(_) => (false, 1),
            },
        }
    }

    /// Reverse test against the tail of `b`.
    pub fn test_r(&self, b: &[u8]) -> (bool, usize) {
        match self {
            Self::Sequence(s) => s.test_r(b),
            Self::Bmh(s) => s.test_r(b),
            Self::Choice(cs) => choice_test(cs, b, Pattern::test_r),
            Self::List(ps) => list_test_r(ps, b),
            Self::Not(inner) => not_test(inner, b, Pattern::test_r),
            Self::Range(r) => r.test_r(b),
            Self::Mask(m) => match b.last() {
                None => (false, 0),
                Some(&x) if mask_matches(*m, x) => (true, 1),
                Some(_) => (false, 1),
            },
            Self::AnyMask(m) => match b.last() {
                None => (false, 0),
                Some(&x) if any_mask_matches(*m, x) => (true, 1),
                Some(_) => (false, 1),
            },
        }
    }

    /// Structural equality. Choice arms compare as sets; everything else is
    /// positional.
    pub fn equals(&self, other: &Pattern) -> bool {
        match (self, other) {
            (Self::Sequence(a), Self::Sequence(b)) => a == b,
            (Self::Bmh(a), Self::Bmh(b)) => a == b,
            (Self::Choice(a), Self::Choice(b)) => {
                a.len() == b.len()
                    && a.iter().all(|p| b.iter().any(|q| p.equals(q)))
            }
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(p, q)| p.equals(q))
            }
            (Self::Not(a), Self::Not(b)) => a.equals(b),
            (Self::Range(a), Self::Range(b)) => a == b,
            (Self::Mask(a), Self::Mask(b)) => a == b,
            (Self::AnyMask(a), Self::AnyMask(b)) => a == b,
            _ => false,
        }
    }

    /// Minimum and maximum byte lengths this pattern can match.
    pub fn length(&self) -> (usize, usize) {
        match self {
            Self::Sequence(s) => (s.len(), s.len()),
            Self::Bmh(s) => (s.seq.len(), s.seq.len()),
            Self::Choice(cs) => {
                let mut iter = cs.iter().map(Pattern::length);
                let (mut min, mut max) = iter.next().unwrap_or((0, 0));
                for (lo, hi) in iter {
                    min = min.min(lo);
                    max = max.max(hi);
                }
                (min, max)
            }
            Self::List(ps) => ps.iter().map(Pattern::length).fold((0, 0), |(a, b), (lo, hi)| {
                (a + lo, b + hi)
            }),
            Self::Not(inner) => {
                let (min, _) = inner.length();
                (min, min)
            }
            Self::Range(r) => (r.from.len(), r.from.len()),
            Self::Mask(_) | Self::AnyMask(_) => (1, 1),
        }
    }

    /// Number of simple sequences this pattern unrolls to; 0 means the
    /// pattern cannot (or should not) be unrolled.
    pub fn num_sequences(&self) -> usize {
        match self {
            Self::Sequence(_) | Self::Bmh(_) => 1,
            Self::Choice(cs) => {
                let mut total = 0;
                for p in cs {
                    let n = p.num_sequences();
                    if n == 0 {
                        return 0;
                    }
                    total += n;
                }
                total
            }
            Self::List(ps) => {
                let mut total = 1usize;
                for p in ps {
                    let n = p.num_sequences();
                    if n == 0 {
                        return 0;
                    }
                    total = total.saturating_mul(n);
                }
                total
            }
            Self::Not(inner) => {
                let (_, max) = inner.length();
                if max > 1 {
                    return 0;
                }
                let n = inner.num_sequences();
                if n == 0 {
                    0
                } else {
                    256 - n
                }
            }
            Self::Range(r) => r.num_sequences(),
            Self::Mask(m) => mask_num(*m),
            Self::AnyMask(m) => 256 - mask_num(*m),
        }
    }

    /// Unroll the pattern to its simple sequences. Empty when
    /// `num_sequences() == 0`.
    pub fn sequences(&self) -> Vec<Sequence> {
        match self {
            Self::Sequence(s) => vec![s.clone()],
            Self::Bmh(s) => vec![Sequence(s.seq.clone())],
            Self::Choice(cs) => {
                if self.num_sequences() == 0 {
                    return Vec::new();
                }
                cs.iter().flat_map(Pattern::sequences).collect()
            }
            Self::List(ps) => {
                let total = self.num_sequences();
                if total == 0 {
                    return Vec::new();
                }
                let mut seqs = vec![Sequence(Vec::new()); total];
                let mut block = total;
                for p in ps {
                    let subs = p.sequences();
                    block /= subs.len();
                    for (i, seq) in seqs.iter_mut().enumerate() {
                        let pick = (i / block) % subs.len();
                        seq.0.extend_from_slice(&subs[pick].0);
                    }
                }
                seqs
            }
            Self::Not(inner) => {
                if self.num_sequences() == 0 {
                    return Vec::new();
                }
                let excluded: Vec<u8> = inner
                    .sequences()
                    .iter()
                    .filter(|s| s.len() == 1)
                    .map(|s| s.0[0])
                    .collect();
                (0u8..=u8::MAX)
                    .filter(|b| !excluded.contains(b))
                    .map(|b| Sequence(vec![b]))
                    .collect()
            }
            Self::Range(r) => r.sequences(),
            Self::Mask(m) => (0u8..=u8::MAX)
                .filter(|&b| mask_matches(*m, b))
                .map(|b| Sequence(vec![b]))
                .collect(),
            Self::AnyMask(m) => (0u8..=u8::MAX)
                .filter(|&b| any_mask_matches(*m, b))
                .map(|b| Sequence(vec![b]))
                .collect(),
        }
    }

    /// Persist the pattern, tag byte first.
    pub fn save(&self, s: &mut Saver) {
        match self {
            Self::Sequence(seq) => {
                s.save_byte(TAG_SEQUENCE);
                s.save_bytes(&seq.0);
            }
            Self::Bmh(b) => {
                s.save_byte(if b.reverse { TAG_RBMH } else { TAG_BMH });
                s.save_bytes(&b.seq);
            }
            Self::Choice(cs) => {
                s.save_byte(TAG_CHOICE);
                s.save_small_int(cs.len());
                for p in cs {
                    p.save(s);
                }
            }
            Self::List(ps) => {
                s.save_byte(TAG_LIST);
                s.save_small_int(ps.len());
                for p in ps {
                    p.save(s);
                }
            }
            Self::Not(inner) => {
                s.save_byte(TAG_NOT);
                inner.save(s);
            }
            Self::Range(r) => {
                s.save_byte(TAG_RANGE);
                s.save_bytes(&r.from);
                s.save_bytes(&r.to);
            }
            Self::Mask(m) => {
                s.save_byte(TAG_MASK);
                s.save_byte(*m);
            }
            Self::AnyMask(m) => {
                s.save_byte(TAG_ANY_MASK);
                s.save_byte(*m);
            }
        }
    }

    /// Load a pattern through the given registry.
    pub fn load(l: &mut Loader<'_>, reg: &PatternRegistry) -> Option<Pattern> {
        reg.load(l)
    }
}

fn choice_test(
    cs: &[Pattern],
    b: &[u8],
    f: impl Fn(&Pattern, &[u8]) -> (bool, usize),
) -> (bool, usize) {
    let mut hit = false;
    let (mut best, mut skip) = (0usize, 0usize);
    for p in cs {
        let (ok, n) = f(p, b);
        if ok {
            hit = true;
            best = best.max(n);
        } else {
            skip = skip.max(n);
        }
    }
    if hit {
        (true, best)
    } else {
        (false, skip)
    }
}

fn list_test(ps: &[Pattern], b: &[u8]) -> (bool, usize) {
    let Some(first) = ps.first() else {
        return (false, 0);
    };
    let (ok, first_len) = first.test(b);
    if !ok {
        return (false, first_len);
    }
    let mut total = first_len;
    for p in &ps[1..] {
        if b.len() <= total {
            return (false, 0);
        }
        let (ok, n) = p.test(&b[total..]);
        if !ok {
            return (false, first_len);
        }
        total += n;
    }
    (true, total)
}

fn list_test_r(ps: &[Pattern], b: &[u8]) -> (bool, usize) {
    let Some(last) = ps.last() else {
        return (false, 0);
    };
    let (ok, first_len) = last.test_r(b);
    if !ok {
        return (false, first_len);
    }
    let mut total = first_len;
    for p in ps[..ps.len() - 1].iter().rev() {
        if b.len() <= total {
            return (false, 0);
        }
        let (ok, n) = p.test_r(&b[..b.len() - total]);
        if !ok {
            return (false, first_len);
        }
        total += n;
    }
    (true, total)
}

fn not_test(
    inner: &Pattern,
    b: &[u8],
    f: impl Fn(&Pattern, &[u8]) -> (bool, usize),
) -> (bool, usize) {
    let (min, _) = inner.length();
    if b.len() < min {
        return (false, 0);
    }
    let (ok, _) = f(inner, b);
    if ok {
        (false, 1)
    } else {
        (true, min)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequence(s) => write!(f, "seq {}", stringify(&s.0)),
            Self::Bmh(b) => {
                if b.reverse {
                    write!(f, "rbmh {}", stringify(&b.seq))
                } else {
                    write!(f, "bmh {}", stringify(&b.seq))
                }
            }
            Self::Choice(cs) => {
                write!(f, "c[")?;
                for (i, p) in cs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, "]")
            }
            Self::List(ps) => {
                write!(f, "l[")?;
                for (i, p) in ps.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, "]")
            }
            Self::Not(inner) => write!(f, "not[{inner}]"),
            Self::Range(r) => {
                write!(f, "r {} - {}", stringify(&r.from), stringify(&r.to))
            }
            Self::Mask(m) => write!(f, "m {m:#04x}"),
            Self::AnyMask(m) => write!(f, "am {m:#04x}"),
        }
    }
}
