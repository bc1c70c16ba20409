//! Property suites over the pattern, compilation and scoring invariants.

use proptest::prelude::*;
use std::sync::Arc;

use telltale::bytematcher::ByteMatcher;
use telltale::identifier::{Base, MatcherIds, MatcherKind};
use telltale::patterns::{Pattern, PatternRegistry};
use telltale::persist::{Loader, Saver};
use telltale::streambuf::{Buffer, CancelToken};
use telltale::{Anchor, BufferConfig, EngineConfig, Frame, Signature};

// =====================================================================
// Strategies
// =====================================================================

fn bytes(max: usize) -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(any::<u8>(), 1..=max)
}

/// Random nested pattern, depth-bounded.
fn pattern() -> impl Strategy<Value = Pattern> {
    let leaf = prop_oneof![
        bytes(12).prop_map(|b| Pattern::sequence(b)),
        bytes(12).prop_map(|b| Pattern::bmh(b, false)),
        bytes(12).prop_map(|b| Pattern::bmh(b, true)),
        any::<u8>().prop_filter("zero mask never matches", |m| *m != 0).prop_map(Pattern::Mask),
        any::<u8>().prop_filter("zero mask never matches", |m| *m != 0).prop_map(Pattern::AnyMask),
        (any::<u8>(), any::<u8>()).prop_map(|(a, b)| {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            Pattern::range(vec![lo], vec![hi])
        }),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 1..4).prop_map(Pattern::Choice),
            proptest::collection::vec(inner.clone(), 1..4).prop_map(Pattern::List),
            inner.prop_map(Pattern::not),
        ]
    })
}

// =====================================================================
// Pattern invariants
// =====================================================================

proptest! {
    /// Persisting any pattern and loading it back yields a behavioral
    /// equal.
    #[test]
    fn pattern_persist_round_trip(p in pattern()) {
        let reg = PatternRegistry::core();
        let mut s = Saver::new();
        p.save(&mut s);
        let encoded = s.into_bytes();
        let mut l = Loader::new(&encoded).unwrap();
        let q = Pattern::load(&mut l, &reg).expect("load succeeds");
        prop_assert!(l.finish().is_ok());
        prop_assert!(p.equals(&q), "round trip changed {p}");
    }

    /// A sequence tested forward agrees with its reverse tested against
    /// the reversed buffer.
    #[test]
    fn sequence_test_r_duality(s in bytes(16), b in bytes(64)) {
        prop_assume!(b.len() >= s.len());
        let fwd = Pattern::sequence(s.clone());
        let mut rs = s.clone();
        rs.reverse();
        let rev = Pattern::sequence(rs);
        let mut rb = b.clone();
        rb.reverse();
        let (ok_f, len_f) = fwd.test(&b);
        let (ok_r, len_r) = rev.test_r(&rb);
        prop_assert_eq!(ok_f, ok_r);
        if ok_f {
            prop_assert_eq!(len_f, len_r);
        }
    }

    /// A choice's match length is the maximum over its matching arms.
    #[test]
    fn choice_longest_match(arms in proptest::collection::vec(bytes(8), 1..5), b in bytes(32)) {
        let choice = Pattern::Choice(arms.iter().cloned().map(Pattern::sequence).collect());
        let (ok, len) = choice.test(&b);
        let best = arms
            .iter()
            .map(|a| Pattern::sequence(a.clone()).test(&b))
            .filter(|(ok, _)| *ok)
            .map(|(_, l)| l)
            .max();
        match best {
            Some(expect) => {
                prop_assert!(ok);
                prop_assert_eq!(len, expect);
            }
            None => prop_assert!(!ok),
        }
    }

    /// A two-element list matches exactly when its halves match
    /// contiguously, and the lengths add.
    #[test]
    fn list_concatenation_length(p1 in bytes(8), p2 in bytes(8), b in bytes(40)) {
        let list = Pattern::List(vec![
            Pattern::sequence(p1.clone()),
            Pattern::sequence(p2.clone()),
        ]);
        let (ok, len) = list.test(&b);
        let (ok1, l1) = Pattern::sequence(p1).test(&b);
        let halves = ok1
            && b.len() > l1
            && Pattern::sequence(p2.clone()).test(&b[l1..]).0;
        let exact = ok1 && b.len() > l1 && {
            let (ok2, l2) = Pattern::sequence(p2.clone()).test(&b[l1..]);
            ok2 && l1 + l2 == len
        };
        prop_assert_eq!(ok, halves);
        if ok {
            prop_assert!(exact);
        }
    }
}

// =====================================================================
// Compilation invariants
// =====================================================================

proptest! {
    /// Every compiled key frame's window respects the configured caps.
    #[test]
    fn key_frame_offsets_clamped(
        max_bof in 1u64..10_000,
        max_eof in 1u64..10_000,
        head in bytes(8),
        tail in bytes(8),
        gap_min in 0u64..50_000,
    ) {
        let cfg = EngineConfig { max_bof, max_eof, ..EngineConfig::default() };
        let sigs = vec![
            Signature::new(vec![
                Frame::fixed(Anchor::Bof, 0, Pattern::sequence(head.clone())),
                Frame::wild(Anchor::Prev, Pattern::sequence(tail.clone())),
            ]),
            Signature::new(vec![Frame::window(
                Anchor::Eof,
                gap_min,
                gap_min + 100,
                Pattern::sequence(tail),
            )]),
        ];
        let m = ByteMatcher::new(&sigs, cfg).unwrap();
        for (_, kf) in m.key_frames() {
            let cap = if kf.anchor.is_forward() { max_bof } else { max_eof };
            match kf.key.pmax {
                Some(pmax) => prop_assert!(pmax <= cap.max(kf.key.pmin)),
                None => prop_assert!(false, "cap left a window unbounded"),
            }
        }
    }
}

// =====================================================================
// Scorer priority honor
// =====================================================================

proptest! {
    /// With "A rules out B" in force, no run that reports A also reports
    /// B, whatever the input.
    #[test]
    fn scorer_honors_priorities(body in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let sigs = vec![
            Signature::new(vec![Frame::fixed(Anchor::Bof, 0, Pattern::sequence(b"AA".to_vec()))]),
            Signature::new(vec![Frame::wild(Anchor::Prev, Pattern::sequence(b"BB".to_vec()))]),
        ];
        let m = Arc::new(ByteMatcher::new(&sigs, EngineConfig::default()).unwrap());
        let mut doc = b"AA".to_vec();
        doc.extend_from_slice(&body);
        let buf = Buffer::from_bytes(doc, BufferConfig::default(), CancelToken::new());

        let scan = m.identify(&buf);
        let mut reported = Vec::new();
        while let Ok(res) = scan.results.recv() {
            let r = res.expect("no scan errors");
            reported.push(r.index);
            // A match on signature 0 rules out signature 1.
            let reply = if r.index == 0 { vec![0] } else { vec![0, 1] };
            scan.waits.send(reply).unwrap();
        }
        if reported.contains(&0) {
            prop_assert!(!reported.contains(&1));
        }
    }
}

// =====================================================================
// Recorder dedup
// =====================================================================

fn fixture_base() -> Base {
    let mut b = Base {
        namespace: "test".into(),
        name_ids: MatcherIds {
            start: 0,
            ids: vec!["fmt/a".into(), "fmt/b".into(), "fmt/c".into()],
        },
        byte_ids: MatcherIds {
            start: 0,
            ids: vec!["fmt/a".into(), "fmt/b".into(), "fmt/a".into()],
        },
        ..Base::default()
    };
    b.infos.insert("fmt/a".into(), Default::default());
    b.infos.insert("fmt/b".into(), Default::default());
    b.infos.insert("fmt/c".into(), Default::default());
    b
}

proptest! {
    /// However evidence arrives, reported format ids are unique.
    #[test]
    fn recorder_reports_unique_ids(
        events in proptest::collection::vec((0usize..2, 0usize..3), 0..12)
    ) {
        let base = fixture_base();
        let mut r = base.recorder();
        for (kind, idx) in events {
            let kind = if kind == 0 { MatcherKind::Name } else { MatcherKind::Byte };
            r.record(kind, Some(idx), "evidence");
        }
        let out = r.report();
        let mut seen = std::collections::HashSet::new();
        for id in &out {
            prop_assert!(seen.insert(id.id.clone()), "duplicate {}", id.id);
        }
    }
}
