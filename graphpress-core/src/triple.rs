//! Triple/term value types and sort-key permutations.

use std::cmp::Ordering;
use std::fmt;

// ============================================================================
// TripleId
// ============================================================================

/// A triple (or quad) of dictionary IDs.
///
/// `g == 0` means "no graph component". A component value of 0 acts as a
/// wildcard only in pattern-match contexts ([`TripleId::matches`]); it is
/// never a valid term ID otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TripleId {
    pub s: u64,
    pub p: u64,
    pub o: u64,
    pub g: u64,
}

impl TripleId {
    #[inline]
    pub fn new(s: u64, p: u64, o: u64) -> Self {
        Self { s, p, o, g: 0 }
    }

    #[inline]
    pub fn new_quad(s: u64, p: u64, o: u64, g: u64) -> Self {
        Self { s, p, o, g }
    }

    /// True for the all-zero tuple used as a stream terminator.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.s == 0 && self.p == 0 && self.o == 0 && self.g == 0
    }

    /// Component-wise pattern match; pattern components of 0 match any ID.
    #[inline]
    pub fn matches(&self, pattern: &TripleId) -> bool {
        (pattern.s == 0 || pattern.s == self.s)
            && (pattern.p == 0 || pattern.p == self.p)
            && (pattern.o == 0 || pattern.o == self.o)
            && (pattern.g == 0 || pattern.g == self.g)
    }
}

// ============================================================================
// Comparators
// ============================================================================

/// SPO comparator: `(s, p, o, g)`.
#[inline]
pub fn cmp_spo(a: &TripleId, b: &TripleId) -> Ordering {
    a.s.cmp(&b.s)
        .then(a.p.cmp(&b.p))
        .then(a.o.cmp(&b.o))
        .then(a.g.cmp(&b.g))
}

/// SOP comparator: `(s, o, p, g)`.
#[inline]
pub fn cmp_sop(a: &TripleId, b: &TripleId) -> Ordering {
    a.s.cmp(&b.s)
        .then(a.o.cmp(&b.o))
        .then(a.p.cmp(&b.p))
        .then(a.g.cmp(&b.g))
}

/// PSO comparator: `(p, s, o, g)`.
#[inline]
pub fn cmp_pso(a: &TripleId, b: &TripleId) -> Ordering {
    a.p.cmp(&b.p)
        .then(a.s.cmp(&b.s))
        .then(a.o.cmp(&b.o))
        .then(a.g.cmp(&b.g))
}

/// POS comparator: `(p, o, s, g)`.
#[inline]
pub fn cmp_pos(a: &TripleId, b: &TripleId) -> Ordering {
    a.p.cmp(&b.p)
        .then(a.o.cmp(&b.o))
        .then(a.s.cmp(&b.s))
        .then(a.g.cmp(&b.g))
}

/// OSP comparator: `(o, s, p, g)`.
#[inline]
pub fn cmp_osp(a: &TripleId, b: &TripleId) -> Ordering {
    a.o.cmp(&b.o)
        .then(a.s.cmp(&b.s))
        .then(a.p.cmp(&b.p))
        .then(a.g.cmp(&b.g))
}

/// OPS comparator: `(o, p, s, g)`.
#[inline]
pub fn cmp_ops(a: &TripleId, b: &TripleId) -> Ordering {
    a.o.cmp(&b.o)
        .then(a.p.cmp(&b.p))
        .then(a.s.cmp(&b.s))
        .then(a.g.cmp(&b.g))
}

/// Component permutation a triple set is sorted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TripleOrder {
    Spo = 0,
    Sop = 1,
    Pso = 2,
    Pos = 3,
    Osp = 4,
    Ops = 5,
}

impl TripleOrder {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Spo),
            1 => Some(Self::Sop),
            2 => Some(Self::Pso),
            3 => Some(Self::Pos),
            4 => Some(Self::Osp),
            5 => Some(Self::Ops),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Spo => "spo",
            Self::Sop => "sop",
            Self::Pso => "pso",
            Self::Pos => "pos",
            Self::Osp => "osp",
            Self::Ops => "ops",
        }
    }

    /// The comparator function for this permutation.
    pub fn cmp_fn(self) -> fn(&TripleId, &TripleId) -> Ordering {
        match self {
            Self::Spo => cmp_spo,
            Self::Sop => cmp_sop,
            Self::Pso => cmp_pso,
            Self::Pos => cmp_pos,
            Self::Osp => cmp_osp,
            Self::Ops => cmp_ops,
        }
    }
}

impl std::str::FromStr for TripleOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spo" => Ok(Self::Spo),
            "sop" => Ok(Self::Sop),
            "pso" => Ok(Self::Pso),
            "pos" => Ok(Self::Pos),
            "osp" => Ok(Self::Osp),
            "ops" => Ok(Self::Ops),
            other => Err(format!("unknown triple order: {other}")),
        }
    }
}

// ============================================================================
// TermRole
// ============================================================================

/// The position a term occupies within a triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TermRole {
    Subject = 0,
    Predicate = 1,
    Object = 2,
    Graph = 3,
}

impl TermRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Predicate => "predicate",
            Self::Object => "object",
            Self::Graph => "graph",
        }
    }

    /// Roles present in triples-mode input.
    pub fn triple_roles() -> &'static [TermRole] {
        &[Self::Subject, Self::Predicate, Self::Object]
    }

    /// Roles present in quads-mode input.
    pub fn quad_roles() -> &'static [TermRole] {
        &[Self::Subject, Self::Predicate, Self::Object, Self::Graph]
    }
}

impl fmt::Display for TermRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// IndexedTerm
// ============================================================================

/// A term byte string paired with the 1-based position of the triple it
/// occurred in. Ordered by `(term, position)` so a sorted stream groups
/// all occurrences of a term together, ascending by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedTerm {
    pub term: Vec<u8>,
    pub position: u64,
}

impl IndexedTerm {
    pub fn new(term: impl Into<Vec<u8>>, position: u64) -> Self {
        Self {
            term: term.into(),
            position,
        }
    }
}

impl Ord for IndexedTerm {
    fn cmp(&self, other: &Self) -> Ordering {
        self.term
            .cmp(&other.term)
            .then(self.position.cmp(&other.position))
    }
}

impl PartialOrd for IndexedTerm {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ============================================================================
// DictId — section-tagged dictionary ID
// ============================================================================

/// A dictionary ID as carried by remap events: a 1-based dense rank
/// tagged in the low bit with whether it belongs to the Shared section.
///
/// The tag exists because the subject/object merge-join assigns shared
/// and section-local ranks interleaved, before the final shared count is
/// known; tagged IDs are resolved to final dense IDs (shared block first,
/// then the section block) at materialization time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DictId(u64);

impl DictId {
    /// Tag a section-local rank (subject-only / object-only / predicate /
    /// graph).
    #[inline]
    pub fn section(rank: u64) -> Self {
        debug_assert!(rank >= 1, "dictionary ranks are 1-based");
        Self(rank << 1)
    }

    /// Tag a shared rank.
    #[inline]
    pub fn shared(rank: u64) -> Self {
        debug_assert!(rank >= 1, "dictionary ranks are 1-based");
        Self(rank << 1 | 1)
    }

    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn is_shared(self) -> bool {
        self.0 & 1 == 1
    }

    #[inline]
    pub fn rank(self) -> u64 {
        self.0 >> 1
    }

    /// Resolve to the final dense ID given the size of the Shared block:
    /// shared ranks keep their rank, section ranks follow the shared
    /// block.
    #[inline]
    pub fn resolve(self, shared_count: u64) -> u64 {
        if self.is_shared() {
            self.rank()
        } else {
            shared_count + self.rank()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_cmp() {
        let a = TripleId::new(1, 2, 3);
        let b = TripleId::new(1, 3, 2);
        assert_eq!(cmp_spo(&a, &b), Ordering::Less);
        assert_eq!(cmp_sop(&a, &b), Ordering::Greater);
        assert_eq!(cmp_pos(&a, &b), Ordering::Less);
        assert_eq!(cmp_osp(&a, &b), Ordering::Greater);
    }

    #[test]
    fn test_graph_breaks_ties_last() {
        let a = TripleId::new_quad(1, 2, 3, 1);
        let b = TripleId::new_quad(1, 2, 3, 2);
        for order in [
            TripleOrder::Spo,
            TripleOrder::Sop,
            TripleOrder::Pso,
            TripleOrder::Pos,
            TripleOrder::Osp,
            TripleOrder::Ops,
        ] {
            assert_eq!(order.cmp_fn()(&a, &b), Ordering::Less, "{}", order.name());
        }
    }

    #[test]
    fn test_pattern_wildcards() {
        let t = TripleId::new_quad(5, 6, 7, 8);
        assert!(t.matches(&TripleId::default()));
        assert!(t.matches(&TripleId::new_quad(5, 0, 7, 0)));
        assert!(!t.matches(&TripleId::new_quad(5, 0, 9, 0)));
    }

    #[test]
    fn test_indexed_term_order() {
        let mut terms = vec![
            IndexedTerm::new(&b"b"[..], 1),
            IndexedTerm::new(&b"a"[..], 9),
            IndexedTerm::new(&b"a"[..], 2),
        ];
        terms.sort();
        assert_eq!(terms[0].term, b"a");
        assert_eq!(terms[0].position, 2);
        assert_eq!(terms[1].position, 9);
        assert_eq!(terms[2].term, b"b");
    }

    #[test]
    fn test_dict_id_resolution() {
        let shared = DictId::shared(3);
        let local = DictId::section(3);
        assert!(shared.is_shared());
        assert!(!local.is_shared());
        assert_eq!(shared.rank(), 3);
        assert_eq!(local.rank(), 3);
        // With 10 shared terms: shared rank 3 stays 3, section rank 3
        // becomes 13.
        assert_eq!(shared.resolve(10), 3);
        assert_eq!(local.resolve(10), 13);
        assert_eq!(DictId::from_raw(shared.raw()), shared);
    }
}
