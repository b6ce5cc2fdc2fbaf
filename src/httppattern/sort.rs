//! Ordering of route match patterns
//!
//! The data plane matches routes linearly, first match wins. The emitted
//! route table must therefore place specific matches before generic ones,
//! and the order must be deterministic so two builds of the same inputs
//! produce identical tables. The comparator implements, in priority order:
//!
//! 1. exact-match paths before regex paths,
//! 2. among regex paths, fewer wildcards first, then a segment-by-segment
//!    comparison (literal < single wildcard < capture < double wildcard),
//! 3. for routes sharing a match, a concrete HTTP method before the
//!    wildcard method,
//! 4. for routes sharing a match, OPTIONS before other methods,
//! 5. otherwise the stable operation order.

use std::cmp::Ordering;

use super::template::MatchAtom;
use super::{Pattern, HTTP_METHOD_WILDCARD, OPTIONS};

/// One route-table entry candidate: an operation plus one of its patterns.
#[derive(Debug, Clone)]
pub struct MethodPattern {
    pub operation: String,
    pub pattern: Pattern,
}

struct SortKey {
    exact: bool,
    wildcards: usize,
    atoms: Vec<MatchAtom>,
    /// The concrete route match: the exact path for exact templates, the
    /// regex otherwise. Rules 3 and 4 only apply between entries sharing it.
    match_key: String,
    wildcard_method: bool,
    options: bool,
}

impl SortKey {
    fn new(entry: &MethodPattern) -> Self {
        let template = &entry.pattern.uri_template;
        let exact = template.is_exact_match();
        Self {
            exact,
            wildcards: template.wildcard_count(),
            atoms: template.match_atoms(),
            match_key: if exact {
                template.exact_match_string(false)
            } else {
                template.regex()
            },
            wildcard_method: entry.pattern.http_method == HTTP_METHOD_WILDCARD,
            options: entry.pattern.http_method == OPTIONS,
        }
    }
}

/// Stable-sort the concatenation of all (operation, pattern) pairs into
/// route-table emission order.
pub fn sort_method_patterns(entries: Vec<MethodPattern>) -> Vec<MethodPattern> {
    let mut keyed: Vec<(SortKey, MethodPattern)> = entries
        .into_iter()
        .map(|entry| (SortKey::new(&entry), entry))
        .collect();
    keyed.sort_by(|(a, _), (b, _)| compare(a, b));
    keyed.into_iter().map(|(_, entry)| entry).collect()
}

fn compare(a: &SortKey, b: &SortKey) -> Ordering {
    match (a.exact, b.exact) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }

    if !a.exact {
        let structural = a
            .wildcards
            .cmp(&b.wildcards)
            .then_with(|| compare_atoms(&a.atoms, &b.atoms));
        if structural != Ordering::Equal {
            return structural;
        }
    }

    if a.match_key != b.match_key {
        return Ordering::Equal;
    }

    match (a.wildcard_method, b.wildcard_method) {
        (false, true) => return Ordering::Less,
        (true, false) => return Ordering::Greater,
        _ => {}
    }

    match (a.options, b.options) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn compare_atoms(a: &[MatchAtom], b: &[MatchAtom]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let rank = x.rank().cmp(&y.rank());
        if rank != Ordering::Equal {
            return rank;
        }
        if let (MatchAtom::Literal(x), MatchAtom::Literal(y)) = (x, y) {
            let lit = x.cmp(y);
            if lit != Ordering::Equal {
                return lit;
            }
        }
    }
    // Equal prefix: the longer template is the more constrained match.
    b.len().cmp(&a.len())
}
