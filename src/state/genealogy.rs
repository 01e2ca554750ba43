//! Ancestor-set traversal and merge-triplet desirability.

use std::collections::HashSet;

use crate::candidate::{Candidate, ProgramIdx};

/// Strict ancestors of `idx` — never includes `idx` itself.
///
/// Iterative depth-first traversal with a visited set: the genealogy is a DAG, so the
/// same ancestor can be reachable through more than one path and must only be counted
/// once (and must not cause the traversal to loop).
pub fn ancestors(idx: ProgramIdx, parents: &[Vec<ProgramIdx>]) -> HashSet<ProgramIdx> {
    let mut visited = HashSet::new();
    let mut stack: Vec<ProgramIdx> = parents
        .get(idx.index())
        .map(|p| p.clone())
        .unwrap_or_default();

    while let Some(next) = stack.pop() {
        if visited.insert(next) {
            if let Some(grandparents) = parents.get(next.index()) {
                stack.extend(grandparents.iter().copied());
            }
        }
    }

    visited
}

/// True iff `maybe_ancestor` is a strict ancestor of `idx`.
pub fn is_ancestor_of(maybe_ancestor: ProgramIdx, idx: ProgramIdx, parents: &[Vec<ProgramIdx>]) -> bool {
    ancestors(idx, parents).contains(&maybe_ancestor)
}

/// Common strict ancestors of `id1` and `id2`.
pub fn common_ancestors(
    id1: ProgramIdx,
    id2: ProgramIdx,
    parents: &[Vec<ProgramIdx>],
) -> HashSet<ProgramIdx> {
    let a1 = ancestors(id1, parents);
    let a2 = ancestors(id2, parents);
    a1.intersection(&a2).copied().collect()
}

/// True iff there's a component where the merge can strictly combine information from
/// both descendants: exactly one of `id1`/`id2` differs from `ancestor` on that
/// component, and `id1`/`id2` differ from each other on it too.
///
/// This is the rationale behind a merge being worth attempting at all — if every
/// component where the descendants disagree already disagreed with the ancestor on
/// *both* sides, the three-way merge degenerates to picking one descendant wholesale,
/// which the plain Pareto/reflective search already explores.
pub fn triplet_is_desirable(ancestor: &Candidate, id1: &Candidate, id2: &Candidate) -> bool {
    for name in ancestor.component_names() {
        let a = ancestor.get(name).unwrap_or_default();
        let c1 = id1.get(name).unwrap_or_default();
        let c2 = id2.get(name).unwrap_or_default();

        if c1 == c2 {
            continue;
        }

        let matches_ancestor_1 = c1 == a;
        let matches_ancestor_2 = c2 == a;

        if matches_ancestor_1 != matches_ancestor_2 {
            return true;
        }
    }
    false
}
