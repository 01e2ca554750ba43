//! Per-example Pareto front maintenance.
//!
//! These are free functions rather than methods on [`State`](super::State) so the merge
//! proposer can run `find_dominator_programs` / `remove_dominated` against a snapshot
//! without borrowing the whole state mutably.

use std::hash::Hash;

use indexmap::{IndexMap, IndexSet};
use rand::Rng;

use crate::candidate::ProgramIdx;

/// `DataId → best score seen` and `DataId → programs tied for that best`.
pub type FrontBest<Id> = IndexMap<Id, f64>;
pub type FrontMembers<Id> = IndexMap<Id, IndexSet<ProgramIdx>>;

/// Applies the front-update rule for one `(id, score, program)` triple.
///
/// Strictly better replaces the best and the membership set; a tie inserts into the
/// set; anything worse is a no-op. Comparisons are ordinary `f64` `>`/`==`,
/// deliberately not epsilon-tolerant.
pub fn update_front<Id: Clone + Eq + Hash>(
    best: &mut FrontBest<Id>,
    members: &mut FrontMembers<Id>,
    id: &Id,
    score: f64,
    program: ProgramIdx,
) {
    match best.get(id).copied() {
        None => {
            best.insert(id.clone(), score);
            members
                .entry(id.clone())
                .or_default()
                .insert(program);
        }
        Some(current_best) if score > current_best => {
            best.insert(id.clone(), score);
            let set = members.entry(id.clone()).or_default();
            set.clear();
            set.insert(program);
        }
        Some(current_best) if score == current_best => {
            members.entry(id.clone()).or_default().insert(program);
        }
        _ => {}
    }
}

/// True iff `y` is dominated by `peers`: for every id where `y` is on the front, at
/// least one member of `peers` is also on the front for that id.
///
/// A `y` with no front membership is vacuously dominated by any non-empty peer set —
/// in practice this never happens since `is_dominated` is only called on programs
/// known to be on at least one front.
pub fn is_dominated<Id: Eq + Hash>(
    y: ProgramIdx,
    peers: &IndexSet<ProgramIdx>,
    members: &FrontMembers<Id>,
) -> bool {
    if peers.is_empty() {
        return false;
    }
    let mut y_has_membership = false;
    for set in members.values() {
        if set.contains(&y) {
            y_has_membership = true;
            if !set.iter().any(|p| peers.contains(p)) {
                return false;
            }
        }
    }
    if !y_has_membership {
        return true;
    }
    true
}

/// Removes dominated programs from `members` until a fixed point, weakest-first.
///
/// "Weakest-first" means candidates are considered for removal in ascending aggregate
/// score order, so that when several programs are simultaneously dominated, the ones
/// with lower aggregate score are dropped before ties among the remainder are resolved.
pub fn remove_dominated<Id: Clone + Eq + Hash>(
    members: &FrontMembers<Id>,
    aggregate_scores: &IndexMap<ProgramIdx, f64>,
) -> FrontMembers<Id> {
    let mut current = members.clone();

    loop {
        let mut all_programs: IndexSet<ProgramIdx> = IndexSet::new();
        for set in current.values() {
            all_programs.extend(set.iter().copied());
        }

        let mut ordered: Vec<ProgramIdx> = all_programs.into_iter().collect();
        ordered.sort_by(|a, b| {
            let sa = aggregate_scores.get(a).copied().unwrap_or(f64::MIN);
            let sb = aggregate_scores.get(b).copied().unwrap_or(f64::MIN);
            sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut removed_any = false;
        for &candidate in &ordered {
            let peers: IndexSet<ProgramIdx> = ordered
                .iter()
                .copied()
                .filter(|&p| p != candidate)
                .collect();
            if is_dominated(candidate, &peers, &current) {
                let mut changed = false;
                for set in current.values_mut() {
                    if set.shift_remove(&candidate) {
                        changed = true;
                    }
                }
                if changed {
                    removed_any = true;
                }
            }
        }

        current.retain(|_, set| !set.is_empty());

        if !removed_any {
            break;
        }
    }

    current
}

/// `remove_dominated`, then the union of every surviving front's membership.
pub fn find_dominator_programs<Id: Clone + Eq + Hash>(
    members: &FrontMembers<Id>,
    aggregate_scores: &IndexMap<ProgramIdx, f64>,
) -> IndexSet<ProgramIdx> {
    let cleaned = remove_dominated(members, aggregate_scores);
    let mut union = IndexSet::new();
    for set in cleaned.values() {
        union.extend(set.iter().copied());
    }
    union
}

/// Samples a program weighted by how many fronts it survives on after dominance
/// pruning — one entry in the draw per front it belongs to.
pub fn frequency_weighted_selection<Id: Clone + Eq + Hash, R: Rng>(
    members: &FrontMembers<Id>,
    aggregate_scores: &IndexMap<ProgramIdx, f64>,
    rng: &mut R,
) -> Option<ProgramIdx> {
    let cleaned = remove_dominated(members, aggregate_scores);

    let mut multiset: Vec<ProgramIdx> = Vec::new();
    for set in cleaned.values() {
        multiset.extend(set.iter().copied());
    }

    if multiset.is_empty() {
        return None;
    }

    let idx = rng.gen_range(0..multiset.len());
    Some(multiset[idx])
}
