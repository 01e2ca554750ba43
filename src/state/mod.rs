//! The optimizer's persistent state: candidate pool, sparse validation scores,
//! per-example Pareto fronts, and the genealogy DAG.
//!
//! [`State::admit`] is the *only* path that mutates the pool. Proposers never touch it
//! directly — they hand their proposal to the [`Engine`](crate::engine::Engine), which
//! calls `admit` on acceptance.

pub mod genealogy;
pub mod pareto;

use std::hash::Hash;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::candidate::{Candidate, ProgramIdx};
use crate::error::EngineError;

use pareto::{FrontBest, FrontMembers};

/// Snapshot of the Pareto front for reporting in the `iteration_complete` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontSnapshot<Id> {
    pub best: Vec<(Id, f64)>,
    pub members: Vec<(Id, Vec<ProgramIdx>)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State<Id>
where
    Id: Eq + Hash + Clone,
{
    candidates: Vec<Candidate>,
    parents: Vec<Vec<ProgramIdx>>,
    sparse_scores: Vec<IndexMap<Id, f64>>,
    discovery_budgets: Vec<u64>,
    cursors: Vec<usize>,

    front_best: FrontBest<Id>,
    front_members: FrontMembers<Id>,

    valid_validation_ids: IndexSet<Id>,

    iteration: u64,
    total_evaluations: u64,
    full_validation_evals: u64,
}

impl<Id> State<Id>
where
    Id: Eq + Hash + Clone + std::fmt::Debug,
{
    /// Constructs fresh state from the seed candidate and its full validation scores.
    ///
    /// The seed becomes program 0 with the sentinel "no parents" genealogy entry
    /// (an empty `Vec`, distinguishing it from the length-1/length-2 entries every
    /// other program has).
    pub fn new(
        seed_candidate: Candidate,
        seed_scores: IndexMap<Id, f64>,
        valid_validation_ids: IndexSet<Id>,
    ) -> Self {
        let mut state = Self {
            candidates: Vec::new(),
            parents: Vec::new(),
            sparse_scores: Vec::new(),
            discovery_budgets: Vec::new(),
            cursors: Vec::new(),
            front_best: FrontBest::new(),
            front_members: FrontMembers::new(),
            valid_validation_ids,
            iteration: 0,
            total_evaluations: 0,
            full_validation_evals: 0,
        };

        // The seed is admitted through the same path as any other program, modulo the
        // empty parent list — admit() special-cases an empty pool to allow it.
        state
            .admit(Vec::new(), seed_candidate, seed_scores, 0)
            .expect("seed admission cannot fail: empty parent list is only valid for program 0");

        state
    }

    /// The only mutating entry point.
    pub fn admit(
        &mut self,
        parent_ids: Vec<ProgramIdx>,
        new_candidate: Candidate,
        sparse_val_scores: IndexMap<Id, f64>,
        discovery_budget: u64,
    ) -> Result<ProgramIdx, EngineError> {
        let pool_size = self.candidates.len();

        if pool_size == 0 {
            if !parent_ids.is_empty() {
                return Err(EngineError::InvalidParent {
                    parent: parent_ids[0],
                    pool_size,
                });
            }
        } else if !(1..=2).contains(&parent_ids.len()) {
            return Err(EngineError::InvalidConfiguration {
                reason: format!(
                    "admit requires 1 or 2 parents for non-seed programs, got {}",
                    parent_ids.len()
                ),
            });
        }

        for &parent in &parent_ids {
            if parent.index() >= pool_size {
                return Err(EngineError::InvalidParent { parent, pool_size });
            }
        }

        if !self.valid_validation_ids.is_empty() {
            for id in sparse_val_scores.keys() {
                if !self.valid_validation_ids.contains(id) {
                    return Err(EngineError::UnknownDataId);
                }
            }
        }

        let idx = ProgramIdx(pool_size);

        for (id, &score) in sparse_val_scores.iter() {
            pareto::update_front(&mut self.front_best, &mut self.front_members, id, score, idx);
        }

        self.candidates.push(new_candidate);
        self.parents.push(parent_ids);
        self.sparse_scores.push(sparse_val_scores);
        self.discovery_budgets.push(discovery_budget);
        self.cursors.push(0);

        Ok(idx)
    }

    // -- read-only accessors ------------------------------------------------------

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn candidate(&self, idx: ProgramIdx) -> &Candidate {
        &self.candidates[idx.index()]
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn parents_of(&self, idx: ProgramIdx) -> &[ProgramIdx] {
        &self.parents[idx.index()]
    }

    pub fn genealogy(&self) -> &[Vec<ProgramIdx>] {
        &self.parents
    }

    pub fn sparse_scores(&self, idx: ProgramIdx) -> &IndexMap<Id, f64> {
        &self.sparse_scores[idx.index()]
    }

    pub fn discovery_budget(&self, idx: ProgramIdx) -> u64 {
        self.discovery_budgets[idx.index()]
    }

    pub fn discovery_budgets(&self) -> &[u64] {
        &self.discovery_budgets
    }

    pub fn cursor(&self, idx: ProgramIdx) -> usize {
        self.cursors[idx.index()]
    }

    pub fn cursors(&self) -> &[usize] {
        &self.cursors
    }

    pub fn sparse_scores_all(&self) -> &[IndexMap<Id, f64>] {
        &self.sparse_scores
    }

    /// Advances the round-robin cursor and returns the component index it pointed at
    /// *before* advancing.
    pub fn advance_cursor(&mut self, idx: ProgramIdx, num_components: usize) -> usize {
        let cursor = &mut self.cursors[idx.index()];
        let current = *cursor;
        if num_components > 0 {
            *cursor = (*cursor + 1) % num_components;
        }
        current
    }

    pub fn front_best(&self) -> &FrontBest<Id> {
        &self.front_best
    }

    pub fn front_members(&self) -> &FrontMembers<Id> {
        &self.front_members
    }

    pub fn valid_validation_ids(&self) -> &IndexSet<Id> {
        &self.valid_validation_ids
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn total_evaluations(&self) -> u64 {
        self.total_evaluations
    }

    pub fn full_validation_evals(&self) -> u64 {
        self.full_validation_evals
    }

    pub fn advance_iteration(&mut self) {
        self.iteration += 1;
    }

    pub fn add_evaluations(&mut self, count: u64) {
        self.total_evaluations += count;
    }

    pub fn add_full_validation_eval(&mut self) {
        self.full_validation_evals += 1;
    }

    /// Arithmetic mean of `idx`'s sparse scores. Undefined for a program with no
    /// scores; rather than panicking or quietly returning 0.0 (which
    /// would make an unevaluated program look like a perfect failure to a selector),
    /// this returns `InvalidConfiguration` so the caller's bug surfaces immediately.
    pub fn aggregate_score(&self, idx: ProgramIdx) -> Result<f64, EngineError> {
        let scores = &self.sparse_scores[idx.index()];
        if scores.is_empty() {
            return Err(EngineError::InvalidConfiguration {
                reason: format!("aggregate_score called on {idx} with no recorded scores"),
            });
        }
        Ok(scores.values().sum::<f64>() / scores.len() as f64)
    }

    pub fn aggregate_scores_all(&self) -> IndexMap<ProgramIdx, f64> {
        (0..self.len())
            .filter_map(|i| {
                let idx = ProgramIdx(i);
                self.aggregate_score(idx).ok().map(|s| (idx, s))
            })
            .collect()
    }

    pub fn front_snapshot(&self) -> FrontSnapshot<Id>
    where
        Id: Clone,
    {
        FrontSnapshot {
            best: self
                .front_best
                .iter()
                .map(|(id, score)| (id.clone(), *score))
                .collect(),
            members: self
                .front_members
                .iter()
                .map(|(id, set)| (id.clone(), set.iter().copied().collect()))
                .collect(),
        }
    }

    /// Reconstructs state from already-validated parallel arrays, replaying the front
    /// update rule program-by-program. Used only by [`crate::persistence`] when loading
    /// an on-disk snapshot (current schema or migrated from a legacy one) — the normal
    /// construction path is [`State::new`] + [`State::admit`].
    pub(crate) fn rebuild_from_parts(
        candidates: Vec<Candidate>,
        parents: Vec<Vec<ProgramIdx>>,
        sparse_scores: Vec<IndexMap<Id, f64>>,
        discovery_budgets: Vec<u64>,
        cursors: Vec<usize>,
        valid_validation_ids: IndexSet<Id>,
        iteration: u64,
        total_evaluations: u64,
        full_validation_evals: u64,
    ) -> Self {
        let mut front_best = FrontBest::new();
        let mut front_members = FrontMembers::new();

        for (i, scores) in sparse_scores.iter().enumerate() {
            let idx = ProgramIdx(i);
            for (id, &score) in scores.iter() {
                pareto::update_front(&mut front_best, &mut front_members, id, score, idx);
            }
        }

        Self {
            candidates,
            parents,
            sparse_scores,
            discovery_budgets,
            cursors,
            front_best,
            front_members,
            valid_validation_ids,
            iteration,
            total_evaluations,
            full_validation_evals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(text: &str) -> Candidate {
        Candidate::new([("instruction".to_string(), text.to_string())].into())
    }

    fn scores(pairs: &[(&str, f64)]) -> IndexMap<&'static str, f64> {
        pairs.iter().map(|&(k, v)| (k, v)).collect()
    }

    fn valid_ids() -> IndexSet<&'static str> {
        ["v1", "v2", "v3"].into_iter().collect()
    }

    #[test]
    fn seed_admission_sets_up_invariants() {
        let state = State::new(candidate("x"), scores(&[("v1", 0.5), ("v2", 0.2)]), valid_ids());

        assert_eq!(state.len(), 1);
        assert_eq!(state.parents_of(ProgramIdx(0)), &[] as &[ProgramIdx]);
        assert_eq!(state.aggregate_score(ProgramIdx(0)).unwrap(), 0.35);
        assert_eq!(state.front_best()["v1"], 0.5);
    }

    #[test]
    fn admit_rejects_unknown_data_id() {
        let mut state = State::new(candidate("x"), scores(&[("v1", 0.5)]), valid_ids());
        let err = state
            .admit(vec![ProgramIdx(0)], candidate("y"), scores(&[("bogus", 0.9)]), 1)
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownDataId));
    }

    #[test]
    fn admit_rejects_invalid_parent() {
        let mut state = State::new(candidate("x"), scores(&[("v1", 0.5)]), valid_ids());
        let err = state
            .admit(vec![ProgramIdx(7)], candidate("y"), scores(&[("v1", 0.9)]), 1)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidParent { .. }));
    }

    #[test]
    fn admit_updates_front_and_preserves_invariants() {
        let mut state = State::new(candidate("x"), scores(&[("v1", 0.5), ("v2", 0.5)]), valid_ids());

        let child = state
            .admit(vec![ProgramIdx(0)], candidate("y"), scores(&[("v1", 0.9)]), 0)
            .unwrap();

        // invariant 1 & 2: front for v1 is exactly {child}, with matching score.
        assert_eq!(state.front_members()["v1"], IndexSet::from([child]));
        assert_eq!(state.front_best()["v1"], 0.9);

        // v2 untouched by the child (child has no v2 score) so program 0 still fronts it.
        assert_eq!(state.front_members()["v2"], IndexSet::from([ProgramIdx(0)]));

        // invariant 4: parallel arrays stay in lockstep.
        assert_eq!(state.len(), 2);
        assert_eq!(state.genealogy().len(), 2);
    }

    #[test]
    fn pareto_monotonicity_best_never_decreases() {
        let mut state = State::new(candidate("x"), scores(&[("v1", 0.5)]), valid_ids());
        let before = state.front_best()["v1"];

        state
            .admit(vec![ProgramIdx(0)], candidate("y"), scores(&[("v1", 0.2)]), 0)
            .unwrap();
        assert!(state.front_best()["v1"] >= before);

        state
            .admit(vec![ProgramIdx(0)], candidate("z"), scores(&[("v1", 0.9)]), 0)
            .unwrap();
        assert!(state.front_best()["v1"] >= 0.9);
    }

    #[test]
    fn round_robin_cursor_advances_modulo_component_count() {
        let mut state = State::new(candidate("x"), scores(&[("v1", 0.5)]), valid_ids());
        assert_eq!(state.advance_cursor(ProgramIdx(0), 3), 0);
        assert_eq!(state.advance_cursor(ProgramIdx(0), 3), 1);
        assert_eq!(state.advance_cursor(ProgramIdx(0), 3), 2);
        assert_eq!(state.cursor(ProgramIdx(0)), 0);
    }

    #[test]
    fn aggregate_score_errors_on_empty_scores() {
        let mut state = State::new(candidate("x"), scores(&[("v1", 0.5)]), valid_ids());
        let child = state
            .admit(vec![ProgramIdx(0)], candidate("y"), IndexMap::new(), 0)
            .unwrap();
        assert!(state.aggregate_score(child).is_err());
    }

    #[test]
    fn serde_round_trip_preserves_state() {
        let mut state = State::new(candidate("x"), scores(&[("v1", 0.5), ("v2", 0.1)]), valid_ids());
        state
            .admit(vec![ProgramIdx(0)], candidate("y"), scores(&[("v1", 0.9)]), 4)
            .unwrap();

        let json = serde_json::to_string(&state).unwrap();
        let restored: State<&str> = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.len(), state.len());
        assert_eq!(restored.front_best()["v1"], state.front_best()["v1"]);
        assert_eq!(
            restored.aggregate_score(ProgramIdx(1)).unwrap(),
            state.aggregate_score(ProgramIdx(1)).unwrap()
        );
    }
}
