//! Dominator pair → common ancestor → three-way textual merge → subsample
//! validation.

use std::hash::Hash;

use indexmap::IndexMap;
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, instrument, warn};

use crate::adapter::Adapter;
use crate::candidate::{Candidate, ProgramIdx};
use crate::data::DataLoader;
use crate::error::EngineError;
use crate::rng::derive_rng;
use crate::state::genealogy;
use crate::state::pareto;
use crate::state::State;

use super::Proposal;

const MAX_ATTEMPTS: usize = 10;
const SUBSAMPLE_SIZE: usize = 5;

pub struct MergeOutcome<Id> {
    pub evaluations_spent: u64,
    pub proposal: Option<Proposal<Id>>,
}

/// Which descendant's text a merged component's value came from (the ancestor's
/// text never survives into the child verbatim unless it happens to equal one of
/// the descendants', in which case it's still recorded against that descendant).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeSource {
    Id1,
    Id2,
}

pub struct MergeProposer {
    pub use_merge: bool,
    pub max_merge_invocations: u64,
    pub val_overlap_floor: usize,
    pub base_seed: u64,

    merges_due: u64,
    total_merges_tested: u64,
    last_iter_found_new_program: bool,
    /// Attempted (id1, id2, ancestor) triplets, normalized so (id1, id2) is ordered
    /// by index — order doesn't affect desirability, so dedup should be symmetric.
    attempted_triplets: Vec<(ProgramIdx, ProgramIdx, ProgramIdx)>,
    /// Attempted (id1, id2, descriptor) combinations, same normalization.
    attempted_descriptors: Vec<(ProgramIdx, ProgramIdx, Vec<(String, MergeSource)>)>,
}

impl MergeProposer {
    pub fn new(use_merge: bool, max_merge_invocations: u64, val_overlap_floor: usize, base_seed: u64) -> Self {
        Self {
            use_merge,
            max_merge_invocations,
            val_overlap_floor,
            base_seed,
            merges_due: 0,
            total_merges_tested: 0,
            last_iter_found_new_program: false,
            attempted_triplets: Vec::new(),
            attempted_descriptors: Vec::new(),
        }
    }

    pub fn total_merges_tested(&self) -> u64 {
        self.total_merges_tested
    }

    pub fn merges_due(&self) -> u64 {
        self.merges_due
    }

    /// Called by the engine after a successful reflective mutation.
    pub fn schedule(&mut self) {
        if self.use_merge && self.total_merges_tested < self.max_merge_invocations {
            self.merges_due += 1;
        }
        self.last_iter_found_new_program = true;
    }

    /// Whether the engine should invoke [`Self::propose`] this iteration.
    pub fn ready_to_propose(&self) -> bool {
        self.use_merge && self.last_iter_found_new_program && self.merges_due > 0
    }

    #[instrument(skip(self, state, val_loader, evaluator))]
    pub async fn propose<Id, Instance, RolloutOutput, Trajectory, A, L>(
        &mut self,
        state: &State<Id>,
        val_loader: &L,
        evaluator: &A,
    ) -> Result<MergeOutcome<Id>, EngineError>
    where
        Id: Eq + Hash + Clone + std::fmt::Debug,
        A: Adapter<Instance, RolloutOutput, Trajectory>,
        L: DataLoader<Id, Instance>,
    {
        // This attempt consumes one scheduled slot regardless of outcome.
        self.merges_due = self.merges_due.saturating_sub(1);

        let aggregate_scores = state.aggregate_scores_all();
        let dominators = pareto::find_dominator_programs(state.front_members(), &aggregate_scores);
        debug!(dominator_count = dominators.len(), "computed dominator set for this merge attempt");
        if dominators.len() < 2 {
            return Ok(MergeOutcome {
                evaluations_spent: 0,
                proposal: None,
            });
        }

        let mut pairs: Vec<(ProgramIdx, ProgramIdx)> = Vec::new();
        let dominator_list: Vec<ProgramIdx> = dominators.into_iter().collect();
        for i in 0..dominator_list.len() {
            for j in (i + 1)..dominator_list.len() {
                pairs.push((dominator_list[i], dominator_list[j]));
            }
        }
        let mut rng = derive_rng(self.base_seed, &[state.iteration()]);
        pairs.shuffle(&mut rng);

        for &(id1, id2) in pairs.iter().take(MAX_ATTEMPTS) {
            let Some((ancestor, id1, id2)) = self.find_triplet(state, &aggregate_scores, id1, id2) else {
                continue;
            };

            // Reject the pair outright if too few validation ids overlap between them.
            let scores1 = state.sparse_scores(id1);
            let scores2 = state.sparse_scores(id2);
            let common_ids: Vec<Id> = scores1
                .keys()
                .filter(|k| scores2.contains_key(*k))
                .cloned()
                .collect();
            if common_ids.len() < self.val_overlap_floor || common_ids.is_empty() {
                return Ok(MergeOutcome {
                    evaluations_spent: 0,
                    proposal: None,
                });
            }

            // Merge the two descendants against their common ancestor, then skip this
            // attempt if the exact same per-component merge descriptor was already tried.
            let ancestor_candidate = state.candidate(ancestor);
            let c1 = state.candidate(id1);
            let c2 = state.candidate(id2);
            let (child, descriptor) = three_way_merge(ancestor_candidate, c1, c2, aggregate_scores.get(&id1).copied().unwrap_or(f64::MIN), aggregate_scores.get(&id2).copied().unwrap_or(f64::MIN));

            let (norm1, norm2) = if id1.index() <= id2.index() { (id1, id2) } else { (id2, id1) };
            if self
                .attempted_descriptors
                .iter()
                .any(|(a, b, d)| *a == norm1 && *b == norm2 && *d == descriptor)
            {
                return Ok(MergeOutcome {
                    evaluations_spent: 0,
                    proposal: None,
                });
            }
            self.attempted_descriptors.push((norm1, norm2, descriptor));

            let subsample = self.stratified_subsample(&common_ids, state, id1, id2);

            let instances = val_loader
                .fetch(&subsample)
                .await
                .map_err(EngineError::AdapterError)?;
            let eval = evaluator
                .evaluate(&instances, &child, false)
                .await
                .map_err(EngineError::AdapterError)?;
            eval.check_invariants(instances.len())
                .map_err(EngineError::AdapterError)?;

            self.total_merges_tested += 1;
            debug!(subsample_size = subsample.len(), scores_after = ?eval.scores, "merge attempt produced a proposal");

            let scores_before: Vec<f64> = vec![
                subsample.iter().map(|id| scores1.get(id).copied().unwrap_or(0.0)).sum(),
                subsample.iter().map(|id| scores2.get(id).copied().unwrap_or(0.0)).sum(),
            ];

            let mut metadata = IndexMap::new();
            metadata.insert("ancestor".to_string(), serde_json::json!(ancestor.index()));

            return Ok(MergeOutcome {
                evaluations_spent: subsample.len() as u64,
                proposal: Some(Proposal {
                    child,
                    parent_ids: vec![id1, id2],
                    eval_ids: subsample,
                    scores_before,
                    scores_after: eval.scores,
                    tag: "merge",
                    metadata,
                }),
            });
        }

        Ok(MergeOutcome {
            evaluations_spent: 0,
            proposal: None,
        })
    }

    /// Finds and records a usable (ancestor, id1, id2) triplet for one candidate pair,
    /// or `None` if this pair yields nothing: no valid common ancestor, every candidate
    /// ancestor is already dominated by one of the descendants, or the triplet fails
    /// the desirability check.
    fn find_triplet<Id: Eq + Hash + Clone + std::fmt::Debug>(
        &mut self,
        state: &State<Id>,
        aggregate_scores: &IndexMap<ProgramIdx, f64>,
        id1: ProgramIdx,
        id2: ProgramIdx,
    ) -> Option<(ProgramIdx, ProgramIdx, ProgramIdx)> {
        let genealogy = state.genealogy();
        if genealogy::is_ancestor_of(id1, id2, genealogy) || genealogy::is_ancestor_of(id2, id1, genealogy) {
            return None;
        }

        let common = genealogy::common_ancestors(id1, id2, genealogy);
        let score1 = aggregate_scores.get(&id1).copied().unwrap_or(f64::MIN);
        let score2 = aggregate_scores.get(&id2).copied().unwrap_or(f64::MIN);

        let (norm1, norm2) = if id1.index() <= id2.index() { (id1, id2) } else { (id2, id1) };

        let mut filtered: Vec<(ProgramIdx, f64)> = common
            .into_iter()
            .filter(|&ancestor| {
                if self
                    .attempted_triplets
                    .iter()
                    .any(|&(a, b, anc)| a == norm1 && b == norm2 && anc == ancestor)
                {
                    return false;
                }
                let ancestor_score = aggregate_scores.get(&ancestor).copied().unwrap_or(f64::MIN);
                if ancestor_score > score1 || ancestor_score > score2 {
                    return false;
                }
                genealogy::triplet_is_desirable(
                    state.candidate(ancestor),
                    state.candidate(id1),
                    state.candidate(id2),
                )
            })
            .map(|ancestor| (ancestor, aggregate_scores.get(&ancestor).copied().unwrap_or(f64::MIN)))
            .collect();

        if filtered.is_empty() {
            return None;
        }

        filtered.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        let ancestor = filtered[0].0;

        self.attempted_triplets.push((norm1, norm2, ancestor));

        Some((ancestor, id1, id2))
    }

    fn stratified_subsample<Id: Eq + Hash + Clone + std::fmt::Debug>(
        &self,
        common_ids: &[Id],
        state: &State<Id>,
        id1: ProgramIdx,
        id2: ProgramIdx,
    ) -> Vec<Id> {
        let scores1 = state.sparse_scores(id1);
        let scores2 = state.sparse_scores(id2);

        let mut id1_better = Vec::new();
        let mut id2_better = Vec::new();
        let mut tied = Vec::new();
        for id in common_ids {
            let s1 = scores1.get(id).copied().unwrap_or(0.0);
            let s2 = scores2.get(id).copied().unwrap_or(0.0);
            if s1 > s2 {
                id1_better.push(id.clone());
            } else if s2 > s1 {
                id2_better.push(id.clone());
            } else {
                tied.push(id.clone());
            }
        }

        let per_bucket = SUBSAMPLE_SIZE.div_ceil(3);
        let mut subsample: Vec<Id> = Vec::new();
        for bucket in [&id1_better, &id2_better, &tied] {
            subsample.extend(bucket.iter().take(per_bucket).cloned());
        }

        if subsample.len() < SUBSAMPLE_SIZE {
            for id in common_ids {
                if subsample.len() >= SUBSAMPLE_SIZE {
                    break;
                }
                if !subsample.contains(id) {
                    subsample.push(id.clone());
                }
            }
        }

        if subsample.len() < SUBSAMPLE_SIZE && !common_ids.is_empty() {
            warn!("merge.subsample_repeats");
            let mut rng = derive_rng(self.base_seed, &[state.iteration(), id1.index() as u64, id2.index() as u64]);
            while subsample.len() < SUBSAMPLE_SIZE {
                let pick = &common_ids[rng.gen_range(0..common_ids.len())];
                subsample.push(pick.clone());
            }
        }

        subsample
    }
}

/// Merges `id1` and `id2` against their common `ancestor`, component by component:
/// a component only one descendant diverged on takes that descendant's text; a
/// component both diverged on (differently) takes the higher-scoring descendant's
/// text, breaking ties toward `id1`.
fn three_way_merge(
    ancestor: &Candidate,
    id1: &Candidate,
    id2: &Candidate,
    score1: f64,
    score2: f64,
) -> (Candidate, Vec<(String, MergeSource)>) {
    let mut descriptor = Vec::new();
    let mut child = id1.clone();

    for name in ancestor.component_names() {
        let a = ancestor.get(name).unwrap_or_default();
        let c1 = id1.get(name).unwrap_or_default();
        let c2 = id2.get(name).unwrap_or_default();

        let (text, source) = if c1 != c2 && (a == c1) != (a == c2) {
            if a == c1 {
                (c2, MergeSource::Id2)
            } else {
                (c1, MergeSource::Id1)
            }
        } else if a != c1 && a != c2 && c1 != c2 {
            if score1 > score2 {
                (c1, MergeSource::Id1)
            } else if score2 > score1 {
                (c2, MergeSource::Id2)
            } else {
                (c1, MergeSource::Id1)
            }
        } else {
            (c1, MergeSource::Id1)
        };

        child = child.with_component(name, text.to_string());
        descriptor.push((name.to_string(), source));
    }

    (child, descriptor)
}

#[cfg(test)]
mod tests {
    use indexmap::IndexSet;

    use super::*;

    fn candidate(pairs: &[(&str, &str)]) -> Candidate {
        Candidate::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn three_way_merge_resolves_single_component_divergence() {
        let ancestor = candidate(&[("a", "x"), ("b", "y")]);
        let id1 = candidate(&[("a", "x"), ("b", "z")]);
        let id2 = candidate(&[("a", "w"), ("b", "y")]);

        let (child, _) = three_way_merge(&ancestor, &id1, &id2, 0.5, 0.5);
        assert_eq!(child.get("a"), Some("w"));
        assert_eq!(child.get("b"), Some("z"));
    }

    #[test]
    fn three_way_merge_breaks_ties_by_higher_score() {
        let ancestor = candidate(&[("c", "p")]);
        let id1 = candidate(&[("c", "q")]);
        let id2 = candidate(&[("c", "r")]);

        let (child, _) = three_way_merge(&ancestor, &id1, &id2, 0.7, 0.9);
        assert_eq!(child.get("c"), Some("r"));
    }

    #[test]
    fn three_way_merge_defaults_to_id1_on_agreement_or_score_tie() {
        let ancestor = candidate(&[("c", "p")]);
        let id1 = candidate(&[("c", "q")]);
        let id2 = candidate(&[("c", "q")]);
        let (child, _) = three_way_merge(&ancestor, &id1, &id2, 0.5, 0.9);
        assert_eq!(child.get("c"), Some("q"));

        let id1_tie = candidate(&[("c", "q")]);
        let id2_tie = candidate(&[("c", "r")]);
        let (child_tie, _) = three_way_merge(&ancestor, &id1_tie, &id2_tie, 0.5, 0.5);
        assert_eq!(child_tie.get("c"), Some("q"));
    }

    #[tokio::test]
    async fn single_program_pool_yields_no_proposal() {
        let state = State::new(
            candidate(&[("instruction", "x")]),
            [("v1", 0.5)].into_iter().collect(),
            IndexSet::from(["v1"]),
        );

        let mut proposer = MergeProposer::new(true, 5, 5, 42);
        proposer.merges_due = 1;
        proposer.last_iter_found_new_program = true;

        let loader = DummyValLoader;
        let outcome = proposer
            .propose(&state, &loader, &DummyEvaluator)
            .await
            .unwrap();

        assert!(outcome.proposal.is_none());
        assert_eq!(proposer.total_merges_tested(), 0);
    }

    struct DummyValLoader;
    impl DataLoader<&'static str, &'static str> for DummyValLoader {
        fn all_ids(&self) -> &[&'static str] {
            &["v1"]
        }

        async fn fetch(&self, ids: &[&'static str]) -> anyhow::Result<Vec<&'static str>> {
            Ok(ids.to_vec())
        }
    }

    struct DummyEvaluator;
    impl Adapter<&'static str, &'static str, ()> for DummyEvaluator {
        async fn evaluate(
            &self,
            batch: &[&'static str],
            _candidate: &Candidate,
            _capture_traces: bool,
        ) -> anyhow::Result<crate::adapter::EvaluationBatch<&'static str, ()>> {
            Ok(crate::adapter::EvaluationBatch {
                outputs: batch.to_vec(),
                scores: batch.iter().map(|_| 1.0).collect(),
                trajectories: None,
            })
        }

        async fn make_reflective_dataset(
            &self,
            _candidate: &Candidate,
            _eval_batch: &[&'static str],
            _components_to_update: &[String],
        ) -> anyhow::Result<std::collections::HashMap<String, Vec<crate::adapter::Record>>> {
            Ok(std::collections::HashMap::new())
        }
    }
}
