//! Execute → reflect → propose: the default instruction-mutation proposer.

use std::collections::HashMap;
use std::hash::Hash;

use indexmap::IndexMap;
use tracing::{debug, instrument};

use crate::adapter::Adapter;
use crate::data::DataLoader;
use crate::error::EngineError;
use crate::lm::{ReflectionLm, default_propose_new_texts};
use crate::rng::derive_rng;
use crate::selectors::{BatchSampler, CandidateSelector, ComponentSelector};
use crate::state::State;

use super::Proposal;

/// What a single reflective-mutation attempt cost and (maybe) produced.
///
/// Evaluation counters live on [`State`], but the proposer only has read access to
/// it — so the traced and verification evaluations this attempt spent are reported
/// back for the engine to apply, even when no proposal results (the perfect-score
/// gate still spends them).
pub struct ReflectiveOutcome<TrainId> {
    pub evaluations_spent: u64,
    pub proposal: Option<Proposal<TrainId>>,
}

pub struct ReflectiveMutationProposer {
    pub candidate_selector: CandidateSelector,
    pub component_selector: ComponentSelector,
    pub batch_sampler: BatchSampler,
    pub perfect_score: f64,
    pub skip_perfect_score: bool,
    pub base_seed: u64,
}

impl ReflectiveMutationProposer {
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, state, loader, adapter, lm))]
    pub async fn propose<Id, TrainId, DataInstance, RolloutOutput, Trajectory, A, LM, L>(
        &mut self,
        state: &mut State<Id>,
        loader: &L,
        adapter: &A,
        lm: &LM,
    ) -> Result<ReflectiveOutcome<TrainId>, EngineError>
    where
        Id: Eq + Hash + Clone + std::fmt::Debug,
        TrainId: Eq + Hash + Clone,
        A: Adapter<DataInstance, RolloutOutput, Trajectory>,
        LM: ReflectionLm,
        L: DataLoader<TrainId, DataInstance>,
    {
        let mut select_rng = derive_rng(self.base_seed, &[state.iteration(), 1]);
        let parent_idx = self.candidate_selector.select(state, &mut select_rng)?;
        let parent_candidate = state.candidate(parent_idx).clone();

        let universe = loader.all_ids();
        if universe.is_empty() {
            return Err(EngineError::InvalidConfiguration {
                reason: "reflective-mutation proposer requires a non-empty training set"
                    .to_string(),
            });
        }
        let batch_indices = self.batch_sampler.next_batch_indices(universe.len());
        let batch_ids: Vec<TrainId> = batch_indices.iter().map(|&i| universe[i].clone()).collect();
        debug!(minibatch_size = batch_ids.len(), "drew training minibatch");
        let instances = adapter_loader_fetch(loader, &batch_ids).await?;

        let traced = adapter
            .evaluate(&instances, &parent_candidate, true)
            .await
            .map_err(EngineError::AdapterError)?;
        traced
            .check_invariants(instances.len())
            .map_err(EngineError::AdapterError)?;
        let spent_so_far = instances.len() as u64;

        if self.skip_perfect_score && traced.scores.iter().all(|&s| s >= self.perfect_score) {
            return Ok(ReflectiveOutcome {
                evaluations_spent: spent_so_far,
                proposal: None,
            });
        }

        // The round-robin cursor is per-program bookkeeping (not part of the
        // pool/front/genealogy `admit` protects) so the component selector is
        // allowed to advance it directly on `state`.
        let components_to_update = self
            .component_selector
            .select(state, parent_idx, &parent_candidate);

        let reflective_dataset = adapter
            .make_reflective_dataset(&parent_candidate, &instances, &components_to_update)
            .await
            .map_err(EngineError::AdapterError)?;
        if reflective_dataset.len() != components_to_update.len() {
            return Err(EngineError::ProposalError {
                reason: format!(
                    "make_reflective_dataset returned {} entries, expected one per requested component ({})",
                    reflective_dataset.len(),
                    components_to_update.len()
                ),
            });
        }

        let custom = adapter
            .propose_new_texts(&parent_candidate, &reflective_dataset, &components_to_update)
            .await
            .map_err(EngineError::AdapterError)?;
        let new_texts = match custom {
            Some(texts) => {
                let mut expected: Vec<&String> = components_to_update.iter().collect();
                let mut got: Vec<&String> = texts.keys().collect();
                expected.sort();
                got.sort();
                if expected != got {
                    return Err(EngineError::ProposalError {
                        reason: "custom propose_new_texts returned a different key set than requested".to_string(),
                    });
                }
                texts
            }
            None => {
                let current_texts: HashMap<String, String> = components_to_update
                    .iter()
                    .map(|name| {
                        (
                            name.clone(),
                            parent_candidate.get(name).unwrap_or_default().to_string(),
                        )
                    })
                    .collect();
                default_propose_new_texts(lm, &current_texts, &reflective_dataset, &components_to_update)
                    .await?
            }
        };

        let mut child = parent_candidate.clone();
        for (name, text) in &new_texts {
            child = child.with_component(name, text.clone());
        }

        let verified = adapter
            .evaluate(&instances, &child, false)
            .await
            .map_err(EngineError::AdapterError)?;
        verified
            .check_invariants(instances.len())
            .map_err(EngineError::AdapterError)?;
        let total_spent = spent_so_far + instances.len() as u64;

        debug!(scores_after = ?verified.scores, "reflective mutation produced a proposal");
        Ok(ReflectiveOutcome {
            evaluations_spent: total_spent,
            proposal: Some(Proposal {
                child,
                parent_ids: vec![parent_idx],
                eval_ids: batch_ids,
                scores_before: traced.scores,
                scores_after: verified.scores,
                tag: "reflective_mutation",
                metadata: IndexMap::new(),
            }),
        })
    }
}

async fn adapter_loader_fetch<Id, Instance>(
    loader: &impl DataLoader<Id, Instance>,
    ids: &[Id],
) -> Result<Vec<Instance>, EngineError>
where
    Id: Clone,
{
    loader.fetch(ids).await.map_err(EngineError::AdapterError)
}

#[cfg(test)]
mod tests {
    use indexmap::IndexSet;

    use super::*;
    use crate::adapter::{EvaluationBatch, Record};
    use crate::candidate::{Candidate, ProgramIdx};
    use crate::data::InMemoryDataLoader;

    #[derive(Clone)]
    struct Item {
        answer: &'static str,
    }

    struct EchoAdapter;
    impl Adapter<Item, String, ()> for EchoAdapter {
        async fn evaluate(
            &self,
            batch: &[Item],
            candidate: &Candidate,
            _capture_traces: bool,
        ) -> anyhow::Result<EvaluationBatch<String, ()>> {
            let text = candidate.get("instruction").unwrap_or_default().to_string();
            let scores = batch
                .iter()
                .map(|item| if text.contains(item.answer) { 1.0 } else { 0.0 })
                .collect::<Vec<_>>();
            Ok(EvaluationBatch {
                outputs: batch.iter().map(|_| text.clone()).collect(),
                scores,
                trajectories: None,
            })
        }

        async fn make_reflective_dataset(
            &self,
            _candidate: &Candidate,
            _eval_batch: &[Item],
            components_to_update: &[String],
        ) -> anyhow::Result<HashMap<String, Vec<Record>>> {
            Ok(components_to_update
                .iter()
                .map(|c| (c.clone(), vec![Record::new()]))
                .collect())
        }
    }

    struct EchoLm;
    impl ReflectionLm for EchoLm {
        async fn prompt(&self, _prompt: String) -> anyhow::Result<String> {
            Ok("```\nanswer\n```".to_string())
        }
    }

    #[tokio::test]
    async fn perfect_score_gate_skips_proposal_but_reports_spend() {
        let candidate = Candidate::new([("instruction".to_string(), "answer".to_string())].into());
        let mut state = State::new(
            candidate,
            [("v1", 1.0)].into_iter().collect(),
            IndexSet::from(["v1"]),
        );
        let loader = InMemoryDataLoader::new(vec![Item { answer: "answer" }]);

        let mut proposer = ReflectiveMutationProposer {
            candidate_selector: CandidateSelector::CurrentBest,
            component_selector: ComponentSelector::RoundRobin,
            batch_sampler: BatchSampler::simple_circular(1),
            perfect_score: 1.0,
            skip_perfect_score: true,
            base_seed: 42,
        };

        let outcome = proposer
            .propose::<_, usize, _, _, _, _, _, _>(&mut state, &loader, &EchoAdapter, &EchoLm)
            .await
            .unwrap();

        assert!(outcome.proposal.is_none());
        assert_eq!(outcome.evaluations_spent, 1);
    }

    #[tokio::test]
    async fn imperfect_score_produces_a_proposal() {
        let candidate = Candidate::new([("instruction".to_string(), "wrong".to_string())].into());
        let mut state = State::new(
            candidate,
            [("v1", 0.0)].into_iter().collect(),
            IndexSet::from(["v1"]),
        );
        let loader = InMemoryDataLoader::new(vec![Item { answer: "answer" }]);

        let mut proposer = ReflectiveMutationProposer {
            candidate_selector: CandidateSelector::CurrentBest,
            component_selector: ComponentSelector::RoundRobin,
            batch_sampler: BatchSampler::simple_circular(1),
            perfect_score: 1.0,
            skip_perfect_score: true,
            base_seed: 42,
        };

        let outcome = proposer
            .propose::<_, usize, _, _, _, _, _, _>(&mut state, &loader, &EchoAdapter, &EchoLm)
            .await
            .unwrap();

        let proposal = outcome.proposal.expect("should propose a rewritten candidate");
        assert_eq!(proposal.parent_ids, vec![ProgramIdx(0)]);
        assert_eq!(proposal.tag, "reflective_mutation");
        assert_eq!(proposal.scores_after, vec![1.0]);
    }
}
