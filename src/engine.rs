//! Orchestrates the loop, persistence, acceptance, and proposer scheduling.

use std::fmt::Debug;
use std::hash::Hash;

use indexmap::IndexMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{error, info, instrument, warn};

use crate::adapter::Adapter;
use crate::candidate::Candidate;
use crate::config::{BatchSamplerVariant, RunConfig};
use crate::data::DataLoader;
use crate::error::EngineError;
use crate::eval_policy::IncrementalProgress;
use crate::events::{Event, EventSink};
use crate::lm::ReflectionLm;
use crate::persistence;
use crate::proposer::Proposal;
use crate::proposer::merge::MergeProposer;
use crate::proposer::reflective::ReflectiveMutationProposer;
use crate::selectors::BatchSampler;
use crate::state::State;

pub struct Engine<Id, TrainId, Instance, RolloutOutput, Trajectory, A, LM, TL, VL>
where
    Id: Eq + Hash + Clone + Debug,
{
    state: State<Id>,
    config: RunConfig,
    adapter: A,
    reflection_lm: LM,
    trainset: TL,
    valset: VL,
    reflective: ReflectiveMutationProposer,
    merge: MergeProposer,
    incremental_progress: IncrementalProgress<Id>,
    event_sink: Box<dyn EventSink<Id>>,
    stop_requested: bool,
    _marker: std::marker::PhantomData<(Instance, RolloutOutput, Trajectory, TrainId)>,
}

impl<Id, TrainId, Instance, RolloutOutput, Trajectory, A, LM, TL, VL>
    Engine<Id, TrainId, Instance, RolloutOutput, Trajectory, A, LM, TL, VL>
where
    Id: Eq + Hash + Clone + Debug + Serialize + DeserializeOwned,
    TrainId: Eq + Hash + Clone,
    A: Adapter<Instance, RolloutOutput, Trajectory>,
    RolloutOutput: Serialize,
    LM: ReflectionLm,
    TL: DataLoader<TrainId, Instance>,
    VL: DataLoader<Id, Instance>,
{
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        config: RunConfig,
        seed_candidate: Candidate,
        adapter: A,
        reflection_lm: LM,
        trainset: TL,
        valset: VL,
        event_sink: Box<dyn EventSink<Id>>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let state_path = config
            .run_dir
            .as_ref()
            .map(|dir| dir.join(&config.state_file));

        let loaded = match &state_path {
            Some(path) => persistence::load::<Id>(path)?,
            None => None,
        };

        let state = match loaded {
            Some(state) => state,
            None => {
                let all_ids = valset.all_ids().to_vec();
                let instances = valset
                    .fetch(&all_ids)
                    .await
                    .map_err(EngineError::AdapterError)?;
                let result = adapter
                    .evaluate(&instances, &seed_candidate, false)
                    .await
                    .map_err(EngineError::AdapterError)?;
                result
                    .check_invariants(instances.len())
                    .map_err(EngineError::AdapterError)?;

                let sparse_scores: IndexMap<Id, f64> =
                    all_ids.iter().cloned().zip(result.scores.iter().copied()).collect();
                let valid_ids = all_ids.into_iter().collect();
                State::new(seed_candidate, sparse_scores, valid_ids)
            }
        };

        let base_score = state
            .aggregate_score(crate::candidate::ProgramIdx(0))
            .unwrap_or(0.0);
        event_sink.emit(Event::BaseProgramMetrics {
            seed_aggregate_score: base_score,
            validation_coverage: state.sparse_scores(crate::candidate::ProgramIdx(0)).len(),
            iteration: state.iteration().max(1),
        });

        let batch_sampler = match config.batch_sampler {
            BatchSamplerVariant::Simple => BatchSampler::simple_circular(config.reflection_minibatch_size),
            BatchSamplerVariant::EpochShuffled => {
                BatchSampler::epoch_shuffled(config.seed, config.reflection_minibatch_size)
            }
        };

        let reflective = ReflectiveMutationProposer {
            candidate_selector: config.candidate_selector,
            component_selector: config.module_selector,
            batch_sampler,
            perfect_score: config.perfect_score,
            skip_perfect_score: config.skip_perfect_score,
            base_seed: config.seed,
        };

        let merge = MergeProposer::new(
            config.use_merge,
            config.max_merge_invocations,
            config.merge_val_overlap_floor,
            config.seed,
        );

        Ok(Self {
            state,
            config,
            adapter,
            reflection_lm,
            trainset,
            valset,
            reflective,
            merge,
            incremental_progress: IncrementalProgress::new(),
            event_sink,
            stop_requested: false,
            _marker: std::marker::PhantomData,
        })
    }

    /// Sets the cooperative stop flag consulted by `should_stop`. Observed between
    /// iterations, never mid-call.
    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn state(&self) -> &State<Id> {
        &self.state
    }

    fn should_stop(&mut self) -> bool {
        if self.stop_requested {
            return true;
        }
        let state = &self.state;
        self.config
            .stop_conditions
            .iter_mut()
            .any(|condition| condition.should_stop(state))
    }

    /// Runs iterations until a stop condition fires, returning the final state.
    #[instrument(skip(self))]
    pub async fn run(&mut self) -> Result<(), EngineError> {
        while !self.should_stop() {
            if let Err(err) = self.run_iteration().await {
                error!(error = %err, "iteration failed");
                // Only adapter/proposal failures are swallow-eligible; configuration and
                // persistence errors always propagate regardless of raise_on_exception.
                if !err.is_adapter_class() || self.config.raise_on_exception {
                    self.terminate()?;
                    return Err(err);
                }
                warn!("swallowed adapter-class error, advancing to next iteration");
            }
        }
        self.terminate()
    }

    async fn run_iteration(&mut self) -> Result<(), EngineError> {
        if let Some(dir) = &self.config.run_dir {
            let path = dir.join(&self.config.state_file);
            persistence::save(&self.state, &path)?;
            if persistence::stop_file_present(&dir.join(&self.config.stop_file_name)) {
                self.stop_requested = true;
                return Ok(());
            }
        }

        self.state.advance_iteration();

        let mut merge_ran = false;
        if self.merge.ready_to_propose() {
            let outcome = self
                .merge
                .propose(&self.state, &self.valset, &self.adapter)
                .await?;
            self.state.add_evaluations(outcome.evaluations_spent);

            if let Some(proposal) = outcome.proposal {
                merge_ran = true;
                let max_before = proposal
                    .scores_before
                    .iter()
                    .cloned()
                    .fold(f64::NEG_INFINITY, f64::max);
                if proposal.scores_after_sum() >= max_before {
                    self.full_eval_and_admit(proposal.child, proposal.parent_ids).await?;
                }
            }
        }

        if !merge_ran {
            let outcome = self
                .reflective
                .propose(&mut self.state, &self.trainset, &self.adapter, &self.reflection_lm)
                .await?;
            self.state.add_evaluations(outcome.evaluations_spent);

            if let Some(proposal) = outcome.proposal {
                if proposal.scores_after_sum() > proposal.scores_before_sum() {
                    self.full_eval_and_admit(proposal.child, proposal.parent_ids).await?;
                    self.merge.schedule();
                }
            }
        }

        Ok(())
    }

    async fn full_eval_and_admit(
        &mut self,
        child: Candidate,
        parent_ids: Vec<crate::candidate::ProgramIdx>,
    ) -> Result<(), EngineError> {
        let discovery_budget = self.state.total_evaluations();

        // First pass: the policy's initial sample (the whole valset, for the Full
        // policy). An Incremental policy may widen this to the full valset below
        // once the partial aggregate clears its threshold.
        let mut eval_ids = self.config.val_evaluation_policy.get_eval_batch(
            &self.valset,
            &mut self.incremental_progress,
            None,
        );
        let instances = self
            .valset
            .fetch(&eval_ids)
            .await
            .map_err(EngineError::AdapterError)?;
        let result = self
            .adapter
            .evaluate(&instances, &child, false)
            .await
            .map_err(EngineError::AdapterError)?;
        result
            .check_invariants(instances.len())
            .map_err(EngineError::AdapterError)?;

        self.state.add_evaluations(eval_ids.len() as u64);

        let mut scores = result.scores;
        let mut outputs = result.outputs;
        let partial_aggregate = scores.iter().sum::<f64>() / scores.len().max(1) as f64;

        if self
            .config
            .val_evaluation_policy
            .should_escalate_to_full(partial_aggregate)
        {
            let remaining_ids: Vec<Id> = self
                .valset
                .all_ids()
                .iter()
                .filter(|id| !eval_ids.contains(id))
                .cloned()
                .collect();

            if !remaining_ids.is_empty() {
                let remaining_instances = self
                    .valset
                    .fetch(&remaining_ids)
                    .await
                    .map_err(EngineError::AdapterError)?;
                let remaining_result = self
                    .adapter
                    .evaluate(&remaining_instances, &child, false)
                    .await
                    .map_err(EngineError::AdapterError)?;
                remaining_result
                    .check_invariants(remaining_instances.len())
                    .map_err(EngineError::AdapterError)?;

                self.state.add_evaluations(remaining_ids.len() as u64);
                scores.extend(remaining_result.scores);
                outputs.extend(remaining_result.outputs);
                eval_ids.extend(remaining_ids);
            }
        }

        if eval_ids.len() == self.valset.len() {
            self.state.add_full_validation_eval();
        }

        // Snapshot the pre-admission front best for every id this program was just
        // scored on, so that after admitting we can tell which ids it newly leads —
        // the trigger for the best-output tracker below.
        let previous_best: IndexMap<Id, f64> = eval_ids
            .iter()
            .filter_map(|id| self.state.front_best().get(id).map(|&s| (id.clone(), s)))
            .collect();

        let sparse_scores: IndexMap<Id, f64> =
            eval_ids.iter().cloned().zip(scores.iter().copied()).collect();

        let new_idx = self.state.admit(parent_ids, child, sparse_scores, discovery_budget)?;

        if self.config.track_best_outputs {
            if let Some(run_dir) = self.config.run_dir.clone() {
                for (id, output) in eval_ids.iter().zip(outputs.iter()) {
                    let became_sole_best = match previous_best.get(id) {
                        Some(&prev) => self
                            .state
                            .front_best()
                            .get(id)
                            .is_some_and(|&now| now > prev),
                        None => true,
                    };
                    if became_sole_best {
                        persistence::save_best_output(
                            &run_dir,
                            id,
                            self.state.iteration(),
                            new_idx,
                            output,
                        )?;
                    }
                }
            }
        }

        let best_program = self.config.val_evaluation_policy.get_best_program(&self.state)?;
        let best_aggregate_score = self.config.val_evaluation_policy.get_valset_score(best_program, &self.state)?;
        let aggregate_score = self.state.aggregate_score(new_idx)?;
        let evaluated_ids: Vec<Id> = self.state.sparse_scores(new_idx).keys().cloned().collect();

        info!(%new_idx, aggregate_score, "admitted new program");
        self.event_sink.emit(Event::IterationComplete {
            iteration: self.state.iteration(),
            new_program: new_idx,
            evaluated_ids,
            front: self.state.front_snapshot(),
            best_aggregate_score,
            best_program,
            discovery_budget,
        });

        Ok(())
    }

    fn terminate(&mut self) -> Result<(), EngineError> {
        if let Some(dir) = &self.config.run_dir {
            let path = dir.join(&self.config.state_file);
            persistence::save(&self.state, &path)?;
        }
        self.event_sink.emit(Event::Terminal {
            iteration: self.state.iteration(),
            total_evaluations: self.state.total_evaluations(),
            pool_size: self.state.len(),
        });
        Ok(())
    }
}
