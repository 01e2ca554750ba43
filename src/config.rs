//! Run configuration surface.

use std::path::PathBuf;

use bon::Builder;

use crate::error::EngineError;
use crate::eval_policy::EvaluationPolicy;
use crate::selectors::{CandidateSelector, ComponentSelector};
use crate::stop::StopCondition;

/// Which training-batch sampling strategy to build; the sampler itself also needs
/// `seed` and `reflection_minibatch_size`, so the engine constructs it from these
/// three config fields together rather than storing a ready-made [`crate::selectors::BatchSampler`].
#[derive(Debug, Clone, Copy, Default)]
pub enum BatchSamplerVariant {
    Simple,
    #[default]
    EpochShuffled,
}

/// Everything the engine needs that isn't a generic resource (adapter, loaders,
/// reflection LM, seed candidate) — those are passed directly to
/// [`crate::engine::Engine::new`] since they carry the run's type parameters.
#[derive(Debug, Clone, Builder)]
pub struct RunConfig {
    #[builder(default = CandidateSelector::Pareto)]
    pub candidate_selector: CandidateSelector,

    #[builder(default = ComponentSelector::RoundRobin)]
    pub module_selector: ComponentSelector,

    #[builder(default)]
    pub batch_sampler: BatchSamplerVariant,

    #[builder(default = 3)]
    pub reflection_minibatch_size: usize,

    #[builder(default = 1.0)]
    pub perfect_score: f64,

    #[builder(default = true)]
    pub skip_perfect_score: bool,

    #[builder(default = false)]
    pub use_merge: bool,

    #[builder(default = 5)]
    pub max_merge_invocations: u64,

    #[builder(default = 5)]
    pub merge_val_overlap_floor: usize,

    #[builder(default = EvaluationPolicy::Full)]
    pub val_evaluation_policy: EvaluationPolicy,

    pub stop_conditions: Vec<StopCondition>,

    #[builder(default = None)]
    pub run_dir: Option<PathBuf>,

    #[builder(default = "state.json".to_string())]
    pub state_file: String,

    #[builder(default = "stop".to_string())]
    pub stop_file_name: String,

    #[builder(default = 0)]
    pub seed: u64,

    #[builder(default = true)]
    pub raise_on_exception: bool,

    #[builder(default = false)]
    pub track_best_outputs: bool,
}

impl RunConfig {
    /// Startup-only validation. Called once by [`crate::engine::Engine::new`]
    /// before anything else runs.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.stop_conditions.is_empty() {
            return Err(EngineError::InvalidConfiguration {
                reason: "at least one stop condition must be provided".to_string(),
            });
        }

        if let CandidateSelector::EpsilonGreedy { epsilon } = self.candidate_selector {
            if !(0.0..=1.0).contains(&epsilon) {
                return Err(EngineError::InvalidConfiguration {
                    reason: format!("epsilon-greedy probability must be in [0, 1], got {epsilon}"),
                });
            }
        }

        if self.use_merge && self.merge_val_overlap_floor == 0 {
            return Err(EngineError::InvalidConfiguration {
                reason: "merge_val_overlap_floor must be non-zero when use_merge is enabled"
                    .to_string(),
            });
        }

        if let EvaluationPolicy::Incremental(cfg) = &self.val_evaluation_policy {
            if cfg.initial > cfg.max {
                return Err(EngineError::InvalidConfiguration {
                    reason: format!(
                        "incremental eval policy: initial ({}) must not exceed max ({})",
                        cfg.initial, cfg.max
                    ),
                });
            }
            if cfg.increment == 0 {
                return Err(EngineError::InvalidConfiguration {
                    reason: "incremental eval policy: increment must be greater than zero"
                        .to_string(),
                });
            }
        }

        Ok(())
    }
}
