//! The user-supplied evaluator: executes a candidate on a batch, turns traces into
//! feedback, and optionally proposes new component texts directly.

use std::collections::HashMap;

use anyhow::Result;
use indexmap::IndexMap;
use serde_json::Value;

use crate::candidate::Candidate;

/// One feedback record handed to the reflection routine. Conventionally carries
/// `"Inputs"`, `"Generated Outputs"`, `"Feedback"` keys, but the core never inspects
/// the keys — only the adapter and the reflection prompt template do.
pub type Record = IndexMap<String, Value>;

/// The result of running a candidate on a batch.
///
/// `outputs`, `scores`, and (when requested) `trajectories` must all have the same
/// length as the input batch and preserve its order — the adapter is trusted to
/// convert per-instance failures into the failure score rather than erroring the
/// whole call.
#[derive(Debug, Clone)]
pub struct EvaluationBatch<RolloutOutput, Trajectory> {
    pub outputs: Vec<RolloutOutput>,
    pub scores: Vec<f64>,
    pub trajectories: Option<Vec<Trajectory>>,
}

impl<RolloutOutput, Trajectory> EvaluationBatch<RolloutOutput, Trajectory> {
    /// Checks the length invariants every adapter response must satisfy.
    pub fn check_invariants(&self, expected_len: usize) -> Result<()> {
        if self.outputs.len() != expected_len || self.scores.len() != expected_len {
            anyhow::bail!(
                "evaluation batch length mismatch: expected {expected_len}, got {} outputs / {} scores",
                self.outputs.len(),
                self.scores.len()
            );
        }
        if let Some(trajectories) = &self.trajectories {
            if trajectories.len() != expected_len {
                anyhow::bail!(
                    "evaluation batch trajectory length mismatch: expected {expected_len}, got {}",
                    trajectories.len()
                );
            }
        }
        Ok(())
    }
}

/// User-implemented evaluator, generic over the opaque data/trace/output types the
/// core never interprets.
#[allow(async_fn_in_trait)]
pub trait Adapter<DataInstance, RolloutOutput, Trajectory>: Send + Sync {
    /// Runs `candidate` over `batch`. Must not mutate `batch`. Higher scores are
    /// better. Individual instance failures become the failure score (0.0 by
    /// convention), never a propagated error.
    async fn evaluate(
        &self,
        batch: &[DataInstance],
        candidate: &Candidate,
        capture_traces: bool,
    ) -> Result<EvaluationBatch<RolloutOutput, Trajectory>>;

    /// Builds the per-component feedback used by the reflective proposer. Must return
    /// exactly one entry per name in `components_to_update`.
    async fn make_reflective_dataset(
        &self,
        candidate: &Candidate,
        eval_batch: &[DataInstance],
        components_to_update: &[String],
    ) -> Result<HashMap<String, Vec<Record>>>;

    /// Optional custom text-proposal hook. Returning `Ok(None)` (the default) tells
    /// the reflective proposer to fall back to the built-in LM round-trip.
    async fn propose_new_texts(
        &self,
        _candidate: &Candidate,
        _reflective_dataset: &HashMap<String, Vec<Record>>,
        _components_to_update: &[String],
    ) -> Result<Option<HashMap<String, String>>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_invariants_accepts_matching_lengths() {
        let batch: EvaluationBatch<&str, &str> = EvaluationBatch {
            outputs: vec!["a", "b"],
            scores: vec![0.1, 0.2],
            trajectories: Some(vec!["t1", "t2"]),
        };
        assert!(batch.check_invariants(2).is_ok());
    }

    #[test]
    fn check_invariants_rejects_length_mismatch() {
        let batch: EvaluationBatch<&str, &str> = EvaluationBatch {
            outputs: vec!["a"],
            scores: vec![0.1, 0.2],
            trajectories: None,
        };
        assert!(batch.check_invariants(2).is_err());
    }
}
