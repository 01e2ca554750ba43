//! The two proposer strategies and the shared proposal shape the engine accepts or
//! rejects.

pub mod merge;
pub mod reflective;

use indexmap::IndexMap;
use serde_json::Value;

use crate::candidate::{Candidate, ProgramIdx};

/// A tentative new program, not yet admitted. The engine decides acceptance by
/// comparing `scores_before`/`scores_after` under a proposer-specific rule: strict
/// sum improvement for `"reflective_mutation"`, `sum(after) >= max(before)` for
/// `"merge"`.
#[derive(Debug, Clone)]
pub struct Proposal<EvalId> {
    pub child: Candidate,
    pub parent_ids: Vec<ProgramIdx>,
    pub eval_ids: Vec<EvalId>,
    pub scores_before: Vec<f64>,
    pub scores_after: Vec<f64>,
    pub tag: &'static str,
    pub metadata: IndexMap<String, Value>,
}

impl<EvalId> Proposal<EvalId> {
    pub fn scores_before_sum(&self) -> f64 {
        self.scores_before.iter().sum()
    }

    pub fn scores_after_sum(&self) -> f64 {
        self.scores_after.iter().sum()
    }
}
