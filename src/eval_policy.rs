//! How many validation ids a program gets scored on, and how "best" is reported.

use std::collections::HashMap;
use std::hash::Hash;

use crate::candidate::ProgramIdx;
use crate::data::DataLoader;
use crate::error::EngineError;
use crate::state::State;

/// Bookkeeping an [`EvaluationPolicy::Incremental`] needs across visits to the same
/// program — which ids it has already scored, so the next visit can return the union
/// plus a fresh increment rather than re-sampling from scratch.
#[derive(Debug, Clone, Default)]
pub struct IncrementalProgress<Id: Eq + Hash> {
    evaluated: HashMap<ProgramIdx, Vec<Id>>,
}

impl<Id: Eq + Hash + Clone> IncrementalProgress<Id> {
    pub fn new() -> Self {
        Self {
            evaluated: HashMap::new(),
        }
    }

    fn record(&mut self, idx: ProgramIdx, ids: &[Id]) {
        let entry = self.evaluated.entry(idx).or_default();
        for id in ids {
            if !entry.contains(id) {
                entry.push(id.clone());
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IncrementalConfig {
    pub initial: usize,
    pub increment: usize,
    pub max: usize,
    pub threshold: f64,
}

#[derive(Debug, Clone)]
pub enum EvaluationPolicy {
    Full,
    Incremental(IncrementalConfig),
}

impl EvaluationPolicy {
    /// The validation ids to evaluate for `program_idx` on this visit.
    ///
    /// `program_idx = None` means "a brand-new child, not yet admitted" — incremental
    /// policy treats that the same as a first visit (an empty evaluated set).
    pub fn get_eval_batch<Id, Instance>(
        &self,
        loader: &impl DataLoader<Id, Instance>,
        progress: &mut IncrementalProgress<Id>,
        program_idx: Option<ProgramIdx>,
    ) -> Vec<Id>
    where
        Id: Eq + Hash + Clone,
    {
        match self {
            Self::Full => loader.all_ids().to_vec(),
            Self::Incremental(cfg) => {
                let already: Vec<Id> = program_idx
                    .and_then(|idx| progress.evaluated.get(&idx))
                    .cloned()
                    .unwrap_or_default();

                let all_ids = loader.all_ids();
                let remaining: Vec<&Id> = all_ids
                    .iter()
                    .filter(|id| !already.contains(id))
                    .collect();

                let target_new = if already.is_empty() {
                    cfg.initial
                } else {
                    cfg.increment
                };
                let cap = cfg.max.saturating_sub(already.len());
                let take = target_new.min(cap).min(remaining.len());

                let mut batch = already.clone();
                batch.extend(remaining.into_iter().take(take).cloned());

                if let Some(idx) = program_idx {
                    progress.record(idx, &batch);
                }

                batch
            }
        }
    }

    /// Whether a program's current partial aggregate warrants escalating straight to
    /// a full validation sweep (incremental only; full is always "at max" already).
    pub fn should_escalate_to_full(&self, partial_aggregate: f64) -> bool {
        match self {
            Self::Full => false,
            Self::Incremental(cfg) => partial_aggregate >= cfg.threshold,
        }
    }

    pub fn get_best_program<Id>(&self, state: &State<Id>) -> Result<ProgramIdx, EngineError>
    where
        Id: Eq + Hash + Clone + std::fmt::Debug,
    {
        let mut best: Option<(ProgramIdx, f64, usize)> = None;

        for i in 0..state.len() {
            let idx = ProgramIdx(i);
            let Ok(score) = state.aggregate_score(idx) else {
                continue;
            };
            let coverage = state.sparse_scores(idx).len();

            let replace = match best {
                None => true,
                Some((_, best_score, best_coverage)) => {
                    score > best_score || (score == best_score && coverage > best_coverage)
                }
            };
            if replace {
                best = Some((idx, score, coverage));
            }
        }

        best.map(|(idx, _, _)| idx)
            .ok_or_else(|| EngineError::InvalidConfiguration {
                reason: "get_best_program found no scored program in the pool".to_string(),
            })
    }

    pub fn get_valset_score<Id>(
        &self,
        program_idx: ProgramIdx,
        state: &State<Id>,
    ) -> Result<f64, EngineError>
    where
        Id: Eq + Hash + Clone + std::fmt::Debug,
    {
        state.aggregate_score(program_idx)
    }
}
