//! Composable stop predicates over state. At least one must be configured.

use std::hash::Hash;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::persistence;
use crate::state::State;

#[derive(Debug, Clone, Copy)]
pub enum CompositeMode {
    Any,
    All,
}

/// A closed set of stop predicates, composable via [`StopCondition::Composite`].
/// `NoImprovement` and `Timeout` carry their own small mutable tracking state —
/// owned by the condition itself, consistent with how strategy state is handled
/// elsewhere (batch-sampler cursors, merge dedup log).
#[derive(Debug, Clone)]
pub enum StopCondition {
    MaxMetricCalls(u64),
    Timeout {
        start: Instant,
        duration: Duration,
    },
    NoImprovement {
        patience: u64,
        best_seen: Option<f64>,
        iterations_since_improvement: u64,
    },
    FileStop(PathBuf),
    ScoreThreshold(f64),
    Composite(CompositeMode, Vec<StopCondition>),
}

impl StopCondition {
    pub fn max_metric_calls(n: u64) -> Self {
        Self::MaxMetricCalls(n)
    }

    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout {
            start: Instant::now(),
            duration,
        }
    }

    pub fn no_improvement(patience: u64) -> Self {
        Self::NoImprovement {
            patience,
            best_seen: None,
            iterations_since_improvement: 0,
        }
    }

    pub fn file_stop(path: PathBuf) -> Self {
        Self::FileStop(path)
    }

    pub fn score_threshold(s: f64) -> Self {
        Self::ScoreThreshold(s)
    }

    /// Evaluates this condition (and recurses into composites), mutating any
    /// internal tracking state (e.g. `NoImprovement`'s counter) along the way.
    pub fn should_stop<Id>(&mut self, state: &State<Id>) -> bool
    where
        Id: Eq + Hash + Clone + std::fmt::Debug,
    {
        match self {
            Self::MaxMetricCalls(n) => state.total_evaluations() >= *n,
            Self::Timeout { start, duration } => start.elapsed() >= *duration,
            Self::FileStop(path) => persistence::stop_file_present(path),
            Self::ScoreThreshold(threshold) => {
                best_aggregate_score(state).is_some_and(|best| best >= *threshold)
            }
            Self::NoImprovement {
                patience,
                best_seen,
                iterations_since_improvement,
            } => {
                match best_aggregate_score(state) {
                    Some(current) => {
                        let improved = best_seen.is_none_or(|prev| current > prev);
                        if improved {
                            *best_seen = Some(current);
                            *iterations_since_improvement = 0;
                        } else {
                            *iterations_since_improvement += 1;
                        }
                    }
                    None => *iterations_since_improvement += 1,
                }
                *iterations_since_improvement >= *patience
            }
            Self::Composite(mode, conditions) => {
                let results: Vec<bool> = conditions.iter_mut().map(|c| c.should_stop(state)).collect();
                match mode {
                    CompositeMode::Any => results.into_iter().any(|b| b),
                    CompositeMode::All => !results.is_empty() && results.into_iter().all(|b| b),
                }
            }
        }
    }
}

fn best_aggregate_score<Id>(state: &State<Id>) -> Option<f64>
where
    Id: Eq + Hash + Clone + std::fmt::Debug,
{
    (0..state.len())
        .filter_map(|i| state.aggregate_score(crate::candidate::ProgramIdx(i)).ok())
        .fold(None, |acc, score| match acc {
            None => Some(score),
            Some(best) if score > best => Some(score),
            acc => acc,
        })
}
