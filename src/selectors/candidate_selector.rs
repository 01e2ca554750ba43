//! Which program in the pool becomes this iteration's parent.

use std::hash::Hash;

use rand::Rng;
use rand::rngs::StdRng;

use crate::candidate::ProgramIdx;
use crate::error::EngineError;
use crate::state::State;

/// A closed set of strategies, so this is a plain enum rather than a trait object.
#[derive(Debug, Clone, Copy)]
pub enum CandidateSelector {
    /// Frequency-weighted sampling over the dominator set.
    Pareto,
    /// The single highest-aggregate-score program, ties broken by validation
    /// coverage (more scored ids wins) and then by earlier admission order.
    CurrentBest,
    /// With probability `epsilon`, pick uniformly at random from the whole pool;
    /// otherwise fall back to [`CandidateSelector::Pareto`].
    EpsilonGreedy { epsilon: f64 },
}

impl CandidateSelector {
    pub fn select<Id: Eq + Hash + Clone + std::fmt::Debug>(
        &self,
        state: &State<Id>,
        rng: &mut StdRng,
    ) -> Result<ProgramIdx, EngineError> {
        match self {
            Self::Pareto => pareto_select(state, rng),
            Self::CurrentBest => current_best(state),
            Self::EpsilonGreedy { epsilon } => {
                if rng.gen::<f64>() < *epsilon {
                    let idx = rng.gen_range(0..state.len());
                    Ok(ProgramIdx(idx))
                } else {
                    pareto_select(state, rng)
                }
            }
        }
    }
}

fn pareto_select<Id: Eq + Hash + Clone + std::fmt::Debug>(
    state: &State<Id>,
    rng: &mut StdRng,
) -> Result<ProgramIdx, EngineError> {
    let aggregate = state.aggregate_scores_all();
    crate::state::pareto::frequency_weighted_selection(state.front_members(), &aggregate, rng)
        .ok_or_else(|| EngineError::InvalidConfiguration {
            reason: "pareto candidate selection found no program on any front".to_string(),
        })
}

fn current_best<Id: Eq + Hash + Clone + std::fmt::Debug>(
    state: &State<Id>,
) -> Result<ProgramIdx, EngineError> {
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
            reason: "current-best candidate selection found no scored program in the pool"
                .to_string(),
        })
}
