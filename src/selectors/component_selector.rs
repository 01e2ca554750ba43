//! Which component(s) of the selected candidate the reflective proposer rewrites
//! this iteration.

use std::hash::Hash;

use crate::candidate::{Candidate, ProgramIdx};
use crate::state::State;

#[derive(Debug, Clone, Copy)]
pub enum ComponentSelector {
    /// One component per iteration, cycling through the candidate's own component
    /// list in order; cursor position is owned by the program (`State::cursors`).
    RoundRobin,
    /// Every component of the candidate, every iteration.
    All,
}

impl ComponentSelector {
    pub fn select<Id: Eq + Hash + Clone>(
        &self,
        state: &mut State<Id>,
        idx: ProgramIdx,
        candidate: &Candidate,
    ) -> Vec<String> {
        match self {
            Self::All => candidate.component_names().map(str::to_string).collect(),
            Self::RoundRobin => {
                let names: Vec<&str> = candidate.component_names().collect();
                if names.is_empty() {
                    return Vec::new();
                }
                let cursor = state.advance_cursor(idx, names.len());
                vec![names[cursor].to_string()]
            }
        }
    }
}
