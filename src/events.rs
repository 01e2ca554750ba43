//! Transport-agnostic telemetry events and a default tracing-backed sink.

use std::hash::Hash;

use tracing::info;

use crate::candidate::ProgramIdx;
use crate::state::FrontSnapshot;

/// One emitted engine event. `#[non_exhaustive]` — new variants may be added without
/// breaking sinks that already match exhaustively-with-a-wildcard.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Event<Id> {
    /// Emitted once, at startup, after the seed has been evaluated (or loaded).
    BaseProgramMetrics {
        seed_aggregate_score: f64,
        validation_coverage: usize,
        iteration: u64,
    },
    /// Emitted once per admitted program.
    IterationComplete {
        iteration: u64,
        new_program: ProgramIdx,
        evaluated_ids: Vec<Id>,
        front: FrontSnapshot<Id>,
        best_aggregate_score: f64,
        best_program: ProgramIdx,
        discovery_budget: u64,
    },
    /// Emitted once, when the run ends (stop condition, graceful stop, or error).
    Terminal {
        iteration: u64,
        total_evaluations: u64,
        pool_size: usize,
    },
}

/// Receives engine events. The core only names events and payloads; transport is
/// entirely the sink's concern.
pub trait EventSink<Id> {
    fn emit(&self, event: Event<Id>);
}

/// Default sink: logs each event at `info` via `tracing`. Never constructed
/// implicitly by library code — callers opt in explicitly.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl<Id: Eq + Hash + Clone + std::fmt::Debug> EventSink<Id> for TracingEventSink {
    fn emit(&self, event: Event<Id>) {
        match event {
            Event::BaseProgramMetrics {
                seed_aggregate_score,
                validation_coverage,
                iteration,
            } => {
                info!(
                    seed_aggregate_score,
                    validation_coverage, iteration, "base program metrics"
                );
            }
            Event::IterationComplete {
                iteration,
                new_program,
                evaluated_ids,
                best_aggregate_score,
                best_program,
                discovery_budget,
                ..
            } => {
                info!(
                    iteration,
                    %new_program,
                    evaluated = evaluated_ids.len(),
                    best_aggregate_score,
                    %best_program,
                    discovery_budget,
                    "iteration complete"
                );
            }
            Event::Terminal {
                iteration,
                total_evaluations,
                pool_size,
            } => {
                info!(iteration, total_evaluations, pool_size, "run terminated");
            }
        }
    }
}
