//! A genetic-Pareto (GEPA) optimizer for text-valued program components.
//!
//! The core loop alternates between two proposers — reflective mutation (rewrite one
//! component of a selected program using execution feedback) and merge (three-way
//! textual merge of two Pareto-dominating descendants) — admitting a child only when
//! it clears the proposer's acceptance rule on a validation set. State (the candidate
//! pool, per-example Pareto fronts, and the genealogy DAG) is mutated through a single
//! path, [`state::State::admit`]; everything else about the run — data access,
//! execution, reflection, selection, stopping, and persistence — is a pluggable
//! capability the caller supplies.

pub mod adapter;
pub mod candidate;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod eval_policy;
pub mod events;
pub mod lm;
pub mod persistence;
pub mod proposer;
pub mod rng;
pub mod selectors;
pub mod state;
pub mod stop;
pub mod telemetry;

pub use adapter::{Adapter, EvaluationBatch, Record};
pub use candidate::{Candidate, ProgramIdx};
pub use config::RunConfig;
pub use data::{DataLoader, InMemoryDataLoader};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use eval_policy::EvaluationPolicy;
pub use events::{Event, EventSink, TracingEventSink};
pub use lm::ReflectionLm;
pub use selectors::{BatchSampler, CandidateSelector, ComponentSelector};
pub use state::State;
pub use stop::StopCondition;
pub use telemetry::init_tracing;
