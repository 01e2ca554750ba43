//! Error taxonomy for the optimization engine.
//!
//! `EngineError` is the public enum every fallible entry point returns. Adapter and
//! proposal failures wrap an opaque [`anyhow::Error`] — the engine only needs to know
//! *that* they failed and whether to re-raise, not their concrete shape.

use thiserror::Error;

use crate::candidate::ProgramIdx;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("persistence failure at `{path}`")]
    PersistenceError {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("unknown data id referenced while admitting program")]
    UnknownDataId,

    #[error("invalid parent {parent:?} while admitting program (pool size {pool_size})")]
    InvalidParent {
        parent: ProgramIdx,
        pool_size: usize,
    },

    #[error("adapter call failed")]
    AdapterError(#[source] anyhow::Error),

    #[error("proposal generation failed: {reason}")]
    ProposalError { reason: String },
}

impl EngineError {
    /// `ProposalError` and `AdapterError` share fatal-vs-swallowable handling in the
    /// engine loop — a proposal-generation failure is treated the same as an adapter
    /// failure for `raise_on_exception` purposes.
    pub fn is_adapter_class(&self) -> bool {
        matches!(self, Self::AdapterError(_) | Self::ProposalError { .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
