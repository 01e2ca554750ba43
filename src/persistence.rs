//! Schema-versioned state persistence and the stop-file mechanism.
//!
//! On disk, state is a small envelope `{"schema_version": N, ...}` so a loader can
//! dispatch on the version before touching the rest of the payload. Exactly one
//! migration is defined today: legacy list-indexed sparse scores (a `Vec<Option<f64>>`
//! aligned against an ordered `valid_ids` list) migrate forward to the current
//! map-keyed `IndexMap<Id, f64>` representation.

use std::fmt::Debug;
use std::hash::Hash;
use std::path::Path;

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::candidate::{Candidate, ProgramIdx};
use crate::error::EngineError;
use crate::state::State;

const CURRENT_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SchemaProbe {
    schema_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateV2<Id>
where
    Id: Eq + Hash,
{
    schema_version: u32,
    saved_at: DateTime<Utc>,
    candidates: Vec<Candidate>,
    parents: Vec<Vec<ProgramIdx>>,
    sparse_scores: Vec<IndexMap<Id, f64>>,
    discovery_budgets: Vec<u64>,
    cursors: Vec<usize>,
    valid_validation_ids: IndexSet<Id>,
    iteration: u64,
    total_evaluations: u64,
    full_validation_evals: u64,
}

/// Legacy on-disk shape: sparse scores as `Vec<Option<f64>>`, one slot per id in
/// `valid_ids`' fixed order, rather than a sparse id-keyed map.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StateV1<Id> {
    schema_version: u32,
    candidates: Vec<Candidate>,
    parents: Vec<Vec<ProgramIdx>>,
    sparse_scores: Vec<Vec<Option<f64>>>,
    valid_ids: Vec<Id>,
    discovery_budgets: Vec<u64>,
    cursors: Vec<usize>,
    iteration: u64,
    total_evaluations: u64,
    full_validation_evals: u64,
}

fn io_err(path: &Path, source: impl Into<anyhow::Error>) -> EngineError {
    EngineError::PersistenceError {
        path: path.display().to_string(),
        source: source.into(),
    }
}

/// Serializes `state` to `path` at the current schema version.
pub fn save<Id>(state: &State<Id>, path: &Path) -> Result<(), EngineError>
where
    Id: Eq + Hash + Clone + Debug + Serialize + DeserializeOwned,
{
    let snapshot = StateV2 {
        schema_version: CURRENT_SCHEMA_VERSION,
        saved_at: Utc::now(),
        candidates: state.candidates().to_vec(),
        parents: state.genealogy().to_vec(),
        sparse_scores: state.sparse_scores_all().to_vec(),
        discovery_budgets: state.discovery_budgets().to_vec(),
        cursors: state.cursors().to_vec(),
        valid_validation_ids: state.valid_validation_ids().clone(),
        iteration: state.iteration(),
        total_evaluations: state.total_evaluations(),
        full_validation_evals: state.full_validation_evals(),
    };

    let bytes = serde_json::to_vec_pretty(&snapshot).map_err(|e| io_err(path, e))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(path, e))?;
    }
    std::fs::write(path, bytes).map_err(|e| io_err(path, e))?;
    Ok(())
}

/// Loads state from `path`, migrating forward if it was written by an older schema.
/// Returns `Ok(None)` if no file exists at `path` (a fresh run).
pub fn load<Id>(path: &Path) -> Result<Option<State<Id>>, EngineError>
where
    Id: Eq + Hash + Clone + Debug + Serialize + DeserializeOwned,
{
    if !path.exists() {
        return Ok(None);
    }

    let bytes = std::fs::read(path).map_err(|e| io_err(path, e))?;
    let probe: SchemaProbe = serde_json::from_slice(&bytes).map_err(|e| io_err(path, e))?;

    let state = match probe.schema_version {
        1 => {
            let legacy: StateV1<Id> = serde_json::from_slice(&bytes).map_err(|e| io_err(path, e))?;
            migrate_v1_to_v2(legacy)
        }
        CURRENT_SCHEMA_VERSION => {
            let current: StateV2<Id> = serde_json::from_slice(&bytes).map_err(|e| io_err(path, e))?;
            from_v2(current)
        }
        other => {
            return Err(io_err(
                path,
                anyhow::anyhow!("unsupported state schema version {other}"),
            ));
        }
    };

    Ok(Some(state))
}

fn from_v2<Id>(v2: StateV2<Id>) -> State<Id>
where
    Id: Eq + Hash + Clone + Debug,
{
    State::rebuild_from_parts(
        v2.candidates,
        v2.parents,
        v2.sparse_scores,
        v2.discovery_budgets,
        v2.cursors,
        v2.valid_validation_ids,
        v2.iteration,
        v2.total_evaluations,
        v2.full_validation_evals,
    )
}

fn migrate_v1_to_v2<Id>(legacy: StateV1<Id>) -> State<Id>
where
    Id: Eq + Hash + Clone + Debug,
{
    let sparse_scores: Vec<IndexMap<Id, f64>> = legacy
        .sparse_scores
        .into_iter()
        .map(|slots| {
            slots
                .into_iter()
                .zip(legacy.valid_ids.iter().cloned())
                .filter_map(|(score, id)| score.map(|s| (id, s)))
                .collect()
        })
        .collect();

    State::rebuild_from_parts(
        legacy.candidates,
        legacy.parents,
        sparse_scores,
        legacy.discovery_budgets,
        legacy.cursors,
        legacy.valid_ids.into_iter().collect(),
        legacy.iteration,
        legacy.total_evaluations,
        legacy.full_validation_evals,
    )
}

/// True iff a stop file exists at `path`. Checked at the top of each iteration;
/// finding one present is the caller's cue to exit gracefully instead of proposing
/// another candidate.
pub fn stop_file_present(path: &Path) -> bool {
    path.exists()
}

/// Writes one tracked "best output" snapshot under
/// `{run_dir}/best_outputs_valset/task_{id}/iter_{iteration}_prog_{program}.json`.
///
/// `id`'s `Debug` rendering is used as the directory label, with path separators
/// scrubbed so it can't escape `best_outputs_valset`.
pub fn save_best_output<Id, Output>(
    run_dir: &Path,
    id: &Id,
    iteration: u64,
    program: ProgramIdx,
    output: &Output,
) -> Result<(), EngineError>
where
    Id: Debug,
    Output: Serialize,
{
    let id_label = format!("{id:?}").replace(['/', '\\'], "_");
    let task_dir = run_dir.join("best_outputs_valset").join(format!("task_{id_label}"));
    std::fs::create_dir_all(&task_dir).map_err(|e| io_err(&task_dir, e))?;

    let path = task_dir.join(format!("iter_{iteration}_prog_{}.json", program.index()));
    let bytes = serde_json::to_vec_pretty(output).map_err(|e| io_err(&path, e))?;
    std::fs::write(&path, bytes).map_err(|e| io_err(&path, e))?;
    Ok(())
}
