//! End-to-end coverage of the ambient run-dir behavior: state persisted every
//! iteration, a run resumable from its own checkpoint, and graceful stop via a
//! stop file. Exercised only through the public crate API.

use std::collections::HashMap;
use std::fs;

use gepa_core::{
    Adapter, Candidate, EvaluationBatch, Engine, InMemoryDataLoader, Record, ReflectionLm,
    RunConfig, StopCondition, TracingEventSink,
};

#[derive(Clone)]
struct Row {
    answer: &'static str,
}

struct ContainsAdapter;
impl Adapter<Row, String, ()> for ContainsAdapter {
    async fn evaluate(
        &self,
        batch: &[Row],
        candidate: &Candidate,
        _capture_traces: bool,
    ) -> anyhow::Result<EvaluationBatch<String, ()>> {
        let text = candidate.get("instruction").unwrap_or_default().to_string();
        let scores = batch
            .iter()
            .map(|row| if text.contains(row.answer) { 1.0 } else { 0.0 })
            .collect::<Vec<_>>();
        Ok(EvaluationBatch {
            outputs: batch.iter().map(|_| text.clone()).collect(),
            scores,
            trajectories: None,
        })
    }

    async fn make_reflective_dataset(
        &self,
        _candidate: &Candidate,
        _eval_batch: &[Row],
        components_to_update: &[String],
    ) -> anyhow::Result<HashMap<String, Vec<Record>>> {
        Ok(components_to_update
            .iter()
            .map(|c| (c.clone(), vec![Record::new()]))
            .collect())
    }
}

struct EchoLm;
impl ReflectionLm for EchoLm {
    async fn prompt(&self, _prompt: String) -> anyhow::Result<String> {
        Ok("```\nb\n```".to_string())
    }
}

/// Rewrites the instruction to contain the trainset's answer, guaranteeing the
/// reflective proposer's strict acceptance rule (`sum(after) > sum(before)`) fires.
struct RewriteToA;
impl ReflectionLm for RewriteToA {
    async fn prompt(&self, _prompt: String) -> anyhow::Result<String> {
        Ok("```\na\n```".to_string())
    }
}

fn seed() -> Candidate {
    Candidate::new([("instruction".to_string(), "x".to_string())].into())
}

#[tokio::test]
async fn state_file_is_written_and_reloadable_across_engine_instances() {
    let dir = tempfile::tempdir().unwrap();
    let run_dir = dir.path().to_path_buf();

    let trainset = InMemoryDataLoader::new(vec![Row { answer: "a" }]);
    let valset = InMemoryDataLoader::new(vec![Row { answer: "b" }]);

    let config = RunConfig::builder()
        .stop_conditions(vec![StopCondition::max_metric_calls(8)])
        .run_dir(Some(run_dir.clone()))
        .build();

    let mut engine = Engine::new(
        config,
        seed(),
        ContainsAdapter,
        RewriteToA,
        trainset,
        valset,
        Box::new(TracingEventSink),
    )
    .await
    .unwrap();

    engine.run().await.unwrap();
    assert!(engine.state().len() >= 2, "reflective acceptance should have admitted a child");

    let state_path = run_dir.join("state.json");
    assert!(state_path.exists(), "engine must persist state.json under run_dir");

    let saved = fs::read_to_string(&state_path).unwrap();
    assert!(saved.contains("\"schema_version\""));

    // A fresh engine pointed at the same run_dir resumes from the checkpoint
    // instead of re-evaluating the seed from scratch: pool size and per-program
    // candidates/genealogy must come back exactly as they were saved.
    let trainset2 = InMemoryDataLoader::new(vec![Row { answer: "a" }]);
    let valset2 = InMemoryDataLoader::new(vec![Row { answer: "b" }]);
    let config2 = RunConfig::builder()
        .stop_conditions(vec![StopCondition::max_metric_calls(0)])
        .run_dir(Some(run_dir.clone()))
        .build();

    let resumed = Engine::new(
        config2,
        seed(),
        ContainsAdapter,
        RewriteToA,
        trainset2,
        valset2,
        Box::new(TracingEventSink),
    )
    .await
    .unwrap();

    assert_eq!(resumed.state().len(), engine.state().len());
    for i in 0..engine.state().len() {
        let idx = gepa_core::ProgramIdx(i);
        assert_eq!(resumed.state().candidate(idx), engine.state().candidate(idx));
        assert_eq!(resumed.state().parents_of(idx), engine.state().parents_of(idx));
    }
}

#[tokio::test]
async fn track_best_outputs_writes_a_snapshot_when_a_program_becomes_sole_best() {
    let dir = tempfile::tempdir().unwrap();
    let run_dir = dir.path().to_path_buf();

    // Both train and valset ids reward the same rewritten text, so the admitted
    // child also strictly beats the seed's 0.0 on the validation id itself.
    let trainset = InMemoryDataLoader::new(vec![Row { answer: "a" }]);
    let valset = InMemoryDataLoader::new(vec![Row { answer: "a" }]);

    let config = RunConfig::builder()
        .stop_conditions(vec![StopCondition::max_metric_calls(8)])
        .run_dir(Some(run_dir.clone()))
        .track_best_outputs(true)
        .build();

    let mut engine = Engine::new(
        config,
        seed(),
        ContainsAdapter,
        RewriteToA,
        trainset,
        valset,
        Box::new(TracingEventSink),
    )
    .await
    .unwrap();

    engine.run().await.unwrap();
    assert!(engine.state().len() >= 2, "reflective acceptance should have admitted a child");

    let task_dir = run_dir.join("best_outputs_valset").join("task_0");
    assert!(task_dir.is_dir(), "expected a best-outputs directory for validation id 0");

    let mut snapshots: Vec<_> = fs::read_dir(&task_dir).unwrap().map(|e| e.unwrap().path()).collect();
    assert!(!snapshots.is_empty(), "expected at least one recorded best-output snapshot");

    snapshots.sort();
    let contents = fs::read_to_string(&snapshots[0]).unwrap();
    assert_eq!(contents, "\"a\"");
}

#[tokio::test]
async fn stop_file_present_at_top_of_iteration_halts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let run_dir = dir.path().to_path_buf();
    fs::create_dir_all(&run_dir).unwrap();
    fs::write(run_dir.join("stop"), b"").unwrap();

    let trainset = InMemoryDataLoader::new(vec![Row { answer: "a" }]);
    let valset = InMemoryDataLoader::new(vec![Row { answer: "b" }]);

    // A generous budget that would otherwise let many iterations run; the stop
    // file must win regardless.
    let config = RunConfig::builder()
        .stop_conditions(vec![StopCondition::max_metric_calls(1000)])
        .run_dir(Some(run_dir.clone()))
        .build();

    let mut engine = Engine::new(
        config,
        seed(),
        ContainsAdapter,
        EchoLm,
        trainset,
        valset,
        Box::new(TracingEventSink),
    )
    .await
    .unwrap();

    engine.run().await.unwrap();

    // Only the seed program was ever admitted: the stop file fired before any
    // proposal could be evaluated and accepted.
    assert_eq!(engine.state().len(), 1);
}
