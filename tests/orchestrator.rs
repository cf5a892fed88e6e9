//! Orchestrator Integration Tests
//!
//! Stage sequencing, failure policies, fallbacks, run budget and
//! cancellation, all against fake providers.

mod common;

use std::time::Duration;

use clipforge::core::{
    ChannelSpec, DeliveryFanout, FailurePolicy, Orchestrator, RunLimits, StageKind,
};
use clipforge::domain::{Payload, RunStatus, StageStatus};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use common::{
    spec, spec_with_timeout, stage, text, ChannelBehavior, FakeChannel, FakeProvider, FourStages,
};

const PROMPT: &str = "Create a high-energy 15-second script about the future of AI.";

fn orchestrator(stages: Vec<clipforge::core::Stage>) -> Orchestrator {
    Orchestrator::new("short", stages).unwrap().with_prompt(PROMPT)
}

#[tokio::test]
async fn test_happy_path_completes() {
    let fakes = FourStages::healthy();
    let orchestrator = orchestrator(fakes.stages(FailurePolicy::Optional));

    let run = orchestrator
        .run_pipeline(None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.stages.len(), 4);
    assert!(run.stages.iter().all(|s| s.status == StageStatus::Success));

    let video = run.final_artifact().unwrap();
    assert_eq!(video.payload, Payload::Video(vec![0xFF, 0xD8, 0xFF]));

    // The prompt feeds the script; the script feeds visuals and voice
    assert_eq!(fakes.script.inputs(), vec![Some(PROMPT.to_string())]);
    assert_eq!(fakes.voice.inputs(), vec![Some("The future of AI is now.".to_string())]);
    assert_eq!(fakes.visuals.inputs(), vec![Some("The future of AI is now.".to_string())]);
}

#[tokio::test]
async fn test_caller_prompt_overrides_pipeline_prompt() {
    let fakes = FourStages::healthy();
    let orchestrator = orchestrator(fakes.stages(FailurePolicy::Optional));

    orchestrator
        .run_pipeline(Some("cats in space"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(fakes.script.inputs(), vec![Some("cats in space".to_string())]);
}

#[tokio::test]
async fn test_stage_prompt_template_wraps_upstream_text() {
    let fakes = FourStages::healthy();
    let mut stages = fakes.stages(FailurePolicy::Optional);
    stages[1] = stages[1].clone().with_prompt("Vertical poster for: {input}");

    orchestrator(stages)
        .run_pipeline(None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        fakes.visuals.inputs(),
        vec![Some("Vertical poster for: The future of AI is now.".to_string())]
    );
}

#[tokio::test]
async fn test_critical_failure_stops_the_run() {
    let fakes = FourStages {
        visuals: FakeProvider::fatal(),
        ..FourStages::healthy()
    };
    let orchestrator = orchestrator(fakes.stages(FailurePolicy::Critical));

    let run = orchestrator
        .run_pipeline(None, &CancellationToken::new())
        .await
        .unwrap();

    match &run.status {
        RunStatus::Aborted { stage, reason } => {
            assert_eq!(stage.as_deref(), Some("visuals"));
            assert_eq!(reason, "all 1 providers failed");
        }
        other => panic!("expected aborted run, got {:?}", other),
    }
    assert_eq!(run.stages.len(), 2);
    assert_eq!(run.stages[1].status, StageStatus::Failed);
    assert_eq!(fakes.voice.calls(), 0);
    assert_eq!(fakes.compose.calls(), 0);
    assert!(run.final_artifact().is_none());
}

#[tokio::test]
async fn test_optional_failure_uses_fallback() {
    let fakes = FourStages {
        visuals: FakeProvider::transient(),
        ..FourStages::healthy()
    };
    let mut stages = fakes.stages(FailurePolicy::Optional);
    stages[1] = stages[1]
        .clone()
        .with_fallback(Payload::Image(vec![1, 2, 3]))
        .unwrap();

    let run = orchestrator(stages)
        .run_pipeline(None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Degraded);
    let visuals = run.stage("visuals").unwrap();
    assert_eq!(visuals.status, StageStatus::Degraded);
    assert_eq!(visuals.attempts.len(), 1);
    assert!(visuals.reason.is_some());

    // Compose saw the fallback image
    assert_eq!(run.final_artifact().unwrap().payload, Payload::Video(vec![1, 2, 3]));
}

#[tokio::test]
async fn test_optional_failure_without_fallback_starves_compose() {
    let fakes = FourStages {
        visuals: FakeProvider::transient(),
        ..FourStages::healthy()
    };

    let run = orchestrator(fakes.stages(FailurePolicy::Optional))
        .run_pipeline(None, &CancellationToken::new())
        .await
        .unwrap();

    match &run.status {
        RunStatus::Aborted { stage, reason } => {
            assert_eq!(stage.as_deref(), Some("compose"));
            assert_eq!(reason, "missing required image input");
        }
        other => panic!("expected aborted run, got {:?}", other),
    }
    assert_eq!(run.stage("visuals").unwrap().status, StageStatus::Failed);
    assert_eq!(run.stage("voice").unwrap().status, StageStatus::Success);
    assert_eq!(fakes.compose.calls(), 0);
}

#[tokio::test]
async fn test_missing_narration_degrades_but_still_composes() {
    let fakes = FourStages {
        voice: FakeProvider::fatal(),
        ..FourStages::healthy()
    };

    let run = orchestrator(fakes.stages(FailurePolicy::Optional))
        .run_pipeline(None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Degraded);
    assert_eq!(run.stage("voice").unwrap().status, StageStatus::Failed);
    assert!(run.final_artifact().is_some());
    assert_eq!(fakes.compose.calls(), 1);
}

#[tokio::test]
async fn test_stage_falls_through_to_backup_provider() {
    let fakes = FourStages::healthy();
    let backup = FakeProvider::ok(Payload::Image(vec![4, 5, 6]));
    let mut stages = fakes.stages(FailurePolicy::Critical);
    stages[1] = stage(
        "visuals",
        StageKind::Visuals,
        FailurePolicy::Critical,
        vec![spec("primary", 0, FakeProvider::transient()), spec("backup", 1, backup.clone())],
    );

    let run = orchestrator(stages)
        .run_pipeline(None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.stage("visuals").unwrap().attempts.len(), 2);
    assert_eq!(backup.calls(), 1);
    assert_eq!(run.final_artifact().unwrap().payload, Payload::Video(vec![4, 5, 6]));
}

#[tokio::test(start_paused = true)]
async fn test_script_timeout_aborts_without_delivery() {
    let fakes = FourStages {
        script: FakeProvider::slow(300, text("too late")),
        ..FourStages::healthy()
    };
    let mut stages = fakes.stages(FailurePolicy::Optional);
    stages[0] = stage(
        "script",
        StageKind::Script,
        FailurePolicy::Critical,
        vec![spec_with_timeout("llm", 0, 5, fakes.script.clone())],
    );

    let channel = FakeChannel::new("youtube", ChannelBehavior::Accept);
    let orchestrator = orchestrator(stages).with_delivery(DeliveryFanout::new(
        Some(ChannelSpec::new(channel.clone(), Duration::from_secs(30))),
        None,
    ));

    let run = orchestrator
        .execute(None, true, &CancellationToken::new())
        .await
        .unwrap();

    assert!(run.is_aborted());
    assert!(!run.was_cancelled());
    assert_eq!(run.stages.len(), 1);
    assert!(run.delivery.is_none());
    assert_eq!(channel.calls(), 0);
    assert_eq!(fakes.visuals.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_mid_run() {
    let fakes = FourStages {
        visuals: FakeProvider::slow(60, Payload::Image(vec![1])),
        ..FourStages::healthy()
    };
    let orchestrator = orchestrator(fakes.stages(FailurePolicy::Optional));

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        }
    });

    let run = orchestrator.run_pipeline(None, &cancel).await.unwrap();

    assert!(run.was_cancelled());
    assert_eq!(
        run.status,
        RunStatus::Aborted {
            stage: Some("visuals".to_string()),
            reason: "cancelled".to_string()
        }
    );
    assert_eq!(fakes.voice.calls(), 0);
    assert_eq!(fakes.compose.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_budget_aborts_even_optional_stages() {
    let fakes = FourStages {
        script: FakeProvider::slow(8, text("The future of AI is now.")),
        visuals: FakeProvider::slow(8, Payload::Image(vec![1])),
        ..FourStages::healthy()
    };
    let limits = RunLimits {
        run_timeout_seconds: 10,
        ..RunLimits::default()
    };
    let orchestrator = orchestrator(fakes.stages(FailurePolicy::Optional)).with_limits(limits);

    let run = orchestrator
        .run_pipeline(None, &CancellationToken::new())
        .await
        .unwrap();

    match &run.status {
        RunStatus::Aborted { stage, reason } => {
            assert_eq!(stage.as_deref(), Some("visuals"));
            assert!(reason.contains("run timeout"), "reason was {}", reason);
        }
        other => panic!("expected aborted run, got {:?}", other),
    }
    assert_eq!(fakes.voice.calls(), 0);
}

#[tokio::test]
async fn test_each_run_gets_its_own_artifacts() {
    let temp = TempDir::new().unwrap();
    let fakes = FourStages::healthy();
    let orchestrator =
        orchestrator(fakes.stages(FailurePolicy::Optional)).with_journal(temp.path());
    let cancel = CancellationToken::new();

    let (first, second) = tokio::join!(
        orchestrator.run_pipeline(None, &cancel),
        orchestrator.run_pipeline(Some("another topic"), &cancel)
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_ne!(first.id, second.id);
    let first_path = first.artifact_path.clone().unwrap();
    let second_path = second.artifact_path.clone().unwrap();
    assert_ne!(first_path, second_path);
    assert!(first_path.starts_with(temp.path().join(first.id.to_string())));
    assert_eq!(std::fs::read(&first_path).unwrap(), vec![0xFF, 0xD8, 0xFF]);

    let replayed = Orchestrator::get_run_status(temp.path(), second.id).await.unwrap();
    assert_eq!(replayed.status, RunStatus::Completed);
    assert_eq!(replayed.stages.len(), 4);
    assert_eq!(replayed.artifact_path, Some(second_path));
}
