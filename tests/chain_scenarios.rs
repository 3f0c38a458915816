//! 链路状态机场景测试（暂停时钟，所有外部能力均为桩实现）

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use quiz_chain_solver::models::{ChainStatus, Provenance, SessionSnapshot, Stage, StepOutcome};
use quiz_chain_solver::SessionDispatcher;
use tokio_test::assert_ok;
use uuid::Uuid;

#[tokio::test(start_paused = true)]
async fn test_single_question_success() {
    let renderer = StubRenderer::new();
    let submitter = ScriptedSubmitter::new(vec![StepOutcome::Complete]);
    let driver = driver(
        settings(),
        renderer.clone(),
        StubReasoner::answering("Paris"),
        FailingSource::new(),
        submitter.clone(),
    );

    let snapshot = driver.run(Uuid::new_v4(), START_URL).await;

    assert_eq!(snapshot.status, ChainStatus::Succeeded);
    assert_eq!(snapshot.steps.len(), 1);
    assert_eq!(snapshot.steps[0].index, 1);
    assert_eq!(snapshot.steps[0].page_url, START_URL);
    assert_eq!(snapshot.steps[0].outcome, StepOutcome::Complete);
    assert_eq!(snapshot.steps[0].provenance, Provenance::Model);
    assert_eq!(snapshot.steps[0].answer, "\"Paris\"");
    assert_eq!(submitter.calls(), 1);
    assert_eq!(renderer.stats.closed.load(Ordering::SeqCst), 1);
    assert!(snapshot.finished_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_bare_arithmetic_is_answered_without_model() {
    let renderer = StubRenderer::with_prompt("What is 2+2?");
    let reasoner = StubReasoner::answering("5");
    let submitter = ScriptedSubmitter::new(vec![StepOutcome::Complete]);
    let driver = driver(
        settings(),
        renderer.clone(),
        reasoner.clone(),
        FailingSource::new(),
        submitter.clone(),
    );

    let snapshot = driver.run(Uuid::new_v4(), START_URL).await;

    assert_eq!(snapshot.status, ChainStatus::Succeeded);
    assert_eq!(snapshot.steps.len(), 1);
    assert_eq!(snapshot.steps[0].answer, "4");
    assert_eq!(snapshot.steps[0].provenance, Provenance::Deterministic);
    assert!(reasoner.prompts().is_empty());
    assert_eq!(submitter.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_three_step_chain_follows_next_urls() {
    let renderer = StubRenderer::new();
    let submitter = ScriptedSubmitter::new(vec![advance_to(2), advance_to(3), StepOutcome::Complete]);
    let driver = driver(
        settings(),
        renderer.clone(),
        StubReasoner::answering("Paris"),
        FailingSource::new(),
        submitter,
    );

    let snapshot = driver.run(Uuid::new_v4(), START_URL).await;

    assert_eq!(snapshot.status, ChainStatus::Succeeded);
    let urls: Vec<&str> = snapshot.steps.iter().map(|s| s.page_url.as_str()).collect();
    assert_eq!(urls, vec![step_url(1), step_url(2), step_url(3)]);
    let indices: Vec<usize> = snapshot.steps.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![1, 2, 3]);
    assert_eq!(snapshot.current_url, step_url(3));
}

#[tokio::test(start_paused = true)]
async fn test_renderer_timeout_fails_render_stage_without_records() {
    let renderer = StubRenderer::failing(usize::MAX);
    let submitter = ScriptedSubmitter::new(vec![StepOutcome::Complete]);
    let driver = driver(
        settings(),
        renderer.clone(),
        StubReasoner::answering("Paris"),
        FailingSource::new(),
        submitter.clone(),
    );

    let snapshot = driver.run(Uuid::new_v4(), START_URL).await;

    assert!(matches!(snapshot.status, ChainStatus::Failed { stage: Stage::Render, .. }));
    assert!(snapshot.steps.is_empty());
    assert_eq!(submitter.calls(), 0);
    // 首次 + 重试一次
    assert_eq!(renderer.stats.renders.load(Ordering::SeqCst), 2);
    assert_eq!(renderer.stats.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_renderer_fails_render_stage() {
    let renderer = StubRenderer::hanging(Duration::from_secs(3600));
    let submitter = ScriptedSubmitter::new(vec![StepOutcome::Complete]);
    let driver = driver(
        settings(),
        renderer.clone(),
        StubReasoner::answering("Paris"),
        FailingSource::new(),
        submitter.clone(),
    );

    let started = tokio::time::Instant::now();
    let snapshot = driver.run(Uuid::new_v4(), START_URL).await;

    assert!(matches!(snapshot.status, ChainStatus::Failed { stage: Stage::Render, .. }));
    assert!(snapshot.steps.is_empty());
    assert_eq!(submitter.calls(), 0);
    assert_eq!(renderer.stats.renders.load(Ordering::SeqCst), 2);
    assert_eq!(renderer.stats.closed.load(Ordering::SeqCst), 1);
    // 两次各等满 render_timeout
    assert!(started.elapsed() >= Duration::from_secs(60));
    assert!(started.elapsed() < Duration::from_secs(170));
}

#[tokio::test(start_paused = true)]
async fn test_render_failure_is_retried_once() {
    let renderer = StubRenderer::failing(1);
    let driver = driver(
        settings(),
        renderer.clone(),
        StubReasoner::answering("Paris"),
        FailingSource::new(),
        ScriptedSubmitter::new(vec![StepOutcome::Complete]),
    );

    let snapshot = driver.run(Uuid::new_v4(), START_URL).await;

    assert_eq!(snapshot.status, ChainStatus::Succeeded);
    assert_eq!(renderer.stats.renders.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_tiny_budget_times_out_without_submitting() {
    let mut settings = settings();
    settings.budget = Duration::from_secs(1);

    let submitter = ScriptedSubmitter::new(vec![StepOutcome::Complete]);
    let renderer = StubRenderer::new();
    let driver = driver(
        settings,
        renderer.clone(),
        StubReasoner::answering("Paris"),
        FailingSource::new(),
        submitter.clone(),
    );

    let snapshot = driver.run(Uuid::new_v4(), START_URL).await;

    assert_eq!(snapshot.status, ChainStatus::TimedOut);
    assert!(snapshot.steps.is_empty());
    assert_eq!(submitter.calls(), 0);
    assert_eq!(renderer.stats.renders.load(Ordering::SeqCst), 0);
    assert_eq!(renderer.stats.opened.load(Ordering::SeqCst), 0);
    assert_eq!(renderer.stats.closed.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejection_on_second_step_fails_chain() {
    let submitter = ScriptedSubmitter::new(vec![
        advance_to(2),
        StepOutcome::Rejected("Wrong capital".into()),
        StepOutcome::Complete,
    ]);
    let driver = driver(
        settings(),
        StubRenderer::new(),
        StubReasoner::answering("Lyon"),
        FailingSource::new(),
        submitter.clone(),
    );

    let snapshot = driver.run(Uuid::new_v4(), START_URL).await;

    match &snapshot.status {
        ChainStatus::Failed { stage, reason } => {
            assert_eq!(*stage, Stage::Submit);
            assert!(reason.contains("Wrong capital"));
        }
        other => panic!("期望 Failed，实际: {:?}", other),
    }
    assert_eq!(snapshot.steps.len(), 2);
    assert!(!snapshot.steps[0].outcome.is_rejected());
    assert!(snapshot.steps[1].outcome.is_rejected());
    assert_eq!(submitter.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_always_advance_hits_step_limit() {
    let mut settings = settings();
    settings.max_steps = 5;

    let driver = driver(
        settings,
        StubRenderer::new(),
        StubReasoner::answering("Paris"),
        FailingSource::new(),
        ScriptedSubmitter::always_advance(),
    );

    let snapshot = driver.run(Uuid::new_v4(), START_URL).await;

    assert!(matches!(snapshot.status, ChainStatus::Failed { stage: Stage::StepLimit, .. }));
    assert_eq!(snapshot.steps.len(), 5);
    assert!(snapshot.steps.windows(2).all(|w| w[0].index < w[1].index));
    assert!(snapshot.steps.windows(2).all(|w| w[0].elapsed_ms <= w[1].elapsed_ms));
}

#[tokio::test(start_paused = true)]
async fn test_acquisition_failure_does_not_abort_chain() {
    let source = FailingSource::new();
    let reasoner = StubReasoner::answering("Paris");
    let driver = driver(
        settings(),
        StubRenderer::with_data(),
        reasoner.clone(),
        source.clone(),
        ScriptedSubmitter::new(vec![StepOutcome::Complete]),
    );

    let snapshot = driver.run(Uuid::new_v4(), START_URL).await;

    assert_eq!(snapshot.status, ChainStatus::Succeeded);
    assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    let prompt = &reasoner.prompts()[0].user;
    assert!(prompt.contains("unavailable"));
    assert!(prompt.contains("sales.csv"));
}

#[tokio::test(start_paused = true)]
async fn test_slow_reasoner_hits_chain_deadline() {
    let mut settings = settings();
    settings.budget = Duration::from_secs(30);
    settings.step_reserve = Duration::from_secs(5);

    let submitter = ScriptedSubmitter::new(vec![StepOutcome::Complete]);
    let driver = driver(
        settings,
        StubRenderer::new(),
        StubReasoner::slow("Paris", Duration::from_secs(300)),
        FailingSource::new(),
        submitter.clone(),
    );

    let started = tokio::time::Instant::now();
    let snapshot = driver.run(Uuid::new_v4(), START_URL).await;

    assert_eq!(snapshot.status, ChainStatus::TimedOut);
    assert_eq!(submitter.calls(), 0);
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert!(started.elapsed() < Duration::from_secs(31));
}

#[tokio::test(start_paused = true)]
async fn test_stage_cap_below_budget_is_stage_failure() {
    let mut settings = settings();
    settings.derive_timeout = Duration::from_secs(5);

    let driver = driver(
        settings,
        StubRenderer::new(),
        StubReasoner::slow("Paris", Duration::from_secs(300)),
        FailingSource::new(),
        ScriptedSubmitter::new(vec![StepOutcome::Complete]),
    );

    let snapshot = driver.run(Uuid::new_v4(), START_URL).await;

    assert!(matches!(snapshot.status, ChainStatus::Failed { stage: Stage::Derive, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_answer_retry_with_feedback() {
    let mut settings = settings();
    settings.allow_answer_retry = true;
    settings.max_answer_retries = 1;

    let reasoner = StubReasoner::answering("Paris");
    let submitter = ScriptedSubmitter::new(vec![
        StepOutcome::Rejected("Use the official name".into()),
        StepOutcome::Complete,
    ]);
    let driver = driver(
        settings,
        StubRenderer::new(),
        reasoner.clone(),
        FailingSource::new(),
        submitter.clone(),
    );

    let snapshot = driver.run(Uuid::new_v4(), START_URL).await;

    assert_eq!(snapshot.status, ChainStatus::Succeeded);
    assert_eq!(snapshot.steps.len(), 2);
    assert!(snapshot.steps[0].outcome.is_rejected());
    assert_eq!(snapshot.steps[1].outcome, StepOutcome::Complete);
    assert_eq!(snapshot.steps[0].page_url, snapshot.steps[1].page_url);

    let prompts = reasoner.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].user.contains("Use the official name"));
}

#[tokio::test(start_paused = true)]
async fn test_answer_retry_exhausted_fails() {
    let mut settings = settings();
    settings.allow_answer_retry = true;
    settings.max_answer_retries = 2;

    let submitter = ScriptedSubmitter::new(vec![
        StepOutcome::Rejected("no".into()),
        StepOutcome::Rejected("still no".into()),
        StepOutcome::Rejected("nope".into()),
    ]);
    let driver = driver(
        settings,
        StubRenderer::new(),
        StubReasoner::answering("Paris"),
        FailingSource::new(),
        submitter.clone(),
    );

    let snapshot = driver.run(Uuid::new_v4(), START_URL).await;

    assert!(matches!(snapshot.status, ChainStatus::Failed { stage: Stage::Submit, .. }));
    assert_eq!(snapshot.steps.len(), 3);
    assert_eq!(submitter.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_budget_matches_settings() {
    let driver = driver(
        settings(),
        StubRenderer::new(),
        StubReasoner::answering("Paris"),
        FailingSource::new(),
        ScriptedSubmitter::new(vec![StepOutcome::Complete]),
    );

    let snapshot = driver.run(Uuid::new_v4(), START_URL).await;

    assert_eq!(snapshot.budget_ms, 170_000);
    let json = assert_ok!(serde_json::to_value(&snapshot));
    assert_eq!(json["status"]["state"], "succeeded");
}

#[tokio::test(start_paused = true)]
async fn test_panic_inside_step_still_closes_tab() {
    let renderer = StubRenderer::new();
    let driver = driver(
        settings(),
        renderer.clone(),
        StubReasoner::answering("Paris"),
        FailingSource::new(),
        Arc::new(PanickingSubmitter),
    );

    let snapshot = driver.run(Uuid::new_v4(), START_URL).await;

    match &snapshot.status {
        ChainStatus::Failed { stage, reason } => {
            assert_eq!(*stage, Stage::Internal);
            assert!(reason.contains("submitter blew up"));
        }
        other => panic!("期望 Failed(internal)，实际: {:?}", other),
    }
    assert_eq!(renderer.stats.opened.load(Ordering::SeqCst), 1);
    assert_eq!(renderer.stats.closed.load(Ordering::SeqCst), 1);
    assert!(snapshot.finished_at.is_some());
}

async fn wait_terminal(dispatcher: &SessionDispatcher, id: &Uuid) -> SessionSnapshot {
    loop {
        if let Some(snapshot) = dispatcher.snapshot(id).await {
            if snapshot.status.is_terminal() {
                return snapshot;
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_queued_session_budget_counts_from_dispatch() {
    let mut settings = settings();
    settings.budget = Duration::from_secs(100);
    settings.step_reserve = Duration::from_secs(60);
    settings.derive_timeout = Duration::from_secs(200);

    let renderer = StubRenderer::new();
    let submitter = ScriptedSubmitter::new(vec![StepOutcome::Complete, StepOutcome::Complete]);
    let driver = driver(
        settings,
        renderer.clone(),
        StubReasoner::slow("Paris", Duration::from_secs(45)),
        FailingSource::new(),
        submitter.clone(),
    );
    // 同一时刻只允许一条链路运行
    let dispatcher = SessionDispatcher::new(Arc::new(driver), 1);

    let first = dispatcher.dispatch(START_URL.to_string()).await;
    let second = dispatcher.dispatch(START_URL.to_string()).await;

    let first = wait_terminal(&dispatcher, &first).await;
    let second = wait_terminal(&dispatcher, &second).await;

    assert_eq!(first.status, ChainStatus::Succeeded);
    // 拿到许可时只剩 55s，不足 60s 的预留
    assert_eq!(second.status, ChainStatus::TimedOut);
    assert!(second.steps.is_empty());
    assert_eq!(submitter.calls(), 1);
    assert_eq!(renderer.stats.opened.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dispatcher_keeps_only_recent_finished_sessions() {
    let driver = driver(
        settings(),
        StubRenderer::new(),
        StubReasoner::answering("Paris"),
        FailingSource::new(),
        ScriptedSubmitter::new(vec![StepOutcome::Complete, StepOutcome::Complete]),
    );
    let dispatcher = SessionDispatcher::new(Arc::new(driver), 1).with_retention(1);

    let first = dispatcher.dispatch(START_URL.to_string()).await;
    wait_terminal(&dispatcher, &first).await;
    let second = dispatcher.dispatch(START_URL.to_string()).await;
    wait_terminal(&dispatcher, &second).await;

    assert!(dispatcher.snapshot(&first).await.is_none());
    assert_eq!(dispatcher.counts().await.succeeded, 1);
}
