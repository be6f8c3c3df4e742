//! One-shot job tests against the in-memory engine.

use cjbox_core::{AdmissionGate, CoreError, Playground, SessionConfig, StaticProbe};
use cjbox_engine::{EngineError, FailAt, LifecycleManager, MockEngine, MockProcess, SandboxPolicy};
use cjbox_protocol::{FormatResult, JobRequest, JobResult, RunResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

const MIB: u64 = 1024 * 1024;

fn playground(engine: &MockEngine) -> Playground {
    playground_with_memory(engine, 4096 * MIB)
}

fn playground_with_memory(engine: &MockEngine, available: u64) -> Playground {
    let lifecycle = LifecycleManager::new(Arc::new(engine.clone()), SandboxPolicy::default());
    let gate = AdmissionGate::new(Arc::new(StaticProbe::new(available)), 512 * MIB);
    Playground::new(lifecycle, gate, SessionConfig::default())
}

/// Agent double: answers the job line with a canned result.
async fn fake_agent(process: MockProcess) -> i64 {
    let (stdin, output) = process.split();
    let mut lines = BufReader::new(stdin).lines();
    let Ok(Some(line)) = lines.next_line().await else {
        output.stderr("no job");
        return 2;
    };
    let result = match serde_json::from_str::<JobRequest>(&line) {
        Ok(JobRequest::Run { source }) => JobResult::Run(RunResult {
            compiler_output: String::new(),
            compiler_code: 0,
            bin_output: Some(format!("ran {} bytes\n", source.len())),
            bin_code: Some(0),
        }),
        Ok(JobRequest::Format { source }) => JobResult::Format(FormatResult {
            formatted: source.trim().to_string(),
            formatter_output: String::new(),
            formatter_code: 0,
        }),
        _ => {
            output.stderr("unsupported job");
            return 2;
        }
    };
    let mut encoded = serde_json::to_string(&result).unwrap();
    encoded.push('\n');
    output.stdout(encoded);
    0
}

#[tokio::test]
async fn test_run_returns_agent_result() {
    let engine = MockEngine::new(fake_agent);
    let playground = playground(&engine);

    let result = playground.run("main() {}".into()).await.unwrap();
    assert_eq!(result.compiler_code, 0);
    assert_eq!(result.bin_output.as_deref(), Some("ran 9 bytes\n"));
    assert_eq!(result.bin_code, Some(0));

    assert_eq!(engine.container_count(), 0);
    let specs = engine.created_specs();
    assert_eq!(specs.len(), 1);
    assert!(specs[0].auto_remove);

    let stats = playground.stats().snapshot();
    assert_eq!(stats.admitted, 1);
    assert_eq!(stats.jobs_completed, 1);
}

#[tokio::test]
async fn test_format_returns_agent_result() {
    let engine = MockEngine::new(fake_agent);
    let playground = playground(&engine);

    let result = playground.format("  main() {}  ".into()).await.unwrap();
    assert_eq!(result.formatted, "main() {}");
    assert_eq!(result.formatter_code, 0);
    assert_eq!(engine.container_count(), 0);
}

#[tokio::test]
async fn test_agent_failure_carries_stderr() {
    let engine = MockEngine::new(|p: MockProcess| async move {
        p.stderr("toolchain missing");
        2
    });
    let playground = playground(&engine);

    match playground.run("main() {}".into()).await {
        Err(CoreError::AgentFailed(status)) => {
            assert_eq!(status.code, 2);
            assert_eq!(status.stderr.as_deref(), Some("toolchain missing"));
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(engine.container_count(), 0);
    assert_eq!(playground.stats().snapshot().jobs_failed, 1);
}

#[tokio::test]
async fn test_silent_agent_is_an_error() {
    let engine = MockEngine::new(|_p: MockProcess| async { 0 });
    let playground = playground(&engine);

    assert!(matches!(
        playground.format("x".into()).await,
        Err(CoreError::NoResult { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_hung_agent_times_out_and_is_removed() {
    let engine = MockEngine::new(|_p: MockProcess| std::future::pending::<i64>());
    let playground = playground(&engine);

    let started = tokio::time::Instant::now();
    let result = playground.run("main() { while (true) {} }".into()).await;
    assert!(matches!(
        result,
        Err(CoreError::Engine(EngineError::Timeout(_)))
    ));
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(started.elapsed() < Duration::from_secs(6));
    assert_eq!(engine.container_count(), 0);
    assert_eq!(engine.removals(), 1);
}

#[tokio::test]
async fn test_lifecycle_failures_leave_nothing_behind() {
    for step in [FailAt::Create, FailAt::Start, FailAt::Attach] {
        let engine = MockEngine::new(fake_agent).failing_at(step);
        let playground = playground(&engine);

        let result = playground.run("main() {}".into()).await;
        assert!(
            matches!(result, Err(CoreError::Engine(_))),
            "{step:?}: {result:?}"
        );
        assert_eq!(engine.container_count(), 0, "{step:?}");
        assert_eq!(playground.sweep_leaked().await.unwrap(), 0, "{step:?}");
    }
}

#[tokio::test]
async fn test_low_memory_rejects_before_create() {
    let engine = MockEngine::new(fake_agent);
    let playground = playground_with_memory(&engine, 100 * MIB);

    assert!(matches!(
        playground.run("main() {}".into()).await,
        Err(CoreError::Rejected(_))
    ));
    assert!(engine.created_specs().is_empty());

    let stats = playground.stats().snapshot();
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.admitted, 0);
}

#[tokio::test]
async fn test_sweep_removes_labelled_leftovers() {
    let engine = MockEngine::new(|_p: MockProcess| std::future::pending::<i64>());
    let lifecycle = LifecycleManager::new(Arc::new(engine.clone()), SandboxPolicy::default());

    // simulate a crashed process: created but never torn down
    let sandbox = lifecycle.create(lifecycle.spec("stale")).await.unwrap();
    std::mem::forget(sandbox);
    assert_eq!(engine.container_count(), 1);

    let playground = playground(&engine);
    assert_eq!(playground.sweep_leaked().await.unwrap(), 1);
    assert_eq!(engine.container_count(), 0);
}
