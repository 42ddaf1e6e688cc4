// tests/lifecycle.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use harbor::config::Settings;
use harbor::env::{EnvMap, ScriptSourcer};
use harbor::errors::{InitError, SourcingError};
use harbor::fs::mock::MockFileSystem;
use harbor::fs::FileSystem;
use harbor::spawn_app;
use harbor::AppHandle;
use harbor_test_utils::fake_pool::{FactoryProbe, FakePoolFactory};
use harbor_test_utils::fake_sourcer::FakeSourcer;
use harbor_test_utils::flow::FlowProbe;
use harbor_test_utils::{init_tracing, with_timeout};

const ROOT: &str = "/app";

struct Fixture {
    app: AppHandle,
    fs: MockFileSystem,
    sourcer: Arc<FakeSourcer>,
    probe: Arc<FactoryProbe>,
}

fn base_env() -> EnvMap {
    EnvMap::from([("BASE".to_string(), "1".to_string())])
}

fn fixture_with(sourcer: FakeSourcer) -> Fixture {
    init_tracing();

    let fs = MockFileSystem::new();
    let sourcer = Arc::new(sourcer);
    let (factory, probe) = FakePoolFactory::new();

    let app = spawn_app(
        ROOT,
        &Settings::default(),
        base_env(),
        Arc::new(fs.clone()) as Arc<dyn FileSystem>,
        Arc::clone(&sourcer) as Arc<dyn ScriptSourcer>,
        factory,
    );

    Fixture {
        app,
        fs,
        sourcer,
        probe,
    }
}

fn fixture() -> Fixture {
    fixture_with(FakeSourcer::new())
}

fn sourcing_failure(script: &str) -> SourcingError {
    SourcingError {
        script: format!("{ROOT}/{script}").into(),
        status: Some(1),
        stdout: String::new(),
        stderr: "boom".to_string(),
    }
}

#[tokio::test]
async fn concurrent_ready_calls_share_one_attempt() {
    let fx = fixture();
    fx.fs.add_file(format!("{ROOT}/.harborrc"), "");
    fx.sourcer
        .on_success(format!("{ROOT}/.harborrc"), EnvMap::new());

    let results = with_timeout(futures_join_ready(&fx.app, 8)).await;

    for result in results {
        assert!(result.is_ok());
    }
    assert_eq!(fx.probe.spawned(), 1, "exactly one pool spawn");
    assert_eq!(fx.sourcer.calls().len(), 1, "exactly one pipeline run");
}

/// Issue `n` concurrent `ready` calls and collect their outcomes.
async fn futures_join_ready(app: &AppHandle, n: usize) -> Vec<Result<(), InitError>> {
    let mut handles = Vec::new();
    for _ in 0..n {
        let app = app.clone();
        handles.push(tokio::spawn(async move { app.ready().await }));
    }
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.expect("ready task panicked"));
    }
    results
}

#[tokio::test]
async fn ready_without_overlays_uses_configured_defaults() {
    let fx = fixture();

    with_timeout(fx.app.ready()).await.expect("ready");

    let config = fx
        .probe
        .last_config
        .lock()
        .unwrap()
        .clone()
        .expect("pool was configured");
    assert_eq!(config.env, base_env());
    assert_eq!(config.size, 2);
    assert_eq!(config.idle, Duration::from_secs(15 * 60));
}

#[tokio::test]
async fn sourced_environment_overrides_pool_parameters() {
    let fx = fixture();
    fx.fs.add_file(format!("{ROOT}/.harborrc"), "");
    fx.sourcer.on_success(
        format!("{ROOT}/.harborrc"),
        EnvMap::from([
            ("HARBOR_WORKERS".to_string(), "5".to_string()),
            ("HARBOR_TIMEOUT".to_string(), "30".to_string()),
            ("RAILS_ENV".to_string(), "production".to_string()),
        ]),
    );

    with_timeout(fx.app.ready()).await.expect("ready");

    let config = fx
        .probe
        .last_config
        .lock()
        .unwrap()
        .clone()
        .expect("pool was configured");
    assert_eq!(config.size, 5);
    assert_eq!(config.idle, Duration::from_secs(30));
    assert_eq!(config.env.get("RAILS_ENV").map(String::as_str), Some("production"));
    assert_eq!(config.env.get("BASE").map(String::as_str), Some("1"));
}

#[tokio::test]
async fn quit_on_uninitialized_app_is_immediate() {
    let fx = fixture();

    with_timeout(fx.app.quit()).await;

    assert_eq!(fx.probe.spawned(), 0);
    assert_eq!(fx.probe.quit(), 0);
}

#[tokio::test]
async fn quit_waits_for_inflight_initialization() {
    let fx = fixture_with(FakeSourcer::new().with_delay(Duration::from_millis(50)));
    fx.fs.add_file(format!("{ROOT}/.harborrc"), "");
    fx.sourcer
        .on_success(format!("{ROOT}/.harborrc"), EnvMap::new());

    let (ready_result, _) = with_timeout(async {
        tokio::join!(fx.app.ready(), async {
            // Let the ready request win the race into the supervisor.
            sleep(Duration::from_millis(10)).await;
            fx.app.quit().await;
        })
    })
    .await;

    // The parked quit never raced the initialization: the pool came up,
    // the waiter heard about it, and only then was the pool torn down.
    assert!(ready_result.is_ok());
    assert_eq!(fx.probe.spawned(), 1);
    assert_eq!(fx.probe.quit(), 1);

    // And the instance is reusable afterwards.
    with_timeout(fx.app.ready()).await.expect("ready after quit");
    assert_eq!(fx.probe.spawned(), 2);
}

#[tokio::test]
async fn ready_during_termination_waits_then_reinitializes() {
    let fx = fixture();
    with_timeout(fx.app.ready()).await.expect("first ready");

    fx.probe.set_quit_delay(Duration::from_millis(50));

    let (_, ready_result) = with_timeout(async {
        tokio::join!(fx.app.quit(), async {
            sleep(Duration::from_millis(10)).await;
            fx.app.ready().await
        })
    })
    .await;

    assert!(ready_result.is_ok());
    assert_eq!(fx.probe.spawned(), 2, "termination completed before re-init");
    assert_eq!(fx.probe.quit(), 1);
}

#[tokio::test]
async fn initialization_failure_reaches_every_waiter_and_allows_retry() {
    let fx = fixture();
    fx.fs.add_file(format!("{ROOT}/.harborrc"), "");
    fx.sourcer.on_failure(
        format!("{ROOT}/.harborrc"),
        sourcing_failure(".harborrc"),
    );

    let results = with_timeout(futures_join_ready(&fx.app, 3)).await;

    for result in results {
        match result {
            Err(InitError::Sourcing(e)) => assert_eq!(e.stderr, "boom"),
            other => panic!("expected sourcing error, got {other:?}"),
        }
    }
    assert_eq!(fx.probe.spawned(), 0, "no pool after failed pipeline");

    // The failure was local to that attempt: re-script and retry.
    fx.sourcer
        .on_success(format!("{ROOT}/.harborrc"), EnvMap::new());
    with_timeout(fx.app.ready()).await.expect("retry succeeds");

    assert_eq!(fx.sourcer.calls().len(), 2, "one run per attempt");
    assert_eq!(fx.probe.spawned(), 1);
}

#[tokio::test]
async fn pool_spawn_failure_is_an_initialization_failure() {
    let fx = fixture();
    fx.probe.fail_next_spawn("no ports left");

    let err = with_timeout(fx.app.ready()).await.expect_err("spawn fails");
    match err {
        InitError::Spawn(message) => assert!(message.contains("no ports left")),
        other => panic!("expected spawn error, got {other:?}"),
    }

    // Retry succeeds once the factory cooperates again.
    with_timeout(fx.app.ready()).await.expect("retry succeeds");
    assert_eq!(fx.probe.spawned(), 1);
}

#[tokio::test]
async fn restart_always_builds_a_new_pool() {
    let fx = fixture();
    let flow = FlowProbe::new();

    let (req, result) = with_timeout(fx.app.handle(flow.request())).await;
    result.expect("first dispatch");
    assert_eq!(req.upstream.as_deref(), Some("fake://pool-0"));

    with_timeout(fx.app.restart()).await.expect("restart");

    let (req, result) = with_timeout(fx.app.handle(flow.request())).await;
    result.expect("second dispatch");
    assert_eq!(req.upstream.as_deref(), Some("fake://pool-1"));

    assert_eq!(fx.probe.spawned(), 2);
    assert_eq!(fx.probe.quit(), 1);
}

#[tokio::test]
async fn dropping_every_handle_quits_the_live_pool() {
    let fx = fixture();
    with_timeout(fx.app.ready()).await.expect("ready");

    drop(fx.app);

    // The supervisor notices the closed channel and tears the pool down.
    with_timeout(async {
        while fx.probe.quit() == 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
}
