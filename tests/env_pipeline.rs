// tests/env_pipeline.rs

use std::path::PathBuf;
use std::sync::Arc;

use harbor::env::pipeline::{EnvPipeline, RVM_BOILERPLATE};
use harbor::env::sourcer::parse_env_output;
use harbor::env::{EnvMap, ScriptSourcer};
use harbor::errors::SourcingError;
use harbor::fs::mock::MockFileSystem;
use harbor::fs::FileSystem;
use harbor_test_utils::fake_sourcer::FakeSourcer;
use harbor_test_utils::init_tracing;

const ROOT: &str = "/app";
const RVM: &str = "/rvm/scripts/rvm";

fn pipeline(fs: &MockFileSystem, sourcer: &Arc<FakeSourcer>) -> EnvPipeline {
    init_tracing();
    EnvPipeline::new(
        ROOT,
        RVM,
        Arc::new(fs.clone()) as Arc<dyn FileSystem>,
        Arc::clone(sourcer) as Arc<dyn ScriptSourcer>,
    )
}

fn env(pairs: &[(&str, &str)]) -> EnvMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn absent_rc_files_are_skipped_not_errors() {
    let fs = MockFileSystem::new();
    let sourcer = Arc::new(FakeSourcer::new());
    let pipeline = pipeline(&fs, &sourcer);

    let base = env(&[("BASE", "1")]);
    let out = pipeline.build(&base).await.expect("build succeeds");

    assert_eq!(out, base);
    assert!(sourcer.calls().is_empty());
}

#[tokio::test]
async fn later_overlays_shadow_earlier_keys() {
    let fs = MockFileSystem::new();
    let sourcer = Arc::new(FakeSourcer::new());

    fs.add_file(format!("{ROOT}/.harborrc"), "");
    fs.add_file(format!("{ROOT}/.harborenv"), "");
    sourcer.on_success(
        format!("{ROOT}/.harborrc"),
        env(&[("A", "1"), ("SHARED", "from-rc")]),
    );
    sourcer.on_success(
        format!("{ROOT}/.harborenv"),
        env(&[("B", "2"), ("SHARED", "from-env")]),
    );

    let pipeline = pipeline(&fs, &sourcer);
    let out = pipeline.build(&EnvMap::new()).await.expect("build succeeds");

    assert_eq!(out.get("A").map(String::as_str), Some("1"));
    assert_eq!(out.get("B").map(String::as_str), Some("2"));
    assert_eq!(out.get("SHARED").map(String::as_str), Some("from-env"));
    assert_eq!(
        sourcer.calls(),
        vec![
            PathBuf::from(format!("{ROOT}/.harborrc")),
            PathBuf::from(format!("{ROOT}/.harborenv")),
        ],
        "sourced in order, .envrc skipped because it does not exist"
    );
}

#[tokio::test]
async fn first_sourcing_error_aborts_remaining_steps() {
    let fs = MockFileSystem::new();
    let sourcer = Arc::new(FakeSourcer::new());

    for name in [".harborrc", ".envrc", ".harborenv"] {
        fs.add_file(format!("{ROOT}/{name}"), "");
    }
    sourcer.on_success(format!("{ROOT}/.harborrc"), EnvMap::new());
    sourcer.on_failure(
        format!("{ROOT}/.envrc"),
        SourcingError {
            script: format!("{ROOT}/.envrc").into(),
            status: Some(127),
            stdout: "partial".to_string(),
            stderr: "command not found".to_string(),
        },
    );

    let pipeline = pipeline(&fs, &sourcer);
    let err = pipeline
        .build(&EnvMap::new())
        .await
        .expect_err("second step fails");

    assert_eq!(err.stderr, "command not found");
    assert_eq!(err.stdout, "partial");
    assert_eq!(sourcer.calls().len(), 2, ".harborenv never sourced");
}

#[tokio::test]
async fn rvm_step_runs_with_activation_preamble() {
    let fs = MockFileSystem::new();
    let sourcer = Arc::new(FakeSourcer::new());

    fs.add_file(format!("{ROOT}/.rvmrc"), "");
    fs.add_file(RVM, "");
    sourcer.on_success(format!("{ROOT}/.rvmrc"), env(&[("GEM_HOME", "/gems")]));

    let pipeline = pipeline(&fs, &sourcer);
    let out = pipeline.build(&EnvMap::new()).await.expect("build succeeds");

    assert_eq!(out.get("GEM_HOME").map(String::as_str), Some("/gems"));

    let befores = sourcer.befores();
    let preamble = befores
        .last()
        .and_then(|b| b.as_deref())
        .expect("rvm step carries a preamble");
    assert!(preamble.contains(RVM), "preamble activates the rvm install");
}

#[tokio::test]
async fn rvm_step_is_skipped_when_the_installation_is_absent() {
    let fs = MockFileSystem::new();
    let sourcer = Arc::new(FakeSourcer::new());

    fs.add_file(format!("{ROOT}/.rvmrc"), "");
    // RVM itself not present.

    let pipeline = pipeline(&fs, &sourcer);
    let out = pipeline
        .build(&env(&[("BASE", "1")]))
        .await
        .expect("silently skipped, not an error");

    assert_eq!(out, env(&[("BASE", "1")]));
    assert!(sourcer.calls().is_empty());
}

#[tokio::test]
async fn boilerplate_is_written_at_most_once() {
    let fs = MockFileSystem::new();
    let sourcer = Arc::new(FakeSourcer::new());
    let rc = format!("{ROOT}/.harborrc");

    fs.add_file(&rc, "existing content\n");

    let pipeline = pipeline(&fs, &sourcer);
    pipeline.ensure_rvm_boilerplate().expect("first write");
    pipeline.ensure_rvm_boilerplate().expect("second write is a no-op");

    let contents = fs
        .read_to_string(std::path::Path::new(&rc))
        .expect("rc readable");
    assert_eq!(contents.matches(RVM_BOILERPLATE).count(), 1);
    assert!(contents.starts_with(RVM_BOILERPLATE));
    assert!(contents.ends_with("existing content\n"));
}

#[test]
fn env_output_parses_plain_and_multiline_values() {
    let out = parse_env_output("A=1\nB=first line\nsecond line\nPATH=/bin:/usr/bin\n");

    assert_eq!(out.get("A").map(String::as_str), Some("1"));
    assert_eq!(
        out.get("B").map(String::as_str),
        Some("first line\nsecond line")
    );
    assert_eq!(out.get("PATH").map(String::as_str), Some("/bin:/usr/bin"));
}

#[test]
fn env_output_ignores_leading_noise_lines() {
    let out = parse_env_output("not a key value\n1BAD=x\nGOOD=y\n");

    assert_eq!(out.len(), 1);
    assert_eq!(out.get("GOOD").map(String::as_str), Some("y"));
}
