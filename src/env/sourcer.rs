// src/env/sourcer.rs

//! Shell script sourcing.
//!
//! [`ShellSourcer`] is the production implementation: it sources a script in
//! a `sh` child process whose entire environment is the input mapping, then
//! captures the resulting environment from `env(1)` output. Tests swap in a
//! fake [`ScriptSourcer`] so pipeline behaviour can be exercised without
//! running a shell.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::env::EnvMap;
use crate::errors::SourcingError;

/// Options for a single sourcing step.
#[derive(Debug, Clone, Default)]
pub struct SourceOptions {
    /// Shell preamble executed before the script is sourced (used by the
    /// version-manager step to activate the manager first).
    pub before: Option<String>,
}

/// Trait abstracting how a shell script becomes an environment mapping.
///
/// Dyn-compatible so the pipeline can hold a shared trait object; the
/// returned future borrows the inputs for its lifetime.
pub trait ScriptSourcer: Send + Sync + std::fmt::Debug {
    fn source<'a>(
        &'a self,
        script: &'a Path,
        env: &'a EnvMap,
        options: SourceOptions,
    ) -> Pin<Box<dyn Future<Output = Result<EnvMap, SourcingError>> + Send + 'a>>;
}

/// Production sourcer backed by `sh`.
#[derive(Debug, Clone, Default)]
pub struct ShellSourcer;

impl ScriptSourcer for ShellSourcer {
    fn source<'a>(
        &'a self,
        script: &'a Path,
        env: &'a EnvMap,
        options: SourceOptions,
    ) -> Pin<Box<dyn Future<Output = Result<EnvMap, SourcingError>> + Send + 'a>> {
        Box::pin(async move {
            let mut command = String::new();
            if let Some(before) = &options.before {
                command.push_str(before);
                command.push('\n');
            }
            // Source with stdout silenced so `env` output is the only thing
            // we have to parse; stderr flows through for error reporting.
            command.push_str(&format!(". '{}' > /dev/null\nenv", script.display()));

            let cwd = script.parent().unwrap_or_else(|| Path::new("."));

            debug!(script = %script.display(), "sourcing script environment");

            let output = Command::new("sh")
                .arg("-c")
                .arg(&command)
                .env_clear()
                .envs(env)
                .current_dir(cwd)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await
                .map_err(|e| SourcingError {
                    script: script.to_path_buf(),
                    status: None,
                    stdout: String::new(),
                    stderr: format!("failed to run sh: {e}"),
                })?;

            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

            if !output.status.success() {
                return Err(SourcingError {
                    script: script.to_path_buf(),
                    status: output.status.code(),
                    stdout,
                    stderr,
                });
            }

            Ok(parse_env_output(&stdout))
        })
    }
}

/// Parse `env(1)` output into an [`EnvMap`].
///
/// Lines without a `KEY=` prefix are continuations of the previous value
/// (multi-line exports).
pub fn parse_env_output(output: &str) -> EnvMap {
    let mut env = EnvMap::new();
    let mut last_key: Option<String> = None;

    for line in output.lines() {
        match line.split_once('=') {
            Some((key, value)) if is_env_key(key) => {
                env.insert(key.to_string(), value.to_string());
                last_key = Some(key.to_string());
            }
            _ => {
                if let Some(value) = last_key.as_ref().and_then(|k| env.get_mut(k)) {
                    value.push('\n');
                    value.push_str(line);
                }
            }
        }
    }

    env
}

fn is_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
