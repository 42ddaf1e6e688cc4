use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use harbor::env::{EnvMap, ScriptSourcer, SourceOptions};
use harbor::errors::SourcingError;

/// Scripted sourcer: maps script paths to environment overlays or failures,
/// records every call, and can delay to widen interleaving windows in
/// lifecycle tests.
#[derive(Debug, Default)]
pub struct FakeSourcer {
    scripts: Mutex<HashMap<PathBuf, Result<EnvMap, SourcingError>>>,
    calls: Mutex<Vec<PathBuf>>,
    befores: Mutex<Vec<Option<String>>>,
    delay: Option<Duration>,
}

impl FakeSourcer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sourcing call sleeps this long before resolving.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Script at `path` succeeds, merging `overlay` over its input.
    pub fn on_success(&self, path: impl Into<PathBuf>, overlay: EnvMap) {
        self.scripts.lock().unwrap().insert(path.into(), Ok(overlay));
    }

    /// Script at `path` fails with the given captured output.
    pub fn on_failure(&self, path: impl Into<PathBuf>, err: SourcingError) {
        self.scripts.lock().unwrap().insert(path.into(), Err(err));
    }

    /// Paths sourced so far, in call order.
    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }

    /// `before` preambles observed so far, in call order.
    pub fn befores(&self) -> Vec<Option<String>> {
        self.befores.lock().unwrap().clone()
    }
}

impl ScriptSourcer for FakeSourcer {
    fn source<'a>(
        &'a self,
        script: &'a Path,
        env: &'a EnvMap,
        options: SourceOptions,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<EnvMap, SourcingError>> + Send + 'a>,
    > {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            self.calls.lock().unwrap().push(script.to_path_buf());
            self.befores.lock().unwrap().push(options.before);

            match self.scripts.lock().unwrap().get(script) {
                Some(Ok(overlay)) => {
                    let mut out = env.clone();
                    out.extend(overlay.clone());
                    Ok(out)
                }
                Some(Err(err)) => Err(err.clone()),
                // Unscripted files source to their input unchanged.
                None => Ok(env.clone()),
            }
        })
    }
}
