// src/env/pipeline.rs

//! Ordered composition of environment overlays for one application root.
//!
//! A pipeline run starts from the configured base environment and folds the
//! project rc files over it, most to least specific, short-circuiting on the
//! first sourcing error. The version-manager step runs once after the rc
//! pass, and only when both the project's `.rvmrc` and the rvm installation
//! itself exist.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::env::sourcer::{ScriptSourcer, SourceOptions};
use crate::env::EnvMap;
use crate::errors::SourcingError;
use crate::fs::FileSystem;

/// Project rc files checked under the application root, in sourcing order.
pub const RC_SCRIPTS: [&str; 3] = [".harborrc", ".envrc", ".harborenv"];

/// Project file that opts an application into rvm activation.
pub const RVM_PROJECT_FILE: &str = ".rvmrc";

/// Snippet written into `.harborrc` by [`EnvPipeline::ensure_rvm_boilerplate`]
/// so rvm users get activation without a per-request `.rvmrc` sourcing.
pub const RVM_BOILERPLATE: &str = "if [ -f \"$rvm_path/scripts/rvm\" ] && [ -f \".rvmrc\" ]; then\n  source \"$rvm_path/scripts/rvm\"\n  source \".rvmrc\"\nfi";

/// Builds the final worker environment for one application root.
#[derive(Debug, Clone)]
pub struct EnvPipeline {
    root: PathBuf,
    rvm_path: PathBuf,
    fs: Arc<dyn FileSystem>,
    sourcer: Arc<dyn ScriptSourcer>,
}

impl EnvPipeline {
    pub fn new(
        root: impl Into<PathBuf>,
        rvm_path: impl Into<PathBuf>,
        fs: Arc<dyn FileSystem>,
        sourcer: Arc<dyn ScriptSourcer>,
    ) -> Self {
        Self {
            root: root.into(),
            rvm_path: rvm_path.into(),
            fs,
            sourcer,
        }
    }

    /// Fold the rc files and the version-manager step over `base`.
    ///
    /// A listed rc file that does not exist is skipped, not an error. The
    /// first sourcing failure aborts the remaining steps and propagates with
    /// its captured stdout/stderr.
    pub async fn build(&self, base: &EnvMap) -> Result<EnvMap, SourcingError> {
        let mut env = base.clone();

        for name in RC_SCRIPTS {
            let script = self.root.join(name);
            if !self.fs.exists(&script) {
                continue;
            }
            debug!(script = %script.display(), "sourcing rc file");
            env = self
                .sourcer
                .source(&script, &env, SourceOptions::default())
                .await?;
        }

        self.load_rvm_environment(env).await
    }

    /// Single version-manager step after the rc pass.
    ///
    /// Missing `.rvmrc` or a missing rvm installation are silent skips.
    async fn load_rvm_environment(&self, env: EnvMap) -> Result<EnvMap, SourcingError> {
        let script = self.root.join(RVM_PROJECT_FILE);
        if !self.fs.exists(&script) {
            return Ok(env);
        }
        if !self.fs.exists(&self.rvm_path) {
            debug!(
                rvm_path = %self.rvm_path.display(),
                "project has .rvmrc but rvm is not installed; skipping"
            );
            return Ok(env);
        }

        let before = format!(
            "echo 'harbor: sourcing .rvmrc directly is deprecated; add the rvm snippet to .harborrc instead' >&2\nsource '{}' > /dev/null",
            self.rvm_path.display()
        );

        self.sourcer
            .source(&script, &env, SourceOptions { before: Some(before) })
            .await
    }

    /// Write the rvm activation snippet into the project's `.harborrc`.
    ///
    /// Guarded by substring containment so repeated calls never duplicate the
    /// snippet. The snippet goes ahead of any existing content so rvm is
    /// active before user script lines run.
    pub fn ensure_rvm_boilerplate(&self) -> anyhow::Result<()> {
        let rc = self.root.join(RC_SCRIPTS[0]);
        let contents = self.fs.read_to_string(&rc).unwrap_or_default();
        if !contents.contains(RVM_BOILERPLATE) {
            self.fs
                .write(&rc, format!("{RVM_BOILERPLATE}\n{contents}").as_bytes())?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
