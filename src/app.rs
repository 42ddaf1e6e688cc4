// src/app.rs

//! Public surface for one supervised application.
//!
//! [`launch`] wires the production collaborators and spawns the supervisor
//! actor; [`spawn_app`] accepts injected collaborators for tests and
//! embedders. Both hand back an [`AppHandle`], the only way to reach the
//! application afterwards.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::config::Settings;
use crate::dispatch::{self, ProxyRequest, UnbufferedFlow};
use crate::env::{process_env, EnvMap, EnvPipeline, ScriptSourcer, ShellSourcer};
use crate::errors::{DispatchError, InitError};
use crate::fs::{FileSystem, RealFileSystem};
use crate::lifecycle::{LifecycleCore, LifecycleEvent, PoolDefaults, Supervisor};
use crate::pool::{PoolFactory, ProcessPoolFactory};
use crate::sentinel::{RestartSentinel, RunOnceGate};

/// Cheap-to-clone handle to a supervised application.
///
/// All pool access goes through the supervisor task behind this handle; the
/// handle itself holds no lifecycle state. Dropping every clone shuts the
/// supervisor down, quitting any live pool.
#[derive(Debug, Clone)]
pub struct AppHandle {
    events_tx: mpsc::Sender<LifecycleEvent>,
    gate: RunOnceGate,
    root: Arc<PathBuf>,
}

impl AppHandle {
    /// Wait until the pool is live, initializing it if necessary.
    ///
    /// Any number of concurrent callers share a single pipeline run and pool
    /// spawn; each receives that attempt's outcome. Failure resets the
    /// application so a later call retries from scratch.
    pub async fn ready(&self) -> Result<(), InitError> {
        let (waiter, settled) = oneshot::channel();
        self.events_tx
            .send(LifecycleEvent::ReadyRequested(waiter))
            .await
            .map_err(|_| InitError::Stopped)?;
        settled.await.map_err(|_| InitError::Stopped)?
    }

    /// Tear the pool down and wait for its workers to be gone.
    ///
    /// A no-op on an uninitialized application. Never races an in-flight
    /// initialization: it waits for the attempt to settle first.
    pub async fn quit(&self) {
        let (waiter, settled) = oneshot::channel();
        if self
            .events_tx
            .send(LifecycleEvent::QuitRequested(Some(waiter)))
            .await
            .is_ok()
        {
            let _ = settled.await;
        }
    }

    /// Full cycle: always tears down and rebuilds, even when already ready.
    pub async fn restart(&self) -> Result<(), InitError> {
        self.quit().await;
        self.ready().await
    }

    /// Gate an inbound request and resolve its upstream target.
    ///
    /// See [`dispatch::dispatch`] for the full contract.
    pub async fn handle(&self, req: ProxyRequest) -> (ProxyRequest, Result<(), DispatchError>) {
        dispatch::dispatch(self, req).await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Coalesced existence check of the run-once sentinel.
    pub(crate) async fn refresh_run_once(&self) -> bool {
        self.gate.refresh().await
    }

    /// Apply a run-once verdict to the live pool, if any.
    pub(crate) async fn set_run_once(&self, on: bool) {
        let (ack, acked) = oneshot::channel();
        if self
            .events_tx
            .send(LifecycleEvent::SetRunOnce { on, ack })
            .await
            .is_ok()
        {
            let _ = acked.await;
        }
    }

    /// Poll the restart sentinel through the supervisor.
    pub(crate) async fn check_restart(&self) -> bool {
        let (reply, verdict) = oneshot::channel();
        if self
            .events_tx
            .send(LifecycleEvent::CheckRestart { reply })
            .await
            .is_err()
        {
            return false;
        }
        verdict.await.unwrap_or(false)
    }

    /// Hand a request to the pool for target resolution.
    pub(crate) async fn forward(
        &self,
        req: ProxyRequest,
    ) -> (ProxyRequest, Result<(), DispatchError>) {
        let (reply, resolved) = oneshot::channel();
        match self
            .events_tx
            .send(LifecycleEvent::Forward { req, reply })
            .await
        {
            Ok(()) => match resolved.await {
                Ok(outcome) => outcome,
                // The supervisor vanished mid-forward and the request's
                // valve went with it; hand back an inert request.
                Err(_) => (
                    ProxyRequest::new(Box::new(UnbufferedFlow)),
                    Err(DispatchError::Stopped),
                ),
            },
            Err(mpsc::error::SendError(event)) => {
                let req = match event {
                    LifecycleEvent::Forward { req, .. } => req,
                    _ => ProxyRequest::new(Box::new(UnbufferedFlow)),
                };
                (req, Err(DispatchError::Stopped))
            }
        }
    }
}

/// Spawn a supervisor with injected collaborators and hand back its handle.
pub fn spawn_app<F: PoolFactory>(
    root: impl Into<PathBuf>,
    settings: &Settings,
    base_env: EnvMap,
    fs: Arc<dyn FileSystem>,
    sourcer: Arc<dyn ScriptSourcer>,
    factory: F,
) -> AppHandle {
    let root = root.into();
    let (events_tx, events_rx) = mpsc::channel::<LifecycleEvent>(64);

    let pipeline = EnvPipeline::new(
        root.clone(),
        settings.rvm_path.clone(),
        Arc::clone(&fs),
        sourcer,
    );
    let sentinel = RestartSentinel::new(&root, Arc::clone(&fs));
    let gate = RunOnceGate::new(&root, fs);

    let defaults = PoolDefaults {
        workers: settings.workers,
        idle: Duration::from_secs(settings.timeout_secs),
    };

    let supervisor = Supervisor::new(
        LifecycleCore::new(defaults),
        events_rx,
        events_tx.downgrade(),
        factory,
        pipeline,
        sentinel,
        base_env,
        root.clone(),
    );
    tokio::spawn(supervisor.run());

    AppHandle {
        events_tx,
        gate,
        root: Arc::new(root),
    }
}

/// Supervise the application at `root` with the production collaborators:
/// the real filesystem, `sh`-backed sourcing, and Procfile worker pools.
///
/// The base environment is the current process environment with the
/// configured `[env]` overlay on top.
pub fn launch(root: impl Into<PathBuf>, settings: &Settings) -> AppHandle {
    let root = root.into();

    let mut base_env = process_env();
    base_env.extend(settings.env.clone());

    let factory = ProcessPoolFactory::new(&root, settings.base_port);

    spawn_app(
        root,
        settings,
        base_env,
        Arc::new(RealFileSystem),
        Arc::new(ShellSourcer),
        factory,
    )
}
