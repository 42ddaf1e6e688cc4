// src/lifecycle/supervisor.rs

use std::fmt;
use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::dispatch::ProxyRequest;
use crate::env::{EnvMap, EnvPipeline};
use crate::errors::{DispatchError, InitError, PoolError};
use crate::lifecycle::{CoreCommand, LifecycleCore, LifecycleEvent};
use crate::pool::{PoolFactory, WorkerPool};
use crate::sentinel::RestartSentinel;

/// Drives one application's lifecycle in response to [`LifecycleEvent`]s,
/// and delegates pool creation to a [`PoolFactory`].
///
/// This is the IO shell around [`LifecycleCore`], which contains all the
/// transition semantics. The shell owns the pool slot (non-empty exactly
/// while the core is `Ready`, updated in the same command batch as the state
/// tag) and runs the environment pipeline and the pool spawn as background
/// tasks whose completions come back in as events. Because the shell is a
/// single task, every transition and queue mutation is atomic between
/// suspension points.
pub struct Supervisor<F: PoolFactory> {
    core: LifecycleCore,
    events_rx: mpsc::Receiver<LifecycleEvent>,
    /// Upgraded and cloned into background tasks so completions re-enter the
    /// loop. Weak, so the supervisor itself never keeps its own channel open
    /// once every handle is gone.
    events_tx: mpsc::WeakSender<LifecycleEvent>,
    factory: F,
    pool: Option<Box<dyn WorkerPool>>,
    pipeline: EnvPipeline,
    sentinel: RestartSentinel,
    base_env: EnvMap,
    root: PathBuf,
}

impl<F: PoolFactory> fmt::Debug for Supervisor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("core", &self.core)
            .field("root", &self.root)
            .field("pool", &self.pool.is_some())
            .finish_non_exhaustive()
    }
}

impl<F: PoolFactory> Supervisor<F> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        core: LifecycleCore,
        events_rx: mpsc::Receiver<LifecycleEvent>,
        events_tx: mpsc::WeakSender<LifecycleEvent>,
        factory: F,
        pipeline: EnvPipeline,
        sentinel: RestartSentinel,
        base_env: EnvMap,
        root: PathBuf,
    ) -> Self {
        Self {
            core,
            events_rx,
            events_tx,
            factory,
            pool: None,
            pipeline,
            sentinel,
            base_env,
            root,
        }
    }

    /// Main event loop.
    ///
    /// Runs until every handle is dropped, then tears down any live pool on
    /// the way out.
    pub async fn run(mut self) {
        info!(app = %self.root.display(), "application supervisor started");

        while let Some(event) = self.events_rx.recv().await {
            debug!(?event, state = ?self.core.state(), "supervisor received event");

            match event {
                LifecycleEvent::SetRunOnce { on, ack } => {
                    if let Some(pool) = self.pool.as_mut() {
                        pool.set_run_once(on);
                    }
                    let _ = ack.send(());
                }
                LifecycleEvent::CheckRestart { reply } => {
                    let _ = reply.send(self.sentinel.check());
                }
                LifecycleEvent::Forward { req, reply } => {
                    let _ = reply.send(self.forward(req).await);
                }
                LifecycleEvent::ReadyRequested(waiter) => {
                    let commands = self.core.request_ready(waiter);
                    self.execute(commands).await;
                }
                LifecycleEvent::QuitRequested(waiter) => {
                    let commands = self.core.request_quit(waiter);
                    self.execute(commands).await;
                }
                LifecycleEvent::EnvLoaded(result) => {
                    let commands = self.core.env_loaded(result);
                    self.execute(commands).await;
                }
                LifecycleEvent::PoolSpawned(result) => {
                    let commands = self.core.pool_spawned(result);
                    self.execute(commands).await;
                }
                LifecycleEvent::PoolStopped => {
                    let commands = self.core.pool_stopped();
                    self.execute(commands).await;
                }
            }
        }

        // Every handle is gone; nothing can observe the pool any more.
        if let Some(pool) = self.pool.take() {
            info!(app = %self.root.display(), "handles dropped; quitting live pool");
            pool.quit().await;
        }

        info!(app = %self.root.display(), "application supervisor exiting");
    }

    /// Resolve a forwarding target through the owned pool.
    async fn forward(
        &mut self,
        mut req: ProxyRequest,
    ) -> (ProxyRequest, Result<(), DispatchError>) {
        let result = match self.pool.as_mut() {
            Some(pool) => {
                req.recycle = pool.run_once();
                pool.forward(&mut req).await.map_err(|e| match e {
                    PoolError::Unavailable(msg) | PoolError::Spawn(msg) => {
                        DispatchError::PoolUnavailable(msg)
                    }
                })
            }
            None => Err(DispatchError::PoolUnavailable(
                "pool is not running".to_string(),
            )),
        };
        (req, result)
    }

    /// Execute a batch of commands from the core.
    async fn execute(&mut self, commands: Vec<CoreCommand>) {
        for command in commands {
            debug!(?command, "executing core command");
            match command {
                CoreCommand::BuildEnvironment => self.build_environment(),
                CoreCommand::SpawnPool(config) => {
                    info!(
                        app = %self.root.display(),
                        size = config.size,
                        idle_secs = config.idle.as_secs(),
                        "spawning worker pool"
                    );
                    let Some(tx) = self.events_tx.upgrade() else {
                        continue;
                    };
                    let fut = self.factory.create_pool(config);
                    tokio::spawn(async move {
                        let result = fut.await.map_err(|e| InitError::Spawn(e.to_string()));
                        let _ = tx.send(LifecycleEvent::PoolSpawned(result)).await;
                    });
                }
                CoreCommand::AdoptPool(pool) => {
                    debug_assert!(self.pool.is_none());
                    self.pool = Some(pool);
                }
                CoreCommand::StopPool => {
                    let pool = self.pool.take();
                    let Some(tx) = self.events_tx.upgrade() else {
                        // Every handle is gone; the loop is about to wind
                        // down and quit the pool itself.
                        if let Some(pool) = pool {
                            tokio::spawn(pool.quit());
                        }
                        continue;
                    };
                    match pool {
                        Some(pool) => {
                            tokio::spawn(async move {
                                pool.quit().await;
                                let _ = tx.send(LifecycleEvent::PoolStopped).await;
                            });
                        }
                        // The pool slot can only be empty here if an earlier
                        // teardown already consumed it; settle immediately so
                        // quit waiters are not wedged.
                        None => {
                            tokio::spawn(async move {
                                let _ = tx.send(LifecycleEvent::PoolStopped).await;
                            });
                        }
                    }
                }
                CoreCommand::ClearSentinel => self.sentinel.reset(),
                CoreCommand::NotifyReady { waiters, result } => {
                    if let Err(err) = &result {
                        self.log_init_error(err);
                    }
                    for waiter in waiters {
                        let _ = waiter.send(result.clone());
                    }
                }
                CoreCommand::NotifyQuit { waiters } => {
                    for waiter in waiters {
                        let _ = waiter.send(());
                    }
                }
            }
        }
    }

    /// Seed the restart sentinel, then run the pipeline in the background.
    ///
    /// The seeding observation happens before any sourcing so the first
    /// dispatch against the fresh pool compares against a timestamp taken at
    /// initialization time.
    fn build_environment(&mut self) {
        let _ = self.sentinel.check();

        let Some(tx) = self.events_tx.upgrade() else {
            return;
        };
        let pipeline = self.pipeline.clone();
        let base = self.base_env.clone();
        tokio::spawn(async move {
            let result = pipeline.build(&base).await.map_err(InitError::from);
            let _ = tx.send(LifecycleEvent::EnvLoaded(result)).await;
        });
    }

    fn log_init_error(&self, err: &InitError) {
        match err {
            InitError::Sourcing(e) => {
                error!(app = %self.root.display(), error = %e, "initialization failed");
                error!(app = %self.root.display(), "stdout: {}", e.stdout);
                error!(app = %self.root.display(), "stderr: {}", e.stderr);
            }
            other => error!(app = %self.root.display(), error = %other, "initialization failed"),
        }
    }
}
