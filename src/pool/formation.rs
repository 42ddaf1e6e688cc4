// src/pool/formation.rs

//! Procfile-backed worker pool.
//!
//! The production [`PoolFactory`]: reads the application's `Procfile`, takes
//! its `web` entry, and spawns the configured number of shell workers with
//! sequential `PORT` assignments on top of the composed environment. Workers
//! are supervised loosely: output drained onto the log, dead members dropped
//! at forward time, everything killed on quit. An idle reaper tears the
//! formation down after a configurable quiet period.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::dispatch::ProxyRequest;
use crate::env::EnvMap;
use crate::errors::PoolError;
use crate::pool::{PoolConfig, PoolFactory, PoolFuture, WorkerPool};

/// Process formation file, relative to the application root.
pub const PROCFILE: &str = "Procfile";

/// Procfile entry used for pool workers.
pub const WEB_ENTRY: &str = "web";

/// Spawns [`ProcessPool`]s for one application root.
#[derive(Debug, Clone)]
pub struct ProcessPoolFactory {
    root: PathBuf,
    base_port: u16,
}

impl ProcessPoolFactory {
    pub fn new(root: impl Into<PathBuf>, base_port: u16) -> Self {
        Self {
            root: root.into(),
            base_port,
        }
    }
}

impl PoolFactory for ProcessPoolFactory {
    fn create_pool(
        &mut self,
        config: PoolConfig,
    ) -> PoolFuture<'static, Result<Box<dyn WorkerPool>, PoolError>> {
        let root = self.root.clone();
        let base_port = self.base_port;

        Box::pin(async move {
            let procfile = root.join(PROCFILE);
            let contents = tokio::fs::read_to_string(&procfile)
                .await
                .map_err(|e| PoolError::Spawn(format!("reading {procfile:?}: {e}")))?;

            let command = web_command(&contents).ok_or_else(|| {
                PoolError::Spawn(format!("no `{WEB_ENTRY}` entry in {procfile:?}"))
            })?;

            let mut workers = Vec::with_capacity(config.size);
            for i in 0..config.size {
                let port = base_port + i as u16;
                let child = spawn_worker(&root, &command, &config.env, port)?;
                workers.push(Worker { port, child });
            }

            info!(
                root = %root.display(),
                size = config.size,
                base_port,
                "worker formation spawned"
            );

            Ok(Box::new(ProcessPool::new(workers, config.idle)) as Box<dyn WorkerPool>)
        })
    }
}

/// One spawned worker process and the port it was told to listen on.
#[derive(Debug)]
struct Worker {
    port: u16,
    child: Child,
}

/// State shared between the pool handle and its idle reaper.
#[derive(Debug)]
struct PoolShared {
    workers: Mutex<Vec<Worker>>,
    last_used: Mutex<Instant>,
}

/// A live formation of worker processes.
#[derive(Debug)]
pub struct ProcessPool {
    shared: Arc<PoolShared>,
    run_once: bool,
    reaper: Option<tokio::task::JoinHandle<()>>,
}

impl ProcessPool {
    fn new(workers: Vec<Worker>, idle: Duration) -> Self {
        let shared = Arc::new(PoolShared {
            workers: Mutex::new(workers),
            last_used: Mutex::new(Instant::now()),
        });

        let reaper = (idle > Duration::ZERO)
            .then(|| tokio::spawn(reap_when_idle(Arc::clone(&shared), idle)));

        Self {
            shared,
            run_once: false,
            reaper,
        }
    }
}

impl WorkerPool for ProcessPool {
    fn forward<'a>(
        &'a mut self,
        req: &'a mut ProxyRequest,
    ) -> PoolFuture<'a, Result<(), PoolError>> {
        Box::pin(async move {
            *self.shared.last_used.lock().unwrap() = Instant::now();

            let mut workers = self.shared.workers.lock().unwrap();

            // Drop members whose process has exited; they can't serve.
            workers.retain_mut(|w| match w.child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    warn!(port = w.port, %status, "worker exited; dropping from formation");
                    false
                }
                Err(e) => {
                    warn!(port = w.port, error = %e, "worker unqueryable; dropping from formation");
                    false
                }
            });

            let Some(worker) = workers.first() else {
                return Err(PoolError::Unavailable("no live workers".to_string()));
            };

            req.upstream = Some(format!("http://127.0.0.1:{}", worker.port));
            Ok(())
        })
    }

    fn run_once(&self) -> bool {
        self.run_once
    }

    fn set_run_once(&mut self, on: bool) {
        self.run_once = on;
    }

    fn quit(self: Box<Self>) -> PoolFuture<'static, ()> {
        Box::pin(async move {
            if let Some(reaper) = self.reaper {
                reaper.abort();
            }

            let mut workers: Vec<Worker> = {
                let mut guard = self.shared.workers.lock().unwrap();
                guard.drain(..).collect()
            };

            for worker in &mut workers {
                if let Err(e) = worker.child.start_kill() {
                    debug!(port = worker.port, error = %e, "worker already gone");
                }
            }

            for worker in &mut workers {
                match worker.child.wait().await {
                    Ok(status) => debug!(port = worker.port, %status, "worker reaped"),
                    Err(e) => warn!(port = worker.port, error = %e, "failed to reap worker"),
                }
            }

            info!("worker formation terminated");
        })
    }
}

/// Kill the whole formation once it has sat idle for `idle`.
async fn reap_when_idle(shared: Arc<PoolShared>, idle: Duration) {
    loop {
        let elapsed = { shared.last_used.lock().unwrap().elapsed() };

        if elapsed >= idle {
            let mut workers = shared.workers.lock().unwrap();
            if !workers.is_empty() {
                info!(count = workers.len(), "idle timeout reached; reaping workers");
                for worker in workers.iter_mut() {
                    let _ = worker.child.start_kill();
                }
                workers.clear();
            }
            return;
        }

        tokio::time::sleep(idle - elapsed).await;
    }
}

/// Spawn a single worker via the platform shell.
fn spawn_worker(
    root: &std::path::Path,
    command: &str,
    env: &EnvMap,
    port: u16,
) -> Result<Child, PoolError> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .env_clear()
        .envs(env)
        .env("PORT", port.to_string())
        .current_dir(root)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| PoolError::Spawn(format!("spawning worker on port {port}: {e}")))?;

    // Always consume both streams so buffers don't fill.
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(port, "worker stdout: {}", line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(port, "worker stderr: {}", line);
            }
        });
    }

    debug!(port, cmd = %command, "worker process started");
    Ok(child)
}

/// Extract the `web` entry's command from Procfile contents.
///
/// Lines are `name: command`; blank lines and `#` comments are ignored.
pub fn web_command(contents: &str) -> Option<String> {
    parse_procfile(contents)
        .into_iter()
        .find(|(name, _)| name == WEB_ENTRY)
        .map(|(_, command)| command)
}

/// Parse Procfile contents into `(name, command)` entries in file order.
pub fn parse_procfile(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let (name, command) = line.split_once(':')?;
            let name = name.trim();
            let command = command.trim();
            if name.is_empty() || command.is_empty() {
                return None;
            }
            Some((name.to_string(), command.to_string()))
        })
        .collect()
}
