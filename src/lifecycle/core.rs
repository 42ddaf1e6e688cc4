// src/lifecycle/core.rs

//! Pure lifecycle state machine.
//!
//! This module contains a synchronous, deterministic core that consumes
//! lifecycle inputs and produces:
//! - an updated state tag
//! - a list of [`CoreCommand`]s describing what the IO shell should do next
//!
//! The async/IO-heavy shell ([`super::supervisor`]) is responsible for
//! running the environment pipeline, spawning and stopping pools, and
//! settling waiters. The core performs no IO and can be exercised
//! exhaustively without Tokio, processes, or a filesystem.
//!
//! The machine's one subtlety is that initialization and termination must
//! never overlap: a quit that arrives mid-initialization is parked
//! (`terminate_pending`) until the in-flight attempt settles, and a ready
//! that arrives mid-termination is parked in the waiter queue until the pool
//! is gone, at which point a fresh initialization starts.

use std::time::Duration;

use crate::env::EnvMap;
use crate::errors::InitError;
use crate::pool::{PoolConfig, WorkerPool, TIMEOUT_VAR, WORKERS_VAR};

use super::{CoreCommand, LifecycleState, QuitWaiter, ReadyWaiter};

/// Process-wide fallbacks for pool parameters the sourced environment does
/// not override.
#[derive(Debug, Clone, Copy)]
pub struct PoolDefaults {
    pub workers: usize,
    pub idle: Duration,
}

/// Pure lifecycle state.
///
/// Owns the state tag and the FIFO waiter queues. It has **no** channels, no
/// Tokio types beyond the opaque waiter values it stores, and does not
/// perform any IO.
pub struct LifecycleCore {
    state: LifecycleState,
    ready_waiters: Vec<ReadyWaiter>,
    quit_waiters: Vec<QuitWaiter>,
    /// A quit arrived while initialization was in flight; terminate as soon
    /// as the attempt settles.
    terminate_pending: bool,
    defaults: PoolDefaults,
}

impl std::fmt::Debug for LifecycleCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleCore")
            .field("state", &self.state)
            .field("ready_waiters", &self.ready_waiters.len())
            .field("quit_waiters", &self.quit_waiters.len())
            .field("terminate_pending", &self.terminate_pending)
            .finish_non_exhaustive()
    }
}

impl LifecycleCore {
    pub fn new(defaults: PoolDefaults) -> Self {
        Self {
            state: LifecycleState::Uninitialized,
            ready_waiters: Vec::new(),
            quit_waiters: Vec::new(),
            terminate_pending: false,
            defaults,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Expose queue sizes (for tests).
    pub fn ready_waiting(&self) -> usize {
        self.ready_waiters.len()
    }

    pub fn quit_waiting(&self) -> usize {
        self.quit_waiters.len()
    }

    /// A caller asked for the pool to be live.
    ///
    /// Already ready → settle immediately. Otherwise the waiter queues onto
    /// whichever initialization attempt comes next; only the transition out
    /// of `Uninitialized` actually starts one.
    pub fn request_ready(&mut self, waiter: ReadyWaiter) -> Vec<CoreCommand> {
        match self.state {
            LifecycleState::Ready => vec![CoreCommand::NotifyReady {
                waiters: vec![waiter],
                result: Ok(()),
            }],
            LifecycleState::Uninitialized => {
                self.ready_waiters.push(waiter);
                self.state = LifecycleState::Initializing;
                vec![CoreCommand::BuildEnvironment]
            }
            // An attempt is already in flight; ride it.
            LifecycleState::Initializing => {
                self.ready_waiters.push(waiter);
                Vec::new()
            }
            // Wait for the teardown; `pool_stopped` starts a fresh attempt
            // for everyone parked here.
            LifecycleState::Terminating => {
                self.ready_waiters.push(waiter);
                Vec::new()
            }
        }
    }

    /// A caller asked for the pool to be gone.
    pub fn request_quit(&mut self, waiter: Option<QuitWaiter>) -> Vec<CoreCommand> {
        match self.state {
            // Nothing to tear down.
            LifecycleState::Uninitialized => vec![CoreCommand::NotifyQuit {
                waiters: waiter.into_iter().collect(),
            }],
            LifecycleState::Ready => {
                self.quit_waiters.extend(waiter);
                self.state = LifecycleState::Terminating;
                vec![CoreCommand::StopPool]
            }
            LifecycleState::Terminating => {
                self.quit_waiters.extend(waiter);
                Vec::new()
            }
            // Never race an in-flight initialization; park until it settles.
            LifecycleState::Initializing => {
                self.quit_waiters.extend(waiter);
                self.terminate_pending = true;
                Vec::new()
            }
        }
    }

    /// The environment pipeline settled.
    pub fn env_loaded(&mut self, result: Result<EnvMap, InitError>) -> Vec<CoreCommand> {
        debug_assert_eq!(self.state, LifecycleState::Initializing);
        if self.state != LifecycleState::Initializing {
            return Vec::new();
        }

        match result {
            Ok(env) => vec![CoreCommand::SpawnPool(self.pool_config(env))],
            Err(err) => self.fail_initialization(err),
        }
    }

    /// The pool factory settled.
    pub fn pool_spawned(
        &mut self,
        result: Result<Box<dyn WorkerPool>, InitError>,
    ) -> Vec<CoreCommand> {
        debug_assert_eq!(self.state, LifecycleState::Initializing);
        if self.state != LifecycleState::Initializing {
            return Vec::new();
        }

        match result {
            Ok(pool) => {
                self.state = LifecycleState::Ready;
                let mut commands = vec![
                    CoreCommand::AdoptPool(pool),
                    CoreCommand::NotifyReady {
                        waiters: std::mem::take(&mut self.ready_waiters),
                        result: Ok(()),
                    },
                ];
                // A quit was parked behind this attempt; tear the fresh pool
                // straight back down.
                if self.terminate_pending {
                    self.terminate_pending = false;
                    self.state = LifecycleState::Terminating;
                    commands.push(CoreCommand::StopPool);
                }
                commands
            }
            Err(err) => self.fail_initialization(err),
        }
    }

    /// The pool teardown settled.
    pub fn pool_stopped(&mut self) -> Vec<CoreCommand> {
        debug_assert_eq!(self.state, LifecycleState::Terminating);
        self.state = LifecycleState::Uninitialized;

        let mut commands = vec![
            CoreCommand::NotifyQuit {
                waiters: std::mem::take(&mut self.quit_waiters),
            },
            CoreCommand::ClearSentinel,
        ];

        // Callers queued `ready` while we were terminating; start over.
        if !self.ready_waiters.is_empty() {
            self.state = LifecycleState::Initializing;
            commands.push(CoreCommand::BuildEnvironment);
        }

        commands
    }

    /// One attempt failed; everyone queued on it hears about it, and the
    /// instance resets so a later call retries from scratch.
    fn fail_initialization(&mut self, err: InitError) -> Vec<CoreCommand> {
        self.state = LifecycleState::Uninitialized;

        let mut commands = vec![CoreCommand::NotifyReady {
            waiters: std::mem::take(&mut self.ready_waiters),
            result: Err(err),
        }];

        // A parked quit has nothing left to tear down: the pool never came
        // up. Settle its waiters instead of wedging them.
        if self.terminate_pending {
            self.terminate_pending = false;
            commands.push(CoreCommand::NotifyQuit {
                waiters: std::mem::take(&mut self.quit_waiters),
            });
        }

        commands
    }

    /// Derive the pool configuration from the composed environment, falling
    /// back to the process-wide defaults.
    fn pool_config(&self, env: EnvMap) -> PoolConfig {
        let size = env
            .get(WORKERS_VAR)
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(self.defaults.workers);

        let idle = env
            .get(TIMEOUT_VAR)
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(self.defaults.idle);

        PoolConfig { env, size, idle }
    }
}
