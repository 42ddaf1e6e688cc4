// src/lifecycle/mod.rs

//! Lifecycle coordination for one supervised application.
//!
//! This module ties together:
//! - the state machine deciding when pools are built and torn down
//! - the waiter queues that let any number of concurrent callers ride a
//!   single initialization or termination attempt
//! - the supervisor event loop that reacts to:
//!   - `ready` / `quit` requests from handles
//!   - environment-pipeline and pool-spawn completions
//!   - pool teardown completions
//!   - request forwarding and sentinel queries
//!
//! The pure state machine lives in [`core`]; the async/IO shell is
//! implemented in [`supervisor`].

use tokio::sync::oneshot;

use crate::dispatch::ProxyRequest;
use crate::env::EnvMap;
use crate::errors::{DispatchError, InitError};
use crate::pool::{PoolConfig, WorkerPool};

pub mod core;
pub mod supervisor;

pub use self::core::{LifecycleCore, PoolDefaults};
pub use supervisor::Supervisor;

/// One-shot continuation resolved when an initialization attempt settles.
pub type ReadyWaiter = oneshot::Sender<std::result::Result<(), InitError>>;

/// One-shot continuation resolved when a termination completes.
pub type QuitWaiter = oneshot::Sender<()>;

/// Lifecycle phase of the supervised application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// No pool, nothing in flight. Initial and terminal.
    Uninitialized,
    /// Environment pipeline or pool spawn in flight.
    Initializing,
    /// Pool is live and owned by the supervisor.
    Ready,
    /// Pool teardown in flight.
    Terminating,
}

/// Events flowing into the supervisor from handles and background tasks.
pub enum LifecycleEvent {
    /// A caller wants the pool live; the waiter settles with the outcome of
    /// whichever initialization attempt it lands on.
    ReadyRequested(ReadyWaiter),
    /// A caller wants the pool gone. `None` for fire-and-forget quits.
    QuitRequested(Option<QuitWaiter>),
    /// Apply the run-once sentinel's verdict to the live pool.
    SetRunOnce { on: bool, ack: oneshot::Sender<()> },
    /// Poll the restart sentinel.
    CheckRestart { reply: oneshot::Sender<bool> },
    /// Resolve a forwarding target for a gated request.
    Forward {
        req: ProxyRequest,
        reply: oneshot::Sender<(ProxyRequest, std::result::Result<(), DispatchError>)>,
    },
    /// The environment pipeline finished (background task completion).
    EnvLoaded(std::result::Result<EnvMap, InitError>),
    /// The pool factory finished (background task completion).
    PoolSpawned(std::result::Result<Box<dyn WorkerPool>, InitError>),
    /// The pool's teardown finished (background task completion).
    PoolStopped,
}

impl std::fmt::Debug for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleEvent::ReadyRequested(_) => "ReadyRequested",
            LifecycleEvent::QuitRequested(_) => "QuitRequested",
            LifecycleEvent::SetRunOnce { .. } => "SetRunOnce",
            LifecycleEvent::CheckRestart { .. } => "CheckRestart",
            LifecycleEvent::Forward { .. } => "Forward",
            LifecycleEvent::EnvLoaded(_) => "EnvLoaded",
            LifecycleEvent::PoolSpawned(_) => "PoolSpawned",
            LifecycleEvent::PoolStopped => "PoolStopped",
        };
        f.write_str(name)
    }
}

/// Command produced by the pure core, to be executed by the IO shell.
pub enum CoreCommand {
    /// Seed the restart sentinel and run the environment pipeline.
    BuildEnvironment,
    /// Start the pool factory with the composed configuration.
    SpawnPool(PoolConfig),
    /// Take ownership of a freshly spawned pool.
    AdoptPool(Box<dyn WorkerPool>),
    /// Hand the owned pool to its teardown.
    StopPool,
    /// Forget the tracked restart-sentinel observation.
    ClearSentinel,
    /// Settle ready waiters, FIFO, exactly once each.
    NotifyReady {
        waiters: Vec<ReadyWaiter>,
        result: std::result::Result<(), InitError>,
    },
    /// Settle quit waiters, FIFO, exactly once each.
    NotifyQuit { waiters: Vec<QuitWaiter> },
}

impl std::fmt::Debug for CoreCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreCommand::BuildEnvironment => f.write_str("BuildEnvironment"),
            CoreCommand::SpawnPool(config) => f.debug_tuple("SpawnPool").field(config).finish(),
            CoreCommand::AdoptPool(_) => f.write_str("AdoptPool"),
            CoreCommand::StopPool => f.write_str("StopPool"),
            CoreCommand::ClearSentinel => f.write_str("ClearSentinel"),
            CoreCommand::NotifyReady { waiters, result } => f
                .debug_struct("NotifyReady")
                .field("waiters", &waiters.len())
                .field("result", result)
                .finish(),
            CoreCommand::NotifyQuit { waiters } => f
                .debug_struct("NotifyQuit")
                .field("waiters", &waiters.len())
                .finish(),
        }
    }
}
