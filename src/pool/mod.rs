// src/pool/mod.rs

//! Pluggable worker-pool contract.
//!
//! The lifecycle supervisor and the request dispatcher never see a concrete
//! pool; they depend on exactly two pluggable operations (creating a pool
//! and forwarding a request to one of its members) plus the narrow handle
//! surface a supervised pool must expose (`run_once`, `quit`).
//!
//! - [`ProcessPoolFactory`] in [`formation`] is the production
//!   implementation, spawning shell workers from the application's Procfile.
//! - Tests provide their own factory that records spawns and hands out
//!   scripted pools.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::dispatch::ProxyRequest;
use crate::env::EnvMap;
use crate::errors::PoolError;

pub mod formation;

pub use formation::{ProcessPool, ProcessPoolFactory};

/// Boxed future used across the pool seams so the traits stay
/// dyn-compatible.
pub type PoolFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Environment key overriding the configured worker count.
pub const WORKERS_VAR: &str = "HARBOR_WORKERS";

/// Environment key overriding the configured idle timeout (seconds).
pub const TIMEOUT_VAR: &str = "HARBOR_TIMEOUT";

/// Everything a concrete pool needs to spawn its workers.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Final composed environment for the workers.
    pub env: EnvMap,
    /// Number of workers, always at least 1.
    pub size: usize,
    /// Idle time after which workers may be reaped; zero disables reaping.
    pub idle: Duration,
}

/// Trait abstracting how worker pools are created.
///
/// The returned future is detached (`'static`) so the supervisor can run the
/// spawn as a background task and keep absorbing lifecycle events while it
/// is in flight.
pub trait PoolFactory: Send + 'static {
    fn create_pool(
        &mut self,
        config: PoolConfig,
    ) -> PoolFuture<'static, Result<Box<dyn WorkerPool>, PoolError>>;
}

/// A live pool of workers, owned exclusively by the lifecycle supervisor.
pub trait WorkerPool: Send + std::fmt::Debug + 'static {
    /// Resolve a live member and rewrite the request's upstream target.
    fn forward<'a>(&'a mut self, req: &'a mut ProxyRequest) -> PoolFuture<'a, Result<(), PoolError>>;

    /// Whether the pool should be recycled after serving a single request.
    fn run_once(&self) -> bool;

    fn set_run_once(&mut self, on: bool);

    /// Terminate every worker. Consumes the pool: ownership moves from the
    /// supervisor into the teardown, and nothing can touch the workers after.
    fn quit(self: Box<Self>) -> PoolFuture<'static, ()>;
}
