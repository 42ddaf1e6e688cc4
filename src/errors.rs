// src/errors.rs

//! Crate-wide error types.
//!
//! Errors that are delivered to queued lifecycle waiters fan out to every
//! caller of the same attempt, so they are `Clone` and carry only owned
//! string/path payloads.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarborError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, HarborError>;

/// A shell script sourced by the environment pipeline failed.
///
/// Carries the captured stdout/stderr so the failure can be logged and
/// reported to every caller waiting on the initialization attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("sourcing {script:?} failed with status {status:?}: {stderr}")]
pub struct SourcingError {
    pub script: PathBuf,
    /// Exit status of the shell, if it exited at all.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Why an initialization attempt failed.
///
/// Delivered to every `ready` waiter queued on the attempt; the instance
/// falls back to uninitialized so a later call retries from scratch.
#[derive(Error, Debug, Clone)]
pub enum InitError {
    #[error(transparent)]
    Sourcing(#[from] SourcingError),

    #[error("worker pool spawn failed: {0}")]
    Spawn(String),

    #[error("application supervisor is no longer running")]
    Stopped,
}

/// Errors surfaced by a concrete pool implementation.
#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("failed to spawn worker pool: {0}")]
    Spawn(String),

    #[error("no worker available: {0}")]
    Unavailable(String),
}

/// Why a dispatched request could not be forwarded.
///
/// These fail the individual request only; the surrounding front-end decides
/// what to send back to the client.
#[derive(Error, Debug, Clone)]
pub enum DispatchError {
    #[error(transparent)]
    Init(#[from] InitError),

    #[error("no worker available to receive the request: {0}")]
    PoolUnavailable(String),

    #[error("application supervisor is no longer running")]
    Stopped,
}
