// src/lib.rs

//! `harbor` supervises one application's worker pool on a local
//! multi-application host and gates every inbound request on that pool's
//! lifecycle.
//!
//! The pieces, leaf first:
//!
//! - [`env`] composes the base configuration environment with shell-sourced
//!   project overlays into the environment the workers run in.
//! - [`sentinel`] watches the per-application sentinel files: an
//!   mtime-triggered restart request and an existence-triggered run-once
//!   mode.
//! - [`pool`] is the pluggable worker-pool contract plus the production
//!   Procfile-backed implementation.
//! - [`lifecycle`] is the state machine and supervisor actor that brings the
//!   pool up exactly once under concurrent demand and tears it down without
//!   dropping queued callers.
//! - [`dispatch`] gates an inbound request behind `ready`, honours restart
//!   requests, and resolves the request's upstream target.
//! - [`app`] wires everything together behind an [`app::AppHandle`].
//!
//! ```no_run
//! use harbor::config::Settings;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! harbor::logging::init_logging(None)?;
//! let app = harbor::launch("/srv/apps/example", &Settings::default());
//! app.ready().await?;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod config;
pub mod dispatch;
pub mod env;
pub mod errors;
pub mod fs;
pub mod lifecycle;
pub mod logging;
pub mod pool;
pub mod sentinel;

pub use app::{launch, spawn_app, AppHandle};
pub use dispatch::{dispatch, FlowControl, ProxyRequest};
