// src/dispatch.rs

//! Request gating.
//!
//! [`dispatch`] is the path every inbound request takes before it can reach a
//! worker: suspend the body stream, wait for the pool to be ready, refresh
//! the run-once flag, honour a pending restart request, then have the pool
//! resolve a forwarding target. The actual proxying and the response are the
//! embedding front-end's business; this module only rewrites the request and
//! reports how far it got.

use tracing::debug;

use crate::app::AppHandle;
use crate::errors::DispatchError;

/// Transport-level pause/resume of an inbound request's body stream.
///
/// Provided by the embedding server; pausing before any asynchronous work
/// keeps body bytes from being lost while the pool spins up.
pub trait FlowControl: Send {
    fn pause(&mut self);
    fn resume(&mut self);
}

/// No-op flow control for transports that buffer on their own.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnbufferedFlow;

impl FlowControl for UnbufferedFlow {
    fn pause(&mut self) {}
    fn resume(&mut self) {}
}

/// The dispatcher's view of an inbound request.
pub struct ProxyRequest {
    /// Where the front-end should proxy the request once dispatch succeeds.
    pub upstream: Option<String>,
    /// Set when the pool is in run-once mode: the front-end should quit the
    /// application after this response completes so the next request gets a
    /// fresh pool.
    pub recycle: bool,
    flow: Box<dyn FlowControl>,
}

impl std::fmt::Debug for ProxyRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyRequest")
            .field("upstream", &self.upstream)
            .field("recycle", &self.recycle)
            .finish_non_exhaustive()
    }
}

impl ProxyRequest {
    pub fn new(flow: Box<dyn FlowControl>) -> Self {
        Self {
            upstream: None,
            recycle: false,
            flow,
        }
    }

    pub fn pause(&mut self) {
        self.flow.pause();
    }

    pub fn resume(&mut self) {
        self.flow.resume();
    }
}

/// Gate `req` behind the application's lifecycle and resolve its upstream.
///
/// The request comes back in every case (rewritten on success, untouched on
/// failure) together with the dispatch verdict, and its body stream is
/// resumed exactly once as the very last step of either path. Failures fail
/// this request only; nothing here retries on the client's behalf.
pub async fn dispatch(
    app: &AppHandle,
    mut req: ProxyRequest,
) -> (ProxyRequest, Result<(), DispatchError>) {
    // Before anything can suspend: stop consuming the body.
    req.pause();

    let (mut req, result) = match gate(app).await {
        Ok(()) => app.forward(req).await,
        Err(err) => (req, Err(err)),
    };

    if let Err(err) = &result {
        debug!(app = %app.root().display(), error = %err, "request dispatch failed");
    }

    // Resume regardless of outcome, exactly once.
    req.resume();
    (req, result)
}

async fn gate(app: &AppHandle) -> Result<(), DispatchError> {
    app.ready().await?;

    let run_once = app.refresh_run_once().await;
    app.set_run_once(run_once).await;

    if app.check_restart().await {
        debug!(app = %app.root().display(), "restart sentinel changed; cycling pool");
        app.restart().await?;
    }

    Ok(())
}
