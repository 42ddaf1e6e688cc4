use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use harbor::dispatch::ProxyRequest;
use harbor::errors::PoolError;
use harbor::pool::{PoolConfig, PoolFactory, PoolFuture, WorkerPool};

/// Shared observer for everything a [`FakePoolFactory`] and its pools do.
///
/// Tests keep a clone to assert on spawn counts, quit counts, and the
/// configuration each pool was created with.
#[derive(Debug, Default)]
pub struct FactoryProbe {
    pub spawned: AtomicUsize,
    pub quit: AtomicUsize,
    /// Configuration of the most recently created pool.
    pub last_config: Mutex<Option<PoolConfig>>,
    /// When set, the next `create_pool` fails with this message.
    fail_next: Mutex<Option<String>>,
    /// When true, pools refuse to resolve a forwarding target.
    unavailable: AtomicBool,
    /// Artificial teardown latency, to widen interleaving windows.
    quit_delay: Mutex<Option<Duration>>,
    next_id: AtomicUsize,
}

impl FactoryProbe {
    pub fn fail_next_spawn(&self, message: impl Into<String>) {
        self.fail_next.lock().unwrap().replace(message.into());
    }

    pub fn set_quit_delay(&self, delay: Duration) {
        self.quit_delay.lock().unwrap().replace(delay);
    }

    pub fn set_unavailable(&self, on: bool) {
        self.unavailable.store(on, Ordering::SeqCst);
    }

    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn quit(&self) -> usize {
        self.quit.load(Ordering::SeqCst)
    }
}

/// A fake pool factory that:
/// - records every spawn and hands out sequentially numbered pools
/// - can be scripted to fail the next spawn
/// - never touches a real process.
pub struct FakePoolFactory {
    probe: Arc<FactoryProbe>,
}

impl FakePoolFactory {
    pub fn new() -> (Self, Arc<FactoryProbe>) {
        let probe = Arc::new(FactoryProbe::default());
        (
            Self {
                probe: Arc::clone(&probe),
            },
            probe,
        )
    }
}

impl PoolFactory for FakePoolFactory {
    fn create_pool(
        &mut self,
        config: PoolConfig,
    ) -> PoolFuture<'static, Result<Box<dyn WorkerPool>, PoolError>> {
        let probe = Arc::clone(&self.probe);

        Box::pin(async move {
            probe.last_config.lock().unwrap().replace(config);

            if let Some(message) = probe.fail_next.lock().unwrap().take() {
                return Err(PoolError::Spawn(message));
            }

            probe.spawned.fetch_add(1, Ordering::SeqCst);
            let id = probe.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakePool {
                id,
                run_once: false,
                probe,
            }) as Box<dyn WorkerPool>)
        })
    }
}

/// Scripted pool whose forwarding target encodes its identity, so tests can
/// tell pools apart across restarts.
#[derive(Debug)]
pub struct FakePool {
    id: usize,
    run_once: bool,
    probe: Arc<FactoryProbe>,
}

impl WorkerPool for FakePool {
    fn forward<'a>(
        &'a mut self,
        req: &'a mut ProxyRequest,
    ) -> PoolFuture<'a, Result<(), PoolError>> {
        Box::pin(async move {
            if self.probe.unavailable.load(Ordering::SeqCst) {
                return Err(PoolError::Unavailable("scripted unavailable".to_string()));
            }
            req.upstream = Some(format!("fake://pool-{}", self.id));
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
            let delay = *self.probe.quit_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.probe.quit.fetch_add(1, Ordering::SeqCst);
        })
    }
}
