// tests/lifecycle_property.rs

//! Property test driving the pure lifecycle core through arbitrary
//! interleavings of requests and completions, checking the structural
//! invariants the async shell relies on:
//!
//! - the pool is held exactly while the state is `Ready`
//! - at most one environment run / pool spawn / teardown is in flight
//! - every waiter is settled exactly once by the time the machine quiesces

use proptest::prelude::*;
use tokio::sync::oneshot;

use harbor::dispatch::ProxyRequest;
use harbor::env::EnvMap;
use harbor::errors::{InitError, PoolError};
use harbor::lifecycle::{CoreCommand, LifecycleCore, LifecycleState, PoolDefaults};
use harbor::pool::{PoolFuture, WorkerPool};

/// Inert pool used to drive `pool_spawned(Ok(..))`.
#[derive(Debug)]
struct NullPool;

impl WorkerPool for NullPool {
    fn forward<'a>(
        &'a mut self,
        _req: &'a mut ProxyRequest,
    ) -> PoolFuture<'a, Result<(), PoolError>> {
        Box::pin(async { Ok(()) })
    }

    fn run_once(&self) -> bool {
        false
    }

    fn set_run_once(&mut self, _on: bool) {}

    fn quit(self: Box<Self>) -> PoolFuture<'static, ()> {
        Box::pin(async {})
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Ready,
    Quit,
    QuitSilent,
    CompleteOk,
    CompleteErr,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Ready),
        Just(Op::Quit),
        Just(Op::QuitSilent),
        Just(Op::CompleteOk),
        Just(Op::CompleteErr),
    ]
}

/// Which background completion the shell would currently owe the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Env,
    Spawn,
    Stop,
}

#[derive(Default)]
struct Sim {
    pending: Option<Pending>,
    pool_held: bool,
    ready_rxs: Vec<oneshot::Receiver<Result<(), InitError>>>,
    quit_rxs: Vec<oneshot::Receiver<()>>,
}

impl Sim {
    /// Execute a command batch the way the supervisor shell would, checking
    /// structural invariants along the way.
    fn apply(&mut self, commands: Vec<CoreCommand>) -> Result<(), TestCaseError> {
        for command in commands {
            match command {
                CoreCommand::BuildEnvironment => {
                    prop_assert!(self.pending.is_none(), "overlapping background work");
                    self.pending = Some(Pending::Env);
                }
                CoreCommand::SpawnPool(_) => {
                    prop_assert!(self.pending.is_none(), "overlapping background work");
                    self.pending = Some(Pending::Spawn);
                }
                CoreCommand::AdoptPool(_) => {
                    prop_assert!(!self.pool_held, "adopted a second pool");
                    self.pool_held = true;
                }
                CoreCommand::StopPool => {
                    prop_assert!(self.pool_held, "stopping a pool that is not held");
                    prop_assert!(self.pending.is_none(), "overlapping background work");
                    self.pool_held = false;
                    self.pending = Some(Pending::Stop);
                }
                CoreCommand::ClearSentinel => {}
                CoreCommand::NotifyReady { waiters, result } => {
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
        Ok(())
    }

    fn complete(&mut self, core: &mut LifecycleCore, ok: bool) -> Result<(), TestCaseError> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        let commands = match (pending, ok) {
            (Pending::Env, true) => core.env_loaded(Ok(EnvMap::new())),
            (Pending::Env, false) => core.env_loaded(Err(InitError::Spawn("env".into()))),
            (Pending::Spawn, true) => core.pool_spawned(Ok(Box::new(NullPool))),
            (Pending::Spawn, false) => core.pool_spawned(Err(InitError::Spawn("pool".into()))),
            // Teardown cannot fail.
            (Pending::Stop, _) => core.pool_stopped(),
        };
        self.apply(commands)
    }

    fn check_consistency(&self, core: &LifecycleCore) -> Result<(), TestCaseError> {
        prop_assert_eq!(
            self.pool_held,
            core.state() == LifecycleState::Ready,
            "pool held iff state is Ready (state: {:?})",
            core.state()
        );

        match core.state() {
            LifecycleState::Uninitialized => {
                prop_assert_eq!(core.ready_waiting(), 0);
                prop_assert_eq!(core.quit_waiting(), 0);
                prop_assert!(self.pending.is_none());
            }
            LifecycleState::Ready => {
                prop_assert_eq!(core.ready_waiting(), 0);
                prop_assert_eq!(core.quit_waiting(), 0);
                prop_assert!(self.pending.is_none());
            }
            LifecycleState::Initializing | LifecycleState::Terminating => {
                prop_assert!(self.pending.is_some(), "active state with no work in flight");
            }
        }
        Ok(())
    }
}

proptest! {
    #[test]
    fn lifecycle_invariants_hold_under_arbitrary_interleavings(
        ops in proptest::collection::vec(op_strategy(), 0..60)
    ) {
        let mut core = LifecycleCore::new(PoolDefaults {
            workers: 2,
            idle: std::time::Duration::from_secs(900),
        });
        let mut sim = Sim::default();

        for op in ops {
            match op {
                Op::Ready => {
                    let (tx, rx) = oneshot::channel();
                    sim.ready_rxs.push(rx);
                    let commands = core.request_ready(tx);
                    sim.apply(commands)?;
                }
                Op::Quit => {
                    let (tx, rx) = oneshot::channel();
                    sim.quit_rxs.push(rx);
                    let commands = core.request_quit(Some(tx));
                    sim.apply(commands)?;
                }
                Op::QuitSilent => {
                    let commands = core.request_quit(None);
                    sim.apply(commands)?;
                }
                Op::CompleteOk => sim.complete(&mut core, true)?,
                Op::CompleteErr => sim.complete(&mut core, false)?,
            }
            sim.check_consistency(&core)?;
        }

        // Drive the machine to quiescence; every parked waiter must settle.
        let mut steps = 0;
        while sim.pending.is_some() {
            sim.complete(&mut core, true)?;
            sim.check_consistency(&core)?;
            steps += 1;
            prop_assert!(steps < 100, "machine failed to quiesce");
        }

        prop_assert!(matches!(
            core.state(),
            LifecycleState::Uninitialized | LifecycleState::Ready
        ));

        for rx in &mut sim.ready_rxs {
            prop_assert!(rx.try_recv().is_ok(), "ready waiter never settled");
        }
        for rx in &mut sim.quit_rxs {
            prop_assert!(rx.try_recv().is_ok(), "quit waiter never settled");
        }
    }
}
