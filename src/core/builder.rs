use std::path::PathBuf;
use std::sync::Arc;

use nix::errno::Errno;

use crate::config::PoolConfig;
use crate::core::pool::Pool;
use crate::diagnostics::{CrashRef, Diagnostics, DumpRef, ProberRef};
use crate::error::PoolError;
use crate::events::Bus;
use crate::policies::{ExitCodeBehavior, TimeoutBehavior};
use crate::process::ProcessContext;
use crate::shared::Arena;
use crate::store::StoreRef;
use crate::subscribers::Subscribe;

/// Builder for a [`Pool`] with optional collaborators.
///
/// ```no_run
/// use std::sync::Arc;
/// use procvisor::{ExitCodeBehavior, JsonlStore, Pool, PoolConfig, TimeoutBehavior};
///
/// let pool = Pool::builder(PoolConfig::default())
///     .with_timeout_behavior(TimeoutBehavior::Error)
///     .with_exit_code_behavior(ExitCodeBehavior::Ignore)
///     .with_store(Arc::new(JsonlStore::new("/var/tmp/procs.jsonl")))
///     .build()
///     .expect("shared-state segment");
/// ```
pub struct PoolBuilder {
    cfg: PoolConfig,
    timeout_behavior: TimeoutBehavior,
    exit_code_behavior: ExitCodeBehavior,
    subscribers: Vec<Arc<dyn Subscribe>>,
    store: Option<StoreRef>,
    diagnostics: Diagnostics,
}

impl PoolBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: PoolConfig) -> Self {
        Self {
            cfg,
            timeout_behavior: TimeoutBehavior::default(),
            exit_code_behavior: ExitCodeBehavior::default(),
            subscribers: Vec::new(),
            store: None,
            diagnostics: Diagnostics::default(),
        }
    }

    /// What a timed-out process means for `join`.
    pub fn with_timeout_behavior(mut self, behavior: TimeoutBehavior) -> Self {
        self.timeout_behavior = behavior;
        self
    }

    /// What a non-zero exit code means for `join`.
    pub fn with_exit_code_behavior(mut self, behavior: ExitCodeBehavior) -> Self {
        self.exit_code_behavior = behavior;
        self
    }

    /// Sets event subscribers.
    ///
    /// Subscribers receive pool events through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Persistence collaborator for processes with persistence enabled; also
    /// receives the corrupted-worker mark when the shared segment cannot be mapped.
    pub fn with_store(mut self, store: StoreRef) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_crash_reporter(mut self, crash: CrashRef) -> Self {
        self.diagnostics.crash = crash;
        self
    }

    pub fn with_prober(mut self, prober: ProberRef) -> Self {
        self.diagnostics.prober = prober;
        self
    }

    pub fn with_stack_dump(mut self, dump: DumpRef) -> Self {
        self.diagnostics.dump = dump;
        self
    }

    /// Directory listed by the `pgrep` kill probe (`None` skips it).
    pub fn with_install_path(mut self, path: Option<PathBuf>) -> Self {
        self.diagnostics.install_path = path;
        self
    }

    /// Maps the shared-state segment (bounded retry) and returns the pool.
    ///
    /// Subscriber workers start right away inside a tokio runtime, otherwise at
    /// the first `join`.
    pub fn build(self) -> Result<Pool, PoolError> {
        let arena = acquire_arena(&self.cfg, self.store.as_ref(), &self.diagnostics)?;
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let ctx = ProcessContext::new(&self.cfg, self.diagnostics, self.store);

        let mut pool = Pool::assemble(
            self.cfg,
            self.timeout_behavior,
            self.exit_code_behavior,
            arena,
            bus,
            ctx,
            self.subscribers,
        );
        if tokio::runtime::Handle::try_current().is_ok() {
            pool.ensure_listener();
        }
        Ok(pool)
    }
}

fn acquire_arena(
    cfg: &PoolConfig,
    store: Option<&StoreRef>,
    diagnostics: &Diagnostics,
) -> Result<Arc<Arena>, PoolError> {
    let attempts = cfg.acquire_retries.max(1);
    let mut last = Errno::UnknownErrno;

    for attempt in 1..=attempts {
        match Arena::map(cfg.arena_slots, cfg.slot_capacity) {
            Ok(arena) => return Ok(Arc::new(arena)),
            Err(err) => {
                tracing::warn!(target: "procvisor.pool", attempt, attempts, error = %err, "shared-state segment unavailable");
                last = err;
                if attempt < attempts {
                    std::thread::sleep(cfg.acquire_delay);
                }
            }
        }
    }

    let worker = std::process::id();
    if let Some(store) = store {
        if let Err(err) = store.mark_worker_corrupted(worker) {
            diagnostics
                .crash
                .report(&format!("marking worker {worker} corrupted"), &err.to_string());
        }
    }
    Err(PoolError::ResourceAcquisition {
        attempts,
        source: last,
    })
}
