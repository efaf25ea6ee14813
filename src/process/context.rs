use std::fmt;
use std::time::Duration;

use crate::config::PoolConfig;
use crate::diagnostics::Diagnostics;
use crate::store::StoreRef;

/// Pool-provided environment of a process: collaborators and default timings.
///
/// A process created outside a pool carries the defaults.
#[derive(Clone)]
pub(crate) struct ProcessContext {
    pub diagnostics: Diagnostics,
    pub store: Option<StoreRef>,
    pub join_timeout: Duration,
    pub dump_wait: Duration,
    pub poll_interval: Duration,
    pub slot_capacity: usize,
}

impl ProcessContext {
    pub fn new(cfg: &PoolConfig, diagnostics: Diagnostics, store: Option<StoreRef>) -> Self {
        Self {
            diagnostics,
            store,
            join_timeout: cfg.join_timeout,
            dump_wait: cfg.dump_wait,
            poll_interval: cfg.poll_interval.max(Duration::from_millis(1)),
            slot_capacity: cfg.slot_capacity,
        }
    }
}

impl Default for ProcessContext {
    fn default() -> Self {
        Self::new(&PoolConfig::default(), Diagnostics::default(), None)
    }
}

impl fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessContext")
            .field("diagnostics", &self.diagnostics)
            .field("store", &self.store.is_some())
            .field("join_timeout", &self.join_timeout)
            .field("dump_wait", &self.dump_wait)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}
