//! # LogWriter: pool events through `tracing`
//!
//! Renders every [`Event`] as one `tracing` record under `procvisor.events`.
//! Failures (timeouts, stuck processes, kills, subscriber trouble) are logged at
//! `warn`, everything else at `info`.
//!
//! ## Example output (fmt layer)
//! ```text
//! INFO procvisor.events: [spawned] process="backup-1" pid=4242
//! WARN procvisor.events: [timeout] process="backup-1" pid=4242 timeout_ms=1000
//! WARN procvisor.events: [killed] process="backup-1" pid=4242 how="hard-killed"
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

const TARGET: &str = "procvisor.events";

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let process = e.process.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::PoolWorking => tracing::info!(target: TARGET, "[pool-working]"),
            EventKind::PoolDone => tracing::info!(target: TARGET, "[pool-done]"),
            EventKind::PoolKilled => {
                tracing::warn!(target: TARGET, "[pool-killed] reason={:?}", e.reason.as_deref())
            }
            EventKind::ProcessQueued => tracing::info!(
                target: TARGET,
                "[queued] process={process:?} position={:?}",
                e.attempt
            ),
            EventKind::ProcessSpawned => tracing::info!(
                target: TARGET,
                "[spawned] process={process:?} pid={:?}",
                e.pid
            ),
            EventKind::ProcessExited => tracing::info!(
                target: TARGET,
                "[exited] process={process:?} pid={:?} code={:?}",
                e.pid,
                e.exit_code
            ),
            EventKind::TimeoutHit => tracing::warn!(
                target: TARGET,
                "[timeout] process={process:?} pid={:?} timeout_ms={:?}",
                e.pid,
                e.timeout_ms
            ),
            EventKind::StuckDetected => tracing::warn!(
                target: TARGET,
                "[stuck] process={process:?} pid={:?} threshold_ms={:?}",
                e.pid,
                e.timeout_ms
            ),
            EventKind::ProcessRespawned => tracing::warn!(
                target: TARGET,
                "[respawned] process={process:?} from={:?} respawn={:?} delay_ms={:?}",
                e.reason.as_deref(),
                e.attempt,
                e.delay_ms
            ),
            EventKind::ProcessKilled => tracing::warn!(
                target: TARGET,
                "[killed] process={process:?} pid={:?} how={:?}",
                e.pid,
                e.reason.as_deref()
            ),
            EventKind::SubscriberOverflow => tracing::warn!(
                target: TARGET,
                "[subscriber-overflow] subscriber={process:?} reason={:?}",
                e.reason.as_deref()
            ),
            EventKind::SubscriberPanicked => tracing::warn!(
                target: TARGET,
                "[subscriber-panicked] subscriber={process} info={}",
                e.reason.as_deref().unwrap_or("unknown")
            ),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
