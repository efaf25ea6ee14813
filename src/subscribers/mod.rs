//! # Event subscribers.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out and
//! the built-in [`LogWriter`] (feature `logging`).
//!
//! ## Architecture
//! ```text
//! Pool ── publish(Event) ──► Bus ──► subscriber listener ──► SubscriberSet
//!                                                               │
//!                                        ┌──────────────┬───────┴──────┐
//!                                        ▼              ▼              ▼
//!                                    LogWriter       Metrics         Custom
//! ```
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use procvisor::{Subscribe, Event, EventKind};
//! use async_trait::async_trait;
//!
//! struct Pager;
//!
//! #[async_trait]
//! impl Subscribe for Pager {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == EventKind::TimeoutHit {
//!             // page someone
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "pager" }
//! }
//! ```

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscriber;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
