//! Pool events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to publish
//! supervisory transitions of a [`Pool`](crate::Pool).
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Pool` (admission, join loop, kills), `SubscriberSet` workers
//!   (overflow/panic).
//! - **Consumers**: the pool's subscriber listener (fans out to `SubscriberSet`) and
//!   any receiver handed out by [`Pool::subscribe`](crate::Pool::subscribe).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
