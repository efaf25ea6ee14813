//! # Work abstractions.
//!
//! This module provides the types describing what a managed process runs:
//! - [`Work`] - trait for a synchronous unit of work executed inside the child process
//! - [`WorkFn`] - closure-backed implementation
//! - [`WorkRef`] - shared reference to work (`Arc<dyn Work>`)
//! - [`Args`] - positional arguments handed to work

mod work;
mod work_fn;

pub use work::{Args, Work, WorkRef};
pub use work_fn::WorkFn;
