//! # Work executed by a managed process.
//!
//! [`Work`] runs inside the forked child, synchronously, with its positional
//! [`Args`]. Its result never travels back as a Rust value: a successful result is
//! serialized into the process's shared slot and a failure is turned into an exit
//! status by the child entry point.
//!
//! Work must not rely on the parent's async runtime. A fork only carries the calling
//! thread, so runtime worker threads do not exist in the child.

use std::sync::Arc;

use serde_json::Value;

use crate::error::TaskError;

/// Positional arguments handed to [`Work::run`].
pub type Args = Vec<Value>;

/// Shared handle to work.
pub type WorkRef = Arc<dyn Work>;

/// # Synchronous unit of work.
///
/// A `Work` has a stable [`name`](Work::name) (used as default process name and in
/// diagnostics) and a [`run`](Work::run) method producing a JSON return value.
///
/// Returning [`Value::Null`] means "no return value"; nothing is stored.
///
/// # Example
/// ```
/// use procvisor::{Args, TaskError, Work};
/// use serde_json::{json, Value};
///
/// struct Sum;
///
/// impl Work for Sum {
///     fn name(&self) -> &str { "sum" }
///
///     fn run(&self, args: &Args) -> Result<Value, TaskError> {
///         let total: i64 = args.iter().filter_map(Value::as_i64).sum();
///         Ok(json!(total))
///     }
/// }
///
/// assert_eq!(Sum.run(&vec![json!(1), json!(2)]), Ok(json!(3)));
/// ```
pub trait Work: Send + Sync + 'static {
    /// Returns a stable, human-readable work name.
    fn name(&self) -> &str;

    /// Runs the work to completion inside the managed process.
    fn run(&self, args: &Args) -> Result<Value, TaskError>;
}
