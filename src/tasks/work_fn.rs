//! # Closure-backed work (`WorkFn`)
//!
//! [`WorkFn`] wraps a closure `F: Fn(&Args) -> Result<Value, TaskError>`.
//! The closure is cloned into the child by `fork`, so captured state is a
//! copy-on-write snapshot: mutations made by the child are never seen by the parent.
//!
//! ## Example
//! ```rust
//! use procvisor::{TaskError, WorkFn, WorkRef};
//! use serde_json::{json, Value};
//!
//! let w: WorkRef = WorkFn::arc("echo", |args: &Vec<Value>| {
//!     Ok::<_, TaskError>(args.first().cloned().unwrap_or(Value::Null))
//! });
//!
//! assert_eq!(w.name(), "echo");
//! assert_eq!(w.run(&vec![json!("hi")]), Ok(json!("hi")));
//! ```

use std::borrow::Cow;
use std::sync::Arc;

use serde_json::Value;

use crate::error::TaskError;
use crate::tasks::work::{Args, Work};

/// Closure-backed work implementation.
#[derive(Debug)]
pub struct WorkFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> WorkFn<F> {
    /// Creates new closure-backed work.
    ///
    /// Prefer [`WorkFn::arc`] when you immediately need a [`WorkRef`](crate::WorkRef).
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self { name: name.into(), f }
    }

    /// Creates the work and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

impl<F> Work for WorkFn<F>
where
    F: Fn(&Args) -> Result<Value, TaskError> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, args: &Args) -> Result<Value, TaskError> {
        (self.f)(args)
    }
}
