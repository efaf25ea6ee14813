//! # Pool admission
//!
//! At most `limit` managed processes are alive at once. A submission that finds the
//! pool full is parked in a FIFO wait queue and dispatched, in submission order,
//! as soon as capacity frees up.
//!
//! ## Invariants
//! - Queued processes are dispatched strictly in submission order.
//! - A queued process has not been forked.

use std::collections::VecDeque;

use crate::process::ManagedProcess;

/// Concurrency limit plus FIFO wait queue.
#[derive(Debug)]
pub(crate) struct Admission {
    limit: usize,
    queue: VecDeque<ManagedProcess>,
}

impl Admission {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            queue: VecDeque::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Whether one more process may be dispatched while `alive` are running.
    pub fn has_capacity(&self, alive: usize) -> bool {
        alive < self.limit
    }

    /// Parks a process; returns its 1-based queue position.
    pub fn enqueue(&mut self, process: ManagedProcess) -> usize {
        self.queue.push_back(process);
        self.queue.len()
    }

    /// Next queued process, if capacity allows.
    pub fn next_ready(&mut self, alive: usize) -> Option<ManagedProcess> {
        if self.has_capacity(alive) {
            self.queue.pop_front()
        } else {
            None
        }
    }

    /// Puts back a process whose dispatch failed, ahead of everything else.
    pub fn requeue_front(&mut self, process: ManagedProcess) {
        self.queue.push_front(process);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.queue.iter().any(|p| p.id() == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.queue.iter().map(ManagedProcess::id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drops every queued process (they never started).
    pub fn clear(&mut self) -> Vec<ManagedProcess> {
        self.queue.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::tasks::{Args, WorkFn};
    use serde_json::Value;

    fn process(id: &str) -> ManagedProcess {
        let work = WorkFn::arc("noop", |_: &Args| Ok::<_, TaskError>(Value::Null));
        ManagedProcess::new(work, Vec::new()).with_id(id)
    }

    #[test]
    fn fifo_under_capacity() {
        let mut adm = Admission::new(2);
        assert_eq!(adm.enqueue(process("a")), 1);
        assert_eq!(adm.enqueue(process("b")), 2);
        assert_eq!(adm.enqueue(process("c")), 3);
        assert_eq!(adm.ids(), vec!["a", "b", "c"]);

        assert!(adm.next_ready(2).is_none());
        assert_eq!(adm.next_ready(1).map(|p| p.id().to_owned()).as_deref(), Some("a"));
        assert_eq!(adm.next_ready(0).map(|p| p.id().to_owned()).as_deref(), Some("b"));
        assert!(adm.contains("c"));
        assert!(!adm.contains("a"));
    }

    #[test]
    fn zero_limit_still_admits_one() {
        let adm = Admission::new(0);
        assert_eq!(adm.limit(), 1);
        assert!(adm.has_capacity(0));
        assert!(!adm.has_capacity(1));
    }

    #[test]
    fn requeued_process_goes_first() {
        let mut adm = Admission::new(1);
        adm.enqueue(process("a"));
        adm.enqueue(process("b"));
        let a = adm.next_ready(0).unwrap();
        adm.requeue_front(a);
        assert_eq!(adm.ids(), vec!["a", "b"]);
    }

    #[test]
    fn clear_discards_queue() {
        let mut adm = Admission::new(1);
        adm.enqueue(process("a"));
        adm.enqueue(process("b"));
        assert_eq!(adm.clear().len(), 2);
        assert!(adm.is_empty());
    }
}
