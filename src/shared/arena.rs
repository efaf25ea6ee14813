//! # Shared-memory slot arena.
//!
//! [`Arena`] owns the mapping; [`Slot`] is a cheap handle (arena `Arc` + index) that
//! both the parent and, after `fork`, the child use to reach the same bytes.

use std::fmt;
use std::num::NonZeroUsize;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};

use nix::errno::Errno;
use nix::sys::mman::{MapFlags, ProtFlags, mmap_anonymous, munmap};
use serde_json::Value;
use thiserror::Error;

use crate::shared::now_ms;

const HEADER_LEN: usize = 64;
const ALIGN: usize = 64;

const RET_EMPTY: u8 = 0;
const RET_READY: u8 = 1;

#[repr(C)]
struct SlotHeader {
    running: AtomicBool,
    error: AtomicBool,
    ret_state: AtomicU8,
    _pad: [u8; 5],
    ret_len: AtomicU64,
    start_ms: AtomicU64,
    end_ms: AtomicU64,
}

const _: () = assert!(std::mem::size_of::<SlotHeader>() <= HEADER_LEN);

/// Failure to publish a return value.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SlotError {
    /// The encoded value does not fit the slot's return cell.
    #[error("return value of {len} bytes exceeds slot capacity of {capacity} bytes")]
    TooLarge {
        /// Encoded length.
        len: usize,
        /// Cell capacity.
        capacity: usize,
    },

    /// The value could not be encoded.
    #[error("return value is not serializable: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Anonymous shared mapping split into fixed-size slots.
pub struct Arena {
    base: NonNull<u8>,
    len: usize,
    slots: usize,
    capacity: usize,
    stride: usize,
    next: AtomicUsize,
}

// SAFETY: the mapping is only reached through atomics in slot headers and through
// return cells guarded by the release/acquire `ret_state` protocol.
unsafe impl Send for Arena {}
// SAFETY: see `Send`.
unsafe impl Sync for Arena {}

impl Arena {
    /// Maps a new segment with `slots` slots of `capacity` return bytes each.
    ///
    /// The mapping is zero-filled by the kernel, so every slot starts not running,
    /// not in error, without return value and without timestamps.
    pub fn map(slots: usize, capacity: usize) -> Result<Self, Errno> {
        let slots = slots.max(1);
        let stride = (HEADER_LEN + capacity).div_ceil(ALIGN) * ALIGN;
        let len = slots.checked_mul(stride).ok_or(Errno::ENOMEM)?;
        let length = NonZeroUsize::new(len).ok_or(Errno::EINVAL)?;

        // SAFETY: fresh anonymous mapping, no existing memory is aliased.
        let base = unsafe {
            mmap_anonymous(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED | MapFlags::MAP_NORESERVE,
            )?
        };

        Ok(Self {
            base: base.cast(),
            len,
            slots,
            capacity,
            stride,
            next: AtomicUsize::new(0),
        })
    }

    /// Total number of slots.
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Number of slots already handed out.
    pub fn used(&self) -> usize {
        self.next.load(Ordering::Relaxed).min(self.slots)
    }

    /// Return-cell capacity of each slot, in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Hands out the next free slot, or `None` when the arena is exhausted.
    pub fn slot(self: &Arc<Self>) -> Option<Slot> {
        let index = self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.slots).then_some(n + 1)
            })
            .ok()?;
        Some(Slot {
            arena: Arc::clone(self),
            index,
        })
    }

    fn slot_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.slots);
        // SAFETY: index < slots, so the offset stays inside the mapping.
        unsafe { self.base.as_ptr().add(index * self.stride) }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: `base`/`len` come from the successful mmap in `Arena::map`.
        let _ = unsafe { munmap(self.base.cast(), self.len) };
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("slots", &self.slots)
            .field("used", &self.used())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Handle to one process's region of the arena.
#[derive(Clone)]
pub struct Slot {
    arena: Arc<Arena>,
    index: usize,
}

impl Slot {
    fn header(&self) -> &SlotHeader {
        // SAFETY: the slot start is 64-byte aligned, lies inside the live mapping
        // (kept alive by `self.arena`), and all header fields are atomics.
        unsafe { &*(self.arena.slot_ptr(self.index) as *const SlotHeader) }
    }

    fn cell(&self) -> *mut u8 {
        // SAFETY: header and cell are both within `stride` bytes of the slot start.
        unsafe { self.arena.slot_ptr(self.index).add(HEADER_LEN) }
    }

    /// Position of this slot in its arena.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Whether the work is currently executing.
    pub fn is_running(&self) -> bool {
        self.header().running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.header().running.store(running, Ordering::Release);
    }

    /// Whether the process has been flagged as failed.
    pub fn has_error(&self) -> bool {
        self.header().error.load(Ordering::Acquire)
    }

    pub(crate) fn set_error(&self, error: bool) {
        self.header().error.store(error, Ordering::Release);
    }

    /// Start of execution, unix ms.
    pub fn start_ms(&self) -> Option<u64> {
        match self.header().start_ms.load(Ordering::Acquire) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub(crate) fn mark_started(&self) -> u64 {
        let now = now_ms();
        self.header().start_ms.store(now, Ordering::Release);
        now
    }

    /// End of execution, unix ms.
    pub fn end_ms(&self) -> Option<u64> {
        match self.header().end_ms.load(Ordering::Acquire) {
            0 => None,
            ms => Some(ms),
        }
    }

    /// Stamps the end time unless one is already set. Returns `true` if this call wrote it.
    pub(crate) fn mark_ended(&self) -> bool {
        self.header()
            .end_ms
            .compare_exchange(0, now_ms(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Publishes `value` as the process return value.
    ///
    /// `Null` is treated as "no return value" and leaves the cell empty.
    pub(crate) fn store_return(&self, value: &Value) -> Result<(), SlotError> {
        if value.is_null() {
            return Ok(());
        }
        let bytes = serde_json::to_vec(value)?;
        let capacity = self.arena.capacity;
        if bytes.len() > capacity {
            return Err(SlotError::TooLarge {
                len: bytes.len(),
                capacity,
            });
        }

        let header = self.header();
        header.ret_state.store(RET_EMPTY, Ordering::Release);
        // SAFETY: bytes.len() <= capacity, the cell has `capacity` bytes and no reader
        // touches it while ret_state is EMPTY.
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), self.cell(), bytes.len()) };
        header.ret_len.store(bytes.len() as u64, Ordering::Relaxed);
        header.ret_state.store(RET_READY, Ordering::Release);
        Ok(())
    }

    /// Reads the published return value, if any.
    pub fn read_return(&self) -> Option<Value> {
        let header = self.header();
        if header.ret_state.load(Ordering::Acquire) != RET_READY {
            return None;
        }
        let len = (header.ret_len.load(Ordering::Relaxed) as usize).min(self.arena.capacity);
        let mut buf = vec![0u8; len];
        // SAFETY: READY was observed with acquire ordering, so the writer's copy of
        // `len` bytes into the cell happened before.
        unsafe { ptr::copy_nonoverlapping(self.cell(), buf.as_mut_ptr(), len) };
        match serde_json::from_slice(&buf) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(target: "procvisor.process", slot = self.index, error = %err, "unreadable return value");
                None
            }
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("index", &self.index)
            .field("running", &self.is_running())
            .field("error", &self.has_error())
            .field("start_ms", &self.start_ms())
            .field("end_ms", &self.end_ms())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::wait::{WaitStatus, waitpid};
    use nix::unistd::{ForkResult, fork};

    use crate::process::exit_now;
    use serde_json::json;
    use serial_test::serial;

    fn arena(slots: usize, capacity: usize) -> Arc<Arena> {
        Arc::new(Arena::map(slots, capacity).expect("mmap"))
    }

    #[test]
    fn fresh_slot_is_blank() {
        let a = arena(2, 128);
        let s = a.slot().unwrap();
        assert!(!s.is_running());
        assert!(!s.has_error());
        assert_eq!(s.start_ms(), None);
        assert_eq!(s.end_ms(), None);
        assert_eq!(s.read_return(), None);
    }

    #[test]
    fn slots_run_out() {
        let a = arena(2, 16);
        assert_eq!(a.slot().unwrap().index(), 0);
        assert_eq!(a.slot().unwrap().index(), 1);
        assert!(a.slot().is_none());
        assert_eq!(a.used(), 2);
    }

    #[test]
    fn return_value_roundtrip_and_limits() {
        let a = arena(1, 32);
        let s = a.slot().unwrap();

        s.store_return(&Value::Null).unwrap();
        assert_eq!(s.read_return(), None);

        s.store_return(&json!({"ok": true})).unwrap();
        assert_eq!(s.read_return(), Some(json!({"ok": true})));

        let big = json!("x".repeat(64));
        assert!(matches!(
            s.store_return(&big),
            Err(SlotError::TooLarge { capacity: 32, .. })
        ));
    }

    #[test]
    fn slot_outlives_its_arena_handle() {
        let segment: Arc<crate::Arena> = arena(1, 64);
        let slot: crate::Slot = segment.slot().unwrap();
        drop(segment);

        slot.store_return(&json!([1, 2])).unwrap();
        assert_eq!(slot.read_return(), Some(json!([1, 2])));
        assert!(matches!(
            slot.store_return(&json!("y".repeat(128))),
            Err(crate::SlotError::TooLarge { .. })
        ));
    }

    #[test]
    fn end_time_is_written_once() {
        let a = arena(1, 16);
        let s = a.slot().unwrap();
        assert!(s.mark_ended());
        let first = s.end_ms();
        assert!(!s.mark_ended());
        assert_eq!(s.end_ms(), first);
    }

    #[test]
    #[serial]
    fn child_writes_are_visible_to_parent() {
        let a = arena(4, 256);
        let s = a.slot().unwrap();

        // SAFETY: the child only touches atomics and the mapped cell, then `_exit`s.
        match unsafe { fork() }.expect("fork") {
            ForkResult::Child => {
                s.mark_started();
                s.set_error(true);
                let ok = s.store_return(&json!([1, 2, 3])).is_ok();
                s.mark_ended();
                exit_now(if ok { 0 } else { 1 });
            }
            ForkResult::Parent { child } => {
                assert_eq!(waitpid(child, None).unwrap(), WaitStatus::Exited(child, 0));
                assert!(s.has_error());
                assert!(s.start_ms().is_some());
                assert!(s.end_ms().is_some());
                assert_eq!(s.read_return(), Some(json!([1, 2, 3])));
            }
        }
    }
}
