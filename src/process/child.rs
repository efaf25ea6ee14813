//! Child-side lifecycle of a managed process.
//!
//! Runs right after `fork` in the child and never returns: the outcome becomes the
//! exit status passed to `_exit`, which skips atexit handlers and destructors that
//! belong to the parent.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use serde_json::Value;

use crate::diagnostics::DumpTarget;
use crate::error::TaskError;
use crate::process::ManagedProcess;
use crate::shared::Slot;
use crate::tasks::{Args, Work};

const PANIC_EXIT: i32 = 101;

pub(crate) fn run(process: &ManagedProcess, slot: &Slot) -> ! {
    let code = panic::catch_unwind(AssertUnwindSafe(|| lifecycle(process, slot)))
        .unwrap_or(PANIC_EXIT);
    exit_now(code)
}

/// Leaves the child without running the parent's atexit handlers or destructors.
pub(crate) fn exit_now(code: i32) -> ! {
    // SAFETY: `_exit` only terminates the calling process; nothing is touched afterwards.
    unsafe { nix::libc::_exit(code) }
}

fn lifecycle(p: &ManagedProcess, slot: &Slot) -> i32 {
    let pid = std::process::id();
    let diag = &p.ctx.diagnostics;

    let target = DumpTarget {
        id: p.id().to_owned(),
        work: p.work().name().to_owned(),
        args: Value::Array(p.args().clone()).to_string(),
        started: Instant::now(),
        sink: p.log_sink().clone(),
    };
    if let Err(err) = diag.dump.install(target) {
        tracing::warn!(target: "procvisor.child", id = %p.id(), error = %err, "stack dump handler not installed");
    }

    tracing::info!(target: "procvisor.child", id = %p.id(), pid, work = p.work().name(), "invoking work");
    slot.mark_started();
    slot.set_running(true);
    p.persist_state(true);

    let outcome = call(p.work().as_ref(), p.args()).and_then(|value| {
        slot.store_return(&value)
            .map_err(|err| TaskError::fail(err.to_string()))
    });

    if let Err(err) = outcome {
        diag.crash.report(
            &format!("work {} failed in process {}", p.work().name(), p.id()),
            &err.as_message(),
        );
        return fail(p, slot, pid, &err);
    }

    slot.mark_ended();
    slot.set_error(false);
    p.persist_state(false);

    if let Some((hook, args)) = p.on_finish() {
        if let Err(err) = call(hook.as_ref(), args) {
            return fail(p, slot, pid, &err);
        }
    }

    tracing::info!(target: "procvisor.child", id = %p.id(), pid, "process ended successfully");
    0
}

fn fail(p: &ManagedProcess, slot: &Slot, pid: u32, err: &TaskError) -> i32 {
    let sink = p.log_sink();
    sink.write(&format!("Failure on process: {}", p.describe_as(Some(pid as i32))));
    sink.write(&err.to_string());

    slot.set_error(true);
    slot.mark_ended();
    p.persist_state(false);

    tracing::warn!(target: "procvisor.child", id = %p.id(), pid, error = %err, "process ended with error");
    err.exit_code()
}

fn call(work: &dyn Work, args: &Args) -> Result<Value, TaskError> {
    match panic::catch_unwind(AssertUnwindSafe(|| work.run(args))) {
        Ok(result) => result,
        Err(payload) => Err(TaskError::Panicked {
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_owned()
    }
}
