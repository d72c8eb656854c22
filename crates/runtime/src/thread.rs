//! Threading primitives and indirect calls.
//!
//! `spawn` maps to an OS thread. Each spawned task gets its own freshly
//! created context (nothing is shared with the parent stack); the thread
//! identifier pushed on the parent's stack is consumed by `wait` (join)
//! or `detach`. There is no implicit synchronisation between tasks.

use crate::context::{QdContext, qd_create_context, qd_free_context};
use crate::stack::{
    QdExecResult, QdStackElement, QdStackType, fatal, raw_pop, raw_push, require_depth,
};
use std::thread::JoinHandle;

/// Entry signature for compiled Quadrate functions.
pub type QdFunction = unsafe extern "C" fn(*mut QdContext) -> QdExecResult;

/// Wrapper so the raw context pointer can cross the thread boundary.
struct ThreadTask {
    func: QdFunction,
    ctx: *mut QdContext,
}

// The spawned context is owned exclusively by the new thread.
unsafe impl Send for ThreadTask {}

/// ( p -- ). Pop a function pointer and call it on the current context.
///
/// # Safety
/// `ctx` must be a live context; the pointer must be a compiled Quadrate
/// function.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_call(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        require_depth(ctx, "call", 1);
        let val = raw_pop(ctx, "call");
        if val.ty != QdStackType::Ptr as u32 {
            fatal(ctx, "call", "Type error (expected function pointer)");
        }
        let p = val.as_ptr();
        if p.is_null() {
            fatal(ctx, "call", "Null function pointer");
        }
        let func: QdFunction = std::mem::transmute(p);
        func(ctx)
    }
}

/// ( fn:p -- thread_id:i ). Start the function on a new OS thread with a
/// fresh context.
///
/// # Safety
/// `ctx` must be a live context; the pointer must be a compiled Quadrate
/// function.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_spawn(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        require_depth(ctx, "spawn", 1);
        let val = raw_pop(ctx, "spawn");
        if val.ty != QdStackType::Ptr as u32 {
            fatal(ctx, "spawn", "Type error (expected function pointer)");
        }
        let p = val.as_ptr();
        if p.is_null() {
            fatal(ctx, "spawn", "Null function pointer");
        }

        let thread_ctx = qd_create_context(1024);
        if thread_ctx.is_null() {
            fatal(ctx, "spawn", "Allocation failure (context)");
        }
        let task = ThreadTask {
            func: std::mem::transmute::<*mut libc::c_void, QdFunction>(p),
            ctx: thread_ctx,
        };

        let handle = std::thread::Builder::new()
            .spawn(move || {
                let task = task;
                // the context is exclusively owned by this task
                unsafe {
                    (task.func)(task.ctx);
                    qd_free_context(task.ctx);
                }
            });
        let handle = match handle {
            Ok(h) => h,
            Err(_) => fatal(ctx, "spawn", "Failed to start thread"),
        };

        let id = Box::into_raw(Box::new(handle)) as i64;
        raw_push(ctx, QdStackElement::int(id))
    }
}

unsafe fn pop_handle(ctx: *mut QdContext, op: &str) -> Box<JoinHandle<()>> {
    unsafe {
        require_depth(ctx, op, 1);
        let val = raw_pop(ctx, op);
        if val.ty != QdStackType::Int as u32 {
            fatal(ctx, op, "Type error (expected thread identifier)");
        }
        let raw = val.as_int();
        if raw == 0 {
            fatal(ctx, op, "Invalid thread identifier");
        }
        Box::from_raw(raw as *mut JoinHandle<()>)
    }
}

/// ( thread_id:i -- ). Release the handle; the thread keeps running.
///
/// # Safety
/// `ctx` must be a live context; the identifier must come from `spawn`
/// and must not have been waited on or detached already.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_detach(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        let handle = pop_handle(ctx, "detach");
        drop(handle); // detaches: JoinHandle drop does not join
    }
    QdExecResult::ok()
}

/// ( thread_id:i -- ). Block until the thread exits.
///
/// # Safety
/// `ctx` must be a live context; the identifier must come from `spawn`
/// and must not have been waited on or detached already.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_wait(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        let handle = pop_handle(ctx, "wait");
        if handle.join().is_err() {
            fatal(ctx, "wait", "Thread terminated abnormally");
        }
    }
    QdExecResult::ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::{qd_push_i, qd_push_p, raw_pop};
    use std::sync::atomic::{AtomicI64, Ordering};

    static SPAWN_WITNESS: AtomicI64 = AtomicI64::new(0);

    unsafe extern "C" fn entry_sets_witness(ctx: *mut QdContext) -> QdExecResult {
        unsafe {
            // the spawned context starts empty and is private to this task
            assert_eq!((*(*ctx).st).size, 0);
            qd_push_i(ctx, 1);
        }
        SPAWN_WITNESS.store(99, Ordering::SeqCst);
        QdExecResult::ok()
    }

    unsafe extern "C" fn entry_pushes(ctx: *mut QdContext) -> QdExecResult {
        unsafe { qd_push_i(ctx, 41) };
        unsafe { crate::arithmetic::qd_inc(ctx) }
    }

    #[test]
    fn test_spawn_wait_runs_entry() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_p(ctx, entry_sets_witness as *mut libc::c_void);
            qd_spawn(ctx);
            let id = raw_pop(ctx, "t");
            assert_eq!(id.type_tag(), Some(QdStackType::Int));
            crate::stack::raw_push(ctx, id);
            qd_wait(ctx);
            assert_eq!(SPAWN_WITNESS.load(Ordering::SeqCst), 99);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_call_invokes_on_current_context() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_p(ctx, entry_pushes as *mut libc::c_void);
            qd_call(ctx);
            assert_eq!(raw_pop(ctx, "t").as_int(), 42);
            qd_free_context(ctx);
        }
    }
}
