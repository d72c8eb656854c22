//! Execution contexts and the debug call stack.
//!
//! A context bundles the operand stack, the error flag, the program's
//! command line, and a small ring of call-stack frame names used for
//! traces. The first five fields of [`QdContext`] are addressed by offset
//! from generated code; their order is part of the ABI.

use crate::stack::{QdStackElement, deep_copy, free_element};
use libc::{c_char, c_int};

/// Maximum tracked call-stack depth. Deeper frames are silently dropped
/// from traces (execution itself is unaffected).
pub const QD_CALL_STACK_MAX: usize = 256;

/// The operand stack: a fixed-capacity array of tagged elements.
#[repr(C)]
pub struct QdStack {
    pub elements: *mut QdStackElement,
    pub size: usize,
    pub capacity: usize,
}

/// Per-program (or per-thread) execution state.
///
/// ABI: generated code addresses `st` (field 0) and `has_error` (field 1)
/// through a `{ ptr, i8, i32, ptr, ptr }` prefix view of this struct.
#[repr(C)]
pub struct QdContext {
    pub st: *mut QdStack,
    pub has_error: bool,
    pub argc: c_int,
    pub argv: *mut *mut c_char,
    pub program_name: *mut c_char,
    pub call_stack: [*const c_char; QD_CALL_STACK_MAX],
    pub call_depth: usize,
}

/// Allocate and initialize a context with the given stack capacity.
/// Returns null on allocation failure.
///
/// # Safety
/// Free the result with `qd_free_context`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_create_context(stack_size: usize) -> *mut QdContext {
    let capacity = if stack_size == 0 { 1024 } else { stack_size };
    let mut elements = Vec::<QdStackElement>::with_capacity(capacity);
    let elements_ptr = elements.as_mut_ptr();
    std::mem::forget(elements);

    let stack = Box::new(QdStack {
        elements: elements_ptr,
        size: 0,
        capacity,
    });

    let ctx = Box::new(QdContext {
        st: Box::into_raw(stack),
        has_error: false,
        argc: 0,
        argv: std::ptr::null_mut(),
        program_name: std::ptr::null_mut(),
        call_stack: [std::ptr::null(); QD_CALL_STACK_MAX],
        call_depth: 0,
    });
    Box::into_raw(ctx)
}

/// Release a context, its stack, and any strings still on the stack.
/// Null is a no-op.
///
/// # Safety
/// `ctx` must come from `qd_create_context`/`qd_clone_context` and must
/// not be used afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_free_context(ctx: *mut QdContext) {
    if ctx.is_null() {
        return;
    }
    unsafe {
        let ctx_box = Box::from_raw(ctx);
        let stack = Box::from_raw(ctx_box.st);
        for i in 0..stack.size {
            free_element(&*stack.elements.add(i));
        }
        drop(Vec::from_raw_parts(stack.elements, 0, stack.capacity));
    }
}

/// Deep-copy a context: the stack and every string on it are duplicated.
/// Command-line arguments and the program name are shared, not copied.
/// Used by `ctx` blocks for isolated execution.
///
/// # Safety
/// `src` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_clone_context(src: *const QdContext) -> *mut QdContext {
    if src.is_null() {
        return std::ptr::null_mut();
    }
    unsafe {
        let src_ref = &*src;
        let src_stack = &*src_ref.st;
        let clone = qd_create_context(src_stack.capacity);
        if clone.is_null() {
            return clone;
        }
        let clone_ref = &mut *clone;
        let clone_stack = &mut *clone_ref.st;
        for i in 0..src_stack.size {
            clone_stack
                .elements
                .add(i)
                .write(deep_copy(&*src_stack.elements.add(i)));
        }
        clone_stack.size = src_stack.size;
        clone_ref.has_error = src_ref.has_error;
        clone_ref.argc = src_ref.argc;
        clone_ref.argv = src_ref.argv;
        clone_ref.program_name = src_ref.program_name;
        clone
    }
}

/// Record the command line in the context. Called once from the generated
/// `main` prologue; the program name is `argv[0]`.
///
/// # Safety
/// `argv` must be valid for `argc` entries (or null with argc 0).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_set_args(ctx: *mut QdContext, argc: c_int, argv: *mut *mut c_char) {
    unsafe {
        (*ctx).argc = argc;
        (*ctx).argv = argv;
        (*ctx).program_name = if argc > 0 && !argv.is_null() {
            *argv
        } else {
            std::ptr::null_mut()
        };
    }
}

/// Push a frame name for traces. The pointer is stored as-is and must
/// outlive the frame (generated code passes string constants).
///
/// # Safety
/// `func_name` must be a static NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_push_call(ctx: *mut QdContext, func_name: *const c_char) {
    unsafe {
        let ctx_ref = &mut *ctx;
        if ctx_ref.call_depth < QD_CALL_STACK_MAX {
            ctx_ref.call_stack[ctx_ref.call_depth] = func_name;
        }
        ctx_ref.call_depth += 1;
    }
}

/// Pop the most recent frame name.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_pop_call(ctx: *mut QdContext) {
    unsafe {
        let ctx_ref = &mut *ctx;
        if ctx_ref.call_depth > 0 {
            ctx_ref.call_depth -= 1;
        }
    }
}

pub(crate) unsafe fn print_stack_trace(ctx: *mut QdContext) {
    unsafe {
        let ctx_ref = &*ctx;
        if ctx_ref.call_depth == 0 {
            return;
        }
        eprintln!("\nCall stack (most recent first):");
        let tracked = ctx_ref.call_depth.min(QD_CALL_STACK_MAX);
        for i in (0..tracked).rev() {
            let name = ctx_ref.call_stack[i];
            if name.is_null() {
                eprintln!("  #{} <unknown>", tracked - 1 - i);
            } else {
                let s = std::ffi::CStr::from_ptr(name);
                eprintln!("  #{} {}", tracked - 1 - i, s.to_string_lossy());
            }
        }
        if ctx_ref.call_depth > QD_CALL_STACK_MAX {
            eprintln!("  ... {} deeper frames not tracked", ctx_ref.call_depth - QD_CALL_STACK_MAX);
        }
    }
}

/// Print the current call-stack trace to stderr.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_print_stack_trace(ctx: *mut QdContext) {
    unsafe { print_stack_trace(ctx) }
}

/// Print the data stack to stderr. Debugger convenience; also used by the
/// fatal paths.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_debug_print_stack(ctx: *mut QdContext) {
    unsafe { crate::stack::dump_stack(ctx) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::{QdStackType, qd_push_i, qd_push_s, raw_pop};
    use std::ffi::{CStr, CString};

    #[test]
    fn test_create_and_free() {
        unsafe {
            let ctx = qd_create_context(64);
            assert!(!ctx.is_null());
            assert!(!(*ctx).has_error);
            assert_eq!((*(*ctx).st).capacity, 64);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_free_reclaims_strings() {
        unsafe {
            let ctx = qd_create_context(8);
            let s = CString::new("leak check").unwrap();
            qd_push_s(ctx, s.as_ptr());
            // freeing with a string still on the stack must not leak or crash
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_clone_is_deep() {
        unsafe {
            let ctx = qd_create_context(8);
            let s = CString::new("shared?").unwrap();
            qd_push_s(ctx, s.as_ptr());
            qd_push_i(ctx, 7);

            let clone = qd_clone_context(ctx);
            assert_eq!((*(*clone).st).size, 2);

            // mutate the clone; the original must be unaffected
            let top = raw_pop(clone, "test");
            assert_eq!(top.as_int(), 7);
            let cloned_str = raw_pop(clone, "test");
            assert_eq!(cloned_str.type_tag(), Some(QdStackType::Str));

            let orig_str = raw_pop(ctx, "test"); // pops the 7 first
            assert_eq!(orig_str.as_int(), 7);
            let orig = raw_pop(ctx, "test");
            assert_ne!(orig.as_str_ptr(), cloned_str.as_str_ptr());
            assert_eq!(CStr::from_ptr(orig.as_str_ptr()).to_bytes(), b"shared?");

            crate::stack::free_element(&cloned_str);
            crate::stack::free_element(&orig);
            qd_free_context(clone);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_call_stack_depth_tracking() {
        unsafe {
            let ctx = qd_create_context(8);
            let name = CString::new("main::main").unwrap();
            qd_push_call(ctx, name.as_ptr());
            assert_eq!((*ctx).call_depth, 1);
            qd_pop_call(ctx);
            assert_eq!((*ctx).call_depth, 0);
            qd_pop_call(ctx); // underflow is a no-op
            assert_eq!((*ctx).call_depth, 0);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_set_args() {
        unsafe {
            let ctx = qd_create_context(8);
            let prog = CString::new("quadprog").unwrap();
            let mut argv = [prog.as_ptr() as *mut c_char, std::ptr::null_mut()];
            qd_set_args(ctx, 1, argv.as_mut_ptr());
            assert_eq!((*ctx).argc, 1);
            assert_eq!(
                CStr::from_ptr((*ctx).program_name).to_bytes(),
                b"quadprog"
            );
            qd_free_context(ctx);
        }
    }
}
