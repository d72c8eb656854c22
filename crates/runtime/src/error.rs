//! Error-flag primitives.
//!
//! A fallible function raises an error with `error`, which sets the
//! context's `has_error` flag. Generated code at a `?` or bare call site
//! converts the flag into an error-tainted `Int` status on the stack
//! (via `qd_err_push`) and clears the flag; `err` is the only instruction
//! allowed to observe and clear that taint.

use crate::context::QdContext;
use crate::stack::{QdExecResult, QdStackElement, fatal, peek_at, raw_push, require_depth};

/// ( status -- status ). The top of stack must be error-tainted; the
/// taint is cleared and the status value stays in place (1 = the callee
/// raised an error, 0 = success).
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_err(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        require_depth(ctx, "err", 1);
        let top = peek_at(ctx, "err", 0);
        if top.error_tainted == 0 {
            fatal(ctx, "err", "Top of stack is not error-tainted");
        }
        top.error_tainted = 0;
        (*ctx).has_error = false;
    }
    QdExecResult::ok()
}

/// ( -- ). Raise an error: set the context flag. The stack is unchanged;
/// generated code in a fallible function branches to its epilogue after
/// this.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_error(ctx: *mut QdContext) -> QdExecResult {
    unsafe { (*ctx).has_error = true };
    QdExecResult::failure(-1)
}

/// Push an error-tainted status integer. Emitted by the generator after
/// fallible calls at `?` or bare call sites.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_err_push(ctx: *mut QdContext, status: i64) -> QdExecResult {
    let mut elem = QdStackElement::int(status);
    elem.error_tainted = 1;
    unsafe { raw_push(ctx, elem) }
}

/// Whether the top of stack is error-tainted (test and tooling hook).
///
/// # Safety
/// `ctx` must be a live context with a non-empty stack.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_is_top_tainted(ctx: *mut QdContext) -> bool {
    unsafe {
        let st = &*(*ctx).st;
        if st.size == 0 {
            return false;
        }
        (*st.elements.add(st.size - 1)).error_tainted != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{qd_create_context, qd_free_context};
    use crate::stack::{QdStackType, raw_pop};

    #[test]
    fn test_error_sets_flag() {
        unsafe {
            let ctx = qd_create_context(16);
            assert!(!(*ctx).has_error);
            qd_error(ctx);
            assert!((*ctx).has_error);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_err_push_taints() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_err_push(ctx, 1);
            assert!(qd_is_top_tainted(ctx));
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_err_clears_taint_and_flag() {
        unsafe {
            let ctx = qd_create_context(16);
            (*ctx).has_error = true;
            qd_err_push(ctx, 1);
            qd_err(ctx);
            assert!(!qd_is_top_tainted(ctx));
            assert!(!(*ctx).has_error);
            let status = raw_pop(ctx, "t");
            assert_eq!(status.type_tag(), Some(QdStackType::Int));
            assert_eq!(status.as_int(), 1);
            qd_free_context(ctx);
        }
    }
}
