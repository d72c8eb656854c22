//! Comparison primitives. Operands compare numerically after int-to-float
//! promotion; the result is an `Int` flag (1 true, 0 false).

use crate::context::QdContext;
use crate::stack::{
    QdExecResult, QdStackElement, raw_pop, raw_push, require_depth, require_numeric,
};

unsafe fn compare(
    ctx: *mut QdContext,
    op: &str,
    f: impl Fn(f64, f64) -> bool,
) -> QdExecResult {
    unsafe {
        require_depth(ctx, op, 2);
        require_numeric(ctx, op, 0);
        require_numeric(ctx, op, 1);
        let b = raw_pop(ctx, op);
        let a = raw_pop(ctx, op);
        let result = if f(a.numeric(), b.numeric()) { 1 } else { 0 };
        raw_push(ctx, QdStackElement::int(result))
    }
}

/// ( a b -- flag )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_eq(ctx: *mut QdContext) -> QdExecResult {
    unsafe { compare(ctx, "eq", |a, b| a == b) }
}

/// ( a b -- flag )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_neq(ctx: *mut QdContext) -> QdExecResult {
    unsafe { compare(ctx, "neq", |a, b| a != b) }
}

/// ( a b -- flag )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_lt(ctx: *mut QdContext) -> QdExecResult {
    unsafe { compare(ctx, "lt", |a, b| a < b) }
}

/// ( a b -- flag )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_gt(ctx: *mut QdContext) -> QdExecResult {
    unsafe { compare(ctx, "gt", |a, b| a > b) }
}

/// ( a b -- flag )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_lte(ctx: *mut QdContext) -> QdExecResult {
    unsafe { compare(ctx, "lte", |a, b| a <= b) }
}

/// ( a b -- flag )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_gte(ctx: *mut QdContext) -> QdExecResult {
    unsafe { compare(ctx, "gte", |a, b| a >= b) }
}

/// ( val min max -- flag ). True when min <= val <= max.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_within(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        require_depth(ctx, "within", 3);
        for depth in 0..3 {
            require_numeric(ctx, "within", depth);
        }
        let max = raw_pop(ctx, "within");
        let min = raw_pop(ctx, "within");
        let val = raw_pop(ctx, "within");
        let v = val.numeric();
        let flag = if v >= min.numeric() && v <= max.numeric() { 1 } else { 0 };
        raw_push(ctx, QdStackElement::int(flag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{qd_create_context, qd_free_context};
    use crate::stack::{QdStackType, qd_push_f, qd_push_i, raw_pop};

    #[test]
    fn test_eq_promotes() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_i(ctx, 2);
            qd_push_f(ctx, 2.0);
            qd_eq(ctx);
            let r = raw_pop(ctx, "t");
            assert_eq!(r.type_tag(), Some(QdStackType::Int));
            assert_eq!(r.as_int(), 1);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_lt_gt() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_i(ctx, 1);
            qd_push_i(ctx, 2);
            qd_lt(ctx);
            assert_eq!(raw_pop(ctx, "t").as_int(), 1);
            qd_push_i(ctx, 1);
            qd_push_i(ctx, 2);
            qd_gt(ctx);
            assert_eq!(raw_pop(ctx, "t").as_int(), 0);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_within_bounds_inclusive() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_i(ctx, 5);
            qd_push_i(ctx, 0);
            qd_push_i(ctx, 5);
            qd_within(ctx);
            assert_eq!(raw_pop(ctx, "t").as_int(), 1);
            qd_push_i(ctx, 6);
            qd_push_i(ctx, 0);
            qd_push_i(ctx, 5);
            qd_within(ctx);
            assert_eq!(raw_pop(ctx, "t").as_int(), 0);
            qd_free_context(ctx);
        }
    }
}
