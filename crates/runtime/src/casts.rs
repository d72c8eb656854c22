//! Type cast primitives, including the depth-addressed variants the code
//! generator emits for implicit call-site casts.

use crate::context::QdContext;
use crate::stack::{
    QdExecResult, QdStackElement, QdStackType, alloc_c_string, fatal, free_element, peek_at,
    raw_pop, raw_push, require_depth,
};

const INT: u32 = QdStackType::Int as u32;
const FLOAT: u32 = QdStackType::Float as u32;

/// ( a -- i ). Truncate a float to an integer; integers pass through.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_casti(ctx: *mut QdContext) -> QdExecResult {
    unsafe { qd_casti_n(ctx, 0) }
}

/// ( a -- f ). Widen an integer to a float; floats pass through.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_castf(ctx: *mut QdContext) -> QdExecResult {
    unsafe { qd_castf_n(ctx, 0) }
}

/// ( a -- s ). Format a numeric value as a string.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_casts(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        require_depth(ctx, "casts", 1);
        let a = raw_pop(ctx, "casts");
        let text = match a.type_tag() {
            Some(QdStackType::Int) => a.as_int().to_string(),
            Some(QdStackType::Float) => a.as_float().to_string(),
            Some(QdStackType::Str) => {
                // Already a string; push it back untouched.
                return raw_push(ctx, a);
            }
            _ => {
                free_element(&a);
                fatal(ctx, "casts", "Type error (expected numeric or string)");
            }
        };
        raw_push(ctx, QdStackElement::str(alloc_c_string(text.as_bytes())))
    }
}

/// Cast the element `depth` below the top to an integer, in place.
/// Emitted by the generator ahead of calls that need a narrowing cast on
/// a parameter that is not on top of the stack.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_casti_n(ctx: *mut QdContext, depth: i64) -> QdExecResult {
    unsafe {
        let elem = peek_at(ctx, "casti", depth.max(0) as usize);
        if elem.ty == FLOAT {
            *elem = QdStackElement::int(elem.as_float() as i64);
        } else if elem.ty != INT {
            fatal(ctx, "casti", "Type error (expected numeric type)");
        }
    }
    QdExecResult::ok()
}

/// Cast the element `depth` below the top to a float, in place.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_castf_n(ctx: *mut QdContext, depth: i64) -> QdExecResult {
    unsafe {
        let elem = peek_at(ctx, "castf", depth.max(0) as usize);
        if elem.ty == INT {
            *elem = QdStackElement::float(elem.as_int() as f64);
        } else if elem.ty != FLOAT {
            fatal(ctx, "castf", "Type error (expected numeric type)");
        }
    }
    QdExecResult::ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{qd_create_context, qd_free_context};
    use crate::stack::{qd_push_f, qd_push_i, raw_pop};
    use std::ffi::CStr;

    #[test]
    fn test_casti_truncates() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_f(ctx, 3.9);
            qd_casti(ctx);
            let r = raw_pop(ctx, "t");
            assert_eq!(r.type_tag(), Some(QdStackType::Int));
            assert_eq!(r.as_int(), 3);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_castf_widens() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_i(ctx, 7);
            qd_castf(ctx);
            let r = raw_pop(ctx, "t");
            assert_eq!(r.type_tag(), Some(QdStackType::Float));
            assert_eq!(r.as_float(), 7.0);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_castf_n_below_top() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_i(ctx, 10);
            qd_push_f(ctx, 20.5);
            // widen the 10 sitting one below the top
            qd_castf_n(ctx, 1);
            let top = raw_pop(ctx, "t");
            assert_eq!(top.as_float(), 20.5);
            let below = raw_pop(ctx, "t");
            assert_eq!(below.type_tag(), Some(QdStackType::Float));
            assert_eq!(below.as_float(), 10.0);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_casts_formats_int() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_i(ctx, 42);
            qd_casts(ctx);
            let r = raw_pop(ctx, "t");
            assert_eq!(r.type_tag(), Some(QdStackType::Str));
            assert_eq!(CStr::from_ptr(r.as_str_ptr()).to_bytes(), b"42");
            crate::stack::free_element(&r);
            qd_free_context(ctx);
        }
    }
}
