//! Arithmetic primitives.
//!
//! Binary operations promote to float when either operand is a float;
//! integer arithmetic wraps. Domain violations (division by zero, `sqrt`
//! of a negative, `log` of a non-positive, factorial of a negative) are
//! fatal per the runtime failure contract.

use crate::context::QdContext;
use crate::stack::{
    QdExecResult, QdStackElement, QdStackType, fatal, raw_pop, raw_push, require_depth,
    require_numeric,
};

const INT: u32 = QdStackType::Int as u32;

/// Pop two numeric operands (a below b), aborting on underflow or type error.
unsafe fn pop_numeric_pair(ctx: *mut QdContext, op: &str) -> (QdStackElement, QdStackElement) {
    unsafe {
        require_depth(ctx, op, 2);
        require_numeric(ctx, op, 0);
        require_numeric(ctx, op, 1);
        let b = raw_pop(ctx, op);
        let a = raw_pop(ctx, op);
        (a, b)
    }
}

/// Pop one numeric operand.
unsafe fn pop_numeric(ctx: *mut QdContext, op: &str) -> QdStackElement {
    unsafe {
        require_depth(ctx, op, 1);
        require_numeric(ctx, op, 0);
        raw_pop(ctx, op)
    }
}

/// Apply a binary op with int/float promotion and push the result.
unsafe fn binary_promoting(
    ctx: *mut QdContext,
    op: &str,
    int_op: impl Fn(i64, i64) -> i64,
    float_op: impl Fn(f64, f64) -> f64,
) -> QdExecResult {
    unsafe {
        let (a, b) = pop_numeric_pair(ctx, op);
        if a.ty == INT && b.ty == INT {
            raw_push(ctx, QdStackElement::int(int_op(a.as_int(), b.as_int())))
        } else {
            raw_push(ctx, QdStackElement::float(float_op(a.numeric(), b.numeric())))
        }
    }
}

/// Apply a unary op preserving the operand's type.
unsafe fn unary_preserving(
    ctx: *mut QdContext,
    op: &str,
    int_op: impl Fn(i64) -> i64,
    float_op: impl Fn(f64) -> f64,
) -> QdExecResult {
    unsafe {
        let a = pop_numeric(ctx, op);
        if a.ty == INT {
            raw_push(ctx, QdStackElement::int(int_op(a.as_int())))
        } else {
            raw_push(ctx, QdStackElement::float(float_op(a.as_float())))
        }
    }
}

/// Apply a unary op that always yields a float.
unsafe fn unary_to_float(
    ctx: *mut QdContext,
    op: &str,
    f: impl Fn(f64) -> f64,
) -> QdExecResult {
    unsafe {
        let a = pop_numeric(ctx, op);
        raw_push(ctx, QdStackElement::float(f(a.numeric())))
    }
}

/// ( a b -- a+b )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_add(ctx: *mut QdContext) -> QdExecResult {
    unsafe { binary_promoting(ctx, "add", |a, b| a.wrapping_add(b), |a, b| a + b) }
}

/// ( a b -- a-b )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_sub(ctx: *mut QdContext) -> QdExecResult {
    unsafe { binary_promoting(ctx, "sub", |a, b| a.wrapping_sub(b), |a, b| a - b) }
}

/// ( a b -- a*b )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_mul(ctx: *mut QdContext) -> QdExecResult {
    unsafe { binary_promoting(ctx, "mul", |a, b| a.wrapping_mul(b), |a, b| a * b) }
}

/// ( a b -- a/b ). Division by zero is fatal.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_div(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        let (a, b) = pop_numeric_pair(ctx, "div");
        if a.ty == INT && b.ty == INT {
            if b.as_int() == 0 {
                fatal(ctx, "div", "Division by zero");
            }
            raw_push(ctx, QdStackElement::int(a.as_int().wrapping_div(b.as_int())))
        } else {
            if b.numeric() == 0.0 {
                fatal(ctx, "div", "Division by zero");
            }
            raw_push(ctx, QdStackElement::float(a.numeric() / b.numeric()))
        }
    }
}

/// ( a b -- a%b ). Division by zero is fatal.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_mod(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        let (a, b) = pop_numeric_pair(ctx, "mod");
        if a.ty == INT && b.ty == INT {
            if b.as_int() == 0 {
                fatal(ctx, "mod", "Division by zero");
            }
            raw_push(ctx, QdStackElement::int(a.as_int().wrapping_rem(b.as_int())))
        } else {
            if b.numeric() == 0.0 {
                fatal(ctx, "mod", "Division by zero");
            }
            raw_push(ctx, QdStackElement::float(a.numeric() % b.numeric()))
        }
    }
}

/// ( a -- -a )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_neg(ctx: *mut QdContext) -> QdExecResult {
    unsafe { unary_preserving(ctx, "neg", |a| a.wrapping_neg(), |a| -a) }
}

/// ( a -- a+1 )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_inc(ctx: *mut QdContext) -> QdExecResult {
    unsafe { unary_preserving(ctx, "inc", |a| a.wrapping_add(1), |a| a + 1.0) }
}

/// ( a -- a-1 )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_dec(ctx: *mut QdContext) -> QdExecResult {
    unsafe { unary_preserving(ctx, "dec", |a| a.wrapping_sub(1), |a| a - 1.0) }
}

/// ( a -- |a| )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_abs(ctx: *mut QdContext) -> QdExecResult {
    unsafe { unary_preserving(ctx, "abs", |a| a.wrapping_abs(), f64::abs) }
}

/// ( a -- a*a )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_sq(ctx: *mut QdContext) -> QdExecResult {
    unsafe { unary_preserving(ctx, "sq", |a| a.wrapping_mul(a), |a| a * a) }
}

/// ( a -- a*a*a )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_cb(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        unary_preserving(
            ctx,
            "cb",
            |a| a.wrapping_mul(a).wrapping_mul(a),
            |a| a * a * a,
        )
    }
}

/// ( a -- sqrt(a) ). Negative operand is fatal.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_sqrt(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        let a = pop_numeric(ctx, "sqrt");
        let v = a.numeric();
        if v < 0.0 {
            fatal(ctx, "sqrt", "Domain error (sqrt of negative)");
        }
        raw_push(ctx, QdStackElement::float(v.sqrt()))
    }
}

/// ( a -- cbrt(a) )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_cbrt(ctx: *mut QdContext) -> QdExecResult {
    unsafe { unary_to_float(ctx, "cbrt", f64::cbrt) }
}

/// ( a -- ceil(a) )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_ceil(ctx: *mut QdContext) -> QdExecResult {
    unsafe { unary_preserving(ctx, "ceil", |a| a, f64::ceil) }
}

/// ( a -- floor(a) )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_floor(ctx: *mut QdContext) -> QdExecResult {
    unsafe { unary_preserving(ctx, "floor", |a| a, f64::floor) }
}

/// ( a -- round(a) )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_round(ctx: *mut QdContext) -> QdExecResult {
    unsafe { unary_preserving(ctx, "round", |a| a, f64::round) }
}

/// ( a -- ln(a) ). Non-positive operand is fatal.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_ln(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        let a = pop_numeric(ctx, "ln");
        let v = a.numeric();
        if v <= 0.0 {
            fatal(ctx, "ln", "Domain error (log of non-positive)");
        }
        raw_push(ctx, QdStackElement::float(v.ln()))
    }
}

/// ( a -- log10(a) ). Non-positive operand is fatal.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_log10(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        let a = pop_numeric(ctx, "log10");
        let v = a.numeric();
        if v <= 0.0 {
            fatal(ctx, "log10", "Domain error (log of non-positive)");
        }
        raw_push(ctx, QdStackElement::float(v.log10()))
    }
}

/// ( a -- sin(a) )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_sin(ctx: *mut QdContext) -> QdExecResult {
    unsafe { unary_to_float(ctx, "sin", f64::sin) }
}

/// ( a -- cos(a) )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_cos(ctx: *mut QdContext) -> QdExecResult {
    unsafe { unary_to_float(ctx, "cos", f64::cos) }
}

/// ( a -- tan(a) )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_tan(ctx: *mut QdContext) -> QdExecResult {
    unsafe { unary_to_float(ctx, "tan", f64::tan) }
}

/// ( a -- asin(a) ). Operand outside [-1, 1] is fatal.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_asin(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        let a = pop_numeric(ctx, "asin");
        let v = a.numeric();
        if !(-1.0..=1.0).contains(&v) {
            fatal(ctx, "asin", "Domain error (asin outside [-1, 1])");
        }
        raw_push(ctx, QdStackElement::float(v.asin()))
    }
}

/// ( a -- acos(a) ). Operand outside [-1, 1] is fatal.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_acos(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        let a = pop_numeric(ctx, "acos");
        let v = a.numeric();
        if !(-1.0..=1.0).contains(&v) {
            fatal(ctx, "acos", "Domain error (acos outside [-1, 1])");
        }
        raw_push(ctx, QdStackElement::float(v.acos()))
    }
}

/// ( a -- atan(a) )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_atan(ctx: *mut QdContext) -> QdExecResult {
    unsafe { unary_to_float(ctx, "atan", f64::atan) }
}

/// ( a b -- a^b ). Integer result for integer base and non-negative
/// integer exponent, float otherwise.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_pow(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        let (a, b) = pop_numeric_pair(ctx, "pow");
        if a.ty == INT && b.ty == INT && b.as_int() >= 0 {
            let exp = b.as_int().min(u32::MAX as i64) as u32;
            raw_push(ctx, QdStackElement::int(a.as_int().wrapping_pow(exp)))
        } else {
            raw_push(ctx, QdStackElement::float(a.numeric().powf(b.numeric())))
        }
    }
}

/// ( n -- n! ). Negative or non-integer operand is fatal; wraps on overflow.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_fac(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        require_depth(ctx, "fac", 1);
        let a = raw_pop(ctx, "fac");
        if a.ty != INT {
            fatal(ctx, "fac", "Type error (expected integer)");
        }
        let n = a.as_int();
        if n < 0 {
            fatal(ctx, "fac", "Domain error (factorial of negative)");
        }
        let mut acc: i64 = 1;
        for i in 2..=n {
            acc = acc.wrapping_mul(i);
        }
        raw_push(ctx, QdStackElement::int(acc))
    }
}

/// ( a -- 1/a ). Zero operand is fatal.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_inv(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        let a = pop_numeric(ctx, "inv");
        let v = a.numeric();
        if v == 0.0 {
            fatal(ctx, "inv", "Division by zero");
        }
        raw_push(ctx, QdStackElement::float(1.0 / v))
    }
}

/// ( a b -- min(a,b) )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_min(ctx: *mut QdContext) -> QdExecResult {
    unsafe { binary_promoting(ctx, "min", i64::min, f64::min) }
}

/// ( a b -- max(a,b) )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_max(ctx: *mut QdContext) -> QdExecResult {
    unsafe { binary_promoting(ctx, "max", i64::max, f64::max) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{qd_create_context, qd_free_context};
    use crate::stack::{qd_push_f, qd_push_i, raw_pop};

    #[test]
    fn test_add_ints() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_i(ctx, 2);
            qd_push_i(ctx, 3);
            qd_add(ctx);
            assert_eq!(raw_pop(ctx, "t").as_int(), 5);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_add_promotes_to_float() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_i(ctx, 2);
            qd_push_f(ctx, 0.5);
            qd_add(ctx);
            let r = raw_pop(ctx, "t");
            assert_eq!(r.type_tag(), Some(QdStackType::Float));
            assert_eq!(r.as_float(), 2.5);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_sub_order() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_i(ctx, 10);
            qd_push_i(ctx, 3);
            qd_sub(ctx);
            assert_eq!(raw_pop(ctx, "t").as_int(), 7);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_int_div_truncates() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_i(ctx, 7);
            qd_push_i(ctx, 2);
            qd_div(ctx);
            assert_eq!(raw_pop(ctx, "t").as_int(), 3);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_mixed_div_is_float() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_f(ctx, 7.0);
            qd_push_i(ctx, 2);
            qd_div(ctx);
            assert_eq!(raw_pop(ctx, "t").as_float(), 3.5);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_wrapping_add() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_i(ctx, i64::MAX);
            qd_push_i(ctx, 1);
            qd_add(ctx);
            assert_eq!(raw_pop(ctx, "t").as_int(), i64::MIN);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_fac() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_i(ctx, 5);
            qd_fac(ctx);
            assert_eq!(raw_pop(ctx, "t").as_int(), 120);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_pow_int() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_i(ctx, 2);
            qd_push_i(ctx, 10);
            qd_pow(ctx);
            assert_eq!(raw_pop(ctx, "t").as_int(), 1024);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_inc_preserves_type() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_f(ctx, 1.5);
            qd_inc(ctx);
            let r = raw_pop(ctx, "t");
            assert_eq!(r.type_tag(), Some(QdStackType::Float));
            assert_eq!(r.as_float(), 2.5);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_sqrt_yields_float() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_i(ctx, 9);
            qd_sqrt(ctx);
            let r = raw_pop(ctx, "t");
            assert_eq!(r.type_tag(), Some(QdStackType::Float));
            assert_eq!(r.as_float(), 3.0);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_min_max() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_i(ctx, 3);
            qd_push_i(ctx, 8);
            qd_min(ctx);
            assert_eq!(raw_pop(ctx, "t").as_int(), 3);
            qd_push_i(ctx, 3);
            qd_push_i(ctx, 8);
            qd_max(ctx);
            assert_eq!(raw_pop(ctx, "t").as_int(), 8);
            qd_free_context(ctx);
        }
    }
}
