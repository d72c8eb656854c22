//! Stack shuffling primitives. Duplications deep-copy strings so every
//! slot owns its own memory; removals free what they discard.

use crate::context::QdContext;
use crate::stack::{
    QdExecResult, QdStackElement, QdStackType, deep_copy, fatal, free_element, peek_at, raw_pop,
    raw_push, require_depth,
};
use std::ffi::CStr;

/// ( a -- a ). Print the top element to stdout without removing it.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_peek(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        let top = peek_at(ctx, "peek", 0);
        match top.type_tag() {
            Some(QdStackType::Int) => println!("{}", top.as_int()),
            Some(QdStackType::Float) => println!("{}", top.as_float()),
            Some(QdStackType::Str) => {
                println!("{}", CStr::from_ptr(top.as_str_ptr()).to_string_lossy())
            }
            Some(QdStackType::Ptr) => println!("{:#x}", top.value),
            None => return QdExecResult::failure(-3),
        }
    }
    QdExecResult::ok()
}

/// ( a -- a a )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_dup(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        let copy = deep_copy(peek_at(ctx, "dup", 0));
        raw_push(ctx, copy)
    }
}

/// ( a b -- a a b )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_dupd(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        require_depth(ctx, "dupd", 2);
        let b = raw_pop(ctx, "dupd");
        let copy = deep_copy(peek_at(ctx, "dupd", 0));
        raw_push(ctx, copy);
        raw_push(ctx, b)
    }
}

/// ( a b -- a b a b )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_dup2(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        require_depth(ctx, "dup2", 2);
        let a = deep_copy(peek_at(ctx, "dup2", 1));
        let b = deep_copy(peek_at(ctx, "dup2", 0));
        raw_push(ctx, a);
        raw_push(ctx, b)
    }
}

/// ( a b -- b a )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_swap(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        require_depth(ctx, "swap", 2);
        let b = raw_pop(ctx, "swap");
        let a = raw_pop(ctx, "swap");
        raw_push(ctx, b);
        raw_push(ctx, a)
    }
}

/// ( a b c -- b a c )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_swapd(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        require_depth(ctx, "swapd", 3);
        let c = raw_pop(ctx, "swapd");
        let b = raw_pop(ctx, "swapd");
        let a = raw_pop(ctx, "swapd");
        raw_push(ctx, b);
        raw_push(ctx, a);
        raw_push(ctx, c)
    }
}

/// ( a b c d -- c d a b )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_swap2(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        require_depth(ctx, "swap2", 4);
        let d = raw_pop(ctx, "swap2");
        let c = raw_pop(ctx, "swap2");
        let b = raw_pop(ctx, "swap2");
        let a = raw_pop(ctx, "swap2");
        raw_push(ctx, c);
        raw_push(ctx, d);
        raw_push(ctx, a);
        raw_push(ctx, b)
    }
}

/// ( a b -- a b a )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_over(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        let copy = deep_copy(peek_at(ctx, "over", 1));
        raw_push(ctx, copy)
    }
}

/// ( a b c -- a b c a )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_overd(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        let copy = deep_copy(peek_at(ctx, "overd", 2));
        raw_push(ctx, copy)
    }
}

/// ( a b c d -- a b c d a b )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_over2(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        require_depth(ctx, "over2", 4);
        let a = deep_copy(peek_at(ctx, "over2", 3));
        let b = deep_copy(peek_at(ctx, "over2", 2));
        raw_push(ctx, a);
        raw_push(ctx, b)
    }
}

/// ( a b -- b )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_nip(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        require_depth(ctx, "nip", 2);
        let b = raw_pop(ctx, "nip");
        let a = raw_pop(ctx, "nip");
        free_element(&a);
        raw_push(ctx, b)
    }
}

/// ( a b c -- a c )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_nipd(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        require_depth(ctx, "nipd", 3);
        let c = raw_pop(ctx, "nipd");
        let b = raw_pop(ctx, "nipd");
        free_element(&b);
        raw_push(ctx, c)
    }
}

/// ( a -- )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_drop(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        require_depth(ctx, "drop", 1);
        let a = raw_pop(ctx, "drop");
        free_element(&a);
    }
    QdExecResult::ok()
}

/// ( a b -- )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_drop2(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        require_depth(ctx, "drop2", 2);
        let b = raw_pop(ctx, "drop2");
        let a = raw_pop(ctx, "drop2");
        free_element(&b);
        free_element(&a);
    }
    QdExecResult::ok()
}

/// ( a b c -- b c a )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_rot(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        require_depth(ctx, "rot", 3);
        let c = raw_pop(ctx, "rot");
        let b = raw_pop(ctx, "rot");
        let a = raw_pop(ctx, "rot");
        raw_push(ctx, b);
        raw_push(ctx, c);
        raw_push(ctx, a)
    }
}

/// ( a b -- b a b )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_tuck(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        require_depth(ctx, "tuck", 2);
        let b = raw_pop(ctx, "tuck");
        let a = raw_pop(ctx, "tuck");
        let copy = deep_copy(&b);
        raw_push(ctx, copy);
        raw_push(ctx, a);
        raw_push(ctx, b)
    }
}

/// ( ... n -- ... x ). Copy the element n below the top (0 = dup).
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_pick(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        require_depth(ctx, "pick", 1);
        let n_elem = raw_pop(ctx, "pick");
        if n_elem.ty != QdStackType::Int as u32 {
            fatal(ctx, "pick", "Type error (expected integer index)");
        }
        let n = n_elem.as_int();
        if n < 0 {
            fatal(ctx, "pick", "Domain error (negative index)");
        }
        let copy = deep_copy(peek_at(ctx, "pick", n as usize));
        raw_push(ctx, copy)
    }
}

/// ( ... n -- ... x ). Move the element n below the top to the top
/// (1 = swap).
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_roll(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        require_depth(ctx, "roll", 1);
        let n_elem = raw_pop(ctx, "roll");
        if n_elem.ty != QdStackType::Int as u32 {
            fatal(ctx, "roll", "Type error (expected integer index)");
        }
        let n = n_elem.as_int();
        if n < 0 {
            fatal(ctx, "roll", "Domain error (negative index)");
        }
        let n = n as usize;
        require_depth(ctx, "roll", n + 1);
        let st = &mut *(*ctx).st;
        let idx = st.size - 1 - n;
        let moved = st.elements.add(idx).read();
        std::ptr::copy(st.elements.add(idx + 1), st.elements.add(idx), n);
        st.elements.add(st.size - 1).write(moved);
    }
    QdExecResult::ok()
}

/// ( -- n ). Push the pre-operation depth.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_depth(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        let depth = (*(*ctx).st).size as i64;
        raw_push(ctx, QdStackElement::int(depth))
    }
}

/// ( ... -- ). Remove every element, freeing owned strings.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_clear(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        let st = &mut *(*ctx).st;
        for i in 0..st.size {
            free_element(&*st.elements.add(i));
        }
        st.size = 0;
    }
    QdExecResult::ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{qd_create_context, qd_free_context};
    use crate::stack::{qd_push_i, qd_push_s, raw_pop};
    use std::ffi::CString;

    #[test]
    fn test_dup() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_i(ctx, 9);
            qd_dup(ctx);
            assert_eq!(raw_pop(ctx, "t").as_int(), 9);
            assert_eq!(raw_pop(ctx, "t").as_int(), 9);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_dup_string_is_independent_copy() {
        unsafe {
            let ctx = qd_create_context(16);
            let s = CString::new("abc").unwrap();
            qd_push_s(ctx, s.as_ptr());
            qd_dup(ctx);
            let top = raw_pop(ctx, "t");
            let bottom = raw_pop(ctx, "t");
            assert_ne!(top.as_str_ptr(), bottom.as_str_ptr());
            free_element(&top);
            // bottom must still be readable after top is freed
            assert_eq!(CStr::from_ptr(bottom.as_str_ptr()).to_bytes(), b"abc");
            free_element(&bottom);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_swap_preserves_types() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_i(ctx, 1);
            let s = CString::new("two").unwrap();
            qd_push_s(ctx, s.as_ptr());
            qd_swap(ctx);
            let a = raw_pop(ctx, "t");
            assert_eq!(a.type_tag(), Some(QdStackType::Int));
            let b = raw_pop(ctx, "t");
            assert_eq!(b.type_tag(), Some(QdStackType::Str));
            free_element(&b);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_rot() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_i(ctx, 1);
            qd_push_i(ctx, 2);
            qd_push_i(ctx, 3);
            qd_rot(ctx);
            assert_eq!(raw_pop(ctx, "t").as_int(), 1);
            assert_eq!(raw_pop(ctx, "t").as_int(), 3);
            assert_eq!(raw_pop(ctx, "t").as_int(), 2);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_nip_tuck() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_i(ctx, 1);
            qd_push_i(ctx, 2);
            qd_nip(ctx);
            assert_eq!((*(*ctx).st).size, 1);
            assert_eq!(raw_pop(ctx, "t").as_int(), 2);

            qd_push_i(ctx, 1);
            qd_push_i(ctx, 2);
            qd_tuck(ctx);
            assert_eq!(raw_pop(ctx, "t").as_int(), 2);
            assert_eq!(raw_pop(ctx, "t").as_int(), 1);
            assert_eq!(raw_pop(ctx, "t").as_int(), 2);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_pick_roll() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_i(ctx, 10);
            qd_push_i(ctx, 20);
            qd_push_i(ctx, 30);
            qd_push_i(ctx, 2);
            qd_pick(ctx); // copies the 10
            assert_eq!(raw_pop(ctx, "t").as_int(), 10);

            qd_push_i(ctx, 2);
            qd_roll(ctx); // moves the 10 to the top
            assert_eq!(raw_pop(ctx, "t").as_int(), 10);
            assert_eq!(raw_pop(ctx, "t").as_int(), 30);
            assert_eq!(raw_pop(ctx, "t").as_int(), 20);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_depth_and_clear() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_i(ctx, 1);
            qd_push_i(ctx, 2);
            qd_depth(ctx);
            assert_eq!(raw_pop(ctx, "t").as_int(), 2);
            let s = CString::new("gone").unwrap();
            qd_push_s(ctx, s.as_ptr());
            qd_clear(ctx);
            assert_eq!((*(*ctx).st).size, 0);
            qd_free_context(ctx);
        }
    }
}
