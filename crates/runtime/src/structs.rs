//! Struct value primitives.
//!
//! A constructed struct is a malloc'd array of stack elements, one per
//! declared field, referenced through a `Ptr` slot. Field reads copy the
//! element out (strings deep-copied); the block itself is released with
//! `mem_free`.

use crate::context::QdContext;
use crate::stack::{
    QdExecResult, QdStackElement, QdStackType, deep_copy, fatal, raw_pop, raw_push, require_depth,
};

/// ( f1 .. fn -- p ). Pop `nfields` elements (top of stack is the last
/// declared field) into a fresh heap block and push its address.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_struct_pack(ctx: *mut QdContext, nfields: i64) -> QdExecResult {
    unsafe {
        if nfields < 0 {
            fatal(ctx, "struct", "Domain error (negative field count)");
        }
        let n = nfields as usize;
        require_depth(ctx, "struct", n);
        let bytes = n * std::mem::size_of::<QdStackElement>();
        let block = libc::malloc(bytes.max(1)) as *mut QdStackElement;
        if block.is_null() {
            fatal(ctx, "struct", "Allocation failure");
        }
        for i in (0..n).rev() {
            let field = raw_pop(ctx, "struct");
            block.add(i).write(field);
        }
        raw_push(ctx, QdStackElement::ptr(block as *mut libc::c_void))
    }
}

/// ( p -- x ). Pop a struct pointer and push a copy of field `index`.
///
/// # Safety
/// `ctx` must be a live context; the pointer must come from
/// `qd_struct_pack` and `index` must be within the declared field count.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_struct_field(ctx: *mut QdContext, index: i64) -> QdExecResult {
    unsafe {
        require_depth(ctx, "field access", 1);
        let p = raw_pop(ctx, "field access");
        if p.ty != QdStackType::Ptr as u32 {
            fatal(ctx, "field access", "Type error (expected struct pointer)");
        }
        let block = p.as_ptr() as *const QdStackElement;
        if block.is_null() {
            fatal(ctx, "field access", "Null struct pointer");
        }
        let copy = deep_copy(&*block.add(index.max(0) as usize));
        raw_push(ctx, copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{qd_create_context, qd_free_context};
    use crate::stack::{qd_push_f, qd_push_i, qd_push_s, raw_pop, raw_push};
    use std::ffi::{CStr, CString};

    #[test]
    fn test_pack_and_field_access() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_f(ctx, 1.5);
            qd_push_f(ctx, 2.5);
            qd_struct_pack(ctx, 2);
            let p = raw_pop(ctx, "t");
            assert_eq!(p.type_tag(), Some(QdStackType::Ptr));

            raw_push(ctx, p);
            qd_struct_field(ctx, 0);
            assert_eq!(raw_pop(ctx, "t").as_float(), 1.5);
            raw_push(ctx, p);
            qd_struct_field(ctx, 1);
            assert_eq!(raw_pop(ctx, "t").as_float(), 2.5);

            libc::free(p.as_ptr());
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_field_access_copies_strings() {
        unsafe {
            let ctx = qd_create_context(16);
            let s = CString::new("name").unwrap();
            qd_push_s(ctx, s.as_ptr());
            qd_push_i(ctx, 30);
            qd_struct_pack(ctx, 2);
            let p = raw_pop(ctx, "t");

            raw_push(ctx, p);
            qd_struct_field(ctx, 0);
            let copy = raw_pop(ctx, "t");
            let stored = (p.as_ptr() as *const QdStackElement).read();
            assert_ne!(copy.as_str_ptr(), stored.as_str_ptr());
            assert_eq!(CStr::from_ptr(copy.as_str_ptr()).to_bytes(), b"name");

            crate::stack::free_element(&copy);
            crate::stack::free_element(&stored);
            libc::free(p.as_ptr());
            qd_free_context(ctx);
        }
    }
}
