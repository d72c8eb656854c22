//! Integration tests exercising the runtime through its C ABI surface,
//! the way generated code does: contexts, pushes, primitives, and the
//! element-transfer entry points.

use qdrt::context::{qd_clone_context, qd_create_context, qd_free_context};
use qdrt::stack::{
    QD_STACK_OK, QdStackElement, QdStackType, qd_push_e, qd_push_f, qd_push_i, qd_push_s,
    qd_stack_pop, qd_stack_size,
};
use std::ffi::{CStr, CString};

unsafe fn pop(ctx: *mut qdrt::QdContext) -> QdStackElement {
    let mut out = QdStackElement::int(0);
    unsafe {
        assert_eq!(qd_stack_pop((*ctx).st, &mut out), QD_STACK_OK);
    }
    out
}

#[test]
fn arithmetic_pipeline_matches_source_program() {
    // 10 20 add 2 mul  =>  60
    unsafe {
        let ctx = qd_create_context(64);
        qd_push_i(ctx, 10);
        qd_push_i(ctx, 20);
        qdrt::arithmetic::qd_add(ctx);
        qd_push_i(ctx, 2);
        qdrt::arithmetic::qd_mul(ctx);
        let result = pop(ctx);
        assert_eq!(result.as_int(), 60);
        assert_eq!(qd_stack_size((*ctx).st), 0);
        qd_free_context(ctx);
    }
}

#[test]
fn dup_mul_squares() {
    // 7 dup mul  =>  49
    unsafe {
        let ctx = qd_create_context(64);
        qd_push_i(ctx, 7);
        qdrt::shuffle::qd_dup(ctx);
        qdrt::arithmetic::qd_mul(ctx);
        assert_eq!(pop(ctx).as_int(), 49);
        qd_free_context(ctx);
    }
}

#[test]
fn string_ownership_transfers_on_pop() {
    unsafe {
        let ctx = qd_create_context(64);
        let s = CString::new("payload").unwrap();
        qd_push_s(ctx, s.as_ptr());
        let elem = pop(ctx);
        assert_eq!(elem.type_tag(), Some(QdStackType::Str));
        assert_eq!(CStr::from_ptr(elem.as_str_ptr()).to_bytes(), b"payload");
        qdrt::stack::free_element(&elem);
        qd_free_context(ctx);
    }
}

#[test]
fn eq_compares_numerically_after_promotion() {
    unsafe {
        let ctx = qd_create_context(64);
        qd_push_i(ctx, 4);
        qd_push_f(ctx, 4.0);
        qdrt::compare::qd_eq(ctx);
        assert_eq!(pop(ctx).as_int(), 1);
        qd_free_context(ctx);
    }
}

#[test]
fn depth_reports_pre_operation_depth() {
    unsafe {
        let ctx = qd_create_context(64);
        qd_push_i(ctx, 1);
        qd_push_i(ctx, 2);
        qd_push_i(ctx, 3);
        qdrt::shuffle::qd_depth(ctx);
        assert_eq!(pop(ctx).as_int(), 3);
        qd_free_context(ctx);
    }
}

#[test]
fn clear_empties_the_stack() {
    unsafe {
        let ctx = qd_create_context(64);
        for i in 0..5 {
            qd_push_i(ctx, i);
        }
        let s = CString::new("freed too").unwrap();
        qd_push_s(ctx, s.as_ptr());
        qdrt::shuffle::qd_clear(ctx);
        assert_eq!(qd_stack_size((*ctx).st), 0);
        qd_free_context(ctx);
    }
}

#[test]
fn cloned_context_is_fully_independent() {
    unsafe {
        let ctx = qd_create_context(64);
        let s = CString::new("isolated").unwrap();
        qd_push_s(ctx, s.as_ptr());
        let clone = qd_clone_context(ctx);

        // run work in the clone: duplicate and consume
        qdrt::shuffle::qd_dup(clone);
        let dup = pop(clone);
        qdrt::stack::free_element(&dup);
        qd_free_context(clone);

        // original string must still be intact
        let orig = pop(ctx);
        assert_eq!(CStr::from_ptr(orig.as_str_ptr()).to_bytes(), b"isolated");
        qdrt::stack::free_element(&orig);
        qd_free_context(ctx);
    }
}

#[test]
fn fallible_status_protocol() {
    unsafe {
        let ctx = qd_create_context(64);
        // callee raised: generated code pushes a tainted status of 1
        qdrt::error::qd_err_push(ctx, 1);
        assert!(qdrt::error::qd_is_top_tainted(ctx));
        // err launders the taint and leaves the flag value for `if`
        qdrt::error::qd_err(ctx);
        assert!(!qdrt::error::qd_is_top_tainted(ctx));
        assert_eq!(pop(ctx).as_int(), 1);
        qd_free_context(ctx);
    }
}

#[test]
fn push_e_restores_locals_with_fresh_strings() {
    unsafe {
        let ctx = qd_create_context(64);
        let s = CString::new("local slot").unwrap();
        qd_push_s(ctx, s.as_ptr());

        // pop into a "local" the way generated code does
        let mut local = QdStackElement::int(0);
        qd_stack_pop((*ctx).st, &mut local);

        // re-push twice; each push must own an independent copy
        qd_push_e(ctx, &local);
        qd_push_e(ctx, &local);
        let a = pop(ctx);
        let b = pop(ctx);
        assert_ne!(a.as_str_ptr(), b.as_str_ptr());
        assert_ne!(a.as_str_ptr(), local.as_str_ptr());

        qdrt::stack::free_element(&a);
        qdrt::stack::free_element(&b);
        qdrt::stack::free_element(&local);
        qd_free_context(ctx);
    }
}

#[test]
fn struct_pack_then_field_reads() {
    unsafe {
        let ctx = qd_create_context(64);
        // 1.0 2.0 Vec2  =>  pointer; then read both fields back
        qd_push_f(ctx, 1.0);
        qd_push_f(ctx, 2.0);
        qdrt::structs::qd_struct_pack(ctx, 2);
        let p = pop(ctx);
        assert_eq!(p.type_tag(), Some(QdStackType::Ptr));

        qd_push_e(ctx, &p);
        qdrt::structs::qd_struct_field(ctx, 1);
        assert_eq!(pop(ctx).as_float(), 2.0);

        libc::free(p.as_ptr());
        qd_free_context(ctx);
    }
}
