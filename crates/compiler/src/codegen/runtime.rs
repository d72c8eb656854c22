//! Runtime ABI surface as seen from generated IR.
//!
//! The element and context types mirror the C-compatible layouts in the
//! runtime crate; only the fields generated code actually addresses are
//! spelled out (`st` and `has_error` on the context). Primitive
//! operations (`qd_add`, `qd_dup`, ...) share one shape and are declared
//! on first use by `CodeGen::declare_runtime_op`.

/// Named types shared by every generated module.
///
/// `%qd_stack_element` layout: `{ i64 value, i32 type, i8 error_tainted }`.
/// `%qd_context` prefix: `{ ptr st, i8 has_error, i32 argc, ptr argv,
/// ptr program_name }` — generated code loads fields 0 and 1.
pub const TYPE_DEFINITIONS: &str = "\
%qd_exec_result = type { i32 }
%qd_stack_element = type { i64, i32, i8 }
%qd_context = type { ptr, i8, i32, ptr, ptr }

";

/// Entry points every module uses regardless of which primitives appear
/// in the program.
pub const FIXED_DECLARATIONS: &str = "\
declare ptr @qd_create_context(i64)
declare void @qd_free_context(ptr)
declare ptr @qd_clone_context(ptr)
declare void @qd_set_args(ptr, i32, ptr)
declare %qd_exec_result @qd_push_i(ptr, i64)
declare %qd_exec_result @qd_push_f(ptr, double)
declare %qd_exec_result @qd_push_s(ptr, ptr)
declare %qd_exec_result @qd_push_p(ptr, ptr)
declare %qd_exec_result @qd_push_e(ptr, ptr)
declare %qd_exec_result @qd_err_push(ptr, i64)
declare i32 @qd_stack_pop(ptr, ptr)
declare void @qd_push_call(ptr, ptr)
declare void @qd_pop_call(ptr)
declare void @qd_check_stack(ptr, i64, ptr, ptr)
declare void @qd_abort_with_message(ptr, ptr)
declare %qd_exec_result @qd_casti_n(ptr, i64)
declare %qd_exec_result @qd_castf_n(ptr, i64)
declare %qd_exec_result @qd_struct_pack(ptr, i64)
declare %qd_exec_result @qd_struct_field(ptr, i64)
";

/// Runtime stack type tags as generated code spells them (matches the
/// `QdStackType` discriminants in the runtime crate).
pub const TYPE_TAG_INT: u32 = 0;
pub const TYPE_TAG_FLOAT: u32 = 1;
pub const TYPE_TAG_PTR: u32 = 2;
pub const TYPE_TAG_STR: u32 = 3;

/// The `qd_check_stack` descriptor entry for a declared parameter type.
/// Untyped parameters use the pointer tag, which the runtime treats as
/// "skip the check".
pub fn type_tag_for_code(code: &str) -> u32 {
    match code {
        "i" => TYPE_TAG_INT,
        "f" => TYPE_TAG_FLOAT,
        "s" => TYPE_TAG_STR,
        // pointers, untyped, and struct-typed parameters skip checking
        _ => TYPE_TAG_PTR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags_match_runtime_discriminants() {
        assert_eq!(type_tag_for_code("i"), 0);
        assert_eq!(type_tag_for_code("f"), 1);
        assert_eq!(type_tag_for_code("s"), 3);
        assert_eq!(type_tag_for_code("p"), 2);
        assert_eq!(type_tag_for_code(""), 2);
        assert_eq!(type_tag_for_code("Vec2"), 2);
    }
}
