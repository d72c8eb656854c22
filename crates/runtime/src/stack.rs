//! Tagged stack elements and the low-level push/pop primitives.
//!
//! The operand stack is a fixed-capacity array of 16-byte tagged elements.
//! The element layout `{ u64 value, u32 type, u8 error_tainted }` is shared
//! with the code generator, which addresses the fields by offset when it
//! pops a condition or reads a loop bound.

use crate::context::{QdContext, QdStack};
use libc::c_char;
use std::ffi::CStr;

/// Result struct returned by every primitive: `{ i32 }`, zero on success.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QdExecResult {
    pub code: i32,
}

impl QdExecResult {
    pub const OK: QdExecResult = QdExecResult { code: 0 };

    pub fn ok() -> Self {
        QdExecResult { code: 0 }
    }

    pub fn failure(code: i32) -> Self {
        QdExecResult { code }
    }
}

/// Stack-level status codes (internal; primitives abort instead of
/// returning most of these, but pushes surface overflow as -2).
pub const QD_STACK_OK: i32 = 0;
pub const QD_STACK_OVERFLOW: i32 = -2;

/// Element type tags. The numeric values are observed by generated code
/// (the `for` lowering tests `type == 1` to detect float bounds) and by
/// `qd_check_stack` descriptors.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QdStackType {
    Int = 0,
    Float = 1,
    Ptr = 2,
    Str = 3,
}

impl QdStackType {
    pub fn from_raw(raw: u32) -> Option<QdStackType> {
        match raw {
            0 => Some(QdStackType::Int),
            1 => Some(QdStackType::Float),
            2 => Some(QdStackType::Ptr),
            3 => Some(QdStackType::Str),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            QdStackType::Int => "int",
            QdStackType::Float => "float",
            QdStackType::Ptr => "ptr",
            QdStackType::Str => "str",
        }
    }
}

/// One stack slot: `{ u64 value, u32 type, u8 error_tainted }`.
///
/// The value field is a bit-union: integer bits, float bits, a pointer, or
/// an owned `*mut c_char` for strings. A `Str` slot owns its string; the
/// owner changes on pop.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct QdStackElement {
    pub value: u64,
    pub ty: u32,
    pub error_tainted: u8,
}

impl QdStackElement {
    pub fn int(v: i64) -> Self {
        QdStackElement {
            value: v as u64,
            ty: QdStackType::Int as u32,
            error_tainted: 0,
        }
    }

    pub fn float(v: f64) -> Self {
        QdStackElement {
            value: v.to_bits(),
            ty: QdStackType::Float as u32,
            error_tainted: 0,
        }
    }

    pub fn ptr(v: *mut libc::c_void) -> Self {
        QdStackElement {
            value: v as usize as u64,
            ty: QdStackType::Ptr as u32,
            error_tainted: 0,
        }
    }

    /// Takes ownership of `s` (a heap string allocated with `alloc_c_string`).
    pub fn str(s: *mut c_char) -> Self {
        QdStackElement {
            value: s as usize as u64,
            ty: QdStackType::Str as u32,
            error_tainted: 0,
        }
    }

    pub fn type_tag(&self) -> Option<QdStackType> {
        QdStackType::from_raw(self.ty)
    }

    pub fn as_int(&self) -> i64 {
        self.value as i64
    }

    pub fn as_float(&self) -> f64 {
        f64::from_bits(self.value)
    }

    pub fn as_ptr(&self) -> *mut libc::c_void {
        self.value as usize as *mut libc::c_void
    }

    pub fn as_str_ptr(&self) -> *mut c_char {
        self.value as usize as *mut c_char
    }

    pub fn is_numeric(&self) -> bool {
        self.ty == QdStackType::Int as u32 || self.ty == QdStackType::Float as u32
    }

    /// Numeric value after int-to-float promotion. Caller checks `is_numeric`.
    pub fn numeric(&self) -> f64 {
        if self.ty == QdStackType::Float as u32 {
            self.as_float()
        } else {
            self.as_int() as f64
        }
    }
}

/// Allocate a NUL-terminated C string on the heap from a Rust byte slice.
///
/// Interior NUL bytes truncate the copy (they cannot be represented).
pub fn alloc_c_string(bytes: &[u8]) -> *mut c_char {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let mut buf = Vec::with_capacity(end + 1);
    buf.extend_from_slice(&bytes[..end]);
    buf.push(0);
    let boxed = buf.into_boxed_slice();
    Box::into_raw(boxed) as *mut c_char
}

/// Free a string previously produced by `alloc_c_string` or `deep_copy`.
///
/// # Safety
/// `s` must have been allocated by this runtime and not freed already.
pub unsafe fn free_c_string(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    unsafe {
        let len = CStr::from_ptr(s).to_bytes().len();
        let slice = std::ptr::slice_from_raw_parts_mut(s as *mut u8, len + 1);
        drop(Box::from_raw(slice));
    }
}

/// Deep-copy an element: strings are duplicated so both copies own
/// independent memory, everything else is a plain bit copy.
///
/// # Safety
/// A `Str` element must hold a valid runtime-allocated string.
pub unsafe fn deep_copy(elem: &QdStackElement) -> QdStackElement {
    if elem.ty == QdStackType::Str as u32 {
        let bytes = unsafe { CStr::from_ptr(elem.as_str_ptr()).to_bytes() };
        let mut copy = *elem;
        copy.value = alloc_c_string(bytes) as usize as u64;
        copy
    } else {
        *elem
    }
}

/// Release whatever an element owns (strings only).
///
/// # Safety
/// Same as `free_c_string`; the element must not be used afterwards.
pub unsafe fn free_element(elem: &QdStackElement) {
    if elem.ty == QdStackType::Str as u32 {
        unsafe { free_c_string(elem.as_str_ptr()) };
    }
}

// ---------------------------------------------------------------------------
// Fatal diagnostics
// ---------------------------------------------------------------------------

/// Print the stack contents to stderr (index, type, value), bottom first.
pub(crate) unsafe fn dump_stack(ctx: *mut QdContext) {
    let st = unsafe { &*(*ctx).st };
    eprintln!("\nStack dump ({} elements):", st.size);
    if st.size == 0 {
        eprintln!("  (empty)");
        return;
    }
    for i in 0..st.size {
        let elem = unsafe { &*st.elements.add(i) };
        match elem.type_tag() {
            Some(QdStackType::Int) => eprintln!("  [{}]: int = {}", i, elem.as_int()),
            Some(QdStackType::Float) => eprintln!("  [{}]: float = {:.6}", i, elem.as_float()),
            Some(QdStackType::Str) => {
                let s = unsafe { CStr::from_ptr(elem.as_str_ptr()) };
                eprintln!("  [{}]: str = \"{}\"", i, s.to_string_lossy());
            }
            Some(QdStackType::Ptr) => eprintln!("  [{}]: ptr = {:#x}", i, elem.value),
            None => eprintln!("  [{}]: <unknown type>", i),
        }
    }
}

/// Print message, dump stack and trace, terminate the process.
pub(crate) unsafe fn fatal(ctx: *mut QdContext, op: &str, msg: &str) -> ! {
    eprintln!("Fatal error in {}: {}", op, msg);
    unsafe {
        dump_stack(ctx);
        crate::context::print_stack_trace(ctx);
    }
    std::process::abort()
}

pub(crate) unsafe fn fatal_underflow(ctx: *mut QdContext, op: &str, required: usize) -> ! {
    let have = unsafe { (*(*ctx).st).size };
    let noun = if required == 1 { "element" } else { "elements" };
    unsafe {
        fatal(
            ctx,
            op,
            &format!("Stack underflow (required {} {}, have {})", required, noun, have),
        )
    }
}

/// Require at least `n` elements or abort.
pub(crate) unsafe fn require_depth(ctx: *mut QdContext, op: &str, n: usize) {
    if unsafe { (*(*ctx).st).size } < n {
        unsafe { fatal_underflow(ctx, op, n) };
    }
}

/// Require the element `depth` below the top to be numeric, or abort.
pub(crate) unsafe fn require_numeric(ctx: *mut QdContext, op: &str, depth: usize) {
    let st = unsafe { &*(*ctx).st };
    let elem = unsafe { &*st.elements.add(st.size - 1 - depth) };
    if !elem.is_numeric() {
        unsafe { fatal(ctx, op, "Type error (expected numeric type)") };
    }
}

// ---------------------------------------------------------------------------
// Raw stack access (internal)
// ---------------------------------------------------------------------------

pub(crate) unsafe fn raw_push(ctx: *mut QdContext, elem: QdStackElement) -> QdExecResult {
    let st = unsafe { &mut *(*ctx).st };
    if st.size >= st.capacity {
        unsafe { free_element(&elem) };
        return QdExecResult::failure(QD_STACK_OVERFLOW);
    }
    unsafe { st.elements.add(st.size).write(elem) };
    st.size += 1;
    QdExecResult::ok()
}

/// Pop the top element; the caller owns any string it carries.
pub(crate) unsafe fn raw_pop(ctx: *mut QdContext, op: &str) -> QdStackElement {
    let st = unsafe { &mut *(*ctx).st };
    if st.size == 0 {
        unsafe { fatal_underflow(ctx, op, 1) };
    }
    st.size -= 1;
    unsafe { st.elements.add(st.size).read() }
}

/// Borrow the element `depth` below the top (0 = top). Aborts on underflow.
pub(crate) unsafe fn peek_at<'a>(ctx: *mut QdContext, op: &str, depth: usize) -> &'a mut QdStackElement {
    let st = unsafe { &mut *(*ctx).st };
    if st.size <= depth {
        unsafe { fatal_underflow(ctx, op, depth + 1) };
    }
    unsafe { &mut *st.elements.add(st.size - 1 - depth) }
}

// ---------------------------------------------------------------------------
// ABI: pushes and element transfer
// ---------------------------------------------------------------------------

/// Push a 64-bit integer. ( -- n )
///
/// # Safety
/// `ctx` must be a live context created by `qd_create_context`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_push_i(ctx: *mut QdContext, value: i64) -> QdExecResult {
    unsafe { raw_push(ctx, QdStackElement::int(value)) }
}

/// Push a double. ( -- f )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_push_f(ctx: *mut QdContext, value: f64) -> QdExecResult {
    unsafe { raw_push(ctx, QdStackElement::float(value)) }
}

/// Push a string. The bytes are copied; the caller keeps its own pointer.
/// ( -- s )
///
/// # Safety
/// `value` must be a valid NUL-terminated string or null (pushed as "").
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_push_s(ctx: *mut QdContext, value: *const c_char) -> QdExecResult {
    let bytes = if value.is_null() {
        &[][..]
    } else {
        unsafe { CStr::from_ptr(value).to_bytes() }
    };
    unsafe { raw_push(ctx, QdStackElement::str(alloc_c_string(bytes))) }
}

/// Push a raw pointer; no ownership transfer. ( -- p )
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_push_p(ctx: *mut QdContext, value: *mut libc::c_void) -> QdExecResult {
    unsafe { raw_push(ctx, QdStackElement::ptr(value)) }
}

/// Push a deep copy of a caller-held element. Used by generated code to
/// restore locals and ctx-block results; strings are duplicated.
///
/// # Safety
/// `elem` must point to a valid element.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_push_e(ctx: *mut QdContext, elem: *const QdStackElement) -> QdExecResult {
    let copy = unsafe { deep_copy(&*elem) };
    unsafe { raw_push(ctx, copy) }
}

/// Pop the top of a stack into caller storage. The caller owns any string
/// in the popped element. Generated code calls this to read conditions and
/// loop bounds.
///
/// # Safety
/// `st` must belong to a live context; `out` must be valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_stack_pop(st: *mut QdStack, out: *mut QdStackElement) -> i32 {
    let stack = unsafe { &mut *st };
    if stack.size == 0 {
        return QD_STACK_OVERFLOW;
    }
    stack.size -= 1;
    unsafe { out.write(stack.elements.add(stack.size).read()) };
    QD_STACK_OK
}

/// Current stack depth.
///
/// # Safety
/// `st` must belong to a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_stack_size(st: *const QdStack) -> usize {
    unsafe { (*st).size }
}

/// Abort the process with a message after dumping stack and trace. Emitted
/// by the generator for `!` call sites whose callee raised an error.
///
/// # Safety
/// `msg` must be a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_abort_with_message(ctx: *mut QdContext, msg: *const c_char) -> ! {
    let text = if msg.is_null() {
        "aborted".to_string()
    } else {
        unsafe { CStr::from_ptr(msg).to_string_lossy().into_owned() }
    };
    eprintln!("{}", text);
    unsafe {
        dump_stack(ctx);
        crate::context::print_stack_trace(ctx);
    }
    std::process::abort()
}

/// Runtime type assertion at function entry: the stack must hold at least
/// `count` elements and each must match the descriptor (bottom to top of
/// the checked window). `Ptr` entries in the descriptor skip the check, so
/// untyped parameters stay permissive.
///
/// # Safety
/// `types` must point to at least `count` entries; `func_name` must be a
/// valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_check_stack(
    ctx: *mut QdContext,
    count: usize,
    types: *const u32,
    func_name: *const c_char,
) {
    let name = if func_name.is_null() {
        "<unknown>".to_string()
    } else {
        unsafe { CStr::from_ptr(func_name).to_string_lossy().into_owned() }
    };
    let st = unsafe { &*(*ctx).st };
    if st.size < count {
        let noun = if count == 1 { "element" } else { "elements" };
        unsafe {
            fatal(
                ctx,
                &name,
                &format!("Stack underflow (required {} {}, have {})", count, noun, st.size),
            )
        };
    }
    for i in 0..count {
        let expected = unsafe { *types.add(i) };
        if expected == QdStackType::Ptr as u32 {
            continue;
        }
        let elem = unsafe { &*st.elements.add(st.size - count + i) };
        if elem.ty != expected {
            let expected_name = QdStackType::from_raw(expected).map_or("?", QdStackType::name);
            let actual_name = elem.type_tag().map_or("?", QdStackType::name);
            unsafe {
                fatal(
                    ctx,
                    &name,
                    &format!(
                        "Type mismatch for parameter {} (expected {}, got {})",
                        i + 1,
                        expected_name,
                        actual_name
                    ),
                )
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{qd_create_context, qd_free_context};
    use std::ffi::CString;

    #[test]
    fn test_push_pop_int() {
        unsafe {
            let ctx = qd_create_context(16);
            assert_eq!(qd_push_i(ctx, 42).code, 0);
            let elem = raw_pop(ctx, "test");
            assert_eq!(elem.type_tag(), Some(QdStackType::Int));
            assert_eq!(elem.as_int(), 42);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_push_float_bits_roundtrip() {
        unsafe {
            let ctx = qd_create_context(16);
            qd_push_f(ctx, 3.25);
            let elem = raw_pop(ctx, "test");
            assert_eq!(elem.type_tag(), Some(QdStackType::Float));
            assert_eq!(elem.as_float(), 3.25);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_push_string_copies() {
        unsafe {
            let ctx = qd_create_context(16);
            let original = CString::new("hello").unwrap();
            qd_push_s(ctx, original.as_ptr());
            drop(original); // runtime made its own copy
            let elem = raw_pop(ctx, "test");
            assert_eq!(elem.type_tag(), Some(QdStackType::Str));
            let s = CStr::from_ptr(elem.as_str_ptr());
            assert_eq!(s.to_bytes(), b"hello");
            free_element(&elem);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_push_overflow_fails() {
        unsafe {
            let ctx = qd_create_context(2);
            assert_eq!(qd_push_i(ctx, 1).code, 0);
            assert_eq!(qd_push_i(ctx, 2).code, 0);
            assert_eq!(qd_push_i(ctx, 3).code, QD_STACK_OVERFLOW);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_stack_pop_transfers_ownership() {
        unsafe {
            let ctx = qd_create_context(16);
            let s = CString::new("owned").unwrap();
            qd_push_s(ctx, s.as_ptr());
            let mut out = QdStackElement::int(0);
            assert_eq!(qd_stack_pop((*ctx).st, &mut out), QD_STACK_OK);
            assert_eq!(out.type_tag(), Some(QdStackType::Str));
            free_element(&out);
            assert_eq!(qd_stack_pop((*ctx).st, &mut out), QD_STACK_OVERFLOW);
            qd_free_context(ctx);
        }
    }

    #[test]
    fn test_deep_copy_independent_strings() {
        unsafe {
            let a = QdStackElement::str(alloc_c_string(b"abc"));
            let b = deep_copy(&a);
            assert_ne!(a.as_str_ptr(), b.as_str_ptr());
            free_element(&a);
            // b remains valid after a is freed
            assert_eq!(CStr::from_ptr(b.as_str_ptr()).to_bytes(), b"abc");
            free_element(&b);
        }
    }

    #[test]
    fn test_push_e_deep_copies() {
        unsafe {
            let ctx = qd_create_context(16);
            let elem = QdStackElement::str(alloc_c_string(b"dup me"));
            qd_push_e(ctx, &elem);
            let popped = raw_pop(ctx, "test");
            assert_ne!(popped.as_str_ptr(), elem.as_str_ptr());
            free_element(&popped);
            free_element(&elem);
            qd_free_context(ctx);
        }
    }
}
