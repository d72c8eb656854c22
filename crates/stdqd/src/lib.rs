//! Quadrate Standard Runtime Module
//!
//! Native backing for the `std` Quadrate module (`stdlib/std/module.qd`).
//! Symbols carry the `qd_stdqd_` prefix; the code generator bridges
//! `std::name` call sites to them through `usr_std_*` wrappers.
//!
//! Stack conventions match the core runtime: popped strings are owned by
//! the popper, failures print a diagnostic with stack dump and trace, then
//! abort.

use qdrt::context::{QdContext, qd_debug_print_stack, qd_print_stack_trace};
use qdrt::stack::{
    QD_STACK_OK, QdExecResult, QdStackElement, QdStackType, free_element, qd_stack_pop,
    qd_stack_size,
};
use std::ffi::CStr;
use std::io::{BufRead, Write};

unsafe fn fatal(ctx: *mut QdContext, op: &str, msg: &str) -> ! {
    eprintln!("Fatal error in {}: {}", op, msg);
    unsafe {
        qd_debug_print_stack(ctx);
        qd_print_stack_trace(ctx);
    }
    std::process::abort()
}

unsafe fn pop_or_fatal(ctx: *mut QdContext, op: &str) -> QdStackElement {
    let mut out = QdStackElement::int(0);
    unsafe {
        if qd_stack_pop((*ctx).st, &mut out) != QD_STACK_OK {
            fatal(ctx, op, "Stack underflow");
        }
    }
    out
}

/// Count `%s` / `%d` / `%i` / `%f` specifiers; `%%` is a literal.
fn count_format_specifiers(fmt: &str) -> usize {
    let bytes = fmt.as_bytes();
    let mut count = 0;
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'%' {
            match bytes[i + 1] {
                b's' | b'd' | b'i' | b'f' => count += 1,
                _ => {}
            }
            i += 2;
        } else {
            i += 1;
        }
    }
    count
}

unsafe fn format_into(ctx: *mut QdContext, op: &str, out: &mut dyn Write) -> QdExecResult {
    unsafe {
        let fmt_elem = pop_or_fatal(ctx, op);
        if fmt_elem.ty != QdStackType::Str as u32 {
            free_element(&fmt_elem);
            fatal(ctx, op, "Expected format string on top of stack");
        }
        let format = CStr::from_ptr(fmt_elem.as_str_ptr())
            .to_string_lossy()
            .into_owned();
        free_element(&fmt_elem);

        let arg_count = count_format_specifiers(&format);
        if (qd_stack_size((*ctx).st)) < arg_count {
            fatal(
                ctx,
                op,
                &format!("Format requires {} arguments", arg_count),
            );
        }

        // Arguments were pushed in specifier order, so the first specifier's
        // argument is the deepest of the popped run.
        let mut args = Vec::with_capacity(arg_count);
        for _ in 0..arg_count {
            args.push(pop_or_fatal(ctx, op));
        }
        args.reverse();

        let bytes = format.as_bytes();
        let mut arg_idx = 0;
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'%' && i + 1 < bytes.len() {
                match bytes[i + 1] {
                    b'%' => {
                        let _ = write!(out, "%");
                    }
                    b's' => {
                        let elem = args[arg_idx];
                        arg_idx += 1;
                        if elem.ty != QdStackType::Str as u32 {
                            fatal(ctx, op, "Expected string for %s");
                        }
                        let s = CStr::from_ptr(elem.as_str_ptr()).to_string_lossy().into_owned();
                        free_element(&elem);
                        let _ = write!(out, "{}", s);
                    }
                    b'd' | b'i' => {
                        let elem = args[arg_idx];
                        arg_idx += 1;
                        if elem.ty != QdStackType::Int as u32 {
                            fatal(ctx, op, "Expected int for %d");
                        }
                        let _ = write!(out, "{}", elem.as_int());
                    }
                    b'f' => {
                        let elem = args[arg_idx];
                        arg_idx += 1;
                        if elem.ty != QdStackType::Float as u32 {
                            fatal(ctx, op, "Expected float for %f");
                        }
                        let _ = write!(out, "{:.6}", elem.as_float());
                    }
                    other => {
                        let _ = write!(out, "%{}", other as char);
                    }
                }
                i += 2;
            } else {
                let _ = out.write_all(&bytes[i..=i]);
                i += 1;
            }
        }
        let _ = out.flush();
    }
    QdExecResult::ok()
}

/// ( args... fmt:s -- ). Formatted print to stdout. Specifiers `%d`, `%i`,
/// `%f`, `%s`; `%%` prints a percent sign.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_stdqd_printf(ctx: *mut QdContext) -> QdExecResult {
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    unsafe { format_into(ctx, "std::printf", &mut lock) }
}

/// ( args... fmt:s -- ). Formatted print to stderr.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_stdqd_eprintf(ctx: *mut QdContext) -> QdExecResult {
    let stderr = std::io::stderr();
    let mut lock = stderr.lock();
    unsafe { format_into(ctx, "std::eprintf", &mut lock) }
}

/// ( a -- ). Pop and print any value to stdout without a newline.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_stdqd_print(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        let val = pop_or_fatal(ctx, "std::print");
        match val.type_tag() {
            Some(QdStackType::Int) => print!("{}", val.as_int()),
            Some(QdStackType::Float) => print!("{}", val.as_float()),
            Some(QdStackType::Str) => {
                let s = CStr::from_ptr(val.as_str_ptr()).to_string_lossy().into_owned();
                free_element(&val);
                print!("{}", s);
            }
            Some(QdStackType::Ptr) => print!("{:#x}", val.value),
            None => return QdExecResult::failure(-3),
        }
        let _ = std::io::stdout().flush();
    }
    QdExecResult::ok()
}

/// ( -- line:s ). Read one line from stdin (newline stripped) and push it
/// as a string. EOF pushes the empty string.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_stdqd_input(ctx: *mut QdContext) -> QdExecResult {
    let mut line = String::new();
    let stdin = std::io::stdin();
    if stdin.lock().read_line(&mut line).is_err() {
        return QdExecResult::failure(-2);
    }
    let trimmed = line.trim_end_matches(['\n', '\r']);
    let c_line = std::ffi::CString::new(trimmed).unwrap_or_default();
    unsafe { qdrt::stack::qd_push_s(ctx, c_line.as_ptr()) }
}
