//! I/O primitives.
//!
//! `print` and `printv` pop their operand (Forth style, trailing newline);
//! `prints` pops and prints a string verbatim with no newline; `printsv`
//! dumps the whole stack non-destructively on one line with type prefixes.

use crate::context::QdContext;
use crate::stack::{
    QdExecResult, QdStackElement, QdStackType, alloc_c_string, fatal, free_element, raw_pop,
    raw_push, require_depth,
};
use std::ffi::CStr;
use std::io::{BufRead, Write};

fn has_whitespace(s: &str) -> bool {
    s.chars().any(|c| c == ' ' || c == '\t' || c == '\n' || c == '\r')
}

/// ( a -- ). Pop and print the top element followed by a newline.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_print(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        require_depth(ctx, "print", 1);
        let val = raw_pop(ctx, "print");
        match val.type_tag() {
            Some(QdStackType::Int) => println!("{}", val.as_int()),
            Some(QdStackType::Float) => println!("{}", format_float(val.as_float())),
            Some(QdStackType::Str) => {
                let s = CStr::from_ptr(val.as_str_ptr()).to_string_lossy().into_owned();
                free_element(&val);
                println!("{}", s);
            }
            _ => {
                free_element(&val);
                return QdExecResult::failure(-3);
            }
        }
    }
    QdExecResult::ok()
}

/// ( a -- ). Pop and print the top element with a type prefix.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_printv(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        require_depth(ctx, "printv", 1);
        let val = raw_pop(ctx, "printv");
        match val.type_tag() {
            Some(QdStackType::Int) => println!("int:{}", val.as_int()),
            Some(QdStackType::Float) => println!("float:{}", format_float(val.as_float())),
            Some(QdStackType::Str) => {
                let s = CStr::from_ptr(val.as_str_ptr()).to_string_lossy().into_owned();
                free_element(&val);
                if has_whitespace(&s) {
                    println!("string:\"{}\"", s);
                } else {
                    println!("string:{}", s);
                }
            }
            Some(QdStackType::Ptr) => println!("ptr:{:#x}", val.value),
            None => {
                free_element(&val);
                return QdExecResult::failure(-3);
            }
        }
    }
    QdExecResult::ok()
}

/// ( s -- ). Pop a string and print it verbatim, no newline.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_prints(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        require_depth(ctx, "prints", 1);
        let val = raw_pop(ctx, "prints");
        if val.ty != QdStackType::Str as u32 {
            free_element(&val);
            fatal(ctx, "prints", "Type error (expected string)");
        }
        let s = CStr::from_ptr(val.as_str_ptr()).to_string_lossy().into_owned();
        free_element(&val);
        print!("{}", s);
        let _ = std::io::stdout().flush();
    }
    QdExecResult::ok()
}

/// ( -- ). Print the entire stack, bottom to top, with type prefixes, on a
/// single line. Non-destructive.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_printsv(ctx: *mut QdContext) -> QdExecResult {
    unsafe {
        let st = &*(*ctx).st;
        let mut parts = Vec::with_capacity(st.size);
        for i in 0..st.size {
            let elem = &*st.elements.add(i);
            let part = match elem.type_tag() {
                Some(QdStackType::Int) => format!("int:{}", elem.as_int()),
                Some(QdStackType::Float) => format!("float:{}", format_float(elem.as_float())),
                Some(QdStackType::Str) => {
                    let s = CStr::from_ptr(elem.as_str_ptr()).to_string_lossy();
                    if has_whitespace(&s) {
                        format!("string:\"{}\"", s)
                    } else {
                        format!("string:{}", s)
                    }
                }
                Some(QdStackType::Ptr) => format!("ptr:{:#x}", elem.value),
                None => return QdExecResult::failure(-3),
            };
            parts.push(part);
        }
        if !parts.is_empty() {
            println!("{}", parts.join(" "));
        }
    }
    QdExecResult::ok()
}

/// ( -- ). Print a newline.
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_nl(_ctx: *mut QdContext) -> QdExecResult {
    println!();
    QdExecResult::ok()
}

/// ( -- a ). Read one line from stdin and push it: an integer if it parses
/// as one, a float if it parses as one, otherwise a string (surrounding
/// quotes stripped).
///
/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn qd_read(ctx: *mut QdContext) -> QdExecResult {
    let mut line = String::new();
    let stdin = std::io::stdin();
    if stdin.lock().read_line(&mut line).is_err() {
        return QdExecResult::failure(-2);
    }
    let trimmed = line.trim_end_matches(['\n', '\r']).trim();
    unsafe {
        if let Ok(i) = trimmed.parse::<i64>() {
            raw_push(ctx, QdStackElement::int(i))
        } else if let Ok(f) = trimmed.parse::<f64>() {
            raw_push(ctx, QdStackElement::float(f))
        } else {
            let unquoted = trimmed
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .unwrap_or(trimmed);
            raw_push(ctx, QdStackElement::str(alloc_c_string(unquoted.as_bytes())))
        }
    }
}

/// Format a float the way the reference runtime's `%g` does for the
/// common cases: integral values keep one decimal of context dropped,
/// e.g. `3` not `3.0`.
fn format_float(f: f64) -> String {
    if f == f.trunc() && f.is_finite() && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}
