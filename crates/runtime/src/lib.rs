//! Quadrate Stack Runtime
//!
//! The native runtime linked into every compiled Quadrate program. The code
//! generator emits calls against the `qd_*` symbols exported here; the layout
//! of [`context::QdContext`] and [`stack::QdStackElement`] is part of that
//! contract and must not change without a matching compiler update.
//!
//! # ABI Conventions
//!
//! - Every primitive has the shape `qd_<op>(ctx: *mut QdContext) -> QdExecResult`.
//! - Literal pushes take an extra value argument (`qd_push_i`, `qd_push_f`, ...).
//! - Primitives that cannot honor their contract (underflow, type mismatch,
//!   domain error) print a diagnostic, dump the stack and the call-stack
//!   trace, and abort the process.
//! - A popped string is owned by whoever popped it.

pub mod arithmetic;
pub mod bits;
pub mod casts;
pub mod compare;
pub mod context;
pub mod error;
pub mod io;
pub mod memory;
pub mod shuffle;
pub mod stack;
pub mod structs;
pub mod thread;

pub use context::{QdContext, QdStack, qd_clone_context, qd_create_context, qd_free_context};
pub use stack::{QD_STACK_OK, QdExecResult, QdStackElement, QdStackType};
