//! Statement dispatch: literals, built-in instructions, calls with
//! implicit casts and fallibility handling, function pointers, struct
//! construction, field access, and locals.

use super::functions::{FnState, LocalSlot};
use super::{CodeGen, CodeGenError, control_flow, float_literal};
use crate::ast::{AstKind, AstNode, CastDirection, LiteralKind};
use crate::builtins;

pub(crate) fn emit_block(
    cg: &mut CodeGen,
    block: &AstNode,
    st: &mut FnState,
) -> Result<(), CodeGenError> {
    for child in &block.children {
        emit_node(cg, child, st)?;
        // stop after a terminator (return, break, continue)
        if st.terminated {
            break;
        }
    }
    Ok(())
}

pub(crate) fn emit_node(
    cg: &mut CodeGen,
    node: &AstNode,
    st: &mut FnState,
) -> Result<(), CodeGenError> {
    if cg.debug_info() {
        st.line(&format!("; line {}", node.line));
    }
    match &node.kind {
        AstKind::Block => emit_block(cg, node, st),
        AstKind::Literal { kind, text } => emit_literal(cg, kind, text, st),
        AstKind::Instruction { name } => emit_instruction(cg, name, st),
        AstKind::Identifier {
            name,
            abort_on_error,
            check_error,
            parameter_casts,
        } => emit_identifier(cg, node, name, *abort_on_error, *check_error, parameter_casts, st),
        AstKind::ScopedIdentifier {
            scope,
            name,
            abort_on_error,
            check_error,
            parameter_casts,
        } => {
            let key = format!("{}::{}", scope, name);
            let symbol = format!("usr_{}_{}", scope, name);
            let throws = cg.functions.get(&key).map(|f| f.throws).unwrap_or(false);
            if !cg.is_defined_here(&symbol) && !cg.functions.contains_key(&key) {
                cg.declare_external_function(&symbol);
            }
            emit_call(cg, &key, &symbol, throws, *abort_on_error, *check_error, parameter_casts, st)
        }
        AstKind::FunctionPointer { function_name } => {
            let symbol = match cg.functions.get(function_name) {
                Some(info) => info.symbol.clone(),
                None => match function_name.split_once("::") {
                    Some((scope, name)) => {
                        let symbol = format!("usr_{}_{}", scope, name);
                        cg.declare_external_function(&symbol);
                        symbol
                    }
                    None => {
                        return Err(CodeGenError::Logic(format!(
                            "function '{}' not found for function pointer",
                            function_name
                        )));
                    }
                },
            };
            let result = st.temp();
            let ctx = st.ctx.clone();
            st.line(&format!(
                "{} = call %qd_exec_result @qd_push_p(ptr {}, ptr @{})",
                result, ctx, symbol
            ));
            Ok(())
        }
        AstKind::If => control_flow::emit_if(cg, node, st),
        AstKind::For { .. } => control_flow::emit_for(cg, node, st),
        AstKind::Loop => control_flow::emit_loop(cg, node, st),
        AstKind::Switch => control_flow::emit_switch(cg, node, st),
        AstKind::Break => {
            if let Some(targets) = st.loop_stack.last() {
                let target = targets.break_label.clone();
                st.branch(&target);
            }
            Ok(())
        }
        AstKind::Continue => {
            if let Some(targets) = st.loop_stack.last() {
                let target = targets.continue_label.clone();
                st.branch(&target);
            }
            Ok(())
        }
        AstKind::Return => {
            let target = st.return_label.clone();
            st.branch(&target);
            Ok(())
        }
        AstKind::Defer => {
            // buffered; emitted in the epilogue in reverse order
            st.defers.push(node.clone());
            Ok(())
        }
        AstKind::Ctx => control_flow::emit_ctx(cg, node, st),
        AstKind::StructConstruction { struct_name } => {
            let nfields = st
                .items
                .structs
                .get(struct_name)
                .map(|f| f.len())
                .ok_or_else(|| {
                    CodeGenError::Logic(format!("undefined struct '{}'", struct_name))
                })?;
            let result = st.temp();
            let ctx = st.ctx.clone();
            st.line(&format!(
                "{} = call %qd_exec_result @qd_struct_pack(ptr {}, i64 {})",
                result, ctx, nfields
            ));
            Ok(())
        }
        AstKind::FieldAccess {
            var_name,
            field_name,
        } => emit_field_access(cg, var_name, field_name, st),
        AstKind::Local { name, type_name } => {
            let reg = format!("%loc.{}.{}", name, st.next_id());
            let stack = st.load_stack_ptr();
            st.line(&format!("{} = alloca %qd_stack_element", reg));
            let status = st.temp();
            st.line(&format!(
                "{} = call i32 @qd_stack_pop(ptr {}, ptr {})",
                status, stack, reg
            ));
            let struct_name = st
                .items
                .structs
                .contains_key(type_name)
                .then(|| type_name.clone());
            st.locals.insert(
                name.clone(),
                LocalSlot {
                    reg,
                    struct_name,
                },
            );
            Ok(())
        }
        // top-level kinds never appear in statement position
        _ => Ok(()),
    }
}

fn emit_literal(
    cg: &mut CodeGen,
    kind: &LiteralKind,
    text: &str,
    st: &mut FnState,
) -> Result<(), CodeGenError> {
    let ctx = st.ctx.clone();
    match kind {
        LiteralKind::Integer => {
            let value: i64 = text.parse().map_err(|_| {
                CodeGenError::Logic(format!("invalid integer literal '{}'", text))
            })?;
            let result = st.temp();
            st.line(&format!(
                "{} = call %qd_exec_result @qd_push_i(ptr {}, i64 {})",
                result, ctx, value
            ));
        }
        LiteralKind::Float => {
            let value: f64 = text.parse().map_err(|_| {
                CodeGenError::Logic(format!("invalid float literal '{}'", text))
            })?;
            let result = st.temp();
            st.line(&format!(
                "{} = call %qd_exec_result @qd_push_f(ptr {}, double {})",
                result,
                ctx,
                float_literal(value)
            ));
        }
        LiteralKind::String => {
            let symbol = cg.intern_string(text);
            let result = st.temp();
            st.line(&format!(
                "{} = call %qd_exec_result @qd_push_s(ptr {}, ptr {})",
                result, ctx, symbol
            ));
        }
    }
    Ok(())
}

fn emit_instruction(cg: &mut CodeGen, name: &str, st: &mut FnState) -> Result<(), CodeGenError> {
    let symbol = builtins::runtime_symbol(name);
    cg.declare_runtime_op(&symbol);
    let result = st.temp();
    let ctx = st.ctx.clone();
    st.line(&format!(
        "{} = call %qd_exec_result @{}(ptr {})",
        result, symbol, ctx
    ));

    // `error` in a fallible function returns through the epilogue so no
    // further statements run after the flag is raised
    if name == "error" && st.fallible {
        let target = st.return_label.clone();
        st.branch(&target);
    }
    Ok(())
}

fn emit_identifier(
    cg: &mut CodeGen,
    node: &AstNode,
    name: &str,
    abort_on_error: bool,
    check_error: bool,
    parameter_casts: &[CastDirection],
    st: &mut FnState,
) -> Result<(), CodeGenError> {
    // loop iterator reference
    if name == "$" {
        let iter = st.iter_vars.last().cloned().ok_or_else(|| {
            CodeGenError::Logic("loop iterator '$' outside a for loop".to_string())
        })?;
        let result = st.temp();
        let ctx = st.ctx.clone();
        st.line(&format!(
            "{} = call %qd_exec_result @qd_push_i(ptr {}, i64 {})",
            result, ctx, iter
        ));
        return Ok(());
    }

    // local variable: push a copy of the saved element
    if let Some(slot) = st.locals.get(name) {
        let reg = slot.reg.clone();
        let result = st.temp();
        let ctx = st.ctx.clone();
        st.line(&format!(
            "{} = call %qd_exec_result @qd_push_e(ptr {}, ptr {})",
            result, ctx, reg
        ));
        return Ok(());
    }

    // module constant: push its literal value
    if let Some((kind, text)) = st.items.constants.get(name).cloned() {
        return emit_literal(cg, &kind, &text, st);
    }

    // user function call
    let key = if st.namespace == "main" {
        name.to_string()
    } else {
        format!("{}::{}", st.namespace, name)
    };
    let info = cg
        .functions
        .get(&key)
        .or_else(|| cg.functions.get(name))
        .cloned()
        .ok_or_else(|| {
            CodeGenError::Logic(format!("undefined function '{}' at {}", name, node.line))
        })?;
    emit_call(
        cg,
        name,
        &info.symbol,
        info.throws,
        abort_on_error,
        check_error,
        parameter_casts,
        st,
    )
}

/// Emit implicit casts, the direct call, and fallibility handling.
#[allow(clippy::too_many_arguments)]
pub(crate) fn emit_call(
    cg: &mut CodeGen,
    display_name: &str,
    symbol: &str,
    throws: bool,
    abort_on_error: bool,
    _check_error: bool,
    parameter_casts: &[CastDirection],
    st: &mut FnState,
) -> Result<(), CodeGenError> {
    let ctx = st.ctx.clone();

    // implicit casts recorded by the validator; parameter i sits
    // (n-1-i) below the top of the stack
    let n = parameter_casts.len();
    for (i, cast) in parameter_casts.iter().enumerate() {
        let depth = n - 1 - i;
        match cast {
            CastDirection::None => {}
            CastDirection::FloatToInt => {
                let result = st.temp();
                st.line(&format!(
                    "{} = call %qd_exec_result @qd_casti_n(ptr {}, i64 {})",
                    result, ctx, depth
                ));
            }
            CastDirection::IntToFloat => {
                let result = st.temp();
                st.line(&format!(
                    "{} = call %qd_exec_result @qd_castf_n(ptr {}, i64 {})",
                    result, ctx, depth
                ));
            }
        }
    }

    let result = st.temp();
    st.line(&format!(
        "{} = call %qd_exec_result @{}(ptr {})",
        result, symbol, ctx
    ));

    if !throws {
        return Ok(());
    }

    let (flag, flag_ptr) = st.load_has_error();
    if abort_on_error {
        // `!` call site: print a fatal message and abort
        let abort_label = st.fresh_label("err.abort");
        let continue_label = st.fresh_label("err.cont");
        st.line(&format!(
            "br i1 {}, label %{}, label %{}",
            flag, abort_label, continue_label
        ));
        st.terminated = true;

        st.start_block(&abort_label);
        let message = cg.intern_string(&format!(
            "Fatal error: function '{}' failed",
            display_name
        ));
        st.line(&format!(
            "call void @qd_abort_with_message(ptr {}, ptr {})",
            ctx, message
        ));
        st.line("unreachable");
        st.terminated = true;

        st.start_block(&continue_label);
    } else {
        // bare or `?`: convert the flag into an error-tainted status on
        // the stack (1 = error) and clear it
        let status = st.temp();
        st.line(&format!(
            "{} = select i1 {}, i64 1, i64 0",
            status, flag
        ));
        st.line(&format!("store i8 0, ptr {}", flag_ptr));
        let push = st.temp();
        st.line(&format!(
            "{} = call %qd_exec_result @qd_err_push(ptr {}, i64 {})",
            push, ctx, status
        ));
    }
    Ok(())
}

fn emit_field_access(
    _cg: &mut CodeGen,
    var_name: &str,
    field_name: &str,
    st: &mut FnState,
) -> Result<(), CodeGenError> {
    let slot = st.locals.get(var_name).ok_or_else(|| {
        CodeGenError::Logic(format!("unknown variable '{}'", var_name))
    })?;
    let reg = slot.reg.clone();
    let struct_name = slot.struct_name.clone().ok_or_else(|| {
        CodeGenError::Logic(format!("variable '{}' is not a struct", var_name))
    })?;
    let fields = st.items.structs.get(&struct_name).ok_or_else(|| {
        CodeGenError::Logic(format!("undefined struct '{}'", struct_name))
    })?;
    let index = fields
        .iter()
        .position(|f| f.name == field_name)
        .ok_or_else(|| {
            CodeGenError::Logic(format!(
                "struct '{}' has no field '{}'",
                struct_name, field_name
            ))
        })?;

    let ctx = st.ctx.clone();
    let push = st.temp();
    st.line(&format!(
        "{} = call %qd_exec_result @qd_push_e(ptr {}, ptr {})",
        push, ctx, reg
    ));
    let access = st.temp();
    st.line(&format!(
        "{} = call %qd_exec_result @qd_struct_field(ptr {}, i64 {})",
        access, ctx, index
    ));
    Ok(())
}
