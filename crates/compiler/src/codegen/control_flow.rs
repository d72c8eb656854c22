//! Control-flow lowering: if/else, bounded for loops with a phi
//! iterator, infinite loops, switch compare chains, and isolated ctx
//! blocks.

use super::functions::{FnState, LoopTargets};
use super::{CodeGen, CodeGenError, statements};
use crate::ast::{AstKind, AstNode};

/// Pop the condition at IR level and branch on its value field.
pub(crate) fn emit_if(
    cg: &mut CodeGen,
    node: &AstNode,
    st: &mut FnState,
) -> Result<(), CodeGenError> {
    let elem = st.pop_element("if condition");
    let bits = st.load_value_bits(&elem);
    let is_true = st.temp();
    st.line(&format!("{} = icmp ne i64 {}, 0", is_true, bits));

    let then_label = st.fresh_label("if.then");
    let merge_label = st.fresh_label("if.merge");
    let has_else = node.child_count() > 1;
    let else_label = if has_else {
        st.fresh_label("if.else")
    } else {
        merge_label.clone()
    };

    st.line(&format!(
        "br i1 {}, label %{}, label %{}",
        is_true, then_label, else_label
    ));
    st.terminated = true;

    st.start_block(&then_label);
    if let Some(then_body) = node.child(0) {
        statements::emit_block(cg, then_body, st)?;
    }
    st.branch(&merge_label);

    if has_else {
        st.start_block(&else_label);
        if let Some(else_body) = node.child(1) {
            statements::emit_block(cg, else_body, st)?;
        }
        st.branch(&merge_label);
    }

    st.start_block(&merge_label);
    Ok(())
}

/// Bounded integer loop. Three values pop off the stack (step on top,
/// then end, then start); float-tagged slots are converted so a float
/// bound still drives an integer loop. The iterator lives in a phi.
pub(crate) fn emit_for(
    cg: &mut CodeGen,
    node: &AstNode,
    st: &mut FnState,
) -> Result<(), CodeGenError> {
    let step_elem = st.pop_element("for step");
    let end_elem = st.pop_element("for end");
    let start_elem = st.pop_element("for start");

    let step = st.load_value_as_int(&step_elem);
    let end = st.load_value_as_int(&end_elem);
    let start = st.load_value_as_int(&start_elem);

    let header = st.fresh_label("for.header");
    let body = st.fresh_label("for.body");
    let inc = st.fresh_label("for.inc");
    let exit = st.fresh_label("for.exit");

    let pre_block = st.current_block.clone();
    st.branch(&header);

    st.start_block(&header);
    let iter = st.temp();
    // the second incoming edge is patched conceptually by the inc block
    st.line(&format!(
        "{} = phi i64 [ {}, %{} ], [ {}.next, %{} ]",
        iter, start, pre_block, iter, inc
    ));
    let cmp = st.temp();
    st.line(&format!("{} = icmp slt i64 {}, {}", cmp, iter, end));
    st.line(&format!("br i1 {}, label %{}, label %{}", cmp, body, exit));
    st.terminated = true;

    st.start_block(&body);
    st.loop_stack.push(LoopTargets {
        break_label: exit.clone(),
        continue_label: inc.clone(),
    });
    st.iter_vars.push(iter.clone());
    if let Some(loop_body) = node.child(0) {
        statements::emit_block(cg, loop_body, st)?;
    }
    st.iter_vars.pop();
    st.loop_stack.pop();
    st.branch(&inc);

    st.start_block(&inc);
    st.line(&format!("{}.next = add i64 {}, {}", iter, iter, step));
    st.line(&format!("br label %{}", header));
    st.terminated = true;

    st.start_block(&exit);
    Ok(())
}

/// Infinite loop; the exit block is reachable only via `break`.
pub(crate) fn emit_loop(
    cg: &mut CodeGen,
    node: &AstNode,
    st: &mut FnState,
) -> Result<(), CodeGenError> {
    let body = st.fresh_label("loop.body");
    let exit = st.fresh_label("loop.exit");

    st.branch(&body);

    st.start_block(&body);
    st.loop_stack.push(LoopTargets {
        break_label: exit.clone(),
        continue_label: body.clone(),
    });
    if let Some(loop_body) = node.child(0) {
        statements::emit_block(cg, loop_body, st)?;
    }
    st.loop_stack.pop();
    // loop forever unless the body already branched away
    st.branch(&body);

    st.start_block(&exit);
    Ok(())
}

/// Switch lowers to a chain of integer compares against the popped
/// subject; cases do not fall through.
pub(crate) fn emit_switch(
    cg: &mut CodeGen,
    node: &AstNode,
    st: &mut FnState,
) -> Result<(), CodeGenError> {
    let elem = st.pop_element("switch subject");
    let subject = st.load_value_bits(&elem);
    let merge = st.fresh_label("sw.merge");

    // partition cases; default runs when no compare matched
    let mut default_case: Option<&AstNode> = None;
    let mut value_cases: Vec<(i64, &AstNode)> = Vec::new();
    for case in &node.children {
        if let AstKind::Case { value, is_default } = &case.kind {
            if *is_default {
                default_case = Some(case);
            } else if let Some(value) = value {
                value_cases.push((*value, case));
            }
        }
    }

    let mut body_labels = Vec::with_capacity(value_cases.len());
    for (value, _) in &value_cases {
        let body_label = st.fresh_label("sw.body");
        let next_label = st.fresh_label("sw.next");
        let cmp = st.temp();
        st.line(&format!("{} = icmp eq i64 {}, {}", cmp, subject, value));
        st.line(&format!(
            "br i1 {}, label %{}, label %{}",
            cmp, body_label, next_label
        ));
        st.terminated = true;
        body_labels.push(body_label);
        st.start_block(&next_label);
    }

    // fall-off end of the chain: default body or straight to merge
    if let Some(default_case) = default_case {
        let default_label = st.fresh_label("sw.default");
        st.branch(&default_label);
        st.start_block(&default_label);
        if let Some(body) = default_case.child(0) {
            statements::emit_block(cg, body, st)?;
        }
        st.branch(&merge);
    } else {
        st.branch(&merge);
    }

    for ((_, case), body_label) in value_cases.iter().zip(body_labels) {
        st.start_block(&body_label);
        if let Some(body) = case.child(0) {
            statements::emit_block(cg, body, st)?;
        }
        st.branch(&merge);
    }

    st.start_block(&merge);
    Ok(())
}

/// `ctx` block: deep-copy the context, run the body against the clone,
/// pop the single produced value into the parent, free the clone.
pub(crate) fn emit_ctx(
    cg: &mut CodeGen,
    node: &AstNode,
    st: &mut FnState,
) -> Result<(), CodeGenError> {
    let parent_ctx = st.ctx.clone();
    let child = format!("%child.{}", st.fresh_label("ctx"));
    st.line(&format!(
        "{} = call ptr @qd_clone_context(ptr {})",
        child, parent_ctx
    ));

    st.ctx = child.clone();
    for stmt in &node.children {
        statements::emit_node(cg, stmt, st)?;
        if st.terminated {
            break;
        }
    }
    st.ctx = parent_ctx.clone();

    // move the clone's top-of-stack into the parent
    let field = st.temp();
    st.line(&format!(
        "{} = getelementptr inbounds %qd_context, ptr {}, i32 0, i32 0",
        field, child
    ));
    let child_stack = st.temp();
    st.line(&format!("{} = load ptr, ptr {}", child_stack, field));
    let elem = st.temp();
    st.line(&format!("{} = alloca %qd_stack_element", elem));
    let status = st.temp();
    st.line(&format!(
        "{} = call i32 @qd_stack_pop(ptr {}, ptr {})",
        status, child_stack, elem
    ));
    let push = st.temp();
    st.line(&format!(
        "{} = call %qd_exec_result @qd_push_e(ptr {}, ptr {})",
        push, parent_ctx, elem
    ));
    st.line(&format!("call void @qd_free_context(ptr {})", child));
    Ok(())
}
