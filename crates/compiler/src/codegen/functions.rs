//! Function lowering: prologue, body dispatch, epilogue with defer
//! splicing, plus import processing and function registration.

use super::{CodeGen, CodeGenError, FuncInfo, ModuleItems, runtime, statements};
use crate::ast::{AstKind, AstNode};
use std::collections::HashMap;
use std::fmt::Write as _;

/// Break/continue targets of the innermost loop.
pub(crate) struct LoopTargets {
    pub break_label: String,
    pub continue_label: String,
}

/// A function-local slot: the `alloca` register holding one popped
/// element, plus the struct type when one was declared (for `@field`
/// access).
pub(crate) struct LocalSlot {
    pub reg: String,
    pub struct_name: Option<String>,
}

/// Per-function emission state.
pub(crate) struct FnState<'a> {
    pub out: String,
    temp_counter: usize,
    label_counter: usize,
    /// Label of the block currently being filled (phi incoming edges).
    pub current_block: String,
    /// Context register: `%ctx`, or a clone register inside `ctx` blocks.
    pub ctx: String,
    pub loop_stack: Vec<LoopTargets>,
    /// Buffered defer bodies, spliced into the epilogue in reverse.
    pub defers: Vec<AstNode>,
    pub return_label: String,
    pub fallible: bool,
    pub locals: HashMap<String, LocalSlot>,
    /// Innermost-first stack of `for` iterator phi registers.
    pub iter_vars: Vec<String>,
    pub items: &'a ModuleItems,
    pub namespace: String,
    /// The current block already has a terminator.
    pub terminated: bool,
}

impl<'a> FnState<'a> {
    fn new(items: &'a ModuleItems, namespace: &str, fallible: bool) -> Self {
        FnState {
            out: String::new(),
            temp_counter: 0,
            label_counter: 0,
            current_block: "entry".to_string(),
            ctx: "%ctx".to_string(),
            loop_stack: Vec::new(),
            defers: Vec::new(),
            return_label: "fn.return".to_string(),
            fallible,
            locals: HashMap::new(),
            iter_vars: Vec::new(),
            items,
            namespace: namespace.to_string(),
            terminated: false,
        }
    }

    pub fn temp(&mut self) -> String {
        let t = format!("%t{}", self.temp_counter);
        self.temp_counter += 1;
        t
    }

    pub fn fresh_label(&mut self, prefix: &str) -> String {
        let l = format!("{}.{}", prefix, self.label_counter);
        self.label_counter += 1;
        l
    }

    /// Unique id for named registers (locals can shadow each other).
    pub fn next_id(&mut self) -> usize {
        let n = self.label_counter;
        self.label_counter += 1;
        n
    }

    /// Emit one instruction line into the current block.
    pub fn line(&mut self, text: &str) {
        let _ = writeln!(self.out, "  {}", text);
    }

    /// Open a new basic block.
    pub fn start_block(&mut self, label: &str) {
        let _ = writeln!(self.out, "{}:", label);
        self.current_block = label.to_string();
        self.terminated = false;
    }

    /// Unconditional branch (no-op if the block is already terminated).
    pub fn branch(&mut self, target: &str) {
        if !self.terminated {
            self.line(&format!("br label %{}", target));
            self.terminated = true;
        }
    }

    /// Load the context's stack pointer (field 0).
    pub fn load_stack_ptr(&mut self) -> String {
        let field = self.temp();
        let ctx = self.ctx.clone();
        self.line(&format!(
            "{} = getelementptr inbounds %qd_context, ptr {}, i32 0, i32 0",
            field, ctx
        ));
        let st = self.temp();
        self.line(&format!("{} = load ptr, ptr {}", st, field));
        st
    }

    /// Pop the top element into a fresh alloca; returns the element
    /// pointer register.
    pub fn pop_element(&mut self, name_hint: &str) -> String {
        let stack = self.load_stack_ptr();
        let elem = self.temp();
        self.line(&format!("{} = alloca %qd_stack_element ; {}", elem, name_hint));
        let status = self.temp();
        self.line(&format!(
            "{} = call i32 @qd_stack_pop(ptr {}, ptr {})",
            status, stack, elem
        ));
        elem
    }

    /// Load the `i64` value bits of a popped element.
    pub fn load_value_bits(&mut self, elem: &str) -> String {
        let field = self.temp();
        self.line(&format!(
            "{} = getelementptr inbounds %qd_stack_element, ptr {}, i32 0, i32 0",
            field, elem
        ));
        let bits = self.temp();
        self.line(&format!("{} = load i64, ptr {}", bits, field));
        bits
    }

    /// Load an element's value coerced to `i64`, converting float-tagged
    /// slots through `fptosi` (used for loop bounds).
    pub fn load_value_as_int(&mut self, elem: &str) -> String {
        let type_field = self.temp();
        self.line(&format!(
            "{} = getelementptr inbounds %qd_stack_element, ptr {}, i32 0, i32 1",
            type_field, elem
        ));
        let type_tag = self.temp();
        self.line(&format!("{} = load i32, ptr {}", type_tag, type_field));
        let is_float = self.temp();
        self.line(&format!(
            "{} = icmp eq i32 {}, {}",
            is_float,
            type_tag,
            runtime::TYPE_TAG_FLOAT
        ));
        let bits = self.load_value_bits(elem);
        let as_float = self.temp();
        self.line(&format!("{} = bitcast i64 {} to double", as_float, bits));
        let converted = self.temp();
        self.line(&format!("{} = fptosi double {} to i64", converted, as_float));
        let result = self.temp();
        self.line(&format!(
            "{} = select i1 {}, i64 {}, i64 {}",
            result, is_float, converted, bits
        ));
        result
    }

    /// Load the context's `has_error` flag (field 1) as an `i1`; also
    /// returns the field pointer so callers can clear the flag.
    pub fn load_has_error(&mut self) -> (String, String) {
        let field = self.temp();
        let ctx = self.ctx.clone();
        self.line(&format!(
            "{} = getelementptr inbounds %qd_context, ptr {}, i32 0, i32 1",
            field, ctx
        ));
        let raw = self.temp();
        self.line(&format!("{} = load i8, ptr {}", raw, field));
        let flag = self.temp();
        self.line(&format!("{} = icmp ne i8 {}, 0", flag, raw));
        (flag, field)
    }
}

impl CodeGen {
    /// Register all function declarations of a module so call sites and
    /// function pointers resolve regardless of definition order.
    pub(crate) fn register_functions(&mut self, namespace: &str, root: &AstNode) {
        for child in &root.children {
            if let AstKind::Function { name, throws, .. } = &child.kind {
                let symbol = format!("usr_{}_{}", namespace, name);
                let key = if namespace == "main" {
                    name.clone()
                } else {
                    format!("{}::{}", namespace, name)
                };
                self.functions.insert(
                    key,
                    FuncInfo {
                        symbol,
                        throws: *throws,
                    },
                );
            }
        }
    }

    /// Import statements produce external declarations at module scope,
    /// plus thin wrappers aliasing the `usr_<ns>_` spelling to the raw
    /// foreign symbol when the two differ (call sites always use the
    /// `usr_` prefix). The standard runtime library uses `qd_stdqd_*`.
    pub(crate) fn process_imports(&mut self, root: &AstNode) -> Result<(), CodeGenError> {
        for child in &root.children {
            let AstKind::Import {
                library,
                namespace,
                functions,
            } = &child.kind
            else {
                continue;
            };
            for func in functions {
                let scoped_symbol = format!("usr_{}_{}", namespace, func.name);
                let real_symbol = if library == "libstdqd.so" {
                    format!("qd_stdqd_{}", func.name)
                } else {
                    scoped_symbol.clone()
                };

                let key = format!("{}::{}", namespace, func.name);
                if self.functions.contains_key(&key) {
                    continue;
                }
                self.functions.insert(
                    key,
                    FuncInfo {
                        symbol: scoped_symbol.clone(),
                        throws: func.throws,
                    },
                );

                if real_symbol == scoped_symbol {
                    self.declare_external_function(&scoped_symbol);
                    continue;
                }

                self.declare_external_function(&real_symbol);
                writeln!(
                    self.code,
                    "define %qd_exec_result @{}(ptr %ctx) {{",
                    scoped_symbol
                )?;
                writeln!(self.code, "entry:")?;
                writeln!(
                    self.code,
                    "  %r = call %qd_exec_result @{}(ptr %ctx)",
                    real_symbol
                )?;
                writeln!(self.code, "  ret %qd_exec_result %r")?;
                writeln!(self.code, "}}")?;
                writeln!(self.code)?;
            }
        }
        Ok(())
    }

    pub(crate) fn emit_function(
        &mut self,
        node: &AstNode,
        namespace: &str,
        is_entry_point: bool,
        items: &ModuleItems,
    ) -> Result<(), CodeGenError> {
        let AstKind::Function {
            name,
            inputs,
            throws,
            ..
        } = &node.kind
        else {
            return Err(CodeGenError::Logic("not a function node".to_string()));
        };

        let full_name = format!("{}::{}", namespace, name);
        let name_symbol = self.intern_string(&full_name);
        let mut st = FnState::new(items, namespace, *throws);

        if self.debug_info() {
            writeln!(st.out, "; {} (line {})", full_name, node.line)?;
        }

        if is_entry_point {
            writeln!(st.out, "define i32 @main(i32 %argc, ptr %argv) {{")?;
            writeln!(st.out, "entry:")?;
            st.line("%ctx = call ptr @qd_create_context(i64 1024)");
            st.line("call void @qd_set_args(ptr %ctx, i32 %argc, ptr %argv)");
            st.line(&format!("call void @qd_push_call(ptr %ctx, ptr {})", name_symbol));
        } else {
            let symbol = format!("usr_{}_{}", namespace, name);
            writeln!(st.out, "define %qd_exec_result @{}(ptr %ctx) {{", symbol)?;
            writeln!(st.out, "entry:")?;
            st.line(&format!("call void @qd_push_call(ptr %ctx, ptr {})", name_symbol));

            // runtime type assertion on the declared inputs; catches ABI
            // mismatches when entered from a shared library
            if !inputs.is_empty() {
                let tags: Vec<u32> = inputs
                    .iter()
                    .map(|p| runtime::type_tag_for_code(&p.type_name))
                    .collect();
                let types_symbol = self.intern_type_array(&tags);
                st.line(&format!(
                    "call void @qd_check_stack(ptr %ctx, i64 {}, ptr {}, ptr {})",
                    inputs.len(),
                    types_symbol,
                    name_symbol
                ));
            }
        }

        if let Some(body) = node.child(0) {
            statements::emit_block(self, body, &mut st)?;
        }
        st.branch("fn.return");

        st.start_block("fn.return");
        // defers execute exactly once per function exit, in reverse
        // insertion order
        let defers = std::mem::take(&mut st.defers);
        for defer in defers.iter().rev() {
            for child in &defer.children {
                statements::emit_block(self, child, &mut st)?;
            }
        }
        st.line("call void @qd_pop_call(ptr %ctx)");
        if is_entry_point {
            st.line("call void @qd_free_context(ptr %ctx)");
            st.line("ret i32 0");
        } else {
            st.line("ret %qd_exec_result zeroinitializer");
        }
        writeln!(st.out, "}}")?;
        writeln!(st.out)?;

        self.code.push_str(&st.out);
        Ok(())
    }
}
