//! Semantic validator: an abstract interpreter over the operand stack.
//!
//! For every function body the validator simulates the stack as a vector
//! of abstract types, checking arity and operand types of built-in
//! operations, resolving calls against declared signatures, inserting
//! implicit numeric casts (recorded on the call site for the code
//! generator), and enforcing the control-flow rules: branch merges must
//! agree, loop and defer bodies must be stack-neutral, `ctx` blocks
//! produce exactly one value.
//!
//! Functions with a bare `()` signature have their outputs inferred by
//! quiet simulation, so producer chains type-check without annotations.
//! When an effect cannot be known (indirect calls, unresolvable scoped
//! calls, inference cycles) the stack enters a lenient state for the
//! rest of the body rather than cascading spurious errors.

use crate::ast::{AstKind, AstNode, CastDirection, Field, LiteralKind, Parameter};
use crate::builtins::{self, OperandType, ResultType, SpecialEffect};
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::parser::Parser;
use crate::resolver::{SearchConfig, find_module_file};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Abstract stack value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbstractType {
    Int,
    Float,
    Str,
    Ptr,
    /// Untyped: matches anything, constrains nothing.
    Any,
}

impl AbstractType {
    fn name(self) -> &'static str {
        match self {
            AbstractType::Int => "int",
            AbstractType::Float => "float",
            AbstractType::Str => "str",
            AbstractType::Ptr => "ptr",
            AbstractType::Any => "any",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct AbstractValue {
    ty: AbstractType,
    tainted: bool,
}

impl AbstractValue {
    fn new(ty: AbstractType) -> Self {
        AbstractValue { ty, tainted: false }
    }
}

/// The simulated operand stack. `lenient` is set when an unknowable
/// effect passes through; from then on checks succeed silently.
#[derive(Debug, Clone)]
struct SimStack {
    values: Vec<AbstractValue>,
    lenient: bool,
}

impl SimStack {
    fn new() -> Self {
        SimStack {
            values: Vec::new(),
            lenient: false,
        }
    }

    fn depth(&self) -> usize {
        self.values.len()
    }

    fn push(&mut self, ty: AbstractType) {
        self.values.push(AbstractValue::new(ty));
    }

    fn pop(&mut self) -> AbstractValue {
        self.values.pop().unwrap_or(AbstractValue::new(AbstractType::Any))
    }

    fn peek(&self, depth: usize) -> AbstractType {
        if self.values.len() > depth {
            self.values[self.values.len() - 1 - depth].ty
        } else {
            AbstractType::Any
        }
    }
}

/// Whether a block fell through or ended on break/continue/return/error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Terminated,
}

/// A callable signature (user function, module function, or import).
#[derive(Debug, Clone)]
struct CallSig {
    inputs: Vec<Parameter>,
    outputs: Vec<Parameter>,
    throws: bool,
    /// False for bare `()` signatures whose outputs are inferred.
    declared: bool,
}

#[derive(Debug, Clone)]
struct FunctionInfo {
    sig: CallSig,
    /// Cloned body, used for quiet output inference.
    body: AstNode,
}

#[derive(Debug, Clone)]
struct LocalInfo {
    ty: AbstractType,
    struct_name: Option<String>,
}

struct FnContext {
    throws: bool,
    declared: bool,
    outputs: Vec<Parameter>,
    locals: HashMap<String, LocalInfo>,
    loop_depth: usize,
    for_depth: usize,
    in_ctx: bool,
    in_defer: bool,
    /// Inference mode: simulate without reporting.
    quiet: bool,
}

pub struct SemanticValidator {
    sink: DiagnosticSink,
    filename: String,
    source_dir: PathBuf,
    is_module: bool,
    werror: bool,
    search: SearchConfig,

    functions: HashMap<String, FunctionInfo>,
    structs: HashMap<String, Vec<Field>>,
    constants: HashMap<String, LiteralKind>,
    imports: HashMap<String, HashMap<String, CallSig>>,
    /// Scope name -> original `use` target (module name or `.qd` path).
    used_modules: HashMap<String, String>,

    /// Lazily parsed signature tables of used modules; None when the
    /// module file could not be located.
    module_sigs: HashMap<String, Option<HashMap<String, CallSig>>>,
    /// Memoized inferred outputs for bare functions; None when inference
    /// failed (cycle or lenient body).
    inferred: HashMap<String, Option<Vec<AbstractType>>>,
    inferring: HashSet<String>,
}

impl Default for SemanticValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SemanticValidator {
    /// A validator that prints diagnostics to stderr as they occur.
    pub fn new() -> Self {
        Self::with_sink(DiagnosticSink::printing())
    }

    /// A validator that stores diagnostics (LSP embedding).
    pub fn storing() -> Self {
        Self::with_sink(DiagnosticSink::storing())
    }

    fn with_sink(sink: DiagnosticSink) -> Self {
        SemanticValidator {
            sink,
            filename: String::new(),
            source_dir: PathBuf::from("."),
            is_module: false,
            werror: false,
            search: SearchConfig::default(),
            functions: HashMap::new(),
            structs: HashMap::new(),
            constants: HashMap::new(),
            imports: HashMap::new(),
            used_modules: HashMap::new(),
            module_sigs: HashMap::new(),
            inferred: HashMap::new(),
            inferring: HashSet::new(),
        }
    }

    /// Search configuration for module lookups (version pins, package
    /// cache override).
    pub fn set_search_config(&mut self, search: SearchConfig) {
        self.search = search;
    }

    pub fn warning_count(&self) -> usize {
        self.sink.warning_count()
    }

    pub fn error_count(&self) -> usize {
        self.sink.error_count()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.sink.diagnostics
    }

    /// Validate a parsed program. `is_module` suppresses unresolved
    /// module errors for the file's own imports (those are resolved
    /// later against the importer's environment). Returns the error
    /// count; warnings are counted separately unless `werror` promotes
    /// them.
    pub fn validate(
        &mut self,
        root: &mut AstNode,
        filename: &str,
        is_module: bool,
        werror: bool,
    ) -> usize {
        self.filename = filename.to_string();
        self.source_dir = Path::new(filename)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        self.is_module = is_module;
        self.werror = werror;

        self.collect(root);
        self.check_uses(root);

        for child in &mut root.children {
            if matches!(child.kind, AstKind::Function { .. }) {
                self.simulate_function(child);
            }
        }

        self.sink.error_count()
    }

    // -- collection --------------------------------------------------------

    fn collect(&mut self, root: &AstNode) {
        for child in &root.children {
            match &child.kind {
                AstKind::Function {
                    name,
                    inputs,
                    outputs,
                    throws,
                } => {
                    if self.functions.contains_key(name) {
                        self.report_error(
                            DiagnosticKind::Semantic,
                            format!("duplicate function '{}'", name),
                            child.line,
                            child.column,
                        );
                        continue;
                    }
                    let declared = !inputs.is_empty() || !outputs.is_empty();
                    let body = child
                        .child(0)
                        .cloned()
                        .unwrap_or_else(|| AstNode::new(AstKind::Block, child.line, child.column));
                    self.functions.insert(
                        name.clone(),
                        FunctionInfo {
                            sig: CallSig {
                                inputs: inputs.clone(),
                                outputs: outputs.clone(),
                                throws: *throws,
                                declared,
                            },
                            body,
                        },
                    );
                }
                AstKind::StructDecl { name, fields, .. } => {
                    if self.structs.insert(name.clone(), fields.clone()).is_some() {
                        self.report_error(
                            DiagnosticKind::Semantic,
                            format!("duplicate struct '{}'", name),
                            child.line,
                            child.column,
                        );
                    }
                }
                AstKind::Constant { name, value_kind, .. } => {
                    if self.constants.insert(name.clone(), *value_kind).is_some() {
                        self.report_error(
                            DiagnosticKind::Semantic,
                            format!("duplicate constant '{}'", name),
                            child.line,
                            child.column,
                        );
                    }
                }
                AstKind::Import {
                    namespace,
                    functions,
                    ..
                } => {
                    let table = self.imports.entry(namespace.clone()).or_default();
                    for func in functions {
                        table.insert(
                            func.name.clone(),
                            CallSig {
                                inputs: func.inputs.clone(),
                                outputs: func.outputs.clone(),
                                throws: func.throws,
                                declared: true,
                            },
                        );
                    }
                }
                AstKind::Use { module } => {
                    self.used_modules
                        .insert(module_scope_name(module), module.clone());
                }
                _ => {}
            }
        }
    }

    /// Every `use` must name a module that can be located, unless this is
    /// itself a module file (its imports resolve in the importer's
    /// environment later).
    fn check_uses(&mut self, root: &AstNode) {
        if self.is_module {
            return;
        }
        for child in &root.children {
            if let AstKind::Use { module } = &child.kind {
                if find_module_file(module, &self.source_dir, &self.search).is_none() {
                    self.report_error(
                        DiagnosticKind::Resolution,
                        format!("module '{}' not found", module),
                        child.line,
                        child.column,
                    );
                }
            }
        }
    }

    // -- reporting ---------------------------------------------------------

    fn report_error(&mut self, kind: DiagnosticKind, message: String, line: usize, column: usize) {
        let filename = self.filename.clone();
        self.sink
            .report(Diagnostic::error(kind, message, &filename, line, column));
    }

    fn sem_error(&mut self, quiet: bool, message: String, line: usize, column: usize) {
        if quiet {
            return;
        }
        self.report_error(DiagnosticKind::Semantic, message, line, column);
    }

    fn cast_warning(&mut self, quiet: bool, message: String, line: usize, column: usize) {
        if quiet {
            return;
        }
        let filename = self.filename.clone();
        if self.werror {
            self.sink.report(Diagnostic::error(
                DiagnosticKind::Semantic,
                message,
                &filename,
                line,
                column,
            ));
        } else {
            self.sink
                .report(Diagnostic::warning(message, &filename, line, column));
        }
    }

    // -- function simulation -----------------------------------------------

    fn simulate_function(&mut self, node: &mut AstNode) {
        let AstKind::Function {
            name: _,
            inputs,
            outputs,
            throws,
        } = node.kind.clone()
        else {
            return;
        };
        let declared = !inputs.is_empty() || !outputs.is_empty();

        let mut stack = SimStack::new();
        for param in &inputs {
            let ty = self.type_from_code(&param.type_name, false, param.line, param.column);
            stack.push(ty);
        }

        let mut fc = FnContext {
            throws,
            declared,
            outputs,
            locals: HashMap::new(),
            loop_depth: 0,
            for_depth: 0,
            in_ctx: false,
            in_defer: false,
            quiet: false,
        };

        if let Some(body) = node.children.first_mut() {
            self.simulate_block(body, &mut stack, &mut fc);
        }
    }

    /// Resolve a declared type code; unknown codes are reported once and
    /// treated as `Any`.
    fn type_from_code(&mut self, code: &str, quiet: bool, line: usize, column: usize) -> AbstractType {
        match code {
            "" => AbstractType::Any,
            "i" => AbstractType::Int,
            "f" => AbstractType::Float,
            "s" => AbstractType::Str,
            "p" => AbstractType::Ptr,
            other if self.structs.contains_key(other) => AbstractType::Ptr,
            other => {
                self.sem_error(
                    quiet,
                    format!("unknown type '{}'", other),
                    line,
                    column,
                );
                AbstractType::Any
            }
        }
    }

    fn simulate_block(&mut self, block: &mut AstNode, stack: &mut SimStack, fc: &mut FnContext) -> Flow {
        for child in &mut block.children {
            if self.simulate_statement(child, stack, fc) == Flow::Terminated {
                return Flow::Terminated;
            }
        }
        Flow::Normal
    }

    fn simulate_statement(
        &mut self,
        node: &mut AstNode,
        stack: &mut SimStack,
        fc: &mut FnContext,
    ) -> Flow {
        let line = node.line;
        let column = node.column;
        match &node.kind.clone() {
            AstKind::Literal { kind, .. } => {
                stack.push(match kind {
                    LiteralKind::Integer => AbstractType::Int,
                    LiteralKind::Float => AbstractType::Float,
                    LiteralKind::String => AbstractType::Str,
                });
                Flow::Normal
            }
            AstKind::Instruction { name } => self.apply_instruction(name, line, column, stack, fc),
            AstKind::Identifier { .. } => self.simulate_identifier(node, stack, fc),
            AstKind::ScopedIdentifier { .. } => self.simulate_scoped(node, stack, fc),
            AstKind::FunctionPointer { function_name } => {
                // scoped targets resolve at link time
                if !function_name.contains("::") && !self.functions.contains_key(function_name) {
                    self.sem_error(
                        fc.quiet,
                        format!("undefined function '&{}'", function_name),
                        line,
                        column,
                    );
                }
                stack.push(AbstractType::Ptr);
                Flow::Normal
            }
            AstKind::If => self.simulate_if(node, stack, fc),
            AstKind::For { .. } => self.simulate_for(node, stack, fc),
            AstKind::Loop => self.simulate_loop(node, stack, fc),
            AstKind::Switch => self.simulate_switch(node, stack, fc),
            AstKind::Break | AstKind::Continue => {
                if fc.in_ctx {
                    self.sem_error(
                        fc.quiet,
                        "break/continue not allowed inside a ctx block".to_string(),
                        line,
                        column,
                    );
                } else if fc.loop_depth == 0 {
                    let what = if matches!(node.kind, AstKind::Break) {
                        "break"
                    } else {
                        "continue"
                    };
                    self.sem_error(
                        fc.quiet,
                        format!("'{}' outside of a loop", what),
                        line,
                        column,
                    );
                }
                Flow::Terminated
            }
            AstKind::Return => {
                if fc.in_ctx || fc.in_defer {
                    let where_ = if fc.in_ctx { "ctx" } else { "defer" };
                    self.sem_error(
                        fc.quiet,
                        format!("return not allowed inside a {} block", where_),
                        line,
                        column,
                    );
                } else if fc.declared && !stack.lenient {
                    self.check_outputs(stack, fc, line, column);
                }
                Flow::Terminated
            }
            AstKind::Defer => self.simulate_defer(node, stack, fc),
            AstKind::Ctx => self.simulate_ctx(node, stack, fc),
            AstKind::StructConstruction { struct_name } => {
                self.simulate_struct_construction(struct_name, line, column, stack, fc)
            }
            AstKind::FieldAccess {
                var_name,
                field_name,
            } => self.simulate_field_access(var_name, field_name, line, column, stack, fc),
            AstKind::Local { name, type_name } => {
                self.simulate_local(name, type_name, line, column, stack, fc)
            }
            AstKind::Block => self.simulate_block(node, stack, fc),
            // top-level kinds do not occur in statement position
            _ => Flow::Normal,
        }
    }

    fn check_outputs(&mut self, stack: &SimStack, fc: &mut FnContext, line: usize, column: usize) {
        let outputs = fc.outputs.clone();
        if stack.depth() != outputs.len() {
            self.sem_error(
                fc.quiet,
                format!(
                    "return stack does not match declared outputs (have {}, declared {})",
                    stack.depth(),
                    outputs.len()
                ),
                line,
                column,
            );
            return;
        }
        for (i, param) in outputs.iter().enumerate() {
            let declared = self.type_from_code(&param.type_name, fc.quiet, param.line, param.column);
            let actual = stack.values[i].ty;
            if declared != AbstractType::Any && actual != AbstractType::Any && declared != actual {
                self.sem_error(
                    fc.quiet,
                    format!(
                        "return value '{}' has type {}, declared {}",
                        param.name,
                        actual.name(),
                        declared.name()
                    ),
                    line,
                    column,
                );
            }
        }
    }

    // -- instructions --------------------------------------------------------

    fn apply_instruction(
        &mut self,
        name: &str,
        line: usize,
        column: usize,
        stack: &mut SimStack,
        fc: &mut FnContext,
    ) -> Flow {
        let Some(schema) = builtins::schema(name) else {
            self.sem_error(
                fc.quiet,
                format!("unknown instruction '{}'", name),
                line,
                column,
            );
            return Flow::Normal;
        };

        if let Some(special) = schema.special {
            return self.apply_special(name, special, schema.min_depth, line, column, stack, fc);
        }

        let k = schema.operands.len();
        if !stack.lenient && stack.depth() < k {
            self.sem_error(
                fc.quiet,
                format!(
                    "Stack underflow for '{}' (requires {}, have {})",
                    name,
                    k,
                    stack.depth()
                ),
                line,
                column,
            );
            // consume what exists so the rest of the body stays checkable
            let available = stack.depth();
            for _ in 0..available {
                stack.pop();
            }
            for result in &schema.results {
                stack.push(result_type(result, &[]));
            }
            return Flow::Normal;
        }

        let mut consumed = Vec::with_capacity(k);
        if !stack.lenient {
            for (j, expected) in schema.operands.iter().enumerate() {
                let actual = stack.peek(k - 1 - j);
                if !operand_matches(*expected, actual) {
                    self.sem_error(
                        fc.quiet,
                        format!(
                            "type mismatch for '{}' (expected {}, got {})",
                            name,
                            operand_name(*expected),
                            actual.name()
                        ),
                        line,
                        column,
                    );
                }
                consumed.push(actual);
            }
        }
        for _ in 0..k {
            stack.pop();
        }
        for result in &schema.results {
            stack.push(result_type(result, &consumed));
        }
        Flow::Normal
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_special(
        &mut self,
        name: &str,
        special: SpecialEffect,
        min_depth: usize,
        line: usize,
        column: usize,
        stack: &mut SimStack,
        fc: &mut FnContext,
    ) -> Flow {
        if !stack.lenient && stack.depth() < min_depth {
            self.sem_error(
                fc.quiet,
                format!(
                    "Stack underflow for '{}' (requires {}, have {})",
                    name,
                    min_depth,
                    stack.depth()
                ),
                line,
                column,
            );
            return Flow::Normal;
        }
        match special {
            SpecialEffect::Shuffle => {
                if !stack.lenient {
                    apply_shuffle(name, stack);
                }
                Flow::Normal
            }
            SpecialEffect::PickRoll => {
                if stack.lenient {
                    return Flow::Normal;
                }
                let index = stack.pop();
                if index.ty != AbstractType::Int && index.ty != AbstractType::Any {
                    self.sem_error(
                        fc.quiet,
                        format!("'{}' index must be an integer", name),
                        line,
                        column,
                    );
                }
                if name == "pick" {
                    stack.push(AbstractType::Any);
                } else {
                    // roll rearranges by a runtime index; element
                    // positions are no longer statically known
                    for value in &mut stack.values {
                        value.ty = AbstractType::Any;
                    }
                }
                Flow::Normal
            }
            SpecialEffect::Depth => {
                stack.push(AbstractType::Int);
                Flow::Normal
            }
            SpecialEffect::Clear => {
                stack.values.clear();
                Flow::Normal
            }
            SpecialEffect::NonDestructive => Flow::Normal,
            SpecialEffect::ErrCheck => {
                if !stack.lenient {
                    let top_tainted = stack
                        .values
                        .last()
                        .map(|v| v.tainted)
                        .unwrap_or(false);
                    if !top_tainted {
                        self.sem_error(
                            fc.quiet,
                            "'err' requires an error-tainted value on top of the stack".to_string(),
                            line,
                            column,
                        );
                    }
                    if let Some(top) = stack.values.last_mut() {
                        top.tainted = false;
                    }
                }
                Flow::Normal
            }
            SpecialEffect::RaiseError => {
                if !fc.throws {
                    self.sem_error(
                        fc.quiet,
                        "'error' outside a fallible function (declare it with trailing '!')"
                            .to_string(),
                        line,
                        column,
                    );
                }
                Flow::Terminated
            }
            SpecialEffect::IndirectCall => {
                if !stack.lenient {
                    let target = stack.pop();
                    if target.ty != AbstractType::Ptr && target.ty != AbstractType::Any {
                        self.sem_error(
                            fc.quiet,
                            format!("'call' requires a function pointer (got {})", target.ty.name()),
                            line,
                            column,
                        );
                    }
                }
                // the callee's effect is unknowable
                stack.lenient = true;
                Flow::Normal
            }
        }
    }

    // -- identifiers and calls -----------------------------------------------

    fn simulate_identifier(
        &mut self,
        node: &mut AstNode,
        stack: &mut SimStack,
        fc: &mut FnContext,
    ) -> Flow {
        let line = node.line;
        let column = node.column;
        let AstKind::Identifier {
            name,
            abort_on_error,
            check_error,
            ..
        } = node.kind.clone()
        else {
            return Flow::Normal;
        };

        if name == "$" {
            if fc.for_depth == 0 {
                self.sem_error(
                    fc.quiet,
                    "loop iterator '$' outside a for loop".to_string(),
                    line,
                    column,
                );
            }
            stack.push(AbstractType::Int);
            return Flow::Normal;
        }

        if let Some(local) = fc.locals.get(&name) {
            stack.push(local.ty);
            return Flow::Normal;
        }

        if let Some(kind) = self.constants.get(&name) {
            stack.push(match kind {
                LiteralKind::Integer => AbstractType::Int,
                LiteralKind::Float => AbstractType::Float,
                LiteralKind::String => AbstractType::Str,
            });
            return Flow::Normal;
        }

        let Some(info) = self.functions.get(&name).cloned() else {
            self.sem_error(
                fc.quiet,
                format!("undefined function '{}'", name),
                line,
                column,
            );
            return Flow::Normal;
        };

        self.apply_call(node, &name, &info.sig, abort_on_error, check_error, stack, fc)
    }

    fn simulate_scoped(
        &mut self,
        node: &mut AstNode,
        stack: &mut SimStack,
        fc: &mut FnContext,
    ) -> Flow {
        let line = node.line;
        let column = node.column;
        let AstKind::ScopedIdentifier {
            scope,
            name,
            abort_on_error,
            check_error,
            ..
        } = node.kind.clone()
        else {
            return Flow::Normal;
        };

        // imports declared in this file take precedence
        if let Some(sig) = self.imports.get(&scope).and_then(|t| t.get(&name)).cloned() {
            let label = format!("{}::{}", scope, name);
            return self.apply_call(node, &label, &sig, abort_on_error, check_error, stack, fc);
        }

        if !self.used_modules.contains_key(&scope) {
            self.sem_error(
                fc.quiet,
                format!("module '{}' not imported (missing 'use {}')", scope, scope),
                line,
                column,
            );
            return Flow::Normal;
        }

        match self.module_signatures(&scope) {
            Some(table) => match table.get(&name).cloned() {
                Some(sig) if sig.declared => {
                    let label = format!("{}::{}", scope, name);
                    self.apply_call(node, &label, &sig, abort_on_error, check_error, stack, fc)
                }
                Some(_) => {
                    // a bare signature in another module cannot be
                    // inferred from here
                    stack.lenient = true;
                    Flow::Normal
                }
                None => {
                    self.sem_error(
                        fc.quiet,
                        format!("function '{}' not found in module '{}'", name, scope),
                        line,
                        column,
                    );
                    Flow::Normal
                }
            },
            None => {
                // module file not locatable from here; resolved later
                stack.lenient = true;
                Flow::Normal
            }
        }
    }

    /// Parse (once) the signature table of a used module.
    fn module_signatures(&mut self, scope: &str) -> Option<HashMap<String, CallSig>> {
        if let Some(cached) = self.module_sigs.get(scope) {
            return cached.clone();
        }
        let result = self.load_module_signatures(scope);
        self.module_sigs.insert(scope.to_string(), result.clone());
        result
    }

    fn load_module_signatures(&mut self, scope: &str) -> Option<HashMap<String, CallSig>> {
        let target = self.used_modules.get(scope)?.clone();
        let path = find_module_file(&target, &self.source_dir, &self.search)?;
        let source = std::fs::read_to_string(&path).ok()?;
        let (ast, diagnostics) = Parser::new(&source, &path.to_string_lossy()).parse();
        if !diagnostics.is_empty() {
            return None;
        }

        let mut table = HashMap::new();
        for child in &ast.children {
            match &child.kind {
                AstKind::Function {
                    name,
                    inputs,
                    outputs,
                    throws,
                } => {
                    let declared = !inputs.is_empty() || !outputs.is_empty();
                    table.insert(
                        name.clone(),
                        CallSig {
                            inputs: inputs.clone(),
                            outputs: outputs.clone(),
                            throws: *throws,
                            declared,
                        },
                    );
                }
                AstKind::Import {
                    namespace,
                    functions,
                    ..
                } if namespace == scope => {
                    for func in functions {
                        table.insert(
                            func.name.clone(),
                            CallSig {
                                inputs: func.inputs.clone(),
                                outputs: func.outputs.clone(),
                                throws: func.throws,
                                declared: true,
                            },
                        );
                    }
                }
                _ => {}
            }
        }
        Some(table)
    }

    /// Apply a call: check suffix legality, arity, parameter types with
    /// implicit numeric casts, then the declared (or inferred) outputs,
    /// and the fallible status push.
    #[allow(clippy::too_many_arguments)]
    fn apply_call(
        &mut self,
        node: &mut AstNode,
        label: &str,
        sig: &CallSig,
        abort_on_error: bool,
        check_error: bool,
        stack: &mut SimStack,
        fc: &mut FnContext,
    ) -> Flow {
        let line = node.line;
        let column = node.column;

        if !sig.throws && (abort_on_error || check_error) {
            self.sem_error(
                fc.quiet,
                format!("function '{}' does not throw", label),
                line,
                column,
            );
        }

        let n = sig.inputs.len();
        let mut casts = vec![CastDirection::None; n];

        if stack.lenient {
            set_parameter_casts(node, casts);
            self.push_call_outputs(sig, label, stack, fc);
            if sig.throws && !abort_on_error {
                stack.values.push(AbstractValue {
                    ty: AbstractType::Int,
                    tainted: true,
                });
            }
            return Flow::Normal;
        }

        if stack.depth() < n {
            self.sem_error(
                fc.quiet,
                format!(
                    "stack underflow calling '{}' (requires {}, have {})",
                    label,
                    n,
                    stack.depth()
                ),
                line,
                column,
            );
            stack.values.clear();
        } else {
            for (i, param) in sig.inputs.iter().enumerate() {
                let declared =
                    self.type_from_code(&param.type_name, fc.quiet, param.line, param.column);
                let actual = stack.peek(n - 1 - i);
                match (declared, actual) {
                    (AbstractType::Int, AbstractType::Float) => {
                        casts[i] = CastDirection::FloatToInt;
                        self.cast_warning(
                            fc.quiet,
                            format!(
                                "implicit narrowing cast from float to int for parameter '{}' of '{}'",
                                param.name, label
                            ),
                            line,
                            column,
                        );
                    }
                    (AbstractType::Float, AbstractType::Int) => {
                        casts[i] = CastDirection::IntToFloat;
                        self.cast_warning(
                            fc.quiet,
                            format!(
                                "implicit widening cast from int to float for parameter '{}' of '{}'",
                                param.name, label
                            ),
                            line,
                            column,
                        );
                    }
                    (AbstractType::Any, _) | (_, AbstractType::Any) => {}
                    (d, a) if d == a => {}
                    (d, a) => {
                        self.sem_error(
                            fc.quiet,
                            format!(
                                "type mismatch for parameter '{}' of '{}' (expected {}, got {})",
                                param.name,
                                label,
                                d.name(),
                                a.name()
                            ),
                            line,
                            column,
                        );
                    }
                }
            }
            for _ in 0..n {
                stack.pop();
            }
        }

        set_parameter_casts(node, casts);
        self.push_call_outputs(sig, label, stack, fc);

        if sig.throws && !abort_on_error {
            stack.values.push(AbstractValue {
                ty: AbstractType::Int,
                tainted: true,
            });
        }
        Flow::Normal
    }

    fn push_call_outputs(&mut self, sig: &CallSig, label: &str, stack: &mut SimStack, fc: &mut FnContext) {
        if sig.declared {
            let outputs = sig.outputs.clone();
            for param in &outputs {
                let ty = self.type_from_code(&param.type_name, fc.quiet, param.line, param.column);
                stack.push(ty);
            }
        } else {
            match self.infer_outputs(label) {
                Some(types) => {
                    for ty in types {
                        stack.push(ty);
                    }
                }
                None => stack.lenient = true,
            }
        }
    }

    /// Outputs of a bare `()` function, found by quiet simulation of its
    /// body over an empty stack. Cycles and lenient bodies yield None.
    fn infer_outputs(&mut self, name: &str) -> Option<Vec<AbstractType>> {
        if let Some(memo) = self.inferred.get(name) {
            return memo.clone();
        }
        if !self.inferring.insert(name.to_string()) {
            return None; // recursion; effect not inferrable
        }

        let result = match self.functions.get(name).cloned() {
            Some(info) => {
                let mut body = info.body;
                let mut stack = SimStack::new();
                let mut fc = FnContext {
                    throws: info.sig.throws,
                    declared: false,
                    outputs: Vec::new(),
                    locals: HashMap::new(),
                    loop_depth: 0,
                    for_depth: 0,
                    in_ctx: false,
                    in_defer: false,
                    quiet: true,
                };
                self.simulate_block(&mut body, &mut stack, &mut fc);
                if stack.lenient {
                    None
                } else {
                    Some(stack.values.iter().map(|v| v.ty).collect())
                }
            }
            None => None,
        };

        self.inferring.remove(name);
        self.inferred.insert(name.to_string(), result.clone());
        result
    }

    // -- control flow --------------------------------------------------------

    fn pop_condition(&mut self, what: &str, line: usize, column: usize, stack: &mut SimStack, fc: &FnContext) {
        if stack.lenient {
            return;
        }
        if stack.depth() < 1 {
            self.sem_error(
                fc.quiet,
                format!("Stack underflow for '{}' condition (requires 1, have 0)", what),
                line,
                column,
            );
            return;
        }
        let cond = stack.pop();
        if cond.ty != AbstractType::Int && cond.ty != AbstractType::Any {
            self.sem_error(
                fc.quiet,
                format!("{} condition must be an integer (got {})", what, cond.ty.name()),
                line,
                column,
            );
        }
    }

    fn simulate_if(&mut self, node: &mut AstNode, stack: &mut SimStack, fc: &mut FnContext) -> Flow {
        let line = node.line;
        let column = node.column;
        self.pop_condition("if", line, column, stack, fc);

        let mut then_stack = stack.clone();
        let mut else_stack = stack.clone();

        let (then_flow, else_flow) = {
            let mut children = node.children.iter_mut();
            let then_flow = match children.next() {
                Some(then_body) => self.simulate_block(then_body, &mut then_stack, fc),
                None => Flow::Normal,
            };
            let else_flow = match children.next() {
                Some(else_body) => self.simulate_block(else_body, &mut else_stack, fc),
                None => Flow::Normal,
            };
            (then_flow, else_flow)
        };

        self.merge_branches(
            line,
            column,
            stack,
            (then_stack, then_flow),
            (else_stack, else_flow),
            fc,
        )
    }

    fn merge_branches(
        &mut self,
        line: usize,
        column: usize,
        out: &mut SimStack,
        a: (SimStack, Flow),
        b: (SimStack, Flow),
        fc: &FnContext,
    ) -> Flow {
        let (a_stack, a_flow) = a;
        let (b_stack, b_flow) = b;
        match (a_flow, b_flow) {
            (Flow::Terminated, Flow::Terminated) => {
                *out = a_stack;
                Flow::Terminated
            }
            (Flow::Terminated, Flow::Normal) => {
                *out = b_stack;
                Flow::Normal
            }
            (Flow::Normal, Flow::Terminated) => {
                *out = a_stack;
                Flow::Normal
            }
            (Flow::Normal, Flow::Normal) => {
                if a_stack.lenient || b_stack.lenient {
                    *out = a_stack;
                    out.lenient = true;
                    return Flow::Normal;
                }
                if a_stack.depth() != b_stack.depth() {
                    self.sem_error(
                        fc.quiet,
                        format!(
                            "divergent stack shapes at merge ({} vs {} elements)",
                            a_stack.depth(),
                            b_stack.depth()
                        ),
                        line,
                        column,
                    );
                    *out = a_stack;
                    return Flow::Normal;
                }
                let mut merged = a_stack.clone();
                for (i, (va, vb)) in a_stack.values.iter().zip(b_stack.values.iter()).enumerate() {
                    if va.ty == vb.ty {
                        continue;
                    }
                    if va.ty == AbstractType::Any || vb.ty == AbstractType::Any {
                        merged.values[i].ty = AbstractType::Any;
                    } else {
                        self.sem_error(
                            fc.quiet,
                            format!(
                                "divergent stack shapes at merge (element {}: {} vs {})",
                                i,
                                va.ty.name(),
                                vb.ty.name()
                            ),
                            line,
                            column,
                        );
                    }
                }
                *out = merged;
                Flow::Normal
            }
        }
    }

    fn simulate_for(&mut self, node: &mut AstNode, stack: &mut SimStack, fc: &mut FnContext) -> Flow {
        let line = node.line;
        let column = node.column;
        if !stack.lenient {
            if stack.depth() < 3 {
                self.sem_error(
                    fc.quiet,
                    format!(
                        "Stack underflow for 'for' bounds (requires 3, have {})",
                        stack.depth()
                    ),
                    line,
                    column,
                );
                stack.values.clear();
            } else {
                for _ in 0..3 {
                    let bound = stack.pop();
                    if bound.ty != AbstractType::Int && bound.ty != AbstractType::Any {
                        self.sem_error(
                            fc.quiet,
                            format!("for loop bounds must be integers (got {})", bound.ty.name()),
                            line,
                            column,
                        );
                    }
                }
            }
        }

        let mut body_stack = stack.clone();
        fc.loop_depth += 1;
        fc.for_depth += 1;
        let flow = match node.children.first_mut() {
            Some(body) => self.simulate_block(body, &mut body_stack, fc),
            None => Flow::Normal,
        };
        fc.for_depth -= 1;
        fc.loop_depth -= 1;

        if flow == Flow::Normal && !body_stack.lenient && !stack.lenient {
            self.require_preserved("for", line, column, stack, &body_stack, fc);
        }
        if body_stack.lenient {
            stack.lenient = true;
        }
        Flow::Normal
    }

    fn simulate_loop(&mut self, node: &mut AstNode, stack: &mut SimStack, fc: &mut FnContext) -> Flow {
        let line = node.line;
        let column = node.column;
        let mut body_stack = stack.clone();
        fc.loop_depth += 1;
        let flow = match node.children.first_mut() {
            Some(body) => self.simulate_block(body, &mut body_stack, fc),
            None => Flow::Normal,
        };
        fc.loop_depth -= 1;

        if flow == Flow::Normal && !body_stack.lenient && !stack.lenient {
            self.require_preserved("loop", line, column, stack, &body_stack, fc);
        }
        if body_stack.lenient {
            stack.lenient = true;
        }
        Flow::Normal
    }

    fn require_preserved(
        &mut self,
        what: &str,
        line: usize,
        column: usize,
        before: &SimStack,
        after: &SimStack,
        fc: &FnContext,
    ) {
        if before.depth() != after.depth() {
            self.sem_error(
                fc.quiet,
                format!(
                    "stack not preserved across {} body ({} elements before, {} after)",
                    what,
                    before.depth(),
                    after.depth()
                ),
                line,
                column,
            );
            return;
        }
        for (i, (a, b)) in before.values.iter().zip(after.values.iter()).enumerate() {
            if a.ty != b.ty && a.ty != AbstractType::Any && b.ty != AbstractType::Any {
                self.sem_error(
                    fc.quiet,
                    format!(
                        "stack not preserved across {} body (element {}: {} became {})",
                        what,
                        i,
                        a.ty.name(),
                        b.ty.name()
                    ),
                    line,
                    column,
                );
            }
        }
    }

    fn simulate_switch(&mut self, node: &mut AstNode, stack: &mut SimStack, fc: &mut FnContext) -> Flow {
        let line = node.line;
        let column = node.column;
        self.pop_condition("switch", line, column, stack, fc);

        let incoming = stack.clone();
        let mut merged: Option<(SimStack, Flow)> = None;
        let mut has_default = false;

        for case in &mut node.children {
            if let AstKind::Case { is_default, .. } = &case.kind {
                if *is_default {
                    has_default = true;
                }
            }
            let mut case_stack = incoming.clone();
            let flow = match case.children.first_mut() {
                Some(body) => self.simulate_block(body, &mut case_stack, fc),
                None => Flow::Normal,
            };
            merged = Some(match merged.take() {
                None => (case_stack, flow),
                Some(previous) => {
                    let mut out = incoming.clone();
                    let flow = self.merge_branches(
                        line,
                        column,
                        &mut out,
                        previous,
                        (case_stack, flow),
                        fc,
                    );
                    (out, flow)
                }
            });
        }

        match merged {
            None => Flow::Normal, // empty switch
            Some((case_result, flow)) => {
                if has_default {
                    *stack = case_result;
                    flow
                } else {
                    // without a default the subject may match nothing,
                    // so the incoming shape must survive too
                    let mut out = incoming.clone();
                    let flow = self.merge_branches(
                        line,
                        column,
                        &mut out,
                        (case_result, flow),
                        (incoming, Flow::Normal),
                        fc,
                    );
                    *stack = out;
                    flow
                }
            }
        }
    }

    fn simulate_defer(&mut self, node: &mut AstNode, stack: &mut SimStack, fc: &mut FnContext) -> Flow {
        let line = node.line;
        let column = node.column;
        // validated against a snapshot of the stack here; effects do not
        // propagate forward
        let mut defer_stack = stack.clone();
        let was_in_defer = fc.in_defer;
        fc.in_defer = true;
        let flow = match node.children.first_mut() {
            Some(body) => self.simulate_block(body, &mut defer_stack, fc),
            None => Flow::Normal,
        };
        fc.in_defer = was_in_defer;
        if flow == Flow::Normal && !defer_stack.lenient && !stack.lenient {
            self.require_preserved("defer", line, column, stack, &defer_stack, fc);
        }
        Flow::Normal
    }

    fn simulate_ctx(&mut self, node: &mut AstNode, stack: &mut SimStack, fc: &mut FnContext) -> Flow {
        let line = node.line;
        let column = node.column;
        let mut inner = stack.clone();
        let was_in_ctx = fc.in_ctx;
        fc.in_ctx = true;
        for child in &mut node.children {
            if self.simulate_statement(child, &mut inner, fc) == Flow::Terminated {
                break;
            }
        }
        fc.in_ctx = was_in_ctx;

        if inner.lenient {
            stack.lenient = true;
            stack.push(AbstractType::Any);
            return Flow::Normal;
        }
        if inner.depth() != stack.depth() + 1 {
            self.sem_error(
                fc.quiet,
                format!(
                    "ctx block must produce exactly one value (produced {})",
                    inner.depth() as i64 - stack.depth() as i64
                ),
                line,
                column,
            );
            stack.push(AbstractType::Any);
            return Flow::Normal;
        }
        let produced = inner.values.last().map(|v| v.ty).unwrap_or(AbstractType::Any);
        stack.push(produced);
        Flow::Normal
    }

    // -- structs and locals ---------------------------------------------------

    fn simulate_struct_construction(
        &mut self,
        struct_name: &str,
        line: usize,
        column: usize,
        stack: &mut SimStack,
        fc: &mut FnContext,
    ) -> Flow {
        let Some(fields) = self.structs.get(struct_name).cloned() else {
            self.sem_error(
                fc.quiet,
                format!("undefined struct '{}'", struct_name),
                line,
                column,
            );
            stack.push(AbstractType::Ptr);
            return Flow::Normal;
        };
        let n = fields.len();
        if stack.lenient {
            stack.push(AbstractType::Ptr);
            return Flow::Normal;
        }
        if stack.depth() < n {
            self.sem_error(
                fc.quiet,
                format!(
                    "stack underflow constructing '{}' (requires {}, have {})",
                    struct_name,
                    n,
                    stack.depth()
                ),
                line,
                column,
            );
            stack.values.clear();
            stack.push(AbstractType::Ptr);
            return Flow::Normal;
        }
        for (i, field) in fields.iter().enumerate() {
            let declared = self.type_from_code(&field.type_name, fc.quiet, line, column);
            let actual = stack.peek(n - 1 - i);
            if declared != AbstractType::Any
                && actual != AbstractType::Any
                && declared != actual
            {
                self.sem_error(
                    fc.quiet,
                    format!(
                        "type mismatch for field '{}' of '{}' (expected {}, got {})",
                        field.name,
                        struct_name,
                        declared.name(),
                        actual.name()
                    ),
                    line,
                    column,
                );
            }
        }
        for _ in 0..n {
            stack.pop();
        }
        stack.push(AbstractType::Ptr);
        Flow::Normal
    }

    fn simulate_field_access(
        &mut self,
        var_name: &str,
        field_name: &str,
        line: usize,
        column: usize,
        stack: &mut SimStack,
        fc: &mut FnContext,
    ) -> Flow {
        let Some(local) = fc.locals.get(var_name).cloned() else {
            self.sem_error(
                fc.quiet,
                format!("unknown variable '{}'", var_name),
                line,
                column,
            );
            stack.push(AbstractType::Any);
            return Flow::Normal;
        };
        let Some(struct_name) = local.struct_name else {
            self.sem_error(
                fc.quiet,
                format!("variable '{}' is not a struct", var_name),
                line,
                column,
            );
            stack.push(AbstractType::Any);
            return Flow::Normal;
        };
        let fields = self.structs.get(&struct_name).cloned().unwrap_or_default();
        match fields.iter().find(|f| f.name == field_name) {
            Some(field) => {
                let ty = self.type_from_code(&field.type_name, fc.quiet, line, column);
                stack.push(ty);
            }
            None => {
                self.sem_error(
                    fc.quiet,
                    format!("struct '{}' has no field '{}'", struct_name, field_name),
                    line,
                    column,
                );
                stack.push(AbstractType::Any);
            }
        }
        Flow::Normal
    }

    fn simulate_local(
        &mut self,
        name: &str,
        type_name: &str,
        line: usize,
        column: usize,
        stack: &mut SimStack,
        fc: &mut FnContext,
    ) -> Flow {
        if !stack.lenient && stack.depth() < 1 {
            self.sem_error(
                fc.quiet,
                format!("Stack underflow for 'local {}' (requires 1, have 0)", name),
                line,
                column,
            );
            fc.locals.insert(
                name.to_string(),
                LocalInfo {
                    ty: AbstractType::Any,
                    struct_name: None,
                },
            );
            return Flow::Normal;
        }
        let popped = stack.pop();
        let info = if type_name.is_empty() {
            LocalInfo {
                ty: popped.ty,
                struct_name: None,
            }
        } else if self.structs.contains_key(type_name) {
            if popped.ty != AbstractType::Ptr && popped.ty != AbstractType::Any && !stack.lenient {
                self.sem_error(
                    fc.quiet,
                    format!(
                        "local '{}' declared as struct '{}' but popped {}",
                        name,
                        type_name,
                        popped.ty.name()
                    ),
                    line,
                    column,
                );
            }
            LocalInfo {
                ty: AbstractType::Ptr,
                struct_name: Some(type_name.to_string()),
            }
        } else {
            let declared = self.type_from_code(type_name, fc.quiet, line, column);
            if declared != AbstractType::Any
                && popped.ty != AbstractType::Any
                && declared != popped.ty
                && !stack.lenient
            {
                self.sem_error(
                    fc.quiet,
                    format!(
                        "local '{}' declared as {} but popped {}",
                        name,
                        declared.name(),
                        popped.ty.name()
                    ),
                    line,
                    column,
                );
            }
            LocalInfo {
                ty: declared,
                struct_name: None,
            }
        };
        fc.locals.insert(name.to_string(), info);
        Flow::Normal
    }
}

// -- helpers ----------------------------------------------------------------

/// The scope a `use` makes visible: directory-modules keep their name,
/// `.qd` file imports are visible under their filename stem.
fn module_scope_name(module: &str) -> String {
    if module.ends_with(".qd") {
        Path::new(module)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| module.to_string())
    } else {
        module.to_string()
    }
}

fn set_parameter_casts(node: &mut AstNode, casts: Vec<CastDirection>) {
    match &mut node.kind {
        AstKind::Identifier { parameter_casts, .. }
        | AstKind::ScopedIdentifier { parameter_casts, .. } => {
            *parameter_casts = casts;
        }
        _ => {}
    }
}

fn operand_matches(expected: OperandType, actual: AbstractType) -> bool {
    if actual == AbstractType::Any {
        return true;
    }
    match expected {
        OperandType::Numeric => matches!(actual, AbstractType::Int | AbstractType::Float),
        OperandType::Int => actual == AbstractType::Int,
        OperandType::Float => actual == AbstractType::Float,
        OperandType::Str => actual == AbstractType::Str,
        OperandType::Ptr => actual == AbstractType::Ptr,
        OperandType::Any => true,
    }
}

fn operand_name(expected: OperandType) -> &'static str {
    match expected {
        OperandType::Numeric => "numeric",
        OperandType::Int => "int",
        OperandType::Float => "float",
        OperandType::Str => "str",
        OperandType::Ptr => "ptr",
        OperandType::Any => "any",
    }
}

fn result_type(result: &ResultType, consumed: &[AbstractType]) -> AbstractType {
    match result {
        ResultType::Int => AbstractType::Int,
        ResultType::Float => AbstractType::Float,
        ResultType::Str => AbstractType::Str,
        ResultType::Ptr => AbstractType::Ptr,
        ResultType::Any => AbstractType::Any,
        ResultType::Promote => {
            if consumed.iter().any(|t| *t == AbstractType::Float) {
                AbstractType::Float
            } else if consumed.iter().any(|t| *t == AbstractType::Any) {
                AbstractType::Any
            } else {
                AbstractType::Int
            }
        }
        ResultType::SameAsOperand => consumed.first().copied().unwrap_or(AbstractType::Any),
    }
}

/// Pure stack rearrangements; depth was already checked.
fn apply_shuffle(name: &str, stack: &mut SimStack) {
    let len = stack.values.len();
    let values = &mut stack.values;
    match name {
        "dup" => values.push(values[len - 1]),
        "dupd" => values.insert(len - 1, values[len - 2]),
        "dup2" => {
            values.push(values[len - 2]);
            values.push(values[len - 1]);
        }
        "swap" => values.swap(len - 1, len - 2),
        "swapd" => values.swap(len - 2, len - 3),
        "swap2" => {
            values.swap(len - 4, len - 2);
            values.swap(len - 3, len - 1);
        }
        "over" => values.push(values[len - 2]),
        "overd" => values.push(values[len - 3]),
        "over2" => {
            values.push(values[len - 4]);
            values.push(values[len - 3]);
        }
        "nip" => {
            values.remove(len - 2);
        }
        "nipd" => {
            values.remove(len - 3);
        }
        "drop" => {
            values.pop();
        }
        "drop2" => {
            values.pop();
            values.pop();
        }
        "rot" => {
            let a = values.remove(len - 3);
            values.push(a);
        }
        "tuck" => values.insert(len - 2, values[len - 1]),
        _ => {}
    }
}
