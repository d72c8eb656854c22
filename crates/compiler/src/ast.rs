//! Abstract syntax tree for Quadrate.
//!
//! One node struct with a tagged `kind` and an owned `children` vector;
//! common fields (position) live in the outer struct. Dropping a node
//! drops its subtree. Back references are not stored: walkers that need
//! the parent pass it down, which keeps ownership strictly
//! tree-structured.

use std::fmt::Write as _;

/// Type codes from function signatures: `i`, `f`, `s`, `p`, a struct
/// name, or empty for "any".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub type_name: String,
    pub is_output: bool,
    pub line: usize,
    pub column: usize,
}

/// One function declared inside an `import` block.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportedFunction {
    pub name: String,
    pub inputs: Vec<Parameter>,
    pub outputs: Vec<Parameter>,
    pub throws: bool,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub type_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    Integer,
    Float,
    String,
}

/// Implicit cast applied to one input parameter at a call site. Filled in
/// by the validator, consumed by the code generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastDirection {
    None,
    IntToFloat,
    FloatToInt,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AstKind {
    /// Ordered list of top-level items.
    Program,
    /// `use name` or `use "path.qd"`.
    Use { module: String },
    /// `import "lib" as ns { fn ... }`.
    Import {
        library: String,
        namespace: String,
        functions: Vec<ImportedFunction>,
    },
    /// `const NAME = literal`.
    Constant {
        name: String,
        value_kind: LiteralKind,
        value_text: String,
    },
    /// `pub? struct Name { field:type ... }`.
    StructDecl {
        name: String,
        is_public: bool,
        fields: Vec<Field>,
    },
    /// `fn name(in -- out) !? { ... }`; the body block is the only child.
    Function {
        name: String,
        inputs: Vec<Parameter>,
        outputs: Vec<Parameter>,
        throws: bool,
    },
    /// Ordered statements executed sequentially.
    Block,
    Literal {
        kind: LiteralKind,
        text: String,
    },
    /// A built-in operator: `+`, `add`, `dup`, `print`, ...
    Instruction { name: String },
    /// A call (or local/constant reference) by bare name.
    Identifier {
        name: String,
        abort_on_error: bool,
        check_error: bool,
        parameter_casts: Vec<CastDirection>,
    },
    /// `module::function` call.
    ScopedIdentifier {
        scope: String,
        name: String,
        abort_on_error: bool,
        check_error: bool,
        parameter_casts: Vec<CastDirection>,
    },
    /// `&name`.
    FunctionPointer { function_name: String },
    /// Children: then-block, optional else-block.
    If,
    /// Children: body block. Bounds come off the stack at run time.
    For { loop_var: String },
    /// Children: body block. Infinite until `break`.
    Loop,
    /// Children: case nodes.
    Switch,
    /// One `case <int> { ... }` or `default { ... }`; body is the child.
    Case {
        value: Option<i64>,
        is_default: bool,
    },
    Break,
    Continue,
    Return,
    /// Children: body block, buffered to the function epilogue.
    Defer,
    /// Children: statements run in an isolated deep-copied context.
    Ctx,
    /// An identifier that named a struct: pops the field values, pushes
    /// a pointer.
    StructConstruction { struct_name: String },
    /// `var @field`.
    FieldAccess {
        var_name: String,
        field_name: String,
    },
    /// `local name:type`: pops the top of stack into a function-local.
    Local { name: String, type_name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstNode {
    pub kind: AstKind,
    /// 1-based line.
    pub line: usize,
    /// 1-based column.
    pub column: usize,
    pub children: Vec<AstNode>,
}

impl AstNode {
    pub fn new(kind: AstKind, line: usize, column: usize) -> Self {
        AstNode {
            kind,
            line,
            column,
            children: Vec::new(),
        }
    }

    pub fn child(&self, index: usize) -> Option<&AstNode> {
        self.children.get(index)
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Name accessor for the kinds that have one.
    pub fn name(&self) -> Option<&str> {
        match &self.kind {
            AstKind::Function { name, .. }
            | AstKind::Identifier { name, .. }
            | AstKind::Instruction { name }
            | AstKind::Constant { name, .. }
            | AstKind::StructDecl { name, .. }
            | AstKind::Local { name, .. } => Some(name),
            AstKind::ScopedIdentifier { name, .. } => Some(name),
            AstKind::FunctionPointer { function_name } => Some(function_name),
            AstKind::StructConstruction { struct_name } => Some(struct_name),
            AstKind::Use { module } => Some(module),
            _ => None,
        }
    }

    /// Collect the modules named by `use` statements, in order.
    pub fn imported_modules(&self) -> Vec<String> {
        let mut modules = Vec::new();
        self.walk(&mut |node| {
            if let AstKind::Use { module } = &node.kind {
                modules.push(module.clone());
            }
        });
        modules
    }

    /// Depth-first pre-order walk.
    pub fn walk(&self, visit: &mut impl FnMut(&AstNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Find a top-level function declaration by name.
    pub fn find_function(&self, name: &str) -> Option<&AstNode> {
        self.children.iter().find(|child| {
            matches!(&child.kind, AstKind::Function { name: n, .. } if n == name)
        })
    }

    /// Debug pretty-printer: one node per line, indented by depth.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_into(&mut out, 0);
        out
    }

    fn dump_into(&self, out: &mut String, depth: usize) {
        for _ in 0..depth {
            out.push_str("  ");
        }
        let _ = match &self.kind {
            AstKind::Program => writeln!(out, "Program"),
            AstKind::Use { module } => writeln!(out, "Use({})", module),
            AstKind::Import { library, namespace, functions } => writeln!(
                out,
                "Import({} as {}, {} functions)",
                library,
                namespace,
                functions.len()
            ),
            AstKind::Constant { name, value_text, .. } => {
                writeln!(out, "Constant({} = {})", name, value_text)
            }
            AstKind::StructDecl { name, fields, .. } => {
                writeln!(out, "Struct({}, {} fields)", name, fields.len())
            }
            AstKind::Function { name, inputs, outputs, throws } => writeln!(
                out,
                "Function({} {}in {}out{})",
                name,
                inputs.len(),
                outputs.len(),
                if *throws { " throws" } else { "" }
            ),
            AstKind::Block => writeln!(out, "Block"),
            AstKind::Literal { kind, text } => writeln!(out, "Literal({:?} {})", kind, text),
            AstKind::Instruction { name } => writeln!(out, "Instruction({})", name),
            AstKind::Identifier { name, abort_on_error, check_error, .. } => {
                let suffix = if *abort_on_error {
                    "!"
                } else if *check_error {
                    "?"
                } else {
                    ""
                };
                writeln!(out, "Identifier({}{})", name, suffix)
            }
            AstKind::ScopedIdentifier { scope, name, .. } => {
                writeln!(out, "ScopedIdentifier({}::{})", scope, name)
            }
            AstKind::FunctionPointer { function_name } => {
                writeln!(out, "FunctionPointer(&{})", function_name)
            }
            AstKind::If => writeln!(out, "If"),
            AstKind::For { .. } => writeln!(out, "For"),
            AstKind::Loop => writeln!(out, "Loop"),
            AstKind::Switch => writeln!(out, "Switch"),
            AstKind::Case { value, is_default } => {
                if *is_default {
                    writeln!(out, "Default")
                } else {
                    writeln!(out, "Case({})", value.unwrap_or(0))
                }
            }
            AstKind::Break => writeln!(out, "Break"),
            AstKind::Continue => writeln!(out, "Continue"),
            AstKind::Return => writeln!(out, "Return"),
            AstKind::Defer => writeln!(out, "Defer"),
            AstKind::Ctx => writeln!(out, "Ctx"),
            AstKind::StructConstruction { struct_name } => {
                writeln!(out, "StructConstruction({})", struct_name)
            }
            AstKind::FieldAccess { var_name, field_name } => {
                writeln!(out, "FieldAccess({} @{})", var_name, field_name)
            }
            AstKind::Local { name, type_name } => writeln!(out, "Local({}:{})", name, type_name),
        };
        for child in &self.children {
            child.dump_into(out, depth + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ownership_is_tree_structured() {
        let mut root = AstNode::new(AstKind::Program, 1, 1);
        let mut func = AstNode::new(
            AstKind::Function {
                name: "main".to_string(),
                inputs: vec![],
                outputs: vec![],
                throws: false,
            },
            1,
            1,
        );
        func.children.push(AstNode::new(AstKind::Block, 1, 10));
        root.children.push(func);
        assert_eq!(root.child_count(), 1);
        assert_eq!(root.child(0).unwrap().child_count(), 1);
        // dropping root drops the whole subtree (no back edges to dangle)
        drop(root);
    }

    #[test]
    fn test_imported_modules_in_order() {
        let mut root = AstNode::new(AstKind::Program, 1, 1);
        root.children.push(AstNode::new(
            AstKind::Use { module: "math".to_string() },
            1,
            1,
        ));
        root.children.push(AstNode::new(
            AstKind::Use { module: "color".to_string() },
            2,
            1,
        ));
        assert_eq!(root.imported_modules(), vec!["math", "color"]);
    }

    #[test]
    fn test_find_function() {
        let mut root = AstNode::new(AstKind::Program, 1, 1);
        root.children.push(AstNode::new(
            AstKind::Function {
                name: "helper".to_string(),
                inputs: vec![],
                outputs: vec![],
                throws: false,
            },
            1,
            1,
        ));
        assert!(root.find_function("helper").is_some());
        assert!(root.find_function("missing").is_none());
    }
}
