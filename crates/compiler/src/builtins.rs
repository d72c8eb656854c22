//! Built-in operation schemas.
//!
//! One static table keyed by instruction name drives both the validator
//! (arity and operand types over the abstract stack) and the code
//! generator (runtime symbol lookup). Symbolic spellings (`+`, `==`, `.`)
//! share entries with their named forms.

use std::collections::HashMap;
use std::sync::LazyLock;

/// What an operation requires of a consumed operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// `Int` or `Float`.
    Numeric,
    Int,
    Float,
    Str,
    Ptr,
    /// Anything.
    Any,
}

/// What an operation leaves behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    Int,
    Float,
    Str,
    Ptr,
    Any,
    /// `Float` if any consumed operand was `Float`, else `Int`.
    Promote,
    /// Same type as the single consumed operand.
    SameAsOperand,
}

/// Operations whose stack effect cannot be expressed as consume-k /
/// produce-m over fixed types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialEffect {
    /// dup/swap/rot/... — pure rearrangement, simulated per name.
    Shuffle,
    /// `err`: requires an error-tainted top, clears the taint in place.
    ErrCheck,
    /// `error`: sets the context flag; only legal in fallible functions.
    RaiseError,
    /// `call`: indirect call, unknowable effect.
    IndirectCall,
    /// `depth`: pushes the current depth without consuming.
    Depth,
    /// `clear`: empties the stack.
    Clear,
    /// `pick`/`roll`: index-driven access below the top.
    PickRoll,
    /// `peek`/`printsv`: observe without consuming.
    NonDestructive,
}

#[derive(Debug, Clone)]
pub struct OpSchema {
    /// Minimum stack depth the operation requires.
    pub min_depth: usize,
    /// Expected types of the consumed run, deepest first. Empty for
    /// special effects.
    pub operands: Vec<OperandType>,
    /// Produced types, pushed in order. Empty for special effects.
    pub results: Vec<ResultType>,
    /// Whether the primitive can fail at run time (domain errors and the
    /// like); informational, runtime failures abort.
    pub fallible: bool,
    pub special: Option<SpecialEffect>,
}

impl OpSchema {
    fn fixed(operands: Vec<OperandType>, results: Vec<ResultType>, fallible: bool) -> Self {
        OpSchema {
            min_depth: operands.len(),
            operands,
            results,
            fallible,
            special: None,
        }
    }

    fn special(min_depth: usize, effect: SpecialEffect) -> Self {
        OpSchema {
            min_depth,
            operands: Vec::new(),
            results: Vec::new(),
            fallible: false,
            special: Some(effect),
        }
    }
}

static SCHEMAS: LazyLock<HashMap<&'static str, OpSchema>> = LazyLock::new(|| {
    use OperandType::*;
    use ResultType::Promote;
    let mut table = HashMap::new();

    // Binary arithmetic with int-to-float promotion
    for op in ["+", "add", "-", "sub", "*", "mul", "min", "max", "pow"] {
        table.insert(op, OpSchema::fixed(vec![Numeric, Numeric], vec![Promote], false));
    }
    for op in ["/", "div", "%", "mod"] {
        table.insert(op, OpSchema::fixed(vec![Numeric, Numeric], vec![Promote], true));
    }

    // Unary arithmetic preserving the operand type
    for op in ["neg", "inc", "dec", "abs", "sq", "cb", "ceil", "floor", "round"] {
        table.insert(
            op,
            OpSchema::fixed(vec![Numeric], vec![ResultType::SameAsOperand], false),
        );
    }

    // Unary arithmetic yielding a float
    for op in ["cbrt", "sin", "cos", "tan", "atan"] {
        table.insert(op, OpSchema::fixed(vec![Numeric], vec![ResultType::Float], false));
    }
    for op in ["sqrt", "ln", "log10", "asin", "acos", "inv"] {
        table.insert(op, OpSchema::fixed(vec![Numeric], vec![ResultType::Float], true));
    }

    table.insert("fac", OpSchema::fixed(vec![Int], vec![ResultType::Int], true));

    // Comparisons
    for op in [
        "eq", "==", "neq", "!=", "lt", "<", "gt", ">", "lte", "<=", "gte", ">=",
    ] {
        table.insert(op, OpSchema::fixed(vec![Numeric, Numeric], vec![ResultType::Int], false));
    }
    table.insert(
        "within",
        OpSchema::fixed(vec![Numeric, Numeric, Numeric], vec![ResultType::Int], false),
    );

    // Casts
    table.insert("casti", OpSchema::fixed(vec![Numeric], vec![ResultType::Int], false));
    table.insert("castf", OpSchema::fixed(vec![Numeric], vec![ResultType::Float], false));
    table.insert("casts", OpSchema::fixed(vec![Any], vec![ResultType::Str], false));

    // Bitwise
    for op in ["and", "or", "xor"] {
        table.insert(op, OpSchema::fixed(vec![Int, Int], vec![ResultType::Int], false));
    }
    table.insert("not", OpSchema::fixed(vec![Int], vec![ResultType::Int], false));
    for op in ["lshift", "rshift"] {
        table.insert(op, OpSchema::fixed(vec![Int, Int], vec![ResultType::Int], true));
    }

    // Stack shuffling (simulated per name by the validator)
    for (op, depth) in [
        ("dup", 1),
        ("dupd", 2),
        ("dup2", 2),
        ("swap", 2),
        ("swapd", 3),
        ("swap2", 4),
        ("over", 2),
        ("overd", 3),
        ("over2", 4),
        ("nip", 2),
        ("nipd", 3),
        ("drop", 1),
        ("drop2", 2),
        ("rot", 3),
        ("tuck", 2),
    ] {
        table.insert(op, OpSchema::special(depth, SpecialEffect::Shuffle));
    }
    table.insert("pick", OpSchema::special(2, SpecialEffect::PickRoll));
    table.insert("roll", OpSchema::special(2, SpecialEffect::PickRoll));
    table.insert("depth", OpSchema::special(0, SpecialEffect::Depth));
    table.insert("clear", OpSchema::special(0, SpecialEffect::Clear));
    table.insert("peek", OpSchema::special(1, SpecialEffect::NonDestructive));

    // I/O
    table.insert(".", OpSchema::fixed(vec![Any], vec![], false));
    table.insert("print", OpSchema::fixed(vec![Any], vec![], false));
    table.insert("printv", OpSchema::fixed(vec![Any], vec![], false));
    table.insert("prints", OpSchema::fixed(vec![Str], vec![], false));
    table.insert("printsv", OpSchema::special(0, SpecialEffect::NonDestructive));
    table.insert("nl", OpSchema::fixed(vec![], vec![], false));
    table.insert("read", OpSchema::fixed(vec![], vec![ResultType::Any], false));

    // Error manipulation
    table.insert("err", OpSchema::special(1, SpecialEffect::ErrCheck));
    table.insert("error", OpSchema::special(0, SpecialEffect::RaiseError));
    table.insert("call", OpSchema::special(1, SpecialEffect::IndirectCall));

    // Threading
    table.insert("spawn", OpSchema::fixed(vec![Ptr], vec![ResultType::Int], true));
    table.insert("detach", OpSchema::fixed(vec![Int], vec![], true));
    table.insert("wait", OpSchema::fixed(vec![Int], vec![], true));

    // Memory
    table.insert("mem_alloc", OpSchema::fixed(vec![Int], vec![ResultType::Ptr], true));
    table.insert("mem_free", OpSchema::fixed(vec![Ptr], vec![], false));
    table.insert("mem_realloc", OpSchema::fixed(vec![Ptr, Int], vec![ResultType::Ptr], true));
    table.insert("mem_set_byte", OpSchema::fixed(vec![Ptr, Int, Int], vec![], true));
    table.insert("mem_get_byte", OpSchema::fixed(vec![Ptr, Int], vec![ResultType::Int], true));
    table.insert("mem_set", OpSchema::fixed(vec![Ptr, Int, Int], vec![], true));
    table.insert("mem_get", OpSchema::fixed(vec![Ptr, Int], vec![ResultType::Int], true));
    table.insert("mem_set_float", OpSchema::fixed(vec![Ptr, Int, Float], vec![], true));
    table.insert("mem_get_float", OpSchema::fixed(vec![Ptr, Int], vec![ResultType::Float], true));
    table.insert("mem_set_ptr", OpSchema::fixed(vec![Ptr, Int, Ptr], vec![], true));
    table.insert("mem_get_ptr", OpSchema::fixed(vec![Ptr, Int], vec![ResultType::Ptr], true));
    table.insert("mem_copy", OpSchema::fixed(vec![Ptr, Ptr, Int], vec![], true));
    table.insert("mem_zero", OpSchema::fixed(vec![Ptr, Int], vec![], true));
    table.insert("mem_fill", OpSchema::fixed(vec![Ptr, Int, Int], vec![], true));

    table
});

/// Symbolic spellings that map to differently named runtime symbols.
static SYMBOL_NAMES: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        (".", "qd_print"),
        ("+", "qd_add"),
        ("-", "qd_sub"),
        ("*", "qd_mul"),
        ("/", "qd_div"),
        ("%", "qd_mod"),
        (">", "qd_gt"),
        ("<", "qd_lt"),
        (">=", "qd_gte"),
        ("<=", "qd_lte"),
        ("==", "qd_eq"),
        ("!=", "qd_neq"),
    ])
});

/// Look up the schema for a built-in instruction.
pub fn schema(name: &str) -> Option<&'static OpSchema> {
    SCHEMAS.get(name)
}

/// Whether `name` is a built-in instruction (so the parser can tell
/// instructions apart from user calls).
pub fn is_builtin(name: &str) -> bool {
    SCHEMAS.contains_key(name)
}

/// The runtime symbol an instruction lowers to.
pub fn runtime_symbol(name: &str) -> String {
    if let Some(mapped) = SYMBOL_NAMES.get(name) {
        (*mapped).to_string()
    } else {
        format!("qd_{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arithmetic_schema() {
        let add = schema("add").unwrap();
        assert_eq!(add.min_depth, 2);
        assert_eq!(add.operands, vec![OperandType::Numeric, OperandType::Numeric]);
        assert_eq!(add.results, vec![ResultType::Promote]);
        assert!(!add.fallible);
        assert!(schema("div").unwrap().fallible);
    }

    #[test]
    fn test_symbolic_aliases_share_schema() {
        assert_eq!(schema("+").unwrap().results, schema("add").unwrap().results);
        assert_eq!(schema("==").unwrap().results, schema("eq").unwrap().results);
    }

    #[test]
    fn test_runtime_symbols() {
        assert_eq!(runtime_symbol("+"), "qd_add");
        assert_eq!(runtime_symbol("."), "qd_print");
        assert_eq!(runtime_symbol("dup"), "qd_dup");
        assert_eq!(runtime_symbol("mem_alloc"), "qd_mem_alloc");
    }

    #[test]
    fn test_shuffles_are_special() {
        assert_eq!(schema("dup").unwrap().special, Some(SpecialEffect::Shuffle));
        assert_eq!(schema("swap").unwrap().min_depth, 2);
        assert_eq!(schema("err").unwrap().special, Some(SpecialEffect::ErrCheck));
    }

    #[test]
    fn test_is_builtin() {
        assert!(is_builtin("add"));
        assert!(is_builtin("error"));
        assert!(is_builtin("mem_fill"));
        assert!(!is_builtin("my_function"));
    }

    #[test]
    fn test_op_count_covers_the_surface() {
        // arithmetic + comparisons + shuffles + bitwise + io + error +
        // threading + memory + casts, counting symbolic aliases
        assert!(SCHEMAS.len() >= 80, "table has {} entries", SCHEMAS.len());
    }
}
