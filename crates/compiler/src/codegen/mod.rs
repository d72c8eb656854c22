//! LLVM IR code generation via text.
//!
//! The generator emits LLVM IR as text (`.ll`) and drives `clang` for
//! object emission and linking. This avoids an FFI binding to LLVM while
//! keeping the reference back end; the IR uses opaque pointers, so
//! clang/LLVM 15+ is required.
//!
//! Lowering model: every user function becomes
//! `define %qd_exec_result @usr_<ns>_<name>(ptr %ctx)` whose body is a
//! sequence of runtime calls threading the context pointer; the `main`
//! module's `main` becomes the platform entry point. The runtime ABI
//! (`qd_*` symbols, element and context layouts) is declared up front in
//! `runtime.rs`.
//!
//! # Module structure
//!
//! - `runtime.rs`: ABI declarations and the context/element type strings
//! - `functions.rs`: function lowering, imports, prologue/epilogue
//! - `statements.rs`: statement dispatch (literals, calls, instructions)
//! - `control_flow.rs`: if/for/loop/switch, defer splicing, ctx blocks

mod control_flow;
mod functions;
mod runtime;
mod statements;

use crate::ast::{AstKind, AstNode, Field, LiteralKind};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

/// Error type for code generation.
///
/// `Logic` covers invalid inputs (should have been caught upstream);
/// `Format` lets `write!` failures propagate with `?`.
#[derive(Debug)]
pub enum CodeGenError {
    Logic(String),
    Format(std::fmt::Error),
}

impl std::fmt::Display for CodeGenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodeGenError::Logic(s) => write!(f, "{}", s),
            CodeGenError::Format(e) => write!(f, "IR generation error: {}", e),
        }
    }
}

impl std::error::Error for CodeGenError {}

impl From<String> for CodeGenError {
    fn from(s: String) -> Self {
        CodeGenError::Logic(s)
    }
}

impl From<std::fmt::Error> for CodeGenError {
    fn from(e: std::fmt::Error) -> Self {
        CodeGenError::Format(e)
    }
}

/// Minimum clang major version (opaque pointers need LLVM 15).
const MIN_CLANG_VERSION: u32 = 15;

static CLANG_VERSION_CHECKED: OnceLock<Result<u32, String>> = OnceLock::new();

/// A registered callable: user function, module function, or import.
#[derive(Debug, Clone)]
pub(crate) struct FuncInfo {
    pub symbol: String,
    pub throws: bool,
}

/// Per-module item tables consulted while lowering that module's
/// functions.
#[derive(Debug, Default, Clone)]
pub(crate) struct ModuleItems {
    pub constants: HashMap<String, (LiteralKind, String)>,
    pub structs: HashMap<String, Vec<Field>>,
}

pub struct CodeGen {
    module_name: String,
    debug_info: bool,
    optimization_level: u8,
    /// Queued module ASTs in dependency order (leaves first).
    module_asts: Vec<(String, AstNode)>,
    /// Linker search paths contributed by third-party packages.
    library_search_paths: Vec<PathBuf>,

    // emission state
    pub(crate) globals: String,
    pub(crate) code: String,
    pub(crate) global_counter: usize,
    pub(crate) declared_runtime: HashSet<String>,
    pub(crate) runtime_decls: String,
    pub(crate) functions: HashMap<String, FuncInfo>,
    finished: Option<String>,
}

impl CodeGen {
    pub fn new(module_name: &str) -> Self {
        CodeGen {
            module_name: module_name.to_string(),
            debug_info: false,
            optimization_level: 0,
            module_asts: Vec::new(),
            library_search_paths: Vec::new(),
            globals: String::new(),
            code: String::new(),
            global_counter: 0,
            declared_runtime: HashSet::new(),
            runtime_decls: String::new(),
            functions: HashMap::new(),
            finished: None,
        }
    }

    /// Emit `; line` markers into the IR so generated code can be read
    /// against the source. (DWARF emission is not wired through the
    /// textual back end.)
    pub fn set_debug_info(&mut self, enabled: bool) {
        self.debug_info = enabled;
    }

    pub fn set_optimization_level(&mut self, level: u8) {
        self.optimization_level = level.min(3);
    }

    pub(crate) fn debug_info(&self) -> bool {
        self.debug_info
    }

    /// Queue a dependency module for lowering under `namespace`. Call in
    /// dependency order: leaves first, dependents after.
    pub fn add_module_ast(&mut self, namespace: &str, ast: AstNode) {
        self.module_asts.push((namespace.to_string(), ast));
    }

    /// Append a linker search path (third-party package `lib/`
    /// directories).
    pub fn add_library_search_path(&mut self, path: &Path) {
        self.library_search_paths.push(path.to_path_buf());
    }

    /// Lower all queued modules and the main module to a complete IR
    /// module.
    pub fn generate(&mut self, main_ast: &AstNode, source_filename: &str) -> Result<(), CodeGenError> {
        let mut header = String::new();
        writeln!(header, "; ModuleID = '{}'", self.module_name)?;
        writeln!(header, "source_filename = \"{}\"", source_filename)?;
        writeln!(header)?;
        header.push_str(runtime::TYPE_DEFINITIONS);
        header.push_str(runtime::FIXED_DECLARATIONS);

        // process imports first: external declarations plus usr_ wrappers
        let modules = std::mem::take(&mut self.module_asts);
        for (_, module_ast) in &modules {
            self.process_imports(module_ast)?;
        }
        self.process_imports(main_ast)?;

        // register every function up front so forward and cross-module
        // references resolve
        for (namespace, module_ast) in &modules {
            self.register_functions(namespace, module_ast);
        }
        self.register_functions("main", main_ast);

        if main_ast.find_function("main").is_none() {
            return Err(CodeGenError::Logic(
                "no 'main' function found in main module".to_string(),
            ));
        }

        // lower dependency modules in the order provided (leaves first)
        for (namespace, module_ast) in &modules {
            let items = collect_module_items(module_ast);
            for child in &module_ast.children {
                if let AstKind::Function { .. } = &child.kind {
                    self.emit_function(child, namespace, false, &items)?;
                }
            }
        }

        // main module: user functions first, entry point last
        let items = collect_module_items(main_ast);
        for child in &main_ast.children {
            if let AstKind::Function { name, .. } = &child.kind {
                if name != "main" {
                    self.emit_function(child, "main", false, &items)?;
                }
            }
        }
        for child in &main_ast.children {
            if let AstKind::Function { name, .. } = &child.kind {
                if name == "main" {
                    self.emit_function(child, "main", true, &items)?;
                }
            }
        }

        let mut module = header;
        module.push_str(&self.runtime_decls);
        writeln!(module)?;
        module.push_str(&self.globals);
        writeln!(module)?;
        module.push_str(&self.code);
        self.finished = Some(module);
        self.module_asts = modules;
        Ok(())
    }

    /// The finished IR module text.
    pub fn ir_string(&self) -> String {
        self.finished.clone().unwrap_or_default()
    }

    pub fn write_ir(&self, path: &Path) -> Result<(), String> {
        let ir = self
            .finished
            .as_ref()
            .ok_or("write_ir called before generate")?;
        std::fs::write(path, ir).map_err(|e| format!("failed to write IR file: {}", e))
    }

    /// Lower the module to a native object file via `clang -c`.
    pub fn write_object(&self, path: &Path) -> Result<(), String> {
        check_clang_version()?;
        let ir_path = path.with_extension("ll");
        self.write_ir(&ir_path)?;

        let output = Command::new("clang")
            .arg("-c")
            .arg(opt_flag(self.optimization_level))
            .arg("-x")
            .arg("ir")
            .arg(&ir_path)
            .arg("-o")
            .arg(path)
            .output()
            .map_err(|e| format!("failed to run clang: {}", e))?;
        std::fs::remove_file(&ir_path).ok();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // clang rejecting our IR means the generator produced an
            // invalid module
            return Err(format!("internal error: IR verification failed:\n{}", stderr));
        }
        Ok(())
    }

    /// Produce the final executable: object emission, then one linker
    /// invocation against the runtime libraries.
    ///
    /// Library search order: `$QUADRATE_LIBDIR`, `./dist/lib`,
    /// `$HOME/.local/lib`, then package `lib/` directories from the
    /// resolver; system paths are left to the linker.
    pub fn write_executable(&self, path: &Path) -> Result<(), String> {
        let object_path = PathBuf::from(format!("{}.o", path.display()));
        self.write_object(&object_path)?;

        let mut clang = Command::new("clang");
        clang.arg("-o").arg(path).arg(&object_path);

        for lib_dir in self.link_search_paths() {
            clang.arg("-L").arg(&lib_dir);
            clang.arg(format!("-Wl,-rpath,{}", lib_dir.display()));
        }

        clang
            .arg("-lqdrt")
            .arg("-lstdqd")
            .arg("-lm")
            .arg("-pthread");

        let output = clang
            .output()
            .map_err(|e| format!("failed to run clang: {}", e))?;
        std::fs::remove_file(&object_path).ok();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("linking failed:\n{}", stderr));
        }
        Ok(())
    }

    fn link_search_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(lib_dir) = std::env::var_os("QUADRATE_LIBDIR") {
            let lib_dir = PathBuf::from(lib_dir);
            if lib_dir.exists() {
                paths.push(lib_dir);
            }
        } else if Path::new("./dist/lib").exists() {
            if let Ok(abs) = Path::new("./dist/lib").canonicalize() {
                paths.push(abs);
            }
        } else if let Some(home) = std::env::var_os("HOME") {
            let local = PathBuf::from(home).join(".local/lib");
            if local.exists() {
                paths.push(local);
            }
        }
        for package_lib in &self.library_search_paths {
            if package_lib.exists() && !paths.contains(package_lib) {
                paths.push(package_lib.clone());
            }
        }
        paths
    }

    // -- shared emission helpers -------------------------------------------

    /// Intern a string as a private global constant; returns its symbol.
    pub(crate) fn intern_string(&mut self, text: &str) -> String {
        let symbol = format!("@.str.{}", self.global_counter);
        self.global_counter += 1;
        let bytes = text.as_bytes();
        let _ = writeln!(
            self.globals,
            "{} = private unnamed_addr constant [{} x i8] c\"{}\\00\"",
            symbol,
            bytes.len() + 1,
            escape_ir_string(bytes)
        );
        symbol
    }

    /// Intern an `[N x i32]` constant (runtime type descriptors for
    /// `qd_check_stack`).
    pub(crate) fn intern_type_array(&mut self, types: &[u32]) -> String {
        let symbol = format!("@.types.{}", self.global_counter);
        self.global_counter += 1;
        let elements: Vec<String> = types.iter().map(|t| format!("i32 {}", t)).collect();
        let _ = writeln!(
            self.globals,
            "{} = private unnamed_addr constant [{} x i32] [{}]",
            symbol,
            types.len(),
            elements.join(", ")
        );
        symbol
    }

    /// Declare a `qd_<op>(ptr) -> %qd_exec_result` runtime primitive on
    /// first use.
    pub(crate) fn declare_runtime_op(&mut self, symbol: &str) {
        if self.declared_runtime.insert(symbol.to_string()) {
            let _ = writeln!(
                self.runtime_decls,
                "declare %qd_exec_result @{}(ptr)",
                symbol
            );
        }
    }

    /// Declare an external user-convention function (imports and scoped
    /// calls into other link units).
    pub(crate) fn declare_external_function(&mut self, symbol: &str) {
        if self.declared_runtime.insert(symbol.to_string()) {
            let _ = writeln!(
                self.runtime_decls,
                "declare %qd_exec_result @{}(ptr)",
                symbol
            );
        }
    }

    pub(crate) fn is_defined_here(&self, symbol: &str) -> bool {
        self.functions.values().any(|f| f.symbol == symbol)
    }
}

fn opt_flag(level: u8) -> &'static str {
    match level {
        0 => "-O0",
        1 => "-O1",
        2 => "-O2",
        _ => "-O3",
    }
}

pub(crate) fn collect_module_items(root: &AstNode) -> ModuleItems {
    let mut items = ModuleItems::default();
    for child in &root.children {
        match &child.kind {
            AstKind::Constant {
                name,
                value_kind,
                value_text,
            } => {
                items
                    .constants
                    .insert(name.clone(), (*value_kind, value_text.clone()));
            }
            AstKind::StructDecl { name, fields, .. } => {
                items.structs.insert(name.clone(), fields.clone());
            }
            _ => {}
        }
    }
    items
}

/// Escape bytes for an LLVM `c"..."` constant.
pub(crate) fn escape_ir_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'"' | b'\\' => out.push_str(&format!("\\{:02X}", b)),
            0x20..=0x7e => out.push(b as char),
            other => out.push_str(&format!("\\{:02X}", other)),
        }
    }
    out
}

/// Format an f64 as LLVM hexadecimal float syntax (always exact).
pub(crate) fn float_literal(value: f64) -> String {
    format!("0x{:016X}", value.to_bits())
}

fn check_clang_version() -> Result<u32, String> {
    CLANG_VERSION_CHECKED
        .get_or_init(|| {
            let output = Command::new("clang")
                .arg("--version")
                .output()
                .map_err(|e| {
                    format!(
                        "failed to run clang: {}. Install clang {} or later.",
                        e, MIN_CLANG_VERSION
                    )
                })?;
            if !output.status.success() {
                return Err("clang --version failed".to_string());
            }
            let version_str = String::from_utf8_lossy(&output.stdout);
            let version = parse_clang_version(&version_str).ok_or_else(|| {
                format!(
                    "could not parse clang version; quadc requires clang {} or later",
                    MIN_CLANG_VERSION
                )
            })?;
            // Apple clang numbering differs: Apple clang 14 is LLVM 15
            let is_apple = version_str.contains("Apple clang");
            let effective_min = if is_apple { 14 } else { MIN_CLANG_VERSION };
            if version < effective_min {
                return Err(format!(
                    "clang {} detected, but quadc requires {} or later (opaque pointer IR)",
                    version, effective_min
                ));
            }
            Ok(version)
        })
        .clone()
}

/// Parse the major version from `clang --version` output.
fn parse_clang_version(output: &str) -> Option<u32> {
    for line in output.lines() {
        if line.contains("clang version") {
            if let Some(idx) = line.find("version ") {
                let after = &line[idx + 8..];
                let major: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
                if !major.is_empty() {
                    return major.parse().ok();
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::validator::SemanticValidator;

    fn lower(src: &str) -> String {
        let (mut ast, diagnostics) = Parser::new(src, "test.qd").parse();
        assert!(diagnostics.is_empty(), "parse: {:?}", diagnostics);
        let mut validator = SemanticValidator::storing();
        let errors = validator.validate(&mut ast, "test.qd", false, false);
        assert_eq!(errors, 0, "validation failed: {:?}", validator.diagnostics());
        let mut codegen = CodeGen::new("test");
        codegen.generate(&ast, "test.qd").expect("codegen failed");
        codegen.ir_string()
    }

    #[test]
    fn test_hello_world_module_shape() {
        let ir = lower("fn main( -- ) { \"Hello, World!\" print }");
        assert!(ir.contains("define i32 @main(i32 %argc, ptr %argv)"));
        assert!(ir.contains("call ptr @qd_create_context(i64 1024)"));
        assert!(ir.contains("call void @qd_set_args(ptr %ctx, i32 %argc, ptr %argv)"));
        assert!(ir.contains("call %qd_exec_result @qd_push_s"));
        assert!(ir.contains("call %qd_exec_result @qd_print(ptr %ctx)"));
        assert!(ir.contains("Hello, World!\\00"));
        assert!(ir.contains("call void @qd_free_context(ptr %ctx)"));
        assert!(ir.contains("ret i32 0"));
    }

    #[test]
    fn test_user_function_symbol_and_check_stack() {
        let ir = lower("fn sq(x:i -- r:i) { dup mul }\nfn main( -- ) { 7 sq print }");
        assert!(ir.contains("define %qd_exec_result @usr_main_sq(ptr %ctx)"));
        assert!(ir.contains("call void @qd_check_stack(ptr %ctx, i64 1"));
        assert!(ir.contains("call %qd_exec_result @usr_main_sq(ptr %ctx)"));
        // prologue/epilogue call-stack frames
        assert!(ir.contains("call void @qd_push_call"));
        assert!(ir.contains("call void @qd_pop_call"));
        assert!(ir.contains("main::sq\\00"));
    }

    #[test]
    fn test_arithmetic_lowering() {
        let ir = lower("fn main( -- ) { 2 3 add print }");
        assert!(ir.contains("call %qd_exec_result @qd_push_i(ptr %ctx, i64 2)"));
        assert!(ir.contains("call %qd_exec_result @qd_push_i(ptr %ctx, i64 3)"));
        assert!(ir.contains("call %qd_exec_result @qd_add(ptr %ctx)"));
    }

    #[test]
    fn test_symbolic_operator_mapping() {
        let ir = lower("fn main( -- ) { 1 2 + 3 * . }");
        assert!(ir.contains("@qd_add(ptr %ctx)"));
        assert!(ir.contains("@qd_mul(ptr %ctx)"));
        assert!(ir.contains("@qd_print(ptr %ctx)"));
    }

    #[test]
    fn test_float_literal_is_hex() {
        let ir = lower("fn main( -- ) { 20.5 print }");
        assert!(ir.contains(&format!(
            "call %qd_exec_result @qd_push_f(ptr %ctx, double {})",
            float_literal(20.5)
        )));
    }

    #[test]
    fn test_if_else_blocks() {
        let ir = lower("fn main( -- ) { 1 if { 2 print } else { 3 print } }");
        assert!(ir.contains("call i32 @qd_stack_pop"));
        assert!(ir.contains("br i1"));
        assert!(ir.contains("if.then."));
        assert!(ir.contains("if.else."));
        assert!(ir.contains("if.merge."));
    }

    #[test]
    fn test_for_loop_phi() {
        let ir = lower("fn main( -- ) { 0 10 1 for { $ print } }");
        assert!(ir.contains("phi i64"));
        assert!(ir.contains("for.header."));
        assert!(ir.contains("for.body."));
        assert!(ir.contains("for.inc."));
        assert!(ir.contains("for.exit."));
        assert!(ir.contains("icmp slt i64"));
        // the iterator is pushed through qd_push_i
        assert!(ir.contains("fptosi double"));
    }

    #[test]
    fn test_implicit_cast_emission() {
        let ir = lower(
            "fn addf(a:f b:f -- r:f) { + }\nfn main( -- ) { 10 20.5 addf print }",
        );
        // parameter 0 sits one below the top at the call site
        assert!(ir.contains("call %qd_exec_result @qd_castf_n(ptr %ctx, i64 1)"));
    }

    #[test]
    fn test_fallible_bare_call_pushes_status() {
        let ir = lower("fn might( -- ) ! { error }\nfn main( -- ) { might ? err drop }");
        assert!(ir.contains("getelementptr inbounds %qd_context, ptr %ctx, i32 0, i32 1"));
        assert!(ir.contains("call %qd_exec_result @qd_err_push(ptr %ctx, i64"));
        assert!(ir.contains("store i8 0"));
    }

    #[test]
    fn test_fallible_abort_call() {
        let ir = lower("fn might( -- ) ! { error }\nfn main( -- ) { might! }");
        assert!(ir.contains("err.abort."));
        assert!(ir.contains("call void @qd_abort_with_message"));
        assert!(ir.contains("unreachable"));
        assert!(ir.contains("failed"));
    }

    #[test]
    fn test_defer_spliced_into_epilogue_reverse_order() {
        let ir = lower(
            "fn main( -- ) { defer { \"first\" prints } defer { \"second\" prints } 1 print }",
        );
        // both defers execute in the epilogue
        let ret_block = ir.split("fn.return").nth(1).expect("return block");
        let prints_count = ret_block.matches("@qd_prints(ptr %ctx)").count();
        assert_eq!(prints_count, 2);
        // defer bodies are emitted at the epilogue in reverse insertion
        // order, so "second" is interned (and pushed) before "first"
        let second_pos = ir.find("second\\00").unwrap();
        let first_pos = ir.find("first\\00").unwrap();
        assert!(second_pos < first_pos, "second defer must run before the first");
    }

    #[test]
    fn test_loop_break_targets_exit() {
        let ir = lower("fn main( -- ) { loop { 1 if { break } } }");
        assert!(ir.contains("loop.body."));
        assert!(ir.contains("loop.exit."));
        assert!(ir.contains("br label %loop.exit."));
    }

    #[test]
    fn test_module_function_prefix() {
        let mut codegen = CodeGen::new("test");
        let (module_ast, d1) = Parser::new("fn go( -- ) { 1 print }", "m/module.qd").parse();
        assert!(d1.is_empty());
        codegen.add_module_ast("mathx", module_ast);
        let (main_ast, d2) =
            Parser::new("use mathx\nfn main( -- ) { mathx::go }", "main.qd").parse();
        assert!(d2.is_empty());
        codegen.generate(&main_ast, "main.qd").unwrap();
        let ir = codegen.ir_string();
        assert!(ir.contains("define %qd_exec_result @usr_mathx_go(ptr %ctx)"));
        assert!(ir.contains("call %qd_exec_result @usr_mathx_go(ptr %ctx)"));
    }

    #[test]
    fn test_import_wrapper_for_stdqd() {
        let ir = lower(
            "import \"libstdqd.so\" as std { fn printf(fmt:s -- ) }\nfn main( -- ) { \"hi\" std::printf }",
        );
        assert!(ir.contains("declare %qd_exec_result @qd_stdqd_printf(ptr)"));
        assert!(ir.contains("define %qd_exec_result @usr_std_printf(ptr %ctx)"));
        assert!(ir.contains("call %qd_exec_result @qd_stdqd_printf(ptr %ctx)"));
        assert!(ir.contains("call %qd_exec_result @usr_std_printf(ptr %ctx)"));
    }

    #[test]
    fn test_function_pointer_and_spawn() {
        let ir = lower("fn worker( -- ) { }\nfn main( -- ) { &worker spawn wait }");
        assert!(ir.contains("call %qd_exec_result @qd_push_p(ptr %ctx, ptr @usr_main_worker)"));
        assert!(ir.contains("@qd_spawn(ptr %ctx)"));
        assert!(ir.contains("@qd_wait(ptr %ctx)"));
    }

    #[test]
    fn test_struct_lowering() {
        let ir = lower(
            "struct Vec2 { x:f y:f }\nfn main( -- ) { 1.0 2.0 Vec2 local v:Vec2 v @y print }",
        );
        assert!(ir.contains("call %qd_exec_result @qd_struct_pack(ptr %ctx, i64 2)"));
        assert!(ir.contains("alloca %qd_stack_element"));
        assert!(ir.contains("call %qd_exec_result @qd_struct_field(ptr %ctx, i64 1)"));
        assert!(ir.contains("call %qd_exec_result @qd_push_e"));
    }

    #[test]
    fn test_ctx_block_clones_context() {
        let ir = lower("fn main( -- ) { ctx { 1 2 add } print }");
        assert!(ir.contains("call ptr @qd_clone_context(ptr %ctx)"));
        assert!(ir.contains("call void @qd_free_context(ptr %child."));
    }

    #[test]
    fn test_switch_compare_chain() {
        let ir = lower(
            "fn main( -- ) { 2 switch { case 1 { \"one\" prints } case 2 { \"two\" prints } default { \"many\" prints } } }",
        );
        assert!(ir.contains("icmp eq i64"));
        assert!(ir.contains("sw.body."));
        assert!(ir.contains("sw.merge."));
    }

    #[test]
    fn test_escape_ir_string() {
        assert_eq!(escape_ir_string(b"hi"), "hi");
        assert_eq!(escape_ir_string(b"a\nb"), "a\\0Ab");
        assert_eq!(escape_ir_string(b"say \"x\""), "say \\22x\\22");
    }

    #[test]
    fn test_constant_reference_lowers_to_literal_push() {
        let ir = lower("const LIMIT = 100\nfn main( -- ) { LIMIT print }");
        assert!(ir.contains("call %qd_exec_result @qd_push_i(ptr %ctx, i64 100)"));
    }

    #[test]
    fn test_generate_requires_main() {
        let (ast, _) = Parser::new("fn helper( -- ) { }", "test.qd").parse();
        let mut codegen = CodeGen::new("test");
        let err = codegen.generate(&ast, "test.qd").unwrap_err();
        assert!(err.to_string().contains("no 'main' function"));
    }

    #[test]
    fn test_parse_clang_version_variants() {
        assert_eq!(
            parse_clang_version("clang version 15.0.0 (https://llvm.org)"),
            Some(15)
        );
        assert_eq!(
            parse_clang_version("Apple clang version 14.0.3 (clang-1403)"),
            Some(14)
        );
        assert_eq!(
            parse_clang_version("Ubuntu clang version 17.0.6"),
            Some(17)
        );
        assert_eq!(parse_clang_version("no version here"), None);
    }
}
