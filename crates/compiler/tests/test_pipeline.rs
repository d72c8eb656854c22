//! Pipeline integration tests: source through parse, validation,
//! resolution, and IR generation. Linking is exercised by the driver on
//! machines with clang; here we assert on the lowered module.

use quadc::{CodeGen, CompileOptions, Parser, Resolver, SearchConfig, SemanticValidator};
use std::fs;
use std::path::Path;

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn scenario_add_and_print() {
    let ir = quadc::compile_to_ir("fn main( -- ) { 2 3 add print }").unwrap();
    assert!(ir.contains("call %qd_exec_result @qd_push_i(ptr %ctx, i64 2)"));
    assert!(ir.contains("call %qd_exec_result @qd_push_i(ptr %ctx, i64 3)"));
    assert!(ir.contains("call %qd_exec_result @qd_add(ptr %ctx)"));
    assert!(ir.contains("call %qd_exec_result @qd_print(ptr %ctx)"));
    assert!(ir.contains("ret i32 0"));
}

#[test]
fn scenario_square_function() {
    let src = "fn sq(x:i -- r:i) { dup mul }\nfn main( -- ) { 7 sq print }";
    let ir = quadc::compile_to_ir(src).unwrap();
    assert!(ir.contains("define %qd_exec_result @usr_main_sq(ptr %ctx)"));
    assert!(ir.contains("call %qd_exec_result @qd_push_i(ptr %ctx, i64 7)"));
    assert!(ir.contains("call %qd_exec_result @usr_main_sq(ptr %ctx)"));
}

#[test]
fn scenario_bounded_for_loop() {
    let src = "fn main( -- ) { 0 10 1 for { $ print } }";
    let ir = quadc::compile_to_ir(src).unwrap();
    assert!(ir.contains("phi i64"));
    assert!(ir.contains("icmp slt i64"));
    // `$` pushes the iterator through the runtime
    assert!(ir.contains("call %qd_exec_result @qd_push_i(ptr %ctx, i64 %t"));
}

#[test]
fn scenario_fallible_observe() {
    let src = "fn might( -- ) ! { 1 if { error } }\n\
               fn main( -- ) { might ? err if { \"failed\" prints } }";
    let ir = quadc::compile_to_ir(src).unwrap();
    assert!(ir.contains("call %qd_exec_result @qd_err_push(ptr %ctx, i64"));
    assert!(ir.contains("call %qd_exec_result @qd_err(ptr %ctx)"));
    assert!(ir.contains("failed\\00"));
}

#[test]
fn scenario_division_by_zero_lowers_plainly() {
    // the abort happens at run time inside qd_div
    let ir = quadc::compile_to_ir("fn main( -- ) { 1 0 div }").unwrap();
    assert!(ir.contains("call %qd_exec_result @qd_div(ptr %ctx)"));
}

#[test]
fn multi_module_program_lowers_leaves_first() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(
        &root.join("main.qd"),
        "use geometry\nfn main( -- ) { 3 geometry::double print }\n",
    );
    write(
        &root.join("geometry/module.qd"),
        "use basis\nfn double(x:i -- r:i) { basis::two mul }\n",
    );
    write(
        &root.join("basis/module.qd"),
        "fn two( -- n:i) { 2 }\n",
    );

    // parse + validate the seed
    let source = fs::read_to_string(root.join("main.qd")).unwrap();
    let main_path = root.join("main.qd");
    let (mut main_ast, diagnostics) =
        Parser::new(&source, &main_path.to_string_lossy()).parse();
    assert!(diagnostics.is_empty());
    let mut validator = SemanticValidator::storing();
    let errors = validator.validate(&mut main_ast, &main_path.to_string_lossy(), false, false);
    assert_eq!(errors, 0, "diagnostics: {:?}", validator.diagnostics());

    // resolve and lower
    let seed = quadc::resolver::seed_module(&main_path, main_ast.clone());
    let mut resolver = Resolver::new(SearchConfig::default());
    let modules = resolver.resolve(&[seed]).unwrap();
    assert_eq!(modules.len(), 2);

    let mut generator = CodeGen::new("main");
    for module in modules.into_iter().rev() {
        generator.add_module_ast(&module.package_namespace, module.ast);
    }
    generator
        .generate(&main_ast, &main_path.to_string_lossy())
        .unwrap();
    let ir = generator.ir_string();

    assert!(ir.contains("define %qd_exec_result @usr_basis_two(ptr %ctx)"));
    assert!(ir.contains("define %qd_exec_result @usr_geometry_double(ptr %ctx)"));
    assert!(ir.contains("call %qd_exec_result @usr_geometry_double(ptr %ctx)"));
    assert!(ir.contains("call %qd_exec_result @usr_basis_two(ptr %ctx)"));
    // leaf module is defined before its dependent
    let basis_pos = ir.find("define %qd_exec_result @usr_basis_two").unwrap();
    let geometry_pos = ir
        .find("define %qd_exec_result @usr_geometry_double")
        .unwrap();
    assert!(basis_pos < geometry_pos);
}

#[test]
fn dump_ir_option_is_honored_by_ir_api() {
    let options = CompileOptions {
        optimization_level: 2,
        ..Default::default()
    };
    let ir =
        quadc::compile_to_ir_with_options("fn main( -- ) { 1 print }", &options).unwrap();
    assert!(ir.contains("define i32 @main"));
}

#[test]
fn validation_blocks_codegen() {
    let err = quadc::compile_to_ir("fn main( -- ) { 5 add }").unwrap_err();
    assert!(err.contains("validation failed with 1 errors"));
}
