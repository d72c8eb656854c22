//! Quadrate compiler library.
//!
//! Provides compilation from `.qd` source to LLVM IR and native
//! executables: lexing, parsing, semantic validation (abstract stack
//! interpretation), module resolution across the search path, and code
//! generation against the `qdrt` runtime ABI.
//!
//! The pipeline is a straight sequence: parse -> validate -> resolve ->
//! lower -> link. [`compile_files`] runs the whole thing the way the
//! `quadc` binary does; [`compile_to_ir`] stops after lowering (used by
//! tests and tooling).

pub mod ast;
pub mod builtins;
pub mod codegen;
pub mod config;
pub mod diagnostics;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod validator;

pub use ast::AstNode;
pub use codegen::{CodeGen, CodeGenError};
pub use config::CompileOptions;
pub use diagnostics::{Diagnostic, DiagnosticKind, Severity};
pub use parser::Parser;
pub use resolver::{ParsedModule, Resolver, SearchConfig, find_module_file};
pub use validator::SemanticValidator;

use std::collections::HashSet;
use std::path::Path;

/// Compile one or more `.qd` sources into an executable at
/// `output_path`. The first file is the main module; additional files
/// contribute imports. Diagnostics are printed as they are found.
pub fn compile_files(
    files: &[std::path::PathBuf],
    output_path: &Path,
    options: &CompileOptions,
) -> Result<(), String> {
    if files.is_empty() {
        return Err("no input files".to_string());
    }

    let search = SearchConfig {
        version_pins: options.version_pins.clone(),
        packages_dir_override: None,
    };

    // parse and validate the main sources
    let mut seeds = Vec::new();
    for file in files {
        let source = std::fs::read_to_string(file)
            .map_err(|_| format!("{}: No such file or directory", file.display()))?;

        if options.dump_tokens {
            print!("{}", lexer::dump_tokens(&source, &file.to_string_lossy()));
        }

        tracing::info!(file = %file.display(), "parsing");
        let (mut ast, parse_diagnostics) =
            Parser::new(&source, &file.to_string_lossy()).parse();
        if !parse_diagnostics.is_empty() {
            for diagnostic in &parse_diagnostics {
                eprintln!("{}", diagnostic);
            }
            return Err(format!(
                "parsing failed for {} with {} errors",
                file.display(),
                parse_diagnostics.len()
            ));
        }

        tracing::info!(file = %file.display(), "validating");
        let mut validator = SemanticValidator::new();
        validator.set_search_config(search.clone());
        let errors = validator.validate(&mut ast, &file.to_string_lossy(), false, options.werror);
        if errors > 0 {
            return Err(format!(
                "validation failed for {} with {} errors",
                file.display(),
                errors
            ));
        }

        seeds.push(resolver::seed_module(file, ast));
    }

    // resolve the transitive module graph
    tracing::info!("resolving modules");
    let mut module_resolver = Resolver::new(search.clone());
    let mut modules = module_resolver.resolve(&seeds)?;

    // validate each dependency module in isolation
    for module in &mut modules {
        tracing::info!(module = %module.logical_name, "validating module");
        let mut validator = SemanticValidator::new();
        validator.set_search_config(search.clone());
        let errors = validator.validate(
            &mut module.ast,
            &module.path.to_string_lossy(),
            true,
            options.werror,
        );
        if errors > 0 {
            return Err(format!(
                "validation failed for module '{}' with {} errors",
                module.logical_name, errors
            ));
        }
    }

    // lower: dependencies in reverse discovery order (leaves first),
    // main module last
    let main_seed = seeds
        .into_iter()
        .next()
        .ok_or("no main module found")?;

    let output_name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "main".to_string());
    let mut generator = CodeGen::new(&output_name);
    generator.set_debug_info(options.debug_info);
    generator.set_optimization_level(options.optimization_level);

    let mut added_package_dirs = HashSet::new();
    for module in &modules {
        if let Some(package_dir) = &module.package_directory {
            if added_package_dirs.insert(package_dir.clone()) {
                let lib_dir = package_dir.join("lib");
                if lib_dir.exists() {
                    generator.add_library_search_path(&lib_dir);
                }
            }
        }
    }

    for module in modules.into_iter().rev() {
        generator.add_module_ast(&module.package_namespace, module.ast);
    }

    tracing::info!("generating IR");
    generator
        .generate(&main_seed.ast, &main_seed.logical_name)
        .map_err(|e| e.to_string())?;

    if options.dump_ir {
        println!("=== Generated LLVM IR ===");
        println!("{}", generator.ir_string());
    }

    if let Some(ir_dir) = &options.save_ir_dir {
        let ir_path = ir_dir.join(format!("{}.ll", output_name));
        generator.write_ir(&ir_path)?;
        tracing::info!(path = %ir_path.display(), "wrote IR");
    }

    tracing::info!(output = %output_path.display(), "linking");
    generator.write_executable(output_path)?;
    Ok(())
}

/// Compile a source string to LLVM IR (no linking). The source must be a
/// self-contained main module.
pub fn compile_to_ir(source: &str) -> Result<String, String> {
    compile_to_ir_with_options(source, &CompileOptions::default())
}

/// [`compile_to_ir`] with explicit options.
pub fn compile_to_ir_with_options(
    source: &str,
    options: &CompileOptions,
) -> Result<String, String> {
    let (mut ast, parse_diagnostics) = Parser::new(source, "<source>").parse();
    if !parse_diagnostics.is_empty() {
        return Err(format!(
            "parsing failed with {} errors: {}",
            parse_diagnostics.len(),
            parse_diagnostics
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        ));
    }

    let mut validator = SemanticValidator::storing();
    let errors = validator.validate(&mut ast, "<source>", false, options.werror);
    if errors > 0 {
        return Err(format!(
            "validation failed with {} errors: {}",
            errors,
            validator
                .diagnostics()
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        ));
    }

    let mut generator = CodeGen::new("quadrate_module");
    generator.set_optimization_level(options.optimization_level);
    generator.set_debug_info(options.debug_info);
    generator
        .generate(&ast, "<source>")
        .map_err(|e| e.to_string())?;
    Ok(generator.ir_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_to_ir_simple() {
        let ir = compile_to_ir("fn main( -- ) { 2 3 add print }").unwrap();
        assert!(ir.contains("define i32 @main"));
        assert!(ir.contains("@qd_add"));
    }

    #[test]
    fn test_compile_to_ir_reports_parse_errors() {
        let err = compile_to_ir("fn main( { }").unwrap_err();
        assert!(err.contains("parsing failed"));
    }

    #[test]
    fn test_compile_to_ir_reports_validation_errors() {
        let err = compile_to_ir("fn main( -- ) { undefined_thing }").unwrap_err();
        assert!(err.contains("validation failed"));
        assert!(err.contains("undefined function"));
    }

    #[test]
    fn test_compile_to_ir_werror() {
        let src = "fn addf(a:f b:f -- r:f) { + }\nfn main( -- ) { 10 20.5 addf print }";
        assert!(compile_to_ir(src).is_ok());
        let options = CompileOptions {
            werror: true,
            ..Default::default()
        };
        assert!(compile_to_ir_with_options(src, &options).is_err());
    }
}
