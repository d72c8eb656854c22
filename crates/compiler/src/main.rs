//! Quadrate compiler CLI.
//!
//! Orchestrates the pipeline: parse and validate each main source, walk
//! the module graph, lower to IR, link against the runtime, and
//! optionally run the result. Temporary files live in a scoped directory
//! removed on every exit path unless `--save-temps` releases it.

use clap::{CommandFactory, Parser as ClapParser};
use clap_complete::{Shell, generate};
use quadc::CompileOptions;
use std::io;
use std::path::PathBuf;
use std::process::{self, Command};

#[derive(ClapParser)]
#[command(name = "quadc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Quadrate compiler - compile .qd programs to native executables", long_about = None)]
struct Cli {
    /// Input .qd source files
    #[arg(required_unless_present = "completions")]
    files: Vec<PathBuf>,

    /// Output executable name
    #[arg(short = 'o', long = "output", value_name = "NAME", default_value = "main")]
    output: String,

    /// Optimization level (0-3)
    #[arg(short = 'O', value_name = "LEVEL", default_value_t = 0)]
    opt_level: u8,

    /// Generate debug information
    #[arg(short = 'g')]
    debug: bool,

    /// Pin a module to a specific version (e.g. -l color@1.0.0)
    #[arg(short = 'l', value_name = "MOD@VER")]
    module_versions: Vec<String>,

    /// Keep temporary files for debugging
    #[arg(long)]
    save_temps: bool,

    /// Show detailed compilation steps
    #[arg(long)]
    verbose: bool,

    /// Print lexer tokens
    #[arg(long)]
    dump_tokens: bool,

    /// Compile and run immediately
    #[arg(short = 'r', long = "run")]
    run: bool,

    /// Print generated LLVM IR
    #[arg(long)]
    dump_ir: bool,

    /// Treat warnings as errors
    #[arg(long)]
    werror: bool,

    /// Generate shell completion script and exit
    #[arg(long, value_enum, value_name = "SHELL")]
    completions: Option<Shell>,
}

fn main() {
    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "quadc", &mut io::stdout());
        return;
    }

    init_tracing(cli.verbose);
    process::exit(run_compiler(&cli));
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    let default_level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_compiler(cli: &Cli) -> i32 {
    let mut options = CompileOptions {
        optimization_level: cli.opt_level.min(3),
        debug_info: cli.debug,
        werror: cli.werror,
        dump_tokens: cli.dump_tokens,
        dump_ir: cli.dump_ir || cli.verbose,
        ..Default::default()
    };

    for spec in &cli.module_versions {
        match CompileOptions::parse_pin(spec) {
            Ok((module, version)) => {
                options.version_pins.insert(module, version);
            }
            Err(message) => {
                eprintln!("quadc: {}", message);
                return 1;
            }
        }
    }

    // scoped working directory, removed on all exit paths unless
    // --save-temps releases it; with --save-temps it lives in the
    // current directory so artifacts are easy to find
    let temp_dir = if cli.save_temps {
        tempfile::Builder::new().prefix("qd_").tempdir_in(".")
    } else {
        tempfile::Builder::new().prefix("qd_").tempdir()
    };
    let temp_dir = match temp_dir {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("quadc: failed to create temporary directory: {}", e);
            return 1;
        }
    };

    // when running, the executable lands in the temp directory's bin/
    let output_path = if cli.run {
        let bin_dir = temp_dir.path().join("bin");
        if let Err(e) = std::fs::create_dir_all(&bin_dir) {
            eprintln!("quadc: failed to create {}: {}", bin_dir.display(), e);
            return 1;
        }
        bin_dir.join(&cli.output)
    } else {
        PathBuf::from(&cli.output)
    };

    if cli.save_temps {
        options.save_ir_dir = Some(temp_dir.path().to_path_buf());
    }

    if let Err(message) = quadc::compile_files(&cli.files, &output_path, &options) {
        eprintln!("quadc: {}", message);
        return 1;
    }

    if cli.verbose {
        eprintln!("Written executable to {}", output_path.display());
    }

    let exit_code = if cli.run {
        if cli.verbose {
            eprintln!("\n=== Running {} ===", output_path.display());
        }
        match Command::new(&output_path).status() {
            Ok(status) => {
                let code = status.code().unwrap_or(-1);
                if code != 0 {
                    eprintln!("quadc: program exited with code {}", code);
                }
                code
            }
            Err(e) => {
                eprintln!("quadc: failed to execute program: {}", e);
                1
            }
        }
    } else {
        0
    };

    if cli.save_temps {
        let kept = temp_dir.keep();
        println!("Temporary files saved in: {}", kept.display());
    }

    exit_code
}
