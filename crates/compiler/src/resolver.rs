//! Module resolver.
//!
//! Walks `use` statements from the seed sources, locates each module on
//! the search path, parses it, and records the transitive graph. Modules
//! are discovered breadth-first; the driver hands them to the code
//! generator in reverse discovery order so leaf dependencies are lowered
//! before their dependents.
//!
//! Version pins from `-l name@version` travel in [`SearchConfig`]; there
//! is no process-wide mutable state.

use crate::ast::AstNode;
use crate::parser::Parser;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

/// Search-path configuration threaded through resolution.
#[derive(Debug, Clone, Default)]
pub struct SearchConfig {
    /// `-l name@version` pins: module name -> exact version.
    pub version_pins: HashMap<String, String>,
    /// Test hook: overrides the packages directory resolution.
    pub packages_dir_override: Option<PathBuf>,
}

/// One fully processed module.
#[derive(Debug)]
pub struct ParsedModule {
    /// The name it was imported by (a module name, or a `.qd` path for
    /// direct file imports; the seed files keep their file name).
    pub logical_name: String,
    /// Namespace its functions are mangled under ("main" for seeds).
    pub package_namespace: String,
    /// Directory its own relative imports resolve against.
    pub source_directory: PathBuf,
    /// For third-party packages, the `<name>@<version>` root (its `lib/`
    /// subdirectory joins the linker search path).
    pub package_directory: Option<PathBuf>,
    /// Resolved file path (identity for deduplication).
    pub path: PathBuf,
    pub ast: AstNode,
    pub imported_modules: Vec<String>,
}

/// Expand a leading `~` to `$HOME`.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    } else if path == "~" {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home);
        }
    }
    PathBuf::from(path)
}

/// Packages directory: `$QUADRATE_PATH`, else
/// `$XDG_DATA_HOME/quadrate/packages`, else `$HOME/quadrate/packages`.
pub fn packages_dir(config: &SearchConfig) -> Option<PathBuf> {
    if let Some(dir) = &config.packages_dir_override {
        return Some(dir.clone());
    }
    if let Some(path) = std::env::var_os("QUADRATE_PATH") {
        return Some(PathBuf::from(path));
    }
    if let Some(xdg) = std::env::var_os("XDG_DATA_HOME") {
        return Some(PathBuf::from(xdg).join("quadrate/packages"));
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join("quadrate/packages"))
}

/// Locate a package directory `<name>@<version>` under the packages dir.
/// A pinned version must match exactly; otherwise the most recently
/// discovered version wins.
fn find_package_dir(module: &str, config: &SearchConfig) -> Option<PathBuf> {
    let packages = packages_dir(config)?;
    if !packages.is_dir() {
        return None;
    }

    if let Some(pinned) = config.version_pins.get(module) {
        let exact = packages.join(format!("{}@{}", module, pinned));
        return exact.is_dir().then_some(exact);
    }

    let prefix = format!("{}@", module);
    let mut found = None;
    let entries = std::fs::read_dir(&packages).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) && entry.path().is_dir() {
            found = Some(entry.path());
        }
    }
    found
}

/// Find a module file on the search path. Direct `.qd` imports resolve
/// against the importer's source directory (absolute paths and `~` are
/// honored); logical names walk the documented search order, first match
/// wins.
pub fn find_module_file(module: &str, source_dir: &Path, config: &SearchConfig) -> Option<PathBuf> {
    if module.ends_with(".qd") {
        let expanded = expand_tilde(module);
        if expanded.is_absolute() {
            return expanded.exists().then_some(expanded);
        }
        let candidate = source_dir.join(&expanded);
        let candidate = candidate.canonicalize().unwrap_or(candidate);
        return candidate.exists().then_some(candidate);
    }

    // (a) local directory-module next to the importer
    let local = source_dir.join(module).join("module.qd");
    if local.exists() {
        return Some(local);
    }

    // (b) third-party package cache
    if let Some(package) = find_package_dir(module, config) {
        let file = package.join("module.qd");
        if file.exists() {
            return Some(file);
        }
    }

    // (c) $QUADRATE_ROOT
    if let Some(root) = std::env::var_os("QUADRATE_ROOT") {
        let file = PathBuf::from(root).join(module).join("module.qd");
        if file.exists() {
            return Some(file);
        }
    }

    // (d) development layout relative to the working directory
    let dev = PathBuf::from(format!("lib/std{}qd/qd/{}/module.qd", module, module));
    if dev.exists() {
        return Some(dev);
    }

    // (e) share directory next to the running executable
    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let share = exe_dir.join("../share/quadrate").join(module).join("module.qd");
            if share.exists() {
                return Some(share);
            }
        }
    }

    // (f) $HOME/quadrate
    if let Some(home) = std::env::var_os("HOME") {
        let file = PathBuf::from(home).join("quadrate").join(module).join("module.qd");
        if file.exists() {
            return Some(file);
        }
    }

    // (g) system-wide installation
    let system = PathBuf::from("/usr/share/quadrate").join(module).join("module.qd");
    if system.exists() {
        return Some(system);
    }

    None
}

/// Namespace for a direct `.qd` file import: the file stem.
fn namespace_from_filename(module: &str) -> String {
    Path::new(module)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| module.to_string())
}

pub struct Resolver {
    config: SearchConfig,
    /// Resolved absolute paths already processed (identity per module).
    processed_paths: HashSet<PathBuf>,
    processed_names: HashSet<String>,
}

impl Resolver {
    pub fn new(config: SearchConfig) -> Self {
        Resolver {
            config,
            processed_paths: HashSet::new(),
            processed_names: HashSet::new(),
        }
    }

    /// Resolve the transitive imports of the already-parsed seed modules.
    /// Returns the discovered dependency modules in discovery order
    /// (callers reverse this for code generation). Seeds are not
    /// included. Modules that cannot be located are skipped here; the
    /// validator already reported them against the importing file.
    pub fn resolve(&mut self, seeds: &[ParsedModule]) -> Result<Vec<ParsedModule>, String> {
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut namespace_of: HashMap<String, String> = HashMap::new();
        let mut source_dir_of: HashMap<String, PathBuf> = HashMap::new();

        let default_source_dir = seeds
            .first()
            .map(|m| m.source_directory.clone())
            .unwrap_or_else(|| PathBuf::from("."));

        for seed in seeds {
            self.processed_paths.insert(canonical(&seed.path));
            for import in &seed.imported_modules {
                enqueue_import(
                    import,
                    &seed.logical_name,
                    &seed.package_namespace,
                    &seed.source_directory,
                    &default_source_dir,
                    &mut queue,
                    &mut namespace_of,
                    &mut source_dir_of,
                );
            }
        }

        let mut modules = Vec::new();

        while let Some(module_name) = queue.pop_front() {
            if !self.processed_names.insert(module_name.clone()) {
                continue;
            }

            let namespace = namespace_of
                .get(&module_name)
                .cloned()
                .unwrap_or_else(|| module_name.clone());
            let source_dir = source_dir_of
                .get(&module_name)
                .cloned()
                .unwrap_or_else(|| default_source_dir.clone());

            let Some(file_path) = find_module_file(&module_name, &source_dir, &self.config) else {
                // already reported by validation of the importer
                continue;
            };

            let identity = canonical(&file_path);
            if !self.processed_paths.insert(identity) {
                continue;
            }

            let source = std::fs::read_to_string(&file_path)
                .map_err(|e| format!("failed to read module '{}': {}", module_name, e))?;
            let (ast, diagnostics) = Parser::new(&source, &file_path.to_string_lossy()).parse();
            if !diagnostics.is_empty() {
                for diagnostic in &diagnostics {
                    eprintln!("{}", diagnostic);
                }
                return Err(format!(
                    "failed to parse module '{}' ({} errors)",
                    module_name,
                    diagnostics.len()
                ));
            }

            let module_source_dir = file_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));

            let package_directory = self.detect_package_dir(&file_path);
            let imported_modules = ast.imported_modules();

            for import in &imported_modules {
                enqueue_import(
                    import,
                    &module_name,
                    &namespace,
                    &module_source_dir,
                    &default_source_dir,
                    &mut queue,
                    &mut namespace_of,
                    &mut source_dir_of,
                );
            }

            tracing::debug!(
                module = %module_name,
                namespace = %namespace,
                path = %file_path.display(),
                "resolved module"
            );

            modules.push(ParsedModule {
                logical_name: module_name,
                package_namespace: namespace,
                source_directory: module_source_dir,
                package_directory,
                path: file_path,
                ast,
                imported_modules,
            });
        }

        Ok(modules)
    }

    /// A module that lives under the packages directory belongs to a
    /// `<name>@<version>` package root.
    fn detect_package_dir(&self, module_path: &Path) -> Option<PathBuf> {
        let packages = packages_dir(&self.config)?;
        let packages = canonical(&packages);
        let module_path = canonical(module_path);
        let relative = module_path.strip_prefix(&packages).ok()?;
        let first = relative.components().next()?;
        Some(packages.join(first.as_os_str()))
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Record namespace and search directory for one discovered import and
/// queue it. A `.qd` import from a directory-module inherits the
/// importer's namespace and resolves against the importer's directory;
/// from a standalone file it gets its filename-derived namespace. A
/// directory-module import always owns its namespace and is searched
/// from the original source directory.
#[allow(clippy::too_many_arguments)]
fn enqueue_import(
    import: &str,
    importer_name: &str,
    importer_namespace: &str,
    importer_source_dir: &Path,
    root_source_dir: &Path,
    queue: &mut VecDeque<String>,
    namespace_of: &mut HashMap<String, String>,
    source_dir_of: &mut HashMap<String, PathBuf>,
) {
    if import.ends_with(".qd") {
        let importer_is_directory_module = !importer_name.ends_with(".qd");
        let namespace = if importer_is_directory_module {
            importer_namespace.to_string()
        } else {
            namespace_from_filename(import)
        };
        namespace_of.entry(import.to_string()).or_insert(namespace);
        source_dir_of
            .entry(import.to_string())
            .or_insert_with(|| importer_source_dir.to_path_buf());
    } else {
        namespace_of
            .entry(import.to_string())
            .or_insert_with(|| import.to_string());
        source_dir_of
            .entry(import.to_string())
            .or_insert_with(|| root_source_dir.to_path_buf());
    }
    queue.push_back(import.to_string());
}

/// Build a seed record for a main source file that has already been
/// parsed.
pub fn seed_module(file: &Path, ast: AstNode) -> ParsedModule {
    let source_directory = file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let imported_modules = ast.imported_modules();
    ParsedModule {
        logical_name: file.to_string_lossy().into_owned(),
        package_namespace: "main".to_string(),
        source_directory,
        package_directory: None,
        path: file.to_path_buf(),
        ast,
        imported_modules,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn parse_seed(path: &Path) -> ParsedModule {
        let source = fs::read_to_string(path).unwrap();
        let (ast, diagnostics) = Parser::new(&source, &path.to_string_lossy()).parse();
        assert!(diagnostics.is_empty());
        seed_module(path, ast)
    }

    #[test]
    fn test_leaves_before_dependents() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            &root.join("main.qd"),
            "use a\nfn main( -- ) { a::go }\n",
        );
        write(&root.join("a/module.qd"), "use b\nfn go( -- ) { b::go }\n");
        write(&root.join("b/module.qd"), "fn go( -- ) { }\n");

        let seed = parse_seed(&root.join("main.qd"));
        let mut resolver = Resolver::new(SearchConfig::default());
        let modules = resolver.resolve(&[seed]).unwrap();

        let names: Vec<&str> = modules.iter().map(|m| m.logical_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        // generator consumes in reverse: b (leaf) first, then a
        let reversed: Vec<&str> = modules.iter().rev().map(|m| m.logical_name.as_str()).collect();
        assert_eq!(reversed, vec!["b", "a"]);
    }

    #[test]
    fn test_qd_import_from_standalone_file_gets_filename_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            &root.join("main.qd"),
            "use \"calculator.qd\"\nfn main( -- ) { calculator::compute }\n",
        );
        write(&root.join("calculator.qd"), "fn compute( -- ) { }\n");

        let seed = parse_seed(&root.join("main.qd"));
        let mut resolver = Resolver::new(SearchConfig::default());
        let modules = resolver.resolve(&[seed]).unwrap();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].package_namespace, "calculator");
    }

    #[test]
    fn test_qd_import_from_directory_module_inherits_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            &root.join("main.qd"),
            "use split\nfn main( -- ) { split::top }\n",
        );
        write(
            &root.join("split/module.qd"),
            "use \"helper.qd\"\nfn top( -- ) { }\n",
        );
        write(&root.join("split/helper.qd"), "fn helper_fn( -- ) { }\n");

        let seed = parse_seed(&root.join("main.qd"));
        let mut resolver = Resolver::new(SearchConfig::default());
        let modules = resolver.resolve(&[seed]).unwrap();
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].logical_name, "split");
        assert_eq!(modules[1].logical_name, "helper.qd");
        // helper.qd belongs to the split module's namespace
        assert_eq!(modules[1].package_namespace, "split");
    }

    #[test]
    fn test_duplicate_imports_processed_once() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            &root.join("main.qd"),
            "use a\nuse b\nfn main( -- ) { }\n",
        );
        write(&root.join("a/module.qd"), "use shared\nfn fa( -- ) { }\n");
        write(&root.join("b/module.qd"), "use shared\nfn fb( -- ) { }\n");
        write(&root.join("shared/module.qd"), "fn fs( -- ) { }\n");

        let seed = parse_seed(&root.join("main.qd"));
        let mut resolver = Resolver::new(SearchConfig::default());
        let modules = resolver.resolve(&[seed]).unwrap();
        let shared_count = modules
            .iter()
            .filter(|m| m.logical_name == "shared")
            .count();
        assert_eq!(shared_count, 1);
    }

    #[test]
    #[serial]
    fn test_package_lookup_with_pinned_version() {
        let dir = tempfile::tempdir().unwrap();
        let packages = dir.path().join("packages");
        write(
            &packages.join("color@1.0.0/module.qd"),
            "fn red( -- ) { }\n",
        );
        write(
            &packages.join("color@2.0.0/module.qd"),
            "fn red( -- ) { }\n",
        );

        let mut config = SearchConfig {
            packages_dir_override: Some(packages.clone()),
            ..Default::default()
        };
        config
            .version_pins
            .insert("color".to_string(), "1.0.0".to_string());

        let found = find_module_file("color", dir.path(), &config).unwrap();
        assert!(found.to_string_lossy().contains("color@1.0.0"));

        // a pin that matches nothing finds nothing
        config
            .version_pins
            .insert("color".to_string(), "9.9.9".to_string());
        assert!(find_module_file("color", dir.path(), &config).is_none());
    }

    #[test]
    #[serial]
    fn test_package_lib_dir_detection() {
        let dir = tempfile::tempdir().unwrap();
        let packages = dir.path().join("packages");
        write(
            &packages.join("color@1.0.0/module.qd"),
            "fn red( -- ) { }\n",
        );
        fs::create_dir_all(packages.join("color@1.0.0/lib")).unwrap();
        write(
            &dir.path().join("main.qd"),
            "use color\nfn main( -- ) { }\n",
        );

        let config = SearchConfig {
            packages_dir_override: Some(packages),
            ..Default::default()
        };
        let seed = parse_seed(&dir.path().join("main.qd"));
        let mut resolver = Resolver::new(config);
        let modules = resolver.resolve(&[seed]).unwrap();
        assert_eq!(modules.len(), 1);
        let package_dir = modules[0].package_directory.as_ref().unwrap();
        assert!(package_dir.to_string_lossy().contains("color@1.0.0"));
    }

    #[test]
    fn test_missing_module_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("main.qd"),
            "use nowhere\nfn main( -- ) { }\n",
        );
        let seed = parse_seed(&dir.path().join("main.qd"));
        let mut resolver = Resolver::new(SearchConfig::default());
        let modules = resolver.resolve(&[seed]).unwrap();
        assert!(modules.is_empty());
    }

    #[test]
    fn test_relative_dot_path_import() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            &root.join("src/main.qd"),
            "use \"../shared/util.qd\"\nfn main( -- ) { util::helper }\n",
        );
        write(&root.join("shared/util.qd"), "fn helper( -- ) { }\n");

        let seed = parse_seed(&root.join("src/main.qd"));
        let mut resolver = Resolver::new(SearchConfig::default());
        let modules = resolver.resolve(&[seed]).unwrap();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].package_namespace, "util");
    }
}
