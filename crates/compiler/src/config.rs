//! Compile-time options threaded from the CLI through the pipeline.
//!
//! The only compile-time configuration is this struct: module version
//! pins travel inside it to the resolver (there is no process-wide
//! state).

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// `-O0` through `-O3`.
    pub optimization_level: u8,
    /// `-g`: line markers in the emitted IR.
    pub debug_info: bool,
    /// `--werror`: implicit-cast warnings become errors.
    pub werror: bool,
    /// `--dump-tokens`: print the token stream of each source file.
    pub dump_tokens: bool,
    /// `--dump-ir`: print the generated IR module.
    pub dump_ir: bool,
    /// `-l name@version` pins consulted during package lookup.
    pub version_pins: HashMap<String, String>,
    /// `--save-temps`: directory that receives the intermediate `.ll`
    /// module.
    pub save_ir_dir: Option<std::path::PathBuf>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            optimization_level: 0,
            debug_info: false,
            werror: false,
            dump_tokens: false,
            dump_ir: false,
            version_pins: HashMap::new(),
            save_ir_dir: None,
        }
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one `module@version` pin (the `-l` argument format).
    pub fn parse_pin(spec: &str) -> Result<(String, String), String> {
        match spec.split_once('@') {
            Some((module, version)) if !module.is_empty() && !version.is_empty() => {
                Ok((module.to_string(), version.to_string()))
            }
            _ => Err(format!(
                "invalid format for '-l': '{}' (expected module@version, e.g. color@1.0.0)",
                spec
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pin() {
        assert_eq!(
            CompileOptions::parse_pin("color@1.0.0").unwrap(),
            ("color".to_string(), "1.0.0".to_string())
        );
        assert!(CompileOptions::parse_pin("color").is_err());
        assert!(CompileOptions::parse_pin("@1.0.0").is_err());
        assert!(CompileOptions::parse_pin("color@").is_err());
    }
}
