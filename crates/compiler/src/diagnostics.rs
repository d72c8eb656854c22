//! Compile-time diagnostics.
//!
//! Every diagnostic carries kind, message, filename, and a 1-based
//! position. The validator collects them in a sink that either prints as
//! it goes (CLI) or stores for later retrieval (LSP embedding).

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Lexical,
    Syntactic,
    Semantic,
    Resolution,
    Internal,
}

impl DiagnosticKind {
    pub fn label(self) -> &'static str {
        match self {
            DiagnosticKind::Lexical => "lexical error",
            DiagnosticKind::Syntactic => "syntax error",
            DiagnosticKind::Semantic => "error",
            DiagnosticKind::Resolution => "error",
            DiagnosticKind::Internal => "internal error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub message: String,
    pub filename: String,
    /// 1-based line.
    pub line: usize,
    /// 1-based column.
    pub column: usize,
}

impl Diagnostic {
    pub fn error(
        kind: DiagnosticKind,
        message: String,
        filename: &str,
        line: usize,
        column: usize,
    ) -> Self {
        Diagnostic {
            kind,
            severity: Severity::Error,
            message,
            filename: filename.to_string(),
            line,
            column,
        }
    }

    pub fn warning(message: String, filename: &str, line: usize, column: usize) -> Self {
        Diagnostic {
            kind: DiagnosticKind::Semantic,
            severity: Severity::Warning,
            message,
            filename: filename.to_string(),
            line,
            column,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Error => self.kind.label(),
            Severity::Warning => "warning",
        };
        write!(
            f,
            "{}:{}:{}: {}: {}",
            self.filename, self.line, self.column, label, self.message
        )
    }
}

/// Where diagnostics go: printed immediately or stored for a host (the
/// LSP keeps them; the CLI prints).
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    store: bool,
    pub diagnostics: Vec<Diagnostic>,
    errors: usize,
    warnings: usize,
}

impl DiagnosticSink {
    /// A sink that prints each diagnostic to stderr as it is reported.
    pub fn printing() -> Self {
        DiagnosticSink {
            store: false,
            ..Default::default()
        }
    }

    /// A sink that stores diagnostics for later retrieval.
    pub fn storing() -> Self {
        DiagnosticSink {
            store: true,
            ..Default::default()
        }
    }

    pub fn report(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
        }
        if self.store {
            self.diagnostics.push(diagnostic);
        } else {
            eprintln!("{}", diagnostic);
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn warning_count(&self) -> usize {
        self.warnings
    }
}
