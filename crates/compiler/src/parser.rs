//! Recursive-descent parser for Quadrate.
//!
//! The language is stack-based, so there is no operator precedence:
//! statements are a textual sequence of pushes and calls. The parser
//! reports syntax errors with positions, resynchronizes at the next
//! top-level keyword (or the matching `}` of the enclosing block), and
//! returns a partial AST plus an error count so later phases can refuse
//! to proceed.

use crate::ast::{
    AstKind, AstNode, CastDirection, Field, ImportedFunction, LiteralKind, Parameter,
};
use crate::builtins;
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::lexer::{Lexer, Token, TokenKind};

const TOP_LEVEL_KEYWORDS: &[&str] = &["fn", "use", "import", "const", "struct", "pub"];

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    filename: String,
    diagnostics: Vec<Diagnostic>,
}

impl Parser {
    pub fn new(source: &str, filename: &str) -> Self {
        let (tokens, lex_diagnostics) = Lexer::new(source, filename).tokenize();
        Parser {
            tokens,
            pos: 0,
            filename: filename.to_string(),
            diagnostics: lex_diagnostics,
        }
    }

    /// Parse a whole program. Always returns a (possibly partial) AST;
    /// the error count tells callers whether to proceed.
    pub fn parse(mut self) -> (AstNode, Vec<Diagnostic>) {
        let mut program = AstNode::new(AstKind::Program, 1, 1);

        while !self.is_at_end() {
            let parsed = match self.current_text() {
                Some("use") => self.parse_use(),
                Some("import") => self.parse_import(),
                Some("const") => self.parse_const(),
                Some("struct") | Some("pub") => self.parse_struct(),
                Some("fn") => self.parse_function(),
                _ => {
                    let (line, column, text) = self.current_position_text();
                    self.error(
                        format!("unexpected token '{}' at top level", text),
                        line,
                        column,
                    );
                    self.advance();
                    self.recover_to_top_level();
                    None
                }
            };
            if let Some(node) = parsed {
                program.children.push(node);
            }
        }

        rewrite_struct_constructions(&mut program);
        (program, self.diagnostics)
    }

    // -- token helpers -----------------------------------------------------

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn current_text(&self) -> Option<&str> {
        self.current().map(|t| t.text.as_str())
    }

    fn current_position_text(&self) -> (usize, usize, String) {
        match self.current() {
            Some(t) => (t.line, t.column, t.text.clone()),
            None => {
                let (line, column) = self.last_position();
                (line, column, "<end of file>".to_string())
            }
        }
    }

    fn last_position(&self) -> (usize, usize) {
        self.tokens
            .last()
            .map(|t| (t.line, t.column))
            .unwrap_or((1, 1))
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, text: &str) -> bool {
        self.current().map(|t| t.is(text)).unwrap_or(false)
    }

    fn consume(&mut self, text: &str) -> bool {
        if self.check(text) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, text: &str, context: &str) -> bool {
        if self.consume(text) {
            return true;
        }
        let (line, column, found) = self.current_position_text();
        self.error(
            format!("expected '{}' {}, got '{}'", text, context, found),
            line,
            column,
        );
        false
    }

    fn error(&mut self, message: String, line: usize, column: usize) {
        self.diagnostics.push(Diagnostic::error(
            DiagnosticKind::Syntactic,
            message,
            &self.filename,
            line,
            column,
        ));
    }

    /// Skip forward to the next top-level keyword.
    fn recover_to_top_level(&mut self) {
        while let Some(tok) = self.current() {
            if tok.kind == TokenKind::Keyword && TOP_LEVEL_KEYWORDS.contains(&tok.text.as_str()) {
                return;
            }
            self.pos += 1;
        }
    }

    /// Skip to the matching `}` of a block whose `{` was already consumed.
    fn recover_to_block_end(&mut self) {
        let mut depth = 1usize;
        while let Some(tok) = self.current() {
            if tok.is("{") {
                depth += 1;
            } else if tok.is("}") {
                depth -= 1;
                if depth == 0 {
                    self.pos += 1;
                    return;
                }
            }
            self.pos += 1;
        }
    }

    // -- top-level items ---------------------------------------------------

    fn parse_use(&mut self) -> Option<AstNode> {
        let (line, column, _) = self.current_position_text();
        self.consume("use");
        match self.current() {
            Some(tok)
                if tok.kind == TokenKind::Identifier
                    || tok.kind == TokenKind::StringLiteral =>
            {
                let module = tok.text.clone();
                self.advance();
                Some(AstNode::new(AstKind::Use { module }, line, column))
            }
            _ => {
                let (eline, ecolumn, found) = self.current_position_text();
                self.error(
                    format!("expected module name after 'use', got '{}'", found),
                    eline,
                    ecolumn,
                );
                self.recover_to_top_level();
                None
            }
        }
    }

    fn parse_import(&mut self) -> Option<AstNode> {
        let (line, column, _) = self.current_position_text();
        self.consume("import");

        let library = match self.current() {
            Some(tok) if tok.kind == TokenKind::StringLiteral => {
                let lib = tok.text.clone();
                self.advance();
                lib
            }
            _ => {
                let (eline, ecolumn, found) = self.current_position_text();
                self.error(
                    format!("expected library string after 'import', got '{}'", found),
                    eline,
                    ecolumn,
                );
                self.recover_to_top_level();
                return None;
            }
        };

        if !self.expect("as", "after import library") {
            self.recover_to_top_level();
            return None;
        }

        let namespace = match self.current() {
            Some(tok) if tok.kind == TokenKind::Identifier => {
                let ns = tok.text.clone();
                self.advance();
                ns
            }
            _ => {
                let (eline, ecolumn, found) = self.current_position_text();
                self.error(
                    format!("expected namespace after 'as', got '{}'", found),
                    eline,
                    ecolumn,
                );
                self.recover_to_top_level();
                return None;
            }
        };

        if !self.expect("{", "to open import block") {
            self.recover_to_top_level();
            return None;
        }

        let mut functions = Vec::new();
        while !self.check("}") {
            if self.is_at_end() {
                let (eline, ecolumn) = self.last_position();
                self.error("unterminated import block".to_string(), eline, ecolumn);
                break;
            }
            if !self.check("fn") {
                let (eline, ecolumn, found) = self.current_position_text();
                self.error(
                    format!("expected 'fn' in import block, got '{}'", found),
                    eline,
                    ecolumn,
                );
                self.advance();
                continue;
            }
            if let Some(func) = self.parse_imported_function() {
                functions.push(func);
            }
        }
        self.consume("}");

        Some(AstNode::new(
            AstKind::Import {
                library,
                namespace,
                functions,
            },
            line,
            column,
        ))
    }

    fn parse_imported_function(&mut self) -> Option<ImportedFunction> {
        let (line, column, _) = self.current_position_text();
        self.consume("fn");
        let name = self.expect_identifier("imported function name")?;
        let (inputs, outputs) = self.parse_signature()?;
        let throws = self.consume("!");
        Some(ImportedFunction {
            name,
            inputs,
            outputs,
            throws,
            line,
            column,
        })
    }

    fn parse_const(&mut self) -> Option<AstNode> {
        let (line, column, _) = self.current_position_text();
        self.consume("const");
        let name = self.expect_identifier("constant name")?;
        if !self.expect("=", "after constant name") {
            self.recover_to_top_level();
            return None;
        }
        let (value_kind, value_text) = self.parse_literal_value()?;
        Some(AstNode::new(
            AstKind::Constant {
                name,
                value_kind,
                value_text,
            },
            line,
            column,
        ))
    }

    fn parse_struct(&mut self) -> Option<AstNode> {
        let (line, column, _) = self.current_position_text();
        let is_public = self.consume("pub");
        if !self.expect("struct", "after 'pub'") {
            self.recover_to_top_level();
            return None;
        }
        let name = self.expect_identifier("struct name")?;
        if !self.expect("{", "to open struct body") {
            self.recover_to_top_level();
            return None;
        }

        let mut fields = Vec::new();
        while !self.check("}") {
            if self.is_at_end() {
                let (eline, ecolumn) = self.last_position();
                self.error(format!("unterminated struct '{}'", name), eline, ecolumn);
                break;
            }
            let field_name = match self.expect_identifier("field name") {
                Some(n) => n,
                None => {
                    self.advance();
                    continue;
                }
            };
            if !self.expect(":", "after field name") {
                continue;
            }
            let type_name = match self.expect_identifier("field type") {
                Some(t) => normalize_type(&t),
                None => continue,
            };
            fields.push(Field {
                name: field_name,
                type_name,
            });
            self.consume(",");
        }
        self.consume("}");

        Some(AstNode::new(
            AstKind::StructDecl {
                name,
                is_public,
                fields,
            },
            line,
            column,
        ))
    }

    fn parse_function(&mut self) -> Option<AstNode> {
        let (line, column, _) = self.current_position_text();
        self.consume("fn");
        let name = match self.expect_identifier("function name") {
            Some(n) => n,
            None => {
                self.recover_to_top_level();
                return None;
            }
        };
        let (inputs, outputs) = match self.parse_signature() {
            Some(sig) => sig,
            None => {
                self.recover_to_top_level();
                return None;
            }
        };
        let throws = self.consume("!");

        let mut node = AstNode::new(
            AstKind::Function {
                name,
                inputs,
                outputs,
                throws,
            },
            line,
            column,
        );
        let body = self.parse_block()?;
        node.children.push(body);
        Some(node)
    }

    /// `( params -- params )` — the `--` separator is optional when there
    /// are no outputs.
    fn parse_signature(&mut self) -> Option<(Vec<Parameter>, Vec<Parameter>)> {
        if !self.expect("(", "to open signature") {
            return None;
        }
        let inputs = self.parse_parameter_list(false);
        let outputs = if self.consume("--") {
            self.parse_parameter_list(true)
        } else {
            Vec::new()
        };
        if !self.expect(")", "to close signature") {
            return None;
        }
        Some((inputs, outputs))
    }

    fn parse_parameter_list(&mut self, is_output: bool) -> Vec<Parameter> {
        let mut params = Vec::new();
        loop {
            match self.current() {
                Some(tok) if tok.kind == TokenKind::Identifier => {
                    let line = tok.line;
                    let column = tok.column;
                    let name = tok.text.clone();
                    self.advance();
                    let type_name = if self.consume(":") {
                        match self.current() {
                            Some(t) if t.kind == TokenKind::Identifier => {
                                let ty = normalize_type(&t.text);
                                self.advance();
                                ty
                            }
                            _ => String::new(),
                        }
                    } else {
                        String::new()
                    };
                    params.push(Parameter {
                        name,
                        type_name,
                        is_output,
                        line,
                        column,
                    });
                    self.consume(",");
                }
                _ => break,
            }
        }
        params
    }

    fn parse_block(&mut self) -> Option<AstNode> {
        let (line, column, _) = self.current_position_text();
        if !self.expect("{", "to open block") {
            self.recover_to_top_level();
            return None;
        }
        let mut block = AstNode::new(AstKind::Block, line, column);
        while !self.check("}") {
            if self.is_at_end() {
                let (eline, ecolumn) = self.last_position();
                self.error("missing '}' to close block".to_string(), eline, ecolumn);
                return Some(block);
            }
            match self.parse_statement() {
                Some(stmt) => block.children.push(stmt),
                None => {
                    // parse_statement reported; skip the offender
                    self.advance();
                }
            }
        }
        self.consume("}");
        Some(block)
    }

    fn parse_statement(&mut self) -> Option<AstNode> {
        let tok = self.current()?.clone();
        match tok.kind {
            TokenKind::Number => {
                self.advance();
                Some(make_number_literal(&tok, false))
            }
            TokenKind::StringLiteral => {
                self.advance();
                Some(AstNode::new(
                    AstKind::Literal {
                        kind: LiteralKind::String,
                        text: tok.text.clone(),
                    },
                    tok.line,
                    tok.column,
                ))
            }
            TokenKind::Keyword => self.parse_keyword_statement(&tok),
            TokenKind::ScopedIdentifier => {
                self.advance();
                let (scope, name) = split_scoped(&tok.text);
                let (abort_on_error, check_error) = self.parse_call_suffix();
                Some(AstNode::new(
                    AstKind::ScopedIdentifier {
                        scope,
                        name,
                        abort_on_error,
                        check_error,
                        parameter_casts: Vec::new(),
                    },
                    tok.line,
                    tok.column,
                ))
            }
            TokenKind::Identifier => {
                self.advance();
                // `v @field` reads a struct field out of a local
                if self.check("@") {
                    let at_pos = self.pos;
                    self.advance();
                    match self.current() {
                        Some(field_tok) if field_tok.kind == TokenKind::Identifier => {
                            let field_name = field_tok.text.clone();
                            self.advance();
                            return Some(AstNode::new(
                                AstKind::FieldAccess {
                                    var_name: tok.text.clone(),
                                    field_name,
                                },
                                tok.line,
                                tok.column,
                            ));
                        }
                        _ => {
                            self.pos = at_pos;
                        }
                    }
                }
                if builtins::is_builtin(&tok.text) {
                    return Some(AstNode::new(
                        AstKind::Instruction {
                            name: tok.text.clone(),
                        },
                        tok.line,
                        tok.column,
                    ));
                }
                let (abort_on_error, check_error) = self.parse_call_suffix();
                Some(AstNode::new(
                    AstKind::Identifier {
                        name: tok.text.clone(),
                        abort_on_error,
                        check_error,
                        parameter_casts: Vec::new(),
                    },
                    tok.line,
                    tok.column,
                ))
            }
            TokenKind::Operator => self.parse_operator_statement(&tok),
        }
    }

    fn parse_keyword_statement(&mut self, tok: &Token) -> Option<AstNode> {
        match tok.text.as_str() {
            "if" => {
                self.advance();
                let mut node = AstNode::new(AstKind::If, tok.line, tok.column);
                node.children.push(self.parse_block()?);
                if self.consume("else") {
                    node.children.push(self.parse_block()?);
                }
                Some(node)
            }
            "for" => {
                self.advance();
                let mut node = AstNode::new(
                    AstKind::For {
                        loop_var: "$".to_string(),
                    },
                    tok.line,
                    tok.column,
                );
                node.children.push(self.parse_block()?);
                Some(node)
            }
            "loop" => {
                self.advance();
                let mut node = AstNode::new(AstKind::Loop, tok.line, tok.column);
                node.children.push(self.parse_block()?);
                Some(node)
            }
            "switch" => self.parse_switch(tok),
            "break" => {
                self.advance();
                Some(AstNode::new(AstKind::Break, tok.line, tok.column))
            }
            "continue" => {
                self.advance();
                Some(AstNode::new(AstKind::Continue, tok.line, tok.column))
            }
            "return" => {
                self.advance();
                Some(AstNode::new(AstKind::Return, tok.line, tok.column))
            }
            "defer" => {
                self.advance();
                let mut node = AstNode::new(AstKind::Defer, tok.line, tok.column);
                node.children.push(self.parse_block()?);
                Some(node)
            }
            "ctx" => {
                self.advance();
                if !self.expect("{", "to open ctx block") {
                    return None;
                }
                let mut node = AstNode::new(AstKind::Ctx, tok.line, tok.column);
                while !self.check("}") {
                    if self.is_at_end() {
                        let (eline, ecolumn) = self.last_position();
                        self.error("missing '}' to close ctx block".to_string(), eline, ecolumn);
                        return Some(node);
                    }
                    match self.parse_statement() {
                        Some(stmt) => node.children.push(stmt),
                        None => {
                            self.advance();
                        }
                    }
                }
                self.consume("}");
                Some(node)
            }
            "local" => {
                self.advance();
                let name = self.expect_identifier("local variable name")?;
                let type_name = if self.consume(":") {
                    self.expect_identifier("local variable type")
                        .map(|t| normalize_type(&t))
                        .unwrap_or_default()
                } else {
                    String::new()
                };
                Some(AstNode::new(
                    AstKind::Local { name, type_name },
                    tok.line,
                    tok.column,
                ))
            }
            other => {
                self.error(
                    format!("unexpected keyword '{}' in function body", other),
                    tok.line,
                    tok.column,
                );
                None
            }
        }
    }

    fn parse_switch(&mut self, tok: &Token) -> Option<AstNode> {
        self.advance(); // switch
        if !self.expect("{", "to open switch block") {
            return None;
        }
        let mut node = AstNode::new(AstKind::Switch, tok.line, tok.column);
        while !self.check("}") {
            if self.is_at_end() {
                let (eline, ecolumn) = self.last_position();
                self.error("unterminated switch statement".to_string(), eline, ecolumn);
                return Some(node);
            }
            if self.check("case") {
                let (cline, ccolumn, _) = self.current_position_text();
                self.advance();
                let value = self.parse_case_value();
                let mut case = AstNode::new(
                    AstKind::Case {
                        value,
                        is_default: false,
                    },
                    cline,
                    ccolumn,
                );
                case.children.push(self.parse_block()?);
                node.children.push(case);
            } else if self.check("default") {
                let (cline, ccolumn, _) = self.current_position_text();
                self.advance();
                let mut case = AstNode::new(
                    AstKind::Case {
                        value: None,
                        is_default: true,
                    },
                    cline,
                    ccolumn,
                );
                case.children.push(self.parse_block()?);
                node.children.push(case);
            } else {
                let (eline, ecolumn, found) = self.current_position_text();
                self.error(
                    format!("expected 'case' or 'default' in switch, got '{}'", found),
                    eline,
                    ecolumn,
                );
                self.advance();
            }
        }
        self.consume("}");
        Some(node)
    }

    fn parse_case_value(&mut self) -> Option<i64> {
        let negative = self.check("-") && {
            // the sign must be directly attached to the number
            let minus = self.current().cloned();
            let next = self.tokens.get(self.pos + 1).cloned();
            match (minus, next) {
                (Some(m), Some(n)) if n.kind == TokenKind::Number => {
                    m.line == n.line && m.column + 1 == n.column
                }
                _ => false,
            }
        };
        if negative {
            self.advance();
        }
        match self.current() {
            Some(tok) if tok.kind == TokenKind::Number && !tok.text.contains('.') => {
                let value: i64 = tok.text.parse().unwrap_or(0);
                self.advance();
                Some(if negative { -value } else { value })
            }
            _ => {
                let (line, column, found) = self.current_position_text();
                self.error(
                    format!("expected integer case value, got '{}'", found),
                    line,
                    column,
                );
                None
            }
        }
    }

    fn parse_operator_statement(&mut self, tok: &Token) -> Option<AstNode> {
        match tok.text.as_str() {
            "&" => {
                self.advance();
                match self.current() {
                    Some(next)
                        if next.kind == TokenKind::Identifier
                            || next.kind == TokenKind::ScopedIdentifier =>
                    {
                        let function_name = next.text.clone();
                        self.advance();
                        Some(AstNode::new(
                            AstKind::FunctionPointer { function_name },
                            tok.line,
                            tok.column,
                        ))
                    }
                    _ => {
                        let (line, column, found) = self.current_position_text();
                        self.error(
                            format!("expected function name after '&', got '{}'", found),
                            line,
                            column,
                        );
                        None
                    }
                }
            }
            "-" => {
                // a minus directly attached to a number is a negative literal
                if let Some(next) = self.tokens.get(self.pos + 1) {
                    if next.kind == TokenKind::Number
                        && next.line == tok.line
                        && next.column == tok.column + 1
                    {
                        let next = next.clone();
                        self.advance();
                        self.advance();
                        return Some(make_number_literal(&next, true));
                    }
                }
                self.advance();
                Some(AstNode::new(
                    AstKind::Instruction {
                        name: "-".to_string(),
                    },
                    tok.line,
                    tok.column,
                ))
            }
            "+" | "*" | "/" | "%" | "==" | "!=" | "<" | ">" | "<=" | ">=" | "." => {
                self.advance();
                Some(AstNode::new(
                    AstKind::Instruction {
                        name: tok.text.clone(),
                    },
                    tok.line,
                    tok.column,
                ))
            }
            other => {
                self.error(
                    format!("unexpected token '{}' in function body", other),
                    tok.line,
                    tok.column,
                );
                None
            }
        }
    }

    fn parse_call_suffix(&mut self) -> (bool, bool) {
        if self.consume("!") {
            (true, false)
        } else if self.consume("?") {
            (false, true)
        } else {
            (false, false)
        }
    }

    fn parse_literal_value(&mut self) -> Option<(LiteralKind, String)> {
        let negative = self.check("-");
        if negative {
            self.advance();
        }
        match self.current().cloned() {
            Some(tok) if tok.kind == TokenKind::Number => {
                self.advance();
                let kind = if tok.text.contains('.') {
                    LiteralKind::Float
                } else {
                    LiteralKind::Integer
                };
                let text = if negative {
                    format!("-{}", tok.text)
                } else {
                    tok.text.clone()
                };
                Some((kind, text))
            }
            Some(tok) if tok.kind == TokenKind::StringLiteral && !negative => {
                self.advance();
                Some((LiteralKind::String, tok.text.clone()))
            }
            _ => {
                let (line, column, found) = self.current_position_text();
                self.error(format!("expected literal, got '{}'", found), line, column);
                None
            }
        }
    }

    fn expect_identifier(&mut self, what: &str) -> Option<String> {
        match self.current() {
            Some(tok) if tok.kind == TokenKind::Identifier => {
                let name = tok.text.clone();
                self.advance();
                Some(name)
            }
            _ => {
                let (line, column, found) = self.current_position_text();
                self.error(format!("expected {}, got '{}'", what, found), line, column);
                None
            }
        }
    }
}

/// `i64`/`f64` are accepted spellings of the short codes.
fn normalize_type(type_name: &str) -> String {
    match type_name {
        "i64" => "i".to_string(),
        "f64" => "f".to_string(),
        other => other.to_string(),
    }
}

fn split_scoped(text: &str) -> (String, String) {
    match text.split_once("::") {
        Some((scope, name)) => (scope.to_string(), name.to_string()),
        None => (String::new(), text.to_string()),
    }
}

fn make_number_literal(tok: &Token, negative: bool) -> AstNode {
    let kind = if tok.text.contains('.') {
        LiteralKind::Float
    } else {
        LiteralKind::Integer
    };
    let text = if negative {
        format!("-{}", tok.text)
    } else {
        tok.text.clone()
    };
    AstNode::new(AstKind::Literal { kind, text }, tok.line, tok.column)
}

/// Identifiers that name a struct declared in the same module become
/// struct constructions. Runs once over the finished program so structs
/// declared after their first use still resolve.
fn rewrite_struct_constructions(program: &mut AstNode) {
    let struct_names: Vec<String> = program
        .children
        .iter()
        .filter_map(|child| match &child.kind {
            AstKind::StructDecl { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect();
    if struct_names.is_empty() {
        return;
    }
    rewrite_node(program, &struct_names);
}

fn rewrite_node(node: &mut AstNode, struct_names: &[String]) {
    if let AstKind::Identifier { name, .. } = &node.kind {
        if struct_names.iter().any(|s| s == name) {
            node.kind = AstKind::StructConstruction {
                struct_name: name.clone(),
            };
        }
    }
    for child in &mut node.children {
        rewrite_node(child, struct_names);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> AstNode {
        let (ast, diagnostics) = Parser::new(src, "test.qd").parse();
        assert!(
            diagnostics.is_empty(),
            "unexpected diagnostics: {:?}",
            diagnostics
        );
        ast
    }

    fn parse_err(src: &str) -> (AstNode, usize) {
        let (ast, diagnostics) = Parser::new(src, "test.qd").parse();
        (ast, diagnostics.len())
    }

    #[test]
    fn test_parse_simple_function() {
        let ast = parse_ok("fn main( -- ) { 2 3 add print }");
        assert_eq!(ast.child_count(), 1);
        let func = ast.child(0).unwrap();
        match &func.kind {
            AstKind::Function { name, inputs, outputs, throws } => {
                assert_eq!(name, "main");
                assert!(inputs.is_empty());
                assert!(outputs.is_empty());
                assert!(!throws);
            }
            other => panic!("expected function, got {:?}", other),
        }
        let body = func.child(0).unwrap();
        assert_eq!(body.child_count(), 4);
        assert!(matches!(
            &body.child(2).unwrap().kind,
            AstKind::Instruction { name } if name == "add"
        ));
    }

    #[test]
    fn test_parse_signature_without_separator() {
        let ast = parse_ok("fn main() { }");
        let func = ast.child(0).unwrap();
        assert!(matches!(&func.kind, AstKind::Function { inputs, outputs, .. }
            if inputs.is_empty() && outputs.is_empty()));
    }

    #[test]
    fn test_parse_typed_signature() {
        let ast = parse_ok("fn sq(x:i -- r:i) { dup mul }");
        let func = ast.child(0).unwrap();
        match &func.kind {
            AstKind::Function { inputs, outputs, .. } => {
                assert_eq!(inputs.len(), 1);
                assert_eq!(inputs[0].name, "x");
                assert_eq!(inputs[0].type_name, "i");
                assert!(!inputs[0].is_output);
                assert_eq!(outputs.len(), 1);
                assert!(outputs[0].is_output);
            }
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_long_type_codes_normalize() {
        let ast = parse_ok("fn addf(a:f64 b:f64 -- r:f64) { + }");
        let func = ast.child(0).unwrap();
        match &func.kind {
            AstKind::Function { inputs, outputs, .. } => {
                assert_eq!(inputs[0].type_name, "f");
                assert_eq!(inputs[1].type_name, "f");
                assert_eq!(outputs[0].type_name, "f");
            }
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_fallible_function_and_call_suffixes() {
        let ast = parse_ok("fn might( -- ) ! { error }\nfn main( -- ) { might ? might! }");
        let might = ast.child(0).unwrap();
        assert!(matches!(&might.kind, AstKind::Function { throws: true, .. }));
        let body = ast.child(1).unwrap().child(0).unwrap();
        assert!(matches!(
            &body.child(0).unwrap().kind,
            AstKind::Identifier { check_error: true, abort_on_error: false, .. }
        ));
        assert!(matches!(
            &body.child(1).unwrap().kind,
            AstKind::Identifier { abort_on_error: true, .. }
        ));
    }

    #[test]
    fn test_negative_literal_is_syntactic() {
        let ast = parse_ok("fn main( -- ) { -5 5 - }");
        let body = ast.child(0).unwrap().child(0).unwrap();
        assert!(matches!(
            &body.child(0).unwrap().kind,
            AstKind::Literal { kind: LiteralKind::Integer, text } if text == "-5"
        ));
        assert!(matches!(
            &body.child(1).unwrap().kind,
            AstKind::Literal { text, .. } if text == "5"
        ));
        assert!(matches!(
            &body.child(2).unwrap().kind,
            AstKind::Instruction { name } if name == "-"
        ));
    }

    #[test]
    fn test_if_else() {
        let ast = parse_ok("fn main( -- ) { 1 if { 2 print } else { 3 print } }");
        let body = ast.child(0).unwrap().child(0).unwrap();
        let if_node = body.child(1).unwrap();
        assert!(matches!(if_node.kind, AstKind::If));
        assert_eq!(if_node.child_count(), 2);
    }

    #[test]
    fn test_for_loop_with_iterator() {
        let ast = parse_ok("fn main( -- ) { 0 10 1 for { $ print } }");
        let body = ast.child(0).unwrap().child(0).unwrap();
        let for_node = body.child(3).unwrap();
        assert!(matches!(&for_node.kind, AstKind::For { loop_var } if loop_var == "$"));
        let loop_body = for_node.child(0).unwrap();
        assert!(matches!(
            &loop_body.child(0).unwrap().kind,
            AstKind::Identifier { name, .. } if name == "$"
        ));
    }

    #[test]
    fn test_switch_cases() {
        let ast = parse_ok(
            "fn main( -- ) { 2 switch { case 1 { \"one\" prints } case 2 { \"two\" prints } default { \"many\" prints } } }",
        );
        let body = ast.child(0).unwrap().child(0).unwrap();
        let switch = body.child(1).unwrap();
        assert!(matches!(switch.kind, AstKind::Switch));
        assert_eq!(switch.child_count(), 3);
        assert!(matches!(
            &switch.child(0).unwrap().kind,
            AstKind::Case { value: Some(1), is_default: false }
        ));
        assert!(matches!(
            &switch.child(2).unwrap().kind,
            AstKind::Case { value: None, is_default: true }
        ));
    }

    #[test]
    fn test_use_and_scoped_call() {
        let ast = parse_ok("use std\nfn main( -- ) { \"hello\\n\" std::printf }");
        assert!(matches!(
            &ast.child(0).unwrap().kind,
            AstKind::Use { module } if module == "std"
        ));
        let body = ast.child(1).unwrap().child(0).unwrap();
        assert!(matches!(
            &body.child(1).unwrap().kind,
            AstKind::ScopedIdentifier { scope, name, .. } if scope == "std" && name == "printf"
        ));
    }

    #[test]
    fn test_use_direct_file_path() {
        let ast = parse_ok("use \"./calculator.qd\"");
        assert!(matches!(
            &ast.child(0).unwrap().kind,
            AstKind::Use { module } if module == "./calculator.qd"
        ));
    }

    #[test]
    fn test_import_block() {
        let ast = parse_ok(
            "import \"libstdqd.so\" as std {\n  fn printf(fmt:s -- )\n  fn input( -- line:s)\n}",
        );
        match &ast.child(0).unwrap().kind {
            AstKind::Import { library, namespace, functions } => {
                assert_eq!(library, "libstdqd.so");
                assert_eq!(namespace, "std");
                assert_eq!(functions.len(), 2);
                assert_eq!(functions[0].name, "printf");
                assert_eq!(functions[0].inputs.len(), 1);
                assert_eq!(functions[1].outputs.len(), 1);
            }
            other => panic!("expected import, got {:?}", other),
        }
    }

    #[test]
    fn test_const_declaration() {
        let ast = parse_ok("const LIMIT = 100\nconst PI = 3.14\nconst GREETING = \"hi\"");
        assert!(matches!(
            &ast.child(0).unwrap().kind,
            AstKind::Constant { name, value_text, value_kind: LiteralKind::Integer }
                if name == "LIMIT" && value_text == "100"
        ));
        assert!(matches!(
            &ast.child(1).unwrap().kind,
            AstKind::Constant { value_kind: LiteralKind::Float, .. }
        ));
        assert!(matches!(
            &ast.child(2).unwrap().kind,
            AstKind::Constant { value_kind: LiteralKind::String, .. }
        ));
    }

    #[test]
    fn test_struct_declaration_and_construction() {
        let ast = parse_ok(
            "pub struct Vec2 { x:f y:f }\nfn main( -- ) { 1.0 2.0 Vec2 local v:Vec2 v @x print }",
        );
        match &ast.child(0).unwrap().kind {
            AstKind::StructDecl { name, is_public, fields } => {
                assert_eq!(name, "Vec2");
                assert!(is_public);
                assert_eq!(fields.len(), 2);
            }
            other => panic!("expected struct, got {:?}", other),
        }
        let body = ast.child(1).unwrap().child(0).unwrap();
        assert!(matches!(
            &body.child(2).unwrap().kind,
            AstKind::StructConstruction { struct_name } if struct_name == "Vec2"
        ));
        assert!(matches!(
            &body.child(3).unwrap().kind,
            AstKind::Local { name, type_name } if name == "v" && type_name == "Vec2"
        ));
        assert!(matches!(
            &body.child(4).unwrap().kind,
            AstKind::FieldAccess { var_name, field_name } if var_name == "v" && field_name == "x"
        ));
    }

    #[test]
    fn test_defer_and_ctx() {
        let ast = parse_ok("fn main( -- ) { defer { \"bye\" prints } ctx { 1 2 add } print }");
        let body = ast.child(0).unwrap().child(0).unwrap();
        assert!(matches!(body.child(0).unwrap().kind, AstKind::Defer));
        let ctx = body.child(1).unwrap();
        assert!(matches!(ctx.kind, AstKind::Ctx));
        assert_eq!(ctx.child_count(), 3);
    }

    #[test]
    fn test_function_pointer() {
        let ast = parse_ok("fn worker( -- ) { }\nfn main( -- ) { &worker spawn wait }");
        let body = ast.child(1).unwrap().child(0).unwrap();
        assert!(matches!(
            &body.child(0).unwrap().kind,
            AstKind::FunctionPointer { function_name } if function_name == "worker"
        ));
    }

    #[test]
    fn test_symbolic_operators_are_instructions() {
        let ast = parse_ok("fn main( -- ) { 1 2 + 3 * 4 == }");
        let body = ast.child(0).unwrap().child(0).unwrap();
        assert!(matches!(
            &body.child(2).unwrap().kind,
            AstKind::Instruction { name } if name == "+"
        ));
        assert!(matches!(
            &body.child(6).unwrap().kind,
            AstKind::Instruction { name } if name == "=="
        ));
    }

    #[test]
    fn test_error_recovery_reports_and_continues() {
        // stray token between two valid functions
        let (ast, errors) = parse_err("fn a( -- ) { 1 print }\n)\nfn b( -- ) { 2 print }");
        assert!(errors >= 1 && errors <= 3, "errors = {}", errors);
        let names: Vec<_> = ast
            .children
            .iter()
            .filter_map(|c| match &c.kind {
                AstKind::Function { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_missing_paren_recovers_to_next_function() {
        let (ast, errors) = parse_err("fn broken( { 1 }\nfn ok( -- ) { 2 print }");
        assert!(errors >= 1);
        assert!(ast.find_function("ok").is_some());
    }

    #[test]
    fn test_partial_ast_on_unclosed_block() {
        let (ast, errors) = parse_err("fn main( -- ) { 1 print");
        assert!(errors >= 1);
        assert!(ast.find_function("main").is_some());
    }

    #[test]
    fn test_line_positions_cover_source() {
        let src = "fn a( -- ) { 1 print }\nfn b( -- ) { 2 print }\n";
        let ast = parse_ok(src);
        assert_eq!(ast.child(0).unwrap().line, 1);
        assert_eq!(ast.child(1).unwrap().line, 2);
    }
}
