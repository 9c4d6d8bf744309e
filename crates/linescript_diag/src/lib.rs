//! LineScript diagnostics engine.

use linescript_ast::Span;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: String,
    pub severity: Severity,
    pub span: Option<Span>,
    pub message: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "error")]
    Error,
    #[serde(rename = "warning")]
    Warning,
    #[serde(rename = "advice")]
    Advice,
}

impl Diagnostic {
    pub fn error(code: &str, span: Span, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            severity: Severity::Error,
            span: Some(span),
            message: message.into(),
        }
    }

    pub fn warning(code: &str, span: Span, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            severity: Severity::Warning,
            span: Some(span),
            message: message.into(),
        }
    }

    pub fn driver(code: &str, stage: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            severity: Severity::Error,
            span: None,
            message: format!("{}: {}", stage, message.into()),
        }
    }

    /// Render in the user-facing `line L, col C: message` form. Driver-level
    /// diagnostics carry their stage label inside the message instead.
    pub fn render(&self) -> String {
        match self.span {
            Some(span) => format!("line {}, col {}: {}", span.line, span.col, self.message),
            None => self.message.clone(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DiagnosticBag {
    pub diagnostics: Vec<Diagnostic>,
    pub max_errors: usize,
    /// When set, codes in `codes::SU_DEMOTABLE` are recorded as warnings.
    pub superuser: bool,
}

impl DiagnosticBag {
    pub fn new(max_errors: usize) -> Self {
        Self {
            diagnostics: Vec::new(),
            max_errors,
            superuser: false,
        }
    }

    pub fn emit(&mut self, mut diag: Diagnostic) {
        if self.superuser
            && diag.severity == Severity::Error
            && codes::SU_DEMOTABLE.contains(&diag.code.as_str())
        {
            diag.severity = Severity::Warning;
            diag.message.push_str(" (superuser: demoted to warning)");
        }
        if self.diagnostics.len() < self.max_errors.max(1) {
            self.diagnostics.push(diag);
        }
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity != Severity::Error)
    }
}

/// Diagnostic code namespaces.
pub mod codes {
    // Lexer.
    pub const LSL0001: &str = "LSL0001"; // unrecognized character
    pub const LSL0002: &str = "LSL0002"; // unterminated string literal
    pub const LSL0003: &str = "LSL0003"; // bad escape sequence

    // Parser.
    pub const LSP0001: &str = "LSP0001"; // generic syntax error
    pub const LSP0002: &str = "LSP0002"; // missing statement terminator
    pub const LSP0003: &str = "LSP0003"; // duplicate class/function
    pub const LSP0004: &str = "LSP0004"; // bad modifier combination
    pub const LSP0005: &str = "LSP0005"; // bad operator overload shape
    pub const LSP0006: &str = "LSP0006"; // bad flag name
    pub const LSP0007: &str = "LSP0007"; // unsupported macro kind

    // Types.
    pub const LST0001: &str = "LST0001"; // unknown name
    pub const LST0002: &str = "LST0002"; // arity mismatch
    pub const LST0003: &str = "LST0003"; // unconvertible argument
    pub const LST0004: &str = "LST0004"; // ambiguous overload
    pub const LST0005: &str = "LST0005"; // throws-contract violation
    pub const LST0006: &str = "LST0006"; // const/owned rule violation
    pub const LST0007: &str = "LST0007"; // bad for-range
    pub const LST0008: &str = "LST0008"; // bad parallel-for body
    pub const LST0009: &str = "LST0009"; // division/modulo by literal zero
    pub const LST0010: &str = "LST0010"; // bad operator override signature
    pub const LST0011: &str = "LST0011"; // duplicate signature in overload group
    pub const LST0012: &str = "LST0012"; // raw-memory advisory
    pub const LST0013: &str = "LST0013"; // type mismatch

    // Entry cardinality.
    pub const LSE0001: &str = "LSE0001"; // no entry candidate
    pub const LSE0002: &str = "LSE0002"; // multiple entry candidates

    // Driver.
    pub const LSD0001: &str = "LSD0001"; // I/O failure
    pub const LSD0002: &str = "LSD0002"; // bad CLI value
    pub const LSD0003: &str = "LSD0003"; // unsupported cross-compile combination
    pub const LSD0004: &str = "LSD0004"; // profile files missing
    pub const LSD0005: &str = "LSD0005"; // toolchain invocation failure
    pub const LSD0006: &str = "LSD0006"; // typed-IR bundle rejected

    /// Errors demoted to warnings when superuser mode is active.
    pub const SU_DEMOTABLE: &[&str] = &[
        LST0004, // ambiguous overload
        LST0005, // throws bypass
        LST0007, // zero for-range step
        LST0008, // parallel-for body rules
        LST0009, // division/modulo by zero
        LST0011, // duplicate signature
    ];
}

#[cfg(test)]
mod tests {
    use super::*;
    use linescript_ast::Span;

    #[test]
    fn renders_spanned_errors_in_line_col_form() {
        let diag = Diagnostic::error(codes::LST0001, Span::new(12, 3), "Unknown name `foo`.");
        assert_eq!(diag.render(), "line 12, col 3: Unknown name `foo`.");
    }

    #[test]
    fn superuser_demotes_only_listed_codes() {
        let mut bag = DiagnosticBag::new(8);
        bag.superuser = true;

        bag.emit(Diagnostic::error(
            codes::LST0004,
            Span::new(1, 1),
            "Ambiguous overload for `f`.",
        ));
        bag.emit(Diagnostic::error(
            codes::LST0001,
            Span::new(2, 1),
            "Unknown name `g`.",
        ));

        assert_eq!(bag.error_count(), 1);
        assert_eq!(bag.diagnostics[0].severity, Severity::Warning);
        assert_eq!(bag.diagnostics[1].severity, Severity::Error);
    }

    #[test]
    fn bag_caps_recorded_diagnostics_at_max_errors() {
        let mut bag = DiagnosticBag::new(2);
        for i in 0..5 {
            bag.emit(Diagnostic::error(
                codes::LSP0001,
                Span::new(i + 1, 1),
                "syntax error",
            ));
        }
        assert_eq!(bag.diagnostics.len(), 2);
    }
}
