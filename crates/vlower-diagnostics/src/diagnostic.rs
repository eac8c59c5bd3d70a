//! Diagnostic types for lowering errors, warnings, and hints.

use serde::{Deserialize, Serialize};

/// Severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational hint
    Hint,
    /// Warning (lowering continues)
    Warning,
    /// Error (stops compilation)
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Hint => "hint",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic codes organized by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    // Program shape (P001-P099)
    /// A declaration id does not resolve, or a declaration has the wrong kind
    MalformedProgram,

    // Unsupported constructs (U001-U099)
    /// Write to a field that was flattened away
    UnsupportedFieldWrite,
    /// Reference to a function that received a flattened replacement
    UnsupportedFunctionReference,
    /// Aggregate value that cannot be expanded into leaves at this position
    UnsupportedReceiver,
    /// Initializer block statement that cannot be relocated
    UnsupportedInitializer,
    /// Any other construct the lowering does not handle
    UnsupportedFeature,

    // Warnings (W001-W099)
    /// User-defined equals on a multi-field value class is ignored
    IgnoredUserEquals,

    // Internal errors (I001-I099)
    /// Compiler-internal invariant violation
    InternalError,
}

impl DiagnosticCode {
    /// Get the code string (e.g., "U001").
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedProgram => "P001",

            Self::UnsupportedFieldWrite => "U001",
            Self::UnsupportedFunctionReference => "U002",
            Self::UnsupportedReceiver => "U003",
            Self::UnsupportedInitializer => "U004",
            Self::UnsupportedFeature => "U005",

            Self::IgnoredUserEquals => "W001",

            Self::InternalError => "I001",
        }
    }

    /// Every code, in documentation order.
    pub const ALL: &'static [DiagnosticCode] = &[
        Self::MalformedProgram,
        Self::UnsupportedFieldWrite,
        Self::UnsupportedFunctionReference,
        Self::UnsupportedReceiver,
        Self::UnsupportedInitializer,
        Self::UnsupportedFeature,
        Self::IgnoredUserEquals,
        Self::InternalError,
    ];

    /// Look a code up by its string form.
    pub fn from_code_str(code: &str) -> Option<Self> {
        let code = code.trim().to_ascii_uppercase();
        Self::ALL.iter().copied().find(|c| c.as_str() == code)
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            Self::IgnoredUserEquals => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A lowering diagnostic.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub severity: Severity,
    /// Short message (single line)
    pub message: String,
    /// Longer explanation (optional)
    pub explanation: Option<String>,
    /// Qualified name of the declaration the diagnostic was raised in
    pub context: Option<String>,
    /// Additional notes
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn error(code: DiagnosticCode, message: impl Into<String>) -> DiagnosticBuilder {
        DiagnosticBuilder::new(code, Severity::Error, message)
    }

    pub fn warning(code: DiagnosticCode, message: impl Into<String>) -> DiagnosticBuilder {
        DiagnosticBuilder::new(code, Severity::Warning, message)
    }

    /// Create a diagnostic with the code's default severity.
    pub fn new(code: DiagnosticCode, message: impl Into<String>) -> DiagnosticBuilder {
        DiagnosticBuilder::new(code, code.default_severity(), message)
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }
}

/// Builder for constructing diagnostics fluently.
pub struct DiagnosticBuilder {
    inner: Diagnostic,
}

impl DiagnosticBuilder {
    pub fn new(code: DiagnosticCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            inner: Diagnostic {
                code,
                severity,
                message: message.into(),
                explanation: None,
                context: None,
                notes: Vec::new(),
            },
        }
    }

    /// Set the enclosing declaration.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.inner.context = Some(context.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.inner.explanation = Some(help.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.inner.notes.push(note.into());
        self
    }

    pub fn build(self) -> Diagnostic {
        self.inner
    }
}

/// Collection of diagnostics with summary statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    pub items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.items.extend(diagnostics);
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|d| d.is_error())
    }

    pub fn error_count(&self) -> usize {
        self.items.iter().filter(|d| d.is_error()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.items.iter().filter(|d| d.is_warning()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_lookup_round_trips() {
        for code in DiagnosticCode::ALL {
            assert_eq!(DiagnosticCode::from_code_str(code.as_str()), Some(*code));
        }
        assert_eq!(
            DiagnosticCode::from_code_str("u002"),
            Some(DiagnosticCode::UnsupportedFunctionReference)
        );
        assert_eq!(DiagnosticCode::from_code_str("X999"), None);
    }

    #[test]
    fn test_counts() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::new(DiagnosticCode::IgnoredUserEquals, "ignored").build());
        assert!(!diags.has_errors());
        diags.push(Diagnostic::new(DiagnosticCode::InternalError, "boom").build());
        assert_eq!(diags.error_count(), 1);
        assert_eq!(diags.warning_count(), 1);
        assert_eq!(diags.len(), 2);
    }
}
