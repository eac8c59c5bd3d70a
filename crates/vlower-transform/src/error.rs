//! Lowering errors

use thiserror::Error;
use vlower_diagnostics::{Diagnostic, DiagnosticCode};

/// Why lowering could not continue.
///
/// `Internal` is a compiler bug and aborts the whole pass. `Unsupported`
/// names a user construct the lowering cannot express; it is reported as a
/// diagnostic and compilation stops after the pass.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoweringError {
    #[error("internal error: {0}")]
    Internal(String),

    #[error("{message}")]
    Unsupported {
        code: DiagnosticCode,
        message: String,
        context: Option<String>,
    },
}

impl LoweringError {
    pub fn internal(message: impl Into<String>) -> Self {
        LoweringError::Internal(message.into())
    }

    pub fn unsupported(code: DiagnosticCode, message: impl Into<String>) -> Self {
        LoweringError::Unsupported { code, message: message.into(), context: None }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::unsupported(DiagnosticCode::MalformedProgram, message)
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, LoweringError::Internal(_))
    }

    /// Attach the enclosing declaration, keeping an innermost one if set.
    pub fn in_context(self, name: impl Into<String>) -> Self {
        match self {
            LoweringError::Unsupported { code, message, context: None } => {
                LoweringError::Unsupported { code, message, context: Some(name.into()) }
            }
            other => other,
        }
    }

    pub fn code(&self) -> DiagnosticCode {
        match self {
            LoweringError::Internal(_) => DiagnosticCode::InternalError,
            LoweringError::Unsupported { code, .. } => *code,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        match self {
            LoweringError::Internal(message) => {
                Diagnostic::error(DiagnosticCode::InternalError, message.clone())
                    .with_help("this is a compiler bug")
                    .build()
            }
            LoweringError::Unsupported { code, message, context } => {
                let builder = Diagnostic::new(*code, message.clone());
                match context {
                    Some(context) => builder.with_context(context.clone()).build(),
                    None => builder.build(),
                }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, LoweringError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_innermost_context_wins() {
        let err = LoweringError::unsupported(DiagnosticCode::UnsupportedFieldWrite, "write")
            .in_context("Point.<init>")
            .in_context("main");
        let diag = err.to_diagnostic();
        assert_eq!(diag.context.as_deref(), Some("Point.<init>"));
        assert_eq!(diag.code, DiagnosticCode::UnsupportedFieldWrite);
    }

    #[test]
    fn test_internal_errors_have_no_context() {
        let err = LoweringError::internal("mismatch").in_context("main");
        assert!(err.is_internal());
        assert_eq!(err.code().as_str(), "I001");
        assert_eq!(err.to_string(), "internal error: mismatch");
    }
}
