//! Diagnostic infrastructure for vlower.
//!
//! Lowering never recovers from an internal invariant violation and never
//! silently skips a construct it cannot rewrite. Both outcomes surface here
//! as structured diagnostics:
//! - Error codes grouped by category (internal, unsupported, program shape)
//! - A fluent builder
//! - Multiple output formats (terminal, JSON, simple text)
//!
//! # Example
//!
//! ```
//! use vlower_diagnostics::{Diagnostic, DiagnosticCode, DiagnosticEmitter, SimpleEmitter};
//!
//! let diag = Diagnostic::error(DiagnosticCode::UnsupportedFieldWrite, "cannot write `x`")
//!     .with_context("Point.<init>")
//!     .with_help("multi-field value class fields are immutable")
//!     .build();
//!
//! let mut out = Vec::new();
//! SimpleEmitter::new(&mut out).emit(&diag).unwrap();
//! assert!(String::from_utf8(out).unwrap().starts_with("error[U001]"));
//! ```

pub mod diagnostic;
pub mod emitter;

pub use diagnostic::{Diagnostic, DiagnosticBuilder, DiagnosticCode, Diagnostics, Severity};
pub use emitter::{DiagnosticEmitter, JsonEmitter, SimpleEmitter, TerminalEmitter};
