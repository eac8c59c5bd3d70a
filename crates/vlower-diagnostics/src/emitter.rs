//! Diagnostic emitters for different output formats.

use crate::diagnostic::{Diagnostic, Diagnostics, Severity};
use std::io::Write;

/// Trait for emitting diagnostics in various formats.
pub trait DiagnosticEmitter {
    /// Emit a single diagnostic.
    fn emit(&mut self, diagnostic: &Diagnostic) -> std::io::Result<()>;

    /// Emit multiple diagnostics.
    fn emit_all(&mut self, diagnostics: &Diagnostics) -> std::io::Result<()> {
        for diag in diagnostics.iter() {
            self.emit(diag)?;
        }
        Ok(())
    }

    /// Emit a summary line.
    fn emit_summary(&mut self, diagnostics: &Diagnostics) -> std::io::Result<()>;
}

/// Terminal output with optional colors.
pub struct TerminalEmitter<W: Write> {
    writer: W,
    colored: bool,
}

impl<W: Write> TerminalEmitter<W> {
    pub fn new(writer: W, colored: bool) -> Self {
        Self { writer, colored }
    }

    fn severity_color(&self, severity: Severity) -> &'static str {
        if !self.colored {
            return "";
        }
        match severity {
            Severity::Error => "\x1b[31m",
            Severity::Warning => "\x1b[33m",
            Severity::Hint => "\x1b[34m",
        }
    }

    fn paint(&self, code: &'static str) -> &'static str {
        if self.colored {
            code
        } else {
            ""
        }
    }
}

impl<W: Write> DiagnosticEmitter for TerminalEmitter<W> {
    fn emit(&mut self, diagnostic: &Diagnostic) -> std::io::Result<()> {
        let color = self.severity_color(diagnostic.severity);
        let reset = self.paint("\x1b[0m");
        let bold = self.paint("\x1b[1m");
        let cyan = self.paint("\x1b[36m");

        // Header: error[U001]: message
        writeln!(
            self.writer,
            "{}{}{}[{}]{}: {}",
            bold,
            color,
            diagnostic.severity.as_str(),
            diagnostic.code.as_str(),
            reset,
            diagnostic.message
        )?;

        if let Some(ref context) = diagnostic.context {
            writeln!(self.writer, "  {}-->{} {}", cyan, reset, context)?;
        }

        for note in &diagnostic.notes {
            writeln!(self.writer, "  {}= note:{} {}", cyan, reset, note)?;
        }

        if let Some(ref explanation) = diagnostic.explanation {
            writeln!(self.writer, "  {}= help:{} {}", cyan, reset, explanation)?;
        }

        writeln!(self.writer)?;
        Ok(())
    }

    fn emit_summary(&mut self, diagnostics: &Diagnostics) -> std::io::Result<()> {
        let errors = diagnostics.error_count();
        let warnings = diagnostics.warning_count();
        if errors == 0 && warnings == 0 {
            return Ok(());
        }

        let color = if errors > 0 {
            self.severity_color(Severity::Error)
        } else {
            self.severity_color(Severity::Warning)
        };
        let reset = self.paint("\x1b[0m");

        write!(self.writer, "{}", color)?;
        if errors > 0 {
            write!(self.writer, "{} error{}", errors, if errors == 1 { "" } else { "s" })?;
        }
        if errors > 0 && warnings > 0 {
            write!(self.writer, " and ")?;
        }
        if warnings > 0 {
            write!(
                self.writer,
                "{} warning{}",
                warnings,
                if warnings == 1 { "" } else { "s" }
            )?;
        }
        writeln!(self.writer, " emitted{}", reset)
    }
}

/// JSON lines output for tooling integration.
pub struct JsonEmitter<W: Write> {
    writer: W,
}

impl<W: Write> JsonEmitter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> DiagnosticEmitter for JsonEmitter<W> {
    fn emit(&mut self, diagnostic: &Diagnostic) -> std::io::Result<()> {
        let json = serde_json::json!({
            "code": diagnostic.code.as_str(),
            "severity": diagnostic.severity.as_str(),
            "message": diagnostic.message,
            "context": diagnostic.context,
            "notes": diagnostic.notes,
            "help": diagnostic.explanation,
        });
        serde_json::to_writer(&mut self.writer, &json)?;
        writeln!(self.writer)
    }

    fn emit_summary(&mut self, diagnostics: &Diagnostics) -> std::io::Result<()> {
        let summary = serde_json::json!({
            "type": "summary",
            "errors": diagnostics.error_count(),
            "warnings": diagnostics.warning_count(),
            "total": diagnostics.len(),
        });
        serde_json::to_writer(&mut self.writer, &summary)?;
        writeln!(self.writer)
    }
}

/// Simple text output (no colors, one line per diagnostic).
pub struct SimpleEmitter<W: Write> {
    writer: W,
}

impl<W: Write> SimpleEmitter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write> DiagnosticEmitter for SimpleEmitter<W> {
    fn emit(&mut self, diagnostic: &Diagnostic) -> std::io::Result<()> {
        match diagnostic.context {
            Some(ref context) => writeln!(
                self.writer,
                "{}[{}]: {} (in {})",
                diagnostic.severity.as_str(),
                diagnostic.code.as_str(),
                diagnostic.message,
                context
            ),
            None => writeln!(
                self.writer,
                "{}[{}]: {}",
                diagnostic.severity.as_str(),
                diagnostic.code.as_str(),
                diagnostic.message
            ),
        }
    }

    fn emit_summary(&mut self, diagnostics: &Diagnostics) -> std::io::Result<()> {
        writeln!(
            self.writer,
            "{} error(s), {} warning(s)",
            diagnostics.error_count(),
            diagnostics.warning_count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::DiagnosticCode;

    fn sample() -> Diagnostic {
        Diagnostic::error(DiagnosticCode::UnsupportedFunctionReference, "reference to `f`")
            .with_context("main")
            .with_note("`f` takes a multi-field value class parameter")
            .build()
    }

    #[test]
    fn test_terminal_without_color() {
        let mut out = Vec::new();
        TerminalEmitter::new(&mut out, false).emit(&sample()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("error[U002]: reference to `f`\n"));
        assert!(text.contains("  --> main\n"));
        assert!(text.contains("= note: `f` takes"));
        assert!(!text.contains('\x1b'));
    }

    #[test]
    fn test_json_line() {
        let mut out = Vec::new();
        JsonEmitter::new(&mut out).emit(&sample()).unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(out.trim_ascii_end()).unwrap();
        assert_eq!(value["code"], "U002");
        assert_eq!(value["context"], "main");
    }

    #[test]
    fn test_summary_pluralization() {
        let mut diags = Diagnostics::new();
        diags.push(sample());
        diags.push(sample());
        let mut out = Vec::new();
        TerminalEmitter::new(&mut out, false).emit_summary(&diags).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "2 errors emitted\n");
    }
}
