//! CLI command implementations

pub mod explain;
pub mod export;
pub mod lower;
pub mod run;

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use vlower_diagnostics::{DiagnosticEmitter, Diagnostics, JsonEmitter, TerminalEmitter};
use vlower_ir::{Program, ProgramData};

use crate::OutputFormat;

/// Read a program from its JSON form.
pub fn load_program(path: &Path) -> Result<Program> {
    let text = fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    let data = ProgramData::from_json(&text)
        .with_context(|| format!("{} is not a valid program", path.display()))?;
    Program::from_data(data).with_context(|| format!("{} is malformed", path.display()))
}

pub fn save_program(program: &Program, path: &Path) -> Result<()> {
    let json = program.to_data().to_json()?;
    fs::write(path, json).with_context(|| format!("cannot write {}", path.display()))
}

/// Diagnostics go to stderr as text, or to stdout as JSON lines.
pub fn emit_diagnostics(diagnostics: &Diagnostics, format: OutputFormat, use_color: bool) -> Result<()> {
    match format {
        OutputFormat::Text => {
            let stderr = std::io::stderr();
            let mut emitter = TerminalEmitter::new(stderr.lock(), use_color);
            emitter.emit_all(diagnostics)?;
        }
        OutputFormat::Json => {
            let mut emitter = JsonEmitter::new(std::io::stdout().lock());
            emitter.emit_all(diagnostics)?;
        }
    }
    Ok(())
}
