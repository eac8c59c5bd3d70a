//! Run command - lowers a program and evaluates an entry function

use anyhow::{anyhow, bail, Result};
use clap::Args;
use std::path::PathBuf;
use vlower_ir::{Interpreter, Program};
use vlower_transform::lower_program;
use vlower_types::DeclId;

use super::{emit_diagnostics, load_program};
use crate::config::Config;
use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Program JSON file
    pub program: PathBuf,

    /// Top-level function to call (takes no arguments)
    #[arg(long, default_value = "main")]
    pub entry: String,

    /// Evaluate the program as loaded, without lowering it
    #[arg(long)]
    pub no_lower: bool,

    /// Configuration file (defaults to ./vlower.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Worker threads for class lowering
    #[arg(long)]
    pub threads: Option<usize>,
}

fn find_entry(program: &Program, name: &str) -> Option<DeclId> {
    program.roots().into_iter().find(|id| {
        let decl = program.get(*id);
        decl.name == name && decl.as_function().map_or(false, |f| f.params.is_empty())
    })
}

pub fn run(args: RunArgs, format: OutputFormat, use_color: bool) -> Result<()> {
    let program = load_program(&args.program)?;
    let entry = find_entry(&program, &args.entry)
        .ok_or_else(|| anyhow!("no top-level function `{}` without parameters", args.entry))?;

    if !args.no_lower {
        let config = Config::load(args.config.as_deref())?;
        let report = lower_program(&program, &config.lowering_options(args.threads, false))
            .map_err(|e| anyhow!("{}: {}", args.program.display(), e))?;
        emit_diagnostics(&report.diagnostics, format, use_color)?;
        if report.has_errors() {
            bail!("lowering failed with {} error(s)", report.diagnostics.error_count());
        }
    }

    let mut interp = Interpreter::new(&program);
    let result = interp.call(entry, None, Vec::new());
    match format {
        OutputFormat::Text => {
            for line in interp.output() {
                println!("{}", line);
            }
            let value = result.map_err(|e| anyhow!("evaluation failed: {}", e))?;
            if use_color {
                println!("{} {}", console::style("=>").dim(), interp.render(&value));
            } else {
                println!("=> {}", interp.render(&value));
            }
        }
        OutputFormat::Json => {
            let output = match &result {
                Ok(value) => serde_json::json!({
                    "success": true,
                    "output": interp.output(),
                    "result": interp.render(value),
                }),
                Err(e) => serde_json::json!({
                    "success": false,
                    "output": interp.output(),
                    "error": e.to_string(),
                }),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
            result.map_err(|e| anyhow!("evaluation failed: {}", e))?;
        }
    }
    Ok(())
}
