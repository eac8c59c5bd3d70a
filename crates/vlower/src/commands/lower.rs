//! Lower command - flattens multi-field value classes

use anyhow::{bail, Context, Result};
use clap::Args;
use std::fs;
use std::path::{Path, PathBuf};
use vlower_diagnostics::Diagnostics;
use vlower_ir::{dump_program, Program};
use vlower_transform::{lower_program, LoweringOptions, LoweringReport};
use walkdir::WalkDir;

use super::{emit_diagnostics, load_program, save_program};
use crate::config::Config;
use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct LowerArgs {
    /// Program JSON file or directory of program files
    pub input: PathBuf,

    /// Where to write the lowered program (a directory when lowering a directory)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Configuration file (defaults to ./vlower.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Worker threads for class lowering
    #[arg(long)]
    pub threads: Option<usize>,

    /// Lower class shapes only, leave function bodies untouched
    #[arg(long)]
    pub no_rewrite: bool,
}

/// Collect all program files under a path
fn collect_program_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }
    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && p.extension().map_or(false, |ext| ext == "json"))
        .collect();
    files.sort();
    files
}

fn output_path(args: &LowerArgs, file: &Path) -> Option<PathBuf> {
    let output = args.output.as_ref()?;
    if args.input.is_file() {
        return Some(output.clone());
    }
    let relative = file.strip_prefix(&args.input).unwrap_or(file);
    Some(output.join(relative))
}

fn summary(program: &Program, file: &Path, report: &LoweringReport) -> serde_json::Value {
    let replacements: Vec<_> = report
        .replaced_functions
        .iter()
        .filter_map(|(original, decision)| {
            let replacement = decision.replacement()?;
            Some(serde_json::json!({
                "original": program.qualified_name(*original),
                "replacement": program.qualified_name(replacement.function),
                "kind": decision.kind_name(),
            }))
        })
        .collect();
    serde_json::json!({
        "type": "summary",
        "file": file.display().to_string(),
        "success": !report.has_errors(),
        "lowered_classes": report
            .lowered_classes
            .iter()
            .map(|c| program.qualified_name(*c))
            .collect::<Vec<_>>(),
        "replacements": replacements,
        "rewritten_bodies": report.rewritten_bodies,
        "errors": report.diagnostics.error_count(),
        "warnings": report.diagnostics.warning_count(),
    })
}

pub fn run(args: LowerArgs, format: OutputFormat, use_color: bool, quiet: bool) -> Result<()> {
    let config = Config::load(args.config.as_deref())?;
    let options: LoweringOptions = config.lowering_options(args.threads, args.no_rewrite);

    let files = collect_program_files(&args.input);
    if files.is_empty() {
        bail!("no program files found in {}", args.input.display());
    }

    let mut all = Diagnostics::new();
    for file in &files {
        log::info!("lowering {}", file.display());
        let program = load_program(file)?;
        let report = lower_program(&program, &options)
            .map_err(|e| anyhow::anyhow!("{}: {}", file.display(), e))?;
        emit_diagnostics(&report.diagnostics, format, use_color)?;

        match format {
            OutputFormat::Text => {
                if !quiet && !report.has_errors() {
                    if files.len() > 1 {
                        println!("// {}", file.display());
                    }
                    print!("{}", dump_program(&program));
                }
            }
            OutputFormat::Json => println!("{}", summary(&program, file, &report)),
        }

        if !report.has_errors() {
            if let Some(out) = output_path(&args, file) {
                if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("cannot create {}", parent.display()))?;
                }
                save_program(&program, &out)?;
            }
        }
        all.extend(report.diagnostics);
    }

    let errors = all.error_count();
    if errors > 0 {
        if matches!(format, OutputFormat::Text) {
            if use_color {
                eprintln!(
                    "{}: {} error(s), {} warning(s)",
                    console::style("Lowering failed").red().bold(),
                    errors,
                    all.warning_count()
                );
            } else {
                eprintln!("Lowering failed: {} error(s), {} warning(s)", errors, all.warning_count());
            }
        }
        bail!("lowering failed with {} error(s)", errors);
    }
    Ok(())
}
