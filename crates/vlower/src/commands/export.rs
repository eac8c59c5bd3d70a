//! Export command - emits the cross-module extern preamble

use anyhow::{Context, Result};
use clap::Args;
use std::fs;
use std::path::PathBuf;
use vlower_codegen::{
    parse_descriptors, CrossModuleExternGenerator, JsGenerationContext, StubDeclarationTransformer,
};
use vlower_ir::Program;

use super::load_program;
use crate::config::Config;
use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// JSON list of exported declaration descriptors
    pub descriptors: PathBuf,

    /// Program the descriptors' `ir` ids refer to
    #[arg(long)]
    pub program: Option<PathBuf>,

    /// Global namespace object (defaults to the configured root)
    #[arg(long)]
    pub root: Option<String>,

    /// Configuration file (defaults to ./vlower.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

pub fn run(args: ExportArgs, format: OutputFormat) -> Result<()> {
    let config = Config::load(args.config.as_deref())?;
    let text = fs::read_to_string(&args.descriptors)
        .with_context(|| format!("cannot read {}", args.descriptors.display()))?;
    let descriptors = parse_descriptors(&text)
        .with_context(|| format!("in {}", args.descriptors.display()))?;
    let program = match &args.program {
        Some(path) => load_program(path)?,
        None => Program::new(),
    };

    let root = args.root.unwrap_or(config.export.root_namespace);
    let ctx = JsGenerationContext::new(&program);
    let js = CrossModuleExternGenerator::new(descriptors, &StubDeclarationTransformer)
        .with_root_namespace(root.clone())
        .generate(&ctx)
        .context("extern generation failed")?
        .to_string();

    match format {
        OutputFormat::Text => print!("{}", js),
        OutputFormat::Json => {
            let output = serde_json::json!({ "root": root, "js": js });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}
