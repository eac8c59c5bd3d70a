//! `vlower.toml` configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use vlower_codegen::DEFAULT_ROOT_NAMESPACE;
use vlower_transform::LoweringOptions;

pub const CONFIG_FILE: &str = "vlower.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub lowering: LoweringSection,
    pub export: ExportSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoweringSection {
    /// Worker threads; unset uses one per core
    pub threads: Option<usize>,
    pub rewrite_call_sites: bool,
}

impl Default for LoweringSection {
    fn default() -> Self {
        Self { threads: None, rewrite_call_sites: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportSection {
    pub root_namespace: String,
}

impl Default for ExportSection {
    fn default() -> Self {
        Self { root_namespace: DEFAULT_ROOT_NAMESPACE.to_string() }
    }
}

impl Config {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid configuration")
    }

    /// Load an explicit configuration file, or `vlower.toml` from the
    /// working directory when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None if Path::new(CONFIG_FILE).is_file() => Path::new(CONFIG_FILE),
            None => return Ok(Self::default()),
        };
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Lowering options, command-line overrides applied.
    pub fn lowering_options(&self, threads: Option<usize>, no_rewrite: bool) -> LoweringOptions {
        LoweringOptions {
            threads: threads.or(self.lowering.threads),
            rewrite_call_sites: self.lowering.rewrite_call_sites && !no_rewrite,
        }
    }
}
