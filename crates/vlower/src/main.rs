//! vlower - multi-field value class lowering
//!
//! CLI driver: lowers IR programs, runs them with the reference evaluator
//! and emits cross-module extern preambles.

mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

/// Multi-field value class lowering
#[derive(Parser, Debug)]
#[command(name = "vlower")]
#[command(author, version, about = "Flatten multi-field value classes in IR programs")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Lower the multi-field value classes of a program (file or directory)
    Lower(commands::lower::LowerArgs),

    /// Lower a program, then evaluate one of its functions
    Run(commands::run::RunArgs),

    /// Emit the cross-module extern preamble for export descriptors
    Export(commands::export::ExportArgs),

    /// Explain a diagnostic code
    Explain(commands::explain::ExplainArgs),
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    // Determine if colors should be used
    let use_color = !cli.no_color && !cli.quiet && atty::is(atty::Stream::Stdout);

    let Some(command) = cli.command else {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        cmd.print_help()?;
        println!();
        return Ok(());
    };

    match command {
        Commands::Lower(args) => commands::lower::run(args, cli.format, use_color, cli.quiet),
        Commands::Run(args) => commands::run::run(args, cli.format, use_color),
        Commands::Export(args) => commands::export::run(args, cli.format),
        Commands::Explain(args) => commands::explain::run(args, cli.format, use_color),
    }
}
