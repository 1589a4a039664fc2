//! `msgfilter` command line: inspect compiled filters, evaluate expressions against message
//! files and run message files through a filter set.

use anyhow::anyhow;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

pub mod commands;
mod filters;
mod util;

#[cfg(test)]
mod test_support;

pub use filters::{FilterEntry, FilterSet, FilterSpec, HeaderSpec};

#[derive(Parser, Debug)]
#[command(name = "msgfilter", version, about = "Compile, evaluate and match message filters")]
pub struct Cli {
    /// Log filter used when `RUST_LOG` is not set, e.g. `debug` or `msgfilter=trace`.
    #[arg(long = "log-level", global = true, default_value = "warn", value_name = "LEVEL")]
    pub log_level: String,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the opcodes a filter expression compiles to.
    Ir(commands::ir::IrArgs),
    /// Evaluate an expression against one message file.
    Eval(commands::eval::EvalArgs),
    /// Run message files through a filter set.
    Match(commands::matching::MatchArgs),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;
    let output = execute(&cli.command)?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

pub fn execute(command: &Command) -> anyhow::Result<String> {
    match command {
        Command::Ir(args) => commands::ir::run(args),
        Command::Eval(args) => commands::eval::run(args),
        Command::Match(args) => commands::matching::run(args),
    }
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!("cannot install log subscriber: {err}"))
}
