#![doc = include_str!("../README.md")]

pub mod cli;
pub mod command;
pub mod error;
pub mod fs;
pub mod publish;
pub mod runner;
pub mod transaction;
pub mod validation;
pub mod value;

pub use error::*;
pub use publish::{Publish, Stage};
pub use runner::run;
pub use transaction::{RootTransaction, Transaction};
pub use value::Value;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Parses the command line, sets up logging and publishes.
pub async fn run_cli() -> Result<()> {
    use clap::Parser;

    let cli = cli::Cli::parse();
    init_logging(cli.verbose);

    command::publish::execute(cli.args).await
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .try_init();
}
