use clap::Parser;

use crate::command::PublishArgs;

/// Publish files into a versioned package directory, all or nothing.
#[derive(Parser)]
#[command(name = "txpublish", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub args: PublishArgs,

    /// Log every executed action (overridden by RUST_LOG)
    #[arg(long, short = 'v')]
    pub verbose: bool,
}
