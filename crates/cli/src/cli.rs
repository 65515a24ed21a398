use clap::{Args, Parser, Subcommand};

/// Exception notification helper.
///
/// Sends captured exceptions to the configured recipients, applying silent
/// mode, crawler filtering, same-day deduplication and the capture list.
#[derive(Parser, Debug)]
#[command(name = "tattle", version, about = "Exception notification helper")]
pub struct CliArgs {
    /// Path to the TOML config file
    #[arg(long, env = "TATTLE_CONFIG", default_value = "config/tattle.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a test notification to the configured recipients
    Test,
    /// Run an exception through the capture pipeline
    Capture(CaptureArgs),
    /// Inspect the duplicate ledger
    #[command(subcommand)]
    Ledger(LedgerCommand),
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// Exception kind, matched against the capture list
    #[arg(long)]
    pub kind: String,

    #[arg(long)]
    pub message: String,

    /// Source file of the throw site
    #[arg(long)]
    pub file: String,

    #[arg(long)]
    pub line: u32,

    /// User agent of the originating request
    #[arg(long)]
    pub user_agent: Option<String>,

    #[arg(long)]
    pub url: Option<String>,

    #[arg(long)]
    pub method: Option<String>,

    /// Trace line (repeatable, outermost first)
    #[arg(long = "trace")]
    pub trace: Vec<String>,

    /// Fail with the pipeline error instead of only logging it
    #[arg(long)]
    pub propagate: bool,
}

#[derive(Subcommand, Debug)]
pub enum LedgerCommand {
    /// List days that have a ledger record
    Days,
    /// Print the fingerprints recorded for a day
    Show {
        /// Day-key (DD.MM.YYYY); defaults to today
        #[arg(long)]
        day: Option<String>,
    },
}
