//! Tally CLI - bank statement CSV import in your terminal

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{accounts, import, logs, sample, templates};

/// Tally - import bank statement CSVs into a local ledger
#[derive(Parser)]
#[command(name = "tally", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import transactions from a CSV statement
    Import(import::ImportArgs),

    /// Manage saved column mapping templates
    Templates {
        #[command(subcommand)]
        command: templates::TemplatesCommands,
    },

    /// Print an example statement CSV
    Sample {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage accounts
    Accounts {
        #[command(subcommand)]
        command: accounts::AccountsCommands,
    },

    /// View and manage application logs
    Logs {
        #[command(subcommand)]
        command: logs::LogsCommands,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("Error: {:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Import(args) => import::run(args),
        Commands::Templates { command } => templates::run(command),
        Commands::Sample { output } => sample::run(output),
        Commands::Accounts { command } => accounts::run(command),
        Commands::Logs { command } => logs::run(command),
    }
}
