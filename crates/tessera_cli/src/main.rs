//! Tessera CLI
//!
//! Command-line tools for Tessera index directories.
//!
//! # Commands
//!
//! - `commits` - List the commits in an index directory
//! - `inspect` - Display the segments of one commit
//! - `verify` - Check that every commit and the files it references are readable

mod commands;

use clap::{Parser, Subcommand};
use commands::Format;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Tessera command-line index tools.
#[derive(Parser)]
#[command(name = "tessera")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the index directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the commits in the index, oldest first
    Commits {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Display the segments of a commit
    Inspect {
        /// Commit generation (defaults to the latest)
        #[arg(short, long)]
        generation: Option<u64>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Verify that every commit is readable
    Verify,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Commits { format } => {
            let path = cli.path.ok_or("Index path required for commits")?;
            commands::commits::run(&path, format)?;
        }
        Commands::Inspect { generation, format } => {
            let path = cli.path.ok_or("Index path required for inspect")?;
            commands::inspect::run(&path, generation, format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Index path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Version => {
            println!("Tessera CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Commit format {}", tessera_core::SEGMENTS_FORMAT);
        }
    }

    Ok(())
}
