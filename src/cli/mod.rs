pub mod check;
pub mod inspect;
pub mod process;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "redline",
    version,
    about = "Annotation-driven document editing with format protection"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output (debug logging + error suggestions)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline against a document
    Process {
        /// Path to the document
        path: PathBuf,

        /// Model identifier to plan with
        #[arg(long)]
        model: Option<String>,

        /// Resolve locators and validate the plan without mutating
        #[arg(long)]
        dry_run: bool,

        /// Safe mode: mandatory backup, no fuzzy locator fallback
        #[arg(long, conflicts_with = "dry_run")]
        safe: bool,

        /// Directory for run artifacts
        #[arg(long)]
        output: Option<PathBuf>,

        /// Settings file (default: ./redline.toml when present)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Validate the environment: driver availability, API keys, output dir
    Check,

    /// Extract and print a document's structure and annotations as JSON
    Inspect {
        /// Path to the document
        path: PathBuf,
    },
}
