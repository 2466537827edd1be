// src/cli/mod.rs — CLI definition (clap derive)

pub mod progress;
pub mod run;
pub mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "stimgen",
    about = "LLM-driven psycholinguistic stimulus generator",
    version
)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API
    Serve {
        /// Bind address (overrides [server].host)
        #[arg(long)]
        host: Option<String>,
        /// Port (overrides [server].port)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run one generation in the foreground and write the CSV
    Run {
        /// JSON file with the run settings
        #[arg(short, long)]
        settings: PathBuf,
        /// Output CSV file or directory
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Model choice (GPT-4o, custom, ollama), overriding the settings file
        #[arg(short, long)]
        model: Option<String>,
        /// Only print errors and the output path
        #[arg(short, long)]
        quiet: bool,
    },
}
