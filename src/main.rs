// src/main.rs — stimgen entry point

use clap::Parser;

use stimgen::cli::{Cli, Commands};
use stimgen::infra::config::Config;
use stimgen::infra::logger;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Respects RUST_LOG
    logger::init_logging(&cli.log_level);

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Falls back to defaults if no config.toml
    let config = match cli.config {
        Some(ref path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Serve { host, port } => stimgen::cli::serve::run_serve(config, host, port).await,
        Commands::Run {
            settings,
            output,
            model,
            quiet,
        } => {
            stimgen::cli::run::run_foreground(
                &config,
                &settings,
                output.as_deref(),
                model.as_deref(),
                quiet,
            )
            .await
        }
    }
}
