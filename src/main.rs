use clap::Parser;

use mdlive::cli::commands::{init, serve};
use mdlive::cli::{Cli, Commands};
use mdlive::{Settings, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    let config = loaded.unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        eprintln!("Using default configuration for now.");
        Settings::default()
    });

    logging::init_with_config(&config.logging);

    match cli.command {
        Commands::Init { force } => init::run_init(force)?,
        Commands::Config => init::run_config(&config)?,
        Commands::Serve {
            files,
            port,
            bind,
            root,
            debounce_ms,
        } => {
            let args = serve::ServeArgs {
                files,
                port,
                bind,
                root,
                debounce_ms,
            };
            serve::run(args, config).await?;
        }
    }

    Ok(())
}
