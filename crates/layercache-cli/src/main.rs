mod cli;
mod commands;
mod observability;
mod output;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use layercache_redis::config::loader::load_settings;
use layercache_redis::create_cache_backend;
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    observability::init_tracing(&cli.log_level);

    let settings = load_settings(cli.config.as_deref())?;

    match &cli.command {
        Commands::Stampede(args) => {
            let backend = create_cache_backend(&settings).await;
            commands::stampede::stampede(backend, &settings, args).await?;
        }
        Commands::Invalidate(args) => {
            let backend = create_cache_backend(&settings).await;
            commands::invalidate::invalidate(backend, &args.key).await?;
        }
        Commands::Watch => {
            commands::watch::watch(&settings.redis).await?;
        }
        Commands::Config => {
            commands::config::show(&settings)?;
        }
    }

    Ok(())
}
