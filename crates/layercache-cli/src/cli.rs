use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "layercache")]
#[command(about = "layercache CLI: exercise and inspect a layered cache deployment")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Settings file (defaults to ./layercache.toml when present)
    #[arg(short, long, global = true, env = "LAYERCACHE_CONFIG")]
    pub config: Option<String>,

    /// Log level; RUST_LOG takes precedence when set
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Hit one key with many concurrent callers and count the computations
    Stampede(StampedeArgs),
    /// Invalidate a key, broadcasting to other processes when Redis is enabled
    Invalidate(InvalidateArgs),
    /// Print invalidations seen on the channel until Ctrl-C
    Watch,
    /// Print the effective settings as TOML
    Config,
}

#[derive(clap::Args)]
pub struct StampedeArgs {
    /// Number of concurrent callers
    #[arg(short = 'n', long, default_value_t = 100)]
    pub callers: usize,
    /// Simulated computation time in milliseconds
    #[arg(short, long, default_value_t = 200)]
    pub delay_ms: u64,
    /// Key all callers ask for
    #[arg(short, long, default_value = "layercache:stampede")]
    pub key: String,
}

#[derive(clap::Args)]
pub struct InvalidateArgs {
    /// Key to invalidate
    pub key: String,
}
