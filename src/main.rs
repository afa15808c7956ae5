//! Crawler CLI entry point (SPEC_FULL.md §6): one invocation running the
//! engine's tick loop until a shutdown signal arrives.

use clap::Parser;
use marathon_crawler::config::CrawlerConfig;
use marathon_crawler::engine::Engine;
use marathon_crawler::persistence;

/// Adaptive crawler and normalizer for live marathon split-timing providers.
#[derive(Parser, Debug)]
#[command(name = "marathon-crawler", version, about)]
struct Cli {
    /// Enable exponential backoff on repeated per-marathon fetch failures.
    #[arg(long)]
    adaptive: bool,

    /// Skip schema init/migration on startup (assumes the database already exists).
    #[arg(long)]
    skip_init: bool,
}

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();
    let config = CrawlerConfig::from_env().with_adaptive(cli.adaptive).with_skip_init(cli.skip_init);

    let pool = match persistence::open_pool(&config.db_path).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "failed to open database");
            return 1;
        }
    };

    if !config.skip_init
        && let Err(e) = persistence::init_schema(&pool).await
    {
        tracing::error!(error = %e, "schema initialization failed");
        return 1;
    }

    let engine = Engine::new(pool, config);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    match engine.run(shutdown_rx).await {
        Ok(()) => {
            tracing::info!("shutdown complete");
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "engine exited with error");
            1
        }
    }
}
