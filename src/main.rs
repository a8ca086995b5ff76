use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use decompd::{config::Config, github::GitHub, handlers, storage::Storage, tasks::TaskRunner, AppContext};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "decompd",
    about = "Decompilation progress aggregator — GitHub App daemon",
    version
)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "config.yml", env = "DECOMPD_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(&config.logging.level)
        .compact()
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "decompd starting"
    );

    let storage = Storage::new(&config.app.db_path).await?;
    let github = GitHub::new(&config.github.token)?;
    let tasks = TaskRunner::new();

    let bind = format!("{}:{}", config.server.address, config.server.port);
    let ctx = Arc::new(AppContext { config, storage, github, tasks: tasks.clone() });
    let router = handlers::build_router(ctx.clone());

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!("listening on http://{bind}");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
            tasks.shutdown();
        })
        .await
        .context("server failed")?;

    ctx.storage.close().await;
    Ok(())
}
