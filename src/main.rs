// ABOUTME: Gateway binary entry point -- logging, config, plugin discovery, dispatcher, shutdown.
// ABOUTME: Ingestion and delivery stay external; this process is the orchestration core only.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use switchyard::Gateway;
use switchyard_core::GatewayConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "switchyard", about = "Local-first assistant gateway")]
struct Args {
    /// Path to a TOML config file. Defaults and env overrides apply when
    /// omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the plugins directory.
    #[arg(long)]
    plugins_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Log panics before the process dies.
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("PANIC: {}", panic_info);
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::from_env(),
    };
    if let Some(dir) = args.plugins_dir {
        config.plugins.dir = Some(dir);
    }

    tracing::info!(
        queue_cap = config.queue.cap,
        max_iterations = config.agent.max_iterations,
        plugins_dir = %config.plugins_dir().display(),
        "Configuration loaded"
    );

    let gateway = Gateway::build(config)?;
    gateway.wire();
    gateway.startup();

    tracing::info!("Gateway running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    gateway.shutdown().await;
    Ok(())
}
