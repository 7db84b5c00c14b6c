//! Wicklight - CLI Entry Point

// Use mimalloc as global allocator for better p99 latency
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use wicklight::{Config, Gateway, VERSION};

#[derive(Parser, Debug)]
#[command(name = "wicklight")]
#[command(version = VERSION)]
#[command(about = "Authenticating HTTP proxy gateway with per-user quota")]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', long = "config", default_value = "config.yaml")]
    config: PathBuf,

    /// Listen address (overrides config)
    #[arg(long = "listen")]
    listen: Option<String>,

    /// Test configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,
}

fn main() -> anyhow::Result<()> {
    // Install aws-lc-rs as the default crypto provider for rustls
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().max(2))
        .max_blocking_threads(32)
        .enable_all()
        .thread_name("wicklight-worker")
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let args = Args::parse();

    let loaded = Config::load_async(&args.config).await;
    let level = loaded
        .as_ref()
        .ok()
        .and_then(|c| c.log_level.clone())
        .unwrap_or_else(|| "info".to_string());

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("wicklight={},tower_http=info", level)))?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    info!("wicklight v{}", VERSION);
    info!("Loading configuration from: {}", args.config.display());

    let mut config = match loaded {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(listen) = args.listen {
        config.listen = listen;
        if let Err(e) = config.validate() {
            error!("Invalid listen override: {}", e);
            std::process::exit(1);
        }
    }

    if args.test {
        info!("Configuration test passed");
        return Ok(());
    }

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to initialize gateway: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
