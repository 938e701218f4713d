use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use takbridge_client::{TlsClientConfig, TlsClientFactory};
use takbridge_core::config::LogFormat;
use takbridge_core::AppConfig;
use takbridge_pool::{install_exporter, ConnectionPool, MemoryStore, PoolConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// takbridge - TAK server connection pool and CoT stream relay
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "TAKBRIDGE_CONFIG", default_value = "config/config.yaml")]
    config: PathBuf,

    /// Connection store file, overriding `connections.path`
    #[arg(long)]
    connections: Option<PathBuf>,

    /// Override the TAK server URL
    #[arg(long)]
    server: Option<String>,

    /// Override the log level
    #[arg(long, env = "TAKBRIDGE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Do not connect to TAK
    #[arg(long)]
    local: bool,
}

fn init_tracing(config: &AppConfig) -> Result<()> {
    let level = config.logging.parse_level()?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(config.logging.file_line)
        .with_line_number(config.logging.file_line);

    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if args.config.exists() {
        AppConfig::from_config_builder(&args.config)
            .with_context(|| format!("Failed to load config file: {:?}", args.config))?
    } else {
        AppConfig::default()
    };

    if let Some(path) = &args.connections {
        config.connections.path = Some(path.clone());
    }
    if let Some(url) = &args.server {
        config.server.url = url.clone();
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if args.local {
        config.pool.local = true;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_tracing(&config)?;

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting takbridge");
    info!(config = ?args.config, server = %config.server.url, "Configuration loaded");

    if config.metrics.enabled {
        install_exporter(config.metrics.listen)?;
    }

    let store = match &config.connections.path {
        Some(path) => MemoryStore::from_yaml_file(path)?,
        None => {
            warn!("No connection file configured; the pool starts empty");
            MemoryStore::new()
        }
    };

    let factory = TlsClientFactory::new(TlsClientConfig::from(&config));
    let pool = Arc::new(ConnectionPool::new(
        PoolConfig::from(&config),
        Arc::new(store),
        Arc::new(factory),
    ));

    let added = pool.init().await?;
    info!(added, "Connection pool started");

    let reporter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            interval.tick().await;
            loop {
                interval.tick().await;
                let summary = pool.summary();
                info!(
                    live = summary.live,
                    dead = summary.dead,
                    total = summary.total(),
                    "Connection status"
                );
            }
        })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    reporter.abort();
    pool.shutdown().await;
    Ok(())
}
