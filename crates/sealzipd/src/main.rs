//! sealzipd: streaming encryption daemon
//!
//! Usage:
//!   sealzipd [--config /etc/sealzip/sealzip.toml] [--listen 0.0.0.0:8080]

use anyhow::Result;
use clap::{Parser, ValueEnum};
use sealzip_core::config::SealzipConfig;
use std::path::Path;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "sealzipd", version, about = "Streaming password-encryption daemon")]
struct Cli {
    /// Path to sealzip.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "SEALZIP_CONFIG",
        default_value = "/etc/sealzip/sealzip.toml"
    )]
    config: PathBuf,

    /// Listen address, overrides server.listen
    #[arg(long, env = "SEALZIP_LISTEN")]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error), overrides server.log_level
    #[arg(long, env = "SEALZIP_LOG")]
    log: Option<String>,

    /// Log format (json, text), overrides server.log_format
    #[arg(long, env = "SEALZIP_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Config is read before the subscriber exists; its warning is logged after init.
    let loaded = load_config(&cli.config)?;
    let found = loaded.is_some();
    let mut config = loaded.unwrap_or_default();
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    let level = cli.log.unwrap_or_else(|| config.server.log_level.clone());
    let format = cli.log_format.unwrap_or_else(|| {
        LogFormat::from_str(&config.server.log_format, true).unwrap_or(LogFormat::Json)
    });
    init_logging(&level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "sealzipd starting"
    );
    if !found {
        warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    sealzipd::server::serve(config).await
}

fn load_config(path: &Path) -> Result<Option<SealzipConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(SealzipConfig::load(path)?))
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
