//! parsecd: parsec indexing daemon
//!
//! Usage:
//!   parsecd [--config /etc/parsec/parsec.toml] [--reset]
//!
//! Watches `watch.client_root` and indexes every new file; deleted files are
//! retracted from the index. The passphrase comes from `--key` /
//! `PARSEC_KEY`, or an interactive prompt.

mod daemon;
mod metrics;
mod worker;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use parsec_core::config::ParsecConfig;
use secrecy::SecretString;
use std::path::Path;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "parsecd", version, about = "parsec indexing daemon")]
struct Cli {
    /// Path to parsec.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "PARSEC_CONFIG",
        default_value = "/etc/parsec/parsec.toml"
    )]
    config: PathBuf,

    /// Index passphrase (prompted for when unset)
    #[arg(long, env = "PARSEC_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Empty the index and the stored file copies before watching
    #[arg(long)]
    reset: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "PARSEC_LOG")]
    log: Option<String>,

    /// Log format (json, text)
    #[arg(long, env = "PARSEC_LOG_FORMAT")]
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

    // Config is read before logging starts so its [daemon] section can set
    // the defaults; a missing file is reported once logging is up.
    let (config, config_found) = load_config(&cli.config).await?;

    let level = cli.log.clone().unwrap_or_else(|| config.daemon.log_level.clone());
    let format = cli.log_format.clone().unwrap_or_else(|| {
        if config.daemon.log_format.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    });
    init_logging(&level, &format);

    if !config_found {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        reset = cli.reset,
        "parsecd starting"
    );

    let passphrase = resolve_passphrase(cli.key)?;
    daemon::run(config, passphrase, cli.reset).await
}

async fn load_config(path: &Path) -> Result<(ParsecConfig, bool)> {
    if !path.exists() {
        return Ok((ParsecConfig::default(), false));
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: ParsecConfig = toml::from_str(&content)
        .with_context(|| format!("parsing config {}", path.display()))?;
    Ok((config, true))
}

fn resolve_passphrase(flag: Option<String>) -> Result<SecretString> {
    match flag {
        Some(key) if !key.is_empty() => Ok(SecretString::from(key)),
        _ => {
            let key = rpassword::prompt_password("parsec passphrase: ")
                .context("reading passphrase")?;
            anyhow::ensure!(!key.is_empty(), "empty passphrase");
            Ok(SecretString::from(key))
        }
    }
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
