//! Subscription helper server
//!
//! Loads configuration.yaml, registers the subscription_helper integration,
//! imports subscriptions declared in YAML and serves the REST API until
//! interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use sh_api::AppState;
use sh_components::{subscription_helper, HomeAssistant};
use sh_config::Settings;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Dispatch};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Level used while configuration.yaml is being read
const BOOTSTRAP_LEVEL: &str = "info";

#[derive(Debug, Parser)]
#[command(name = "subscription-helper")]
#[command(about = "Track subscriptions and publish their expiry as sensors")]
struct Cli {
    /// Directory holding configuration.yaml and secrets.yaml
    #[arg(short, long = "config", env = "SH_CONFIG_DIR", default_value = "./config")]
    config_dir: PathBuf,
}

/// RUST_LOG wins over the given default level
fn env_filter(default_level: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .with_context(|| format!("invalid log level '{}'", default_level))
}

fn subscriber<W>(filter: EnvFilter, writer: W) -> Dispatch
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(writer)
        .finish();
    Dispatch::new(subscriber)
}

/// Read the settings with `bootstrap` as the active subscriber, so loading is logged
fn load_settings(config_dir: &Path, bootstrap: Dispatch) -> Result<Settings> {
    tracing::dispatcher::with_default(&bootstrap, || Settings::load(config_dir))
        .with_context(|| format!("failed to load configuration from {}", config_dir.display()))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", err);
    }
    info!("Shutting down...");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = load_settings(
        &cli.config_dir,
        subscriber(env_filter(BOOTSTRAP_LEVEL)?, std::io::stdout),
    )?;
    tracing::dispatcher::set_global_default(subscriber(
        env_filter(&settings.logger.default)?,
        std::io::stdout,
    ))?;

    info!("Starting subscription helper (config: {})", cli.config_dir.display());

    let hass = Arc::new(HomeAssistant::new());
    subscription_helper::register(&hass, &settings.subscription_helper);

    let imported = subscription_helper::import_subscriptions(
        &hass,
        &settings.subscription_helper.subscriptions,
    )
    .await;
    info!("Imported {} subscriptions from configuration", imported);

    let addr = format!("{}:{}", settings.http.server_host, settings.http.server_port);
    sh_api::start_server(AppState::new(hass.clone()), &addr, shutdown_signal())
        .await
        .with_context(|| format!("API server on {} failed", addr))?;

    for entry in hass.config_entries.all() {
        if let Err(err) = hass.config_entries.unload(&entry.entry_id).await {
            warn!("Failed to unload {}: {}", entry.entry_id, err);
        }
    }
    info!("Stopped");

    Ok(())
}
