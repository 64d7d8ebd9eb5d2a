//! ChainPulse
//!
//! Polls option-chain snapshots during market hours, emits guarded
//! CALL/PUT signals and tracks them with virtual trades.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chainpulse::config::AppConfig;
use chainpulse::engine::{Collaborators, SignalEngine};
use chainpulse::market_data::HttpMarketData;
use chainpulse::notifier::{LogNotifier, Notifier, WebhookNotifier};
use chainpulse::oracle::{HttpOracle, SignalOracle};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}

fn build_collaborators(cfg: &AppConfig) -> Result<Collaborators> {
    let market_data = Arc::new(HttpMarketData::new(&cfg.market_data.endpoint, cfg.market_data.timeout_ms)?);

    let oracle: Option<Arc<dyn SignalOracle>> = if cfg.oracle.enabled {
        Some(Arc::new(HttpOracle::new(
            &cfg.oracle.endpoint,
            cfg.oracle.api_key.clone(),
            cfg.oracle.timeout_ms,
        )?))
    } else {
        None
    };

    let notifier: Arc<dyn Notifier> = if cfg.notifier.enabled && !cfg.notifier.webhook_url.trim().is_empty() {
        Arc::new(WebhookNotifier::new(&cfg.notifier.webhook_url, cfg.notifier.timeout_ms)?)
    } else {
        Arc::new(LogNotifier)
    };

    info!(
        market_data = %cfg.market_data.endpoint,
        oracle = oracle.as_ref().map(|o| o.name()).unwrap_or("rule-engine only"),
        notifier = notifier.name(),
        "🔌 Collaborators configured"
    );

    Ok(Collaborators {
        market_data,
        oracle,
        notifier,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = AppConfig::load()?;
    init_tracing(cfg.logging.json);

    info!("📈 ChainPulse {} starting", env!("CARGO_PKG_VERSION"));
    info!("⚙️ Config: {}", cfg);
    cfg.validate().context("Invalid configuration")?;

    let collaborators = build_collaborators(&cfg)?;
    let engine = Arc::new(SignalEngine::from_config(&cfg, collaborators)?);
    engine.load_state();
    info!("{}", engine.ledger().summary_string());

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("🛑 Shutdown requested, finishing in-flight work"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
        }
        signal_token.cancel();
    });

    engine.run(shutdown).await?;
    info!("👋 ChainPulse stopped");
    Ok(())
}
