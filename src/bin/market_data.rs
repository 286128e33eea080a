//! Streams synthetic market data from two paper providers at once.
//!
//! Both list the same symbols, so the same alias shows up on each. Every
//! provider gets its own catalog and logger: an alias is only unique within
//! the provider that announced it, and the second provider is subscribed with
//! a coarser quantization to make that visible.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use portlink::exchanges::PaperProvider;
use portlink::feeds::EventLogger;
use portlink::{Config, EventCategory, InstrumentCatalog, InstrumentSpec, Provider};

const DEFAULT_RUN_SECS: u64 = 10;
const DEFAULT_INTERVAL_MS: u64 = 250;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = Config::load_default()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.app.log_level));
    fmt().with_env_filter(filter).with_target(false).with_level(true).init();

    let run_for = match std::env::args().nth(1) {
        Some(secs) => Duration::from_secs(secs.parse()?),
        None => Duration::from_secs(DEFAULT_RUN_SECS),
    };

    let mut providers = Vec::new();
    for (idx, coarsen) in [(1u64, 1.0), (2, 10.0)] {
        let mut provider_config = config.provider.clone();
        provider_config.name = format!("{}-{}", config.provider.name, idx);
        provider_config.market_data_interval_ms =
            Some(config.provider.market_data_interval_ms.unwrap_or(DEFAULT_INTERVAL_MS));
        provider_config.market_data_seed = config.provider.market_data_seed.map(|s| s + idx);

        let provider = Arc::new(PaperProvider::from_config(&provider_config)?);
        let catalog = Arc::new(InstrumentCatalog::new());
        provider
            .listeners()
            .subscribe(catalog.clone(), &[EventCategory::Instrument]);
        provider.listeners().subscribe(
            Arc::new(EventLogger::new(catalog).for_provider(provider.name()).with_depth(true)),
            &EventCategory::ALL,
        );

        for spec in &config.instruments {
            let spec = InstrumentSpec::new(&spec.symbol, spec.pip * coarsen, spec.size_increment)?;
            info!("[{}] subscribing {} with pip {}", provider.name(), spec.symbol, spec.pip);
            provider.subscribe(&spec)?;
        }
        providers.push(provider);
    }

    info!("⏳ Streaming for {:?} (ctrl-c to stop)", run_for);
    tokio::select! {
        _ = tokio::time::sleep(run_for) => {}
        _ = tokio::signal::ctrl_c() => warn!("🛑 Interrupted"),
    }

    for provider in providers {
        tokio::task::spawn_blocking(move || provider.close()).await??;
    }
    info!("👋 market data stopped");
    Ok(())
}
