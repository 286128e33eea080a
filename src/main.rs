use anyhow::{Context, bail};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

use portlink::core::config::WalkthroughConfig;
use portlink::core::{OrderSendParameters, OrderUpdateParameters};
use portlink::events::InstrumentEvent;
use portlink::exchanges::PaperProvider;
use portlink::feeds::EventLogger;
use portlink::registry::handler_fn;
use portlink::{
    CancelToken, Config, ConfirmationWaiter, Event, EventCategory, InstrumentCatalog, InstrumentSpec, Provider,
    WorkingOrders,
};

const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);
const CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = Config::load_default()?;

    // 1. Logger: RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.app.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_level(true)
        .init();

    info!("🦀 portlink starting (provider: {})", config.provider.name);

    let Some(walk) = config.walkthrough.clone() else {
        info!("No [walkthrough] configured, nothing to do");
        return Ok(());
    };
    let spec = config
        .instrument(&walk.symbol)
        .cloned()
        .with_context(|| format!("no quantization configured for {}", walk.symbol))?;

    // 2. Provider and listeners
    let provider = Arc::new(PaperProvider::from_config(&config.provider)?);
    let catalog = Arc::new(InstrumentCatalog::new());
    let orders = Arc::new(WorkingOrders::new());
    let listeners = provider.listeners();
    listeners.subscribe(catalog.clone(), &[EventCategory::Instrument]);
    listeners.subscribe(Arc::new(EventLogger::new(catalog.clone())), &EventCategory::ALL);
    listeners.subscribe(orders.clone(), &[EventCategory::Trading]);

    // 3. Ctrl-C abandons whatever wait is in progress
    let cancel = CancelToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("🛑 Interrupted, abandoning current wait");
                cancel.cancel();
            }
        }
    });
    let waiter = ConfirmationWaiter::new(orders.clone(), config.waiter.policy().with_cancel(cancel));

    let outcome = run(&provider, &waiter, &orders, &spec, &walk).await;
    if let Err(e) = &outcome {
        error!("❌ Walkthrough failed: {:#}", e);
        for order in orders.orders() {
            warn!("Cancelling leftover order {}", order.order_id);
            provider.update_order(&OrderUpdateParameters::cancel(&order.order_id))?;
        }
    }

    // close() joins the dispatch thread
    let closing = Arc::clone(&provider);
    tokio::task::spawn_blocking(move || closing.close()).await??;
    info!("👋 portlink stopped");
    outcome
}

async fn run(
    provider: &PaperProvider,
    waiter: &ConfirmationWaiter,
    orders: &WorkingOrders,
    spec: &InstrumentSpec,
    walk: &WalkthroughConfig,
) -> anyhow::Result<()> {
    subscribe(provider, spec).await?;

    let tag = walk
        .client_tag
        .clone()
        .unwrap_or_else(|| format!("portlink-{}", Uuid::new_v4()));
    let existing = orders.snapshot_ids();
    let size = spec.size_level(walk.size)?;
    info!(
        "📤 Sending {} {} x{} @ {} (tag {})",
        walk.side, walk.symbol, size, walk.start_price, tag
    );
    provider.send_order(
        &OrderSendParameters::limit(&walk.symbol, walk.side, size, walk.start_price, &tag)
            .with_duration(walk.duration),
    )?;

    let placed = waiter.wait_for_client_tag_async(&tag).await?;
    let order_id = placed.order_id.clone();
    let by_difference = waiter.wait_for_new_order_async(&existing).await?;
    if by_difference != order_id {
        warn!(
            "⚠️ Set-difference picked {} but tag {} belongs to {}",
            by_difference, tag, order_id
        );
    }
    info!("✅ Order {} is working: {}", order_id, placed);

    for step in 1..=walk.moves {
        let target = walk.start_price + walk.price_step * step as f64;
        provider.update_order(&OrderUpdateParameters::move_limit(&order_id, target))?;
        waiter.wait_for_price_level_async(&order_id, target, spec.pip).await?;
        if walk.pause_ms > 0 {
            tokio::time::sleep(Duration::from_millis(walk.pause_ms)).await;
        }
    }

    provider.update_order(&OrderUpdateParameters::cancel(&order_id))?;
    let cancel_waiter = waiter.with_policy(waiter.policy().clone().with_timeout(CANCEL_TIMEOUT));
    match cancel_waiter.wait_until_closed_async(&order_id).await? {
        Some(last) => info!("🏁 Order {} closed: {}", order_id, last),
        None => info!("🏁 Order {} closed", order_id),
    }

    provider.unsubscribe(&walk.symbol)?;
    Ok(())
}

/// Subscribe and wait for the venue's answer.
async fn subscribe(provider: &PaperProvider, spec: &InstrumentSpec) -> anyhow::Result<()> {
    let (tx, rx) = flume::bounded(1);
    let symbol = spec.symbol.clone();
    let watcher = provider.listeners().subscribe(
        handler_fn("subscription-watch", move |event: &Event| {
            if let Event::Instrument(instrument) = event {
                let ours = match instrument {
                    InstrumentEvent::Added { alias, .. } | InstrumentEvent::Removed { alias } => *alias == symbol,
                    InstrumentEvent::NotFound { symbol: s } | InstrumentEvent::AlreadySubscribed { symbol: s } => {
                        *s == symbol
                    }
                };
                if ours {
                    let _ = tx.try_send(instrument.clone());
                }
            }
            Ok(())
        }),
        &[EventCategory::Instrument],
    );

    provider.subscribe(spec)?;
    let answer = tokio::time::timeout(SUBSCRIBE_TIMEOUT, rx.recv_async()).await;
    provider.listeners().unsubscribe(watcher);

    match answer {
        Ok(Ok(InstrumentEvent::Added { .. })) | Ok(Ok(InstrumentEvent::AlreadySubscribed { .. })) => Ok(()),
        Ok(Ok(other)) => bail!("subscription to {} refused: {:?}", spec.symbol, other),
        Ok(Err(_)) => bail!("provider went away while subscribing to {}", spec.symbol),
        Err(_) => bail!("no answer to subscription of {} within {:?}", spec.symbol, SUBSCRIBE_TIMEOUT),
    }
}
