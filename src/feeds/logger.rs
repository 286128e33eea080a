//! Event logger - human-readable view of the event stream

use anyhow::anyhow;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::OrderStatus;
use crate::events::{ConnectionEvent, Event, InstrumentEvent, SystemTextKind};
use crate::quant::{InstrumentCatalog, InstrumentSpec};
use crate::registry::EventHandler;

/// Logs every event it receives, converting levels to real prices and sizes.
///
/// Market-data events for an alias without a registered [`InstrumentSpec`]
/// fail the handler, which the registry reports and skips.
///
/// Aliases are only unique per provider, so one logger (and one catalog) is
/// attached to each provider; `source` tells their lines apart.
pub struct EventLogger {
    catalog: Arc<InstrumentCatalog>,
    source: String,
    /// Depth is noisy; log it at info only when asked
    verbose_depth: bool,
}

impl EventLogger {
    pub fn new(catalog: Arc<InstrumentCatalog>) -> Self {
        Self {
            catalog,
            source: "default".to_string(),
            verbose_depth: false,
        }
    }

    pub fn for_provider(mut self, name: impl Into<String>) -> Self {
        self.source = name.into();
        self
    }

    pub fn with_depth(mut self, verbose: bool) -> Self {
        self.verbose_depth = verbose;
        self
    }

    fn spec(&self, alias: &str) -> anyhow::Result<InstrumentSpec> {
        self.catalog
            .get(alias)
            .ok_or_else(|| anyhow!("no quantization registered for alias {}", alias))
    }
}

impl EventHandler for EventLogger {
    fn name(&self) -> &str {
        "event-logger"
    }

    fn on_event(&self, event: &Event) -> anyhow::Result<()> {
        match event {
            Event::Trade {
                alias,
                price_level,
                size_level,
                bid_aggressor,
            } => {
                let spec = self.spec(alias)?;
                info!(
                    "[{}] onTrade: alias={} aggressor={} price={} size={}",
                    self.source,
                    alias,
                    if *bid_aggressor { "BUY" } else { "SELL" },
                    spec.price_from_fractional(*price_level),
                    spec.display_size(*size_level)
                );
            }
            Event::Depth {
                alias,
                is_bid,
                price_level,
                size_level,
            } => {
                let spec = self.spec(alias)?;
                let side = if *is_bid { "BID" } else { "ASK" };
                let (price, size) = (spec.display_price(*price_level), spec.display_size(*size_level));
                if self.verbose_depth {
                    info!("[{}] onDepth: alias={} side={} price={} size={}", self.source, alias, side, price, size);
                } else {
                    debug!("[{}] onDepth: alias={} side={} price={} size={}", self.source, alias, side, price, size);
                }
            }
            Event::MarketMode { alias, mode } => {
                info!("[{}] onMarketMode: alias={} mode={:?}", self.source, alias, mode)
            }
            Event::OrderUpdated(order) => match order.status {
                OrderStatus::Rejected => warn!("onOrderUpdated: {}", order),
                _ => info!("onOrderUpdated: {}", order),
            },
            Event::OrderExecuted(exec) => info!(
                "onOrderExecuted: order={} exec={} price={} size={} at {}",
                exec.order_id, exec.execution_id, exec.price, exec.size, exec.time
            ),
            Event::AccountStatus(status) => match status.average_price {
                Some(avg) => info!(
                    "[{}] onStatus: alias={} position={} avg={} working buy/sell={}/{}",
                    self.source, status.alias, status.position, avg, status.working_buys, status.working_sells
                ),
                None => debug!(
                    "[{}] onStatus: alias={} flat, working buy/sell={}/{}",
                    self.source, status.alias, status.working_buys, status.working_sells
                ),
            },
            Event::Balance(balance) => info!("onBalance: {:?}", balance),
            Event::Connection(conn) => match conn {
                ConnectionEvent::LoginSuccessful => info!("onLoginSuccessful"),
                ConnectionEvent::LoginFailed { reason, message } => warn!("onLoginFailed: {:?} {}", reason, message),
                ConnectionEvent::ConnectionLost { reason, message } => {
                    warn!("onConnectionLost: {:?} {}", reason, message)
                }
                ConnectionEvent::ConnectionRestored => info!("onConnectionRestored"),
                ConnectionEvent::SystemText { message, kind } => match kind {
                    SystemTextKind::Info => info!("System message: {}", message),
                    _ => warn!("System message ({:?}): {}", kind, message),
                },
                ConnectionEvent::UserMessage(data) => info!("onUserMessage: {}", data),
            },
            Event::Instrument(instrument) => match instrument {
                InstrumentEvent::Added { alias, spec } => info!(
                    "onInstrumentAdded: {} (pip={}, size increment={})",
                    alias, spec.pip, spec.size_increment
                ),
                InstrumentEvent::Removed { alias } => info!("onInstrumentRemoved: {}", alias),
                InstrumentEvent::NotFound { symbol } => warn!("onInstrumentNotFound: {}", symbol),
                InstrumentEvent::AlreadySubscribed { symbol } => info!("onInstrumentAlreadySubscribed: {}", symbol),
            },
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventCategory;
    use crate::registry::ListenerRegistry;

    #[test]
    fn test_unknown_alias_is_a_handler_failure() {
        let catalog = Arc::new(InstrumentCatalog::new());
        let registry = ListenerRegistry::new();
        registry.subscribe(Arc::new(EventLogger::new(catalog.clone())), &EventCategory::ALL);

        let trade = Event::Trade {
            alias: "PI_ETHUSD".into(),
            price_level: 18000.5,
            size_level: 12,
            bid_aggressor: true,
        };
        let report = registry.dispatch(&trade);
        assert_eq!(report.failures.len(), 1);

        catalog
            .register("PI_ETHUSD", InstrumentSpec::new("PI_ETHUSD", 0.1, 0.001).unwrap())
            .unwrap();
        assert!(registry.dispatch(&trade).is_clean());
    }

    #[test]
    fn test_extreme_levels_still_log() {
        let catalog = Arc::new(InstrumentCatalog::new());
        catalog
            .register("WIDE", InstrumentSpec::new("WIDE", 1e10, 1e10).unwrap())
            .unwrap();
        let registry = ListenerRegistry::new();
        registry.subscribe(
            Arc::new(EventLogger::new(catalog).for_provider("paper-1").with_depth(true)),
            &EventCategory::ALL,
        );
        let report = registry.dispatch(&Event::Depth {
            alias: "WIDE".into(),
            is_bid: false,
            price_level: i64::MAX,
            size_level: i64::MIN,
        });
        assert!(report.is_clean());
    }

    #[test]
    fn test_non_market_events_need_no_catalog() {
        let logger = EventLogger::new(Arc::new(InstrumentCatalog::new())).with_depth(true);
        logger
            .on_event(&Event::Connection(ConnectionEvent::SystemText {
                message: "maintenance at 12:00".into(),
                kind: SystemTextKind::Info,
            }))
            .unwrap();
        logger
            .on_event(&Event::Instrument(InstrumentEvent::NotFound { symbol: "XBTUSD".into() }))
            .unwrap();
    }
}
