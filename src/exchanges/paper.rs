//! Paper provider - in-process simulated venue
//!
//! Commands are queued on a `flume` channel and handled by a dedicated
//! dispatch thread, which answers with the same events a live provider would
//! emit: instrument lifecycle, order updates, executions, connection status.
//! With a [`FeedSettings`] the thread also random-walks a book for every
//! subscribed instrument and emits depth and trades between commands.

use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::core::config::ProviderConfig;
use crate::core::{
    Error, ExecutionInfo, InstrumentLimits, OrderDuration, OrderSendParameters, OrderStatus, OrderUpdate,
    OrderUpdateParameters, Provider, Result, Side, StatusInfo, SupportedFeatures,
};
use crate::events::{ConnectionEvent, DisconnectionReason, Event, InstrumentEvent, MarketMode, SystemTextKind};
use crate::quant::{InstrumentSpec, to_level, to_real};
use crate::registry::ListenerRegistry;

/// Where a random walk starts when the listing gives no reference price
const DEFAULT_REFERENCE_PRICE: f64 = 100.0;

enum Command {
    Subscribe(InstrumentSpec),
    Unsubscribe(String),
    Send(OrderSendParameters),
    Update(OrderUpdateParameters),
    Fill(String),
    Inject(Event),
    Close,
}

/// Synthetic market data for subscribed instruments
#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub interval: Duration,
    /// Starting price per symbol
    pub reference_prices: HashMap<String, f64>,
    /// Fixed seed for reproducible walks; entropy when absent
    pub seed: Option<u64>,
}

/// Simulated provider
pub struct PaperProvider {
    name: String,
    features: SupportedFeatures,
    listeners: Arc<ListenerRegistry>,
    commands: flume::Sender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl PaperProvider {
    /// Start the dispatch thread. The first event it emits is `LoginSuccessful`.
    pub fn spawn(name: impl Into<String>, features: SupportedFeatures, ack_latency: Duration) -> Result<Self> {
        Self::start(name.into(), features, ack_latency, None)
    }

    /// Like [`spawn`](Self::spawn), with a synthetic market-data feed.
    pub fn spawn_with_feed(
        name: impl Into<String>,
        features: SupportedFeatures,
        ack_latency: Duration,
        feed: FeedSettings,
    ) -> Result<Self> {
        if feed.interval.is_zero() {
            return Err(Error::InvalidConfiguration("market data interval must be > 0".into()));
        }
        Self::start(name.into(), features, ack_latency, Some(feed))
    }

    fn start(
        name: String,
        features: SupportedFeatures,
        ack_latency: Duration,
        feed: Option<FeedSettings>,
    ) -> Result<Self> {
        let listeners = Arc::new(ListenerRegistry::new());
        let (tx, rx) = flume::unbounded();

        let venue = Venue {
            listeners: Arc::clone(&listeners),
            features: features.clone(),
            ack_latency,
            subscribed: BTreeMap::new(),
            orders: HashMap::new(),
            positions: HashMap::new(),
            feed: feed.map(Feed::new),
            next_order: 1,
            next_execution: 1,
        };
        let worker = thread::Builder::new()
            .name(format!("{}-dispatch", name))
            .spawn(move || venue.run(rx))
            .map_err(|e| Error::InvalidState(format!("failed to start dispatch thread: {}", e)))?;

        info!("📡 Paper provider '{}' started", name);
        Ok(Self {
            name,
            features,
            listeners,
            commands: tx,
            worker: Mutex::new(Some(worker)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let known_instruments = config
            .listed
            .iter()
            .map(|l| InstrumentLimits {
                symbol: l.symbol.clone(),
                pip_options: vec![l.min_pip, l.min_pip * 10.0],
                size_multiplier_options: vec![1.0 / l.min_size_increment],
            })
            .collect();
        let features = SupportedFeatures {
            known_instruments,
            limit_durations: vec![OrderDuration::Gtc, OrderDuration::Day, OrderDuration::Ioc, OrderDuration::Fok],
            stop_orders: false,
        };
        let ack_latency = Duration::from_millis(config.ack_latency_ms);
        match config.market_data_interval_ms {
            Some(ms) => {
                let feed = FeedSettings {
                    interval: Duration::from_millis(ms),
                    reference_prices: config
                        .listed
                        .iter()
                        .filter_map(|l| l.reference_price.map(|p| (l.symbol.clone(), p)))
                        .collect(),
                    seed: config.market_data_seed,
                };
                Self::spawn_with_feed(&config.name, features, ack_latency, feed)
            }
            None => Self::spawn(&config.name, features, ack_latency),
        }
    }

    /// Fill the whole remaining size of a working order at its limit price.
    pub fn simulate_fill(&self, order_id: &str) -> Result<()> {
        self.enqueue(Command::Fill(order_id.to_string()))
    }

    /// Push a raw upstream event (e.g. trades, depth) through the dispatch thread.
    pub fn inject(&self, event: Event) -> Result<()> {
        self.enqueue(Command::Inject(event))
    }

    fn enqueue(&self, command: Command) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::InvalidState(format!("provider '{}' is closed", self.name)));
        }
        self.commands
            .send(command)
            .map_err(|_| Error::InvalidState(format!("provider '{}' dispatch thread is gone", self.name)))
    }
}

impl Provider for PaperProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    fn supported_features(&self) -> SupportedFeatures {
        self.features.clone()
    }

    fn subscribe(&self, spec: &InstrumentSpec) -> Result<()> {
        spec.validate()?;
        self.enqueue(Command::Subscribe(spec.clone()))
    }

    fn unsubscribe(&self, alias: &str) -> Result<()> {
        self.enqueue(Command::Unsubscribe(alias.to_string()))
    }

    fn send_order(&self, order: &OrderSendParameters) -> Result<()> {
        self.enqueue(Command::Send(order.clone()))
    }

    fn update_order(&self, update: &OrderUpdateParameters) -> Result<()> {
        self.enqueue(Command::Update(update.clone()))
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Queue is FIFO, so everything sent before close is handled first
        let _ = self.commands.send(Command::Close);
        if let Some(worker) = self.worker.lock().take() {
            if worker.thread().id() == thread::current().id() {
                // close() from inside a handler; the loop exits on its own
                return Ok(());
            }
            worker
                .join()
                .map_err(|_| Error::InvalidState(format!("provider '{}' dispatch thread panicked", self.name)))?;
        }
        info!("Paper provider '{}' closed", self.name);
        Ok(())
    }
}

impl Drop for PaperProvider {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.commands.send(Command::Close);
        }
    }
}

/// Net position of one instrument, in size levels
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Position {
    net: i64,
    average_price: Option<f64>,
}

impl Position {
    /// Fold in a fill of `signed` levels (negative for sells) at `price`.
    fn apply(&mut self, signed: i64, price: f64) {
        let net = self.net + signed;
        self.average_price = if net == 0 {
            None
        } else if self.net == 0 || self.net.signum() != net.signum() {
            // opened, or flipped through flat
            Some(price)
        } else if self.net.signum() == signed.signum() {
            let previous = self.average_price.unwrap_or(price);
            Some((previous * self.net.abs() as f64 + price * signed.abs() as f64) / net.abs() as f64)
        } else {
            self.average_price
        };
        self.net = net;
    }
}

/// Random-walk state of the synthetic feed
struct Feed {
    settings: FeedSettings,
    rng: StdRng,
    /// Mid price level per subscribed alias
    mids: HashMap<String, i64>,
    next_tick: Instant,
}

impl Feed {
    fn new(settings: FeedSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let next_tick = Instant::now() + settings.interval;
        Self {
            settings,
            rng,
            mids: HashMap::new(),
            next_tick,
        }
    }

    fn start(&mut self, spec: &InstrumentSpec) {
        let reference = self
            .settings
            .reference_prices
            .get(&spec.symbol)
            .copied()
            .unwrap_or(DEFAULT_REFERENCE_PRICE);
        // keep the bid side strictly positive
        let mid = spec.price_level(reference).unwrap_or(0).max(2);
        self.mids.insert(spec.symbol.clone(), mid);
    }

    /// One step of every walk; returns the events to emit.
    fn tick(&mut self, aliases: impl Iterator<Item = String>) -> Vec<Event> {
        let mut events = Vec::new();
        for alias in aliases {
            let Some(mid) = self.mids.get_mut(&alias) else {
                continue;
            };
            *mid = (*mid + self.rng.gen_range(-1..=1)).max(2);
            let mid = *mid;
            for (is_bid, price_level) in [(true, mid - 1), (false, mid + 1)] {
                events.push(Event::Depth {
                    alias: alias.clone(),
                    is_bid,
                    price_level,
                    size_level: self.rng.gen_range(1..=50),
                });
            }
            if self.rng.gen_bool(0.3) {
                let bid_aggressor = self.rng.gen_bool(0.5);
                events.push(Event::Trade {
                    alias: alias.clone(),
                    // prints between the mid and the touch it lifted
                    price_level: mid as f64 + if bid_aggressor { 0.5 } else { -0.5 },
                    size_level: self.rng.gen_range(1..=10),
                    bid_aggressor,
                });
            }
        }
        self.next_tick += self.settings.interval;
        if self.next_tick < Instant::now() {
            // fell behind (slow handlers); do not burst to catch up
            self.next_tick = Instant::now() + self.settings.interval;
        }
        events
    }
}

/// State owned by the dispatch thread
struct Venue {
    listeners: Arc<ListenerRegistry>,
    features: SupportedFeatures,
    ack_latency: Duration,
    subscribed: BTreeMap<String, InstrumentSpec>,
    orders: HashMap<String, OrderUpdate>,
    positions: HashMap<String, Position>,
    feed: Option<Feed>,
    next_order: u64,
    next_execution: u64,
}

impl Venue {
    fn run(mut self, rx: flume::Receiver<Command>) {
        self.emit(Event::Connection(ConnectionEvent::LoginSuccessful));
        loop {
            let received = match &self.feed {
                Some(feed) => rx.recv_deadline(feed.next_tick),
                None => rx.recv().map_err(|_| flume::RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(Command::Close) | Err(flume::RecvTimeoutError::Disconnected) => break,
                Ok(command) => self.handle(command),
                Err(flume::RecvTimeoutError::Timeout) => self.tick(),
            }
        }
        self.emit(Event::Connection(ConnectionEvent::ConnectionLost {
            reason: DisconnectionReason::ClosedByUser,
            message: "provider closed".to_string(),
        }));
        debug!("Dispatch thread exiting");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Subscribe(spec) => self.subscribe(spec),
            Command::Unsubscribe(alias) => self.unsubscribe(&alias),
            Command::Send(order) => self.send(order),
            Command::Update(update) => {
                let Some(current) = self.orders.get(update.order_id()).cloned() else {
                    self.system_text(
                        SystemTextKind::Warning,
                        format!("Cannot update {}: not a working order", update.order_id()),
                    );
                    return;
                };
                match update {
                    OrderUpdateParameters::Move {
                        limit_price,
                        stop_price,
                        ..
                    } => self.move_order(current, limit_price, stop_price),
                    OrderUpdateParameters::Cancel { .. } => self.cancel(current),
                }
            }
            Command::Fill(order_id) => self.fill(&order_id),
            Command::Inject(event) => self.emit(event),
            Command::Close => {}
        }
    }

    fn tick(&mut self) {
        let Some(feed) = self.feed.as_mut() else {
            return;
        };
        let events = feed.tick(self.subscribed.keys().cloned());
        for event in events {
            self.emit(event);
        }
    }

    fn emit(&self, event: Event) {
        let report = self.listeners.dispatch(&event);
        if !report.is_clean() {
            debug!(
                "{} of {} handlers failed on {}",
                report.failures.len(),
                report.failures.len() + report.delivered,
                event.kind()
            );
        }
    }

    fn system_text(&self, kind: SystemTextKind, message: String) {
        match kind {
            SystemTextKind::Info => info!("{}", message),
            _ => warn!("{}", message),
        }
        self.emit(Event::Connection(ConnectionEvent::SystemText { message, kind }));
    }

    fn subscribe(&mut self, spec: InstrumentSpec) {
        if self.subscribed.contains_key(&spec.symbol) {
            self.emit(Event::Instrument(InstrumentEvent::AlreadySubscribed { symbol: spec.symbol }));
            return;
        }
        let Some(limits) = self.features.instrument(&spec.symbol) else {
            self.emit(Event::Instrument(InstrumentEvent::NotFound { symbol: spec.symbol }));
            return;
        };
        if !limits.accepts(&spec) {
            self.system_text(
                SystemTextKind::Error,
                format!(
                    "{}: pip {} / size increment {} finer than the venue allows ({:?} / {:?})",
                    spec.symbol,
                    spec.pip,
                    spec.size_increment,
                    limits.min_pip(),
                    limits.min_size_increment()
                ),
            );
            self.emit(Event::Instrument(InstrumentEvent::NotFound { symbol: spec.symbol }));
            return;
        }
        let alias = spec.symbol.clone();
        if let Some(feed) = self.feed.as_mut() {
            feed.start(&spec);
        }
        self.subscribed.insert(alias.clone(), spec.clone());
        self.emit(Event::Instrument(InstrumentEvent::Added {
            alias: alias.clone(),
            spec,
        }));
        self.emit(Event::MarketMode {
            alias,
            mode: MarketMode::Normal,
        });
    }

    fn unsubscribe(&mut self, alias: &str) {
        if self.subscribed.remove(alias).is_some() {
            if let Some(feed) = self.feed.as_mut() {
                feed.mids.remove(alias);
            }
            self.emit(Event::Instrument(InstrumentEvent::Removed { alias: alias.to_string() }));
        } else {
            self.system_text(SystemTextKind::Warning, format!("{} is not subscribed", alias));
        }
    }

    fn send(&mut self, params: OrderSendParameters) {
        let order_id = format!("ORD-{}", self.next_order);
        self.next_order += 1;

        let mut order = OrderUpdate {
            order_id: order_id.clone(),
            client_tag: Some(params.client_tag.clone()),
            alias: params.alias.clone(),
            side: params.side,
            limit_price: params.limit_price,
            stop_price: params.stop_price,
            size: params.size,
            filled: 0,
            duration: params.duration,
            status: OrderStatus::PendingSubmit,
            updated_at: Utc::now(),
        };

        match self.accept(&params) {
            Ok((limit_price, stop_price)) => {
                order.limit_price = Some(limit_price);
                order.stop_price = stop_price;
            }
            Err(reason) => {
                self.system_text(SystemTextKind::Error, format!("Order {} rejected: {}", order_id, reason));
                self.emit(Event::OrderUpdated(order.with_status(OrderStatus::Rejected)));
                return;
            }
        }

        self.emit(Event::OrderUpdated(order.clone()));
        thread::sleep(self.ack_latency);
        let working = order.with_status(OrderStatus::Working);
        self.orders.insert(order_id, working.clone());
        self.emit(Event::OrderUpdated(working));
        self.emit_status(&params.alias);
    }

    /// On-grid (limit, stop) prices for an acceptable order, or why it is rejected.
    fn accept(&self, params: &OrderSendParameters) -> std::result::Result<(f64, Option<f64>), String> {
        let Some(spec) = self.subscribed.get(&params.alias) else {
            return Err(format!("{} is not subscribed", params.alias));
        };
        if params.size <= 0 {
            return Err(format!("size must be positive, got {}", params.size));
        }
        let Some(limit_price) = params.limit_price else {
            return Err("only limit orders are simulated".to_string());
        };
        if params.stop_price.is_some() && !self.features.stop_orders {
            return Err("stop orders are not supported".to_string());
        }
        if !self.features.limit_durations.contains(&params.duration) {
            return Err(format!("duration {} is not supported", params.duration));
        }
        let limit_price =
            snap(limit_price, spec.pip).ok_or_else(|| format!("limit price {} is not a valid price", limit_price))?;
        let stop_price = match params.stop_price {
            Some(p) => Some(snap(p, spec.pip).ok_or_else(|| format!("stop price {} is not a valid price", p))?),
            None => None,
        };
        Ok((limit_price, stop_price))
    }

    fn move_order(&mut self, current: OrderUpdate, limit_price: Option<f64>, stop_price: Option<f64>) {
        // Unsubscribed since placement: keep the requested price as is
        let pip = self.subscribed.get(&current.alias).map(|s| s.pip);
        let on_grid = |p: f64| match pip {
            Some(pip) => snap(p, pip),
            None => p.is_finite().then_some(p),
        };
        let (new_limit, new_stop) = (limit_price.map(&on_grid), stop_price.map(&on_grid));
        if matches!(new_limit, Some(None)) || matches!(new_stop, Some(None)) {
            self.system_text(
                SystemTextKind::Error,
                format!(
                    "Cannot move {}: invalid price (limit {:?}, stop {:?})",
                    current.order_id, limit_price, stop_price
                ),
            );
            return;
        }

        self.emit(Event::OrderUpdated(current.with_status(OrderStatus::PendingModify)));
        thread::sleep(self.ack_latency);

        let mut moved = current.with_status(OrderStatus::Working);
        if let Some(p) = new_limit.flatten() {
            moved.limit_price = Some(p);
        }
        if let Some(p) = new_stop.flatten() {
            moved.stop_price = Some(p);
        }
        self.orders.insert(moved.order_id.clone(), moved.clone());
        self.emit(Event::OrderUpdated(moved));
    }

    fn cancel(&mut self, current: OrderUpdate) {
        self.emit(Event::OrderUpdated(current.with_status(OrderStatus::PendingCancel)));
        thread::sleep(self.ack_latency);
        self.orders.remove(&current.order_id);
        self.emit(Event::OrderUpdated(current.with_status(OrderStatus::Cancelled)));
        self.emit_status(&current.alias);
    }

    fn fill(&mut self, order_id: &str) {
        let Some(current) = self.orders.remove(order_id) else {
            self.system_text(SystemTextKind::Warning, format!("Cannot fill {}: not a working order", order_id));
            return;
        };
        let price = current.limit_price.unwrap_or_default();
        let size = current.unfilled();
        let execution = ExecutionInfo {
            order_id: order_id.to_string(),
            execution_id: format!("EXEC-{}", self.next_execution),
            price,
            size,
            time: Utc::now(),
        };
        self.next_execution += 1;
        let signed = match current.side {
            Side::Buy => size,
            Side::Sell => -size,
        };
        self.positions.entry(current.alias.clone()).or_default().apply(signed, price);
        self.emit(Event::OrderExecuted(execution));

        let mut filled = current.with_status(OrderStatus::Filled);
        filled.filled = filled.size;
        self.emit(Event::OrderUpdated(filled));
        self.emit_status(&current.alias);
    }

    fn emit_status(&self, alias: &str) {
        let working = |side_is_buy: bool| -> i64 {
            self.orders
                .values()
                .filter(|o| o.alias == alias && o.side.is_buy() == side_is_buy)
                .map(OrderUpdate::unfilled)
                .sum()
        };
        let position = self.positions.get(alias).copied().unwrap_or_default();
        self.emit(Event::AccountStatus(StatusInfo {
            alias: alias.to_string(),
            position: position.net,
            average_price: position.average_price,
            working_buys: working(true),
            working_sells: working(false),
        }));
    }
}

/// Round a price onto the pip grid, as a venue would.
fn snap(price: f64, pip: f64) -> Option<f64> {
    to_level(price, pip).and_then(|level| to_real(level, pip)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventCategory;
    use crate::execution::{ConfirmationWaiter, WaitPolicy, WorkingOrders};
    use crate::registry::handler_fn;

    fn features() -> SupportedFeatures {
        SupportedFeatures {
            known_instruments: vec![InstrumentLimits {
                symbol: "BTC-PERPETUAL".into(),
                pip_options: vec![0.5],
                size_multiplier_options: vec![0.1],
            }],
            limit_durations: vec![OrderDuration::Gtc],
            stop_orders: false,
        }
    }

    fn recorder(provider: &PaperProvider) -> Arc<Mutex<Vec<Event>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        provider.listeners().subscribe(
            handler_fn("recorder", move |event: &Event| {
                sink.lock().push(event.clone());
                Ok(())
            }),
            &EventCategory::ALL,
        );
        events
    }

    fn eventually(events: &Mutex<Vec<Event>>, predicate: impl Fn(&Event) -> bool) -> bool {
        let until = Instant::now() + Duration::from_secs(5);
        while Instant::now() < until {
            if events.lock().iter().any(&predicate) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn btc() -> InstrumentSpec {
        InstrumentSpec::new("BTC-PERPETUAL", 0.5, 10.0).unwrap()
    }

    fn tracked(provider: &PaperProvider) -> (Arc<WorkingOrders>, ConfirmationWaiter) {
        let orders = Arc::new(WorkingOrders::new());
        provider
            .listeners()
            .subscribe(orders.clone(), &[EventCategory::Trading]);
        let waiter = ConfirmationWaiter::new(
            Arc::clone(&orders),
            WaitPolicy::polling_every(Duration::from_millis(5)).with_timeout(Duration::from_secs(5)),
        );
        (orders, waiter)
    }

    fn last_status(events: &Mutex<Vec<Event>>) -> Option<StatusInfo> {
        events.lock().iter().rev().find_map(|e| match e {
            Event::AccountStatus(s) => Some(s.clone()),
            _ => None,
        })
    }

    #[test]
    fn test_order_walkthrough() {
        let provider = PaperProvider::spawn("paper", features(), Duration::from_millis(5)).unwrap();
        let events = recorder(&provider);
        let (orders, waiter) = tracked(&provider);

        provider.subscribe(&btc()).unwrap();
        assert!(eventually(&events, |e| matches!(e, Event::Instrument(InstrumentEvent::Added { .. }))));

        let existing = orders.snapshot_ids();
        let size = btc().size_level(20.0).unwrap();
        provider
            .send_order(&OrderSendParameters::limit("BTC-PERPETUAL", Side::Buy, size, 25000.0, "MY_ORDER_1"))
            .unwrap();
        let order_id = waiter.wait_for_new_order(&existing).unwrap();
        assert_eq!(waiter.wait_for_client_tag("MY_ORDER_1").unwrap().order_id, order_id);

        let mut price = 25000.0;
        for _ in 0..5 {
            price -= 1000.0;
            provider
                .update_order(&OrderUpdateParameters::move_limit(&order_id, price))
                .unwrap();
            waiter.wait_for_price_level(&order_id, price, 0.5).unwrap();
        }

        provider.update_order(&OrderUpdateParameters::cancel(&order_id)).unwrap();
        let closed = waiter.wait_until_closed(&order_id).unwrap().unwrap();
        assert_eq!(closed.status, OrderStatus::Cancelled);
        assert_eq!(closed.limit_price, Some(20000.0));

        provider.close().unwrap();
        assert!(events.lock().iter().any(|e| matches!(
            e,
            Event::Connection(ConnectionEvent::ConnectionLost { reason: DisconnectionReason::ClosedByUser, .. })
        )));
        assert!(matches!(provider.unsubscribe("BTC-PERPETUAL"), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_subscription_lifecycle() {
        let provider = PaperProvider::spawn("paper", features(), Duration::ZERO).unwrap();
        let events = recorder(&provider);

        // finer than the listed minimum pip
        provider.subscribe(&InstrumentSpec::new("BTC-PERPETUAL", 0.1, 10.0).unwrap()).unwrap();
        provider.subscribe(&btc()).unwrap();
        provider.subscribe(&btc()).unwrap();
        provider.subscribe(&InstrumentSpec::new("DOGE-PERPETUAL", 0.1, 1.0).unwrap()).unwrap();
        provider.unsubscribe("BTC-PERPETUAL").unwrap();
        provider.close().unwrap();

        let events = events.lock();
        let instrument_events: Vec<&InstrumentEvent> = events
            .iter()
            .filter_map(|e| match e {
                Event::Instrument(i) => Some(i),
                _ => None,
            })
            .collect();
        assert_eq!(instrument_events.len(), 5);
        assert!(matches!(instrument_events[0], InstrumentEvent::NotFound { symbol } if symbol == "BTC-PERPETUAL"));
        assert!(matches!(instrument_events[1], InstrumentEvent::Added { spec, .. } if spec.pip == 0.5));
        assert!(matches!(instrument_events[2], InstrumentEvent::AlreadySubscribed { .. }));
        assert!(matches!(instrument_events[3], InstrumentEvent::NotFound { symbol } if symbol == "DOGE-PERPETUAL"));
        assert!(matches!(instrument_events[4], InstrumentEvent::Removed { .. }));
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Connection(ConnectionEvent::SystemText { kind: SystemTextKind::Error, .. })
        )));
        assert!(events.iter().any(|e| matches!(e, Event::MarketMode { mode: MarketMode::Normal, .. })));
    }

    #[test]
    fn test_invalid_spec_is_rejected_locally() {
        let provider = PaperProvider::spawn("paper", features(), Duration::ZERO).unwrap();
        let bad = InstrumentSpec {
            symbol: "BTC-PERPETUAL".into(),
            pip: -0.5,
            size_increment: 10.0,
        };
        assert!(matches!(provider.subscribe(&bad), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_rejected_order_fails_waiter() {
        let provider = PaperProvider::spawn("paper", features(), Duration::ZERO).unwrap();
        let (_, waiter) = tracked(&provider);

        // Not subscribed
        provider
            .send_order(&OrderSendParameters::limit("BTC-PERPETUAL", Side::Sell, 1, 30000.0, "T1"))
            .unwrap();
        let err = waiter.wait_for_client_tag("T1").unwrap_err();
        assert_eq!(err.last_known().unwrap().status, OrderStatus::Rejected);
    }

    #[test]
    fn test_unusable_limit_prices_are_rejected() {
        let provider = PaperProvider::spawn("paper", features(), Duration::ZERO).unwrap();
        let events = recorder(&provider);
        let (orders, waiter) = tracked(&provider);
        provider.subscribe(&btc()).unwrap();

        for (tag, price) in [("NAN", f64::NAN), ("INF", f64::INFINITY), ("HUGE", 1e300)] {
            provider
                .send_order(&OrderSendParameters::limit("BTC-PERPETUAL", Side::Buy, 1, price, tag))
                .unwrap();
            let err = waiter.wait_for_client_tag(tag).unwrap_err();
            assert_eq!(err.last_known().unwrap().status, OrderStatus::Rejected, "{}", tag);
        }
        assert!(orders.is_empty());
        assert!(!events.lock().iter().any(|e| matches!(
            e,
            Event::OrderUpdated(o) if o.status == OrderStatus::Working
        )));
    }

    #[test]
    fn test_unsupported_duration_is_rejected() {
        let provider = PaperProvider::spawn("paper", features(), Duration::ZERO).unwrap();
        let (_, waiter) = tracked(&provider);
        provider.subscribe(&btc()).unwrap();

        provider
            .send_order(
                &OrderSendParameters::limit("BTC-PERPETUAL", Side::Buy, 1, 25000.0, "GTD")
                    .with_duration(OrderDuration::Gtd),
            )
            .unwrap();
        let err = waiter.wait_for_client_tag("GTD").unwrap_err();
        let rejected = err.last_known().unwrap();
        assert_eq!(rejected.status, OrderStatus::Rejected);
        assert_eq!(rejected.duration, OrderDuration::Gtd);
    }

    #[test]
    fn test_invalid_move_keeps_order_in_place() {
        let provider = PaperProvider::spawn("paper", features(), Duration::ZERO).unwrap();
        let events = recorder(&provider);
        let (orders, waiter) = tracked(&provider);
        provider.subscribe(&btc()).unwrap();
        provider
            .send_order(&OrderSendParameters::limit("BTC-PERPETUAL", Side::Buy, 1, 25000.0, "M1"))
            .unwrap();
        let working = waiter.wait_for_client_tag("M1").unwrap();

        provider
            .update_order(&OrderUpdateParameters::move_limit(&working.order_id, f64::NAN))
            .unwrap();
        assert!(eventually(&events, |e| matches!(
            e,
            Event::Connection(ConnectionEvent::SystemText { kind: SystemTextKind::Error, message })
                if message.contains(&working.order_id)
        )));
        assert_eq!(orders.get(&working.order_id).unwrap().limit_price, Some(25000.0));
        assert!(!events.lock().iter().any(|e| matches!(
            e,
            Event::OrderUpdated(o) if o.status == OrderStatus::PendingModify
        )));

        // unknown order
        provider
            .update_order(&OrderUpdateParameters::cancel("ORD-404"))
            .unwrap();
        assert!(eventually(&events, |e| matches!(
            e,
            Event::Connection(ConnectionEvent::SystemText { kind: SystemTextKind::Warning, message })
                if message.contains("ORD-404")
        )));
    }

    #[test]
    fn test_fill_removes_order_and_reports_execution() {
        let provider = PaperProvider::spawn("paper", features(), Duration::ZERO).unwrap();
        let events = recorder(&provider);
        let (_, waiter) = tracked(&provider);

        provider.subscribe(&btc()).unwrap();
        provider
            .send_order(&OrderSendParameters::limit("BTC-PERPETUAL", Side::Buy, 3, 25000.2, "F1"))
            .unwrap();
        let working = waiter.wait_for_client_tag("F1").unwrap();
        // snapped onto the 0.5 grid
        assert_eq!(working.limit_price, Some(25000.0));

        provider.simulate_fill(&working.order_id).unwrap();
        let closed = waiter.wait_until_closed(&working.order_id).unwrap().unwrap();
        assert_eq!(closed.status, OrderStatus::Filled);
        assert_eq!(closed.filled, 3);
        assert!(eventually(&events, |e| matches!(e, Event::OrderExecuted(x) if x.size == 3)));
    }

    #[test]
    fn test_account_status_tracks_fills() {
        let provider = PaperProvider::spawn("paper", features(), Duration::ZERO).unwrap();
        let events = recorder(&provider);
        let (_, waiter) = tracked(&provider);
        provider.subscribe(&btc()).unwrap();

        provider
            .send_order(&OrderSendParameters::limit("BTC-PERPETUAL", Side::Buy, 3, 25000.0, "B1"))
            .unwrap();
        let first = waiter.wait_for_client_tag("B1").unwrap();
        assert!(eventually(&events, |e| matches!(e, Event::AccountStatus(s) if s.working_buys == 3)));

        provider.simulate_fill(&first.order_id).unwrap();
        waiter.wait_until_closed(&first.order_id).unwrap();
        assert!(eventually(&events, |e| matches!(e, Event::AccountStatus(s) if s.position == 3)));
        assert_eq!(
            last_status(&events).unwrap(),
            StatusInfo {
                alias: "BTC-PERPETUAL".into(),
                position: 3,
                average_price: Some(25000.0),
                working_buys: 0,
                working_sells: 0,
            }
        );

        provider
            .send_order(&OrderSendParameters::limit("BTC-PERPETUAL", Side::Sell, 3, 26000.0, "S1"))
            .unwrap();
        let second = waiter.wait_for_client_tag("S1").unwrap();
        provider.simulate_fill(&second.order_id).unwrap();
        waiter.wait_until_closed(&second.order_id).unwrap();
        assert!(eventually(&events, |e| matches!(e, Event::AccountStatus(s) if s.position == 0)));
        assert_eq!(last_status(&events).unwrap().average_price, None);
    }

    #[test]
    fn test_position_average_price() {
        let mut position = Position::default();
        position.apply(2, 100.0);
        position.apply(2, 110.0);
        assert_eq!(position, Position { net: 4, average_price: Some(105.0) });
        // reducing keeps the entry price
        position.apply(-1, 120.0);
        assert_eq!(position, Position { net: 3, average_price: Some(105.0) });
        // flipping short opens at the fill price
        position.apply(-5, 90.0);
        assert_eq!(position, Position { net: -2, average_price: Some(90.0) });
        position.apply(2, 95.0);
        assert_eq!(position, Position::default());
    }

    #[test]
    fn test_injected_market_data_reaches_handlers() {
        let provider = PaperProvider::spawn("paper", features(), Duration::ZERO).unwrap();
        let events = recorder(&provider);
        provider
            .inject(Event::Depth {
                alias: "BTC-PERPETUAL".into(),
                is_bid: true,
                price_level: 50000,
                size_level: 4,
            })
            .unwrap();
        assert!(eventually(&events, |e| matches!(e, Event::Depth { size_level: 4, .. })));
    }

    #[test]
    fn test_feed_walks_subscribed_instruments() {
        let feed = FeedSettings {
            interval: Duration::from_millis(5),
            reference_prices: HashMap::from([("BTC-PERPETUAL".to_string(), 25000.0)]),
            seed: Some(42),
        };
        let provider = PaperProvider::spawn_with_feed("paper", features(), Duration::ZERO, feed).unwrap();
        let events = recorder(&provider);

        // nothing is generated before a subscription
        thread::sleep(Duration::from_millis(30));
        assert!(!events.lock().iter().any(|e| matches!(e, Event::Depth { .. } | Event::Trade { .. })));

        provider.subscribe(&btc()).unwrap();
        assert!(eventually(&events, |e| matches!(e, Event::Trade { .. })));

        for event in events.lock().iter() {
            match event {
                Event::Depth { alias, is_bid, price_level, size_level } => {
                    assert_eq!(alias, "BTC-PERPETUAL");
                    assert!(*size_level > 0);
                    // starts at 25000 / 0.5 and moves one level per tick at most
                    assert!((*price_level - 50_000).abs() < 10_000, "{} {}", is_bid, price_level);
                }
                Event::Trade { price_level, .. } => assert_eq!(price_level.fract().abs(), 0.5),
                _ => {}
            }
        }
        provider.close().unwrap();
    }

    #[test]
    fn test_zero_feed_interval_is_rejected() {
        let feed = FeedSettings {
            interval: Duration::ZERO,
            reference_prices: HashMap::new(),
            seed: None,
        };
        assert!(matches!(
            PaperProvider::spawn_with_feed("paper", features(), Duration::ZERO, feed),
            Err(Error::InvalidConfiguration(_))
        ));
    }
}
