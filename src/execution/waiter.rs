//! Confirmation waiter - turns "command sent" into "command reflected"
//!
//! Providers acknowledge commands only through the event stream, so after a
//! command the caller polls the [`WorkingOrders`] table until the expected state
//! shows up. Polling never ends on its own unless the policy carries a timeout,
//! a deadline or a cancel token.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::core::{Error, OrderUpdate, Result};
use crate::execution::WorkingOrders;
use crate::quant::to_level;

/// Shared flag a caller flips to abandon a wait.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How to poll and when to give up.
#[derive(Debug, Clone)]
pub struct WaitPolicy {
    pub poll_interval: Duration,
    /// Relative to the start of each wait
    pub timeout: Option<Duration>,
    /// Absolute, shared by every wait using this policy
    pub deadline: Option<Instant>,
    pub cancel: Option<CancelToken>,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            timeout: None,
            deadline: None,
            cancel: None,
        }
    }
}

impl WaitPolicy {
    pub fn polling_every(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn effective_deadline(&self, started: Instant) -> Option<Instant> {
        let relative = self.timeout.map(|t| started + t);
        match (relative, self.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Result of one look at the table
enum Check<T> {
    Done(Result<T>),
    /// Not yet; carries the most relevant order state seen, if any
    Pending(Option<OrderUpdate>),
}

/// Blocks (or awaits) until the working-order table reflects a command.
#[derive(Clone)]
pub struct ConfirmationWaiter {
    orders: Arc<WorkingOrders>,
    policy: WaitPolicy,
}

impl ConfirmationWaiter {
    pub fn new(orders: Arc<WorkingOrders>, policy: WaitPolicy) -> Self {
        Self { orders, policy }
    }

    pub fn policy(&self) -> &WaitPolicy {
        &self.policy
    }

    pub fn with_policy(&self, policy: WaitPolicy) -> Self {
        Self {
            orders: Arc::clone(&self.orders),
            policy,
        }
    }

    /// First working order whose id is not in `existing_ids`.
    ///
    /// Set-difference correlation: an unrelated order placed concurrently can be
    /// picked up instead. Prefer [`wait_for_client_tag`](Self::wait_for_client_tag)
    /// when several orders may be in flight.
    pub fn wait_for_new_order(&self, existing_ids: &HashSet<String>) -> Result<String> {
        self.poll_blocking("a new order", new_order_check(existing_ids))
    }

    /// Working order carrying `client_tag`.
    pub fn wait_for_client_tag(&self, client_tag: &str) -> Result<OrderUpdate> {
        self.poll_blocking(&format!("order tagged {}", client_tag), client_tag_check(client_tag))
    }

    /// Order `order_id` working at a limit price on the same pip level as `target_price`.
    pub fn wait_for_price_level(&self, order_id: &str, target_price: f64, pip: f64) -> Result<OrderUpdate> {
        let check = price_level_check(order_id, target_price, pip)?;
        let updated = self.poll_blocking(&format!("order {} at {}", order_id, target_price), check)?;
        info!("Order {} has been moved to price {}", order_id, target_price);
        Ok(updated)
    }

    /// Order `order_id` gone from the table; returns its terminal state if still remembered.
    pub fn wait_until_closed(&self, order_id: &str) -> Result<Option<OrderUpdate>> {
        self.poll_blocking(&format!("order {} to close", order_id), closed_check(order_id))
    }

    pub async fn wait_for_new_order_async(&self, existing_ids: &HashSet<String>) -> Result<String> {
        self.poll_async("a new order", new_order_check(existing_ids)).await
    }

    pub async fn wait_for_client_tag_async(&self, client_tag: &str) -> Result<OrderUpdate> {
        self.poll_async(&format!("order tagged {}", client_tag), client_tag_check(client_tag))
            .await
    }

    pub async fn wait_for_price_level_async(
        &self,
        order_id: &str,
        target_price: f64,
        pip: f64,
    ) -> Result<OrderUpdate> {
        let check = price_level_check(order_id, target_price, pip)?;
        let updated = self
            .poll_async(&format!("order {} at {}", order_id, target_price), check)
            .await?;
        info!("Order {} has been moved to price {}", order_id, target_price);
        Ok(updated)
    }

    pub async fn wait_until_closed_async(&self, order_id: &str) -> Result<Option<OrderUpdate>> {
        self.poll_async(&format!("order {} to close", order_id), closed_check(order_id))
            .await
    }

    fn poll_blocking<T>(&self, what: &str, mut check: impl FnMut(&WorkingOrders) -> Check<T>) -> Result<T> {
        let started = Instant::now();
        let deadline = self.policy.effective_deadline(started);
        let mut last_known = None;
        loop {
            match check(&self.orders) {
                Check::Done(result) => return result,
                Check::Pending(seen) => last_known = seen.or(last_known),
            }
            let nap = self.give_up_or_nap(what, started, deadline, &mut last_known)?;
            std::thread::sleep(nap);
        }
    }

    async fn poll_async<T>(&self, what: &str, mut check: impl FnMut(&WorkingOrders) -> Check<T>) -> Result<T> {
        let started = Instant::now();
        let deadline = self.policy.effective_deadline(started);
        let mut last_known = None;
        loop {
            match check(&self.orders) {
                Check::Done(result) => return result,
                Check::Pending(seen) => last_known = seen.or(last_known),
            }
            let nap = self.give_up_or_nap(what, started, deadline, &mut last_known)?;
            tokio::time::sleep(nap).await;
        }
    }

    fn give_up_or_nap(
        &self,
        what: &str,
        started: Instant,
        deadline: Option<Instant>,
        last_known: &mut Option<OrderUpdate>,
    ) -> Result<Duration> {
        if self.policy.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(Error::Cancelled {
                what: what.to_string(),
                last_known: last_known.take().map(Box::new),
            });
        }
        let now = Instant::now();
        match deadline {
            Some(d) if now >= d => Err(Error::Timeout {
                what: what.to_string(),
                waited: now - started,
                last_known: last_known.take().map(Box::new),
            }),
            Some(d) => Ok(self.policy.poll_interval.min(d - now)),
            None => {
                match last_known {
                    Some(order) => debug!("Waiting for {}. Currently: {}", what, order),
                    None => debug!("Waiting for {}", what),
                }
                Ok(self.policy.poll_interval)
            }
        }
    }
}

fn new_order_check(existing_ids: &HashSet<String>) -> impl FnMut(&WorkingOrders) -> Check<String> {
    move |orders: &WorkingOrders| {
        let fresh = orders
            .snapshot_ids()
            .into_iter()
            .filter(|id| !existing_ids.contains(id))
            .min();
        match fresh {
            Some(id) => Check::Done(Ok(id)),
            None => Check::Pending(None),
        }
    }
}

fn client_tag_check(client_tag: &str) -> impl FnMut(&WorkingOrders) -> Check<OrderUpdate> {
    move |orders: &WorkingOrders| {
        if let Some(order) = orders.find_by_client_tag(client_tag) {
            return Check::Done(Ok(order));
        }
        match orders.recently_closed_by_client_tag(client_tag) {
            Some(closed) => Check::Done(Err(Error::OrderNoLongerOpen {
                order_id: closed.order_id.clone(),
                last_known: Some(Box::new(closed)),
            })),
            None => Check::Pending(None),
        }
    }
}

fn price_level_check(
    order_id: &str,
    target_price: f64,
    pip: f64,
) -> Result<impl FnMut(&WorkingOrders) -> Check<OrderUpdate>> {
    let target_level = to_level(target_price, pip)?;
    let mut last_seen: Option<OrderUpdate> = None;
    Ok(move |orders: &WorkingOrders| {
        let Some(order) = orders.get(order_id) else {
            let last_known = orders.recently_closed(order_id).or_else(|| last_seen.take());
            return Check::Done(Err(Error::OrderNoLongerOpen {
                order_id: order_id.to_string(),
                last_known: last_known.map(Box::new),
            }));
        };
        match order.limit_price.map(|p| to_level(p, pip)) {
            Some(Ok(level)) if level == target_level => Check::Done(Ok(order)),
            Some(Err(e)) => Check::Done(Err(e)),
            _ => {
                last_seen = Some(order.clone());
                Check::Pending(Some(order))
            }
        }
    })
}

fn closed_check(order_id: &str) -> impl FnMut(&WorkingOrders) -> Check<Option<OrderUpdate>> {
    move |orders: &WorkingOrders| match orders.get(order_id) {
        Some(order) => Check::Pending(Some(order)),
        None => Check::Done(Ok(orders.recently_closed(order_id))),
    }
}
