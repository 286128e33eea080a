//! Execution layer - Working-order table
//!
//! A materialized view of the order-update stream: only WORKING orders live
//! here. Terminal updates remove the record; the last terminal state is kept in
//! a short history so waiters can explain what happened to a vanished order.

pub mod waiter;

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info};

use crate::core::{OrderStatus, OrderUpdate};
use crate::events::Event;
use crate::registry::EventHandler;

pub use waiter::{CancelToken, ConfirmationWaiter, WaitPolicy};

const CLOSED_HISTORY: usize = 256;

#[derive(Default)]
struct Inner {
    live: HashMap<String, OrderUpdate>,
    closed: VecDeque<OrderUpdate>,
}

/// Order id -> current state of every working order.
#[derive(Default)]
pub struct WorkingOrders {
    inner: RwLock<Inner>,
}

impl WorkingOrders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one order update into the table.
    pub fn apply_update(&self, update: &OrderUpdate) {
        match update.status {
            OrderStatus::Working => {
                let mut inner = self.inner.write();
                if inner.live.insert(update.order_id.clone(), update.clone()).is_none() {
                    info!("Order {} is working", update);
                } else {
                    debug!("Order {} updated", update);
                }
            }
            status if status.is_terminal() => {
                let mut inner = self.inner.write();
                inner.live.remove(&update.order_id);
                inner.closed.retain(|o| o.order_id != update.order_id);
                if inner.closed.len() == CLOSED_HISTORY {
                    inner.closed.pop_front();
                }
                inner.closed.push_back(update.clone());
                info!("Order {} closed as {:?}", update.order_id, status);
            }
            status => debug!("Order {} is {:?}, table unchanged", update.order_id, status),
        }
    }

    pub fn get(&self, order_id: &str) -> Option<OrderUpdate> {
        self.inner.read().live.get(order_id).cloned()
    }

    pub fn contains(&self, order_id: &str) -> bool {
        self.inner.read().live.contains_key(order_id)
    }

    /// Ids open right now; take this before issuing a command to spot its result.
    pub fn snapshot_ids(&self) -> HashSet<String> {
        self.inner.read().live.keys().cloned().collect()
    }

    pub fn find_by_client_tag(&self, client_tag: &str) -> Option<OrderUpdate> {
        self.inner
            .read()
            .live
            .values()
            .find(|o| o.client_tag.as_deref() == Some(client_tag))
            .cloned()
    }

    /// Terminal state of a recently closed order.
    pub fn recently_closed(&self, order_id: &str) -> Option<OrderUpdate> {
        self.inner
            .read()
            .closed
            .iter()
            .rev()
            .find(|o| o.order_id == order_id)
            .cloned()
    }

    pub fn recently_closed_by_client_tag(&self, client_tag: &str) -> Option<OrderUpdate> {
        self.inner
            .read()
            .closed
            .iter()
            .rev()
            .find(|o| o.client_tag.as_deref() == Some(client_tag))
            .cloned()
    }

    pub fn orders(&self) -> Vec<OrderUpdate> {
        let mut orders: Vec<OrderUpdate> = self.inner.read().live.values().cloned().collect();
        orders.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        orders
    }

    pub fn len(&self) -> usize {
        self.inner.read().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().live.is_empty()
    }
}

impl EventHandler for WorkingOrders {
    fn name(&self) -> &str {
        "working-orders"
    }

    fn on_event(&self, event: &Event) -> anyhow::Result<()> {
        if let Event::OrderUpdated(update) = event {
            self.apply_update(update);
        }
        Ok(())
    }
}
