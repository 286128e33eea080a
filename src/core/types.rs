//! Core types - Orders, commands and account payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn is_buy(self) -> bool {
        matches!(self, Side::Buy)
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDuration {
    Gtc,
    Day,
    Ioc,
    Fok,
    Gtd,
}

impl std::fmt::Display for OrderDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderDuration::Gtc => write!(f, "GTC"),
            OrderDuration::Day => write!(f, "DAY"),
            OrderDuration::Ioc => write!(f, "IOC"),
            OrderDuration::Fok => write!(f, "FOK"),
            OrderDuration::Gtd => write!(f, "GTD"),
        }
    }
}

/// Order status as reported by the upstream provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingSubmit,
    Working,
    PendingModify,
    PendingCancel,
    Filled,
    Cancelled,
    Rejected,
    Suspended,
}

impl OrderStatus {
    /// The order will never become working again.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected)
    }
}

/// Order record, as carried by every order update event.
///
/// Prices are raw instrument prices; sizes are in size levels
/// (multiples of the instrument's size increment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: String,
    pub client_tag: Option<String>,
    pub alias: String,
    pub side: Side,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub size: i64,
    pub filled: i64,
    pub duration: OrderDuration,
    pub status: OrderStatus,
    pub updated_at: DateTime<Utc>,
}

impl OrderUpdate {
    pub fn unfilled(&self) -> i64 {
        self.size - self.filled
    }

    /// Copy of this record with another status, stamped now.
    pub fn with_status(&self, status: OrderStatus) -> Self {
        Self {
            status,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

impl std::fmt::Display for OrderUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{:?}] {} {} x{} (filled {})",
            self.order_id, self.status, self.alias, self.side, self.size, self.filled
        )?;
        if let Some(p) = self.limit_price {
            write!(f, " limit={}", p)?;
        }
        if let Some(p) = self.stop_price {
            write!(f, " stop={}", p)?;
        }
        if let Some(tag) = &self.client_tag {
            write!(f, " tag={}", tag)?;
        }
        Ok(())
    }
}

/// Order send command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSendParameters {
    pub alias: String,
    pub side: Side,
    /// Size in size levels
    pub size: i64,
    pub duration: OrderDuration,
    pub client_tag: String,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
}

impl OrderSendParameters {
    pub fn limit(
        alias: impl Into<String>,
        side: Side,
        size: i64,
        limit_price: f64,
        client_tag: impl Into<String>,
    ) -> Self {
        Self {
            alias: alias.into(),
            side,
            size,
            duration: OrderDuration::Gtc,
            client_tag: client_tag.into(),
            limit_price: Some(limit_price),
            stop_price: None,
        }
    }

    pub fn with_duration(mut self, duration: OrderDuration) -> Self {
        self.duration = duration;
        self
    }
}

/// Order modification command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderUpdateParameters {
    Move {
        order_id: String,
        limit_price: Option<f64>,
        stop_price: Option<f64>,
    },
    Cancel {
        order_id: String,
    },
}

impl OrderUpdateParameters {
    pub fn move_limit(order_id: impl Into<String>, limit_price: f64) -> Self {
        OrderUpdateParameters::Move {
            order_id: order_id.into(),
            limit_price: Some(limit_price),
            stop_price: None,
        }
    }

    pub fn cancel(order_id: impl Into<String>) -> Self {
        OrderUpdateParameters::Cancel {
            order_id: order_id.into(),
        }
    }

    pub fn order_id(&self) -> &str {
        match self {
            OrderUpdateParameters::Move { order_id, .. } | OrderUpdateParameters::Cancel { order_id } => {
                order_id
            }
        }
    }
}

/// Fill report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub order_id: String,
    pub execution_id: String,
    pub price: f64,
    /// Size in size levels
    pub size: i64,
    pub time: DateTime<Utc>,
}

/// Per-instrument account status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub alias: String,
    /// Net position in size levels, positive when long
    pub position: i64,
    /// Average entry price of the open position; `None` when flat
    pub average_price: Option<f64>,
    pub working_buys: i64,
    pub working_sells: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyBalance {
    pub currency: String,
    pub balance: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
}

/// Account balance snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub balances: Vec<CurrencyBalance>,
}

