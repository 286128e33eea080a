//! Event model - everything the upstream provider can tell us
//!
//! Market-data payloads are level-valued: convert with the instrument's
//! [`InstrumentSpec`](crate::quant::InstrumentSpec) before showing them to humans.

use serde::{Deserialize, Serialize};

use crate::core::types::{BalanceInfo, ExecutionInfo, OrderUpdate, StatusInfo};
use crate::quant::InstrumentSpec;

/// Handler selection key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Login and connection status, system messages
    Admin,
    /// Instrument subscription lifecycle
    Instrument,
    /// Trades, depth, market mode
    MarketData,
    /// Orders, executions, account status, balances
    Trading,
}

impl EventCategory {
    pub const ALL: [EventCategory; 4] = [
        EventCategory::Admin,
        EventCategory::Instrument,
        EventCategory::MarketData,
        EventCategory::Trading,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketMode {
    Normal,
    Closed,
    Halted,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginFailedReason {
    WrongCredentials,
    NoInternet,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectionReason {
    ClosedByUser,
    NoInternet,
    ExchangeUnavailable,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemTextKind {
    Info,
    Warning,
    Error,
}

/// Admin / connection events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    LoginSuccessful,
    LoginFailed { reason: LoginFailedReason, message: String },
    ConnectionLost { reason: DisconnectionReason, message: String },
    ConnectionRestored,
    SystemText { message: String, kind: SystemTextKind },
    UserMessage(serde_json::Value),
}

/// Instrument subscription lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InstrumentEvent {
    Added { alias: String, spec: InstrumentSpec },
    Removed { alias: String },
    NotFound { symbol: String },
    AlreadySubscribed { symbol: String },
}

/// Everything delivered by an upstream provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Trade {
        alias: String,
        /// Fractional levels are allowed for trades between pips
        price_level: f64,
        size_level: i64,
        bid_aggressor: bool,
    },
    Depth {
        alias: String,
        is_bid: bool,
        price_level: i64,
        /// 0 removes the level
        size_level: i64,
    },
    MarketMode {
        alias: String,
        mode: MarketMode,
    },
    OrderUpdated(OrderUpdate),
    OrderExecuted(ExecutionInfo),
    AccountStatus(StatusInfo),
    Balance(BalanceInfo),
    Connection(ConnectionEvent),
    Instrument(InstrumentEvent),
}

impl Event {
    pub fn category(&self) -> EventCategory {
        match self {
            Event::Trade { .. } | Event::Depth { .. } | Event::MarketMode { .. } => EventCategory::MarketData,
            Event::OrderUpdated(_) | Event::OrderExecuted(_) | Event::AccountStatus(_) | Event::Balance(_) => {
                EventCategory::Trading
            }
            Event::Connection(_) => EventCategory::Admin,
            Event::Instrument(_) => EventCategory::Instrument,
        }
    }

    /// Instrument alias, for events tied to one instrument.
    pub fn alias(&self) -> Option<&str> {
        match self {
            Event::Trade { alias, .. } | Event::Depth { alias, .. } | Event::MarketMode { alias, .. } => Some(alias),
            Event::OrderUpdated(o) => Some(&o.alias),
            Event::AccountStatus(s) => Some(&s.alias),
            Event::Instrument(InstrumentEvent::Added { alias, .. } | InstrumentEvent::Removed { alias }) => {
                Some(alias)
            }
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::Trade { .. } => "trade",
            Event::Depth { .. } => "depth",
            Event::MarketMode { .. } => "market_mode",
            Event::OrderUpdated(_) => "order_updated",
            Event::OrderExecuted(_) => "order_executed",
            Event::AccountStatus(_) => "account_status",
            Event::Balance(_) => "balance",
            Event::Connection(_) => "connection",
            Event::Instrument(_) => "instrument",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let trade = Event::Trade {
            alias: "PI_ETHUSD".into(),
            price_level: 18000.0,
            size_level: 5,
            bid_aggressor: true,
        };
        assert_eq!(trade.category(), EventCategory::MarketData);
        assert_eq!(trade.alias(), Some("PI_ETHUSD"));

        let login = Event::Connection(ConnectionEvent::LoginSuccessful);
        assert_eq!(login.category(), EventCategory::Admin);
        assert_eq!(login.alias(), None);

        let removed = Event::Instrument(InstrumentEvent::Removed { alias: "PI_ETHUSD".into() });
        assert_eq!(removed.category(), EventCategory::Instrument);
        assert_eq!(removed.kind(), "instrument");
    }

    #[test]
    fn test_user_message_round_trips_as_json() {
        let event = Event::Connection(ConnectionEvent::UserMessage(serde_json::json!({"note": "hello"})));
        let text = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&text).unwrap();
        assert_eq!(back, event);
    }
}
