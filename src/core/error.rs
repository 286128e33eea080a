//! Error handling - Hierarchical errors for the event model and waiters

use std::time::Duration;

use thiserror::Error;

use crate::core::types::OrderUpdate;
use crate::events::EventCategory;

pub type Result<T> = std::result::Result<T, Error>;

/// portlink error hierarchy
#[derive(Debug, Error)]
pub enum Error {
    /// Non-positive or non-finite pip / size increment
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A real value that cannot be quantized (NaN, infinite)
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// The awaited order disappeared from the working-order table
    #[error("order {order_id} is no longer open (last known: {})", describe(.last_known))]
    OrderNoLongerOpen {
        order_id: String,
        last_known: Option<Box<OrderUpdate>>,
    },

    /// A registered event handler failed; contained at the dispatch boundary
    #[error("handler '{handler}' failed on {category:?} event: {message}")]
    HandlerFailure {
        handler: String,
        category: EventCategory,
        message: String,
    },

    /// Caller-imposed deadline exceeded while waiting
    #[error("timed out after {waited:?} waiting for {what} (last known: {})", describe(.last_known))]
    Timeout {
        what: String,
        waited: Duration,
        last_known: Option<Box<OrderUpdate>>,
    },

    /// Caller cancelled the wait
    #[error("cancelled while waiting for {what} (last known: {})", describe(.last_known))]
    Cancelled {
        what: String,
        last_known: Option<Box<OrderUpdate>>,
    },

    /// Configuration file errors
    #[error("Config: {0}")]
    Config(String),

    /// Invalid state (e.g. command sent to a closed provider)
    #[error("Invalid state: {0}")]
    InvalidState(String),

}

impl Error {
    /// Last order state observed before the failure, if the error carries one.
    pub fn last_known(&self) -> Option<&OrderUpdate> {
        match self {
            Error::OrderNoLongerOpen { last_known, .. }
            | Error::Timeout { last_known, .. }
            | Error::Cancelled { last_known, .. } => last_known.as_deref(),
            _ => None,
        }
    }
}

fn describe(order: &Option<Box<OrderUpdate>>) -> String {
    match order {
        Some(o) => o.to_string(),
        None => "none".to_string(),
    }
}
