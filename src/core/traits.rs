//! Core traits - The provider contract consumed by the core

use serde::{Deserialize, Serialize};

use crate::core::{OrderDuration, OrderSendParameters, OrderUpdateParameters, Result};
use crate::quant::InstrumentSpec;
use crate::registry::ListenerRegistry;

/// Upstream provider: a command sink plus an event source.
///
/// Commands are fire-and-forget. `Ok(())` only means the command was accepted
/// locally; the venue's answer arrives later through [`Provider::listeners`].
pub trait Provider: Send + Sync {
    /// Provider name (e.g., "paper", "deribit")
    fn name(&self) -> &str;

    /// Where this provider's events are dispatched
    fn listeners(&self) -> &ListenerRegistry;

    /// Instruments, pips and durations the provider can handle
    fn supported_features(&self) -> SupportedFeatures;

    /// Subscribe to an instrument with caller-chosen quantization
    fn subscribe(&self, spec: &InstrumentSpec) -> Result<()>;

    fn unsubscribe(&self, alias: &str) -> Result<()>;

    fn send_order(&self, order: &OrderSendParameters) -> Result<()>;

    /// Move or cancel a working order
    fn update_order(&self, update: &OrderUpdateParameters) -> Result<()>;

    /// Stop the provider; later commands are rejected
    fn close(&self) -> Result<()>;
}

/// Quantization options for one known instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentLimits {
    pub symbol: String,
    pub pip_options: Vec<f64>,
    /// Size multiplier = 1 / size increment
    pub size_multiplier_options: Vec<f64>,
}

impl InstrumentLimits {
    pub fn min_pip(&self) -> Option<f64> {
        self.pip_options.iter().copied().reduce(f64::min)
    }

    pub fn min_size_increment(&self) -> Option<f64> {
        self.size_multiplier_options
            .iter()
            .copied()
            .reduce(f64::max)
            .map(|m| 1.0 / m)
    }

    /// Whether `spec` is at least as coarse as the instrument allows.
    pub fn accepts(&self, spec: &InstrumentSpec) -> bool {
        const EPS: f64 = 1e-12;
        match (self.min_pip(), self.min_size_increment()) {
            (Some(pip), Some(size)) => spec.pip + EPS >= pip && spec.size_increment + EPS >= size,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportedFeatures {
    pub known_instruments: Vec<InstrumentLimits>,
    pub limit_durations: Vec<OrderDuration>,
    pub stop_orders: bool,
}

impl SupportedFeatures {
    pub fn instrument(&self, symbol: &str) -> Option<&InstrumentLimits> {
        self.known_instruments.iter().find(|i| i.symbol == symbol)
    }
}
