//! portlink - Core Library
//! Quantized market/order event model with synchronous order confirmation

// Public modules
pub mod core;
pub mod quant;
pub mod events;
pub mod registry;
pub mod execution;
pub mod exchanges;
pub mod feeds;

// Re-exports
pub use core::{Config, Error, Provider, Result};
pub use events::{Event, EventCategory};
pub use execution::{CancelToken, ConfirmationWaiter, WaitPolicy, WorkingOrders};
pub use quant::{InstrumentCatalog, InstrumentSpec};
pub use registry::{EventHandler, ListenerRegistry};
