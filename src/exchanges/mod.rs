//! Provider implementations - Pluggable upstream sources

pub mod paper;

pub use paper::PaperProvider;
