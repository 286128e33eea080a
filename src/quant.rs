//! Quantization model - raw prices/sizes <-> integer levels
//!
//! Every price on the wire is `level * pip`, every size `level * size_increment`.
//! Two derived reals are equal only if their rounded levels are equal; floats
//! are never compared directly.

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::core::{Error, Result};

fn check_increment(increment: f64) -> Result<()> {
    if increment.is_finite() && increment > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidConfiguration(format!(
            "increment must be a positive finite number, got {}",
            increment
        )))
    }
}

/// 2^63, the first ratio that no longer fits a level
const LEVEL_LIMIT: f64 = 9_223_372_036_854_775_808.0;

/// Round `real / increment` to the nearest level (ties away from zero).
pub fn to_level(real: f64, increment: f64) -> Result<i64> {
    check_increment(increment)?;
    if !real.is_finite() {
        return Err(Error::InvalidValue(format!("cannot quantize {}", real)));
    }
    let ratio = (real / increment).round();
    if !(-LEVEL_LIMIT..LEVEL_LIMIT).contains(&ratio) {
        return Err(Error::InvalidValue(format!(
            "{} / {} is outside the level range",
            real, increment
        )));
    }
    Ok(ratio as i64)
}

/// `level * increment`.
pub fn to_real(level: i64, increment: f64) -> Result<f64> {
    check_increment(increment)?;
    Ok(level as f64 * increment)
}

/// True iff both reals round to the same level.
pub fn levels_equal(a: f64, b: f64, increment: f64) -> Result<bool> {
    Ok(to_level(a, increment)? == to_level(b, increment)?)
}

/// Per-instrument quantization, fixed for the lifetime of a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub symbol: String,
    pub pip: f64,
    pub size_increment: f64,
}

impl InstrumentSpec {
    pub fn new(symbol: impl Into<String>, pip: f64, size_increment: f64) -> Result<Self> {
        let spec = Self {
            symbol: symbol.into(),
            pip,
            size_increment,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        check_increment(self.pip).map_err(|_| {
            Error::InvalidConfiguration(format!("{}: pip must be > 0, got {}", self.symbol, self.pip))
        })?;
        check_increment(self.size_increment).map_err(|_| {
            Error::InvalidConfiguration(format!(
                "{}: size increment must be > 0, got {}",
                self.symbol, self.size_increment
            ))
        })
    }

    /// Providers that speak in size multipliers want `1 / size_increment`.
    pub fn size_multiplier(&self) -> f64 {
        1.0 / self.size_increment
    }

    pub fn price_level(&self, price: f64) -> Result<i64> {
        to_level(price, self.pip)
    }

    pub fn size_level(&self, size: f64) -> Result<i64> {
        to_level(size, self.size_increment)
    }

    pub fn price(&self, level: i64) -> Result<f64> {
        to_real(level, self.pip)
    }

    /// Trade prices may arrive as fractional levels.
    pub fn price_from_fractional(&self, level: f64) -> f64 {
        level * self.pip
    }

    pub fn size(&self, level: i64) -> Result<f64> {
        to_real(level, self.size_increment)
    }

    /// Exact decimal rendering of `level * pip` (0.1 * 3 prints as 0.3).
    pub fn price_decimal(&self, level: i64) -> Result<Decimal> {
        exact(level, self.pip)
    }

    pub fn size_decimal(&self, level: i64) -> Result<Decimal> {
        exact(level, self.size_increment)
    }

    /// Decimal rendering when it fits, plain `f64` otherwise.
    pub fn display_price(&self, level: i64) -> String {
        self.price_decimal(level)
            .map(|d| d.to_string())
            .unwrap_or_else(|_| (level as f64 * self.pip).to_string())
    }

    pub fn display_size(&self, level: i64) -> String {
        self.size_decimal(level)
            .map(|d| d.to_string())
            .unwrap_or_else(|_| (level as f64 * self.size_increment).to_string())
    }
}

fn exact(level: i64, increment: f64) -> Result<Decimal> {
    let inc = Decimal::try_from(increment)
        .map_err(|e| Error::InvalidValue(format!("increment {} has no decimal form: {}", increment, e)))?;
    Decimal::from(level)
        .checked_mul(inc)
        .map(|d| d.normalize())
        .ok_or_else(|| Error::InvalidValue(format!("{} x {} overflows a decimal", level, increment)))
}

/// Alias -> quantization spec, filled as instruments are subscribed.
#[derive(Debug, Default)]
pub struct InstrumentCatalog {
    specs: RwLock<HashMap<String, InstrumentSpec>>,
}

impl InstrumentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, alias: impl Into<String>, spec: InstrumentSpec) -> Result<()> {
        spec.validate()?;
        self.specs.write().insert(alias.into(), spec);
        Ok(())
    }

    pub fn remove(&self, alias: &str) -> Option<InstrumentSpec> {
        self.specs.write().remove(alias)
    }

    pub fn get(&self, alias: &str) -> Option<InstrumentSpec> {
        self.specs.read().get(alias).cloned()
    }

    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.specs.read().keys().cloned().collect();
        aliases.sort();
        aliases
    }
}
