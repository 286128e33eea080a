//! Configuration - Type-safe, validated config
//!
//! Loaded from `config.toml` (or the path in `PORTLINK_CONFIG`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::{Error, OrderDuration, Result, Side};
use crate::execution::WaitPolicy;
use crate::quant::InstrumentSpec;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub waiter: WaiterConfig,

    /// Selected quantization per instrument
    #[serde(default)]
    pub instruments: Vec<InstrumentSpec>,

    /// Order walkthrough run by the `portlink` binary
    pub walkthrough: Option<WalkthroughConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default tracing filter, overridden by RUST_LOG
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,

    /// Simulated delay before the paper venue acknowledges a command
    #[serde(default = "default_ack_latency")]
    pub ack_latency_ms: u64,

    /// Instruments the paper venue lists
    #[serde(default)]
    pub listed: Vec<ListedInstrument>,

    /// Synthetic depth/trade ticks for subscribed instruments; off when absent
    pub market_data_interval_ms: Option<u64>,

    /// Fixed seed for the synthetic feed, for reproducible runs
    pub market_data_seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListedInstrument {
    pub symbol: String,
    pub min_pip: f64,
    pub min_size_increment: f64,
    /// Where the synthetic feed starts its random walk
    #[serde(default)]
    pub reference_price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaiterConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// No timeout when absent
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkthroughConfig {
    pub symbol: String,
    pub side: Side,
    /// Real size, rounded to the instrument's size increment
    pub size: f64,
    pub start_price: f64,
    pub price_step: f64,
    pub moves: usize,
    #[serde(default = "default_duration")]
    pub duration: OrderDuration,
    pub client_tag: Option<String>,
    /// Pause between moves so the order can be watched
    #[serde(default)]
    pub pause_ms: u64,
}

fn default_ack_latency() -> u64 {
    50
}
fn default_poll_interval() -> u64 {
    200
}
fn default_duration() -> OrderDuration {
    OrderDuration::Gtc
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "paper".to_string(),
            ack_latency_ms: default_ack_latency(),
            listed: vec![],
            market_data_interval_ms: None,
            market_data_seed: None,
        }
    }
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            timeout_ms: None,
        }
    }
}

impl WaiterConfig {
    pub fn policy(&self) -> WaitPolicy {
        let policy = WaitPolicy::polling_every(Duration::from_millis(self.poll_interval_ms));
        match self.timeout_ms {
            Some(ms) => policy.with_timeout(Duration::from_millis(ms)),
            None => policy,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app: AppConfig {
                log_level: "info".to_string(),
            },
            provider: ProviderConfig {
                listed: vec![ListedInstrument {
                    symbol: "BTC-PERPETUAL".to_string(),
                    min_pip: 0.5,
                    min_size_increment: 10.0,
                    reference_price: Some(25_000.0),
                }],
                ..ProviderConfig::default()
            },
            waiter: WaiterConfig {
                poll_interval_ms: 200,
                timeout_ms: Some(30_000),
            },
            instruments: vec![InstrumentSpec {
                symbol: "BTC-PERPETUAL".to_string(),
                pip: 0.5,
                size_increment: 10.0,
            }],
            walkthrough: Some(WalkthroughConfig {
                symbol: "BTC-PERPETUAL".to_string(),
                side: Side::Buy,
                size: 20.0,
                start_price: 25_000.0,
                price_step: -1_000.0,
                moves: 5,
                duration: OrderDuration::Gtc,
                client_tag: Some("MY_ORDER_1".to_string()),
                pause_ms: 0,
            }),
        }
    }
}

fn listed_reference(listed: &[ListedInstrument]) -> Option<&str> {
    listed
        .iter()
        .find(|l| l.reference_price.is_some_and(|p| !(p.is_finite() && p > 0.0)))
        .map(|l| l.symbol.as_str())
}

impl Config {
    /// Load from TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// `PORTLINK_CONFIG`, then `config.toml`, then defaults.
    pub fn load_default() -> Result<Self> {
        let path = std::env::var("PORTLINK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));
        if path.exists() {
            tracing::info!("📋 Loaded config from {}", path.display());
            Self::load(&path)
        } else {
            tracing::warn!("⚠️ No {} found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        for spec in &self.instruments {
            spec.validate()?;
        }
        for listed in &self.provider.listed {
            if !(listed.min_pip > 0.0 && listed.min_size_increment > 0.0) {
                return Err(Error::InvalidConfiguration(format!(
                    "{}: listed minimums must be > 0",
                    listed.symbol
                )));
            }
        }
        if let Some(p) = listed_reference(&self.provider.listed) {
            return Err(Error::InvalidConfiguration(format!(
                "{}: reference_price must be a positive finite number",
                p
            )));
        }
        if self.provider.market_data_interval_ms == Some(0) {
            return Err(Error::InvalidConfiguration(
                "provider.market_data_interval_ms must be > 0".into(),
            ));
        }
        if self.waiter.poll_interval_ms == 0 {
            return Err(Error::InvalidConfiguration("waiter.poll_interval_ms must be > 0".into()));
        }
        if let Some(w) = &self.walkthrough {
            if self.instrument(&w.symbol).is_none() {
                return Err(Error::Config(format!(
                    "walkthrough symbol {} has no [[instruments]] entry",
                    w.symbol
                )));
            }
        }
        Ok(())
    }

    /// Selected quantization for `symbol`
    pub fn instrument(&self, symbol: &str) -> Option<&InstrumentSpec> {
        self.instruments.iter().find(|i| i.symbol == symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[app]
log_level = "debug"

[provider]
name = "paper"
ack_latency_ms = 10

[[provider.listed]]
symbol = "PI_ETHUSD"
min_pip = 0.05
min_size_increment = 0.001

[waiter]
poll_interval_ms = 50
timeout_ms = 1000

[[instruments]]
symbol = "PI_ETHUSD"
pip = 0.1
size_increment = 0.001
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.app.log_level, "debug");
        assert_eq!(config.provider.ack_latency_ms, 10);
        assert_eq!(config.instrument("PI_ETHUSD").unwrap().pip, 0.1);
        assert!(config.walkthrough.is_none());

        let policy = config.waiter.policy();
        assert_eq!(policy.poll_interval, Duration::from_millis(50));
        assert_eq!(policy.timeout, Some(Duration::from_millis(1000)));
    }

    #[test]
    fn test_rejects_non_positive_pip() {
        let broken = SAMPLE.replace("pip = 0.1", "pip = 0.0");
        assert!(matches!(Config::parse(&broken), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_market_data_settings() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.provider.market_data_interval_ms, None);
        assert_eq!(config.provider.listed[0].reference_price, None);

        let with_feed = SAMPLE.replace(
            "ack_latency_ms = 10",
            "ack_latency_ms = 10\nmarket_data_interval_ms = 250\nmarket_data_seed = 7",
        );
        let config = Config::parse(&with_feed).unwrap();
        assert_eq!(config.provider.market_data_interval_ms, Some(250));
        assert_eq!(config.provider.market_data_seed, Some(7));

        let zero = SAMPLE.replace("ack_latency_ms = 10", "ack_latency_ms = 10\nmarket_data_interval_ms = 0");
        assert!(matches!(Config::parse(&zero), Err(Error::InvalidConfiguration(_))));

        let negative = SAMPLE.replace("min_size_increment = 0.001", "min_size_increment = 0.001\nreference_price = -5.0");
        assert!(matches!(Config::parse(&negative), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(Config::parse("not toml ["), Err(Error::Config(_))));
    }

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.walkthrough.unwrap().moves, 5);
    }
}
