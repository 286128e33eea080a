//! Event consumers - logging and instrument bookkeeping

pub mod logger;

use crate::events::{Event, InstrumentEvent};
use crate::quant::InstrumentCatalog;
use crate::registry::EventHandler;

pub use logger::EventLogger;

/// Keeps the catalog in step with the provider: added instruments are
/// registered with the spec the venue confirmed, removed ones are dropped.
impl EventHandler for InstrumentCatalog {
    fn name(&self) -> &str {
        "instrument-catalog"
    }

    fn on_event(&self, event: &Event) -> anyhow::Result<()> {
        match event {
            Event::Instrument(InstrumentEvent::Added { alias, spec }) => self.register(alias.clone(), spec.clone())?,
            Event::Instrument(InstrumentEvent::Removed { alias }) => {
                self.remove(alias);
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quant::InstrumentSpec;

    #[test]
    fn test_catalog_follows_instrument_events() {
        let catalog = InstrumentCatalog::new();
        let spec = InstrumentSpec::new("ETHUSD_PERP", 0.1, 0.001).unwrap();
        catalog
            .on_event(&Event::Instrument(InstrumentEvent::Added {
                alias: "ETHUSD_PERP".into(),
                spec: spec.clone(),
            }))
            .unwrap();
        assert_eq!(catalog.get("ETHUSD_PERP"), Some(spec));

        catalog
            .on_event(&Event::Instrument(InstrumentEvent::Removed {
                alias: "ETHUSD_PERP".into(),
            }))
            .unwrap();
        assert!(catalog.get("ETHUSD_PERP").is_none());
    }
}
