use portlink::exchanges::PaperProvider;
use portlink::{Config, Provider};

fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = Config::load_default()?;
    let provider = PaperProvider::from_config(&config.provider)?;
    let features = provider.supported_features();

    println!("Provider: {}", provider.name());
    println!("{:<20} {:>12} {:>20}", "SYMBOL", "MIN PIP", "MIN SIZE INCREMENT");
    println!("{}", "-".repeat(54));
    for limits in &features.known_instruments {
        println!(
            "{:<20} {:>12} {:>20}",
            limits.symbol,
            limits.min_pip().map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
            limits
                .min_size_increment()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".into())
        );
    }
    if features.known_instruments.is_empty() {
        println!("No instruments listed!");
    }

    let durations: Vec<String> = features.limit_durations.iter().map(|d| d.to_string()).collect();
    println!();
    println!("Limit durations: {}", durations.join(", "));
    println!("Stop orders:     {}", if features.stop_orders { "yes" } else { "no" });

    for spec in &config.instruments {
        let verdict = match features.instrument(&spec.symbol) {
            Some(limits) if limits.accepts(spec) => "ok",
            Some(_) => "finer than the venue allows",
            None => "not listed",
        };
        println!(
            "Configured {} (pip={}, size increment={}): {}",
            spec.symbol, spec.pip, spec.size_increment, verdict
        );
    }

    provider.close()?;
    Ok(())
}
