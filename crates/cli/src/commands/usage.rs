//! `quill usage` — show known model pricing and storage locations.

use quill_config::AppConfig;
use quill_telemetry::PricingTable;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let table = PricingTable::with_defaults();

    println!("Session directory: {}", config.store.resolved_dir().display());
    println!();
    println!("Known model families (USD per 1M tokens):");
    for model in table.models() {
        let pricing = table.lookup(&model);
        match pricing.cached_per_m {
            Some(cached) => println!(
                "  {model:<24} in ${:<7} out ${:<7} cached ${cached}",
                pricing.input_per_m, pricing.output_per_m
            ),
            None => println!(
                "  {model:<24} in ${:<7} out ${:<7}",
                pricing.input_per_m, pricing.output_per_m
            ),
        }
    }
    Ok(())
}
