//! Example demonstrating EQ configuration and presets
//!
//! Run with: cargo run --package minstrel-core --example config_demo

use minstrel_core::domain::config::{EqConfig, PresetManager};
use minstrel_core::domain::{FilterType, ResponseCurveSampler};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("minstrel_core=debug,info")
        .init();

    println!("=== Minstrel Configuration Demo ===\n");

    println!("1. Creating factory default configuration...");
    let mut config = EqConfig::factory_default();
    println!("   Created configuration with {} bands", config.bands.len());

    println!("\n2. Shaping the bands...");
    config.bands[0].gain_db = 4.0;
    config.bands[1].gain_db = -3.0;
    config.bands[1].q = 2.5;
    config.bands[2].kind = FilterType::LowPass;
    config.bands[2].frequency_hz = 12000.0;

    let work_dir = std::env::temp_dir().join("minstrel_demo");
    let config_path = work_dir.join("config.toml");

    println!("\n3. Saving configuration to {}...", config_path.display());
    config.save_to_file(&config_path).await?;

    println!("\n4. Loading it back...");
    let loaded = EqConfig::load_from_file(&config_path).await?;
    for (i, band) in loaded.bands.iter().enumerate() {
        println!(
            "   {}. {:<10} {:>8.1} Hz {:>6.1} dB  Q {:.2}",
            i + 1,
            band.kind.name(),
            band.frequency_hz,
            band.gain_db,
            band.q
        );
    }

    println!("\n5. Response curve of the loaded chain:");
    let chain = loaded.to_chain();
    let curve = ResponseCurveSampler::new(12).sample(&chain);
    for point in curve.iter() {
        println!("   {:>8.1} Hz  {:>6.2} dB", point.frequency_hz, point.gain_db);
    }

    println!("\n6. Preset management:");
    let presets = PresetManager::new(work_dir.join("presets"));
    presets.save_preset("warm", &loaded).await?;
    for name in presets.list_presets().await? {
        println!("   - {}", name);
    }

    println!("\n=== Demo Complete ===");

    std::fs::remove_dir_all(work_dir)?;

    Ok(())
}
