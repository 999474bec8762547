//! `quill onboard` — write a starter config file.

use quill_config::AppConfig;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir)?;
    std::fs::write(&config_path, AppConfig::default_toml())?;

    println!("Wrote starter config to {}", config_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Set your API key:  export QUILL_API_KEY=sk-...");
    println!("  2. Start chatting:    quill chat");
    Ok(())
}
