//! `handoff config`: configuration management commands.

use handoff_config::HandoffConfig;

pub fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = HandoffConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let has_key = config.has_api_key();
    config.api_key = None;

    println!("{}", toml::to_string_pretty(&config)?);
    println!("# API key: {}", if has_key { "set" } else { "not set" });
    Ok(())
}

pub fn path() {
    let config_path = HandoffConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
}

pub fn print_default() {
    print!("{}", HandoffConfig::default_toml());
}
