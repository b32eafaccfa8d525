//! `cabm config`: configuration management commands.

use cabm_config::AppConfig;

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", redacted_toml(config)?);
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", config_path().display());
    Ok(())
}

pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path();
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }

    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(&path, AppConfig::default_toml()).await?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

fn config_path() -> std::path::PathBuf {
    AppConfig::config_dir().join("config.toml")
}

/// Serialize with every API key masked.
fn redacted_toml(mut config: AppConfig) -> Result<String, toml::ser::Error> {
    let mask = |key: &mut Option<String>| {
        if key.is_some() {
            *key = Some("***".into());
        }
    };
    mask(&mut config.api_key);
    for provider in config.providers.values_mut() {
        mask(&mut provider.api_key);
    }
    toml::to_string_pretty(&config)
}
