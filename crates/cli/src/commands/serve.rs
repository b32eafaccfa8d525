//! `cabm serve`: start the HTTP gateway.

use cabm_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("CABM Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Stream:    POST /api/chat/stream");

    cabm_gateway::start(config).await?;

    Ok(())
}
