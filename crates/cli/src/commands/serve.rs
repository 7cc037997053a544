//! `cxloop serve`: start the HTTP API server.

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config()?;

    if let Some(port) = port_override {
        config.server.port = port;
    }

    println!("cxloop API");
    println!("   Listening: {}:{}", config.server.host, config.server.port);
    println!("   Model:     {}", config.provider.model);
    match config.sessions.ttl_secs {
        Some(ttl) => println!("   Session TTL: {ttl}s"),
        None => println!("   Session TTL: none"),
    }

    cxloop_gateway::start(config).await?;

    Ok(())
}
