use sutra::{ObjectServer, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("Sutra Object Server v{}", sutra::version());

    let mut config = ServerConfig::default();
    if let Ok(port) = std::env::var("SUTRA_PORT") {
        config.port = port.parse()?;
        config.base_iri = format!("http://localhost:{}/", config.port);
    }
    if let Ok(address) = std::env::var("SUTRA_ADDRESS") {
        config.address = address;
    }

    let port = config.port;
    let server = ObjectServer::with_defaults(config)?;

    println!("Resources are served at /<path>; try:");
    println!(
        "  curl -X PUT -H 'Content-Type: text/plain' -d 'world' http://localhost:{}/hello",
        port
    );
    println!("  curl http://localhost:{}/hello", port);
    println!("  curl 'http://localhost:{}/hello?describe'", port);
    println!();

    if let Err(e) = server.start().await {
        eprintln!("Server error: {}", e);
    }

    Ok(())
}
