#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use cryptogram_common::init_tracing;
use cryptogram_relay::{parse_port, RelayConfig, RelayServer};
use gram_core::DEFAULT_SERVER_PORT;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cryptogram-relay")]
#[command(about = "CryptoGram relay - pairs peers and forwards their encrypted chat")]
struct Args {
    /// UDP port to listen on
    port: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let port = match parse_port(args.port.as_deref()) {
        Some(port) => port,
        None => {
            eprintln!("Usage: cryptogram-relay [port]");
            eprintln!("Falling back to the default port {}.", DEFAULT_SERVER_PORT);
            DEFAULT_SERVER_PORT
        }
    };

    info!("Starting cryptogram-relay v{}", env!("CARGO_PKG_VERSION"));
    let server = Arc::new(RelayServer::bind(RelayConfig::with_port(port)).await?);
    info!("CryptoGram lobby running on port {}.", server.local_addr()?.port());

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    Ok(())
}
