//! Example: Start Tor and wait for a circuit
//!
//! Launches the `tor` binary (override with `TOR_BINARY`), prints bootstrap
//! progress, lists circuits and stops again.
//!
//! Run with: RUST_LOG=tor_orchestrator=debug cargo run --example start

use std::time::Duration;
use tor_orchestrator::{ManagerConfig, StartError, TorManager, Transport};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), StartError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut config = ManagerConfig::new();
    if let Ok(binary) = std::env::var("TOR_BINARY") {
        config = config.tor_binary(binary);
    }
    println!("Data directory: {}", config.data_dir.display());

    let manager = TorManager::builder(config).spawn();

    println!("Starting Tor...");
    let socks = manager
        .start(Transport::None, |progress| println!("  bootstrapped {}%", progress))
        .await?;
    println!("SOCKS proxy listening on {}", socks);

    tokio::time::sleep(Duration::from_secs(2)).await;

    let circuits = manager.circuits().await;
    println!("\nActive circuits: {}", circuits.len());
    for circuit in circuits.iter().take(5) {
        println!(
            "  Circuit {}: {} ({} hops)",
            circuit.id,
            circuit.status,
            circuit.path.len()
        );
    }

    manager.stop().await;
    println!("\nStopped.");

    Ok(())
}
