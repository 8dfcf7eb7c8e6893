//! # tor-orchestrator
//!
//! Async lifecycle management for a local Tor client.
//!
//! This crate launches a Tor process and drives it through the control
//! protocol until a circuit is up and a SOCKS endpoint is usable, allowing
//! you to:
//!
//! - Start Tor directly or through a pluggable transport (obfs4, Snowflake,
//!   meek, custom bridges)
//! - Follow bootstrap progress
//! - Switch transports on a running Tor without restarting it
//! - Push network changes (IPv4/IPv6 reachability) into Tor
//! - List and close circuits
//! - Stop everything at any point
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tor_orchestrator::{ManagerConfig, TorManager, Transport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tor_orchestrator::StartError> {
//!     let config = ManagerConfig::new().data_dir("/var/lib/myapp/tor");
//!     let manager = TorManager::builder(config).spawn();
//!
//!     let socks = manager
//!         .start(Transport::None, |progress| println!("Bootstrapped {}%", progress))
//!         .await?;
//!     println!("SOCKS proxy at {}", socks);
//!
//!     for circuit in manager.circuits().await {
//!         println!("circuit {} is {}", circuit.id, circuit.status);
//!     }
//!
//!     manager.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Transports
//!
//! Transport binaries are not bundled. Implement [`TransportProvider`] to
//! start them and report the `ClientTransportPlugin` and `Bridge` lines
//! each one needs, then hand it to the builder:
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use tor_orchestrator::{ManagerConfig, NoTransports, TorManager, Transport};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! # let my_provider = Arc::new(NoTransports);
//! let manager = TorManager::builder(ManagerConfig::new())
//!     .transports(my_provider)
//!     .spawn();
//! manager.start(Transport::Snowflake, |_| {}).await?;
//!
//! // Later, without restarting Tor:
//! manager.reconfigure(Transport::Obfs4).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Network Changes
//!
//! ```rust,no_run
//! # use tor_orchestrator::{IpStatus, ManagerConfig, NetworkWatch, TorManager};
//! # async fn example() {
//! let network = NetworkWatch::new(IpStatus::DualStack);
//! let manager = TorManager::builder(ManagerConfig::new())
//!     .network(&network)
//!     .spawn();
//!
//! // From the platform's reachability callback:
//! network.set(IpStatus::Ipv6Only);
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `test-utils`: mock control server and fake collaborators in
//!   [`test_utils`]

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]

pub mod auth;
pub mod bootstrap;
pub mod circuits;
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod manager;
pub mod network;
pub mod process;
pub mod protocol;
pub mod torrc;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export main types for convenience
pub use error::{ControlError, ProcessError, Result, StartError, StatusCode, TransportError};

pub use auth::AuthCookie;
pub use circuits::CircuitRegistry;
pub use config::ManagerConfig;
pub use control::{ControlAddress, ControlChannel, ObserverMode, SubscriptionHandle};
pub use events::{Event, EventType, StatusEvent};
pub use manager::{Snapshot, TorManager, TorManagerBuilder};
pub use network::{IpStatus, NetworkMonitor, NetworkWatch};
pub use process::{ProcessSupervisor, RunningProcess, TorBinary};
pub use protocol::{Reply, ReplyLine};
pub use torrc::{ProcessConfiguration, TorConf};
pub use transport::{NoTransports, Transport, TransportProvider};
pub use types::{Circuit, CircuitId, CircuitPurpose, CircuitStatus, Fingerprint, ServerSpec, Signal, Status};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
