//! Pluggable transports.
//!
//! The transports themselves live outside this crate. A [`TransportProvider`]
//! starts and stops them and reports the Tor options each one needs;
//! [`TransportManager`] adds the bridge and `UseBridges` logic on top.

use crate::error::TransportError;
use crate::torrc::TorConf;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Which transport Tor should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Transport {
    /// Direct connection, no bridges.
    #[default]
    None,
    /// obfs4 with built-in bridges.
    Obfs4,
    /// Snowflake.
    Snowflake,
    /// meek over Azure.
    MeekAzure,
    /// User-supplied bridge lines.
    Custom,
}

impl Transport {
    /// Every transport that has to be stopped before another one starts.
    pub const STARTABLE: [Transport; 4] = [
        Transport::Custom,
        Transport::MeekAzure,
        Transport::Obfs4,
        Transport::Snowflake,
    ];

    /// Get the transport name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::None => "none",
            Transport::Obfs4 => "obfs4",
            Transport::Snowflake => "snowflake",
            Transport::MeekAzure => "meek-azure",
            Transport::Custom => "custom",
        }
    }

    /// Whether Tor must go through bridges for this transport.
    pub fn uses_bridges(&self) -> bool {
        *self != Transport::None
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The external transport implementations.
#[async_trait]
pub trait TransportProvider: Send + Sync {
    /// Start `transport`. Starting [`Transport::None`] should succeed trivially.
    async fn start(&self, transport: Transport) -> Result<(), TransportError>;

    /// Stop `transport`. Stopping one that is not running is a no-op.
    fn stop(&self, transport: Transport);

    /// Tor options the transport needs, e.g. `ClientTransportPlugin` and its
    /// built-in `Bridge` lines.
    fn tor_conf(&self, transport: Transport) -> TorConf;

    /// User-supplied bridge lines for [`Transport::Custom`].
    fn custom_bridges(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A provider for setups that never use bridges.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTransports;

#[async_trait]
impl TransportProvider for NoTransports {
    async fn start(&self, transport: Transport) -> Result<(), TransportError> {
        match transport {
            Transport::None => Ok(()),
            other => Err(TransportError::new(other.as_str(), "no transport provider configured")),
        }
    }

    fn stop(&self, _transport: Transport) {}

    fn tor_conf(&self, _transport: Transport) -> TorConf {
        TorConf::new()
    }
}

/// Starts, stops and configures the selected transport.
#[derive(Clone)]
pub struct TransportManager {
    provider: Arc<dyn TransportProvider>,
}

impl TransportManager {
    /// Wrap a provider.
    pub fn new(provider: Arc<dyn TransportProvider>) -> Self {
        Self { provider }
    }

    /// Stop every known transport, then start `transport`.
    pub async fn activate(&self, transport: Transport) -> Result<(), TransportError> {
        for other in Transport::STARTABLE {
            self.provider.stop(other);
        }
        debug!(%transport, "Starting transport");
        self.provider.start(transport).await
    }

    /// Stop `transport`.
    pub fn deactivate(&self, transport: Transport) {
        debug!(%transport, "Stopping transport");
        self.provider.stop(transport);
    }

    /// Options for `transport`: provider fragments, custom bridges, then
    /// `UseBridges`.
    pub fn tor_conf(&self, transport: Transport) -> TorConf {
        let mut conf = self.provider.tor_conf(transport);
        if transport == Transport::Custom {
            for line in self.provider.custom_bridges() {
                conf.push("Bridge", line);
            }
        }
        conf.push("UseBridges", if transport.uses_bridges() { "1" } else { "0" });
        conf
    }
}

impl fmt::Debug for TransportManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportManager").finish_non_exhaustive()
    }
}
