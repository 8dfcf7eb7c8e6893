//! Listing and closing circuits.

use crate::control::ControlChannel;
use crate::error::Result;
use crate::types::{Circuit, CircuitId};
use std::sync::Arc;
use tracing::{debug, warn};

/// `GETINFO` key listing circuits.
pub const CIRCUIT_STATUS_KEY: &str = "circuit-status";

/// Circuit queries against the current session, if there is one.
///
/// Failures are logged and reported as an empty list or `false`.
#[derive(Debug, Clone, Default)]
pub struct CircuitRegistry {
    channel: Option<Arc<ControlChannel>>,
}

impl CircuitRegistry {
    /// Registry over `channel`; `None` when no session exists.
    pub fn new(channel: Option<Arc<ControlChannel>>) -> Self {
        Self { channel }
    }

    /// Current circuits. Empty without a session.
    pub async fn list(&self) -> Vec<Circuit> {
        let Some(channel) = &self.channel else {
            return Vec::new();
        };
        match fetch_circuits(channel).await {
            Ok(circuits) => circuits,
            Err(e) => {
                warn!("Listing circuits failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Close every circuit in `ids`. `true` only if each close succeeded;
    /// `false` without a session.
    pub async fn close(&self, ids: &[CircuitId]) -> bool {
        let Some(channel) = &self.channel else {
            return false;
        };

        let mut all_closed = true;
        for id in ids {
            if let Err(e) = channel.close_circuit(*id).await {
                warn!(circuit = %id, "Closing circuit failed: {}", e);
                all_closed = false;
            }
        }
        all_closed
    }
}

/// Parse `GETINFO circuit-status`.
pub async fn fetch_circuits(channel: &ControlChannel) -> Result<Vec<Circuit>> {
    let status = channel.get_info(CIRCUIT_STATUS_KEY).await?;
    let circuits: Vec<Circuit> = status
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(Circuit::parse_status_line)
        .collect();
    debug!(count = circuits.len(), "Fetched circuits");
    Ok(circuits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlAddress;
    use crate::test_utils::{MockControlServer, MockScript};
    use crate::types::CircuitStatus;

    const FP: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

    async fn registry_for(script: MockScript) -> (MockControlServer, CircuitRegistry) {
        let server = MockControlServer::start(script).await.unwrap();
        let channel = ControlChannel::new(ControlAddress::Tcp(server.addr()));
        channel.connect().await.unwrap();
        (server, CircuitRegistry::new(Some(Arc::new(channel))))
    }

    #[tokio::test]
    async fn test_no_session() {
        let registry = CircuitRegistry::default();
        assert!(registry.list().await.is_empty());
        assert!(!registry.close(&[CircuitId(1)]).await);
    }

    #[tokio::test]
    async fn test_list_parses_data_block() {
        let script = MockScript {
            circuit_status: vec![
                format!("1 BUILT ${}~Guard PURPOSE=GENERAL", FP),
                "2 LAUNCHED BUILD_FLAGS=NEED_CAPACITY".to_string(),
                "garbage".to_string(),
            ],
            ..MockScript::default()
        };
        let (_server, registry) = registry_for(script).await;

        let circuits = registry.list().await;
        assert_eq!(circuits.len(), 2);
        assert_eq!(circuits[0].status, CircuitStatus::Built);
        assert_eq!(circuits[1].id, CircuitId(2));
    }

    #[tokio::test]
    async fn test_close_sends_one_command_per_circuit() {
        let (server, registry) = registry_for(MockScript::default()).await;
        assert!(registry.close(&[CircuitId(3), CircuitId(9)]).await);
        assert_eq!(server.commands(), vec!["CLOSECIRCUIT 3", "CLOSECIRCUIT 9"]);
    }

    #[tokio::test]
    async fn test_close_reports_partial_failure() {
        let script = MockScript {
            reject: vec![("CLOSECIRCUIT 9".to_string(), 552)],
            ..MockScript::default()
        };
        let (server, registry) = registry_for(script).await;
        assert!(!registry.close(&[CircuitId(3), CircuitId(9), CircuitId(4)]).await);
        assert_eq!(server.commands().len(), 3);
    }

    #[tokio::test]
    async fn test_disconnected_session() {
        let (_server, registry) = registry_for(MockScript::default()).await;
        if let Some(channel) = &registry.channel {
            channel.disconnect();
        }
        assert!(registry.list().await.is_empty());
        assert!(!registry.close(&[CircuitId(1)]).await);
    }
}
