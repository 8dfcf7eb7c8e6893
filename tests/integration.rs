//! Integration tests for tor-orchestrator.
//!
//! Most tests drive a [`TorManager`] against the mock control server from
//! `test_utils`, with a fake supervisor standing in for the Tor binary.
//!
//! # Running against a real Tor
//!
//! The tests in `real_tor` are ignored by default. They need a `tor` binary
//! and network access:
//!
//! ```sh
//! TOR_BINARY=/usr/bin/tor cargo test --test integration -- --ignored
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;
use tor_orchestrator::test_utils::{fixtures, FakeSupervisor, MockControlServer, MockScript, StubTransports};
use tor_orchestrator::{
    CircuitStatus, IpStatus, ManagerConfig, NetworkWatch, StartError, Status, TorManager, Transport,
};

/// Default timeout for operations
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

struct Fixture {
    server: MockControlServer,
    supervisor: Arc<FakeSupervisor>,
    transports: Arc<StubTransports>,
    network: NetworkWatch,
    manager: TorManager,
    _dir: tempfile::TempDir,
}

/// Manager wired to a fresh mock server running `script`.
async fn fixture(script: MockScript) -> Fixture {
    let server = MockControlServer::start(script).await.expect("mock server");
    let dir = tempfile::tempdir().expect("temp dir");
    let config = ManagerConfig::new()
        .data_dir(dir.path().join("tor"))
        .settle_delay(Duration::from_millis(10));
    let supervisor = Arc::new(FakeSupervisor::new(server.addr()));
    let transports = Arc::new(StubTransports::new());
    let network = NetworkWatch::new(IpStatus::DualStack);
    let manager = TorManager::new(config, transports.clone(), &network, supervisor.clone());

    Fixture {
        server,
        supervisor,
        transports,
        network,
        manager,
        _dir: dir,
    }
}

fn bootstrapping() -> MockScript {
    MockScript {
        events_after_setevents: fixtures::bootstrap_sequence(),
        ..MockScript::default()
    }
}

// ============================================================================
// Startup Tests
// ============================================================================

mod startup {
    use super::*;

    #[tokio::test]
    async fn test_start_reports_progress_and_endpoint() {
        let f = fixture(bootstrapping()).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let endpoint = timeout(
            TEST_TIMEOUT,
            f.manager.start(Transport::None, move |p| sink.lock().unwrap().push(p)),
        )
        .await
        .expect("start timed out")
        .expect("start failed");

        assert_eq!(endpoint, "127.0.0.1:9050".parse::<SocketAddr>().unwrap());
        assert_eq!(*seen.lock().unwrap(), vec![5, 50, 100]);
        assert_eq!(f.manager.status(), Status::Started);
        assert_eq!(f.manager.socks_endpoint(), Some(endpoint));
    }

    #[tokio::test]
    async fn test_start_with_transport_passes_bridge_options() {
        let f = fixture(bootstrapping()).await;
        timeout(TEST_TIMEOUT, f.manager.start(Transport::Obfs4, |_| {}))
            .await
            .unwrap()
            .unwrap();

        let config = f.supervisor.last_config().unwrap();
        let args = config.arguments();
        assert_eq!(args[0], "--ignore-missing-torrc");
        assert!(args.windows(2).any(|w| w[0] == "--UseBridges" && w[1] == "1"));
        assert!(args.iter().any(|a| a == "--ClientTransportPlugin"));
        assert_eq!(f.transports.calls().last().map(String::as_str), Some("start obfs4"));
    }

    #[tokio::test]
    async fn test_ipv6_only_network_at_launch() {
        let f = fixture(bootstrapping()).await;
        f.network.set(IpStatus::Ipv6Only);

        timeout(TEST_TIMEOUT, f.manager.start(Transport::None, |_| {}))
            .await
            .unwrap()
            .unwrap();
        let options = f.supervisor.last_config().unwrap().options().clone();
        assert_eq!(options.get("ClientPreferIPv6ORPort"), Some("1"));
        assert_eq!(options.get("ClientUseIPv4"), Some("0"));
    }

    #[tokio::test]
    async fn test_auth_failure_leaves_manager_stopped() {
        let f = fixture(MockScript {
            accept_auth: false,
            ..bootstrapping()
        })
        .await;

        let err = timeout(TEST_TIMEOUT, f.manager.start(Transport::None, |_| {}))
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, StartError::Authentication(_)));
        assert!(!err.leaves_process_running());
        assert_eq!(f.manager.status(), Status::Stopped);
        assert!(!f.supervisor.any_running());
    }

    #[tokio::test]
    async fn test_restart_after_stop_launches_again() {
        let f = fixture(bootstrapping()).await;
        for _ in 0..2 {
            timeout(TEST_TIMEOUT, f.manager.start(Transport::None, |_| {}))
                .await
                .unwrap()
                .unwrap();
            f.manager.stop().await;
        }
        assert_eq!(f.supervisor.launches(), 2);
        assert_eq!(f.manager.status(), Status::Stopped);
    }
}

// ============================================================================
// Reconfiguration Tests
// ============================================================================

mod reconfiguration {
    use super::*;

    #[tokio::test]
    async fn test_switch_transport_without_restart() {
        let f = fixture(bootstrapping()).await;
        timeout(TEST_TIMEOUT, f.manager.start(Transport::None, |_| {}))
            .await
            .unwrap()
            .unwrap();

        timeout(TEST_TIMEOUT, f.manager.reconfigure(Transport::Snowflake))
            .await
            .unwrap()
            .unwrap();

        let commands = f.server.commands();
        let first_reset = commands.iter().position(|c| c == "RESETCONF UseBridges").unwrap();
        let setconf = commands.iter().position(|c| c.starts_with("SETCONF ")).unwrap();
        assert!(first_reset < setconf);
        assert!(commands[setconf].ends_with("UseBridges=1"));
        assert_eq!(f.supervisor.launches(), 1);
        assert_eq!(f.manager.status(), Status::Started);
    }

    #[tokio::test]
    async fn test_network_change_while_running() {
        let f = fixture(bootstrapping()).await;
        timeout(TEST_TIMEOUT, f.manager.start(Transport::None, |_| {}))
            .await
            .unwrap()
            .unwrap();

        f.network.set(IpStatus::Ipv4Only);
        timeout(TEST_TIMEOUT, f.server.wait_for_command("SIGNAL NEWNYM"))
            .await
            .unwrap();
        assert!(f
            .server
            .commands()
            .iter()
            .any(|c| c.starts_with("SETCONF ClientPreferIPv6ORPort=auto")));
    }
}

// ============================================================================
// Circuit Tests
// ============================================================================

mod circuits {
    use super::*;

    #[tokio::test]
    async fn test_list_and_close_circuits() {
        let f = fixture(MockScript {
            circuit_status: vec![fixtures::circuit_line(7, "BUILT"), fixtures::circuit_line(8, "LAUNCHED")],
            ..bootstrapping()
        })
        .await;
        timeout(TEST_TIMEOUT, f.manager.start(Transport::None, |_| {}))
            .await
            .unwrap()
            .unwrap();

        let circuits = f.manager.circuits().await;
        assert_eq!(circuits.len(), 2);
        assert_eq!(circuits[0].status, CircuitStatus::Built);
        assert_eq!(circuits[0].path.len(), 1);

        let built: Vec<_> = circuits
            .into_iter()
            .filter(|c| c.status == CircuitStatus::Built)
            .collect();
        assert!(f.manager.close(&built).await);
        assert!(f.server.commands().contains(&"CLOSECIRCUIT 7".to_string()));
        assert!(!f.server.commands().contains(&"CLOSECIRCUIT 8".to_string()));
    }

    #[tokio::test]
    async fn test_circuits_after_stop_are_empty() {
        let f = fixture(MockScript {
            circuit_status: vec![fixtures::circuit_line(7, "BUILT")],
            ..bootstrapping()
        })
        .await;
        timeout(TEST_TIMEOUT, f.manager.start(Transport::None, |_| {}))
            .await
            .unwrap()
            .unwrap();
        f.manager.stop().await;

        assert!(f.manager.circuits().await.is_empty());
        assert!(!f.manager.close(&[]).await);
    }
}

// ============================================================================
// Shutdown Tests
// ============================================================================

mod shutdown {
    use super::*;

    #[tokio::test]
    async fn test_stop_while_waiting_for_circuit() {
        // Bootstraps but never reports an established circuit.
        let f = fixture(MockScript {
            events_after_setevents: vec![fixtures::bootstrap_event(40, "loading_status")],
            ..MockScript::default()
        })
        .await;

        let manager = f.manager.clone();
        let pending = tokio::spawn(async move { manager.start(Transport::None, |_| {}).await });
        timeout(TEST_TIMEOUT, f.server.wait_for_command("SETEVENTS"))
            .await
            .unwrap();

        f.manager.stop().await;
        let result = timeout(TEST_TIMEOUT, pending).await.unwrap().unwrap();
        assert!(matches!(result, Err(StartError::Cancelled)));
        assert_eq!(f.manager.status(), Status::Stopped);
        assert!(!f.supervisor.any_running());
    }

    #[tokio::test]
    async fn test_watch_reports_stop() {
        let f = fixture(bootstrapping()).await;
        timeout(TEST_TIMEOUT, f.manager.start(Transport::None, |_| {}))
            .await
            .unwrap()
            .unwrap();

        let mut rx = f.manager.watch();
        let _ = rx.borrow_and_update();
        f.manager.stop().await;

        timeout(TEST_TIMEOUT, rx.changed()).await.unwrap().unwrap();
        let snapshot = *rx.borrow();
        assert_eq!(snapshot.status, Status::Stopped);
        assert_eq!(snapshot.socks, None);
    }
}

// ============================================================================
// Real Tor Tests
// ============================================================================

mod real_tor {
    use super::*;

    #[tokio::test]
    #[ignore = "requires a tor binary and network access"]
    async fn test_bootstrap_real_tor() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();

        let dir = tempfile::tempdir().unwrap();
        let binary = std::env::var("TOR_BINARY").unwrap_or_else(|_| "tor".to_string());
        let config = ManagerConfig::new().tor_binary(binary).data_dir(dir.path().join("tor"));
        let manager = TorManager::builder(config).spawn();

        let endpoint = timeout(Duration::from_secs(180), manager.start(Transport::None, |_| {}))
            .await
            .expect("bootstrap timed out")
            .expect("start failed");
        assert!(endpoint.ip().is_loopback());
        assert!(!manager.circuits().await.is_empty());

        manager.stop().await;
        assert_eq!(manager.status(), Status::Stopped);
    }
}
