//! # Test Utilities for Tor Orchestrator
//!
//! Mocks and fakes for testing code built on this crate without a real Tor.
//!
//! ## Features
//!
//! Enable this module by adding `test-utils` feature:
//!
//! ```toml
//! [dev-dependencies]
//! tor-orchestrator = { version = "0.1", features = ["test-utils"] }
//! ```
//!
//! ## Mock Server
//!
//! [`MockControlServer`] speaks enough of the control protocol for a full
//! startup: it accepts or rejects `AUTHENTICATE`, answers the `GETINFO` keys
//! the orchestrator uses, and emits scripted events after `SETEVENTS`.
//! [`FakeSupervisor`] stands in for the Tor binary by writing the control
//! port file and cookie a real Tor would write.
//!
//! ```rust,ignore
//! use tor_orchestrator::test_utils::{fixtures, FakeSupervisor, MockControlServer, MockScript};
//!
//! let server = MockControlServer::start(MockScript {
//!     events_after_setevents: fixtures::bootstrap_sequence(),
//!     ..MockScript::default()
//! })
//! .await?;
//! let supervisor = FakeSupervisor::new(server.addr());
//! ```

use crate::error::{ProcessError, TransportError};
use crate::process::{ProcessSupervisor, RunningProcess};
use crate::torrc::{ProcessConfiguration, TorConf};
use crate::transport::{Transport, TransportProvider};

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

/// Cookie bytes written by [`FakeSupervisor`].
pub const FAKE_COOKIE: [u8; 32] = [0x5a; 32];

/// Pre-built event lines and replies.
pub mod fixtures {
    /// A `STATUS_CLIENT BOOTSTRAP` event line.
    pub fn bootstrap_event(progress: u8, tag: &str) -> String {
        format!(
            "650 STATUS_CLIENT NOTICE BOOTSTRAP PROGRESS={} TAG={} SUMMARY=\"{}\"",
            progress, tag, tag
        )
    }

    /// A `STATUS_CLIENT CIRCUIT_ESTABLISHED` event line.
    pub fn established_event() -> String {
        "650 STATUS_CLIENT NOTICE CIRCUIT_ESTABLISHED".to_string()
    }

    /// Bootstrap to 100% followed by an established circuit.
    pub fn bootstrap_sequence() -> Vec<String> {
        vec![
            bootstrap_event(5, "conn"),
            bootstrap_event(50, "loading_descriptors"),
            bootstrap_event(100, "done"),
            established_event(),
        ]
    }

    /// One `circuit-status` line.
    pub fn circuit_line(id: u64, status: &str) -> String {
        format!(
            "{} {} $9695DFC35FFEB861329B9F1AB04C46397020CE31~Relay1 PURPOSE=GENERAL",
            id, status
        )
    }
}

/// Mock Tor control protocol response builder.
#[derive(Debug, Clone, Default)]
pub struct MockTorResponse {
    lines: Vec<String>,
}

impl MockTorResponse {
    /// Create a new empty response builder.
    pub fn new() -> Self {
        Self { lines: Vec::new() }
    }

    /// Create a simple OK response.
    pub fn ok() -> Self {
        Self {
            lines: vec!["250 OK".to_string()],
        }
    }

    /// Create an error response.
    pub fn error(code: u16, message: &str) -> Self {
        Self {
            lines: vec![format!("{} {}", code, message)],
        }
    }

    /// Add a mid-reply line: `250-key=value`.
    pub fn data_line(mut self, line: &str) -> Self {
        self.lines.push(format!("250-{}", line));
        self
    }

    /// Add a `250+key=` data block, dot-stuffing lines as needed.
    pub fn data_block<S: AsRef<str>>(mut self, key: &str, body: &[S]) -> Self {
        self.lines.push(format!("250+{}=", key));
        for line in body {
            let line = line.as_ref();
            if line.starts_with('.') {
                self.lines.push(format!(".{}", line));
            } else {
                self.lines.push(line.to_string());
            }
        }
        self.lines.push(".".to_string());
        self
    }

    /// Append raw lines, e.g. async events.
    pub fn raw_lines<S: AsRef<str>>(mut self, lines: &[S]) -> Self {
        self.lines.extend(lines.iter().map(|l| l.as_ref().to_string()));
        self
    }

    /// Add the final OK line.
    pub fn finish(mut self) -> Self {
        self.lines.push("250 OK".to_string());
        self
    }

    /// Build the response as a string.
    pub fn build(&self) -> String {
        self.lines.iter().map(|l| format!("{}\r\n", l)).collect()
    }
}

/// How a [`MockControlServer`] behaves.
#[derive(Debug, Clone)]
pub struct MockScript {
    /// Whether `AUTHENTICATE` succeeds.
    pub accept_auth: bool,
    /// Event lines written right after each `SETEVENTS` reply.
    pub events_after_setevents: Vec<String>,
    /// Never reply to commands starting with this prefix.
    pub hang_on: Option<String>,
    /// Hold the reply to commands starting with the prefix for the duration.
    pub delay_on: Option<(String, Duration)>,
    /// Value for `GETINFO net/listeners/socks`.
    pub socks_reply: String,
    /// Lines for `GETINFO circuit-status`.
    pub circuit_status: Vec<String>,
    /// Commands (by prefix) rejected with the given code.
    pub reject: Vec<(String, u16)>,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            accept_auth: true,
            events_after_setevents: Vec::new(),
            hang_on: None,
            delay_on: None,
            socks_reply: "\"127.0.0.1:9050\"".to_string(),
            circuit_status: Vec::new(),
            reject: Vec::new(),
        }
    }
}

impl MockScript {
    fn reply_for(&self, command: &str) -> Option<String> {
        if let Some(prefix) = &self.hang_on {
            if command.starts_with(prefix.as_str()) {
                return None;
            }
        }
        if let Some((_, code)) = self.reject.iter().find(|(prefix, _)| command.starts_with(prefix.as_str())) {
            return Some(MockTorResponse::error(*code, "Rejected by mock").build());
        }

        let (keyword, args) = command.split_once(' ').unwrap_or((command, ""));
        let response = match keyword.to_ascii_uppercase().as_str() {
            "AUTHENTICATE" if self.accept_auth => MockTorResponse::ok(),
            "AUTHENTICATE" => MockTorResponse::error(515, "Authentication failed: Wrong length on authentication cookie."),
            "GETINFO" => match args {
                "net/listeners/socks" => MockTorResponse::new()
                    .data_line(&format!("net/listeners/socks={}", self.socks_reply))
                    .finish(),
                "circuit-status" => MockTorResponse::new()
                    .data_block("circuit-status", &self.circuit_status)
                    .finish(),
                other => MockTorResponse::error(552, &format!("Unrecognized key \"{}\"", other)),
            },
            "SETEVENTS" => MockTorResponse::ok().raw_lines(&self.events_after_setevents),
            "SETCONF" | "RESETCONF" | "SIGNAL" | "CLOSECIRCUIT" => MockTorResponse::ok(),
            _ => MockTorResponse::error(510, &format!("Unrecognized command \"{}\"", keyword)),
        };
        Some(response.build())
    }

    fn delay_for(&self, command: &str) -> Option<Duration> {
        self.delay_on
            .as_ref()
            .filter(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, delay)| *delay)
    }
}

struct MockState {
    script: MockScript,
    commands: Mutex<Vec<String>>,
    received: Notify,
    kick: broadcast::Sender<()>,
}

/// A scripted control port on localhost.
pub struct MockControlServer {
    addr: SocketAddr,
    state: Arc<MockState>,
    accept: JoinHandle<()>,
}

impl MockControlServer {
    /// Bind to an ephemeral port and start serving `script`.
    pub async fn start(script: MockScript) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (kick, _) = broadcast::channel(4);
        let state = Arc::new(MockState {
            script,
            commands: Mutex::new(Vec::new()),
            received: Notify::new(),
            kick,
        });

        let accept_state = Arc::clone(&state);
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                // Subscribed before the task runs so an early kick still lands.
                let kick = accept_state.kick.subscribe();
                tokio::spawn(serve(stream, Arc::clone(&accept_state), kick));
            }
        });

        Ok(Self { addr, state, accept })
    }

    /// Where the server listens.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Every command received so far, without line endings.
    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Resolve once a command starting with `prefix` has been received.
    pub async fn wait_for_command(&self, prefix: &str) {
        loop {
            let received = self.state.received.notified();
            if self.commands().iter().any(|c| c.starts_with(prefix)) {
                return;
            }
            received.await;
        }
    }

    /// Close every open client connection.
    pub fn kick_clients(&self) {
        let _ = self.state.kick.send(());
    }
}

impl Drop for MockControlServer {
    fn drop(&mut self) {
        self.accept.abort();
        self.kick_clients();
    }
}

async fn serve(stream: TcpStream, state: Arc<MockState>, mut kick: broadcast::Receiver<()>) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                _ => break,
            },
            _ = kick.recv() => break,
        };

        let command = line.trim_end().to_string();
        let reply = state.script.reply_for(&command);
        let delay = state.script.delay_for(&command);
        state
            .commands
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(command);
        state.received.notify_waiters();

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reply) = reply {
            if writer.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
        }
    }
}

/// A [`ProcessSupervisor`] that writes the files Tor would write and points
/// the control port file at a [`MockControlServer`].
pub struct FakeSupervisor {
    control_addr: SocketAddr,
    writes_cookie: AtomicBool,
    writes_port_file: AtomicBool,
    launches: AtomicUsize,
    last_config: Mutex<Option<ProcessConfiguration>>,
    processes: Mutex<Vec<Arc<AtomicBool>>>,
}

impl FakeSupervisor {
    /// Fake processes whose control port is `control_addr`.
    pub fn new(control_addr: SocketAddr) -> Self {
        Self {
            control_addr,
            writes_cookie: AtomicBool::new(true),
            writes_port_file: AtomicBool::new(true),
            launches: AtomicUsize::new(0),
            last_config: Mutex::new(None),
            processes: Mutex::new(Vec::new()),
        }
    }

    /// Launch without writing the cookie file.
    pub fn without_cookie(self) -> Self {
        self.writes_cookie.store(false, Ordering::SeqCst);
        self
    }

    /// Launch without writing the control port file.
    pub fn without_port_file(self) -> Self {
        self.writes_port_file.store(false, Ordering::SeqCst);
        self
    }

    /// Toggle cookie writing for later launches.
    pub fn set_write_cookie(&self, enabled: bool) {
        self.writes_cookie.store(enabled, Ordering::SeqCst);
    }

    /// Write the control port file for the last launch now.
    pub fn write_port_file(&self) -> io::Result<()> {
        let config = self
            .last_config()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "nothing launched yet"))?;
        std::fs::write(config.control_port_file(), format!("PORT={}\n", self.control_addr))
    }

    /// How many processes were launched.
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Configuration of the most recent launch.
    pub fn last_config(&self) -> Option<ProcessConfiguration> {
        self.last_config.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Whether any launched process has not been cancelled.
    pub fn any_running(&self) -> bool {
        self.processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|p| p.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl ProcessSupervisor for FakeSupervisor {
    async fn launch(&self, config: &ProcessConfiguration) -> Result<Box<dyn RunningProcess>, ProcessError> {
        let prepare_err = |source| ProcessError::Prepare {
            path: config.data_dir().display().to_string(),
            source,
        };
        tokio::fs::create_dir_all(config.data_dir()).await.map_err(prepare_err)?;

        let _ = tokio::fs::remove_file(config.control_port_file()).await;
        let _ = tokio::fs::remove_file(config.cookie_file()).await;
        if self.writes_port_file.load(Ordering::SeqCst) {
            tokio::fs::write(config.control_port_file(), format!("PORT={}\n", self.control_addr))
                .await
                .map_err(prepare_err)?;
        }
        if self.writes_cookie.load(Ordering::SeqCst) {
            tokio::fs::write(config.cookie_file(), FAKE_COOKIE).await.map_err(prepare_err)?;
        }

        self.launches.fetch_add(1, Ordering::SeqCst);
        *self.last_config.lock().unwrap_or_else(|e| e.into_inner()) = Some(config.clone());

        let running = Arc::new(AtomicBool::new(true));
        self.processes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&running));
        Ok(Box::new(FakeProcess { running }))
    }
}

struct FakeProcess {
    running: Arc<AtomicBool>,
}

impl RunningProcess for FakeProcess {
    fn is_running(&mut self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn cancel(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

// Dropping the handle ends the process, like `kill_on_drop` does for Tor.
impl Drop for FakeProcess {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// A [`TransportProvider`] that records calls and can be told to fail.
#[derive(Debug, Default)]
pub struct StubTransports {
    calls: Mutex<Vec<String>>,
    failing: Option<Transport>,
    custom_bridges: Vec<String>,
}

impl StubTransports {
    /// A stub where every transport starts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make starting `transport` fail.
    pub fn failing(mut self, transport: Transport) -> Self {
        self.failing = Some(transport);
        self
    }

    /// Bridge lines reported for [`Transport::Custom`].
    pub fn with_custom_bridges(mut self, bridges: Vec<String>) -> Self {
        self.custom_bridges = bridges;
        self
    }

    /// Recorded calls, e.g. `"stop obfs4"` or `"start snowflake"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }
}

#[async_trait]
impl TransportProvider for StubTransports {
    async fn start(&self, transport: Transport) -> Result<(), TransportError> {
        self.record(format!("start {}", transport));
        if self.failing == Some(transport) {
            return Err(TransportError::new(transport.as_str(), "stub failure"));
        }
        Ok(())
    }

    fn stop(&self, transport: Transport) {
        self.record(format!("stop {}", transport));
    }

    fn tor_conf(&self, transport: Transport) -> TorConf {
        match transport {
            Transport::None => TorConf::new(),
            Transport::Obfs4 => TorConf::new()
                .with("ClientTransportPlugin", "obfs4 exec /usr/bin/lyrebird")
                .with("Bridge", "obfs4 198.51.100.7:443 cert=builtin iat-mode=0"),
            Transport::Snowflake => {
                TorConf::new().with("ClientTransportPlugin", "snowflake exec /usr/bin/snowflake-client")
            }
            Transport::MeekAzure => TorConf::new()
                .with("ClientTransportPlugin", "meek_lite exec /usr/bin/lyrebird")
                .with("Bridge", "meek_lite 192.0.2.18:80 url=https://meek.azureedge.net/"),
            Transport::Custom => TorConf::new().with("ClientTransportPlugin", "obfs4 exec /usr/bin/lyrebird"),
        }
    }

    fn custom_bridges(&self) -> Vec<String> {
        self.custom_bridges.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerConfig;

    #[test]
    fn test_mock_response_ok() {
        let response = MockTorResponse::ok();
        assert_eq!(response.build(), "250 OK\r\n");
    }

    #[test]
    fn test_mock_response_with_data() {
        let response = MockTorResponse::new()
            .data_line("net/listeners/socks=\"127.0.0.1:9050\"")
            .finish();
        assert_eq!(
            response.build(),
            "250-net/listeners/socks=\"127.0.0.1:9050\"\r\n250 OK\r\n"
        );
    }

    #[test]
    fn test_mock_response_data_block_is_dot_stuffed() {
        let response = MockTorResponse::new()
            .data_block("circuit-status", &["1 BUILT", ".hidden"])
            .finish();
        assert_eq!(
            response.build(),
            "250+circuit-status=\r\n1 BUILT\r\n..hidden\r\n.\r\n250 OK\r\n"
        );
    }

    #[test]
    fn test_script_replies() {
        let script = MockScript {
            hang_on: Some("SIGNAL".to_string()),
            delay_on: Some(("AUTHENTICATE".to_string(), Duration::from_millis(5))),
            reject: vec![("RESETCONF Bridge".to_string(), 552)],
            ..MockScript::default()
        };
        assert_eq!(script.delay_for("AUTHENTICATE 00"), Some(Duration::from_millis(5)));
        assert_eq!(script.delay_for("SETEVENTS"), None);
        assert_eq!(script.reply_for("SIGNAL NEWNYM"), None);
        assert_eq!(script.reply_for("RESETCONF Bridge").unwrap(), "552 Rejected by mock\r\n");
        assert_eq!(script.reply_for("RESETCONF ExitNodes").unwrap(), "250 OK\r\n");
        assert!(script.reply_for("PROTOCOLINFO").unwrap().starts_with("510 "));
    }

    #[tokio::test]
    async fn test_fake_supervisor_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig::new().data_dir(dir.path().join("tor"));
        let built = ProcessConfiguration::build(&config, &TorConf::new(), &TorConf::new());
        let supervisor = FakeSupervisor::new("127.0.0.1:9999".parse().unwrap());

        let mut process = supervisor.launch(&built).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(config.control_port_file()).unwrap(),
            "PORT=127.0.0.1:9999\n"
        );
        assert_eq!(std::fs::read(config.cookie_file()).unwrap(), FAKE_COOKIE);
        assert!(supervisor.any_running());

        process.cancel();
        assert!(!process.is_running());
        assert!(!supervisor.any_running());
        assert_eq!(supervisor.launches(), 1);
    }
}
