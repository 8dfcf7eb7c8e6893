//! The orchestrator.
//!
//! [`TorManager`] is a cheap, clonable handle. All state lives in one actor
//! task that owns the process, the control channel and the status. The actor
//! never awaits I/O itself: every suspension point runs in a spawned step
//! task that reports back through an internal channel, so `stop()` is
//! serviced no matter which step is pending.
//!
//! A cold start runs these steps in order:
//!
//! 1. stop every known transport, start the selected one
//! 2. build the [`ProcessConfiguration`] and launch Tor
//! 3. wait the settle delay, connect to the control port
//! 4. read the cookie and authenticate
//! 5. observe bootstrap progress and circuit establishment
//! 6. on the first established circuit, resolve the SOCKS listener
//!
//! ```rust,no_run
//! use tor_orchestrator::{ManagerConfig, TorManager, Transport};
//!
//! # async fn example() -> Result<(), tor_orchestrator::StartError> {
//! let manager = TorManager::builder(ManagerConfig::new()).spawn();
//! let socks = manager
//!     .start(Transport::None, |p| println!("bootstrapped {}%", p))
//!     .await?;
//! println!("SOCKS proxy at {}", socks);
//! manager.stop().await;
//! # Ok(())
//! # }
//! ```

use crate::auth::AuthCookie;
use crate::bootstrap::{observe_established, observe_progress, resolve_socks_endpoint, ProgressTracker};
use crate::circuits::CircuitRegistry;
use crate::config::ManagerConfig;
use crate::control::{ControlAddress, ControlChannel, SubscriptionHandle};
use crate::error::{ControlError, ProcessError, StartError, TransportError};
use crate::network::{IpStatus, NetworkMonitor};
use crate::process::{ProcessSupervisor, RunningProcess, TorBinary};
use crate::torrc::ProcessConfiguration;
use crate::transport::{NoTransports, Transport, TransportManager, TransportProvider};
use crate::types::{Circuit, CircuitId, Signal, Status};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Keys reset, one at a time, before a new transport's options are applied.
pub const RESET_KEYS: [&str; 7] = [
    "UseBridges",
    "ClientTransportPlugin",
    "Bridge",
    "EntryNodes",
    "ExitNodes",
    "ExcludeNodes",
    "StrictNodes",
];

const COMMAND_BUFFER: usize = 32;

/// A consistent view of the orchestrator's public state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Snapshot {
    /// Lifecycle status.
    pub status: Status,
    /// SOCKS endpoint; present exactly when `status` is `Started`.
    pub socks: Option<SocketAddr>,
}

type ProgressCallback = Box<dyn Fn(u8) + Send>;
type StartReply = oneshot::Sender<Result<SocketAddr, StartError>>;

enum Command {
    Start {
        transport: Transport,
        on_progress: ProgressCallback,
        reply: StartReply,
    },
    Reconfigure {
        transport: Transport,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Circuits {
        reply: oneshot::Sender<CircuitRegistry>,
    },
}

/// Results of step tasks and observer callbacks, tagged with their attempt.
enum Internal {
    TransportStarted {
        attempt: u64,
        result: Result<(), TransportError>,
    },
    Launched {
        attempt: u64,
        result: Result<Box<dyn RunningProcess>, ProcessError>,
    },
    Connected {
        attempt: u64,
        result: Result<(), ControlError>,
    },
    Authenticated {
        attempt: u64,
        result: Result<(), StartError>,
    },
    Subscribed {
        attempt: u64,
        result: Result<(), ControlError>,
    },
    Progress {
        attempt: u64,
        progress: u8,
    },
    Established {
        attempt: u64,
    },
    Resolved {
        attempt: u64,
        result: Result<SocketAddr, StartError>,
    },
}

/// One startup attempt in flight.
struct Attempt {
    id: u64,
    waiters: Vec<StartReply>,
    on_progress: Vec<ProgressCallback>,
    tracker: ProgressTracker,
    progress_sub: Option<SubscriptionHandle>,
    established_sub: Option<SubscriptionHandle>,
    step: Option<JoinHandle<()>>,
}

impl Attempt {
    fn resolve(self, result: Result<SocketAddr, StartError>) {
        if let Some(step) = &self.step {
            step.abort();
        }
        for waiter in self.waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

/// Builder for [`TorManager`].
pub struct TorManagerBuilder {
    config: ManagerConfig,
    transports: Arc<dyn TransportProvider>,
    supervisor: Arc<dyn ProcessSupervisor>,
    network: Option<watch::Receiver<IpStatus>>,
}

impl TorManagerBuilder {
    /// Use `provider` for pluggable transports.
    pub fn transports(mut self, provider: Arc<dyn TransportProvider>) -> Self {
        self.transports = provider;
        self
    }

    /// Launch Tor through `supervisor` instead of running the binary directly.
    pub fn supervisor(mut self, supervisor: Arc<dyn ProcessSupervisor>) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// React to network status changes from `monitor`.
    pub fn network(mut self, monitor: &dyn NetworkMonitor) -> Self {
        self.network = Some(monitor.subscribe());
        self
    }

    /// Spawn the actor and return its handle. Must be called within a tokio
    /// runtime.
    pub fn spawn(self) -> TorManager {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let (network, network_open) = match self.network {
            Some(rx) => (rx, true),
            None => (watch::channel(IpStatus::default()).1, false),
        };

        let ip_status = *network.borrow();
        let actor = Actor {
            config: self.config,
            transports: TransportManager::new(self.transports),
            supervisor: self.supervisor,
            ip_status,
            network,
            network_open,
            status: Status::Stopped,
            transport: Transport::None,
            transport_active: false,
            process: None,
            channel: None,
            authenticated: false,
            deferred_transport: false,
            deferred_network: false,
            socks: None,
            attempt: None,
            next_attempt: 1,
            tasks: Vec::new(),
            transport_lock: Arc::new(tokio::sync::Mutex::new(())),
            snapshot: snapshot_tx,
            events_tx,
        };
        tokio::spawn(actor.run(cmd_rx, events_rx));

        TorManager {
            commands: cmd_tx,
            snapshot: snapshot_rx,
        }
    }
}

/// Handle to the orchestrator. Dropping every clone shuts it down.
#[derive(Clone)]
pub struct TorManager {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Snapshot>,
}

impl TorManager {
    /// Start building a manager around `config`.
    ///
    /// Defaults: the `tor` binary from the configuration, no pluggable
    /// transports, and no network monitor.
    pub fn builder(config: ManagerConfig) -> TorManagerBuilder {
        TorManagerBuilder {
            config,
            transports: Arc::new(NoTransports),
            supervisor: Arc::new(TorBinary),
            network: None,
        }
    }

    /// Create a manager from explicit collaborators.
    pub fn new(
        config: ManagerConfig,
        transports: Arc<dyn TransportProvider>,
        network: &dyn NetworkMonitor,
        supervisor: Arc<dyn ProcessSupervisor>,
    ) -> Self {
        Self::builder(config)
            .transports(transports)
            .network(network)
            .supervisor(supervisor)
            .spawn()
    }

    /// Start Tor with `transport` and wait for a usable SOCKS endpoint.
    ///
    /// If Tor is already running the transport is applied in place instead.
    /// `on_progress` receives bootstrap percentages, never decreasing.
    pub async fn start<F>(&self, transport: Transport, on_progress: F) -> Result<SocketAddr, StartError>
    where
        F: Fn(u8) + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let cmd = Command::Start {
            transport,
            on_progress: Box::new(on_progress),
            reply,
        };
        if self.commands.send(cmd).await.is_err() {
            return Err(StartError::Cancelled);
        }
        rx.await.unwrap_or(Err(StartError::Cancelled))
    }

    /// Switch a running Tor to `transport`. Only records the choice when
    /// nothing is running.
    pub async fn reconfigure(&self, transport: Transport) -> Result<(), TransportError> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Reconfigure { transport, reply }).await.is_err() {
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }

    /// Stop everything. Safe at any point and idempotent.
    pub async fn stop(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Stop { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Current circuits; empty when Tor is not running.
    pub async fn circuits(&self) -> Vec<Circuit> {
        self.registry().await.list().await
    }

    /// Close circuits by id. `false` when Tor is not running or any close
    /// failed.
    pub async fn close_circuits(&self, ids: &[CircuitId]) -> bool {
        self.registry().await.close(ids).await
    }

    /// Close the given circuits.
    pub async fn close(&self, circuits: &[Circuit]) -> bool {
        let ids: Vec<CircuitId> = circuits.iter().map(|c| c.id).collect();
        self.close_circuits(&ids).await
    }

    /// Current status.
    pub fn status(&self) -> Status {
        self.snapshot.borrow().status
    }

    /// The SOCKS endpoint, when started.
    pub fn socks_endpoint(&self) -> Option<SocketAddr> {
        self.snapshot.borrow().socks
    }

    /// Receiver for state snapshots.
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    async fn registry(&self) -> CircuitRegistry {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Circuits { reply }).await.is_err() {
            return CircuitRegistry::default();
        }
        rx.await.unwrap_or_default()
    }
}

struct Actor {
    config: ManagerConfig,
    transports: TransportManager,
    supervisor: Arc<dyn ProcessSupervisor>,
    network: watch::Receiver<IpStatus>,
    network_open: bool,
    ip_status: IpStatus,

    status: Status,
    transport: Transport,
    transport_active: bool,
    process: Option<Box<dyn RunningProcess>>,
    channel: Option<Arc<ControlChannel>>,
    /// Set once `channel` has passed `AUTHENTICATE`. Nothing but the
    /// authentication itself is sent before that.
    authenticated: bool,
    /// Transport or network options changed while Tor was up but not yet
    /// authenticated; applied right after authentication.
    deferred_transport: bool,
    deferred_network: bool,
    socks: Option<SocketAddr>,

    attempt: Option<Attempt>,
    next_attempt: u64,
    /// Reconfigure and network-push tasks; aborted on stop.
    tasks: Vec<JoinHandle<()>>,
    /// Serializes transport switches.
    transport_lock: Arc<tokio::sync::Mutex<()>>,

    snapshot: watch::Sender<Snapshot>,
    events_tx: mpsc::UnboundedSender<Internal>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(event) = events.recv() => self.handle_internal(event),
                changed = self.network.changed(), if self.network_open => match changed {
                    Ok(()) => self.network_changed(),
                    Err(_) => self.network_open = false,
                },
            }
        }

        debug!("All handles dropped, shutting down");
        self.shutdown_and_cancel();
    }

    fn handle_command(&mut self, cmd: Command) {
        self.tasks.retain(|t| !t.is_finished());
        match cmd {
            Command::Start {
                transport,
                on_progress,
                reply,
            } => self.start(transport, on_progress, reply),
            Command::Reconfigure { transport, reply } => {
                let live = self.process.is_some() || self.attempt.is_some();
                self.transport = transport;
                if live {
                    self.spawn_reconfigure(move |result| {
                        let _ = reply.send(result);
                    });
                } else {
                    debug!(%transport, "Not running, transport recorded");
                    let _ = reply.send(Ok(()));
                }
            }
            Command::Stop { reply } => {
                self.shutdown_and_cancel();
                let _ = reply.send(());
            }
            Command::Circuits { reply } => {
                let _ = reply.send(CircuitRegistry::new(self.session()));
            }
        }
    }

    fn start(&mut self, transport: Transport, on_progress: ProgressCallback, reply: StartReply) {
        match self.status {
            Status::Started => {
                info!(%transport, "Already started, reconfiguring in place");
                self.transport = transport;
                let endpoint = self.socks;
                self.spawn_reconfigure(move |result| {
                    let result = match (result, endpoint) {
                        (Ok(()), Some(endpoint)) => Ok(endpoint),
                        (Ok(()), None) => Err(StartError::Cancelled),
                        (Err(e), _) => Err(StartError::TransportStart(e)),
                    };
                    let _ = reply.send(result);
                });
            }
            Status::Starting => {
                debug!(%transport, "Start requested while starting, joining attempt");
                self.transport = transport;
                self.spawn_reconfigure(|result| {
                    if let Err(e) = result {
                        warn!("Transport switch during startup failed: {}", e);
                    }
                });
                if let Some(attempt) = self.attempt.as_mut() {
                    attempt.waiters.push(reply);
                    attempt.on_progress.push(on_progress);
                }
            }
            Status::Stopped => self.begin_attempt(transport, on_progress, reply),
        }
    }

    fn begin_attempt(&mut self, transport: Transport, on_progress: ProgressCallback, reply: StartReply) {
        let id = self.next_attempt;
        self.next_attempt += 1;

        self.transport = transport;
        self.status = Status::Starting;
        self.publish();
        info!(attempt = id, %transport, "Starting Tor");

        self.attempt = Some(Attempt {
            id,
            waiters: vec![reply],
            on_progress: vec![on_progress],
            tracker: ProgressTracker::default(),
            progress_sub: None,
            established_sub: None,
            step: None,
        });

        self.transport_active = true;
        let transports = self.transports.clone();
        let lock = Arc::clone(&self.transport_lock);
        self.spawn_step(async move {
            let _guard = lock.lock().await;
            Internal::TransportStarted {
                attempt: id,
                result: transports.activate(transport).await,
            }
        });
    }

    fn handle_internal(&mut self, event: Internal) {
        let current = self.attempt.as_ref().map(|a| a.id);
        let tag = match &event {
            Internal::TransportStarted { attempt, .. }
            | Internal::Launched { attempt, .. }
            | Internal::Connected { attempt, .. }
            | Internal::Authenticated { attempt, .. }
            | Internal::Subscribed { attempt, .. }
            | Internal::Progress { attempt, .. }
            | Internal::Established { attempt }
            | Internal::Resolved { attempt, .. } => *attempt,
        };
        if current != Some(tag) {
            debug!(attempt = tag, "Dropping event from a finished attempt");
            return;
        }

        match event {
            Internal::TransportStarted { result, .. } => match result {
                Ok(()) => self.launch(),
                Err(e) => self.fail(StartError::TransportStart(e)),
            },
            Internal::Launched { result, .. } => match result {
                Ok(process) => {
                    self.process = Some(process);
                    self.connect();
                }
                Err(e) => self.fail(e.into()),
            },
            Internal::Connected { result, .. } => match result {
                Ok(()) => self.authenticate(),
                Err(e) => {
                    warn!("Control port connect failed: {}", e);
                    self.status = Status::Stopped;
                    self.publish();
                    if let Some(attempt) = self.attempt.take() {
                        attempt.resolve(Err(StartError::ControlConnect(Arc::new(e))));
                    }
                }
            },
            Internal::Authenticated { result, .. } => match result {
                Ok(()) => {
                    self.authenticated = true;
                    self.apply_deferred();
                    self.subscribe();
                }
                Err(e) => self.fail(e),
            },
            Internal::Subscribed { result, .. } => {
                if let Err(e) = result {
                    self.fail(StartError::EventSubscription(Arc::new(e)));
                }
            }
            Internal::Progress { progress, .. } => self.progress(progress),
            Internal::Established { .. } => self.established(),
            Internal::Resolved { result, .. } => match result {
                Ok(endpoint) => {
                    info!(%endpoint, "Tor started");
                    self.socks = Some(endpoint);
                    self.status = Status::Started;
                    self.publish();
                    if let Some(attempt) = self.attempt.take() {
                        attempt.resolve(Ok(endpoint));
                    }
                }
                Err(e) => self.fail(e),
            },
        }
    }

    fn launch(&mut self) {
        let alive = self.process.as_mut().is_some_and(|p| p.is_running());
        if alive {
            debug!("Reusing running Tor process");
            return self.connect();
        }

        if self.process.take().is_some() {
            debug!("Previous Tor process exited");
        }
        if let Some(channel) = self.channel.take() {
            channel.disconnect();
        }
        self.authenticated = false;

        // The launch options carry the current transport and network, so
        // nothing is left to apply after authentication.
        self.ip_status = *self.network.borrow_and_update();
        self.deferred_transport = false;
        self.deferred_network = false;
        let transport_conf = self.transports.tor_conf(self.transport);
        let network_conf = self.ip_status.tor_conf(self.transport);
        let conf = ProcessConfiguration::build(&self.config, &transport_conf, &network_conf);

        let supervisor = Arc::clone(&self.supervisor);
        let id = self.attempt_id();
        self.spawn_step(async move {
            Internal::Launched {
                attempt: id,
                result: supervisor.launch(&conf).await,
            }
        });
    }

    fn connect(&mut self) {
        let channel = Arc::clone(self.channel.get_or_insert_with(|| {
            Arc::new(ControlChannel::new(ControlAddress::PortFile(
                self.config.control_port_file(),
            )))
        }));
        let delay = self.config.settle_delay;
        let id = self.attempt_id();
        self.spawn_step(async move {
            tokio::time::sleep(delay).await;
            Internal::Connected {
                attempt: id,
                result: channel.connect().await,
            }
        });
    }

    fn authenticate(&mut self) {
        let Some(channel) = self.channel.clone() else {
            return self.fail(StartError::Cancelled);
        };
        let cookie_file = self.config.cookie_file();
        let id = self.attempt_id();
        self.spawn_step(async move {
            let result = async {
                let cookie = AuthCookie::read(&cookie_file).await.map_err(|e| {
                    warn!("Tor cookie unreadable: {}", e);
                    StartError::CookieUnreadable(Arc::new(e))
                })?;
                channel
                    .authenticate(&cookie)
                    .await
                    .map_err(|e| StartError::Authentication(Arc::new(e)))
            }
            .await;
            Internal::Authenticated { attempt: id, result }
        });
    }

    fn subscribe(&mut self) {
        let Some(channel) = self.channel.clone() else {
            return self.fail(StartError::Cancelled);
        };
        let id = self.attempt_id();

        let tx = self.events_tx.clone();
        let progress_sub = observe_progress(&channel, move |progress| {
            let _ = tx.send(Internal::Progress { attempt: id, progress });
        });
        let tx = self.events_tx.clone();
        let established_sub = observe_established(&channel, move || {
            let _ = tx.send(Internal::Established { attempt: id });
        });

        if let Some(attempt) = self.attempt.as_mut() {
            attempt.progress_sub = Some(progress_sub);
            attempt.established_sub = Some(established_sub);
        }

        self.spawn_step(async move {
            Internal::Subscribed {
                attempt: id,
                result: channel.set_events().await,
            }
        });
    }

    fn progress(&mut self, progress: u8) {
        let Some(attempt) = self.attempt.as_mut() else {
            return;
        };
        if attempt.progress_sub.is_none() {
            return;
        }

        if let Some(progress) = attempt.tracker.advance(progress) {
            debug!(attempt = attempt.id, progress, "Bootstrap progress");
            for callback in &attempt.on_progress {
                callback(progress);
            }
        }

        if attempt.tracker.is_complete() {
            if let (Some(sub), Some(channel)) = (attempt.progress_sub.take(), &self.channel) {
                channel.remove_observer(sub);
            }
        }
    }

    fn established(&mut self) {
        let Some(channel) = self.channel.clone() else {
            return;
        };
        let Some(attempt) = self.attempt.as_mut() else {
            return;
        };
        let Some(established_sub) = attempt.established_sub.take() else {
            return;
        };

        channel.remove_observer(established_sub);
        if let Some(sub) = attempt.progress_sub.take() {
            channel.remove_observer(sub);
        }
        debug!(attempt = attempt.id, "Circuit established");

        let id = attempt.id;
        self.spawn_step(async move {
            Internal::Resolved {
                attempt: id,
                result: resolve_socks_endpoint(&channel).await,
            }
        });
    }

    /// Tear down, then fail the current attempt with `error`.
    fn fail(&mut self, error: StartError) {
        warn!("Startup failed: {}", error);
        let attempt = self.attempt.take();
        self.shutdown();
        if let Some(attempt) = attempt {
            attempt.resolve(Err(error));
        }
    }

    fn shutdown_and_cancel(&mut self) {
        let attempt = self.attempt.take();
        self.shutdown();
        if let Some(attempt) = attempt {
            attempt.resolve(Err(StartError::Cancelled));
        }
    }

    /// Stop everything that is live. A no-op when nothing is.
    fn shutdown(&mut self) {
        let live = self.process.is_some()
            || self.channel.is_some()
            || self.transport_active
            || self.status != Status::Stopped;
        if !live {
            return;
        }
        info!("Stopping Tor");

        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(channel) = self.channel.take() {
            channel.disconnect();
        }
        self.authenticated = false;
        self.deferred_transport = false;
        self.deferred_network = false;
        if let Some(mut process) = self.process.take() {
            process.cancel();
        }
        self.socks = None;
        self.status = Status::Stopped;
        self.publish();

        if self.transport_active {
            self.transports.deactivate(self.transport);
            self.transport_active = false;
        }
    }

    fn network_changed(&mut self) {
        self.ip_status = *self.network.borrow_and_update();
        debug!(status = %self.ip_status, "Network status changed");

        if self.awaiting_session() {
            debug!("No session yet, network options deferred");
            self.deferred_network = true;
            return;
        }
        self.push_network();
    }

    /// Send the current network options and reset circuits.
    fn push_network(&mut self) {
        if self.process.is_none() {
            return;
        }
        let Some(channel) = self.session() else {
            return;
        };

        let conf = self.ip_status.tor_conf(self.transport).to_setconf();
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = channel.set_conf_multi(&conf).await {
                warn!("Applying network options failed: {}", e);
            }
            if let Err(e) = channel.signal(Signal::NewNym).await {
                warn!("Resetting circuits failed: {}", e);
            }
        }));
    }

    /// Apply the current transport in the background and hand the outcome to
    /// `done`.
    fn spawn_reconfigure<F>(&mut self, done: F)
    where
        F: FnOnce(Result<(), TransportError>) + Send + 'static,
    {
        let transports = self.transports.clone();
        let channel = self.session();
        if channel.is_none() && self.awaiting_session() {
            debug!("No session yet, transport options deferred");
            self.deferred_transport = true;
        }
        let transport = self.transport;
        let lock = Arc::clone(&self.transport_lock);
        self.transport_active = true;

        self.tasks.push(tokio::spawn(async move {
            let _guard = lock.lock().await;
            let result = apply_transport(&transports, channel.as_deref(), transport).await;
            done(result);
        }));
    }

    /// Apply what changed between launch and authentication.
    fn apply_deferred(&mut self) {
        if std::mem::take(&mut self.deferred_transport) {
            debug!(transport = %self.transport, "Applying deferred transport options");
            self.spawn_reconfigure(|result| {
                if let Err(e) = result {
                    warn!("Deferred transport switch failed: {}", e);
                }
            });
        }
        if std::mem::take(&mut self.deferred_network) {
            debug!(status = %self.ip_status, "Applying deferred network options");
            self.push_network();
        }
    }

    /// The control channel, once it is connected and authenticated.
    fn session(&self) -> Option<Arc<ControlChannel>> {
        self.channel
            .clone()
            .filter(|c| self.authenticated && c.is_connected())
    }

    /// Whether Tor is running or being brought up without a session yet.
    fn awaiting_session(&self) -> bool {
        !self.authenticated && (self.process.is_some() || self.attempt.is_some())
    }

    fn spawn_step<F>(&mut self, step: F)
    where
        F: Future<Output = Internal> + Send + 'static,
    {
        let tx = self.events_tx.clone();
        let handle = tokio::spawn(async move {
            let _ = tx.send(step.await);
        });
        match self.attempt.as_mut() {
            Some(attempt) => attempt.step = Some(handle),
            None => handle.abort(),
        }
    }

    fn attempt_id(&self) -> u64 {
        self.attempt.as_ref().map_or(0, |a| a.id)
    }

    fn publish(&self) {
        let next = Snapshot {
            status: self.status,
            socks: self.socks.filter(|_| self.status == Status::Started),
        };
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

/// Start `transport`, then, if a session is up, reset the bridge and node
/// options one at a time and apply the transport's options in one `SETCONF`.
async fn apply_transport(
    transports: &TransportManager,
    channel: Option<&ControlChannel>,
    transport: Transport,
) -> Result<(), TransportError> {
    transports.activate(transport).await?;

    let Some(channel) = channel.filter(|c| c.is_connected()) else {
        return Ok(());
    };

    for key in RESET_KEYS {
        if let Err(e) = channel.reset_conf(key).await {
            warn!(key, "RESETCONF failed: {}", e);
        }
    }

    let conf = transports.tor_conf(transport).to_setconf();
    if let Err(e) = channel.set_conf_multi(&conf).await {
        warn!(%transport, "Applying transport options failed: {}", e);
    }
    Ok(())
}
