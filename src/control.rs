//! The control channel.
//!
//! A [`ControlChannel`] owns one TCP connection to Tor's control port. Commands
//! may be issued from any task: writes are serialized behind one lock and
//! replies are matched to issuers in FIFO order. A background reader task
//! splits asynchronous `650` events from command replies and hands events to
//! registered observers.

use crate::auth::AuthCookie;
use crate::error::{ControlError, Result};
use crate::events::{parse_event_line, Event, EventType};
use crate::protocol::{format_command, quote_string, unescape_data_line, Reply, ReplyLine};
use crate::types::{CircuitId, Signal};

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Where the control port lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAddress {
    /// A fixed TCP address.
    Tcp(SocketAddr),
    /// A file written by Tor's `ControlPortWriteToFile`, read at connect time.
    PortFile(PathBuf),
}

impl ControlAddress {
    /// Resolve to a socket address, reading the port file if needed.
    pub async fn resolve(&self) -> Result<SocketAddr> {
        match self {
            ControlAddress::Tcp(addr) => Ok(*addr),
            ControlAddress::PortFile(path) => {
                let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
                    ControlError::ConnectionFailed(format!(
                        "cannot read control port file '{}': {}",
                        path.display(),
                        e
                    ))
                })?;
                parse_port_file(&contents)
            }
        }
    }
}

impl fmt::Display for ControlAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlAddress::Tcp(addr) => write!(f, "{}", addr),
            ControlAddress::PortFile(path) => write!(f, "file:{}", path.display()),
        }
    }
}

/// Parse the contents of a `ControlPortWriteToFile` file (`PORT=host:port`).
pub fn parse_port_file(contents: &str) -> Result<SocketAddr> {
    let value = contents
        .lines()
        .find_map(|line| line.trim().strip_prefix("PORT="))
        .ok_or_else(|| {
            ControlError::ParseError(format!("no PORT= entry in control port file: {:?}", contents))
        })?;
    value
        .parse()
        .map_err(|_| ControlError::ParseError(format!("invalid control port address: {}", value)))
}

/// Identifies a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// How long an observer stays registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverMode {
    /// Removed automatically after the first event its handler consumes.
    Once,
    /// Kept until [`ControlChannel::remove_observer`] is called.
    Persistent,
}

/// Event callback. Returns `true` when the event was consumed.
pub type EventHandler = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

struct Observer {
    handle: SubscriptionHandle,
    classes: Vec<EventType>,
    mode: ObserverMode,
    handler: EventHandler,
}

type PendingReply = oneshot::Sender<Result<Reply>>;

#[derive(Default)]
struct LinkState {
    /// Generation of the current connection.
    link: u64,
    connected: bool,
    pending: VecDeque<PendingReply>,
}

#[derive(Default)]
struct Shared {
    link: Mutex<LinkState>,
    observers: Mutex<Vec<Observer>>,
}

impl Shared {
    fn link(&self) -> MutexGuard<'_, LinkState> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn observers(&self) -> MutexGuard<'_, Vec<Observer>> {
        self.observers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark `link` as gone and fail everything still waiting on it.
    fn close_link(&self, link: u64, first_error: Option<ControlError>) {
        let drained: Vec<PendingReply> = {
            let mut state = self.link();
            if state.link != link {
                return;
            }
            state.connected = false;
            state.pending.drain(..).collect()
        };

        let mut first_error = first_error;
        for tx in drained {
            let err = first_error.take().unwrap_or(ControlError::ConnectionClosed);
            let _ = tx.send(Err(err));
        }
    }

    fn dispatch(&self, reply: &Reply) {
        let event = parse_event_line(reply.first_line());
        let Some(class) = event.event_type() else {
            trace!("Ignoring unobserved event: {}", reply.first_line());
            return;
        };

        let targets: Vec<(SubscriptionHandle, ObserverMode, EventHandler)> = self
            .observers()
            .iter()
            .filter(|o| o.classes.contains(&class))
            .map(|o| (o.handle, o.mode, Arc::clone(&o.handler)))
            .collect();

        for (handle, mode, handler) in targets {
            if handler(&event) && mode == ObserverMode::Once {
                self.observers().retain(|o| o.handle != handle);
            }
        }
    }
}

/// A connection to Tor's control port.
pub struct ControlChannel {
    address: ControlAddress,
    writer: tokio::sync::Mutex<Option<BufWriter<OwnedWriteHalf>>>,
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
    next_handle: AtomicU64,
}

impl ControlChannel {
    /// Create an unconnected channel for `address`.
    pub fn new(address: ControlAddress) -> Self {
        Self {
            address,
            writer: tokio::sync::Mutex::new(None),
            shared: Arc::new(Shared::default()),
            reader: Mutex::new(None),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Whether the channel currently holds a live connection.
    pub fn is_connected(&self) -> bool {
        self.shared.link().connected
    }

    /// Connect to the control port. A no-op when already connected.
    pub async fn connect(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        if self.is_connected() {
            return Ok(());
        }

        let addr = self.address.resolve().await?;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ControlError::ConnectionFailed(format!("{}: {}", addr, e)))?;
        let (read_half, write_half) = stream.into_split();

        let link = {
            let mut state = self.shared.link();
            state.link += 1;
            state.connected = true;
            state.link
        };

        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(read_loop(BufReader::new(read_half), shared, link));
        if let Some(old) = self.reader_slot().replace(task) {
            old.abort();
        }
        *writer = Some(BufWriter::new(write_half));

        debug!(%addr, "Control channel connected");
        Ok(())
    }

    /// Drop the connection and every observer. A no-op when not connected.
    pub fn disconnect(&self) {
        let link = {
            let state = self.shared.link();
            if !state.connected && state.pending.is_empty() {
                None
            } else {
                Some(state.link)
            }
        };

        if let Some(task) = self.reader_slot().take() {
            task.abort();
        }
        // A command mid-write keeps the lock; its half is replaced on reconnect.
        if let Ok(mut writer) = self.writer.try_lock() {
            *writer = None;
        }
        self.shared.observers().clear();

        if let Some(link) = link {
            self.shared.close_link(link, None);
            debug!(address = %self.address, "Control channel disconnected");
        }
    }

    /// Send a raw, CRLF-terminated command and wait for its reply.
    pub async fn send_command(&self, command: &str) -> Result<Reply> {
        if command.starts_with("AUTHENTICATE") {
            trace!("Sending command: AUTHENTICATE [redacted]");
        } else {
            trace!("Sending command: {}", command.trim_end());
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.writer.lock().await;
            let Some(writer) = guard.as_mut() else {
                return Err(ControlError::NotConnected);
            };
            let link = {
                let mut state = self.shared.link();
                if !state.connected {
                    return Err(ControlError::NotConnected);
                }
                state.pending.push_back(tx);
                state.link
            };

            let written = async {
                writer.write_all(command.as_bytes()).await?;
                writer.flush().await
            }
            .await;
            if let Err(e) = written {
                *guard = None;
                self.shared.close_link(link, None);
                return Err(ControlError::Io(e));
            }
        }

        rx.await.map_err(|_| ControlError::ConnectionClosed)?
    }

    /// Authenticate with the control cookie.
    pub async fn authenticate(&self, cookie: &AuthCookie) -> Result<()> {
        let cmd = format_command("AUTHENTICATE", &[cookie.to_hex()]);
        let reply = self.send_command(&cmd).await?;
        match reply.into_result() {
            Ok(_) => {
                debug!("Authenticated with control cookie");
                Ok(())
            }
            Err(ControlError::CommandRejected { code, message }) => Err(
                ControlError::AuthenticationFailed(format!("{} {}", code, message)),
            ),
            Err(e) => Err(e),
        }
    }

    /// Get a single `GETINFO` value.
    pub async fn get_info(&self, key: &str) -> Result<String> {
        let cmd = format_command("GETINFO", &[key]);
        let reply = self.send_command(&cmd).await?.into_result()?;
        reply
            .value_of(key)
            .ok_or_else(|| ControlError::ParseError(format!("GETINFO reply has no value for {}", key)))
    }

    /// Set several configuration values in one `SETCONF`.
    pub async fn set_conf_multi(&self, settings: &[(String, String)]) -> Result<()> {
        if settings.is_empty() {
            return Ok(());
        }
        let args: Vec<String> = settings
            .iter()
            .map(|(k, v)| format!("{}={}", k, quote_string(v)))
            .collect();
        let cmd = format_command("SETCONF", &args);
        self.send_command(&cmd).await?.into_result()?;
        Ok(())
    }

    /// Reset one configuration key to its default.
    pub async fn reset_conf(&self, key: &str) -> Result<()> {
        let cmd = format_command("RESETCONF", &[key]);
        self.send_command(&cmd).await?.into_result()?;
        Ok(())
    }

    /// Send a signal.
    pub async fn signal(&self, signal: Signal) -> Result<()> {
        let cmd = format_command("SIGNAL", &[signal.as_str()]);
        self.send_command(&cmd).await?.into_result()?;
        Ok(())
    }

    /// Close a circuit.
    pub async fn close_circuit(&self, id: CircuitId) -> Result<()> {
        let cmd = format_command("CLOSECIRCUIT", &[id.to_string()]);
        self.send_command(&cmd).await?.into_result()?;
        Ok(())
    }

    /// Ask Tor for the union of event classes the registered observers want.
    pub async fn set_events(&self) -> Result<()> {
        let classes: BTreeSet<EventType> = self
            .shared
            .observers()
            .iter()
            .flat_map(|o| o.classes.iter().copied())
            .collect();
        let names: Vec<&str> = classes.iter().map(EventType::as_str).collect();
        let cmd = format_command("SETEVENTS", &names);
        self.send_command(&cmd).await?.into_result()?;
        Ok(())
    }

    /// Register an event observer.
    pub fn add_observer<F>(&self, classes: &[EventType], mode: ObserverMode, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.shared.observers().push(Observer {
            handle,
            classes: classes.to_vec(),
            mode,
            handler: Arc::new(handler),
        });
        handle
    }

    /// Remove an observer. Returns whether it was still registered.
    pub fn remove_observer(&self, handle: SubscriptionHandle) -> bool {
        let mut observers = self.shared.observers();
        let before = observers.len();
        observers.retain(|o| o.handle != handle);
        observers.len() != before
    }

    /// Whether `handle` is still registered.
    pub fn has_observer(&self, handle: SubscriptionHandle) -> bool {
        self.shared.observers().iter().any(|o| o.handle == handle)
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.shared.observers().len()
    }

    fn reader_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.reader.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlChannel")
            .field("address", &self.address)
            .field("connected", &self.is_connected())
            .field("observers", &self.observer_count())
            .finish()
    }
}

async fn read_loop<R>(mut reader: R, shared: Arc<Shared>, link: u64)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match read_reply(&mut reader).await {
            Ok(reply) if reply.is_async_event() => shared.dispatch(&reply),
            Ok(reply) => {
                let waiter = shared.link().pending.pop_front();
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(Ok(reply));
                    }
                    None => warn!("Unsolicited reply from Tor: {}", reply.text()),
                }
            }
            Err(e) => {
                debug!("Control reader stopped: {}", e);
                shared.close_link(link, Some(e));
                return;
            }
        }
    }
}

/// Read one complete reply, collecting `+` data blocks.
async fn read_reply<R>(reader: &mut R) -> Result<Reply>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = Vec::new();
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(ControlError::ConnectionClosed);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        trace!("Received line: {}", trimmed);

        let mut reply_line = ReplyLine::parse(trimmed)?;
        if reply_line.is_data() {
            let mut data_line = String::new();
            loop {
                data_line.clear();
                if reader.read_line(&mut data_line).await? == 0 {
                    return Err(ControlError::ConnectionClosed);
                }
                match unescape_data_line(data_line.trim_end_matches(['\r', '\n'])) {
                    Some(data) => reply_line.data.push(data.to_string()),
                    None => break,
                }
            }
        }

        let is_end = reply_line.is_end();
        lines.push(reply_line);
        if is_end {
            break;
        }
    }

    Reply::new(lines)
}
