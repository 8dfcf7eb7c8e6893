//! Bootstrap monitoring.
//!
//! Observers for bootstrap progress and circuit establishment, plus
//! resolution of the SOCKS listener Tor picked for `SocksPort auto`.

use crate::control::{ControlChannel, ObserverMode, SubscriptionHandle};
use crate::error::StartError;
use crate::events::EventType;
use crate::protocol::unquote;
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

/// `GETINFO` key listing the SOCKS listeners.
pub const SOCKS_LISTENERS_KEY: &str = "net/listeners/socks";

/// Watch `STATUS_CLIENT BOOTSTRAP` events and pass each progress value on.
///
/// The observer is persistent; the caller removes it once progress is
/// complete.
pub fn observe_progress<F>(channel: &ControlChannel, on_progress: F) -> SubscriptionHandle
where
    F: Fn(u8) + Send + Sync + 'static,
{
    channel.add_observer(&[EventType::StatusClient], ObserverMode::Persistent, move |event| {
        match event.bootstrap_progress() {
            Some(progress) => {
                on_progress(progress);
                true
            }
            None => false,
        }
    })
}

/// Fire `on_established` once, on the first `CIRCUIT_ESTABLISHED`.
pub fn observe_established<F>(channel: &ControlChannel, on_established: F) -> SubscriptionHandle
where
    F: Fn() + Send + Sync + 'static,
{
    channel.add_observer(&[EventType::StatusClient], ObserverMode::Once, move |event| {
        if event.circuit_established() == Some(true) {
            on_established();
            true
        } else {
            false
        }
    })
}

/// Keeps reported progress non-decreasing within one attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressTracker {
    last: Option<u8>,
}

impl ProgressTracker {
    /// Accept `progress` if it does not go backwards.
    pub fn advance(&mut self, progress: u8) -> Option<u8> {
        match self.last {
            Some(last) if progress < last => None,
            _ => {
                self.last = Some(progress);
                Some(progress)
            }
        }
    }

    /// Last accepted value.
    pub fn last(&self) -> Option<u8> {
        self.last
    }

    /// Whether bootstrap reached 100%.
    pub fn is_complete(&self) -> bool {
        self.last.is_some_and(|p| p >= 100)
    }
}

/// Ask Tor where its SOCKS listener is.
pub async fn resolve_socks_endpoint(channel: &ControlChannel) -> Result<SocketAddr, StartError> {
    let value = channel
        .get_info(SOCKS_LISTENERS_KEY)
        .await
        .map_err(|e| StartError::NoUsableProxyAddress(e.to_string()))?;
    let endpoint = parse_socks_endpoint(&value).map_err(StartError::NoUsableProxyAddress)?;
    debug!(%endpoint, "SOCKS listener resolved");
    Ok(endpoint)
}

/// Parse a `net/listeners/socks` value into an address.
///
/// The value is a space-separated list of quoted `host:port` entries; the
/// first one is used. The host must be a numeric IP address and the port
/// must be non-zero.
pub fn parse_socks_endpoint(value: &str) -> Result<SocketAddr, String> {
    let first = value
        .split_whitespace()
        .next()
        .ok_or_else(|| "empty SOCKS listener list".to_string())?;
    let text = unquote(first);

    let addr = match text.parse::<SocketAddr>() {
        Ok(addr) => addr,
        Err(_) => {
            let (host, port) = text
                .rsplit_once(':')
                .ok_or_else(|| format!("no port in SOCKS listener '{}'", text))?;
            let host = host.trim_start_matches('[').trim_end_matches(']');
            let ip: IpAddr = host
                .parse()
                .map_err(|_| format!("SOCKS host '{}' is not an IP address", host))?;
            let port: u16 = port
                .parse()
                .map_err(|_| format!("SOCKS port '{}' is not a port number", port))?;
            SocketAddr::new(ip, port)
        }
    };

    if addr.port() == 0 {
        return Err(format!("SOCKS listener '{}' has port 0", text));
    }
    Ok(addr)
}
