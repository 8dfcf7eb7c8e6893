//! Network reachability.
//!
//! Detecting which IP families work is the host application's business. It
//! publishes [`IpStatus`] values through a `watch` channel; the orchestrator
//! turns them into Tor options.

use crate::torrc::TorConf;
use crate::transport::Transport;
use std::fmt;
use tokio::sync::watch;

/// Which IP families are currently usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IpStatus {
    /// No connectivity detected.
    #[default]
    Unavailable,
    /// IPv4 only.
    Ipv4Only,
    /// IPv6 only.
    Ipv6Only,
    /// Both families.
    DualStack,
}

impl IpStatus {
    /// Tor options for this status.
    ///
    /// On an IPv6-only network Tor is told to prefer IPv6 OR ports and, unless
    /// a transport is in use, to stop trying IPv4 entirely. Bridges may only
    /// publish IPv4 addresses, so IPv4 stays enabled with one.
    pub fn tor_conf(&self, transport: Transport) -> TorConf {
        let mut conf = TorConf::new();
        if *self == IpStatus::Ipv6Only {
            conf.push("ClientPreferIPv6ORPort", "1");
            conf.push("ClientUseIPv4", if transport.uses_bridges() { "1" } else { "0" });
        } else {
            conf.push("ClientPreferIPv6ORPort", "auto");
            conf.push("ClientUseIPv4", "1");
        }
        conf.push("ClientUseIPv6", "1");
        conf
    }
}

impl fmt::Display for IpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IpStatus::Unavailable => "unavailable",
            IpStatus::Ipv4Only => "ipv4-only",
            IpStatus::Ipv6Only => "ipv6-only",
            IpStatus::DualStack => "dual-stack",
        };
        f.write_str(s)
    }
}

/// Source of network status changes.
pub trait NetworkMonitor: Send + Sync {
    /// A receiver holding the current status and notified on every change.
    fn subscribe(&self) -> watch::Receiver<IpStatus>;
}

/// A [`NetworkMonitor`] the application pushes statuses into.
#[derive(Debug)]
pub struct NetworkWatch {
    tx: watch::Sender<IpStatus>,
}

impl NetworkWatch {
    /// Start with `initial`.
    pub fn new(initial: IpStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Publish a new status. Unchanged values are not re-sent.
    pub fn set(&self, status: IpStatus) {
        self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// The current status.
    pub fn current(&self) -> IpStatus {
        *self.tx.borrow()
    }
}

impl Default for NetworkWatch {
    fn default() -> Self {
        Self::new(IpStatus::default())
    }
}

impl NetworkMonitor for NetworkWatch {
    fn subscribe(&self) -> watch::Receiver<IpStatus> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv6_only_without_transport() {
        let conf = IpStatus::Ipv6Only.tor_conf(Transport::None);
        assert_eq!(conf.get("ClientPreferIPv6ORPort"), Some("1"));
        assert_eq!(conf.get("ClientUseIPv4"), Some("0"));
        assert_eq!(conf.get("ClientUseIPv6"), Some("1"));
    }

    #[test]
    fn test_ipv6_only_with_transport_keeps_ipv4() {
        let conf = IpStatus::Ipv6Only.tor_conf(Transport::Snowflake);
        assert_eq!(conf.get("ClientUseIPv4"), Some("1"));
    }

    #[test]
    fn test_other_statuses() {
        for status in [IpStatus::Unavailable, IpStatus::Ipv4Only, IpStatus::DualStack] {
            let conf = status.tor_conf(Transport::None);
            assert_eq!(conf.get("ClientPreferIPv6ORPort"), Some("auto"), "{}", status);
            assert_eq!(conf.get("ClientUseIPv4"), Some("1"));
            assert_eq!(conf.get("ClientUseIPv6"), Some("1"));
        }
    }

    #[tokio::test]
    async fn test_network_watch_notifies_on_change_only() {
        let watch = NetworkWatch::new(IpStatus::Ipv4Only);
        let mut rx = watch.subscribe();
        assert_eq!(*rx.borrow_and_update(), IpStatus::Ipv4Only);

        watch.set(IpStatus::Ipv4Only);
        assert!(!rx.has_changed().unwrap());

        watch.set(IpStatus::DualStack);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), IpStatus::DualStack);
        assert_eq!(watch.current(), IpStatus::DualStack);
    }
}
