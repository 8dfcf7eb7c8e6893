//! Configuration for the orchestrator.
//!
//! [`ManagerConfig`] holds the paths and options that stay fixed across
//! restarts. Everything that changes per attempt (transport, network status)
//! is passed separately to [`ProcessConfiguration::build`](crate::torrc::ProcessConfiguration::build).

use std::path::PathBuf;
use std::time::Duration;

/// Cookie file name inside the data directory.
pub const COOKIE_FILE_NAME: &str = "control_auth_cookie";

/// Control port file name inside the data directory.
pub const CONTROL_PORT_FILE_NAME: &str = "control-port";

/// Delay between launching Tor and the first control connection attempt.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(650);

/// Configuration for a [`TorManager`](crate::manager::TorManager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// The Tor binary to launch.
    pub tor_binary: PathBuf,
    /// Tor's data directory.
    pub data_dir: PathBuf,
    /// Directory with client-side onion service credentials.
    pub auth_dir: Option<PathBuf>,
    /// IPv4 GeoIP database.
    pub geoip_file: Option<PathBuf>,
    /// IPv6 GeoIP database.
    pub geoip6_file: Option<PathBuf>,
    /// Value of Tor's `Log` option.
    pub log: String,
    /// Wait after launch before connecting to the control port.
    pub settle_delay: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            tor_binary: PathBuf::from("tor"),
            data_dir: std::env::temp_dir().join("tor-orchestrator").join("tor"),
            auth_dir: None,
            geoip_file: None,
            geoip6_file: None,
            log: "notice stdout".to_string(),
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

impl ManagerConfig {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the Tor binary.
    pub fn tor_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.tor_binary = path.into();
        self
    }

    /// Set the data directory.
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Set the client-auth directory.
    pub fn auth_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.auth_dir = Some(path.into());
        self
    }

    /// Set the IPv4 GeoIP file.
    pub fn geoip_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.geoip_file = Some(path.into());
        self
    }

    /// Set the IPv6 GeoIP file.
    pub fn geoip6_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.geoip6_file = Some(path.into());
        self
    }

    /// Set the `Log` option, e.g. `"err file /dev/null"`.
    pub fn log(mut self, log: impl Into<String>) -> Self {
        self.log = log.into();
        self
    }

    /// Set the settling delay.
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Path of the cookie Tor writes.
    pub fn cookie_file(&self) -> PathBuf {
        self.data_dir.join(COOKIE_FILE_NAME)
    }

    /// Path of the file Tor writes its control port to.
    pub fn control_port_file(&self) -> PathBuf {
        self.data_dir.join(CONTROL_PORT_FILE_NAME)
    }
}
