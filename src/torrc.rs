//! Tor configuration fragments and the process configuration builder.
//!
//! A [`TorConf`] is an ordered list of option/value pairs. The same fragment
//! renders either as command-line arguments (`--Key value`) for launching Tor
//! or as `SETCONF` pairs for reconfiguring a running instance.

use crate::config::ManagerConfig;
use std::path::{Path, PathBuf};

/// One Tor option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfEntry {
    /// Option name, e.g. `UseBridges`.
    pub key: String,
    /// Option value.
    pub value: String,
}

/// An ordered set of Tor options. Keys may repeat (`Bridge` lines do).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TorConf(Vec<ConfEntry>);

impl TorConf {
    /// An empty fragment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an option, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    /// Append an option.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push(ConfEntry {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Append every option of `other`.
    pub fn append(&mut self, other: TorConf) {
        self.0.extend(other.0);
    }

    /// First value set for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }

    /// Every value set for `key`, in order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |e| e.key == key)
            .map(|e| e.value.as_str())
    }

    /// The options in order.
    pub fn entries(&self) -> &[ConfEntry] {
        &self.0
    }

    /// Whether there are no options.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Render as command-line arguments.
    pub fn to_arguments(&self) -> Vec<String> {
        self.0
            .iter()
            .flat_map(|e| [format!("--{}", e.key), e.value.clone()])
            .collect()
    }

    /// Render as `SETCONF` key/value pairs.
    pub fn to_setconf(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .map(|e| (e.key.clone(), e.value.clone()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TorConf {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut conf = TorConf::new();
        for (k, v) in iter {
            conf.push(k, v);
        }
        conf
    }
}

/// Everything needed to launch one Tor process. Rebuilt on every start.
#[derive(Debug, Clone)]
pub struct ProcessConfiguration {
    binary: PathBuf,
    data_dir: PathBuf,
    cookie_file: PathBuf,
    control_port_file: PathBuf,
    options: TorConf,
}

impl ProcessConfiguration {
    /// Assemble the configuration from static settings plus the transport and
    /// network fragments, in that order.
    pub fn build(config: &ManagerConfig, transport: &TorConf, network: &TorConf) -> Self {
        let cookie_file = config.cookie_file();
        let control_port_file = config.control_port_file();

        let mut options = TorConf::new()
            .with("CookieAuthentication", "1")
            .with("CookieAuthFile", path_arg(&cookie_file))
            .with("ControlPort", "auto")
            .with("ControlPortWriteToFile", path_arg(&control_port_file))
            .with("ClientOnly", "1")
            .with("AvoidDiskWrites", "1")
            .with("DataDirectory", path_arg(&config.data_dir));

        if let Some(dir) = &config.auth_dir {
            options.push("ClientOnionAuthDir", path_arg(dir));
        }
        if let Some(file) = &config.geoip_file {
            options.push("GeoIPFile", path_arg(file));
        }
        if let Some(file) = &config.geoip6_file {
            options.push("GeoIPv6File", path_arg(file));
        }

        options.push("Log", config.log.clone());
        options.push("LogMessageDomains", "1");
        options.push("SafeLogging", "1");
        options.push("SocksPort", "auto");

        options.append(transport.clone());
        options.append(network.clone());

        Self {
            binary: config.tor_binary.clone(),
            data_dir: config.data_dir.clone(),
            cookie_file,
            control_port_file,
            options,
        }
    }

    /// The binary to run.
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Tor's data directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Where Tor writes the control cookie.
    pub fn cookie_file(&self) -> &Path {
        &self.cookie_file
    }

    /// Where Tor writes its control port.
    pub fn control_port_file(&self) -> &Path {
        &self.control_port_file
    }

    /// Whether the control port requires the cookie. Always true.
    pub fn cookie_authentication(&self) -> bool {
        self.options.get("CookieAuthentication") == Some("1")
    }

    /// All options passed to Tor.
    pub fn options(&self) -> &TorConf {
        &self.options
    }

    /// Full argument vector, excluding the binary.
    pub fn arguments(&self) -> Vec<String> {
        let mut args = vec!["--ignore-missing-torrc".to_string()];
        args.extend(self.options.to_arguments());
        args
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
