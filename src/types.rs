//! Core value types: lifecycle status, circuits, relays and signals.

use crate::error::ControlError;
use crate::protocol::parse_key_value_pairs;
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of the managed client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    /// No startup attempt in progress and no usable endpoint.
    #[default]
    Stopped,
    /// A startup attempt is in flight.
    Starting,
    /// A circuit is established and the SOCKS endpoint is known.
    Started,
}

impl Status {
    /// Get the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Stopped => "stopped",
            Status::Starting => "starting",
            Status::Started => "started",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A circuit identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CircuitId(pub u64);

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CircuitId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(CircuitId(s.parse()?))
    }
}

/// A relay fingerprint (40 hex characters, optionally prefixed with $).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Get the fingerprint as a string (without $ prefix).
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_start_matches('$');
        if s.len() != 40 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ControlError::ParseError(format!(
                "invalid fingerprint '{}': must be 40 hex characters",
                s
            )));
        }
        Ok(Fingerprint(s.to_ascii_uppercase()))
    }
}

/// One hop of a circuit path, as Tor reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerSpec {
    /// Just a nickname.
    Nickname(String),
    /// Just a fingerprint.
    Fingerprint(Fingerprint),
    /// Fingerprint with associated nickname (`$FP~name` or `$FP=name`).
    LongName {
        /// The relay fingerprint.
        fingerprint: Fingerprint,
        /// The relay nickname.
        nickname: String,
    },
}

impl fmt::Display for ServerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerSpec::Nickname(n) => write!(f, "{}", n),
            ServerSpec::Fingerprint(fp) => write!(f, "${}", fp),
            ServerSpec::LongName {
                fingerprint,
                nickname,
            } => write!(f, "${}~{}", fingerprint, nickname),
        }
    }
}

impl FromStr for ServerSpec {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(rest) = s.strip_prefix('$') else {
            return Ok(ServerSpec::Nickname(s.to_string()));
        };
        match rest.split_once(['~', '=']) {
            Some((fp, nickname)) => Ok(ServerSpec::LongName {
                fingerprint: fp.parse()?,
                nickname: nickname.to_string(),
            }),
            None => Ok(ServerSpec::Fingerprint(rest.parse()?)),
        }
    }
}

/// Status of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStatus {
    /// Circuit ID assigned to new circuit.
    Launched,
    /// All hops finished, can now accept streams.
    Built,
    /// Built, waiting to learn whether a better guard is usable.
    GuardWait,
    /// One more hop has been completed.
    Extended,
    /// Circuit closed (was not built).
    Failed,
    /// Circuit closed (was built).
    Closed,
    /// Unknown status.
    Unknown,
}

impl CircuitStatus {
    /// Parse a status keyword; unrecognized keywords map to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "LAUNCHED" => CircuitStatus::Launched,
            "BUILT" => CircuitStatus::Built,
            "GUARD_WAIT" => CircuitStatus::GuardWait,
            "EXTENDED" => CircuitStatus::Extended,
            "FAILED" => CircuitStatus::Failed,
            "CLOSED" => CircuitStatus::Closed,
            _ => CircuitStatus::Unknown,
        }
    }
}

impl fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitStatus::Launched => "LAUNCHED",
            CircuitStatus::Built => "BUILT",
            CircuitStatus::GuardWait => "GUARD_WAIT",
            CircuitStatus::Extended => "EXTENDED",
            CircuitStatus::Failed => "FAILED",
            CircuitStatus::Closed => "CLOSED",
            CircuitStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Purpose of a circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitPurpose {
    /// General circuit for client traffic or directory requests.
    General,
    /// Onion service client-side introduction-point circuit.
    HsClientIntro,
    /// Onion service client-side rendezvous circuit.
    HsClientRend,
    /// Onion service client-side directory circuit.
    HsClientHsDir,
    /// Circuit held open to disguise its true close time.
    CircuitPadding,
    /// Circuit kept to measure how long building takes.
    MeasureTimeout,
    /// Circuit built by a controller.
    Controller,
    /// Any purpose not listed above.
    Other(String),
}

impl CircuitPurpose {
    /// Parse a purpose keyword.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "GENERAL" => CircuitPurpose::General,
            "HS_CLIENT_INTRO" => CircuitPurpose::HsClientIntro,
            "HS_CLIENT_REND" => CircuitPurpose::HsClientRend,
            "HS_CLIENT_HSDIR" => CircuitPurpose::HsClientHsDir,
            "CIRCUIT_PADDING" => CircuitPurpose::CircuitPadding,
            "MEASURE_TIMEOUT" => CircuitPurpose::MeasureTimeout,
            "CONTROLLER" => CircuitPurpose::Controller,
            other => CircuitPurpose::Other(other.to_string()),
        }
    }
}

/// A circuit as listed by `GETINFO circuit-status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Circuit {
    /// Circuit ID.
    pub id: CircuitId,
    /// Circuit status.
    pub status: CircuitStatus,
    /// Relays the circuit runs through, entry first.
    pub path: Vec<ServerSpec>,
    /// Build flags such as `NEED_CAPACITY`.
    pub build_flags: Vec<String>,
    /// Circuit purpose, when reported.
    pub purpose: Option<CircuitPurpose>,
    /// Creation timestamp as reported by Tor.
    pub time_created: Option<String>,
}

impl Circuit {
    /// Parse one line of `circuit-status` output.
    ///
    /// Format: `<id> <status> [<path>] [KEY=VALUE ...]`.
    pub fn parse_status_line(line: &str) -> Option<Circuit> {
        let mut parts = line.trim().splitn(3, ' ');
        let id = parts.next()?.parse().ok()?;
        let status = CircuitStatus::parse(parts.next()?);
        let rest = parts.next().unwrap_or("");

        let (path_text, attrs) = match rest.split_once(' ') {
            _ if rest.is_empty() => ("", ""),
            Some((first, tail)) if is_path_token(first) => (first, tail),
            None if is_path_token(rest) => (rest, ""),
            _ => ("", rest),
        };

        let path = path_text
            .split(',')
            .filter(|p| !p.is_empty())
            .filter_map(|p| p.parse().ok())
            .collect();

        let kv = parse_key_value_pairs(attrs);

        Some(Circuit {
            id,
            status,
            path,
            build_flags: kv
                .get("BUILD_FLAGS")
                .map(|s| s.split(',').map(String::from).collect())
                .unwrap_or_default(),
            purpose: kv.get("PURPOSE").map(|s| CircuitPurpose::parse(s)),
            time_created: kv.get("TIME_CREATED").cloned(),
        })
    }
}

fn is_path_token(token: &str) -> bool {
    token.starts_with('$') || !token.contains('=')
}

/// Signals the orchestrator sends with `SIGNAL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Switch to clean circuits for new connections.
    NewNym,
}

impl Signal {
    /// Get the signal name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::NewNym => "NEWNYM",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FP_A: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

    #[test]
    fn test_fingerprint_parsing() {
        let fp: Fingerprint = format!("${}", FP_A.to_lowercase()).parse().unwrap();
        assert_eq!(fp.as_str(), FP_A);
        assert!("$ABC".parse::<Fingerprint>().is_err());
    }

    #[test]
    fn test_server_spec_parsing() {
        let spec: ServerSpec = format!("${}~Guard", FP_A).parse().unwrap();
        assert!(matches!(spec, ServerSpec::LongName { ref nickname, .. } if nickname == "Guard"));
        assert_eq!(spec.to_string(), format!("${}~Guard", FP_A));

        let spec: ServerSpec = format!("${}=Exit", FP_A).parse().unwrap();
        assert!(matches!(spec, ServerSpec::LongName { .. }));

        let spec: ServerSpec = "justaname".parse().unwrap();
        assert_eq!(spec, ServerSpec::Nickname("justaname".to_string()));
    }

    #[test]
    fn test_circuit_status_parse_is_case_insensitive() {
        assert_eq!(CircuitStatus::parse("built"), CircuitStatus::Built);
        assert_eq!(CircuitStatus::parse("GUARD_WAIT"), CircuitStatus::GuardWait);
        assert_eq!(CircuitStatus::parse("weird"), CircuitStatus::Unknown);
        assert_eq!(CircuitStatus::Built.to_string(), "BUILT");
    }

    #[test]
    fn test_circuit_line_full() {
        let line = format!(
            "7 BUILT ${a}~Guard,${a}~Middle,${a}~Exit BUILD_FLAGS=NEED_CAPACITY,NEED_UPTIME PURPOSE=GENERAL TIME_CREATED=2024-05-01T10:00:00.123456",
            a = FP_A
        );
        let circuit = Circuit::parse_status_line(&line).unwrap();
        assert_eq!(circuit.id, CircuitId(7));
        assert_eq!(circuit.status, CircuitStatus::Built);
        assert_eq!(circuit.path.len(), 3);
        assert_eq!(circuit.build_flags, vec!["NEED_CAPACITY", "NEED_UPTIME"]);
        assert_eq!(circuit.purpose, Some(CircuitPurpose::General));
        assert_eq!(
            circuit.time_created.as_deref(),
            Some("2024-05-01T10:00:00.123456")
        );
    }

    #[test]
    fn test_circuit_line_without_path() {
        let circuit = Circuit::parse_status_line("3 LAUNCHED BUILD_FLAGS=NEED_CAPACITY PURPOSE=GENERAL").unwrap();
        assert!(circuit.path.is_empty());
        assert_eq!(circuit.build_flags, vec!["NEED_CAPACITY"]);

        let bare = Circuit::parse_status_line("4 EXTENDED").unwrap();
        assert_eq!(bare.status, CircuitStatus::Extended);
        assert!(bare.purpose.is_none());
    }

    #[test]
    fn test_circuit_line_garbage() {
        assert!(Circuit::parse_status_line("").is_none());
        assert!(Circuit::parse_status_line("abc BUILT").is_none());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::default(), Status::Stopped);
        assert_eq!(Status::Starting.to_string(), "starting");
        assert_eq!(Signal::NewNym.as_str(), "NEWNYM");
    }
}
