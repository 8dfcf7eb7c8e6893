//! Asynchronous events from Tor.
//!
//! After `SETEVENTS`, Tor interleaves `650` notifications with command
//! replies. Only the classes the orchestrator observes are decoded in
//! detail; everything else comes through as [`Event::Unknown`].

use crate::error::ControlError;
use crate::protocol::parse_key_value_pairs;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Event classes that can be requested with `SETEVENTS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    /// Client status event (bootstrap, circuit establishment).
    StatusClient,
}

impl EventType {
    /// Get the event name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::StatusClient => "STATUS_CLIENT",
        }
    }
}

impl FromStr for EventType {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "STATUS_CLIENT" => Ok(EventType::StatusClient),
            other => Err(ControlError::ParseError(format!(
                "Unknown event type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed asynchronous event.
#[derive(Debug, Clone)]
pub enum Event {
    /// `STATUS_CLIENT` notification.
    Status(StatusEvent),
    /// Unknown or unparsed event.
    Unknown {
        /// The event keyword.
        event_type: String,
        /// The raw event data.
        data: String,
    },
}

impl Event {
    /// The class this event belongs to, if it is one we decode.
    pub fn event_type(&self) -> Option<EventType> {
        match self {
            Event::Status(_) => Some(EventType::StatusClient),
            Event::Unknown { .. } => None,
        }
    }

    /// Whether this is a client `BOOTSTRAP` status event.
    pub fn is_bootstrap(&self) -> bool {
        matches!(self, Event::Status(s) if s.action == "BOOTSTRAP")
    }

    /// Bootstrap percentage carried by a client `BOOTSTRAP` event.
    pub fn bootstrap_progress(&self) -> Option<u8> {
        match self {
            Event::Status(s) if self.is_bootstrap() => s
                .arguments
                .get("PROGRESS")
                .and_then(|p| p.parse::<u32>().ok())
                .map(|p| p.min(100) as u8),
            _ => None,
        }
    }

    /// `Some(true)` for `CIRCUIT_ESTABLISHED`, `Some(false)` for
    /// `CIRCUIT_NOT_ESTABLISHED`, `None` for anything else.
    pub fn circuit_established(&self) -> Option<bool> {
        match self {
            Event::Status(s) => match s.action.as_str() {
                "CIRCUIT_ESTABLISHED" => Some(true),
                "CIRCUIT_NOT_ESTABLISHED" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Client status event.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    /// Severity.
    pub severity: StatusSeverity,
    /// Action keyword, e.g. `BOOTSTRAP`.
    pub action: String,
    /// Additional arguments.
    pub arguments: HashMap<String, String>,
}

/// Status event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSeverity {
    /// Notice level.
    Notice,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl FromStr for StatusSeverity {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NOTICE" => Ok(StatusSeverity::Notice),
            "WARN" => Ok(StatusSeverity::Warn),
            "ERR" => Ok(StatusSeverity::Error),
            other => Err(ControlError::ParseError(format!(
                "Unknown status severity: {}",
                other
            ))),
        }
    }
}

/// Parse an event from its keyword and the text after it.
pub fn parse_event(event_type: &str, text: &str) -> Event {
    let parsed = match event_type.to_ascii_uppercase().as_str() {
        "STATUS_CLIENT" => parse_status_event(text),
        _ => None,
    };

    parsed.unwrap_or_else(|| Event::Unknown {
        event_type: event_type.to_string(),
        data: text.to_string(),
    })
}

/// Parse the first line of a `650` reply into an event.
pub fn parse_event_line(line: &str) -> Event {
    let (keyword, rest) = line.split_once(' ').unwrap_or((line, ""));
    parse_event(keyword, rest)
}

fn parse_status_event(text: &str) -> Option<Event> {
    let mut parts = text.splitn(3, ' ');
    let severity = parts.next()?.parse().ok()?;
    let action = parts.next()?.to_string();
    let arguments = parse_key_value_pairs(parts.next().unwrap_or(""));

    Some(Event::Status(StatusEvent {
        severity,
        action,
        arguments,
    }))
}
