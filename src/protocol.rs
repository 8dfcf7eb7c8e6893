//! Line framing for the control protocol.
//!
//! Replies are sequences of `NNN<sep>text` lines where `<sep>` is `-` for
//! a mid-reply line, `+` for a line followed by a dot-terminated data block,
//! and a space for the final line. Code `650` marks asynchronous events.

use crate::error::{ControlError, Result, StatusCode};
use std::collections::HashMap;

/// A single parsed reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    /// The 3-digit status code.
    pub code: u16,
    /// The separator character: '-' for mid-reply, '+' for data, ' ' for end.
    pub separator: char,
    /// The text after the separator.
    pub text: String,
    /// Data block lines when `separator == '+'`, with dot-escaping removed.
    pub data: Vec<String>,
}

impl ReplyLine {
    /// Parse a reply line (without its CRLF).
    pub fn parse(line: &str) -> Result<Self> {
        if line.len() < 4 || !line.is_char_boundary(3) || !line.is_char_boundary(4) {
            return Err(ControlError::ProtocolError(format!(
                "Reply line too short: '{}'",
                line
            )));
        }

        let code: u16 = line[..3].parse().map_err(|_| {
            ControlError::ProtocolError(format!("Invalid status code in: '{}'", line))
        })?;

        let separator = line[3..4].chars().next().unwrap_or('?');
        if !matches!(separator, ' ' | '-' | '+') {
            return Err(ControlError::ProtocolError(format!(
                "Invalid separator '{}' in: '{}'",
                separator, line
            )));
        }

        Ok(ReplyLine {
            code,
            separator,
            text: line[4..].to_string(),
            data: Vec::new(),
        })
    }

    /// Check if this is the final line of a reply.
    pub fn is_end(&self) -> bool {
        self.separator == ' '
    }

    /// Check if a data block follows this line.
    pub fn is_data(&self) -> bool {
        self.separator == '+'
    }
}

/// A complete reply, potentially spanning multiple lines.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Status code of the first line.
    pub code: u16,
    /// All reply lines in order.
    pub lines: Vec<ReplyLine>,
}

impl Reply {
    /// Assemble a reply from its lines.
    pub fn new(lines: Vec<ReplyLine>) -> Result<Self> {
        let code = lines
            .first()
            .map(|l| l.code)
            .ok_or_else(|| ControlError::ProtocolError("Empty reply".to_string()))?;
        Ok(Reply { code, lines })
    }

    /// Get the status code as an enum.
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.code)
    }

    /// Check if this reply indicates success.
    pub fn is_success(&self) -> bool {
        self.status_code().is_success()
    }

    /// Check if this is an asynchronous event.
    pub fn is_async_event(&self) -> bool {
        self.code == StatusCode::AsyncEvent as u16
    }

    /// All line texts joined with newlines.
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The first line's text.
    pub fn first_line(&self) -> &str {
        self.lines.first().map(|l| l.text.as_str()).unwrap_or("")
    }

    /// Turn a non-2xx reply into [`ControlError::CommandRejected`].
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ControlError::CommandRejected {
                code: self.code,
                message: self.text(),
            })
        }
    }

    /// Look up the value a `GETINFO`-style reply gives for `key`.
    ///
    /// Handles both `key=value` lines and `key=` lines followed by a data
    /// block, in which case the block lines are joined with newlines.
    pub fn value_of(&self, key: &str) -> Option<String> {
        self.lines.iter().find_map(|line| {
            let value = line.text.strip_prefix(key)?.strip_prefix('=')?;
            if line.is_data() {
                Some(line.data.join("\n"))
            } else {
                Some(value.to_string())
            }
        })
    }
}

/// Strip dot-escaping from one data block line. Returns `None` for the
/// terminating `.` line.
pub fn unescape_data_line(line: &str) -> Option<&str> {
    if line == "." {
        None
    } else if let Some(rest) = line.strip_prefix('.') {
        Some(rest)
    } else {
        Some(line)
    }
}

/// Parse `KEY=value KEY2="quoted value"` pairs.
pub fn parse_key_value_pairs(text: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();
    let mut remaining = text;

    loop {
        remaining = remaining.trim_start();
        let Some(eq) = remaining.find('=') else {
            break;
        };
        // A bare word before the next '=' is not part of any pair.
        if let Some(space) = remaining[..eq].rfind(' ') {
            remaining = &remaining[space + 1..];
            continue;
        }

        let key = remaining[..eq].to_string();
        remaining = &remaining[eq + 1..];

        let (value, rest) = if remaining.starts_with('"') {
            parse_quoted_string(remaining)
        } else {
            let end = remaining.find(' ').unwrap_or(remaining.len());
            (remaining[..end].to_string(), &remaining[end..])
        };

        result.insert(key, value);
        remaining = rest;
    }

    result
}

/// Parse a leading quoted string, returning it unescaped plus the rest.
fn parse_quoted_string(s: &str) -> (String, &str) {
    let mut result = String::new();
    let mut chars = s.char_indices().skip(1);

    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return (result, &s[idx + 1..]),
            '\\' => match chars.next() {
                Some((_, 'n')) => result.push('\n'),
                Some((_, 'r')) => result.push('\r'),
                Some((_, 't')) => result.push('\t'),
                Some((_, other)) => result.push(other),
                None => break,
            },
            _ => result.push(c),
        }
    }

    (result, "")
}

/// Remove one level of surrounding quotes from a reply value, if present.
pub fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        parse_quoted_string(value).0
    } else {
        value.to_string()
    }
}

/// Quote a string for use as a control command argument, if it needs it.
pub fn quote_string(s: &str) -> String {
    let needs_quoting = s.is_empty()
        || s
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\\' || !(' '..='~').contains(&c));

    if !needs_quoting {
        return s.to_string();
    }

    let mut result = String::with_capacity(s.len() + 2);
    result.push('"');
    for c in s.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            _ => result.push(c),
        }
    }
    result.push('"');
    result
}

/// Format a command line with arguments, CRLF-terminated.
pub fn format_command<S: AsRef<str>>(keyword: &str, args: &[S]) -> String {
    let mut cmd = keyword.to_string();
    for arg in args {
        cmd.push(' ');
        cmd.push_str(arg.as_ref());
    }
    cmd.push_str("\r\n");
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(s: &str) -> ReplyLine {
        ReplyLine::parse(s).unwrap()
    }

    #[test]
    fn test_reply_line_parsing() {
        let end = line("250 OK");
        assert_eq!(end.code, 250);
        assert!(end.is_end());
        assert_eq!(end.text, "OK");

        assert!(!line("250-version=0.4.8.10").is_end());
        assert!(line("250+circuit-status=").is_data());
    }

    #[test]
    fn test_reply_line_rejects_garbage() {
        assert!(ReplyLine::parse("25").is_err());
        assert!(ReplyLine::parse("ABC OK").is_err());
        assert!(ReplyLine::parse("250/OK").is_err());
    }

    #[test]
    fn test_reply_line_minimal() {
        let l = line("250 ");
        assert_eq!(l.code, 250);
        assert!(l.text.is_empty());
    }

    #[test]
    fn test_value_of_plain_and_data() {
        let mut data = line("250+circuit-status=");
        data.data = vec!["1 BUILT".to_string(), "2 LAUNCHED".to_string()];
        let reply = Reply::new(vec![
            line("250-net/listeners/socks=\"127.0.0.1:9050\""),
            data,
            line("250 OK"),
        ])
        .unwrap();

        assert_eq!(
            reply.value_of("net/listeners/socks").as_deref(),
            Some("\"127.0.0.1:9050\"")
        );
        assert_eq!(
            reply.value_of("circuit-status").as_deref(),
            Some("1 BUILT\n2 LAUNCHED")
        );
        assert_eq!(reply.value_of("net/listeners"), None);
    }

    #[test]
    fn test_reply_status() {
        assert!(Reply::new(vec![]).is_err());

        let ok = Reply::new(vec![line("250 OK")]).unwrap();
        assert!(ok.into_result().is_ok());

        let bad = Reply::new(vec![line("515 Bad authentication")]).unwrap();
        match bad.into_result() {
            Err(ControlError::CommandRejected { code, message }) => {
                assert_eq!(code, 515);
                assert_eq!(message, "Bad authentication");
            }
            other => panic!("unexpected {:?}", other),
        }

        let event = Reply::new(vec![line("650 STATUS_CLIENT NOTICE CIRCUIT_ESTABLISHED")]).unwrap();
        assert!(event.is_async_event());
    }

    #[test]
    fn test_key_value_parsing() {
        let pairs = parse_key_value_pairs(
            "NOTICE BOOTSTRAP PROGRESS=50 TAG=loading_descriptors SUMMARY=\"Loading relay descriptors\"",
        );
        assert_eq!(pairs.get("PROGRESS").map(String::as_str), Some("50"));
        assert_eq!(pairs.get("TAG").map(String::as_str), Some("loading_descriptors"));
        assert_eq!(
            pairs.get("SUMMARY").map(String::as_str),
            Some("Loading relay descriptors")
        );
        assert!(!pairs.contains_key("NOTICE BOOTSTRAP PROGRESS"));
    }

    #[test]
    fn test_key_value_escapes() {
        let pairs = parse_key_value_pairs(r#"MSG="line1\nline2" PATH="C:\\tor""#);
        assert_eq!(pairs.get("MSG").map(String::as_str), Some("line1\nline2"));
        assert_eq!(pairs.get("PATH").map(String::as_str), Some("C:\\tor"));
        assert!(parse_key_value_pairs("").is_empty());
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_string("simple"), "simple");
        assert_eq!(quote_string(""), "\"\"");
        assert_eq!(
            quote_string("obfs4 192.0.2.1:443 cert=abc"),
            "\"obfs4 192.0.2.1:443 cert=abc\""
        );
        assert_eq!(quote_string("with\"quote"), "\"with\\\"quote\"");
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("\"127.0.0.1:9050\""), "127.0.0.1:9050");
        assert_eq!(unquote("127.0.0.1:9050"), "127.0.0.1:9050");
        assert_eq!(unquote("\""), "\"");
    }

    #[test]
    fn test_data_line_unescape() {
        assert_eq!(unescape_data_line("..hidden"), Some(".hidden"));
        assert_eq!(unescape_data_line("plain"), Some("plain"));
        assert_eq!(unescape_data_line("."), None);
    }

    #[test]
    fn test_command_formatting() {
        assert_eq!(format_command("RESETCONF", &["Bridge"]), "RESETCONF Bridge\r\n");
        assert_eq!(format_command::<&str>("SIGNAL", &[]), "SIGNAL\r\n");
    }
}
