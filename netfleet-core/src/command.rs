//! Command records and their status state machine.
//!
//! ```text
//! New ──► Pending(reason) ──► Pending(reason) ... ──► Cancelled
//!  │            │
//!  ├────────────┴──► Ok
//!  └────────────┴──► Error(reason)
//! ```
//!
//! `Ok`, `Error` and `Cancelled` are terminal. The legacy string forms
//! (`""`, `"pending: ..."`, `"ok"`, `"error: ..."`) only exist on the wire,
//! see [`crate::wire`].

use chrono::{DateTime, Utc};
use std::fmt;

/// Attempts a command gets before it is cancelled.
pub const MAX_ATTEMPTS: u32 = 4;

pub const CANCELLED_TEXT: &str = "cancelled, too many retries";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CommandStatus {
    #[default]
    New,
    Pending(String),
    Ok,
    Error(String),
    /// Retry budget exhausted. The note says whether the target device was
    /// known at cancellation time.
    Cancelled(Option<String>),
}

impl CommandStatus {
    pub fn pending(reason: impl Into<String>) -> Self {
        CommandStatus::Pending(reason.into())
    }

    pub fn error(reason: impl Into<String>) -> Self {
        CommandStatus::Error(reason.into())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Ok | CommandStatus::Error(_) | CommandStatus::Cancelled(_))
    }

    /// New and pending records are picked up by the execution loop and by pulls.
    pub fn is_runnable(&self) -> bool {
        !self.is_terminal()
    }

    /// Parses the legacy string form. Unrecognized non-empty text is treated
    /// as a handler error so it can never be re-executed.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return CommandStatus::New;
        }
        if raw == "ok" {
            return CommandStatus::Ok;
        }
        if let Some(reason) = raw.strip_prefix("pending:") {
            return CommandStatus::Pending(reason.trim().to_string());
        }
        if let Some(reason) = raw.strip_prefix("error:") {
            let reason = reason.trim();
            if let Some(rest) = reason.strip_prefix(CANCELLED_TEXT) {
                let note = rest.trim().trim_start_matches(',').trim();
                let note = note.trim_start_matches('(').trim_end_matches(')').trim();
                return CommandStatus::Cancelled((!note.is_empty()).then(|| note.to_string()));
            }
            return CommandStatus::Error(reason.to_string());
        }
        CommandStatus::Error(raw.to_string())
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandStatus::New => Ok(()),
            CommandStatus::Pending(reason) => write!(f, "pending: {}", reason),
            CommandStatus::Ok => write!(f, "ok"),
            CommandStatus::Error(reason) => write!(f, "error: {}", reason),
            CommandStatus::Cancelled(None) => write!(f, "error: {}", CANCELLED_TEXT),
            CommandStatus::Cancelled(Some(note)) => write!(f, "error: {} ({})", CANCELLED_TEXT, note),
        }
    }
}

/// Queue key. `client` is set on per-client fan-out copies; on the wire the
/// key reads `@<client> <text>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandKey {
    pub client: Option<String>,
    pub text: String,
}

impl CommandKey {
    pub fn new(text: impl Into<String>) -> Self {
        Self { client: None, text: text.into() }
    }

    pub fn for_client(client: impl Into<String>, text: impl Into<String>) -> Self {
        Self { client: Some(client.into()), text: text.into() }
    }

    pub fn parse(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix('@') {
            if let Some((client, text)) = rest.split_once(' ') {
                if !client.is_empty() {
                    return Self::for_client(client, text.trim());
                }
            }
        }
        Self::new(raw.trim())
    }

    /// Whether a client named `name` may run this command.
    pub fn is_addressed_to(&self, name: &str) -> bool {
        self.client.as_deref().map_or(true, |client| client == name)
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.client {
            Some(client) => write!(f, "@{} {}", client, self.text),
            None => f.write_str(&self.text),
        }
    }
}

/// Flags given at insertion time. They shape the insert and are not
/// replicated semantics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOptions {
    pub all: bool,
    pub no_overwrite: bool,
    pub no_syslog: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandRecord {
    pub command: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub status: CommandStatus,
    pub result: String,
    pub retries: u32,
    /// Node that last touched the record.
    pub name: String,
    /// Target client of a fan-out copy.
    pub client: Option<String>,
    /// Resolved target device, set by handlers.
    pub dev_id: Option<String>,
    pub options: InsertOptions,
}

impl CommandRecord {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timestamp: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Parses operator input: a leading `all` word asks for one copy per
    /// registered client.
    pub fn from_cli(text: &str) -> Self {
        let text = text.trim();
        match text.strip_prefix("all ") {
            Some(rest) if !rest.trim().is_empty() => {
                let mut record = Self::new(rest.trim());
                record.options.all = true;
                record
            }
            _ => Self::new(text),
        }
    }

    pub fn key(&self) -> CommandKey {
        CommandKey { client: self.client.clone(), text: self.command.clone() }
    }

    /// First word of the command text, which selects the handler.
    pub fn verb(&self) -> &str {
        self.command.split_whitespace().next().unwrap_or("")
    }

    /// Whitespace-separated words of the command text.
    pub fn words(&self) -> Vec<&str> {
        self.command.split_whitespace().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_through_legacy_strings() {
        for status in [
            CommandStatus::New,
            CommandStatus::pending("device not found"),
            CommandStatus::Ok,
            CommandStatus::error("invalid command"),
            CommandStatus::Cancelled(None),
            CommandStatus::Cancelled(Some("device 00-00-00-00-00-01 not found".into())),
        ] {
            assert_eq!(CommandStatus::parse(&status.to_string()), status);
        }
    }

    #[test]
    fn cancelled_renders_as_error() {
        assert_eq!(CommandStatus::Cancelled(None).to_string(), "error: cancelled, too many retries");
        assert!(CommandStatus::parse("error: cancelled, too many retries").is_terminal());
    }

    #[test]
    fn unknown_status_text_becomes_terminal_error() {
        let status = CommandStatus::parse("dial tcp 10.0.0.1:23: i/o timeout");
        assert_eq!(status, CommandStatus::error("dial tcp 10.0.0.1:23: i/o timeout"));
        assert!(status.is_terminal());
    }

    #[test]
    fn terminal_classification() {
        assert!(!CommandStatus::New.is_terminal());
        assert!(!CommandStatus::pending("x").is_terminal());
        assert!(CommandStatus::Ok.is_terminal());
        assert!(CommandStatus::error("x").is_terminal());
    }

    #[test]
    fn key_wire_form() {
        let key = CommandKey::parse("@c1 scan gwd");
        assert_eq!(key, CommandKey::for_client("c1", "scan gwd"));
        assert_eq!(key.to_string(), "@c1 scan gwd");

        let plain = CommandKey::parse("switch 00-60-E9-2D-91-3E admin default show ip");
        assert_eq!(plain.client, None);
        assert_eq!(plain.to_string(), "switch 00-60-E9-2D-91-3E admin default show ip");
    }

    #[test]
    fn addressing() {
        assert!(CommandKey::new("scan gwd").is_addressed_to("c1"));
        assert!(CommandKey::for_client("c1", "scan gwd").is_addressed_to("c1"));
        assert!(!CommandKey::for_client("c2", "scan gwd").is_addressed_to("c1"));
    }

    #[test]
    fn all_prefix_sets_fan_out() {
        let record = CommandRecord::from_cli("all scan gwd");
        assert!(record.options.all);
        assert_eq!(record.command, "scan gwd");

        let record = CommandRecord::from_cli("scan gwd");
        assert!(!record.options.all);
    }

    #[test]
    fn verb_and_words() {
        let record = CommandRecord::new("beep 00-00-00-00-00-01 1.2.3.4");
        assert_eq!(record.verb(), "beep");
        assert_eq!(record.words().len(), 3);
        assert_eq!(record.key(), CommandKey::new("beep 00-00-00-00-00-01 1.2.3.4"));
    }
}
