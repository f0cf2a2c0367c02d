use std::fmt;

use serde::{Deserialize, Serialize};

/// A single relay event: one transition of one call through the relay, or an
/// operator action from the interactive console.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEntry {
    /// Milliseconds since the log was started.
    pub elapsed_ms: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub label: EventLabel,
    pub message: String,
}

impl EventEntry {
    /// Create an entry stamped with the current UTC time. The caller supplies
    /// the elapsed time because only the owning [`EventLog`](crate::EventLog)
    /// knows when it started.
    pub fn new(elapsed_ms: u64, label: EventLabel, message: impl Into<String>) -> Self {
        Self {
            elapsed_ms,
            timestamp: chrono::Utc::now(),
            label,
            message: message.into(),
        }
    }

    /// Render the entry as a console line: `[000123] CALL rig.get_mode()`.
    pub fn render(&self) -> String {
        format!("[{:06}] {} {}", self.elapsed_ms, self.label, self.message)
    }
}

/// The category of a relay event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventLabel {
    Call,
    Blocked,
    Remapped,
    Callback,
    Result,
    Error,
    Shell,
}

impl EventLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLabel::Call => "CALL",
            EventLabel::Blocked => "BLOCKED",
            EventLabel::Remapped => "REMAPPED",
            EventLabel::Callback => "CALLBACK",
            EventLabel::Result => "RESULT",
            EventLabel::Error => "ERROR",
            EventLabel::Shell => "SHELL",
        }
    }
}

impl fmt::Display for EventLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// On-disk format for the durable sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    /// The same `[elapsed] LABEL message` line printed to the console.
    #[default]
    Text,
    /// One serialized [`EventEntry`] per line.
    Jsonl,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_pads_elapsed_time() {
        let entry = EventEntry::new(42, EventLabel::Call, "rig.get_mode()");
        assert_eq!(entry.render(), "[000042] CALL rig.get_mode()");
    }

    #[test]
    fn render_keeps_wide_elapsed_time() {
        let entry = EventEntry::new(12_345_678, EventLabel::Result, "x -> 1");
        assert_eq!(entry.render(), "[12345678] RESULT x -> 1");
    }

    #[test]
    fn label_serializes_uppercase() {
        let json = serde_json::to_string(&EventLabel::Remapped).unwrap();
        assert_eq!(json, "\"REMAPPED\"");
        let back: EventLabel = serde_json::from_str("\"SHELL\"").unwrap();
        assert_eq!(back, EventLabel::Shell);
    }
}
