use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier for a correspondent. One sender owns one session.
///
/// Channels produce platform-native ids (Telegram chat id, HTTP session name,
/// `"cli"` for the local terminal) — the orchestrator treats them as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SenderId(pub String);

impl SenderId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SenderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SenderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Origin of an inbound message. Drives provider routing and delivery policy.
///
/// `System` messages come from the daemon itself (schedules, `/notify`,
/// `/evolve`) and never deliver a reply anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Telegram,
    Http,
    Cli,
    System,
    /// A source registered by a custom channel adapter.
    #[serde(untagged)]
    Other(String),
}

impl Source {
    pub fn as_str(&self) -> &str {
        match self {
            Source::Telegram => "telegram",
            Source::Http => "http",
            Source::Cli => "cli",
            Source::System => "system",
            Source::Other(s) => s,
        }
    }

    /// Whether replies for this source go back out through a channel.
    /// `Http` completes a response future instead; `System` is silent.
    pub fn delivers_via_channel(&self) -> bool {
        matches!(self, Source::Telegram | Source::Cli)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Source {
    fn from(s: &str) -> Self {
        match s {
            "telegram" => Source::Telegram,
            "http" => Source::Http,
            "cli" => Source::Cli,
            "system" => Source::System,
            other => Source::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_roundtrip() {
        assert_eq!(Source::from("telegram"), Source::Telegram);
        assert_eq!(Source::from("matrix"), Source::Other("matrix".into()));
        assert_eq!(Source::Other("matrix".into()).as_str(), "matrix");
    }

    #[test]
    fn delivery_partition() {
        assert!(Source::Telegram.delivers_via_channel());
        assert!(Source::Cli.delivers_via_channel());
        assert!(!Source::Http.delivers_via_channel());
        assert!(!Source::System.delivers_via_channel());
    }
}
