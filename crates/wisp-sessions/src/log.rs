//! Append-only, line-delimited event logs — one file per session per day.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::Event;

/// Turn a sender id into a filesystem-safe file stem.
///
/// Channel sender ids are already plain (numeric Telegram ids, HTTP session
/// names), but nothing stops a channel from emitting separators — those are
/// mapped to `_` so a sender can never name a path outside the log dir.
pub fn file_stem(sender: &str) -> String {
    sender
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Path of the current day's log file for a sender.
pub fn day_log_path(log_dir: &Path, sender: &str) -> PathBuf {
    let day = chrono::Utc::now().format("%Y-%m-%d");
    log_dir.join(format!("{}.{}.jsonl", file_stem(sender), day))
}

/// Append one event as a JSON line. Creates the file (and dir) on first use.
///
/// The file is opened in append mode per call — event volume is one handful
/// of lines per message, and append-mode writes of a single line are atomic
/// enough for an audit trail that tolerates a torn final line on crash.
pub fn append_event(log_dir: &Path, sender: &str, event: &Event) -> Result<()> {
    fs::create_dir_all(log_dir)?;
    let path = day_log_path(log_dir, sender);
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// All log files belonging to a sender, oldest first.
pub fn session_log_files(log_dir: &Path, sender: &str) -> Result<Vec<PathBuf>> {
    let prefix = format!("{}.", file_stem(sender));
    let mut files = Vec::new();
    if !log_dir.exists() {
        return Ok(files);
    }
    for entry in fs::read_dir(log_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(&prefix) && name.ends_with(".jsonl") {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Read every complete event line from a log file. A torn final line (crash
/// mid-append) is skipped with a warning rather than failing the whole read.
pub fn read_events(path: &Path) -> Result<Vec<Event>> {
    let raw = fs::read_to_string(path)?;
    let mut events = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(line) {
            Ok(ev) => events.push(ev),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unparsable log line");
            }
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventPayload;

    #[test]
    fn stem_neutralises_separators() {
        assert_eq!(file_stem("telegram:42"), "telegram_42");
        assert_eq!(file_stem("../evil"), ".._evil");
        assert_eq!(file_stem("plain-id_7"), "plain-id_7");
    }

    #[test]
    fn append_then_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let ev = Event::now(EventPayload::User {
            content: serde_json::json!("hello"),
        });
        append_event(dir.path(), "u1", &ev).unwrap();
        append_event(dir.path(), "u1", &Event::now(EventPayload::Close)).unwrap();

        let files = session_log_files(dir.path(), "u1").unwrap();
        assert_eq!(files.len(), 1);
        let events = read_events(&files[0]).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1].payload, EventPayload::Close));
    }

    #[test]
    fn torn_final_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let ev = Event::now(EventPayload::Close);
        append_event(dir.path(), "u2", &ev).unwrap();
        let path = day_log_path(dir.path(), "u2");
        // Simulate a crash mid-append.
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"ts\":\"2026-01-01T0").unwrap();
        drop(f);

        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 1);
    }
}
