//! Sync progress reporting.
//!
//! Reports observable progress during `chatvault sync` so users see which
//! chat is being fetched and how far along it is. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for sync.
#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    /// Resolving the target peer and refreshing the dialog list.
    Resolving { target: String },
    /// A batch has been committed; `fetched` is the running total of new messages.
    Fetched { chat_id: i64, fetched: u64 },
    /// The chat is fully synced.
    Synced { chat_id: i64, fetched: u64 },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the sync engine.
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync chat 120: 1,234 messages".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Resolving { target } => {
                format!("sync {}  resolving...\n", target)
            }
            SyncProgressEvent::Fetched { chat_id, fetched } => {
                format!("sync chat {}  {} messages\n", chat_id, format_number(*fetched))
            }
            SyncProgressEvent::Synced { chat_id, fetched } => {
                format!(
                    "sync chat {}  done, {} new messages\n",
                    chat_id,
                    format_number(*fetched)
                )
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Resolving { target } => serde_json::json!({
                "event": "progress",
                "phase": "resolving",
                "target": target
            }),
            SyncProgressEvent::Fetched { chat_id, fetched } => serde_json::json!({
                "event": "progress",
                "phase": "fetching",
                "chat_id": chat_id,
                "fetched": fetched
            }),
            SyncProgressEvent::Synced { chat_id, fetched } => serde_json::json!({
                "event": "progress",
                "phase": "synced",
                "chat_id": chat_id,
                "fetched": fetched
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

/// Formats a count with thousand separators for human output.
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode. Caller passes it to the sync engine.
    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
