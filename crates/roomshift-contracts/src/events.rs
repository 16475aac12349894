use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Everything a session records in its `events.jsonl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    SessionStarted,
    OriginalLoaded,
    SessionReset,
    GenerationStarted,
    GenerationSucceeded,
    GenerationEmpty,
    GenerationFailed,
    RefinementStarted,
    RefinementSucceeded,
    RefinementTextOnly,
    RefinementEmpty,
    RefinementFailed,
    HistorySelected,
    ResponseDiscarded,
    ExportWritten,
}

impl SessionEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::OriginalLoaded => "original_loaded",
            Self::SessionReset => "session_reset",
            Self::GenerationStarted => "generation_started",
            Self::GenerationSucceeded => "generation_succeeded",
            Self::GenerationEmpty => "generation_empty",
            Self::GenerationFailed => "generation_failed",
            Self::RefinementStarted => "refinement_started",
            Self::RefinementSucceeded => "refinement_succeeded",
            Self::RefinementTextOnly => "refinement_text_only",
            Self::RefinementEmpty => "refinement_empty",
            Self::RefinementFailed => "refinement_failed",
            Self::HistorySelected => "history_selected",
            Self::ResponseDiscarded => "response_discarded",
            Self::ExportWritten => "export_written",
        }
    }

    /// Failure events carry a diagnostic that is never shown to the user.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::GenerationFailed | Self::RefinementFailed)
    }
}

/// Append-only JSONL log for one session.
///
/// Every line carries `type`, `session_id`, a per-session `seq` starting at
/// 1 and `ts`. Those keys are reserved; payload keys with the same names are
/// dropped.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<SessionLog>,
}

#[derive(Debug)]
struct SessionLog {
    path: PathBuf,
    session_id: String,
    next_seq: Mutex<u64>,
}

const RESERVED_KEYS: [&str; 4] = ["type", "session_id", "seq", "ts"];

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(SessionLog {
                path: path.into(),
                session_id: session_id.into(),
                next_seq: Mutex::new(1),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn emit(&self, event: SessionEvent, payload: EventPayload) -> anyhow::Result<Value> {
        let log = &self.shared;
        // The sequence lock also serializes appends, so `seq` order is file order.
        let mut next_seq = log
            .next_seq
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;

        let mut record = Map::new();
        record.insert("type".to_string(), Value::String(event.as_str().to_string()));
        record.insert("session_id".to_string(), Value::String(log.session_id.clone()));
        record.insert("seq".to_string(), Value::from(*next_seq));
        record.insert(
            "ts".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
        );
        record.extend(
            payload
                .into_iter()
                .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str())),
        );

        if let Some(dir) = log.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed creating {}", dir.display()))?;
        }
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .with_context(|| format!("failed appending to {}", log.path.display()))?;
        *next_seq += 1;

        Ok(Value::Object(record))
    }
}
