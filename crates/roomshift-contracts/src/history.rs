use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use similar::TextDiff;
use uuid::Uuid;

use crate::assets::ImageAsset;

/// One accepted generation or refinement result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub generated_image: ImageAsset,
    /// The instruction that produced this version.
    pub prompt: String,
    pub suggestion: Option<String>,
    /// Unix milliseconds.
    pub timestamp: i64,
    /// Entry this version was refined from; `None` for first generations.
    pub parent_id: Option<String>,
    pub prompt_diff: Option<Vec<String>>,
}

impl HistoryEntry {
    /// Event-log view of the entry. Image data is summarized, never inlined.
    pub fn summary(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("entry_id".to_string(), Value::String(self.id.clone()));
        payload.insert("prompt".to_string(), Value::String(self.prompt.clone()));
        payload.insert(
            "suggestion".to_string(),
            self.suggestion
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        payload.insert(
            "parent_id".to_string(),
            self.parent_id
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        payload.insert(
            "mime_type".to_string(),
            Value::String(self.generated_image.mime_type.clone()),
        );
        payload.insert(
            "image_sha256".to_string(),
            Value::String(self.generated_image.sha256()),
        );
        payload.insert(
            "image_bytes".to_string(),
            Value::Number(self.generated_image.byte_len().into()),
        );
        payload.insert("timestamp".to_string(), Value::Number(self.timestamp.into()));
        payload
    }
}

/// Append-only version list. Entries are never mutated or reordered; the
/// only way to remove them is [`VersionHistory::clear`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionHistory {
    entries: Vec<HistoryEntry>,
}

impl VersionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(
        &mut self,
        generated_image: ImageAsset,
        prompt: String,
        suggestion: Option<String>,
        parent_id: Option<String>,
    ) -> &HistoryEntry {
        let parent_prompt = parent_id
            .as_deref()
            .and_then(|id| self.get(id))
            .map(|entry| entry.prompt.as_str());
        let prompt_diff = prompt_diff(parent_prompt, &prompt);
        let entry = HistoryEntry {
            id: Uuid::new_v4().to_string(),
            generated_image,
            prompt,
            suggestion,
            timestamp: Utc::now().timestamp_millis(),
            parent_id,
            prompt_diff,
        };
        self.entries.push(entry);
        let last = self.entries.len() - 1;
        &self.entries[last]
    }

    pub fn get(&self, id: &str) -> Option<&HistoryEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// 1-based version number used for display.
    pub fn display_index(&self, id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.id == id)
            .map(|idx| idx + 1)
    }

    /// Looks up a version by its 1-based display number.
    pub fn by_display_index(&self, index: usize) -> Option<&HistoryEntry> {
        index.checked_sub(1).and_then(|idx| self.entries.get(idx))
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        self.entries.as_slice()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn prompt_diff(prev: Option<&str>, curr: &str) -> Option<Vec<String>> {
    let prev = prev?;
    let diff = TextDiff::from_lines(prev, curr);
    let rendered = diff.unified_diff().header("prev", "curr").to_string();
    Some(rendered.lines().map(str::to_string).collect())
}
