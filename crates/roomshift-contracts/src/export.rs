use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde_json::{Map, Value};

use crate::history::HistoryEntry;

pub const EXPORT_RECEIPT_SCHEMA_VERSION: u64 = 1;
pub const EXPORT_FILE_PREFIX: &str = "room-design";
const MAX_EXPORT_NAME_ATTEMPTS: usize = 100;

/// A download of the selected version: decoded bytes plus a suggested,
/// timestamp-unique file name. Persisting it is up to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub entry_id: String,
    pub version: usize,
    pub prompt: String,
    pub suggestion: Option<String>,
    pub parent_id: Option<String>,
    pub sha256: String,
    pub exported_at_ms: i64,
}

impl ExportArtifact {
    pub fn from_entry(
        entry: &HistoryEntry,
        version: usize,
        exported_at_ms: i64,
    ) -> anyhow::Result<Self> {
        let bytes = entry
            .generated_image
            .decode()
            .with_context(|| format!("failed decoding version {version} for export"))?;
        Ok(Self {
            file_name: export_file_name(entry.generated_image.file_extension(), exported_at_ms),
            mime_type: entry.generated_image.mime_type.clone(),
            bytes,
            entry_id: entry.id.clone(),
            version,
            prompt: entry.prompt.clone(),
            suggestion: entry.suggestion.clone(),
            parent_id: entry.parent_id.clone(),
            sha256: entry.generated_image.sha256(),
            exported_at_ms,
        })
    }

    pub fn receipt(&self) -> Value {
        let mut root = Map::new();
        root.insert(
            "schema_version".to_string(),
            Value::Number(EXPORT_RECEIPT_SCHEMA_VERSION.into()),
        );
        root.insert("file_name".to_string(), Value::String(self.file_name.clone()));
        root.insert("mime_type".to_string(), Value::String(self.mime_type.clone()));
        root.insert("sha256".to_string(), Value::String(self.sha256.clone()));
        root.insert("byte_len".to_string(), Value::Number(self.bytes.len().into()));
        root.insert("entry_id".to_string(), Value::String(self.entry_id.clone()));
        root.insert("version".to_string(), Value::Number(self.version.into()));
        root.insert("prompt".to_string(), Value::String(self.prompt.clone()));
        root.insert(
            "suggestion".to_string(),
            self.suggestion
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        root.insert(
            "parent_id".to_string(),
            self.parent_id
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        root.insert(
            "exported_at_ms".to_string(),
            Value::Number(self.exported_at_ms.into()),
        );
        Value::Object(root)
    }
}

pub fn export_file_name(extension: &str, millis: i64) -> String {
    format!("{EXPORT_FILE_PREFIX}-{millis}.{extension}")
}

/// Writes the artifact bytes to `dir/<file_name>` and its receipt next to it
/// as `<file_name>.json`. Existing files are never overwritten: a taken name
/// becomes `room-design-<ms>-2.<ext>`, `-3` and so on. Returns both paths.
pub fn write_export(dir: &Path, artifact: &ExportArtifact) -> anyhow::Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed creating {}", dir.display()))?;
    let (stem, extension) = artifact
        .file_name
        .rsplit_once('.')
        .unwrap_or((artifact.file_name.as_str(), ""));

    for attempt in 1..=MAX_EXPORT_NAME_ATTEMPTS {
        let file_name = match (attempt, extension) {
            (1, _) => artifact.file_name.clone(),
            (_, "") => format!("{stem}-{attempt}"),
            _ => format!("{stem}-{attempt}.{extension}"),
        };
        let image_path = dir.join(&file_name);
        let receipt_path = dir.join(format!("{file_name}.json"));
        if receipt_path.exists() || !create_new_file(&image_path, &artifact.bytes)? {
            continue;
        }

        let mut receipt = artifact.receipt();
        receipt["file_name"] = Value::String(file_name);
        let receipt_bytes = serde_json::to_vec_pretty(&receipt)?;
        if !create_new_file(&receipt_path, &receipt_bytes)? {
            bail!("{} appeared while exporting", receipt_path.display());
        }
        return Ok((image_path, receipt_path));
    }
    bail!(
        "no free export name for {} in {}",
        artifact.file_name,
        dir.display()
    )
}

/// Returns false when `path` already exists.
fn create_new_file(path: &Path, bytes: &[u8]) -> anyhow::Result<bool> {
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to create {}", path.display()))
        }
    };
    file.write_all(bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}
