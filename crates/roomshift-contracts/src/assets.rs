use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// MIME type assumed for generated parts that omit one.
pub const DEFAULT_GENERATED_MIME_TYPE: &str = "image/png";

/// An encoded image payload paired with its MIME type.
///
/// `data` holds base64 text; the constructors remove any
/// `data:image/<kind>;base64,` header. Assets are never mutated after
/// construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAsset {
    pub mime_type: String,
    pub data: String,
}

impl ImageAsset {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        let data = data.into();
        Self {
            mime_type: mime_type.into(),
            data: strip_data_uri_prefix(&data).to_string(),
        }
    }

    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: BASE64.encode(bytes),
        }
    }

    /// Parses `data:image/<kind>;base64,<payload>`. The MIME type is implied
    /// by the URI header.
    pub fn from_data_uri(uri: &str) -> Option<Self> {
        let (kind, payload) = split_data_uri(uri.trim())?;
        Some(Self {
            mime_type: format!("image/{kind}"),
            data: payload.to_string(),
        })
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    pub fn decode(&self) -> anyhow::Result<Vec<u8>> {
        BASE64
            .decode(strip_data_uri_prefix(self.data.trim()).as_bytes())
            .map_err(|err| anyhow::anyhow!("image payload is not valid base64: {err}"))
    }

    /// Hex SHA-256 of the decoded bytes, or of the encoded text when the
    /// payload does not decode.
    pub fn sha256(&self) -> String {
        let mut hasher = Sha256::new();
        match self.decode() {
            Ok(bytes) => hasher.update(bytes),
            Err(_) => hasher.update(self.data.as_bytes()),
        }
        hex::encode(hasher.finalize())
    }

    /// Decoded length computed from the base64 text without decoding it.
    pub fn byte_len(&self) -> usize {
        let trimmed = strip_data_uri_prefix(self.data.trim());
        let padding = trimmed.chars().rev().take_while(|ch| *ch == '=').count();
        (trimmed.len() / 4 * 3).saturating_sub(padding)
    }

    pub fn file_extension(&self) -> &'static str {
        extension_for_mime(&self.mime_type)
    }
}

/// Removes a leading `data:image/<word>;base64,` header, leaving the raw
/// encoded bytes. Payloads without that header are returned unchanged.
pub fn strip_data_uri_prefix(payload: &str) -> &str {
    match split_data_uri(payload) {
        Some((_, data)) => data,
        None => payload,
    }
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    let lowered = mime_type.trim().to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    "png"
}

fn split_data_uri(payload: &str) -> Option<(&str, &str)> {
    let rest = payload.strip_prefix("data:image/")?;
    let (kind, data) = rest.split_once(";base64,")?;
    if kind.is_empty()
        || !kind
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        return None;
    }
    Some((kind, data))
}
