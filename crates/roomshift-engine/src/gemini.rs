use std::env;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use roomshift_contracts::assets::{ImageAsset, DEFAULT_GENERATED_MIME_TYPE};
use serde_json::{json, Value};

use crate::provider::{GenerationRequest, ImageGenerator, Part};
use crate::{is_retryable_transport_error, non_empty_env, response_json_or_error};

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Timeout and retry policy for the `generateContent` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeminiTransport {
    pub request_timeout_s: f64,
    pub retries: usize,
    pub retry_backoff_s: f64,
}

impl Default for GeminiTransport {
    fn default() -> Self {
        Self {
            request_timeout_s: 90.0,
            retries: 2,
            retry_backoff_s: 1.2,
        }
    }
}

impl GeminiTransport {
    /// Reads `ROOMSHIFT_REQUEST_TIMEOUT`, `ROOMSHIFT_TRANSPORT_RETRIES` and
    /// `ROOMSHIFT_RETRY_BACKOFF` through `lookup`, clamping each value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            request_timeout_s: clamped_f64(
                lookup("ROOMSHIFT_REQUEST_TIMEOUT"),
                defaults.request_timeout_s,
                15.0,
                300.0,
            ),
            retries: clamped_f64(
                lookup("ROOMSHIFT_TRANSPORT_RETRIES"),
                defaults.retries as f64,
                0.0,
                4.0,
            )
            .round() as usize,
            retry_backoff_s: clamped_f64(
                lookup("ROOMSHIFT_RETRY_BACKOFF"),
                defaults.retry_backoff_s,
                0.1,
                10.0,
            ),
        }
    }
}

const API_KEY_VARS: &str = "GEMINI_API_KEY or GOOGLE_API_KEY";

pub struct GeminiGenerator {
    api_base: String,
    api_key: Option<String>,
    transport: GeminiTransport,
    http: HttpClient,
}

impl GeminiGenerator {
    pub fn from_env() -> Self {
        Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
            api_key: non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY")),
            transport: GeminiTransport::from_lookup(non_empty_env),
            http: HttpClient::new(),
        }
    }

    pub fn new(api_base: &str, api_key: Option<String>, transport: GeminiTransport) -> Self {
        Self {
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            api_key,
            transport,
            http: HttpClient::new(),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    /// The image goes first so it anchors the instruction that follows.
    fn build_payload(request: &GenerationRequest) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {
                        "inlineData": {
                            "mimeType": request.image.mime_type,
                            "data": request.image.data,
                        }
                    },
                    { "text": request.instruction },
                ],
            }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "imageConfig": {
                    "aspectRatio": request.aspect_ratio.label(),
                },
            },
        })
    }

    fn post_with_transport_retries(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<HttpResponse> {
        let max_retries = self.transport.retries;
        for attempt in 0..=max_retries {
            let response = self
                .http
                .post(endpoint)
                .query(&[("key", api_key)])
                .timeout(Duration::from_secs_f64(self.transport.request_timeout_s))
                .json(payload)
                .send();

            match response {
                Ok(ok) => return Ok(ok),
                Err(raw) => {
                    let err = anyhow::Error::new(raw)
                        .context(format!("Gemini request failed ({endpoint})"));
                    if !is_retryable_transport_error(&err) || attempt >= max_retries {
                        return Err(err);
                    }
                    let delay_s = self.transport.retry_backoff_s * (attempt as f64 + 1.0);
                    thread::sleep(Duration::from_secs_f64(delay_s));
                }
            }
        }

        bail!("Gemini request failed ({endpoint}): retries exhausted")
    }

    /// Reads the parts of the first candidate. A response without a
    /// `candidates` key (blocked prompt) yields no parts; any other shape
    /// that lacks `candidates[0].content.parts` is a protocol error. Inline
    /// parts with an empty payload are skipped.
    pub(crate) fn extract_parts(response_payload: &Value) -> Result<Vec<Part>> {
        let Some(root) = response_payload.as_object() else {
            bail!("Gemini response was not a JSON object");
        };
        let Some(candidates) = root.get("candidates") else {
            return Ok(Vec::new());
        };
        let Some(candidates) = candidates.as_array() else {
            bail!("Gemini response candidates was not an array");
        };
        let Some(first) = candidates.first() else {
            bail!("Gemini response contained no candidates");
        };
        let Some(parts) = first
            .get("content")
            .and_then(|content| content.get("parts"))
        else {
            let finish_reason = first
                .get("finishReason")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            bail!("Gemini candidate had no content parts (finishReason: {finish_reason})");
        };
        let Some(parts) = parts.as_array() else {
            bail!("Gemini candidate content parts was not an array");
        };

        let mut out = Vec::new();
        for part in parts {
            if let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            {
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let mime_type = inline
                    .get("mimeType")
                    .or_else(|| inline.get("mime_type"))
                    .and_then(Value::as_str)
                    .filter(|value| !value.is_empty())
                    .unwrap_or(DEFAULT_GENERATED_MIME_TYPE);
                out.push(Part::Image(ImageAsset::new(mime_type, data)));
            } else if let Some(text) = part.get("text").and_then(Value::as_str) {
                out.push(Part::Text(text.to_string()));
            }
        }
        Ok(out)
    }
}

impl ImageGenerator for GeminiGenerator {
    fn name(&self) -> &str {
        "gemini"
    }

    fn missing_credentials(&self) -> Option<&'static str> {
        self.api_key.is_none().then_some(API_KEY_VARS)
    }

    fn generate(&self, request: &GenerationRequest) -> Result<Vec<Part>> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("{API_KEY_VARS} not set");
        };
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_payload(request);
        let response = self.post_with_transport_retries(&endpoint, api_key, &payload)?;
        let response_payload = response_json_or_error("Gemini", response)?;
        Self::extract_parts(&response_payload).context("Gemini response could not be read")
    }
}

fn clamped_f64(raw: Option<String>, default: f64, min: f64, max: f64) -> f64 {
    raw.and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}
