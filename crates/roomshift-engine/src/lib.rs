use std::env;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Response as HttpResponse;
use serde_json::{Map, Value};

pub mod dryrun;
pub mod estimator;
pub mod gemini;
pub mod provider;
pub mod redesign;
pub mod session;

pub use dryrun::DryrunGenerator;
pub use estimator::{estimate_aspect_ratio, image_asset_from_upload, image_dimensions};
pub use gemini::{GeminiGenerator, GeminiTransport};
pub use provider::{
    default_generator_registry, GenerationRequest, ImageGenerator, ImageGeneratorRegistry, Part,
};
pub use redesign::{
    compose_instruction, request_redesign, RedesignOutput, DEFAULT_PROMPT, REFINE_PRESETS,
};
pub use session::{PendingRequest, RequestKind, RequestOutcome, Session, SessionStatus};

/// Wall-clock milliseconds since the Unix epoch.
pub fn timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| {
                reqwest_err.is_timeout() || reqwest_err.is_connect() || reqwest_err.is_request()
            })
            .unwrap_or(false)
    })
}

/// Flattens an error and its causes into one line for the event log.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
