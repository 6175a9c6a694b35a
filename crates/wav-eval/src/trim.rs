//! HAR trimming: drop static-asset entries and redact credential-bearing
//! headers before a trace is archived or shared. The document structure is
//! preserved so trimmed files remain valid evaluation inputs.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::info;
use wav_core::ensure_dir;
use wav_types::trace::is_static_asset_url;

const REDACTED: &str = "[REDACTED]";
const SENSITIVE_NAME_PARTS: &[&str] = &["auth", "token", "key", "secret"];
// Cookies are session state the benchmark environments rely on; they stay.
const PRESERVED_HEADERS: &[&str] = &["cookie", "set-cookie"];

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TrimStats {
    pub original_entries: usize,
    pub trimmed_entries: usize,
    pub removed_entries: usize,
    pub original_size: usize,
    pub trimmed_size: usize,
    pub reduction_percent: u32,
    pub request_headers_sanitized: usize,
    pub response_headers_sanitized: usize,
}

fn is_sensitive_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    if PRESERVED_HEADERS.contains(&lower.as_str()) {
        return false;
    }
    SENSITIVE_NAME_PARTS.iter().any(|part| lower.contains(part))
}

fn sanitize_headers(headers: Option<&mut Value>) -> usize {
    let Some(Value::Array(entries)) = headers else {
        return 0;
    };
    let mut sanitized = 0;
    for entry in entries {
        let Some(name) = entry.get("name").and_then(Value::as_str) else {
            continue;
        };
        if is_sensitive_header(name) {
            entry["value"] = Value::String(REDACTED.to_string());
            sanitized += 1;
        }
    }
    sanitized
}

/// Trim a HAR file: remove static-asset entries, redact sensitive headers,
/// write the result to `output_path`, and report what changed.
pub fn trim_har_file(input_path: &Path, output_path: &Path) -> Result<TrimStats> {
    let raw = fs::read_to_string(input_path)
        .with_context(|| format!("failed reading HAR file {}", input_path.display()))?;
    let original_size = raw.len();
    let mut document: Value = serde_json::from_str(&raw)
        .with_context(|| format!("invalid JSON in {}", input_path.display()))?;

    let log = document
        .get_mut("log")
        .ok_or_else(|| anyhow!("invalid HAR: missing 'log' field"))?;
    let entries = log
        .get_mut("entries")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| anyhow!("invalid HAR: missing 'log.entries' field"))?;

    let original_entries = entries.len();
    entries.retain(|entry| {
        entry
            .get("request")
            .and_then(|request| request.get("url"))
            .and_then(Value::as_str)
            .map(|url| !is_static_asset_url(url))
            .unwrap_or(true)
    });
    let trimmed_entries = entries.len();

    let mut request_headers_sanitized = 0;
    let mut response_headers_sanitized = 0;
    for entry in entries.iter_mut() {
        request_headers_sanitized += sanitize_headers(
            entry
                .get_mut("request")
                .and_then(|request| request.get_mut("headers")),
        );
        response_headers_sanitized += sanitize_headers(
            entry
                .get_mut("response")
                .and_then(|response| response.get_mut("headers")),
        );
    }

    if let Some(parent) = output_path.parent() {
        ensure_dir(parent)?;
    }
    let output = serde_json::to_string_pretty(&document)?;
    let trimmed_size = output.len();
    fs::write(output_path, &output)
        .with_context(|| format!("failed writing trimmed HAR {}", output_path.display()))?;

    let stats = TrimStats {
        original_entries,
        trimmed_entries,
        removed_entries: original_entries - trimmed_entries,
        original_size,
        trimmed_size,
        reduction_percent: if original_size > 0 {
            (100 * original_size.saturating_sub(trimmed_size) / original_size) as u32
        } else {
            0
        },
        request_headers_sanitized,
        response_headers_sanitized,
    };
    info!(
        removed = stats.removed_entries,
        sanitized = stats.request_headers_sanitized + stats.response_headers_sanitized,
        "trimmed network log"
    );
    Ok(stats)
}
