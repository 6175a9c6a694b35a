use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;
use wav_core::url::{normalize_query, QueryParams};

/// Suffixes treated as static assets and excluded from evaluation events.
pub const STATIC_ASSET_SUFFIXES: &[&str] = &[
    ".css", ".js", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".woff", ".woff2", ".ttf", ".ico",
];

const MUTATION_METHODS: &[&str] = &["POST", "PUT", "PATCH", "DELETE"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkEventType {
    Navigation,
    Mutation,
    Other,
}

/// One captured HTTP exchange, derived once from the raw trace document.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkEvent {
    pub url: String,
    pub referer: Option<String>,
    pub http_method: String,
    pub request_status: u16,
    /// Request headers with lowercased names.
    pub headers: BTreeMap<String, String>,
    /// Response headers with lowercased names.
    pub response_headers: BTreeMap<String, String>,
    pub query_params: QueryParams,
    pub post_data: Option<String>,
    pub event_type: NetworkEventType,
    pub is_document_event: bool,
}

impl NetworkEvent {
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.request_status)
    }

    pub fn redirect_url(&self) -> Option<&str> {
        if self.is_redirect() {
            self.response_headers.get("location").map(String::as_str)
        } else {
            None
        }
    }

    pub fn is_request_success(&self) -> bool {
        self.request_status < 400
    }

    /// Events worth evaluating: everything that is not a static asset fetch.
    pub fn is_evaluation_event(&self) -> bool {
        !is_static_asset_url(&self.url)
    }

    pub fn base_url(&self) -> &str {
        self.url
            .split_once(['?', '#'])
            .map(|(base, _)| base)
            .unwrap_or(&self.url)
    }
}

pub fn is_static_asset_url(url: &str) -> bool {
    let path = url
        .split_once(['?', '#'])
        .map(|(base, _)| base)
        .unwrap_or(url)
        .to_ascii_lowercase();
    STATIC_ASSET_SUFFIXES
        .iter()
        .any(|suffix| path.ends_with(suffix))
}

fn header_map(raw: &Value) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    match raw {
        // HAR style: [{"name": ..., "value": ...}]
        Value::Array(entries) => {
            for entry in entries {
                if let (Some(name), Some(value)) = (
                    entry.get("name").and_then(Value::as_str),
                    entry.get("value").and_then(Value::as_str),
                ) {
                    headers.insert(name.to_ascii_lowercase(), value.to_string());
                }
            }
        }
        // Playwright snapshot style: {"Name": "value"}
        Value::Object(map) => {
            for (name, value) in map {
                if let Some(value) = value.as_str() {
                    headers.insert(name.to_ascii_lowercase(), value.to_string());
                }
            }
        }
        _ => {}
    }
    headers
}

fn classify(
    method: &str,
    is_document_event: bool,
    status: u16,
    response_headers: &BTreeMap<String, String>,
) -> NetworkEventType {
    if MUTATION_METHODS.contains(&method) {
        return NetworkEventType::Mutation;
    }
    if is_document_event {
        return NetworkEventType::Navigation;
    }
    let html_response = response_headers
        .get("content-type")
        .map(|ct| ct.contains("text/html"))
        .unwrap_or(false);
    if method == "GET" && (html_response || (300..400).contains(&status)) {
        return NetworkEventType::Navigation;
    }
    NetworkEventType::Other
}

fn event_from_request_response(request: &Value, response: &Value) -> Result<NetworkEvent> {
    let url = request
        .get("url")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("network entry missing request.url"))?
        .to_string();
    let method = request
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or("GET")
        .to_ascii_uppercase();
    let status = response
        .get("status")
        .and_then(Value::as_u64)
        .unwrap_or(0) as u16;

    let headers = header_map(request.get("headers").unwrap_or(&Value::Null));
    let response_headers = header_map(response.get("headers").unwrap_or(&Value::Null));
    let referer = headers.get("referer").cloned();

    let query = url.split_once('?').map(|(_, q)| q).unwrap_or("");
    let query = query.split_once('#').map(|(q, _)| q).unwrap_or(query);
    let query_params = normalize_query(query);

    let post_data = request
        .get("postData")
        .and_then(|pd| match pd {
            Value::String(text) => Some(text.clone()),
            Value::Object(obj) => obj
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .or_else(|| {
            request
                .get("post_data")
                .and_then(Value::as_str)
                .map(str::to_string)
        });

    let is_document_event = headers
        .get("sec-fetch-dest")
        .map(|v| v.eq_ignore_ascii_case("document"))
        .unwrap_or(false)
        || headers
            .get("sec-fetch-mode")
            .map(|v| v.eq_ignore_ascii_case("navigate"))
            .unwrap_or(false);

    let event_type = classify(&method, is_document_event, status, &response_headers);

    Ok(NetworkEvent {
        url,
        referer,
        http_method: method,
        request_status: status,
        headers,
        response_headers,
        query_params,
        post_data,
        event_type,
        is_document_event,
    })
}

/// Ordered sequence of network events in capture order. Built once per
/// evaluation, never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkTrace {
    events: Vec<NetworkEvent>,
}

impl NetworkTrace {
    pub fn from_events(events: Vec<NetworkEvent>) -> Self {
        Self { events }
    }

    /// Parse a HAR document (`log.entries[]` with request/response pairs).
    pub fn from_har_value(document: &Value) -> Result<Self> {
        let log = document
            .get("log")
            .ok_or_else(|| anyhow!("invalid HAR: missing 'log' field"))?;
        let entries = log
            .get("entries")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow!("invalid HAR: missing 'log.entries' field"))?;
        let mut events = Vec::with_capacity(entries.len());
        for entry in entries {
            let request = entry
                .get("request")
                .ok_or_else(|| anyhow!("invalid HAR entry: missing request"))?;
            let response = entry
                .get("response")
                .ok_or_else(|| anyhow!("invalid HAR entry: missing response"))?;
            events.push(event_from_request_response(request, response)?);
        }
        Ok(Self { events })
    }

    /// Parse an in-memory Playwright-style event list
    /// (`{"type": "resource-snapshot", "snapshot": {request, response}}`).
    pub fn from_playwright_events(entries: &[Value]) -> Result<Self> {
        let mut events = Vec::new();
        for entry in entries {
            if entry.get("type").and_then(Value::as_str) != Some("resource-snapshot") {
                continue;
            }
            let snapshot = entry
                .get("snapshot")
                .ok_or_else(|| anyhow!("resource-snapshot entry missing snapshot"))?;
            let request = snapshot
                .get("request")
                .ok_or_else(|| anyhow!("resource-snapshot missing snapshot.request"))?;
            let response = snapshot
                .get("response")
                .ok_or_else(|| anyhow!("resource-snapshot missing snapshot.response"))?;
            events.push(event_from_request_response(request, response)?);
        }
        Ok(Self { events })
    }

    /// Parse from an already-loaded document: a HAR object or a Playwright
    /// event array.
    pub fn from_content(document: &Value) -> Result<Self> {
        match document {
            Value::Object(_) if document.get("log").is_some() => Self::from_har_value(document),
            Value::Array(entries) => Self::from_playwright_events(entries),
            _ => Err(anyhow!(
                "unrecognized network trace document: expected a HAR object or an event array"
            )),
        }
    }

    /// Load from disk. Accepts a HAR/JSON document or NDJSON Playwright
    /// `.network` lines.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading network trace {}", path.display()))?;
        let trimmed = raw.trim_start();
        if trimmed.is_empty() {
            return Err(anyhow!("network trace {} is empty", path.display()));
        }
        if let Ok(document) = serde_json::from_str::<Value>(&raw) {
            let trace = Self::from_content(&document)
                .with_context(|| format!("invalid network trace {}", path.display()))?;
            debug!(events = trace.events.len(), path = %path.display(), "loaded network trace");
            return Ok(trace);
        }
        // NDJSON fallback: one Playwright event per line.
        let mut entries = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: Value = serde_json::from_str(line).with_context(|| {
                format!("invalid network trace {}: bad JSON on line {}", path.display(), idx + 1)
            })?;
            entries.push(entry);
        }
        Self::from_playwright_events(&entries)
    }

    pub fn events(&self) -> &[NetworkEvent] {
        &self.events
    }

    pub fn evaluation_events(&self) -> Vec<&NetworkEvent> {
        self.events
            .iter()
            .filter(|e| e.is_evaluation_event())
            .collect()
    }

    pub fn navigation_events(&self) -> Vec<&NetworkEvent> {
        self.events
            .iter()
            .filter(|e| e.is_evaluation_event() && e.event_type == NetworkEventType::Navigation)
            .collect()
    }
}
