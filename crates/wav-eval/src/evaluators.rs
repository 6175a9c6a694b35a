//! The two evaluators: agent-response equality and network-event matching.
//! Both produce exactly one EvaluatorResult; recoverable mismatches become
//! failure assertions, while configuration and I/O problems bubble up as
//! errors for the orchestrator to convert.

use crate::comparator::{CompareOptions, ValueComparator};
use crate::data_types::{canonicalize_url, Canonical, DataType, ParseError};
use crate::jsonpath::{extract_jsonpath_value, is_jsonpath_key};
use crate::schema::{normalize_tree, TreeSide};
use anyhow::{anyhow, Result};
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;
use wav_core::url::{extract_base64_query, normalize_query, QueryParams};
use wav_types::{
    AgentResponse, AgentResponseEvaluatorCfg, AssertionResult, EvaluatorResult, ExpectedEventType,
    NetworkEvent, NetworkEventEvaluatorCfg, NetworkEventType, NetworkTrace, ResponseStatus, Site,
    TaskType, UrlMatchMode, WavConfig,
};

pub const AGENT_RESPONSE_EVALUATOR: &str = "AgentResponseEvaluator";
pub const NETWORK_EVENT_EVALUATOR: &str = "NetworkEventEvaluator";

// ---------------------------------------------------------------------------
// AgentResponseEvaluator
// ---------------------------------------------------------------------------

pub fn evaluate_agent_response(
    cfg: &AgentResponseEvaluatorCfg,
    agent_response_raw: &Value,
) -> Result<EvaluatorResult> {
    let response = match agent_response_raw {
        Value::String(text) => AgentResponse::from_text(text)?,
        other => AgentResponse::from_value(other.clone())?,
    };

    let mut assertions: Vec<AssertionResult> = Vec::new();

    if !response.unknown_fields.is_empty() {
        assertions.push(AssertionResult::failure(
            "unexpected_fields",
            format!("unexpected top-level fields: {:?}", response.unknown_fields),
        ));
    }

    match response.task_type.as_deref() {
        None => assertions.push(AssertionResult::failure(
            "task_type_missing",
            "agent response has no task_type/action field",
        )),
        Some(raw_type) => match TaskType::parse(raw_type) {
            Err(err) => assertions.push(AssertionResult::failure(
                "task_type_mismatch",
                err.to_string(),
            )),
            Ok(task_type) if task_type != cfg.expected.task_type => {
                assertions.push(AssertionResult::failure(
                    "task_type_mismatch",
                    format!(
                        "expected task_type '{}', got '{}'",
                        cfg.expected.task_type.as_str(),
                        task_type.as_str()
                    ),
                ))
            }
            Ok(_) => {}
        },
    }

    match response.status.as_deref() {
        None => assertions.push(AssertionResult::failure(
            "status_missing",
            "agent response has no status field",
        )),
        Some(raw_status) => match ResponseStatus::parse(raw_status) {
            Err(err) => {
                assertions.push(AssertionResult::failure("status_mismatch", err.to_string()))
            }
            Ok(status) if status != cfg.expected.status => {
                assertions.push(AssertionResult::failure(
                    "status_mismatch",
                    format!(
                        "expected status '{}', got '{}'",
                        cfg.expected.status.as_str(),
                        status.as_str()
                    ),
                ))
            }
            Ok(_) => {}
        },
    }

    let actual_data = response.retrieved_data.clone().unwrap_or(Value::Null);
    let mut actual_normalized = Value::Null;
    let mut expected_normalized = cfg.expected.retrieved_data.clone();

    if cfg.expected.retrieved_data.is_null() {
        // Null expectation accepts a missing field, an explicit null, or an
        // empty list. Used both by navigate/mutate tasks and by retrieve
        // tasks whose expected outcome is an error status.
        let empty = actual_data.is_null()
            || actual_data
                .as_array()
                .map(|items| items.is_empty())
                .unwrap_or(false);
        if !empty {
            assertions.push(AssertionResult::failure(
                "retrieved_data_mismatch",
                format!("expected no retrieved data, got {}", actual_data),
            ));
        }
    } else if cfg.expected.task_type == TaskType::Retrieve {
        let expected_tree = normalize_tree(
            cfg.results_schema.as_ref(),
            &cfg.expected.retrieved_data,
            TreeSide::Expected,
        )
        .map_err(|e| anyhow!("invalid expected retrieved_data in task config: {}", e))?;
        expected_normalized = expected_tree.to_value();

        if actual_data.is_null() {
            assertions.push(AssertionResult::failure(
                "retrieved_data_missing",
                "expected retrieved data, got none",
            ));
        } else {
            // A bare scalar stands in for a single-item list.
            let effective = if cfg.expected.retrieved_data.is_array() && !actual_data.is_array() {
                json!([actual_data])
            } else {
                actual_data
            };
            match normalize_tree(cfg.results_schema.as_ref(), &effective, TreeSide::Actual) {
                Ok(actual_tree) => {
                    actual_normalized = actual_tree.to_value();
                    let options = CompareOptions {
                        ordered: cfg.ordered,
                        ..CompareOptions::default()
                    };
                    assertions.extend(ValueComparator::compare(
                        &actual_tree,
                        &expected_tree,
                        &options,
                    ));
                }
                // Unknown type identifiers are configuration errors; a value
                // that fails to parse is a per-field scoring failure.
                Err(err @ ParseError::UnknownType(_)) => {
                    return Err(anyhow!("invalid results_schema: {}", err))
                }
                Err(err) => assertions.push(AssertionResult::failure(
                    "retrieved_data_normalization",
                    err.to_string(),
                )),
            }
        }
    } else {
        return Err(anyhow!(
            "expected retrieved_data must be null for {} tasks",
            cfg.expected.task_type.as_str()
        ));
    }

    Ok(EvaluatorResult::from_assertions(
        AGENT_RESPONSE_EVALUATOR,
        response.raw,
        actual_normalized,
        json!({
            "task_type": cfg.expected.task_type.as_str(),
            "status": cfg.expected.status.as_str(),
            "retrieved_data": expected_normalized,
        }),
        assertions,
    ))
}

// ---------------------------------------------------------------------------
// NetworkEventEvaluator
// ---------------------------------------------------------------------------

struct ExpectedUrl {
    rendered: String,
    base_url: String,
    query_params: QueryParams,
    regex: Option<Regex>,
}

fn canonical_url_parts(url: &str) -> (String, QueryParams) {
    match canonicalize_url(url) {
        Canonical::Url {
            base_url,
            query_params,
        } => (base_url, query_params),
        _ => (url.to_string(), QueryParams::new()),
    }
}

fn is_pattern(url: &str) -> bool {
    url.len() >= 2 && url.starts_with('^') && url.ends_with('$')
}

fn render_template(template: &str, sites: &[Site], config: &WavConfig) -> Result<String> {
    if template.contains("__") {
        config.render_url(template, sites, false, None)
    } else {
        Ok(template.to_string())
    }
}

fn expected_urls(
    cfg: &NetworkEventEvaluatorCfg,
    sites: &[Site],
    config: &WavConfig,
) -> Result<Vec<ExpectedUrl>> {
    let templates: Vec<String> = match &cfg.expected.url {
        None => Vec::new(),
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("expected.url alternatives must be strings"))
            })
            .collect::<Result<Vec<_>>>()?,
        Some(other) => {
            return Err(anyhow!(
                "expected.url must be a string or list of strings, got {}",
                other
            ))
        }
    };

    let mut urls = Vec::with_capacity(templates.len());
    for template in templates {
        let rendered = render_template(&template, sites, config)?;
        let regex = if cfg.url_match_mode == UrlMatchMode::Regex || is_pattern(&rendered) {
            let pattern = if is_pattern(&rendered) {
                rendered.clone()
            } else {
                format!("^{}$", regex::escape(&rendered))
            };
            Some(
                Regex::new(&pattern)
                    .map_err(|e| anyhow!("invalid expected.url pattern '{}': {}", rendered, e))?,
            )
        } else {
            None
        };
        let (base_url, query_params) = canonical_url_parts(&rendered);
        urls.push(ExpectedUrl {
            rendered,
            base_url,
            query_params,
            regex,
        });
    }
    Ok(urls)
}

struct ParamFilter {
    keys: Vec<String>,
    patterns: Vec<Regex>,
}

impl ParamFilter {
    fn new(cfg: &NetworkEventEvaluatorCfg) -> Result<Self> {
        let patterns = cfg
            .ignored_query_params_patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| anyhow!("invalid ignored_query_params_patterns '{}': {}", p, e))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            keys: cfg.ignored_query_params.clone(),
            patterns,
        })
    }

    fn strip(&self, params: &QueryParams) -> QueryParams {
        params
            .iter()
            .filter(|(key, _)| {
                !self.keys.contains(key) && !self.patterns.iter().any(|p| p.is_match(key))
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Canonical (base_url, params) of an event, with base64-encoded path
/// segments folded into the parameters when enabled.
fn actual_url_parts(event: &NetworkEvent, decode_base64: bool) -> (String, QueryParams) {
    let (mut base_url, mut params) = canonical_url_parts(&event.url);
    if decode_base64 {
        let (prefix, path) = match base_url.find("://").and_then(|idx| {
            base_url[idx + 3..]
                .find('/')
                .map(|slash| base_url.split_at(idx + 3 + slash))
        }) {
            Some((prefix, path)) => (prefix.to_string(), path.to_string()),
            None => (String::new(), base_url.clone()),
        };
        let (cleaned, decoded) = extract_base64_query(&path);
        if !decoded.is_empty() {
            base_url = format!("{}{}", prefix, cleaned);
            for query in decoded {
                for (key, values) in normalize_query(&query) {
                    let entry = params.entry(key).or_default();
                    entry.extend(values);
                    entry.sort();
                }
            }
        }
    }
    (base_url, params)
}

fn event_type_matches(expected: ExpectedEventType, actual: NetworkEventType) -> bool {
    matches!(
        (expected, actual),
        (ExpectedEventType::Navigation, NetworkEventType::Navigation)
            | (ExpectedEventType::Modification, NetworkEventType::Mutation)
            | (ExpectedEventType::Other, NetworkEventType::Other)
    )
}

fn url_matches(
    cfg: &NetworkEventEvaluatorCfg,
    expected: &[ExpectedUrl],
    actual_base: &str,
    actual_full: &str,
) -> bool {
    if expected.is_empty() {
        return true;
    }
    expected.iter().any(|url| {
        if let Some(regex) = &url.regex {
            return regex.is_match(actual_full) || regex.is_match(actual_base);
        }
        match cfg.url_match_mode {
            UrlMatchMode::Exact => actual_base == url.base_url,
            UrlMatchMode::Prefix => actual_base.starts_with(&url.base_url),
            UrlMatchMode::Regex => false,
        }
    })
}

fn schema_entry_type(schema: Option<&Value>, key: &str) -> Result<Option<DataType>> {
    let Some(schema) = schema else { return Ok(None) };
    let node = schema
        .get("properties")
        .and_then(|p| p.get(key))
        .or_else(|| schema.get(key));
    match node {
        None => Ok(None),
        Some(Value::String(type_id)) => Ok(Some(
            DataType::parse_id(type_id).map_err(|e| anyhow!("invalid schema entry: {}", e))?,
        )),
        Some(node) => {
            if let Some(format) = node.get("format").and_then(Value::as_str) {
                return Ok(Some(DataType::parse_id(format).map_err(|e| {
                    anyhow!("invalid schema entry: {}", e)
                })?));
            }
            match node.get("type").and_then(Value::as_str) {
                Some("string") => Ok(Some(DataType::String)),
                Some("number") | Some("integer") => Ok(Some(DataType::Number)),
                Some("boolean") => Ok(Some(DataType::Boolean)),
                _ => Ok(None),
            }
        }
    }
}

fn typed_value_matches(
    data_type: DataType,
    actual: &Value,
    expected: &Value,
) -> Result<bool, ParseError> {
    let actual = data_type.normalize(actual)?;
    let expected = data_type.normalize(expected)?;
    Ok(actual.matches(&expected, None))
}

/// Compare one query-parameter value list against its expectation. Expected
/// lists compare as sets (values are kept sorted); scalars expect exactly one
/// actual value.
fn query_value_matches(
    data_type: Option<DataType>,
    actual: &[String],
    expected: &Value,
) -> Result<bool> {
    match expected {
        Value::Array(items) => {
            if items.len() != actual.len() {
                return Ok(false);
            }
            let mut expected_sorted: Vec<String> = items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            expected_sorted.sort();
            for (actual_value, expected_value) in actual.iter().zip(expected_sorted.iter()) {
                let data_type = data_type.unwrap_or(DataType::String);
                if !typed_value_matches(
                    data_type,
                    &json!(actual_value),
                    &json!(expected_value),
                )? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        scalar => {
            if actual.len() != 1 {
                return Ok(false);
            }
            match data_type {
                Some(data_type) => {
                    Ok(typed_value_matches(data_type, &json!(actual[0]), scalar)?)
                }
                None => {
                    let expected_text = match scalar {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    Ok(actual[0] == expected_text)
                }
            }
        }
    }
}

fn check_query_params(
    cfg: &NetworkEventEvaluatorCfg,
    expected_url: Option<&ExpectedUrl>,
    actual_params: &QueryParams,
    filter: &ParamFilter,
    problems: &mut Vec<String>,
) -> Result<()> {
    // Baseline comes from the expected URL's own query string (exact mode);
    // the query_params block overlays it.
    let mut expected: QueryParams = QueryParams::new();
    let mut enforce = false;
    if cfg.url_match_mode == UrlMatchMode::Exact {
        if let Some(url) = expected_url {
            expected = url.query_params.clone();
            enforce = true;
        }
    }
    let mut overlay: Vec<(String, Value)> = Vec::new();
    if let Some(block) = &cfg.expected.query_params {
        let map = block
            .as_object()
            .ok_or_else(|| anyhow!("expected.query_params must be an object"))?;
        for (key, value) in map {
            overlay.push((key.clone(), value.clone()));
        }
        enforce = true;
    }
    if !enforce {
        return Ok(());
    }

    let actual = filter.strip(actual_params);
    let expected = filter.strip(&expected);

    let mut expected_keys: Vec<&String> = expected.keys().collect();
    let overlay_keys: Vec<&String> = overlay.iter().map(|(k, _)| k).collect();
    expected_keys.extend(overlay_keys.iter().copied());
    expected_keys.sort();
    expected_keys.dedup();

    let mut actual_keys: Vec<&String> = actual.keys().collect();
    actual_keys.sort();
    if actual_keys != expected_keys {
        problems.push(format!(
            "query parameter keys differ: expected {:?}, got {:?}",
            expected_keys, actual_keys
        ));
        return Ok(());
    }

    for (key, expected_value) in &overlay {
        let data_type = schema_entry_type(cfg.query_params_schema.as_ref(), key)?;
        let actual_values = actual.get(key).cloned().unwrap_or_default();
        match query_value_matches(data_type, &actual_values, expected_value) {
            Ok(true) => {}
            Ok(false) => problems.push(format!(
                "query parameter '{}' mismatch: expected {}, got {:?}",
                key, expected_value, actual_values
            )),
            Err(err) => problems.push(format!(
                "query parameter '{}' normalization failed: {}",
                key, err
            )),
        }
    }
    for (key, expected_values) in &expected {
        if overlay.iter().any(|(k, _)| k == key) {
            continue;
        }
        let actual_values = actual.get(key).cloned().unwrap_or_default();
        if &actual_values != expected_values {
            problems.push(format!(
                "query parameter '{}' mismatch: expected {:?}, got {:?}",
                key, expected_values, actual_values
            ));
        }
    }
    Ok(())
}

enum ActualBody {
    Json(Value),
    Form(QueryParams),
}

fn parse_post_data(raw: &str) -> ActualBody {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => ActualBody::Json(value),
        Err(_) => ActualBody::Form(normalize_query(raw)),
    }
}

fn body_lookup(body: &ActualBody, key: &str) -> Option<Value> {
    match body {
        ActualBody::Json(value) => {
            if key.starts_with('$') {
                return extract_jsonpath_value(value, key);
            }
            if is_jsonpath_key(key) {
                // Regex key: first field whose name matches.
                let re = Regex::new(key).ok()?;
                return value
                    .as_object()?
                    .iter()
                    .find(|(name, _)| re.is_match(name))
                    .map(|(_, v)| v.clone());
            }
            value.get(key).cloned()
        }
        ActualBody::Form(params) => {
            let values = if is_jsonpath_key(key) && !key.starts_with('$') {
                let re = Regex::new(key).ok()?;
                params.iter().find(|(name, _)| re.is_match(name)).map(|(_, v)| v)
            } else {
                params.get(key)
            }?;
            match values.len() {
                1 => Some(json!(values[0])),
                _ => Some(json!(values)),
            }
        }
    }
}

/// Post-data expectations match as a subset: request bodies carry CSRF
/// tokens and framework noise that no expectation should have to enumerate.
fn check_post_data(
    cfg: &NetworkEventEvaluatorCfg,
    event: &NetworkEvent,
    problems: &mut Vec<String>,
) -> Result<()> {
    let Some(expected_block) = &cfg.expected.post_data else {
        return Ok(());
    };
    let expected_map = expected_block
        .as_object()
        .ok_or_else(|| anyhow!("expected.post_data must be an object"))?;

    let Some(raw_body) = &event.post_data else {
        problems.push("expected post data, request has none".to_string());
        return Ok(());
    };
    let body = parse_post_data(raw_body);

    for (key, expected_value) in expected_map {
        let Some(actual_value) = body_lookup(&body, key) else {
            problems.push(format!("post data field '{}' not found", key));
            continue;
        };
        let schema_node = cfg
            .post_data_schema
            .as_ref()
            .and_then(|s| s.get("properties").and_then(|p| p.get(key)).or_else(|| s.get(key)));
        let expected_tree = normalize_tree(schema_node, expected_value, TreeSide::Expected)
            .map_err(|e| anyhow!("invalid expected.post_data for '{}': {}", key, e))?;
        match normalize_tree(schema_node, &actual_value, TreeSide::Actual) {
            Ok(actual_tree) => {
                let mismatches = ValueComparator::compare(
                    &actual_tree,
                    &expected_tree,
                    &CompareOptions::default(),
                );
                if !mismatches.is_empty() {
                    problems.push(format!(
                        "post data field '{}' mismatch: expected {}, got {}",
                        key, expected_value, actual_value
                    ));
                }
            }
            Err(err) => problems.push(format!(
                "post data field '{}' normalization failed: {}",
                key, err
            )),
        }
    }
    Ok(())
}

fn check_headers(
    cfg: &NetworkEventEvaluatorCfg,
    event: &NetworkEvent,
    sites: &[Site],
    config: &WavConfig,
    problems: &mut Vec<String>,
) -> Result<()> {
    let Some(expected_headers) = &cfg.expected.headers else {
        return Ok(());
    };
    for (name, expected_value) in expected_headers {
        let expected_value = expected_value
            .as_str()
            .ok_or_else(|| anyhow!("expected header '{}' must be a string", name))?;
        let expected_value = render_template(expected_value, sites, config)?;
        match event.headers.get(&name.to_ascii_lowercase()) {
            None => problems.push(format!("header '{}' not present", name)),
            Some(actual_value) => {
                // Site-relative header expectations ("/dashboard/") accept a
                // suffix match against the absolute recorded value.
                let matched = actual_value == &expected_value
                    || (expected_value.starts_with('/') && actual_value.ends_with(&expected_value));
                if !matched {
                    problems.push(format!(
                        "header '{}' mismatch: expected '{}', got '{}'",
                        name, expected_value, actual_value
                    ));
                }
            }
        }
    }
    Ok(())
}

pub fn evaluate_network_event(
    cfg: &NetworkEventEvaluatorCfg,
    trace: &NetworkTrace,
    sites: &[Site],
    config: &WavConfig,
) -> Result<EvaluatorResult> {
    let expected = expected_urls(cfg, sites, config)?;
    let filter = ParamFilter::new(cfg)?;

    let candidates: Vec<&NetworkEvent> = trace
        .evaluation_events()
        .into_iter()
        .filter(|event| {
            if !event
                .http_method
                .eq_ignore_ascii_case(&cfg.expected.http_method)
            {
                return false;
            }
            if let Some(expected_type) = cfg.expected.event_type {
                if !event_type_matches(expected_type, event.event_type) {
                    return false;
                }
            }
            let (actual_base, _) = actual_url_parts(event, cfg.decode_base64_query);
            url_matches(cfg, &expected, &actual_base, &event.url)
        })
        .collect();

    let checked: Vec<&NetworkEvent> = if cfg.last_event_only {
        candidates.last().copied().into_iter().collect()
    } else {
        candidates
    };
    debug!(
        candidates = checked.len(),
        last_event_only = cfg.last_event_only,
        "network event candidates selected"
    );

    let mut last_problems: Vec<String> = Vec::new();
    let mut last_checked: Option<&NetworkEvent> = None;
    for event in &checked {
        let mut problems = Vec::new();
        if event.request_status != cfg.expected.response_status {
            problems.push(format!(
                "response status mismatch: expected {}, got {}",
                cfg.expected.response_status, event.request_status
            ));
        }
        check_headers(cfg, event, sites, config, &mut problems)?;

        let (actual_base, actual_params) = actual_url_parts(event, cfg.decode_base64_query);
        // Regex-shaped expectations carry no usable query baseline.
        let matched_url = expected
            .iter()
            .filter(|url| url.regex.is_none())
            .find(|url| actual_base == url.base_url || actual_base.starts_with(&url.base_url));
        check_query_params(cfg, matched_url, &actual_params, &filter, &mut problems)?;
        check_post_data(cfg, event, &mut problems)?;

        if problems.is_empty() {
            return Ok(EvaluatorResult::from_assertions(
                NETWORK_EVENT_EVALUATOR,
                serde_json::to_value(event)?,
                json!({"base_url": actual_base, "query_params": actual_params}),
                serde_json::to_value(&cfg.expected)?,
                Vec::new(),
            ));
        }
        last_problems = problems;
        last_checked = Some(event);
    }

    let expected_urls_text: Vec<&str> = expected.iter().map(|u| u.rendered.as_str()).collect();
    let mut messages = vec![format!(
        "No network events matched criteria: url={:?}, method={}, status={}",
        expected_urls_text, cfg.expected.http_method, cfg.expected.response_status
    )];
    messages.extend(last_problems);

    let mut assertion = AssertionResult::failure("network_event_match", messages.remove(0));
    assertion.assertion_msgs.extend(messages);

    Ok(EvaluatorResult::from_assertions(
        NETWORK_EVENT_EVALUATOR,
        last_checked
            .map(serde_json::to_value)
            .transpose()?
            .unwrap_or(Value::Null),
        Value::Null,
        serde_json::to_value(&cfg.expected)?,
        vec![assertion],
    ))
}
