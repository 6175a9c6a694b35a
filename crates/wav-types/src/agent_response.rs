use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed enumeration of agent operation kinds. Both casings occur in the
/// wild (`retrieve` in the dataset, `RETRIEVE` from agents), so parsing is
/// case-insensitive; serialization uses the dataset's lowercase spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Retrieve,
    Mutate,
    Navigate,
}

impl<'de> Deserialize<'de> for TaskType {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Retrieve => "retrieve",
            Self::Mutate => "mutate",
            Self::Navigate => "navigate",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "retrieve" => Ok(Self::Retrieve),
            "mutate" => Ok(Self::Mutate),
            "navigate" => Ok(Self::Navigate),
            _ => Err(anyhow!(
                "Invalid task type: '{}'. Valid task types: retrieve, mutate, navigate",
                raw
            )),
        }
    }
}

/// Closed enumeration of agent completion statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "NOT_FOUND_ERROR")]
    NotFoundError,
    #[serde(rename = "ACTION_NOT_ALLOWED_ERROR")]
    ActionNotAllowedError,
    #[serde(rename = "PERMISSION_DENIED_ERROR")]
    PermissionDeniedError,
    #[serde(rename = "DATA_VALIDATION_ERROR")]
    DataValidationError,
    #[serde(rename = "UNKNOWN_ERROR")]
    UnknownError,
}

impl ResponseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::NotFoundError => "NOT_FOUND_ERROR",
            Self::ActionNotAllowedError => "ACTION_NOT_ALLOWED_ERROR",
            Self::PermissionDeniedError => "PERMISSION_DENIED_ERROR",
            Self::DataValidationError => "DATA_VALIDATION_ERROR",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim() {
            "SUCCESS" => Ok(Self::Success),
            "NOT_FOUND_ERROR" => Ok(Self::NotFoundError),
            "ACTION_NOT_ALLOWED_ERROR" => Ok(Self::ActionNotAllowedError),
            "PERMISSION_DENIED_ERROR" => Ok(Self::PermissionDeniedError),
            "DATA_VALIDATION_ERROR" => Ok(Self::DataValidationError),
            "UNKNOWN_ERROR" => Ok(Self::UnknownError),
            _ => Err(anyhow!("Invalid status: '{}'", raw)),
        }
    }

    pub fn is_error(self) -> bool {
        !matches!(self, Self::Success)
    }
}

const TASK_TYPE_FIELDS: &[&str] = &["task_type", "action", "performed_operation"];
const RETRIEVED_DATA_FIELDS: &[&str] = &["retrieved_data", "results"];
const KNOWN_FIELDS: &[&str] = &[
    "task_type",
    "action",
    "performed_operation",
    "status",
    "retrieved_data",
    "results",
    "error_details",
];

/// The agent's final response, as loosely parsed from disk. Field values are
/// kept raw; the AgentResponseEvaluator decides whether they are acceptable
/// so that a bad value is a scoring failure instead of a read error.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    pub task_type: Option<String>,
    pub status: Option<String>,
    /// None when the field is absent entirely, Some(Null) when explicit null.
    pub retrieved_data: Option<Value>,
    pub error_details: Option<Value>,
    /// Top-level keys outside the known interchange fields.
    pub unknown_fields: Vec<String>,
    /// The document as parsed, for result reporting.
    pub raw: Value,
}

/// Strip a single surrounding Markdown code fence (``` or ```json) if the
/// whole payload is wrapped in one. Agents routinely emit fenced JSON.
pub fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence line.
    match inner.split_once('\n') {
        Some((first_line, body)) if first_line.trim().chars().all(char::is_alphanumeric) => {
            body.trim()
        }
        _ => inner.trim(),
    }
}

impl AgentResponse {
    /// Parse from raw text (JSON, optionally fenced). A document that is not
    /// JSON at all is an error; a JSON document with the wrong shape parses
    /// with the problems left for the evaluator to report.
    pub fn from_text(raw_text: &str) -> Result<Self> {
        let cleaned = strip_markdown_fences(raw_text);
        let value: Value = serde_json::from_str(cleaned)
            .map_err(|e| anyhow!("agent response is not valid JSON: {}", e))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| anyhow!("agent response must be a JSON object"))?
            .clone();

        let task_type = TASK_TYPE_FIELDS
            .iter()
            .find_map(|field| obj.get(*field))
            .and_then(Value::as_str)
            .map(str::to_string);
        let status = obj
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_string);
        let retrieved_data = RETRIEVED_DATA_FIELDS
            .iter()
            .find_map(|field| obj.get(*field))
            .cloned();
        let error_details = obj.get("error_details").cloned();
        let mut unknown_fields: Vec<String> = obj
            .keys()
            .filter(|key| !KNOWN_FIELDS.contains(&key.as_str()))
            .cloned()
            .collect();
        unknown_fields.sort();

        Ok(Self {
            task_type,
            status,
            retrieved_data,
            error_details,
            unknown_fields,
            raw: Value::Object(obj),
        })
    }
}
