use crate::agent_response::{ResponseStatus, TaskType};
use crate::site::Site;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn default_true() -> bool {
    true
}

fn default_response_status() -> u16 {
    200
}

fn default_http_method() -> String {
    "GET".to_string()
}

/// How the expected URL is matched against trace URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlMatchMode {
    #[default]
    Exact,
    Prefix,
    Regex,
}

/// Event classification an expectation may pin down. `Modification` is the
/// dataset's name for what the trace model classifies as a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedEventType {
    Navigation,
    Modification,
    Other,
}

/// Expected final agent response, as stored in the dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedAgentResponse {
    pub task_type: TaskType,
    pub status: ResponseStatus,
    /// JSON tree; nested arrays inside denote acceptable alternatives.
    #[serde(default)]
    pub retrieved_data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponseEvaluatorCfg {
    pub expected: ExpectedAgentResponse,
    /// When true `retrieved_data` lists must match in order; otherwise they
    /// compare as multisets.
    #[serde(default)]
    pub ordered: bool,
    /// JSON-Schema-like description ({type, items, properties, format}) used
    /// to pick normalized types per result field.
    #[serde(default)]
    pub results_schema: Option<Value>,
}

/// Expected network event description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedNetworkEvent {
    /// String or list of alternative strings; may contain `__SITE__`
    /// placeholders; `^…$` values are regex patterns.
    #[serde(default)]
    pub url: Option<Value>,
    #[serde(default)]
    pub headers: Option<Map<String, Value>>,
    #[serde(default, alias = "query_string")]
    pub query_params: Option<Value>,
    #[serde(default)]
    pub post_data: Option<Value>,
    #[serde(default = "default_response_status")]
    pub response_status: u16,
    #[serde(default)]
    pub event_type: Option<ExpectedEventType>,
    #[serde(default = "default_http_method")]
    pub http_method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEventEvaluatorCfg {
    pub expected: ExpectedNetworkEvent,
    #[serde(default)]
    pub url_match_mode: UrlMatchMode,
    /// Only the most recent candidate event counts ("where did the agent end
    /// up"); disable to accept any matching event in the trace.
    #[serde(default = "default_true")]
    pub last_event_only: bool,
    #[serde(default)]
    pub ignored_query_params: Vec<String>,
    #[serde(default)]
    pub ignored_query_params_patterns: Vec<String>,
    #[serde(default)]
    pub decode_base64_query: bool,
    #[serde(default)]
    pub query_params_schema: Option<Value>,
    #[serde(default)]
    pub post_data_schema: Option<Value>,
}

/// Evaluator configuration, dispatched once at orchestrator level. The tag
/// set is closed: an unknown `evaluator` value fails at dataset load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "evaluator")]
pub enum EvaluatorCfg {
    #[serde(rename = "AgentResponseEvaluator")]
    AgentResponse(AgentResponseEvaluatorCfg),
    #[serde(rename = "NetworkEventEvaluator")]
    NetworkEvent(NetworkEventEvaluatorCfg),
}

impl EvaluatorCfg {
    pub fn evaluator_name(&self) -> &'static str {
        match self {
            Self::AgentResponse(_) => "AgentResponseEvaluator",
            Self::NetworkEvent(_) => "NetworkEventEvaluator",
        }
    }
}

/// Immutable task specification, loaded from the dataset once per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub task_id: u32,
    pub revision: u32,
    pub intent_template_id: u32,
    pub sites: Vec<Site>,
    pub intent: String,
    #[serde(default)]
    pub intent_template: String,
    #[serde(default)]
    pub instantiation_dict: Value,
    #[serde(default)]
    pub require_reset: bool,
    #[serde(default)]
    pub require_login: bool,
    pub eval: Vec<EvaluatorCfg>,
}

impl TaskDefinition {
    pub fn from_value(value: Value) -> Result<Self> {
        let task: Self = serde_json::from_value(value)
            .map_err(|e| anyhow!("invalid task definition: {}", e))?;
        if task.eval.is_empty() {
            return Err(anyhow!("task {} has an empty eval list", task.task_id));
        }
        Ok(task)
    }

    pub fn agent_response_cfg(&self) -> Option<&AgentResponseEvaluatorCfg> {
        self.eval.iter().find_map(|cfg| match cfg {
            EvaluatorCfg::AgentResponse(cfg) => Some(cfg),
            EvaluatorCfg::NetworkEvent(_) => None,
        })
    }

    pub fn task_type(&self) -> Option<TaskType> {
        self.agent_response_cfg().map(|cfg| cfg.expected.task_type)
    }

    pub fn has_network_event_evaluator(&self) -> bool {
        self.eval
            .iter()
            .any(|cfg| matches!(cfg, EvaluatorCfg::NetworkEvent(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task_value() -> Value {
        json!({
            "task_id": 677,
            "revision": 2,
            "intent_template_id": 311,
            "sites": ["shopping_admin"],
            "intent": "Open the sales order dashboard",
            "eval": [
                {
                    "evaluator": "AgentResponseEvaluator",
                    "expected": {
                        "task_type": "navigate",
                        "status": "SUCCESS",
                        "retrieved_data": null
                    }
                },
                {
                    "evaluator": "NetworkEventEvaluator",
                    "expected": {
                        "url": "__SHOPPING_ADMIN__/sales/order/",
                        "response_status": 200
                    },
                    "url_match_mode": "prefix",
                    "ignored_query_params": ["key"]
                }
            ]
        })
    }

    #[test]
    fn task_parses_with_tagged_evaluators() {
        let task = TaskDefinition::from_value(task_value()).expect("task should parse");
        assert_eq!(task.task_id, 677);
        assert_eq!(task.sites, vec![Site::ShoppingAdmin]);
        assert_eq!(task.eval.len(), 2);
        assert_eq!(task.task_type(), Some(TaskType::Navigate));
        assert!(task.has_network_event_evaluator());

        match &task.eval[1] {
            EvaluatorCfg::NetworkEvent(cfg) => {
                assert_eq!(cfg.url_match_mode, UrlMatchMode::Prefix);
                assert!(cfg.last_event_only, "last_event_only defaults to true");
                assert_eq!(cfg.expected.response_status, 200);
                assert_eq!(cfg.expected.http_method, "GET");
                assert_eq!(cfg.ignored_query_params, vec!["key"]);
            }
            other => panic!("expected NetworkEventEvaluator, got {:?}", other),
        }
    }

    #[test]
    fn unknown_evaluator_tag_fails_fast() {
        let mut value = task_value();
        value["eval"][0]["evaluator"] = json!("DomTreeEvaluator");
        let err = TaskDefinition::from_value(value).expect_err("unknown tag must fail");
        assert!(err.to_string().contains("invalid task definition"));
    }

    #[test]
    fn expected_accepts_both_task_type_casings() {
        let mut value = task_value();
        value["eval"][0]["expected"]["task_type"] = json!("RETRIEVE");
        let task = TaskDefinition::from_value(value).expect("uppercase parses");
        assert_eq!(task.task_type(), Some(TaskType::Retrieve));
    }

    #[test]
    fn query_string_alias_is_accepted() {
        let expected: ExpectedNetworkEvent = serde_json::from_value(json!({
            "url": "__SHOPPING__/catalog",
            "query_string": {"q": "shoes"}
        }))
        .expect("alias should parse");
        assert_eq!(expected.query_params, Some(json!({"q": "shoes"})));
    }

    #[test]
    fn empty_eval_list_is_rejected() {
        let mut value = task_value();
        value["eval"] = json!([]);
        assert!(TaskDefinition::from_value(value).is_err());
    }
}
