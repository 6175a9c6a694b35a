pub mod agent_response;
pub mod config;
pub mod eval;
pub mod site;
pub mod task;
pub mod trace;

pub use agent_response::{AgentResponse, ResponseStatus, TaskType};
pub use config::{EnvironmentConfig, WavConfig};
pub use eval::{
    AssertionResult, EvalStatus, EvalSummary, EvaluatorResult, SiteTaskOutcome, TaskEvalResult,
};
pub use site::Site;
pub use task::{
    AgentResponseEvaluatorCfg, EvaluatorCfg, ExpectedAgentResponse, ExpectedEventType,
    ExpectedNetworkEvent, NetworkEventEvaluatorCfg, TaskDefinition, UrlMatchMode,
};
pub use trace::{NetworkEvent, NetworkEventType, NetworkTrace};
