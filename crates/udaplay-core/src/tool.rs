//! Tool System
//!
//! Tools are declared with a [`ToolSpec`] (typed input parameters, output
//! shape, idempotency) and registered once at startup. The registry validates
//! every call against its `ToolSpec` before invoking the handler and always hands
//! back a [`ToolResult`]: failures are results the model can react to, not
//! errors that unwind the reasoning loop.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::retrieval::Evidence;

/// Arguments of a tool call, keyed by parameter name
pub type ToolArguments = BTreeMap<String, Value>;

/// Tool call request from the LLM
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call ID for pairing with its result
    pub id: String,

    /// Tool identifier
    pub name: String,

    #[serde(default)]
    pub arguments: ToolArguments,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: ToolArguments) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
        }
    }

    /// Same tool with the same arguments (ids ignored)
    pub fn same_request(&self, other: &Self) -> bool {
        self.name == other.name && self.arguments == other.arguments
    }

    /// Fresh id for a retry of this call
    #[must_use]
    pub fn retry(&self) -> Self {
        Self::new(self.name.clone(), self.arguments.clone())
    }
}

/// JSON type of a parameter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

/// Parameter definition for tool schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSchema {
    pub name: String,

    #[serde(rename = "type")]
    pub param_type: ParamType,

    /// Human-readable description (shown to the LLM)
    pub description: String,

    #[serde(default)]
    pub required: bool,

    /// Allowed values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl ParameterSchema {
    pub fn required(name: impl Into<String>, param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            required: true,
            enum_values: None,
        }
    }

    pub fn optional(name: impl Into<String>, param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }

    #[must_use]
    pub fn one_of(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }
}

/// Shape of a tool's successful output
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputSchema {
    /// Retrieval output carrying [`Evidence`]
    Evidence,
    /// Structured judgement carried in `data`
    Evaluation,
    /// Plain text payload
    Text,
}

/// Tool declaration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Unique tool identifier
    pub name: String,

    pub description: String,

    pub parameters: Vec<ParameterSchema>,

    pub output: OutputSchema,

    /// Safe to call again with the same arguments
    pub idempotent: bool,
}

impl ToolSpec {
    /// Check arguments against the input schema; unknown names are rejected
    pub fn validate(&self, arguments: &ToolArguments) -> Result<()> {
        let invalid = |reason: String| AgentError::InvalidArguments {
            tool: self.name.clone(),
            reason,
        };

        for key in arguments.keys() {
            if !self.parameters.iter().any(|p| &p.name == key) {
                return Err(invalid(format!("unknown parameter '{key}'")));
            }
        }

        for param in &self.parameters {
            match arguments.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(invalid(format!("missing required parameter '{}'", param.name)));
                }
                None | Some(Value::Null) => {}
                Some(value) => {
                    if !param.param_type.matches(value) {
                        return Err(invalid(format!(
                            "parameter '{}' must be of type {}",
                            param.name, param.param_type
                        )));
                    }
                    if let Some(allowed) = &param.enum_values {
                        if !allowed.contains(value) {
                            return Err(invalid(format!("parameter '{}' has a value outside its allowed set", param.name)));
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Successful tool output
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Text shown to the model
    pub payload: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<Evidence>,
}

impl ToolOutput {
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }

    pub fn with_evidence(payload: impl Into<String>, evidence: Vec<Evidence>) -> Self {
        Self {
            payload: payload.into(),
            evidence,
            data: None,
        }
    }

    pub fn evaluation(payload: impl Into<String>, data: Value) -> Self {
        Self {
            payload: payload.into(),
            data: Some(data),
            evidence: Vec::new(),
        }
    }

    fn conforms_to(&self, schema: OutputSchema) -> bool {
        match schema {
            OutputSchema::Evaluation => self.data.as_ref().is_some_and(Value::is_object),
            OutputSchema::Text => self.evidence.is_empty(),
            OutputSchema::Evidence => true,
        }
    }
}

/// Why a tool call produced no output
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidArguments,
    UnknownTool,
    ToolError,
    ToolTimeout,
    NoEvidenceAvailable,
    Cancelled,
}

impl FailureKind {
    /// Transient backend failures the engine may retry once
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::ToolError | Self::ToolTimeout)
    }

    fn from_error(err: &AgentError) -> Self {
        match err {
            AgentError::InvalidArguments { .. } => Self::InvalidArguments,
            AgentError::ToolNotFound(_) => Self::UnknownTool,
            AgentError::ToolTimeout { .. } | AgentError::Timeout { .. } => Self::ToolTimeout,
            AgentError::NoEvidenceAvailable(_) | AgentError::IndexNotPopulated => Self::NoEvidenceAvailable,
            AgentError::Cancelled => Self::Cancelled,
            _ => Self::ToolError,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InvalidArguments => "invalid arguments",
            Self::UnknownTool => "unknown tool",
            Self::ToolError => "tool error",
            Self::ToolTimeout => "timeout",
            Self::NoEvidenceAvailable => "no evidence available",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Outcome of one dispatched call
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success {
        payload: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(default)]
        evidence: Vec<Evidence>,
    },
    Failure {
        kind: FailureKind,
        message: String,
    },
}

/// Result from tool execution
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the triggering call
    pub call_id: String,

    /// Tool that was called
    pub tool: String,

    #[serde(flatten)]
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(call: &ToolCall, output: ToolOutput) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            outcome: ToolOutcome::Success {
                payload: output.payload,
                data: output.data,
                evidence: output.evidence,
            },
        }
    }

    pub fn failure(call: &ToolCall, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.name.clone(),
            outcome: ToolOutcome::Failure {
                kind,
                message: message.into(),
            },
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success { .. })
    }

    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            ToolOutcome::Failure { kind, .. } => Some(*kind),
            ToolOutcome::Success { .. } => None,
        }
    }

    pub fn evidence(&self) -> &[Evidence] {
        match &self.outcome {
            ToolOutcome::Success { evidence, .. } => evidence,
            ToolOutcome::Failure { .. } => &[],
        }
    }

    /// Observation text for the working context
    pub fn observation(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success { payload, evidence, .. } => {
                let mut text = format!("[Tool '{}' returned]\n{}", self.tool, payload);
                if !evidence.is_empty() {
                    text.push_str("\n\nEvidence (cite by source id):\n");
                    for e in evidence {
                        text.push_str(&format!("- [{}] ({:.2}, {}) {}\n", e.source_id, e.score, e.origin, e.snippet));
                    }
                }
                text.trim_end().to_string()
            }
            ToolOutcome::Failure { kind, message } => {
                format!("[Tool '{}' failed: {}]\n{}", self.tool, kind, message)
            }
        }
    }
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// Declaration captured once at registration
    fn spec(&self) -> ToolSpec;

    /// Execute with arguments that already passed validation
    async fn execute(&self, arguments: &ToolArguments) -> Result<ToolOutput>;
}

struct RegisteredTool {
    spec: ToolSpec,
    handler: Arc<dyn Tool>,
}

/// Registry for available tools
///
/// Built mutably at startup, then shared immutably behind an `Arc`.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new tool; fails with `DuplicateTool` if the name is taken
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, handler: Arc<dyn Tool>) -> Result<()> {
        let spec = handler.spec();
        if self.tools.contains_key(&spec.name) {
            return Err(AgentError::DuplicateTool(spec.name));
        }
        tracing::info!(tool = %spec.name, idempotent = spec.idempotent, "registered tool");
        self.order.push(spec.name.clone());
        self.tools.insert(spec.name.clone(), RegisteredTool { spec, handler });
        Ok(())
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|t| &t.spec)
    }

    /// Validate a call without invoking it
    pub fn check(&self, call: &ToolCall) -> Result<()> {
        let entry = self
            .tools
            .get(&call.name)
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;
        entry.spec.validate(&call.arguments)
    }

    /// Validate and invoke a call.
    ///
    /// Never retries; an expired `timeout` yields a `ToolTimeout` result.
    pub async fn dispatch(&self, call: &ToolCall, timeout: Option<Duration>) -> ToolResult {
        let Some(entry) = self.tools.get(&call.name) else {
            return ToolResult::failure(call, FailureKind::UnknownTool, format!("no tool named '{}'", call.name));
        };

        if let Err(e) = entry.spec.validate(&call.arguments) {
            tracing::debug!(tool = %call.name, error = %e, "rejected tool call");
            return ToolResult::failure(call, FailureKind::InvalidArguments, e.to_string());
        }

        let execution = entry.handler.execute(&call.arguments);
        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(outcome) => outcome,
                Err(_) => Err(AgentError::ToolTimeout {
                    tool: call.name.clone(),
                    millis: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                }),
            },
            None => execution.await,
        };

        match outcome {
            Ok(mut output) => {
                if !output.conforms_to(entry.spec.output) {
                    return ToolResult::failure(
                        call,
                        FailureKind::ToolError,
                        format!("output did not match the {:?} schema", entry.spec.output),
                    );
                }
                for evidence in &mut output.evidence {
                    evidence.tool = Some(call.name.clone());
                }
                ToolResult::success(call, output)
            }
            Err(e) => {
                let kind = FailureKind::from_error(&e);
                tracing::debug!(tool = %call.name, %kind, error = %e, "tool call failed");
                ToolResult::failure(call, kind, e.to_string())
            }
        }
    }

    /// Specs in registration order
    pub fn specs(&self) -> impl Iterator<Item = &ToolSpec> {
        self.order.iter().filter_map(|name| self.spec(name))
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// System prompt section describing available tools
    pub fn prompt_section(&self) -> String {
        let mut prompt = String::from("## Available Tools\n\n");

        for spec in self.specs() {
            prompt.push_str(&format!("### {}\n{}\n", spec.name, spec.description));

            if !spec.parameters.is_empty() {
                prompt.push_str("**Parameters:**\n");
                for param in &spec.parameters {
                    let required = if param.required { " (required)" } else { "" };
                    prompt.push_str(&format!(
                        "- `{}` ({}){}: {}\n",
                        param.name, param.param_type, required, param.description
                    ));
                    if let Some(values) = &param.enum_values {
                        let values: Vec<String> = values.iter().map(Value::to_string).collect();
                        prompt.push_str(&format!("  one of: {}\n", values.join(", ")));
                    }
                }
            }
            prompt.push('\n');
        }

        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{EvidenceTool, SlowTool};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTool {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "count".into(),
                description: "Counts invocations".into(),
                parameters: vec![
                    ParameterSchema::required("query", ParamType::String, "Search text"),
                    ParameterSchema::optional("limit", ParamType::Integer, "Max results"),
                    ParameterSchema::optional("mode", ParamType::String, "Mode")
                        .one_of(vec![json!("fast"), json!("deep")]),
                ],
                output: OutputSchema::Text,
                idempotent: true,
            }
        }

        async fn execute(&self, _arguments: &ToolArguments) -> Result<ToolOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ToolOutput::text("ok"))
        }
    }

    fn args(value: Value) -> ToolArguments {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ToolRegistry::new();
        registry.register(EvidenceTool::new("retrieve", vec![])).unwrap();
        let err = registry.register(EvidenceTool::new("retrieve", vec![])).unwrap_err();
        assert!(matches!(err, AgentError::DuplicateTool(name) if name == "retrieve"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_arguments_never_invoke_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(CountingTool { calls: calls.clone() }).unwrap();

        for bad in [
            json!({}),
            json!({"query": 42}),
            json!({"query": "zelda", "extra": true}),
            json!({"query": "zelda", "limit": 2.5}),
            json!({"query": "zelda", "mode": "slow"}),
        ] {
            let result = registry.dispatch(&ToolCall::new("count", args(bad)), None).await;
            assert_eq!(result.failure_kind(), Some(FailureKind::InvalidArguments));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let ok = registry
            .dispatch(&ToolCall::new("count", args(json!({"query": "zelda", "limit": 3, "mode": "deep"}))), None)
            .await;
        assert!(ok.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let call = ToolCall::new("missing", ToolArguments::new());
        let result = registry.dispatch(&call, None).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::UnknownTool));
        assert_eq!(result.call_id, call.id);
    }

    #[tokio::test]
    async fn test_timeout_is_distinct_from_error() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool::new(Duration::from_millis(200))).unwrap();
        let result = registry
            .dispatch(&ToolCall::new("slow", ToolArguments::new()), Some(Duration::from_millis(10)))
            .await;
        assert_eq!(result.failure_kind(), Some(FailureKind::ToolTimeout));
    }

    #[tokio::test]
    async fn test_evidence_is_tagged_with_tool() {
        let mut registry = ToolRegistry::new();
        registry
            .register(EvidenceTool::new(
                "retrieve",
                vec![Evidence::new("Tetris 1984", "game-010", 0.9, crate::retrieval::EvidenceOrigin::Local)],
            ))
            .unwrap();
        let result = registry
            .dispatch(&ToolCall::new("retrieve", args(json!({"query": "tetris"}))), None)
            .await;
        assert_eq!(result.evidence()[0].tool.as_deref(), Some("retrieve"));
        assert!(result.observation().contains("[game-010]"));
    }

    #[test]
    fn test_prompt_section_lists_tools_in_order() {
        let mut registry = ToolRegistry::new();
        registry.register(EvidenceTool::new("b_tool", vec![])).unwrap();
        registry.register(EvidenceTool::new("a_tool", vec![])).unwrap();
        let section = registry.prompt_section();
        let b = section.find("### b_tool").unwrap();
        let a = section.find("### a_tool").unwrap();
        assert!(b < a);
        assert!(section.contains("`query` (string) (required)"));
    }
}
