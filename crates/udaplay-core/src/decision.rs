//! Model Decisions
//!
//! The model's reply is untrusted text. [`parse_decision`] accepts exactly one
//! JSON object (bare or inside a ```json / ```tool fence) in one of two shapes:
//!
//! ```text
//! {"tool": "retrieve_game", "arguments": {"query": "..."}, "rationale": "..."}
//! {"answer": "...", "citations": ["game-001"], "rationale": "..."}
//! ```
//!
//! Anything else is `MalformedModelOutput`.

use serde_json::{Map, Value};

use crate::error::{AgentError, Result};
use crate::tool::{ToolArguments, ToolCall};

const TOOL_KEYS: &[&str] = &["tool", "arguments", "rationale"];
const ANSWER_KEYS: &[&str] = &["answer", "citations", "rationale"];

/// Instructions appended to the system prompt
pub const DECISION_FORMAT: &str = r#"## Response Format

Reply with exactly one JSON object and nothing else.

To call a tool:
{"tool": "tool_name", "arguments": {"arg": "value"}, "rationale": "why"}

To answer:
{"answer": "your answer", "citations": ["source_id", "..."], "rationale": "why"}

Cite only source ids that appeared in tool evidence during this turn."#;

/// Sent back to the model once after an unparseable reply
pub const CORRECTIVE_INSTRUCTION: &str = "Your previous reply could not be parsed. \
Reply with exactly one JSON object: either {\"tool\": ..., \"arguments\": {...}} \
or {\"answer\": ..., \"citations\": [...]}. Do not add any other keys or text.";

/// A terminal answer proposed by the model
#[derive(Clone, Debug, PartialEq)]
pub struct ProposedAnswer {
    pub text: String,
    /// Source ids the model claims support the answer
    pub citations: Vec<String>,
    pub rationale: Option<String>,
}

/// What the model asked for
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    CallTool {
        call: ToolCall,
        rationale: Option<String>,
    },
    Answer(ProposedAnswer),
}

fn malformed(reason: impl Into<String>) -> AgentError {
    AgentError::MalformedModelOutput(reason.into())
}

/// Locate the JSON object inside a reply
fn extract_json(content: &str) -> Option<&str> {
    for fence in ["```json", "```tool", "```"] {
        if let Some(start) = content.find(fence) {
            let after = &content[start + fence.len()..];
            if let Some(end) = after.find("```") {
                let inner = after[..end].trim();
                if inner.starts_with('{') {
                    return Some(inner);
                }
            }
        }
    }

    let start = content.find('{')?;
    let end = content.rfind('}')?;
    (end > start).then(|| &content[start..=end])
}

fn optional_string(object: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(malformed(format!("'{key}' must be a string"))),
    }
}

fn reject_unknown_keys(object: &Map<String, Value>, allowed: &[&str]) -> Result<()> {
    match object.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(key) => Err(malformed(format!("unexpected key '{key}'"))),
        None => Ok(()),
    }
}

/// Strictly parse a model reply into a [`Decision`]
pub fn parse_decision(content: &str) -> Result<Decision> {
    let json = extract_json(content).ok_or_else(|| malformed("no JSON object found"))?;
    let value: Value = serde_json::from_str(json).map_err(|e| malformed(format!("invalid JSON: {e}")))?;
    let Value::Object(object) = value else {
        return Err(malformed("expected a JSON object"));
    };

    match (object.contains_key("tool"), object.contains_key("answer")) {
        (true, true) => Err(malformed("reply contains both 'tool' and 'answer'")),
        (false, false) => Err(malformed("reply contains neither 'tool' nor 'answer'")),
        (true, false) => {
            reject_unknown_keys(&object, TOOL_KEYS)?;
            let name = match object.get("tool") {
                Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
                _ => return Err(malformed("'tool' must be a non-empty string")),
            };
            let arguments: ToolArguments = match object.get("arguments") {
                None | Some(Value::Null) => ToolArguments::new(),
                Some(Value::Object(map)) => map.clone().into_iter().collect(),
                Some(_) => return Err(malformed("'arguments' must be an object")),
            };
            Ok(Decision::CallTool {
                call: ToolCall::new(name, arguments),
                rationale: optional_string(&object, "rationale")?,
            })
        }
        (false, true) => {
            reject_unknown_keys(&object, ANSWER_KEYS)?;
            let text = match object.get("answer") {
                Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
                _ => return Err(malformed("'answer' must be a non-empty string")),
            };
            let citations = match object.get("citations") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| malformed("'citations' must contain strings"))
                    })
                    .collect::<Result<Vec<_>>>()?,
                Some(_) => return Err(malformed("'citations' must be an array")),
            };
            Ok(Decision::Answer(ProposedAnswer {
                text,
                citations,
                rationale: optional_string(&object, "rationale")?,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fenced_tool_call() {
        let content = r#"Let me look that up.
```tool
{"tool": "retrieve_game", "arguments": {"query": "Pokemon Gold"}}
```"#;
        match parse_decision(content).unwrap() {
            Decision::CallTool { call, rationale } => {
                assert_eq!(call.name, "retrieve_game");
                assert_eq!(call.arguments["query"], "Pokemon Gold");
                assert!(rationale.is_none());
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_bare_answer() {
        let decision = parse_decision(
            r#"{"answer": "It was released in 1999.", "citations": ["game-001"], "rationale": "from the index"}"#,
        )
        .unwrap();
        assert_eq!(
            decision,
            Decision::Answer(ProposedAnswer {
                text: "It was released in 1999.".into(),
                citations: vec!["game-001".into()],
                rationale: Some("from the index".into()),
            })
        );
    }

    #[test]
    fn test_rejects_malformed_shapes() {
        for bad in [
            "I think it's 1999",
            "[1, 2, 3]",
            r#"{"tool": "a", "answer": "b"}"#,
            r#"{"thought": "hmm"}"#,
            r#"{"tool": "retrieve_game", "args": {}}"#,
            r#"{"tool": "", "arguments": {}}"#,
            r#"{"tool": "retrieve_game", "arguments": "Pokemon"}"#,
            r#"{"answer": "1999", "citations": "game-001"}"#,
            r#"{"answer": "1999", "citations": [1]}"#,
            r#"{"answer": "   "}"#,
            r#"{"answer": "1999", "confidence": 0.9}"#,
        ] {
            let err = parse_decision(bad).unwrap_err();
            assert!(matches!(err, AgentError::MalformedModelOutput(_)), "accepted: {bad}");
        }
    }

    #[test]
    fn test_missing_arguments_default_to_empty() {
        match parse_decision(r#"{"tool": "list_sources"}"#).unwrap() {
            Decision::CallTool { call, .. } => assert!(call.arguments.is_empty()),
            other => panic!("expected tool call, got {other:?}"),
        }
    }
}
