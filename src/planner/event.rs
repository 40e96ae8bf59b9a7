//! Typed `/planner` push events.

use serde::Deserialize;
use serde_json::Value;

use super::model::{PlannerStatus, ProgressEntry};
use crate::utils::{lenient_string, lenient_u32};

pub const DEFAULT_PLANNER_ERROR: &str = "Planner session failed.";

#[derive(Debug, Clone, PartialEq)]
pub enum PlannerEventKind {
    Progress(ProgressEntry),
    Token(String),
    Complete {
        status: Option<PlannerStatus>,
        result: Option<Value>,
    },
    Error {
        status: Option<PlannerStatus>,
        message: String,
    },
    Cancelled,
}

/// A push scoped to one planner session.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerEvent {
    pub session_id: String,
    pub kind: PlannerEventKind,
}

#[derive(Deserialize)]
struct ProgressPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    session_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    stage: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    status: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    message: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    elapsed_ms: Option<u32>,
}

#[derive(Deserialize)]
struct TokenPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    session_id: Option<String>,
    #[serde(default)]
    chunk: Option<String>,
}

#[derive(Deserialize)]
struct CompletePayload {
    #[serde(default, deserialize_with = "lenient_string")]
    session_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    status: Option<String>,
    #[serde(default)]
    result: Option<Value>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    session_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    status: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct SessionPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    session_id: Option<String>,
}

fn error_text(error: Option<&Value>) -> Option<String> {
    let text = match error? {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj.get("message").and_then(Value::as_str).map(String::from),
        _ => None,
    };
    text.filter(|s| !s.trim().is_empty())
}

impl PlannerEvent {
    /// Decode a named push. Unknown events and payloads without a session
    /// id yield `Ok(None)`.
    pub fn parse(name: &str, payload: &Value) -> Result<Option<Self>, serde_json::Error> {
        let (session_id, kind) = match name {
            "planner:progress" => {
                let p = ProgressPayload::deserialize(payload)?;
                let entry = ProgressEntry {
                    stage: p.stage.unwrap_or_default(),
                    status: p.status,
                    message: p.message.unwrap_or_default(),
                    elapsed_ms: p.elapsed_ms.map(u64::from).unwrap_or(0),
                };
                (p.session_id, PlannerEventKind::Progress(entry))
            }
            "planner:token" => {
                let p = TokenPayload::deserialize(payload)?;
                (p.session_id, PlannerEventKind::Token(p.chunk.unwrap_or_default()))
            }
            "planner:complete" => {
                let p = CompletePayload::deserialize(payload)?;
                (
                    p.session_id,
                    PlannerEventKind::Complete {
                        status: p.status.as_deref().and_then(PlannerStatus::parse),
                        result: p.result,
                    },
                )
            }
            "planner:error" => {
                let p = ErrorPayload::deserialize(payload)?;
                let message = error_text(p.error.as_ref())
                    .unwrap_or_else(|| DEFAULT_PLANNER_ERROR.to_string());
                (
                    p.session_id,
                    PlannerEventKind::Error {
                        status: p.status.as_deref().and_then(PlannerStatus::parse),
                        message,
                    },
                )
            }
            "planner:cancelled" => {
                let p = SessionPayload::deserialize(payload)?;
                (p.session_id, PlannerEventKind::Cancelled)
            }
            _ => return Ok(None),
        };

        Ok(session_id
            .filter(|id| !id.is_empty())
            .map(|session_id| PlannerEvent { session_id, kind }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(name: &str, payload: Value) -> Option<PlannerEvent> {
        PlannerEvent::parse(name, &payload).unwrap()
    }

    #[test]
    fn test_progress() {
        let event = parse(
            "planner:progress",
            json!({"session_id": "s1", "stage": "rag_retrieve", "status": "DONE", "message": "ok", "elapsed_ms": 500}),
        )
        .unwrap();
        assert_eq!(event.session_id, "s1");
        match event.kind {
            PlannerEventKind::Progress(entry) => {
                assert_eq!(entry.stage, "rag_retrieve");
                assert_eq!(entry.status.as_deref(), Some("DONE"));
                assert_eq!(entry.elapsed_ms, 500);
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_token_and_missing_session() {
        assert_eq!(
            parse("planner:token", json!({"session_id": "s1", "chunk": "Day 1"}))
                .unwrap()
                .kind,
            PlannerEventKind::Token("Day 1".into())
        );
        assert_eq!(
            parse("planner:token", json!({"session_id": "s1"})).unwrap().kind,
            PlannerEventKind::Token(String::new())
        );
        assert!(parse("planner:token", json!({"chunk": "x"})).is_none());
        assert!(parse("planner:cancelled", json!({"session_id": ""})).is_none());
    }

    #[test]
    fn test_complete_and_error() {
        assert_eq!(
            parse("planner:complete", json!({"session_id": "s1", "result": {"days": []}}))
                .unwrap()
                .kind,
            PlannerEventKind::Complete {
                status: None,
                result: Some(json!({"days": []}))
            }
        );
        assert_eq!(
            parse(
                "planner:error",
                json!({"session_id": "s1", "status": "FAILED", "error": {"message": "LLM timeout"}})
            )
            .unwrap()
            .kind,
            PlannerEventKind::Error {
                status: Some(PlannerStatus::Failed),
                message: "LLM timeout".into()
            }
        );
        assert_eq!(
            parse("planner:error", json!({"session_id": "s1"})).unwrap().kind,
            PlannerEventKind::Error {
                status: None,
                message: DEFAULT_PLANNER_ERROR.into()
            }
        );
    }

    #[test]
    fn test_unknown_event() {
        assert!(parse("planner:heartbeat", json!({"session_id": "s1"})).is_none());
    }
}
