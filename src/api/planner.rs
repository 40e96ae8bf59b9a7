//! AI planner session endpoints.

use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{path_segment, ApiClient, ApiError};
use crate::planner::model::{PlannerInput, PlannerSnapshot, SessionSummary};

#[derive(Debug, Clone, Deserialize)]
pub struct CancelAck {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl ApiClient {
    /// `POST /ai/planner/sessions`
    pub async fn create_session(&self, input: &PlannerInput) -> Result<SessionSummary, ApiError> {
        let res = self
            .post::<SessionSummary, _>("/ai/planner/sessions", input)
            .await?;
        info!(session_id = %res.data.id, destination = %input.destination, "Planner session created");
        Ok(res.data)
    }

    /// `GET /ai/planner/sessions`, newest first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ApiError> {
        Ok(self.get("/ai/planner/sessions").await?.data)
    }

    /// `GET /ai/planner/sessions/:id`
    pub async fn get_session(&self, session_id: &str) -> Result<PlannerSnapshot, ApiError> {
        let id = path_segment(session_id)?;
        Ok(self
            .get(&format!("/ai/planner/sessions/{}", id))
            .await?
            .data)
    }

    /// `POST /ai/planner/sessions/:id/cancel`
    pub async fn cancel_session(&self, session_id: &str) -> Result<CancelAck, ApiError> {
        let id = path_segment(session_id)?;
        let res = self
            .post::<CancelAck, _>(&format!("/ai/planner/sessions/{}/cancel", id), &json!({}))
            .await?;
        info!(session_id = %id, "Planner cancel requested");
        Ok(res.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::serve;
    use crate::auth::StaticToken;
    use crate::planner::model::{PlannerDraft, PlannerStatus};
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(
            &format!("{}/api/", base),
            Duration::from_secs(5),
            Arc::new(StaticToken::new("t")),
        )
        .unwrap()
    }

    fn router() -> Router {
        Router::new()
            .route(
                "/api/ai/planner/sessions",
                post(|Json(body): Json<Value>| async move {
                    (
                        StatusCode::CREATED,
                        Json(serde_json::json!({"data": {
                            "id": "s1",
                            "status": "QUEUED",
                            "input": body,
                            "created_at": "2025-02-01T09:00:00"
                        }})),
                    )
                })
                .get(|| async {
                    Json(serde_json::json!({"data": [
                        {"id": "s2", "status": "COMPLETED", "input": {"destination": "Jaipur"}},
                        {"id": "s1", "status": "RUNNING", "input": {"destination": "Goa"}}
                    ]}))
                }),
            )
            .route(
                "/api/ai/planner/sessions/:id",
                get(|Path(id): Path<String>| async move {
                    Json(serde_json::json!({"data": {
                        "id": id,
                        "status": "COMPLETED",
                        "stream_text": "Day 1: beach",
                        "result_json": {"title": "Goa"},
                        "events": [
                            {"type": "progress", "stage": "validate_input", "status": "DONE", "elapsed_ms": 10},
                            {"type": "token", "chunk": "Day 1"}
                        ]
                    }}))
                }),
            )
            .route(
                "/api/ai/planner/sessions/:id/cancel",
                post(|Path(id): Path<String>| async move {
                    Json(serde_json::json!({"data": {"id": id, "status": "CANCELLED"}}))
                }),
            )
    }

    #[tokio::test]
    async fn test_create_sends_normalized_input() {
        let api = client(&serve(router()).await);
        let input = PlannerDraft {
            destination: "Goa".into(),
            interests: Some("beaches, food".into()),
            ..Default::default()
        }
        .validate()
        .unwrap();

        let created = api.create_session(&input).await.unwrap();
        assert_eq!(created.id, "s1");
        assert_eq!(created.destination(), Some("Goa"));
        let echoed = created.input.unwrap();
        assert_eq!(echoed["budget"], "MID_RANGE");
        assert_eq!(echoed["interests"][1], "food");
        assert!(created.created_at.is_some());
    }

    #[tokio::test]
    async fn test_get_list_cancel() {
        let api = client(&serve(router()).await);

        let snapshot = api.get_session("s1").await.unwrap();
        assert_eq!(snapshot.status(), Some(PlannerStatus::Completed));
        assert_eq!(snapshot.progress().len(), 1);
        assert_eq!(snapshot.result_json.unwrap()["title"], "Goa");

        let sessions = api.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id, "s2");

        let ack = api.cancel_session("s1").await.unwrap();
        assert_eq!(ack.status.as_deref(), Some("CANCELLED"));
    }
}
