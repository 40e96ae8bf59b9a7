//! Follows one AI planner session over `/planner` pushes and REST.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::event::{PlannerEvent, PlannerEventKind};
use super::model::{PlannerDraft, PlannerSession, PlannerSnapshot};
use super::reducer::{PlannerEffect, PlannerMsg, PlannerState};
use crate::api::{ApiClient, ApiError};
use crate::error::{Error, Result, ValidationError};
use crate::metrics;
use crate::socket::{Connection, ConnectionState, SocketEvent};

pub const START_FAILED: &str = "Unable to start planner session.";
pub const REFRESH_FAILED: &str = "Could not refresh planner session details.";
pub const CANCEL_FAILED: &str = "Unable to cancel planner session.";

/// Server-provided reason when there is one, `fallback` otherwise.
fn failure_message(e: &Error, fallback: &str) -> String {
    match e {
        Error::Validation(v) => v.to_string(),
        Error::Api(ApiError::Remote { message, .. }) if !message.trim().is_empty() => {
            message.clone()
        }
        Error::Api(ApiError::Validation(message)) => message.clone(),
        _ => fallback.to_string(),
    }
}

pub struct PlannerTracker {
    api: ApiClient,
    conn: Arc<Connection>,
    inbox: mpsc::UnboundedSender<PlannerMsg>,
    state: watch::Receiver<PlannerState>,
    /// Session followed by this handle, set before the worker sees it.
    active: Mutex<Option<String>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PlannerTracker {
    pub fn new(api: ApiClient, conn: Arc<Connection>) -> Self {
        let (state_tx, state_rx) = watch::channel(PlannerState::new());
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let worker = Worker {
            api: api.clone(),
            conn: conn.clone(),
            state: PlannerState::new(),
            state_tx,
            inbox: inbox_rx,
            loopback: inbox_tx.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run());

        Self {
            api,
            conn,
            inbox: inbox_tx,
            state: state_rx,
            active: Mutex::new(None),
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn state(&self) -> watch::Receiver<PlannerState> {
        self.state.clone()
    }

    pub fn snapshot(&self) -> PlannerState {
        self.state.borrow().clone()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.conn.state()
    }

    fn send(&self, msg: PlannerMsg) -> Result<()> {
        self.inbox.send(msg).map_err(|_| Error::Closed)
    }

    fn active_id(&self) -> Result<String> {
        self.active
            .lock()
            .clone()
            .ok_or_else(|| ValidationError::new("No planner session is active.").into())
    }

    fn follow(&self, session: PlannerSession) -> Result<()> {
        *self.active.lock() = Some(session.id.clone());
        self.send(PlannerMsg::Started(session))
    }

    fn fail(&self, e: Error, fallback: &str) -> Error {
        let message = failure_message(&e, fallback);
        warn!(error = %e, "{}", fallback);
        let _ = self.send(PlannerMsg::RequestFailed(message));
        e
    }

    /// Validate the draft, create the session and start following it.
    pub async fn start(&self, draft: &PlannerDraft) -> Result<String> {
        let input = draft
            .validate()
            .map_err(|e| self.fail(e.into(), START_FAILED))?;
        let created = self
            .api
            .create_session(&input)
            .await
            .map_err(|e| self.fail(e.into(), START_FAILED))?;

        let id = created.id.clone();
        info!(session_id = %id, destination = %input.destination, "Following planner session");
        self.follow(PlannerSession::new(id.clone(), Some(input)))?;
        Ok(id)
    }

    /// Follow an existing session and pull its current state.
    pub async fn attach(&self, session_id: &str) -> Result<PlannerSnapshot> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(ValidationError::new("Session id is required.").into());
        }
        self.follow(PlannerSession::new(session_id, None))?;
        self.refresh().await
    }

    /// Replace the local view with the server's snapshot.
    pub async fn refresh(&self) -> Result<PlannerSnapshot> {
        let id = self.active_id()?;
        let snapshot = self
            .api
            .get_session(&id)
            .await
            .map_err(|e| self.fail(e.into(), REFRESH_FAILED))?;
        self.send(PlannerMsg::Snapshot(snapshot.clone()))?;
        Ok(snapshot)
    }

    /// Ask the server to cancel. The session only becomes CANCELLED once the
    /// server confirms it.
    pub async fn cancel(&self) -> Result<()> {
        let id = self.active_id()?;
        self.api
            .cancel_session(&id)
            .await
            .map_err(|e| self.fail(e.into(), CANCEL_FAILED))?;
        self.send(PlannerMsg::CancelRequested)
    }

    /// Stop following the active session. The shared connection stays open.
    pub fn leave(&self) -> Result<()> {
        *self.active.lock() = None;
        self.send(PlannerMsg::Left)
    }

    /// Wait until the active session reaches a terminal status.
    pub async fn finished(&self) -> Result<PlannerSession> {
        let mut state = self.state.clone();
        let done = state
            .wait_for(|s| s.is_terminal() || s.session.is_none())
            .await
            .map_err(|_| Error::Closed)?
            .clone();
        done.session.ok_or(Error::Closed)
    }

    /// Leave the session and stop the event loop.
    pub async fn close(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for PlannerTracker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Worker {
    api: ApiClient,
    conn: Arc<Connection>,
    state: PlannerState,
    state_tx: watch::Sender<PlannerState>,
    inbox: mpsc::UnboundedReceiver<PlannerMsg>,
    loopback: mpsc::UnboundedSender<PlannerMsg>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        let mut events = self.conn.events();
        let mut conn_state = self.conn.state();
        let mut was_connected = conn_state.borrow().connected;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                msg = self.inbox.recv() => match msg {
                    Some(msg) => self.fold(msg),
                    None => break,
                },
                event = events.recv() => match event {
                    Some(event) => self.on_push(event),
                    None => {
                        info!("Connection closed, stopping planner tracker");
                        break;
                    }
                },
                changed = conn_state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let connected = conn_state.borrow_and_update().connected;
                    if connected && !was_connected {
                        self.recover();
                    }
                    was_connected = connected;
                }
            }
        }

        if let Some(id) = self.state.session_id() {
            if let Err(e) = self.conn.unsubscribe_room(id) {
                debug!(session_id = %id, error = %e, "Unsubscribe on close failed");
            }
        }
        debug!("Planner tracker stopped");
    }

    fn on_push(&mut self, event: SocketEvent) {
        match PlannerEvent::parse(&event.name, &event.payload) {
            Ok(Some(parsed)) => {
                if matches!(&parsed.kind, PlannerEventKind::Token(chunk) if !chunk.is_empty()) {
                    metrics::record_planner_chunk();
                }
                self.fold(PlannerMsg::Push(parsed));
            }
            Ok(None) => debug!(event = %event.name, "Ignoring planner event"),
            Err(e) => warn!(event = %event.name, error = %e, "Malformed planner event"),
        }
    }

    fn fold(&mut self, msg: PlannerMsg) {
        let effects = self.state.apply(msg);
        self.state_tx.send_replace(self.state.clone());
        for effect in effects {
            let result = match &effect {
                PlannerEffect::Subscribe(id) => self.conn.subscribe_room(id),
                PlannerEffect::Unsubscribe(id) => self.conn.unsubscribe_room(id),
            };
            if let Err(e) = result {
                warn!(effect = ?effect, error = %e, "Planner room change failed");
            }
        }
    }

    /// Pull a snapshot after a reconnect in case pushes were missed.
    fn recover(&self) {
        let Some(id) = self.state.session_id().map(str::to_string) else {
            return;
        };
        if self.state.is_terminal() {
            return;
        }
        debug!(session_id = %id, "Reconciling planner session after reconnect");
        let api = self.api.clone();
        let loopback = self.loopback.clone();
        tokio::spawn(async move {
            match api.get_session(&id).await {
                Ok(snapshot) => {
                    let _ = loopback.send(PlannerMsg::Snapshot(snapshot));
                }
                Err(e) => warn!(session_id = %id, error = %e, "Planner reconciliation failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::serve;
    use crate::auth::testing::ScriptedTokens;
    use crate::auth::StaticToken;
    use crate::planner::model::PlannerStatus;
    use crate::socket::connection::testing::{fast_options, next_server, wait_state, MockTransport};
    use crate::socket::{ConnectionManager, Namespace};
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::time::Duration;

    fn api(base: &str) -> ApiClient {
        ApiClient::new(base, Duration::from_secs(5), Arc::new(StaticToken::new("t"))).unwrap()
    }

    fn router() -> Router {
        Router::new()
            .route(
                "/ai/planner/sessions",
                post(|Json(body): Json<Value>| async move {
                    Json(json!({"data": {"id": "s1", "status": "QUEUED", "input": body}}))
                }),
            )
            .route(
                "/ai/planner/sessions/:id",
                get(|Path(id): Path<String>| async move {
                    Json(json!({"data": {
                        "id": id,
                        "status": "RUNNING",
                        "stream_text": "Day 1",
                        "events": [{"type": "progress", "stage": "rag_retrieve", "elapsed_ms": 40}]
                    }}))
                }),
            )
            .route(
                "/ai/planner/sessions/:id/cancel",
                post(|Path(id): Path<String>| async move {
                    if id == "locked" {
                        return (
                            StatusCode::CONFLICT,
                            Json(json!({"error": "CONFLICT", "message": "Session already finished"})),
                        );
                    }
                    (StatusCode::OK, Json(json!({"data": {"id": id, "status": "CANCELLED"}})))
                }),
            )
    }

    async fn wait_planner(
        rx: &mut watch::Receiver<PlannerState>,
        f: impl FnMut(&PlannerState) -> bool,
    ) -> PlannerState {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(f))
            .await
            .expect("timed out waiting for planner state")
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn test_start_stream_and_complete() {
        let base = serve(router()).await;
        let (transport, mut servers) = MockTransport::new();
        let manager = ConnectionManager::new(transport, fast_options());
        let conn = Arc::new(manager.open(Namespace::Planner, Arc::new(ScriptedTokens::new("t"))));
        let mut server = next_server(&mut servers).await;
        server.accept("/planner").await;
        wait_state(&mut conn.state(), |s| s.connected).await;

        let tracker = PlannerTracker::new(api(&base), conn.clone());
        let mut state = tracker.state();

        let id = tracker
            .start(&PlannerDraft {
                destination: "Goa".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(id, "s1");
        assert_eq!(
            server.recv_message().await,
            r#"42/planner,["planner:subscribe",{"session_id":"s1"}]"#
        );

        server.push("/planner", "planner:token", json!({"session_id": "s1", "chunk": "Day 1: "})).await;
        server.push("/planner", "planner:token", json!({"session_id": "other", "chunk": "nope"})).await;
        server.push("/planner", "planner:progress", json!({"session_id": "s1", "stage": "b", "elapsed_ms": 500})).await;
        server.push("/planner", "planner:progress", json!({"session_id": "s1", "stage": "a", "elapsed_ms": 200})).await;
        server.push("/planner", "planner:token", json!({"session_id": "s1", "chunk": "beach"})).await;
        server
            .push("/planner", "planner:complete", json!({"session_id": "s1", "result": {"title": "Goa"}}))
            .await;

        let done = wait_planner(&mut state, |s| s.is_terminal()).await;
        let session = done.session.unwrap();
        assert_eq!(session.status, PlannerStatus::Completed);
        assert_eq!(session.stream_text, "Day 1: beach");
        assert_eq!(session.result, Some(json!({"title": "Goa"})));
        let stages: Vec<String> = session.sorted_events().into_iter().map(|e| e.stage).collect();
        assert_eq!(stages, vec!["a", "b"]);

        let finished = tracker.finished().await.unwrap();
        assert_eq!(finished.id, "s1");

        tracker.leave().unwrap();
        assert_eq!(
            server.recv_message().await,
            r#"42/planner,["planner:unsubscribe",{"session_id":"s1"}]"#
        );
        tracker.close().await;
        conn.close().await;
    }

    #[tokio::test]
    async fn test_cancel_waits_for_confirmation() {
        let base = serve(router()).await;
        let (transport, mut servers) = MockTransport::new();
        let manager = ConnectionManager::new(transport, fast_options());
        let conn = Arc::new(manager.open(Namespace::Planner, Arc::new(ScriptedTokens::new("t"))));
        let mut server = next_server(&mut servers).await;
        server.accept("/planner").await;
        wait_state(&mut conn.state(), |s| s.connected).await;

        let tracker = PlannerTracker::new(api(&base), conn.clone());
        let mut state = tracker.state();

        let snapshot = tracker.attach("s7").await.unwrap();
        assert_eq!(snapshot.status(), Some(PlannerStatus::Running));
        let refreshed = wait_planner(&mut state, |s| {
            s.session.as_ref().is_some_and(|x| x.stream_text == "Day 1")
        })
        .await;
        assert_eq!(refreshed.session.unwrap().events.len(), 1);

        tracker.cancel().await.unwrap();
        let pending = wait_planner(&mut state, |s| s.cancel_requested).await;
        assert_eq!(pending.status(), Some(PlannerStatus::Running));

        server.push("/planner", "planner:cancelled", json!({"session_id": "s7"})).await;
        let cancelled = wait_planner(&mut state, |s| s.is_terminal()).await;
        assert_eq!(cancelled.status(), Some(PlannerStatus::Cancelled));
        assert!(!cancelled.cancel_requested);

        tracker.close().await;
        conn.close().await;
    }

    #[tokio::test]
    async fn test_failures_are_surfaced() {
        let base = serve(router()).await;
        let (transport, _servers) = MockTransport::new();
        let manager = ConnectionManager::new(transport, fast_options());
        let conn = Arc::new(manager.open(Namespace::Planner, Arc::new(ScriptedTokens::new("t"))));
        let tracker = PlannerTracker::new(api(&base), conn.clone());
        let mut state = tracker.state();

        let err = tracker.start(&PlannerDraft::default()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        let failed = wait_planner(&mut state, |s| s.error.is_some()).await;
        assert_eq!(failed.error.as_deref(), Some("Destination is required."));

        assert!(matches!(tracker.cancel().await, Err(Error::Validation(_))));

        tracker.attach("locked").await.unwrap();
        let err = tracker.cancel().await.unwrap_err();
        assert!(matches!(err, Error::Api(_)));
        let failed = wait_planner(&mut state, |s| {
            s.error.as_deref() == Some("Session already finished")
        })
        .await;
        assert!(!failed.cancel_requested);

        tracker.close().await;
        conn.close().await;
    }

    #[tokio::test]
    async fn test_attach_and_cancel_on_fresh_tracker() {
        let base = serve(router()).await;
        let (transport, _servers) = MockTransport::new();
        let manager = ConnectionManager::new(transport, fast_options());
        let conn = Arc::new(manager.open(Namespace::Planner, Arc::new(ScriptedTokens::new("t"))));

        let tracker = PlannerTracker::new(api(&base), conn.clone());
        let snapshot = tracker.attach("s7").await.unwrap();
        assert_eq!(snapshot.id, "s7");
        tracker.close().await;

        let tracker = PlannerTracker::new(api(&base), conn.clone());
        let id = tracker
            .start(&PlannerDraft {
                destination: "Goa".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(id, "s1");
        tracker.cancel().await.unwrap();

        // Attaching elsewhere refreshes the new session, not the old one.
        let snapshot = tracker.attach("s9").await.unwrap();
        assert_eq!(snapshot.id, "s9");

        tracker.leave().unwrap();
        assert!(matches!(tracker.cancel().await, Err(Error::Validation(_))));

        tracker.close().await;
        conn.close().await;
    }

    #[test]
    fn test_failure_message_fallback() {
        let e = Error::Closed;
        assert_eq!(failure_message(&e, REFRESH_FAILED), REFRESH_FAILED);
    }
}
