//! Pure fold of planner inputs into the local session view.
//!
//! Pushes for any id other than the active session are ignored, and once a
//! session reaches a terminal status no push can change it. A REST snapshot
//! replaces the view wholesale, except that a snapshot still reporting a
//! non-terminal status never reopens a session already seen to finish.

use tracing::{debug, warn};

use super::event::{PlannerEvent, PlannerEventKind};
use super::model::{PlannerSession, PlannerSnapshot, PlannerStatus};

/// Room changes requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannerEffect {
    Subscribe(String),
    Unsubscribe(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlannerMsg {
    /// A session was created (or attached to) and becomes the active one.
    Started(PlannerSession),
    Push(PlannerEvent),
    Snapshot(PlannerSnapshot),
    /// The cancel request was accepted by the server.
    CancelRequested,
    /// A REST call failed; the message is shown as-is.
    RequestFailed(String),
    /// Stop following the active session.
    Left,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlannerState {
    pub session: Option<PlannerSession>,
    /// Cancel was sent; the session is not CANCELLED until the server says so.
    pub cancel_requested: bool,
    /// Latest failed REST call (start, refresh, cancel).
    pub error: Option<String>,
}

impl PlannerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    pub fn status(&self) -> Option<PlannerStatus> {
        self.session.as_ref().map(|s| s.status)
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_some_and(PlannerStatus::is_terminal)
    }

    /// Status for display, with a pending cancel shown optimistically.
    pub fn display_status(&self) -> Option<String> {
        let status = self.status()?;
        if self.cancel_requested && !status.is_terminal() {
            return Some("CANCELLING".to_string());
        }
        Some(status.to_string())
    }

    pub fn apply(&mut self, msg: PlannerMsg) -> Vec<PlannerEffect> {
        match msg {
            PlannerMsg::Started(session) => {
                let mut effects = Vec::new();
                if let Some(old) = self.session_id() {
                    if old != session.id {
                        effects.push(PlannerEffect::Unsubscribe(old.to_string()));
                    }
                }
                if self.session_id() != Some(session.id.as_str()) {
                    effects.push(PlannerEffect::Subscribe(session.id.clone()));
                }
                self.session = Some(session);
                self.cancel_requested = false;
                self.error = None;
                effects
            }
            PlannerMsg::Push(event) => {
                self.on_event(event);
                Vec::new()
            }
            PlannerMsg::Snapshot(snapshot) => {
                self.on_snapshot(snapshot);
                Vec::new()
            }
            PlannerMsg::CancelRequested => {
                if !self.is_terminal() && self.session.is_some() {
                    self.cancel_requested = true;
                }
                self.error = None;
                Vec::new()
            }
            PlannerMsg::RequestFailed(message) => {
                self.error = Some(message);
                Vec::new()
            }
            PlannerMsg::Left => {
                self.cancel_requested = false;
                match self.session.take() {
                    Some(session) => vec![PlannerEffect::Unsubscribe(session.id)],
                    None => Vec::new(),
                }
            }
        }
    }

    fn on_event(&mut self, event: PlannerEvent) {
        let Some(session) = self.session.as_mut() else {
            debug!(session_id = %event.session_id, "No active planner session");
            return;
        };
        if session.id != event.session_id {
            debug!(session_id = %event.session_id, active = %session.id, "Ignoring event for another session");
            return;
        }
        if session.status.is_terminal() {
            debug!(session_id = %session.id, status = %session.status, "Session already finished");
            return;
        }

        match event.kind {
            PlannerEventKind::Progress(entry) => {
                session.status = entry
                    .status
                    .as_deref()
                    .and_then(PlannerStatus::parse)
                    .unwrap_or(PlannerStatus::Running);
                session.events.push(entry);
            }
            PlannerEventKind::Token(chunk) => {
                if !chunk.is_empty() {
                    session.stream_text.push_str(&chunk);
                }
            }
            PlannerEventKind::Complete { status, result } => {
                session.status = status.unwrap_or(PlannerStatus::Completed);
                session.result = result;
            }
            PlannerEventKind::Error { status, message } => {
                session.status = status.unwrap_or(PlannerStatus::Failed);
                session.error = Some(message);
            }
            PlannerEventKind::Cancelled => {
                session.status = PlannerStatus::Cancelled;
            }
        }

        if session.status.is_terminal() {
            self.cancel_requested = false;
        }
    }

    fn on_snapshot(&mut self, snapshot: PlannerSnapshot) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !snapshot.id.is_empty() && snapshot.id != session.id {
            debug!(session_id = %snapshot.id, active = %session.id, "Ignoring snapshot for another session");
            return;
        }

        let status = snapshot.status();
        if session.status.is_terminal() && !status.is_some_and(PlannerStatus::is_terminal) {
            warn!(
                session_id = %session.id,
                local = %session.status,
                remote = ?snapshot.status,
                "Ignoring stale snapshot"
            );
            return;
        }

        if let Some(status) = status {
            session.status = status;
        }
        session.stream_text = snapshot.stream_text.clone().unwrap_or_default();
        session.result = snapshot.result_json.clone();
        session.events = snapshot.progress();
        session.error = snapshot.error_message();

        if session.status.is_terminal() {
            self.cancel_requested = false;
        }
        self.error = None;
    }
}
