use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::utils::{lenient_string, lenient_timestamp, lenient_u32};

pub const DEFAULT_ORIGIN: &str = "India";
pub const DEFAULT_TRIP_DAYS: u32 = 3;
pub const MAX_TRAVELERS: u32 = 20;
pub const MAX_TRIP_DAYS: u32 = 30;

const DATE_FMT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlannerStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl PlannerStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PlannerStatus::Completed | PlannerStatus::Failed | PlannerStatus::Cancelled
        )
    }

    /// Parse a status reported by the server. Anything that is not a session
    /// status (progress events report per-stage values such as `DONE`) yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "QUEUED" => Some(PlannerStatus::Queued),
            "RUNNING" => Some(PlannerStatus::Running),
            "COMPLETED" => Some(PlannerStatus::Completed),
            "FAILED" => Some(PlannerStatus::Failed),
            "CANCELLED" => Some(PlannerStatus::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlannerStatus::Queued => "QUEUED",
            PlannerStatus::Running => "RUNNING",
            PlannerStatus::Completed => "COMPLETED",
            PlannerStatus::Failed => "FAILED",
            PlannerStatus::Cancelled => "CANCELLED",
            PlannerStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for PlannerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Budget {
    Budget,
    #[default]
    MidRange,
    Luxury,
}

impl FromStr for Budget {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "" | "MID_RANGE" => Ok(Budget::MidRange),
            "BUDGET" => Ok(Budget::Budget),
            "LUXURY" => Ok(Budget::Luxury),
            _ => Err(ValidationError::new(
                "budget must be one of: BUDGET, LUXURY, MID_RANGE.",
            )),
        }
    }
}

impl fmt::Display for Budget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Budget::Budget => "Budget",
            Budget::MidRange => "Mid-range",
            Budget::Luxury => "Luxury",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportMode {
    Flight,
    Train,
}

impl FromStr for TransportMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FLIGHT" => Ok(TransportMode::Flight),
            "TRAIN" => Ok(TransportMode::Train),
            _ => Err(ValidationError::new(
                "transport_modes may contain only: FLIGHT, TRAIN.",
            )),
        }
    }
}

/// Trip parameters as entered by the traveler, before validation.
#[derive(Debug, Clone, Default)]
pub struct PlannerDraft {
    pub origin: Option<String>,
    pub destination: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub trip_days: Option<u32>,
    pub travelers: Option<u32>,
    pub budget: Option<String>,
    pub interests: Option<String>,
    pub transport_modes: Vec<String>,
    pub notes: Option<String>,
}

/// Validated trip parameters. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerInput {
    pub origin: String,
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    pub trip_days: u32,
    pub travelers: u32,
    #[serde(default)]
    pub budget: Budget,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub transport_modes: Vec<TransportMode>,
    #[serde(default)]
    pub notes: String,
}

fn parse_date(field: &str, raw: Option<&str>) -> Result<Option<NaiveDate>, ValidationError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, DATE_FMT)
            .map(Some)
            .map_err(|_| ValidationError::new(format!("{} must be in YYYY-MM-DD format.", field))),
    }
}

/// Split comma-separated interests, dropping blanks.
pub fn parse_interests(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl PlannerDraft {
    /// Normalize and validate the draft the same way the server will.
    pub fn validate(&self) -> Result<PlannerInput, ValidationError> {
        let destination = self.destination.trim();
        if destination.is_empty() {
            return Err(ValidationError::new("Destination is required."));
        }
        let origin = self
            .origin
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_ORIGIN);

        let start = parse_date("start_date", self.start_date.as_deref())?;
        let end = parse_date("end_date", self.end_date.as_deref())?;
        if let (Some(start), Some(end)) = (start, end) {
            if end < start {
                return Err(ValidationError::new(
                    "end_date must be on or after start_date.",
                ));
            }
        }

        let travelers = self.travelers.unwrap_or(1);
        if !(1..=MAX_TRAVELERS).contains(&travelers) {
            return Err(ValidationError::new("travelers must be between 1 and 20."));
        }

        let budget: Budget = self.budget.as_deref().unwrap_or("").parse()?;

        let mut transport_modes = Vec::new();
        for raw in self.transport_modes.iter().filter(|m| !m.trim().is_empty()) {
            let mode: TransportMode = raw.parse()?;
            if !transport_modes.contains(&mode) {
                transport_modes.push(mode);
            }
        }
        if transport_modes.is_empty() {
            transport_modes = vec![TransportMode::Flight, TransportMode::Train];
        }

        let trip_days = match (self.trip_days, start, end) {
            (Some(days), _, _) => days,
            (None, Some(start), Some(end)) => ((end - start).num_days() + 1).max(1) as u32,
            _ => DEFAULT_TRIP_DAYS,
        };
        if !(1..=MAX_TRIP_DAYS).contains(&trip_days) {
            return Err(ValidationError::new("trip_days must be between 1 and 30."));
        }

        Ok(PlannerInput {
            origin: origin.to_string(),
            destination: destination.to_string(),
            start_date: start,
            end_date: end,
            trip_days,
            travelers,
            budget,
            interests: self
                .interests
                .as_deref()
                .map(parse_interests)
                .unwrap_or_default(),
            transport_modes,
            notes: self.notes.as_deref().unwrap_or("").trim().to_string(),
        })
    }
}

/// One staged progress entry, as displayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    #[serde(default)]
    pub stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl ProgressEntry {
    /// Friendly label for the orchestrator's known stages.
    pub fn stage_label(&self) -> &str {
        match self.stage.as_str() {
            "validate_input" => "Validate Input",
            "rag_retrieve" => "Retrieve RAG Context",
            "transport_lookup" => "Search Flights/Trains",
            "plan_synthesis_stream" => "Generate Plan",
            "persist_results" => "Save Draft Itinerary",
            other => other,
        }
    }
}

/// Local view of one planning job.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannerSession {
    pub id: String,
    pub status: PlannerStatus,
    pub input: Option<PlannerInput>,
    pub stream_text: String,
    pub events: Vec<ProgressEntry>,
    pub result: Option<Value>,
    /// Failure reported by the server.
    pub error: Option<String>,
}

impl PlannerSession {
    pub fn new(id: impl Into<String>, input: Option<PlannerInput>) -> Self {
        Self {
            id: id.into(),
            status: PlannerStatus::Queued,
            input,
            stream_text: String::new(),
            events: Vec::new(),
            result: None,
            error: None,
        }
    }

    /// Progress entries ordered by `elapsed_ms`, ties kept in arrival order.
    pub fn sorted_events(&self) -> Vec<ProgressEntry> {
        let mut events = self.events.clone();
        events.sort_by_key(|e| e.elapsed_ms);
        events
    }
}

/// One row of the session's persisted event history.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SnapshotEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub stage: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub elapsed_ms: Option<u32>,
}

impl SnapshotEvent {
    pub fn to_progress(&self) -> Option<ProgressEntry> {
        if self.kind != "progress" {
            return None;
        }
        Some(ProgressEntry {
            stage: self.stage.clone().unwrap_or_default(),
            status: self.status.clone(),
            message: self.message.clone().unwrap_or_default(),
            elapsed_ms: self.elapsed_ms.map(u64::from).unwrap_or(0),
        })
    }
}

/// `GET /ai/planner/sessions/:id` payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PlannerSnapshot {
    #[serde(default)]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default)]
    pub stream_text: Option<String>,
    #[serde(default)]
    pub result_json: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub events: Vec<SnapshotEvent>,
}

impl PlannerSnapshot {
    pub fn status(&self) -> Option<PlannerStatus> {
        self.status.as_deref().and_then(PlannerStatus::parse)
    }

    pub fn progress(&self) -> Vec<ProgressEntry> {
        self.events.iter().filter_map(SnapshotEvent::to_progress).collect()
    }

    pub fn error_message(&self) -> Option<String> {
        match self.error.as_ref()? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Object(obj) => obj
                .get("message")
                .and_then(Value::as_str)
                .map(String::from),
            _ => None,
        }
    }
}

/// Summary row returned by session creation and listing.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

impl SessionSummary {
    pub fn destination(&self) -> Option<&str> {
        self.input.as_ref()?.get("destination")?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft(destination: &str) -> PlannerDraft {
        PlannerDraft {
            destination: destination.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let input = draft(" Goa ").validate().unwrap();
        assert_eq!(input.origin, "India");
        assert_eq!(input.destination, "Goa");
        assert_eq!(input.trip_days, 3);
        assert_eq!(input.travelers, 1);
        assert_eq!(input.budget, Budget::MidRange);
        assert_eq!(
            input.transport_modes,
            vec![TransportMode::Flight, TransportMode::Train]
        );
    }

    #[test]
    fn test_destination_required() {
        let err = draft("   ").validate().unwrap_err();
        assert_eq!(err.to_string(), "Destination is required.");
    }

    #[test]
    fn test_dates() {
        let mut d = draft("Goa");
        d.start_date = Some("2025-05-01".into());
        d.end_date = Some("2025-05-04".into());
        assert_eq!(d.validate().unwrap().trip_days, 4);

        d.end_date = Some("2025-04-30".into());
        assert!(d.validate().is_err());

        d.end_date = Some("05/04/2025".into());
        let err = d.validate().unwrap_err();
        assert!(err.to_string().contains("end_date"));
    }

    #[test]
    fn test_ranges() {
        let mut d = draft("Goa");
        d.travelers = Some(21);
        assert!(d.validate().is_err());
        d.travelers = Some(20);
        d.trip_days = Some(31);
        assert!(d.validate().is_err());
        d.trip_days = Some(0);
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_budget_and_modes() {
        let mut d = draft("Goa");
        d.budget = Some("mid-range".into());
        d.transport_modes = vec!["train".into(), "TRAIN".into()];
        let input = d.validate().unwrap();
        assert_eq!(input.budget, Budget::MidRange);
        assert_eq!(input.transport_modes, vec![TransportMode::Train]);

        d.budget = Some("shoestring".into());
        assert!(d.validate().is_err());

        d.budget = None;
        d.transport_modes = vec!["BUS".into()];
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_parse_interests() {
        assert_eq!(
            parse_interests(" beaches, , food ,nightlife"),
            vec!["beaches", "food", "nightlife"]
        );
        assert!(parse_interests("").is_empty());
    }

    #[test]
    fn test_input_wire_format() {
        let input = draft("Goa").validate().unwrap();
        let value = serde_json::to_value(&input).unwrap();
        assert_eq!(value["budget"], "MID_RANGE");
        assert_eq!(value["transport_modes"], json!(["FLIGHT", "TRAIN"]));
        assert!(value.get("start_date").is_none());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(PlannerStatus::parse("running"), Some(PlannerStatus::Running));
        assert_eq!(PlannerStatus::parse("DONE"), None);
        assert!(PlannerStatus::Cancelled.is_terminal());
        assert!(!PlannerStatus::Running.is_terminal());
    }

    #[test]
    fn test_sorted_events_is_stable() {
        let mut session = PlannerSession::new("s1", None);
        for (stage, ms) in [("b", 500), ("a", 200), ("c", 200)] {
            session.events.push(ProgressEntry {
                stage: stage.into(),
                status: None,
                message: String::new(),
                elapsed_ms: ms,
            });
        }
        let stages: Vec<_> = session
            .sorted_events()
            .into_iter()
            .map(|e| e.stage)
            .collect();
        assert_eq!(stages, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_snapshot_progress_filter() {
        let snapshot: PlannerSnapshot = serde_json::from_value(json!({
            "id": "s1",
            "status": "RUNNING",
            "stream_text": "Day 1",
            "error": {"message": "boom"},
            "events": [
                {"type": "progress", "stage": "rag_retrieve", "status": "DONE", "elapsed_ms": 120},
                {"type": "token", "chunk": "Day"},
                {"type": "status", "status": "CANCELLED"}
            ]
        }))
        .unwrap();
        assert_eq!(snapshot.status(), Some(PlannerStatus::Running));
        let progress = snapshot.progress();
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].stage_label(), "Retrieve RAG Context");
        assert_eq!(snapshot.error_message().as_deref(), Some("boom"));
    }
}
