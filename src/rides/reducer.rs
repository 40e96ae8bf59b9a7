//! Pure fold of ride inputs into the local ride view.
//!
//! [`RideState::apply`] never performs I/O. Work that has to happen outside
//! the fold (refetching history, telling the user something) is returned as
//! [`RideEffect`]s for the tracker to carry out.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, warn};

use super::countdown::PendingRequest;
use super::event::{QuoteKind, RatedNotice, RideEvent};
use super::model::{RideRole, RideSession, RideStatus};

pub const DEFAULT_RIDE_ERROR: &str = "Ride operation failed.";
pub const REQUEST_EXPIRED: &str =
    "No driver accepted in time. Please try again or adjust pickup location.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Something the user should be told about right away.
#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    /// Traveler: a driver quoted a fare.
    QuoteReceived { ride_id: String, label: Option<String> },
    /// Traveler: a driver took the request and is preparing a quote.
    DriverAssigned { ride_id: String },
    /// Both roles: the quote was accepted.
    QuoteAccepted { ride_id: String },
    OtpReady { ride_id: Option<String> },
    /// Driver: a new request in the driver's city.
    IncomingRequest { ride_id: String, pickup: String },
    /// Driver: the ride is waiting for a fare quote.
    QuoteNeeded { ride_id: String },
    RequestExpired { ride_id: String },
    /// Traveler: prompt for a rating. Driver: trip summary.
    RideCompleted { ride_id: String },
    RatingReceived {
        traveler_name: Option<String>,
        stars: Option<u32>,
    },
    RideError(String),
}

impl Alert {
    pub fn level(&self) -> AlertLevel {
        match self {
            Alert::QuoteReceived { .. }
            | Alert::DriverAssigned { .. }
            | Alert::OtpReady { .. }
            | Alert::IncomingRequest { .. }
            | Alert::QuoteNeeded { .. }
            | Alert::RatingReceived { .. } => AlertLevel::Info,
            Alert::QuoteAccepted { .. } | Alert::RideCompleted { .. } => AlertLevel::Success,
            Alert::RequestExpired { .. } => AlertLevel::Warning,
            Alert::RideError(_) => AlertLevel::Error,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Alert::QuoteReceived { .. } => "Fare quote",
            Alert::DriverAssigned { .. } => "Driver found",
            Alert::QuoteAccepted { .. } => "Quote accepted",
            Alert::OtpReady { .. } => "Pickup OTP",
            Alert::IncomingRequest { .. } => "New ride request",
            Alert::QuoteNeeded { .. } => "Ride accepted",
            Alert::RequestExpired { .. } => "Ride request expired",
            Alert::RideCompleted { .. } => "Ride completed",
            Alert::RatingReceived { .. } => "New rating",
            Alert::RideError(_) => "Ride error",
        }
    }

    pub fn message(&self, role: RideRole) -> String {
        match self {
            Alert::QuoteReceived { label, .. } => match label {
                Some(label) => format!("Driver quoted {}.", label),
                None => "Driver sent a fare quote.".to_string(),
            },
            Alert::DriverAssigned { .. } => {
                "A driver accepted your request and is preparing a quote.".to_string()
            }
            Alert::QuoteAccepted { .. } => match role {
                RideRole::Traveler => "Quote accepted. Waiting for driver to start ride.".to_string(),
                RideRole::Driver => "Traveler accepted your quote. Start the ride now.".to_string(),
            },
            Alert::OtpReady { .. } => {
                "Your trip OTP is ready. Share it with driver at pickup.".to_string()
            }
            Alert::IncomingRequest { pickup, .. } => format!("Pickup at {}.", pickup),
            Alert::QuoteNeeded { .. } => "Prepare and submit a fare quote.".to_string(),
            Alert::RequestExpired { .. } => REQUEST_EXPIRED.to_string(),
            Alert::RideCompleted { .. } => match role {
                RideRole::Traveler => "You have arrived. Please rate your ride.".to_string(),
                RideRole::Driver => "Trip completed.".to_string(),
            },
            Alert::RatingReceived {
                traveler_name,
                stars,
            } => {
                let who = traveler_name.as_deref().unwrap_or("A traveler");
                match stars {
                    Some(stars) => format!("{} rated the ride {}/5.", who, stars),
                    None => format!("{} rated the ride.", who),
                }
            }
            Alert::RideError(message) => message.clone(),
        }
    }
}

/// Work requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum RideEffect {
    /// History is only ever replaced wholesale from REST.
    RefetchHistory,
    Alert(Alert),
}

/// Inputs folded by the reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum RideMsg {
    Push(RideEvent),
    HistoryLoaded(Vec<RideSession>),
    /// A history refetch failed; the previous list stays.
    HistoryFailed(String),
    /// The traveler just emitted `traveler:request_ride`.
    RequestSent,
    /// Once-per-second countdown tick.
    Tick,
    /// `POST /rides/:id/end` succeeded.
    RideEnded(RideSession),
    /// `POST /rides/:id/rating` succeeded.
    RideRated(String),
    /// Driver: hide an incoming request without answering it.
    DismissRequest(String),
    ClearError,
}

/// The pickup code the traveler shares with the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripOtp {
    pub ride_id: Option<String>,
    pub otp: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RideState {
    pub role: RideRole,
    pub current: Option<RideSession>,
    pub history: Vec<RideSession>,
    /// Driver only, newest first.
    pub incoming: Vec<RideSession>,
    pub pending: Option<PendingRequest>,
    pub seconds_left: u64,
    pub trip_otp: Option<TripOtp>,
    pub online_drivers: u32,
    /// Ride id the traveler should rate.
    pub rating_prompt: Option<String>,
    /// Ride id the driver has already been asked to quote.
    pub quote_prompted: Option<String>,
    pub last_rating: Option<RatedNotice>,
    /// Latest domain error; connection and location problems are tracked
    /// separately.
    pub error: Option<String>,
    /// Last failed history refresh, cleared by the next successful one.
    pub sync_error: Option<String>,
    request_window: Duration,
}

impl RideState {
    pub fn new(role: RideRole, request_window: Duration) -> Self {
        Self {
            role,
            current: None,
            history: Vec::new(),
            incoming: Vec::new(),
            pending: None,
            seconds_left: 0,
            trip_otp: None,
            online_drivers: 0,
            rating_prompt: None,
            quote_prompted: None,
            last_rating: None,
            error: None,
            sync_error: None,
            request_window,
        }
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_ref().map(|ride| ride.id.as_str())
    }

    pub fn request_window(&self) -> Duration {
        self.request_window
    }

    /// Fold one input observed at `now`.
    pub fn apply(&mut self, msg: RideMsg, now: DateTime<Utc>) -> Vec<RideEffect> {
        match msg {
            RideMsg::Push(event) => self.on_event(event, now),
            RideMsg::HistoryLoaded(rides) => {
                self.sync_error = None;
                self.on_history(rides);
                Vec::new()
            }
            RideMsg::HistoryFailed(message) => {
                self.sync_error = Some(message);
                Vec::new()
            }
            RideMsg::RequestSent => {
                self.start_pending(now);
                self.error = None;
                Vec::new()
            }
            RideMsg::Tick => {
                self.tick(now);
                Vec::new()
            }
            RideMsg::RideEnded(ride) => {
                if self.current_id() == Some(ride.id.as_str()) {
                    self.current = None;
                }
                self.upsert_history(ride);
                Vec::new()
            }
            RideMsg::RideRated(ride_id) => {
                if self.rating_prompt.as_deref() == Some(ride_id.as_str()) {
                    self.rating_prompt = None;
                }
                vec![RideEffect::RefetchHistory]
            }
            RideMsg::DismissRequest(ride_id) => {
                self.incoming.retain(|ride| ride.id != ride_id);
                Vec::new()
            }
            RideMsg::ClearError => {
                self.error = None;
                Vec::new()
            }
        }
    }

    fn on_event(&mut self, event: RideEvent, now: DateTime<Utc>) -> Vec<RideEffect> {
        match event {
            RideEvent::RequestReceived(ride) => self.on_request(ride),
            RideEvent::StatusChanged(ride) => self.on_status(ride, now),
            RideEvent::Completed(ride) => {
                let ride_id = ride.id.clone();
                let mut effects = self.on_status(ride, now);
                if self.role == RideRole::Driver {
                    effects.push(RideEffect::Alert(Alert::RideCompleted { ride_id }));
                }
                effects
            }
            RideEvent::Quote { kind, ride } => self.on_quote(kind, ride),
            RideEvent::LocationUpdated {
                ride_id,
                driver_location,
            } => {
                match self.current.as_mut() {
                    Some(current) if current.id == ride_id => {
                        current.driver_location = driver_location;
                    }
                    _ => debug!(ride_id = %ride_id, "Dropping location for another ride"),
                }
                Vec::new()
            }
            RideEvent::EtaUpdated {
                ride_id,
                eta_minutes,
            } => {
                match self.current.as_mut() {
                    Some(current) if current.id == ride_id => current.eta_minutes = eta_minutes,
                    _ => debug!(ride_id = %ride_id, "Dropping ETA for another ride"),
                }
                Vec::new()
            }
            RideEvent::Error { message, .. } => {
                self.clear_pending();
                let message = message.unwrap_or_else(|| DEFAULT_RIDE_ERROR.to_string());
                self.error = Some(message.clone());
                vec![RideEffect::Alert(Alert::RideError(message))]
            }
            RideEvent::OtpGenerated { ride_id, otp } => {
                if self.role != RideRole::Traveler {
                    return Vec::new();
                }
                self.trip_otp = Some(TripOtp {
                    ride_id: ride_id.clone(),
                    otp,
                });
                vec![RideEffect::Alert(Alert::OtpReady { ride_id })]
            }
            RideEvent::Rated(notice) => {
                if self.role != RideRole::Driver {
                    return Vec::new();
                }
                let alert = Alert::RatingReceived {
                    traveler_name: notice.traveler_name.clone(),
                    stars: notice.rating.as_ref().and_then(|r| r.stars),
                };
                self.last_rating = Some(notice);
                vec![RideEffect::Alert(alert)]
            }
            RideEvent::DriverCount(count) => {
                self.online_drivers = count;
                Vec::new()
            }
        }
    }

    fn on_request(&mut self, ride: RideSession) -> Vec<RideEffect> {
        if self.role != RideRole::Driver {
            debug!(ride_id = %ride.id, "Ignoring request broadcast for a traveler");
            return Vec::new();
        }
        let alert = Alert::IncomingRequest {
            ride_id: ride.id.clone(),
            pickup: ride.source.as_ref().map(|p| p.label()).unwrap_or_else(|| "-".to_string()),
        };
        self.incoming.retain(|existing| existing.id != ride.id);
        self.incoming.insert(0, ride);
        vec![RideEffect::Alert(alert)]
    }

    fn on_status(&mut self, ride: RideSession, now: DateTime<Utc>) -> Vec<RideEffect> {
        let mut effects = Vec::new();
        let status = ride.status;
        let ride_id = ride.id.clone();

        if let Some(current) = &self.current {
            if current.id == ride.id && !current.status.can_transition(status) {
                warn!(
                    ride_id = %ride.id,
                    from = %current.status,
                    to = %status,
                    "Unexpected ride transition"
                );
            }
        }

        if self.role == RideRole::Driver {
            self.error = None;
            self.incoming.retain(|existing| existing.id != ride.id);
        }

        if status.is_active() {
            if self.role == RideRole::Driver
                && status == RideStatus::AcceptedPendingQuote
                && self.quote_prompted.as_deref() != Some(ride.id.as_str())
            {
                self.quote_prompted = Some(ride.id.clone());
                effects.push(RideEffect::Alert(Alert::QuoteNeeded {
                    ride_id: ride_id.clone(),
                }));
            }
            if self.role == RideRole::Traveler {
                match status {
                    RideStatus::QuoteAccepted => {
                        if let Some(otp) = ride.start_otp.clone().filter(|o| !o.is_empty()) {
                            self.trip_otp = Some(TripOtp {
                                ride_id: Some(ride_id.clone()),
                                otp,
                            });
                        }
                    }
                    RideStatus::InProgress => self.trip_otp = None,
                    _ => {}
                }
            }
            self.current = Some(ride);
        } else {
            if self.current_id() == Some(ride_id.as_str()) {
                self.current = None;
            }
            if status.is_terminal() {
                self.upsert_history(ride);
            }
        }

        if self.role == RideRole::Traveler {
            if status == RideStatus::Requested {
                let started = self
                    .current
                    .as_ref()
                    .and_then(|r| r.created_at)
                    .unwrap_or(now);
                self.pending = Some(PendingRequest::new(started, self.request_window));
                self.seconds_left = self.pending.map(|p| p.seconds_left(now)).unwrap_or(0);
            } else {
                self.clear_pending();
            }

            match status {
                RideStatus::Expired => {
                    self.error = Some(REQUEST_EXPIRED.to_string());
                    effects.push(RideEffect::Alert(Alert::RequestExpired {
                        ride_id: ride_id.clone(),
                    }));
                }
                RideStatus::Completed => {
                    self.trip_otp = None;
                    self.rating_prompt = Some(ride_id.clone());
                    effects.push(RideEffect::Alert(Alert::RideCompleted { ride_id }));
                }
                _ => {}
            }
        }

        effects.insert(0, RideEffect::RefetchHistory);
        effects
    }

    fn on_quote(&mut self, kind: QuoteKind, ride: RideSession) -> Vec<RideEffect> {
        let mut effects = Vec::new();
        let ride_id = ride.id.clone();

        match self.role {
            RideRole::Traveler => {
                if ride.status != RideStatus::Requested {
                    self.clear_pending();
                }
                match ride.status {
                    RideStatus::QuoteSent => effects.push(RideEffect::Alert(Alert::QuoteReceived {
                        ride_id,
                        label: ride.quote_label(),
                    })),
                    RideStatus::QuoteAccepted => {
                        if let Some(otp) = ride.start_otp.clone().filter(|o| !o.is_empty()) {
                            self.trip_otp = Some(TripOtp {
                                ride_id: Some(ride_id.clone()),
                                otp,
                            });
                        }
                        effects.push(RideEffect::Alert(Alert::QuoteAccepted { ride_id }));
                    }
                    RideStatus::AcceptedPendingQuote if kind == QuoteKind::Accepted => {
                        effects.push(RideEffect::Alert(Alert::DriverAssigned { ride_id }))
                    }
                    _ => {}
                }
            }
            RideRole::Driver => {
                if kind == QuoteKind::QuoteAccepted {
                    effects.push(RideEffect::Alert(Alert::QuoteAccepted { ride_id }));
                }
            }
        }

        self.current = Some(ride);
        effects
    }

    /// Replace history; adopt an active ride when nothing is current and
    /// drop a current ride the server now reports as finished.
    fn on_history(&mut self, rides: Vec<RideSession>) {
        match &self.current {
            None => {
                self.current = rides.iter().find(|r| r.is_active()).cloned();
            }
            Some(current) => {
                let finished = rides
                    .iter()
                    .any(|r| r.id == current.id && r.status.is_terminal());
                if finished {
                    self.current = None;
                }
            }
        }
        self.history = rides;
    }

    fn upsert_history(&mut self, ride: RideSession) {
        self.history.retain(|existing| existing.id != ride.id);
        self.history.insert(0, ride);
    }

    fn start_pending(&mut self, now: DateTime<Utc>) {
        let pending = PendingRequest::new(now, self.request_window);
        self.seconds_left = pending.seconds_left(now);
        self.pending = Some(pending);
    }

    fn tick(&mut self, now: DateTime<Utc>) {
        if let Some(pending) = self.pending {
            self.seconds_left = pending.seconds_left(now);
            if self.seconds_left == 0 {
                self.pending = None;
            }
        }
    }

    fn clear_pending(&mut self) {
        self.pending = None;
        self.seconds_left = 0;
    }
}
