//! Live ride session for one traveler or driver.
//!
//! A [`RideTracker`] owns a single event loop that folds `/rides` pushes,
//! REST results and countdown ticks through [`RideState::apply`], one input
//! at a time. REST calls run outside the loop and report back as messages,
//! so pushes keep flowing while a request is in flight. Results arriving
//! after the tracker is closed are dropped.

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::countdown::DEFAULT_REQUEST_WINDOW;
use super::event::RideEvent;
use super::geolocation::LocationSource;
use super::model::{GeoPoint, Place, RideRole, RideSession, RideStatus};
use super::presence::DriverPresence;
use super::reducer::{Alert, RideEffect, RideMsg, RideState};
use crate::api::rides::{GeocodeRequest, LocationQuery, RatingRequest, ResolvedRoute};
use crate::api::ApiClient;
use crate::error::{Error, Result, ValidationError};
use crate::socket::{Connection, ConnectionState, SocketEvent};

const ALERT_BUFFER: usize = 64;
pub const DEFAULT_CURRENCY: &str = "INR";

#[derive(Debug, Clone)]
pub struct RideTrackerOptions {
    /// City announced to the server for driver-pool partitioning.
    pub city: String,
    pub currency: String,
    pub request_window: Duration,
}

impl Default for RideTrackerOptions {
    fn default() -> Self {
        Self {
            city: String::new(),
            currency: DEFAULT_CURRENCY.to_string(),
            request_window: DEFAULT_REQUEST_WINDOW,
        }
    }
}

/// What the traveler typed (or where they are) before geocoding.
#[derive(Debug, Clone, Default)]
pub struct RideRequest {
    pub source: Option<String>,
    pub destination: String,
    /// Use this device position as pickup instead of `source`.
    pub current_location: Option<GeoPoint>,
}

#[derive(Serialize)]
struct RideIdPayload<'a> {
    ride_id: &'a str,
}

#[derive(Serialize)]
struct CityPayload<'a> {
    city: &'a str,
}

#[derive(Serialize)]
struct RequestRidePayload<'a> {
    source: &'a Place,
    destination: &'a Place,
    use_current_location: bool,
}

#[derive(Serialize)]
struct QuotePayload<'a> {
    ride_id: &'a str,
    price: f64,
    currency: &'a str,
    note: &'a str,
}

#[derive(Serialize)]
struct StartRidePayload<'a> {
    ride_id: &'a str,
    otp: &'a str,
}

pub struct RideTracker {
    role: RideRole,
    api: ApiClient,
    conn: Arc<Connection>,
    currency: String,
    city: Arc<RwLock<String>>,
    inbox: mpsc::UnboundedSender<RideMsg>,
    state: watch::Receiver<RideState>,
    alerts: broadcast::Sender<Alert>,
    presence: Option<Arc<DriverPresence>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RideTracker {
    pub fn traveler(api: ApiClient, conn: Arc<Connection>, options: RideTrackerOptions) -> Self {
        Self::spawn(RideRole::Traveler, api, conn, options, None)
    }

    /// Driver tracker; `location` feeds live position while online.
    pub fn driver(
        api: ApiClient,
        conn: Arc<Connection>,
        options: RideTrackerOptions,
        location: Arc<dyn LocationSource>,
    ) -> Self {
        Self::spawn(RideRole::Driver, api, conn, options, Some(location))
    }

    fn spawn(
        role: RideRole,
        api: ApiClient,
        conn: Arc<Connection>,
        options: RideTrackerOptions,
        location: Option<Arc<dyn LocationSource>>,
    ) -> Self {
        let initial = RideState::new(role, options.request_window);
        let (state_tx, state_rx) = watch::channel(initial.clone());
        let (ride_tx, ride_rx) = watch::channel(None);
        let (alerts, _) = broadcast::channel(ALERT_BUFFER);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let city = Arc::new(RwLock::new(options.city.trim().to_string()));
        let cancel = CancellationToken::new();

        let presence = location.map(|source| {
            Arc::new(DriverPresence::new(
                conn.clone(),
                source,
                ride_rx,
                options.city.trim(),
            ))
        });

        let worker = Worker {
            role,
            api: api.clone(),
            conn: conn.clone(),
            state: initial,
            state_tx,
            ride_tx,
            alerts: alerts.clone(),
            inbox: inbox_rx,
            loopback: inbox_tx.clone(),
            city: city.clone(),
            presence: presence.clone(),
            cancel: cancel.clone(),
        };
        info!(role = %role, namespace = %conn.namespace(), "Starting ride tracker");
        let task = tokio::spawn(worker.run());

        Self {
            role,
            api,
            conn,
            currency: options.currency,
            city,
            inbox: inbox_tx,
            state: state_rx,
            alerts,
            presence,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn role(&self) -> RideRole {
        self.role
    }

    pub fn state(&self) -> watch::Receiver<RideState> {
        self.state.clone()
    }

    pub fn snapshot(&self) -> RideState {
        self.state.borrow().clone()
    }

    pub fn alerts(&self) -> broadcast::Receiver<Alert> {
        self.alerts.subscribe()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.conn.state()
    }

    /// Driver availability and location; `None` for travelers.
    pub fn presence(&self) -> Option<&DriverPresence> {
        self.presence.as_deref()
    }

    pub fn city(&self) -> String {
        self.city.read().clone()
    }

    fn send(&self, msg: RideMsg) -> Result<()> {
        self.inbox.send(msg).map_err(|_| Error::Closed)
    }

    fn require_role(&self, role: RideRole) -> Result<()> {
        if self.role != role {
            return Err(ValidationError::new(format!("Only a {} can do this.", role)).into());
        }
        Ok(())
    }

    fn current_ride(&self) -> Result<RideSession> {
        self.state
            .borrow()
            .current
            .clone()
            .ok_or_else(|| ValidationError::new("No active ride.").into())
    }

    /// Reload history from REST and fold it in.
    pub async fn refresh_history(&self) -> Result<Vec<RideSession>> {
        let rides = self.api.rides_for(self.role).await?;
        self.send(RideMsg::HistoryLoaded(rides.clone()))?;
        Ok(rides)
    }

    pub fn clear_error(&self) -> Result<()> {
        self.send(RideMsg::ClearError)
    }

    /// Both roles: `POST /rides/:id/end`, defaulting to the current ride.
    pub async fn end_ride(&self, ride_id: Option<&str>) -> Result<RideSession> {
        let ride_id = match ride_id {
            Some(id) => id.to_string(),
            None => self.current_ride()?.id,
        };
        let ride = self.api.end_ride(&ride_id).await?;
        self.send(RideMsg::RideEnded(ride.clone()))?;
        Ok(ride)
    }

    // -- traveler --

    pub fn set_city(&self, city: &str) -> Result<()> {
        let city = city.trim();
        *self.city.write() = city.to_string();
        match self.role {
            RideRole::Traveler => {
                self.conn.emit("traveler:set_city", &CityPayload { city })?;
            }
            RideRole::Driver => {
                if let Some(presence) = &self.presence {
                    presence.set_city(city)?;
                }
            }
        }
        Ok(())
    }

    /// Geocode the route, then emit `traveler:request_ride` and start the
    /// request countdown.
    pub async fn request_ride(&self, request: &RideRequest) -> Result<ResolvedRoute> {
        self.require_role(RideRole::Traveler)?;
        if self
            .state
            .borrow()
            .current
            .as_ref()
            .is_some_and(RideSession::is_active)
        {
            return Err(ValidationError::new("You already have an active ride.").into());
        }

        let destination = request.destination.trim();
        if destination.is_empty() {
            return Err(ValidationError::new("Destination is required.").into());
        }
        let source = match (request.current_location, request.source.as_deref().map(str::trim)) {
            (Some(point), _) => LocationQuery::point(point.lat, point.lng),
            (None, Some(address)) if !address.is_empty() => LocationQuery::address(address),
            _ => return Err(ValidationError::new("Source is required.").into()),
        };

        let use_current_location = request.current_location.is_some();
        let route = self
            .api
            .resolve_route(&GeocodeRequest {
                source,
                destination: LocationQuery::address(destination),
                use_current_location,
            })
            .await?;

        self.conn.emit(
            "traveler:request_ride",
            &RequestRidePayload {
                source: &route.source,
                destination: &route.destination,
                use_current_location,
            },
        )?;
        self.send(RideMsg::RequestSent)?;
        info!(
            from = %route.source.label(),
            to = %route.destination.label(),
            "Ride requested"
        );
        Ok(route)
    }

    fn quoted_ride(&self) -> Result<RideSession> {
        let ride = self.current_ride()?;
        if ride.status != RideStatus::QuoteSent {
            return Err(ValidationError::new("There is no quote to respond to.").into());
        }
        Ok(ride)
    }

    pub fn accept_quote(&self) -> Result<()> {
        self.require_role(RideRole::Traveler)?;
        let ride = self.quoted_ride()?;
        self.conn
            .emit("traveler:accept_quote", &RideIdPayload { ride_id: &ride.id })?;
        Ok(())
    }

    pub fn reject_quote(&self) -> Result<()> {
        self.require_role(RideRole::Traveler)?;
        let ride = self.quoted_ride()?;
        self.conn
            .emit("traveler:reject_quote", &RideIdPayload { ride_id: &ride.id })?;
        Ok(())
    }

    pub async fn rate_ride(&self, ride_id: &str, stars: u8, message: &str) -> Result<RideSession> {
        self.require_role(RideRole::Traveler)?;
        let ride = self
            .api
            .rate_ride(
                ride_id,
                &RatingRequest {
                    stars,
                    message: message.trim().to_string(),
                },
            )
            .await?;
        self.send(RideMsg::RideRated(ride_id.to_string()))?;
        Ok(ride)
    }

    // -- driver --

    pub fn go_online(&self, online: bool) -> Result<()> {
        self.require_role(RideRole::Driver)?;
        match &self.presence {
            Some(presence) => Ok(presence.set_online(online)?),
            None => Err(Error::Closed),
        }
    }

    pub fn accept_request(&self, ride_id: &str) -> Result<()> {
        self.require_role(RideRole::Driver)?;
        let ride_id = ride_id.trim();
        if ride_id.is_empty() {
            return Err(ValidationError::new("Ride id is required.").into());
        }
        self.conn
            .emit("driver:accept_request", &RideIdPayload { ride_id })?;
        Ok(())
    }

    pub fn dismiss_request(&self, ride_id: &str) -> Result<()> {
        self.send(RideMsg::DismissRequest(ride_id.to_string()))
    }

    pub fn submit_quote(&self, price: f64, note: &str) -> Result<()> {
        self.require_role(RideRole::Driver)?;
        let ride = self.current_ride()?;
        if !price.is_finite() || price <= 0.0 {
            return Err(ValidationError::new("Quote price is required.").into());
        }
        self.conn.emit(
            "driver:submit_quote",
            &QuotePayload {
                ride_id: &ride.id,
                price,
                currency: &self.currency,
                note: note.trim(),
            },
        )?;
        Ok(())
    }

    pub fn start_ride(&self, otp: &str) -> Result<()> {
        self.require_role(RideRole::Driver)?;
        let ride = self.current_ride()?;
        let otp = otp.trim();
        if otp.is_empty() {
            return Err(ValidationError::new("Enter OTP shared by traveler to start ride.").into());
        }
        self.conn
            .emit("driver:start_ride", &StartRidePayload { ride_id: &ride.id, otp })?;
        Ok(())
    }

    /// Stop the event loop and the location watch. The shared connection is
    /// released when the tracker is dropped.
    pub async fn close(&self) {
        self.cancel.cancel();
        if let Some(presence) = &self.presence {
            if presence.is_online() {
                let _ = presence.set_online(false);
            }
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for RideTracker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Worker {
    role: RideRole,
    api: ApiClient,
    conn: Arc<Connection>,
    state: RideState,
    state_tx: watch::Sender<RideState>,
    ride_tx: watch::Sender<Option<String>>,
    alerts: broadcast::Sender<Alert>,
    inbox: mpsc::UnboundedReceiver<RideMsg>,
    loopback: mpsc::UnboundedSender<RideMsg>,
    city: Arc<RwLock<String>>,
    presence: Option<Arc<DriverPresence>>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(mut self) {
        let mut events = self.conn.events();
        let mut conn_state = self.conn.state();
        let mut was_connected = conn_state.borrow().connected;
        if was_connected {
            self.on_connected();
        }
        self.refetch_history();

        let mut ticker = interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

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
                        info!(role = %self.role, "Connection closed, stopping ride tracker");
                        break;
                    }
                },
                changed = conn_state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let connected = conn_state.borrow_and_update().connected;
                    if connected && !was_connected {
                        self.on_connected();
                        self.refetch_history();
                    }
                    was_connected = connected;
                }
                _ = ticker.tick() => {
                    if self.state.pending.is_some() {
                        self.fold(RideMsg::Tick);
                    }
                }
            }
        }
        debug!(role = %self.role, "Ride tracker stopped");
    }

    fn on_push(&mut self, event: SocketEvent) {
        match RideEvent::parse(&event.name, &event.payload) {
            Ok(Some(parsed)) => self.fold(RideMsg::Push(parsed)),
            Ok(None) => debug!(event = %event.name, "Ignoring ride event"),
            Err(e) => warn!(event = %event.name, error = %e, "Malformed ride event"),
        }
    }

    /// The server forgets per-socket city and availability on reconnect.
    fn on_connected(&self) {
        match self.role {
            RideRole::Traveler => {
                // An empty city is sent too so the server drops a stale one.
                let city = self.city.read().clone();
                if let Err(e) = self.conn.emit("traveler:set_city", &CityPayload { city: &city }) {
                    warn!(error = %e, "Could not announce city");
                }
            }
            RideRole::Driver => {
                if let Some(presence) = self.presence.as_ref().filter(|p| p.is_online()) {
                    if let Err(e) = presence.announce() {
                        warn!(error = %e, "Could not re-announce availability");
                    }
                }
            }
        }
    }

    fn fold(&mut self, msg: RideMsg) {
        let effects = self.state.apply(msg, Utc::now());
        self.publish();
        for effect in effects {
            match effect {
                RideEffect::RefetchHistory => self.refetch_history(),
                RideEffect::Alert(alert) => {
                    info!(title = alert.title(), message = %alert.message(self.role), "Ride alert");
                    let _ = self.alerts.send(alert);
                }
            }
        }
    }

    fn publish(&self) {
        let current = self.state.current_id().map(str::to_string);
        self.ride_tx.send_if_modified(|id| {
            if *id != current {
                *id = current;
                true
            } else {
                false
            }
        });
        self.state_tx.send_replace(self.state.clone());
    }

    fn refetch_history(&self) {
        let api = self.api.clone();
        let loopback = self.loopback.clone();
        let role = self.role;
        tokio::spawn(async move {
            let msg = match api.rides_for(role).await {
                Ok(rides) => RideMsg::HistoryLoaded(rides),
                Err(e) => {
                    warn!(role = %role, error = %e, "Ride history refresh failed");
                    RideMsg::HistoryFailed(e.user_message())
                }
            };
            // The tracker may be gone; the result is simply dropped.
            let _ = loopback.send(msg);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::serve;
    use crate::auth::testing::ScriptedTokens;
    use crate::auth::StaticToken;
    use crate::rides::geolocation::testing::ChannelSource;
    use crate::socket::connection::testing::{fast_options, next_server, wait_state, MockTransport, ServerEnd};
    use crate::socket::{ConnectionManager, Namespace};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn api(base: &str) -> ApiClient {
        ApiClient::new(base, Duration::from_secs(5), Arc::new(StaticToken::new("t"))).unwrap()
    }

    fn router(history_calls: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route(
                "/rides/traveler",
                get(move || {
                    let calls = history_calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Json(json!({"data": [{"id": "old", "status": "COMPLETED"}]}))
                    }
                }),
            )
            .route("/rides/driver", get(|| async { Json(json!({"data": []})) }))
            .route(
                "/rides/geocode",
                post(|Json(body): Json<Value>| async move {
                    Json(json!({"data": {
                        "source": {"address": body["source"]["address"], "lat": 18.52, "lng": 73.85},
                        "destination": {"address": body["destination"]["address"], "lat": 18.6, "lng": 73.9}
                    }}))
                }),
            )
    }

    async fn connected(namespace: Namespace) -> (Arc<Connection>, ServerEnd, tokio::sync::mpsc::UnboundedReceiver<ServerEnd>) {
        let (transport, mut servers) = MockTransport::new();
        let manager = ConnectionManager::new(transport, fast_options());
        let conn = Arc::new(manager.open(namespace, Arc::new(ScriptedTokens::new("t"))));
        let mut server = next_server(&mut servers).await;
        server.accept(namespace.path()).await;
        wait_state(&mut conn.state(), |s| s.connected).await;
        (conn, server, servers)
    }

    async fn wait_ride(
        rx: &mut watch::Receiver<RideState>,
        f: impl FnMut(&RideState) -> bool,
    ) -> RideState {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(f))
            .await
            .expect("timed out waiting for ride state")
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn test_traveler_announces_city_and_folds_pushes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let base = serve(router(calls.clone())).await;
        let (conn, mut server, _servers) = connected(Namespace::Rides).await;

        let tracker = RideTracker::traveler(
            api(&base),
            conn,
            RideTrackerOptions {
                city: "Pune".into(),
                ..Default::default()
            },
        );
        let mut alerts = tracker.alerts();
        let mut state = tracker.state();

        assert_eq!(
            server.recv_message().await,
            r#"42/rides,["traveler:set_city",{"city":"Pune"}]"#
        );
        wait_ride(&mut state, |s| !s.history.is_empty()).await;

        server
            .push(
                "/rides",
                "ride:quote_received",
                json!({"ride": {"id": "r1", "status": "QUOTE_SENT", "quoted_price": 250}}),
            )
            .await;
        let quoted = wait_ride(&mut state, |s| s.current.is_some()).await;
        assert_eq!(quoted.current.as_ref().unwrap().quoted_price, Some(250.0));
        let alert = tokio::time::timeout(Duration::from_secs(5), alerts.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alert.title(), "Fare quote");

        tracker.accept_quote().unwrap();
        assert_eq!(
            server.recv_message().await,
            r#"42/rides,["traveler:accept_quote",{"ride_id":"r1"}]"#
        );

        let before = calls.load(Ordering::SeqCst);
        server
            .push(
                "/rides",
                "ride:status_changed",
                json!({"ride": {"id": "r1", "status": "CANCELLED"}}),
            )
            .await;
        wait_ride(&mut state, |s| s.current.is_none()).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while calls.load(Ordering::SeqCst) <= before {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("history was not refetched");

        tracker.close().await;
    }

    #[tokio::test]
    async fn test_request_ride_validation_and_emit() {
        let base = serve(router(Arc::new(AtomicUsize::new(0)))).await;
        let (conn, mut server, _servers) = connected(Namespace::Rides).await;
        let tracker = RideTracker::traveler(api(&base), conn, RideTrackerOptions::default());
        let mut state = tracker.state();

        // No city configured: the announcement still goes out, empty.
        let (_, name, payload) = server.recv_event().await;
        assert_eq!(name, "traveler:set_city");
        assert_eq!(payload, json!({"city": ""}));

        let err = tracker
            .request_ride(&RideRequest {
                source: Some("Shivajinagar".into()),
                destination: "  ".into(),
                current_location: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "Destination is required.");

        let err = tracker
            .request_ride(&RideRequest {
                source: None,
                destination: "Airport".into(),
                current_location: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "Source is required.");

        let route = tracker
            .request_ride(&RideRequest {
                source: Some("Shivajinagar".into()),
                destination: "Airport".into(),
                current_location: None,
            })
            .await
            .unwrap();
        assert_eq!(route.destination.address.as_deref(), Some("Airport"));

        let (_, name, payload) = server.recv_event().await;
        assert_eq!(name, "traveler:request_ride");
        assert_eq!(payload["use_current_location"], json!(false));

        let pending = wait_ride(&mut state, |s| s.pending.is_some()).await;
        assert!(pending.seconds_left >= 44);
        assert!(matches!(tracker.accept_quote(), Err(Error::Validation(_))));
        assert!(matches!(tracker.go_online(true), Err(Error::Validation(_))));

        server
            .push("/rides", "ride:status_changed", json!({"ride": {"id": "r9", "status": "DRIVER_EN_ROUTE"}}))
            .await;
        wait_ride(&mut state, |s| s.current.is_some()).await;
        let err = tracker
            .request_ride(&RideRequest {
                source: Some("A".into()),
                destination: "B".into(),
                current_location: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "You already have an active ride.");
        tracker.close().await;
    }

    #[tokio::test]
    async fn test_driver_quote_and_start_flow() {
        let base = serve(router(Arc::new(AtomicUsize::new(0)))).await;
        let (conn, mut server, _servers) = connected(Namespace::Rides).await;
        let (source, _samples) = ChannelSource::new();
        let tracker = RideTracker::driver(
            api(&base),
            conn,
            RideTrackerOptions {
                city: "Pune".into(),
                ..Default::default()
            },
            Arc::new(source),
        );
        let mut state = tracker.state();

        assert!(matches!(tracker.submit_quote(100.0, ""), Err(Error::Validation(_))));

        server
            .push("/rides", "ride:request_received", json!({"ride": {"id": "r1", "status": "REQUESTED"}}))
            .await;
        wait_ride(&mut state, |s| s.incoming.len() == 1).await;

        tracker.accept_request("r1").unwrap();
        assert_eq!(
            server.recv_message().await,
            r#"42/rides,["driver:accept_request",{"ride_id":"r1"}]"#
        );

        server
            .push("/rides", "ride:status_changed", json!({"ride": {"id": "r1", "status": "ACCEPTED_PENDING_QUOTE"}}))
            .await;
        let accepted = wait_ride(&mut state, |s| s.current.is_some()).await;
        assert!(accepted.incoming.is_empty());

        assert_eq!(
            tracker.submit_quote(0.0, "").unwrap_err().user_message(),
            "Quote price is required."
        );
        tracker.submit_quote(180.0, " AC cab ").unwrap();
        let (_, name, payload) = server.recv_event().await;
        assert_eq!(name, "driver:submit_quote");
        assert_eq!(
            payload,
            json!({"ride_id": "r1", "price": 180.0, "currency": "INR", "note": "AC cab"})
        );

        assert_eq!(
            tracker.start_ride(" ").unwrap_err().user_message(),
            "Enter OTP shared by traveler to start ride."
        );
        tracker.start_ride("4821").unwrap();
        let (_, name, payload) = server.recv_event().await;
        assert_eq!(name, "driver:start_ride");
        assert_eq!(payload, json!({"ride_id": "r1", "otp": "4821"}));

        tracker.go_online(true).unwrap();
        let (_, name, payload) = server.recv_event().await;
        assert_eq!(name, "driver:set_online");
        assert_eq!(payload, json!({"online": true, "city": "Pune"}));
        tracker.close().await;
        assert!(!tracker.presence().unwrap().is_online());
    }
}
