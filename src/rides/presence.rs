//! Driver availability and live location streaming.
//!
//! While online, a background task samples the [`LocationSource`] and emits
//! `driver:location_update` for every fix, tagged with the current ride id.
//! Location failures only set a warning; the driver stays online and keeps
//! receiving requests for their city.

use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::geolocation::LocationSource;
use super::model::GeoPoint;
use crate::socket::{Connection, SocketError};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceState {
    pub online: bool,
    pub city: String,
    pub last_fix: Option<GeoPoint>,
    /// Latest location problem, cleared by the next good fix.
    pub warning: Option<String>,
}

#[derive(Debug, Serialize)]
struct SetOnline<'a> {
    online: bool,
    city: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<GeoPoint>,
}

#[derive(Debug, Serialize)]
struct LocationUpdate {
    location: GeoPoint,
    #[serde(skip_serializing_if = "Option::is_none")]
    ride_id: Option<String>,
}

struct WatchHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct DriverPresence {
    conn: Arc<Connection>,
    source: Arc<dyn LocationSource>,
    current_ride: watch::Receiver<Option<String>>,
    state: watch::Sender<PresenceState>,
    watcher: Mutex<Option<WatchHandle>>,
}

impl DriverPresence {
    /// `current_ride` follows the id of the ride the driver is serving.
    pub fn new(
        conn: Arc<Connection>,
        source: Arc<dyn LocationSource>,
        current_ride: watch::Receiver<Option<String>>,
        city: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(PresenceState {
            city: city.into(),
            ..Default::default()
        });
        Self {
            conn,
            source,
            current_ride,
            state,
            watcher: Mutex::new(None),
        }
    }

    pub fn state(&self) -> watch::Receiver<PresenceState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> PresenceState {
        self.state.borrow().clone()
    }

    pub fn is_online(&self) -> bool {
        self.state.borrow().online
    }

    /// Go online or offline. Going offline stops the location watch before
    /// returning.
    pub fn set_online(&self, online: bool) -> Result<(), SocketError> {
        self.state.send_modify(|s| s.online = online);
        if online {
            self.start_watch();
        } else {
            self.stop_watch();
        }
        info!(online, city = %self.state.borrow().city, "Driver availability changed");
        self.announce()
    }

    /// Change the city requests are matched in, re-announcing if online.
    pub fn set_city(&self, city: &str) -> Result<(), SocketError> {
        self.state.send_modify(|s| s.city = city.trim().to_string());
        if self.is_online() {
            self.announce()?;
        }
        Ok(())
    }

    /// Emit the current availability. Used after every (re)connect since the
    /// server forgets it with the old socket.
    pub fn announce(&self) -> Result<(), SocketError> {
        let state = self.state.borrow().clone();
        self.conn.emit(
            "driver:set_online",
            &SetOnline {
                online: state.online,
                city: &state.city,
                location: state.last_fix,
            },
        )
    }

    fn start_watch(&self) {
        let mut watcher = self.watcher.lock();
        if watcher.as_ref().is_some_and(|w| !w.task.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(watch_location(
            self.conn.clone(),
            self.source.clone(),
            self.current_ride.clone(),
            self.state.clone(),
            cancel.clone(),
        ));
        *watcher = Some(WatchHandle { cancel, task });
    }

    fn stop_watch(&self) {
        if let Some(handle) = self.watcher.lock().take() {
            debug!("Stopping location watch");
            handle.cancel.cancel();
            handle.task.abort();
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watcher
            .lock()
            .as_ref()
            .is_some_and(|w| !w.task.is_finished())
    }
}

impl Drop for DriverPresence {
    fn drop(&mut self) {
        self.stop_watch();
    }
}

async fn watch_location(
    conn: Arc<Connection>,
    source: Arc<dyn LocationSource>,
    current_ride: watch::Receiver<Option<String>>,
    state: watch::Sender<PresenceState>,
    cancel: CancellationToken,
) {
    let mut samples = source.watch();
    loop {
        let sample = tokio::select! {
            _ = cancel.cancelled() => break,
            sample = samples.next() => sample,
        };
        match sample {
            Some(Ok(point)) => {
                state.send_modify(|s| {
                    s.last_fix = Some(point);
                    s.warning = None;
                });
                let ride_id = current_ride.borrow().clone();
                debug!(location = %point, ride_id = ?ride_id, "Location fix");
                if let Err(e) = conn.emit("driver:location_update", &LocationUpdate { location: point, ride_id }) {
                    warn!(error = %e, "Could not queue location update");
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "Location watch failed");
                state.send_modify(|s| s.warning = Some(e.warning().to_string()));
            }
            None => {
                debug!("Location source ended");
                break;
            }
        }
    }
}
