//! Cab ride sessions for travelers and drivers.

pub mod countdown;
pub mod event;
pub mod geolocation;
pub mod model;
pub mod presence;
pub mod reducer;
pub mod tracker;

pub use event::RideEvent;
pub use geolocation::{FixedLocation, GeoError, LocationSource, NoLocation, TrackFile};
pub use model::{GeoPoint, Place, RideRole, RideSession, RideStatus};
pub use presence::{DriverPresence, PresenceState};
pub use reducer::{Alert, AlertLevel, RideEffect, RideMsg, RideState};
pub use tracker::{RideRequest, RideTracker, RideTrackerOptions};
