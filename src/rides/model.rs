use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::utils::{lenient_f64, lenient_string, lenient_timestamp, lenient_u32};

/// Server-side ride lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    Requested,
    AcceptedPendingQuote,
    QuoteSent,
    QuoteAccepted,
    DriverEnRoute,
    InProgress,
    Completed,
    Cancelled,
    Expired,
    /// A status this client does not know about yet.
    #[serde(other)]
    Unknown,
}

impl RideStatus {
    pub const ACTIVE: [RideStatus; 6] = [
        RideStatus::Requested,
        RideStatus::AcceptedPendingQuote,
        RideStatus::QuoteSent,
        RideStatus::QuoteAccepted,
        RideStatus::DriverEnRoute,
        RideStatus::InProgress,
    ];

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RideStatus::Completed | RideStatus::Cancelled | RideStatus::Expired
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RideStatus::Requested => "REQUESTED",
            RideStatus::AcceptedPendingQuote => "ACCEPTED_PENDING_QUOTE",
            RideStatus::QuoteSent => "QUOTE_SENT",
            RideStatus::QuoteAccepted => "QUOTE_ACCEPTED",
            RideStatus::DriverEnRoute => "DRIVER_EN_ROUTE",
            RideStatus::InProgress => "IN_PROGRESS",
            RideStatus::Completed => "COMPLETED",
            RideStatus::Cancelled => "CANCELLED",
            RideStatus::Expired => "EXPIRED",
            RideStatus::Unknown => "UNKNOWN",
        }
    }

    /// Whether the server is expected to move a ride from `self` to `next`.
    ///
    /// The server is the authority; this is only used to flag surprising
    /// transitions in the logs.
    pub fn can_transition(self, next: RideStatus) -> bool {
        use RideStatus::*;
        if self == next {
            return true;
        }
        if self.is_active() && matches!(next, Cancelled | Expired) {
            return true;
        }
        matches!(
            (self, next),
            (Requested, AcceptedPendingQuote)
                | (AcceptedPendingQuote, QuoteSent)
                | (QuoteSent, QuoteAccepted)
                | (QuoteSent, Requested)
                | (QuoteAccepted, DriverEnRoute)
                | (DriverEnRoute, InProgress)
                | (InProgress, Completed)
        )
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for RideStatus {
    fn default() -> Self {
        RideStatus::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5},{:.5}", self.lat, self.lng)
    }
}

/// A pickup or drop-off location. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Place {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_f64")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_f64")]
    pub lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
}

impl Place {
    pub fn from_address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Default::default()
        }
    }

    pub fn from_point(point: GeoPoint) -> Self {
        Self {
            lat: Some(point.lat),
            lng: Some(point.lng),
            ..Default::default()
        }
    }

    pub fn point(&self) -> Option<GeoPoint> {
        Some(GeoPoint::new(self.lat?, self.lng?))
    }

    /// Short human label: the address, or the coordinates when unnamed.
    pub fn label(&self) -> String {
        match (&self.address, self.point()) {
            (Some(address), _) if !address.trim().is_empty() => address.clone(),
            (_, Some(point)) => point.to_string(),
            _ => "-".to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.address.as_deref().map_or(true, |a| a.trim().is_empty()) && self.point().is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RideRating {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_u32")]
    pub stars: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One ride request/trip as seen by either party.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideSession {
    pub id: String,
    #[serde(default)]
    pub status: RideStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Place>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<Place>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_location: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_u32")]
    pub eta_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_f64")]
    pub quoted_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traveler_uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_uid: Option<String>,
    /// Pickup code; only ever sent to the traveler.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub start_otp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<RideRating>,
    /// Fields this client does not model, kept so a snapshot round-trips intact.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RideSession {
    pub fn new(id: impl Into<String>, status: RideStatus) -> Self {
        Self {
            id: id.into(),
            status,
            source: None,
            destination: None,
            driver_location: None,
            eta_minutes: None,
            quoted_price: None,
            currency: None,
            quote_note: None,
            city: None,
            created_at: None,
            traveler_uid: None,
            driver_uid: None,
            start_otp: None,
            rating: None,
            extra: Map::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn quote_label(&self) -> Option<String> {
        let price = self.quoted_price?;
        let currency = self.currency.as_deref().unwrap_or("INR");
        Some(format!("{:.2} {}", price, currency))
    }
}

/// Which side of a ride this client is acting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RideRole {
    Traveler,
    Driver,
}

impl fmt::Display for RideRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RideRole::Traveler => f.write_str("traveler"),
            RideRole::Driver => f.write_str("driver"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_roundtrip_and_unknown() {
        let s: RideStatus = serde_json::from_value(json!("DRIVER_EN_ROUTE")).unwrap();
        assert_eq!(s, RideStatus::DriverEnRoute);
        assert_eq!(serde_json::to_value(s).unwrap(), json!("DRIVER_EN_ROUTE"));

        let s: RideStatus = serde_json::from_value(json!("TELEPORTED")).unwrap();
        assert_eq!(s, RideStatus::Unknown);
    }

    #[test]
    fn test_active_and_terminal_sets() {
        for status in RideStatus::ACTIVE {
            assert!(status.is_active());
            assert!(!status.is_terminal());
        }
        assert!(RideStatus::Completed.is_terminal());
        assert!(RideStatus::Expired.is_terminal());
        assert!(!RideStatus::Unknown.is_active());
        assert!(!RideStatus::Unknown.is_terminal());
    }

    #[test]
    fn test_transitions() {
        use RideStatus::*;
        assert!(Requested.can_transition(AcceptedPendingQuote));
        assert!(QuoteSent.can_transition(Requested));
        assert!(InProgress.can_transition(Cancelled));
        assert!(Requested.can_transition(Expired));
        assert!(!Requested.can_transition(Completed));
        assert!(!Completed.can_transition(InProgress));
    }

    #[test]
    fn test_ride_from_loose_payload() {
        let ride: RideSession = serde_json::from_value(json!({
            "id": "r1",
            "status": "QUOTE_SENT",
            "quoted_price": "250",
            "currency": "INR",
            "eta_minutes": 6,
            "created_at": "2025-03-01T10:00:00.000000",
            "source": {"address": "MG Road", "lat": 12.97, "lng": 77.6, "city": "Bengaluru"},
            "start_otp": 4821,
            "vehicle": {"plate": "KA01"}
        }))
        .unwrap();

        assert_eq!(ride.status, RideStatus::QuoteSent);
        assert_eq!(ride.quoted_price, Some(250.0));
        assert_eq!(ride.eta_minutes, Some(6));
        assert!(ride.created_at.is_some());
        assert_eq!(ride.start_otp.as_deref(), Some("4821"));
        assert_eq!(ride.source.as_ref().unwrap().city.as_deref(), Some("Bengaluru"));
        assert!(ride.extra.contains_key("vehicle"));
        assert_eq!(ride.quote_label().as_deref(), Some("250.00 INR"));
    }

    #[test]
    fn test_place_label() {
        assert_eq!(Place::from_address("Airport").label(), "Airport");
        assert_eq!(
            Place::from_point(GeoPoint::new(12.5, 77.25)).label(),
            "12.50000,77.25000"
        );
        assert!(Place::default().is_empty());
        assert_eq!(Place::default().label(), "-");
    }
}
