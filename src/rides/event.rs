//! Typed `/rides` push events.

use serde::Deserialize;
use serde_json::Value;

use super::model::{GeoPoint, RideRating, RideSession};
use crate::utils::{lenient_string, lenient_u32};

/// Which quote-flow event replaced the ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteKind {
    Received,
    Accepted,
    QuoteAccepted,
}

/// `ride:rated` as seen by the driver.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RatedNotice {
    #[serde(default, deserialize_with = "lenient_string")]
    pub ride_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub traveler_name: Option<String>,
    #[serde(default)]
    pub rating: Option<RideRating>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RideEvent {
    /// Driver side: a new request in the driver's city.
    RequestReceived(RideSession),
    StatusChanged(RideSession),
    Completed(RideSession),
    Quote {
        kind: QuoteKind,
        ride: RideSession,
    },
    LocationUpdated {
        ride_id: String,
        driver_location: Option<GeoPoint>,
    },
    EtaUpdated {
        ride_id: String,
        eta_minutes: Option<u32>,
    },
    Error {
        code: Option<String>,
        message: Option<String>,
    },
    OtpGenerated {
        ride_id: Option<String>,
        otp: String,
    },
    Rated(RatedNotice),
    /// `rides:nearby_drivers` and `rides:online_count`.
    DriverCount(u32),
}

#[derive(Deserialize)]
struct RideEnvelope {
    #[serde(default)]
    ride: Option<RideSession>,
}

#[derive(Deserialize)]
struct LocationPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    ride_id: Option<String>,
    #[serde(default)]
    driver_location: Option<GeoPoint>,
}

#[derive(Deserialize)]
struct EtaPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    ride_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_u32")]
    eta_minutes: Option<u32>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    error: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    message: Option<String>,
}

#[derive(Deserialize)]
struct OtpPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    ride_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    otp: Option<String>,
}

#[derive(Deserialize)]
struct CountPayload {
    #[serde(default, deserialize_with = "lenient_u32")]
    count: Option<u32>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

impl RideEvent {
    /// Decode a named push event.
    ///
    /// Returns `Ok(None)` for events this client does not handle and for
    /// payloads missing the field the event is about (no ride, no ride id,
    /// empty OTP).
    pub fn parse(name: &str, payload: &Value) -> Result<Option<Self>, serde_json::Error> {
        let ride = |payload: &Value| -> Result<Option<RideSession>, serde_json::Error> {
            Ok(RideEnvelope::deserialize(payload)?.ride)
        };

        let event = match name {
            "ride:request_received" => ride(payload)?.map(RideEvent::RequestReceived),
            "ride:status_changed" => ride(payload)?.map(RideEvent::StatusChanged),
            "ride:completed" => ride(payload)?.map(RideEvent::Completed),
            "ride:quote_received" | "ride:accepted" | "ride:quote_accepted" => {
                let kind = match name {
                    "ride:quote_received" => QuoteKind::Received,
                    "ride:accepted" => QuoteKind::Accepted,
                    _ => QuoteKind::QuoteAccepted,
                };
                ride(payload)?.map(|ride| RideEvent::Quote { kind, ride })
            }
            "ride:location_updated" => {
                let p = LocationPayload::deserialize(payload)?;
                non_empty(p.ride_id).map(|ride_id| RideEvent::LocationUpdated {
                    ride_id,
                    driver_location: p.driver_location,
                })
            }
            "ride:eta_updated" => {
                let p = EtaPayload::deserialize(payload)?;
                non_empty(p.ride_id).map(|ride_id| RideEvent::EtaUpdated {
                    ride_id,
                    eta_minutes: p.eta_minutes,
                })
            }
            "ride:error" => {
                let p = if payload.is_null() {
                    ErrorPayload {
                        error: None,
                        message: None,
                    }
                } else {
                    ErrorPayload::deserialize(payload)?
                };
                Some(RideEvent::Error {
                    code: non_empty(p.error),
                    message: non_empty(p.message),
                })
            }
            "ride:otp_generated" => {
                let p = OtpPayload::deserialize(payload)?;
                non_empty(p.otp).map(|otp| RideEvent::OtpGenerated {
                    ride_id: non_empty(p.ride_id),
                    otp,
                })
            }
            "ride:rated" => {
                if payload.is_null() {
                    Some(RideEvent::Rated(RatedNotice::default()))
                } else {
                    Some(RideEvent::Rated(RatedNotice::deserialize(payload)?))
                }
            }
            "rides:nearby_drivers" | "rides:online_count" => {
                let p = CountPayload::deserialize(payload)?;
                Some(RideEvent::DriverCount(p.count.unwrap_or(0)))
            }
            _ => None,
        };
        Ok(event)
    }

    /// The ride id this event concerns, when it names one.
    pub fn ride_id(&self) -> Option<&str> {
        match self {
            RideEvent::RequestReceived(ride)
            | RideEvent::StatusChanged(ride)
            | RideEvent::Completed(ride)
            | RideEvent::Quote { ride, .. } => Some(&ride.id),
            RideEvent::LocationUpdated { ride_id, .. } | RideEvent::EtaUpdated { ride_id, .. } => {
                Some(ride_id)
            }
            RideEvent::OtpGenerated { ride_id, .. } => ride_id.as_deref(),
            RideEvent::Rated(notice) => notice.ride_id.as_deref(),
            RideEvent::Error { .. } | RideEvent::DriverCount(_) => None,
        }
    }
}
