//! Ride history, lifecycle and geocoding endpoints.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::{path_segment, ApiClient, ApiError};
use crate::rides::model::{Place, RideRole, RideSession};

/// Queries shorter than this return no suggestions.
pub const MIN_SUGGEST_QUERY: usize = 3;
pub const DEFAULT_SUGGEST_LIMIT: u32 = 5;

#[derive(Debug, Clone, Serialize)]
pub struct RatingRequest {
    pub stars: u8,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// One end of a route as typed by the user or taken from the device.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LocationQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
}

impl LocationQuery {
    pub fn address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Default::default()
        }
    }

    pub fn point(lat: f64, lng: f64) -> Self {
        Self {
            address: None,
            lat: Some(lat),
            lng: Some(lng),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GeocodeRequest {
    pub source: LocationQuery,
    pub destination: LocationQuery,
    pub use_current_location: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolvedRoute {
    pub source: Place,
    pub destination: Place,
}

#[derive(Debug, Clone, Serialize)]
struct SuggestRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    city_hint: Option<&'a str>,
    limit: u32,
}

impl ApiClient {
    /// `GET /rides/traveler`
    pub async fn traveler_rides(&self) -> Result<Vec<RideSession>, ApiError> {
        Ok(self.get("/rides/traveler").await?.data)
    }

    /// `GET /rides/driver`
    pub async fn driver_rides(&self) -> Result<Vec<RideSession>, ApiError> {
        Ok(self.get("/rides/driver").await?.data)
    }

    pub async fn rides_for(&self, role: RideRole) -> Result<Vec<RideSession>, ApiError> {
        match role {
            RideRole::Traveler => self.traveler_rides().await,
            RideRole::Driver => self.driver_rides().await,
        }
    }

    /// `POST /rides/:id/end`
    pub async fn end_ride(&self, ride_id: &str) -> Result<RideSession, ApiError> {
        let id = path_segment(ride_id)?;
        let res = self
            .post::<RideSession, _>(&format!("/rides/{}/end", id), &json!({}))
            .await?;
        info!(ride_id = %id, "Ride ended");
        Ok(res.data)
    }

    /// `POST /rides/:id/rating`. Stars are checked before the request is sent.
    pub async fn rate_ride(
        &self,
        ride_id: &str,
        rating: &RatingRequest,
    ) -> Result<RideSession, ApiError> {
        if !(1..=5).contains(&rating.stars) {
            return Err(ApiError::Validation(
                "Rating must be between 1 and 5 stars.".to_string(),
            ));
        }
        let id = path_segment(ride_id)?;
        let res = self
            .post::<RideSession, _>(&format!("/rides/{}/rating", id), rating)
            .await?;
        info!(ride_id = %id, stars = rating.stars, "Rating submitted");
        Ok(res.data)
    }

    /// `POST /rides/geocode`
    pub async fn resolve_route(&self, request: &GeocodeRequest) -> Result<ResolvedRoute, ApiError> {
        Ok(self.post("/rides/geocode", request).await?.data)
    }

    /// `POST /rides/geocode/suggest`. Short queries never hit the network.
    pub async fn suggest_addresses(
        &self,
        query: &str,
        city_hint: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Place>, ApiError> {
        let query = query.trim();
        if query.chars().count() < MIN_SUGGEST_QUERY {
            return Ok(Vec::new());
        }
        let body = SuggestRequest {
            query,
            city_hint: city_hint.map(str::trim).filter(|s| !s.is_empty()),
            limit,
        };
        Ok(self.post("/rides/geocode/suggest", &body).await?.data)
    }
}
