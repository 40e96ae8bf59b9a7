//! Where a driver's position samples come from.

use futures::stream::{self, BoxStream, StreamExt};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::model::GeoPoint;

pub const PERMISSION_WARNING: &str =
    "Location permission denied. You can still receive requests, but live tracking will be limited.";
pub const UNAVAILABLE_WARNING: &str =
    "Unable to track your location right now. Requests still work using your selected city.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeoError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location request timed out")]
    Timeout,

    #[error("Location unavailable: {0}")]
    Unavailable(String),
}

impl GeoError {
    /// The warning shown while online; the driver stays matchable by city.
    pub fn warning(&self) -> &'static str {
        match self {
            GeoError::PermissionDenied => PERMISSION_WARNING,
            _ => UNAVAILABLE_WARNING,
        }
    }
}

impl From<io::Error> for GeoError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::PermissionDenied => GeoError::PermissionDenied,
            io::ErrorKind::TimedOut => GeoError::Timeout,
            _ => GeoError::Unavailable(e.to_string()),
        }
    }
}

pub type LocationStream = BoxStream<'static, Result<GeoPoint, GeoError>>;

/// A continuous position watch. Dropping the stream stops the watch.
pub trait LocationSource: Send + Sync {
    fn watch(&self) -> LocationStream;
}

/// Reports the same point on every interval.
#[derive(Debug, Clone)]
pub struct FixedLocation {
    point: GeoPoint,
    interval: Duration,
}

impl FixedLocation {
    pub fn new(point: GeoPoint, interval: Duration) -> Self {
        Self { point, interval }
    }
}

impl LocationSource for FixedLocation {
    fn watch(&self) -> LocationStream {
        let point = self.point;
        stream::unfold(ticker(self.interval), move |mut ticker| async move {
            ticker.tick().await;
            Some((Ok(point), ticker))
        })
        .boxed()
    }
}

/// No positioning available; the watch fails once and the driver is matched
/// by city only.
#[derive(Debug, Clone, Default)]
pub struct NoLocation;

impl LocationSource for NoLocation {
    fn watch(&self) -> LocationStream {
        stream::iter([Err(GeoError::Unavailable(
            "no location source configured".to_string(),
        ))])
        .boxed()
    }
}

/// Replays a recorded route: one `lat,lng` per line, `#` comments allowed.
/// The stream ends after the last point.
#[derive(Debug, Clone)]
pub struct TrackFile {
    path: PathBuf,
    interval: Duration,
}

impl TrackFile {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
        }
    }
}

impl LocationSource for TrackFile {
    fn watch(&self) -> LocationStream {
        let path = self.path.clone();
        let interval = self.interval;
        stream::once(async move { load_track(&path).await })
            .flat_map(move |loaded| match loaded {
                Ok(points) => {
                    stream::unfold((points.into_iter(), ticker(interval)), |(mut points, mut ticker)| async move {
                        ticker.tick().await;
                        points.next().map(|p| (Ok(p), (points, ticker)))
                    })
                    .boxed()
                }
                Err(e) => stream::iter([Err(e)]).boxed(),
            })
            .boxed()
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker
}

async fn load_track(path: &Path) -> Result<Vec<GeoPoint>, GeoError> {
    let contents = tokio::fs::read_to_string(path).await?;
    let points = parse_track(&contents)?;
    debug!(path = %path.display(), points = points.len(), "Loaded location track");
    Ok(points)
}

pub fn parse_track(contents: &str) -> Result<Vec<GeoPoint>, GeoError> {
    let mut points = Vec::new();
    for (n, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        points.push(parse_point(line).ok_or_else(|| {
            GeoError::Unavailable(format!("invalid point on line {}: {}", n + 1, line))
        })?);
    }
    if points.is_empty() {
        return Err(GeoError::Unavailable("track has no points".to_string()));
    }
    Ok(points)
}

/// Parse `lat,lng` with range checks.
pub fn parse_point(raw: &str) -> Option<GeoPoint> {
    let (lat, lng) = raw.split_once(',')?;
    let lat: f64 = lat.trim().parse().ok()?;
    let lng: f64 = lng.trim().parse().ok()?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return None;
    }
    Some(GeoPoint::new(lat, lng))
}
