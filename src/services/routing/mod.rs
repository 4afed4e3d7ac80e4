//! Route geometry between way points
//!
//! Uses OSRM when a server is configured and reachable, straight lines otherwise.

mod osrm;

pub use osrm::{decode_polyline, OsrmClient, OsrmConfig};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::services::geo::path_length;
use crate::types::Coordinates;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("a route needs at least two way points, got {0}")]
    TooFewWaypoints(usize),

    #[error("routing request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("routing server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("routing server found no route ({code}): {message}")]
    NoRoute { code: String, message: String },

    #[error("could not decode route geometry: {0}")]
    Polyline(String),

    #[error("malformed routing response: {0}")]
    Response(#[from] serde_json::Error),
}

/// Dense path between way points
#[derive(Debug, Clone, PartialEq)]
pub struct RouteGeometry {
    pub coordinates: Vec<Coordinates>,
    /// Length in meters as reported by the provider
    pub distance_m: f64,
}

impl RouteGeometry {
    /// Straight segments through `points`
    pub fn straight(points: &[Coordinates]) -> Self {
        Self {
            coordinates: points.to_vec(),
            distance_m: path_length(points),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }
}

/// Source of road geometry for a vehicle's legs
#[async_trait]
pub trait RouteService: Send + Sync {
    /// Path visiting `waypoints` in the given order
    async fn route(&self, waypoints: &[Coordinates]) -> Result<RouteGeometry, RouteError>;

    /// Service name for logging
    fn name(&self) -> &str;
}

/// Connects way points with straight lines; offline and fallback provider
#[derive(Debug, Clone, Copy, Default)]
pub struct StraightLineRouting;

impl StraightLineRouting {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RouteService for StraightLineRouting {
    async fn route(&self, waypoints: &[Coordinates]) -> Result<RouteGeometry, RouteError> {
        if waypoints.len() < 2 {
            return Err(RouteError::TooFewWaypoints(waypoints.len()));
        }
        Ok(RouteGeometry::straight(waypoints))
    }

    fn name(&self) -> &str {
        "StraightLine"
    }
}

/// Create the route service, probing OSRM first.
///
/// Falls back to straight lines if no URL is configured or the server
/// does not answer.
pub async fn create_routing_service_with_fallback(osrm_url: Option<String>) -> Arc<dyn RouteService> {
    if let Some(url) = osrm_url {
        match check_osrm_health(&url).await {
            Ok(()) => match OsrmClient::new(OsrmConfig::new(&url)) {
                Ok(client) => {
                    info!("OSRM routing service available at {}", url);
                    return Arc::new(client);
                }
                Err(e) => warn!("Could not create OSRM client for {}: {}", url, e),
            },
            Err(e) => {
                warn!("OSRM not available at {}: {}. Falling back to straight lines.", url, e);
            }
        }
    }

    info!("Using straight-line routing (OSRM not configured or unavailable)");
    Arc::new(StraightLineRouting::new())
}

/// OSRM has no status endpoint; any answer below 500 means it is up.
async fn check_osrm_health(base_url: &str) -> Result<(), RouteError> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()?;

    let url = format!("{}/nearest/v1/driving/0,0", base_url.trim_end_matches('/'));
    let response = client.get(&url).send().await?;

    if response.status().is_server_error() {
        return Err(RouteError::Status {
            status: response.status().as_u16(),
            body: response.text().await.unwrap_or_default(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn residenz() -> Coordinates {
        Coordinates { lat: 49.79286, lng: 9.93812 }
    }

    fn hauptbahnhof() -> Coordinates {
        Coordinates { lat: 49.80150, lng: 9.93560 }
    }

    fn sanderring() -> Coordinates {
        Coordinates { lat: 49.78723, lng: 9.93297 }
    }

    #[tokio::test]
    async fn test_straight_line_returns_waypoints() {
        let service = StraightLineRouting::new();
        let points = vec![residenz(), hauptbahnhof(), sanderring()];

        let geometry = service.route(&points).await.unwrap();

        assert_eq!(geometry.coordinates, points);
        assert!((geometry.distance_m - path_length(&points)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_straight_line_needs_two_points() {
        let service = StraightLineRouting::new();

        let err = service.route(&[residenz()]).await.unwrap_err();
        assert!(matches!(err, RouteError::TooFewWaypoints(1)));
        assert!(matches!(service.route(&[]).await, Err(RouteError::TooFewWaypoints(0))));
    }

    #[test]
    fn test_routing_service_name() {
        assert_eq!(StraightLineRouting::new().name(), "StraightLine");
    }

    #[tokio::test]
    async fn test_create_routing_service_with_fallback_no_url() {
        let service = create_routing_service_with_fallback(None).await;
        assert_eq!(service.name(), "StraightLine");
    }

    #[tokio::test]
    async fn test_create_routing_service_with_fallback_invalid_url() {
        let service = create_routing_service_with_fallback(Some("http://localhost:99999".to_string())).await;
        assert_eq!(service.name(), "StraightLine");
    }

    #[tokio::test]
    #[ignore = "Requires running OSRM server"]
    async fn test_create_routing_service_with_fallback_osrm_available() {
        let service = create_routing_service_with_fallback(Some("http://localhost:5000".to_string())).await;
        assert_eq!(service.name(), "OSRM");
    }
}
