//! OSRM routing engine client
//!
//! OSRM HTTP API documentation:
//! http://project-osrm.org/docs/v5.24.0/api/#route-service

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{RouteError, RouteGeometry, RouteService};
use crate::types::Coordinates;

/// Precision of the polyline OSRM returns with `geometries=polyline`
const POLYLINE_PRECISION: u32 = 5;

/// OSRM client configuration
#[derive(Debug, Clone)]
pub struct OsrmConfig {
    /// Base URL of OSRM server (e.g., "http://localhost:5000")
    pub base_url: String,
    /// Routing profile, "driving" for buses
    pub profile: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "driving".to_string(),
            timeout_seconds: 5,
        }
    }
}

impl OsrmConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }
}

/// OSRM routing client
pub struct OsrmClient {
    client: Client,
    config: OsrmConfig,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig) -> Result<Self, RouteError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self { client, config })
    }

    /// `GET /route/v1/{profile}/{lon,lat;lon,lat...}` with the full overview geometry
    pub fn route_url(&self, waypoints: &[Coordinates]) -> String {
        let coordinates = waypoints
            .iter()
            .map(|c| format!("{},{}", c.lng, c.lat))
            .collect::<Vec<_>>()
            .join(";");

        format!(
            "{}/route/v1/{}/{}?overview=full&geometries=polyline",
            self.config.base_url.trim_end_matches('/'),
            self.config.profile,
            coordinates
        )
    }
}

#[async_trait]
impl RouteService for OsrmClient {
    async fn route(&self, waypoints: &[Coordinates]) -> Result<RouteGeometry, RouteError> {
        if waypoints.len() < 2 {
            return Err(RouteError::TooFewWaypoints(waypoints.len()));
        }

        let url = self.route_url(waypoints);
        debug!("Requesting route from OSRM for {} way points", waypoints.len());

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;

        let geometry = parse_route_response(status.as_u16(), &body)?;
        debug!(
            "OSRM route has {} points over {:.0} m",
            geometry.coordinates.len(),
            geometry.distance_m
        );
        Ok(geometry)
    }

    fn name(&self) -> &str {
        "OSRM"
    }
}

// OSRM API types

#[derive(Debug, Deserialize)]
struct RouteResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
struct Route {
    geometry: String,
    distance: f64,
}

/// Turn an OSRM route answer into geometry.
///
/// OSRM reports failures such as `NoRoute` as JSON on a 400 response, so the
/// body is read before the status decides.
fn parse_route_response(status: u16, body: &str) -> Result<RouteGeometry, RouteError> {
    let response: RouteResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(_) if !(200..300).contains(&status) => {
            return Err(RouteError::Status {
                status,
                body: body.to_string(),
            })
        }
        Err(e) => return Err(e.into()),
    };

    if response.code != "Ok" {
        return Err(RouteError::NoRoute {
            code: response.code,
            message: response.message.unwrap_or_default(),
        });
    }

    let route = response.routes.into_iter().next().ok_or_else(|| RouteError::NoRoute {
        code: "Ok".to_string(),
        message: "response contains no routes".to_string(),
    })?;

    Ok(RouteGeometry {
        coordinates: decode_polyline(&route.geometry, POLYLINE_PRECISION)?,
        distance_m: route.distance,
    })
}

/// Decode an encoded polyline (Google format) into coordinates.
pub fn decode_polyline(encoded: &str, precision: u32) -> Result<Vec<Coordinates>, RouteError> {
    let factor = 10_f64.powi(precision as i32);
    let bytes = encoded.as_bytes();
    let mut i = 0;
    let mut lat = 0i64;
    let mut lng = 0i64;
    let mut coordinates = Vec::new();

    while i < bytes.len() {
        lat += next_value(bytes, &mut i)?;
        lng += next_value(bytes, &mut i)?;
        coordinates.push(Coordinates {
            lat: lat as f64 / factor,
            lng: lng as f64 / factor,
        });
    }

    Ok(coordinates)
}

/// One zig-zag encoded delta starting at `bytes[*i]`
fn next_value(bytes: &[u8], i: &mut usize) -> Result<i64, RouteError> {
    let mut shift = 0;
    let mut result = 0i64;
    loop {
        let byte = *bytes
            .get(*i)
            .ok_or_else(|| RouteError::Polyline("unexpected end of polyline".to_string()))?;
        if !(63..=126).contains(&byte) {
            return Err(RouteError::Polyline(format!("invalid character {:?} at {}", byte as char, i)));
        }
        if shift > 60 {
            return Err(RouteError::Polyline("value too long".to_string()));
        }
        let chunk = (byte - 63) as i64;
        *i += 1;
        result |= (chunk & 0x1f) << shift;
        shift += 5;
        if chunk < 0x20 {
            break;
        }
    }

    Ok(if result & 1 != 0 { !(result >> 1) } else { result >> 1 })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: &Coordinates, lat: f64, lng: f64) {
        assert!((actual.lat - lat).abs() < 1e-9, "lat {} != {}", actual.lat, lat);
        assert!((actual.lng - lng).abs() < 1e-9, "lng {} != {}", actual.lng, lng);
    }

    #[test]
    fn test_decode_polyline_reference_example() {
        let coords = decode_polyline("_p~iF~ps|U_ulLnnqC_mqNvxq`@", 5).unwrap();

        assert_eq!(coords.len(), 3);
        assert_close(&coords[0], 38.5, -120.2);
        assert_close(&coords[1], 40.7, -120.95);
        assert_close(&coords[2], 43.252, -126.453);
    }

    #[test]
    fn test_decode_polyline_empty() {
        assert!(decode_polyline("", 5).unwrap().is_empty());
    }

    #[test]
    fn test_decode_polyline_truncated() {
        // Latitude only, longitude missing
        assert!(matches!(decode_polyline("_p~iF", 5), Err(RouteError::Polyline(_))));
    }

    #[test]
    fn test_decode_polyline_invalid_character() {
        assert!(matches!(decode_polyline("_p~iF ps|U", 5), Err(RouteError::Polyline(_))));
    }

    #[test]
    fn test_route_url() {
        let client = OsrmClient::new(OsrmConfig::new("http://osrm.local:5000/")).unwrap();
        let url = client.route_url(&[
            Coordinates { lat: 49.79286, lng: 9.93812 },
            Coordinates { lat: 49.8015, lng: 9.9356 },
        ]);

        assert_eq!(
            url,
            "http://osrm.local:5000/route/v1/driving/9.93812,49.79286;9.9356,49.8015?overview=full&geometries=polyline"
        );
    }

    #[test]
    fn test_parse_route_response_ok() {
        let body = r#"{
            "code": "Ok",
            "routes": [{"geometry": "_p~iF~ps|U_ulLnnqC", "distance": 1234.5, "duration": 99.0}],
            "waypoints": []
        }"#;

        let geometry = parse_route_response(200, body).unwrap();

        assert_eq!(geometry.coordinates.len(), 2);
        assert_close(&geometry.coordinates[1], 40.7, -120.95);
        assert_eq!(geometry.distance_m, 1234.5);
    }

    #[test]
    fn test_parse_route_response_no_route() {
        let body = r#"{"code": "NoRoute", "message": "Impossible route between points"}"#;

        match parse_route_response(400, body) {
            Err(RouteError::NoRoute { code, message }) => {
                assert_eq!(code, "NoRoute");
                assert_eq!(message, "Impossible route between points");
            }
            other => panic!("expected NoRoute, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_route_response_empty_routes() {
        let body = r#"{"code": "Ok", "routes": []}"#;
        assert!(matches!(parse_route_response(200, body), Err(RouteError::NoRoute { .. })));
    }

    #[test]
    fn test_parse_route_response_non_json_error() {
        match parse_route_response(502, "Bad Gateway") {
            Err(RouteError::Status { status, body }) => {
                assert_eq!(status, 502);
                assert_eq!(body, "Bad Gateway");
            }
            other => panic!("expected Status, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_route_response_malformed_body() {
        assert!(matches!(parse_route_response(200, "{"), Err(RouteError::Response(_))));
    }

    #[tokio::test]
    async fn test_osrm_rejects_single_waypoint() {
        let client = OsrmClient::new(OsrmConfig::default()).unwrap();
        let result = client.route(&[Coordinates { lat: 49.79, lng: 9.93 }]).await;
        assert!(matches!(result, Err(RouteError::TooFewWaypoints(1))));
    }

    #[tokio::test]
    #[ignore = "Requires running OSRM server"]
    async fn test_osrm_route_wuerzburg() {
        let client = OsrmClient::new(OsrmConfig::default()).unwrap();
        let geometry = client
            .route(&[
                Coordinates { lat: 49.79286, lng: 9.93812 },
                Coordinates { lat: 49.8015, lng: 9.9356 },
            ])
            .await
            .unwrap();

        assert!(geometry.coordinates.len() >= 2);
        assert!(geometry.distance_m > 900.0);
    }
}
