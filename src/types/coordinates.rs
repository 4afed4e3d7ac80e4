//! Coordinate type shared by routing, chains and published positions

use serde::{Deserialize, Serialize};

/// Coordinates in degrees (WGS84, treated as a sphere)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// `[lat, lng]` pair, the order used on the wire
    pub fn to_lat_lng(self) -> [f64; 2] {
        [self.lat, self.lng]
    }

    /// Point on the straight line towards `other`, `lambda` in `[0, 1]`
    pub fn lerp(self, other: Coordinates, lambda: f64) -> Coordinates {
        Coordinates {
            lat: self.lat + lambda * (other.lat - self.lat),
            lng: self.lng + lambda * (other.lng - self.lng),
        }
    }

    /// True if both coordinates encode to the same precision-5 polyline point
    pub fn polyline_eq(&self, other: &Coordinates) -> bool {
        (self.lat - other.lat).abs() < 0.00001 && (self.lng - other.lng).abs() < 0.00001
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:.6}, {:.6}]", self.lat, self.lng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lerp_endpoints_and_middle() {
        let a = Coordinates::new(49.0, 9.0);
        let b = Coordinates::new(50.0, 10.0);

        assert_eq!(a.lerp(b, 0.0), a);
        assert_eq!(a.lerp(b, 1.0), b);
        let mid = a.lerp(b, 0.5);
        assert!((mid.lat - 49.5).abs() < 1e-12);
        assert!((mid.lng - 9.5).abs() < 1e-12);
    }

    #[test]
    fn test_polyline_eq_tolerance() {
        let a = Coordinates::new(49.79993, 9.95075);
        let b = Coordinates::new(49.799931, 9.950751);
        let c = Coordinates::new(49.79996, 9.95075);

        assert!(a.polyline_eq(&b));
        assert!(!a.polyline_eq(&c));
    }

    #[test]
    fn test_coordinates_serialize() {
        let json = serde_json::to_string(&Coordinates::new(1.5, 2.5)).unwrap();
        assert_eq!(json, r#"{"lat":1.5,"lng":2.5}"#);
    }
}
