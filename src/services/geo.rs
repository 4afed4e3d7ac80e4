//! Geographic calculations

use crate::types::Coordinates;

/// Earth radius in meters
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance between two points in meters
pub fn haversine_distance(from: &Coordinates, to: &Coordinates) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lon = (to.lng - from.lng).to_radians();

    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Total length of a polyline in meters
pub fn path_length(points: &[Coordinates]) -> f64 {
    points
        .windows(2)
        .map(|pair| haversine_distance(&pair[0], &pair[1]))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_prague_brno() {
        let prague = Coordinates { lat: 50.0755, lng: 14.4378 };
        let brno = Coordinates { lat: 49.1951, lng: 16.6068 };

        let distance = haversine_distance(&prague, &brno);

        // Prague to Brno is approximately 185 km
        assert!((distance - 185_000.0).abs() < 5_000.0);
    }

    #[test]
    fn test_haversine_same_point() {
        let point = Coordinates { lat: 50.0, lng: 14.0 };
        assert_eq!(haversine_distance(&point, &point), 0.0);
    }

    #[test]
    fn test_haversine_symmetric() {
        let points = [
            Coordinates { lat: 49.79993, lng: 9.95075 },
            Coordinates { lat: 49.79900, lng: 9.94932 },
            Coordinates { lat: -33.8688, lng: 151.2093 },
            Coordinates { lat: 0.0, lng: 179.9 },
            Coordinates { lat: 0.0, lng: -179.9 },
        ];

        for a in &points {
            for b in &points {
                assert_eq!(haversine_distance(a, b), haversine_distance(b, a));
            }
        }
    }

    #[test]
    fn test_one_degree_latitude() {
        let a = Coordinates { lat: 0.0, lng: 0.0 };
        let b = Coordinates { lat: 1.0, lng: 0.0 };

        // 2πR / 360
        let expected = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;
        assert!((haversine_distance(&a, &b) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_path_length() {
        let points = vec![
            Coordinates { lat: 50.0, lng: 14.0 },
            Coordinates { lat: 50.1, lng: 14.1 },
            Coordinates { lat: 50.2, lng: 14.2 },
        ];

        let total = path_length(&points);
        let expected = haversine_distance(&points[0], &points[1])
            + haversine_distance(&points[1], &points[2]);
        assert!((total - expected).abs() < 1e-9);
        assert_eq!(path_length(&points[..1]), 0.0);
        assert_eq!(path_length(&[]), 0.0);
    }
}
