// utils/geo.rs
use serde::{Deserialize, Serialize};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Great-circle distance in meters.
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }

    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        self.distance_m(other) / 1000.0
    }

    /// Lat/lng box that contains every point within `radius_km`.
    /// Used as a cheap index-friendly prefilter before the exact distance check.
    pub fn bounding_box(&self, radius_km: f64) -> BoundingBox {
        let lat_delta = (radius_km * 1000.0 / EARTH_RADIUS_M).to_degrees();
        let cos_lat = self.lat.to_radians().cos().abs().max(1e-6);
        let lng_delta = (lat_delta / cos_lat).min(180.0);

        BoundingBox {
            min_lat: (self.lat - lat_delta).max(-90.0),
            max_lat: (self.lat + lat_delta).min(90.0),
            min_lng: (self.lng - lng_delta).max(-180.0),
            max_lng: (self.lng + lng_delta).min(180.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn contains(&self, point: &GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && (self.min_lng..=self.max_lng).contains(&point.lng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_between_known_points() {
        // Lagos Island to Ikeja is roughly 16 km.
        let island = GeoPoint::new(6.4541, 3.3947);
        let ikeja = GeoPoint::new(6.6018, 3.3515);
        let km = island.distance_km(&ikeja);
        assert!(km > 15.0 && km < 18.0, "got {km}");
    }

    #[test]
    fn test_small_offsets_in_meters() {
        let a = GeoPoint::new(0.0, 0.0);
        // 0.0002 degrees of latitude ~ 22 m
        let b = GeoPoint::new(0.0002, 0.0);
        let m = a.distance_m(&b);
        assert!(m > 21.0 && m < 23.0, "got {m}");
        assert_eq!(a.distance_m(&a), 0.0);
    }

    #[test]
    fn test_bounding_box_contains_radius() {
        let center = GeoPoint::new(6.5, 3.4);
        let bbox = center.bounding_box(10.0);
        assert!(bbox.contains(&GeoPoint::new(6.55, 3.45)));
        assert!(!bbox.contains(&GeoPoint::new(7.0, 3.4)));
    }

    #[test]
    fn test_validity() {
        assert!(GeoPoint::new(-90.0, 180.0).is_valid());
        assert!(!GeoPoint::new(91.0, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, f64::NAN).is_valid());
    }
}
