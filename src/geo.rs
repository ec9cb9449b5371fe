//! Great-circle geometry for geofence checks.

use crate::errors::RollcallError;
use serde::Serialize;

/// Mean Earth radius of the spherical model, in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A validated WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, RollcallError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(RollcallError::Validation(format!(
                "latitude {latitude} is outside [-90, 90]"
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(RollcallError::Validation(format!(
                "longitude {longitude} is outside [-180, 180]"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Both halves must be present; a lone latitude or longitude is rejected.
    pub fn from_parts(latitude: Option<f64>, longitude: Option<f64>) -> Result<Self, RollcallError> {
        match (latitude, longitude) {
            (Some(lat), Some(lon)) => Self::new(lat, lon),
            _ => Err(RollcallError::Validation(
                "latitude and longitude must both be supplied".to_string(),
            )),
        }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// Circular area a class may be attended from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Geofence {
    pub center: Coordinate,
    pub radius_m: f64,
}

impl Geofence {
    pub fn new(center: Coordinate, radius_m: f64) -> Result<Self, RollcallError> {
        if !radius_m.is_finite() || radius_m <= 0.0 {
            return Err(RollcallError::Validation(format!(
                "geofence radius must be positive, got {radius_m}"
            )));
        }
        Ok(Self { center, radius_m })
    }
}

/// Haversine distance between two coordinates, in meters.
pub fn distance_meters(a: &Coordinate, b: &Coordinate) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        for (lat, lon) in [(0.0, 0.0), (40.0, -75.0), (-33.86, 151.2), (89.9, 179.9)] {
            let a = coord(lat, lon);
            assert_eq!(distance_meters(&a, &a), 0.0);
        }
    }

    #[test]
    fn test_distance_is_symmetric() {
        let pairs = [
            (coord(40.0, -75.0), coord(40.001, -75.0)),
            (coord(51.5, -0.12), coord(48.85, 2.35)),
            (coord(-10.0, 170.0), coord(10.0, -170.0)),
        ];
        for (a, b) in pairs {
            let ab = distance_meters(&a, &b);
            let ba = distance_meters(&b, &a);
            assert!((ab - ba).abs() < 1e-6, "{ab} != {ba}");
        }
    }

    #[test]
    fn test_known_short_distances() {
        let center = coord(40.0, -75.0);

        let near = distance_meters(&center, &coord(40.0004, -75.0));
        assert!((near - 44.5).abs() < 0.5, "got {near}");

        let far = distance_meters(&center, &coord(40.001, -75.0));
        assert!((far - 111.2).abs() < 0.5, "got {far}");
    }

    #[test]
    fn test_equator_degree() {
        // One degree of longitude on the equator is R * pi / 180
        let d = distance_meters(&coord(0.0, 0.0), &coord(0.0, 1.0));
        let expected = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;
        assert!((d - expected).abs() < 1e-3);
    }

    #[test]
    fn test_coordinate_range_validation() {
        assert!(Coordinate::new(90.0, 180.0).is_ok());
        assert!(Coordinate::new(-90.0, -180.0).is_ok());
        assert!(Coordinate::new(90.1, 0.0).is_err());
        assert!(Coordinate::new(0.0, -180.5).is_err());
        assert!(Coordinate::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_coordinate_requires_both_parts() {
        assert!(Coordinate::from_parts(Some(1.0), None).is_err());
        assert!(Coordinate::from_parts(None, Some(1.0)).is_err());
        assert!(Coordinate::from_parts(Some(1.0), Some(2.0)).is_ok());
    }

    #[test]
    fn test_geofence_radius_must_be_positive() {
        let c = coord(0.0, 0.0);
        assert!(Geofence::new(c, 0.0).is_err());
        assert!(Geofence::new(c, -5.0).is_err());
        assert!(Geofence::new(c, 100.0).is_ok());
    }
}
