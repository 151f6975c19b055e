use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum InvalidCoordinateError {
    #[error("Latitude {0} is not a finite value in [-90, 90]")]
    Latitude(f64),

    #[error("Longitude {0} is not a finite value in [-180, 180]")]
    Longitude(f64),
}

/// A point on the globe in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, InvalidCoordinateError> {
        let coordinates = Self {
            latitude,
            longitude,
        };
        coordinates.validate()?;
        Ok(coordinates)
    }

    /// Deserialized values bypass [`Coordinates::new`], so callers re-check at the boundary.
    pub fn validate(&self) -> Result<(), InvalidCoordinateError> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(InvalidCoordinateError::Latitude(self.latitude));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(InvalidCoordinateError::Longitude(self.longitude));
        }
        Ok(())
    }

    pub fn distance_meters(&self, other: &Coordinates) -> f64 {
        haversine_meters(self, other)
    }
}

/// Great-circle distance in meters between two points.
pub fn haversine_meters(a: &Coordinates, b: &Coordinates) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let delta_phi = (b.latitude - a.latitude).to_radians();
    let delta_lambda = (b.longitude - a.longitude).to_radians();

    let h = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    // rounding can push h a hair past 1 for antipodal points
    let c = 2.0 * h.sqrt().min(1.0).asin();

    EARTH_RADIUS_METERS * c
}

/// Validating variant over raw degrees.
pub fn distance_meters(
    lat1: f64,
    lon1: f64,
    lat2: f64,
    lon2: f64,
) -> Result<f64, InvalidCoordinateError> {
    let a = Coordinates::new(lat1, lon1)?;
    let b = Coordinates::new(lat2, lon2)?;
    Ok(haversine_meters(&a, &b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lon: f64) -> Coordinates {
        Coordinates::new(lat, lon).unwrap()
    }

    #[test]
    fn test_same_point_is_zero() {
        let p = point(12.9716, 77.5946);
        assert_eq!(haversine_meters(&p, &p), 0.0);
    }

    #[test]
    fn test_one_degree_of_latitude() {
        let d = haversine_meters(&point(0.0, 0.0), &point(1.0, 0.0));
        assert!((d - 111_194.9).abs() < 1.0, "got {d}");
    }

    #[test]
    fn test_short_city_distance() {
        // ~0.0009 degrees of latitude is roughly 100 m
        let d = haversine_meters(&point(28.6139, 77.2090), &point(28.6148, 77.2090));
        assert!((d - 100.0).abs() < 1.0, "got {d}");
    }

    #[test]
    fn test_antimeridian_is_short_hop() {
        let east = point(0.0, 179.9);
        let west = point(0.0, -179.9);
        let d = haversine_meters(&east, &west);
        assert!((d - 22_239.0).abs() < 5.0, "got {d}");
    }

    #[test]
    fn test_pole_longitudes_collapse() {
        let d = haversine_meters(&point(90.0, 0.0), &point(90.0, 180.0));
        assert!(d < 1e-6, "got {d}");
    }

    #[test]
    fn test_antipodal_points_are_half_circumference() {
        let d = haversine_meters(&point(0.0, 0.0), &point(0.0, 180.0));
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_METERS).abs() < 1e-3);
    }

    #[test]
    fn test_invalid_coordinates_are_rejected() {
        assert_eq!(
            Coordinates::new(f64::NAN, 0.0).unwrap_err().to_string(),
            "Latitude NaN is not a finite value in [-90, 90]"
        );
        assert!(matches!(
            Coordinates::new(91.0, 0.0),
            Err(InvalidCoordinateError::Latitude(_))
        ));
        assert!(matches!(
            Coordinates::new(0.0, f64::INFINITY),
            Err(InvalidCoordinateError::Longitude(_))
        ));
        assert!(distance_meters(0.0, 0.0, 0.0, 181.0).is_err());
    }
}
