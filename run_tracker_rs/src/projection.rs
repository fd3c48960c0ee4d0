//! Local tangent-plane projection anchored at the session origin.
//!
//! Meters-per-degree factors are evaluated once at the origin latitude and held
//! for the whole session, which keeps the forward and inverse maps exact inverses
//! of each other.

use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectionOrigin {
    pub latitude: f64,
    pub longitude: f64,
    pub meters_per_deg_lat: f64,
    pub meters_per_deg_lon: f64,
}

/// Meters per degree of latitude at `lat_deg` (WGS-84 series expansion)
pub fn meters_per_degree_lat(lat_deg: f64) -> f64 {
    let phi = lat_deg.to_radians();
    111_132.92 - 559.82 * (2.0 * phi).cos() + 1.175 * (4.0 * phi).cos()
        - 0.0023 * (6.0 * phi).cos()
}

/// Meters per degree of longitude at `lat_deg`
pub fn meters_per_degree_lon(lat_deg: f64) -> f64 {
    let phi = lat_deg.to_radians();
    111_412.84 * phi.cos() - 93.5 * (3.0 * phi).cos() + 0.118 * (5.0 * phi).cos()
}

#[derive(Clone, Debug, Default)]
pub struct CoordinateProjector {
    origin: Option<ProjectionOrigin>,
}

impl CoordinateProjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_origin(latitude: f64, longitude: f64) -> Self {
        let mut projector = Self::new();
        projector.set_origin(latitude, longitude);
        projector
    }

    /// Anchor the local frame. Called once per session with the first accepted fix.
    pub fn set_origin(&mut self, latitude: f64, longitude: f64) {
        // Guard the pole where the longitude scale collapses to zero
        let lon_scale = meters_per_degree_lon(latitude).abs().max(1e-6);
        self.origin = Some(ProjectionOrigin {
            latitude,
            longitude,
            meters_per_deg_lat: meters_per_degree_lat(latitude),
            meters_per_deg_lon: lon_scale,
        });
    }

    pub fn is_initialized(&self) -> bool {
        self.origin.is_some()
    }

    pub fn origin(&self) -> Option<ProjectionOrigin> {
        self.origin
    }

    pub fn reset(&mut self) {
        self.origin = None;
    }

    /// Geographic → local (north_m, east_m)
    pub fn to_local(&self, latitude: f64, longitude: f64) -> TrackerResult<(f64, f64)> {
        let o = self.origin.ok_or(TrackerError::ProjectorNotInitialized)?;
        let north = (latitude - o.latitude) * o.meters_per_deg_lat;
        let east = (longitude - o.longitude) * o.meters_per_deg_lon;
        Ok((north, east))
    }

    /// Local (north_m, east_m) → geographic
    pub fn to_geographic(&self, north: f64, east: f64) -> TrackerResult<(f64, f64)> {
        let o = self.origin.ok_or(TrackerError::ProjectorNotInitialized)?;
        let latitude = o.latitude + north / o.meters_per_deg_lat;
        let longitude = o.longitude + east / o.meters_per_deg_lon;
        Ok((latitude, longitude))
    }

    /// Move `distance` meters along `bearing_deg` from a geographic point, on the flat local grid
    pub fn offset(
        &self,
        latitude: f64,
        longitude: f64,
        bearing_deg: f64,
        distance: f64,
    ) -> TrackerResult<(f64, f64)> {
        let (n, e) = self.to_local(latitude, longitude)?;
        let b = bearing_deg.to_radians();
        self.to_geographic(n + distance * b.cos(), e + distance * b.sin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_uninitialized_projector_errors() {
        let p = CoordinateProjector::new();
        assert!(matches!(
            p.to_local(1.0, 2.0),
            Err(TrackerError::ProjectorNotInitialized)
        ));
        assert!(p.to_geographic(0.0, 0.0).is_err());
    }

    #[test]
    fn test_origin_maps_to_zero() {
        let p = CoordinateProjector::with_origin(52.52, 13.405);
        let (n, e) = p.to_local(52.52, 13.405).unwrap();
        assert_eq!((n, e), (0.0, 0.0));
    }

    #[test]
    fn test_scale_factors_at_equator_and_mid_latitude() {
        assert_relative_eq!(meters_per_degree_lat(0.0), 110_574.3, epsilon = 1.0);
        assert_relative_eq!(meters_per_degree_lon(0.0), 111_319.5, epsilon = 1.0);
        assert_relative_eq!(meters_per_degree_lat(45.0), 111_131.7, epsilon = 1.0);
        assert_relative_eq!(meters_per_degree_lon(45.0), 78_846.8, epsilon = 1.0);
    }

    #[test]
    fn test_offset_north_then_east() {
        let p = CoordinateProjector::with_origin(37.0, -122.0);
        let (lat, lon) = p.offset(37.0, -122.0, 0.0, 100.0).unwrap();
        let (n, e) = p.to_local(lat, lon).unwrap();
        assert_relative_eq!(n, 100.0, epsilon = 1e-6);
        assert_relative_eq!(e, 0.0, epsilon = 1e-6);

        let (lat, lon) = p.offset(37.0, -122.0, 90.0, 50.0).unwrap();
        let (n, e) = p.to_local(lat, lon).unwrap();
        assert_relative_eq!(n, 0.0, epsilon = 1e-6);
        assert_relative_eq!(e, 50.0, epsilon = 1e-6);
    }

    #[test]
    fn test_reset_clears_origin() {
        let mut p = CoordinateProjector::with_origin(10.0, 10.0);
        p.reset();
        assert!(!p.is_initialized());
    }
}
