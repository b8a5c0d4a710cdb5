//! Geodesy helpers
//!
//! Spherical-earth approximations. Good to well under 1% at the scales the
//! analysis works with (a few metres to a few hundred kilometres).

/// Mean earth radius (IUGG), metres
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Metres per degree of latitude
pub const METERS_PER_DEG_LAT: f64 = 111_320.0;

/// Great-circle distance between two points in metres
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Metres per degree of longitude at the given latitude
pub fn meters_per_deg_lon(lat: f64) -> f64 {
    METERS_PER_DEG_LAT * lat.to_radians().cos().abs()
}

/// Clamp a point into an axis-aligned lat/lon rectangle
///
/// Returns the rectangle point nearest to `(lat, lon)` in degree space, which is
/// what distance-to-rectangle needs for small rectangles.
pub fn clamp_to_rect(
    lat: f64,
    lon: f64,
    lat_min: f64,
    lat_max: f64,
    lon_min: f64,
    lon_max: f64,
) -> (f64, f64) {
    (lat.clamp(lat_min, lat_max), lon.clamp(lon_min, lon_max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_zero_distance() {
        assert_eq!(haversine_m(29.975, 31.138, 29.975, 31.138), 0.0);
    }

    #[test]
    fn test_haversine_one_degree_latitude() {
        let d = haversine_m(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_195.0).abs() < 100.0, "got {}", d);
    }

    #[test]
    fn test_haversine_giza_to_cairo() {
        // Great Pyramid to Tahrir Square, roughly 13 km
        let d = haversine_m(29.9792, 31.1342, 30.0444, 31.2357);
        assert!(d > 11_000.0 && d < 14_000.0, "got {}", d);
    }

    #[test]
    fn test_meters_per_deg_lon_shrinks_with_latitude() {
        assert!((meters_per_deg_lon(0.0) - METERS_PER_DEG_LAT).abs() < 1e-6);
        assert!((meters_per_deg_lon(60.0) - METERS_PER_DEG_LAT / 2.0).abs() < 1.0);
        assert!(meters_per_deg_lon(90.0) < 1e-6);
    }

    #[test]
    fn test_clamp_to_rect() {
        assert_eq!(clamp_to_rect(5.0, 5.0, 0.0, 1.0, 0.0, 1.0), (1.0, 1.0));
        assert_eq!(clamp_to_rect(0.5, 0.5, 0.0, 1.0, 0.0, 1.0), (0.5, 0.5));
    }
}
