pub mod index;

use crate::error::AppError;
use crate::models::provider::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;
/// Fixes this close to (0, 0) come from devices without a GPS lock.
const NULL_ISLAND_EPSILON: f64 = 1e-4;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

pub fn haversine_m(a: &GeoPoint, b: &GeoPoint) -> f64 {
    haversine_km(a, b) * 1_000.0
}

pub fn validate_point(point: &GeoPoint) -> Result<(), AppError> {
    if !point.lat.is_finite() || !point.lng.is_finite() {
        return Err(AppError::InvalidInput("coordinates must be finite".to_string()));
    }
    if point.lng.abs() > 180.0 || point.lat.abs() > 90.0 {
        return Err(AppError::InvalidInput(format!(
            "coordinates out of range: lat={}, lng={}",
            point.lat, point.lng
        )));
    }
    if point.lat.abs() < NULL_ISLAND_EPSILON && point.lng.abs() < NULL_ISLAND_EPSILON {
        return Err(AppError::InvalidInput(
            "coordinates too close to (0, 0)".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{haversine_km, haversine_m, validate_point};
    use crate::error::AppError;
    use crate::models::provider::GeoPoint;

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: 53.5511,
            lng: 9.9937,
        };
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint {
            lat: 51.5074,
            lng: -0.1278,
        };
        let paris = GeoPoint {
            lat: 48.8566,
            lng: 2.3522,
        };
        let distance = haversine_m(&london, &paris);
        assert!((distance - 343_000.0).abs() < 5_000.0);
    }

    #[test]
    fn rejects_out_of_range_and_null_island() {
        for (lat, lng) in [(91.0, 10.0), (10.0, -180.5), (0.0, 0.0), (0.00001, -0.00002)] {
            let result = validate_point(&GeoPoint { lat, lng });
            assert!(matches!(result, Err(AppError::InvalidInput(_))), "{lat},{lng}");
        }

        assert!(validate_point(&GeoPoint { lat: 0.0, lng: 9.99 }).is_ok());
    }
}
