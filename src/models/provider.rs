use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Availability bucket a provider's position is indexed under.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Free,
    Busy,
}

/// A position fix reported by the provider app alongside an action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Telemetry {
    pub location: GeoPoint,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub speed_mps: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NearbyProvider {
    pub provider_id: Uuid,
    pub distance_m: f64,
    pub location: GeoPoint,
}
