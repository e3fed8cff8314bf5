use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::index::GeoIndex;
use crate::geo::validate_point;
use crate::models::provider::{GeoPoint, NearbyProvider, ProviderStatus};
use crate::state::AppState;

const DEFAULT_NEARBY_LIMIT: usize = 20;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/providers/nearby", get(nearby))
        .route("/providers/:id/location", put(update_location))
        .route("/providers/:id/status", post(move_status))
        .route("/providers/:id/offline", post(go_offline))
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub region: String,
    pub location: GeoPoint,
    #[serde(default = "default_status")]
    pub status: ProviderStatus,
}

fn default_status() -> ProviderStatus {
    ProviderStatus::Free
}

#[derive(Deserialize)]
pub struct MoveStatusRequest {
    pub region: String,
    pub from: ProviderStatus,
    pub to: ProviderStatus,
}

#[derive(Deserialize)]
pub struct OfflineRequest {
    pub region: String,
}

#[derive(Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius_m: f64,
    pub region: String,
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct ProviderPosition {
    pub provider_id: Uuid,
    pub region: String,
    pub status: ProviderStatus,
    pub location: Option<GeoPoint>,
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<ProviderPosition>, AppError> {
    if payload.region.trim().is_empty() {
        return Err(AppError::InvalidInput("region cannot be empty".to_string()));
    }

    state
        .geo
        .update_location(id, payload.location, &payload.region, payload.status)
        .await?;

    Ok(Json(ProviderPosition {
        provider_id: id,
        location: Some(payload.location),
        region: payload.region,
        status: payload.status,
    }))
}

async fn move_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<MoveStatusRequest>,
) -> Result<Json<ProviderPosition>, AppError> {
    state
        .geo
        .move_status(id, &payload.region, payload.from, payload.to)
        .await?;

    Ok(Json(ProviderPosition {
        provider_id: id,
        location: state.geo.position(id, &payload.region, payload.to),
        region: payload.region,
        status: payload.to,
    }))
}

async fn go_offline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<OfflineRequest>,
) -> Result<StatusCode, AppError> {
    state.geo.remove_all(id, &payload.region).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn nearby(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<Vec<NearbyProvider>>, AppError> {
    let center = GeoPoint::new(query.lat, query.lng);
    validate_point(&center)?;
    if !query.radius_m.is_finite() || query.radius_m <= 0.0 {
        return Err(AppError::InvalidInput("radius_m must be positive".to_string()));
    }

    let limit = query.limit.unwrap_or(DEFAULT_NEARBY_LIMIT);
    let providers = state
        .geo
        .nearby(center, query.radius_m, limit, &query.region)
        .await?;
    Ok(Json(providers))
}
