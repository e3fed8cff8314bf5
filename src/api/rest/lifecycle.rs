use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::post;
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::lifecycle::service::{ActionInput, LifecycleCommand};
use crate::models::order::Order;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders/:id/actions/:action", post(run_action))
        .route("/orders/:id/fare/adjust", post(adjust_fare))
        .route("/orders/:id/invoice", post(create_invoice))
}

#[derive(Deserialize)]
pub struct AdjustFareRequest {
    #[serde(default)]
    pub discount: i64,
    #[serde(default)]
    pub extra_distance_m: i64,
}

async fn run_action(
    State(state): State<Arc<AppState>>,
    Path((id, command)): Path<(Uuid, LifecycleCommand)>,
    input: Option<Json<ActionInput>>,
) -> Result<Json<Order>, AppError> {
    let input = input.map(|Json(input)| input).unwrap_or_default();
    let order = state
        .lifecycle
        .execute(id, command, input, Utc::now())
        .await?;
    Ok(Json(order))
}

async fn adjust_fare(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdjustFareRequest>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .lifecycle
        .adjust_fare(id, payload.discount, payload.extra_distance_m, Utc::now())
        .await?;
    Ok(Json(order))
}

async fn create_invoice(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.lifecycle.create_invoice(id, Utc::now()).await?))
}
