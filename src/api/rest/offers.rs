use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::offer::Offer;
use crate::models::order::Order;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders/:id/offers", get(list_offers))
        .route("/orders/:id/offers/:provider_id/accept", post(accept_offer))
        .route("/orders/:id/offers/:provider_id/decline", post(decline_offer))
}

async fn list_offers(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Offer>>, AppError> {
    Ok(Json(state.assignments.offers_for(id).await?))
}

async fn accept_offer(
    State(state): State<Arc<AppState>>,
    Path((id, provider_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .assignments
        .accept_offer(id, provider_id, Utc::now())
        .await?;
    Ok(Json(order))
}

async fn decline_offer(
    State(state): State<Arc<AppState>>,
    Path((id, provider_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Offer>, AppError> {
    let offer = state
        .assignments
        .decline_offer(id, provider_id, Utc::now())
        .await?;
    Ok(Json(offer))
}
