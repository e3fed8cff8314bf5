use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::dispatch::DispatchRecord;
use crate::models::order::{Order, ProductLine, Waypoint};
use crate::pricing::recommended;
use crate::state::AppState;
use crate::store::{DispatchStore, OrderStore};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/price", patch(update_price))
        .route("/orders/:id/dispatch", get(get_dispatch))
        .route("/orders/:id/dispatch/trigger", post(trigger_dispatch))
        .route("/dispatch/due", get(list_due))
        .route("/dispatch/due/orders", get(list_due_orders))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub requester_id: Uuid,
    pub region: String,
    #[serde(default = "default_product")]
    pub product: ProductLine,
    pub waypoints: Vec<Waypoint>,
    pub price: Option<i64>,
}

fn default_product() -> ProductLine {
    ProductLine::Ride
}

#[derive(Deserialize)]
pub struct UpdatePriceRequest {
    pub old_price: i64,
    pub new_price: i64,
}

#[derive(Deserialize, Default)]
pub struct TriggerRequest {
    #[serde(default)]
    pub reset_radius: bool,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<Json<Order>, AppError> {
    let now = Utc::now();
    let mut order = Order::new(
        payload.requester_id,
        payload.region,
        payload.product,
        payload.waypoints,
        payload.price.unwrap_or(0),
        now,
    )?;

    if payload.price.is_none() {
        let pricing = state.config.pricing;
        order.agreed_price = recommended(
            order.route_length_m(),
            pricing.price_per_km,
            pricing.min_price,
            order.product.rounding(),
        );
    }

    let record = DispatchRecord::searching(order.id, state.config.dispatch.start_radius_m, now);
    let order = state.store.create(order, record).await?;

    info!(
        order_id = %order.id,
        region = %order.region,
        price = order.agreed_price,
        "order created"
    );
    Ok(Json(order))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.store.get(id).await?))
}

async fn update_price(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePriceRequest>,
) -> Result<Json<Order>, AppError> {
    if payload.new_price < 0 {
        return Err(AppError::InvalidInput("price cannot be negative".to_string()));
    }

    let now = Utc::now();
    let order = state
        .store
        .update_price(id, payload.old_price, payload.new_price, now)
        .await?;

    if let Err(err) = state.scheduler.trigger_immediate(id, false, now).await {
        warn!(order_id = %id, error = %err, "price updated but dispatch was not re-triggered");
    }
    Ok(Json(order))
}

async fn get_dispatch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DispatchRecord>, AppError> {
    Ok(Json(state.store.get_dispatch(id).await?))
}

async fn trigger_dispatch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    payload: Option<Json<TriggerRequest>>,
) -> Result<Json<DispatchRecord>, AppError> {
    let payload = payload.map(|Json(payload)| payload).unwrap_or_default();
    state
        .scheduler
        .trigger_immediate(id, payload.reset_radius, Utc::now())
        .await?;
    Ok(Json(state.store.get_dispatch(id).await?))
}

async fn list_due(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<DispatchRecord>>, AppError> {
    Ok(Json(state.store.list_due(Utc::now()).await?))
}

async fn list_due_orders(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Order>>, AppError> {
    Ok(Json(state.store.list_due_orders(Utc::now()).await?))
}
