use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::OrderStatus;
use crate::payments::webhook::{verify_signature, PaymentStatus, WebhookEvent, SIGNATURE_HEADER};
use crate::state::AppState;
use crate::store::OrderStore;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/payments/webhook", post(payment_webhook))
}

#[derive(Serialize)]
pub struct WebhookAck {
    pub order_id: Uuid,
    pub status: OrderStatus,
}

async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    verify_signature(&state.config.webhook_secret, &body, signature)?;

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|err| AppError::InvalidInput(format!("malformed webhook payload: {err}")))?;

    let order = match event.status {
        PaymentStatus::Paid => {
            state
                .lifecycle
                .record_payment(event.order_id, &event.invoice_ref, Utc::now())
                .await?
        }
        PaymentStatus::Failed => {
            warn!(
                order_id = %event.order_id,
                invoice_ref = %event.invoice_ref,
                "payment failed at gateway"
            );
            state.store.get(event.order_id).await?
        }
    };

    Ok(Json(WebhookAck {
        order_id: order.id,
        status: order.status,
    }))
}
