use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Proposed,
    Accepted,
    Declined,
    Expired,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Offer {
    pub order_id: Uuid,
    pub provider_id: Uuid,
    pub price: Option<i64>,
    pub status: OfferStatus,
    pub created_at: DateTime<Utc>,
    /// Housekeeping: last time a dispatch pass touched this offer.
    pub touched_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Offer {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Whether `create_offer` inserted a new row or found an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferInsert {
    Created,
    Existing,
}

/// Payload pushed to a provider when an order is offered to them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferPayload {
    pub order_id: Uuid,
    pub pickup: crate::models::provider::GeoPoint,
    pub distance_m: f64,
    pub price: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
}
