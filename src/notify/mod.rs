pub mod hub;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::offer::OfferPayload;
use crate::models::order::OrderStatus;

pub use hub::{HubWorker, NotificationHub};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Offer(OfferPayload),
    SearchProgress {
        order_id: Uuid,
        radius_m: f64,
    },
    Searching {
        order_id: Uuid,
        offers: usize,
    },
    SearchTimeout {
        order_id: Uuid,
    },
    ProviderAssigned {
        order_id: Uuid,
        provider_id: Uuid,
    },
    OfferAccepted {
        order_id: Uuid,
    },
    StatusChanged {
        order_id: Uuid,
        status: OrderStatus,
        at: DateTime<Utc>,
    },
}

/// Fire-and-forget push channel. Implementations must not block and never
/// report delivery failures back to the caller.
pub trait NotificationSink: Send + Sync {
    fn send_offer(&self, provider_id: Uuid, offer: OfferPayload);

    fn push_event(&self, party_id: Uuid, event: Event);

    fn broadcast(&self, event: Event);
}
