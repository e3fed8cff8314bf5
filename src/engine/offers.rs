use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::offer::{Offer, OfferInsert, OfferStatus};

/// Proposed order/provider pairings. At most one offer exists per pair and at
/// most one offer per order can be accepted.
#[async_trait]
pub trait OfferLedger: Send + Sync {
    async fn already_offered(&self, order_id: Uuid, provider_id: Uuid) -> Result<bool, AppError>;

    /// Inserts a proposed offer, or only refreshes `touched_at` if the pair
    /// already has one.
    async fn create_offer(
        &self,
        order_id: Uuid,
        provider_id: Uuid,
        price: Option<i64>,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<OfferInsert, AppError>;

    /// Accepts a live proposed offer and closes every other proposed offer of
    /// the same order in one step.
    async fn accept(
        &self,
        order_id: Uuid,
        provider_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Offer, AppError>;

    async fn decline(
        &self,
        order_id: Uuid,
        provider_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Offer, AppError>;

    async fn update_status(
        &self,
        order_id: Uuid,
        provider_id: Uuid,
        status: OfferStatus,
        now: DateTime<Utc>,
    ) -> Result<Offer, AppError>;

    async fn expire_sweep(&self, now: DateTime<Utc>) -> Result<usize, AppError>;

    async fn offers_for(&self, order_id: Uuid) -> Result<Vec<Offer>, AppError>;
}

/// Offers grouped per order; the per-order entry lock is the transaction
/// boundary for accept.
#[derive(Default)]
pub struct MemoryOfferLedger {
    offers: DashMap<Uuid, Vec<Offer>>,
}

impl MemoryOfferLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

fn offer_not_found(order_id: Uuid, provider_id: Uuid) -> AppError {
    AppError::NotFound(format!(
        "no offer of order {order_id} to provider {provider_id}"
    ))
}

#[async_trait]
impl OfferLedger for MemoryOfferLedger {
    async fn already_offered(&self, order_id: Uuid, provider_id: Uuid) -> Result<bool, AppError> {
        Ok(self
            .offers
            .get(&order_id)
            .is_some_and(|offers| offers.iter().any(|offer| offer.provider_id == provider_id)))
    }

    async fn create_offer(
        &self,
        order_id: Uuid,
        provider_id: Uuid,
        price: Option<i64>,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<OfferInsert, AppError> {
        let mut offers = self.offers.entry(order_id).or_default();

        if let Some(existing) = offers.iter_mut().find(|offer| offer.provider_id == provider_id) {
            existing.touched_at = now;
            return Ok(OfferInsert::Existing);
        }

        offers.push(Offer {
            order_id,
            provider_id,
            price,
            status: OfferStatus::Proposed,
            created_at: now,
            touched_at: now,
            expires_at,
        });
        Ok(OfferInsert::Created)
    }

    async fn accept(
        &self,
        order_id: Uuid,
        provider_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Offer, AppError> {
        let mut offers = self
            .offers
            .get_mut(&order_id)
            .ok_or_else(|| offer_not_found(order_id, provider_id))?;

        if offers
            .iter()
            .any(|offer| offer.status == OfferStatus::Accepted && offer.provider_id != provider_id)
        {
            return Err(AppError::Conflict(format!(
                "order {order_id} already has an accepted offer"
            )));
        }

        let offer = offers
            .iter_mut()
            .find(|offer| offer.provider_id == provider_id)
            .ok_or_else(|| offer_not_found(order_id, provider_id))?;
        if offer.status != OfferStatus::Proposed {
            return Err(AppError::Conflict(format!(
                "offer of order {order_id} is {:?}",
                offer.status
            )));
        }
        if offer.is_expired(now) {
            offer.status = OfferStatus::Expired;
            offer.touched_at = now;
            return Err(AppError::Conflict(format!("offer of order {order_id} expired")));
        }

        offer.status = OfferStatus::Accepted;
        offer.touched_at = now;
        let accepted = offer.clone();

        for other in offers
            .iter_mut()
            .filter(|other| other.status == OfferStatus::Proposed)
        {
            other.status = OfferStatus::Closed;
            other.touched_at = now;
        }

        debug!(order_id = %order_id, provider_id = %provider_id, "offer accepted");
        Ok(accepted)
    }

    async fn decline(
        &self,
        order_id: Uuid,
        provider_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Offer, AppError> {
        let mut offers = self
            .offers
            .get_mut(&order_id)
            .ok_or_else(|| offer_not_found(order_id, provider_id))?;
        let offer = offers
            .iter_mut()
            .find(|offer| offer.provider_id == provider_id)
            .ok_or_else(|| offer_not_found(order_id, provider_id))?;

        match offer.status {
            OfferStatus::Declined => {}
            OfferStatus::Proposed => {
                offer.status = OfferStatus::Declined;
                offer.touched_at = now;
            }
            other => {
                return Err(AppError::Conflict(format!(
                    "cannot decline an offer that is {other:?}"
                )));
            }
        }
        Ok(offer.clone())
    }

    async fn update_status(
        &self,
        order_id: Uuid,
        provider_id: Uuid,
        status: OfferStatus,
        now: DateTime<Utc>,
    ) -> Result<Offer, AppError> {
        let mut offers = self
            .offers
            .get_mut(&order_id)
            .ok_or_else(|| offer_not_found(order_id, provider_id))?;
        let offer = offers
            .iter_mut()
            .find(|offer| offer.provider_id == provider_id)
            .ok_or_else(|| offer_not_found(order_id, provider_id))?;

        offer.status = status;
        offer.touched_at = now;
        Ok(offer.clone())
    }

    async fn expire_sweep(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let mut expired = 0;
        for mut entry in self.offers.iter_mut() {
            for offer in entry
                .value_mut()
                .iter_mut()
                .filter(|offer| offer.status == OfferStatus::Proposed && offer.is_expired(now))
            {
                offer.status = OfferStatus::Expired;
                offer.touched_at = now;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn offers_for(&self, order_id: Uuid) -> Result<Vec<Offer>, AppError> {
        Ok(self
            .offers
            .get(&order_id)
            .map(|offers| offers.value().clone())
            .unwrap_or_default())
    }
}
