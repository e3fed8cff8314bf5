use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::offers::OfferLedger;
use crate::error::AppError;
use crate::geo::index::GeoIndex;
use crate::models::offer::{Offer, OfferStatus};
use crate::models::order::{Order, OrderStatus};
use crate::models::provider::ProviderStatus;
use crate::notify::{Event, NotificationSink};
use crate::store::{DispatchStore, OrderStore};

/// Turns a provider's answer to an offer into an assignment.
pub struct AssignmentService {
    orders: Arc<dyn OrderStore>,
    dispatch: Arc<dyn DispatchStore>,
    offers: Arc<dyn OfferLedger>,
    geo: Arc<dyn GeoIndex>,
    notifier: Arc<dyn NotificationSink>,
}

impl AssignmentService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        dispatch: Arc<dyn DispatchStore>,
        offers: Arc<dyn OfferLedger>,
        geo: Arc<dyn GeoIndex>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            orders,
            dispatch,
            offers,
            geo,
            notifier,
        }
    }

    pub async fn accept_offer(
        &self,
        order_id: Uuid,
        provider_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Order, AppError> {
        let order = self.orders.get(order_id).await?;
        if order.status != OrderStatus::Searching {
            return Err(AppError::Conflict(format!(
                "order {order_id} is no longer awaiting a provider"
            )));
        }

        self.offers.accept(order_id, provider_id, now).await?;

        let order = match self
            .orders
            .assign_provider(order_id, provider_id, OrderStatus::Assigned, now)
            .await
        {
            Ok(order) => order,
            Err(err) => {
                if let Err(close_err) = self
                    .offers
                    .update_status(order_id, provider_id, OfferStatus::Closed, now)
                    .await
                {
                    warn!(order_id = %order_id, error = %close_err, "failed to close losing offer");
                }
                return Err(err);
            }
        };

        if let Err(err) = self.dispatch.mark_assigned(order_id).await {
            warn!(order_id = %order_id, error = %err, "failed to stop dispatch for assigned order");
        }
        if let Err(err) = self
            .geo
            .move_status(provider_id, &order.region, ProviderStatus::Free, ProviderStatus::Busy)
            .await
        {
            warn!(provider_id = %provider_id, error = %err, "failed to mark provider busy");
        }

        let assigned = Event::ProviderAssigned {
            order_id,
            provider_id,
        };
        self.notifier.push_event(order.requester_id, assigned.clone());
        self.notifier
            .push_event(provider_id, Event::OfferAccepted { order_id });
        self.notifier.broadcast(assigned);

        info!(order_id = %order_id, provider_id = %provider_id, "order assigned");
        Ok(order)
    }

    pub async fn decline_offer(
        &self,
        order_id: Uuid,
        provider_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Offer, AppError> {
        let offer = self.offers.decline(order_id, provider_id, now).await?;
        info!(order_id = %order_id, provider_id = %provider_id, "offer declined");
        Ok(offer)
    }

    pub async fn offers_for(&self, order_id: Uuid) -> Result<Vec<Offer>, AppError> {
        self.orders.get(order_id).await?;
        self.offers.offers_for(order_id).await
    }
}
