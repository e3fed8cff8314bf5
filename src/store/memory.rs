use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::dispatch::{DispatchRecord, DispatchState};
use crate::models::order::{Order, OrderStatus};
use crate::store::{DispatchStore, OrderStore};

/// DashMap-backed order and dispatch tables. Each conditional write runs
/// under the row's shard lock, which gives it compare-and-swap semantics.
#[derive(Default)]
pub struct MemoryStore {
    orders: DashMap<Uuid, Order>,
    dispatch: DashMap<Uuid, DispatchRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn searching_count(&self) -> usize {
        self.dispatch
            .iter()
            .filter(|entry| entry.state == DispatchState::Searching)
            .count()
    }
}

fn order_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("order {id} not found"))
}

fn dispatch_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("dispatch record for order {id} not found"))
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn get(&self, id: Uuid) -> Result<Order, AppError> {
        self.orders
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| order_not_found(id))
    }

    async fn list_due_orders(&self, now: DateTime<Utc>) -> Result<Vec<Order>, AppError> {
        let due: Vec<Uuid> = self
            .dispatch
            .iter()
            .filter(|entry| entry.is_due(now))
            .map(|entry| entry.order_id)
            .collect();

        Ok(due
            .into_iter()
            .filter_map(|id| self.orders.get(&id).map(|entry| entry.value().clone()))
            .filter(|order| order.status == OrderStatus::Searching)
            .collect())
    }

    async fn create(&self, order: Order, dispatch: DispatchRecord) -> Result<Order, AppError> {
        if dispatch.order_id != order.id {
            return Err(AppError::InvalidInput(
                "dispatch record belongs to another order".to_string(),
            ));
        }
        match self.orders.entry(order.id) {
            Entry::Occupied(_) => {
                return Err(AppError::Conflict(format!("order {} already exists", order.id)));
            }
            Entry::Vacant(slot) => {
                slot.insert(order.clone());
            }
        }

        self.dispatch.insert(dispatch.order_id, dispatch);
        Ok(order)
    }

    async fn update_status_cas(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, AppError> {
        let mut order = self.orders.get_mut(&id).ok_or_else(|| order_not_found(id))?;
        if order.status != from {
            return Err(AppError::Conflict(format!(
                "order {id} is {:?}, expected {from:?}",
                order.status
            )));
        }

        order.set_status(to, at, None);
        order.version += 1;
        Ok(order.clone())
    }

    async fn assign_provider(
        &self,
        id: Uuid,
        provider_id: Uuid,
        next_status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, AppError> {
        let mut order = self.orders.get_mut(&id).ok_or_else(|| order_not_found(id))?;
        if order.status != OrderStatus::Searching || order.provider_id.is_some() {
            return Err(AppError::Conflict(format!(
                "order {id} is no longer awaiting a provider"
            )));
        }

        order.provider_id = Some(provider_id);
        order.set_status(next_status, at, None);
        order.version += 1;
        Ok(order.clone())
    }

    async fn update_price(
        &self,
        id: Uuid,
        old_price: i64,
        new_price: i64,
        at: DateTime<Utc>,
    ) -> Result<Order, AppError> {
        let mut order = self.orders.get_mut(&id).ok_or_else(|| order_not_found(id))?;
        if order.status != OrderStatus::Searching {
            return Err(AppError::Conflict(format!(
                "price of order {id} can only change while searching"
            )));
        }
        if order.agreed_price != old_price {
            return Err(AppError::Conflict(format!(
                "price of order {id} is {}, expected {old_price}",
                order.agreed_price
            )));
        }

        order.agreed_price = new_price;
        order.updated_at = at;
        order.version += 1;
        Ok(order.clone())
    }

    async fn save(&self, order: &mut Order) -> Result<(), AppError> {
        let mut stored = self
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| order_not_found(order.id))?;
        if stored.version != order.version {
            return Err(AppError::Conflict(format!(
                "order {} was modified concurrently",
                order.id
            )));
        }

        order.version += 1;
        *stored = order.clone();
        Ok(())
    }
}

#[async_trait]
impl DispatchStore for MemoryStore {
    async fn get_dispatch(&self, order_id: Uuid) -> Result<DispatchRecord, AppError> {
        self.dispatch
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| dispatch_not_found(order_id))
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<DispatchRecord>, AppError> {
        Ok(self
            .dispatch
            .iter()
            .filter(|entry| entry.is_due(now))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn update_radius(
        &self,
        order_id: Uuid,
        radius_m: f64,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut record = self
            .dispatch
            .get_mut(&order_id)
            .ok_or_else(|| dispatch_not_found(order_id))?;
        if record.state != DispatchState::Searching {
            return Err(AppError::Conflict(format!(
                "dispatch for order {order_id} is no longer searching"
            )));
        }

        record.radius_m = radius_m;
        record.next_attempt_at = next_attempt_at;
        Ok(())
    }

    async fn mark_assigned(&self, order_id: Uuid) -> Result<(), AppError> {
        let mut record = self
            .dispatch
            .get_mut(&order_id)
            .ok_or_else(|| dispatch_not_found(order_id))?;
        record.state = DispatchState::Assigned;
        Ok(())
    }

    async fn finish(&self, order_id: Uuid) -> Result<(), AppError> {
        let mut record = self
            .dispatch
            .get_mut(&order_id)
            .ok_or_else(|| dispatch_not_found(order_id))?;
        if record.state == DispatchState::Searching {
            record.state = DispatchState::Finished;
        }
        Ok(())
    }

    async fn trigger_immediate(
        &self,
        order_id: Uuid,
        next_attempt_at: DateTime<Utc>,
        reset_radius_m: Option<f64>,
    ) -> Result<(), AppError> {
        let mut record = self
            .dispatch
            .get_mut(&order_id)
            .ok_or_else(|| dispatch_not_found(order_id))?;
        if record.state != DispatchState::Searching {
            return Err(AppError::Conflict(format!(
                "dispatch for order {order_id} is no longer searching"
            )));
        }

        record.next_attempt_at = next_attempt_at;
        if let Some(radius_m) = reset_radius_m {
            record.radius_m = radius_m;
        }
        Ok(())
    }
}
