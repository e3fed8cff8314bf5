//! Repository contracts the dispatch engine and the lifecycle persist through.
//!
//! Writes are conditional: a status or version mismatch surfaces as
//! [`AppError::Conflict`] instead of overwriting a concurrent change.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::dispatch::DispatchRecord;
use crate::models::order::{Order, OrderStatus};

pub use memory::MemoryStore;

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Order, AppError>;

    /// Orders still awaiting a match whose dispatch attempt is due.
    async fn list_due_orders(&self, now: DateTime<Utc>) -> Result<Vec<Order>, AppError>;

    async fn create(&self, order: Order, dispatch: DispatchRecord) -> Result<Order, AppError>;

    async fn update_status_cas(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, AppError>;

    /// Attaches a provider; only succeeds while the order is still searching.
    async fn assign_provider(
        &self,
        id: Uuid,
        provider_id: Uuid,
        next_status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, AppError>;

    async fn update_price(
        &self,
        id: Uuid,
        old_price: i64,
        new_price: i64,
        at: DateTime<Utc>,
    ) -> Result<Order, AppError>;

    /// Persists the whole aggregate if its version still matches the stored
    /// one, then bumps `order.version`.
    async fn save(&self, order: &mut Order) -> Result<(), AppError>;
}

#[async_trait]
pub trait DispatchStore: Send + Sync {
    async fn get_dispatch(&self, order_id: Uuid) -> Result<DispatchRecord, AppError>;

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<DispatchRecord>, AppError>;

    async fn update_radius(
        &self,
        order_id: Uuid,
        radius_m: f64,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn mark_assigned(&self, order_id: Uuid) -> Result<(), AppError>;

    async fn finish(&self, order_id: Uuid) -> Result<(), AppError>;

    /// Makes a searching record due at `next_attempt_at`, optionally resetting its radius.
    async fn trigger_immediate(
        &self,
        order_id: Uuid,
        next_attempt_at: DateTime<Utc>,
        reset_radius_m: Option<f64>,
    ) -> Result<(), AppError>;
}
