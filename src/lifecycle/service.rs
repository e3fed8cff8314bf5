use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::index::GeoIndex;
use crate::lifecycle::policy::LifecyclePolicy;
use crate::lifecycle::{ActionOutcome, CancelParty, OrderLifecycle};
use crate::models::order::{Order, OrderStatus};
use crate::models::provider::{ProviderStatus, Telemetry};
use crate::notify::{Event, NotificationSink};
use crate::observability::metrics::Metrics;
use crate::payments::PaymentGateway;
use crate::pricing::PricingSettings;
use crate::store::{DispatchStore, OrderStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleCommand {
    Arrive,
    AdvanceWaiting,
    Start,
    ReachWaypoint,
    Pause,
    Resume,
    Finish,
    ConfirmCash,
    CancelByRequester,
    CancelByProvider,
    NoShow,
    Close,
}

impl LifecycleCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleCommand::Arrive => "arrive",
            LifecycleCommand::AdvanceWaiting => "advance_waiting",
            LifecycleCommand::Start => "start",
            LifecycleCommand::ReachWaypoint => "reach_waypoint",
            LifecycleCommand::Pause => "pause",
            LifecycleCommand::Resume => "resume",
            LifecycleCommand::Finish => "finish",
            LifecycleCommand::ConfirmCash => "confirm_cash",
            LifecycleCommand::CancelByRequester => "cancel_by_requester",
            LifecycleCommand::CancelByProvider => "cancel_by_provider",
            LifecycleCommand::NoShow => "no_show",
            LifecycleCommand::Close => "close",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionInput {
    #[serde(default)]
    pub telemetry: Option<Telemetry>,
    #[serde(default)]
    pub pin_confirmed: bool,
}

/// Loads an order, applies one action to it and persists the result with a
/// version check. Side effects (notifications, provider release) run only
/// after the save succeeded.
pub struct LifecycleService {
    orders: Arc<dyn OrderStore>,
    dispatch: Arc<dyn DispatchStore>,
    geo: Arc<dyn GeoIndex>,
    notifier: Arc<dyn NotificationSink>,
    payments: Arc<dyn PaymentGateway>,
    policy: LifecyclePolicy,
    pricing: PricingSettings,
    currency: String,
    metrics: Metrics,
}

impl LifecycleService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders: Arc<dyn OrderStore>,
        dispatch: Arc<dyn DispatchStore>,
        geo: Arc<dyn GeoIndex>,
        notifier: Arc<dyn NotificationSink>,
        payments: Arc<dyn PaymentGateway>,
        policy: LifecyclePolicy,
        pricing: PricingSettings,
        currency: String,
        metrics: Metrics,
    ) -> Self {
        Self {
            orders,
            dispatch,
            geo,
            notifier,
            payments,
            policy,
            pricing,
            currency,
            metrics,
        }
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    pub async fn execute(
        &self,
        order_id: Uuid,
        command: LifecycleCommand,
        input: ActionInput,
        now: DateTime<Utc>,
    ) -> Result<Order, AppError> {
        let mut order = self.orders.get(order_id).await?;
        let before = order.status;
        let throttles_before = order.throttles.clone();

        let result = apply(&mut order, &self.policy, command, &input, now);
        self.record(command.as_str(), &result);

        match result {
            Ok(ActionOutcome::Unchanged) => Ok(order),
            Ok(ActionOutcome::Applied) => {
                self.orders.save(&mut order).await?;
                info!(
                    order_id = %order_id,
                    action = command.as_str(),
                    status = ?order.status,
                    "lifecycle action applied"
                );
                self.after_save(before, &order).await;
                Ok(order)
            }
            Err(err) => {
                if order.throttles != throttles_before {
                    if let Err(save_err) = self.orders.save(&mut order).await {
                        warn!(
                            order_id = %order_id,
                            error = %save_err,
                            "failed to persist action throttle"
                        );
                    }
                }
                Err(err)
            }
        }
    }

    pub async fn adjust_fare(
        &self,
        order_id: Uuid,
        discount: i64,
        extra_distance_m: i64,
        now: DateTime<Utc>,
    ) -> Result<Order, AppError> {
        let mut order = self.orders.get(order_id).await?;
        let result = OrderLifecycle::new(&mut order, &self.policy).adjust_fare(
            discount,
            extra_distance_m,
            self.pricing.price_per_km,
            now,
        );
        self.record("adjust_fare", &result);

        if result? == ActionOutcome::Applied {
            self.orders.save(&mut order).await?;
            info!(order_id = %order_id, total = order.fare.total, "fare adjusted");
        }
        Ok(order)
    }

    /// Issues an invoice for the fare total. Repeated calls return the order
    /// with the invoice issued the first time.
    pub async fn create_invoice(
        &self,
        order_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Order, AppError> {
        let mut order = self.orders.get(order_id).await?;
        match order.status {
            OrderStatus::AtLastPoint | OrderStatus::Completed => {}
            other => {
                return Err(AppError::Conflict(format!(
                    "cannot invoice order {order_id} while it is {other:?}"
                )));
            }
        }
        if order.invoice_ref.is_some() {
            return Ok(order);
        }

        let invoice_ref = self
            .payments
            .create_invoice(order_id, order.fare.total, &self.currency)
            .await?;
        order.invoice_ref = Some(invoice_ref);
        order.updated_at = now;
        self.orders.save(&mut order).await?;
        Ok(order)
    }

    /// Settles the order after the gateway reported `invoice_ref` as paid.
    pub async fn record_payment(
        &self,
        order_id: Uuid,
        invoice_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<Order, AppError> {
        let mut order = self.orders.get(order_id).await?;
        if order.invoice_ref.as_deref() != Some(invoice_ref) {
            return Err(AppError::Conflict(format!(
                "invoice {invoice_ref} does not belong to order {order_id}"
            )));
        }

        let before = order.status;
        let result = OrderLifecycle::new(&mut order, &self.policy).record_online_payment(now);
        self.record("record_payment", &result);

        if result? == ActionOutcome::Applied {
            self.orders.save(&mut order).await?;
            info!(order_id = %order_id, invoice_ref, "online payment recorded");
            self.after_save(before, &order).await;
        }
        Ok(order)
    }

    fn record(&self, action: &str, result: &Result<ActionOutcome, AppError>) {
        let outcome = match result {
            Ok(ActionOutcome::Applied) => "applied",
            Ok(ActionOutcome::Unchanged) => "unchanged",
            Err(err) => err.code(),
        };
        self.metrics
            .lifecycle_actions_total
            .with_label_values(&[action, outcome])
            .inc();
    }

    async fn after_save(&self, before: OrderStatus, order: &Order) {
        if order.status == before {
            return;
        }

        if before == OrderStatus::Searching {
            if let Err(err) = self.dispatch.finish(order.id).await {
                warn!(order_id = %order.id, error = %err, "failed to stop dispatch");
            }
        }

        if !before.is_terminal() && order.status.is_terminal() {
            if let Some(provider_id) = order.provider_id {
                if let Err(err) = self
                    .geo
                    .move_status(
                        provider_id,
                        &order.region,
                        ProviderStatus::Busy,
                        ProviderStatus::Free,
                    )
                    .await
                {
                    warn!(provider_id = %provider_id, error = %err, "failed to release provider");
                }
            }
        }

        let event = Event::StatusChanged {
            order_id: order.id,
            status: order.status,
            at: order.updated_at,
        };
        if let Some(provider_id) = order.provider_id {
            self.notifier.push_event(provider_id, event.clone());
        }
        self.notifier.push_event(order.requester_id, event);
    }
}

fn apply(
    order: &mut Order,
    policy: &LifecyclePolicy,
    command: LifecycleCommand,
    input: &ActionInput,
    now: DateTime<Utc>,
) -> Result<ActionOutcome, AppError> {
    let telemetry = input.telemetry.as_ref();
    let mut lifecycle = OrderLifecycle::new(order, policy);
    match command {
        LifecycleCommand::Arrive => lifecycle.mark_at_pickup(now, telemetry),
        LifecycleCommand::AdvanceWaiting => lifecycle.advance_waiting(now),
        LifecycleCommand::Start => lifecycle.start_trip(now, telemetry, input.pin_confirmed),
        LifecycleCommand::ReachWaypoint => lifecycle.reach_waypoint(now, telemetry),
        LifecycleCommand::Pause => lifecycle.start_pause(now),
        LifecycleCommand::Resume => lifecycle.end_pause(now),
        LifecycleCommand::Finish => lifecycle.finish_trip(now, telemetry),
        LifecycleCommand::ConfirmCash => lifecycle.confirm_cash_payment(now),
        LifecycleCommand::CancelByRequester => lifecycle.cancel(CancelParty::Requester, now),
        LifecycleCommand::CancelByProvider => lifecycle.cancel(CancelParty::Provider, now),
        LifecycleCommand::NoShow => lifecycle.mark_no_show(now, telemetry),
        LifecycleCommand::Close => lifecycle.close(now),
    }
}
