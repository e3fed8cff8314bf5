use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::offers::OfferLedger;
use crate::error::AppError;
use crate::geo::index::GeoIndex;
use crate::models::dispatch::DispatchRecord;
use crate::models::offer::{OfferInsert, OfferPayload};
use crate::models::order::{Order, OrderStatus};
use crate::models::provider::GeoPoint;
use crate::notify::{Event, NotificationSink};
use crate::observability::metrics::Metrics;
use crate::store::{DispatchStore, OrderStore};

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub tick_period: Duration,
    pub start_radius_m: f64,
    pub radius_step_m: f64,
    pub max_radius_m: f64,
    pub candidate_limit: usize,
    pub max_search_duration: Duration,
    pub offer_ttl: Duration,
}

impl DispatchSettings {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.tick_period <= Duration::zero() {
            return Err(AppError::Internal("dispatch tick period must be positive".to_string()));
        }
        if self.start_radius_m <= 0.0 || self.radius_step_m < 0.0 {
            return Err(AppError::Internal("dispatch radius settings must be positive".to_string()));
        }
        if self.max_radius_m < self.start_radius_m {
            return Err(AppError::Internal(
                "max dispatch radius is below the start radius".to_string(),
            ));
        }
        Ok(())
    }

    /// Radius for the next tick after one that produced no offers. Never
    /// shrinks and never passes the configured maximum.
    pub fn next_radius(&self, current_m: f64) -> f64 {
        if current_m >= self.max_radius_m {
            return current_m;
        }
        (current_m + self.radius_step_m).min(self.max_radius_m)
    }

    fn tick_interval(&self) -> std::time::Duration {
        self.tick_period
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(1))
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            tick_period: Duration::seconds(5),
            start_radius_m: 1_000.0,
            radius_step_m: 1_000.0,
            max_radius_m: 5_000.0,
            candidate_limit: 20,
            max_search_duration: Duration::minutes(10),
            offer_ttl: Duration::seconds(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordOutcome {
    Offered { offers: usize },
    Expanded { radius_m: f64 },
    Resolved,
    Malformed,
    TimedOut,
}

impl RecordOutcome {
    fn label(&self) -> &'static str {
        match self {
            RecordOutcome::Offered { .. } => "offered",
            RecordOutcome::Expanded { .. } => "expanded",
            RecordOutcome::Resolved => "resolved",
            RecordOutcome::Malformed => "malformed",
            RecordOutcome::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub offers_created: usize,
    pub expanded: usize,
    pub finished: usize,
    pub failed: usize,
}

pub struct DispatchScheduler {
    orders: Arc<dyn OrderStore>,
    dispatch: Arc<dyn DispatchStore>,
    geo: Arc<dyn GeoIndex>,
    offers: Arc<dyn OfferLedger>,
    notifier: Arc<dyn NotificationSink>,
    settings: DispatchSettings,
    metrics: Metrics,
}

impl DispatchScheduler {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        dispatch: Arc<dyn DispatchStore>,
        geo: Arc<dyn GeoIndex>,
        offers: Arc<dyn OfferLedger>,
        notifier: Arc<dyn NotificationSink>,
        settings: DispatchSettings,
        metrics: Metrics,
    ) -> Self {
        Self {
            orders,
            dispatch,
            geo,
            offers,
            notifier,
            settings,
            metrics,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Ticks until `shutdown` fires. A tick that already started runs to
    /// completion before the loop returns.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            tick_secs = self.settings.tick_period.num_seconds(),
            max_radius_m = self.settings.max_radius_m,
            "dispatch scheduler started"
        );

        let mut interval = tokio::time::interval(self.settings.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let report = self.tick(Utc::now()).await;
            if report.due > 0 {
                debug!(
                    due = report.due,
                    offers_created = report.offers_created,
                    expanded = report.expanded,
                    finished = report.finished,
                    failed = report.failed,
                    "dispatch tick finished"
                );
            }
        }

        info!("dispatch scheduler stopped");
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let start = Instant::now();
        self.metrics.dispatch_ticks_total.inc();

        let due = match self.dispatch.list_due(now).await {
            Ok(due) => due,
            Err(err) => {
                error!(error = %err, "failed to list due dispatch records");
                return TickReport::default();
            }
        };
        self.metrics.dispatch_records_due.set(due.len() as i64);

        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };

        let results = join_all(due.into_iter().map(|record| async move {
            let order_id = record.order_id;
            (order_id, self.process_record(record, now).await)
        }))
        .await;

        for (order_id, result) in results {
            match result {
                Ok(outcome) => {
                    self.metrics
                        .dispatch_outcomes_total
                        .with_label_values(&[outcome.label()])
                        .inc();
                    match outcome {
                        RecordOutcome::Offered { offers } => report.offers_created += offers,
                        RecordOutcome::Expanded { .. } => report.expanded += 1,
                        RecordOutcome::Resolved
                        | RecordOutcome::Malformed
                        | RecordOutcome::TimedOut => report.finished += 1,
                    }
                }
                Err(err) => {
                    self.metrics
                        .dispatch_outcomes_total
                        .with_label_values(&["error"])
                        .inc();
                    report.failed += 1;
                    error!(
                        order_id = %order_id,
                        error = %err,
                        "dispatch attempt failed; retrying next tick"
                    );
                }
            }
        }

        self.metrics
            .dispatch_tick_seconds
            .observe(start.elapsed().as_secs_f64());
        report
    }

    pub async fn process_record(
        &self,
        record: DispatchRecord,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome, AppError> {
        let order_id = record.order_id;
        let order = self.orders.get(order_id).await?;

        if order.status != OrderStatus::Searching {
            self.dispatch.finish(order_id).await?;
            debug!(
                order_id = %order_id,
                status = ?order.status,
                "order resolved elsewhere; dispatch finished"
            );
            return Ok(RecordOutcome::Resolved);
        }

        let Some(origin) = order.origin() else {
            self.dispatch.finish(order_id).await?;
            error!(order_id = %order_id, "order has no route points; dispatch abandoned");
            return Ok(RecordOutcome::Malformed);
        };

        if now - order.created_at >= self.settings.max_search_duration {
            return self.time_out(&order, now).await;
        }

        let candidates = self
            .geo
            .nearby(origin, record.radius_m, self.settings.candidate_limit, &order.region)
            .await?;

        let mut created = 0;
        for candidate in candidates {
            match self
                .offer_to(&order, origin, candidate.provider_id, candidate.distance_m, now)
                .await
            {
                Ok(true) => created += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        order_id = %order_id,
                        provider_id = %candidate.provider_id,
                        error = %err,
                        "failed to offer order to provider"
                    );
                }
            }
        }

        let next_attempt_at = now + self.settings.tick_period;
        if created == 0 {
            let radius_m = self.settings.next_radius(record.radius_m);
            self.dispatch
                .update_radius(order_id, radius_m, next_attempt_at)
                .await?;
            self.notifier.push_event(
                order.requester_id,
                Event::SearchProgress { order_id, radius_m },
            );
            debug!(order_id = %order_id, radius_m, "no new candidates; search radius widened");
            return Ok(RecordOutcome::Expanded { radius_m });
        }

        self.metrics.offers_created_total.inc_by(created as u64);
        self.dispatch
            .update_radius(order_id, record.radius_m, next_attempt_at)
            .await?;
        self.notifier.push_event(
            order.requester_id,
            Event::Searching {
                order_id,
                offers: created,
            },
        );
        info!(order_id = %order_id, offers = created, radius_m = record.radius_m, "offers sent");
        Ok(RecordOutcome::Offered { offers: created })
    }

    /// Re-evaluates an order on the next tick instead of waiting a full period.
    pub async fn trigger_immediate(
        &self,
        order_id: Uuid,
        reset_radius: bool,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let radius = reset_radius.then_some(self.settings.start_radius_m);
        self.dispatch.trigger_immediate(order_id, now, radius).await?;
        info!(order_id = %order_id, reset_radius, "dispatch re-evaluation requested");
        Ok(())
    }

    async fn offer_to(
        &self,
        order: &Order,
        pickup: GeoPoint,
        provider_id: Uuid,
        distance_m: f64,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        if self.offers.already_offered(order.id, provider_id).await? {
            return Ok(false);
        }

        let expires_at = now + self.settings.offer_ttl;
        let inserted = self
            .offers
            .create_offer(order.id, provider_id, Some(order.agreed_price), Some(expires_at), now)
            .await?;
        if inserted == OfferInsert::Existing {
            return Ok(false);
        }

        self.notifier.send_offer(
            provider_id,
            OfferPayload {
                order_id: order.id,
                pickup,
                distance_m,
                price: Some(order.agreed_price),
                expires_at: Some(expires_at),
            },
        );
        Ok(true)
    }

    async fn time_out(&self, order: &Order, now: DateTime<Utc>) -> Result<RecordOutcome, AppError> {
        match self
            .orders
            .update_status_cas(order.id, OrderStatus::Searching, OrderStatus::Expired, now)
            .await
        {
            Ok(_) => {}
            Err(AppError::Conflict(_)) => {
                let current = self.orders.get(order.id).await?;
                self.dispatch.finish(order.id).await?;
                debug!(
                    order_id = %order.id,
                    status = ?current.status,
                    "order left searching before the deadline; not expiring"
                );
                return Ok(RecordOutcome::Resolved);
            }
            Err(err) => return Err(err),
        }

        self.dispatch.finish(order.id).await?;
        self.notifier.push_event(
            order.requester_id,
            Event::SearchTimeout { order_id: order.id },
        );
        info!(order_id = %order.id, "no provider matched before the search deadline");
        Ok(RecordOutcome::TimedOut)
    }
}

#[cfg(test)]
mod tests {
    use super::DispatchSettings;

    #[test]
    fn radius_grows_by_step_and_clamps_at_max() {
        let settings = DispatchSettings {
            start_radius_m: 1_000.0,
            radius_step_m: 1_500.0,
            max_radius_m: 4_000.0,
            ..DispatchSettings::default()
        };

        let mut radius = settings.start_radius_m;
        let mut seen = vec![radius];
        for _ in 0..4 {
            let next = settings.next_radius(radius);
            assert!(next >= radius);
            assert_eq!(next, (radius + 1_500.0).min(4_000.0));
            radius = next;
            seen.push(radius);
        }

        assert_eq!(seen, vec![1_000.0, 2_500.0, 4_000.0, 4_000.0, 4_000.0]);
    }

    #[test]
    fn radius_above_max_is_kept() {
        let settings = DispatchSettings::default();
        assert_eq!(settings.next_radius(9_000.0), 9_000.0);
    }
}
