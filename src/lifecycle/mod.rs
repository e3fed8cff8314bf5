//! Per-order state machine driven by provider and requester actions.
//!
//! Every action first checks whether its target state was already reached
//! (returning [`ActionOutcome::Unchanged`]), then the transition table, then
//! the press throttle, then geography and telemetry. Nothing on the order
//! changes before those checks pass, apart from the throttle counter.

pub mod billing;
pub mod policy;
pub mod service;
pub mod throttle;
pub mod transitions;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::AppError;
use crate::geo::{haversine_m, validate_point};
use crate::lifecycle::billing::{close_open_session, open_session};
use crate::lifecycle::policy::LifecyclePolicy;
use crate::lifecycle::throttle::ActionKind;
use crate::lifecycle::transitions::ensure_transition;
use crate::models::fare::WaitKind;
use crate::models::order::{Order, OrderStatus};
use crate::models::provider::{GeoPoint, Telemetry};
use crate::pricing::distance_amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Applied,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelParty {
    Requester,
    Provider,
}

impl CancelParty {
    fn target(self) -> OrderStatus {
        match self {
            CancelParty::Requester => OrderStatus::CanceledByRequester,
            CancelParty::Provider => OrderStatus::CanceledByProvider,
        }
    }

    fn action(self) -> ActionKind {
        match self {
            CancelParty::Requester => ActionKind::CancelByRequester,
            CancelParty::Provider => ActionKind::CancelByProvider,
        }
    }
}

enum Motion {
    Stationary,
    Any,
}

pub struct OrderLifecycle<'a> {
    order: &'a mut Order,
    policy: &'a LifecyclePolicy,
}

impl<'a> OrderLifecycle<'a> {
    pub fn new(order: &'a mut Order, policy: &'a LifecyclePolicy) -> Self {
        Self { order, policy }
    }

    pub fn mark_at_pickup(
        &mut self,
        now: DateTime<Utc>,
        telemetry: Option<&Telemetry>,
    ) -> Result<ActionOutcome, AppError> {
        if self.order.status.has_reached(OrderStatus::WaitingFree) {
            return Ok(ActionOutcome::Unchanged);
        }
        match self.order.status {
            OrderStatus::Assigned => {
                ensure_transition(self.order.status, OrderStatus::DriverAtPickup)?
            }
            OrderStatus::DriverAtPickup => {}
            other => return Err(invalid_action("arrive", other)),
        }
        self.press(ActionKind::Arrive, now)?;
        let (pickup, radius) = self.arrival_target()?;
        self.check_position(telemetry, now, pickup, radius, Motion::Stationary)?;

        self.order.arrived_at.get_or_insert(now);
        self.order.mark_waypoint_reached(0, now);
        if self.order.status == OrderStatus::Assigned {
            self.order.set_status(OrderStatus::DriverAtPickup, now, None);
        }
        open_session(self.order, WaitKind::Free, now, self.policy);
        self.order.set_status(OrderStatus::WaitingFree, now, None);
        Ok(ActionOutcome::Applied)
    }

    /// Switches free waiting to paid waiting once the free window is used up.
    pub fn advance_waiting(&mut self, now: DateTime<Utc>) -> Result<ActionOutcome, AppError> {
        if self.order.status != OrderStatus::WaitingFree {
            return Ok(ActionOutcome::Unchanged);
        }
        let Some(free) = self
            .order
            .open_wait_session()
            .filter(|session| session.kind == WaitKind::Free)
        else {
            return Ok(ActionOutcome::Unchanged);
        };
        if now - free.started_at < self.policy.free_waiting {
            return Ok(ActionOutcome::Unchanged);
        }

        close_open_session(self.order, now, self.policy);
        open_session(self.order, WaitKind::Paid, now, self.policy);
        self.order
            .set_status(OrderStatus::WaitingPaid, now, Some("free waiting elapsed"));
        Ok(ActionOutcome::Applied)
    }

    pub fn start_trip(
        &mut self,
        now: DateTime<Utc>,
        telemetry: Option<&Telemetry>,
        pin_confirmed: bool,
    ) -> Result<ActionOutcome, AppError> {
        if self.order.status.has_reached(OrderStatus::InProgress) {
            return Ok(ActionOutcome::Unchanged);
        }
        match self.order.status {
            OrderStatus::DriverAtPickup | OrderStatus::WaitingFree | OrderStatus::WaitingPaid => {}
            other => return Err(invalid_action("start trip", other)),
        }
        self.press(ActionKind::StartTrip, now)?;
        if self.policy.boarding_pin_required && !pin_confirmed {
            return Err(AppError::PinRequired);
        }
        let pickup = self.pickup()?;
        self.check_position(telemetry, now, pickup, self.policy.start_radius_m, Motion::Any)?;

        self.lapse_free_waiting(now);
        close_open_session(self.order, now, self.policy);
        self.order.started_at.get_or_insert(now);
        self.order.fare.seed_base(self.order.agreed_price);
        self.order.set_status(OrderStatus::InProgress, now, None);
        Ok(ActionOutcome::Applied)
    }

    pub fn reach_waypoint(
        &mut self,
        now: DateTime<Utc>,
        telemetry: Option<&Telemetry>,
    ) -> Result<ActionOutcome, AppError> {
        if self.order.status != OrderStatus::InProgress {
            return Err(invalid_action("reach waypoint", self.order.status));
        }
        let index = self.order.next_waypoint.max(1);
        if index >= self.order.finish_index() {
            return Ok(ActionOutcome::Unchanged);
        }
        self.press(ActionKind::ReachWaypoint, now)?;
        let waypoint = &self.order.waypoints[index];
        let (target, radius) = (waypoint.location, self.policy.waypoint_radius(waypoint));
        self.check_position(telemetry, now, target, radius, Motion::Any)?;

        self.order.mark_waypoint_reached(index, now);
        self.order.updated_at = now;
        Ok(ActionOutcome::Applied)
    }

    pub fn start_pause(&mut self, now: DateTime<Utc>) -> Result<ActionOutcome, AppError> {
        if self.order.status != OrderStatus::InProgress {
            return Err(invalid_action("start pause", self.order.status));
        }
        if self.open_kind() == Some(WaitKind::Pause) {
            return Ok(ActionOutcome::Unchanged);
        }
        self.press(ActionKind::StartPause, now)?;

        open_session(self.order, WaitKind::Pause, now, self.policy);
        self.order.updated_at = now;
        Ok(ActionOutcome::Applied)
    }

    pub fn end_pause(&mut self, now: DateTime<Utc>) -> Result<ActionOutcome, AppError> {
        if self.order.status != OrderStatus::InProgress {
            return Err(invalid_action("end pause", self.order.status));
        }
        if self.open_kind() != Some(WaitKind::Pause) {
            return Ok(ActionOutcome::Unchanged);
        }
        self.press(ActionKind::EndPause, now)?;

        close_open_session(self.order, now, self.policy);
        self.order.updated_at = now;
        Ok(ActionOutcome::Applied)
    }

    pub fn finish_trip(
        &mut self,
        now: DateTime<Utc>,
        telemetry: Option<&Telemetry>,
    ) -> Result<ActionOutcome, AppError> {
        if self.order.status.has_reached(OrderStatus::AtLastPoint) {
            return Ok(ActionOutcome::Unchanged);
        }
        if self.order.status != OrderStatus::InProgress {
            return Err(invalid_action("finish trip", self.order.status));
        }
        self.press(ActionKind::FinishTrip, now)?;
        let finish_index = self.order.finish_index();
        let finish = &self.order.waypoints[finish_index];
        let (target, radius) = (finish.location, self.policy.finish_radius(finish));
        self.check_position(telemetry, now, target, radius, Motion::Any)?;

        close_open_session(self.order, now, self.policy);
        self.order.mark_waypoint_reached(finish_index, now);
        self.order.finished_at.get_or_insert(now);
        self.order.set_status(OrderStatus::AtLastPoint, now, None);
        Ok(ActionOutcome::Applied)
    }

    pub fn confirm_cash_payment(&mut self, now: DateTime<Utc>) -> Result<ActionOutcome, AppError> {
        if self.order.status.has_reached(OrderStatus::Completed) {
            return Ok(ActionOutcome::Unchanged);
        }
        if self.order.status != OrderStatus::AtLastPoint {
            return Err(invalid_action("confirm cash payment", self.order.status));
        }
        self.press(ActionKind::ConfirmCash, now)?;

        close_open_session(self.order, now, self.policy);
        self.order.payment_confirmed_at.get_or_insert(now);
        self.order
            .set_status(OrderStatus::Completed, now, Some("cash payment confirmed"));
        Ok(ActionOutcome::Applied)
    }

    /// Settles an order paid through the payment gateway and closes it.
    pub fn record_online_payment(&mut self, now: DateTime<Utc>) -> Result<ActionOutcome, AppError> {
        match self.order.status {
            OrderStatus::Closed => return Ok(ActionOutcome::Unchanged),
            OrderStatus::AtLastPoint | OrderStatus::Completed => {}
            other => return Err(invalid_action("record payment", other)),
        }

        close_open_session(self.order, now, self.policy);
        self.order.payment_confirmed_at.get_or_insert(now);
        if self.order.status == OrderStatus::AtLastPoint {
            self.order
                .set_status(OrderStatus::Completed, now, Some("online payment received"));
        }
        self.order.set_status(OrderStatus::Closed, now, None);
        Ok(ActionOutcome::Applied)
    }

    pub fn close(&mut self, now: DateTime<Utc>) -> Result<ActionOutcome, AppError> {
        if self.order.status == OrderStatus::Closed {
            return Ok(ActionOutcome::Unchanged);
        }
        ensure_transition(self.order.status, OrderStatus::Closed)?;

        self.order.set_status(OrderStatus::Closed, now, None);
        Ok(ActionOutcome::Applied)
    }

    pub fn cancel(
        &mut self,
        party: CancelParty,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome, AppError> {
        let target = party.target();
        if self.order.status == target {
            return Ok(ActionOutcome::Unchanged);
        }
        ensure_transition(self.order.status, target)?;
        self.press(party.action(), now)?;

        self.lapse_free_waiting(now);
        close_open_session(self.order, now, self.policy);
        self.order.set_status(target, now, None);
        Ok(ActionOutcome::Applied)
    }

    pub fn mark_no_show(
        &mut self,
        now: DateTime<Utc>,
        telemetry: Option<&Telemetry>,
    ) -> Result<ActionOutcome, AppError> {
        if self.order.status == OrderStatus::NoShow {
            return Ok(ActionOutcome::Unchanged);
        }
        ensure_transition(self.order.status, OrderStatus::NoShow)?;
        self.press(ActionKind::NoShow, now)?;
        let (pickup, radius) = self.arrival_target()?;
        self.check_position(telemetry, now, pickup, radius, Motion::Stationary)?;

        self.lapse_free_waiting(now);
        close_open_session(self.order, now, self.policy);
        self.order.set_status(OrderStatus::NoShow, now, None);
        Ok(ActionOutcome::Applied)
    }

    /// Adds a discount and prices extra distance into the running fare.
    pub fn adjust_fare(
        &mut self,
        discount: i64,
        extra_distance_m: i64,
        price_per_km: i64,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome, AppError> {
        if discount < 0 || extra_distance_m < 0 {
            return Err(AppError::InvalidInput(
                "fare adjustments must not be negative".to_string(),
            ));
        }
        match self.order.status {
            OrderStatus::InProgress | OrderStatus::AtLastPoint | OrderStatus::Completed => {}
            other => return Err(invalid_action("adjust fare", other)),
        }
        if let Some(invoice_ref) = &self.order.invoice_ref {
            return Err(AppError::Conflict(format!(
                "fare is locked by invoice {invoice_ref}"
            )));
        }
        if discount == 0 && extra_distance_m == 0 {
            return Ok(ActionOutcome::Unchanged);
        }

        let rounding = self.order.product.rounding();
        let amount = distance_amount(extra_distance_m, price_per_km, rounding);
        self.order
            .fare
            .apply_adjustment(extra_distance_m, amount, discount)?;
        self.order.updated_at = now;
        Ok(ActionOutcome::Applied)
    }

    fn pickup(&self) -> Result<GeoPoint, AppError> {
        self.order
            .origin()
            .ok_or_else(|| AppError::Internal(format!("order {} has no route", self.order.id)))
    }

    fn arrival_target(&self) -> Result<(GeoPoint, f64), AppError> {
        let pickup = self
            .order
            .waypoints
            .first()
            .ok_or_else(|| AppError::Internal(format!("order {} has no route", self.order.id)))?;
        Ok((pickup.location, self.policy.arrival_radius(pickup)))
    }

    /// Moves a free session that outlived its window to paid waiting, split at
    /// the window boundary, so closing it bills the overrun.
    fn lapse_free_waiting(&mut self, now: DateTime<Utc>) {
        if self.order.status != OrderStatus::WaitingFree {
            return;
        }
        let Some(started_at) = self
            .order
            .open_wait_session()
            .filter(|session| session.kind == WaitKind::Free)
            .map(|session| session.started_at)
        else {
            return;
        };
        let boundary = started_at + self.policy.free_waiting;
        if now < boundary {
            return;
        }

        close_open_session(self.order, boundary, self.policy);
        open_session(self.order, WaitKind::Paid, boundary, self.policy);
        self.order
            .set_status(OrderStatus::WaitingPaid, boundary, Some("free waiting elapsed"));
    }

    fn open_kind(&self) -> Option<WaitKind> {
        self.order.open_wait_session().map(|session| session.kind)
    }

    fn press(&mut self, kind: ActionKind, now: DateTime<Utc>) -> Result<(), AppError> {
        let Some(policy) = self.policy.throttle_for(kind) else {
            return Ok(());
        };
        self.order.throttles.entry(kind).or_default().press(policy, now)
    }

    fn check_position(
        &self,
        telemetry: Option<&Telemetry>,
        now: DateTime<Utc>,
        target: GeoPoint,
        radius_m: f64,
        motion: Motion,
    ) -> Result<(), AppError> {
        let fix = telemetry
            .ok_or_else(|| AppError::OutdatedTelemetry("no position fix supplied".to_string()))?;

        let age = now - fix.recorded_at;
        if age > self.policy.telemetry_freshness {
            return Err(AppError::OutdatedTelemetry(format!(
                "position fix is {}s old",
                age.num_seconds()
            )));
        }
        validate_point(&fix.location)?;

        if let Motion::Stationary = motion {
            let speed = fix.speed_mps.unwrap_or(0.0);
            if speed > self.policy.stationary_speed_mps {
                return Err(AppError::GeoConstraintViolation(format!(
                    "moving at {speed:.1} m/s"
                )));
            }
        }

        let distance_m = haversine_m(&fix.location, &target);
        if distance_m > radius_m {
            return Err(AppError::GeoConstraintViolation(format!(
                "{distance_m:.0} m from target, allowed {radius_m:.0} m"
            )));
        }
        Ok(())
    }
}

fn invalid_action(action: &str, status: OrderStatus) -> AppError {
    AppError::Conflict(format!("cannot {action} while order is {status:?}"))
}
