use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::validate_point;
use crate::lifecycle::throttle::{ActionKind, ActionThrottleState};
use crate::models::fare::{FareBreakdown, WaitSession};
use crate::models::provider::GeoPoint;
use crate::pricing::Rounding;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Searching,
    Assigned,
    DriverAtPickup,
    WaitingFree,
    WaitingPaid,
    InProgress,
    AtLastPoint,
    Completed,
    Closed,
    CanceledByRequester,
    CanceledByProvider,
    NoShow,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed
                | OrderStatus::Closed
                | OrderStatus::CanceledByRequester
                | OrderStatus::CanceledByProvider
                | OrderStatus::NoShow
                | OrderStatus::Expired
        )
    }

    /// Position along the main ride path; side branches have none.
    pub fn progress(self) -> Option<u8> {
        match self {
            OrderStatus::Searching => Some(0),
            OrderStatus::Assigned => Some(1),
            OrderStatus::DriverAtPickup => Some(2),
            OrderStatus::WaitingFree => Some(3),
            OrderStatus::WaitingPaid => Some(4),
            OrderStatus::InProgress => Some(5),
            OrderStatus::AtLastPoint => Some(6),
            OrderStatus::Completed => Some(7),
            OrderStatus::Closed => Some(8),
            OrderStatus::CanceledByRequester
            | OrderStatus::CanceledByProvider
            | OrderStatus::NoShow
            | OrderStatus::Expired => None,
        }
    }

    /// True when `self` is `target` or lies past it on the main path.
    pub fn has_reached(self, target: OrderStatus) -> bool {
        match (self.progress(), target.progress()) {
            (Some(current), Some(wanted)) => current >= wanted,
            _ => self == target,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProductLine {
    Ride,
    Delivery,
}

impl ProductLine {
    pub fn rounding(self) -> Rounding {
        match self {
            ProductLine::Ride => Rounding::HalfUp,
            ProductLine::Delivery => Rounding::Floor,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WaypointKind {
    Pickup,
    Stop,
    Finish,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Waypoint {
    pub kind: WaypointKind,
    pub location: GeoPoint,
    /// Geofence radius in meters; zero means the global policy value applies.
    #[serde(default)]
    pub radius_m: f64,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub reached_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineEntry {
    pub status: OrderStatus,
    pub at: DateTime<Utc>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaypointEvent {
    pub index: usize,
    pub reached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub provider_id: Option<Uuid>,
    pub region: String,
    pub product: ProductLine,
    pub waypoints: Vec<Waypoint>,
    pub next_waypoint: usize,
    pub status: OrderStatus,
    pub agreed_price: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub payment_confirmed_at: Option<DateTime<Utc>>,
    pub invoice_ref: Option<String>,
    pub fare: FareBreakdown,
    pub wait_sessions: Vec<WaitSession>,
    pub timeline: Vec<TimelineEntry>,
    pub waypoint_log: Vec<WaypointEvent>,
    pub throttles: BTreeMap<ActionKind, ActionThrottleState>,
    /// Optimistic concurrency token, bumped by the store on every save.
    pub version: u64,
}

impl Order {
    pub fn new(
        requester_id: Uuid,
        region: String,
        product: ProductLine,
        waypoints: Vec<Waypoint>,
        agreed_price: i64,
        now: DateTime<Utc>,
    ) -> Result<Self, AppError> {
        validate_route(&waypoints)?;
        if region.trim().is_empty() {
            return Err(AppError::InvalidInput("region cannot be empty".to_string()));
        }
        if agreed_price < 0 {
            return Err(AppError::InvalidInput("price cannot be negative".to_string()));
        }

        let mut order = Self {
            id: Uuid::new_v4(),
            requester_id,
            provider_id: None,
            region,
            product,
            waypoints,
            next_waypoint: 0,
            status: OrderStatus::Searching,
            agreed_price,
            created_at: now,
            updated_at: now,
            arrived_at: None,
            started_at: None,
            finished_at: None,
            payment_confirmed_at: None,
            invoice_ref: None,
            fare: FareBreakdown::default(),
            wait_sessions: Vec::new(),
            timeline: Vec::new(),
            waypoint_log: Vec::new(),
            throttles: BTreeMap::new(),
            version: 0,
        };
        order.push_timeline(OrderStatus::Searching, now, None);
        Ok(order)
    }

    pub fn origin(&self) -> Option<GeoPoint> {
        self.waypoints.first().map(|waypoint| waypoint.location)
    }

    pub fn finish_index(&self) -> usize {
        self.waypoints.len().saturating_sub(1)
    }

    pub fn set_status(&mut self, status: OrderStatus, at: DateTime<Utc>, note: Option<&str>) {
        self.status = status;
        self.updated_at = at;
        self.push_timeline(status, at, note);
    }

    pub fn push_timeline(&mut self, status: OrderStatus, at: DateTime<Utc>, note: Option<&str>) {
        if self.timeline.last().is_some_and(|last| last.status == status) {
            return;
        }
        self.timeline.push(TimelineEntry {
            status,
            at,
            note: note.map(str::to_string),
        });
    }

    /// Marks a waypoint reached the first time only; the cursor never moves back.
    pub fn mark_waypoint_reached(&mut self, index: usize, at: DateTime<Utc>) {
        let Some(waypoint) = self.waypoints.get_mut(index) else {
            return;
        };
        if waypoint.reached_at.is_none() {
            waypoint.reached_at = Some(at);
            self.waypoint_log.push(WaypointEvent {
                index,
                reached_at: at,
            });
        }
        self.next_waypoint = self.next_waypoint.max(index + 1).min(self.waypoints.len());
    }

    pub fn open_wait_session(&self) -> Option<&WaitSession> {
        self.wait_sessions.iter().rev().find(|session| session.is_open())
    }

    /// Sum of the haversine legs between consecutive waypoints.
    pub fn route_length_m(&self) -> f64 {
        self.waypoints
            .windows(2)
            .map(|leg| crate::geo::haversine_m(&leg[0].location, &leg[1].location))
            .sum()
    }
}

fn validate_route(waypoints: &[Waypoint]) -> Result<(), AppError> {
    if waypoints.len() < 2 {
        return Err(AppError::InvalidInput(
            "route needs at least a pickup and a finish".to_string(),
        ));
    }

    let last = waypoints.len() - 1;
    for (index, waypoint) in waypoints.iter().enumerate() {
        let expected = match index {
            0 => WaypointKind::Pickup,
            i if i == last => WaypointKind::Finish,
            _ => WaypointKind::Stop,
        };
        if waypoint.kind != expected {
            return Err(AppError::InvalidInput(format!(
                "waypoint {index} must be {expected:?}, got {:?}",
                waypoint.kind
            )));
        }
        if waypoint.radius_m < 0.0 || !waypoint.radius_m.is_finite() {
            return Err(AppError::InvalidInput(format!(
                "waypoint {index} has an invalid radius"
            )));
        }
        validate_point(&waypoint.location)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn waypoint(kind: WaypointKind, lat: f64, lng: f64) -> Waypoint {
        Waypoint {
            kind,
            location: GeoPoint::new(lat, lng),
            radius_m: 0.0,
            label: String::new(),
            reached_at: None,
        }
    }

    #[test]
    fn rejects_route_without_finish() {
        let result = Order::new(
            Uuid::new_v4(),
            "hamburg".to_string(),
            ProductLine::Ride,
            vec![
                waypoint(WaypointKind::Pickup, 53.55, 9.99),
                waypoint(WaypointKind::Stop, 53.56, 9.98),
            ],
            1_000,
            Utc::now(),
        );

        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn consecutive_duplicate_timeline_entries_are_suppressed() {
        let now = Utc::now();
        let mut order = Order::new(
            Uuid::new_v4(),
            "hamburg".to_string(),
            ProductLine::Ride,
            vec![
                waypoint(WaypointKind::Pickup, 53.55, 9.99),
                waypoint(WaypointKind::Finish, 53.56, 9.98),
            ],
            1_000,
            now,
        )
        .unwrap();

        order.set_status(OrderStatus::Assigned, now, None);
        order.set_status(OrderStatus::Assigned, now, Some("retry"));

        assert_eq!(order.timeline.len(), 2);
    }

    #[test]
    fn reached_time_is_immutable_and_cursor_moves_forward() {
        let now = Utc::now();
        let later = now + chrono::Duration::minutes(5);
        let mut order = Order::new(
            Uuid::new_v4(),
            "hamburg".to_string(),
            ProductLine::Delivery,
            vec![
                waypoint(WaypointKind::Pickup, 53.55, 9.99),
                waypoint(WaypointKind::Stop, 53.555, 9.985),
                waypoint(WaypointKind::Finish, 53.56, 9.98),
            ],
            1_000,
            now,
        )
        .unwrap();

        order.mark_waypoint_reached(1, now);
        order.mark_waypoint_reached(0, later);
        order.mark_waypoint_reached(1, later);

        assert_eq!(order.waypoints[1].reached_at, Some(now));
        assert_eq!(order.next_waypoint, 2);
        assert_eq!(order.waypoint_log.len(), 2);
    }

    #[test]
    fn progress_orders_main_path() {
        assert!(OrderStatus::Completed.has_reached(OrderStatus::WaitingFree));
        assert!(!OrderStatus::Assigned.has_reached(OrderStatus::WaitingFree));
        assert!(!OrderStatus::NoShow.has_reached(OrderStatus::WaitingFree));
        assert!(OrderStatus::NoShow.has_reached(OrderStatus::NoShow));
    }
}
