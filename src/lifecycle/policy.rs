use std::collections::BTreeMap;

use chrono::Duration;

use crate::lifecycle::throttle::ActionKind;
use crate::models::order::Waypoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    pub cooldown: Duration,
    /// Zero disables the press limit.
    pub max_presses: u32,
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    pub telemetry_freshness: Duration,
    pub stationary_speed_mps: f64,
    pub arrival_radius_m: f64,
    pub start_radius_m: f64,
    pub waypoint_radius_m: f64,
    pub finish_radius_m: f64,
    pub free_waiting: Duration,
    pub paid_waiting_rate: i64,
    pub pause_rate: i64,
    pub boarding_pin_required: bool,
    pub throttles: BTreeMap<ActionKind, ThrottlePolicy>,
}

impl LifecyclePolicy {
    pub fn uniform_throttles(policy: ThrottlePolicy) -> BTreeMap<ActionKind, ThrottlePolicy> {
        ActionKind::ALL.iter().map(|kind| (*kind, policy)).collect()
    }

    pub fn throttle_for(&self, kind: ActionKind) -> Option<&ThrottlePolicy> {
        self.throttles.get(&kind)
    }

    pub fn arrival_radius(&self, pickup: &Waypoint) -> f64 {
        if pickup.radius_m > 0.0 {
            pickup.radius_m
        } else {
            self.arrival_radius_m
        }
    }

    pub fn waypoint_radius(&self, waypoint: &Waypoint) -> f64 {
        if waypoint.radius_m > 0.0 {
            waypoint.radius_m
        } else {
            self.waypoint_radius_m
        }
    }

    pub fn finish_radius(&self, waypoint: &Waypoint) -> f64 {
        if waypoint.radius_m > 0.0 {
            waypoint.radius_m
        } else {
            self.finish_radius_m
        }
    }
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            telemetry_freshness: Duration::seconds(30),
            stationary_speed_mps: 3.0,
            arrival_radius_m: 150.0,
            start_radius_m: 200.0,
            waypoint_radius_m: 150.0,
            finish_radius_m: 200.0,
            free_waiting: Duration::minutes(3),
            paid_waiting_rate: 100,
            pause_rate: 100,
            boarding_pin_required: false,
            throttles: BTreeMap::new(),
        }
    }
}
