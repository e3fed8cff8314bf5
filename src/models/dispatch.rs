use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Searching,
    Assigned,
    Finished,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchRecord {
    pub order_id: Uuid,
    pub radius_m: f64,
    pub next_attempt_at: DateTime<Utc>,
    pub state: DispatchState,
}

impl DispatchRecord {
    pub fn searching(order_id: Uuid, radius_m: f64, next_attempt_at: DateTime<Utc>) -> Self {
        Self {
            order_id,
            radius_m,
            next_attempt_at,
            state: DispatchState::Searching,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == DispatchState::Searching && self.next_attempt_at <= now
    }
}
