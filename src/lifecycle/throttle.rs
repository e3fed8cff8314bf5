use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::lifecycle::policy::ThrottlePolicy;

/// Provider/requester buttons subject to press throttling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Arrive,
    StartTrip,
    ReachWaypoint,
    StartPause,
    EndPause,
    FinishTrip,
    ConfirmCash,
    CancelByRequester,
    CancelByProvider,
    NoShow,
}

impl ActionKind {
    pub const ALL: [ActionKind; 10] = [
        ActionKind::Arrive,
        ActionKind::StartTrip,
        ActionKind::ReachWaypoint,
        ActionKind::StartPause,
        ActionKind::EndPause,
        ActionKind::FinishTrip,
        ActionKind::ConfirmCash,
        ActionKind::CancelByRequester,
        ActionKind::CancelByProvider,
        ActionKind::NoShow,
    ];
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionThrottleState {
    pub presses: u32,
    pub last_press_at: Option<DateTime<Utc>>,
    pub window_expires_at: Option<DateTime<Utc>>,
}

impl ActionThrottleState {
    /// Counts a press, or rejects it if the cooldown or press limit is hit.
    /// An expired counting window is reset lazily here.
    pub fn press(&mut self, policy: &ThrottlePolicy, now: DateTime<Utc>) -> Result<(), AppError> {
        if self.window_expires_at.is_some_and(|expires_at| expires_at <= now) {
            *self = Self::default();
        }

        if let Some(last) = self.last_press_at {
            let ready_at = last + policy.cooldown;
            if now < ready_at {
                return Err(AppError::RateLimited(format!(
                    "retry in {}s",
                    (ready_at - now).num_seconds().max(1)
                )));
            }
        }

        if policy.max_presses > 0 && self.presses >= policy.max_presses {
            return Err(AppError::RateLimited(format!(
                "press limit of {} reached",
                policy.max_presses
            )));
        }

        self.presses += 1;
        self.last_press_at = Some(now);
        if self.window_expires_at.is_none() {
            self.window_expires_at = Some(now + policy.window);
        }
        Ok(())
    }
}
