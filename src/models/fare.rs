use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WaitKind {
    Free,
    Paid,
    Pause,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitSession {
    pub kind: WaitKind,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub minutes: i64,
    pub amount: i64,
}

impl WaitSession {
    pub fn open(kind: WaitKind, started_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            started_at,
            ended_at: None,
            minutes: 0,
            amount: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Running fare of an order. `total` is updated every time a component is
/// accumulated and is never derived on read.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FareBreakdown {
    pub base_amount: i64,
    pub waiting_paid_amount: i64,
    pub waiting_pause_amount: i64,
    pub extra_distance_amount: i64,
    pub discount_amount: i64,
    pub waiting_free_minutes: i64,
    pub waiting_paid_minutes: i64,
    pub waiting_pause_minutes: i64,
    pub extra_distance_meters: i64,
    pub total: i64,
}

impl FareBreakdown {
    pub fn seed_base(&mut self, amount: i64) {
        if self.base_amount == 0 {
            self.base_amount = amount.max(0);
            self.recompute_total();
        }
    }

    pub fn add_free_waiting(&mut self, minutes: i64) {
        self.waiting_free_minutes = self.waiting_free_minutes.saturating_add(minutes);
    }

    pub fn add_paid_waiting(&mut self, minutes: i64, amount: i64) {
        self.waiting_paid_minutes = self.waiting_paid_minutes.saturating_add(minutes);
        self.waiting_paid_amount = self.waiting_paid_amount.saturating_add(amount);
        self.recompute_total();
    }

    pub fn add_pause(&mut self, minutes: i64, amount: i64) {
        self.waiting_pause_minutes = self.waiting_pause_minutes.saturating_add(minutes);
        self.waiting_pause_amount = self.waiting_pause_amount.saturating_add(amount);
        self.recompute_total();
    }

    /// Adds extra distance and a discount in one step. Nothing changes when
    /// an amount overflows or the discount would take the total below zero.
    pub fn apply_adjustment(
        &mut self,
        extra_meters: i64,
        extra_amount: i64,
        discount: i64,
    ) -> Result<(), AppError> {
        let overflow = || AppError::InvalidInput("fare adjustment is out of range".to_string());

        let mut next = self.clone();
        next.extra_distance_meters = next
            .extra_distance_meters
            .checked_add(extra_meters)
            .ok_or_else(overflow)?;
        next.extra_distance_amount = next
            .extra_distance_amount
            .checked_add(extra_amount)
            .ok_or_else(overflow)?;
        next.discount_amount = next
            .discount_amount
            .checked_add(discount)
            .ok_or_else(overflow)?;
        next.total = next.checked_total().ok_or_else(overflow)?;
        if next.total < 0 {
            return Err(AppError::InvalidInput(format!(
                "discount exceeds the fare total of {}",
                self.total
            )));
        }

        *self = next;
        Ok(())
    }

    fn checked_total(&self) -> Option<i64> {
        self.base_amount
            .checked_add(self.waiting_paid_amount)?
            .checked_add(self.waiting_pause_amount)?
            .checked_sub(self.discount_amount)?
            .checked_add(self.extra_distance_amount)
    }

    fn recompute_total(&mut self) {
        self.total = self.checked_total().unwrap_or(i64::MAX);
    }
}

#[cfg(test)]
mod tests {
    use super::FareBreakdown;
    use crate::error::AppError;

    #[test]
    fn total_is_additive_with_discount_subtracted() {
        let cases = [
            (0, 0, 0, 0, 0),
            (1_500, 200, 400, 100, 300),
            (999, 1, 2, 3, 4),
            (10_000, 0, 0, 10_000, 0),
        ];

        for (base, paid, pause, discount, extra) in cases {
            let mut fare = FareBreakdown::default();
            fare.seed_base(base);
            fare.add_paid_waiting(1, paid);
            fare.add_pause(1, pause);
            fare.apply_adjustment(10, extra, discount).unwrap();

            assert_eq!(fare.total, base + paid + pause - discount + extra);
        }
    }

    #[test]
    fn base_is_seeded_only_once() {
        let mut fare = FareBreakdown::default();
        fare.seed_base(1_200);
        fare.seed_base(9_999);

        assert_eq!(fare.base_amount, 1_200);
        assert_eq!(fare.total, 1_200);
    }

    #[test]
    fn free_minutes_do_not_change_total() {
        let mut fare = FareBreakdown::default();
        fare.seed_base(700);
        fare.add_free_waiting(3);

        assert_eq!(fare.waiting_free_minutes, 3);
        assert_eq!(fare.total, 700);
    }

    #[test]
    fn oversized_adjustments_leave_fare_untouched() {
        let mut fare = FareBreakdown::default();
        fare.seed_base(1_000);
        fare.apply_adjustment(0, 0, 400).unwrap();
        let before = fare.clone();

        let overflow = fare.apply_adjustment(0, 0, i64::MAX);
        assert!(matches!(overflow, Err(AppError::InvalidInput(_))));
        let extra = fare.apply_adjustment(i64::MAX, i64::MAX, 0);
        assert!(matches!(extra, Err(AppError::InvalidInput(_))));
        let below_zero = fare.apply_adjustment(0, 0, 601);
        assert!(matches!(below_zero, Err(AppError::InvalidInput(_))));

        assert_eq!(fare, before);
        fare.apply_adjustment(0, 0, 600).unwrap();
        assert_eq!(fare.total, 0);
    }
}
