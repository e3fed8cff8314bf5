use crate::error::AppError;
use crate::models::order::OrderStatus;

use OrderStatus::*;

/// Legal next states; anything not listed is rejected.
pub fn allowed_targets(from: OrderStatus) -> &'static [OrderStatus] {
    match from {
        Searching => &[Assigned, Expired, CanceledByRequester],
        Assigned => &[DriverAtPickup, CanceledByRequester, CanceledByProvider],
        DriverAtPickup => &[WaitingFree, CanceledByRequester, CanceledByProvider],
        WaitingFree => &[WaitingPaid, InProgress, NoShow, CanceledByRequester, CanceledByProvider],
        WaitingPaid => &[InProgress, NoShow, CanceledByRequester, CanceledByProvider],
        InProgress => &[AtLastPoint, CanceledByRequester, CanceledByProvider],
        AtLastPoint => &[Completed],
        Completed => &[Closed],
        Closed | CanceledByRequester | CanceledByProvider | NoShow | Expired => &[],
    }
}

pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    allowed_targets(from).contains(&to)
}

pub fn ensure_transition(from: OrderStatus, to: OrderStatus) -> Result<(), AppError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(AppError::Conflict(format!(
            "cannot move order from {from:?} to {to:?}"
        )))
    }
}
