use chrono::{DateTime, Utc};

use crate::lifecycle::policy::LifecyclePolicy;
use crate::models::fare::{WaitKind, WaitSession};
use crate::models::order::Order;

const MINUTE_MS: i64 = 60_000;

/// Elapsed time rounded up to whole minutes, never negative.
pub fn billable_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    let elapsed_ms = (end - start).num_milliseconds();
    if elapsed_ms <= 0 {
        return 0;
    }
    (elapsed_ms + MINUTE_MS - 1) / MINUTE_MS
}

/// Opens a session of `kind` unless one of that kind is already open.
/// A session of another kind is closed first so at most one stays open.
pub fn open_session(
    order: &mut Order,
    kind: WaitKind,
    now: DateTime<Utc>,
    policy: &LifecyclePolicy,
) {
    if let Some(open) = order.open_wait_session() {
        if open.kind == kind {
            return;
        }
        close_open_session(order, now, policy);
    }
    order.wait_sessions.push(WaitSession::open(kind, now));
}

/// Closes and bills the open session, if any. Returns the closed kind.
pub fn close_open_session(
    order: &mut Order,
    now: DateTime<Utc>,
    policy: &LifecyclePolicy,
) -> Option<WaitKind> {
    let session = order
        .wait_sessions
        .iter_mut()
        .rev()
        .find(|session| session.is_open())?;

    let minutes = billable_minutes(session.started_at, now);
    let rate = match session.kind {
        WaitKind::Free => 0,
        WaitKind::Paid => policy.paid_waiting_rate,
        WaitKind::Pause => policy.pause_rate,
    };
    let amount = minutes * rate;

    session.ended_at = Some(now.max(session.started_at));
    session.minutes = minutes;
    session.amount = amount;
    let kind = session.kind;

    match kind {
        WaitKind::Free => order.fare.add_free_waiting(minutes),
        WaitKind::Paid => order.fare.add_paid_waiting(minutes, amount),
        WaitKind::Pause => order.fare.add_pause(minutes, amount),
    }

    Some(kind)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::models::order::{ProductLine, Waypoint, WaypointKind};
    use crate::models::provider::GeoPoint;

    fn order() -> Order {
        let waypoint = |kind| Waypoint {
            kind,
            location: GeoPoint::new(53.55, 9.99),
            radius_m: 0.0,
            label: String::new(),
            reached_at: None,
        };
        Order::new(
            Uuid::new_v4(),
            "hamburg".to_string(),
            ProductLine::Ride,
            vec![waypoint(WaypointKind::Pickup), waypoint(WaypointKind::Finish)],
            1_000,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn minutes_round_up_and_never_go_negative() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(billable_minutes(t0, t0), 0);
        assert_eq!(billable_minutes(t0, t0 + Duration::seconds(1)), 1);
        assert_eq!(billable_minutes(t0, t0 + Duration::seconds(60)), 1);
        assert_eq!(billable_minutes(t0, t0 + Duration::seconds(61)), 2);
        assert_eq!(billable_minutes(t0, t0 - Duration::seconds(30)), 0);
    }

    #[test]
    fn closing_pause_bills_at_pause_rate() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let policy = LifecyclePolicy {
            pause_rate: 200,
            ..LifecyclePolicy::default()
        };
        let mut order = order();

        open_session(&mut order, WaitKind::Pause, t0, &policy);
        let closed = close_open_session(&mut order, t0 + Duration::minutes(2), &policy);

        assert_eq!(closed, Some(WaitKind::Pause));
        assert_eq!(order.fare.waiting_pause_amount, 400);
        assert_eq!(order.fare.waiting_pause_minutes, 2);
    }

    #[test]
    fn closing_twice_is_idempotent() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let policy = LifecyclePolicy::default();
        let mut order = order();

        open_session(&mut order, WaitKind::Paid, t0, &policy);
        close_open_session(&mut order, t0 + Duration::minutes(1), &policy);
        let again = close_open_session(&mut order, t0 + Duration::minutes(5), &policy);

        assert_eq!(again, None);
        assert_eq!(order.fare.waiting_paid_amount, 100);
    }

    #[test]
    fn at_most_one_session_is_open() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let policy = LifecyclePolicy::default();
        let mut order = order();

        open_session(&mut order, WaitKind::Free, t0, &policy);
        open_session(&mut order, WaitKind::Free, t0 + Duration::minutes(1), &policy);
        open_session(&mut order, WaitKind::Paid, t0 + Duration::minutes(2), &policy);

        let open = order.wait_sessions.iter().filter(|s| s.is_open()).count();
        assert_eq!(open, 1);
        assert_eq!(order.wait_sessions.len(), 2);
        assert_eq!(order.fare.waiting_free_minutes, 2);
    }
}
