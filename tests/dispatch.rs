use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use ride_dispatch::engine::assignment::AssignmentService;
use ride_dispatch::engine::offers::{MemoryOfferLedger, OfferLedger};
use ride_dispatch::engine::scheduler::{DispatchScheduler, DispatchSettings};
use ride_dispatch::error::AppError;
use ride_dispatch::geo::index::{GeoIndex, MemoryGeoIndex};
use ride_dispatch::models::dispatch::{DispatchRecord, DispatchState};
use ride_dispatch::models::offer::{OfferPayload, OfferStatus};
use ride_dispatch::models::order::{Order, OrderStatus, ProductLine, Waypoint, WaypointKind};
use ride_dispatch::models::provider::{GeoPoint, ProviderStatus};
use ride_dispatch::notify::{Event, NotificationSink};
use ride_dispatch::observability::metrics::Metrics;
use ride_dispatch::store::{DispatchStore, MemoryStore, OrderStore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const REGION: &str = "hamburg";
const PICKUP: GeoPoint = GeoPoint { lat: 53.5511, lng: 9.9937 };
const FINISH: GeoPoint = GeoPoint { lat: 53.5700, lng: 9.9700 };

#[derive(Default)]
struct RecordingSink {
    offers: Mutex<Vec<(Uuid, OfferPayload)>>,
    events: Mutex<Vec<(Uuid, Event)>>,
    broadcasts: Mutex<Vec<Event>>,
}

impl RecordingSink {
    fn offers_to(&self, provider_id: Uuid) -> usize {
        self.offers
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == provider_id)
            .count()
    }

    fn events_for(&self, party_id: Uuid) -> Vec<Event> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == party_id)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

impl NotificationSink for RecordingSink {
    fn send_offer(&self, provider_id: Uuid, offer: OfferPayload) {
        self.offers.lock().unwrap().push((provider_id, offer));
    }

    fn push_event(&self, party_id: Uuid, event: Event) {
        self.events.lock().unwrap().push((party_id, event));
    }

    fn broadcast(&self, event: Event) {
        self.broadcasts.lock().unwrap().push(event);
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    geo: Arc<MemoryGeoIndex>,
    offers: Arc<MemoryOfferLedger>,
    sink: Arc<RecordingSink>,
    scheduler: DispatchScheduler,
    assignments: AssignmentService,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn settings() -> DispatchSettings {
    DispatchSettings {
        tick_period: Duration::seconds(5),
        start_radius_m: 1_000.0,
        radius_step_m: 1_000.0,
        max_radius_m: 3_000.0,
        candidate_limit: 10,
        max_search_duration: Duration::minutes(10),
        offer_ttl: Duration::seconds(30),
    }
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let geo = Arc::new(MemoryGeoIndex::new());
    let offers = Arc::new(MemoryOfferLedger::new());
    let sink = Arc::new(RecordingSink::default());

    let scheduler = DispatchScheduler::new(
        store.clone(),
        store.clone(),
        geo.clone(),
        offers.clone(),
        sink.clone(),
        settings(),
        Metrics::new(),
    );
    let assignments = AssignmentService::new(
        store.clone(),
        store.clone(),
        offers.clone(),
        geo.clone(),
        sink.clone(),
    );

    Harness {
        store,
        geo,
        offers,
        sink,
        scheduler,
        assignments,
    }
}

async fn searching_order(h: &Harness) -> Order {
    searching_order_at(h, t0()).await
}

async fn searching_order_at(h: &Harness, created_at: DateTime<Utc>) -> Order {
    let waypoint = |kind, location| Waypoint {
        kind,
        location,
        radius_m: 0.0,
        label: String::new(),
        reached_at: None,
    };
    let order = Order::new(
        Uuid::new_v4(),
        REGION.to_string(),
        ProductLine::Ride,
        vec![
            waypoint(WaypointKind::Pickup, PICKUP),
            waypoint(WaypointKind::Finish, FINISH),
        ],
        1_500,
        created_at,
    )
    .unwrap();
    let record = DispatchRecord::searching(order.id, settings().start_radius_m, created_at);
    h.store.create(order, record).await.unwrap()
}

/// A point roughly `meters` north of the pickup.
fn north_of_pickup(meters: f64) -> GeoPoint {
    GeoPoint::new(PICKUP.lat + meters / 111_195.0, PICKUP.lng)
}

async fn free_provider(h: &Harness, location: GeoPoint) -> Uuid {
    let provider_id = Uuid::new_v4();
    h.geo
        .update_location(provider_id, location, REGION, ProviderStatus::Free)
        .await
        .unwrap();
    provider_id
}

#[tokio::test]
async fn radius_widens_until_max_while_nobody_is_near() {
    let h = harness();
    let order = searching_order(&h).await;

    let mut radii = Vec::new();
    for step in 0..4 {
        let now = t0() + Duration::seconds(5 * step);
        let report = h.scheduler.tick(now).await;
        assert_eq!(report.due, 1);
        assert_eq!(report.expanded, 1);
        radii.push(h.store.get_dispatch(order.id).await.unwrap().radius_m);
    }

    assert_eq!(radii, vec![2_000.0, 3_000.0, 3_000.0, 3_000.0]);
    let progress = h
        .sink
        .events_for(order.requester_id)
        .into_iter()
        .filter(|event| matches!(event, Event::SearchProgress { .. }))
        .count();
    assert_eq!(progress, 4);
}

#[tokio::test]
async fn record_is_not_due_before_next_attempt() {
    let h = harness();
    searching_order(&h).await;

    h.scheduler.tick(t0()).await;
    let early = h.scheduler.tick(t0() + Duration::seconds(2)).await;

    assert_eq!(early.due, 0);
}

#[tokio::test]
async fn provider_outside_radius_is_found_after_expansion() {
    let h = harness();
    let order = searching_order(&h).await;
    let provider_id = free_provider(&h, north_of_pickup(1_500.0)).await;

    let first = h.scheduler.tick(t0()).await;
    assert_eq!(first.offers_created, 0);

    let second = h.scheduler.tick(t0() + Duration::seconds(5)).await;
    assert_eq!(second.offers_created, 1);
    assert_eq!(h.sink.offers_to(provider_id), 1);

    let record = h.store.get_dispatch(order.id).await.unwrap();
    assert_eq!(record.radius_m, 2_000.0);
}

#[tokio::test]
async fn provider_is_offered_an_order_only_once() {
    let h = harness();
    let order = searching_order(&h).await;
    let provider_id = free_provider(&h, north_of_pickup(200.0)).await;

    for step in 0..3 {
        h.scheduler.tick(t0() + Duration::seconds(5 * step)).await;
    }

    assert_eq!(h.sink.offers_to(provider_id), 1);
    let offers = h.offers.offers_for(order.id).await.unwrap();
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].price, Some(1_500));
    assert_eq!(offers[0].expires_at, Some(t0() + Duration::seconds(30)));
}

#[tokio::test]
async fn search_times_out_into_expired() {
    let h = harness();
    let order = searching_order(&h).await;

    let report = h.scheduler.tick(t0() + Duration::minutes(11)).await;
    assert_eq!(report.finished, 1);

    let stored = h.store.get(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Expired);
    let record = h.store.get_dispatch(order.id).await.unwrap();
    assert_eq!(record.state, DispatchState::Finished);
    assert!(h
        .sink
        .events_for(order.requester_id)
        .contains(&Event::SearchTimeout { order_id: order.id }));
}

#[tokio::test]
async fn resolved_orders_are_finished_without_offers() {
    let h = harness();
    let order = searching_order(&h).await;
    let provider_id = free_provider(&h, north_of_pickup(100.0)).await;
    h.store
        .update_status_cas(order.id, OrderStatus::Searching, OrderStatus::CanceledByRequester, t0())
        .await
        .unwrap();

    let report = h.scheduler.tick(t0()).await;

    assert_eq!(report.finished, 1);
    assert_eq!(h.sink.offers_to(provider_id), 0);
    let record = h.store.get_dispatch(order.id).await.unwrap();
    assert_eq!(record.state, DispatchState::Finished);
}

#[tokio::test]
async fn accepting_an_offer_assigns_the_provider() {
    let h = harness();
    let order = searching_order(&h).await;
    let winner = free_provider(&h, north_of_pickup(100.0)).await;
    let other = free_provider(&h, north_of_pickup(300.0)).await;

    let report = h.scheduler.tick(t0()).await;
    assert_eq!(report.offers_created, 2);

    let assigned = h
        .assignments
        .accept_offer(order.id, winner, t0() + Duration::seconds(3))
        .await
        .unwrap();

    assert_eq!(assigned.status, OrderStatus::Assigned);
    assert_eq!(assigned.provider_id, Some(winner));
    assert_eq!(h.geo.position(winner, REGION, ProviderStatus::Busy), Some(north_of_pickup(100.0)));
    assert_eq!(h.geo.bucket_len(REGION, ProviderStatus::Free), 1);

    let offers = h.offers.offers_for(order.id).await.unwrap();
    let status_of = |provider_id: Uuid| {
        offers
            .iter()
            .find(|offer| offer.provider_id == provider_id)
            .map(|offer| offer.status)
    };
    assert_eq!(status_of(winner), Some(OfferStatus::Accepted));
    assert_eq!(status_of(other), Some(OfferStatus::Closed));

    let record = h.store.get_dispatch(order.id).await.unwrap();
    assert_eq!(record.state, DispatchState::Assigned);
    assert!(h.sink.events_for(order.requester_id).contains(&Event::ProviderAssigned {
        order_id: order.id,
        provider_id: winner,
    }));
    assert!(h
        .sink
        .events_for(winner)
        .contains(&Event::OfferAccepted { order_id: order.id }));
    assert_eq!(
        *h.sink.broadcasts.lock().unwrap(),
        vec![Event::ProviderAssigned {
            order_id: order.id,
            provider_id: winner,
        }]
    );

    let late = h
        .assignments
        .accept_offer(order.id, other, t0() + Duration::seconds(4))
        .await;
    assert!(matches!(late, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn expired_offer_cannot_be_accepted() {
    let h = harness();
    let order = searching_order(&h).await;
    let provider_id = free_provider(&h, north_of_pickup(100.0)).await;
    h.scheduler.tick(t0()).await;

    let result = h
        .assignments
        .accept_offer(order.id, provider_id, t0() + Duration::minutes(1))
        .await;

    assert!(matches!(result, Err(AppError::Conflict(_))));
    let stored = h.store.get(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Searching);
    assert!(stored.provider_id.is_none());
}

#[tokio::test]
async fn trigger_resets_radius_and_makes_record_due() {
    let h = harness();
    let order = searching_order(&h).await;

    h.scheduler.tick(t0()).await;
    h.scheduler.tick(t0() + Duration::seconds(5)).await;
    assert_eq!(h.store.get_dispatch(order.id).await.unwrap().radius_m, 3_000.0);

    let now = t0() + Duration::seconds(6);
    h.scheduler.trigger_immediate(order.id, true, now).await.unwrap();

    let record = h.store.get_dispatch(order.id).await.unwrap();
    assert_eq!(record.radius_m, 1_000.0);
    assert!(record.is_due(now));
}

/// Serves a fixed snapshot from `get` while writes hit the real store.
struct StaleReads {
    inner: Arc<MemoryStore>,
    snapshot: Order,
}

#[async_trait]
impl OrderStore for StaleReads {
    async fn get(&self, id: Uuid) -> Result<Order, AppError> {
        if id == self.snapshot.id {
            return Ok(self.snapshot.clone());
        }
        self.inner.get(id).await
    }

    async fn list_due_orders(&self, now: DateTime<Utc>) -> Result<Vec<Order>, AppError> {
        self.inner.list_due_orders(now).await
    }

    async fn create(&self, order: Order, dispatch: DispatchRecord) -> Result<Order, AppError> {
        self.inner.create(order, dispatch).await
    }

    async fn update_status_cas(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, AppError> {
        self.inner.update_status_cas(id, from, to, at).await
    }

    async fn assign_provider(
        &self,
        id: Uuid,
        provider_id: Uuid,
        next_status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, AppError> {
        self.inner.assign_provider(id, provider_id, next_status, at).await
    }

    async fn update_price(
        &self,
        id: Uuid,
        old_price: i64,
        new_price: i64,
        at: DateTime<Utc>,
    ) -> Result<Order, AppError> {
        self.inner.update_price(id, old_price, new_price, at).await
    }

    async fn save(&self, order: &mut Order) -> Result<(), AppError> {
        self.inner.save(order).await
    }
}

#[tokio::test]
async fn timeout_losing_to_an_assignment_does_not_expire() {
    let h = harness();
    let order = searching_order(&h).await;
    let provider_id = Uuid::new_v4();
    h.store
        .assign_provider(order.id, provider_id, OrderStatus::Assigned, t0() + Duration::minutes(9))
        .await
        .unwrap();

    let stale = Arc::new(StaleReads {
        inner: h.store.clone(),
        snapshot: order.clone(),
    });
    let scheduler = DispatchScheduler::new(
        stale,
        h.store.clone(),
        h.geo.clone(),
        h.offers.clone(),
        h.sink.clone(),
        settings(),
        Metrics::new(),
    );

    let report = scheduler.tick(t0() + Duration::minutes(11)).await;

    assert_eq!(report.due, 1);
    assert_eq!(report.finished, 1);
    let stored = h.store.get(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Assigned);
    assert_eq!(stored.provider_id, Some(provider_id));
    assert!(!h
        .sink
        .events_for(order.requester_id)
        .contains(&Event::SearchTimeout { order_id: order.id }));
}

#[tokio::test]
async fn run_offers_then_exits_on_shutdown() {
    let h = harness();
    let order = searching_order_at(&h, Utc::now()).await;
    let provider_id = free_provider(&h, north_of_pickup(100.0)).await;

    let scheduler = Arc::new(h.scheduler);
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn({
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        async move { scheduler.run(shutdown).await }
    });

    tokio::time::timeout(std::time::Duration::from_secs(2), async {
        while h.sink.offers_to(provider_id) == 0 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    shutdown.cancel();
    tokio::time::timeout(std::time::Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();

    let offers = h.offers.offers_for(order.id).await.unwrap();
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].provider_id, provider_id);
    let record = h.store.get_dispatch(order.id).await.unwrap();
    assert_eq!(record.state, DispatchState::Searching);
    assert!(record.next_attempt_at > order.created_at);
}
