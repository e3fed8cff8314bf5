use std::sync::Arc;

use crate::config::Config;
use crate::engine::assignment::AssignmentService;
use crate::engine::expiry::OfferExpirySweeper;
use crate::engine::offers::MemoryOfferLedger;
use crate::engine::scheduler::DispatchScheduler;
use crate::geo::index::MemoryGeoIndex;
use crate::lifecycle::service::LifecycleService;
use crate::notify::{HubWorker, NotificationHub};
use crate::observability::metrics::Metrics;
use crate::payments::InvoiceBook;
use crate::store::MemoryStore;

pub struct AppState {
    pub config: Config,
    pub store: Arc<MemoryStore>,
    pub geo: Arc<MemoryGeoIndex>,
    pub offers: Arc<MemoryOfferLedger>,
    pub invoices: Arc<InvoiceBook>,
    pub hub: Arc<NotificationHub>,
    pub scheduler: Arc<DispatchScheduler>,
    pub assignments: AssignmentService,
    pub lifecycle: LifecycleService,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config) -> (Self, HubWorker) {
        let metrics = Metrics::new();
        let store = Arc::new(MemoryStore::new());
        let geo = Arc::new(MemoryGeoIndex::new());
        let offers = Arc::new(MemoryOfferLedger::new());
        let invoices = Arc::new(InvoiceBook::new());
        let (hub, hub_worker) = NotificationHub::new(config.event_buffer_size);
        let hub = Arc::new(hub);

        let scheduler = Arc::new(DispatchScheduler::new(
            store.clone(),
            store.clone(),
            geo.clone(),
            offers.clone(),
            hub.clone(),
            config.dispatch.clone(),
            metrics.clone(),
        ));
        let assignments = AssignmentService::new(
            store.clone(),
            store.clone(),
            offers.clone(),
            geo.clone(),
            hub.clone(),
        );
        let lifecycle = LifecycleService::new(
            store.clone(),
            store.clone(),
            geo.clone(),
            hub.clone(),
            invoices.clone(),
            config.lifecycle.clone(),
            config.pricing,
            config.currency.clone(),
            metrics.clone(),
        );

        (
            Self {
                config,
                store,
                geo,
                offers,
                invoices,
                hub,
                scheduler,
                assignments,
                lifecycle,
                metrics,
            },
            hub_worker,
        )
    }

    pub fn expiry_sweeper(&self) -> OfferExpirySweeper {
        OfferExpirySweeper::new(
            self.offers.clone(),
            self.config.offer_sweep_period,
            self.metrics.clone(),
        )
    }
}
