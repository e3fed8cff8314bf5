use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub dispatch_ticks_total: IntCounter,
    pub dispatch_records_due: IntGauge,
    pub dispatch_tick_seconds: Histogram,
    pub dispatch_outcomes_total: IntCounterVec,
    pub offers_created_total: IntCounter,
    pub offers_expired_total: IntCounter,
    pub lifecycle_actions_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let dispatch_ticks_total =
            IntCounter::new("dispatch_ticks_total", "Dispatch ticks executed")
                .expect("valid dispatch_ticks_total metric");

        let dispatch_records_due = IntGauge::new(
            "dispatch_records_due",
            "Dispatch records due in the most recent tick",
        )
        .expect("valid dispatch_records_due metric");

        let dispatch_tick_seconds = Histogram::with_opts(HistogramOpts::new(
            "dispatch_tick_seconds",
            "Duration of a dispatch tick in seconds",
        ))
        .expect("valid dispatch_tick_seconds metric");

        let dispatch_outcomes_total = IntCounterVec::new(
            Opts::new("dispatch_outcomes_total", "Per-record dispatch outcomes"),
            &["outcome"],
        )
        .expect("valid dispatch_outcomes_total metric");

        let offers_created_total =
            IntCounter::new("offers_created_total", "Offers created by dispatch")
                .expect("valid offers_created_total metric");

        let offers_expired_total =
            IntCounter::new("offers_expired_total", "Offers expired by the TTL sweep")
                .expect("valid offers_expired_total metric");

        let lifecycle_actions_total = IntCounterVec::new(
            Opts::new("lifecycle_actions_total", "Lifecycle actions by outcome"),
            &["action", "outcome"],
        )
        .expect("valid lifecycle_actions_total metric");

        registry
            .register(Box::new(dispatch_ticks_total.clone()))
            .expect("register dispatch_ticks_total");
        registry
            .register(Box::new(dispatch_records_due.clone()))
            .expect("register dispatch_records_due");
        registry
            .register(Box::new(dispatch_tick_seconds.clone()))
            .expect("register dispatch_tick_seconds");
        registry
            .register(Box::new(dispatch_outcomes_total.clone()))
            .expect("register dispatch_outcomes_total");
        registry
            .register(Box::new(offers_created_total.clone()))
            .expect("register offers_created_total");
        registry
            .register(Box::new(offers_expired_total.clone()))
            .expect("register offers_expired_total");
        registry
            .register(Box::new(lifecycle_actions_total.clone()))
            .expect("register lifecycle_actions_total");

        Self {
            registry,
            dispatch_ticks_total,
            dispatch_records_due,
            dispatch_tick_seconds,
            dispatch_outcomes_total,
            offers_created_total,
            offers_expired_total,
            lifecycle_actions_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
