use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::engine::offers::OfferLedger;
use crate::observability::metrics::Metrics;

/// Expires stale proposals on its own timer, independent of dispatch ticks.
pub struct OfferExpirySweeper {
    offers: Arc<dyn OfferLedger>,
    period: Duration,
    metrics: Metrics,
}

impl OfferExpirySweeper {
    pub fn new(offers: Arc<dyn OfferLedger>, period: Duration, metrics: Metrics) -> Self {
        Self {
            offers,
            period,
            metrics,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(period_secs = self.period.num_seconds(), "offer expiry sweeper started");

        let period = self
            .period
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.sweep(Utc::now()).await;
        }

        info!("offer expiry sweeper stopped");
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> usize {
        match self.offers.expire_sweep(now).await {
            Ok(expired) => {
                if expired > 0 {
                    self.metrics.offers_expired_total.inc_by(expired as u64);
                    info!(expired, "expired stale offers");
                }
                expired
            }
            Err(err) => {
                error!(error = %err, "offer expiry sweep failed");
                0
            }
        }
    }
}
