use std::env;

use chrono::Duration;

use crate::engine::scheduler::DispatchSettings;
use crate::error::AppError;
use crate::lifecycle::policy::{LifecyclePolicy, ThrottlePolicy};
use crate::pricing::PricingSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub dispatch: DispatchSettings,
    pub offer_sweep_period: Duration,
    pub lifecycle: LifecyclePolicy,
    pub pricing: PricingSettings,
    pub currency: String,
    pub webhook_secret: String,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let dispatch = DispatchSettings {
            tick_period: seconds("DISPATCH_TICK_SECS", 5)?,
            start_radius_m: parse_or_default("DISPATCH_START_RADIUS_M", 1_000.0)?,
            radius_step_m: parse_or_default("DISPATCH_RADIUS_STEP_M", 1_000.0)?,
            max_radius_m: parse_or_default("DISPATCH_MAX_RADIUS_M", 5_000.0)?,
            candidate_limit: parse_or_default("DISPATCH_CANDIDATE_LIMIT", 20)?,
            max_search_duration: seconds("DISPATCH_MAX_SEARCH_SECS", 600)?,
            offer_ttl: seconds("OFFER_TTL_SECS", 30)?,
        };
        dispatch.validate()?;

        let action_throttle = ThrottlePolicy {
            cooldown: seconds("ACTION_COOLDOWN_SECS", 2)?,
            max_presses: parse_or_default("ACTION_MAX_PRESSES", 10)?,
            window: seconds("ACTION_WINDOW_SECS", 60)?,
        };

        let lifecycle = LifecyclePolicy {
            telemetry_freshness: seconds("TELEMETRY_FRESHNESS_SECS", 30)?,
            stationary_speed_mps: parse_or_default("STATIONARY_SPEED_MPS", 3.0)?,
            arrival_radius_m: parse_or_default("ARRIVAL_RADIUS_M", 150.0)?,
            start_radius_m: parse_or_default("START_RADIUS_M", 200.0)?,
            waypoint_radius_m: parse_or_default("WAYPOINT_RADIUS_M", 150.0)?,
            finish_radius_m: parse_or_default("FINISH_RADIUS_M", 200.0)?,
            free_waiting: seconds("FREE_WAITING_SECS", 180)?,
            paid_waiting_rate: parse_or_default("PAID_WAITING_RATE", 100)?,
            pause_rate: parse_or_default("PAUSE_RATE", 100)?,
            boarding_pin_required: parse_or_default("BOARDING_PIN_REQUIRED", false)?,
            throttles: LifecyclePolicy::uniform_throttles(action_throttle),
        };

        let pricing = PricingSettings {
            price_per_km: parse_or_default("PRICE_PER_KM", 100)?,
            min_price: parse_or_default("MIN_PRICE", 500)?,
        };

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            dispatch,
            offer_sweep_period: seconds("OFFER_SWEEP_SECS", 5)?,
            lifecycle,
            pricing,
            currency: env::var("CURRENCY").unwrap_or_else(|_| "USD".to_string()),
            webhook_secret: env::var("PAYMENT_WEBHOOK_SECRET").unwrap_or_default(),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            event_buffer_size: 1024,
            dispatch: DispatchSettings::default(),
            offer_sweep_period: Duration::seconds(5),
            lifecycle: LifecyclePolicy::default(),
            pricing: PricingSettings::default(),
            currency: "USD".to_string(),
            webhook_secret: String::new(),
        }
    }
}

fn seconds(key: &str, default: i64) -> Result<Duration, AppError> {
    let secs: i64 = parse_or_default(key, default)?;
    if secs < 0 {
        return Err(AppError::Internal(format!("invalid {key}: must not be negative")));
    }
    Ok(Duration::seconds(secs))
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
