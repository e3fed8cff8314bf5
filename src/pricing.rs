use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    Floor,
    HalfUp,
}

impl Rounding {
    fn apply(self, value: f64) -> i64 {
        match self {
            Rounding::Floor => value.floor() as i64,
            Rounding::HalfUp => (value + 0.5).floor() as i64,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PricingSettings {
    pub price_per_km: i64,
    pub min_price: i64,
}

impl Default for PricingSettings {
    fn default() -> Self {
        Self {
            price_per_km: 100,
            min_price: 500,
        }
    }
}

/// Distance-proportional price floored at `min_price`.
pub fn recommended(distance_m: f64, price_per_km: i64, min_price: i64, rounding: Rounding) -> i64 {
    let floor = min_price.max(0);
    if distance_m.is_nan() || distance_m <= 0.0 {
        return floor;
    }

    let linear = rounding.apply(distance_m * price_per_km as f64 / 1_000.0);
    linear.max(floor)
}

/// Price of `meters` at `price_per_km`, without a minimum.
pub fn distance_amount(meters: i64, price_per_km: i64, rounding: Rounding) -> i64 {
    if meters <= 0 {
        return 0;
    }
    rounding.apply(meters as f64 * price_per_km as f64 / 1_000.0)
}
