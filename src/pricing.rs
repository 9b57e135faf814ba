//! Session cost calculation for Elektra
//!
//! Pure pricing math: static per-kWh cost, incremental spot-rate
//! integration, and guest billing overrides. The engine feeds these from
//! its reading loop; nothing here holds a reference to engine state.

use crate::config::SpotPricingConfig;
use serde::{Deserialize, Serialize};

/// Guest billing override, snapshotted onto the session at start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum GuestPricing {
    /// Guest pays a flat rate per kWh, ignoring the base cost
    Fixed { price_per_kwh: f64 },
    /// Guest pays the base cost times a markup factor
    Markup { markup_factor: f64 },
}

impl GuestPricing {
    /// Stable method name used on completion records
    pub fn method(&self) -> &'static str {
        match self {
            GuestPricing::Fixed { .. } => "fixed",
            GuestPricing::Markup { .. } => "markup",
        }
    }

    /// What the guest pays for the given energy and base cost
    pub fn charge_price(&self, energy_kwh: f64, base_cost: f64) -> f64 {
        match self {
            GuestPricing::Fixed { price_per_kwh } => energy_kwh * price_per_kwh,
            GuestPricing::Markup { markup_factor } => base_cost * markup_factor,
        }
    }
}

/// Cost for a fixed-rate session
pub fn static_cost(energy_kwh: f64, rate: f64) -> f64 {
    energy_kwh * rate
}

/// Billable rate for one spot sub-interval.
///
/// Fees are added to the raw market sample and VAT applied on top. When no
/// sample is available the configured fallback rate is used as-is (it is
/// already fee and VAT inclusive).
pub fn effective_spot_rate(sample: Option<f64>, spot: &SpotPricingConfig) -> f64 {
    match sample {
        Some(rate) => (rate + spot.additional_cost_per_kwh) * spot.vat_multiplier,
        None => spot.fallback_rate,
    }
}

/// One rate-constant sub-interval of a spot-priced session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotSegment {
    /// Energy delivered during the sub-interval, kWh
    pub kwh: f64,
    /// Effective billable rate during the sub-interval
    pub rate: f64,
}

impl SpotSegment {
    /// Cost of this sub-interval
    pub fn cost(&self) -> f64 {
        self.kwh * self.rate
    }
}

// Rates closer than this are treated as the same sub-interval
const RATE_EPSILON: f64 = 1e-9;

/// Incremental spot cost integrator.
///
/// Each accepted energy delta is billed at the rate effective when it was
/// delivered; consecutive deltas at the same rate collapse into one
/// segment. The total is the sum over segments, never final energy times
/// the latest rate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpotCostAccumulator {
    /// Per-rate sub-intervals in delivery order
    pub segments: Vec<SpotSegment>,
}

impl SpotCostAccumulator {
    /// Add an energy delta delivered at the given effective rate
    pub fn add(&mut self, delta_kwh: f64, rate: f64) {
        if delta_kwh <= 0.0 {
            return;
        }
        if let Some(last) = self.segments.last_mut()
            && (last.rate - rate).abs() < RATE_EPSILON
        {
            last.kwh += delta_kwh;
            return;
        }
        self.segments.push(SpotSegment {
            kwh: delta_kwh,
            rate,
        });
    }

    /// Integrated cost across all sub-intervals
    pub fn total_cost(&self) -> f64 {
        self.segments.iter().map(SpotSegment::cost).sum()
    }

    /// Integrated energy across all sub-intervals
    pub fn total_kwh(&self) -> f64 {
        self.segments.iter().map(|s| s.kwh).sum()
    }
}

/// Round a currency amount to two decimals for records and logs
pub fn round_currency(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
