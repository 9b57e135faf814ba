//! Energy cross-validation for Elektra
//!
//! Compares the engine's own session energy accumulation against the
//! charger's lifetime total-energy counter, when one is reported. The
//! verdict is diagnostic only: the engine's accumulation stays
//! authoritative for billing and is never altered here.

use crate::logging::get_logger;
use serde::{Deserialize, Serialize};

/// Cross-validation result attached to a finalized session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossCheck {
    /// Lifetime counter at session start, when available
    pub counter_start_kwh: Option<f64>,
    /// Lifetime counter at session end, when available
    pub counter_end_kwh: Option<f64>,
    /// Absolute difference between the counter delta and tracked energy
    pub deviation_kwh: Option<f64>,
    /// Set when the deviation exceeds the configured tolerance
    pub mismatch: bool,
}

/// Tracks the lifetime counter across one session
#[derive(Debug, Clone)]
pub struct CrossValidator {
    tolerance_kwh: f64,
    counter_start_kwh: Option<f64>,
    counter_last_kwh: Option<f64>,
}

impl CrossValidator {
    /// Create a validator with the configured absolute tolerance
    pub fn new(tolerance_kwh: f64) -> Self {
        Self {
            tolerance_kwh,
            counter_start_kwh: None,
            counter_last_kwh: None,
        }
    }

    /// Capture the counter at session start
    pub fn start(&mut self, counter_kwh: Option<f64>) {
        self.counter_start_kwh = counter_kwh;
        self.counter_last_kwh = counter_kwh;
    }

    /// Record a counter observation from a reading
    pub fn observe(&mut self, counter_kwh: Option<f64>) {
        if counter_kwh.is_some() {
            self.counter_last_kwh = counter_kwh;
        }
    }

    /// Counter value captured at session start, for recovery snapshots
    pub fn counter_start_kwh(&self) -> Option<f64> {
        self.counter_start_kwh
    }

    /// Compare the counter delta against the tracked session energy.
    ///
    /// Silently skipped (no mismatch) when the counter was absent at
    /// session start or never observed again before the end.
    pub fn verdict(&self, tracked_kwh: f64) -> CrossCheck {
        let (Some(start), Some(end)) = (self.counter_start_kwh, self.counter_last_kwh) else {
            return CrossCheck::default();
        };

        let delta = end - start;
        let deviation = (delta - tracked_kwh).abs();
        let mismatch = deviation > self.tolerance_kwh;

        if mismatch {
            get_logger("validation").warn(&format!(
                "Energy cross-validation deviation: tracked {:.3} kWh vs counter delta {:.3} kWh (tolerance {:.3} kWh)",
                tracked_kwh, delta, self.tolerance_kwh
            ));
        }

        CrossCheck {
            counter_start_kwh: Some(start),
            counter_end_kwh: Some(end),
            deviation_kwh: Some(deviation),
            mismatch,
        }
    }
}
