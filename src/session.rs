//! Charging session aggregate for Elektra
//!
//! A [`Session`] is created when the engine detects a car starting to
//! charge, mutated on every accepted reading, and frozen into a
//! [`CompletedSession`] record at finalization. All user/vehicle/pricing
//! data is snapshotted at creation so later configuration changes cannot
//! re-attribute a running session.

use crate::config::PricingMode;
use crate::identity::{Identity, UnknownReason};
use crate::pricing::{SpotCostAccumulator, SpotSegment, round_currency};
use crate::validation::CrossCheck;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The mutable aggregate for one charging event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session ID
    pub id: String,

    /// Start time of the session
    pub started_at: DateTime<Utc>,

    /// End time of the session (absent while active)
    pub ended_at: Option<DateTime<Utc>>,

    /// Identity resolved once at session start
    pub identity: Identity,

    /// RFID indicator value captured at start
    pub rfid: Option<u32>,

    /// Charger this session ran on
    pub charger_name: String,

    /// Session energy counter value at start (kWh)
    pub energy_start_kwh: f64,

    /// Energy delivered so far (kWh), monotonic non-decreasing while active
    pub energy_kwh: f64,

    /// Peak power observed during the session (W)
    pub peak_power_w: f64,

    /// Accumulated cost at the base rate
    pub cost_total: f64,

    /// How the cost was computed
    pub cost_method: PricingMode,

    /// Spot sub-interval detail; empty in static mode
    #[serde(default)]
    pub spot: SpotCostAccumulator,

    /// What a guest pays for this session, when guest pricing applies
    pub charge_price_total: Option<f64>,

    /// Estimated state of charge added (%), when a vehicle is resolved
    pub estimated_soc_added_pct: Option<f64>,
}

impl Session {
    /// Create a new session at the moment charging is detected
    pub fn begin(
        started_at: DateTime<Utc>,
        identity: Identity,
        rfid: Option<u32>,
        charger_name: String,
        energy_start_kwh: f64,
        cost_method: PricingMode,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            started_at,
            ended_at: None,
            identity,
            rfid,
            charger_name,
            energy_start_kwh,
            energy_kwh: 0.0,
            peak_power_w: 0.0,
            cost_total: 0.0,
            cost_method,
            spot: SpotCostAccumulator::default(),
            charge_price_total: None,
            estimated_soc_added_pct: None,
        }
    }

    /// Session duration in seconds up to the given instant
    pub fn duration_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.started_at).num_seconds()
    }

    /// Display name of the acting user
    pub fn user_name(&self) -> &str {
        self.identity.user_name()
    }
}

/// Immutable record of one finalized, non-discarded session.
///
/// Emitted exactly once to the statistics aggregator and the completion
/// sink; currency amounts are rounded for the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedSession {
    /// Session ID, the idempotency key for downstream consumers
    pub session_id: String,

    /// Charger this session ran on
    pub charger: String,

    /// Identity snapshot from session start
    pub identity: Identity,

    /// Start timestamp
    pub started_at: DateTime<Utc>,

    /// End timestamp
    pub ended_at: DateTime<Utc>,

    /// Duration in seconds
    pub duration_secs: i64,

    /// Energy delivered (kWh)
    pub energy_kwh: f64,

    /// Average power over the session (W)
    pub avg_power_w: f64,

    /// Peak power observed (W)
    pub peak_power_w: f64,

    /// Cost at the base rate
    pub cost_total: f64,

    /// How the cost was computed
    pub cost_method: PricingMode,

    /// Spot sub-interval detail; empty in static mode
    pub spot_segments: Vec<SpotSegment>,

    /// What the guest pays, when guest pricing applies
    pub charge_price_total: Option<f64>,

    /// Guest billing method name, when guest pricing applies
    pub charge_price_method: Option<String>,

    /// Estimated state of charge added (%)
    pub estimated_soc_added_pct: Option<f64>,

    /// Why the session could not be attributed, when it could not
    pub unknown_reason: Option<UnknownReason>,

    /// Cross-validation verdict against the lifetime counter
    pub cross_check: CrossCheck,
}

impl CompletedSession {
    /// Freeze a session into its completion record
    pub fn from_session(session: &Session, ended_at: DateTime<Utc>, cross_check: CrossCheck) -> Self {
        let duration_secs = session.duration_secs(ended_at).max(0);
        let avg_power_w = if duration_secs > 0 {
            session.energy_kwh * 3_600_000.0 / duration_secs as f64
        } else {
            0.0
        };
        let charge_price_method = session
            .identity
            .user()
            .and_then(|u| u.guest_pricing.as_ref())
            .map(|p| p.method().to_string());

        Self {
            session_id: session.id.clone(),
            charger: session.charger_name.clone(),
            identity: session.identity.clone(),
            started_at: session.started_at,
            ended_at,
            duration_secs,
            energy_kwh: session.energy_kwh,
            avg_power_w,
            peak_power_w: session.peak_power_w,
            cost_total: round_currency(session.cost_total),
            cost_method: session.cost_method,
            spot_segments: session.spot.segments.clone(),
            charge_price_total: session.charge_price_total.map(round_currency),
            charge_price_method,
            estimated_soc_added_pct: session.estimated_soc_added_pct,
            unknown_reason: session.identity.unknown_reason(),
            cross_check,
        }
    }

    /// Display name of the acting user
    pub fn user_name(&self) -> &str {
        self.identity.user_name()
    }

    /// Whether the acting user is a guest
    pub fn is_guest(&self) -> bool {
        self.identity.is_guest()
    }
}
