//! Canonical charger reading for Elektra
//!
//! A collaborator normalizes vendor-specific entity data into this single
//! shape before it reaches the engine; the engine never sees raw hardware
//! values and never mutates a reading.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Car connection status as reported by the charger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CarStatus {
    /// No car plugged in
    Disconnected,
    /// Car plugged in, not drawing power
    ConnectedIdle,
    /// Car actively charging
    Charging,
    /// Car reports the charge finished
    ChargingComplete,
}

impl CarStatus {
    /// Whether a car is physically connected in this status
    pub fn is_connected(self) -> bool {
        !matches!(self, CarStatus::Disconnected)
    }
}

/// One immutable snapshot of the charger's observable state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,

    /// Car connection status
    pub status: CarStatus,

    /// Cumulative session energy counter in kWh, monotonic within a session
    pub session_energy_kwh: f64,

    /// Instantaneous power in W
    pub power_w: f64,

    /// RFID transaction indicator. `Some(0)` means no card was presented;
    /// `Some(n)` selects card slot `n - 1`. `None` when the charger exposes
    /// no indicator at all.
    #[serde(default)]
    pub rfid: Option<u32>,

    /// Lifetime total energy counter in kWh, when the charger reports one
    #[serde(default)]
    pub total_energy_kwh: Option<f64>,

    /// Spot market rate sample effective at this instant, currency/kWh
    /// before fees and VAT. Only meaningful in spot pricing mode.
    #[serde(default)]
    pub spot_rate: Option<f64>,
}

impl Reading {
    /// Build a minimal reading; used by tests and simple collaborators
    pub fn new(
        timestamp: DateTime<Utc>,
        status: CarStatus,
        session_energy_kwh: f64,
        power_w: f64,
    ) -> Self {
        Self {
            timestamp,
            status,
            session_energy_kwh,
            power_w,
            rfid: None,
            total_energy_kwh: None,
            spot_rate: None,
        }
    }
}
