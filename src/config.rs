//! Configuration management for Elektra
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files. The users/vehicles/RFID tables are supplied
//! here by the setup tooling and are read-only to the engine.

use crate::error::{ElektraError, Result};
use crate::pricing::GuestPricing;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_true() -> bool {
    true
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Charger identity and capabilities
    pub charger: ChargerConfig,

    /// Session engine tuning
    pub engine: EngineConfig,

    /// Pricing configuration for session cost calculation
    pub pricing: PricingConfig,

    /// Recovery snapshot persistence
    pub recovery: RecoveryConfig,

    /// Statistics aggregation options
    pub stats: StatsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Known users (regular and guest)
    pub users: Vec<UserConfig>,

    /// Known vehicles with battery parameters
    pub vehicles: Vec<VehicleConfig>,

    /// RFID card index to user/vehicle mappings
    pub rfid_mappings: Vec<RfidMappingConfig>,
}

/// Charger identity and capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChargerConfig {
    /// Display name, also used as the recovery slot key
    pub name: String,

    /// Whether the charger hardware has an RFID reader at all.
    /// Controls the unknown-reason reported for sessions without a card.
    pub rfid_supported: bool,
}

/// Session engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of post-completion readings to absorb before finalizing
    pub settle_readings: u32,

    /// Settle window timeout in seconds (finalize even without readings)
    pub settle_timeout_secs: u64,

    /// Sessions shorter than this are discarded as noise
    pub min_session_duration_secs: i64,

    /// Sessions below this energy are discarded as noise
    pub min_session_energy_kwh: f64,

    /// Session energy at or below this value counts as a fresh counter
    pub start_energy_epsilon_kwh: f64,

    /// Energy drops larger than this are a session boundary; smaller drops
    /// are ignored as stale/out-of-order readings
    pub reset_tolerance_kwh: f64,

    /// Max accepted deviation between tracked energy and the lifetime
    /// counter delta before the mismatch flag is set
    pub counter_tolerance_kwh: f64,
}

/// Pricing mode selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PricingMode {
    /// Fixed rate per kWh
    #[default]
    Static,
    /// Time-varying market rate sampled alongside readings
    Spot,
}

/// Pricing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Pricing mode (static or spot)
    pub mode: PricingMode,

    /// Static rate per kWh
    pub static_rate: f64,

    /// Currency symbol for display and logs
    pub currency_symbol: String,

    /// Spot mode parameters
    pub spot: SpotPricingConfig,
}

/// Spot pricing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotPricingConfig {
    /// Grid fees and surcharges added to each sampled rate, per kWh
    pub additional_cost_per_kwh: f64,

    /// VAT multiplier applied on top of rate plus fees
    pub vat_multiplier: f64,

    /// Rate used when no spot sample is available; fee/VAT inclusive
    pub fallback_rate: f64,
}

/// Recovery snapshot persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Snapshot file path (one slot per charger instance)
    pub path: String,

    /// Snapshot interval in seconds while a session is active
    pub interval_secs: u64,
}

/// Statistics aggregation options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Track each guest under their own name instead of one shared
    /// "Guest" aggregate
    pub per_guest_breakdown: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Path to log file or directory
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// User kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserKind {
    /// Household member billed at the base rate
    #[default]
    Regular,
    /// Visitor billed via guest pricing
    Guest,
}

/// A known user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    /// Stable identifier referenced by RFID mappings
    pub id: String,

    /// Display name
    pub name: String,

    /// Regular or guest
    #[serde(default)]
    pub kind: UserKind,

    /// Guest billing override; required for guest users
    #[serde(default)]
    pub guest_pricing: Option<GuestPricing>,
}

/// A known vehicle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleConfig {
    /// Stable identifier referenced by RFID mappings
    pub id: String,

    /// Display name
    pub name: String,

    /// Nominal battery capacity in kWh
    pub battery_capacity_kwh: f64,

    /// Usable capacity in kWh; falls back to nominal when absent
    #[serde(default)]
    pub usable_battery_kwh: Option<f64>,

    /// Charging efficiency factor (0, 1]
    #[serde(default = "VehicleConfig::default_efficiency")]
    pub charging_efficiency: f64,
}

impl VehicleConfig {
    fn default_efficiency() -> f64 {
        0.90
    }

    /// Usable capacity, defaulting to nominal capacity
    pub fn usable_capacity_kwh(&self) -> f64 {
        self.usable_battery_kwh.unwrap_or(self.battery_capacity_kwh)
    }
}

/// RFID card mapping linking a card index to a user and optional vehicle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RfidMappingConfig {
    /// Card slot index as reported by the charger (indicator value - 1)
    pub card_index: u32,

    /// User this card belongs to
    pub user_id: String,

    /// Vehicle usually charged with this card
    #[serde(default)]
    pub vehicle_id: Option<String>,

    /// Deactivated cards resolve as unmapped
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Default for ChargerConfig {
    fn default() -> Self {
        Self {
            name: "EV Charger".to_string(),
            rfid_supported: true,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settle_readings: 3,
            settle_timeout_secs: 30,
            min_session_duration_secs: 60,
            min_session_energy_kwh: 0.05,
            start_energy_epsilon_kwh: 0.01,
            reset_tolerance_kwh: 0.1,
            counter_tolerance_kwh: 0.3,
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            mode: PricingMode::Static,
            static_rate: 2.50,
            currency_symbol: "kr".to_string(),
            spot: SpotPricingConfig::default(),
        }
    }
}

impl Default for SpotPricingConfig {
    fn default() -> Self {
        Self {
            additional_cost_per_kwh: 0.0,
            vat_multiplier: 1.0,
            fallback_rate: 2.50,
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            path: "/data/elektra_recovery.json".to_string(),
            interval_secs: 300,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            per_guest_breakdown: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/var/log/elektra".to_string(),
            backup_count: 7,
            console_output: true,
            json_format: false,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// The path can be overridden with the `ELEKTRA_CONFIG` environment
    /// variable; otherwise `elektra.yaml` in the working directory is used.
    pub fn load() -> Result<Self> {
        let path = std::env::var("ELEKTRA_CONFIG").unwrap_or_else(|_| "elektra.yaml".to_string());
        Self::load_from(&path)
    }

    /// Load configuration from a specific YAML file
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ElektraError::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Parse configuration from a YAML string and validate it
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.pricing.static_rate < 0.0 {
            return Err(ElektraError::validation(
                "pricing.static_rate",
                "rate must not be negative",
            ));
        }
        if self.pricing.spot.vat_multiplier <= 0.0 {
            return Err(ElektraError::validation(
                "pricing.spot.vat_multiplier",
                "multiplier must be positive",
            ));
        }
        if self.engine.settle_readings == 0 {
            return Err(ElektraError::validation(
                "engine.settle_readings",
                "at least one settle reading is required",
            ));
        }
        if self.engine.reset_tolerance_kwh < 0.0 || self.engine.counter_tolerance_kwh < 0.0 {
            return Err(ElektraError::validation(
                "engine",
                "tolerances must not be negative",
            ));
        }
        if self.recovery.interval_secs == 0 {
            return Err(ElektraError::validation(
                "recovery.interval_secs",
                "interval must be positive",
            ));
        }

        for user in &self.users {
            if user.kind == UserKind::Guest && user.guest_pricing.is_none() {
                return Err(ElektraError::validation(
                    "users",
                    &format!("guest user '{}' has no guest_pricing", user.id),
                ));
            }
        }

        for vehicle in &self.vehicles {
            if vehicle.battery_capacity_kwh <= 0.0 {
                return Err(ElektraError::validation(
                    "vehicles",
                    &format!("vehicle '{}' has non-positive battery capacity", vehicle.id),
                ));
            }
            if vehicle.charging_efficiency <= 0.0 || vehicle.charging_efficiency > 1.0 {
                return Err(ElektraError::validation(
                    "vehicles",
                    &format!("vehicle '{}' efficiency must be in (0, 1]", vehicle.id),
                ));
            }
        }

        for mapping in &self.rfid_mappings {
            if !self.users.iter().any(|u| u.id == mapping.user_id) {
                return Err(ElektraError::validation(
                    "rfid_mappings",
                    &format!(
                        "card {} references unknown user '{}'",
                        mapping.card_index, mapping.user_id
                    ),
                ));
            }
            if let Some(ref vid) = mapping.vehicle_id
                && !self.vehicles.iter().any(|v| &v.id == vid)
            {
                return Err(ElektraError::validation(
                    "rfid_mappings",
                    &format!(
                        "card {} references unknown vehicle '{}'",
                        mapping.card_index, vid
                    ),
                ));
            }
        }

        Ok(())
    }
}
