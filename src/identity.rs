//! RFID identity resolution for Elektra
//!
//! Maps the RFID transaction indicator captured at session start to a user
//! and optional vehicle via the static mapping table. Resolution happens
//! exactly once per session; the outcome is cached on the session so a
//! card change mid-session cannot re-attribute a running charge.

use crate::config::{Config, RfidMappingConfig, UserConfig, UserKind, VehicleConfig};
use crate::logging::get_logger;
use crate::pricing::GuestPricing;
use serde::{Deserialize, Serialize};

/// Why a session could not be attributed to a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownReason {
    /// The charger has an RFID reader but no card was presented
    NoRfidSignal,
    /// A card was presented but no mapping exists for it (or the mapping
    /// is deactivated)
    NoMappingForCard,
    /// The charger has no RFID reader; sessions can never be attributed
    ChargerHasNoRfidSupport,
}

impl UnknownReason {
    /// Stable reason code used in logs and completion records
    pub fn as_str(self) -> &'static str {
        match self {
            UnknownReason::NoRfidSignal => "no_rfid_signal",
            UnknownReason::NoMappingForCard => "no_mapping_for_card",
            UnknownReason::ChargerHasNoRfidSupport => "charger_has_no_rfid_support",
        }
    }
}

/// User snapshot carried on a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRef {
    /// Stable user id from configuration
    pub id: String,
    /// Display name
    pub name: String,
    /// Regular or guest
    pub kind: UserKind,
    /// Guest billing override snapshotted at session start
    pub guest_pricing: Option<GuestPricing>,
}

/// Vehicle snapshot carried on a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleRef {
    /// Stable vehicle id from configuration
    pub id: String,
    /// Display name
    pub name: String,
    /// Usable battery capacity in kWh
    pub usable_battery_kwh: f64,
    /// Charging efficiency factor
    pub charging_efficiency: f64,
}

/// Outcome of resolving the RFID indicator at session start
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Identity {
    /// The card mapped to a known user
    Identified {
        user: UserRef,
        vehicle: Option<VehicleRef>,
    },
    /// Attribution failed; the reason is diagnostic, not an error
    Unidentified { reason: UnknownReason },
}

impl Identity {
    /// Display name for the acting user ("Unknown" when unidentified)
    pub fn user_name(&self) -> &str {
        match self {
            Identity::Identified { user, .. } => &user.name,
            Identity::Unidentified { .. } => "Unknown",
        }
    }

    /// Resolved user, if any
    pub fn user(&self) -> Option<&UserRef> {
        match self {
            Identity::Identified { user, .. } => Some(user),
            Identity::Unidentified { .. } => None,
        }
    }

    /// Resolved vehicle, if any
    pub fn vehicle(&self) -> Option<&VehicleRef> {
        match self {
            Identity::Identified { vehicle, .. } => vehicle.as_ref(),
            Identity::Unidentified { .. } => None,
        }
    }

    /// Unknown reason, if unidentified
    pub fn unknown_reason(&self) -> Option<UnknownReason> {
        match self {
            Identity::Identified { .. } => None,
            Identity::Unidentified { reason } => Some(*reason),
        }
    }

    /// Whether the resolved user is a guest
    pub fn is_guest(&self) -> bool {
        self.user().is_some_and(|u| u.kind == UserKind::Guest)
    }
}

/// Resolves RFID indicator values against the static mapping table
pub struct IdentityResolver {
    mappings: Vec<RfidMappingConfig>,
    users: Vec<UserConfig>,
    vehicles: Vec<VehicleConfig>,
    rfid_supported: bool,
    logger: crate::logging::StructuredLogger,
}

impl IdentityResolver {
    /// Build a resolver from the configuration tables
    pub fn new(config: &Config) -> Self {
        Self {
            mappings: config.rfid_mappings.clone(),
            users: config.users.clone(),
            vehicles: config.vehicles.clone(),
            rfid_supported: config.charger.rfid_supported,
            logger: get_logger("identity"),
        }
    }

    /// Resolve an RFID indicator to a user and optional vehicle.
    ///
    /// `Some(0)` is the charger's "no card presented" value. The card slot
    /// index is the indicator minus one.
    pub fn resolve(&self, rfid: Option<u32>) -> Identity {
        let indicator = match rfid {
            None if !self.rfid_supported => {
                return Identity::Unidentified {
                    reason: UnknownReason::ChargerHasNoRfidSupport,
                };
            }
            None | Some(0) => {
                return Identity::Unidentified {
                    reason: UnknownReason::NoRfidSignal,
                };
            }
            Some(n) => n,
        };

        let card_index = indicator - 1;
        let mapping = self.mappings.iter().find(|m| m.card_index == card_index);

        let mapping = match mapping {
            Some(m) if m.active => m,
            Some(_) => {
                self.logger.warn(&format!(
                    "RFID card at index {} is deactivated (indicator {})",
                    card_index, indicator
                ));
                return Identity::Unidentified {
                    reason: UnknownReason::NoMappingForCard,
                };
            }
            None => {
                self.logger.warn(&format!(
                    "No RFID mapping found for indicator {} (index {})",
                    indicator, card_index
                ));
                return Identity::Unidentified {
                    reason: UnknownReason::NoMappingForCard,
                };
            }
        };

        let Some(user) = self.users.iter().find(|u| u.id == mapping.user_id) else {
            self.logger.warn(&format!(
                "User '{}' referenced by RFID mapping not found",
                mapping.user_id
            ));
            return Identity::Unidentified {
                reason: UnknownReason::NoMappingForCard,
            };
        };

        let vehicle = mapping.vehicle_id.as_ref().and_then(|vid| {
            self.vehicles
                .iter()
                .find(|v| &v.id == vid)
                .map(|v| VehicleRef {
                    id: v.id.clone(),
                    name: v.name.clone(),
                    usable_battery_kwh: v.usable_capacity_kwh(),
                    charging_efficiency: v.charging_efficiency,
                })
        });

        Identity::Identified {
            user: UserRef {
                id: user.id.clone(),
                name: user.name.clone(),
                kind: user.kind,
                guest_pricing: user.guest_pricing.clone(),
            },
            vehicle,
        }
    }
}
