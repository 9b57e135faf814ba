//! # Elektra - Charging Session Engine for Shared EV Chargers
//!
//! A Rust implementation of the session tracking core for a shared
//! electric-vehicle charger: it turns a stream of normalized sensor
//! readings into discrete, attributed, billed charging-session records.
//!
//! ## Features
//!
//! - **Session Detection**: 3-state machine (idle, tracking, completing)
//!   with a settle window for trailing data and energy-reset boundaries
//! - **RFID Attribution**: card indicator resolved once per session
//!   against a static mapping table
//! - **Billing**: static per-kWh pricing or incrementally integrated spot
//!   pricing, with guest overrides
//! - **SoC Estimate**: state-of-charge added from vehicle battery data
//! - **Cross-Validation**: diagnostic check against the charger's
//!   lifetime energy counter
//! - **Crash Recovery**: single-slot session snapshot surviving process
//!   restarts
//! - **Statistics**: idempotent per-user totals with monthly breakdown
//!
//! ## Architecture
//!
//! The application follows a modular architecture with clear separation
//! of concerns:
//!
//! - `config`: Configuration management and validation
//! - `logging`: Structured logging and tracing
//! - `reading`: Canonical charger reading shape
//! - `identity`: RFID identity resolution
//! - `pricing`: Session cost calculation
//! - `soc`: State-of-charge estimation
//! - `validation`: Energy cross-validation
//! - `session`: Session aggregate and completion records
//! - `engine`: The state machine and its async runtime
//! - `recovery`: Recovery snapshot persistence
//! - `stats`: Per-user statistics aggregation

pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod logging;
pub mod pricing;
pub mod reading;
pub mod recovery;
pub mod session;
pub mod soc;
pub mod stats;
pub mod validation;

// Re-export commonly used types
pub use config::Config;
pub use engine::{EngineState, SessionEngine, SessionView};
pub use error::{ElektraError, Result};
pub use reading::{CarStatus, Reading};
pub use session::{CompletedSession, Session};
