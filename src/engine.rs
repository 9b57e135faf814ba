//! Session engine state machine for Elektra
//!
//! This module owns the single in-flight charging session per charger
//! instance. It consumes canonical readings in arrival order, detects
//! session boundaries, attributes sessions via RFID, accumulates energy
//! and cost, and emits completed session records.
//!
//! The state machine is synchronous and clock-free: all timing decisions
//! are driven by reading timestamps, and the settle-window timeout is
//! injected by the async runtime in `engine::runtime`.

pub mod runtime;

use crate::config::{Config, PricingMode};
use crate::identity::IdentityResolver;
use crate::logging::get_logger;
use crate::pricing::{effective_spot_rate, static_cost};
use crate::reading::{CarStatus, Reading};
use crate::recovery::RecoverySnapshot;
use crate::session::{CompletedSession, Session};
use crate::soc::estimate_soc_added;
use crate::validation::CrossValidator;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// No session in flight
    Idle,
    /// Session active, energy accumulating
    Tracking,
    /// Car reports done; absorbing trailing readings before finalizing
    Completing,
}

/// Live view of the active session, refreshed on every processed reading
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub state: EngineState,
    pub session_id: String,
    pub user_name: String,
    pub vehicle_name: Option<String>,
    pub started_at: DateTime<Utc>,
    pub energy_kwh: f64,
    pub power_w: f64,
    pub peak_power_w: f64,
    pub cost_total: f64,
    pub charge_price_total: Option<f64>,
    pub estimated_soc_added_pct: Option<f64>,
}

/// Settle-window bookkeeping while in `Completing`
#[derive(Debug, Clone)]
struct SettleWindow {
    readings_seen: u32,
}

/// The session tracking state machine.
///
/// One instance exists per charger; readings must be fed in arrival order
/// (the runtime serializes them through a single-consumer queue).
pub struct SessionEngine {
    config: Config,
    resolver: IdentityResolver,
    state: EngineState,
    session: Option<Session>,
    cross: CrossValidator,
    settle: Option<SettleWindow>,
    pending_recovery: Option<RecoverySnapshot>,
    /// Last accepted session energy counter value
    last_energy_kwh: f64,
    /// Last observed power
    last_power_w: f64,
    /// Car status from the previous reading
    last_status: CarStatus,
    logger: crate::logging::StructuredLogger,
}

impl SessionEngine {
    /// Create a new engine for one charger instance
    pub fn new(config: Config) -> Self {
        let resolver = IdentityResolver::new(&config);
        let cross = CrossValidator::new(config.engine.counter_tolerance_kwh);
        Self {
            config,
            resolver,
            state: EngineState::Idle,
            session: None,
            cross,
            settle: None,
            pending_recovery: None,
            last_energy_kwh: 0.0,
            last_power_w: 0.0,
            last_status: CarStatus::Disconnected,
            logger: get_logger("engine"),
        }
    }

    /// Current engine state
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// The active session, if any
    pub fn active_session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Hand the engine a recovery snapshot loaded at startup.
    ///
    /// The continuity check runs against the first reading; until then the
    /// snapshot is pending and the engine stays idle.
    pub fn adopt_recovery(&mut self, snapshot: RecoverySnapshot) {
        self.pending_recovery = Some(snapshot);
    }

    /// Snapshot of the active session for periodic persistence
    pub fn recovery_snapshot(&self) -> Option<RecoverySnapshot> {
        let session = self.session.as_ref()?;
        Some(RecoverySnapshot::capture(session, &self.cross))
    }

    /// Live view for display, or `None` while idle
    pub fn view(&self) -> Option<SessionView> {
        let session = self.session.as_ref()?;
        Some(SessionView {
            state: self.state,
            session_id: session.id.clone(),
            user_name: session.user_name().to_string(),
            vehicle_name: session.identity.vehicle().map(|v| v.name.clone()),
            started_at: session.started_at,
            energy_kwh: session.energy_kwh,
            power_w: self.last_power_w,
            peak_power_w: session.peak_power_w,
            cost_total: session.cost_total,
            charge_price_total: session.charge_price_total,
            estimated_soc_added_pct: session.estimated_soc_added_pct,
        })
    }

    /// Process one reading; returns the completed session record if this
    /// reading finalized one.
    pub fn process_reading(&mut self, reading: &Reading) -> Option<CompletedSession> {
        if let Some(snapshot) = self.pending_recovery.take() {
            self.try_restore(snapshot, reading);
        }

        let completed = match self.state {
            EngineState::Idle => {
                self.handle_idle(reading);
                None
            }
            EngineState::Tracking => self.handle_tracking(reading),
            EngineState::Completing => self.handle_completing(reading),
        };

        self.last_status = reading.status;
        completed
    }

    /// Finalize after the settle-window timeout elapsed without readings
    pub fn on_settle_timeout(&mut self, now: DateTime<Utc>) -> Option<CompletedSession> {
        if self.state != EngineState::Completing {
            return None;
        }
        self.logger.debug("Settle window timed out, finalizing");
        self.finalize(now)
    }

    // ------------------------------------------------------------------
    // State handlers
    // ------------------------------------------------------------------

    fn handle_idle(&mut self, reading: &Reading) {
        if !self.is_session_start(reading) {
            return;
        }
        self.start_session(reading);
    }

    /// A new session starts when a car connects with a fresh energy
    /// counter, or when charging begins straight after a disconnect
    /// without an observed reset.
    fn is_session_start(&self, reading: &Reading) -> bool {
        match reading.status {
            CarStatus::ConnectedIdle | CarStatus::Charging => {
                reading.session_energy_kwh <= self.config.engine.start_energy_epsilon_kwh
                    || (self.last_status == CarStatus::Disconnected
                        && reading.status == CarStatus::Charging)
            }
            CarStatus::Disconnected | CarStatus::ChargingComplete => false,
        }
    }

    fn start_session(&mut self, reading: &Reading) {
        let identity = self.resolver.resolve(reading.rfid);
        let session = Session::begin(
            reading.timestamp,
            identity,
            reading.rfid,
            self.config.charger.name.clone(),
            reading.session_energy_kwh,
            self.config.pricing.mode,
        );

        self.logger.info(&format!(
            "Session started: id={} user={} rfid={:?}",
            session.id,
            session.user_name(),
            reading.rfid
        ));
        if let Some(reason) = session.identity.unknown_reason() {
            self.logger
                .info(&format!("Session unattributed: reason={}", reason.as_str()));
        }

        self.cross = CrossValidator::new(self.config.engine.counter_tolerance_kwh);
        self.cross.start(reading.total_energy_kwh);
        self.last_energy_kwh = reading.session_energy_kwh;
        self.last_power_w = reading.power_w;
        self.session = Some(session);
        self.settle = None;
        self.state = EngineState::Tracking;

        self.update_session_metrics(reading, 0.0);
    }

    fn handle_tracking(&mut self, reading: &Reading) -> Option<CompletedSession> {
        match reading.status {
            CarStatus::ChargingComplete | CarStatus::Disconnected => {
                self.logger.debug(&format!(
                    "Car reports {:?}, entering settle window",
                    reading.status
                ));
                // Fold this reading's trailing energy before settling
                let delta = self.accept_monotonic_energy(reading.session_energy_kwh);
                self.last_power_w = reading.power_w;
                self.cross.observe(reading.total_energy_kwh);
                self.update_session_metrics(reading, delta);
                self.settle = Some(SettleWindow { readings_seen: 0 });
                self.state = EngineState::Completing;
                None
            }
            CarStatus::ConnectedIdle | CarStatus::Charging => self.track_reading(reading),
        }
    }

    /// Accept an energy value only if it does not move backwards; returns
    /// the accepted delta.
    fn accept_monotonic_energy(&mut self, energy_kwh: f64) -> f64 {
        if energy_kwh <= self.last_energy_kwh {
            return 0.0;
        }
        let delta = energy_kwh - self.last_energy_kwh;
        self.last_energy_kwh = energy_kwh;
        delta
    }

    fn track_reading(&mut self, reading: &Reading) -> Option<CompletedSession> {
        let energy = reading.session_energy_kwh;

        // Energy reset: the old session ended while we were not looking.
        // Finalize it at its last accepted values, then start fresh from
        // the reset point.
        if energy + self.config.engine.reset_tolerance_kwh < self.last_energy_kwh {
            self.logger.info(&format!(
                "Session energy reset detected ({:.3} -> {:.3} kWh), closing previous session",
                self.last_energy_kwh, energy
            ));
            let completed = self.finalize(reading.timestamp);
            self.start_session(reading);
            return completed;
        }

        if energy < self.last_energy_kwh {
            // Stale or out-of-order reading within tolerance; keep the
            // last accepted value
            self.logger.debug(&format!(
                "Ignoring stale energy reading {:.3} kWh (last accepted {:.3} kWh)",
                energy, self.last_energy_kwh
            ));
        }
        let delta = self.accept_monotonic_energy(energy);

        self.last_power_w = reading.power_w;
        self.cross.observe(reading.total_energy_kwh);
        self.update_session_metrics(reading, delta);
        None
    }

    fn handle_completing(&mut self, reading: &Reading) -> Option<CompletedSession> {
        // Charger flapped: energy or power resumed before the window
        // expired, so this is the same session continuing.
        if reading.session_energy_kwh > self.last_energy_kwh
            || reading.power_w > self.last_power_w
        {
            self.logger.info("Charging resumed during settle window, continuing session");
            self.settle = None;
            self.state = EngineState::Tracking;
            return self.handle_tracking(reading);
        }

        self.last_power_w = reading.power_w;
        self.cross.observe(reading.total_energy_kwh);

        let settle_readings = self.config.engine.settle_readings;
        let expired = match self.settle.as_mut() {
            Some(window) => {
                window.readings_seen += 1;
                window.readings_seen >= settle_readings
            }
            None => true,
        };

        if expired {
            self.finalize(reading.timestamp)
        } else {
            None
        }
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    fn update_session_metrics(&mut self, reading: &Reading, accepted_delta_kwh: f64) {
        let spot_rate = effective_spot_rate(reading.spot_rate, &self.config.pricing.spot);
        let static_rate = self.config.pricing.static_rate;
        let Some(session) = self.session.as_mut() else {
            return;
        };

        session.energy_kwh = (self.last_energy_kwh - session.energy_start_kwh).max(0.0);
        session.peak_power_w = session.peak_power_w.max(reading.power_w);

        session.cost_total = match session.cost_method {
            PricingMode::Static => static_cost(session.energy_kwh, static_rate),
            PricingMode::Spot => {
                session.spot.add(accepted_delta_kwh, spot_rate);
                session.spot.total_cost()
            }
        };

        if let Some(pricing) = session.identity.user().and_then(|u| u.guest_pricing.clone()) {
            session.charge_price_total =
                Some(pricing.charge_price(session.energy_kwh, session.cost_total));
        }

        let battery = session
            .identity
            .vehicle()
            .map(|v| (v.charging_efficiency, v.usable_battery_kwh));
        if let Some((efficiency, capacity)) = battery {
            session.estimated_soc_added_pct =
                estimate_soc_added(session.energy_kwh, Some(efficiency), Some(capacity));
        }
    }

    fn finalize(&mut self, ended_at: DateTime<Utc>) -> Option<CompletedSession> {
        let session = self.session.take()?;
        self.settle = None;
        self.state = EngineState::Idle;
        self.last_energy_kwh = 0.0;
        self.last_power_w = 0.0;

        let duration_secs = session.duration_secs(ended_at).max(0);
        let is_micro = duration_secs < self.config.engine.min_session_duration_secs
            || session.energy_kwh < self.config.engine.min_session_energy_kwh;

        if is_micro {
            self.logger.info(&format!(
                "Discarded micro-session: id={} duration={}s energy={:.3} kWh",
                session.id, duration_secs, session.energy_kwh
            ));
            return None;
        }

        let cross_check = self.cross.verdict(session.energy_kwh);
        let completed = CompletedSession::from_session(&session, ended_at, cross_check);

        self.logger.info(&format!(
            "Session completed: id={} user={} energy={:.3} kWh cost={:.2} {} duration={}s",
            completed.session_id,
            completed.user_name(),
            completed.energy_kwh,
            completed.cost_total,
            self.config.pricing.currency_symbol,
            completed.duration_secs
        ));

        Some(completed)
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    /// Decide whether a snapshot from before the restart still describes
    /// the session in front of us.
    fn try_restore(&mut self, snapshot: RecoverySnapshot, reading: &Reading) {
        let rfid_matches = normalize_rfid(reading.rfid) == normalize_rfid(snapshot.rfid);
        let status_ok = reading.status.is_connected();

        if rfid_matches && status_ok {
            let session = snapshot.session;
            self.logger.info(&format!(
                "Recovered session: id={} user={} energy={:.3} kWh",
                session.id,
                session.user_name(),
                session.energy_kwh
            ));
            self.last_energy_kwh = session.energy_start_kwh + session.energy_kwh;
            self.last_power_w = 0.0;
            self.cross = CrossValidator::new(self.config.engine.counter_tolerance_kwh);
            self.cross.start(snapshot.counter_start_kwh);
            self.cross.observe(reading.total_energy_kwh);
            self.session = Some(session);
            self.settle = None;
            self.state = EngineState::Tracking;
        } else {
            self.logger.warn(&format!(
                "Session continuity mismatch: snapshot rfid={:?} reading rfid={:?} status={:?}, starting fresh",
                snapshot.rfid, reading.rfid, reading.status
            ));
        }
    }
}

/// `Some(0)` is the charger's "no card" value; treat it as absent when
/// comparing snapshot and reading indicators.
fn normalize_rfid(rfid: Option<u32>) -> Option<u32> {
    match rfid {
        Some(0) | None => None,
        other => other,
    }
}
