use chrono::{DateTime, Duration, TimeZone, Utc};
use elektra::config::Config;
use elektra::engine::{EngineState, SessionEngine};
use elektra::identity::UnknownReason;
use elektra::reading::{CarStatus, Reading};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 22, 8, 0, 0).unwrap()
}

fn test_config() -> Config {
    Config::from_yaml_str(
        r#"
charger:
  name: Test Charger
engine:
  settle_readings: 2
users:
  - id: petra
    name: Petra
  - id: guest1
    name: Visitor
    kind: guest
    guest_pricing:
      method: markup
      markup_factor: 1.5
vehicles:
  - id: kona
    name: Kona
    battery_capacity_kwh: 64.0
    usable_battery_kwh: 60.0
    charging_efficiency: 0.9
rfid_mappings:
  - card_index: 6
    user_id: petra
    vehicle_id: kona
  - card_index: 2
    user_id: guest1
"#,
    )
    .unwrap()
}

fn reading(secs: i64, status: CarStatus, energy_kwh: f64, power_w: f64) -> Reading {
    Reading::new(base_time() + Duration::seconds(secs), status, energy_kwh, power_w)
}

fn reading_with_rfid(
    secs: i64,
    status: CarStatus,
    energy_kwh: f64,
    power_w: f64,
    rfid: u32,
) -> Reading {
    Reading {
        rfid: Some(rfid),
        ..reading(secs, status, energy_kwh, power_w)
    }
}

#[test]
fn full_session_lifecycle() {
    let mut engine = SessionEngine::new(test_config());
    assert_eq!(engine.state(), EngineState::Idle);

    // Car connects with a fresh session counter and card 7 presented
    assert!(engine
        .process_reading(&reading_with_rfid(0, CarStatus::ConnectedIdle, 0.0, 0.0, 7))
        .is_none());
    assert_eq!(engine.state(), EngineState::Tracking);
    assert_eq!(engine.active_session().unwrap().user_name(), "Petra");

    engine.process_reading(&reading_with_rfid(300, CarStatus::Charging, 1.0, 7200.0, 7));
    engine.process_reading(&reading_with_rfid(600, CarStatus::Charging, 2.5, 7400.0, 7));
    engine.process_reading(&reading_with_rfid(1200, CarStatus::Charging, 4.2, 7000.0, 7));
    assert_eq!(engine.state(), EngineState::Tracking);

    // Charge finished; settle window absorbs two more readings
    assert!(engine
        .process_reading(&reading_with_rfid(1210, CarStatus::ChargingComplete, 4.2, 0.0, 7))
        .is_none());
    assert_eq!(engine.state(), EngineState::Completing);
    assert!(engine
        .process_reading(&reading_with_rfid(1220, CarStatus::ChargingComplete, 4.2, 0.0, 7))
        .is_none());

    let completed = engine
        .process_reading(&reading_with_rfid(1230, CarStatus::ChargingComplete, 4.2, 0.0, 7))
        .unwrap();
    assert_eq!(engine.state(), EngineState::Idle);
    assert!(engine.active_session().is_none());

    assert!((completed.energy_kwh - 4.2).abs() < 1e-9);
    assert_eq!(completed.duration_secs, 1230);
    assert_eq!(completed.user_name(), "Petra");
    assert_eq!(completed.identity.vehicle().unwrap().name, "Kona");
    // Static cost at the default 2.50 rate
    assert!((completed.cost_total - 10.5).abs() < 1e-9);
    assert!((completed.peak_power_w - 7400.0).abs() < 1e-9);
    // 4.2 kWh at 90% efficiency into a 60 kWh usable pack
    assert!((completed.estimated_soc_added_pct.unwrap() - 6.3).abs() < 1e-9);
    assert!(completed.unknown_reason.is_none());
}

#[test]
fn session_without_rfid_is_unknown_with_no_signal_reason() {
    let mut engine = SessionEngine::new(test_config());

    engine.process_reading(&reading(0, CarStatus::ConnectedIdle, 0.0, 0.0));
    engine.process_reading(&reading(300, CarStatus::Charging, 1.0, 6000.0));
    engine.process_reading(&reading(600, CarStatus::Charging, 2.0, 6000.0));
    engine.process_reading(&reading(610, CarStatus::ChargingComplete, 2.0, 0.0));
    engine.process_reading(&reading(620, CarStatus::ChargingComplete, 2.0, 0.0));
    let completed = engine
        .process_reading(&reading(630, CarStatus::ChargingComplete, 2.0, 0.0))
        .unwrap();

    assert_eq!(completed.user_name(), "Unknown");
    assert!(completed.identity.user().is_none());
    assert_eq!(completed.unknown_reason, Some(UnknownReason::NoRfidSignal));
    // No vehicle resolved, so SoC is unavailable rather than zero
    assert!(completed.estimated_soc_added_pct.is_none());
}

#[test]
fn micro_session_is_discarded() {
    let mut engine = SessionEngine::new(test_config());

    engine.process_reading(&reading_with_rfid(0, CarStatus::ConnectedIdle, 0.0, 0.0, 7));
    engine.process_reading(&reading_with_rfid(10, CarStatus::Charging, 0.01, 2000.0, 7));
    engine.process_reading(&reading_with_rfid(20, CarStatus::Disconnected, 0.01, 0.0, 7));
    engine.process_reading(&reading_with_rfid(25, CarStatus::Disconnected, 0.01, 0.0, 7));
    let completed =
        engine.process_reading(&reading_with_rfid(30, CarStatus::Disconnected, 0.01, 0.0, 7));

    // Discarded: both under 60 s and under 0.05 kWh
    assert!(completed.is_none());
    assert_eq!(engine.state(), EngineState::Idle);
}

#[test]
fn stale_energy_readings_are_ignored() {
    let mut engine = SessionEngine::new(test_config());

    engine.process_reading(&reading_with_rfid(0, CarStatus::ConnectedIdle, 0.0, 0.0, 7));
    engine.process_reading(&reading_with_rfid(100, CarStatus::Charging, 2.0, 7000.0, 7));
    // Drop within the 0.1 kWh tolerance: stale reading, not a boundary
    engine.process_reading(&reading_with_rfid(110, CarStatus::Charging, 1.95, 7000.0, 7));
    assert_eq!(engine.state(), EngineState::Tracking);
    assert!((engine.active_session().unwrap().energy_kwh - 2.0).abs() < 1e-9);

    engine.process_reading(&reading_with_rfid(200, CarStatus::Charging, 2.2, 7000.0, 7));
    assert!((engine.active_session().unwrap().energy_kwh - 2.2).abs() < 1e-9);
}

#[test]
fn energy_reset_closes_old_session_and_starts_new() {
    let mut engine = SessionEngine::new(test_config());

    engine.process_reading(&reading_with_rfid(0, CarStatus::ConnectedIdle, 0.0, 0.0, 7));
    engine.process_reading(&reading_with_rfid(600, CarStatus::Charging, 5.0, 7000.0, 7));

    // Counter reset far beyond tolerance: old session ends here
    let completed = engine
        .process_reading(&reading_with_rfid(900, CarStatus::Charging, 0.2, 7000.0, 3))
        .unwrap();
    assert!((completed.energy_kwh - 5.0).abs() < 1e-9);
    assert_eq!(completed.duration_secs, 900);
    assert_eq!(completed.user_name(), "Petra");

    // And a new one begins at the reset point, re-resolving identity
    assert_eq!(engine.state(), EngineState::Tracking);
    let session = engine.active_session().unwrap();
    assert!((session.energy_start_kwh - 0.2).abs() < 1e-9);
    assert_eq!(session.user_name(), "Visitor");
}

#[test]
fn charging_resume_during_settle_window_continues_session() {
    let mut engine = SessionEngine::new(test_config());

    engine.process_reading(&reading_with_rfid(0, CarStatus::ConnectedIdle, 0.0, 0.0, 7));
    engine.process_reading(&reading_with_rfid(300, CarStatus::Charging, 2.0, 7000.0, 7));
    engine.process_reading(&reading_with_rfid(310, CarStatus::ChargingComplete, 2.0, 0.0, 7));
    assert_eq!(engine.state(), EngineState::Completing);

    // Charger flapped: energy resumes before the window expired
    assert!(engine
        .process_reading(&reading_with_rfid(320, CarStatus::Charging, 2.5, 5000.0, 7))
        .is_none());
    assert_eq!(engine.state(), EngineState::Tracking);

    engine.process_reading(&reading_with_rfid(600, CarStatus::Charging, 3.0, 5000.0, 7));
    engine.process_reading(&reading_with_rfid(610, CarStatus::ChargingComplete, 3.0, 0.0, 7));
    engine.process_reading(&reading_with_rfid(620, CarStatus::ChargingComplete, 3.0, 0.0, 7));
    let completed = engine
        .process_reading(&reading_with_rfid(630, CarStatus::ChargingComplete, 3.0, 0.0, 7))
        .unwrap();

    // One session, not two
    assert!((completed.energy_kwh - 3.0).abs() < 1e-9);
    assert_eq!(completed.duration_secs, 630);
}

#[test]
fn settle_timeout_finalizes_without_further_readings() {
    let mut engine = SessionEngine::new(test_config());

    engine.process_reading(&reading_with_rfid(0, CarStatus::ConnectedIdle, 0.0, 0.0, 7));
    engine.process_reading(&reading_with_rfid(300, CarStatus::Charging, 2.0, 7000.0, 7));
    engine.process_reading(&reading_with_rfid(310, CarStatus::Disconnected, 2.0, 0.0, 7));
    assert_eq!(engine.state(), EngineState::Completing);

    let completed = engine
        .on_settle_timeout(base_time() + Duration::seconds(340))
        .unwrap();
    assert!((completed.energy_kwh - 2.0).abs() < 1e-9);
    assert_eq!(engine.state(), EngineState::Idle);

    // A second timeout is a no-op
    assert!(engine
        .on_settle_timeout(base_time() + Duration::seconds(400))
        .is_none());
}

#[test]
fn identity_is_resolved_once_and_cached() {
    let mut engine = SessionEngine::new(test_config());

    engine.process_reading(&reading_with_rfid(0, CarStatus::ConnectedIdle, 0.0, 0.0, 7));
    // Indicator changes mid-session; attribution must not change
    engine.process_reading(&reading_with_rfid(300, CarStatus::Charging, 2.0, 7000.0, 3));
    engine.process_reading(&reading_with_rfid(310, CarStatus::ChargingComplete, 2.0, 0.0, 3));
    engine.process_reading(&reading_with_rfid(320, CarStatus::ChargingComplete, 2.0, 0.0, 3));
    let completed = engine
        .process_reading(&reading_with_rfid(330, CarStatus::ChargingComplete, 2.0, 0.0, 3))
        .unwrap();

    assert_eq!(completed.user_name(), "Petra");
}

#[test]
fn guest_session_carries_charge_price() {
    let mut engine = SessionEngine::new(test_config());

    // Card 3 maps to the guest with a 1.5x markup
    engine.process_reading(&reading_with_rfid(0, CarStatus::ConnectedIdle, 0.0, 0.0, 3));
    engine.process_reading(&reading_with_rfid(300, CarStatus::Charging, 2.0, 7000.0, 3));
    engine.process_reading(&reading_with_rfid(310, CarStatus::ChargingComplete, 2.0, 0.0, 3));
    engine.process_reading(&reading_with_rfid(320, CarStatus::ChargingComplete, 2.0, 0.0, 3));
    let completed = engine
        .process_reading(&reading_with_rfid(330, CarStatus::ChargingComplete, 2.0, 0.0, 3))
        .unwrap();

    assert!(completed.is_guest());
    // Base cost 2.0 * 2.50 = 5.00, guest pays 1.5x
    assert!((completed.cost_total - 5.0).abs() < 1e-9);
    assert!((completed.charge_price_total.unwrap() - 7.5).abs() < 1e-9);
    assert_eq!(completed.charge_price_method.as_deref(), Some("markup"));
}

#[test]
fn cross_validation_flags_counter_deviation() {
    let mut engine = SessionEngine::new(test_config());

    let with_counter = |secs, status, energy, counter| Reading {
        rfid: Some(7),
        total_energy_kwh: Some(counter),
        ..reading(secs, status, energy, 7000.0)
    };

    engine.process_reading(&with_counter(0, CarStatus::ConnectedIdle, 0.0, 100.0));
    engine.process_reading(&with_counter(300, CarStatus::Charging, 4.2, 105.0));
    engine.process_reading(&with_counter(310, CarStatus::ChargingComplete, 4.2, 110.0));
    engine.process_reading(&with_counter(320, CarStatus::ChargingComplete, 4.2, 110.0));
    let completed = engine
        .process_reading(&with_counter(330, CarStatus::ChargingComplete, 4.2, 110.0))
        .unwrap();

    // Counter delta 10.0 vs tracked 4.2: far beyond the 0.3 kWh tolerance
    assert!(completed.cross_check.mismatch);
    assert!((completed.cross_check.deviation_kwh.unwrap() - 5.8).abs() < 1e-9);
    // The flag is diagnostic: billed energy stays authoritative
    assert!((completed.energy_kwh - 4.2).abs() < 1e-9);
}

#[test]
fn cross_validation_passes_on_matching_counter() {
    let mut engine = SessionEngine::new(test_config());

    let with_counter = |secs, status, energy, counter| Reading {
        rfid: Some(7),
        total_energy_kwh: Some(counter),
        ..reading(secs, status, energy, 7000.0)
    };

    engine.process_reading(&with_counter(0, CarStatus::ConnectedIdle, 0.0, 100.0));
    engine.process_reading(&with_counter(300, CarStatus::Charging, 4.2, 104.2));
    engine.process_reading(&with_counter(310, CarStatus::ChargingComplete, 4.2, 104.2));
    engine.process_reading(&with_counter(320, CarStatus::ChargingComplete, 4.2, 104.2));
    let completed = engine
        .process_reading(&with_counter(330, CarStatus::ChargingComplete, 4.2, 104.2))
        .unwrap();

    assert!(!completed.cross_check.mismatch);
}

#[test]
fn spot_mode_integrates_rate_changes() {
    let config = Config::from_yaml_str(
        r#"
engine:
  settle_readings: 2
pricing:
  mode: spot
  spot:
    additional_cost_per_kwh: 0.0
    vat_multiplier: 1.0
    fallback_rate: 2.0
"#,
    )
    .unwrap();
    let mut engine = SessionEngine::new(config);

    let with_rate = |secs, status, energy, rate: Option<f64>| Reading {
        spot_rate: rate,
        ..reading(secs, status, energy, 7000.0)
    };

    engine.process_reading(&with_rate(0, CarStatus::ConnectedIdle, 0.0, Some(1.0)));
    // 2.0 kWh delivered while the rate is 1.0
    engine.process_reading(&with_rate(300, CarStatus::Charging, 2.0, Some(1.0)));
    // 1.0 kWh delivered after the rate moved to 3.0
    engine.process_reading(&with_rate(600, CarStatus::Charging, 3.0, Some(3.0)));
    engine.process_reading(&with_rate(610, CarStatus::ChargingComplete, 3.0, Some(3.0)));
    engine.process_reading(&with_rate(620, CarStatus::ChargingComplete, 3.0, Some(3.0)));
    let completed = engine
        .process_reading(&with_rate(630, CarStatus::ChargingComplete, 3.0, Some(3.0)))
        .unwrap();

    // 2.0 * 1.0 + 1.0 * 3.0 = 5.0, not final energy times latest rate (9.0)
    assert!((completed.cost_total - 5.0).abs() < 1e-9);
    assert_eq!(completed.spot_segments.len(), 2);
    assert!((completed.energy_kwh - 3.0).abs() < 1e-9);
}

#[test]
fn spot_mode_uses_fallback_rate_when_sample_is_missing() {
    let config = Config::from_yaml_str(
        r#"
engine:
  settle_readings: 1
  min_session_duration_secs: 0
  min_session_energy_kwh: 0.0
pricing:
  mode: spot
  spot:
    fallback_rate: 2.0
"#,
    )
    .unwrap();
    let mut engine = SessionEngine::new(config);

    engine.process_reading(&reading(0, CarStatus::ConnectedIdle, 0.0, 0.0));
    // No spot sample on the stream: the inclusive fallback applies
    engine.process_reading(&reading(100, CarStatus::Charging, 1.5, 7000.0));
    engine.process_reading(&reading(110, CarStatus::ChargingComplete, 1.5, 0.0));
    let completed = engine
        .process_reading(&reading(120, CarStatus::ChargingComplete, 1.5, 0.0))
        .unwrap();

    assert!((completed.cost_total - 3.0).abs() < 1e-9);
}

#[test]
fn live_view_tracks_the_active_session() {
    let mut engine = SessionEngine::new(test_config());
    assert!(engine.view().is_none());

    engine.process_reading(&reading_with_rfid(0, CarStatus::ConnectedIdle, 0.0, 0.0, 7));
    engine.process_reading(&reading_with_rfid(300, CarStatus::Charging, 1.5, 6800.0, 7));

    let view = engine.view().unwrap();
    assert_eq!(view.state, EngineState::Tracking);
    assert_eq!(view.user_name, "Petra");
    assert!((view.energy_kwh - 1.5).abs() < 1e-9);
    assert!((view.power_w - 6800.0).abs() < 1e-9);
    assert!((view.cost_total - 3.75).abs() < 1e-9);
}
