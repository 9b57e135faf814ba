use chrono::{DateTime, Duration, TimeZone, Utc};
use elektra::config::Config;
use elektra::engine::{EngineState, SessionEngine};
use elektra::reading::{CarStatus, Reading};
use elektra::recovery::{RecoverySnapshot, RecoveryStore};

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
rfid_mappings:
  - card_index: 6
    user_id: petra
"#,
    )
    .unwrap()
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
        ..Reading::new(base_time() + Duration::seconds(secs), status, energy_kwh, power_w)
    }
}

/// Run an engine halfway into a session and capture its snapshot
fn snapshot_mid_session() -> (RecoverySnapshot, String) {
    let mut engine = SessionEngine::new(test_config());
    engine.process_reading(&reading_with_rfid(0, CarStatus::ConnectedIdle, 0.0, 0.0, 7));
    engine.process_reading(&reading_with_rfid(600, CarStatus::Charging, 3.0, 7000.0, 7));
    let snapshot = engine.recovery_snapshot().unwrap();
    let id = snapshot.session.id.clone();
    (snapshot, id)
}

#[test]
fn store_roundtrip_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("recovery.json");
    let store = RecoveryStore::new(&path);

    assert!(store.load().unwrap().is_none());

    let (snapshot, id) = snapshot_mid_session();
    store.save(&snapshot).unwrap();

    let loaded = store.load().unwrap().unwrap();
    assert_eq!(loaded.session.id, id);
    assert_eq!(loaded.rfid, Some(7));
    assert!((loaded.session.energy_kwh - 3.0).abs() < 1e-9);

    store.clear().unwrap();
    assert!(store.load().unwrap().is_none());
    // Clearing an empty slot is not an error
    store.clear().unwrap();
}

#[test]
fn matching_snapshot_resumes_tracking() {
    let (snapshot, id) = snapshot_mid_session();

    let mut engine = SessionEngine::new(test_config());
    engine.adopt_recovery(snapshot);

    // First post-restart reading: same indicator, car still charging
    engine.process_reading(&reading_with_rfid(700, CarStatus::Charging, 3.2, 7000.0, 7));
    assert_eq!(engine.state(), EngineState::Tracking);

    let session = engine.active_session().unwrap();
    assert_eq!(session.id, id);
    assert_eq!(session.user_name(), "Petra");
    // Accumulation continues from the snapshot baseline
    assert!((session.energy_kwh - 3.2).abs() < 1e-9);

    // The recovered session completes normally with the full energy
    engine.process_reading(&reading_with_rfid(1200, CarStatus::Charging, 4.0, 7000.0, 7));
    engine.process_reading(&reading_with_rfid(1210, CarStatus::ChargingComplete, 4.0, 0.0, 7));
    engine.process_reading(&reading_with_rfid(1220, CarStatus::ChargingComplete, 4.0, 0.0, 7));
    let completed = engine
        .process_reading(&reading_with_rfid(1230, CarStatus::ChargingComplete, 4.0, 0.0, 7))
        .unwrap();
    assert_eq!(completed.session_id, id);
    assert!((completed.energy_kwh - 4.0).abs() < 1e-9);
}

#[test]
fn differing_rfid_discards_snapshot_and_starts_fresh() {
    let (snapshot, old_id) = snapshot_mid_session();

    let mut engine = SessionEngine::new(test_config());
    engine.adopt_recovery(snapshot);

    // Another card is active now: the snapshot is stale
    engine.process_reading(&reading_with_rfid(700, CarStatus::Charging, 0.0, 7000.0, 9));
    assert_eq!(engine.state(), EngineState::Tracking);
    let session = engine.active_session().unwrap();
    assert_ne!(session.id, old_id);
    assert!((session.energy_start_kwh).abs() < 1e-9);
}

#[test]
fn disconnected_car_discards_snapshot() {
    let (snapshot, _) = snapshot_mid_session();

    let mut engine = SessionEngine::new(test_config());
    engine.adopt_recovery(snapshot);

    engine.process_reading(&reading_with_rfid(700, CarStatus::Disconnected, 0.0, 0.0, 7));
    assert_eq!(engine.state(), EngineState::Idle);
    assert!(engine.active_session().is_none());
}

#[test]
fn snapshot_preserves_counter_baseline_for_cross_validation() {
    let mut engine = SessionEngine::new(test_config());
    engine.process_reading(&Reading {
        rfid: Some(7),
        total_energy_kwh: Some(100.0),
        ..Reading::new(base_time(), CarStatus::ConnectedIdle, 0.0, 0.0)
    });
    engine.process_reading(&Reading {
        rfid: Some(7),
        total_energy_kwh: Some(102.0),
        ..Reading::new(
            base_time() + Duration::seconds(600),
            CarStatus::Charging,
            2.0,
            7000.0,
        )
    });

    let snapshot = engine.recovery_snapshot().unwrap();
    assert_eq!(snapshot.counter_start_kwh, Some(100.0));

    // After restart the counter delta still spans the whole session
    let mut restarted = SessionEngine::new(test_config());
    restarted.adopt_recovery(snapshot);
    let with_counter = |secs, status, energy, counter: f64| Reading {
        rfid: Some(7),
        total_energy_kwh: Some(counter),
        ..Reading::new(
            base_time() + Duration::seconds(secs),
            status,
            energy,
            7000.0,
        )
    };
    restarted.process_reading(&with_counter(700, CarStatus::Charging, 4.0, 104.0));
    restarted.process_reading(&with_counter(710, CarStatus::ChargingComplete, 4.0, 104.0));
    restarted.process_reading(&with_counter(720, CarStatus::ChargingComplete, 4.0, 104.0));
    let completed = restarted
        .process_reading(&with_counter(730, CarStatus::ChargingComplete, 4.0, 104.0))
        .unwrap();

    assert!(!completed.cross_check.mismatch);
    assert_eq!(completed.cross_check.counter_start_kwh, Some(100.0));
}
