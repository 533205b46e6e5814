use emproto::config::Config;
use emproto::protocol::P51Guard;
use std::fs;
use std::time::Duration;

#[test]
fn save_and_load_yaml_roundtrip() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("emproto.yaml");

    let mut cfg = Config::default();
    cfg.network.port = 28400;
    cfg.protocol.p51_guard = P51Guard::Legacy;
    cfg.evses_file = tmp_dir.path().join("evses.json").to_string_lossy().to_string();
    cfg.logging.file = path.with_extension("log").to_string_lossy().to_string();

    cfg.save_to_file(&path).unwrap();
    let loaded = Config::from_file(&path).unwrap();

    assert_eq!(loaded.network.port, 28400);
    assert_eq!(loaded.protocol.p51_guard, P51Guard::Legacy);
    assert_eq!(loaded.evses_file, cfg.evses_file);
    assert_eq!(loaded.logging.file, cfg.logging.file);
}

#[test]
fn config_validation_errors() {
    let mut cfg = Config::default();

    cfg.network.bind_addr.clear();
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.network.port = 0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.session.liveness_timeout_secs = 0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.session.sweep_interval_ms = 0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.session.login_timeout_ms = 0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.session.event_capacity = 0;
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.protocol.user_id = "a-user-id-that-is-too-long".to_string();
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.logging.level = "LOUD".to_string();
    assert!(cfg.validate().is_err());

    cfg = Config::default();
    cfg.timezone = "Europe/Amsterdam".to_string();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.tz(), chrono_tz::Europe::Amsterdam);
}

#[test]
fn durations_and_socket_address() {
    let cfg = Config::default();
    assert_eq!(cfg.session.liveness_timeout(), Duration::from_secs(30));
    assert_eq!(cfg.session.login_timeout(), Duration::from_millis(3000));
    assert_eq!(cfg.session.poll_interval(), Some(Duration::from_secs(5)));
    assert_eq!(cfg.session.relogin_after(), Some(Duration::from_secs(30)));
    assert_eq!(
        cfg.network.socket_addr().unwrap(),
        "0.0.0.0:28376".parse().unwrap()
    );
}

#[test]
fn zero_poll_settings_disable_polling() {
    let mut cfg = Config::default();
    cfg.session.poll_interval_ms = 0;
    cfg.session.relogin_after_secs = 0;
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.session.poll_interval(), None);
    assert_eq!(cfg.session.relogin_after(), None);
}

#[test]
fn invalid_yaml_is_a_serialization_error() {
    let tmp_dir = tempfile::tempdir().unwrap();
    let path = tmp_dir.path().join("broken.yaml");
    fs::write(&path, "network: [not, a, map").unwrap();
    assert!(matches!(
        Config::from_file(&path),
        Err(emproto::EvseError::Serialization { .. })
    ));

    assert!(matches!(
        Config::from_file(tmp_dir.path().join("missing.yaml")),
        Err(emproto::EvseError::Io { .. })
    ));
}
