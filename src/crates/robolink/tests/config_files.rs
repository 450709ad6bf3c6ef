use std::fs;
use std::time::Duration;

use robolink::{EngineConfig, LinkConfig, LinkError, DEFAULT_PORT};

#[test]
fn link_config_loads_from_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("link.json");
    fs::write(
        &path,
        r#"{
            "host": "10.0.0.7",
            "safe_mode": false,
            "auto_render": false,
            "wait_timeout_ms": 1500
        }"#,
    )
    .expect("write config");

    let config = LinkConfig::from_json_file(&path).expect("config should load");
    assert_eq!(config.host, "10.0.0.7");
    assert_eq!(config.port, DEFAULT_PORT);
    assert!(!config.safe_mode);
    assert!(!config.auto_render);
    assert_eq!(config.wait_timeout, Duration::from_millis(1500));
    assert_eq!(config.endpoint(), format!("10.0.0.7:{DEFAULT_PORT}"));
}

#[test]
fn missing_file_reports_its_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("absent.json");
    match LinkConfig::from_json_file(&path) {
        Err(LinkError::ConfigRead { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected read failure, got {other:?}"),
    }
}

#[test]
fn malformed_file_is_a_parse_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("broken.json");
    fs::write(&path, "{ \"port\": \"twenty\" ").expect("write config");
    assert!(matches!(
        LinkConfig::from_json_file(&path),
        Err(LinkError::ConfigParse(_))
    ));
}

#[test]
fn engine_config_builder_collects_overrides() {
    let dir = tempfile::tempdir().expect("tempdir");
    let link = LinkConfig::default().with_timeout(Duration::from_millis(500));
    let config = EngineConfig::new("/opt/engine/bin/engine")
        .with_arg("--headless")
        .with_station_path(dir.path().join("cell.json"))
        .with_env("ENGINE_LOG", "debug")
        .with_working_directory(dir.path())
        .with_startup_timeout(Duration::from_secs(1))
        .with_link_config(link.clone());

    assert_eq!(config.extra_args, vec!["--headless".to_string()]);
    assert_eq!(config.station_path, Some(dir.path().join("cell.json")));
    assert_eq!(config.env.get("ENGINE_LOG").map(String::as_str), Some("debug"));
    assert_eq!(config.working_directory.as_deref(), Some(dir.path()));
    assert_eq!(config.startup_timeout, Duration::from_secs(1));
    assert_eq!(config.link, link);
}
