#![cfg(feature = "test-support")]
#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use robolink::{EngineConfig, EngineProcess, LinkConfig, LinkResult};
use tempfile::TempDir;

pub fn fake_engine_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_fake_engine") {
        return PathBuf::from(path);
    }

    // Fallback to the workspace target directory.
    let mut path = std::env::current_exe().expect("current exe");
    path.pop(); // deps
    path.pop(); // debug or release
    path.push("fake_engine");
    if cfg!(windows) {
        path.set_extension("exe");
    }
    path
}

/// Link flags for tests: short exchanges, bounded motion waits.
pub fn test_link_config() -> LinkConfig {
    LinkConfig::default()
        .with_timeout(Duration::from_secs(5))
        .with_wait_timeout(Duration::from_secs(5))
}

pub fn engine_config() -> EngineConfig {
    EngineConfig::new(fake_engine_path()).with_link_config(test_link_config())
}

/// Fake engine with its built-in demo station (a robot and a work frame).
pub fn start_engine() -> LinkResult<EngineProcess> {
    EngineProcess::spawn(engine_config())
}

/// Fake engine seeded from `station_json`. Keep the directory alive for as
/// long as the engine runs.
pub fn start_engine_with_station(station_json: &str) -> LinkResult<(EngineProcess, TempDir)> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("station.json");
    fs::write(&path, station_json)?;
    let engine = EngineProcess::spawn(engine_config().with_station_path(&path))?;
    Ok((engine, dir))
}
