// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;

#[test]
#[serial]
fn load_with_env_override_and_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("silod.toml"),
        "manager_id = \"mgm7.example.org:1094\"\ncapability_key = \"k3y\"\n",
    )
    .unwrap();

    // Env mutation is process-global; keep the critical section tight.
    std::env::set_var("SILO_STATE_DIR", dir.path());
    let config = Config::load().unwrap();
    std::env::remove_var("SILO_STATE_DIR");

    assert_eq!(config.state_dir, dir.path());
    assert_eq!(config.manager_id, "mgm7.example.org:1094");
    assert_eq!(config.capability_key, "k3y");
    assert_eq!(config.lock_path, dir.path().join("silod.pid"));
    assert!(!config.log_to_file);
}

#[test]
#[serial]
fn load_rejects_bad_toml() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("silod.toml"), "manager_id = [nonsense").unwrap();

    std::env::set_var("SILO_STATE_DIR", dir.path());
    let err = Config::load().unwrap_err();
    std::env::remove_var("SILO_STATE_DIR");

    assert!(matches!(err, ConfigError::Unparsable { .. }));
}
