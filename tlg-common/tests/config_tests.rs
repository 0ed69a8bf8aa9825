//! Tests for configuration resolution and graceful degradation
//!
//! Covers:
//! - Priority order: CLI > environment > TOML > compiled default
//! - Missing / broken TOML files fall back to defaults
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.

use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::PathBuf;
use tlg_common::config::{
    load_or_default, load_toml_config, CliOverrides, CompiledDefaults, Settings, TomlConfig,
    BIND_ADDR_ENV, CONFIG_PATH_ENV, DATASET_ENV, DEFAULT_DEPTH_ENV, WORKER_THREADS_ENV,
};

fn clear_env() {
    for name in [
        CONFIG_PATH_ENV,
        WORKER_THREADS_ENV,
        DEFAULT_DEPTH_ENV,
        DATASET_ENV,
        BIND_ADDR_ENV,
    ] {
        env::remove_var(name);
    }
}

#[test]
#[serial]
fn test_defaults_when_nothing_configured() {
    clear_env();

    let settings = Settings::resolve(&CliOverrides::default(), &TomlConfig::default());
    let defaults = CompiledDefaults::default();

    assert_eq!(settings.worker_threads, defaults.worker_threads);
    assert_eq!(settings.default_depth, defaults.default_depth);
    assert_eq!(settings.bind_addr, defaults.bind_addr);
    assert_eq!(settings.dataset, None);
    assert_eq!(settings.log_level, "info");
}

#[test]
#[serial]
fn test_toml_beats_default() {
    clear_env();

    let toml_config = TomlConfig {
        worker_threads: Some(3),
        default_depth: Some(5),
        dataset: Some(PathBuf::from("/srv/tlg/dataset.json")),
        ..Default::default()
    };
    let settings = Settings::resolve(&CliOverrides::default(), &toml_config);

    assert_eq!(settings.worker_threads, 3);
    assert_eq!(settings.default_depth, 5);
    assert_eq!(settings.dataset, Some(PathBuf::from("/srv/tlg/dataset.json")));
}

#[test]
#[serial]
fn test_env_beats_toml() {
    clear_env();
    env::set_var(WORKER_THREADS_ENV, "7");
    env::set_var(BIND_ADDR_ENV, "0.0.0.0:9000");

    let toml_config = TomlConfig {
        worker_threads: Some(3),
        bind_addr: Some("127.0.0.1:1".to_string()),
        ..Default::default()
    };
    let settings = Settings::resolve(&CliOverrides::default(), &toml_config);

    assert_eq!(settings.worker_threads, 7);
    assert_eq!(settings.bind_addr, "0.0.0.0:9000");

    clear_env();
}

#[test]
#[serial]
fn test_cli_beats_env() {
    clear_env();
    env::set_var(WORKER_THREADS_ENV, "7");

    let cli = CliOverrides {
        worker_threads: Some(2),
        ..Default::default()
    };
    let settings = Settings::resolve(&cli, &TomlConfig::default());
    assert_eq!(settings.worker_threads, 2);

    clear_env();
}

#[test]
#[serial]
fn test_unparsable_env_is_ignored() {
    clear_env();
    env::set_var(WORKER_THREADS_ENV, "lots");

    let toml_config = TomlConfig {
        worker_threads: Some(4),
        ..Default::default()
    };
    let settings = Settings::resolve(&CliOverrides::default(), &toml_config);
    assert_eq!(settings.worker_threads, 4);

    clear_env();
}

#[test]
#[serial]
fn test_zero_workers_falls_back_to_default() {
    clear_env();

    let cli = CliOverrides {
        worker_threads: Some(0),
        ..Default::default()
    };
    let settings = Settings::resolve(&cli, &TomlConfig::default());
    assert_eq!(settings.worker_threads, CompiledDefaults::default().worker_threads);
}

#[test]
#[serial]
fn test_zero_workers_tier_is_skipped_not_final() {
    clear_env();

    let toml_config = TomlConfig {
        worker_threads: Some(4),
        ..Default::default()
    };
    let cli = CliOverrides {
        worker_threads: Some(0),
        ..Default::default()
    };
    assert_eq!(Settings::resolve(&cli, &toml_config).worker_threads, 4);

    env::set_var(WORKER_THREADS_ENV, "0");
    assert_eq!(
        Settings::resolve(&CliOverrides::default(), &toml_config).worker_threads,
        4
    );
    assert_eq!(Settings::resolve(&cli, &toml_config).worker_threads, 4);

    clear_env();
}

#[test]
#[serial]
fn test_load_toml_config_from_file() {
    clear_env();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "worker_threads = 12").unwrap();
    writeln!(file, "bind_addr = \"127.0.0.1:6000\"").unwrap();
    writeln!(file, "[logging]").unwrap();
    writeln!(file, "level = \"debug\"").unwrap();

    let config = load_toml_config(file.path()).unwrap();
    assert_eq!(config.worker_threads, Some(12));
    assert_eq!(config.bind_addr.as_deref(), Some("127.0.0.1:6000"));
    assert_eq!(config.logging.level, "debug");
}

#[test]
#[serial]
fn test_broken_config_file_degrades_to_defaults() {
    clear_env();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "worker_threads = [not valid").unwrap();
    env::set_var(CONFIG_PATH_ENV, file.path());

    let config = load_or_default();
    assert_eq!(config, TomlConfig::default());

    clear_env();
}

#[test]
#[serial]
fn test_config_path_env_is_honored() {
    clear_env();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "default_depth = 4").unwrap();
    env::set_var(CONFIG_PATH_ENV, file.path());

    let config = load_or_default();
    assert_eq!(config.default_depth, Some(4));

    clear_env();
}
