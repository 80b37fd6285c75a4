//! Tests for configuration loading and validation

use resilience_core::config::{
    CacheConfig, MonitorConfig, PoolConfig, ResilienceConfig, ShutdownConfig, MAX_DURATION_SECS,
};
use resilience_core::core::ResilienceError;
use std::collections::HashMap;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_defaults_are_valid() {
    let cfg = ResilienceConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.shutdown.timeout_secs, 10);
    assert!((cfg.monitor.alert_threshold - 0.8).abs() < f64::EPSILON);
    assert_eq!(cfg.monitor.interval_secs, 60);
    assert_eq!(cfg.monitor.cooldown_secs, 300);
    assert_eq!(cfg.monitor.history_capacity, 60);
    assert!(!cfg.cache.sweep_verbose);
}

#[test]
fn test_empty_environment_yields_defaults() {
    let cfg = ResilienceConfig::from_lookup(lookup(&[])).unwrap();
    assert_eq!(cfg, ResilienceConfig::default());
}

#[test]
fn test_environment_overrides() {
    let cfg = ResilienceConfig::from_lookup(lookup(&[
        ("SHUTDOWN_TIMEOUT_SECONDS", "30"),
        ("POOL_ALERT_THRESHOLD", "0.95"),
        ("POOL_MONITOR_INTERVAL_SECONDS", " 15 "),
        ("CACHE_SWEEP_VERBOSE", "yes"),
        ("POOL_SIZE", "20"),
        ("CACHE_DEFAULT_TTL_SECONDS", "-1"),
    ]))
    .unwrap();

    assert_eq!(cfg.shutdown.timeout_secs, 30);
    assert!((cfg.monitor.alert_threshold - 0.95).abs() < f64::EPSILON);
    assert_eq!(cfg.monitor.interval_secs, 15);
    assert!(cfg.cache.sweep_verbose);
    assert_eq!(cfg.pool.pool_size, 20);
    assert_eq!(cfg.cache.default_ttl_secs, -1);
}

#[test]
fn test_unparsable_value_rejected() {
    let err = ResilienceConfig::from_lookup(lookup(&[("POOL_SIZE", "lots")])).unwrap_err();
    assert!(matches!(err, ResilienceError::InvalidConfig(msg) if msg.contains("POOL_SIZE")));
}

#[test]
fn test_out_of_range_threshold_rejected() {
    let err =
        ResilienceConfig::from_lookup(lookup(&[("POOL_ALERT_THRESHOLD", "80")])).unwrap_err();
    assert!(err.to_string().contains("monitor invalid"));
}

#[test]
fn test_section_validation() {
    let shutdown = ShutdownConfig {
        timeout_secs: 0,
        ..ShutdownConfig::default()
    };
    assert!(shutdown.validate().is_err());

    let monitor = MonitorConfig {
        interval_secs: 0,
        ..MonitorConfig::default()
    };
    assert!(monitor.validate().is_err());

    let pool = PoolConfig {
        pool_size: 0,
        max_overflow: 0,
        ..PoolConfig::default()
    };
    assert!(pool.validate().is_err());

    let cache = CacheConfig {
        sweep_interval_secs: 0,
        ..CacheConfig::default()
    };
    assert!(cache.validate().is_err());
}

#[test]
fn test_durations_capped_at_one_year() {
    let err = ResilienceConfig::from_lookup(lookup(&[(
        "SHUTDOWN_TIMEOUT_SECONDS",
        "18446744073709551615",
    )]))
    .unwrap_err();
    assert!(matches!(err, ResilienceError::InvalidConfig(msg) if msg.contains("timeout_secs")));

    let monitor = MonitorConfig {
        cooldown_secs: MAX_DURATION_SECS + 1,
        ..MonitorConfig::default()
    };
    assert!(monitor.validate().is_err());

    let pool = PoolConfig {
        timeout_secs: MAX_DURATION_SECS,
        ..PoolConfig::default()
    };
    assert!(pool.validate().is_ok());
}

#[test]
fn test_json_partial_sections() {
    let cfg = ResilienceConfig::from_json_str(r#"{"monitor": {"cooldown_secs": 60}}"#).unwrap();
    assert_eq!(cfg.monitor.cooldown_secs, 60);
    assert_eq!(cfg.monitor.interval_secs, 60);
    assert_eq!(cfg.pool, PoolConfig::default());

    assert!(ResilienceConfig::from_json_str(r#"{"pool": {"timeout_secs": 0}}"#).is_err());
    assert!(ResilienceConfig::from_json_str("not json").is_err());
}
