//! Tests for engine configuration.

use super::*;

#[test]
fn test_toml_parsing() {
    let toml = r#"
        domain_limit = 2000

        [termination]
        time_limit_ms = 1500
        backtrack_limit = 500

        [search]
        best_of = 4
        max_rule_passes = 8

        [session]
        busy_policy = "block"
        incremental = false
    "#;

    let config = EngineConfig::from_toml_str(toml).unwrap();
    assert_eq!(config.domain_limit, 2000);
    assert_eq!(config.termination.backtrack_limit, Some(500));
    assert_eq!(config.termination.choice_point_limit, None);
    assert_eq!(config.time_limit(), Some(Duration::from_millis(1500)));
    assert_eq!(config.search.best_of, 4);
    assert_eq!(config.search.max_rule_passes, 8);
    assert_eq!(config.session.busy_policy, BusyPolicy::Block);
    assert!(!config.session.incremental);
}

#[test]
fn test_yaml_parsing() {
    let yaml = r#"
        termination:
          choice_point_limit: 100
        search:
          best_of: 2
    "#;

    let config = EngineConfig::from_yaml_str(yaml).unwrap();
    assert_eq!(config.termination.choice_point_limit, Some(100));
    assert_eq!(config.search.best_of, 2);
    assert_eq!(config.search.max_rule_passes, 16);
    assert_eq!(config.session, SessionConfig::default());
}

#[test]
fn test_defaults() {
    let config = EngineConfig::from_toml_str("").unwrap();
    assert_eq!(config.domain_limit, 10_000);
    assert_eq!(config.search.best_of, 1);
    assert!(config.session.incremental);
    assert_eq!(config.session.busy_policy, BusyPolicy::Reject);
    assert!(config.termination.is_unbounded());
    assert_eq!(config.time_limit(), None);
}

#[test]
fn test_builder() {
    let config = EngineConfig::new()
        .with_time_limit(Duration::from_secs(2))
        .with_backtrack_limit(50)
        .with_choice_point_limit(75)
        .with_best_of(0)
        .with_busy_policy(BusyPolicy::Block)
        .with_incremental(false)
        .with_domain_limit(64);

    assert_eq!(config.termination.time_limit_ms, Some(2000));
    assert_eq!(config.termination.backtrack_limit, Some(50));
    assert_eq!(config.termination.choice_point_limit, Some(75));
    // best_of is clamped to at least one solution
    assert_eq!(config.search.best_of, 1);
    assert_eq!(config.session.busy_policy, BusyPolicy::Block);
    assert!(!config.session.incremental);
    assert_eq!(config.domain_limit, 64);
    assert!(config.validate().is_ok());
}

#[test]
fn test_invalid_values_are_rejected() {
    let error = EngineConfig::from_toml_str("[search]\nbest_of = 0").unwrap_err();
    assert!(matches!(error, ConfigError::Invalid(_)));

    let error = EngineConfig::from_yaml_str("domain_limit: 0").unwrap_err();
    assert!(matches!(error, ConfigError::Invalid(_)));
}

#[test]
fn test_parse_error_is_reported() {
    let error = EngineConfig::from_toml_str("[termination]\ntime_limit_ms = \"soon\"").unwrap_err();
    assert!(matches!(error, ConfigError::Toml(_)));
}

#[test]
fn test_missing_file_falls_back_to_default() {
    let config = EngineConfig::load("/nonexistent/engine.toml").unwrap_or_default();
    assert_eq!(config.search.best_of, 1);
}

#[test]
fn test_converts_into_engine_error() {
    let error: ConfigForgeError = ConfigError::Invalid("bad".into()).into();
    assert!(matches!(error, ConfigForgeError::Config(message) if message.contains("bad")));
}
