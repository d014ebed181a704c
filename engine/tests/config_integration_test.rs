//! Integration tests for configuration management
//!
//! Loads a config file from disk and checks that every runtime component
//! picks its settings up from the right section.

use kestrel_engine::admission::AdmissionLimits;
use kestrel_engine::agent::SchedulerSettings;
use kestrel_engine::config::Config;
use kestrel_engine::memory::{ConsolidationSettings, ContextSettings, RetryPolicy};
use kestrel_engine::state::StateSettings;
use std::time::Duration;
use tempfile::TempDir;

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let data_dir = dir.path().join("data");
    let workspace = dir.path().join("workspace");
    let contents = format!(
        "[core]\ndata_dir = {:?}\nworkspace = {:?}\n\n{}",
        data_dir.to_str().unwrap(),
        workspace.to_str().unwrap(),
        body
    );
    let path = dir.path().join("config.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_sections_flow_into_components() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(
        &temp_dir,
        r#"
[agent]
think_interval_seconds = 2
error_delay_seconds = 7
llm_timeout_seconds = 90
context_token_limit = 3000

[budget]
max_loops_per_day = 50
max_tokens_per_day = 200000
warn_ratio = 0.75

[memory]
context_size = 12
per_type_limit = 3
refresh_iterations = 4
refresh_hours = 2
record_ttl_hours = 6
state_ttl_hours = 48

[consolidation]
interval_hours = 3
promotion_importance_threshold = 0.65

[retry]
max_attempts = 5
"#,
    );

    let config = Config::load_from_path(&path).unwrap();
    assert!(config.core.data_dir.is_dir());
    assert!(config.core.workspace.is_dir());
    assert_eq!(config.database_path(), config.core.data_dir.join("kestrel.db"));

    let scheduler = SchedulerSettings::from(&config);
    assert_eq!(scheduler.think_interval, Duration::from_secs(2));
    assert_eq!(scheduler.error_delay, Duration::from_secs(7));
    assert_eq!(scheduler.llm_timeout, Duration::from_secs(90));
    assert_eq!(scheduler.context_token_limit, 3000);

    let limits = AdmissionLimits::from(&config.budget);
    assert_eq!(limits.max_loops_per_day, 50);
    assert_eq!(limits.max_tokens_per_day, 200_000);
    assert!((limits.warn_ratio - 0.75).abs() < 1e-9);

    let context = ContextSettings::from(&config.memory);
    assert_eq!(context.context_size, 12);
    assert_eq!(context.per_type_limit, 3);
    assert_eq!(context.refresh_iterations, 4);
    assert_eq!(context.refresh_interval, chrono::Duration::hours(2));

    let state = StateSettings::from(&config.memory);
    assert_eq!(state.record_ttl, Duration::from_secs(6 * 3600));
    assert_eq!(state.state_ttl, Duration::from_secs(48 * 3600));

    let consolidation = ConsolidationSettings::from(&config.consolidation);
    assert_eq!(consolidation.interval, Duration::from_secs(3 * 3600));
    assert!((consolidation.promotion_threshold - 0.65).abs() < 1e-9);

    assert_eq!(RetryPolicy::from(&config.retry).max_attempts, 5);
}

#[test]
fn test_defaults_fill_missing_sections() {
    let temp_dir = TempDir::new().unwrap();
    let path = write_config(&temp_dir, "");

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(config.budget.max_loops_per_day, 4000);
    assert_eq!(config.memory.context_size, 20);
    assert_eq!(config.memory.per_type_limit, 5);
    assert!((config.consolidation.promotion_importance_threshold - 0.5).abs() < 1e-9);
    assert_eq!(config.llm.base_url, "http://localhost:11434");
}

#[test]
fn test_invalid_file_is_rejected() {
    let temp_dir = TempDir::new().unwrap();

    let path = write_config(
        &temp_dir,
        "[memory]\ncontext_size = 4\nper_type_limit = 9\n",
    );
    let err = Config::load_from_path(&path).unwrap_err();
    assert!(err.to_string().contains("per_type_limit"));

    let path = write_config(&temp_dir, "[budget]\nmax_loops_per_day = 0\n");
    assert!(Config::load_from_path(&path).is_err());

    std::fs::write(temp_dir.path().join("broken.toml"), "[agent\n").unwrap();
    assert!(Config::load_from_path(&temp_dir.path().join("broken.toml")).is_err());
}
