//! Configuration management
//!
//! This module handles loading, validation, and management of the Kestrel configuration.
//! Configuration is stored in TOML format at ~/.kestrel/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Data directory, workspace path, log level
//! - **agent**: Loop cadence, LLM timeout, initial goal and prompt
//! - **budget**: Daily loop and token ceilings
//! - **memory**: Context ranking and short-term TTLs
//! - **consolidation**: Promotion cadence and threshold
//! - **llm**: Ollama-compatible endpoint
//! - **reader**: Polling cadence and dedup window
//! - **retry**: Store/LLM retry policy
//!
//! Every section is optional and falls back to its defaults.
//!
//! # Environment Overrides
//!
//! The loop and memory knobs can be overridden with `KESTREL_`-prefixed
//! variables, e.g. `KESTREL_MAX_LOOPS_PER_DAY=100`. Overrides are applied after
//! the file is parsed and before validation, so an unparsable value is a
//! configuration error.
//!
//! # Examples
//!
//! ```no_run
//! use kestrel_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Data dir: {:?}", config.core.data_dir);
//! println!("Loops per day: {}", config.budget.max_loops_per_day);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "KESTREL_";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub budget: BudgetConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub consolidation: ConsolidationConfig,

    #[serde(default)]
    pub llm: LLMConfig,

    #[serde(default)]
    pub reader: ReaderConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Data directory holding the database and PID file (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory the filesystem tools are confined to (supports ~ expansion)
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            workspace: default_workspace(),
        }
    }
}

/// Agent loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_think_interval")]
    pub think_interval_seconds: u64,

    /// Pause after a failed iteration
    #[serde(default = "default_error_delay")]
    pub error_delay_seconds: u64,

    #[serde(default = "default_llm_timeout")]
    pub llm_timeout_seconds: u64,

    #[serde(default)]
    pub initial_goal: Option<String>,

    #[serde(default = "default_initial_prompt")]
    pub initial_prompt: String,

    /// Token budget for the per-iteration conversation window
    #[serde(default = "default_context_token_limit")]
    pub context_token_limit: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            think_interval_seconds: default_think_interval(),
            error_delay_seconds: default_error_delay(),
            llm_timeout_seconds: default_llm_timeout(),
            initial_goal: None,
            initial_prompt: default_initial_prompt(),
            context_token_limit: default_context_token_limit(),
        }
    }
}

impl AgentConfig {
    pub fn think_interval(&self) -> Duration {
        Duration::from_secs(self.think_interval_seconds)
    }

    pub fn error_delay(&self) -> Duration {
        Duration::from_secs(self.error_delay_seconds)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_seconds)
    }
}

/// Daily admission ceilings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_max_loops")]
    pub max_loops_per_day: u64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens_per_day: u64,

    /// Fraction of either ceiling at which a warning is logged
    #[serde(default = "default_warn_ratio")]
    pub warn_ratio: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_loops_per_day: default_max_loops(),
            max_tokens_per_day: default_max_tokens(),
            warn_ratio: default_warn_ratio(),
        }
    }
}

/// Memory context and short-term TTL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Size of the active set
    #[serde(default = "default_context_size")]
    pub context_size: usize,

    /// Entries kept per memory type
    #[serde(default = "default_per_type_limit")]
    pub per_type_limit: usize,

    #[serde(default = "default_refresh_iterations")]
    pub refresh_iterations: u64,

    #[serde(default = "default_refresh_hours")]
    pub refresh_hours: u64,

    /// Long-term entries fetched per load
    #[serde(default = "default_candidate_pool")]
    pub candidate_pool: usize,

    #[serde(default = "default_recency_horizon")]
    pub recency_horizon_hours: f64,

    /// Entries at or above this importance render a details excerpt
    #[serde(default = "default_high_importance")]
    pub high_importance_threshold: f64,

    #[serde(default = "default_record_ttl")]
    pub record_ttl_hours: u64,

    #[serde(default = "default_state_ttl")]
    pub state_ttl_hours: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            context_size: default_context_size(),
            per_type_limit: default_per_type_limit(),
            refresh_iterations: default_refresh_iterations(),
            refresh_hours: default_refresh_hours(),
            candidate_pool: default_candidate_pool(),
            recency_horizon_hours: default_recency_horizon(),
            high_importance_threshold: default_high_importance(),
            record_ttl_hours: default_record_ttl(),
            state_ttl_hours: default_state_ttl(),
        }
    }
}

/// Consolidation job configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationConfig {
    #[serde(default = "default_consolidation_interval")]
    pub interval_hours: u64,

    #[serde(default = "default_promotion_threshold")]
    pub promotion_importance_threshold: f64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_consolidation_interval(),
            promotion_importance_threshold: default_promotion_threshold(),
        }
    }
}

/// LLM endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
        }
    }
}

/// Reader process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_seen_capacity")]
    pub seen_capacity: usize,

    #[serde(default = "default_seen_retain")]
    pub seen_retain: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            seen_capacity: default_seen_capacity(),
            seen_retain: default_seen_retain(),
        }
    }
}

/// Retry policy for store and LLM calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.kestrel")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_workspace() -> PathBuf {
    PathBuf::from("~/.kestrel/workspace")
}

fn default_think_interval() -> u64 {
    5
}

fn default_error_delay() -> u64 {
    10
}

fn default_llm_timeout() -> u64 {
    300
}

fn default_initial_prompt() -> String {
    "You are an autonomous software agent. Observe your workspace, decide on the next \
     useful step, and use the available tools to make progress on your current goal."
        .to_string()
}

fn default_context_token_limit() -> usize {
    8000
}

fn default_max_loops() -> u64 {
    4000
}

fn default_max_tokens() -> u64 {
    8_000_000
}

fn default_warn_ratio() -> f64 {
    0.9
}

fn default_context_size() -> usize {
    20
}

fn default_per_type_limit() -> usize {
    5
}

fn default_refresh_iterations() -> u64 {
    10
}

fn default_refresh_hours() -> u64 {
    1
}

fn default_candidate_pool() -> usize {
    200
}

fn default_recency_horizon() -> f64 {
    72.0
}

fn default_high_importance() -> f64 {
    0.8
}

fn default_record_ttl() -> u64 {
    8
}

fn default_state_ttl() -> u64 {
    1
}

fn default_consolidation_interval() -> u64 {
    6
}

fn default_promotion_threshold() -> f64 {
    0.5
}

fn default_llm_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_llm_model() -> String {
    "qwen2.5-coder:7b".to_string()
}

fn default_poll_interval() -> u64 {
    500
}

fn default_seen_capacity() -> usize {
    1000
}

fn default_seen_retain() -> usize {
    500
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay() -> u64 {
    200
}

fn default_max_delay() -> u64 {
    5000
}

impl Config {
    /// Load configuration from the default location (~/.kestrel/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    /// Environment overrides are applied and the result is validated.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - An environment override cannot be parsed
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let defaults = Self::default();
        let toml_string = toml::to_string_pretty(&defaults)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        let mut config = defaults;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.kestrel/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".kestrel").join("config.toml"))
    }

    /// Path of the agent database
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("kestrel.db")
    }

    /// Apply `KESTREL_*` overrides using `lookup` to read variables
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvLookup {
            lookup: &lookup,
        };

        env.string("LOG_LEVEL", &mut self.core.log_level);
        if let Some(dir) = env.raw("DATA_DIR") {
            self.core.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = env.raw("WORKSPACE") {
            self.core.workspace = PathBuf::from(dir);
        }

        env.parse("THINK_INTERVAL_SECONDS", &mut self.agent.think_interval_seconds)?;
        env.parse("ERROR_DELAY_SECONDS", &mut self.agent.error_delay_seconds)?;
        env.parse("LLM_TIMEOUT_SECONDS", &mut self.agent.llm_timeout_seconds)?;
        if let Some(goal) = env.raw("INITIAL_GOAL") {
            self.agent.initial_goal = Some(goal);
        }
        env.string("INITIAL_PROMPT", &mut self.agent.initial_prompt);

        env.parse("MAX_LOOPS_PER_DAY", &mut self.budget.max_loops_per_day)?;
        env.parse("MAX_TOKENS_PER_DAY", &mut self.budget.max_tokens_per_day)?;

        env.parse("MEMORY_CONTEXT_SIZE", &mut self.memory.context_size)?;
        env.parse("MEMORY_REFRESH_ITERATIONS", &mut self.memory.refresh_iterations)?;
        env.parse("MEMORY_REFRESH_HOURS", &mut self.memory.refresh_hours)?;
        env.parse(
            "HIGH_IMPORTANCE_THRESHOLD",
            &mut self.memory.high_importance_threshold,
        )?;

        env.parse(
            "CONSOLIDATION_INTERVAL_HOURS",
            &mut self.consolidation.interval_hours,
        )?;
        env.parse(
            "PROMOTION_IMPORTANCE_THRESHOLD",
            &mut self.consolidation.promotion_importance_threshold,
        )?;

        env.string("LLM_BASE_URL", &mut self.llm.base_url);
        env.string("LLM_MODEL", &mut self.llm.model);

        Ok(())
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates ranges and thresholds
    /// - Expands ~ in paths
    /// - Creates the data directory and workspace if they don't exist
    pub fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        check_unit("budget.warn_ratio", self.budget.warn_ratio)?;
        check_unit(
            "memory.high_importance_threshold",
            self.memory.high_importance_threshold,
        )?;
        check_unit(
            "consolidation.promotion_importance_threshold",
            self.consolidation.promotion_importance_threshold,
        )?;

        check_positive("agent.think_interval_seconds", self.agent.think_interval_seconds)?;
        check_positive("memory.refresh_iterations", self.memory.refresh_iterations)?;
        check_positive("memory.refresh_hours", self.memory.refresh_hours)?;
        check_positive("memory.record_ttl_hours", self.memory.record_ttl_hours)?;
        check_positive("memory.state_ttl_hours", self.memory.state_ttl_hours)?;
        check_positive("consolidation.interval_hours", self.consolidation.interval_hours)?;
        check_positive("reader.poll_interval_ms", self.reader.poll_interval_ms)?;

        if self.budget.max_loops_per_day == 0 || self.budget.max_tokens_per_day == 0 {
            return Err(EngineError::Config(
                "budget ceilings must be greater than zero".to_string(),
            ));
        }
        if self.memory.context_size == 0 {
            return Err(EngineError::Config(
                "memory.context_size must be greater than zero".to_string(),
            ));
        }
        if self.memory.per_type_limit == 0 || self.memory.per_type_limit > self.memory.context_size
        {
            return Err(EngineError::Config(format!(
                "memory.per_type_limit must be between 1 and context_size ({})",
                self.memory.context_size
            )));
        }
        if self.memory.recency_horizon_hours <= 0.0 {
            return Err(EngineError::Config(
                "memory.recency_horizon_hours must be greater than zero".to_string(),
            ));
        }
        if self.reader.seen_retain >= self.reader.seen_capacity {
            return Err(EngineError::Config(
                "reader.seen_retain must be smaller than reader.seen_capacity".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(EngineError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        self.core.workspace = expand_path(&self.core.workspace)?;
        self.core.workspace = canonicalize_or_create(&self.core.workspace)?;
        if !self.core.workspace.is_dir() {
            return Err(EngineError::Config(format!(
                "Workspace path is not a directory: {:?}",
                self.core.workspace
            )));
        }

        Ok(())
    }
}

struct EnvLookup<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> EnvLookup<'_, F> {
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, name: &str, target: &mut String) {
        if let Some(value) = self.raw(name) {
            *target = value;
        }
    }

    fn parse<T: FromStr>(&self, name: &str, target: &mut T) -> Result<(), EngineError> {
        if let Some(value) = self.raw(name) {
            *target = value.trim().parse().map_err(|_| {
                EngineError::Config(format!(
                    "Invalid value '{}' for {}{}",
                    value, ENV_PREFIX, name
                ))
            })?;
        }
        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> Result<(), EngineError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(EngineError::Config(format!(
            "{} must be between 0.0 and 1.0",
            name
        )));
    }
    Ok(())
}

fn check_positive(name: &str, value: u64) -> Result<(), EngineError> {
    if value == 0 {
        return Err(EngineError::Config(format!(
            "{} must be greater than zero",
            name
        )));
    }
    Ok(())
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

/// Canonicalize path, creating it if it doesn't exist
fn canonicalize_or_create(path: &Path) -> Result<PathBuf, EngineError> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| {
            EngineError::Config(format!("Failed to create directory {:?}: {}", path, e))
        })?;
    }

    path.canonicalize().map_err(|e| {
        EngineError::Config(format!("Failed to resolve path {:?}: {}", path, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn scratch_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.core.data_dir = dir.path().join("data");
        config.core.workspace = dir.path().join("workspace");
        config
    }

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.budget.max_loops_per_day, 4000);
        assert_eq!(config.budget.max_tokens_per_day, 8_000_000);
        assert_eq!(config.agent.think_interval_seconds, 5);
        assert_eq!(config.memory.context_size, 20);
        assert_eq!(config.memory.refresh_iterations, 10);
        assert_eq!(config.memory.refresh_hours, 1);
        assert_eq!(config.consolidation.interval_hours, 6);
        assert_eq!(config.consolidation.promotion_importance_threshold, 0.5);
        assert_eq!(config.memory.high_importance_threshold, 0.8);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.reader.poll_interval_ms, 500);
        assert_eq!(config.retry.max_attempts, 4);
    }

    #[test]
    fn test_partial_section() {
        let config: Config = toml::from_str("[budget]\nmax_loops_per_day = 10\n").unwrap();
        assert_eq!(config.budget.max_loops_per_day, 10);
        assert_eq!(config.budget.max_tokens_per_day, 8_000_000);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("KESTREL_MAX_LOOPS_PER_DAY", "12"),
            ("KESTREL_THINK_INTERVAL_SECONDS", "2"),
            ("KESTREL_PROMOTION_IMPORTANCE_THRESHOLD", "0.65"),
            ("KESTREL_LLM_MODEL", "llama3"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.budget.max_loops_per_day, 12);
        assert_eq!(config.agent.think_interval_seconds, 2);
        assert_eq!(config.consolidation.promotion_importance_threshold, 0.65);
        assert_eq!(config.llm.model, "llama3");
    }

    #[test]
    fn test_invalid_env_override() {
        let mut config = Config::default();
        let result = config.apply_env_overrides(|k| {
            (k == "KESTREL_MAX_TOKENS_PER_DAY").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_validation_rejects_bad_threshold() {
        let dir = TempDir::new().unwrap();
        let mut config = scratch_config(&dir);
        config.memory.high_importance_threshold = 1.5;
        assert!(config.validate_and_process().is_err());
    }

    #[test]
    fn test_validation_rejects_seen_window() {
        let dir = TempDir::new().unwrap();
        let mut config = scratch_config(&dir);
        config.reader.seen_retain = 1000;
        assert!(config.validate_and_process().is_err());
    }

    #[test]
    fn test_validation_creates_directories() {
        let dir = TempDir::new().unwrap();
        let mut config = scratch_config(&dir);
        config.apply_env_overrides(no_env).unwrap();
        config.validate_and_process().unwrap();

        assert!(config.core.data_dir.is_dir());
        assert!(config.core.workspace.is_dir());
        assert!(config.database_path().ends_with("kestrel.db"));
    }

    #[test]
    fn test_load_from_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let contents = format!(
            "[core]\ndata_dir = {:?}\nworkspace = {:?}\n\n[memory]\ncontext_size = 8\nper_type_limit = 3\n",
            dir.path().join("data"),
            dir.path().join("ws")
        );
        fs::write(&path, contents).unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.memory.context_size, 8);
        assert_eq!(config.memory.per_type_limit, 3);
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        assert_eq!(expand_path(&path).unwrap(), path);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(
            config.budget.max_loops_per_day,
            deserialized.budget.max_loops_per_day
        );
    }
}
