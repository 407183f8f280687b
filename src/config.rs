use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::error::ConfigError;
use crate::fleet::AveragePolicy;
use crate::logging::LoggingConfig;
use crate::scoring::ScoringPolicy;

/// Prefix of every supported environment override
pub const ENV_PREFIX: &str = "S3_DOCTOR_";

/// Upper bound on fleet scan workers
pub const MAX_SCAN_CONCURRENCY: usize = 64;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Config file names looked up in the config directory, in order
const CONFIG_FILE_NAMES: [&str; 4] = ["config.json", "config.toml", "config.yaml", "config.yml"];

/// Main configuration structure for S3 Doctor
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// AWS configuration
    pub aws: AwsConfig,
    /// Fleet scan and adapter deadlines
    pub scan: ScanConfig,
    /// Severity weights and health thresholds
    pub scoring: ScoringPolicy,
    /// AI analysis backend
    pub ai: AiConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AwsConfig {
    /// AWS profile to use; default credential chain when unset
    pub profile: Option<String>,
    pub region: String,
    /// Per-operation timeout applied by the SDK, in seconds
    pub operation_timeout_secs: u64,
    /// Total attempts under the SDK standard retry strategy
    pub max_attempts: u32,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            profile: None,
            region: "us-east-1".to_string(),
            operation_timeout_secs: 30,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanConfig {
    /// Buckets diagnosed in parallel during a fleet scan
    pub max_concurrency: usize,
    /// Overall deadline for one snapshot fetch or fix call, in seconds
    pub adapter_timeout_secs: u64,
    pub average_policy: AveragePolicy,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            adapter_timeout_secs: 60,
            average_policy: AveragePolicy::IncludeErrors,
        }
    }
}

impl ScanConfig {
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AiConfig {
    pub enabled: bool,
    /// OpenAI-compatible chat completions URL
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
            max_tokens: 4000,
            temperature: 0.2,
        }
    }
}

impl AiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn parse_override<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => {
            let value = raw
                .trim()
                .parse::<T>()
                .with_context(|| format!("Invalid {} value: {:?}", key, raw))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
}

impl Config {
    /// Load and validate configuration, falling back to defaults
    pub async fn load(config_path: Option<&str>) -> Result<Self> {
        let config = Self::load_unvalidated(config_path).await?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration and apply environment overrides without validating
    pub async fn load_unvalidated(config_path: Option<&str>) -> Result<Self> {
        let config_file = match config_path {
            Some(path) => PathBuf::from(path),
            None => Self::default_config_path()?,
        };

        let mut config = if config_file.exists() {
            let content = fs::read_to_string(&config_file)
                .await
                .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
            Self::parse(&config_file, &content)?
        } else {
            if config_path.is_some() {
                anyhow::bail!("Config file not found: {:?}", config_file);
            }
            tracing::debug!("No config file at {:?}; using defaults", config_file);
            Self::default()
        };

        // Apply environment variable overrides
        config.apply_env_overrides()?;

        Ok(config)
    }

    fn parse(path: &Path, content: &str) -> Result<Self> {
        let config = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::from_str(content)
                .with_context(|| format!("Failed to parse TOML config: {:?}", path))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(content)
                .with_context(|| format!("Failed to parse YAML config: {:?}", path))?,
            _ => serde_json::from_str(content)
                .with_context(|| format!("Failed to parse JSON config: {:?}", path))?,
        };
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        // AWS configuration overrides
        if let Some(profile) = lookup("S3_DOCTOR_AWS_PROFILE") {
            self.aws.profile = Some(profile);
        }
        if let Some(region) = lookup("S3_DOCTOR_AWS_REGION") {
            self.aws.region = region;
        }
        if let Some(timeout) = parse_override(&lookup, "S3_DOCTOR_AWS_OPERATION_TIMEOUT")? {
            self.aws.operation_timeout_secs = timeout;
        }
        if let Some(attempts) = parse_override(&lookup, "S3_DOCTOR_AWS_MAX_ATTEMPTS")? {
            self.aws.max_attempts = attempts;
        }

        // Scan configuration overrides
        if let Some(concurrency) = parse_override(&lookup, "S3_DOCTOR_MAX_CONCURRENCY")? {
            self.scan.max_concurrency = concurrency;
        }
        if let Some(timeout) = parse_override(&lookup, "S3_DOCTOR_ADAPTER_TIMEOUT")? {
            self.scan.adapter_timeout_secs = timeout;
        }
        if let Some(policy) = lookup("S3_DOCTOR_AVERAGE_POLICY") {
            self.scan.average_policy = match policy.trim().to_lowercase().as_str() {
                "include_errors" => AveragePolicy::IncludeErrors,
                "exclude_errors" => AveragePolicy::ExcludeErrors,
                other => anyhow::bail!(
                    "Invalid S3_DOCTOR_AVERAGE_POLICY value '{}'. Must be include_errors or exclude_errors",
                    other
                ),
            };
        }

        // AI configuration overrides
        if let Some(enabled) = parse_override(&lookup, "S3_DOCTOR_AI_ENABLED")? {
            self.ai.enabled = enabled;
        }
        if let Some(endpoint) = lookup("S3_DOCTOR_AI_ENDPOINT") {
            self.ai.endpoint = endpoint;
        }
        if let Some(model) = lookup("S3_DOCTOR_AI_MODEL") {
            self.ai.model = model;
        }
        if let Some(timeout) = parse_override(&lookup, "S3_DOCTOR_AI_TIMEOUT")? {
            self.ai.timeout_secs = timeout;
        }

        // Logging configuration overrides
        if let Some(level) = lookup("S3_DOCTOR_LOG_LEVEL") {
            let level = level.to_lowercase();
            if !VALID_LOG_LEVELS.contains(&level.as_str()) {
                anyhow::bail!(
                    "Invalid S3_DOCTOR_LOG_LEVEL value. Must be one of: {}",
                    VALID_LOG_LEVELS.join(", ")
                );
            }
            self.logging.level = level;
        }
        if let Some(file_logging) = parse_override(&lookup, "S3_DOCTOR_FILE_LOGGING")? {
            self.logging.file_enabled = file_logging;
        }
        if let Some(log_dir) = lookup("S3_DOCTOR_LOG_DIR") {
            self.logging.log_dir = PathBuf::from(log_dir);
        }
        if let Some(json_format) = parse_override(&lookup, "S3_DOCTOR_JSON_LOGGING")? {
            self.logging.json_format = json_format;
        }

        Ok(())
    }

    /// Save configuration to file
    pub async fn save(&self, config_path: &Path) -> Result<()> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = match config_path.extension().and_then(|s| s.to_str()) {
            Some("toml") => toml::to_string_pretty(self)?,
            Some("yaml") | Some("yml") => serde_yaml::to_string(self)?,
            _ => serde_json::to_string_pretty(self)?,
        };

        fs::write(config_path, content)
            .await
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .context("Could not determine config directory")?;

        Ok(Self::config_file_in(&config_dir.join("s3-doctor")))
    }

    /// First existing config file in `dir`; `config.json` when there is none
    fn config_file_in(dir: &Path) -> PathBuf {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
            .unwrap_or_else(|| dir.join(CONFIG_FILE_NAMES[0]))
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.aws.operation_timeout_secs == 0 {
            return Err(invalid("aws.operation_timeout_secs", "must be greater than 0"));
        }
        if self.aws.max_attempts == 0 {
            return Err(invalid("aws.max_attempts", "must be greater than 0"));
        }

        if self.scan.max_concurrency == 0 || self.scan.max_concurrency > MAX_SCAN_CONCURRENCY {
            return Err(invalid(
                "scan.max_concurrency",
                format!("must be between 1 and {} (got {})", MAX_SCAN_CONCURRENCY, self.scan.max_concurrency),
            ));
        }
        if self.scan.adapter_timeout_secs == 0 {
            return Err(invalid("scan.adapter_timeout_secs", "must be greater than 0"));
        }
        if self.scan.adapter_timeout_secs < self.aws.operation_timeout_secs {
            tracing::warn!(
                "scan.adapter_timeout_secs ({}s) is shorter than aws.operation_timeout_secs ({}s)",
                self.scan.adapter_timeout_secs,
                self.aws.operation_timeout_secs
            );
        }

        self.scoring.validate().map_err(|reason| invalid("scoring", reason))?;

        if self.ai.timeout_secs == 0 {
            return Err(invalid("ai.timeout_secs", "must be greater than 0"));
        }
        if !(0.0..=2.0).contains(&self.ai.temperature) {
            return Err(invalid("ai.temperature", "must be between 0.0 and 2.0"));
        }
        if self.ai.enabled && self.ai.endpoint.trim().is_empty() {
            return Err(invalid("ai.endpoint", "must be set when AI is enabled"));
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(invalid(
                "logging.level",
                format!("'{}' is not one of: {}", self.logging.level, VALID_LOG_LEVELS.join(", ")),
            ));
        }

        Ok(())
    }

    /// Print configuration summary for debugging
    pub fn print_summary(&self) {
        tracing::info!("Configuration Summary:");
        tracing::info!("  AWS Region: {}", self.aws.region);
        tracing::info!("  AWS Profile: {:?}", self.aws.profile);
        tracing::info!("  Scan Concurrency: {}", self.scan.max_concurrency);
        tracing::info!("  Adapter Timeout: {}s", self.scan.adapter_timeout_secs);
        tracing::info!("  AI Enabled: {} ({})", self.ai.enabled, self.ai.model);
        tracing::info!("  Log Level: {}", self.logging.level);
    }

    /// Get list of all supported environment variables
    pub fn get_env_variables_help() -> Vec<(&'static str, &'static str)> {
        vec![
            ("S3_DOCTOR_AWS_PROFILE", "AWS profile to use"),
            ("S3_DOCTOR_AWS_REGION", "AWS region for the S3 client"),
            ("S3_DOCTOR_AWS_OPERATION_TIMEOUT", "SDK operation timeout in seconds"),
            ("S3_DOCTOR_AWS_MAX_ATTEMPTS", "SDK retry attempts (standard strategy)"),
            ("S3_DOCTOR_MAX_CONCURRENCY", "Buckets scanned in parallel (1-64)"),
            ("S3_DOCTOR_ADAPTER_TIMEOUT", "Deadline per snapshot fetch or fix in seconds"),
            ("S3_DOCTOR_AVERAGE_POLICY", "Fleet average policy (include_errors/exclude_errors)"),
            ("S3_DOCTOR_AI_ENABLED", "Enable AI analysis (true/false)"),
            ("S3_DOCTOR_AI_ENDPOINT", "OpenAI-compatible chat completions URL"),
            ("S3_DOCTOR_AI_MODEL", "Model identifier"),
            ("S3_DOCTOR_AI_TIMEOUT", "AI request timeout in seconds"),
            ("S3_DOCTOR_LOG_LEVEL", "Log level (trace/debug/info/warn/error)"),
            ("S3_DOCTOR_FILE_LOGGING", "Enable file logging (true/false)"),
            ("S3_DOCTOR_LOG_DIR", "Directory for log files"),
            ("S3_DOCTOR_JSON_LOGGING", "Enable JSON log format (true/false)"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scan.max_concurrency, 10);
        assert_eq!(config.aws.region, "us-east-1");
        assert_eq!(config.scan.average_policy, AveragePolicy::IncludeErrors);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides_from(lookup_from(&[
                ("S3_DOCTOR_AWS_PROFILE", "audit"),
                ("S3_DOCTOR_MAX_CONCURRENCY", "4"),
                ("S3_DOCTOR_AI_ENABLED", "false"),
                ("S3_DOCTOR_LOG_LEVEL", "DEBUG"),
                ("S3_DOCTOR_AVERAGE_POLICY", "exclude_errors"),
            ]))
            .unwrap();
        assert_eq!(config.aws.profile.as_deref(), Some("audit"));
        assert_eq!(config.scan.max_concurrency, 4);
        assert!(!config.ai.enabled);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.scan.average_policy, AveragePolicy::ExcludeErrors);
    }

    #[test]
    fn test_invalid_env_override_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_overrides_from(lookup_from(&[("S3_DOCTOR_MAX_CONCURRENCY", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("S3_DOCTOR_MAX_CONCURRENCY"));

        let mut config = Config::default();
        assert!(config
            .apply_overrides_from(lookup_from(&[("S3_DOCTOR_LOG_LEVEL", "loud")]))
            .is_err());
    }

    #[test]
    fn test_validation_rejects_out_of_range_concurrency() {
        let mut config = Config::default();
        config.scan.max_concurrency = 0;
        assert!(config.validate().is_err());
        config.scan.max_concurrency = MAX_SCAN_CONCURRENCY + 1;
        assert!(config.validate().is_err());
        config.scan.max_concurrency = MAX_SCAN_CONCURRENCY;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_thresholds() {
        let mut config = Config::default();
        config.scoring.thresholds.good = 95;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_error_names_the_field() {
        let mut config = Config::default();
        config.ai.timeout_secs = 0;
        match config.validate() {
            Err(ConfigError::InvalidValue { field, reason }) => {
                assert_eq!(field, "ai.timeout_secs");
                assert!(reason.contains("greater than 0"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_config_file_lookup_prefers_json_then_toml() {
        let dir = TempDir::new().unwrap();
        assert_eq!(Config::config_file_in(dir.path()), dir.path().join("config.json"));

        std::fs::write(dir.path().join("config.toml"), "").unwrap();
        assert_eq!(Config::config_file_in(dir.path()), dir.path().join("config.toml"));

        std::fs::write(dir.path().join("config.json"), "{}").unwrap();
        assert_eq!(Config::config_file_in(dir.path()), dir.path().join("config.json"));
    }

    #[tokio::test]
    async fn test_invalid_file_loads_unvalidated_but_fails_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scan]\nmax_concurrency = 0\n").unwrap();
        let path = path.to_str().unwrap();

        let config = Config::load_unvalidated(Some(path)).await.unwrap();
        assert_eq!(config.scan.max_concurrency, 0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "scan.max_concurrency"
        ));

        let err = Config::load(Some(path)).await.unwrap_err();
        assert!(err.to_string().contains("scan.max_concurrency"), "{}", err);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config = Config::parse(Path::new("c.json"), r#"{"scan": {"max_concurrency": 3}}"#).unwrap();
        assert_eq!(config.scan.max_concurrency, 3);
        assert_eq!(config.scan.adapter_timeout_secs, 60);
        assert_eq!(config.scoring, ScoringPolicy::default());

        let config = Config::parse(Path::new("c.yaml"), "aws:\n  region: eu-west-1\n").unwrap();
        assert_eq!(config.aws.region, "eu-west-1");
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.aws.region = "ap-northeast-1".to_string();
        config.scan.max_concurrency = 7;
        config.save(&path).await.unwrap();

        let loaded = Config::load(Some(path.to_str().unwrap())).await.unwrap();
        assert_eq!(loaded.aws.region, config.aws.region);
        assert_eq!(loaded.scan.max_concurrency, 7);
    }

    #[tokio::test]
    async fn test_explicit_missing_path_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.json");
        assert!(Config::load(Some(path.to_str().unwrap())).await.is_err());
    }

    #[test]
    fn test_env_help_uses_prefix() {
        for (name, _) in Config::get_env_variables_help() {
            assert!(name.starts_with(ENV_PREFIX), "{}", name);
        }
    }
}
