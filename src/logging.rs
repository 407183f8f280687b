use crate::error::{DoctorError, ErrorSeverity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable console logging (always written to stderr)
    pub console_enabled: bool,
    /// Enable file logging
    pub file_enabled: bool,
    /// Log file directory
    pub log_dir: PathBuf,
    /// Log file name prefix
    pub file_prefix: String,
    /// Log rotation (daily, hourly, never)
    pub rotation: String,
    /// Enable structured JSON logging
    pub json_format: bool,
    /// Enable performance tracing
    pub performance_tracing: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let log_dir = dirs::data_dir()
            .map(|d| d.join("s3-doctor").join("logs"))
            .unwrap_or_else(|| PathBuf::from("logs"));
        Self {
            level: "info".to_string(),
            console_enabled: true,
            file_enabled: false,
            log_dir,
            file_prefix: "s3-doctor".to_string(),
            rotation: "daily".to_string(),
            json_format: false,
            performance_tracing: false,
        }
    }
}

/// Initialize logging system.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    let span_events = || {
        if config.performance_tracing {
            FmtSpan::ENTER | FmtSpan::EXIT
        } else {
            FmtSpan::NONE
        }
    };

    let mut layers = Vec::new();
    let mut guard = None;

    // Console layer
    if config.console_enabled {
        let console_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_span_events(span_events())
            .with_filter(env_filter.clone());

        layers.push(console_layer.boxed());
    }

    // File layer
    if config.file_enabled {
        std::fs::create_dir_all(&config.log_dir)?;

        let file_appender = match config.rotation.as_str() {
            "daily" => rolling::daily(&config.log_dir, &config.file_prefix),
            "hourly" => rolling::hourly(&config.log_dir, &config.file_prefix),
            _ => rolling::never(&config.log_dir, format!("{}.log", config.file_prefix)),
        };

        let (writer, file_guard) = non_blocking(file_appender);
        guard = Some(file_guard);

        let file_layer = if config.json_format {
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_span_events(span_events())
                .with_filter(env_filter.clone())
                .boxed()
        } else {
            fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_span_events(span_events())
                .with_filter(env_filter.clone())
                .boxed()
        };

        layers.push(file_layer);
    }

    tracing_subscriber::registry().with(layers).try_init()?;

    Ok(guard)
}

/// Structured log entry for errors
#[derive(Debug, Serialize)]
pub struct ErrorLogEntry {
    pub timestamp: SystemTime,
    pub level: String,
    pub error_type: String,
    pub error_message: String,
    pub user_message: String,
    pub severity: String,
    pub component: String,
    pub operation: String,
    pub bucket: Option<String>,
    pub recoverable: bool,
}

impl ErrorLogEntry {
    pub fn from_error(error: &DoctorError, component: &str, operation: &str) -> Self {
        Self {
            timestamp: SystemTime::now(),
            level: match error.severity() {
                ErrorSeverity::Low => "WARN".to_string(),
                ErrorSeverity::Medium | ErrorSeverity::High => "ERROR".to_string(),
                ErrorSeverity::Critical => "CRITICAL".to_string(),
            },
            error_type: error_type_name(error).to_string(),
            error_message: error.to_string(),
            user_message: error.user_message(),
            severity: error.severity().as_str().to_string(),
            component: component.to_string(),
            operation: operation.to_string(),
            bucket: None,
            recoverable: error.is_recoverable(),
        }
    }

    pub fn with_bucket(mut self, bucket: &str) -> Self {
        self.bucket = Some(bucket.to_string());
        self
    }
}

fn error_type_name(error: &DoctorError) -> &'static str {
    match error {
        DoctorError::Config(_) => "config",
        DoctorError::Adapter(_) => "adapter",
        DoctorError::Ai(_) => "ai",
        DoctorError::Io(_) => "io",
        DoctorError::Json(_) => "json",
        DoctorError::Toml(_) => "toml",
        DoctorError::Yaml(_) => "yaml",
        DoctorError::Anyhow(_) => "other",
    }
}

/// Performance metrics for logging
#[derive(Debug, Serialize)]
pub struct PerformanceLogEntry {
    pub timestamp: SystemTime,
    pub operation: String,
    pub component: String,
    pub duration_ms: u64,
    pub success: bool,
    pub bucket: Option<String>,
    pub metrics: HashMap<String, f64>,
}

impl PerformanceLogEntry {
    pub fn new(operation: &str, component: &str, duration: Duration, success: bool) -> Self {
        Self {
            timestamp: SystemTime::now(),
            operation: operation.to_string(),
            component: component.to_string(),
            duration_ms: duration.as_millis() as u64,
            success,
            bucket: None,
            metrics: HashMap::new(),
        }
    }

    pub fn with_bucket(mut self, bucket: &str) -> Self {
        self.bucket = Some(bucket.to_string());
        self
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }
}

/// Logger utility for structured logging
pub struct StructuredLogger;

impl StructuredLogger {
    /// Log error with full context
    pub fn log_error(error: &DoctorError, component: &str, operation: &str) {
        Self::log_entry(&ErrorLogEntry::from_error(error, component, operation), error.severity());
    }

    pub fn log_bucket_error(error: &DoctorError, component: &str, operation: &str, bucket: &str) {
        Self::log_entry(
            &ErrorLogEntry::from_error(error, component, operation).with_bucket(bucket),
            error.severity(),
        );
    }

    fn log_entry(entry: &ErrorLogEntry, severity: ErrorSeverity) {
        match severity {
            ErrorSeverity::Low => {
                tracing::warn!(
                    error_type = %entry.error_type,
                    component = %entry.component,
                    operation = %entry.operation,
                    bucket = ?entry.bucket,
                    recoverable = %entry.recoverable,
                    "{}",
                    entry.error_message
                );
            }
            ErrorSeverity::Medium => {
                tracing::error!(
                    error_type = %entry.error_type,
                    component = %entry.component,
                    operation = %entry.operation,
                    bucket = ?entry.bucket,
                    recoverable = %entry.recoverable,
                    "{}",
                    entry.error_message
                );
            }
            ErrorSeverity::High | ErrorSeverity::Critical => {
                tracing::error!(
                    error_type = %entry.error_type,
                    component = %entry.component,
                    operation = %entry.operation,
                    bucket = ?entry.bucket,
                    recoverable = %entry.recoverable,
                    severity = %entry.severity,
                    user_message = %entry.user_message,
                    "CRITICAL ERROR: {}",
                    entry.error_message
                );
            }
        }
    }

    /// Log performance metrics
    pub fn log_performance(entry: &PerformanceLogEntry) {
        tracing::info!(
            operation = %entry.operation,
            component = %entry.component,
            duration_ms = %entry.duration_ms,
            success = %entry.success,
            bucket = ?entry.bucket,
            metrics = ?entry.metrics,
            "Performance: {} completed in {}ms",
            entry.operation,
            entry.duration_ms
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AdapterError, AiError};

    #[test]
    fn test_error_log_entry_creation() {
        let error = DoctorError::from(AdapterError::Throttled {
            operation: "GetBucketAcl".to_string(),
        });
        let entry = ErrorLogEntry::from_error(&error, "diagnostic", "fetch_snapshot").with_bucket("logs");

        assert_eq!(entry.component, "diagnostic");
        assert_eq!(entry.operation, "fetch_snapshot");
        assert_eq!(entry.error_type, "adapter");
        assert_eq!(entry.bucket.as_deref(), Some("logs"));
        assert!(entry.recoverable);
        assert_eq!(entry.level, "ERROR");
    }

    #[test]
    fn test_ai_errors_log_as_warnings() {
        let error = DoctorError::from(AiError::Timeout { seconds: 30 });
        let entry = ErrorLogEntry::from_error(&error, "diagnostic", "analyze");
        assert_eq!(entry.level, "WARN");
        assert_eq!(entry.severity, "LOW");
    }

    #[test]
    fn test_performance_log_entry() {
        let entry = PerformanceLogEntry::new("diagnose", "diagnostic", Duration::from_millis(1500), true)
            .with_bucket("assets")
            .with_metric("score", 84.0);

        assert_eq!(entry.duration_ms, 1500);
        assert!(entry.success);
        assert_eq!(entry.metrics.get("score"), Some(&84.0));
        StructuredLogger::log_performance(&entry);
    }

    #[test]
    fn test_default_config_does_not_write_files() {
        let config = LoggingConfig::default();
        assert!(!config.file_enabled);
        assert_eq!(config.level, "info");
    }
}
