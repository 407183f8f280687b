use thiserror::Error;

/// Main error type for S3 Doctor
#[derive(Error, Debug, Clone)]
pub enum DoctorError {
    #[error("Configuration error: {0}")]
    Config(ConfigError),

    #[error("Storage backend error: {0}")]
    Adapter(AdapterError),

    #[error("AI error: {0}")]
    Ai(AiError),

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("TOML error: {0}")]
    Toml(String),

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error("Anyhow error: {0}")]
    Anyhow(String),
}

/// Configuration-related errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Errors raised at the storage control-plane boundary.
///
/// Retries for throttling happen inside the adapter; by the time one of
/// these reaches the core it is terminal for the call that produced it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    #[error("Bucket not found: {bucket}")]
    BucketNotFound { bucket: String },

    #[error("Access denied to bucket {bucket} during {operation}")]
    AccessDenied { bucket: String, operation: String },

    #[error("Request throttled during {operation}")]
    Throttled { operation: String },

    #[error("Network failure during {operation}: {message}")]
    Network { operation: String, message: String },

    #[error("Timeout: {operation}")]
    Timeout { operation: String },

    #[error("Invalid or missing credentials: {message}")]
    Credentials { message: String },

    #[error("Storage backend unreachable: {message}")]
    Unreachable { message: String },

    /// The bucket lives outside the client's region and its home region could not be resolved
    #[error("Bucket {bucket} is not in the configured region ({})", .region.as_deref().unwrap_or("home region unknown"))]
    WrongRegion { bucket: String, region: Option<String> },

    #[error("{operation} failed: {message}")]
    Service { operation: String, message: String },
}

/// Errors from the text-generation backend. Never fatal to a parent operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AiError {
    #[error("AI backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("AI request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("AI provider error: {message}")]
    Provider { message: String },

    #[error("AI provider returned an unusable response: {message}")]
    InvalidResponse { message: String },
}

impl From<ConfigError> for DoctorError {
    fn from(err: ConfigError) -> Self {
        DoctorError::Config(err)
    }
}

impl From<AdapterError> for DoctorError {
    fn from(err: AdapterError) -> Self {
        DoctorError::Adapter(err)
    }
}

impl From<AiError> for DoctorError {
    fn from(err: AiError) -> Self {
        DoctorError::Ai(err)
    }
}

impl From<std::io::Error> for DoctorError {
    fn from(err: std::io::Error) -> Self {
        DoctorError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DoctorError {
    fn from(err: serde_json::Error) -> Self {
        DoctorError::Json(err.to_string())
    }
}

impl From<toml::de::Error> for DoctorError {
    fn from(err: toml::de::Error) -> Self {
        DoctorError::Toml(err.to_string())
    }
}

impl From<serde_yaml::Error> for DoctorError {
    fn from(err: serde_yaml::Error) -> Self {
        DoctorError::Yaml(err.to_string())
    }
}

impl From<anyhow::Error> for DoctorError {
    fn from(err: anyhow::Error) -> Self {
        DoctorError::Anyhow(err.to_string())
    }
}

impl AdapterError {
    /// True when no adapter call can succeed until connectivity or credentials are fixed.
    pub fn is_backend_unreachable(&self) -> bool {
        matches!(
            self,
            AdapterError::Unreachable { .. } | AdapterError::Credentials { .. }
        )
    }
}

impl DoctorError {
    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            DoctorError::Adapter(AdapterError::Throttled { .. }) => true,
            DoctorError::Adapter(AdapterError::Timeout { .. }) => true,
            DoctorError::Adapter(AdapterError::Network { .. }) => true,
            DoctorError::Ai(_) => true,
            DoctorError::Io(_) => true,
            _ => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            DoctorError::Config(_) => ErrorSeverity::High,
            DoctorError::Adapter(e) if e.is_backend_unreachable() => ErrorSeverity::Critical,
            DoctorError::Adapter(AdapterError::AccessDenied { .. }) => ErrorSeverity::High,
            DoctorError::Adapter(_) => ErrorSeverity::Medium,
            DoctorError::Ai(_) => ErrorSeverity::Low,
            _ => ErrorSeverity::Medium,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            DoctorError::Adapter(AdapterError::Credentials { .. }) => {
                "AWS credentials are missing or invalid. Run `aws sts get-caller-identity` to verify them.".to_string()
            }
            DoctorError::Adapter(AdapterError::Unreachable { .. }) => {
                "The S3 control plane is unreachable. Check network connectivity and the configured region.".to_string()
            }
            DoctorError::Adapter(AdapterError::BucketNotFound { bucket }) => {
                format!("Bucket '{}' does not exist. Bucket names are case-sensitive and globally unique.", bucket)
            }
            DoctorError::Adapter(AdapterError::AccessDenied { bucket, .. }) => {
                format!(
                    "Access to bucket '{}' was denied. Ensure your principal has s3:ListBucket and s3:GetBucket* permissions.",
                    bucket
                )
            }
            DoctorError::Adapter(AdapterError::WrongRegion { bucket, region }) => match region {
                Some(region) => format!("Bucket '{}' lives in {}. Retry with `--region {}`.", bucket, region, region),
                None => format!(
                    "Bucket '{}' lives in another region that could not be determined. Retry with `--region <bucket region>`.",
                    bucket
                ),
            },
            DoctorError::Ai(_) => "AI analysis is unavailable; results are shown without it.".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Low => "LOW",
            ErrorSeverity::Medium => "MEDIUM",
            ErrorSeverity::High => "HIGH",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_is_critical() {
        let err = DoctorError::from(AdapterError::Unreachable {
            message: "dispatch failure".to_string(),
        });
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert!(!err.is_recoverable());
        assert!(err.user_message().contains("unreachable"));
    }

    #[test]
    fn test_throttling_is_recoverable() {
        let err = DoctorError::from(AdapterError::Throttled {
            operation: "GetBucketAcl".to_string(),
        });
        assert!(err.is_recoverable());
        assert_eq!(err.severity(), ErrorSeverity::Medium);
    }

    #[test]
    fn test_not_found_user_message_names_bucket() {
        let err = DoctorError::from(AdapterError::BucketNotFound {
            bucket: "missing-bucket".to_string(),
        });
        assert!(err.user_message().contains("missing-bucket"));
    }

    #[test]
    fn test_config_error_is_high_severity() {
        let err = DoctorError::from(ConfigError::InvalidValue {
            field: "scan.max_concurrency".to_string(),
            reason: "must be between 1 and 64 (got 0)".to_string(),
        });
        assert_eq!(err.severity(), ErrorSeverity::High);
        assert!(err.user_message().contains("scan.max_concurrency"));
    }

    #[test]
    fn test_wrong_region_message_suggests_region_flag() {
        let err = DoctorError::from(AdapterError::WrongRegion {
            bucket: "far-bucket".to_string(),
            region: Some("ap-southeast-2".to_string()),
        });
        assert!(err.user_message().contains("--region ap-southeast-2"));
        assert!(!err.is_recoverable());

        let unknown = AdapterError::WrongRegion {
            bucket: "far-bucket".to_string(),
            region: None,
        };
        assert!(unknown.to_string().contains("home region unknown"));
    }

    #[test]
    fn test_backend_unreachable_classification() {
        assert!(AdapterError::Credentials { message: "expired".to_string() }.is_backend_unreachable());
        assert!(!AdapterError::Timeout { operation: "x".to_string() }.is_backend_unreachable());
    }
}
