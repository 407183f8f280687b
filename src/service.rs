//! Request/response facade over the diagnostic core.
//!
//! Every operation returns a serializable payload. AI failures never fail an
//! operation; they surface as an `error` field or an omitted AI field.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ai::{with_deadline, LlmAnalyst};
use crate::aws::S3StorageAdapter;
use crate::config::Config;
use crate::diagnostic::DiagnosticEngine;
use crate::error::AdapterError;
use crate::fleet::{FleetScanSummary, FleetScanner};
use crate::remediation::{FixAction, RemediationEngine};
use crate::report::{BucketDiagnosticReport, RemediationResult};

const NO_AI_PROVIDER: &str = "AI analysis unavailable (no provider configured)";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub connected: bool,
    pub ai_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialStatus {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BucketList {
    pub count: usize,
    pub buckets: Vec<String>,
}

/// Answer of an AI-only operation: exactly one of the two fields is set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AiResponse {
    fn ok(response: String) -> Self {
        Self {
            response: Some(response),
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            response: None,
            error: Some(error.into()),
        }
    }
}

pub struct DoctorService {
    engine: DiagnosticEngine,
    remediation: RemediationEngine,
    scanner: FleetScanner,
}

impl DoctorService {
    pub fn new(engine: DiagnosticEngine, scanner: FleetScanner) -> Self {
        Self {
            remediation: RemediationEngine::new(engine.clone()),
            engine,
            scanner,
        }
    }

    /// Wire the S3 adapter and the configured AI backend together
    pub async fn from_config(config: &Config) -> Self {
        let storage = Arc::new(S3StorageAdapter::new(&config.aws).await);
        info!(region = %storage.region(), "S3 adapter ready");

        let engine = DiagnosticEngine::new(storage, config.scoring)
            .with_analyst(LlmAnalyst::from_config(&config.ai))
            .with_adapter_timeout(config.scan.adapter_timeout())
            .with_ai_timeout(config.ai.timeout());
        let scanner = FleetScanner::new(engine.clone())
            .with_max_concurrency(config.scan.max_concurrency)
            .with_average_policy(config.scan.average_policy);

        Self::new(engine, scanner)
    }

    pub async fn health(&self) -> HealthStatus {
        let ai_available = self.engine.ai_available();
        match self.list_buckets().await {
            Ok(_) => HealthStatus {
                connected: true,
                ai_available,
                error: None,
            },
            Err(e) => {
                warn!("Health check failed: {}", e);
                HealthStatus {
                    connected: false,
                    ai_available,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn credentials(&self) -> CredentialStatus {
        let call = self.engine.storage().verify_credentials();
        let result = match tokio::time::timeout(self.engine.adapter_timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout {
                operation: "GetCallerIdentity".to_string(),
            }),
        };
        match result {
            Ok(identity) => CredentialStatus {
                valid: true,
                account: Some(identity.account),
                arn: Some(identity.arn),
                error: None,
            },
            Err(e) => CredentialStatus {
                valid: false,
                account: None,
                arn: None,
                error: Some(e.to_string()),
            },
        }
    }

    pub async fn list_buckets(&self) -> Result<BucketList, AdapterError> {
        let call = self.engine.storage().list_buckets();
        let buckets = match tokio::time::timeout(self.engine.adapter_timeout(), call).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AdapterError::Timeout {
                    operation: "ListBuckets".to_string(),
                })
            }
        };
        Ok(BucketList {
            count: buckets.len(),
            buckets,
        })
    }

    pub async fn diagnose(&self, bucket: &str, with_ai: bool) -> Result<BucketDiagnosticReport, AdapterError> {
        self.engine.diagnose(bucket, with_ai).await
    }

    /// Fix actions a remediation would apply right now, without applying them
    pub async fn plan_fixes(&self, bucket: &str) -> Result<Vec<FixAction>, AdapterError> {
        let report = self.engine.diagnose(bucket, false).await?;
        Ok(self.remediation.plan(&report))
    }

    pub async fn remediate(&self, bucket: &str) -> Result<RemediationResult, AdapterError> {
        self.remediation.remediate(bucket).await
    }

    pub async fn scan_all(&self) -> Result<FleetScanSummary, AdapterError> {
        self.scanner.scan_all().await
    }

    /// Free-text troubleshooting with the bucket's live report as context
    pub async fn troubleshoot(&self, bucket: &str, issue: &str) -> AiResponse {
        let analyst = match self.engine.analyst() {
            Some(analyst) if analyst.is_available() => analyst,
            _ => return AiResponse::failed(NO_AI_PROVIDER),
        };

        let context = match self.engine.diagnose(bucket, false).await {
            Ok(report) => Some(report),
            Err(e) => {
                debug!(bucket = %bucket, "Troubleshooting without live context: {}", e);
                None
            }
        };

        match with_deadline(self.engine.ai_timeout(), analyst.chat(bucket, issue, context.as_ref())).await {
            Ok(text) => AiResponse::ok(text),
            Err(e) => {
                warn!(bucket = %bucket, "Troubleshooting failed: {}", e);
                AiResponse::failed(e.to_string())
            }
        }
    }

    /// Least-privilege bucket policy suggestion for a use case
    pub async fn recommend_policy(&self, bucket: &str, use_case: &str) -> AiResponse {
        let analyst = match self.engine.analyst() {
            Some(analyst) if analyst.is_available() => analyst,
            _ => return AiResponse::failed(NO_AI_PROVIDER),
        };
        match with_deadline(self.engine.ai_timeout(), analyst.recommend_policy(bucket, use_case)).await {
            Ok(text) => AiResponse::ok(text),
            Err(e) => AiResponse::failed(e.to_string()),
        }
    }
}
