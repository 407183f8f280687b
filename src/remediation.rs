use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::ai::with_deadline;
use crate::checks::CheckKind;
use crate::diagnostic::DiagnosticEngine;
use crate::error::{AdapterError, DoctorError};
use crate::logging::{PerformanceLogEntry, StructuredLogger};
use crate::report::{BucketDiagnosticReport, CheckStatus, FixOutcome, RemediationResult};

/// Types of fix actions that can be performed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FixActionType {
    EnableEncryption,
    EnableVersioning,
    BlockPublicAccess,
}

impl FixActionType {
    /// Fix action for a check; `None` for detection-only checks
    pub fn for_check(kind: CheckKind) -> Option<FixActionType> {
        match kind {
            CheckKind::Encryption => Some(FixActionType::EnableEncryption),
            CheckKind::Versioning => Some(FixActionType::EnableVersioning),
            CheckKind::PublicAccessBlock => Some(FixActionType::BlockPublicAccess),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FixActionType::EnableEncryption => "Enable default AES-256 server-side encryption",
            FixActionType::EnableVersioning => "Enable object versioning",
            FixActionType::BlockPublicAccess => "Enable all four Public Access Block settings",
        }
    }

    fn success_message(&self) -> &'static str {
        match self {
            FixActionType::EnableEncryption => "AES-256 encryption enabled",
            FixActionType::EnableVersioning => "Versioning enabled",
            FixActionType::BlockPublicAccess => "All public access blocked",
        }
    }

    /// Equivalent AWS CLI command, shown in dry-run plans
    fn cli_command(&self, bucket: &str) -> String {
        match self {
            FixActionType::EnableEncryption => format!(
                "aws s3api put-bucket-encryption --bucket {} --server-side-encryption-configuration '{{\"Rules\":[{{\"ApplyServerSideEncryptionByDefault\":{{\"SSEAlgorithm\":\"AES256\"}},\"BucketKeyEnabled\":true}}]}}'",
                bucket
            ),
            FixActionType::EnableVersioning => format!(
                "aws s3api put-bucket-versioning --bucket {} --versioning-configuration Status=Enabled",
                bucket
            ),
            FixActionType::BlockPublicAccess => format!(
                "aws s3api put-public-access-block --bucket {} --public-access-block-configuration BlockPublicAcls=true,IgnorePublicAcls=true,BlockPublicPolicy=true,RestrictPublicBuckets=true",
                bucket
            ),
        }
    }
}

/// A fix action planned for one failing check
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixAction {
    pub action_type: FixActionType,
    pub check_name: String,
    pub target_bucket: String,
    pub description: String,
    pub command: String,
}

impl FixAction {
    pub fn new(action_type: FixActionType, check: CheckKind, target_bucket: &str) -> Self {
        Self {
            action_type,
            check_name: check.name().to_string(),
            target_bucket: target_bucket.to_string(),
            description: action_type.description().to_string(),
            command: action_type.cli_command(target_bucket),
        }
    }
}

/// 自動修復オーケストレーター
#[derive(Clone)]
pub struct RemediationEngine {
    engine: DiagnosticEngine,
}

impl RemediationEngine {
    pub fn new(engine: DiagnosticEngine) -> Self {
        Self { engine }
    }

    /// Fix actions that would be applied for a report, in report order.
    ///
    /// Only FAIL results of fixable checks are planned; WARN results and
    /// detection-only checks are skipped.
    pub fn plan(&self, report: &BucketDiagnosticReport) -> Vec<FixAction> {
        report
            .results
            .iter()
            .filter(|r| r.status == CheckStatus::Fail)
            .filter_map(|r| {
                let kind = CheckKind::from_name(&r.check_name)?;
                let action_type = FixActionType::for_check(kind)?;
                Some(FixAction::new(action_type, kind, &report.bucket_name))
            })
            .collect()
    }

    /// 修復を実行し、前後の比較を返す
    pub async fn remediate(&self, bucket: &str) -> Result<RemediationResult, AdapterError> {
        let started = Instant::now();
        info!(bucket = %bucket, "Starting remediation");

        let before = self.engine.diagnose(bucket, false).await?;
        let actions = self.plan(&before);
        debug!(bucket = %bucket, planned = actions.len(), "Fix actions planned");

        let mut fixes_applied = Vec::with_capacity(actions.len());
        for action in &actions {
            fixes_applied.push(self.execute(action).await);
        }

        // Fixes are already written; a failed re-read must not hide them
        let after = match self.engine.diagnose(bucket, true).await {
            Ok(after) => after,
            Err(e) => {
                error!(bucket = %bucket, "Post-fix diagnosis failed: {}", e);
                StructuredLogger::log_bucket_error(&DoctorError::from(e.clone()), "remediation", "verify", bucket);
                return Ok(RemediationResult {
                    bucket_name: bucket.to_string(),
                    before_score: before.score,
                    after_score: before.score,
                    improvement: 0,
                    fixes_applied,
                    report: before,
                    ai_recommendations: None,
                    ai_error: None,
                    verification_error: Some(e.to_string()),
                });
            }
        };
        let improvement = i32::from(after.score) - i32::from(before.score);
        if improvement < 0 {
            warn!(
                bucket = %bucket,
                before = before.score,
                after = after.score,
                "Score decreased after remediation"
            );
        }

        let (ai_recommendations, ai_error) = self.recommendations(&before, &after).await;

        let succeeded = fixes_applied.iter().filter(|f| f.success).count();
        StructuredLogger::log_performance(
            &PerformanceLogEntry::new("remediate", "remediation", started.elapsed(), true)
                .with_bucket(bucket)
                .with_metric("fixes_attempted", fixes_applied.len() as f64)
                .with_metric("fixes_succeeded", succeeded as f64)
                .with_metric("improvement", improvement as f64),
        );

        Ok(RemediationResult {
            bucket_name: bucket.to_string(),
            before_score: before.score,
            after_score: after.score,
            improvement,
            fixes_applied,
            report: after,
            ai_recommendations,
            ai_error,
            verification_error: None,
        })
    }

    /// Apply one fix; failures are recorded, never propagated
    async fn execute(&self, action: &FixAction) -> FixOutcome {
        let storage = self.engine.storage();
        let bucket = action.target_bucket.as_str();
        let call = async {
            match action.action_type {
                FixActionType::EnableEncryption => storage.enable_encryption(bucket).await,
                FixActionType::EnableVersioning => storage.enable_versioning(bucket).await,
                FixActionType::BlockPublicAccess => storage.block_public_access(bucket).await,
            }
        };

        let result = match tokio::time::timeout(self.engine.adapter_timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout {
                operation: format!("{:?} on {}", action.action_type, bucket),
            }),
        };

        match result {
            Ok(()) => {
                info!(bucket = %bucket, check = %action.check_name, "✓ {}", action.action_type.success_message());
                FixOutcome::success(&action.check_name, action.action_type.success_message())
            }
            Err(e) => {
                error!(bucket = %bucket, check = %action.check_name, "✗ Fix failed: {}", e);
                StructuredLogger::log_bucket_error(&DoctorError::from(e.clone()), "remediation", "execute_fix", bucket);
                FixOutcome::failure(&action.check_name, e.to_string())
            }
        }
    }

    /// AI advice for issues that remain after remediation
    async fn recommendations(
        &self,
        before: &BucketDiagnosticReport,
        after: &BucketDiagnosticReport,
    ) -> (Option<String>, Option<String>) {
        let analyst = match self.engine.analyst() {
            Some(analyst) if analyst.is_available() => analyst,
            _ => return (None, None),
        };
        if after.findings().next().is_none() {
            return (None, None);
        }

        match with_deadline(self.engine.ai_timeout(), analyst.recommend_after_fix(before, after)).await {
            Ok(text) => (Some(text), None),
            Err(e) => {
                warn!(bucket = %after.bucket_name, error = %e, "AI recommendations unavailable");
                (None, Some(e.to_string()))
            }
        }
    }
}
