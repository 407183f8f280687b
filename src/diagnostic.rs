use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::ai::{with_deadline, AiAnalyst};
use crate::checks;
use crate::error::{AdapterError, DoctorError};
use crate::logging::{PerformanceLogEntry, StructuredLogger};
use crate::report::BucketDiagnosticReport;
use crate::scoring::ScoringPolicy;
use crate::snapshot::BucketConfigSnapshot;
use crate::storage::StorageAdapter;

/// Default overall deadline for one snapshot fetch or fix call
pub const DEFAULT_ADAPTER_TIMEOUT: Duration = Duration::from_secs(60);

/// Default deadline for one AI request
pub const DEFAULT_AI_TIMEOUT: Duration = Duration::from_secs(30);

/// 診断オーケストレーター
///
/// Cheap to clone; clones share the adapter and analyst. Each call to
/// [`DiagnosticEngine::diagnose`] is self-contained and shares no mutable
/// state with any other diagnosis.
#[derive(Clone)]
pub struct DiagnosticEngine {
    storage: Arc<dyn StorageAdapter>,
    analyst: Option<Arc<dyn AiAnalyst>>,
    policy: ScoringPolicy,
    adapter_timeout: Duration,
    ai_timeout: Duration,
}

impl DiagnosticEngine {
    pub fn new(storage: Arc<dyn StorageAdapter>, policy: ScoringPolicy) -> Self {
        Self {
            storage,
            analyst: None,
            policy,
            adapter_timeout: DEFAULT_ADAPTER_TIMEOUT,
            ai_timeout: DEFAULT_AI_TIMEOUT,
        }
    }

    pub fn with_analyst(mut self, analyst: Option<Arc<dyn AiAnalyst>>) -> Self {
        self.analyst = analyst;
        self
    }

    pub fn with_adapter_timeout(mut self, timeout: Duration) -> Self {
        self.adapter_timeout = timeout;
        self
    }

    pub fn with_ai_timeout(mut self, timeout: Duration) -> Self {
        self.ai_timeout = timeout;
        self
    }

    pub fn storage(&self) -> &Arc<dyn StorageAdapter> {
        &self.storage
    }

    pub fn analyst(&self) -> Option<&Arc<dyn AiAnalyst>> {
        self.analyst.as_ref()
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    pub fn adapter_timeout(&self) -> Duration {
        self.adapter_timeout
    }

    pub fn ai_timeout(&self) -> Duration {
        self.ai_timeout
    }

    pub fn ai_available(&self) -> bool {
        self.analyst.as_ref().map(|a| a.is_available()).unwrap_or(false)
    }

    /// Fetch a snapshot under the adapter deadline
    pub async fn fetch_snapshot(&self, bucket: &str) -> Result<BucketConfigSnapshot, AdapterError> {
        match tokio::time::timeout(self.adapter_timeout, self.storage.fetch_snapshot(bucket)).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout {
                operation: format!("fetch configuration of {}", bucket),
            }),
        }
    }

    /// Run every check and score the results; no I/O
    pub fn evaluate(&self, snapshot: &BucketConfigSnapshot, scan_start: DateTime<Utc>) -> BucketDiagnosticReport {
        let results = checks::run_all(snapshot);
        BucketDiagnosticReport::new(
            &snapshot.bucket_name,
            snapshot.region.present().cloned(),
            scan_start,
            results,
            &self.policy,
        )
    }

    /// バケットを診断
    pub async fn diagnose(&self, bucket: &str, with_ai: bool) -> Result<BucketDiagnosticReport, AdapterError> {
        let scan_start = Utc::now();
        let started = Instant::now();
        info!(bucket = %bucket, with_ai, "Starting bucket diagnosis");

        let snapshot = match self.fetch_snapshot(bucket).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                StructuredLogger::log_bucket_error(&DoctorError::from(e.clone()), "diagnostic", "fetch_snapshot", bucket);
                return Err(e);
            }
        };

        let mut report = self.evaluate(&snapshot, scan_start);
        debug!(
            bucket = %bucket,
            score = report.score,
            health = %report.overall_health,
            "Checks evaluated"
        );

        if with_ai {
            report = self.attach_analysis(report).await;
        }

        StructuredLogger::log_performance(
            &PerformanceLogEntry::new("diagnose", "diagnostic", started.elapsed(), true)
                .with_bucket(bucket)
                .with_metric("score", report.score as f64)
                .with_metric("findings", report.findings().count() as f64),
        );

        Ok(report)
    }

    /// Attach AI output; failures degrade to an `ai_error` marker
    async fn attach_analysis(&self, report: BucketDiagnosticReport) -> BucketDiagnosticReport {
        let analyst = match &self.analyst {
            Some(analyst) if analyst.is_available() => analyst,
            _ => return report.with_ai_error("AI analysis unavailable (no provider configured)".to_string()),
        };

        match with_deadline(self.ai_timeout, analyst.analyze(&report)).await {
            Ok(analysis) => {
                let summary = Some(analysis.summary).filter(|s| !s.is_empty());
                report.with_ai_analysis(analysis.analysis, summary)
            }
            Err(e) => {
                warn!(bucket = %report.bucket_name, error = %e, "AI analysis failed; returning report without it");
                report.with_ai_error(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::fake::{analyst, Script};
    use crate::checks::CheckKind;
    use crate::report::CheckStatus;
    use crate::scoring::HealthLabel;
    use crate::snapshot::{EncryptionSettings, Facet};
    use crate::storage::mock::InMemoryStorage;

    fn engine_with(storage: InMemoryStorage) -> DiagnosticEngine {
        DiagnosticEngine::new(Arc::new(storage), ScoringPolicy::default())
    }

    #[tokio::test]
    async fn test_diagnose_unconfigured_bucket() {
        let engine = engine_with(InMemoryStorage::new().with_bucket(BucketConfigSnapshot::new("fresh")));
        let report = engine.diagnose("fresh", false).await.unwrap();

        assert_eq!(report.results.len(), CheckKind::ALL.len());
        // Encryption -15, PAB -25, Versioning -8, four LOW warnings -1 each
        assert_eq!(report.score, 48);
        assert_eq!(report.overall_health, HealthLabel::Critical);
        assert!(report.ai_analysis.is_none());
        assert!(report.ai_error.is_none());
    }

    #[tokio::test]
    async fn test_missing_bucket_is_surfaced() {
        let engine = engine_with(InMemoryStorage::new());
        let err = engine.diagnose("ghost", false).await.unwrap_err();
        assert!(matches!(err, AdapterError::BucketNotFound { .. }));
    }

    #[tokio::test]
    async fn test_access_denied_is_surfaced() {
        let storage = InMemoryStorage::new().with_bucket(BucketConfigSnapshot::new("locked"));
        storage.fail_fetch(
            "locked",
            AdapterError::AccessDenied {
                bucket: "locked".to_string(),
                operation: "HeadBucket".to_string(),
            },
        );
        let err = engine_with(storage).diagnose("locked", true).await.unwrap_err();
        assert!(matches!(err, AdapterError::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn test_unavailable_facet_yields_error_result() {
        let mut snapshot = BucketConfigSnapshot::new("partial");
        snapshot.encryption = Facet::Unavailable("Throttled".to_string());
        let engine = engine_with(InMemoryStorage::new().with_bucket(snapshot));
        let report = engine.diagnose("partial", false).await.unwrap();

        let encryption = report.result("Encryption").unwrap();
        assert_eq!(encryption.status, CheckStatus::Error);
        assert_eq!(report.counts.errors, 1);
    }

    #[tokio::test]
    async fn test_ai_analysis_attached() {
        let (_, ai) = analyst(Script::Reply(
            r#"{"summary": "Two critical gaps", "analysis": "Enable encryption and PAB."}"#.to_string(),
        ));
        let engine = engine_with(InMemoryStorage::new().with_bucket(BucketConfigSnapshot::new("b")))
            .with_analyst(Some(ai));
        let report = engine.diagnose("b", true).await.unwrap();
        assert_eq!(report.ai_analysis.as_deref(), Some("Enable encryption and PAB."));
        assert_eq!(report.ai_summary.as_deref(), Some("Two critical gaps"));
        assert!(report.ai_error.is_none());
    }

    #[tokio::test]
    async fn test_ai_timeout_does_not_fail_diagnosis() {
        let (backend, ai) = analyst(Script::Hang);
        let engine = engine_with(InMemoryStorage::new().with_bucket(BucketConfigSnapshot::new("b")))
            .with_analyst(Some(ai))
            .with_ai_timeout(Duration::from_millis(20));
        let report = engine.diagnose("b", true).await.unwrap();

        assert!(report.ai_analysis.is_none());
        assert!(report.ai_error.as_deref().unwrap().contains("timed out"));
        assert_eq!(report.score, 48);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_ai_failure_degrades_to_marker() {
        let (_, ai) = analyst(Script::Fail("quota exceeded".to_string()));
        let engine = engine_with(InMemoryStorage::new().with_bucket(BucketConfigSnapshot::new("b")))
            .with_analyst(Some(ai));
        let report = engine.diagnose("b", true).await.unwrap();
        assert!(report.ai_analysis.is_none());
        assert!(report.ai_error.as_deref().unwrap().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_ai_not_called_without_flag() {
        let (backend, ai) = analyst(Script::Reply("unused".to_string()));
        let engine = engine_with(InMemoryStorage::new().with_bucket(BucketConfigSnapshot::new("b")))
            .with_analyst(Some(ai));
        engine.diagnose("b", false).await.unwrap();
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_slow_adapter_hits_deadline() {
        let storage = InMemoryStorage::new()
            .with_latency(Duration::from_millis(200))
            .with_bucket(BucketConfigSnapshot::new("slow"));
        let engine = engine_with(storage).with_adapter_timeout(Duration::from_millis(10));
        let err = engine.diagnose("slow", false).await.unwrap_err();
        assert!(matches!(err, AdapterError::Timeout { .. }));
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let engine = engine_with(InMemoryStorage::new());
        let mut snapshot = BucketConfigSnapshot::new("b");
        snapshot.encryption = Facet::Present(EncryptionSettings {
            algorithm: "aws:kms".to_string(),
            kms_key_id: Some("key".to_string()),
        });
        let start = Utc::now();
        let first = engine.evaluate(&snapshot, start);
        let second = engine.evaluate(&snapshot, start);
        assert_eq!(first.score, second.score);
        assert_eq!(first.results, second.results);
        assert_eq!(first.score, 63);
    }
}
