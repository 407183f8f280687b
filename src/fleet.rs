use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::diagnostic::DiagnosticEngine;
use crate::error::{AdapterError, DoctorError};
use crate::logging::{PerformanceLogEntry, StructuredLogger};
use crate::report::BucketDiagnosticReport;
use crate::scoring::HealthLabel;

/// Default number of buckets diagnosed in parallel
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// How buckets whose diagnosis failed count towards the fleet average
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AveragePolicy {
    /// Failed buckets count as score 0
    #[default]
    IncludeErrors,
    /// Failed buckets are left out of the mean
    ExcludeErrors,
}

/// One scanned bucket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetScanEntry {
    pub bucket: String,
    pub score: u8,
    pub health: HealthLabel,
    pub passed: usize,
    pub failed: usize,
    pub warnings: usize,
    /// Why the bucket could not be diagnosed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FleetScanEntry {
    fn from_report(report: &BucketDiagnosticReport) -> Self {
        Self {
            bucket: report.bucket_name.clone(),
            score: report.score,
            health: report.overall_health,
            passed: report.counts.passed,
            failed: report.counts.failed,
            warnings: report.counts.warnings,
            error: None,
        }
    }

    fn from_error(bucket: &str, error: &AdapterError) -> Self {
        Self {
            bucket: bucket.to_string(),
            score: 0,
            health: HealthLabel::Critical,
            passed: 0,
            failed: 0,
            warnings: 0,
            error: Some(error.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetScanSummary {
    pub scan_id: Uuid,
    pub total: usize,
    pub average_score: u8,
    /// Buckets scoring below the POOR threshold, errored buckets included
    pub critical_count: usize,
    pub good_count: usize,
    pub error_count: usize,
    pub elapsed_ms: u64,
    /// One entry per scanned bucket, in listing order
    pub buckets: Vec<FleetScanEntry>,
}

impl FleetScanSummary {
    /// Entries ordered ascending by score
    pub fn sorted_by_score(&self) -> Vec<&FleetScanEntry> {
        let mut entries: Vec<&FleetScanEntry> = self.buckets.iter().collect();
        entries.sort_by(|a, b| a.score.cmp(&b.score).then_with(|| a.bucket.cmp(&b.bucket)));
        entries
    }
}

/// Floor of the mean; 0 when nothing counts towards it
pub fn average_score(entries: &[FleetScanEntry], policy: AveragePolicy) -> u8 {
    let scores: Vec<u32> = entries
        .iter()
        .filter(|e| policy == AveragePolicy::IncludeErrors || !e.is_error())
        .map(|e| u32::from(e.score))
        .collect();
    if scores.is_empty() {
        return 0;
    }
    (scores.iter().sum::<u32>() / scores.len() as u32) as u8
}

/// アカウント全体のバケットスキャナー
pub struct FleetScanner {
    engine: DiagnosticEngine,
    max_concurrency: usize,
    average_policy: AveragePolicy,
}

impl FleetScanner {
    pub fn new(engine: DiagnosticEngine) -> Self {
        Self {
            engine,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            average_policy: AveragePolicy::default(),
        }
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_average_policy(mut self, policy: AveragePolicy) -> Self {
        self.average_policy = policy;
        self
    }

    /// Scan every bucket visible to the adapter
    pub async fn scan_all(&self) -> Result<FleetScanSummary, AdapterError> {
        let listing = tokio::time::timeout(self.engine.adapter_timeout(), self.engine.storage().list_buckets()).await;
        let buckets = match listing {
            Ok(result) => result?,
            Err(_) => {
                return Err(AdapterError::Timeout {
                    operation: "ListBuckets".to_string(),
                })
            }
        };
        info!("Found {} S3 buckets to scan", buckets.len());
        Ok(self.scan_buckets(buckets).await)
    }

    /// Diagnose the given buckets with bounded concurrency.
    ///
    /// A bucket whose diagnosis fails is reported with score 0 and health
    /// CRITICAL; it never aborts the scan.
    pub async fn scan_buckets(&self, buckets: Vec<String>) -> FleetScanSummary {
        let started = Instant::now();
        let scan_id = Uuid::new_v4();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = Vec::with_capacity(buckets.len());

        for bucket in &buckets {
            let sem = Arc::clone(&semaphore);
            let engine = self.engine.clone();
            let name = bucket.clone();

            let task = tokio::spawn(async move {
                let _permit = match sem.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return Err(AdapterError::Service {
                            operation: "scan".to_string(),
                            message: "worker pool closed".to_string(),
                        })
                    }
                };
                engine.diagnose(&name, false).await
            });

            tasks.push(task);
        }

        // Collect results in listing order
        let joined = futures::future::join_all(tasks).await;
        let mut entries = Vec::with_capacity(joined.len());
        for (bucket, outcome) in buckets.iter().zip(joined) {
            let entry = match outcome {
                Ok(Ok(report)) => FleetScanEntry::from_report(&report),
                Ok(Err(e)) => {
                    warn!(bucket = %bucket, "Bucket scan failed: {}", e);
                    FleetScanEntry::from_error(bucket, &e)
                }
                Err(join_err) => {
                    error!(bucket = %bucket, "Task join error: {}", join_err);
                    let e = AdapterError::Service {
                        operation: "scan".to_string(),
                        message: join_err.to_string(),
                    };
                    StructuredLogger::log_bucket_error(&DoctorError::from(e.clone()), "fleet", "scan_bucket", bucket);
                    FleetScanEntry::from_error(bucket, &e)
                }
            };
            entries.push(entry);
        }

        let policy = self.engine.policy();
        let critical_count = entries.iter().filter(|e| policy.is_below_poor(e.score)).count();
        let error_count = entries.iter().filter(|e| e.is_error()).count();
        let summary = FleetScanSummary {
            scan_id,
            total: entries.len(),
            average_score: average_score(&entries, self.average_policy),
            critical_count,
            good_count: entries.len() - critical_count,
            error_count,
            elapsed_ms: started.elapsed().as_millis() as u64,
            buckets: entries,
        };

        info!(
            scan_id = %summary.scan_id,
            "S3 scan completed: {} buckets, average score {}, {} critical, {} errors",
            summary.total,
            summary.average_score,
            summary.critical_count,
            summary.error_count
        );
        StructuredLogger::log_performance(
            &PerformanceLogEntry::new("scan_all", "fleet", started.elapsed(), true)
                .with_metric("buckets", summary.total as f64)
                .with_metric("concurrency", self.max_concurrency as f64),
        );

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::ScoringPolicy;
    use crate::snapshot::BucketConfigSnapshot;
    use crate::storage::mock::InMemoryStorage;
    use std::time::Duration;

    fn scanner_for(storage: Arc<InMemoryStorage>) -> FleetScanner {
        FleetScanner::new(DiagnosticEngine::new(storage, ScoringPolicy::default()))
    }

    fn storage_with(count: usize) -> InMemoryStorage {
        let storage = InMemoryStorage::new();
        for i in 0..count {
            storage.insert(BucketConfigSnapshot::new(&format!("bucket-{:02}", i)));
        }
        storage
    }

    #[tokio::test]
    async fn test_scan_all_covers_every_bucket() {
        let storage = Arc::new(storage_with(5));
        let summary = scanner_for(storage.clone()).scan_all().await.unwrap();

        assert_eq!(summary.total, 5);
        assert_eq!(summary.buckets.len(), 5);
        assert_eq!(summary.average_score, 48);
        assert_eq!(summary.critical_count, 5);
        assert_eq!(summary.good_count, 0);
        assert_eq!(summary.error_count, 0);
        assert_eq!(storage.fetch_count(), 5);
    }

    #[tokio::test]
    async fn test_errored_bucket_is_recorded_not_fatal() {
        let storage = storage_with(3);
        storage.fail_fetch(
            "bucket-01",
            AdapterError::AccessDenied {
                bucket: "bucket-01".to_string(),
                operation: "HeadBucket".to_string(),
            },
        );
        let summary = scanner_for(Arc::new(storage)).scan_all().await.unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.error_count, 1);
        let failed = summary.buckets.iter().find(|e| e.bucket == "bucket-01").unwrap();
        assert_eq!(failed.score, 0);
        assert_eq!(failed.health, HealthLabel::Critical);
        assert!(failed.error.as_deref().unwrap().contains("Access denied"));
        // (48 + 0 + 48) / 3
        assert_eq!(summary.average_score, 32);
    }

    #[tokio::test]
    async fn test_average_policy_can_exclude_errors() {
        let storage = storage_with(2);
        storage.fail_fetch(
            "bucket-00",
            AdapterError::Throttled {
                operation: "GetBucketAcl".to_string(),
            },
        );
        let summary = scanner_for(Arc::new(storage))
            .with_average_policy(AveragePolicy::ExcludeErrors)
            .scan_all()
            .await
            .unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.average_score, 48);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let storage = Arc::new(storage_with(20).with_latency(Duration::from_millis(20)));
        let summary = scanner_for(storage.clone())
            .with_max_concurrency(3)
            .scan_all()
            .await
            .unwrap();

        assert_eq!(summary.total, 20);
        assert!(storage.max_concurrent_fetches() <= 3, "{}", storage.max_concurrent_fetches());
        assert!(storage.max_concurrent_fetches() >= 1);
    }

    #[tokio::test]
    async fn test_listing_failure_is_surfaced() {
        let storage = InMemoryStorage::new();
        storage.fail_list(AdapterError::Unreachable {
            message: "dispatch failure".to_string(),
        });
        let err = scanner_for(Arc::new(storage)).scan_all().await.unwrap_err();
        assert!(err.is_backend_unreachable());
    }

    #[tokio::test]
    async fn test_empty_account() {
        let summary = scanner_for(Arc::new(InMemoryStorage::new())).scan_all().await.unwrap();
        assert_eq!(summary.total, 0);
        assert_eq!(summary.average_score, 0);
        assert!(summary.buckets.is_empty());
    }

    #[test]
    fn test_sorted_by_score_is_ascending() {
        let entry = |bucket: &str, score: u8| FleetScanEntry {
            bucket: bucket.to_string(),
            score,
            health: ScoringPolicy::default().health_for(score),
            passed: 0,
            failed: 0,
            warnings: 0,
            error: None,
        };
        let summary = FleetScanSummary {
            scan_id: Uuid::new_v4(),
            total: 3,
            average_score: 0,
            critical_count: 0,
            good_count: 0,
            error_count: 0,
            elapsed_ms: 0,
            buckets: vec![entry("a", 90), entry("b", 10), entry("c", 55)],
        };
        let order: Vec<&str> = summary.sorted_by_score().iter().map(|e| e.bucket.as_str()).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
    }
}
