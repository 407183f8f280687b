use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scoring::{HealthLabel, ScoringPolicy};

/// Outcome of a single check. Serialized names are part of the caller contract.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Error,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        }
    }
}

/// Severity level of a check
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

/// Result of evaluating one check against one snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckResult {
    pub check_name: String,
    pub status: CheckStatus,
    pub severity: Severity,
    pub detail: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub recommendation: String,
    #[serde(default)]
    pub auto_fixable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CheckResult {
    fn with_status(check_name: &str, status: CheckStatus, severity: Severity, detail: String) -> Self {
        Self {
            check_name: check_name.to_string(),
            status,
            severity,
            detail,
            recommendation: String::new(),
            auto_fixable: false,
            details: None,
        }
    }

    pub fn pass(check_name: &str, severity: Severity, detail: impl Into<String>) -> Self {
        Self::with_status(check_name, CheckStatus::Pass, severity, detail.into())
    }

    pub fn fail(check_name: &str, severity: Severity, detail: impl Into<String>) -> Self {
        Self::with_status(check_name, CheckStatus::Fail, severity, detail.into())
    }

    pub fn warn(check_name: &str, severity: Severity, detail: impl Into<String>) -> Self {
        Self::with_status(check_name, CheckStatus::Warn, severity, detail.into())
    }

    pub fn error(check_name: &str, severity: Severity, detail: impl Into<String>) -> Self {
        Self::with_status(check_name, CheckStatus::Error, severity, detail.into())
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = recommendation.into();
        self
    }

    pub fn with_auto_fixable(mut self, auto_fixable: bool) -> Self {
        self.auto_fixable = auto_fixable;
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_finding(&self) -> bool {
        self.status != CheckStatus::Pass
    }
}

/// Per-status tallies for a result sequence
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckCounts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub warnings: usize,
    pub errors: usize,
}

impl CheckCounts {
    pub fn from_results(results: &[CheckResult]) -> Self {
        results.iter().fold(
            CheckCounts {
                total: results.len(),
                ..Default::default()
            },
            |mut counts, result| {
                match result.status {
                    CheckStatus::Pass => counts.passed += 1,
                    CheckStatus::Fail => counts.failed += 1,
                    CheckStatus::Warn => counts.warnings += 1,
                    CheckStatus::Error => counts.errors += 1,
                }
                counts
            },
        )
    }
}

/// Complete diagnostic report for a bucket. Created once, never patched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BucketDiagnosticReport {
    pub bucket_name: String,
    pub region: Option<String>,
    pub scan_start: DateTime<Utc>,
    pub scan_end: DateTime<Utc>,
    pub score: u8,
    pub overall_health: HealthLabel,
    pub counts: CheckCounts,
    pub results: Vec<CheckResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
    /// Set when AI analysis was requested but could not be produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_error: Option<String>,
}

impl BucketDiagnosticReport {
    /// Assemble a report, scoring the results with the given policy
    pub fn new(
        bucket_name: &str,
        region: Option<String>,
        scan_start: DateTime<Utc>,
        results: Vec<CheckResult>,
        policy: &ScoringPolicy,
    ) -> Self {
        let assessment = policy.assess(&results);
        Self {
            bucket_name: bucket_name.to_string(),
            region,
            scan_start,
            scan_end: Utc::now(),
            score: assessment.score,
            overall_health: assessment.health,
            counts: CheckCounts::from_results(&results),
            results,
            ai_analysis: None,
            ai_summary: None,
            ai_error: None,
        }
    }

    /// Attach AI output before the report is handed out
    pub fn with_ai_analysis(mut self, analysis: String, summary: Option<String>) -> Self {
        self.ai_analysis = Some(analysis);
        self.ai_summary = summary;
        self.ai_error = None;
        self
    }

    pub fn with_ai_error(mut self, error: String) -> Self {
        self.ai_analysis = None;
        self.ai_summary = None;
        self.ai_error = Some(error);
        self
    }

    pub fn result(&self, check_name: &str) -> Option<&CheckResult> {
        self.results.iter().find(|r| r.check_name == check_name)
    }

    /// Results that are not PASS
    pub fn findings(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| r.is_finding())
    }
}

/// Result of one attempted remediation action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixOutcome {
    #[serde(rename = "check")]
    pub check_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FixOutcome {
    pub fn success(check_name: &str, message: impl Into<String>) -> Self {
        Self {
            check_name: check_name.to_string(),
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failure(check_name: &str, error: impl Into<String>) -> Self {
        Self {
            check_name: check_name.to_string(),
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

/// Before/after comparison produced by a remediation run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemediationResult {
    pub bucket_name: String,
    pub before_score: u8,
    pub after_score: u8,
    /// `after_score - before_score`; negative when a fix made things worse
    pub improvement: i32,
    pub fixes_applied: Vec<FixOutcome>,
    pub report: BucketDiagnosticReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_recommendations: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_error: Option<String>,
    /// Set when the post-fix diagnosis failed; `report` is then the pre-fix report
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_error: Option<String>,
}
