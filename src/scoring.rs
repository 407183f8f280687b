//! Reduces a sequence of check results to a 0-100 score and a health label.
//!
//! Scoring is a pure function of the result sequence and an immutable
//! [`ScoringPolicy`]. The policy is loaded once at startup and never changed
//! while a diagnosis is running.

use serde::{Deserialize, Serialize};

use crate::report::{CheckResult, CheckStatus, Severity};

/// Score of a bucket with no penalties
pub const BASE_SCORE: u32 = 100;

/// Penalty for a FAIL of CRITICAL severity
pub const CRITICAL_PENALTY: u32 = 25;
/// Penalty for a FAIL of HIGH severity
pub const HIGH_PENALTY: u32 = 15;
/// Penalty for a FAIL of MEDIUM severity
pub const MEDIUM_PENALTY: u32 = 8;
/// Penalty for a FAIL of LOW severity
pub const LOW_PENALTY: u32 = 3;
/// Flat penalty for a check that could not be evaluated
pub const ERROR_PENALTY: u32 = 2;

/// Lowest score labelled EXCELLENT
pub const EXCELLENT_THRESHOLD: u8 = 90;
/// Lowest score labelled GOOD
pub const GOOD_THRESHOLD: u8 = 70;
/// Lowest score labelled POOR; anything below is CRITICAL
pub const POOR_THRESHOLD: u8 = 50;

/// Discrete health label derived from a score
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthLabel {
    Critical,
    Poor,
    Good,
    Excellent,
}

impl HealthLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthLabel::Critical => "CRITICAL",
            HealthLabel::Poor => "POOR",
            HealthLabel::Good => "GOOD",
            HealthLabel::Excellent => "EXCELLENT",
        }
    }
}

impl std::fmt::Display for HealthLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeverityWeights {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            critical: CRITICAL_PENALTY,
            high: HIGH_PENALTY,
            medium: MEDIUM_PENALTY,
            low: LOW_PENALTY,
        }
    }
}

impl SeverityWeights {
    pub fn for_severity(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthThresholds {
    pub excellent: u8,
    pub good: u8,
    pub poor: u8,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            excellent: EXCELLENT_THRESHOLD,
            good: GOOD_THRESHOLD,
            poor: POOR_THRESHOLD,
        }
    }
}

/// Weights and thresholds used to score a result sequence
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScoringPolicy {
    pub weights: SeverityWeights,
    pub error_penalty: u32,
    pub thresholds: HealthThresholds,
}

/// Score and label for one result sequence
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assessment {
    pub score: u8,
    pub health: HealthLabel,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            weights: SeverityWeights::default(),
            error_penalty: ERROR_PENALTY,
            thresholds: HealthThresholds::default(),
        }
    }
}

impl ScoringPolicy {
    pub fn new(weights: SeverityWeights, error_penalty: u32, thresholds: HealthThresholds) -> Self {
        Self {
            weights,
            error_penalty,
            thresholds,
        }
    }

    /// Penalty contributed by a single result
    pub fn penalty(&self, result: &CheckResult) -> u32 {
        match result.status {
            CheckStatus::Pass => 0,
            CheckStatus::Fail => self.weights.for_severity(result.severity),
            // Integer halving: a CRITICAL warning costs 12, a LOW warning costs 1
            CheckStatus::Warn => self.weights.for_severity(result.severity) / 2,
            CheckStatus::Error => self.error_penalty,
        }
    }

    pub fn score(&self, results: &[CheckResult]) -> u8 {
        let total_penalty: u32 = results
            .iter()
            .map(|r| self.penalty(r))
            .fold(0u32, |acc, p| acc.saturating_add(p));
        BASE_SCORE.saturating_sub(total_penalty).min(BASE_SCORE) as u8
    }

    pub fn health_for(&self, score: u8) -> HealthLabel {
        if score >= self.thresholds.excellent {
            HealthLabel::Excellent
        } else if score >= self.thresholds.good {
            HealthLabel::Good
        } else if score >= self.thresholds.poor {
            HealthLabel::Poor
        } else {
            HealthLabel::Critical
        }
    }

    pub fn assess(&self, results: &[CheckResult]) -> Assessment {
        let score = self.score(results);
        Assessment {
            score,
            health: self.health_for(score),
        }
    }

    /// True when the score falls in the "critical" half of a fleet partition
    pub fn is_below_poor(&self, score: u8) -> bool {
        score < self.thresholds.poor
    }

    pub fn validate(&self) -> Result<(), String> {
        let t = &self.thresholds;
        if t.excellent > 100 {
            return Err(format!("excellent threshold {} exceeds 100", t.excellent));
        }
        if !(t.excellent > t.good && t.good > t.poor) {
            return Err(format!(
                "thresholds must be strictly decreasing (excellent {} > good {} > poor {})",
                t.excellent, t.good, t.poor
            ));
        }
        Ok(())
    }
}

/// Score a result sequence with the default policy
pub fn assess(results: &[CheckResult]) -> Assessment {
    ScoringPolicy::default().assess(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn result(status: CheckStatus, severity: Severity) -> CheckResult {
        let mut r = CheckResult::pass("Check", severity, "detail");
        r.status = status;
        r
    }

    #[test]
    fn test_empty_sequence_is_perfect() {
        let assessment = assess(&[]);
        assert_eq!(assessment.score, 100);
        assert_eq!(assessment.health, HealthLabel::Excellent);
    }

    #[test]
    fn test_single_critical_fail_costs_25() {
        let assessment = assess(&[result(CheckStatus::Fail, Severity::Critical)]);
        assert_eq!(assessment.score, 75);
        assert_eq!(assessment.health, HealthLabel::Good);
    }

    #[test]
    fn test_single_critical_warn_costs_12() {
        assert_eq!(assess(&[result(CheckStatus::Warn, Severity::Critical)]).score, 88);
    }

    #[test]
    fn test_error_penalty_is_small_and_fixed() {
        for severity in [Severity::Low, Severity::Critical] {
            assert_eq!(assess(&[result(CheckStatus::Error, severity)]).score, 100 - ERROR_PENALTY as u8);
        }
    }

    #[test]
    fn test_end_to_end_example() {
        let results = vec![
            CheckResult::fail("Encryption", Severity::High, "not enabled"),
            CheckResult::pass("ACL", Severity::High, "private"),
            CheckResult::warn("Logging", Severity::Low, "not enabled"),
        ];
        let assessment = assess(&results);
        assert_eq!(assessment.score, 84);
        assert_eq!(assessment.health, HealthLabel::Good);
    }

    #[test]
    fn test_five_critical_fails_clamp_to_zero() {
        let results: Vec<_> = (0..5).map(|_| result(CheckStatus::Fail, Severity::Critical)).collect();
        let assessment = assess(&results);
        assert_eq!(assessment.score, 0);
        assert_eq!(assessment.health, HealthLabel::Critical);
    }

    #[test]
    fn test_health_label_boundaries() {
        let policy = ScoringPolicy::default();
        assert_eq!(policy.health_for(100), HealthLabel::Excellent);
        assert_eq!(policy.health_for(90), HealthLabel::Excellent);
        assert_eq!(policy.health_for(89), HealthLabel::Good);
        assert_eq!(policy.health_for(70), HealthLabel::Good);
        assert_eq!(policy.health_for(69), HealthLabel::Poor);
        assert_eq!(policy.health_for(50), HealthLabel::Poor);
        assert_eq!(policy.health_for(49), HealthLabel::Critical);
        assert_eq!(policy.health_for(0), HealthLabel::Critical);
    }

    #[test]
    fn test_policy_validation() {
        assert!(ScoringPolicy::default().validate().is_ok());
        let bad = ScoringPolicy::new(
            SeverityWeights::default(),
            ERROR_PENALTY,
            HealthThresholds { excellent: 70, good: 70, poor: 50 },
        );
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_policy_deserializes_with_defaults() {
        let policy: ScoringPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy, ScoringPolicy::default());
        assert_eq!(policy.error_penalty, ERROR_PENALTY);
    }

    proptest! {
        #[test]
        fn prop_score_is_deterministic(pairs in proptest::collection::vec(any::<(CheckStatus, Severity)>(), 0..40)) {
            let results: Vec<_> = pairs.iter().map(|(s, v)| result(*s, *v)).collect();
            let copy = results.clone();
            prop_assert_eq!(assess(&results), assess(&copy));
        }

        #[test]
        fn prop_score_is_clamped(pairs in proptest::collection::vec(any::<(CheckStatus, Severity)>(), 0..200)) {
            let results: Vec<_> = pairs.iter().map(|(s, v)| result(*s, *v)).collect();
            let assessment = assess(&results);
            prop_assert!(assessment.score <= 100);
            prop_assert_eq!(assessment.health, ScoringPolicy::default().health_for(assessment.score));
        }

        #[test]
        fn prop_adding_a_pass_never_changes_score(pairs in proptest::collection::vec(any::<(CheckStatus, Severity)>(), 0..40), severity in any::<Severity>()) {
            let mut results: Vec<_> = pairs.iter().map(|(s, v)| result(*s, *v)).collect();
            let before = assess(&results);
            results.push(result(CheckStatus::Pass, severity));
            prop_assert_eq!(before, assess(&results));
        }
    }
}
