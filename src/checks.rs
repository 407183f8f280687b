//! Fixed catalog of bucket security checks.
//!
//! Each check is a pure function of a [`BucketConfigSnapshot`]. Facets that
//! could not be fetched yield an `ERROR` result, never an omission, so
//! [`run_all`] always returns exactly one result per registered check in
//! registry order.
//!
//! Unknown configuration states are interpreted asymmetrically: checks tied
//! to data exposure (Public Access Block, ACL, Bucket Policy) treat them as
//! failing, while operational hygiene checks (Tagging, Lifecycle Policy)
//! treat them as passing.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::report::{CheckResult, Severity};
use crate::snapshot::{
    AccelerationStatus, BucketConfigSnapshot, Facet, VersioningStatus,
};

/// Tags every bucket is expected to carry for governance
pub const RECOMMENDED_TAGS: [&str; 4] = ["Environment", "Project", "Owner", "CostCenter"];

/// Policy actions that should always be guarded by a Condition block
const SENSITIVE_ACTIONS: [&str; 3] = ["s3:DeleteBucket", "s3:DeleteObject", "s3:PutBucketPolicy"];

/// ACL group that may legitimately hold grants (server access log delivery)
const LOG_DELIVERY_GROUP: &str = "http://acs.amazonaws.com/groups/s3/LogDelivery";

/// The registered checks, in registry order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CheckKind {
    BucketAccess,
    Encryption,
    Acl,
    BucketPolicy,
    PublicAccessBlock,
    Versioning,
    Logging,
    Cors,
    Replication,
    ObjectLock,
    TransferAcceleration,
    Tagging,
    LifecyclePolicy,
    BucketSize,
}

impl CheckKind {
    /// Every check, in the order results appear in a report
    pub const ALL: [CheckKind; 14] = [
        CheckKind::BucketAccess,
        CheckKind::Encryption,
        CheckKind::Acl,
        CheckKind::BucketPolicy,
        CheckKind::PublicAccessBlock,
        CheckKind::Versioning,
        CheckKind::Logging,
        CheckKind::Cors,
        CheckKind::Replication,
        CheckKind::ObjectLock,
        CheckKind::TransferAcceleration,
        CheckKind::Tagging,
        CheckKind::LifecyclePolicy,
        CheckKind::BucketSize,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CheckKind::BucketAccess => "Bucket Access",
            CheckKind::Encryption => "Encryption",
            CheckKind::Acl => "ACL",
            CheckKind::BucketPolicy => "Bucket Policy",
            CheckKind::PublicAccessBlock => "Public Access Block",
            CheckKind::Versioning => "Versioning",
            CheckKind::Logging => "Logging",
            CheckKind::Cors => "CORS",
            CheckKind::Replication => "Replication",
            CheckKind::ObjectLock => "Object Lock",
            CheckKind::TransferAcceleration => "Transfer Acceleration",
            CheckKind::Tagging => "Tagging",
            CheckKind::LifecyclePolicy => "Lifecycle Policy",
            CheckKind::BucketSize => "Bucket Size",
        }
    }

    pub fn from_name(name: &str) -> Option<CheckKind> {
        CheckKind::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    /// Severity reported when this check cannot be evaluated
    fn error_severity(&self) -> Severity {
        match self {
            CheckKind::PublicAccessBlock => Severity::Critical,
            CheckKind::BucketAccess | CheckKind::Encryption | CheckKind::Acl | CheckKind::BucketPolicy => {
                Severity::High
            }
            CheckKind::Versioning | CheckKind::Cors => Severity::Medium,
            _ => Severity::Low,
        }
    }

    /// Evaluate this check against a snapshot
    pub fn evaluate(&self, snapshot: &BucketConfigSnapshot) -> CheckResult {
        match self {
            CheckKind::BucketAccess => check_bucket_access(snapshot),
            CheckKind::Encryption => check_encryption(snapshot),
            CheckKind::Acl => check_acl(snapshot),
            CheckKind::BucketPolicy => check_bucket_policy(snapshot),
            CheckKind::PublicAccessBlock => check_public_access_block(snapshot),
            CheckKind::Versioning => check_versioning(snapshot),
            CheckKind::Logging => check_logging(snapshot),
            CheckKind::Cors => check_cors(snapshot),
            CheckKind::Replication => check_replication(snapshot),
            CheckKind::ObjectLock => check_object_lock(snapshot),
            CheckKind::TransferAcceleration => check_transfer_acceleration(snapshot),
            CheckKind::Tagging => check_tagging(snapshot),
            CheckKind::LifecyclePolicy => check_lifecycle(snapshot),
            CheckKind::BucketSize => check_bucket_size(snapshot),
        }
    }

    fn unavailable(&self, facet: &str, reason: &str) -> CheckResult {
        CheckResult::error(
            self.name(),
            self.error_severity(),
            format!("Could not evaluate: {} configuration unavailable ({})", facet, reason),
        )
        .with_details(json!({ "facet": facet, "reason": reason }))
    }
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Run every registered check against the snapshot, in registry order
pub fn run_all(snapshot: &BucketConfigSnapshot) -> Vec<CheckResult> {
    let results: Vec<CheckResult> = CheckKind::ALL.iter().map(|kind| kind.evaluate(snapshot)).collect();
    debug!(
        bucket = %snapshot.bucket_name,
        checks = results.len(),
        "Completed check run"
    );
    results
}

fn check_bucket_access(snapshot: &BucketConfigSnapshot) -> CheckResult {
    let kind = CheckKind::BucketAccess;
    match &snapshot.region {
        Facet::Present(region) => CheckResult::pass(
            kind.name(),
            Severity::Critical,
            format!("Bucket '{}' exists and is accessible in {}.", snapshot.bucket_name, region),
        )
        .with_details(json!({ "region": region })),
        Facet::Absent => CheckResult::pass(
            kind.name(),
            Severity::Critical,
            format!(
                "Bucket '{}' exists and is accessible in us-east-1 (no location constraint).",
                snapshot.bucket_name
            ),
        ),
        Facet::Unavailable(reason) => kind.unavailable("location", reason),
    }
}

fn check_encryption(snapshot: &BucketConfigSnapshot) -> CheckResult {
    let kind = CheckKind::Encryption;
    match &snapshot.encryption {
        Facet::Present(settings) => CheckResult::pass(
            kind.name(),
            Severity::High,
            format!("Encryption enabled with {}.", settings.algorithm),
        )
        .with_details(json!({ "algorithm": settings.algorithm, "kms_key_id": settings.kms_key_id })),
        Facet::Absent => CheckResult::fail(kind.name(), Severity::High, "Server-side encryption is NOT enabled.")
            .with_recommendation("Enable default encryption (AES-256 or aws:kms).")
            .with_auto_fixable(true),
        Facet::Unavailable(reason) => kind.unavailable("encryption", reason),
    }
}

/// Exposure check: any grant to a public group, to an unrecognised group, or
/// to an unrecognised grantee type is a failure.
fn check_acl(snapshot: &BucketConfigSnapshot) -> CheckResult {
    let kind = CheckKind::Acl;
    let acl = match &snapshot.acl {
        Facet::Present(acl) => acl,
        Facet::Absent => {
            return CheckResult::pass(kind.name(), Severity::High, "No ACL grants are present.");
        }
        Facet::Unavailable(reason) => return kind.unavailable("ACL", reason),
    };

    let mut issues = Vec::new();
    for grant in &acl.grants {
        let uri = grant.grantee_uri.as_deref().unwrap_or("");
        let issue = match grant.grantee_type.as_str() {
            "Group" if uri.contains("AllUsers") => Some(("PUBLIC_ACL", "Everyone (AllUsers)".to_string())),
            "Group" if uri.contains("AuthenticatedUsers") => {
                Some(("AUTHENTICATED_USERS_ACL", "All AWS Authenticated Users".to_string()))
            }
            "Group" if uri == LOG_DELIVERY_GROUP => None,
            "Group" => Some(("UNRECOGNISED_GROUP", uri.to_string())),
            "CanonicalUser" | "AmazonCustomerByEmail" => None,
            other => Some(("UNRECOGNISED_GRANTEE", other.to_string())),
        };
        if let Some((issue_type, grantee)) = issue {
            issues.push(json!({
                "type": issue_type,
                "grantee": grantee,
                "permission": grant.permission,
            }));
        }
    }

    if issues.is_empty() {
        CheckResult::pass(
            kind.name(),
            Severity::High,
            format!("ACL permissions look correct ({} grant(s)).", acl.grants.len()),
        )
    } else {
        CheckResult::fail(
            kind.name(),
            Severity::Critical,
            format!("ACL has {} overly permissive grant(s).", issues.len()),
        )
        .with_recommendation("Remove public ACL grants. Use bucket policies for access control instead.")
        .with_details(json!({ "issues": issues }))
    }
}

fn is_wildcard_principal(principal: &Value) -> bool {
    match principal {
        Value::String(s) => s == "*",
        Value::Object(map) => map.values().any(|v| match v {
            Value::String(s) => s == "*",
            Value::Array(items) => items.iter().any(|i| i.as_str() == Some("*")),
            // Unrecognised principal shape: assume it may be public
            _ => true,
        }),
        _ => true,
    }
}

fn statement_actions(statement: &Value) -> Vec<String> {
    match statement.get("Action") {
        Some(Value::String(action)) => vec![action.clone()],
        Some(Value::Array(actions)) => actions.iter().filter_map(|a| a.as_str().map(str::to_string)).collect(),
        _ => Vec::new(),
    }
}

/// Exposure check: unrecognised Effect values are treated as Allow and
/// unrecognised Principal shapes as public.
fn check_bucket_policy(snapshot: &BucketConfigSnapshot) -> CheckResult {
    let kind = CheckKind::BucketPolicy;
    let document = match &snapshot.policy {
        Facet::Present(document) => document,
        Facet::Absent => {
            return CheckResult::warn(kind.name(), Severity::Low, "No bucket policy is configured.")
                .with_recommendation("Consider adding a bucket policy to explicitly define access controls.");
        }
        Facet::Unavailable(reason) => return kind.unavailable("policy", reason),
    };

    let policy: Value = match serde_json::from_str(document) {
        Ok(policy) => policy,
        Err(e) => {
            return CheckResult::error(kind.name(), Severity::High, format!("Failed to parse bucket policy JSON: {}", e));
        }
    };

    let statements: Vec<&Value> = match policy.get("Statement") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(statement @ Value::Object(_)) => vec![statement],
        _ => {
            return CheckResult::error(kind.name(), Severity::High, "Bucket policy has no Statement block.");
        }
    };

    let mut issues: Vec<(Severity, Value)> = Vec::new();
    for statement in statements {
        let is_deny = statement.get("Effect").and_then(Value::as_str) == Some("Deny");
        if is_deny {
            continue;
        }
        let actions = statement_actions(statement);
        match (statement.get("Principal"), statement.get("NotPrincipal")) {
            (Some(principal), _) if is_wildcard_principal(principal) => issues.push((
                Severity::Critical,
                json!({ "type": "OPEN_ACCESS", "detail": format!("Statement allows access to everyone (*). Actions: {:?}", actions) }),
            )),
            (Some(_), _) => {}
            // Allow + NotPrincipal grants everyone except the listed principals
            (None, Some(_)) => issues.push((
                Severity::Critical,
                json!({ "type": "OPEN_ACCESS", "detail": format!("Statement uses NotPrincipal with Allow; grants access to everyone else. Actions: {:?}", actions) }),
            )),
            (None, None) => issues.push((
                Severity::Critical,
                json!({ "type": "OPEN_ACCESS", "detail": format!("Allow statement names no principal; treated as public. Actions: {:?}", actions) }),
            )),
        }
        if actions.iter().any(|a| a == "s3:*" || a == "*") {
            issues.push((
                Severity::High,
                json!({ "type": "WILDCARD_ACTIONS", "detail": "Statement uses a wildcard action; overly permissive." }),
            ));
        }
        if statement.get("Condition").is_none() {
            for action in actions.iter().filter(|a| SENSITIVE_ACTIONS.contains(&a.as_str())) {
                issues.push((
                    Severity::Medium,
                    json!({ "type": "MISSING_CONDITION", "detail": format!("Sensitive action '{}' has no Condition block.", action) }),
                ));
            }
        }
    }

    if issues.is_empty() {
        return CheckResult::pass(kind.name(), Severity::High, "Bucket policy exists and appears properly configured.");
    }

    let critical = issues.iter().any(|(severity, _)| *severity == Severity::Critical);
    let detail = format!("Bucket policy has {} issue(s).", issues.len());
    let issue_values: Vec<Value> = issues.into_iter().map(|(_, v)| v).collect();
    let result = if critical {
        CheckResult::fail(kind.name(), Severity::Critical, detail)
    } else {
        CheckResult::warn(kind.name(), Severity::High, detail)
    };
    result
        .with_recommendation("Review and tighten bucket policy. Remove wildcard principals, restrict actions, and add conditions.")
        .with_details(json!({ "issues": issue_values }))
}

/// Exposure check: a flag the control plane did not report counts as disabled.
fn check_public_access_block(snapshot: &BucketConfigSnapshot) -> CheckResult {
    let kind = CheckKind::PublicAccessBlock;
    match &snapshot.public_access_block {
        Facet::Present(block) => {
            let disabled = block.disabled_flags();
            if disabled.is_empty() {
                CheckResult::pass(kind.name(), Severity::Critical, "All public access is blocked.")
            } else {
                CheckResult::fail(
                    kind.name(),
                    Severity::Critical,
                    format!("Public access block is INCOMPLETE. Disabled: {}", disabled.join(", ")),
                )
                .with_recommendation(format!("Enable these settings: {}", disabled.join(", ")))
                .with_auto_fixable(true)
                .with_details(json!({ "disabled": disabled }))
            }
        }
        Facet::Absent => CheckResult::fail(
            kind.name(),
            Severity::Critical,
            "No Public Access Block configuration found! Bucket may be publicly accessible.",
        )
        .with_recommendation("Enable all four Public Access Block settings immediately.")
        .with_auto_fixable(true),
        Facet::Unavailable(reason) => kind.unavailable("public access block", reason),
    }
}

fn check_versioning(snapshot: &BucketConfigSnapshot) -> CheckResult {
    let kind = CheckKind::Versioning;
    let state = match &snapshot.versioning {
        Facet::Present(state) => state,
        Facet::Absent => {
            return CheckResult::fail(kind.name(), Severity::Medium, "Versioning is NOT enabled.")
                .with_recommendation("Enable versioning to protect against accidental deletes and overwrites.")
                .with_auto_fixable(true);
        }
        Facet::Unavailable(reason) => return kind.unavailable("versioning", reason),
    };

    let details = json!({ "mfa_delete": state.mfa_delete });
    match &state.status {
        VersioningStatus::Enabled => {
            CheckResult::pass(kind.name(), Severity::Medium, "Versioning is enabled.").with_details(details)
        }
        VersioningStatus::Suspended => CheckResult::warn(
            kind.name(),
            Severity::Medium,
            "Versioning is SUSPENDED. Existing versions remain, but new versions won't be created.",
        )
        .with_recommendation("Re-enable versioning for data protection.")
        .with_details(details),
        VersioningStatus::Disabled => CheckResult::fail(kind.name(), Severity::Medium, "Versioning is NOT enabled.")
            .with_recommendation("Enable versioning to protect against accidental deletes and overwrites.")
            .with_auto_fixable(true)
            .with_details(details),
        VersioningStatus::Unknown(status) => CheckResult::fail(
            kind.name(),
            Severity::Medium,
            format!("Versioning status '{}' is not recognised; treating it as disabled.", status),
        )
        .with_recommendation("Enable versioning to protect against accidental deletes and overwrites.")
        .with_auto_fixable(true)
        .with_details(details),
    }
}

fn check_logging(snapshot: &BucketConfigSnapshot) -> CheckResult {
    let kind = CheckKind::Logging;
    match &snapshot.logging {
        Facet::Present(logging) => CheckResult::pass(
            kind.name(),
            Severity::Low,
            format!("Access logging is enabled (target: {}/{}).", logging.target_bucket, logging.target_prefix),
        ),
        Facet::Absent => CheckResult::warn(kind.name(), Severity::Low, "Access logging is NOT enabled.")
            .with_recommendation("Enable server access logging for audit and security monitoring."),
        Facet::Unavailable(reason) => kind.unavailable("logging", reason),
    }
}

fn check_cors(snapshot: &BucketConfigSnapshot) -> CheckResult {
    let kind = CheckKind::Cors;
    let rules = match &snapshot.cors {
        Facet::Present(rules) => rules,
        Facet::Absent => {
            return CheckResult::pass(
                kind.name(),
                Severity::Low,
                "No CORS configuration (fine if not serving web content).",
            );
        }
        Facet::Unavailable(reason) => return kind.unavailable("CORS", reason),
    };

    let mut issues = Vec::new();
    for (index, rule) in rules.iter().enumerate() {
        if rule.allowed_origins.iter().any(|o| o == "*") {
            issues.push(json!({
                "rule_index": index,
                "type": "WILDCARD_ORIGIN",
                "detail": "Allows requests from any origin (*)",
            }));
        }
        let write_methods: Vec<&String> = rule
            .allowed_methods
            .iter()
            .filter(|m| m.eq_ignore_ascii_case("PUT") || m.eq_ignore_ascii_case("DELETE"))
            .collect();
        if !write_methods.is_empty() {
            issues.push(json!({
                "rule_index": index,
                "type": "WRITE_METHODS",
                "detail": format!("Allows write methods: {:?}", write_methods),
            }));
        }
    }

    if issues.is_empty() {
        CheckResult::pass(kind.name(), Severity::Low, "CORS configuration looks properly scoped.")
    } else {
        CheckResult::warn(kind.name(), Severity::Medium, format!("CORS has {} potential issue(s).", issues.len()))
            .with_recommendation("Restrict CORS origins to specific domains. Avoid wildcard (*).")
            .with_details(json!({ "issues": issues }))
    }
}

fn check_replication(snapshot: &BucketConfigSnapshot) -> CheckResult {
    let kind = CheckKind::Replication;
    match &snapshot.replication {
        Facet::Present(replication) => CheckResult::pass(
            kind.name(),
            Severity::Low,
            format!("Replication is configured with {} rule(s).", replication.rule_count),
        )
        .with_details(json!({ "role": replication.role })),
        Facet::Absent => CheckResult::pass(
            kind.name(),
            Severity::Low,
            "No replication configured (may be acceptable depending on requirements).",
        )
        .with_recommendation("Consider enabling replication for disaster recovery."),
        Facet::Unavailable(reason) => kind.unavailable("replication", reason),
    }
}

fn check_object_lock(snapshot: &BucketConfigSnapshot) -> CheckResult {
    let kind = CheckKind::ObjectLock;
    match &snapshot.object_lock {
        Facet::Present(lock) if lock.enabled => {
            let mode = lock.default_mode.as_deref().unwrap_or("no default retention");
            CheckResult::pass(
                kind.name(),
                Severity::Low,
                format!("Object Lock is enabled (WORM protection, {}).", mode),
            )
        }
        Facet::Present(_) | Facet::Absent => CheckResult::pass(kind.name(), Severity::Low, "Object Lock is not enabled.")
            .with_recommendation("Enable Object Lock if you need WORM (Write Once Read Many) compliance."),
        Facet::Unavailable(reason) => kind.unavailable("object lock", reason),
    }
}

fn check_transfer_acceleration(snapshot: &BucketConfigSnapshot) -> CheckResult {
    let kind = CheckKind::TransferAcceleration;
    let status = match &snapshot.transfer_acceleration {
        Facet::Present(AccelerationStatus::Enabled) => "Enabled".to_string(),
        Facet::Present(AccelerationStatus::Suspended) => "Suspended".to_string(),
        Facet::Present(AccelerationStatus::Unknown(status)) => status.clone(),
        Facet::Absent => "Not configured".to_string(),
        Facet::Unavailable(reason) => return kind.unavailable("transfer acceleration", reason),
    };
    CheckResult::pass(kind.name(), Severity::Low, format!("Transfer Acceleration: {}", status))
}

/// Hygiene check: tag keys are matched case-insensitively.
fn check_tagging(snapshot: &BucketConfigSnapshot) -> CheckResult {
    let kind = CheckKind::Tagging;
    let tags = match &snapshot.tags {
        Facet::Present(tags) if !tags.is_empty() => tags,
        Facet::Present(_) | Facet::Absent => {
            return CheckResult::warn(kind.name(), Severity::Low, "No tags configured.").with_recommendation(format!(
                "Add tags ({}) for governance.",
                RECOMMENDED_TAGS.join(", ")
            ));
        }
        Facet::Unavailable(reason) => return kind.unavailable("tagging", reason),
    };

    let missing: Vec<&str> = RECOMMENDED_TAGS
        .iter()
        .copied()
        .filter(|wanted| !tags.iter().any(|t| t.key.eq_ignore_ascii_case(wanted)))
        .collect();

    if missing.is_empty() {
        CheckResult::pass(
            kind.name(),
            Severity::Low,
            format!("Bucket has {} tag(s) including recommended governance tags.", tags.len()),
        )
    } else {
        CheckResult::warn(
            kind.name(),
            Severity::Low,
            format!("Bucket has {} tag(s) but is missing recommended: {}", tags.len(), missing.join(", ")),
        )
        .with_recommendation(format!("Add these tags for governance: {}", missing.join(", ")))
        .with_details(json!({ "missing_recommended": missing }))
    }
}

/// Hygiene check: any rule not explicitly "Disabled" counts as active.
fn check_lifecycle(snapshot: &BucketConfigSnapshot) -> CheckResult {
    let kind = CheckKind::LifecyclePolicy;
    let rules = match &snapshot.lifecycle {
        Facet::Present(rules) if !rules.is_empty() => rules,
        Facet::Present(_) | Facet::Absent => {
            return CheckResult::warn(kind.name(), Severity::Low, "No lifecycle rules configured.").with_recommendation(
                "Add lifecycle rules to manage storage costs (e.g., transition to Glacier, expire old objects).",
            );
        }
        Facet::Unavailable(reason) => return kind.unavailable("lifecycle", reason),
    };

    let active = rules.iter().filter(|r| r.status != "Disabled").count();
    if active == 0 {
        return CheckResult::warn(
            kind.name(),
            Severity::Low,
            format!("{} lifecycle rule(s) configured but all are disabled.", rules.len()),
        )
        .with_recommendation("Enable at least one lifecycle rule to manage storage costs.");
    }
    CheckResult::pass(
        kind.name(),
        Severity::Low,
        format!("{} active lifecycle rule(s) configured.", active),
    )
    .with_details(json!({ "total_rules": rules.len(), "enabled_rules": active }))
}

fn check_bucket_size(snapshot: &BucketConfigSnapshot) -> CheckResult {
    let kind = CheckKind::BucketSize;
    match &snapshot.size {
        Facet::Present(size) => CheckResult::pass(
            kind.name(),
            Severity::Low,
            format!(
                "Bucket contains ~{} objects, ~{} MB {}.",
                size.object_count,
                size.total_megabytes(),
                if size.sampled { "(sampled)" } else { "(complete)" }
            ),
        )
        .with_details(json!({
            "object_count": size.object_count,
            "total_size_bytes": size.total_bytes,
            "sampled": size.sampled,
        })),
        Facet::Absent => CheckResult::pass(kind.name(), Severity::Low, "Bucket is empty."),
        Facet::Unavailable(reason) => kind.unavailable("object listing", reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::CheckStatus;
    use crate::snapshot::*;

    fn compliant_snapshot() -> BucketConfigSnapshot {
        let mut snapshot = BucketConfigSnapshot::new("compliant");
        snapshot.region = Facet::Present("eu-west-1".to_string());
        snapshot.encryption = Facet::Present(EncryptionSettings {
            algorithm: "AES256".to_string(),
            kms_key_id: None,
        });
        snapshot.public_access_block = Facet::Present(PublicAccessBlock::all_blocked());
        snapshot.versioning = Facet::Present(VersioningState {
            status: VersioningStatus::Enabled,
            mfa_delete: false,
        });
        snapshot.logging = Facet::Present(AccessLogging {
            target_bucket: "logs".to_string(),
            target_prefix: "compliant/".to_string(),
        });
        snapshot.policy = Facet::Present(
            r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Principal":{"AWS":"arn:aws:iam::123:root"},"Action":["s3:GetObject"],"Resource":"*"}]}"#
                .to_string(),
        );
        snapshot.tags = Facet::Present(RECOMMENDED_TAGS.iter().map(|k| Tag::new(k, "x")).collect());
        snapshot.lifecycle = Facet::Present(vec![LifecycleRule {
            id: Some("expire".to_string()),
            status: "Enabled".to_string(),
        }]);
        snapshot
    }

    fn result_for(snapshot: &BucketConfigSnapshot, kind: CheckKind) -> CheckResult {
        kind.evaluate(snapshot)
    }

    #[test]
    fn test_registry_has_fourteen_unique_checks() {
        let mut names: Vec<&str> = CheckKind::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(names.len(), 14);
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 14);
        for kind in CheckKind::ALL {
            assert_eq!(CheckKind::from_name(kind.name()), Some(kind));
        }
    }

    #[test]
    fn test_run_all_returns_one_result_per_check_in_order() {
        let results = run_all(&compliant_snapshot());
        assert_eq!(results.len(), CheckKind::ALL.len());
        for (result, kind) in results.iter().zip(CheckKind::ALL.iter()) {
            assert_eq!(result.check_name, kind.name());
        }
        assert!(results.iter().all(|r| r.status == CheckStatus::Pass), "{:?}", results);
    }

    #[test]
    fn test_unavailable_facets_become_errors_not_omissions() {
        let mut snapshot = compliant_snapshot();
        let reason = "AccessDenied".to_string();
        snapshot.region = Facet::Unavailable(reason.clone());
        snapshot.acl = Facet::Unavailable(reason.clone());
        snapshot.policy = Facet::Unavailable(reason.clone());
        snapshot.public_access_block = Facet::Unavailable(reason.clone());
        snapshot.size = Facet::Unavailable(reason);

        let results = run_all(&snapshot);
        assert_eq!(results.len(), CheckKind::ALL.len());
        let errored: Vec<&str> = results
            .iter()
            .filter(|r| r.status == CheckStatus::Error)
            .map(|r| r.check_name.as_str())
            .collect();
        assert_eq!(
            errored,
            vec!["Bucket Access", "ACL", "Bucket Policy", "Public Access Block", "Bucket Size"]
        );
        assert!(results[2].detail.contains("AccessDenied"));
    }

    #[test]
    fn test_default_bucket_findings() {
        let snapshot = BucketConfigSnapshot::new("fresh");
        let enc = result_for(&snapshot, CheckKind::Encryption);
        assert_eq!(enc.status, CheckStatus::Fail);
        assert_eq!(enc.severity, Severity::High);
        assert!(enc.auto_fixable);

        let pab = result_for(&snapshot, CheckKind::PublicAccessBlock);
        assert_eq!(pab.status, CheckStatus::Fail);
        assert_eq!(pab.severity, Severity::Critical);
        assert!(pab.auto_fixable);

        let logging = result_for(&snapshot, CheckKind::Logging);
        assert_eq!(logging.status, CheckStatus::Warn);
        assert_eq!(logging.severity, Severity::Low);
    }

    #[test]
    fn test_public_access_block_partial_and_unknown_flags_fail() {
        let mut snapshot = compliant_snapshot();
        snapshot.public_access_block = Facet::Present(PublicAccessBlock {
            block_public_acls: Some(true),
            ignore_public_acls: Some(false),
            block_public_policy: None,
            restrict_public_buckets: Some(true),
        });
        let result = result_for(&snapshot, CheckKind::PublicAccessBlock);
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result.detail.contains("IgnorePublicAcls"));
        assert!(result.detail.contains("BlockPublicPolicy"));
    }

    #[test]
    fn test_acl_public_grant_fails() {
        let mut snapshot = compliant_snapshot();
        snapshot.acl = Facet::Present(AccessControlList {
            owner_id: Some("owner".to_string()),
            grants: vec![AclGrant {
                grantee_type: "Group".to_string(),
                grantee_id: None,
                grantee_uri: Some("http://acs.amazonaws.com/groups/global/AllUsers".to_string()),
                permission: "READ".to_string(),
            }],
        });
        let result = result_for(&snapshot, CheckKind::Acl);
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.severity, Severity::Critical);
    }

    #[test]
    fn test_acl_log_delivery_and_owner_grants_pass() {
        let mut snapshot = compliant_snapshot();
        snapshot.acl = Facet::Present(AccessControlList {
            owner_id: Some("owner".to_string()),
            grants: vec![
                AclGrant {
                    grantee_type: "CanonicalUser".to_string(),
                    grantee_id: Some("owner".to_string()),
                    grantee_uri: None,
                    permission: "FULL_CONTROL".to_string(),
                },
                AclGrant {
                    grantee_type: "Group".to_string(),
                    grantee_id: None,
                    grantee_uri: Some(LOG_DELIVERY_GROUP.to_string()),
                    permission: "WRITE".to_string(),
                },
            ],
        });
        assert_eq!(result_for(&snapshot, CheckKind::Acl).status, CheckStatus::Pass);
    }

    #[test]
    fn test_acl_unrecognised_grantee_fails_conservatively() {
        let mut snapshot = compliant_snapshot();
        snapshot.acl = Facet::Present(AccessControlList {
            owner_id: None,
            grants: vec![AclGrant {
                grantee_type: "FutureGranteeType".to_string(),
                grantee_id: None,
                grantee_uri: None,
                permission: "READ".to_string(),
            }],
        });
        assert_eq!(result_for(&snapshot, CheckKind::Acl).status, CheckStatus::Fail);
    }

    #[test]
    fn test_open_policy_fails_critical() {
        let mut snapshot = compliant_snapshot();
        snapshot.policy = Facet::Present(
            r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Principal":"*","Action":"s3:*","Resource":"*"}]}"#
                .to_string(),
        );
        let result = result_for(&snapshot, CheckKind::BucketPolicy);
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.severity, Severity::Critical);
    }

    #[test]
    fn test_policy_wildcard_in_principal_list_is_open() {
        let mut snapshot = compliant_snapshot();
        snapshot.policy = Facet::Present(
            r#"{"Statement":{"Effect":"Allow","Principal":{"AWS":["arn:aws:iam::1:root","*"]},"Action":"s3:GetObject"}}"#
                .to_string(),
        );
        assert_eq!(result_for(&snapshot, CheckKind::BucketPolicy).status, CheckStatus::Fail);
    }

    #[test]
    fn test_policy_allow_with_not_principal_is_open() {
        let mut snapshot = compliant_snapshot();
        snapshot.policy = Facet::Present(
            r#"{"Statement":[{"Effect":"Allow","NotPrincipal":{"AWS":"arn:aws:iam::1:root"},"Action":"s3:GetObject"}]}"#
                .to_string(),
        );
        let result = result_for(&snapshot, CheckKind::BucketPolicy);
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.severity, Severity::Critical);
        let issues = result.details.as_ref().unwrap()["issues"].as_array().unwrap();
        assert_eq!(issues[0]["type"], "OPEN_ACCESS");
    }

    #[test]
    fn test_policy_allow_without_any_principal_is_open() {
        let mut snapshot = compliant_snapshot();
        snapshot.policy = Facet::Present(
            r#"{"Statement":[{"Effect":"Allow","Action":"s3:GetObject","Resource":"*"}]}"#.to_string(),
        );
        let result = result_for(&snapshot, CheckKind::BucketPolicy);
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.severity, Severity::Critical);
    }

    #[test]
    fn test_policy_deny_with_not_principal_is_ignored() {
        let mut snapshot = compliant_snapshot();
        snapshot.policy = Facet::Present(
            r#"{"Statement":[{"Effect":"Deny","NotPrincipal":{"AWS":"arn:aws:iam::1:root"},"Action":"s3:*"}]}"#
                .to_string(),
        );
        assert_eq!(result_for(&snapshot, CheckKind::BucketPolicy).status, CheckStatus::Pass);
    }

    #[test]
    fn test_policy_sensitive_action_without_condition_warns() {
        let mut snapshot = compliant_snapshot();
        snapshot.policy = Facet::Present(
            r#"{"Statement":[{"Effect":"Allow","Principal":{"AWS":"arn:aws:iam::1:role/app"},"Action":["s3:DeleteObject"]}]}"#
                .to_string(),
        );
        let result = result_for(&snapshot, CheckKind::BucketPolicy);
        assert_eq!(result.status, CheckStatus::Warn);
        assert_eq!(result.severity, Severity::High);
    }

    #[test]
    fn test_deny_statements_are_ignored() {
        let mut snapshot = compliant_snapshot();
        snapshot.policy = Facet::Present(
            r#"{"Statement":[{"Effect":"Deny","Principal":"*","Action":"s3:*","Condition":{"Bool":{"aws:SecureTransport":"false"}}}]}"#
                .to_string(),
        );
        assert_eq!(result_for(&snapshot, CheckKind::BucketPolicy).status, CheckStatus::Pass);
    }

    #[test]
    fn test_malformed_policy_is_error() {
        let mut snapshot = compliant_snapshot();
        snapshot.policy = Facet::Present("{not json".to_string());
        assert_eq!(result_for(&snapshot, CheckKind::BucketPolicy).status, CheckStatus::Error);
    }

    #[test]
    fn test_versioning_states() {
        let mut snapshot = compliant_snapshot();
        snapshot.versioning = Facet::Present(VersioningState {
            status: VersioningStatus::Suspended,
            mfa_delete: false,
        });
        let suspended = result_for(&snapshot, CheckKind::Versioning);
        assert_eq!(suspended.status, CheckStatus::Warn);
        assert!(!suspended.auto_fixable);

        snapshot.versioning = Facet::Present(VersioningState {
            status: VersioningStatus::Unknown("Paused".to_string()),
            mfa_delete: false,
        });
        assert_eq!(result_for(&snapshot, CheckKind::Versioning).status, CheckStatus::Fail);
    }

    #[test]
    fn test_cors_wildcard_origin_warns() {
        let mut snapshot = compliant_snapshot();
        snapshot.cors = Facet::Present(vec![CorsRule {
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec!["GET".to_string(), "PUT".to_string()],
            allowed_headers: vec![],
        }]);
        let result = result_for(&snapshot, CheckKind::Cors);
        assert_eq!(result.status, CheckStatus::Warn);
        assert!(result.detail.contains("2 potential issue"));
    }

    #[test]
    fn test_tagging_is_permissive_about_case() {
        let mut snapshot = compliant_snapshot();
        snapshot.tags = Facet::Present(vec![
            Tag::new("environment", "prod"),
            Tag::new("PROJECT", "x"),
            Tag::new("owner", "team"),
            Tag::new("costcenter", "42"),
        ]);
        assert_eq!(result_for(&snapshot, CheckKind::Tagging).status, CheckStatus::Pass);

        snapshot.tags = Facet::Present(vec![Tag::new("Environment", "prod")]);
        let partial = result_for(&snapshot, CheckKind::Tagging);
        assert_eq!(partial.status, CheckStatus::Warn);
        assert!(partial.detail.contains("CostCenter"));
    }

    #[test]
    fn test_lifecycle_unknown_status_counts_as_active() {
        let mut snapshot = compliant_snapshot();
        snapshot.lifecycle = Facet::Present(vec![LifecycleRule {
            id: None,
            status: "SomeFutureStatus".to_string(),
        }]);
        assert_eq!(result_for(&snapshot, CheckKind::LifecyclePolicy).status, CheckStatus::Pass);

        snapshot.lifecycle = Facet::Present(vec![LifecycleRule {
            id: None,
            status: "Disabled".to_string(),
        }]);
        assert_eq!(result_for(&snapshot, CheckKind::LifecyclePolicy).status, CheckStatus::Warn);
    }

    #[test]
    fn test_informational_checks_never_penalise() {
        let snapshot = BucketConfigSnapshot::new("fresh");
        for kind in [
            CheckKind::Replication,
            CheckKind::ObjectLock,
            CheckKind::TransferAcceleration,
            CheckKind::BucketSize,
        ] {
            assert_eq!(result_for(&snapshot, kind).status, CheckStatus::Pass, "{}", kind);
        }
    }
}
