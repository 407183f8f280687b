//! Point-in-time view of one bucket's configuration.
//!
//! Every facet is fetched up front by the storage adapter so that checks can
//! evaluate without performing I/O. A facet distinguishes "not configured"
//! (`Absent`) from "could not be read" (`Unavailable`); the latter always
//! surfaces as an `ERROR` check result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single configuration facet of a bucket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Facet<T> {
    /// The facet exists and was read successfully
    Present(T),
    /// The bucket has no such configuration
    Absent,
    /// Fetching the facet failed; carries the reason
    Unavailable(String),
}

impl<T> Facet<T> {
    pub fn present(&self) -> Option<&T> {
        match self {
            Facet::Present(value) => Some(value),
            _ => None,
        }
    }

    pub fn unavailable_reason(&self) -> Option<&str> {
        match self {
            Facet::Unavailable(reason) => Some(reason),
            _ => None,
        }
    }
}

impl<T> Default for Facet<T> {
    fn default() -> Self {
        Facet::Absent
    }
}

/// Default server-side encryption settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncryptionSettings {
    pub algorithm: String,
    pub kms_key_id: Option<String>,
}

/// A single ACL grant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AclGrant {
    /// CanonicalUser, Group, AmazonCustomerByEmail or an unrecognised type
    pub grantee_type: String,
    pub grantee_id: Option<String>,
    pub grantee_uri: Option<String>,
    pub permission: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AccessControlList {
    pub owner_id: Option<String>,
    pub grants: Vec<AclGrant>,
}

/// Public access block flags; `None` means the control plane did not report the flag
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PublicAccessBlock {
    pub block_public_acls: Option<bool>,
    pub ignore_public_acls: Option<bool>,
    pub block_public_policy: Option<bool>,
    pub restrict_public_buckets: Option<bool>,
}

impl PublicAccessBlock {
    pub fn all_blocked() -> Self {
        Self {
            block_public_acls: Some(true),
            ignore_public_acls: Some(true),
            block_public_policy: Some(true),
            restrict_public_buckets: Some(true),
        }
    }

    /// Names of the flags that are not explicitly enabled
    pub fn disabled_flags(&self) -> Vec<&'static str> {
        [
            ("BlockPublicAcls", self.block_public_acls),
            ("IgnorePublicAcls", self.ignore_public_acls),
            ("BlockPublicPolicy", self.block_public_policy),
            ("RestrictPublicBuckets", self.restrict_public_buckets),
        ]
        .into_iter()
        .filter(|(_, value)| *value != Some(true))
        .map(|(name, _)| name)
        .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum VersioningStatus {
    Enabled,
    Suspended,
    /// Never enabled on this bucket
    Disabled,
    Unknown(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersioningState {
    pub status: VersioningStatus,
    pub mfa_delete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessLogging {
    pub target_bucket: String,
    pub target_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CorsRule {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicationSettings {
    pub role: String,
    pub rule_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectLockSettings {
    pub enabled: bool,
    pub default_mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum AccelerationStatus {
    Enabled,
    Suspended,
    Unknown(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecycleRule {
    pub id: Option<String>,
    /// Raw rule status as reported ("Enabled", "Disabled", ...)
    pub status: String,
}

/// Approximate size obtained by sampling the object listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SizeEstimate {
    pub object_count: u64,
    pub total_bytes: u64,
    /// True when the listing was truncated and the numbers are a lower bound
    pub sampled: bool,
}

impl SizeEstimate {
    pub fn total_megabytes(&self) -> f64 {
        (self.total_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
    }
}

/// Immutable, point-in-time read of one bucket's relevant facets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BucketConfigSnapshot {
    pub bucket_name: String,
    pub fetched_at: DateTime<Utc>,
    pub region: Facet<String>,
    pub encryption: Facet<EncryptionSettings>,
    pub acl: Facet<AccessControlList>,
    pub policy: Facet<String>,
    pub public_access_block: Facet<PublicAccessBlock>,
    pub versioning: Facet<VersioningState>,
    pub logging: Facet<AccessLogging>,
    pub cors: Facet<Vec<CorsRule>>,
    pub replication: Facet<ReplicationSettings>,
    pub object_lock: Facet<ObjectLockSettings>,
    pub transfer_acceleration: Facet<AccelerationStatus>,
    pub tags: Facet<Vec<Tag>>,
    pub lifecycle: Facet<Vec<LifecycleRule>>,
    pub size: Facet<SizeEstimate>,
}

impl BucketConfigSnapshot {
    /// Snapshot of a bucket with nothing configured
    pub fn new(bucket_name: &str) -> Self {
        Self {
            bucket_name: bucket_name.to_string(),
            fetched_at: Utc::now(),
            region: Facet::Absent,
            encryption: Facet::Absent,
            acl: Facet::Present(AccessControlList::default()),
            policy: Facet::Absent,
            public_access_block: Facet::Absent,
            versioning: Facet::Present(VersioningState {
                status: VersioningStatus::Disabled,
                mfa_delete: false,
            }),
            logging: Facet::Absent,
            cors: Facet::Absent,
            replication: Facet::Absent,
            object_lock: Facet::Absent,
            transfer_acceleration: Facet::Absent,
            tags: Facet::Absent,
            lifecycle: Facet::Absent,
            size: Facet::Present(SizeEstimate {
                object_count: 0,
                total_bytes: 0,
                sampled: false,
            }),
        }
    }

    /// Names of facets that could not be fetched
    pub fn unavailable_facets(&self) -> Vec<&'static str> {
        let facets: [(&'static str, bool); 14] = [
            ("region", self.region.unavailable_reason().is_some()),
            ("encryption", self.encryption.unavailable_reason().is_some()),
            ("acl", self.acl.unavailable_reason().is_some()),
            ("policy", self.policy.unavailable_reason().is_some()),
            ("public_access_block", self.public_access_block.unavailable_reason().is_some()),
            ("versioning", self.versioning.unavailable_reason().is_some()),
            ("logging", self.logging.unavailable_reason().is_some()),
            ("cors", self.cors.unavailable_reason().is_some()),
            ("replication", self.replication.unavailable_reason().is_some()),
            ("object_lock", self.object_lock.unavailable_reason().is_some()),
            ("transfer_acceleration", self.transfer_acceleration.unavailable_reason().is_some()),
            ("tags", self.tags.unavailable_reason().is_some()),
            ("lifecycle", self.lifecycle.unavailable_reason().is_some()),
            ("size", self.size.unavailable_reason().is_some()),
        ];
        facets
            .into_iter()
            .filter(|(_, unavailable)| *unavailable)
            .map(|(name, _)| name)
            .collect()
    }
}
