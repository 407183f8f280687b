use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AdapterError;
use crate::snapshot::BucketConfigSnapshot;

/// Identity of the principal behind the configured credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
    pub user_id: String,
}

/// ストレージ制御プレーンとの境界
///
/// All reads for one bucket are gathered into a single snapshot; fix
/// operations are idempotent and each touches exactly one facet.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// List every bucket visible to the credentials
    async fn list_buckets(&self) -> Result<Vec<String>, AdapterError>;

    /// Read every facet of one bucket.
    ///
    /// Fails with `BucketNotFound` / `AccessDenied` when the bucket itself
    /// cannot be reached; failures of individual facets are recorded on the
    /// snapshot as `Facet::Unavailable` instead.
    async fn fetch_snapshot(&self, bucket: &str) -> Result<BucketConfigSnapshot, AdapterError>;

    async fn verify_credentials(&self) -> Result<CallerIdentity, AdapterError>;

    /// Enable default AES-256 server-side encryption
    async fn enable_encryption(&self, bucket: &str) -> Result<(), AdapterError>;

    async fn enable_versioning(&self, bucket: &str) -> Result<(), AdapterError>;

    /// Turn on all four Public Access Block flags
    async fn block_public_access(&self, bucket: &str) -> Result<(), AdapterError>;
}
