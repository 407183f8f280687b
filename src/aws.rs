use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{
    BucketAccelerateStatus, BucketVersioningStatus, MfaDeleteStatus, ObjectLockEnabled,
    PublicAccessBlockConfiguration, ServerSideEncryption, ServerSideEncryptionByDefault,
    ServerSideEncryptionConfiguration, ServerSideEncryptionRule, VersioningConfiguration,
};
use aws_sdk_s3::Client as S3Client;
use aws_sdk_sts::Client as StsClient;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::AwsConfig;
use crate::error::AdapterError;
use crate::snapshot::{
    AccelerationStatus, AccessControlList, AccessLogging, AclGrant, BucketConfigSnapshot, CorsRule,
    EncryptionSettings, Facet, LifecycleRule, ObjectLockSettings, PublicAccessBlock, ReplicationSettings,
    SizeEstimate, Tag, VersioningState, VersioningStatus,
};
use crate::storage::{CallerIdentity, StorageAdapter};

/// Region assumed when none is configured or reported
const DEFAULT_REGION: &str = "us-east-1";

/// Header S3 sets on responses for buckets outside the request's region
const BUCKET_REGION_HEADER: &str = "x-amz-bucket-region";

const REDIRECT_STATUSES: &[u16] = &[301, 307];

/// Objects listed when estimating bucket size
pub const SIZE_SAMPLE_LIMIT: i32 = 1000;

/// Error codes meaning "this bucket has no such configuration"
const ABSENT_CODES: &[&str] = &[
    "NoSuchBucketPolicy",
    "NoSuchPublicAccessBlockConfiguration",
    "ServerSideEncryptionConfigurationNotFoundError",
    "NoSuchCORSConfiguration",
    "ReplicationConfigurationNotFoundError",
    "ObjectLockConfigurationNotFoundError",
    "NoSuchTagSet",
    "NoSuchLifecycleConfiguration",
];

const THROTTLE_CODES: &[&str] = &["SlowDown", "Throttling", "ThrottlingException", "RequestLimitExceeded"];

const CREDENTIAL_CODES: &[&str] = &[
    "InvalidAccessKeyId",
    "SignatureDoesNotMatch",
    "ExpiredToken",
    "InvalidToken",
    "InvalidClientTokenId",
];

/// AWS SDK 設定を読み込み（リトライとタイムアウトを含む）
pub async fn load_sdk_config(settings: &AwsConfig) -> SdkConfig {
    info!(
        "Loading AWS configuration with region: {}, profile: {:?}",
        settings.region, settings.profile
    );

    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(settings.region.clone()))
        .retry_config(RetryConfig::standard().with_max_attempts(settings.max_attempts))
        .timeout_config(
            TimeoutConfig::builder()
                .operation_timeout(Duration::from_secs(settings.operation_timeout_secs))
                .build(),
        );

    if let Some(ref profile_name) = settings.profile {
        loader = loader.profile_name(profile_name);
    }

    loader.load().await
}

/// S3 / STS 上のストレージアダプタ
#[derive(Debug, Clone)]
pub struct S3StorageAdapter {
    pub s3_client: S3Client,
    pub sts_client: StsClient,
    region: String,
    sdk_config: SdkConfig,
    /// Clients for buckets outside `region`, keyed by region
    regional_clients: Arc<Mutex<HashMap<String, S3Client>>>,
    /// Resolved home region per bucket
    bucket_regions: Arc<Mutex<HashMap<String, String>>>,
}

impl S3StorageAdapter {
    pub async fn new(settings: &AwsConfig) -> Self {
        let config = load_sdk_config(settings).await;
        let adapter = Self::from_sdk_config(&config);
        debug!("AWS clients initialized successfully");
        adapter
    }

    pub fn from_sdk_config(config: &SdkConfig) -> Self {
        let region = config
            .region()
            .map(|r| r.as_ref().to_string())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        Self {
            s3_client: S3Client::new(config),
            sts_client: StsClient::new(config),
            region,
            sdk_config: config.clone(),
            regional_clients: Arc::new(Mutex::new(HashMap::new())),
            bucket_regions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// S3 client bound to `region`, built once and cached
    pub fn client_for_region(&self, region: &str) -> S3Client {
        if region == self.region {
            return self.s3_client.clone();
        }
        let mut clients = lock(&self.regional_clients);
        clients
            .entry(region.to_string())
            .or_insert_with(|| {
                debug!(region = %region, "Building regional S3 client");
                let conf = aws_sdk_s3::config::Builder::from(&self.sdk_config)
                    .region(Region::new(region.to_string()))
                    .build();
                S3Client::from_conf(conf)
            })
            .clone()
    }

    /// Client for the bucket's home region, checking existence and access on the way
    async fn locate_bucket(&self, bucket: &str) -> Result<S3Client, AdapterError> {
        let known = lock(&self.bucket_regions).get(bucket).cloned();
        let client = match known {
            Some(region) => self.client_for_region(&region),
            None => self.s3_client.clone(),
        };

        match head_bucket(&client, bucket).await {
            Ok(()) => Ok(client),
            Err(AdapterError::WrongRegion { region, .. }) => {
                let region = match region {
                    Some(region) => region,
                    None => self.lookup_region(bucket).await?,
                };
                info!(bucket = %bucket, region = %region, "Bucket lives outside {}; switching region", self.region);
                let regional = self.client_for_region(&region);
                match head_bucket(&regional, bucket).await {
                    Ok(()) => {
                        lock(&self.bucket_regions).insert(bucket.to_string(), region);
                        Ok(regional)
                    }
                    Err(AdapterError::WrongRegion { .. }) => Err(AdapterError::WrongRegion {
                        bucket: bucket.to_string(),
                        region: Some(region),
                    }),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Home region from GetBucketLocation, for redirects that carry no region header
    async fn lookup_region(&self, bucket: &str) -> Result<String, AdapterError> {
        match self.s3_client.get_bucket_location().bucket(bucket).send().await {
            Ok(out) => Ok(location_to_region(out.location_constraint().map(|c| c.as_str()))),
            Err(err) => {
                warn!(bucket = %bucket, error = %DisplayErrorContext(&err), "Could not resolve bucket region");
                Err(AdapterError::WrongRegion {
                    bucket: bucket.to_string(),
                    region: None,
                })
            }
        }
    }

    async fn fetch_region(client: &S3Client, bucket: &str) -> Facet<String> {
        let result = client.get_bucket_location().bucket(bucket).send().await;
        to_facet(result, bucket, "GetBucketLocation", |out| {
            out.location_constraint()
                .map(|c| c.as_str())
                .filter(|c| !c.is_empty())
                .map(|c| location_to_region(Some(c)))
        })
    }

    async fn fetch_encryption(client: &S3Client, bucket: &str) -> Facet<EncryptionSettings> {
        let result = client.get_bucket_encryption().bucket(bucket).send().await;
        to_facet(result, bucket, "GetBucketEncryption", |out| {
            out.server_side_encryption_configuration()
                .and_then(|config| config.rules().first())
                .and_then(|rule| rule.apply_server_side_encryption_by_default())
                .map(|default| EncryptionSettings {
                    algorithm: default.sse_algorithm().as_str().to_string(),
                    kms_key_id: default.kms_master_key_id().map(str::to_string),
                })
        })
    }

    async fn fetch_acl(client: &S3Client, bucket: &str) -> Facet<AccessControlList> {
        let result = client.get_bucket_acl().bucket(bucket).send().await;
        to_facet(result, bucket, "GetBucketAcl", |out| {
            let grants = out
                .grants()
                .iter()
                .filter_map(|grant| {
                    let grantee = grant.grantee()?;
                    Some(AclGrant {
                        grantee_type: grantee.r#type().as_str().to_string(),
                        grantee_id: grantee.id().map(str::to_string),
                        grantee_uri: grantee.uri().map(str::to_string),
                        permission: grant
                            .permission()
                            .map(|p| p.as_str().to_string())
                            .unwrap_or_default(),
                    })
                })
                .collect();
            Some(AccessControlList {
                owner_id: out.owner().and_then(|o| o.id()).map(str::to_string),
                grants,
            })
        })
    }

    async fn fetch_policy(client: &S3Client, bucket: &str) -> Facet<String> {
        let result = client.get_bucket_policy().bucket(bucket).send().await;
        to_facet(result, bucket, "GetBucketPolicy", |out| out.policy().map(str::to_string))
    }

    async fn fetch_public_access_block(client: &S3Client, bucket: &str) -> Facet<PublicAccessBlock> {
        let result = client.get_public_access_block().bucket(bucket).send().await;
        to_facet(result, bucket, "GetPublicAccessBlock", |out| {
            out.public_access_block_configuration().map(|c| PublicAccessBlock {
                block_public_acls: c.block_public_acls(),
                ignore_public_acls: c.ignore_public_acls(),
                block_public_policy: c.block_public_policy(),
                restrict_public_buckets: c.restrict_public_buckets(),
            })
        })
    }

    async fn fetch_versioning(client: &S3Client, bucket: &str) -> Facet<VersioningState> {
        let result = client.get_bucket_versioning().bucket(bucket).send().await;
        to_facet(result, bucket, "GetBucketVersioning", |out| {
            let status = match out.status() {
                Some(BucketVersioningStatus::Enabled) => VersioningStatus::Enabled,
                Some(BucketVersioningStatus::Suspended) => VersioningStatus::Suspended,
                Some(other) => VersioningStatus::Unknown(other.as_str().to_string()),
                None => VersioningStatus::Disabled,
            };
            Some(VersioningState {
                status,
                mfa_delete: matches!(out.mfa_delete(), Some(MfaDeleteStatus::Enabled)),
            })
        })
    }

    async fn fetch_logging(client: &S3Client, bucket: &str) -> Facet<AccessLogging> {
        let result = client.get_bucket_logging().bucket(bucket).send().await;
        to_facet(result, bucket, "GetBucketLogging", |out| {
            out.logging_enabled().map(|l| AccessLogging {
                target_bucket: l.target_bucket().to_string(),
                target_prefix: l.target_prefix().to_string(),
            })
        })
    }

    async fn fetch_cors(client: &S3Client, bucket: &str) -> Facet<Vec<CorsRule>> {
        let result = client.get_bucket_cors().bucket(bucket).send().await;
        to_facet(result, bucket, "GetBucketCors", |out| {
            Some(
                out.cors_rules()
                    .iter()
                    .map(|rule| CorsRule {
                        allowed_origins: rule.allowed_origins().to_vec(),
                        allowed_methods: rule.allowed_methods().to_vec(),
                        allowed_headers: rule.allowed_headers().to_vec(),
                    })
                    .collect(),
            )
        })
    }

    async fn fetch_replication(client: &S3Client, bucket: &str) -> Facet<ReplicationSettings> {
        let result = client.get_bucket_replication().bucket(bucket).send().await;
        to_facet(result, bucket, "GetBucketReplication", |out| {
            out.replication_configuration().map(|c| ReplicationSettings {
                role: c.role().to_string(),
                rule_count: c.rules().len(),
            })
        })
    }

    async fn fetch_object_lock(client: &S3Client, bucket: &str) -> Facet<ObjectLockSettings> {
        let result = client
            .get_object_lock_configuration()
            .bucket(bucket)
            .send()
            .await;
        to_facet(result, bucket, "GetObjectLockConfiguration", |out| {
            out.object_lock_configuration().map(|c| ObjectLockSettings {
                enabled: matches!(c.object_lock_enabled(), Some(ObjectLockEnabled::Enabled)),
                default_mode: c
                    .rule()
                    .and_then(|r| r.default_retention())
                    .and_then(|d| d.mode())
                    .map(|m| m.as_str().to_string()),
            })
        })
    }

    async fn fetch_acceleration(client: &S3Client, bucket: &str) -> Facet<AccelerationStatus> {
        let result = client
            .get_bucket_accelerate_configuration()
            .bucket(bucket)
            .send()
            .await;
        to_facet(result, bucket, "GetBucketAccelerateConfiguration", |out| {
            out.status().map(|s| match s {
                BucketAccelerateStatus::Enabled => AccelerationStatus::Enabled,
                BucketAccelerateStatus::Suspended => AccelerationStatus::Suspended,
                other => AccelerationStatus::Unknown(other.as_str().to_string()),
            })
        })
    }

    async fn fetch_tags(client: &S3Client, bucket: &str) -> Facet<Vec<Tag>> {
        let result = client.get_bucket_tagging().bucket(bucket).send().await;
        to_facet(result, bucket, "GetBucketTagging", |out| {
            Some(out.tag_set().iter().map(|t| Tag::new(t.key(), t.value())).collect())
        })
    }

    async fn fetch_lifecycle(client: &S3Client, bucket: &str) -> Facet<Vec<LifecycleRule>> {
        let result = client
            .get_bucket_lifecycle_configuration()
            .bucket(bucket)
            .send()
            .await;
        to_facet(result, bucket, "GetBucketLifecycleConfiguration", |out| {
            Some(
                out.rules()
                    .iter()
                    .map(|r| LifecycleRule {
                        id: r.id().map(str::to_string),
                        status: r.status().as_str().to_string(),
                    })
                    .collect(),
            )
        })
    }

    async fn fetch_size(client: &S3Client, bucket: &str) -> Facet<SizeEstimate> {
        let result = client
            .list_objects_v2()
            .bucket(bucket)
            .max_keys(SIZE_SAMPLE_LIMIT)
            .send()
            .await;
        to_facet(result, bucket, "ListObjectsV2", |out| {
            let objects = out.contents();
            Some(SizeEstimate {
                object_count: objects.len() as u64,
                total_bytes: objects
                    .iter()
                    .map(|o| o.size().unwrap_or(0).max(0) as u64)
                    .sum(),
                sampled: out.is_truncated().unwrap_or(false),
            })
        })
    }
}

#[async_trait]
impl StorageAdapter for S3StorageAdapter {
    async fn list_buckets(&self) -> Result<Vec<String>, AdapterError> {
        let output = self
            .s3_client
            .list_buckets()
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e, "*", "ListBuckets"))?;
        let names: Vec<String> = output
            .buckets()
            .iter()
            .filter_map(|b| b.name().map(str::to_string))
            .collect();
        debug!("Listed {} buckets", names.len());
        Ok(names)
    }

    async fn fetch_snapshot(&self, bucket: &str) -> Result<BucketConfigSnapshot, AdapterError> {
        let client = self.locate_bucket(bucket).await?;

        let (
            region,
            encryption,
            acl,
            policy,
            public_access_block,
            versioning,
            logging,
            cors,
            replication,
            object_lock,
            transfer_acceleration,
            tags,
            lifecycle,
            size,
        ) = tokio::join!(
            Self::fetch_region(&client, bucket),
            Self::fetch_encryption(&client, bucket),
            Self::fetch_acl(&client, bucket),
            Self::fetch_policy(&client, bucket),
            Self::fetch_public_access_block(&client, bucket),
            Self::fetch_versioning(&client, bucket),
            Self::fetch_logging(&client, bucket),
            Self::fetch_cors(&client, bucket),
            Self::fetch_replication(&client, bucket),
            Self::fetch_object_lock(&client, bucket),
            Self::fetch_acceleration(&client, bucket),
            Self::fetch_tags(&client, bucket),
            Self::fetch_lifecycle(&client, bucket),
            Self::fetch_size(&client, bucket),
        );

        let snapshot = BucketConfigSnapshot {
            bucket_name: bucket.to_string(),
            fetched_at: chrono::Utc::now(),
            region,
            encryption,
            acl,
            policy,
            public_access_block,
            versioning,
            logging,
            cors,
            replication,
            object_lock,
            transfer_acceleration,
            tags,
            lifecycle,
            size,
        };

        let unavailable = snapshot.unavailable_facets();
        if !unavailable.is_empty() {
            warn!(bucket = %bucket, facets = ?unavailable, "Some bucket facets could not be read");
        }
        Ok(snapshot)
    }

    async fn verify_credentials(&self) -> Result<CallerIdentity, AdapterError> {
        let output = self
            .sts_client
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| match classify_sdk_error(&e, "*", "GetCallerIdentity") {
                AdapterError::AccessDenied { .. } | AdapterError::Service { .. } => AdapterError::Credentials {
                    message: DisplayErrorContext(&e).to_string(),
                },
                other => other,
            })?;
        Ok(CallerIdentity {
            account: output.account().unwrap_or_default().to_string(),
            arn: output.arn().unwrap_or_default().to_string(),
            user_id: output.user_id().unwrap_or_default().to_string(),
        })
    }

    async fn enable_encryption(&self, bucket: &str) -> Result<(), AdapterError> {
        let by_default = ServerSideEncryptionByDefault::builder()
            .sse_algorithm(ServerSideEncryption::Aes256)
            .build()
            .map_err(|e| build_error("PutBucketEncryption", e))?;
        let rule = ServerSideEncryptionRule::builder()
            .apply_server_side_encryption_by_default(by_default)
            .bucket_key_enabled(true)
            .build();
        let configuration = ServerSideEncryptionConfiguration::builder()
            .rules(rule)
            .build()
            .map_err(|e| build_error("PutBucketEncryption", e))?;

        let client = self.locate_bucket(bucket).await?;
        client
            .put_bucket_encryption()
            .bucket(bucket)
            .server_side_encryption_configuration(configuration)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e, bucket, "PutBucketEncryption"))?;
        info!(bucket = %bucket, "Enabled AES-256 default encryption");
        Ok(())
    }

    async fn enable_versioning(&self, bucket: &str) -> Result<(), AdapterError> {
        let configuration = VersioningConfiguration::builder()
            .status(BucketVersioningStatus::Enabled)
            .build();
        let client = self.locate_bucket(bucket).await?;
        client
            .put_bucket_versioning()
            .bucket(bucket)
            .versioning_configuration(configuration)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e, bucket, "PutBucketVersioning"))?;
        info!(bucket = %bucket, "Enabled versioning");
        Ok(())
    }

    async fn block_public_access(&self, bucket: &str) -> Result<(), AdapterError> {
        let configuration = PublicAccessBlockConfiguration::builder()
            .block_public_acls(true)
            .ignore_public_acls(true)
            .block_public_policy(true)
            .restrict_public_buckets(true)
            .build();
        let client = self.locate_bucket(bucket).await?;
        client
            .put_public_access_block()
            .bucket(bucket)
            .public_access_block_configuration(configuration)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e, bucket, "PutPublicAccessBlock"))?;
        info!(bucket = %bucket, "Enabled all Public Access Block settings");
        Ok(())
    }
}

/// バケットの存在とアクセス権を確認
async fn head_bucket(client: &S3Client, bucket: &str) -> Result<(), AdapterError> {
    match client.head_bucket().bucket(bucket).send().await {
        Ok(_) => Ok(()),
        Err(SdkError::ServiceError(service_err)) => {
            let raw = service_err.raw();
            let status = raw.status().as_u16();
            let client_region = client.config().region().map(|r| r.as_ref().to_string());
            if let Some(region) = redirect_region(status, raw.headers().get(BUCKET_REGION_HEADER), client_region.as_deref()) {
                return Err(AdapterError::WrongRegion {
                    bucket: bucket.to_string(),
                    region,
                });
            }
            match status {
                404 => Err(AdapterError::BucketNotFound {
                    bucket: bucket.to_string(),
                }),
                403 => Err(AdapterError::AccessDenied {
                    bucket: bucket.to_string(),
                    operation: "HeadBucket".to_string(),
                }),
                _ if service_err.err().is_not_found() => Err(AdapterError::BucketNotFound {
                    bucket: bucket.to_string(),
                }),
                _ => Err(AdapterError::Service {
                    operation: "HeadBucket".to_string(),
                    message: format!("HTTP {}", status),
                }),
            }
        }
        Err(err) => Err(classify_sdk_error(&err, bucket, "HeadBucket")),
    }
}

/// Decide whether a HeadBucket response means the bucket lives in another region.
///
/// `None` means no redirect. `Some(None)` is a redirect whose target region is
/// unknown; `Some(Some(r))` names the bucket's home region.
fn redirect_region(status: u16, header: Option<&str>, client_region: Option<&str>) -> Option<Option<String>> {
    let header = header.map(str::trim).filter(|r| !r.is_empty());
    match header {
        Some(region) if Some(region) != client_region => Some(Some(region.to_string())),
        Some(_) => None,
        None if REDIRECT_STATUSES.contains(&status) => Some(None),
        None => None,
    }
}

/// GetBucketLocation constraint to region name
fn location_to_region(constraint: Option<&str>) -> String {
    match constraint {
        None | Some("") => DEFAULT_REGION.to_string(),
        Some("EU") => "eu-west-1".to_string(),
        Some(region) => region.to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Map a facet read to `Present`, `Absent` or `Unavailable`
fn to_facet<O, T, E, R, F>(result: Result<O, SdkError<E, R>>, bucket: &str, operation: &str, extract: F) -> Facet<T>
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
    F: FnOnce(&O) -> Option<T>,
{
    match result {
        Ok(output) => match extract(&output) {
            Some(value) => Facet::Present(value),
            None => Facet::Absent,
        },
        Err(err) => {
            if err.code().map(|c| ABSENT_CODES.contains(&c)).unwrap_or(false) {
                return Facet::Absent;
            }
            let classified = classify_sdk_error(&err, bucket, operation);
            debug!(bucket = %bucket, operation = %operation, error = %classified, "Facet unavailable");
            Facet::Unavailable(classified.to_string())
        }
    }
}

/// Classify an SDK failure into the adapter error taxonomy
pub fn classify_sdk_error<E, R>(err: &SdkError<E, R>, bucket: &str, operation: &str) -> AdapterError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err {
        SdkError::TimeoutError(_) => AdapterError::Timeout {
            operation: operation.to_string(),
        },
        SdkError::DispatchFailure(failure) if failure.is_timeout() => AdapterError::Timeout {
            operation: operation.to_string(),
        },
        SdkError::DispatchFailure(failure) if failure.is_io() => AdapterError::Network {
            operation: operation.to_string(),
            message: format!("{:?}", failure),
        },
        SdkError::DispatchFailure(failure) => AdapterError::Unreachable {
            message: format!("{} dispatch failure: {:?}", operation, failure),
        },
        SdkError::ConstructionFailure(_) => AdapterError::Credentials {
            message: DisplayErrorContext(err).to_string(),
        },
        _ => match err.code() {
            Some("NoSuchBucket") => AdapterError::BucketNotFound {
                bucket: bucket.to_string(),
            },
            Some("AccessDenied") | Some("AllAccessDisabled") => AdapterError::AccessDenied {
                bucket: bucket.to_string(),
                operation: operation.to_string(),
            },
            Some(code) if THROTTLE_CODES.contains(&code) => AdapterError::Throttled {
                operation: operation.to_string(),
            },
            Some(code) if CREDENTIAL_CODES.contains(&code) => AdapterError::Credentials {
                message: err.message().unwrap_or(code).to_string(),
            },
            _ => AdapterError::Service {
                operation: operation.to_string(),
                message: DisplayErrorContext(err).to_string(),
            },
        },
    }
}

fn build_error(operation: &str, err: aws_sdk_s3::error::BuildError) -> AdapterError {
    AdapterError::Service {
        operation: operation.to_string(),
        message: err.to_string(),
    }
}
