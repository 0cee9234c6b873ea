//! S3 buckets.
//!
//! `list-buckets` only returns names, so each bucket gets four follow-up
//! calls: versioning, default encryption, public access block and
//! lifecycle configuration. A failed follow-up leaves that attribute
//! unverified and its rule is skipped for the bucket.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{probe, Probe, ScanContext, ServiceKind, ServiceScan, ServiceScanner};
use crate::client::{page_items, ApiRequest, ResourceClient};
use crate::error::ScanError;
use crate::recommendation::{Category, Recommendation, Severity};
use crate::resource::{decode_all, ratio, Timestamp};

const VERSIONING: &str = "versioning";
const ENCRYPTION: &str = "encryption";
const PUBLIC_ACCESS_BLOCK: &str = "public_access_block";
const LIFECYCLE: &str = "lifecycle";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawBucket {
    name: String,
    creation_date: Option<Timestamp>,
}

/// Public access block flags. Absent configuration means all `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublicAccessBlock {
    /// Reject new public ACLs.
    #[serde(default)]
    pub block_public_acls: bool,
    /// Ignore existing public ACLs.
    #[serde(default)]
    pub ignore_public_acls: bool,
    /// Reject public bucket policies.
    #[serde(default)]
    pub block_public_policy: bool,
    /// Restrict access under public policies.
    #[serde(default)]
    pub restrict_public_buckets: bool,
}

impl PublicAccessBlock {
    /// Whether all four protections are on.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.block_public_acls
            && self.ignore_public_acls
            && self.block_public_policy
            && self.restrict_public_buckets
    }
}

/// An S3 bucket with its configuration.
#[derive(Debug, Clone, Serialize)]
pub struct S3Bucket {
    /// Bucket name.
    pub name: String,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// `Enabled`, `Suspended` or `Disabled`.
    pub versioning: String,
    /// Default encryption algorithm (`AES256`, `aws:kms`).
    pub encryption: Option<String>,
    /// Public access block.
    pub public_access_block: PublicAccessBlock,
    /// Lifecycle rule count.
    pub lifecycle_rules: usize,
    /// Attributes whose describe call failed.
    pub unverified: Vec<String>,
}

impl S3Bucket {
    /// A bucket with nothing configured.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: None,
            versioning: "Disabled".to_string(),
            encryption: None,
            public_access_block: PublicAccessBlock::default(),
            lifecycle_rules: 0,
            unverified: Vec::new(),
        }
    }

    /// Whether versioning is enabled.
    #[must_use]
    pub fn is_versioned(&self) -> bool {
        self.versioning == "Enabled"
    }

    /// Whether default encryption is configured.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }

    /// Whether all public access is blocked.
    #[must_use]
    pub fn blocks_public_access(&self) -> bool {
        self.public_access_block.is_complete()
    }

    /// Whether any lifecycle rule exists.
    #[must_use]
    pub fn has_lifecycle(&self) -> bool {
        self.lifecycle_rules > 0
    }

    /// Whether `attribute` was read successfully.
    #[must_use]
    pub fn is_verified(&self, attribute: &str) -> bool {
        !self.unverified.iter().any(|a| a == attribute)
    }
}

fn versioning_status(value: &Value) -> String {
    value
        .get("Status")
        .and_then(Value::as_str)
        .unwrap_or("Disabled")
        .to_string()
}

fn encryption_algorithm(value: &Value) -> Option<String> {
    page_items(
        value.get("ServerSideEncryptionConfiguration")?,
        "Rules",
    )
    .iter()
    .find_map(|rule| {
        rule.get("ApplyServerSideEncryptionByDefault")?
            .get("SSEAlgorithm")?
            .as_str()
            .map(String::from)
    })
}

fn public_access_block(value: &Value) -> PublicAccessBlock {
    value
        .get("PublicAccessBlockConfiguration")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}

/// Describe one bucket's configuration.
async fn describe_bucket(
    client: &dyn ResourceClient,
    raw: RawBucket,
    warnings: &mut Vec<String>,
) -> S3Bucket {
    let mut bucket = S3Bucket::new(&raw.name);
    bucket.created_at = raw.creation_date.as_ref().and_then(Timestamp::to_utc);

    let request = |operation: &str| ApiRequest::new("s3api", operation).for_resource("--bucket", &raw.name);

    match probe(client, &request("get-bucket-versioning"), warnings).await {
        Probe::Found(v) => bucket.versioning = versioning_status(&v),
        Probe::Absent => {}
        Probe::Unknown => bucket.unverified.push(VERSIONING.to_string()),
    }

    match probe(client, &request("get-bucket-encryption"), warnings).await {
        Probe::Found(v) => bucket.encryption = encryption_algorithm(&v),
        Probe::Absent => {}
        Probe::Unknown => bucket.unverified.push(ENCRYPTION.to_string()),
    }

    match probe(client, &request("get-public-access-block"), warnings).await {
        Probe::Found(v) => bucket.public_access_block = public_access_block(&v),
        Probe::Absent => {}
        Probe::Unknown => bucket.unverified.push(PUBLIC_ACCESS_BLOCK.to_string()),
    }

    match probe(client, &request("get-bucket-lifecycle-configuration"), warnings).await {
        Probe::Found(v) => bucket.lifecycle_rules = page_items(&v, "Rules").len(),
        Probe::Absent => {}
        Probe::Unknown => bucket.unverified.push(LIFECYCLE.to_string()),
    }

    debug!(bucket = %bucket.name, unverified = bucket.unverified.len(), "Bucket described");
    bucket
}

/// List and describe every bucket.
///
/// # Errors
/// Returns an error if `list-buckets` fails or returns malformed records.
pub async fn fetch(
    client: &dyn ResourceClient,
) -> Result<(Vec<S3Bucket>, Vec<String>), ScanError> {
    let raw: Vec<RawBucket> = decode_all(
        "S3 bucket",
        client
            .list(&ApiRequest::new("s3api", "list-buckets"), "Buckets")
            .await?,
    )?;

    let mut warnings = Vec::new();
    let mut buckets = Vec::with_capacity(raw.len());
    for bucket in raw {
        buckets.push(describe_bucket(client, bucket, &mut warnings).await);
    }
    Ok((buckets, warnings))
}

/// S3 summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct S3Summary {
    /// Buckets.
    pub total: usize,
    /// Buckets with versioning enabled.
    pub versioned: usize,
    /// Buckets with default encryption.
    pub encrypted: usize,
    /// Buckets with every public access protection on.
    pub public_access_blocked: usize,
    /// Share of buckets with public access fully blocked.
    pub public_access_blocked_ratio: f64,
    /// Buckets with lifecycle rules.
    pub with_lifecycle: usize,
    /// Buckets without lifecycle rules.
    pub without_lifecycle: usize,
    /// Buckets with at least one unverified attribute.
    pub partially_verified: usize,
}

/// Count bucket configuration.
#[must_use]
pub fn summarize(buckets: &[S3Bucket]) -> S3Summary {
    let blocked = buckets.iter().filter(|b| b.blocks_public_access()).count();
    let with_lifecycle = buckets.iter().filter(|b| b.has_lifecycle()).count();
    S3Summary {
        total: buckets.len(),
        versioned: buckets.iter().filter(|b| b.is_versioned()).count(),
        encrypted: buckets.iter().filter(|b| b.is_encrypted()).count(),
        public_access_blocked: blocked,
        public_access_blocked_ratio: ratio(blocked, buckets.len()),
        with_lifecycle,
        without_lifecycle: buckets.len() - with_lifecycle,
        partially_verified: buckets.iter().filter(|b| !b.unverified.is_empty()).count(),
    }
}

/// Evaluate S3 rules.
#[must_use]
pub fn recommend(buckets: &[S3Bucket]) -> Vec<Recommendation> {
    let mut recs = Vec::new();

    for bucket in buckets {
        if bucket.is_verified(PUBLIC_ACCESS_BLOCK) && !bucket.blocks_public_access() {
            recs.push(
                Recommendation::new(
                    ServiceKind::S3,
                    Category::Security,
                    Severity::High,
                    "Public access not fully blocked",
                )
                .resource(&bucket.name)
                .description(
                    "Enable all four S3 Block Public Access settings unless the bucket intentionally serves public content.",
                ),
            );
        }

        if bucket.is_verified(ENCRYPTION) && !bucket.is_encrypted() {
            recs.push(
                Recommendation::new(
                    ServiceKind::S3,
                    Category::Security,
                    Severity::Medium,
                    "No default encryption",
                )
                .resource(&bucket.name)
                .description("Configure SSE-S3 or SSE-KMS default encryption on the bucket."),
            );
        }

        if bucket.is_verified(LIFECYCLE) && !bucket.has_lifecycle() {
            let versioned = bucket.is_verified(VERSIONING) && bucket.is_versioned();
            let (title, description) = if versioned {
                (
                    "Versioned bucket without lifecycle rules",
                    "Noncurrent object versions are kept forever. Add a rule expiring noncurrent versions and aborting incomplete multipart uploads.",
                )
            } else {
                (
                    "No lifecycle rules",
                    "Add lifecycle rules to transition infrequently accessed objects to cheaper storage classes or expire them.",
                )
            };
            recs.push(
                Recommendation::new(ServiceKind::S3, Category::Cost, Severity::Low, title)
                    .resource(&bucket.name)
                    .description(description),
            );
        }
    }

    recs
}

/// S3 scanner.
#[derive(Debug, Clone, Copy, Default)]
pub struct S3Scanner;

#[async_trait]
impl ServiceScanner for S3Scanner {
    fn kind(&self) -> ServiceKind {
        ServiceKind::S3
    }

    async fn scan(
        &self,
        client: &dyn ResourceClient,
        _ctx: &ScanContext,
    ) -> Result<ServiceScan, ScanError> {
        let (buckets, warnings) = fetch(client).await?;
        let summary = summarize(&buckets);
        info!(
            total = summary.total,
            public_access_blocked = summary.public_access_blocked,
            warnings = warnings.len(),
            "S3 buckets scanned"
        );
        let recs = recommend(&buckets);
        ServiceScan::build(&buckets, &summary, recs, warnings)
    }
}
