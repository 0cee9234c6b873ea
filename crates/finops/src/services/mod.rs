//! Service catalog.
//!
//! Every service follows the same shape:
//!
//! 1. `fetch` - list/describe calls through the [`ResourceClient`], mapped to typed records
//! 2. `summarize` - pure counting over the records
//! 3. `recommend` - fixed threshold rules over the records
//!
//! [`ServiceScanner`] ties the three together for the report runner.

pub mod dynamodb;
pub mod ebs;
pub mod ec2;
pub mod ecr;
pub mod eks;
pub mod elasticache;
pub mod eip;
pub mod lambda;
pub mod load_balancer;
pub mod logs;
pub mod nat;
pub mod rds;
pub mod s3;
pub mod snapshots;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::client::{ApiRequest, ResourceClient};
use crate::config::{FinopsConfig, Thresholds};
use crate::error::ScanError;
use crate::recommendation::{Category, Recommendation, Severity};
use crate::resource::missing_tags;
use crate::resource::Tag;

/// Supported services.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum ServiceKind {
    /// EC2 instances.
    Ec2,
    /// EBS volumes.
    Ebs,
    /// EBS snapshots owned by the account.
    EbsSnapshots,
    /// Elastic IP addresses.
    ElasticIp,
    /// NAT gateways.
    NatGateway,
    /// S3 buckets.
    S3,
    /// RDS database instances.
    Rds,
    /// Lambda functions.
    Lambda,
    /// DynamoDB tables.
    Dynamodb,
    /// Application, network and gateway load balancers.
    LoadBalancer,
    /// CloudWatch Logs log groups.
    CloudwatchLogs,
    /// ECR repositories.
    Ecr,
    /// EKS clusters.
    Eks,
    /// ElastiCache clusters.
    Elasticache,
}

impl ServiceKind {
    /// Every supported service, in report order.
    pub const ALL: [Self; 14] = [
        Self::Ec2,
        Self::Ebs,
        Self::EbsSnapshots,
        Self::ElasticIp,
        Self::NatGateway,
        Self::S3,
        Self::Rds,
        Self::Lambda,
        Self::Dynamodb,
        Self::LoadBalancer,
        Self::CloudwatchLogs,
        Self::Ecr,
        Self::Eks,
        Self::Elasticache,
    ];

    /// Stable name used in config, CLI and reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ec2 => "ec2",
            Self::Ebs => "ebs",
            Self::EbsSnapshots => "ebs_snapshots",
            Self::ElasticIp => "elastic_ip",
            Self::NatGateway => "nat_gateway",
            Self::S3 => "s3",
            Self::Rds => "rds",
            Self::Lambda => "lambda",
            Self::Dynamodb => "dynamodb",
            Self::LoadBalancer => "load_balancer",
            Self::CloudwatchLogs => "cloudwatch_logs",
            Self::Ecr => "ecr",
            Self::Eks => "eks",
            Self::Elasticache => "elasticache",
        }
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Ec2 => "EC2 instances",
            Self::Ebs => "EBS volumes",
            Self::EbsSnapshots => "EBS snapshots owned by this account",
            Self::ElasticIp => "Elastic IP addresses",
            Self::NatGateway => "VPC NAT gateways",
            Self::S3 => "S3 buckets",
            Self::Rds => "RDS database instances",
            Self::Lambda => "Lambda functions",
            Self::Dynamodb => "DynamoDB tables",
            Self::LoadBalancer => "Elastic Load Balancing v2 load balancers",
            Self::CloudwatchLogs => "CloudWatch Logs log groups",
            Self::Ecr => "ECR repositories",
            Self::Eks => "EKS clusters",
            Self::Elasticache => "ElastiCache clusters",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| format!("unknown service: {s}"))
    }
}

/// Inputs shared by every rule.
#[derive(Debug, Clone)]
pub struct ScanContext {
    /// Region being scanned, when known.
    pub region: Option<String>,
    /// Reference time for age computations.
    pub now: DateTime<Utc>,
    /// Rule thresholds.
    pub thresholds: Thresholds,
    /// Tag keys every taggable resource should carry.
    pub required_tags: Vec<String>,
}

impl ScanContext {
    /// Context with default thresholds and no tag policy.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            region: None,
            now,
            thresholds: Thresholds::default(),
            required_tags: Vec::new(),
        }
    }

    /// Context derived from configuration.
    #[must_use]
    pub fn from_config(config: &FinopsConfig, now: DateTime<Utc>) -> Self {
        Self {
            region: config.region.clone(),
            now,
            thresholds: config.thresholds.clone(),
            required_tags: config.required_tags.clone(),
        }
    }

    /// Set the required tag keys.
    #[must_use]
    pub fn with_required_tags(mut self, tags: Vec<String>) -> Self {
        self.required_tags = tags;
        self
    }

    /// Set the thresholds.
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }
}

/// Result of scanning one service.
#[derive(Debug, Clone, Default)]
pub struct ServiceScan {
    /// Normalized resource records.
    pub resources: Vec<Value>,
    /// Aggregated summary.
    pub summary: Value,
    /// Rule findings.
    pub recommendations: Vec<Recommendation>,
    /// Non-fatal problems (failed per-resource describe calls).
    pub warnings: Vec<String>,
}

impl ServiceScan {
    /// Serialize typed records and summary into a scan result.
    ///
    /// # Errors
    /// Returns [`ScanError::Encode`] if serialization fails.
    pub fn build<R: Serialize, S: Serialize>(
        records: &[R],
        summary: &S,
        recommendations: Vec<Recommendation>,
        warnings: Vec<String>,
    ) -> Result<Self, ScanError> {
        let resources = records
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(ScanError::Encode)?;
        let summary = serde_json::to_value(summary).map_err(ScanError::Encode)?;
        Ok(Self {
            resources,
            summary,
            recommendations,
            warnings,
        })
    }
}

/// A service module: fetch, summarize, recommend.
#[async_trait]
pub trait ServiceScanner: Send + Sync {
    /// Service this scanner covers.
    fn kind(&self) -> ServiceKind;

    /// Enumerate resources and evaluate the rules.
    async fn scan(
        &self,
        client: &dyn ResourceClient,
        ctx: &ScanContext,
    ) -> Result<ServiceScan, ScanError>;
}

/// Scanner for a service.
#[must_use]
pub fn scanner_for(kind: ServiceKind) -> Box<dyn ServiceScanner> {
    match kind {
        ServiceKind::Ec2 => Box::new(ec2::Ec2Scanner),
        ServiceKind::Ebs => Box::new(ebs::EbsScanner),
        ServiceKind::EbsSnapshots => Box::new(snapshots::SnapshotScanner),
        ServiceKind::ElasticIp => Box::new(eip::ElasticIpScanner),
        ServiceKind::NatGateway => Box::new(nat::NatGatewayScanner),
        ServiceKind::S3 => Box::new(s3::S3Scanner),
        ServiceKind::Rds => Box::new(rds::RdsScanner),
        ServiceKind::Lambda => Box::new(lambda::LambdaScanner),
        ServiceKind::Dynamodb => Box::new(dynamodb::DynamoDbScanner),
        ServiceKind::LoadBalancer => Box::new(load_balancer::LoadBalancerScanner),
        ServiceKind::CloudwatchLogs => Box::new(logs::LogGroupScanner),
        ServiceKind::Ecr => Box::new(ecr::EcrScanner),
        ServiceKind::Eks => Box::new(eks::EksScanner),
        ServiceKind::Elasticache => Box::new(elasticache::ElastiCacheScanner),
    }
}

/// Scanners for a list of services, in the given order.
#[must_use]
pub fn scanners(kinds: &[ServiceKind]) -> Vec<Box<dyn ServiceScanner>> {
    kinds.iter().copied().map(scanner_for).collect()
}

/// Outcome of a per-resource describe call.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Probe {
    /// The call answered.
    Found(Value),
    /// The subject does not exist (no policy, no configuration).
    Absent,
    /// The call failed; the attribute is unknown.
    Unknown,
}

/// Run a per-resource describe call, recording failures as warnings.
pub(crate) async fn probe(
    client: &dyn ResourceClient,
    request: &ApiRequest,
    warnings: &mut Vec<String>,
) -> Probe {
    match client.call(request).await {
        Ok(value) => Probe::Found(value),
        Err(e) if e.is_not_found() => Probe::Absent,
        Err(e) => {
            warn!(request = %request, error = %e, "Describe call failed");
            warnings.push(format!("{request}: {e}"));
            Probe::Unknown
        }
    }
}

/// Tag-policy finding shared by the taggable services.
pub(crate) fn tag_policy_recommendation(
    service: ServiceKind,
    resource_id: &str,
    tags: &[Tag],
    ctx: &ScanContext,
) -> Option<Recommendation> {
    let missing = missing_tags(tags, &ctx.required_tags);
    if missing.is_empty() {
        return None;
    }
    Some(
        Recommendation::new(
            service,
            Category::Operations,
            Severity::Low,
            "Missing required tags",
        )
        .resource(resource_id)
        .description(format!(
            "Resource is missing required tags: {}. Untagged resources cannot be attributed to an owner or cost center.",
            missing.join(", ")
        )),
    )
}
