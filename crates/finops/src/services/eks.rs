//! EKS clusters.
//!
//! Clusters on a Kubernetes minor version past standard support are billed
//! the extended-support rate for the control plane.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{
    probe, tag_policy_recommendation, Probe, ScanContext, ServiceKind, ServiceScan,
    ServiceScanner,
};
use crate::client::{ApiRequest, ResourceClient};
use crate::config::parse_minor_version;
use crate::error::ScanError;
use crate::pricing;
use crate::recommendation::{Category, Recommendation, Severity};
use crate::resource::{decode_all, decode_one, Tag, Timestamp};

const OPEN_CIDR: &str = "0.0.0.0/0";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCluster {
    name: String,
    arn: Option<String>,
    version: String,
    status: String,
    endpoint: Option<String>,
    resources_vpc_config: Option<RawVpcConfig>,
    created_at: Option<Timestamp>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVpcConfig {
    vpc_id: Option<String>,
    #[serde(default)]
    endpoint_public_access: bool,
    #[serde(default)]
    endpoint_private_access: bool,
    #[serde(default)]
    public_access_cidrs: Vec<String>,
}

/// An EKS cluster.
///
/// A cluster whose description could not be read keeps only its name;
/// `described` is false and no rule is evaluated for it.
#[derive(Debug, Clone, Serialize)]
pub struct EksCluster {
    /// Cluster name.
    pub name: String,
    /// Whether `describe-cluster` succeeded.
    pub described: bool,
    /// Cluster ARN.
    pub arn: Option<String>,
    /// Kubernetes version (`1.29`).
    pub version: Option<String>,
    /// Cluster status.
    pub status: Option<String>,
    /// API server endpoint.
    pub endpoint: Option<String>,
    /// VPC ID.
    pub vpc_id: Option<String>,
    /// Public API endpoint enabled.
    pub endpoint_public_access: bool,
    /// Private API endpoint enabled.
    pub endpoint_private_access: bool,
    /// CIDRs allowed to reach the public endpoint.
    pub public_access_cidrs: Vec<String>,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// Tags.
    pub tags: Vec<Tag>,
    /// Version is past standard support.
    pub extended_support: bool,
}

impl EksCluster {
    /// A listed cluster whose description could not be read.
    #[must_use]
    pub fn undescribed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            described: false,
            arn: None,
            version: None,
            status: None,
            endpoint: None,
            vpc_id: None,
            endpoint_public_access: false,
            endpoint_private_access: false,
            public_access_cidrs: Vec::new(),
            created_at: None,
            tags: Vec::new(),
            extended_support: false,
        }
    }

    /// Whether the cluster is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.as_deref() == Some("ACTIVE")
    }

    /// Whether the public endpoint accepts any source address.
    #[must_use]
    pub fn has_open_endpoint(&self) -> bool {
        self.endpoint_public_access && self.public_access_cidrs.iter().any(|c| c == OPEN_CIDR)
    }
}

/// Whether `version` is older than `min_standard`.
///
/// Unparseable versions are never treated as extended support.
#[must_use]
pub fn is_extended_support(version: &str, min_standard: &str) -> bool {
    match (parse_minor_version(version), parse_minor_version(min_standard)) {
        (Some(current), Some(floor)) => current < floor,
        _ => false,
    }
}

/// Map a `describe-cluster` response to a cluster.
///
/// # Errors
/// Returns [`ScanError::Decode`] if the cluster record is malformed.
pub fn parse_cluster(response: &Value, min_standard: &str) -> Result<EksCluster, ScanError> {
    let raw: RawCluster = decode_one(
        "EKS cluster",
        response.get("cluster").cloned().unwrap_or(Value::Null),
    )?;
    let vpc = raw.resources_vpc_config;
    Ok(EksCluster {
        extended_support: is_extended_support(&raw.version, min_standard),
        name: raw.name,
        described: true,
        arn: raw.arn,
        version: Some(raw.version),
        status: Some(raw.status),
        endpoint: raw.endpoint,
        vpc_id: vpc.as_ref().and_then(|v| v.vpc_id.clone()),
        endpoint_public_access: vpc.as_ref().is_some_and(|v| v.endpoint_public_access),
        endpoint_private_access: vpc.as_ref().is_some_and(|v| v.endpoint_private_access),
        public_access_cidrs: vpc.map(|v| v.public_access_cidrs).unwrap_or_default(),
        created_at: raw.created_at.as_ref().and_then(Timestamp::to_utc),
        tags: raw
            .tags
            .into_iter()
            .map(|(key, value)| Tag { key, value })
            .collect(),
    })
}

/// List and describe every cluster.
///
/// A cluster whose description cannot be read is kept by name.
///
/// # Errors
/// Returns an error if `list-clusters` fails or a description is malformed.
pub async fn fetch(
    client: &dyn ResourceClient,
    ctx: &ScanContext,
) -> Result<(Vec<EksCluster>, Vec<String>), ScanError> {
    let names: Vec<String> = decode_all(
        "EKS cluster name",
        client
            .list(&ApiRequest::new("eks", "list-clusters"), "clusters")
            .await?,
    )?;

    let mut warnings = Vec::new();
    let mut clusters = Vec::with_capacity(names.len());
    for name in names {
        let request = ApiRequest::new("eks", "describe-cluster").for_resource("--name", &name);
        match probe(client, &request, &mut warnings).await {
            Probe::Found(response) => clusters.push(parse_cluster(
                &response,
                &ctx.thresholds.eks_min_standard_version,
            )?),
            Probe::Absent => debug!(cluster = %name, "Cluster disappeared during scan"),
            Probe::Unknown => clusters.push(EksCluster::undescribed(name)),
        }
    }
    Ok((clusters, warnings))
}

/// EKS summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EksSummary {
    /// Clusters listed.
    pub total: usize,
    /// Clusters whose description could not be read.
    pub undescribed: usize,
    /// Active clusters.
    pub active: usize,
    /// Clusters per Kubernetes version.
    pub by_version: BTreeMap<String, usize>,
    /// Clusters on extended support.
    pub extended_support: usize,
    /// Clusters with a public endpoint.
    pub public_endpoints: usize,
}

/// Count clusters by version and exposure.
#[must_use]
pub fn summarize(clusters: &[EksCluster]) -> EksSummary {
    let mut by_version = BTreeMap::new();
    for version in clusters.iter().filter_map(|c| c.version.clone()) {
        *by_version.entry(version).or_insert(0) += 1;
    }
    EksSummary {
        total: clusters.len(),
        undescribed: clusters.iter().filter(|c| !c.described).count(),
        active: clusters.iter().filter(|c| c.is_active()).count(),
        by_version,
        extended_support: clusters.iter().filter(|c| c.extended_support).count(),
        public_endpoints: clusters
            .iter()
            .filter(|c| c.endpoint_public_access)
            .count(),
    }
}

/// Evaluate cluster rules.
#[must_use]
pub fn recommend(clusters: &[EksCluster], ctx: &ScanContext) -> Vec<Recommendation> {
    let mut recs = Vec::new();
    for cluster in clusters.iter().filter(|c| c.described) {
        if cluster.extended_support {
            recs.push(
                Recommendation::new(
                    ServiceKind::Eks,
                    Category::Cost,
                    Severity::High,
                    "Cluster on extended support",
                )
                .resource(&cluster.name)
                .description(format!(
                    "Kubernetes {} is past standard support and the control plane is billed at the extended-support rate. Upgrade to {} or later.",
                    cluster.version.as_deref().unwrap_or_default(),
                    ctx.thresholds.eks_min_standard_version
                ))
                .savings(pricing::eks_extended_support_premium()),
            );
        }

        if cluster.has_open_endpoint() {
            recs.push(
                Recommendation::new(
                    ServiceKind::Eks,
                    Category::Security,
                    Severity::High,
                    "API endpoint open to the internet",
                )
                .resource(&cluster.name)
                .description("The public API endpoint accepts 0.0.0.0/0. Restrict publicAccessCidrs or use the private endpoint only."),
            );
        }

        if let Some(tag_rec) =
            tag_policy_recommendation(ServiceKind::Eks, &cluster.name, &cluster.tags, ctx)
        {
            recs.push(tag_rec);
        }
    }
    recs
}

/// EKS scanner.
#[derive(Debug, Clone, Copy, Default)]
pub struct EksScanner;

#[async_trait]
impl ServiceScanner for EksScanner {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Eks
    }

    async fn scan(
        &self,
        client: &dyn ResourceClient,
        ctx: &ScanContext,
    ) -> Result<ServiceScan, ScanError> {
        let (clusters, warnings) = fetch(client, ctx).await?;
        let summary = summarize(&clusters);
        info!(
            total = summary.total,
            extended_support = summary.extended_support,
            "EKS clusters scanned"
        );
        let recs = recommend(&clusters, ctx);
        ServiceScan::build(&clusters, &summary, recs, warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StaticClient;
    use crate::error::ClientError;
    use serde_json::json;

    fn describe(name: &str) -> ApiRequest {
        ApiRequest::new("eks", "describe-cluster").for_resource("--name", name)
    }

    fn client() -> StaticClient {
        StaticClient::new()
            .with_response(
                ApiRequest::new("eks", "list-clusters"),
                json!({"clusters": ["prod", "legacy"]}),
            )
            .with_response(
                describe("prod"),
                json!({"cluster": {
                    "name": "prod",
                    "arn": "arn:aws:eks:us-east-1:111:cluster/prod",
                    "version": "1.31",
                    "status": "ACTIVE",
                    "resourcesVpcConfig": {
                        "vpcId": "vpc-1",
                        "endpointPublicAccess": true,
                        "endpointPrivateAccess": true,
                        "publicAccessCidrs": ["203.0.113.0/24"]
                    },
                    "createdAt": "2024-08-01T10:00:00+00:00",
                    "tags": {"team": "platform"}
                }}),
            )
            .with_response(
                describe("legacy"),
                json!({"cluster": {
                    "name": "legacy",
                    "version": "1.27",
                    "status": "ACTIVE",
                    "resourcesVpcConfig": {
                        "endpointPublicAccess": true,
                        "endpointPrivateAccess": false,
                        "publicAccessCidrs": ["0.0.0.0/0"]
                    }
                }}),
            )
    }

    #[tokio::test]
    async fn test_undescribed_cluster_is_kept() {
        let client = StaticClient::new()
            .with_response(
                ApiRequest::new("eks", "list-clusters"),
                json!({"clusters": ["open", "locked"]}),
            )
            .with_response(
                describe("open"),
                json!({"cluster": {
                    "name": "open",
                    "version": "1.30",
                    "status": "ACTIVE",
                    "createdAt": 1_700_000_000.5
                }}),
            )
            .with_error(
                describe("locked"),
                ClientError::AccessDenied("eks:DescribeCluster".to_string()),
            );
        let ctx = ScanContext::new(Utc::now()).with_required_tags(vec!["team".to_string()]);

        let (clusters, warnings) = fetch(&client, &ctx).await.unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(clusters.len(), 2);
        assert!(clusters[0].created_at.is_some());
        assert_eq!(clusters[1].name, "locked");
        assert!(!clusters[1].described);
        assert_eq!(clusters[1].version, None);

        let summary = summarize(&clusters);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.undescribed, 1);
        assert_eq!(summary.by_version.len(), 1);

        let recs = recommend(&clusters, &ctx);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].resource_id.as_deref(), Some("open"));
    }

    #[test]
    fn test_is_extended_support() {
        assert!(is_extended_support("1.27", "1.30"));
        assert!(!is_extended_support("1.30", "1.30"));
        assert!(!is_extended_support("1.31", "1.30"));
        assert!(!is_extended_support("latest", "1.30"));
    }

    #[tokio::test]
    async fn test_scan_clusters() {
        let ctx = ScanContext::new(Utc::now()).with_required_tags(vec!["team".to_string()]);
        let (clusters, warnings) = fetch(&client(), &ctx).await.unwrap();
        assert!(warnings.is_empty());
        assert_eq!(clusters.len(), 2);
        assert!(!clusters[0].has_open_endpoint());
        assert!(clusters[1].has_open_endpoint());
        assert_eq!(clusters[0].tags, vec![Tag::new("team", "platform")]);

        let summary = summarize(&clusters);
        assert_eq!(summary.active, 2);
        assert_eq!(summary.extended_support, 1);
        assert_eq!(summary.public_endpoints, 2);
        assert_eq!(summary.by_version.get("1.27"), Some(&1));

        let recs = recommend(&clusters, &ctx);
        let titles: Vec<_> = recs.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Cluster on extended support",
                "API endpoint open to the internet",
                "Missing required tags",
            ]
        );
        // (0.60 - 0.10) * 720
        assert_eq!(recs[0].estimated_monthly_savings, Some(360.0));
        assert!(recs
            .iter()
            .all(|r| r.resource_id.as_deref() == Some("legacy")));
    }
}
