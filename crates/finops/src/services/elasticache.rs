//! ElastiCache clusters.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{ScanContext, ServiceKind, ServiceScan, ServiceScanner};
use crate::client::{page_items, ApiRequest, ResourceClient};
use crate::error::ScanError;
use crate::recommendation::{Category, Recommendation, Severity};
use crate::resource::{decode_all, Timestamp};

/// Node families with a newer generation (`cache.m4.large` -> `cache.m4`).
const PREVIOUS_GENERATION_NODES: &[&str] = &[
    "cache.t1", "cache.t2", "cache.m1", "cache.m2", "cache.m3", "cache.m4", "cache.c1",
    "cache.r3", "cache.r4",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawCacheCluster {
    cache_cluster_id: String,
    cache_node_type: String,
    engine: String,
    engine_version: Option<String>,
    cache_cluster_status: String,
    #[serde(default)]
    num_cache_nodes: u32,
    replication_group_id: Option<String>,
    #[serde(default)]
    at_rest_encryption_enabled: bool,
    #[serde(default)]
    transit_encryption_enabled: bool,
    cache_cluster_create_time: Option<Timestamp>,
}

/// An ElastiCache cluster.
#[derive(Debug, Clone, Serialize)]
pub struct CacheCluster {
    /// Cluster identifier.
    pub id: String,
    /// Node type (`cache.r6g.large`).
    pub node_type: String,
    /// `redis`, `valkey` or `memcached`.
    pub engine: String,
    /// Engine version.
    pub engine_version: Option<String>,
    /// API status.
    pub status: String,
    /// Node count.
    pub nodes: u32,
    /// Replication group this cluster belongs to.
    pub replication_group_id: Option<String>,
    /// Encrypted at rest.
    pub at_rest_encryption: bool,
    /// TLS between clients and nodes.
    pub transit_encryption: bool,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
}

impl CacheCluster {
    /// Node family (`cache.m4` for `cache.m4.large`).
    #[must_use]
    pub fn node_family(&self) -> String {
        self.node_type
            .splitn(3, '.')
            .take(2)
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Whether the node type has a newer generation.
    #[must_use]
    pub fn is_previous_generation(&self) -> bool {
        PREVIOUS_GENERATION_NODES.contains(&self.node_family().as_str())
    }

    /// Whether the cluster is available.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.status == "available"
    }

    /// Whether either encryption setting is off.
    #[must_use]
    pub fn is_unencrypted(&self) -> bool {
        !self.at_rest_encryption || !self.transit_encryption
    }
}

/// Map a `describe-cache-clusters` response to clusters.
///
/// # Errors
/// Returns [`ScanError::Decode`] if a cluster record is malformed.
pub fn parse_clusters(response: &Value) -> Result<Vec<CacheCluster>, ScanError> {
    let raw: Vec<RawCacheCluster> =
        decode_all("ElastiCache cluster", page_items(response, "CacheClusters"))?;
    Ok(raw
        .into_iter()
        .map(|c| CacheCluster {
            id: c.cache_cluster_id,
            node_type: c.cache_node_type,
            engine: c.engine,
            engine_version: c.engine_version,
            status: c.cache_cluster_status,
            nodes: c.num_cache_nodes,
            replication_group_id: c.replication_group_id,
            at_rest_encryption: c.at_rest_encryption_enabled,
            transit_encryption: c.transit_encryption_enabled,
            created_at: c.cache_cluster_create_time.as_ref().and_then(Timestamp::to_utc),
        })
        .collect())
}

/// ElastiCache summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElastiCacheSummary {
    /// Clusters.
    pub total: usize,
    /// Available clusters.
    pub available: usize,
    /// Clusters per engine.
    pub by_engine: BTreeMap<String, usize>,
    /// Nodes across clusters.
    pub total_nodes: u64,
    /// Clusters on previous-generation nodes.
    pub previous_generation: usize,
    /// Clusters missing at-rest or in-transit encryption.
    pub unencrypted: usize,
}

/// Count clusters by engine and node generation.
#[must_use]
pub fn summarize(clusters: &[CacheCluster]) -> ElastiCacheSummary {
    let mut by_engine = BTreeMap::new();
    for cluster in clusters {
        *by_engine.entry(cluster.engine.clone()).or_insert(0) += 1;
    }
    ElastiCacheSummary {
        total: clusters.len(),
        available: clusters.iter().filter(|c| c.is_available()).count(),
        by_engine,
        total_nodes: clusters.iter().map(|c| u64::from(c.nodes)).sum(),
        previous_generation: clusters
            .iter()
            .filter(|c| c.is_previous_generation())
            .count(),
        unencrypted: clusters.iter().filter(|c| c.is_unencrypted()).count(),
    }
}

/// Evaluate ElastiCache rules.
#[must_use]
pub fn recommend(clusters: &[CacheCluster]) -> Vec<Recommendation> {
    let mut recs = Vec::new();
    for cluster in clusters {
        let rec = |category, severity, title: &str| {
            Recommendation::new(ServiceKind::Elasticache, category, severity, title)
                .resource(&cluster.id)
        };

        if cluster.is_previous_generation() {
            recs.push(
                rec(Category::Cost, Severity::Low, "Previous-generation node type")
                    .description(format!(
                        "{} is a previous-generation node type. Graviton nodes (cache.m7g, cache.r7g, cache.t4g) cost less for the same memory.",
                        cluster.node_type
                    )),
            );
        }
        if !cluster.at_rest_encryption {
            recs.push(
                rec(Category::Security, Severity::Medium, "Encryption at rest disabled")
                    .description("At-rest encryption can only be set at creation. Migrate the data to a new encrypted cluster."),
            );
        }
        if !cluster.transit_encryption {
            recs.push(
                rec(Category::Security, Severity::Low, "Encryption in transit disabled")
                    .description("Clients connect without TLS. Enable in-transit encryption."),
            );
        }
    }
    recs
}

/// ElastiCache scanner.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElastiCacheScanner;

#[async_trait]
impl ServiceScanner for ElastiCacheScanner {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Elasticache
    }

    async fn scan(
        &self,
        client: &dyn ResourceClient,
        _ctx: &ScanContext,
    ) -> Result<ServiceScan, ScanError> {
        let response = client
            .call(&ApiRequest::new("elasticache", "describe-cache-clusters"))
            .await?;
        let clusters = parse_clusters(&response)?;
        let summary = summarize(&clusters);
        info!(
            total = summary.total,
            previous_generation = summary.previous_generation,
            "ElastiCache clusters scanned"
        );
        let recs = recommend(&clusters);
        ServiceScan::build(&clusters, &summary, recs, Vec::new())
    }
}
