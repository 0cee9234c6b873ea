//! RDS database instances.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{tag_policy_recommendation, ScanContext, ServiceKind, ServiceScan, ServiceScanner};
use crate::client::{page_items, ApiRequest, ResourceClient};
use crate::error::ScanError;
use crate::recommendation::{Category, Recommendation, Severity};
use crate::resource::{decode_all, Tag, Timestamp};

/// Instance class families with a newer generation (`db.m4.large` -> `db.m4`).
const PREVIOUS_GENERATION_CLASSES: &[&str] = &[
    "db.t2", "db.m1", "db.m2", "db.m3", "db.m4", "db.r3", "db.r4", "db.x1",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawDbInstance {
    #[serde(rename = "DBInstanceIdentifier")]
    db_instance_identifier: String,
    #[serde(rename = "DBInstanceClass")]
    db_instance_class: String,
    engine: String,
    engine_version: Option<String>,
    #[serde(rename = "DBInstanceStatus")]
    db_instance_status: String,
    #[serde(rename = "MultiAZ", default)]
    multi_az: bool,
    #[serde(default)]
    allocated_storage: u64,
    storage_type: Option<String>,
    #[serde(default)]
    storage_encrypted: bool,
    #[serde(default)]
    publicly_accessible: bool,
    #[serde(default)]
    backup_retention_period: u32,
    instance_create_time: Option<Timestamp>,
    #[serde(default)]
    tag_list: Vec<Tag>,
}

/// An RDS database instance.
#[derive(Debug, Clone, Serialize)]
pub struct DbInstance {
    /// Instance identifier.
    pub id: String,
    /// Instance class (`db.r6g.large`).
    pub class: String,
    /// Engine (`postgres`, `mysql`, `aurora-postgresql`, ...).
    pub engine: String,
    /// Engine version.
    pub engine_version: Option<String>,
    /// API status (`available`, `stopped`, ...).
    pub status: String,
    /// Multi-AZ deployment.
    pub multi_az: bool,
    /// Allocated storage in GiB.
    pub storage_gib: u64,
    /// Storage type (`gp2`, `gp3`, `io1`).
    pub storage_type: Option<String>,
    /// Encrypted at rest.
    pub encrypted: bool,
    /// Reachable from the internet.
    pub publicly_accessible: bool,
    /// Automated backup retention in days (0 = disabled).
    pub backup_retention_days: u32,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// Tags.
    pub tags: Vec<Tag>,
}

impl DbInstance {
    /// Class family (`db.m4` for `db.m4.large`).
    #[must_use]
    pub fn class_family(&self) -> String {
        self.class.splitn(3, '.').take(2).collect::<Vec<_>>().join(".")
    }

    /// Whether the class has a newer generation.
    #[must_use]
    pub fn is_previous_generation(&self) -> bool {
        PREVIOUS_GENERATION_CLASSES.contains(&self.class_family().as_str())
    }

    /// Whether the instance is available.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.status == "available"
    }

    /// Whether the instance is stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.status == "stopped"
    }

    /// Aurora instances keep storage and backups at the cluster level.
    #[must_use]
    pub fn is_aurora(&self) -> bool {
        self.engine.starts_with("aurora")
    }
}

/// Map a `describe-db-instances` response to instances.
///
/// # Errors
/// Returns [`ScanError::Decode`] if an instance record is malformed.
pub fn parse_instances(response: &Value) -> Result<Vec<DbInstance>, ScanError> {
    let raw: Vec<RawDbInstance> = decode_all("RDS instance", page_items(response, "DBInstances"))?;
    Ok(raw
        .into_iter()
        .map(|db| DbInstance {
            id: db.db_instance_identifier,
            class: db.db_instance_class,
            engine: db.engine,
            engine_version: db.engine_version,
            status: db.db_instance_status,
            multi_az: db.multi_az,
            storage_gib: db.allocated_storage,
            storage_type: db.storage_type,
            encrypted: db.storage_encrypted,
            publicly_accessible: db.publicly_accessible,
            backup_retention_days: db.backup_retention_period,
            created_at: db.instance_create_time.as_ref().and_then(Timestamp::to_utc),
            tags: db.tag_list,
        })
        .collect())
}

/// RDS summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RdsSummary {
    /// Instances.
    pub total: usize,
    /// Available instances.
    pub available: usize,
    /// Stopped instances.
    pub stopped: usize,
    /// Multi-AZ instances.
    pub multi_az: usize,
    /// Encrypted instances.
    pub encrypted: usize,
    /// Publicly accessible instances.
    pub public: usize,
    /// Instances per engine.
    pub by_engine: BTreeMap<String, usize>,
    /// Allocated GiB across instances.
    pub total_storage_gib: u64,
}

/// Count instances by status, engine and protection.
#[must_use]
pub fn summarize(instances: &[DbInstance]) -> RdsSummary {
    let mut by_engine = BTreeMap::new();
    for db in instances {
        *by_engine.entry(db.engine.clone()).or_insert(0) += 1;
    }
    RdsSummary {
        total: instances.len(),
        available: instances.iter().filter(|d| d.is_available()).count(),
        stopped: instances.iter().filter(|d| d.is_stopped()).count(),
        multi_az: instances.iter().filter(|d| d.multi_az).count(),
        encrypted: instances.iter().filter(|d| d.encrypted).count(),
        public: instances.iter().filter(|d| d.publicly_accessible).count(),
        by_engine,
        total_storage_gib: instances.iter().map(|d| d.storage_gib).sum(),
    }
}

/// Evaluate RDS rules.
#[must_use]
pub fn recommend(instances: &[DbInstance], ctx: &ScanContext) -> Vec<Recommendation> {
    let min_retention = ctx.thresholds.rds_min_backup_retention_days;
    let mut recs = Vec::new();

    for db in instances {
        let rec = |category, severity, title: &str| {
            Recommendation::new(ServiceKind::Rds, category, severity, title).resource(&db.id)
        };

        if db.publicly_accessible {
            recs.push(
                rec(Category::Security, Severity::High, "Publicly accessible database")
                    .description("Disable public accessibility and reach the database through a VPC, VPN or bastion."),
            );
        }

        if !db.encrypted {
            recs.push(
                rec(Category::Security, Severity::Medium, "Unencrypted database storage")
                    .description("Encryption cannot be enabled in place; restore an encrypted snapshot copy into a new instance."),
            );
        }

        if !db.is_aurora() && db.backup_retention_days < min_retention {
            recs.push(
                rec(Category::Reliability, Severity::Medium, "Short backup retention")
                    .description(format!(
                        "Automated backups are kept for {} days; at least {min_retention} is recommended.",
                        db.backup_retention_days
                    )),
            );
        }

        if db.is_previous_generation() {
            recs.push(
                rec(Category::Cost, Severity::Low, "Previous-generation instance class")
                    .description(format!(
                        "{} is a previous-generation class. Graviton classes (db.m7g, db.r7g, db.t4g) are cheaper for the same capacity.",
                        db.class
                    )),
            );
        }

        if db.is_stopped() {
            recs.push(
                rec(Category::Cost, Severity::Low, "Stopped database")
                    .description("Stopped instances restart automatically after 7 days and storage is billed while stopped. Snapshot and delete it if it is no longer needed."),
            );
        }

        if let Some(tag_rec) = tag_policy_recommendation(ServiceKind::Rds, &db.id, &db.tags, ctx) {
            recs.push(tag_rec);
        }
    }

    recs
}

/// RDS scanner.
#[derive(Debug, Clone, Copy, Default)]
pub struct RdsScanner;

#[async_trait]
impl ServiceScanner for RdsScanner {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Rds
    }

    async fn scan(
        &self,
        client: &dyn ResourceClient,
        ctx: &ScanContext,
    ) -> Result<ServiceScan, ScanError> {
        let response = client
            .call(&ApiRequest::new("rds", "describe-db-instances"))
            .await?;
        let instances = parse_instances(&response)?;
        let summary = summarize(&instances);
        info!(
            total = summary.total,
            public = summary.public,
            "RDS instances scanned"
        );
        let recs = recommend(&instances, ctx);
        ServiceScan::build(&instances, &summary, recs, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn instances() -> Vec<DbInstance> {
        parse_instances(&json!({"DBInstances": [
            {
                "DBInstanceIdentifier": "orders-prod",
                "DBInstanceClass": "db.r6g.large",
                "Engine": "postgres",
                "EngineVersion": "15.4",
                "DBInstanceStatus": "available",
                "MultiAZ": true,
                "AllocatedStorage": 200,
                "StorageType": "gp3",
                "StorageEncrypted": true,
                "PubliclyAccessible": false,
                "BackupRetentionPeriod": 14,
                "TagList": [{"Key": "team", "Value": "orders"}]
            },
            {
                "DBInstanceIdentifier": "legacy",
                "DBInstanceClass": "db.m4.large",
                "Engine": "mysql",
                "DBInstanceStatus": "stopped",
                "MultiAZ": false,
                "AllocatedStorage": 100,
                "StorageEncrypted": false,
                "PubliclyAccessible": true,
                "BackupRetentionPeriod": 1
            },
            {
                "DBInstanceIdentifier": "aurora-1",
                "DBInstanceClass": "db.r5.large",
                "Engine": "aurora-mysql",
                "DBInstanceStatus": "available",
                "StorageEncrypted": true,
                "BackupRetentionPeriod": 1,
                "TagList": [{"Key": "team", "Value": "orders"}]
            }
        ]}))
        .unwrap()
    }

    #[test]
    fn test_class_family() {
        let dbs = instances();
        assert_eq!(dbs[0].class_family(), "db.r6g");
        assert!(!dbs[0].is_previous_generation());
        assert!(dbs[1].is_previous_generation());
    }

    #[test]
    fn test_summarize() {
        let summary = summarize(&instances());
        assert_eq!(summary.total, 3);
        assert_eq!(summary.available, 2);
        assert_eq!(summary.stopped, 1);
        assert_eq!(summary.multi_az, 1);
        assert_eq!(summary.encrypted, 2);
        assert_eq!(summary.public, 1);
        assert_eq!(summary.by_engine.get("postgres"), Some(&1));
        assert_eq!(summary.total_storage_gib, 300);
    }

    #[test]
    fn test_recommend() {
        let ctx = ScanContext::new(Utc::now()).with_required_tags(vec!["team".to_string()]);
        let recs = recommend(&instances(), &ctx);

        assert!(recs
            .iter()
            .all(|r| r.resource_id.as_deref() == Some("legacy")));
        let titles: Vec<_> = recs.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Publicly accessible database",
                "Unencrypted database storage",
                "Short backup retention",
                "Previous-generation instance class",
                "Stopped database",
                "Missing required tags",
            ]
        );
    }

    #[test]
    fn test_backup_retention_minimum_is_exclusive() {
        let db = |id: &str, retention: u32| {
            json!({
                "DBInstanceIdentifier": id,
                "DBInstanceClass": "db.t4g.medium",
                "Engine": "postgres",
                "DBInstanceStatus": "available",
                "StorageEncrypted": true,
                "PubliclyAccessible": false,
                "BackupRetentionPeriod": retention
            })
        };
        let dbs = parse_instances(&json!({"DBInstances": [db("at-minimum", 7), db("below", 6)]}))
            .unwrap();

        let recs = recommend(&dbs, &ScanContext::new(Utc::now()));
        let found: Vec<_> = recs
            .iter()
            .map(|r| (r.resource_id.as_deref().unwrap_or(""), r.title.as_str()))
            .collect();
        assert_eq!(found, vec![("below", "Short backup retention")]);
    }
}
