//! EBS snapshots owned by the account.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{ScanContext, ServiceKind, ServiceScan, ServiceScanner};
use crate::client::{page_items, ApiRequest, ResourceClient};
use crate::error::ScanError;
use crate::pricing::SNAPSHOT_GIB_MONTH;
use crate::recommendation::{Category, Recommendation, Severity};
use crate::resource::{age_days, decode_all, round_cents, Timestamp};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawSnapshot {
    snapshot_id: String,
    volume_id: Option<String>,
    volume_size: u64,
    start_time: Option<Timestamp>,
    state: String,
    #[serde(default)]
    encrypted: bool,
    description: Option<String>,
}

/// An EBS snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// Snapshot ID.
    pub id: String,
    /// Source volume.
    pub volume_id: Option<String>,
    /// Source volume size in GiB.
    pub size_gib: u64,
    /// When the snapshot was started.
    pub started_at: Option<DateTime<Utc>>,
    /// API state (`completed`, `pending`, `error`).
    pub state: String,
    /// Encrypted.
    pub encrypted: bool,
    /// Free-form description.
    pub description: Option<String>,
}

impl Snapshot {
    /// Age in days, when the start time is known.
    #[must_use]
    pub fn age_days(&self, now: DateTime<Utc>) -> Option<i64> {
        self.started_at.map(|t| age_days(t, now))
    }

    /// Whether the snapshot is at least `max_age_days` old.
    #[must_use]
    pub fn is_older_than(&self, max_age_days: u32, now: DateTime<Utc>) -> bool {
        self.age_days(now)
            .is_some_and(|age| age >= i64::from(max_age_days))
    }

    /// Monthly storage cost, priced on the full volume size.
    ///
    /// Snapshots are incremental, so this is an upper bound.
    #[must_use]
    pub fn monthly_cost(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let size = self.size_gib as f64;
        size * SNAPSHOT_GIB_MONTH
    }
}

/// Map a `describe-snapshots` response to snapshots.
///
/// # Errors
/// Returns [`ScanError::Decode`] if a snapshot record is malformed.
pub fn parse_snapshots(response: &Value) -> Result<Vec<Snapshot>, ScanError> {
    let raw: Vec<RawSnapshot> = decode_all("EBS snapshot", page_items(response, "Snapshots"))?;
    Ok(raw
        .into_iter()
        .map(|s| Snapshot {
            id: s.snapshot_id,
            volume_id: s.volume_id,
            size_gib: s.volume_size,
            started_at: s.start_time.as_ref().and_then(Timestamp::to_utc),
            state: s.state,
            encrypted: s.encrypted,
            description: s.description.filter(|d| !d.is_empty()),
        })
        .collect())
}

/// Snapshot summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotSummary {
    /// Snapshots.
    pub total: usize,
    /// Snapshots at or past the age threshold.
    pub old: usize,
    /// GiB across all snapshots.
    pub total_size_gib: u64,
    /// GiB across old snapshots.
    pub old_size_gib: u64,
    /// Estimated monthly storage cost, USD (upper bound).
    pub estimated_monthly_cost: f64,
}

/// Aggregate snapshot counts and sizes.
#[must_use]
pub fn summarize(snapshots: &[Snapshot], ctx: &ScanContext) -> SnapshotSummary {
    let max_age = ctx.thresholds.snapshot_max_age_days;
    let old: Vec<&Snapshot> = snapshots
        .iter()
        .filter(|s| s.is_older_than(max_age, ctx.now))
        .collect();
    SnapshotSummary {
        total: snapshots.len(),
        old: old.len(),
        total_size_gib: snapshots.iter().map(|s| s.size_gib).sum(),
        old_size_gib: old.iter().map(|s| s.size_gib).sum(),
        estimated_monthly_cost: round_cents(snapshots.iter().map(Snapshot::monthly_cost).sum()),
    }
}

/// Evaluate snapshot rules.
#[must_use]
pub fn recommend(snapshots: &[Snapshot], ctx: &ScanContext) -> Vec<Recommendation> {
    let max_age = ctx.thresholds.snapshot_max_age_days;
    snapshots
        .iter()
        .filter(|s| s.is_older_than(max_age, ctx.now))
        .map(|s| {
            Recommendation::new(
                ServiceKind::EbsSnapshots,
                Category::Cost,
                Severity::Medium,
                "Old EBS snapshot",
            )
            .resource(&s.id)
            .description(format!(
                "Snapshot of {} ({} GiB) is {} days old. Delete it or move it to the archive tier if it is kept for compliance.",
                s.volume_id.as_deref().unwrap_or("unknown volume"),
                s.size_gib,
                s.age_days(ctx.now).unwrap_or_default()
            ))
            .savings(s.monthly_cost())
        })
        .collect()
}

/// Snapshot scanner.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotScanner;

#[async_trait]
impl ServiceScanner for SnapshotScanner {
    fn kind(&self) -> ServiceKind {
        ServiceKind::EbsSnapshots
    }

    async fn scan(
        &self,
        client: &dyn ResourceClient,
        ctx: &ScanContext,
    ) -> Result<ServiceScan, ScanError> {
        let request = ApiRequest::new("ec2", "describe-snapshots").arg("--owner-ids", "self");
        let snapshots = parse_snapshots(&client.call(&request).await?)?;
        let summary = summarize(&snapshots, ctx);
        info!(total = summary.total, old = summary.old, "EBS snapshots scanned");
        let recs = recommend(&snapshots, ctx);
        ServiceScan::build(&snapshots, &summary, recs, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ctx() -> ScanContext {
        ScanContext::new(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
    }

    fn snapshots() -> Vec<Snapshot> {
        parse_snapshots(&json!({"Snapshots": [
            {
                "SnapshotId": "snap-old",
                "VolumeId": "vol-1",
                "VolumeSize": 100,
                "StartTime": "2023-01-01T00:00:00.000Z",
                "State": "completed",
                "Encrypted": true,
                "Description": ""
            },
            {
                "SnapshotId": "snap-new",
                "VolumeId": "vol-2",
                "VolumeSize": 40,
                "StartTime": "2024-05-01T00:00:00.000Z",
                "State": "completed"
            },
            {
                "SnapshotId": "snap-undated",
                "VolumeSize": 8,
                "State": "pending"
            }
        ]}))
        .unwrap()
    }

    #[test]
    fn test_parse() {
        let snapshots = snapshots();
        assert_eq!(snapshots.len(), 3);
        assert_eq!(snapshots[0].description, None);
        assert_eq!(snapshots[0].age_days(ctx().now), Some(517));
        assert_eq!(snapshots[2].age_days(ctx().now), None);
    }

    #[test]
    fn test_summarize() {
        let summary = summarize(&snapshots(), &ctx());
        assert_eq!(summary.total, 3);
        assert_eq!(summary.old, 1);
        assert_eq!(summary.total_size_gib, 148);
        assert_eq!(summary.old_size_gib, 100);
        assert!((summary.estimated_monthly_cost - 7.4).abs() < 1e-9);
    }

    #[test]
    fn test_recommend_only_old_snapshots() {
        let recs = recommend(&snapshots(), &ctx());
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].resource_id.as_deref(), Some("snap-old"));
        assert_eq!(recs[0].estimated_monthly_savings, Some(5.0));
        assert!(recs[0].description.contains("517 days"));
    }

    #[test]
    fn test_threshold_is_configurable() {
        let mut thresholds = crate::config::Thresholds::default();
        thresholds.snapshot_max_age_days = 30;
        let ctx = ctx().with_thresholds(thresholds);
        assert_eq!(recommend(&snapshots(), &ctx).len(), 2);
    }

    #[test]
    fn test_age_threshold_is_inclusive() {
        let snapshots = parse_snapshots(&json!({"Snapshots": [
            {
                "SnapshotId": "snap-on-threshold",
                "VolumeSize": 10,
                "StartTime": "2024-03-03T00:00:00Z",
                "State": "completed"
            },
            {
                "SnapshotId": "snap-just-under",
                "VolumeSize": 10,
                "StartTime": "2024-03-03T00:00:01Z",
                "State": "completed"
            }
        ]}))
        .unwrap();
        assert_eq!(snapshots[0].age_days(ctx().now), Some(90));
        assert_eq!(snapshots[1].age_days(ctx().now), Some(89));

        let recs = recommend(&snapshots, &ctx());
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].resource_id.as_deref(), Some("snap-on-threshold"));
        assert_eq!(summarize(&snapshots, &ctx()).old, 1);
    }
}
