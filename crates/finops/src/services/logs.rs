//! CloudWatch Logs log groups.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{ScanContext, ServiceKind, ServiceScan, ServiceScanner};
use crate::client::{page_items, ApiRequest, ResourceClient};
use crate::error::ScanError;
use crate::pricing::LOG_STORAGE_GIB_MONTH;
use crate::recommendation::{Category, Recommendation, Severity};
use crate::resource::{decode_all, from_epoch_millis, round_cents};

const BYTES_PER_GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLogGroup {
    log_group_name: String,
    arn: Option<String>,
    retention_in_days: Option<u32>,
    #[serde(default)]
    stored_bytes: u64,
    creation_time: Option<i64>,
}

/// A log group.
#[derive(Debug, Clone, Serialize)]
pub struct LogGroup {
    /// Log group name.
    pub name: String,
    /// Log group ARN.
    pub arn: Option<String>,
    /// Retention in days; `None` keeps events forever.
    pub retention_days: Option<u32>,
    /// Archived bytes.
    pub stored_bytes: u64,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
}

impl LogGroup {
    /// Whether events are kept forever.
    #[must_use]
    pub fn never_expires(&self) -> bool {
        self.retention_days.is_none()
    }

    /// Stored size in GiB.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stored_gib(&self) -> f64 {
        self.stored_bytes as f64 / BYTES_PER_GIB
    }

    /// Monthly archive storage cost.
    #[must_use]
    pub fn monthly_cost(&self) -> f64 {
        self.stored_gib() * LOG_STORAGE_GIB_MONTH
    }
}

/// Map a `describe-log-groups` response to log groups.
///
/// # Errors
/// Returns [`ScanError::Decode`] if a log group record is malformed.
pub fn parse_log_groups(response: &Value) -> Result<Vec<LogGroup>, ScanError> {
    let raw: Vec<RawLogGroup> = decode_all("log group", page_items(response, "logGroups"))?;
    Ok(raw
        .into_iter()
        .map(|g| LogGroup {
            name: g.log_group_name,
            arn: g.arn,
            retention_days: g.retention_in_days,
            stored_bytes: g.stored_bytes,
            created_at: g.creation_time.and_then(from_epoch_millis),
        })
        .collect())
}

/// Log group summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogGroupSummary {
    /// Log groups.
    pub total: usize,
    /// Log groups without retention.
    pub never_expire: usize,
    /// Stored GiB across groups.
    pub total_stored_gib: f64,
    /// Monthly storage cost, USD.
    pub estimated_monthly_cost: f64,
}

/// Total stored size and cost.
#[must_use]
pub fn summarize(groups: &[LogGroup]) -> LogGroupSummary {
    let total_stored_gib: f64 = groups.iter().map(LogGroup::stored_gib).sum();
    LogGroupSummary {
        total: groups.len(),
        never_expire: groups.iter().filter(|g| g.never_expires()).count(),
        total_stored_gib: round_cents(total_stored_gib),
        estimated_monthly_cost: round_cents(groups.iter().map(LogGroup::monthly_cost).sum()),
    }
}

/// Evaluate log group rules.
#[must_use]
pub fn recommend(groups: &[LogGroup], ctx: &ScanContext) -> Vec<Recommendation> {
    let review_gib = ctx.thresholds.log_group_review_gib;
    let max_retention = ctx.thresholds.log_max_retention_days;

    groups
        .iter()
        .filter_map(|group| match group.retention_days {
            None => {
                let severity = if group.stored_gib() >= review_gib {
                    Severity::Medium
                } else {
                    Severity::Low
                };
                Some(
                    Recommendation::new(
                        ServiceKind::CloudwatchLogs,
                        Category::Cost,
                        severity,
                        "Log group never expires",
                    )
                    .resource(&group.name)
                    .description(format!(
                        "{:.2} GiB stored with no retention policy. Set a retention period so old events stop accruing storage charges.",
                        group.stored_gib()
                    )),
                )
            }
            Some(days) if days > max_retention => Some(
                Recommendation::new(
                    ServiceKind::CloudwatchLogs,
                    Category::Cost,
                    Severity::Low,
                    "Long log retention",
                )
                .resource(&group.name)
                .description(format!(
                    "Events are kept for {days} days. Export to S3 for long-term archival and shorten retention to {max_retention} days or less."
                )),
            ),
            Some(_) => None,
        })
        .collect()
}

/// CloudWatch Logs scanner.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogGroupScanner;

#[async_trait]
impl ServiceScanner for LogGroupScanner {
    fn kind(&self) -> ServiceKind {
        ServiceKind::CloudwatchLogs
    }

    async fn scan(
        &self,
        client: &dyn ResourceClient,
        ctx: &ScanContext,
    ) -> Result<ServiceScan, ScanError> {
        let response = client
            .call(&ApiRequest::new("logs", "describe-log-groups"))
            .await?;
        let groups = parse_log_groups(&response)?;
        let summary = summarize(&groups);
        info!(
            total = summary.total,
            never_expire = summary.never_expire,
            "Log groups scanned"
        );
        let recs = recommend(&groups, ctx);
        ServiceScan::build(&groups, &summary, recs, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn groups() -> Vec<LogGroup> {
        parse_log_groups(&json!({"logGroups": [
            {
                "logGroupName": "/aws/lambda/api",
                "storedBytes": 5 * GIB,
                "creationTime": 1_704_067_200_000_i64
            },
            {
                "logGroupName": "/aws/lambda/cron",
                "storedBytes": 1024
            },
            {
                "logGroupName": "/ecs/web",
                "retentionInDays": 3653,
                "storedBytes": GIB
            },
            {
                "logGroupName": "/ecs/worker",
                "retentionInDays": 30,
                "storedBytes": 0
            }
        ]}))
        .unwrap()
    }

    #[test]
    fn test_parse_log_groups() {
        let groups = groups();
        assert_eq!(groups.len(), 4);
        assert_eq!(
            groups[0].created_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert!(groups[0].never_expires());
        assert!((groups[0].stored_gib() - 5.0).abs() < f64::EPSILON);
        assert_eq!(groups[2].retention_days, Some(3653));
    }

    #[test]
    fn test_summarize() {
        let summary = summarize(&groups());
        assert_eq!(summary.total, 4);
        assert_eq!(summary.never_expire, 2);
        assert!((summary.total_stored_gib - 6.0).abs() < f64::EPSILON);
        // 6 GiB * 0.03
        assert!((summary.estimated_monthly_cost - 0.18).abs() < f64::EPSILON);
    }

    #[test]
    fn test_recommend() {
        let recs = recommend(&groups(), &ScanContext::new(Utc::now()));
        let found: Vec<_> = recs
            .iter()
            .map(|r| (r.resource_id.as_deref().unwrap_or(""), r.severity))
            .collect();
        assert_eq!(
            found,
            vec![
                ("/aws/lambda/api", Severity::Medium),
                ("/aws/lambda/cron", Severity::Low),
                ("/ecs/web", Severity::Low),
            ]
        );
        assert_eq!(recs[2].title, "Long log retention");
        assert!(recs.iter().all(|r| r.category == Category::Cost));
    }

    #[test]
    fn test_retention_limit_is_exclusive() {
        let groups = parse_log_groups(&json!({"logGroups": [
            {"logGroupName": "/at-limit", "retentionInDays": 731, "storedBytes": 0},
            {"logGroupName": "/over-limit", "retentionInDays": 732, "storedBytes": 0}
        ]}))
        .unwrap();

        let recs = recommend(&groups, &ScanContext::new(Utc::now()));
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].resource_id.as_deref(), Some("/over-limit"));
    }
}
