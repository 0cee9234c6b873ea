//! EBS volumes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{tag_policy_recommendation, ScanContext, ServiceKind, ServiceScan, ServiceScanner};
use crate::client::{page_items, ApiRequest, ResourceClient};
use crate::error::ScanError;
use crate::pricing;
use crate::recommendation::{Category, Recommendation, Severity};
use crate::resource::{decode_all, name_tag, round_cents, Tag, Timestamp};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawVolume {
    volume_id: String,
    volume_type: String,
    size: u64,
    state: String,
    #[serde(default)]
    encrypted: bool,
    create_time: Option<Timestamp>,
    availability_zone: Option<String>,
    #[serde(default)]
    attachments: Vec<RawAttachment>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawAttachment {
    instance_id: Option<String>,
}

/// An EBS volume.
#[derive(Debug, Clone, Serialize)]
pub struct EbsVolume {
    /// Volume ID.
    pub id: String,
    /// `Name` tag.
    pub name: Option<String>,
    /// Volume type (`gp2`, `gp3`, `io1`, ...).
    pub volume_type: String,
    /// Provisioned size in GiB.
    pub size_gib: u64,
    /// API state (`available`, `in-use`, ...).
    pub state: String,
    /// Encrypted at rest.
    pub encrypted: bool,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// Availability zone.
    pub availability_zone: Option<String>,
    /// Instances the volume is attached to.
    pub attached_instances: Vec<String>,
    /// Tags.
    pub tags: Vec<Tag>,
}

impl EbsVolume {
    /// Whether nothing is using the volume.
    #[must_use]
    pub fn is_unattached(&self) -> bool {
        self.state == "available" || self.attached_instances.is_empty()
    }

    /// Whether the volume is a gp2 candidate for gp3.
    #[must_use]
    pub fn is_gp2(&self) -> bool {
        self.volume_type == "gp2"
    }

    /// Estimated monthly storage cost.
    #[must_use]
    pub fn monthly_cost(&self) -> f64 {
        pricing::ebs_volume_monthly(&self.volume_type, self.size_gib)
    }
}

/// Map a `describe-volumes` response to volumes.
///
/// # Errors
/// Returns [`ScanError::Decode`] if a volume record is malformed.
pub fn parse_volumes(response: &Value) -> Result<Vec<EbsVolume>, ScanError> {
    let raw: Vec<RawVolume> = decode_all("EBS volume", page_items(response, "Volumes"))?;
    Ok(raw
        .into_iter()
        .map(|v| EbsVolume {
            name: name_tag(&v.tags),
            id: v.volume_id,
            volume_type: v.volume_type,
            size_gib: v.size,
            state: v.state,
            encrypted: v.encrypted,
            created_at: v.create_time.as_ref().and_then(Timestamp::to_utc),
            availability_zone: v.availability_zone,
            attached_instances: v
                .attachments
                .into_iter()
                .filter_map(|a| a.instance_id)
                .collect(),
            tags: v.tags,
        })
        .collect())
}

/// EBS summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EbsSummary {
    /// Volumes.
    pub total: usize,
    /// Volumes attached to an instance.
    pub attached: usize,
    /// Volumes attached to nothing.
    pub unattached: usize,
    /// Provisioned GiB across all volumes.
    pub total_size_gib: u64,
    /// Provisioned GiB on unattached volumes.
    pub unattached_size_gib: u64,
    /// gp2 volumes.
    pub gp2_count: usize,
    /// Unencrypted volumes.
    pub unencrypted: usize,
    /// Estimated monthly storage cost, USD.
    pub estimated_monthly_cost: f64,
}

/// Aggregate volume counts, sizes and cost.
#[must_use]
pub fn summarize(volumes: &[EbsVolume]) -> EbsSummary {
    let unattached: Vec<&EbsVolume> = volumes.iter().filter(|v| v.is_unattached()).collect();
    EbsSummary {
        total: volumes.len(),
        attached: volumes.len() - unattached.len(),
        unattached: unattached.len(),
        total_size_gib: volumes.iter().map(|v| v.size_gib).sum(),
        unattached_size_gib: unattached.iter().map(|v| v.size_gib).sum(),
        gp2_count: volumes.iter().filter(|v| v.is_gp2()).count(),
        unencrypted: volumes.iter().filter(|v| !v.encrypted).count(),
        estimated_monthly_cost: round_cents(volumes.iter().map(EbsVolume::monthly_cost).sum()),
    }
}

/// Evaluate EBS rules.
#[must_use]
pub fn recommend(volumes: &[EbsVolume], ctx: &ScanContext) -> Vec<Recommendation> {
    let mut recs = Vec::new();

    for volume in volumes {
        if volume.is_unattached() {
            recs.push(
                Recommendation::new(
                    ServiceKind::Ebs,
                    Category::Cost,
                    Severity::High,
                    "Unattached EBS volume",
                )
                .resource(&volume.id)
                .description(format!(
                    "{} GiB {} volume is not attached to any instance. Snapshot it if the data matters, then delete it.",
                    volume.size_gib, volume.volume_type
                ))
                .savings(volume.monthly_cost()),
            );
        } else if volume.is_gp2() {
            recs.push(
                Recommendation::new(
                    ServiceKind::Ebs,
                    Category::Cost,
                    Severity::Low,
                    "Migrate gp2 volume to gp3",
                )
                .resource(&volume.id)
                .description(format!(
                    "gp3 costs about 20% less per GiB than gp2 and provides 3000 IOPS baseline; {} GiB can be modified in place.",
                    volume.size_gib
                ))
                .savings(pricing::gp2_to_gp3_savings(volume.size_gib)),
            );
        }

        if !volume.encrypted {
            recs.push(
                Recommendation::new(
                    ServiceKind::Ebs,
                    Category::Security,
                    Severity::Medium,
                    "Unencrypted EBS volume",
                )
                .resource(&volume.id)
                .description(
                    "Volume is not encrypted at rest. Copy it through an encrypted snapshot and enable EBS encryption by default.",
                ),
            );
        }

        if let Some(rec) = tag_policy_recommendation(ServiceKind::Ebs, &volume.id, &volume.tags, ctx)
        {
            recs.push(rec);
        }
    }

    recs
}

/// EBS volume scanner.
#[derive(Debug, Clone, Copy, Default)]
pub struct EbsScanner;

#[async_trait]
impl ServiceScanner for EbsScanner {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Ebs
    }

    async fn scan(
        &self,
        client: &dyn ResourceClient,
        ctx: &ScanContext,
    ) -> Result<ServiceScan, ScanError> {
        let response = client
            .call(&ApiRequest::new("ec2", "describe-volumes"))
            .await?;
        let volumes = parse_volumes(&response)?;
        let summary = summarize(&volumes);
        info!(
            total = summary.total,
            unattached = summary.unattached,
            "EBS volumes scanned"
        );
        let recs = recommend(&volumes, ctx);
        ServiceScan::build(&volumes, &summary, recs, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn volumes() -> Vec<EbsVolume> {
        parse_volumes(&json!({"Volumes": [
            {
                "VolumeId": "vol-attached",
                "VolumeType": "gp3",
                "Size": 100,
                "State": "in-use",
                "Encrypted": true,
                "Attachments": [{"InstanceId": "i-1", "State": "attached"}],
                "Tags": [{"Key": "team", "Value": "core"}]
            },
            {
                "VolumeId": "vol-orphan",
                "VolumeType": "gp2",
                "Size": 500,
                "State": "available",
                "Encrypted": false,
                "Attachments": []
            },
            {
                "VolumeId": "vol-gp2",
                "VolumeType": "gp2",
                "Size": 200,
                "State": "in-use",
                "Encrypted": true,
                "Attachments": [{"InstanceId": "i-2"}],
                "Tags": [{"Key": "team", "Value": "core"}]
            }
        ]}))
        .unwrap()
    }

    #[test]
    fn test_parse_and_derive() {
        let volumes = volumes();
        assert_eq!(volumes[0].attached_instances, vec!["i-1"]);
        assert!(!volumes[0].is_unattached());
        assert!(volumes[1].is_unattached());
        assert!((volumes[1].monthly_cost() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_summarize() {
        let summary = summarize(&volumes());
        assert_eq!(summary.total, 3);
        assert_eq!(summary.attached, 2);
        assert_eq!(summary.unattached, 1);
        assert_eq!(summary.total_size_gib, 800);
        assert_eq!(summary.unattached_size_gib, 500);
        assert_eq!(summary.gp2_count, 2);
        assert_eq!(summary.unencrypted, 1);
        // 100 * 0.08 + 500 * 0.10 + 200 * 0.10
        assert!((summary.estimated_monthly_cost - 78.0).abs() < 1e-9);
    }

    #[test]
    fn test_recommend() {
        let ctx = ScanContext::new(Utc::now()).with_required_tags(vec!["team".to_string()]);
        let recs = recommend(&volumes(), &ctx);
        let titles: Vec<_> = recs
            .iter()
            .map(|r| (r.resource_id.as_deref().unwrap_or(""), r.title.as_str()))
            .collect();

        assert_eq!(
            titles,
            vec![
                ("vol-orphan", "Unattached EBS volume"),
                ("vol-orphan", "Unencrypted EBS volume"),
                ("vol-orphan", "Missing required tags"),
                ("vol-gp2", "Migrate gp2 volume to gp3"),
            ]
        );
        assert_eq!(recs[0].estimated_monthly_savings, Some(50.0));
        assert_eq!(recs[3].estimated_monthly_savings, Some(4.0));
    }
}
