//! EC2 instances.
//!
//! Flags instances that have been stopped for a long time (their volumes and
//! addresses keep billing) and instances on previous-generation families.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{tag_policy_recommendation, ScanContext, ServiceKind, ServiceScan, ServiceScanner};
use crate::client::{page_items, ApiRequest, ResourceClient};
use crate::error::ScanError;
use crate::recommendation::{Category, Recommendation, Severity};
use crate::resource::{age_days, decode_all, name_tag, ratio, Tag, Timestamp};

/// Families AWS has superseded with a cheaper, faster generation.
const PREVIOUS_GENERATION_FAMILIES: &[&str] = &[
    "t1", "t2", "m1", "m2", "m3", "m4", "c1", "c3", "c4", "r3", "r4", "i2", "d2", "g2", "g3",
    "p2", "x1",
];

// ============================================================================
// Raw API shapes
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawInstance {
    instance_id: String,
    instance_type: String,
    state: RawState,
    launch_time: Option<Timestamp>,
    state_transition_reason: Option<String>,
    placement: Option<RawPlacement>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawState {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawPlacement {
    availability_zone: Option<String>,
}

// ============================================================================
// Records
// ============================================================================

/// Instance lifecycle state, mirroring the EC2 state names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Launching.
    Pending,
    /// Running.
    Running,
    /// Stopping.
    Stopping,
    /// Stopped.
    Stopped,
    /// Terminating.
    ShuttingDown,
    /// Terminated (still listed for a while).
    Terminated,
    /// Anything else.
    Unknown,
}

impl InstanceState {
    fn from_api(name: &str) -> Self {
        match name {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "shutting-down" => Self::ShuttingDown,
            "terminated" => Self::Terminated,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::ShuttingDown => write!(f, "shutting-down"),
            Self::Terminated => write!(f, "terminated"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// An EC2 instance.
#[derive(Debug, Clone, Serialize)]
pub struct Ec2Instance {
    /// Instance ID.
    pub id: String,
    /// `Name` tag.
    pub name: Option<String>,
    /// Instance type (`m6i.large`).
    pub instance_type: String,
    /// Lifecycle state.
    pub state: InstanceState,
    /// Availability zone.
    pub availability_zone: Option<String>,
    /// Launch time.
    pub launch_time: Option<DateTime<Utc>>,
    /// When the instance was stopped, parsed from the state transition reason.
    pub stopped_at: Option<DateTime<Utc>>,
    /// Tags.
    pub tags: Vec<Tag>,
}

impl Ec2Instance {
    /// Whether the instance is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == InstanceState::Running
    }

    /// Whether the instance is stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state == InstanceState::Stopped
    }

    /// Whether the instance is terminated or terminating.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        matches!(
            self.state,
            InstanceState::Terminated | InstanceState::ShuttingDown
        )
    }

    /// Instance family (`m6i` for `m6i.large`).
    #[must_use]
    pub fn family(&self) -> &str {
        self.instance_type
            .split('.')
            .next()
            .unwrap_or(&self.instance_type)
    }

    /// Whether the family has a newer generation.
    #[must_use]
    pub fn is_previous_generation(&self) -> bool {
        PREVIOUS_GENERATION_FAMILIES.contains(&self.family())
    }

    /// Days since the instance was stopped, when known.
    #[must_use]
    pub fn stopped_days(&self, now: DateTime<Utc>) -> Option<i64> {
        if !self.is_stopped() {
            return None;
        }
        self.stopped_at.map(|at| age_days(at, now))
    }

    fn from_raw(raw: RawInstance) -> Self {
        let state = InstanceState::from_api(&raw.state.name);
        let stopped_at = if state == InstanceState::Stopped {
            raw.state_transition_reason
                .as_deref()
                .and_then(parse_transition_time)
        } else {
            None
        };

        Self {
            name: name_tag(&raw.tags),
            id: raw.instance_id,
            instance_type: raw.instance_type,
            state,
            availability_zone: raw.placement.and_then(|p| p.availability_zone),
            launch_time: raw.launch_time.as_ref().and_then(Timestamp::to_utc),
            stopped_at,
            tags: raw.tags,
        }
    }
}

/// Parse `User initiated (2023-06-01 12:00:00 GMT)`.
fn parse_transition_time(reason: &str) -> Option<DateTime<Utc>> {
    let start = reason.find('(')? + 1;
    let end = reason[start..].find(')')? + start;
    let stamp = reason[start..end].trim().trim_end_matches("GMT").trim();
    NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Map a `describe-instances` response to instances.
///
/// # Errors
/// Returns [`ScanError::Decode`] if an instance record is malformed.
pub fn parse_instances(response: &Value) -> Result<Vec<Ec2Instance>, ScanError> {
    let raw: Vec<RawInstance> = decode_all(
        "EC2 instance",
        page_items(response, "Reservations")
            .iter()
            .flat_map(|reservation| page_items(reservation, "Instances"))
            .collect(),
    )?;
    Ok(raw.into_iter().map(Ec2Instance::from_raw).collect())
}

// ============================================================================
// Summary and rules
// ============================================================================

/// EC2 inventory summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ec2Summary {
    /// Instances listed (terminated included).
    pub total: usize,
    /// Running instances.
    pub running: usize,
    /// Stopped instances.
    pub stopped: usize,
    /// Instances in any other state.
    pub other: usize,
    /// Share of instances that are running.
    pub running_ratio: f64,
    /// Live instances per instance type.
    pub by_type: BTreeMap<String, usize>,
    /// Live instances on previous-generation families.
    pub previous_generation: usize,
}

/// Count instances by state and type.
#[must_use]
pub fn summarize(instances: &[Ec2Instance]) -> Ec2Summary {
    let running = instances.iter().filter(|i| i.is_running()).count();
    let stopped = instances.iter().filter(|i| i.is_stopped()).count();

    let mut by_type = BTreeMap::new();
    for instance in instances.iter().filter(|i| !i.is_terminated()) {
        *by_type.entry(instance.instance_type.clone()).or_insert(0) += 1;
    }

    Ec2Summary {
        total: instances.len(),
        running,
        stopped,
        other: instances.len() - running - stopped,
        running_ratio: ratio(running, instances.len()),
        by_type,
        previous_generation: instances
            .iter()
            .filter(|i| !i.is_terminated() && i.is_previous_generation())
            .count(),
    }
}

/// Evaluate EC2 rules.
#[must_use]
pub fn recommend(instances: &[Ec2Instance], ctx: &ScanContext) -> Vec<Recommendation> {
    let threshold = i64::from(ctx.thresholds.stopped_instance_days);
    let mut recs = Vec::new();

    for instance in instances.iter().filter(|i| !i.is_terminated()) {
        if instance.is_stopped() {
            let days = instance.stopped_days(ctx.now);
            if !matches!(days, Some(d) if d < threshold) {
                let since = days.map_or_else(
                    || "for an unknown period".to_string(),
                    |d| format!("for {d} days"),
                );
                recs.push(
                    Recommendation::new(
                        ServiceKind::Ec2,
                        Category::Cost,
                        Severity::Medium,
                        "Long-stopped instance",
                    )
                    .resource(&instance.id)
                    .description(format!(
                        "{} ({}) has been stopped {since}. Its EBS volumes and Elastic IPs are still billed; snapshot and terminate it if it is no longer needed.",
                        instance.name.as_deref().unwrap_or(&instance.id),
                        instance.instance_type
                    )),
                );
            }
        }

        if instance.is_previous_generation() {
            recs.push(
                Recommendation::new(
                    ServiceKind::Ec2,
                    Category::Cost,
                    Severity::Low,
                    "Previous-generation instance type",
                )
                .resource(&instance.id)
                .description(format!(
                    "{} uses the {} family. Current-generation families offer better price/performance.",
                    instance.instance_type,
                    instance.family()
                )),
            );
        }

        if let Some(rec) =
            tag_policy_recommendation(ServiceKind::Ec2, &instance.id, &instance.tags, ctx)
        {
            recs.push(rec);
        }
    }

    recs
}

/// EC2 scanner.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ec2Scanner;

#[async_trait]
impl ServiceScanner for Ec2Scanner {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Ec2
    }

    async fn scan(
        &self,
        client: &dyn ResourceClient,
        ctx: &ScanContext,
    ) -> Result<ServiceScan, ScanError> {
        let response = client
            .call(&ApiRequest::new("ec2", "describe-instances"))
            .await?;
        let instances = parse_instances(&response)?;
        let summary = summarize(&instances);
        info!(
            total = summary.total,
            running = summary.running,
            stopped = summary.stopped,
            "EC2 instances scanned"
        );
        let recs = recommend(&instances, ctx);
        ServiceScan::build(&instances, &summary, recs, Vec::new())
    }
}
