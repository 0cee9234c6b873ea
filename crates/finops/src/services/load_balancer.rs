//! Elastic Load Balancing v2 (application, network, gateway).
//!
//! A load balancer is idle when no target group points at it or its target
//! groups have no registered targets.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{probe, Probe, ScanContext, ServiceKind, ServiceScan, ServiceScanner};
use crate::client::{page_items, ApiRequest, ResourceClient};
use crate::error::ScanError;
use crate::pricing;
use crate::recommendation::{Category, Recommendation, Severity};
use crate::resource::{decode_all, Timestamp};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawLoadBalancer {
    load_balancer_arn: String,
    load_balancer_name: String,
    #[serde(rename = "Type")]
    lb_type: String,
    scheme: Option<String>,
    state: Option<RawState>,
    #[serde(rename = "DNSName")]
    dns_name: Option<String>,
    created_time: Option<Timestamp>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawState {
    code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawTargetGroup {
    target_group_arn: String,
    #[serde(default)]
    load_balancer_arns: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawTargetHealth {
    target_health: Option<RawHealthState>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawHealthState {
    state: String,
}

/// Registered/healthy target counts of one target group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct TargetCounts {
    registered: usize,
    healthy: usize,
}

/// A load balancer with its target coverage.
#[derive(Debug, Clone, Serialize)]
pub struct LoadBalancer {
    /// Load balancer ARN.
    pub arn: String,
    /// Name.
    pub name: String,
    /// `application`, `network` or `gateway`.
    pub lb_type: String,
    /// `internet-facing` or `internal`.
    pub scheme: Option<String>,
    /// State code (`active`, `provisioning`, `failed`).
    pub state: Option<String>,
    /// DNS name.
    pub dns_name: Option<String>,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// Target groups forwarding from this load balancer.
    pub target_groups: usize,
    /// Registered targets across those groups.
    pub registered_targets: usize,
    /// Healthy targets across those groups.
    pub healthy_targets: usize,
    /// Whether target health could be read for every group.
    pub targets_verified: bool,
}

impl LoadBalancer {
    /// Whether the load balancer serves nothing.
    ///
    /// Unverified target counts never make a load balancer idle.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.target_groups == 0 || (self.targets_verified && self.registered_targets == 0)
    }

    /// Whether targets are registered but none are healthy.
    #[must_use]
    pub fn is_unhealthy(&self) -> bool {
        self.targets_verified && self.registered_targets > 0 && self.healthy_targets == 0
    }

    /// Whether the load balancer is reachable from the internet.
    #[must_use]
    pub fn is_internet_facing(&self) -> bool {
        self.scheme.as_deref() == Some("internet-facing")
    }

    /// Monthly fixed cost.
    #[must_use]
    pub fn monthly_cost(&self) -> f64 {
        pricing::load_balancer_monthly(&self.lb_type)
    }
}

/// List load balancers and resolve their target groups and target health.
///
/// # Errors
/// Returns an error if listing load balancers or target groups fails.
pub async fn fetch(
    client: &dyn ResourceClient,
) -> Result<(Vec<LoadBalancer>, Vec<String>), ScanError> {
    let raw_lbs: Vec<RawLoadBalancer> = decode_all(
        "load balancer",
        client
            .list(
                &ApiRequest::new("elbv2", "describe-load-balancers"),
                "LoadBalancers",
            )
            .await?,
    )?;
    let groups: Vec<RawTargetGroup> = decode_all(
        "target group",
        client
            .list(
                &ApiRequest::new("elbv2", "describe-target-groups"),
                "TargetGroups",
            )
            .await?,
    )?;

    let mut warnings = Vec::new();
    let mut health: BTreeMap<String, Option<TargetCounts>> = BTreeMap::new();
    for group in groups.iter().filter(|g| !g.load_balancer_arns.is_empty()) {
        let request = ApiRequest::new("elbv2", "describe-target-health")
            .for_resource("--target-group-arn", &group.target_group_arn);
        let counts = match probe(client, &request, &mut warnings).await {
            Probe::Found(response) => {
                let targets: Vec<RawTargetHealth> = decode_all(
                    "target health",
                    page_items(&response, "TargetHealthDescriptions"),
                )?;
                Some(TargetCounts {
                    registered: targets.len(),
                    healthy: targets
                        .iter()
                        .filter(|t| {
                            t.target_health
                                .as_ref()
                                .is_some_and(|h| h.state == "healthy")
                        })
                        .count(),
                })
            }
            Probe::Absent => Some(TargetCounts::default()),
            Probe::Unknown => None,
        };
        health.insert(group.target_group_arn.clone(), counts);
    }

    let lbs = raw_lbs
        .into_iter()
        .map(|lb| {
            let attached: Vec<&RawTargetGroup> = groups
                .iter()
                .filter(|g| g.load_balancer_arns.contains(&lb.load_balancer_arn))
                .collect();
            let counts: Vec<Option<TargetCounts>> = attached
                .iter()
                .map(|g| health.get(&g.target_group_arn).copied().flatten())
                .collect();

            LoadBalancer {
                target_groups: attached.len(),
                registered_targets: counts.iter().flatten().map(|c| c.registered).sum(),
                healthy_targets: counts.iter().flatten().map(|c| c.healthy).sum(),
                targets_verified: counts.iter().all(Option::is_some),
                arn: lb.load_balancer_arn,
                name: lb.load_balancer_name,
                lb_type: lb.lb_type,
                scheme: lb.scheme,
                state: lb.state.map(|s| s.code),
                dns_name: lb.dns_name,
                created_at: lb.created_time.as_ref().and_then(Timestamp::to_utc),
            }
        })
        .collect();

    Ok((lbs, warnings))
}

/// Load balancer summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadBalancerSummary {
    /// Load balancers.
    pub total: usize,
    /// Load balancers per type.
    pub by_type: BTreeMap<String, usize>,
    /// Idle load balancers.
    pub idle: usize,
    /// Internet-facing load balancers.
    pub internet_facing: usize,
    /// Fixed hourly cost per month, USD.
    pub estimated_monthly_cost: f64,
}

/// Count load balancers by type and usage.
#[must_use]
pub fn summarize(lbs: &[LoadBalancer]) -> LoadBalancerSummary {
    let mut by_type = BTreeMap::new();
    for lb in lbs {
        *by_type.entry(lb.lb_type.clone()).or_insert(0) += 1;
    }
    LoadBalancerSummary {
        total: lbs.len(),
        by_type,
        idle: lbs.iter().filter(|lb| lb.is_idle()).count(),
        internet_facing: lbs.iter().filter(|lb| lb.is_internet_facing()).count(),
        estimated_monthly_cost: crate::resource::round_cents(
            lbs.iter().map(LoadBalancer::monthly_cost).sum(),
        ),
    }
}

/// Evaluate load balancer rules.
#[must_use]
pub fn recommend(lbs: &[LoadBalancer]) -> Vec<Recommendation> {
    let mut recs = Vec::new();
    for lb in lbs {
        if lb.is_idle() {
            let reason = if lb.target_groups == 0 {
                "has no target groups"
            } else {
                "has no registered targets"
            };
            recs.push(
                Recommendation::new(
                    ServiceKind::LoadBalancer,
                    Category::Cost,
                    Severity::High,
                    "Idle load balancer",
                )
                .resource(&lb.name)
                .description(format!(
                    "{} load balancer {reason}. Delete it if nothing routes through it.",
                    lb.lb_type
                ))
                .savings(lb.monthly_cost()),
            );
        } else if lb.is_unhealthy() {
            recs.push(
                Recommendation::new(
                    ServiceKind::LoadBalancer,
                    Category::Reliability,
                    Severity::Medium,
                    "No healthy targets",
                )
                .resource(&lb.name)
                .description(format!(
                    "{} targets are registered but none pass health checks.",
                    lb.registered_targets
                )),
            );
        }
    }
    recs
}

/// Load balancer scanner.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadBalancerScanner;

#[async_trait]
impl ServiceScanner for LoadBalancerScanner {
    fn kind(&self) -> ServiceKind {
        ServiceKind::LoadBalancer
    }

    async fn scan(
        &self,
        client: &dyn ResourceClient,
        _ctx: &ScanContext,
    ) -> Result<ServiceScan, ScanError> {
        let (lbs, warnings) = fetch(client).await?;
        let summary = summarize(&lbs);
        info!(total = summary.total, idle = summary.idle, "Load balancers scanned");
        let recs = recommend(&lbs);
        ServiceScan::build(&lbs, &summary, recs, warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StaticClient;
    use crate::error::ClientError;
    use serde_json::json;

    const WEB: &str = "arn:aws:elasticloadbalancing:us-east-1:111:loadbalancer/app/web/1";
    const EMPTY: &str = "arn:aws:elasticloadbalancing:us-east-1:111:loadbalancer/app/empty/2";
    const ORPHAN: &str = "arn:aws:elasticloadbalancing:us-east-1:111:loadbalancer/net/orphan/3";
    const BROKEN: &str = "arn:aws:elasticloadbalancing:us-east-1:111:loadbalancer/app/broken/4";
    const SECRET: &str = "arn:aws:elasticloadbalancing:us-east-1:111:loadbalancer/app/secret/5";

    fn health(tg: &str) -> ApiRequest {
        ApiRequest::new("elbv2", "describe-target-health").for_resource("--target-group-arn", tg)
    }

    fn lb(arn: &str, name: &str, lb_type: &str) -> serde_json::Value {
        json!({
            "LoadBalancerArn": arn,
            "LoadBalancerName": name,
            "Type": lb_type,
            "Scheme": "internet-facing",
            "State": {"Code": "active"}
        })
    }

    fn client() -> StaticClient {
        StaticClient::new()
            .with_response(
                ApiRequest::new("elbv2", "describe-load-balancers"),
                json!({"LoadBalancers": [
                    lb(WEB, "web", "application"),
                    lb(EMPTY, "empty", "application"),
                    lb(ORPHAN, "orphan", "network"),
                    lb(BROKEN, "broken", "application"),
                    lb(SECRET, "secret", "application"),
                ]}),
            )
            .with_response(
                ApiRequest::new("elbv2", "describe-target-groups"),
                json!({"TargetGroups": [
                    {"TargetGroupArn": "tg-web", "LoadBalancerArns": [WEB]},
                    {"TargetGroupArn": "tg-empty", "LoadBalancerArns": [EMPTY]},
                    {"TargetGroupArn": "tg-broken", "LoadBalancerArns": [BROKEN]},
                    {"TargetGroupArn": "tg-secret", "LoadBalancerArns": [SECRET]},
                    {"TargetGroupArn": "tg-detached", "LoadBalancerArns": []}
                ]}),
            )
            .with_response(
                health("tg-web"),
                json!({"TargetHealthDescriptions": [
                    {"Target": {"Id": "i-1"}, "TargetHealth": {"State": "healthy"}},
                    {"Target": {"Id": "i-2"}, "TargetHealth": {"State": "unhealthy"}}
                ]}),
            )
            .with_response(health("tg-empty"), json!({"TargetHealthDescriptions": []}))
            .with_response(
                health("tg-broken"),
                json!({"TargetHealthDescriptions": [
                    {"Target": {"Id": "i-3"}, "TargetHealth": {"State": "unhealthy"}}
                ]}),
            )
            .with_error(
                health("tg-secret"),
                ClientError::AccessDenied("elasticloadbalancing:DescribeTargetHealth".to_string()),
            )
    }

    #[tokio::test]
    async fn test_fetch_resolves_targets() {
        let (lbs, warnings) = fetch(&client()).await.unwrap();
        assert_eq!(lbs.len(), 5);
        assert_eq!(warnings.len(), 1);

        let web = &lbs[0];
        assert_eq!(web.target_groups, 1);
        assert_eq!(web.registered_targets, 2);
        assert_eq!(web.healthy_targets, 1);
        assert!(!web.is_idle());

        assert!(lbs[1].is_idle());
        assert_eq!(lbs[2].target_groups, 0);
        assert!(lbs[2].is_idle());
        assert!(lbs[3].is_unhealthy());

        let secret = &lbs[4];
        assert!(!secret.targets_verified);
        assert!(!secret.is_idle());
        assert!(!secret.is_unhealthy());
    }

    #[tokio::test]
    async fn test_summary_and_rules() {
        let (lbs, _) = fetch(&client()).await.unwrap();
        let summary = summarize(&lbs);
        assert_eq!(summary.total, 5);
        assert_eq!(summary.idle, 2);
        assert_eq!(summary.by_type.get("application"), Some(&4));
        assert_eq!(summary.internet_facing, 5);

        let recs = recommend(&lbs);
        let found: Vec<_> = recs
            .iter()
            .map(|r| (r.resource_id.as_deref().unwrap_or(""), r.title.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![
                ("empty", "Idle load balancer"),
                ("orphan", "Idle load balancer"),
                ("broken", "No healthy targets"),
            ]
        );
        assert_eq!(recs[1].estimated_monthly_savings, Some(16.2));
        assert!(recs[1].description.contains("no target groups"));
    }
}
