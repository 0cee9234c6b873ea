//! NAT gateways.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{ScanContext, ServiceKind, ServiceScan, ServiceScanner};
use crate::client::{page_items, ApiRequest, ResourceClient};
use crate::error::ScanError;
use crate::pricing::{monthly, NAT_GATEWAY_HOUR};
use crate::recommendation::{Category, Recommendation, Severity};
use crate::resource::{decode_all, name_tag, round_cents, Tag, Timestamp};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawNatGateway {
    nat_gateway_id: String,
    vpc_id: Option<String>,
    subnet_id: Option<String>,
    state: String,
    connectivity_type: Option<String>,
    create_time: Option<Timestamp>,
    #[serde(default)]
    tags: Vec<Tag>,
}

/// A NAT gateway.
#[derive(Debug, Clone, Serialize)]
pub struct NatGateway {
    /// Gateway ID.
    pub id: String,
    /// `Name` tag.
    pub name: Option<String>,
    /// VPC.
    pub vpc_id: Option<String>,
    /// Subnet.
    pub subnet_id: Option<String>,
    /// API state (`pending`, `available`, `deleting`, `deleted`, `failed`).
    pub state: String,
    /// `public` or `private`.
    pub connectivity_type: Option<String>,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
}

impl NatGateway {
    /// Whether the gateway is provisioned and billing.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == "available"
    }
}

/// Map a `describe-nat-gateways` response to gateways.
///
/// # Errors
/// Returns [`ScanError::Decode`] if a gateway record is malformed.
pub fn parse_gateways(response: &Value) -> Result<Vec<NatGateway>, ScanError> {
    let raw: Vec<RawNatGateway> = decode_all("NAT gateway", page_items(response, "NatGateways"))?;
    Ok(raw
        .into_iter()
        .map(|g| NatGateway {
            name: name_tag(&g.tags),
            id: g.nat_gateway_id,
            vpc_id: g.vpc_id,
            subnet_id: g.subnet_id,
            state: g.state,
            connectivity_type: g.connectivity_type,
            created_at: g.create_time.as_ref().and_then(Timestamp::to_utc),
        })
        .collect())
}

/// NAT gateway summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NatGatewaySummary {
    /// Gateways listed (deleted ones included).
    pub total: usize,
    /// Available gateways.
    pub available: usize,
    /// Available gateways per VPC.
    pub by_vpc: BTreeMap<String, usize>,
    /// VPCs with more than one available gateway.
    pub vpcs_with_multiple: usize,
    /// Fixed hourly cost of available gateways per month, USD.
    pub estimated_monthly_cost: f64,
}

fn active_by_vpc(gateways: &[NatGateway]) -> BTreeMap<String, usize> {
    let mut by_vpc = BTreeMap::new();
    for gateway in gateways.iter().filter(|g| g.is_active()) {
        let vpc = gateway.vpc_id.clone().unwrap_or_else(|| "unknown".to_string());
        *by_vpc.entry(vpc).or_insert(0) += 1;
    }
    by_vpc
}

/// Count gateways and their fixed cost.
#[must_use]
pub fn summarize(gateways: &[NatGateway]) -> NatGatewaySummary {
    let by_vpc = active_by_vpc(gateways);
    let available = gateways.iter().filter(|g| g.is_active()).count();
    #[allow(clippy::cast_precision_loss)]
    let cost = available as f64 * monthly(NAT_GATEWAY_HOUR);
    NatGatewaySummary {
        total: gateways.len(),
        available,
        vpcs_with_multiple: by_vpc.values().filter(|&&n| n > 1).count(),
        by_vpc,
        estimated_monthly_cost: round_cents(cost),
    }
}

/// Evaluate NAT gateway rules.
///
/// Multiple gateways in one VPC are usually one per AZ for resilience, so
/// the finding is low severity and priced at the extra gateways.
#[must_use]
pub fn recommend(gateways: &[NatGateway]) -> Vec<Recommendation> {
    active_by_vpc(gateways)
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(vpc, count)| {
            #[allow(clippy::cast_precision_loss)]
            let extra = (count - 1) as f64;
            Recommendation::new(
                ServiceKind::NatGateway,
                Category::Cost,
                Severity::Low,
                "Multiple NAT gateways in one VPC",
            )
            .resource(&vpc)
            .description(format!(
                "{vpc} runs {count} NAT gateways. For non-production VPCs a single shared gateway is usually enough; VPC endpoints for S3 and DynamoDB also remove NAT data charges."
            ))
            .savings(extra * monthly(NAT_GATEWAY_HOUR))
        })
        .collect()
}

/// NAT gateway scanner.
#[derive(Debug, Clone, Copy, Default)]
pub struct NatGatewayScanner;

#[async_trait]
impl ServiceScanner for NatGatewayScanner {
    fn kind(&self) -> ServiceKind {
        ServiceKind::NatGateway
    }

    async fn scan(
        &self,
        client: &dyn ResourceClient,
        _ctx: &ScanContext,
    ) -> Result<ServiceScan, ScanError> {
        let response = client
            .call(&ApiRequest::new("ec2", "describe-nat-gateways"))
            .await?;
        let gateways = parse_gateways(&response)?;
        let summary = summarize(&gateways);
        info!(
            total = summary.total,
            available = summary.available,
            "NAT gateways scanned"
        );
        let recs = recommend(&gateways);
        ServiceScan::build(&gateways, &summary, recs, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gateways() -> Vec<NatGateway> {
        parse_gateways(&json!({"NatGateways": [
            {"NatGatewayId": "nat-1", "VpcId": "vpc-a", "SubnetId": "subnet-1", "State": "available"},
            {"NatGatewayId": "nat-2", "VpcId": "vpc-a", "SubnetId": "subnet-2", "State": "available"},
            {"NatGatewayId": "nat-3", "VpcId": "vpc-a", "SubnetId": "subnet-3", "State": "available"},
            {"NatGatewayId": "nat-4", "VpcId": "vpc-b", "SubnetId": "subnet-4", "State": "available"},
            {"NatGatewayId": "nat-5", "VpcId": "vpc-b", "SubnetId": "subnet-5", "State": "deleted"}
        ]}))
        .unwrap()
    }

    #[test]
    fn test_summarize() {
        let summary = summarize(&gateways());
        assert_eq!(summary.total, 5);
        assert_eq!(summary.available, 4);
        assert_eq!(summary.by_vpc.get("vpc-a"), Some(&3));
        assert_eq!(summary.by_vpc.get("vpc-b"), Some(&1));
        assert_eq!(summary.vpcs_with_multiple, 1);
        assert!((summary.estimated_monthly_cost - 129.6).abs() < 1e-9);
    }

    #[test]
    fn test_recommend_consolidation() {
        let recs = recommend(&gateways());
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].resource_id.as_deref(), Some("vpc-a"));
        assert_eq!(recs[0].estimated_monthly_savings, Some(64.8));
    }
}
