//! Elastic IP addresses.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{ScanContext, ServiceKind, ServiceScan, ServiceScanner};
use crate::client::{page_items, ApiRequest, ResourceClient};
use crate::error::ScanError;
use crate::pricing::{monthly, IDLE_EIP_HOUR};
use crate::recommendation::{Category, Recommendation, Severity};
use crate::resource::{decode_all, name_tag, Tag};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawAddress {
    allocation_id: Option<String>,
    public_ip: String,
    association_id: Option<String>,
    instance_id: Option<String>,
    network_interface_id: Option<String>,
    domain: Option<String>,
    #[serde(default)]
    tags: Vec<Tag>,
}

/// An Elastic IP address.
#[derive(Debug, Clone, Serialize)]
pub struct ElasticIp {
    /// Allocation ID, or the public IP for EC2-Classic addresses.
    pub id: String,
    /// `Name` tag.
    pub name: Option<String>,
    /// Public IPv4 address.
    pub public_ip: String,
    /// Association ID when associated.
    pub association_id: Option<String>,
    /// Associated instance.
    pub instance_id: Option<String>,
    /// Associated network interface.
    pub network_interface_id: Option<String>,
    /// `vpc` or `standard`.
    pub domain: Option<String>,
}

impl ElasticIp {
    /// Whether the address is associated with an instance or interface.
    #[must_use]
    pub fn is_associated(&self) -> bool {
        self.association_id.is_some()
            || self.instance_id.is_some()
            || self.network_interface_id.is_some()
    }
}

/// Map a `describe-addresses` response to addresses.
///
/// # Errors
/// Returns [`ScanError::Decode`] if an address record is malformed.
pub fn parse_addresses(response: &Value) -> Result<Vec<ElasticIp>, ScanError> {
    let raw: Vec<RawAddress> = decode_all("Elastic IP", page_items(response, "Addresses"))?;
    Ok(raw
        .into_iter()
        .map(|a| ElasticIp {
            name: name_tag(&a.tags),
            id: a.allocation_id.unwrap_or_else(|| a.public_ip.clone()),
            public_ip: a.public_ip,
            association_id: a.association_id,
            instance_id: a.instance_id,
            network_interface_id: a.network_interface_id,
            domain: a.domain,
        })
        .collect())
}

/// Elastic IP summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElasticIpSummary {
    /// Addresses.
    pub total: usize,
    /// Associated addresses.
    pub associated: usize,
    /// Idle addresses.
    pub unassociated: usize,
}

/// Count associated and idle addresses.
#[must_use]
pub fn summarize(addresses: &[ElasticIp]) -> ElasticIpSummary {
    let associated = addresses.iter().filter(|a| a.is_associated()).count();
    ElasticIpSummary {
        total: addresses.len(),
        associated,
        unassociated: addresses.len() - associated,
    }
}

/// Evaluate Elastic IP rules.
#[must_use]
pub fn recommend(addresses: &[ElasticIp]) -> Vec<Recommendation> {
    addresses
        .iter()
        .filter(|a| !a.is_associated())
        .map(|a| {
            Recommendation::new(
                ServiceKind::ElasticIp,
                Category::Cost,
                Severity::Medium,
                "Unassociated Elastic IP",
            )
            .resource(&a.id)
            .description(format!(
                "{} is allocated but not associated with anything. Release it unless it must be kept for allow-lists.",
                a.public_ip
            ))
            .savings(monthly(IDLE_EIP_HOUR))
        })
        .collect()
}

/// Elastic IP scanner.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElasticIpScanner;

#[async_trait]
impl ServiceScanner for ElasticIpScanner {
    fn kind(&self) -> ServiceKind {
        ServiceKind::ElasticIp
    }

    async fn scan(
        &self,
        client: &dyn ResourceClient,
        _ctx: &ScanContext,
    ) -> Result<ServiceScan, ScanError> {
        let response = client
            .call(&ApiRequest::new("ec2", "describe-addresses"))
            .await?;
        let addresses = parse_addresses(&response)?;
        let summary = summarize(&addresses);
        info!(
            total = summary.total,
            unassociated = summary.unassociated,
            "Elastic IPs scanned"
        );
        let recs = recommend(&addresses);
        ServiceScan::build(&addresses, &summary, recs, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_idle_addresses_are_flagged() {
        let addresses = parse_addresses(&json!({"Addresses": [
            {
                "AllocationId": "eipalloc-1",
                "PublicIp": "3.3.3.3",
                "AssociationId": "eipassoc-1",
                "InstanceId": "i-1",
                "Domain": "vpc"
            },
            {"AllocationId": "eipalloc-2", "PublicIp": "4.4.4.4", "Domain": "vpc"},
            {"PublicIp": "5.5.5.5", "Domain": "standard"}
        ]}))
        .unwrap();

        let summary = summarize(&addresses);
        assert_eq!(
            summary,
            ElasticIpSummary {
                total: 3,
                associated: 1,
                unassociated: 2
            }
        );

        let recs = recommend(&addresses);
        let ids: Vec<_> = recs.iter().filter_map(|r| r.resource_id.as_deref()).collect();
        assert_eq!(ids, vec!["eipalloc-2", "5.5.5.5"]);
        assert_eq!(recs[0].estimated_monthly_savings, Some(3.6));
    }
}
