//! DynamoDB tables.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{probe, Probe, ScanContext, ServiceKind, ServiceScan, ServiceScanner};
use crate::client::{ApiRequest, ResourceClient};
use crate::error::ScanError;
use crate::pricing;
use crate::recommendation::{Category, Recommendation, Severity};
use crate::resource::{decode_all, decode_one, Timestamp};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawTable {
    table_name: String,
    table_status: String,
    #[serde(default)]
    item_count: u64,
    #[serde(default)]
    table_size_bytes: u64,
    billing_mode_summary: Option<RawBillingMode>,
    provisioned_throughput: Option<RawThroughput>,
    creation_date_time: Option<Timestamp>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawBillingMode {
    billing_mode: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawThroughput {
    #[serde(default)]
    read_capacity_units: u64,
    #[serde(default)]
    write_capacity_units: u64,
}

/// Capacity mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingMode {
    /// Fixed read/write capacity.
    Provisioned,
    /// Pay per request.
    OnDemand,
}

/// A DynamoDB table.
///
/// Fields read from `describe-table` are `None` when the description could
/// not be read.
#[derive(Debug, Clone, Serialize)]
pub struct DynamoDbTable {
    /// Table name.
    pub name: String,
    /// API status (`ACTIVE`, `UPDATING`, ...).
    pub status: Option<String>,
    /// Capacity mode.
    pub billing_mode: Option<BillingMode>,
    /// Provisioned read capacity units.
    pub read_capacity_units: u64,
    /// Provisioned write capacity units.
    pub write_capacity_units: u64,
    /// Approximate item count (refreshed every ~6 hours).
    pub item_count: Option<u64>,
    /// Approximate table size.
    pub size_bytes: Option<u64>,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
}

impl DynamoDbTable {
    /// A listed table whose description could not be read.
    #[must_use]
    pub fn undescribed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: None,
            billing_mode: None,
            read_capacity_units: 0,
            write_capacity_units: 0,
            item_count: None,
            size_bytes: None,
            created_at: None,
        }
    }

    /// Whether the description was read.
    #[must_use]
    pub fn is_described(&self) -> bool {
        self.billing_mode.is_some()
    }

    /// Whether the table uses provisioned capacity.
    #[must_use]
    pub fn is_provisioned(&self) -> bool {
        self.billing_mode == Some(BillingMode::Provisioned)
    }

    /// Whether the table is known to hold no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.item_count == Some(0)
    }

    /// Monthly cost of provisioned capacity (zero for on-demand).
    #[must_use]
    pub fn provisioned_monthly_cost(&self) -> f64 {
        if self.is_provisioned() {
            pricing::dynamodb_provisioned_monthly(
                self.read_capacity_units,
                self.write_capacity_units,
            )
        } else {
            0.0
        }
    }
}

/// Map a `describe-table` response to a table.
///
/// Tables without a billing mode summary were created before on-demand
/// existed and are provisioned.
///
/// # Errors
/// Returns [`ScanError::Decode`] if the table record is malformed.
pub fn parse_table(response: &Value) -> Result<DynamoDbTable, ScanError> {
    let raw: RawTable = decode_one(
        "DynamoDB table",
        response.get("Table").cloned().unwrap_or(Value::Null),
    )?;
    let billing_mode = match raw.billing_mode_summary.as_ref().map(|b| b.billing_mode.as_str()) {
        Some("PAY_PER_REQUEST") => BillingMode::OnDemand,
        _ => BillingMode::Provisioned,
    };
    let (rcu, wcu) = raw
        .provisioned_throughput
        .map_or((0, 0), |t| (t.read_capacity_units, t.write_capacity_units));

    Ok(DynamoDbTable {
        name: raw.table_name,
        status: Some(raw.table_status),
        billing_mode: Some(billing_mode),
        read_capacity_units: rcu,
        write_capacity_units: wcu,
        item_count: Some(raw.item_count),
        size_bytes: Some(raw.table_size_bytes),
        created_at: raw.creation_date_time.as_ref().and_then(Timestamp::to_utc),
    })
}

/// List and describe every table.
///
/// A table whose description cannot be read is kept by name.
///
/// # Errors
/// Returns an error if `list-tables` fails or a description is malformed.
pub async fn fetch(
    client: &dyn ResourceClient,
) -> Result<(Vec<DynamoDbTable>, Vec<String>), ScanError> {
    let names: Vec<String> = decode_all(
        "DynamoDB table name",
        client
            .list(&ApiRequest::new("dynamodb", "list-tables"), "TableNames")
            .await?,
    )?;

    let mut warnings = Vec::new();
    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        let request =
            ApiRequest::new("dynamodb", "describe-table").for_resource("--table-name", &name);
        match probe(client, &request, &mut warnings).await {
            Probe::Found(response) => tables.push(parse_table(&response)?),
            // Deleted between list and describe.
            Probe::Absent => debug!(table = %name, "Table disappeared during scan"),
            Probe::Unknown => tables.push(DynamoDbTable::undescribed(name)),
        }
    }
    Ok((tables, warnings))
}

/// DynamoDB summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DynamoDbSummary {
    /// Tables listed.
    pub total: usize,
    /// Tables whose description could not be read.
    pub undescribed: usize,
    /// On-demand tables.
    pub on_demand: usize,
    /// Provisioned tables.
    pub provisioned: usize,
    /// Tables with no items.
    pub empty: usize,
    /// Items across tables.
    pub total_items: u64,
    /// Bytes across tables.
    pub total_size_bytes: u64,
    /// Monthly cost of provisioned capacity, USD.
    pub provisioned_monthly_cost: f64,
}

/// Count tables by mode and usage.
#[must_use]
pub fn summarize(tables: &[DynamoDbTable]) -> DynamoDbSummary {
    let count_mode =
        |mode: BillingMode| tables.iter().filter(|t| t.billing_mode == Some(mode)).count();
    DynamoDbSummary {
        total: tables.len(),
        undescribed: tables.iter().filter(|t| !t.is_described()).count(),
        on_demand: count_mode(BillingMode::OnDemand),
        provisioned: count_mode(BillingMode::Provisioned),
        empty: tables.iter().filter(|t| t.is_empty()).count(),
        total_items: tables.iter().filter_map(|t| t.item_count).sum(),
        total_size_bytes: tables.iter().filter_map(|t| t.size_bytes).sum(),
        provisioned_monthly_cost: crate::resource::round_cents(
            tables.iter().map(DynamoDbTable::provisioned_monthly_cost).sum(),
        ),
    }
}

/// Evaluate DynamoDB rules.
#[must_use]
pub fn recommend(tables: &[DynamoDbTable]) -> Vec<Recommendation> {
    tables
        .iter()
        .filter(|t| t.is_empty())
        .map(|t| {
            if t.is_provisioned() {
                Recommendation::new(
                    ServiceKind::Dynamodb,
                    Category::Cost,
                    Severity::Medium,
                    "Empty table with provisioned capacity",
                )
                .resource(&t.name)
                .description(format!(
                    "Table holds no items but pays for {} RCU / {} WCU. Delete it or switch it to on-demand.",
                    t.read_capacity_units, t.write_capacity_units
                ))
                .savings(t.provisioned_monthly_cost())
            } else {
                Recommendation::new(
                    ServiceKind::Dynamodb,
                    Category::Operations,
                    Severity::Low,
                    "Empty table",
                )
                .resource(&t.name)
                .description("On-demand table holds no items. Delete it if it is no longer used.")
            }
        })
        .collect()
}

/// DynamoDB scanner.
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamoDbScanner;

#[async_trait]
impl ServiceScanner for DynamoDbScanner {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Dynamodb
    }

    async fn scan(
        &self,
        client: &dyn ResourceClient,
        _ctx: &ScanContext,
    ) -> Result<ServiceScan, ScanError> {
        let (tables, warnings) = fetch(client).await?;
        let summary = summarize(&tables);
        info!(
            total = summary.total,
            empty = summary.empty,
            "DynamoDB tables scanned"
        );
        let recs = recommend(&tables);
        ServiceScan::build(&tables, &summary, recs, warnings)
    }
}
