//! Multi-service report assembly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::client::ResourceClient;
use crate::recommendation::{sort_recommendations, Recommendation, Severity};
use crate::resource::round_cents;
use crate::services::{ScanContext, ServiceKind, ServiceScanner};

/// Report section for one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceReport {
    /// Service scanned.
    pub service: ServiceKind,
    /// Resources found.
    pub resource_count: usize,
    /// Aggregated summary; `null` when the scan failed.
    pub summary: Value,
    /// Resource records, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<Value>>,
    /// Findings, highest severity first.
    pub recommendations: Vec<Recommendation>,
    /// Per-resource describe failures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Why the scan failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceReport {
    /// Whether the service could not be scanned.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    fn failure(service: ServiceKind, error: String) -> Self {
        Self {
            service,
            resource_count: 0,
            summary: Value::Null,
            resources: None,
            recommendations: Vec::new(),
            warnings: Vec::new(),
            error: Some(error),
        }
    }
}

/// Report-wide totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportTotals {
    /// Services that produced a result.
    pub services_scanned: usize,
    /// Services whose scan failed.
    pub services_failed: usize,
    /// Resources across services.
    pub resources: usize,
    /// Findings across services.
    pub recommendations: usize,
    /// High-severity findings.
    pub high: usize,
    /// Medium-severity findings.
    pub medium: usize,
    /// Low-severity findings.
    pub low: usize,
    /// Sum of priced savings, USD per month.
    pub estimated_monthly_savings: f64,
}

impl ReportTotals {
    /// Recompute totals from service sections.
    #[must_use]
    pub fn from_services(services: &[ServiceReport]) -> Self {
        let mut totals = Self::default();
        let mut savings = 0.0;
        for service in services {
            if service.failed() {
                totals.services_failed += 1;
            } else {
                totals.services_scanned += 1;
            }
            totals.resources += service.resource_count;
            for rec in &service.recommendations {
                totals.recommendations += 1;
                match rec.severity {
                    Severity::High => totals.high += 1,
                    Severity::Medium => totals.medium += 1,
                    Severity::Low => totals.low += 1,
                }
                savings += rec.savings_or_zero();
            }
        }
        totals.estimated_monthly_savings = round_cents(savings);
        totals
    }
}

/// Complete scan report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinopsReport {
    /// When the scan ran.
    pub generated_at: DateTime<Utc>,
    /// Region scanned, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// One section per scanned service.
    pub services: Vec<ServiceReport>,
    /// Totals.
    pub totals: ReportTotals,
}

impl FinopsReport {
    /// All findings across services, highest severity and savings first.
    #[must_use]
    pub fn recommendations(&self) -> Vec<Recommendation> {
        let mut all: Vec<Recommendation> = self
            .services
            .iter()
            .flat_map(|s| s.recommendations.iter().cloned())
            .collect();
        sort_recommendations(&mut all);
        all
    }

    /// Section for a service, if it was scanned.
    #[must_use]
    pub fn service(&self, kind: ServiceKind) -> Option<&ServiceReport> {
        self.services.iter().find(|s| s.service == kind)
    }
}

/// Report shaping options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Keep raw resource records in the report.
    pub include_resources: bool,
    /// Drop findings below this severity.
    pub min_severity: Option<Severity>,
}

/// Keep findings at or above `min`.
#[must_use]
pub fn filter_by_severity(
    recommendations: Vec<Recommendation>,
    min: Option<Severity>,
) -> Vec<Recommendation> {
    match min {
        Some(min) => recommendations
            .into_iter()
            .filter(|r| r.severity >= min)
            .collect(),
        None => recommendations,
    }
}

/// Run scanners in order and assemble the report.
///
/// A failing service is recorded with its error; the remaining services
/// still run.
pub async fn run_scan(
    client: &dyn ResourceClient,
    scanners: &[Box<dyn ServiceScanner>],
    ctx: &ScanContext,
    options: ScanOptions,
) -> FinopsReport {
    let mut services = Vec::with_capacity(scanners.len());

    for scanner in scanners {
        let kind = scanner.kind();
        info!(service = %kind, "Scanning service");

        let section = match scanner.scan(client, ctx).await {
            Ok(scan) => {
                let mut recommendations =
                    filter_by_severity(scan.recommendations, options.min_severity);
                sort_recommendations(&mut recommendations);
                ServiceReport {
                    service: kind,
                    resource_count: scan.resources.len(),
                    summary: scan.summary,
                    resources: options.include_resources.then_some(scan.resources),
                    recommendations,
                    warnings: scan.warnings,
                    error: None,
                }
            }
            Err(e) => {
                warn!(service = %kind, error = %e, "Service scan failed");
                ServiceReport::failure(kind, e.to_string())
            }
        };
        services.push(section);
    }

    let totals = ReportTotals::from_services(&services);
    info!(
        services = totals.services_scanned,
        failed = totals.services_failed,
        recommendations = totals.recommendations,
        "Scan complete"
    );

    FinopsReport {
        generated_at: ctx.now,
        region: ctx.region.clone(),
        services,
        totals,
    }
}
