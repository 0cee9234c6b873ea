//! Text and JSON rendering of reports.

use std::fmt::Write as _;

use colored::Colorize;
use serde::Serialize;
use serde_json::Value;

use crate::recommendation::{Recommendation, Severity};
use crate::report::{FinopsReport, ServiceReport};
use crate::services::ServiceKind;

/// Pretty JSON for any report value.
///
/// # Errors
/// Returns an error if the value cannot be serialized.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}

fn severity_label(severity: Severity) -> String {
    let label = format!("[{}]", severity.to_string().to_uppercase());
    match severity {
        Severity::High => label.red().bold().to_string(),
        Severity::Medium => label.yellow().to_string(),
        Severity::Low => label.dimmed().to_string(),
    }
}

fn format_usd(amount: f64) -> String {
    format!("${amount:.2}")
}

/// One line of summary counters (`total=3 idle=1`), nested objects skipped.
fn summary_line(summary: &Value) -> String {
    match summary {
        Value::Object(fields) => fields
            .iter()
            .filter_map(|(key, value)| match value {
                Value::Number(n) => Some(format!("{key}={n}")),
                Value::Bool(b) => Some(format!("{key}={b}")),
                Value::String(s) => Some(format!("{key}={s}")),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}

fn write_recommendation(out: &mut String, rec: &Recommendation, with_service: bool) {
    let target = match (&rec.resource_id, with_service) {
        (Some(id), true) => format!("{}:{id}", rec.service),
        (Some(id), false) => id.clone(),
        (None, true) => rec.service.to_string(),
        (None, false) => String::new(),
    };
    let _ = write!(
        out,
        "  {} {} ({})",
        severity_label(rec.severity),
        rec.title,
        rec.category
    );
    if !target.is_empty() {
        let _ = write!(out, " {}", target.cyan());
    }
    if let Some(savings) = rec.estimated_monthly_savings {
        let _ = write!(out, " {}", format!("~{}/mo", format_usd(savings)).green());
    }
    out.push('\n');
    if !rec.description.is_empty() {
        let _ = writeln!(out, "      {}", rec.description);
    }
}

fn write_service(out: &mut String, service: &ServiceReport) {
    let _ = write!(out, "{}", service.service.to_string().bold());
    if let Some(error) = &service.error {
        let _ = writeln!(out, " {}", format!("failed: {error}").red());
        return;
    }
    let _ = writeln!(out, " {}", summary_line(&service.summary));
    for rec in &service.recommendations {
        write_recommendation(out, rec, false);
    }
    for warning in &service.warnings {
        let _ = writeln!(out, "  {} {warning}", "warning:".yellow());
    }
}

/// Human-readable report.
#[must_use]
pub fn render_report(report: &FinopsReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "FinOps report ({}, generated {})\n",
        report.region.as_deref().unwrap_or("default region"),
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    for service in &report.services {
        write_service(&mut out, service);
        out.push('\n');
    }

    let totals = &report.totals;
    let _ = writeln!(
        out,
        "{} {} services scanned, {} failed, {} resources",
        "Totals:".bold(),
        totals.services_scanned,
        totals.services_failed,
        totals.resources
    );
    let _ = writeln!(
        out,
        "  {} recommendations ({} high, {} medium, {} low)",
        totals.recommendations, totals.high, totals.medium, totals.low
    );
    let _ = writeln!(
        out,
        "  Estimated monthly savings: {}",
        format_usd(totals.estimated_monthly_savings).green()
    );
    out
}

/// Flat list of recommendations, one block each.
#[must_use]
pub fn render_recommendations(recommendations: &[Recommendation]) -> String {
    if recommendations.is_empty() {
        return "No recommendations\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(out, "{} recommendation(s):\n", recommendations.len());
    for rec in recommendations {
        write_recommendation(&mut out, rec, true);
    }
    out
}

/// Rendered text with terminal color codes removed, for writing to files.
#[must_use]
pub fn plain_text(rendered: &str) -> String {
    console::strip_ansi_codes(rendered).into_owned()
}

/// Supported services with descriptions.
#[must_use]
pub fn render_services() -> String {
    let mut out = String::new();
    for kind in ServiceKind::ALL {
        let _ = writeln!(out, "{:<16} {}", kind.as_str(), kind.description());
    }
    out
}
