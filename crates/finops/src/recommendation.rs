//! Recommendation records produced by the service rules.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::resource::round_cents;
use crate::services::ServiceKind;

/// How urgent a finding is.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Housekeeping.
    Low,
    /// Worth scheduling.
    Medium,
    /// Act soon.
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// What a finding is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Spend that can be reduced.
    Cost,
    /// Exposure or missing protection.
    Security,
    /// Durability or availability gaps.
    Reliability,
    /// Hygiene: tagging, naming, unused resources.
    Operations,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cost => write!(f, "cost"),
            Self::Security => write!(f, "security"),
            Self::Reliability => write!(f, "reliability"),
            Self::Operations => write!(f, "operations"),
        }
    }
}

/// A single rule finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Service the finding belongs to.
    pub service: ServiceKind,
    /// Affected resource, if the finding targets one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Finding category.
    pub category: Category,
    /// Finding severity.
    pub severity: Severity,
    /// One-line summary.
    pub title: String,
    /// Details and suggested action.
    pub description: String,
    /// Estimated monthly saving in USD, when the rule can price it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_monthly_savings: Option<f64>,
}

impl Recommendation {
    /// Start a recommendation without resource, description or savings.
    pub fn new(
        service: ServiceKind,
        category: Category,
        severity: Severity,
        title: impl Into<String>,
    ) -> Self {
        Self {
            service,
            resource_id: None,
            category,
            severity,
            title: title.into(),
            description: String::new(),
            estimated_monthly_savings: None,
        }
    }

    /// Attach the affected resource.
    #[must_use]
    pub fn resource(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    /// Attach details.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Attach a savings estimate, rounded to cents. Non-positive amounts are dropped.
    #[must_use]
    pub fn savings(mut self, monthly_usd: f64) -> Self {
        self.estimated_monthly_savings = (monthly_usd > 0.0).then(|| round_cents(monthly_usd));
        self
    }

    /// Savings or zero.
    #[must_use]
    pub fn savings_or_zero(&self) -> f64 {
        self.estimated_monthly_savings.unwrap_or(0.0)
    }
}

/// Order by severity (high first), then savings (largest first).
pub fn sort_recommendations(recommendations: &mut [Recommendation]) {
    recommendations.sort_by(|a, b| {
        b.severity.cmp(&a.severity).then_with(|| {
            b.savings_or_zero()
                .partial_cmp(&a.savings_or_zero())
                .unwrap_or(Ordering::Equal)
        })
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering_and_parsing() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
        assert!("urgent".parse::<Severity>().is_err());
    }

    #[test]
    fn test_savings_rounding_and_dropping() {
        let rec = Recommendation::new(ServiceKind::Ebs, Category::Cost, Severity::High, "x")
            .savings(12.344);
        assert_eq!(rec.estimated_monthly_savings, Some(12.34));

        let rec = Recommendation::new(ServiceKind::Ebs, Category::Cost, Severity::High, "x")
            .savings(0.0);
        assert_eq!(rec.estimated_monthly_savings, None);
    }

    #[test]
    fn test_sort_recommendations() {
        let mut recs = vec![
            Recommendation::new(ServiceKind::Ec2, Category::Cost, Severity::Low, "low"),
            Recommendation::new(ServiceKind::Ebs, Category::Cost, Severity::High, "small")
                .savings(5.0),
            Recommendation::new(ServiceKind::S3, Category::Security, Severity::Medium, "medium"),
            Recommendation::new(ServiceKind::Ebs, Category::Cost, Severity::High, "big")
                .savings(50.0),
        ];
        sort_recommendations(&mut recs);
        let titles: Vec<_> = recs.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["big", "small", "medium", "low"]);
    }

    #[test]
    fn test_serialization_omits_empty_fields() {
        let rec = Recommendation::new(ServiceKind::S3, Category::Security, Severity::High, "t");
        let value = serde_json::to_value(&rec).unwrap();
        assert_eq!(value["service"], "s3");
        assert_eq!(value["severity"], "high");
        assert!(value.get("resource_id").is_none());
        assert!(value.get("estimated_monthly_savings").is_none());
    }
}
