//! Lambda functions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{ScanContext, ServiceKind, ServiceScan, ServiceScanner};
use crate::client::{page_items, ApiRequest, ResourceClient};
use crate::error::ScanError;
use crate::pricing::LAMBDA_ARM_DISCOUNT;
use crate::recommendation::{Category, Recommendation, Severity};
use crate::resource::{decode_all, parse_timestamp};

/// Runtimes past their deprecation date.
const DEPRECATED_RUNTIMES: &[&str] = &[
    "python2.7",
    "python3.6",
    "python3.7",
    "python3.8",
    "nodejs",
    "nodejs4.3",
    "nodejs4.3-edge",
    "nodejs6.10",
    "nodejs8.10",
    "nodejs10.x",
    "nodejs12.x",
    "nodejs14.x",
    "nodejs16.x",
    "java8",
    "dotnetcore1.0",
    "dotnetcore2.0",
    "dotnetcore2.1",
    "dotnetcore3.1",
    "dotnet5.0",
    "dotnet6",
    "ruby2.5",
    "ruby2.7",
    "go1.x",
    "provided",
];

/// Runtime prefixes whose code runs unchanged on arm64.
const PORTABLE_RUNTIME_PREFIXES: &[&str] = &["python", "nodejs", "ruby"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawFunction {
    function_name: String,
    function_arn: Option<String>,
    runtime: Option<String>,
    #[serde(default)]
    memory_size: u32,
    #[serde(default)]
    timeout: u32,
    #[serde(default)]
    code_size: u64,
    #[serde(default)]
    architectures: Vec<String>,
    package_type: Option<String>,
    last_modified: Option<String>,
}

/// A Lambda function.
#[derive(Debug, Clone, Serialize)]
pub struct LambdaFunction {
    /// Function name.
    pub name: String,
    /// Function ARN.
    pub arn: Option<String>,
    /// Managed runtime; `None` for container images.
    pub runtime: Option<String>,
    /// Configured memory in MB.
    pub memory_mb: u32,
    /// Timeout in seconds.
    pub timeout_secs: u32,
    /// Deployment package size in bytes.
    pub code_size_bytes: u64,
    /// Instruction set architectures.
    pub architectures: Vec<String>,
    /// `Zip` or `Image`.
    pub package_type: Option<String>,
    /// Last modification time.
    pub last_modified: Option<DateTime<Utc>>,
}

impl LambdaFunction {
    /// Whether the runtime is deprecated.
    #[must_use]
    pub fn is_deprecated_runtime(&self) -> bool {
        self.runtime
            .as_deref()
            .is_some_and(|r| DEPRECATED_RUNTIMES.contains(&r))
    }

    /// Whether the function runs on Graviton.
    #[must_use]
    pub fn is_arm(&self) -> bool {
        self.architectures.iter().any(|a| a == "arm64")
    }

    /// Whether the code is interpreted and can move to arm64 without a rebuild.
    #[must_use]
    pub fn is_portable(&self) -> bool {
        self.runtime.as_deref().is_some_and(|r| {
            PORTABLE_RUNTIME_PREFIXES
                .iter()
                .any(|prefix| r.starts_with(prefix))
        })
    }
}

/// Map a `list-functions` response to functions.
///
/// # Errors
/// Returns [`ScanError::Decode`] if a function record is malformed.
pub fn parse_functions(response: &Value) -> Result<Vec<LambdaFunction>, ScanError> {
    let raw: Vec<RawFunction> = decode_all("Lambda function", page_items(response, "Functions"))?;
    Ok(raw
        .into_iter()
        .map(|f| LambdaFunction {
            name: f.function_name,
            arn: f.function_arn,
            runtime: f.runtime,
            memory_mb: f.memory_size,
            timeout_secs: f.timeout,
            code_size_bytes: f.code_size,
            // The API omits architectures for functions created before arm64 existed.
            architectures: if f.architectures.is_empty() {
                vec!["x86_64".to_string()]
            } else {
                f.architectures
            },
            package_type: f.package_type,
            last_modified: f.last_modified.as_deref().and_then(parse_timestamp),
        })
        .collect())
}

/// Lambda summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LambdaSummary {
    /// Functions.
    pub total: usize,
    /// Functions per runtime (`image` for container functions).
    pub by_runtime: BTreeMap<String, usize>,
    /// Functions on deprecated runtimes.
    pub deprecated_runtimes: usize,
    /// Functions on arm64.
    pub arm64: usize,
    /// Total deployment package size.
    pub total_code_size_bytes: u64,
    /// Mean configured memory in MB.
    pub average_memory_mb: f64,
}

/// Count functions by runtime and architecture.
#[must_use]
pub fn summarize(functions: &[LambdaFunction]) -> LambdaSummary {
    let mut by_runtime = BTreeMap::new();
    for function in functions {
        let runtime = function.runtime.clone().unwrap_or_else(|| "image".to_string());
        *by_runtime.entry(runtime).or_insert(0) += 1;
    }

    let total_memory: u64 = functions.iter().map(|f| u64::from(f.memory_mb)).sum();
    #[allow(clippy::cast_precision_loss)]
    let average_memory_mb = if functions.is_empty() {
        0.0
    } else {
        total_memory as f64 / functions.len() as f64
    };

    LambdaSummary {
        total: functions.len(),
        by_runtime,
        deprecated_runtimes: functions.iter().filter(|f| f.is_deprecated_runtime()).count(),
        arm64: functions.iter().filter(|f| f.is_arm()).count(),
        total_code_size_bytes: functions.iter().map(|f| f.code_size_bytes).sum(),
        average_memory_mb,
    }
}

/// Evaluate Lambda rules.
#[must_use]
pub fn recommend(functions: &[LambdaFunction], ctx: &ScanContext) -> Vec<Recommendation> {
    let memory_threshold = ctx.thresholds.lambda_memory_review_mb;
    let mut recs = Vec::new();

    for function in functions {
        if function.is_deprecated_runtime() {
            recs.push(
                Recommendation::new(
                    ServiceKind::Lambda,
                    Category::Security,
                    Severity::High,
                    "Deprecated runtime",
                )
                .resource(&function.name)
                .description(format!(
                    "{} no longer receives security patches. Upgrade to a supported runtime version.",
                    function.runtime.as_deref().unwrap_or_default()
                )),
            );
        }

        if function.memory_mb >= memory_threshold {
            recs.push(
                Recommendation::new(
                    ServiceKind::Lambda,
                    Category::Cost,
                    Severity::Low,
                    "Large memory allocation",
                )
                .resource(&function.name)
                .description(format!(
                    "{} MB configured. Duration is billed per MB; profile the function (e.g. Lambda Power Tuning) to confirm it needs this much.",
                    function.memory_mb
                )),
            );
        }

        if !function.is_arm() {
            let effort = if function.is_portable() {
                format!(
                    "{} code runs unchanged on arm64.",
                    function.runtime.as_deref().unwrap_or_default()
                )
            } else {
                "Rebuild the package for arm64 and check native dependencies first.".to_string()
            };
            recs.push(
                Recommendation::new(
                    ServiceKind::Lambda,
                    Category::Cost,
                    Severity::Low,
                    "Move to arm64",
                )
                .resource(&function.name)
                .description(format!(
                    "Graviton functions cost about {:.0}% less per GB-second. {effort}",
                    LAMBDA_ARM_DISCOUNT * 100.0
                )),
            );
        }
    }

    recs
}

/// Lambda scanner.
#[derive(Debug, Clone, Copy, Default)]
pub struct LambdaScanner;

#[async_trait]
impl ServiceScanner for LambdaScanner {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Lambda
    }

    async fn scan(
        &self,
        client: &dyn ResourceClient,
        ctx: &ScanContext,
    ) -> Result<ServiceScan, ScanError> {
        let response = client
            .call(&ApiRequest::new("lambda", "list-functions"))
            .await?;
        let functions = parse_functions(&response)?;
        let summary = summarize(&functions);
        info!(
            total = summary.total,
            deprecated = summary.deprecated_runtimes,
            "Lambda functions scanned"
        );
        let recs = recommend(&functions, ctx);
        ServiceScan::build(&functions, &summary, recs, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn functions() -> Vec<LambdaFunction> {
        parse_functions(&json!({"Functions": [
            {
                "FunctionName": "legacy-handler",
                "Runtime": "python3.7",
                "MemorySize": 128,
                "Timeout": 3,
                "CodeSize": 1000,
                "LastModified": "2021-05-10T12:00:00.000+0000"
            },
            {
                "FunctionName": "image-resizer",
                "Runtime": "nodejs20.x",
                "MemorySize": 3008,
                "Timeout": 60,
                "CodeSize": 5000,
                "Architectures": ["x86_64"]
            },
            {
                "FunctionName": "api",
                "Runtime": "python3.12",
                "MemorySize": 512,
                "CodeSize": 2000,
                "Architectures": ["arm64"]
            },
            {
                "FunctionName": "container",
                "PackageType": "Image",
                "MemorySize": 1024,
                "CodeSize": 0
            }
        ]}))
        .unwrap()
    }

    #[test]
    fn test_parse_defaults_architecture() {
        let functions = functions();
        assert_eq!(functions[0].architectures, vec!["x86_64"]);
        assert!(functions[0].last_modified.is_some());
        assert!(functions[2].is_arm());
        assert!(!functions[3].is_portable());
    }

    #[test]
    fn test_summarize() {
        let summary = summarize(&functions());
        assert_eq!(summary.total, 4);
        assert_eq!(summary.deprecated_runtimes, 1);
        assert_eq!(summary.arm64, 1);
        assert_eq!(summary.by_runtime.get("image"), Some(&1));
        assert_eq!(summary.total_code_size_bytes, 8000);
        assert!((summary.average_memory_mb - 1168.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_recommend() {
        let recs = recommend(&functions(), &ScanContext::new(Utc::now()));
        let found: Vec<_> = recs
            .iter()
            .map(|r| (r.resource_id.as_deref().unwrap_or(""), r.title.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![
                ("legacy-handler", "Deprecated runtime"),
                ("legacy-handler", "Move to arm64"),
                ("image-resizer", "Large memory allocation"),
                ("image-resizer", "Move to arm64"),
                ("container", "Move to arm64"),
            ]
        );
        assert!(recs[3].description.contains("20%"));
        assert!(recs[3].description.contains("nodejs20.x code runs unchanged"));
        assert!(recs[4].description.contains("Rebuild the package"));
    }

    #[test]
    fn test_every_x86_function_gets_arm_suggestion() {
        let functions = parse_functions(&json!({"Functions": [
            {
                "FunctionName": "small-py",
                "Runtime": "python3.12",
                "MemorySize": 128,
                "Architectures": ["x86_64"]
            },
            {
                "FunctionName": "java-big",
                "Runtime": "java21",
                "MemorySize": 2048,
                "Architectures": ["x86_64"]
            }
        ]}))
        .unwrap();

        let recs = recommend(&functions, &ScanContext::new(Utc::now()));
        let arm: Vec<_> = recs
            .iter()
            .filter(|r| r.title == "Move to arm64")
            .map(|r| r.resource_id.as_deref().unwrap_or(""))
            .collect();
        assert_eq!(arm, vec!["small-py", "java-big"]);
        assert!(recs.iter().all(|r| r.category == Category::Cost));
    }

    #[test]
    fn test_empty_summary() {
        let summary = summarize(&[]);
        assert_eq!(summary.total, 0);
        assert!(summary.average_memory_mb.abs() < f64::EPSILON);
    }
}
