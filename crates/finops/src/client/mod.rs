//! Control-plane client abstraction.
//!
//! Service scanners never talk to AWS directly. They issue [`ApiRequest`]s
//! through a [`ResourceClient`], which returns the raw JSON document of a
//! list/describe call with every page already merged.
//!
//! ## Implementations
//!
//! - [`AwsCliClient`] - shells out to the `aws` CLI, which handles
//!   credentials, signing and pagination
//! - [`FixtureClient`] - replays JSON documents from a directory
//! - [`StaticClient`] - in-memory responses, for tests and embedding

mod cli;
mod fixture;
mod memory;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ClientError;

pub use cli::{AwsCliClient, DEFAULT_PROGRAM, DEFAULT_TIMEOUT_SECS};
pub use fixture::FixtureClient;
pub use memory::StaticClient;

/// A single control-plane call, e.g. `ec2 describe-volumes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    /// CLI service name (`ec2`, `s3api`, `elbv2`, ...).
    pub service: String,
    /// Operation name in CLI form (`describe-volumes`).
    pub operation: String,
    /// Extra `--flag value` arguments.
    pub args: Vec<(String, String)>,
    /// Per-resource key for describe calls on a single resource.
    pub resource: Option<String>,
}

impl ApiRequest {
    /// Create a request for `service operation`.
    pub fn new(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            operation: operation.into(),
            args: Vec::new(),
            resource: None,
        }
    }

    /// Add a `--flag value` argument.
    #[must_use]
    pub fn arg(mut self, flag: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.push((flag.into(), value.into()));
        self
    }

    /// Target a single resource, passing its identifier under `flag`.
    #[must_use]
    pub fn for_resource(mut self, flag: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        self.args.push((flag.into(), value.clone()));
        self.resource = Some(value);
        self
    }

    /// Stable lookup key: `service/operation[/resource]`.
    ///
    /// Resource identifiers are sanitized so the key is also a safe
    /// relative path (ECR repositories may contain `/`).
    #[must_use]
    pub fn key(&self) -> String {
        match &self.resource {
            Some(resource) => format!(
                "{}/{}/{}",
                self.service,
                self.operation,
                sanitize_segment(resource)
            ),
            None => format!("{}/{}", self.service, self.operation),
        }
    }
}

impl fmt::Display for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.service, self.operation)?;
        if let Some(resource) = &self.resource {
            write!(f, " ({resource})")?;
        }
        Ok(())
    }
}

fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Executes control-plane calls and returns their complete JSON result.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Execute a call. Implementations merge all pages into one document.
    async fn call(&self, request: &ApiRequest) -> Result<Value, ClientError>;

    /// Execute a list call and return the array stored under `key`.
    async fn list(&self, request: &ApiRequest, key: &str) -> Result<Vec<Value>, ClientError> {
        let response = self.call(request).await?;
        Ok(page_items(&response, key))
    }

    /// Execute a call whose subject may legitimately be absent
    /// (e.g. a bucket without a lifecycle configuration).
    async fn call_optional(&self, request: &ApiRequest) -> Result<Option<Value>, ClientError> {
        match self.call(request).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Extract the array under `key`. Missing keys and non-arrays yield nothing.
#[must_use]
pub fn page_items(value: &Value, key: &str) -> Vec<Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_key_without_resource() {
        let req = ApiRequest::new("ec2", "describe-snapshots").arg("--owner-ids", "self");
        assert_eq!(req.key(), "ec2/describe-snapshots");
        assert_eq!(req.to_string(), "ec2 describe-snapshots");
    }

    #[test]
    fn test_request_key_sanitizes_resource() {
        let req = ApiRequest::new("ecr", "get-lifecycle-policy")
            .for_resource("--repository-name", "team/api");
        assert_eq!(req.key(), "ecr/get-lifecycle-policy/team_api");
        assert_eq!(
            req.args,
            vec![("--repository-name".to_string(), "team/api".to_string())]
        );
        assert_eq!(req.to_string(), "ecr get-lifecycle-policy (team/api)");
    }

    #[test]
    fn test_page_items() {
        let value = json!({"Volumes": [{"VolumeId": "vol-1"}, {"VolumeId": "vol-2"}]});
        assert_eq!(page_items(&value, "Volumes").len(), 2);
        assert!(page_items(&value, "Snapshots").is_empty());
        assert!(page_items(&json!({"Volumes": "oops"}), "Volumes").is_empty());
        assert!(page_items(&Value::Null, "Volumes").is_empty());
    }

    #[tokio::test]
    async fn test_call_optional_maps_not_found() {
        let client = StaticClient::new();
        let req = ApiRequest::new("s3api", "get-bucket-lifecycle-configuration")
            .for_resource("--bucket", "logs");
        assert!(client.call_optional(&req).await.unwrap().is_none());

        let client = StaticClient::new().with_error(
            req.clone(),
            ClientError::AccessDenied("s3:GetLifecycleConfiguration".to_string()),
        );
        assert!(client.call_optional(&req).await.is_err());
    }
}
