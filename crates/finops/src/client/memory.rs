//! In-memory client with canned responses.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{ApiRequest, ResourceClient};
use crate::error::ClientError;

#[derive(Debug, Clone)]
enum Canned {
    Value(Value),
    NotFound(String),
    AccessDenied(String),
    Failed { status: i32, stderr: String },
}

/// Client answering from responses registered up front.
///
/// Requests are matched on [`ApiRequest::key`]; plain `--flag value`
/// arguments are ignored. Unregistered requests fail with
/// [`ClientError::NotFound`].
#[derive(Debug, Default)]
pub struct StaticClient {
    responses: HashMap<String, Canned>,
    calls: Mutex<Vec<String>>,
}

impl StaticClient {
    /// Create an empty client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the JSON response for a request.
    #[must_use]
    pub fn with_response(mut self, request: ApiRequest, response: Value) -> Self {
        self.responses
            .insert(request.key(), Canned::Value(response));
        self
    }

    /// Register a failure for a request.
    #[must_use]
    pub fn with_error(mut self, request: ApiRequest, error: ClientError) -> Self {
        let canned = match error {
            ClientError::NotFound(msg) => Canned::NotFound(msg),
            ClientError::AccessDenied(msg) => Canned::AccessDenied(msg),
            ClientError::CommandFailed { status, stderr, .. } => Canned::Failed { status, stderr },
            other => Canned::Failed {
                status: -1,
                stderr: other.to_string(),
            },
        };
        self.responses.insert(request.key(), canned);
        self
    }

    /// Keys of every request made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ResourceClient for StaticClient {
    async fn call(&self, request: &ApiRequest) -> Result<Value, ClientError> {
        let key = request.key();
        debug!(request = %request, "Static client call");

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(key.clone());
        }

        match self.responses.get(&key) {
            Some(Canned::Value(value)) => Ok(value.clone()),
            Some(Canned::NotFound(msg)) => Err(ClientError::NotFound(msg.clone())),
            Some(Canned::AccessDenied(msg)) => Err(ClientError::AccessDenied(msg.clone())),
            Some(Canned::Failed { status, stderr }) => Err(ClientError::CommandFailed {
                operation: request.to_string(),
                status: *status,
                stderr: stderr.clone(),
            }),
            None => Err(ClientError::NotFound(key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_returns_registered_response_and_records_calls() {
        let req = ApiRequest::new("ec2", "describe-addresses");
        let client = StaticClient::new().with_response(req.clone(), json!({"Addresses": []}));

        let value = client.call(&req).await.unwrap();
        assert_eq!(value, json!({"Addresses": []}));
        assert_eq!(client.calls(), vec!["ec2/describe-addresses".to_string()]);
    }

    #[tokio::test]
    async fn test_registered_failure_is_replayed() {
        let req = ApiRequest::new("rds", "describe-db-instances");
        let client = StaticClient::new().with_error(
            req.clone(),
            ClientError::CommandFailed {
                operation: "rds describe-db-instances".to_string(),
                status: 255,
                stderr: "throttled".to_string(),
            },
        );

        match client.call(&req).await {
            Err(ClientError::CommandFailed { status, stderr, .. }) => {
                assert_eq!(status, 255);
                assert_eq!(stderr, "throttled");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unregistered_request_is_not_found() {
        let client = StaticClient::new();
        let err = client
            .call(&ApiRequest::new("eks", "list-clusters"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
