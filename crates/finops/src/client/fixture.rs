//! Offline client replaying recorded JSON documents.
//!
//! Layout under the fixture root:
//!
//! ```text
//! ec2/describe-volumes.json
//! dynamodb/list-tables.json
//! dynamodb/describe-table/orders.json
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tracing::debug;

use super::{ApiRequest, ResourceClient};
use crate::error::ClientError;

/// Client reading responses from a fixture directory.
#[derive(Debug, Clone)]
pub struct FixtureClient {
    root: PathBuf,
}

impl FixtureClient {
    /// Create a client rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Fixture root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File that answers `request`.
    #[must_use]
    pub fn path_for(&self, request: &ApiRequest) -> PathBuf {
        self.root.join(format!("{}.json", request.key()))
    }
}

#[async_trait]
impl ResourceClient for FixtureClient {
    async fn call(&self, request: &ApiRequest) -> Result<Value, ClientError> {
        let path = self.path_for(request);
        debug!(path = %path.display(), request = %request, "Reading fixture");

        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ClientError::NotFound(format!(
                    "{request}: no fixture at {}",
                    path.display()
                )));
            }
            Err(e) => return Err(ClientError::Io(e)),
        };

        if contents.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&contents)?)
    }
}
