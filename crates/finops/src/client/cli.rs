//! Client backed by the `aws` command line interface.
//!
//! The CLI resolves credentials (profiles, SSO, instance roles), signs
//! requests and follows pagination tokens, so every call here returns the
//! complete result set.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ApiRequest, ResourceClient};
use crate::error::ClientError;

/// Default CLI executable.
pub const DEFAULT_PROGRAM: &str = "aws";

/// Default timeout for a single call, pagination included.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Client that executes calls through the `aws` CLI.
#[derive(Debug, Clone)]
pub struct AwsCliClient {
    program: String,
    region: Option<String>,
    profile: Option<String>,
    timeout: Duration,
}

impl Default for AwsCliClient {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            region: None,
            profile: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl AwsCliClient {
    /// Create a client using `aws` from `PATH` and the ambient region/profile.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different CLI executable.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Pin the region passed to every call.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Pin the named profile passed to every call.
    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Set the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments passed to the CLI for a request.
    fn command_args(&self, request: &ApiRequest) -> Vec<String> {
        let mut args = vec![request.service.clone(), request.operation.clone()];
        for (flag, value) in &request.args {
            args.push(flag.clone());
            args.push(value.clone());
        }
        args.extend(["--output", "json", "--no-cli-pager"].map(String::from));
        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        if let Some(profile) = &self.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        args
    }
}

#[async_trait]
impl ResourceClient for AwsCliClient {
    async fn call(&self, request: &ApiRequest) -> Result<Value, ClientError> {
        let args = self.command_args(request);
        debug!(program = %self.program, request = %request, "AWS CLI call");

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| ClientError::Timeout {
                operation: request.to_string(),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|source| ClientError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let status = output.status.code().unwrap_or(-1);
            let error = classify_failure(request, status, stderr.trim());
            if !error.is_not_found() {
                warn!(request = %request, status, "AWS CLI call failed");
            }
            return Err(error);
        }

        parse_output(&output.stdout)
    }
}

/// Map a failed invocation onto the error taxonomy using the AWS error code in stderr.
fn classify_failure(request: &ApiRequest, status: i32, stderr: &str) -> ClientError {
    const NOT_FOUND_MARKERS: [&str; 3] = ["NoSuch", "NotFound", "does not exist"];
    const DENIED_MARKERS: [&str; 3] = ["AccessDenied", "UnauthorizedOperation", "not authorized"];

    if NOT_FOUND_MARKERS.iter().any(|m| stderr.contains(m)) {
        ClientError::NotFound(format!("{request}: {stderr}"))
    } else if DENIED_MARKERS.iter().any(|m| stderr.contains(m)) {
        ClientError::AccessDenied(format!("{request}: {stderr}"))
    } else {
        ClientError::CommandFailed {
            operation: request.to_string(),
            status,
            stderr: stderr.to_string(),
        }
    }
}

/// Parse CLI stdout. Some operations print nothing on success.
fn parse_output(stdout: &[u8]) -> Result<Value, ClientError> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(stdout)?)
}
