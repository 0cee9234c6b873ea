//! ECR repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{probe, Probe, ScanContext, ServiceKind, ServiceScan, ServiceScanner};
use crate::client::{ApiRequest, ResourceClient};
use crate::error::ScanError;
use crate::recommendation::{Category, Recommendation, Severity};
use crate::resource::{decode_all, Timestamp};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRepository {
    repository_name: String,
    repository_arn: Option<String>,
    repository_uri: Option<String>,
    image_scanning_configuration: Option<RawScanning>,
    image_tag_mutability: Option<String>,
    created_at: Option<Timestamp>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScanning {
    #[serde(default)]
    scan_on_push: bool,
}

/// An ECR repository.
#[derive(Debug, Clone, Serialize)]
pub struct EcrRepository {
    /// Repository name.
    pub name: String,
    /// Repository ARN.
    pub arn: Option<String>,
    /// Registry URI.
    pub uri: Option<String>,
    /// Images are scanned when pushed.
    pub scan_on_push: bool,
    /// `MUTABLE` or `IMMUTABLE`.
    pub tag_mutability: String,
    /// Creation time.
    pub created_at: Option<DateTime<Utc>>,
    /// Lifecycle policy presence; `None` when it could not be read.
    pub has_lifecycle_policy: Option<bool>,
}

impl EcrRepository {
    /// Whether tags cannot be overwritten.
    #[must_use]
    pub fn has_immutable_tags(&self) -> bool {
        self.tag_mutability == "IMMUTABLE"
    }
}

/// Describe repositories and look up each lifecycle policy.
///
/// # Errors
/// Returns an error if `describe-repositories` fails.
pub async fn fetch(
    client: &dyn ResourceClient,
) -> Result<(Vec<EcrRepository>, Vec<String>), ScanError> {
    let raw: Vec<RawRepository> = decode_all(
        "ECR repository",
        client
            .list(
                &ApiRequest::new("ecr", "describe-repositories"),
                "repositories",
            )
            .await?,
    )?;

    let mut warnings = Vec::new();
    let mut repos = Vec::with_capacity(raw.len());
    for repo in raw {
        let request = ApiRequest::new("ecr", "get-lifecycle-policy")
            .for_resource("--repository-name", &repo.repository_name);
        let has_lifecycle_policy = match probe(client, &request, &mut warnings).await {
            Probe::Found(_) => Some(true),
            Probe::Absent => Some(false),
            Probe::Unknown => None,
        };

        repos.push(EcrRepository {
            name: repo.repository_name,
            arn: repo.repository_arn,
            uri: repo.repository_uri,
            scan_on_push: repo
                .image_scanning_configuration
                .is_some_and(|s| s.scan_on_push),
            tag_mutability: repo
                .image_tag_mutability
                .unwrap_or_else(|| "MUTABLE".to_string()),
            created_at: repo.created_at.as_ref().and_then(Timestamp::to_utc),
            has_lifecycle_policy,
        });
    }
    Ok((repos, warnings))
}

/// ECR summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EcrSummary {
    /// Repositories.
    pub total: usize,
    /// Repositories scanning on push.
    pub scan_on_push: usize,
    /// Repositories with immutable tags.
    pub immutable_tags: usize,
    /// Repositories with a lifecycle policy.
    pub with_lifecycle: usize,
}

/// Count repository settings.
#[must_use]
pub fn summarize(repos: &[EcrRepository]) -> EcrSummary {
    EcrSummary {
        total: repos.len(),
        scan_on_push: repos.iter().filter(|r| r.scan_on_push).count(),
        immutable_tags: repos.iter().filter(|r| r.has_immutable_tags()).count(),
        with_lifecycle: repos
            .iter()
            .filter(|r| r.has_lifecycle_policy == Some(true))
            .count(),
    }
}

/// Evaluate repository rules.
#[must_use]
pub fn recommend(repos: &[EcrRepository]) -> Vec<Recommendation> {
    let mut recs = Vec::new();
    for repo in repos {
        let rec = |category, severity, title: &str| {
            Recommendation::new(ServiceKind::Ecr, category, severity, title).resource(&repo.name)
        };

        if repo.has_lifecycle_policy == Some(false) {
            recs.push(
                rec(Category::Cost, Severity::Low, "No lifecycle policy")
                    .description("Untagged and old images accumulate storage charges. Add a lifecycle policy to expire them."),
            );
        }
        if !repo.scan_on_push {
            recs.push(
                rec(Category::Security, Severity::Medium, "Image scanning disabled")
                    .description("Enable scan on push to detect vulnerable packages in new images."),
            );
        }
        if !repo.has_immutable_tags() {
            recs.push(
                rec(Category::Security, Severity::Low, "Mutable image tags")
                    .description("Tags can be overwritten by a later push. Set tag mutability to IMMUTABLE."),
            );
        }
    }
    recs
}

/// ECR scanner.
#[derive(Debug, Clone, Copy, Default)]
pub struct EcrScanner;

#[async_trait]
impl ServiceScanner for EcrScanner {
    fn kind(&self) -> ServiceKind {
        ServiceKind::Ecr
    }

    async fn scan(
        &self,
        client: &dyn ResourceClient,
        _ctx: &ScanContext,
    ) -> Result<ServiceScan, ScanError> {
        let (repos, warnings) = fetch(client).await?;
        let summary = summarize(&repos);
        info!(total = summary.total, "ECR repositories scanned");
        let recs = recommend(&repos);
        ServiceScan::build(&repos, &summary, recs, warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StaticClient;
    use crate::error::ClientError;
    use serde_json::json;

    fn lifecycle(name: &str) -> ApiRequest {
        ApiRequest::new("ecr", "get-lifecycle-policy").for_resource("--repository-name", name)
    }

    fn client() -> StaticClient {
        StaticClient::new()
            .with_response(
                ApiRequest::new("ecr", "describe-repositories"),
                json!({"repositories": [
                    {
                        "repositoryName": "api",
                        "repositoryArn": "arn:aws:ecr:us-east-1:111:repository/api",
                        "imageScanningConfiguration": {"scanOnPush": true},
                        "imageTagMutability": "IMMUTABLE",
                        "createdAt": "2023-06-01T08:00:00+00:00"
                    },
                    {
                        "repositoryName": "sandbox",
                        "imageScanningConfiguration": {"scanOnPush": false},
                        "imageTagMutability": "MUTABLE",
                        "createdAt": 1_700_000_000.5
                    },
                    {
                        "repositoryName": "restricted",
                        "imageScanningConfiguration": {"scanOnPush": true},
                        "imageTagMutability": "IMMUTABLE"
                    }
                ]}),
            )
            .with_response(
                lifecycle("api"),
                json!({"repositoryName": "api", "lifecyclePolicyText": "{\"rules\":[]}"}),
            )
            .with_error(
                lifecycle("sandbox"),
                ClientError::NotFound("LifecyclePolicyNotFoundException".to_string()),
            )
            .with_error(
                lifecycle("restricted"),
                ClientError::AccessDenied("ecr:GetLifecyclePolicy".to_string()),
            )
    }

    #[tokio::test]
    async fn test_fetch_lifecycle_states() {
        let (repos, warnings) = fetch(&client()).await.unwrap();
        let states: Vec<_> = repos.iter().map(|r| r.has_lifecycle_policy).collect();
        assert_eq!(states, vec![Some(true), Some(false), None]);
        assert_eq!(warnings.len(), 1);
        assert!(repos[0].created_at.is_some());
        // Epoch seconds, as printed with cli_timestamp_format = none.
        assert_eq!(
            repos[1].created_at.map(|t| t.timestamp_millis()),
            Some(1_700_000_000_500)
        );
        assert_eq!(repos[2].created_at, None);
    }

    #[tokio::test]
    async fn test_summary_and_rules() {
        let (repos, _) = fetch(&client()).await.unwrap();
        let summary = summarize(&repos);
        assert_eq!(
            summary,
            EcrSummary {
                total: 3,
                scan_on_push: 2,
                immutable_tags: 2,
                with_lifecycle: 1,
            }
        );

        let recs = recommend(&repos);
        assert!(recs
            .iter()
            .all(|r| r.resource_id.as_deref() == Some("sandbox")));
        let titles: Vec<_> = recs.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "No lifecycle policy",
                "Image scanning disabled",
                "Mutable image tags"
            ]
        );
    }
}
