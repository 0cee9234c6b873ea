//! Offline scans over a recorded fixture directory.

use std::fs;
use std::path::Path;

use chrono::Utc;
use finops::{
    run_scan, scanners, FinopsConfig, FixtureClient, ScanContext, ScanOptions, ServiceKind,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn write(root: &Path, relative: &str, value: &Value) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

fn record_account(root: &Path) {
    write(
        root,
        "s3api/list-buckets.json",
        &json!({"Buckets": [{"Name": "audit-logs", "CreationDate": "2022-03-01T00:00:00Z"}]}),
    );
    write(
        root,
        "s3api/get-bucket-versioning/audit-logs.json",
        &json!({"Status": "Enabled"}),
    );
    write(
        root,
        "s3api/get-bucket-encryption/audit-logs.json",
        &json!({"ServerSideEncryptionConfiguration": {"Rules": [
            {"ApplyServerSideEncryptionByDefault": {"SSEAlgorithm": "aws:kms"}}
        ]}}),
    );
    write(
        root,
        "s3api/get-public-access-block/audit-logs.json",
        &json!({"PublicAccessBlockConfiguration": {
            "BlockPublicAcls": true,
            "IgnorePublicAcls": true,
            "BlockPublicPolicy": true,
            "RestrictPublicBuckets": true
        }}),
    );
    // No lifecycle configuration recorded: the bucket has none.

    write(
        root,
        "dynamodb/list-tables.json",
        &json!({"TableNames": ["events"]}),
    );
    write(
        root,
        "dynamodb/describe-table/events.json",
        &json!({"Table": {
            "TableName": "events",
            "TableStatus": "ACTIVE",
            "ItemCount": 0,
            "ProvisionedThroughput": {"ReadCapacityUnits": 10, "WriteCapacityUnits": 10}
        }}),
    );
}

#[tokio::test]
async fn test_offline_scan_from_fixtures() {
    let dir = tempfile::tempdir().unwrap();
    record_account(dir.path());
    let client = FixtureClient::new(dir.path());

    let report = run_scan(
        &client,
        &scanners(&[ServiceKind::S3, ServiceKind::Dynamodb, ServiceKind::Eks]),
        &ScanContext::new(Utc::now()),
        ScanOptions::default(),
    )
    .await;

    let s3 = report.service(ServiceKind::S3).unwrap();
    assert!(s3.warnings.is_empty());
    assert_eq!(s3.summary["versioned"], 1);
    assert_eq!(s3.summary["encrypted"], 1);
    assert_eq!(s3.summary["with_lifecycle"], 0);
    let titles: Vec<_> = s3.recommendations.iter().map(|r| r.title.as_str()).collect();
    assert_eq!(titles, vec!["Versioned bucket without lifecycle rules"]);

    let dynamodb = report.service(ServiceKind::Dynamodb).unwrap();
    assert_eq!(dynamodb.resource_count, 1);
    assert_eq!(dynamodb.recommendations.len(), 1);
    // (10 * 0.00013 + 10 * 0.00065) * 720
    assert_eq!(dynamodb.recommendations[0].estimated_monthly_savings, Some(5.62));

    // Nothing recorded for EKS: the service fails, the others still report.
    let eks = report.service(ServiceKind::Eks).unwrap();
    assert!(eks.failed());
    assert!(eks.error.as_deref().unwrap().contains("no fixture"));
    assert_eq!(report.totals.services_scanned, 2);
    assert_eq!(report.totals.services_failed, 1);
}

#[tokio::test]
async fn test_config_file_drives_service_selection() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("finops.toml");
    fs::write(
        &config_path,
        r#"
        region = "eu-central-1"
        services = ["dynamodb", "s3"]
        min_severity = "medium"

        [thresholds]
        snapshot_max_age_days = 30
        "#,
    )
    .unwrap();

    let config = FinopsConfig::load(Some(&config_path)).await.unwrap();
    assert_eq!(
        config.selected_services(),
        vec![ServiceKind::S3, ServiceKind::Dynamodb]
    );

    let fixtures = dir.path().join("fixtures");
    record_account(&fixtures);
    let ctx = ScanContext::from_config(&config, Utc::now());
    let report = run_scan(
        &FixtureClient::new(&fixtures),
        &scanners(&config.selected_services()),
        &ctx,
        ScanOptions {
            include_resources: config.include_resources,
            min_severity: config.min_severity,
        },
    )
    .await;

    assert_eq!(report.region.as_deref(), Some("eu-central-1"));
    // The only S3 finding is low severity and is filtered out.
    assert!(report.service(ServiceKind::S3).unwrap().recommendations.is_empty());
    assert_eq!(report.totals.recommendations, 1);
    assert_eq!(report.totals.medium, 1);
}
