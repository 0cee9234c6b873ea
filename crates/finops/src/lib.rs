//! AWS FinOps reporting.
//!
//! For each supported service the crate enumerates resources through a
//! [`ResourceClient`], maps them to typed records, aggregates a summary and
//! applies fixed threshold rules that produce [`Recommendation`]s.
//!
//! ## Clients
//!
//! - [`AwsCliClient`] - shells out to the `aws` CLI (credentials, region and
//!   pagination are handled by the CLI)
//! - [`FixtureClient`] - reads recorded JSON responses from a directory
//! - [`StaticClient`] - in-memory responses for tests
//!
//! ## Example
//!
//! ```no_run
//! use finops::{run_scan, scanners, AwsCliClient, ScanContext, ScanOptions, ServiceKind};
//!
//! # async fn demo() {
//! let client = AwsCliClient::new().with_region("us-east-1");
//! let ctx = ScanContext::new(chrono::Utc::now());
//! let report = run_scan(
//!     &client,
//!     &scanners(&[ServiceKind::Ebs, ServiceKind::ElasticIp]),
//!     &ctx,
//!     ScanOptions::default(),
//! )
//! .await;
//! println!("{} recommendations", report.totals.recommendations);
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod output;
pub mod pricing;
pub mod recommendation;
pub mod report;
pub mod resource;
pub mod services;

pub use client::{ApiRequest, AwsCliClient, FixtureClient, ResourceClient, StaticClient};
pub use config::{FinopsConfig, Thresholds};
pub use error::{ClientError, ConfigError, ScanError};
pub use recommendation::{Category, Recommendation, Severity};
pub use report::{run_scan, FinopsReport, ReportTotals, ScanOptions, ServiceReport};
pub use services::{scanner_for, scanners, ScanContext, ServiceKind, ServiceScan, ServiceScanner};
