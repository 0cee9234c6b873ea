//! CLI for AWS FinOps reports
//!
//! Run `finops --help` for usage information.

// CLI binaries legitimately need println! for user output
#![allow(clippy::disallowed_macros)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use finops::output::{
    plain_text, render_recommendations, render_report, render_services, to_json,
};
use finops::{
    run_scan, scanners, AwsCliClient, FinopsConfig, FinopsReport, FixtureClient, ResourceClient,
    ScanContext, ScanOptions, ServiceKind, Severity,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "finops")]
#[command(about = "AWS resource inventory with cost and security recommendations")]
#[command(version)]
struct Cli {
    /// Output format: json, text
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to FINOPS_CONFIG, then the standard locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Region to scan
    #[arg(long, global = true, env = "AWS_REGION")]
    region: Option<String>,

    /// Named AWS profile
    #[arg(long, global = true, env = "AWS_PROFILE")]
    profile: Option<String>,

    /// Hide recommendations below this severity
    #[arg(long, global = true)]
    min_severity: Option<Severity>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan services and print the full report
    Scan {
        /// Service to scan (repeatable, defaults to config or all)
        #[arg(short, long = "service")]
        services: Vec<ServiceKind>,

        /// Read recorded responses from this directory instead of calling AWS
        #[arg(long)]
        fixtures: Option<PathBuf>,

        /// Include normalized resource records in the report
        #[arg(long)]
        include_resources: bool,

        /// Also write the report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Scan services and print only the recommendations
    Recommendations {
        /// Service to scan (repeatable, defaults to config or all)
        #[arg(short, long = "service")]
        services: Vec<ServiceKind>,

        /// Read recorded responses from this directory instead of calling AWS
        #[arg(long)]
        fixtures: Option<PathBuf>,
    },

    /// List supported services
    Services,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing; logs go to stderr so JSON on stdout stays parseable
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Scan {
            ref services,
            ref fixtures,
            include_resources,
            ref output,
        } => {
            let config = load_config(&cli, services, include_resources).await?;
            let report = scan(&config, fixtures.as_deref()).await;
            let rendered = match cli.format {
                OutputFormat::Json => to_json(&report).context("Failed to serialize report")?,
                OutputFormat::Text => render_report(&report),
            };
            println!("{rendered}");

            if let Some(path) = output {
                let contents = match cli.format {
                    OutputFormat::Json => rendered,
                    OutputFormat::Text => plain_text(&rendered),
                };
                tokio::fs::write(path, contents)
                    .await
                    .with_context(|| format!("Failed to write report to {}", path.display()))?;
                info!(path = %path.display(), "Report written");
            }
        }
        Commands::Recommendations {
            ref services,
            ref fixtures,
        } => {
            let config = load_config(&cli, services, false).await?;
            let report = scan(&config, fixtures.as_deref()).await;
            let recommendations = report.recommendations();
            match cli.format {
                OutputFormat::Json => println!(
                    "{}",
                    to_json(&recommendations).context("Failed to serialize recommendations")?
                ),
                OutputFormat::Text => print!("{}", render_recommendations(&recommendations)),
            }
        }
        Commands::Services => match cli.format {
            OutputFormat::Json => {
                let catalog: Vec<_> = ServiceKind::ALL
                    .iter()
                    .map(|kind| {
                        serde_json::json!({
                            "name": kind.as_str(),
                            "description": kind.description(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&catalog)?);
            }
            OutputFormat::Text => print!("{}", render_services()),
        },
    }

    Ok(())
}

/// Load the config file and apply command-line overrides.
async fn load_config(
    cli: &Cli,
    services: &[ServiceKind],
    include_resources: bool,
) -> Result<FinopsConfig> {
    let mut config = FinopsConfig::load(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;

    if let Some(region) = &cli.region {
        config.region = Some(region.clone());
    }
    if let Some(profile) = &cli.profile {
        config.profile = Some(profile.clone());
    }
    if cli.min_severity.is_some() {
        config.min_severity = cli.min_severity;
    }
    if !services.is_empty() {
        config.services = services.to_vec();
    }
    config.include_resources |= include_resources;

    Ok(config)
}

fn build_client(config: &FinopsConfig, fixtures: Option<&Path>) -> Box<dyn ResourceClient> {
    if let Some(dir) = fixtures {
        info!(dir = %dir.display(), "Using recorded fixtures");
        return Box::new(FixtureClient::new(dir));
    }

    let mut client = AwsCliClient::new()
        .with_program(config.aws_cli.program.clone())
        .with_timeout(Duration::from_secs(config.aws_cli.timeout_secs));
    if let Some(region) = &config.region {
        client = client.with_region(region.clone());
    }
    if let Some(profile) = &config.profile {
        client = client.with_profile(profile.clone());
    }
    Box::new(client)
}

async fn scan(config: &FinopsConfig, fixtures: Option<&Path>) -> FinopsReport {
    let client = build_client(config, fixtures);
    let ctx = ScanContext::from_config(config, Utc::now());
    let options = ScanOptions {
        include_resources: config.include_resources,
        min_severity: config.min_severity,
    };
    run_scan(
        client.as_ref(),
        &scanners(&config.selected_services()),
        &ctx,
        options,
    )
    .await
}
