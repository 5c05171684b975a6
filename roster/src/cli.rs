///
/// This module implements the CLI interface for roster: command parsing, wiring the
/// core pipeline together, and user-visible output.
///
/// All pipeline logic (fetching, caching, reconciliation, matching, billing) lives in
/// the [`roster-core`] crate. This module is strictly glue.
///
/// ## Commands
/// - `report`: billing report per month (default: current and next month)
/// - `sync`: publish the raw time-tracking tables
/// - `refresh`: drop the cached allocations of an incomplete month
///
/// [`roster-core`]: ../../roster-core/
use crate::load_config::{load_config_or_default, CliConfig, Secrets};
use anyhow::Result;
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use roster_core::billing::BillingCalculator;
use roster_core::cache::CacheStore;
use roster_core::fetch::{ApiAuth, ReqwestTransport};
use roster_core::matcher::RoleMatcher;
use roster_core::period::Period;
use roster_core::pipeline::{PeriodReport, Pipeline};
use roster_core::publish::DirectoryPublisher;
use roster_core::sources::{PlanningClient, Sources, TrackingClient};
use std::path::PathBuf;

/// CLI for roster: reconcile Forecast allocations with Harvest rates into billing reports.
#[derive(Parser)]
#[clap(
    name = "roster",
    version,
    about = "Reconcile Forecast allocations with Harvest task rates into monthly billing reports"
)]
pub struct Cli {
    /// Path to the YAML config file (defaults apply when omitted)
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compute and publish the billing report for one or more months
    Report {
        /// Month as YYYY-MM; repeatable. Defaults to the current and next month.
        #[clap(long = "month")]
        months: Vec<Period>,
    },
    /// Publish the raw Harvest people, projects and assignments tables
    Sync,
    /// Forget the cached allocations of a month that is not over yet
    Refresh {
        #[clap(long)]
        month: Period,
    },
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn default_months(today: NaiveDate) -> Vec<Period> {
    let current = Period::containing(today);
    std::iter::once(current).chain(current.next()).collect()
}

fn cache_store(config: &CliConfig) -> CacheStore {
    CacheStore::new(&config.cache.dir).with_min_bytes(config.cache.min_bytes)
}

/// Wire the production pipeline from config and secrets.
pub fn build_pipeline(
    config: &CliConfig,
    secrets: &Secrets,
) -> Pipeline<ReqwestTransport, ReqwestTransport> {
    let cache = cache_store(config);
    let transport = ReqwestTransport::new();
    let tracking = TrackingClient::new(
        transport.clone(),
        &config.tracking.base_url,
        ApiAuth {
            token: secrets.harvest_token.clone(),
            account_header: "Harvest-Account-ID".to_string(),
            account_id: secrets.harvest_account_id.clone(),
            user_agent: config.user_agent.0.clone(),
        },
        cache.clone(),
    );
    let planning = PlanningClient::new(
        transport,
        &config.planning.base_url,
        ApiAuth {
            token: secrets.harvest_token.clone(),
            account_header: "Forecast-Account-ID".to_string(),
            account_id: secrets.forecast_account_id.clone(),
            user_agent: config.user_agent.0.clone(),
        },
        cache,
    );
    let calculator = BillingCalculator::new(RoleMatcher::new(config.matcher.clone()));
    Pipeline::new(Sources::new(tracking, planning), calculator)
}

fn print_report(report: &PeriodReport) {
    println!("Billing report {}:", report.period);
    for diagnostic in &report.diagnostics {
        println!("  [dropped] {diagnostic}");
    }
    println!(
        "  {} lines billed, {} dropped, total {}",
        report.lines.len(),
        report.diagnostics.len(),
        report.total()
    );
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    let config = load_config_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Report { months } => {
            let months = if months.is_empty() {
                default_months(today())
            } else {
                months
            };
            let secrets = Secrets::from_env()?;
            let pipeline = build_pipeline(&config, &secrets);
            let publisher = DirectoryPublisher::new(&config.output.dir);
            for period in months {
                tracing::info!(command = "report", period = %period, "Starting billing report");
                match pipeline.report(period, &publisher).await {
                    Ok(report) => {
                        print_report(&report);
                        tracing::info!(
                            command = "report",
                            period = %period,
                            sheet = %report.sheet_name(),
                            "Billing report complete"
                        );
                    }
                    Err(e) => {
                        tracing::error!(command = "report", period = %period, error = %e, "Billing report failed");
                        return Err(anyhow::Error::new(e).context(format!("report for {period} failed")));
                    }
                }
            }
            Ok(())
        }
        Commands::Sync => {
            let secrets = Secrets::from_env()?;
            let pipeline = build_pipeline(&config, &secrets);
            let publisher = DirectoryPublisher::new(&config.output.dir);
            match pipeline.sync_tracking(&publisher).await {
                Ok(report) => {
                    for (sheet, rows) in &report.sheets {
                        println!("Published {sheet}: {rows} rows");
                    }
                    tracing::info!(command = "sync", ?report, "Synchronisation complete");
                    Ok(())
                }
                Err(e) => {
                    tracing::error!(command = "sync", error = %e, "Synchronisation failed");
                    Err(anyhow::Error::new(e))
                }
            }
        }
        Commands::Refresh { month } => {
            let cache = cache_store(&config);
            if cache.refresh_period(month, today())? {
                println!("Refresh complete: cached allocations for {month} will be refetched.");
            } else {
                println!("Refresh skipped: {month} is complete and its cache is kept.");
            }
            Ok(())
        }
    }
}
