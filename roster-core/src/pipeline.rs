//! High-level pipeline: populate caches → reconcile → match & bill → publish.
//!
//! One run handles one reporting period and is a straight batch pass:
//!   - [`Sources::prepare`] resolves every dataset the period needs, dependencies first
//!   - [`reconcile`] joins allocations to time-tracking people and projects
//!   - [`BillingCalculator::run`] matches role tags to tasks and computes subtotals
//!   - the resulting table is handed to a [`Publisher`]
//!
//! # Error Handling
//! Transport, protocol and cache failures abort the run for that period. Dropped
//! rows are not failures: they are returned as [`Diagnostic`]s next to the lines
//! that did resolve, so partial output is the normal outcome.

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{error, info, warn};

use crate::billing::BillingCalculator;
use crate::cache::DatasetKey;
use crate::contract::{Publisher, Row, Table, Transport};
use crate::diagnostic::Diagnostic;
use crate::error::PipelineError;
use crate::model::BillingLine;
use crate::period::Period;
use crate::reconcile::reconcile;
use crate::sources::{Sources, TASK_RATES, TRACKING_PEOPLE, TRACKING_PROJECTS, USER_ASSIGNMENTS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodReport {
    pub period: Period,
    pub datasets: Vec<DatasetKey>,
    pub lines: Vec<BillingLine>,
    pub diagnostics: Vec<Diagnostic>,
}

impl PeriodReport {
    pub fn sheet_name(&self) -> String {
        format!("billing_{}", self.period)
    }

    pub fn table(&self) -> Table {
        let mut table = Table::new(BillingLine::HEADER);
        for line in &self.lines {
            table.push(line.to_row());
        }
        table
    }

    pub fn total(&self) -> i64 {
        self.lines.iter().map(|l| l.subtotal).sum()
    }
}

/// Name of the summary sheet written after the raw tracking sheets.
pub const DASHBOARD_SHEET: &str = "Dashboard";

/// Sheets published by [`Pipeline::sync_tracking`], in order, with the label
/// their sync time carries on the dashboard.
const SYNC_SHEETS: [(&str, &str); 4] = [
    ("People", "Harvest Users"),
    ("Projects", "Harvest Projects"),
    ("UserAssignments", "Harvest User Assignments"),
    ("TaskAssignments", "Harvest Task Assignments"),
];

fn is_true(row: &Row, index: usize) -> bool {
    row.get(index).map(String::as_str) == Some("true")
}

fn pair(label: &str, value: impl ToString) -> Row {
    vec![label.to_string(), value.to_string()]
}

/// Counts over the synced people and projects plus the time each sheet was published.
///
/// Column positions follow [`TRACKING_PEOPLE`] and [`TRACKING_PROJECTS`].
pub fn dashboard(people: &[Row], projects: &[Row], synced_at: &[(&str, DateTime<Utc>)]) -> Table {
    let active_projects = projects.iter().filter(|p| is_true(p, 3));
    let active = active_projects.clone().count();
    let active_non_billable = active_projects.filter(|p| !is_true(p, 4)).count();
    let active_people = people.iter().filter(|p| is_true(p, 3)).count();

    let mut table = Table::new(["metric", "value"]);
    table.push(pair("Projects", ""));
    table.push(pair("Active Projects", active));
    table.push(pair("Active NonBillable Projects", active_non_billable));
    table.push(pair("People", ""));
    table.push(pair("Active Harvest Users", active_people));
    table.push(pair("Sync Times", ""));
    for (label, at) in synced_at {
        table.push(pair(label, at.to_rfc3339_opts(SecondsFormat::Secs, true)));
    }
    table
}

/// Sheet names and row counts published by [`Pipeline::sync_tracking`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub sheets: Vec<(String, usize)>,
}

pub struct Pipeline<TT, PT> {
    sources: Sources<TT, PT>,
    calculator: BillingCalculator,
}

impl<TT: Transport, PT: Transport> Pipeline<TT, PT> {
    pub fn new(sources: Sources<TT, PT>, calculator: BillingCalculator) -> Self {
        Self {
            sources,
            calculator,
        }
    }

    pub fn sources(&self) -> &Sources<TT, PT> {
        &self.sources
    }

    /// Compute the billing report for `period` from the (possibly cached) inputs.
    pub async fn run_period(&self, period: Period) -> Result<PeriodReport, PipelineError> {
        info!(period = %period, "[REPORT] Starting billing run");

        let datasets = self.sources.prepare(period).await.map_err(|e| {
            error!(period = %period, error = %e, "[REPORT][ERROR] Dataset population failed");
            e
        })?;

        let tracking = &self.sources.tracking;
        let planning = &self.sources.planning;
        let people = tracking.people().await?;
        let projects = tracking.projects().await?;
        let task_rates = tracking.task_rates().await?;
        let allocations = planning.allocations(period).await?;
        let links = planning.cross_reference(period).await?;

        let reconciliation = reconcile(&allocations, &links, &people, &projects);
        info!(
            period = %period,
            allocations = allocations.len(),
            resolved = reconciliation.assignments.len(),
            dropped = reconciliation.diagnostics.len(),
            "[REPORT] Reconciled allocations"
        );

        let billing = self.calculator.run(&reconciliation.assignments, &task_rates);
        let mut diagnostics = reconciliation.diagnostics;
        diagnostics.extend(billing.diagnostics);

        let report = PeriodReport {
            period,
            datasets,
            lines: billing.lines,
            diagnostics,
        };
        if !report.diagnostics.is_empty() {
            warn!(
                period = %period,
                unresolved = report.diagnostics.len(),
                "[REPORT] Some allocations were not billed"
            );
        }
        info!(
            period = %period,
            lines = report.lines.len(),
            total = report.total(),
            "[REPORT] Billing run complete"
        );
        Ok(report)
    }

    /// Run `period` and publish its billing table.
    pub async fn report<P: Publisher>(
        &self,
        period: Period,
        publisher: &P,
    ) -> Result<PeriodReport, PipelineError> {
        let report = self.run_period(period).await?;
        let sheet = report.sheet_name();
        publisher
            .publish(&sheet, &report.table())
            .await
            .map_err(|e| PipelineError::Publish {
                sheet: sheet.clone(),
                message: e.to_string(),
            })?;
        info!(sheet = %sheet, "[REPORT] Published billing table");
        Ok(report)
    }

    /// Publish the raw time-tracking datasets, one sheet each, then the
    /// [`DASHBOARD_SHEET`] summarising them.
    pub async fn sync_tracking<P: Publisher>(&self, publisher: &P) -> Result<SyncReport, PipelineError> {
        let tracking = &self.sources.tracking;
        let people = tracking.people_rows().await?;
        let projects = tracking.projects_rows().await?;
        let tables = [
            Table {
                header: TRACKING_PEOPLE.header(),
                rows: people.clone(),
            },
            Table {
                header: TRACKING_PROJECTS.header(),
                rows: projects.clone(),
            },
            Table {
                header: USER_ASSIGNMENTS.header(),
                rows: tracking.user_assignments_rows().await?,
            },
            Table {
                header: TASK_RATES.header(),
                rows: tracking.task_rates_rows().await?,
            },
        ];

        let mut report = SyncReport::default();
        let mut synced_at = Vec::with_capacity(SYNC_SHEETS.len());
        for ((sheet, label), table) in SYNC_SHEETS.into_iter().zip(&tables) {
            publish_sheet(publisher, sheet, table).await?;
            synced_at.push((label, Utc::now()));
            report.sheets.push((sheet.to_string(), table.len()));
        }

        let summary = dashboard(&people, &projects, &synced_at);
        publish_sheet(publisher, DASHBOARD_SHEET, &summary).await?;
        report.sheets.push((DASHBOARD_SHEET.to_string(), summary.len()));
        Ok(report)
    }
}

async fn publish_sheet<P: Publisher>(publisher: &P, sheet: &str, table: &Table) -> Result<(), PipelineError> {
    publisher
        .publish(sheet, table)
        .await
        .map_err(|e| PipelineError::Publish {
            sheet: sheet.to_string(),
            message: e.to_string(),
        })?;
    info!(sheet, rows = table.len(), "[SYNC] Published sheet");
    Ok(())
}
