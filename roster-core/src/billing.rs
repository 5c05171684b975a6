//! Turn resolved assignments into billing lines.
//!
//! `subtotal = trunc(rate) * trunc(hours)`. Fractional rates and hours are
//! discarded before multiplying; the existing billing sheets are computed the
//! same way and the output must match them.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::diagnostic::Diagnostic;
use crate::matcher::{MatchOutcome, RoleMatcher, Subject};
use crate::model::{BillingLine, ResolvedAssignment, TaskRate};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BillingReport {
    pub lines: Vec<BillingLine>,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn subtotal(rate: f64, hours: i64) -> i64 {
    (rate.trunc() as i64) * hours
}

/// Billable task catalog of each tracking project, in upstream order.
pub fn catalog(task_rates: &[TaskRate]) -> HashMap<u64, Vec<&TaskRate>> {
    let mut by_project: HashMap<u64, Vec<&TaskRate>> = HashMap::new();
    for rate in task_rates.iter().filter(|r| r.billable) {
        let tasks = by_project.entry(rate.tracking_project_id).or_default();
        if !tasks.iter().any(|t| t.task_name == rate.task_name) {
            tasks.push(rate);
        }
    }
    by_project
}

#[derive(Debug, Clone, Default)]
pub struct BillingCalculator {
    matcher: RoleMatcher,
}

impl BillingCalculator {
    pub fn new(matcher: RoleMatcher) -> Self {
        Self { matcher }
    }

    /// The line for an assignment already matched to `task`.
    pub fn line(assignment: &ResolvedAssignment, task: &TaskRate) -> BillingLine {
        let rate = task.hourly_rate.unwrap_or(0.0);
        BillingLine {
            project_id: assignment.tracking_project_id,
            project_name: assignment.project_name.clone(),
            person_name: assignment.person_name.clone(),
            role_tag: assignment.role_tag.clone(),
            matched_task: task.task_name.clone(),
            task_rate: rate.trunc() as i64,
            hours: assignment.hours,
            subtotal: subtotal(rate, assignment.hours),
        }
    }

    /// Match and bill every assignment. Unresolved ones become diagnostics.
    pub fn run(&self, assignments: &[ResolvedAssignment], task_rates: &[TaskRate]) -> BillingReport {
        let catalog = catalog(task_rates);
        let mut report = BillingReport::default();

        for assignment in assignments {
            let tasks = catalog
                .get(&assignment.tracking_project_id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let pool: Vec<String> = tasks.iter().map(|t| t.task_name.clone()).collect();
            let subject = Subject {
                full_name: &assignment.person_name,
                first_name: &assignment.first_name,
            };

            match self.matcher.match_task(&assignment.role_tag, subject, &pool) {
                MatchOutcome::Matched(task_name) => {
                    let Some(task) = tasks.iter().find(|t| t.task_name == task_name) else {
                        // Only reachable with a custom rule list.
                        warn!(task = %task_name, "Matched task is not in the project catalog");
                        report.diagnostics.push(Diagnostic::NoMatch {
                            person_name: assignment.person_name.clone(),
                            project_name: assignment.project_name.clone(),
                            tag: assignment.role_tag.clone(),
                            pool,
                        });
                        continue;
                    };
                    let line = Self::line(assignment, task);
                    debug!(
                        person = %line.person_name,
                        project = %line.project_name,
                        task = %line.matched_task,
                        subtotal = line.subtotal,
                        "Billed assignment"
                    );
                    report.lines.push(line);
                }
                MatchOutcome::NoMatch { tag, pool } => {
                    warn!(
                        person = %assignment.person_name,
                        project = %assignment.project_name,
                        tag = %tag,
                        pool = ?pool,
                        "no-match, assignment not billed"
                    );
                    report.diagnostics.push(Diagnostic::NoMatch {
                        person_name: assignment.person_name.clone(),
                        project_name: assignment.project_name.clone(),
                        tag,
                        pool,
                    });
                }
                MatchOutcome::Ambiguous { tag, candidates } => {
                    warn!(
                        person = %assignment.person_name,
                        project = %assignment.project_name,
                        tag = %tag,
                        candidates = ?candidates,
                        "ambiguous, assignment not billed"
                    );
                    report.diagnostics.push(Diagnostic::Ambiguous {
                        person_name: assignment.person_name.clone(),
                        project_name: assignment.project_name.clone(),
                        tag,
                        candidates,
                    });
                }
            }
        }
        report
    }
}
