//! Recoverable per-row problems. A run collects these, logs each one and keeps going.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// The allocation's project has no time-tracking counterpart.
    ProjectNotFound {
        planning_project_id: u64,
        tracking_project_id: Option<u64>,
    },
    /// The allocation's person has no time-tracking counterpart.
    PersonNotFound {
        planning_person_id: u64,
        tracking_person_id: Option<u64>,
    },
    /// No billable task fits the person's role tag.
    NoMatch {
        person_name: String,
        project_name: String,
        tag: String,
        pool: Vec<String>,
    },
    /// More than one billable task fits and nothing narrowed it down.
    Ambiguous {
        person_name: String,
        project_name: String,
        tag: String,
        candidates: Vec<String>,
    },
}

impl Diagnostic {
    pub fn kind(&self) -> &'static str {
        match self {
            Diagnostic::ProjectNotFound { .. } => "project-id-not-found",
            Diagnostic::PersonNotFound { .. } => "person-id-not-found",
            Diagnostic::NoMatch { .. } => "no-match",
            Diagnostic::Ambiguous { .. } => "ambiguous",
        }
    }
}

fn tracking(id: &Option<u64>) -> String {
    id.map(|id| id.to_string())
        .unwrap_or_else(|| "unlinked".to_string())
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::ProjectNotFound {
                planning_project_id,
                tracking_project_id,
            } => write!(
                f,
                "{}: planning project {} (tracking id {})",
                self.kind(),
                planning_project_id,
                tracking(tracking_project_id)
            ),
            Diagnostic::PersonNotFound {
                planning_person_id,
                tracking_person_id,
            } => write!(
                f,
                "{}: planning person {} (tracking id {})",
                self.kind(),
                planning_person_id,
                tracking(tracking_person_id)
            ),
            Diagnostic::NoMatch {
                person_name,
                project_name,
                tag,
                pool,
            } => write!(
                f,
                "{}: {person_name} on {project_name}, tag {tag:?} not found in {pool:?}",
                self.kind()
            ),
            Diagnostic::Ambiguous {
                person_name,
                project_name,
                tag,
                candidates,
            } => write!(
                f,
                "{}: {person_name} on {project_name}, tag {tag:?} matches {candidates:?}",
                self.kind()
            ),
        }
    }
}
