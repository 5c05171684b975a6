//! Typed records parsed back out of cached rows, and the derived pipeline records.
//!
//! Column order for every cached dataset is fixed by the projections in
//! [`crate::sources`]; the `from_row` constructors here read those positions.

use serde::Serialize;

use crate::contract::Row;
use crate::error::RowError;

/// Separator used when a JSON array (role lists) is flattened into one cell.
pub const LIST_SEPARATOR: &str = ";";

/// Positional access to a cached row with dataset-aware errors.
struct Cells<'a> {
    dataset: &'static str,
    row: &'a Row,
}

impl<'a> Cells<'a> {
    fn new(dataset: &'static str, row: &'a Row) -> Self {
        Self { dataset, row }
    }

    fn error(&self, column: &str, value: &str) -> RowError {
        RowError {
            dataset: self.dataset.to_string(),
            column: column.to_string(),
            value: value.to_string(),
        }
    }

    fn text(&self, index: usize, column: &str) -> Result<&'a str, RowError> {
        self.row
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| self.error(column, "<missing>"))
    }

    fn id(&self, index: usize, column: &str) -> Result<u64, RowError> {
        let raw = self.text(index, column)?;
        raw.trim().parse().map_err(|_| self.error(column, raw))
    }

    fn optional_id(&self, index: usize, column: &str) -> Result<Option<u64>, RowError> {
        let raw = self.text(index, column)?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        raw.trim().parse().map(Some).map_err(|_| self.error(column, raw))
    }

    fn integer(&self, index: usize, column: &str) -> Result<i64, RowError> {
        let raw = self.text(index, column)?;
        raw.trim().parse().map_err(|_| self.error(column, raw))
    }

    fn optional_number(&self, index: usize, column: &str) -> Result<Option<f64>, RowError> {
        let raw = self.text(index, column)?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        raw.trim().parse().map(Some).map_err(|_| self.error(column, raw))
    }

    fn flag(&self, index: usize, column: &str) -> Result<bool, RowError> {
        match self.text(index, column)?.trim() {
            "true" => Ok(true),
            "false" | "" => Ok(false),
            other => Err(self.error(column, other)),
        }
    }

    fn list(&self, index: usize, column: &str) -> Result<Vec<String>, RowError> {
        Ok(split_list(self.text(index, column)?))
    }
}

pub fn split_list(cell: &str) -> Vec<String> {
    cell.split(LIST_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// A person as known to one system. `linked_id` is the other system's id when the
/// record carries one (planning people reference their time-tracking user).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    pub id: u64,
    pub linked_id: Option<u64>,
    pub first_name: String,
    pub last_name: String,
    pub role_tags: Vec<String>,
}

impl Person {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// `id, first_name, last_name, is_active, roles`
    pub fn from_tracking_row(row: &Row) -> Result<Self, RowError> {
        let c = Cells::new("tracking_people", row);
        Ok(Self {
            id: c.id(0, "id")?,
            linked_id: None,
            first_name: c.text(1, "first_name")?.to_string(),
            last_name: c.text(2, "last_name")?.to_string(),
            role_tags: c.list(4, "roles")?,
        })
    }

    /// `id, harvest_user_id, first_name, last_name, roles, archived`
    pub fn from_planning_row(row: &Row) -> Result<Self, RowError> {
        let c = Cells::new("planning_people", row);
        Ok(Self {
            id: c.id(0, "id")?,
            linked_id: c.optional_id(1, "harvest_user_id")?,
            first_name: c.text(2, "first_name")?.to_string(),
            last_name: c.text(3, "last_name")?.to_string(),
            role_tags: c.list(4, "roles")?,
        })
    }
}

/// A project with whichever of its two identities the source knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub planning_id: Option<u64>,
    pub tracking_id: Option<u64>,
    pub name: String,
}

impl Project {
    /// `id, client, name, is_active, is_billable`
    pub fn from_tracking_row(row: &Row) -> Result<Self, RowError> {
        let c = Cells::new("tracking_projects", row);
        Ok(Self {
            planning_id: None,
            tracking_id: Some(c.id(0, "id")?),
            name: c.text(2, "name")?.to_string(),
        })
    }

    /// `id, harvest_id, name, archived`
    pub fn from_planning_row(row: &Row) -> Result<Self, RowError> {
        let c = Cells::new("planning_projects", row);
        Ok(Self {
            planning_id: Some(c.id(0, "id")?),
            tracking_id: c.optional_id(1, "harvest_id")?,
            name: c.text(2, "name")?.to_string(),
        })
    }
}

/// Planned hours for one person on one project, already normalized to hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub planning_project_id: u64,
    pub planning_person_id: u64,
    pub hours: i64,
}

impl Allocation {
    /// `project_id, person_id, hours`
    pub fn from_row(row: &Row) -> Result<Self, RowError> {
        let c = Cells::new("allocations", row);
        Ok(Self {
            planning_project_id: c.id(0, "project_id")?,
            planning_person_id: c.id(1, "person_id")?,
            hours: c.integer(2, "hours")?,
        })
    }
}

/// A task of a project's catalog and its hourly rate.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRate {
    pub tracking_project_id: u64,
    pub project_name: String,
    pub task_name: String,
    pub billable: bool,
    pub hourly_rate: Option<f64>,
}

impl TaskRate {
    /// `project_id, project_name, task_name, billable, hourly_rate`
    pub fn from_row(row: &Row) -> Result<Self, RowError> {
        let c = Cells::new("task_rates", row);
        Ok(Self {
            tracking_project_id: c.id(0, "project_id")?,
            project_name: c.text(1, "project_name")?.to_string(),
            task_name: c.text(2, "task_name")?.to_string(),
            billable: c.flag(3, "billable")?,
            hourly_rate: c.optional_number(4, "hourly_rate")?,
        })
    }
}

/// Membership of a time-tracking user on a project.
#[derive(Debug, Clone, PartialEq)]
pub struct UserAssignment {
    pub tracking_project_id: u64,
    pub project_name: String,
    pub tracking_person_id: u64,
    pub person_name: String,
    pub use_default_rates: bool,
    pub hourly_rate: Option<f64>,
}

impl UserAssignment {
    /// `project_id, project_name, user_id, user_name, use_default_rates, hourly_rate`
    pub fn from_row(row: &Row) -> Result<Self, RowError> {
        let c = Cells::new("user_assignments", row);
        Ok(Self {
            tracking_project_id: c.id(0, "project_id")?,
            project_name: c.text(1, "project_name")?.to_string(),
            tracking_person_id: c.id(2, "user_id")?,
            person_name: c.text(3, "user_name")?.to_string(),
            use_default_rates: c.flag(4, "use_default_rates")?,
            hourly_rate: c.optional_number(5, "hourly_rate")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Person,
    Project,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Person => "person",
            LinkKind::Project => "project",
        }
    }
}

/// One row of the period-scoped cross reference between planning and tracking ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityLink {
    pub kind: LinkKind,
    pub planning_id: u64,
    pub tracking_id: Option<u64>,
    pub role_tags: Vec<String>,
}

impl IdentityLink {
    /// `kind, planning_id, tracking_id, roles`
    pub fn from_row(row: &Row) -> Result<Self, RowError> {
        let c = Cells::new("cross_reference", row);
        let kind = match c.text(0, "kind")? {
            "person" => LinkKind::Person,
            "project" => LinkKind::Project,
            other => return Err(c.error("kind", other)),
        };
        Ok(Self {
            kind,
            planning_id: c.id(1, "planning_id")?,
            tracking_id: c.optional_id(2, "tracking_id")?,
            role_tags: c.list(3, "roles")?,
        })
    }

    pub fn to_row(&self) -> Row {
        vec![
            self.kind.as_str().to_string(),
            self.planning_id.to_string(),
            self.tracking_id.map(|id| id.to_string()).unwrap_or_default(),
            self.role_tags.join(LIST_SEPARATOR),
        ]
    }
}

/// An allocation joined to both systems' identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedAssignment {
    pub planning_project_id: u64,
    pub tracking_project_id: u64,
    pub project_name: String,
    pub tracking_person_id: u64,
    pub hours: i64,
    pub person_name: String,
    pub first_name: String,
    pub role_tag: String,
}

/// One billable line of the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillingLine {
    pub project_id: u64,
    pub project_name: String,
    pub person_name: String,
    pub role_tag: String,
    pub matched_task: String,
    pub task_rate: i64,
    pub hours: i64,
    pub subtotal: i64,
}

impl BillingLine {
    pub const HEADER: [&'static str; 8] = [
        "project_id",
        "project_name",
        "person_name",
        "role_tag",
        "matched_task",
        "task_rate",
        "hours",
        "subtotal",
    ];

    pub fn to_row(&self) -> Row {
        vec![
            self.project_id.to_string(),
            self.project_name.clone(),
            self.person_name.clone(),
            self.role_tag.clone(),
            self.matched_task.clone(),
            self.task_rate.to_string(),
            self.hours.to_string(),
            self.subtotal.to_string(),
        ]
    }
}
