//! Typed, cached accessors over the time-tracking (Harvest) and planning (Forecast) APIs.
//!
//! Every accessor is "get or populate" against one [`DatasetKey`]: on a cache miss the
//! producer walks the endpoint with [`PagedFetcher`], projects each JSON record onto
//! the dataset's columns and hands the table to the [`CacheStore`] to persist. Callers
//! always receive rows parsed back from the cache file, so a fresh fetch and a cache
//! hit look identical downstream.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{info, warn};

use crate::cache::{population_order, CacheStore, DatasetKey};
use crate::contract::{Row, Table, Transport};
use crate::error::{RowError, SourceError};
use crate::fetch::{ApiAuth, PagedFetcher};
use crate::model::{
    Allocation, IdentityLink, LinkKind, Person, Project, TaskRate, UserAssignment,
    LIST_SEPARATOR,
};
use crate::period::Period;

/// Upstream allocation units per reported hour. The division truncates toward zero.
pub const ALLOCATION_UNITS_PER_HOUR: i64 = 720;

/// How one output column is derived from a JSON record.
#[derive(Debug, Clone, Copy)]
pub enum Cell {
    /// Scalar at a JSON pointer (`/project/id`).
    Field(&'static str),
    /// Array at a JSON pointer, flattened with [`LIST_SEPARATOR`].
    List(&'static str),
    /// Raw allocation at a JSON pointer, normalized to whole hours.
    Hours(&'static str),
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub cell: Cell,
}

const fn col(name: &'static str, cell: Cell) -> Column {
    Column { name, cell }
}

/// Endpoint, response collection and column layout of one dataset.
#[derive(Debug, Clone, Copy)]
pub struct Projection {
    pub path: &'static str,
    pub collection: &'static str,
    pub columns: &'static [Column],
}

impl Projection {
    pub fn header(&self) -> Row {
        self.columns.iter().map(|c| c.name.to_string()).collect()
    }

    pub fn table(&self, records: &[Value]) -> Table {
        let mut table = Table {
            header: self.header(),
            rows: Vec::with_capacity(records.len()),
        };
        for record in records {
            table.push(self.columns.iter().map(|c| render(record, c.cell)).collect());
        }
        table
    }
}

fn render(record: &Value, cell: Cell) -> String {
    match cell {
        Cell::Field(pointer) => scalar(record.pointer(pointer)),
        Cell::List(pointer) => match record.pointer(pointer) {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| scalar(Some(v)))
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(LIST_SEPARATOR),
            other => scalar(other),
        },
        Cell::Hours(pointer) => {
            let raw = record.pointer(pointer).and_then(|v| {
                v.as_i64()
                    .or_else(|| v.as_f64().map(|f| f.trunc() as i64))
            });
            raw.map(|units| (units / ALLOCATION_UNITS_PER_HOUR).to_string())
                .unwrap_or_default()
        }
    }
}

fn scalar(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

pub const TRACKING_PEOPLE: Projection = Projection {
    path: "/users",
    collection: "users",
    columns: &[
        col("id", Cell::Field("/id")),
        col("first_name", Cell::Field("/first_name")),
        col("last_name", Cell::Field("/last_name")),
        col("is_active", Cell::Field("/is_active")),
        col("roles", Cell::List("/roles")),
    ],
};

pub const TRACKING_PROJECTS: Projection = Projection {
    path: "/projects",
    collection: "projects",
    columns: &[
        col("id", Cell::Field("/id")),
        col("client", Cell::Field("/client/name")),
        col("name", Cell::Field("/name")),
        col("is_active", Cell::Field("/is_active")),
        col("is_billable", Cell::Field("/is_billable")),
    ],
};

pub const TASK_RATES: Projection = Projection {
    path: "/task_assignments",
    collection: "task_assignments",
    columns: &[
        col("project_id", Cell::Field("/project/id")),
        col("project_name", Cell::Field("/project/name")),
        col("task_name", Cell::Field("/task/name")),
        col("billable", Cell::Field("/billable")),
        col("hourly_rate", Cell::Field("/hourly_rate")),
    ],
};

pub const USER_ASSIGNMENTS: Projection = Projection {
    path: "/user_assignments",
    collection: "user_assignments",
    columns: &[
        col("project_id", Cell::Field("/project/id")),
        col("project_name", Cell::Field("/project/name")),
        col("user_id", Cell::Field("/user/id")),
        col("user_name", Cell::Field("/user/name")),
        col("use_default_rates", Cell::Field("/use_default_rates")),
        col("hourly_rate", Cell::Field("/hourly_rate")),
    ],
};

pub const PLANNING_PEOPLE: Projection = Projection {
    path: "/people",
    collection: "people",
    columns: &[
        col("id", Cell::Field("/id")),
        col("harvest_user_id", Cell::Field("/harvest_user_id")),
        col("first_name", Cell::Field("/first_name")),
        col("last_name", Cell::Field("/last_name")),
        col("roles", Cell::List("/roles")),
        col("archived", Cell::Field("/archived")),
    ],
};

pub const PLANNING_PROJECTS: Projection = Projection {
    path: "/projects",
    collection: "projects",
    columns: &[
        col("id", Cell::Field("/id")),
        col("harvest_id", Cell::Field("/harvest_id")),
        col("name", Cell::Field("/name")),
        col("archived", Cell::Field("/archived")),
    ],
};

pub const ALLOCATIONS: Projection = Projection {
    path: "/assignments",
    collection: "assignments",
    columns: &[
        col("project_id", Cell::Field("/project_id")),
        col("person_id", Cell::Field("/person_id")),
        col("hours", Cell::Hours("/allocation")),
    ],
};

pub const CROSS_REFERENCE_HEADER: [&str; 4] = ["kind", "planning_id", "tracking_id", "roles"];

fn parse_rows<R>(
    rows: Vec<Row>,
    parse: fn(&Row) -> Result<R, RowError>,
) -> Result<Vec<R>, SourceError> {
    rows.iter()
        .map(|row| parse(row).map_err(SourceError::from))
        .collect()
}

fn active_only() -> Vec<(String, String)> {
    vec![("is_active".to_string(), "true".to_string())]
}

/// One API: its fetcher, base URL, credentials and the shared cache.
struct Endpoint<T> {
    fetcher: PagedFetcher<T>,
    base_url: String,
    auth: ApiAuth,
    cache: CacheStore,
}

impl<T: Transport> Endpoint<T> {
    fn new(transport: T, base_url: &str, auth: ApiAuth, cache: CacheStore) -> Self {
        Self {
            fetcher: PagedFetcher::new(transport),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            cache,
        }
    }

    async fn produce(
        &self,
        key: DatasetKey,
        projection: &Projection,
        query: Vec<(String, String)>,
    ) -> Result<Table, SourceError> {
        let url = format!("{}{}", self.base_url, projection.path);
        info!(key = %key, url = %url, "Fetching dataset");
        let records = self
            .fetcher
            .fetch(&url, projection.collection, &query, &self.auth.headers())
            .await?;
        Ok(projection.table(&records))
    }

    async fn rows(
        &self,
        key: DatasetKey,
        projection: &Projection,
        query: Vec<(String, String)>,
    ) -> Result<Vec<Row>, SourceError> {
        self.cache
            .load_or_populate(key, |key| self.produce(key, projection, query))
            .await
    }
}

/// Accessors over the time-tracking system.
pub struct TrackingClient<T> {
    endpoint: Endpoint<T>,
}

impl<T: Transport> TrackingClient<T> {
    pub fn new(transport: T, base_url: &str, auth: ApiAuth, cache: CacheStore) -> Self {
        Self {
            endpoint: Endpoint::new(transport, base_url, auth, cache),
        }
    }

    pub async fn people_rows(&self) -> Result<Vec<Row>, SourceError> {
        self.endpoint
            .rows(DatasetKey::TrackingPeople, &TRACKING_PEOPLE, Vec::new())
            .await
    }

    pub async fn people(&self) -> Result<Vec<Person>, SourceError> {
        parse_rows(self.people_rows().await?, Person::from_tracking_row)
    }

    pub async fn projects_rows(&self) -> Result<Vec<Row>, SourceError> {
        self.endpoint
            .rows(DatasetKey::TrackingProjects, &TRACKING_PROJECTS, Vec::new())
            .await
    }

    pub async fn projects(&self) -> Result<Vec<Project>, SourceError> {
        parse_rows(self.projects_rows().await?, Project::from_tracking_row)
    }

    pub async fn task_rates_rows(&self) -> Result<Vec<Row>, SourceError> {
        self.endpoint
            .rows(DatasetKey::TaskRates, &TASK_RATES, active_only())
            .await
    }

    pub async fn task_rates(&self) -> Result<Vec<TaskRate>, SourceError> {
        parse_rows(self.task_rates_rows().await?, TaskRate::from_row)
    }

    pub async fn user_assignments_rows(&self) -> Result<Vec<Row>, SourceError> {
        self.endpoint
            .rows(DatasetKey::UserAssignments, &USER_ASSIGNMENTS, active_only())
            .await
    }

    pub async fn user_assignments(&self) -> Result<Vec<UserAssignment>, SourceError> {
        parse_rows(self.user_assignments_rows().await?, UserAssignment::from_row)
    }
}

/// Accessors over the planning system, plus the period-scoped identity cross reference.
pub struct PlanningClient<T> {
    endpoint: Endpoint<T>,
}

impl<T: Transport> PlanningClient<T> {
    pub fn new(transport: T, base_url: &str, auth: ApiAuth, cache: CacheStore) -> Self {
        Self {
            endpoint: Endpoint::new(transport, base_url, auth, cache),
        }
    }

    pub async fn people(&self) -> Result<Vec<Person>, SourceError> {
        let rows = self
            .endpoint
            .rows(DatasetKey::PlanningPeople, &PLANNING_PEOPLE, Vec::new())
            .await?;
        parse_rows(rows, Person::from_planning_row)
    }

    pub async fn projects(&self) -> Result<Vec<Project>, SourceError> {
        let rows = self
            .endpoint
            .rows(DatasetKey::PlanningProjects, &PLANNING_PROJECTS, Vec::new())
            .await?;
        parse_rows(rows, Project::from_planning_row)
    }

    pub async fn allocations(&self, period: Period) -> Result<Vec<Allocation>, SourceError> {
        let query = vec![
            ("start_date".to_string(), period.start().format("%Y-%m-%d").to_string()),
            ("end_date".to_string(), period.end().format("%Y-%m-%d").to_string()),
            ("state".to_string(), "active".to_string()),
        ];
        let rows = self
            .endpoint
            .rows(DatasetKey::Allocations(period), &ALLOCATIONS, query)
            .await?;
        parse_rows(rows, Allocation::from_row)
    }

    /// Planning-to-tracking id links for every person and project the period's
    /// allocations reference.
    pub async fn cross_reference(&self, period: Period) -> Result<Vec<IdentityLink>, SourceError> {
        let rows = self
            .endpoint
            .cache
            .load_or_populate(DatasetKey::CrossReference(period), |_| {
                self.produce_cross_reference(period)
            })
            .await?;
        parse_rows(rows, IdentityLink::from_row)
    }

    async fn produce_cross_reference(&self, period: Period) -> Result<Table, SourceError> {
        let allocations = self.allocations(period).await?;
        let people: HashMap<u64, Person> = self
            .people()
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();
        let projects: HashMap<u64, Project> = self
            .projects()
            .await?
            .into_iter()
            .filter_map(|p| p.planning_id.map(|id| (id, p)))
            .collect();

        let mut links: Vec<IdentityLink> = Vec::new();
        let seen = |links: &[IdentityLink], kind: LinkKind, id: u64| {
            links.iter().any(|l| l.kind == kind && l.planning_id == id)
        };
        for allocation in &allocations {
            if !seen(&links, LinkKind::Project, allocation.planning_project_id) {
                let project = projects.get(&allocation.planning_project_id);
                if project.is_none() {
                    warn!(
                        planning_project_id = allocation.planning_project_id,
                        "Allocation references a project unknown to the planning system"
                    );
                }
                links.push(IdentityLink {
                    kind: LinkKind::Project,
                    planning_id: allocation.planning_project_id,
                    tracking_id: project.and_then(|p| p.tracking_id),
                    role_tags: Vec::new(),
                });
            }
            if !seen(&links, LinkKind::Person, allocation.planning_person_id) {
                let person = people.get(&allocation.planning_person_id);
                if person.is_none() {
                    warn!(
                        planning_person_id = allocation.planning_person_id,
                        "Allocation references a person unknown to the planning system"
                    );
                }
                links.push(IdentityLink {
                    kind: LinkKind::Person,
                    planning_id: allocation.planning_person_id,
                    tracking_id: person.and_then(|p| p.linked_id),
                    role_tags: person.map(|p| p.role_tags.clone()).unwrap_or_default(),
                });
            }
        }

        let mut table = Table::new(CROSS_REFERENCE_HEADER);
        for link in &links {
            table.push(link.to_row());
        }
        Ok(table)
    }
}

/// Both clients, addressed by dataset key.
pub struct Sources<TT, PT> {
    pub tracking: TrackingClient<TT>,
    pub planning: PlanningClient<PT>,
}

impl<TT: Transport, PT: Transport> Sources<TT, PT> {
    pub fn new(tracking: TrackingClient<TT>, planning: PlanningClient<PT>) -> Self {
        Self { tracking, planning }
    }

    /// Resolve `key` through its accessor, returning the number of cached rows.
    pub async fn ensure(&self, key: DatasetKey) -> Result<usize, SourceError> {
        let count = match key {
            DatasetKey::TrackingPeople => self.tracking.people_rows().await?.len(),
            DatasetKey::TrackingProjects => self.tracking.projects_rows().await?.len(),
            DatasetKey::TaskRates => self.tracking.task_rates_rows().await?.len(),
            DatasetKey::UserAssignments => self.tracking.user_assignments_rows().await?.len(),
            DatasetKey::PlanningPeople => self.planning.people().await?.len(),
            DatasetKey::PlanningProjects => self.planning.projects().await?.len(),
            DatasetKey::Allocations(p) => self.planning.allocations(p).await?.len(),
            DatasetKey::CrossReference(p) => self.planning.cross_reference(p).await?.len(),
        };
        Ok(count)
    }

    /// Populate every dataset a billing run for `period` reads, dependencies first.
    pub async fn prepare(&self, period: Period) -> Result<Vec<DatasetKey>, SourceError> {
        let order = population_order(&[
            DatasetKey::TrackingPeople,
            DatasetKey::TrackingProjects,
            DatasetKey::CrossReference(period),
            DatasetKey::TaskRates,
        ]);
        for key in &order {
            let rows = self.ensure(*key).await?;
            info!(key = %key, rows, "Dataset ready");
        }
        Ok(order)
    }
}
