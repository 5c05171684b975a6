use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use roster_core::billing::BillingCalculator;
use roster_core::cache::{CacheStore, DatasetKey};
use roster_core::contract::{HttpRequest, HttpResponse, MockPublisher, MockTransport, Table};
use roster_core::diagnostic::Diagnostic;
use roster_core::error::FetchError;
use roster_core::fetch::ApiAuth;
use roster_core::matcher::RoleMatcher;
use roster_core::period::Period;
use roster_core::pipeline::{Pipeline, DASHBOARD_SHEET};
use roster_core::publish::DirectoryPublisher;
use roster_core::sources::{PlanningClient, Sources, TrackingClient};
use serde_json::{json, Value};
use tempfile::tempdir;

const TRACKING_URL: &str = "https://tracking.test/v2";
const PLANNING_URL: &str = "https://planning.test";

fn ok(body: Value) -> Result<HttpResponse, FetchError> {
    Ok(HttpResponse {
        status: 200,
        body: body.to_string(),
    })
}

fn auth(header: &str) -> ApiAuth {
    ApiAuth {
        token: "token".to_string(),
        account_header: header.to_string(),
        account_id: "1".to_string(),
        user_agent: "roster-test".to_string(),
    }
}

fn october() -> Period {
    "2026-10".parse().unwrap()
}

/// Serves the time-tracking endpoints. `tasks` is the catalog of project 7.
fn tracking_transport(tasks: &'static [(&'static str, f64)]) -> MockTransport {
    let mut transport = MockTransport::new();
    transport.expect_get().returning(move |req: HttpRequest| {
        let path = req.url.trim_start_matches(TRACKING_URL);
        match path {
            "/users" => ok(json!({
                "users": [
                    { "id": 3, "first_name": "Ada", "last_name": "Lovelace", "is_active": true, "roles": ["Development"] }
                ],
                "next_page": null
            })),
            "/projects" => ok(json!({
                "projects": [
                    { "id": 7, "name": "Apollo", "client": { "name": "NASA" }, "is_active": true, "is_billable": true }
                ],
                "next_page": null
            })),
            "/task_assignments" => {
                assert_eq!(req.query_value("is_active"), Some("true"));
                let records: Vec<Value> = tasks
                    .iter()
                    .map(|(name, rate)| {
                        json!({
                            "project": { "id": 7, "name": "Apollo" },
                            "task": { "name": name },
                            "billable": true,
                            "hourly_rate": rate
                        })
                    })
                    .collect();
                ok(json!({ "task_assignments": records, "next_page": null }))
            }
            "/user_assignments" => ok(json!({
                "user_assignments": [
                    {
                        "project": { "id": 7, "name": "Apollo" },
                        "user": { "id": 3, "name": "Ada Lovelace" },
                        "use_default_rates": true,
                        "hourly_rate": null
                    }
                ],
                "next_page": null
            })),
            other => panic!("unexpected tracking path {other}"),
        }
    });
    transport
}

fn planning_transport() -> MockTransport {
    let mut transport = MockTransport::new();
    transport.expect_get().returning(|req: HttpRequest| {
        let path = req.url.trim_start_matches(PLANNING_URL);
        match path {
            "/people" => ok(json!({
                "people": [
                    { "id": 30, "harvest_user_id": 3, "first_name": "Ada", "last_name": "Lovelace", "roles": ["Engineering"], "archived": false }
                ]
            })),
            "/projects" => ok(json!({
                "projects": [
                    { "id": 70, "harvest_id": 7, "name": "Apollo", "archived": false }
                ]
            })),
            "/assignments" => {
                assert_eq!(req.query_value("start_date"), Some("2026-10-01"));
                assert_eq!(req.query_value("end_date"), Some("2026-10-31"));
                assert_eq!(req.query_value("state"), Some("active"));
                ok(json!({
                    "assignments": [
                        { "project_id": 70, "person_id": 30, "allocation": 1440 }
                    ]
                }))
            }
            other => panic!("unexpected planning path {other}"),
        }
    });
    transport
}

fn silent_transport() -> MockTransport {
    let mut transport = MockTransport::new();
    transport.expect_get().never();
    transport
}

fn pipeline(
    cache_dir: &Path,
    tracking: MockTransport,
    planning: MockTransport,
) -> Pipeline<MockTransport, MockTransport> {
    let cache = CacheStore::new(cache_dir);
    let sources = Sources::new(
        TrackingClient::new(tracking, TRACKING_URL, auth("Harvest-Account-ID"), cache.clone()),
        PlanningClient::new(planning, PLANNING_URL, auth("Forecast-Account-ID"), cache),
    );
    Pipeline::new(sources, BillingCalculator::new(RoleMatcher::default()))
}

#[tokio::test]
async fn test_end_to_end_single_allocation() {
    let dir = tempdir().unwrap();
    let pipeline = pipeline(
        dir.path(),
        tracking_transport(&[("Engineering (US)", 50.0)]),
        planning_transport(),
    );

    let report = pipeline.run_period(october()).await.expect("run should succeed");

    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
    assert_eq!(report.lines.len(), 1);
    let line = &report.lines[0];
    assert_eq!(line.project_id, 7);
    assert_eq!(line.person_name, "Ada Lovelace");
    assert_eq!(line.role_tag, "Engineering");
    assert_eq!(line.matched_task, "Engineering (US)");
    assert_eq!(line.hours, 2);
    assert_eq!(line.task_rate, 50);
    assert_eq!(line.subtotal, 100);
    assert_eq!(report.total(), 100);

    let cache = CacheStore::new(dir.path());
    for key in [
        DatasetKey::TrackingPeople,
        DatasetKey::TrackingProjects,
        DatasetKey::TaskRates,
        DatasetKey::PlanningPeople,
        DatasetKey::PlanningProjects,
        DatasetKey::Allocations(october()),
        DatasetKey::CrossReference(october()),
    ] {
        assert!(cache.path_for(&key).exists(), "{key} should be cached");
        assert!(report.datasets.contains(&key), "{key} should be reported");
    }
}

#[tokio::test]
async fn test_second_run_is_served_from_cache() {
    let dir = tempdir().unwrap();
    let first = pipeline(
        dir.path(),
        tracking_transport(&[("Engineering (US)", 50.0)]),
        planning_transport(),
    )
    .run_period(october())
    .await
    .unwrap();

    let second = pipeline(dir.path(), silent_transport(), silent_transport())
        .run_period(october())
        .await
        .expect("cached run needs no network");

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_ambiguous_catalog_reports_both_candidates() {
    let dir = tempdir().unwrap();
    let pipeline = pipeline(
        dir.path(),
        tracking_transport(&[("Engineering (US)", 50.0), ("Engineering (EU)", 45.0)]),
        planning_transport(),
    );

    let report = pipeline.run_period(october()).await.unwrap();

    assert!(report.lines.is_empty());
    assert_eq!(
        report.diagnostics,
        vec![Diagnostic::Ambiguous {
            person_name: "Ada Lovelace".to_string(),
            project_name: "Apollo".to_string(),
            tag: "Engineering".to_string(),
            candidates: vec!["Engineering (US)".to_string(), "Engineering (EU)".to_string()],
        }]
    );
}

#[tokio::test]
async fn test_report_publishes_billing_sheet() {
    let dir = tempdir().unwrap();
    let pipeline = pipeline(
        dir.path(),
        tracking_transport(&[("Engineering (US)", 50.0)]),
        planning_transport(),
    );

    let mut publisher = MockPublisher::new();
    publisher
        .expect_publish()
        .times(1)
        .withf(|sheet: &str, table: &Table| {
            sheet == "billing_2026-10"
                && table.header[0] == "project_id"
                && table.rows
                    == vec![vec![
                        "7".to_string(),
                        "Apollo".to_string(),
                        "Ada Lovelace".to_string(),
                        "Engineering".to_string(),
                        "Engineering (US)".to_string(),
                        "50".to_string(),
                        "2".to_string(),
                        "100".to_string(),
                    ]]
        })
        .returning(|_, _| Ok(()));

    let report = pipeline.report(october(), &publisher).await.unwrap();
    assert_eq!(report.sheet_name(), "billing_2026-10");
}

#[tokio::test]
async fn test_publish_failure_is_fatal() {
    let dir = tempdir().unwrap();
    let pipeline = pipeline(
        dir.path(),
        tracking_transport(&[("Engineering (US)", 50.0)]),
        planning_transport(),
    );

    let mut publisher = MockPublisher::new();
    publisher
        .expect_publish()
        .returning(|_, _| Err("sheet is locked".into()));

    let err = pipeline.report(october(), &publisher).await.unwrap_err();
    assert!(err.to_string().contains("billing_2026-10"), "{err}");
}

#[tokio::test]
async fn test_sync_writes_tracking_sheets_and_state() {
    let cache_dir = tempdir().unwrap();
    let out_dir = tempdir().unwrap();
    let pipeline = pipeline(
        cache_dir.path(),
        tracking_transport(&[("Engineering (US)", 50.0)]),
        silent_transport(),
    );
    let publisher = DirectoryPublisher::new(out_dir.path());

    let report = pipeline.sync_tracking(&publisher).await.unwrap();

    let sheets: Vec<&str> = report.sheets.iter().map(|(s, _)| s.as_str()).collect();
    assert_eq!(
        sheets,
        vec!["People", "Projects", "UserAssignments", "TaskAssignments", DASHBOARD_SHEET]
    );
    assert!(report.sheets[..4].iter().all(|(_, rows)| *rows == 1));

    let people = std::fs::read_to_string(publisher.sheet_path("People")).unwrap();
    assert!(people.starts_with("id,first_name,last_name,is_active,roles"));
    assert!(people.contains("3,Ada,Lovelace,true,Development"));

    let dashboard = std::fs::read_to_string(publisher.sheet_path(DASHBOARD_SHEET)).unwrap();
    assert!(dashboard.starts_with("metric,value"), "{dashboard}");
    assert!(dashboard.contains("Active Projects,1"), "{dashboard}");
    assert!(dashboard.contains("Active NonBillable Projects,0"), "{dashboard}");
    assert!(dashboard.contains("Active Harvest Users,1"), "{dashboard}");
    assert!(dashboard.contains("Harvest Task Assignments,20"), "{dashboard}");

    let state = publisher.state().unwrap();
    assert_eq!(state.last_published.len(), 5);
    assert!(state.last_published.contains_key("TaskAssignments"));
    assert!(state.last_published.contains_key(DASHBOARD_SHEET));
}

/// Planning endpoints for a month with no allocations, counting `/assignments` calls.
fn empty_month_transport(assignment_calls: Arc<AtomicUsize>) -> MockTransport {
    let mut transport = MockTransport::new();
    transport.expect_get().returning(move |req: HttpRequest| {
        match req.url.trim_start_matches(PLANNING_URL) {
            "/people" => ok(json!({ "people": [] })),
            "/projects" => ok(json!({ "projects": [] })),
            "/assignments" => {
                assignment_calls.fetch_add(1, Ordering::SeqCst);
                ok(json!({ "assignments": [] }))
            }
            other => panic!("unexpected planning path {other}"),
        }
    });
    transport
}

#[tokio::test]
async fn test_empty_month_is_fetched_once_per_run() {
    let dir = tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let report = pipeline(
        dir.path(),
        tracking_transport(&[("Engineering (US)", 50.0)]),
        empty_month_transport(calls.clone()),
    )
    .run_period(october())
    .await
    .unwrap();

    assert!(report.lines.is_empty());
    assert!(report.diagnostics.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 1, "one GET per key per run");

    // Header-only files stay suspect, so the next run asks again, once.
    pipeline(
        dir.path(),
        silent_transport(),
        empty_month_transport(calls.clone()),
    )
    .run_period(october())
    .await
    .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
