use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::{self, write};
use std::path::Path;
use tempfile::{tempdir, NamedTempFile};

/// Creates a config whose cache lives in `cache_dir`.
fn create_config(cache_dir: &Path) -> NamedTempFile {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    write(
        config.path(),
        format!("cache:\n  dir: {}\n", cache_dir.display()),
    )
    .expect("Writing temp config failed");
    config
}

#[test]
fn help_lists_every_command() {
    let mut cmd = Command::cargo_bin("roster").expect("Binary exists");
    cmd.arg("--help");
    cmd.assert().success().stdout(
        predicate::str::contains("report")
            .and(predicate::str::contains("sync"))
            .and(predicate::str::contains("refresh")),
    );
}

#[test]
fn refresh_keeps_cache_of_complete_month() {
    let cache_dir = tempdir().unwrap();
    let cached = cache_dir.path().join("allocations_2000-01.csv");
    write(&cached, "project_id,person_id,hours\n70,30,2\n").unwrap();
    let config = create_config(cache_dir.path());

    let mut cmd = Command::cargo_bin("roster").expect("Binary exists");
    cmd.arg("refresh")
        .arg("--month")
        .arg("2000-01")
        .arg("--config")
        .arg(config.path())
        .env_remove("HARVEST_TOKEN");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Refresh skipped"));
    assert!(cached.exists());
}

#[test]
fn refresh_drops_cache_of_open_month() {
    let cache_dir = tempdir().unwrap();
    let allocations = cache_dir.path().join("allocations_2999-01.csv");
    let cross_reference = cache_dir.path().join("cross_reference_2999-01.csv");
    let people = cache_dir.path().join("tracking_people.csv");
    for path in [&allocations, &cross_reference, &people] {
        write(path, "a,b\n1,2\n").unwrap();
    }
    let config = create_config(cache_dir.path());

    let mut cmd = Command::cargo_bin("roster").expect("Binary exists");
    cmd.arg("refresh")
        .arg("--month")
        .arg("2999-01")
        .arg("--config")
        .arg(config.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Refresh complete"));
    assert!(!allocations.exists());
    assert!(!cross_reference.exists());
    assert!(people.exists(), "period-independent datasets are kept");
}

#[test]
fn report_without_credentials_fails() {
    let cache_dir = tempdir().unwrap();
    let config = create_config(cache_dir.path());

    let mut cmd = Command::cargo_bin("roster").expect("Binary exists");
    cmd.current_dir(cache_dir.path())
        .arg("report")
        .arg("--month")
        .arg("2026-10")
        .arg("--config")
        .arg(config.path())
        .env_remove("HARVEST_TOKEN")
        .env_remove("HARVEST_ID")
        .env_remove("FORECAST_ID");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("HARVEST_TOKEN"));
    assert!(fs::read_dir(cache_dir.path()).unwrap().all(|e| {
        let name = e.unwrap().file_name();
        !name.to_string_lossy().ends_with(".csv")
    }));
}

#[test]
fn malformed_month_is_rejected() {
    let mut cmd = Command::cargo_bin("roster").expect("Binary exists");
    cmd.arg("refresh").arg("--month").arg("2026-13");
    cmd.assert().failure();
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::Context, Layer, Registry};
use tracing_subscriber::prelude::*; // needed for .with()

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        use std::fmt::Write as FmtWrite;
        let mut msg = String::new();
        let _ = write!(&mut msg, "{:?}", event);
        self.events.lock().unwrap().push(msg);
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector { events: events.clone() };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use roster::cli::{run, Cli, Commands};

    let cache_dir = tempdir().unwrap();
    let config = create_config(cache_dir.path());
    let cli = Cli {
        config: Some(config.path().to_path_buf()),
        command: Commands::Refresh {
            month: "2000-01".parse().unwrap(),
        },
    };

    run(cli).await.expect("refresh of a complete month succeeds");

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
