mod common;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{test_config, FakeProbe, Harness, RecordingExecutor};
use homepi::clock::system_clock;
use homepi::domain::{ProbeKind, ProbeResult};
use homepi::error::Result;
use homepi::probes::{Probe, SharedProbe};
use homepi::services::{status_router, StatusPublisher, StatusServer};
use homepi::supervisor::{
    FixHistory, HealthMonitor, MonitorSettings, RebootGuard, RecoveryEngine, RecoverySettings,
};
use homepi::system::power::write_marker;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceExt;

async fn get_status(publisher: &StatusPublisher) -> (StatusCode, Value) {
    let response = status_router(publisher.clone())
        .oneshot(
            Request::builder()
                .uri("/api/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn status_reflects_latest_cycle() {
    let config = test_config();
    let service = FakeProbe::new(ProbeKind::Service, false);
    let network = FakeProbe::new(ProbeKind::Network, true);
    let mut harness = Harness::new(
        &config,
        vec![service.clone() as SharedProbe, network as SharedProbe],
        RecordingExecutor::new(),
    );

    harness.cycle().await;
    let (status, doc) = get_status(&harness.publisher).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["online"], false);
    assert_eq!(doc["health_checks"]["service"], false);
    assert_eq!(doc["health_checks"]["network"], true);
    assert_eq!(doc["health_checks"]["camera"], Value::Null);
    assert_eq!(doc["watchdog_status"]["cycles"], 1);
    assert_eq!(doc["watchdog_status"]["failures"]["service"]["consecutive"], 1);

    service.set_passing(true);
    harness.cycle().await;
    let (_, doc) = get_status(&harness.publisher).await;
    assert_eq!(doc["online"], true);
    assert_eq!(doc["watchdog_status"]["cycles"], 2);
}

#[tokio::test]
async fn liveness_endpoint_answers() {
    let publisher = StatusPublisher::new("homepi.service", 30, 3);
    let response = status_router(publisher)
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// Probe that never answers on its own
struct Hanging;

#[async_trait]
impl Probe for Hanging {
    fn kind(&self) -> ProbeKind {
        ProbeKind::App
    }

    async fn check(&self) -> Result<ProbeResult> {
        std::future::pending().await
    }
}

/// Monitor over `probes` on the real clock with a short cycle deadline
fn live_monitor(probes: Vec<SharedProbe>, cycle_deadline: Duration) -> (HealthMonitor, StatusPublisher) {
    let config = test_config();
    let clock = system_clock();
    let publisher = StatusPublisher::new(config.service_unit.clone(), 1, config.max_failures);
    let engine = RecoveryEngine::new(
        RecoverySettings::from_config(&config),
        RecordingExecutor::new(),
        RebootGuard::new(config.reboot_rate_limit_per_hour, clock.clone()),
        FixHistory::in_memory(10),
        clock.clone(),
    );
    let settings = MonitorSettings {
        check_interval: Duration::from_secs(1),
        probe_timeout: Duration::from_secs(10),
        cycle_deadline,
        ..MonitorSettings::default()
    };
    let monitor = HealthMonitor::new(
        settings,
        config.max_failures,
        probes,
        engine,
        publisher.clone(),
        clock,
    );
    (monitor, publisher)
}

#[tokio::test]
async fn status_answers_while_a_probe_hangs() {
    let (monitor, publisher) =
        live_monitor(vec![Arc::new(Hanging) as SharedProbe], Duration::from_millis(500));
    let mut updates = publisher.subscribe();
    let handle = monitor.start();

    // The first cycle starts immediately and is now stuck on the probe
    tokio::time::sleep(Duration::from_millis(50)).await;
    let started = Instant::now();
    let (status, doc) = get_status(&publisher).await;
    assert!(started.elapsed() < Duration::from_millis(50));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc["watchdog_status"]["running"], true);
    assert_eq!(doc["watchdog_status"]["cycles"], 0);

    // The cycle deadline turns the hung probe into a failure
    tokio::time::timeout(Duration::from_secs(5), async {
        while updates.borrow_and_update().watchdog.cycles == 0 {
            updates.changed().await.unwrap();
        }
    })
    .await
    .unwrap();
    let report = publisher.latest();
    let app = report.snapshot.as_ref().unwrap().get(ProbeKind::App).unwrap();
    assert!(!app.passed);
    assert_eq!(app.detail["error"], "probe error: cycle deadline exceeded");

    handle.stop();
    handle.join().await;
    assert!(!publisher.latest().watchdog.running);
}

#[tokio::test]
async fn status_server_answers_during_post_reboot_check() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("watchdog-reboot");
    write_marker(&marker, "network unreachable").await.unwrap();

    let (mut monitor, publisher) =
        live_monitor(vec![Arc::new(Hanging) as SharedProbe], Duration::from_secs(2));
    let server = StatusServer::new(publisher, "127.0.0.1:0".parse().unwrap())
        .start()
        .await
        .unwrap();
    let base = format!("http://{}", server.local_addr());

    let check = tokio::spawn(async move { monitor.post_reboot_check(&marker).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!check.is_finished());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(500))
        .build()
        .unwrap();
    let doc: Value = client
        .get(format!("{base}/api/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(doc["watchdog_status"]["cycles"], 0);
    let live = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert_eq!(live.status(), reqwest::StatusCode::OK);

    assert!(check.await.unwrap().unwrap());
    let doc: Value = client
        .get(format!("{base}/api/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(doc["watchdog_status"]["cycles"], 1);
    assert_eq!(doc["health_checks"]["app"], false);
    server.shutdown();
}

/// Indexes into adapter output that came back empty
struct Panicking;

#[async_trait]
impl Probe for Panicking {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Bluetooth
    }

    async fn check(&self) -> Result<ProbeResult> {
        let fields: Vec<&str> = "".split_whitespace().collect();
        Ok(ProbeResult::pass(ProbeKind::Bluetooth, serde_json::json!({ "sink": fields[1] })))
    }
}

#[tokio::test]
async fn panicking_probe_is_recorded_and_loop_keeps_running() {
    let healthy = FakeProbe::new(ProbeKind::Network, true);
    let (monitor, publisher) = live_monitor(
        vec![Arc::new(Panicking) as SharedProbe, healthy.clone() as SharedProbe],
        Duration::from_millis(500),
    );
    let mut updates = publisher.subscribe();
    let handle = monitor.start();

    tokio::time::timeout(Duration::from_secs(5), async {
        while updates.borrow_and_update().watchdog.cycles < 2 {
            updates.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    assert!(handle.is_running());
    let report = publisher.latest();
    let snapshot = report.snapshot.as_ref().unwrap();
    let bluetooth = snapshot.get(ProbeKind::Bluetooth).unwrap();
    assert!(!bluetooth.passed);
    assert_eq!(bluetooth.detail["error"], "probe error: panicked");
    assert_eq!(snapshot.passed(ProbeKind::Network), Some(true));
    assert!(healthy.checks() >= 2);
    assert_eq!(
        report.watchdog.failures[&ProbeKind::Bluetooth].consecutive as u64,
        report.watchdog.cycles
    );

    handle.stop();
    handle.join().await;
}
