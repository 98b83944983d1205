mod common;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use common::{test_config, FakeProbe, Harness, RecordingExecutor};
use homepi::clock::{Clock, ManualClock};
use homepi::config::ResourceThresholds;
use homepi::domain::{FixKind, FixOutcome, ProbeKind};
use homepi::error::Result;
use homepi::probes::{ResourceProbe, ResourceSample, ResourceSampler, SharedProbe};
use homepi::supervisor::WatchdogEvent;
use homepi::system::power::write_marker;
use std::sync::Arc;

#[tokio::test]
async fn inactive_service_is_restarted_after_third_failing_cycle() {
    let config = test_config();
    let service = FakeProbe::new(ProbeKind::Service, false);
    let executor = RecordingExecutor::new();
    executor.heal_on(FixKind::ServiceRestart, service.clone());
    let mut harness = Harness::new(&config, vec![service.clone() as SharedProbe], executor.clone());

    harness.cycles(2).await;
    assert!(executor.calls().is_empty());
    assert_eq!(harness.monitor.failures().consecutive(ProbeKind::Service), 2);

    harness.cycle().await;
    assert_eq!(executor.calls(), vec![FixKind::ServiceRestart]);

    let history = harness.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, FixKind::ServiceRestart);
    assert_eq!(history[0].outcome, FixOutcome::Succeeded);
    assert_eq!(history[0].verified, Some(true));
    let wire = serde_json::to_value(&history[0]).unwrap();
    assert_eq!(wire["kind"], "service-restart");

    // A verified fix clears the counter
    assert_eq!(harness.monitor.failures().consecutive(ProbeKind::Service), 0);
}

#[tokio::test]
async fn network_failure_persisting_after_ladder_requests_reboot() {
    let config = test_config();
    let network = FakeProbe::new(ProbeKind::Network, false);
    let executor = RecordingExecutor::new();
    let mut harness = Harness::new(&config, vec![network.clone() as SharedProbe], executor.clone());
    let mut events = harness.monitor.subscribe();

    harness.cycles(3).await;
    assert_eq!(
        executor.calls(),
        vec![FixKind::NetworkRestart, FixKind::NetworkInterfaceBounce]
    );

    // Post-remediation window: nothing happens until it fills up again
    harness.cycles(2).await;
    assert_eq!(executor.calls().len(), 2);

    harness.cycle().await;
    assert_eq!(
        executor.calls(),
        vec![
            FixKind::NetworkRestart,
            FixKind::NetworkInterfaceBounce,
            FixKind::FullReboot
        ]
    );
    let newest = &harness.history()[0];
    assert_eq!(newest.kind, FixKind::FullReboot);
    assert_eq!(newest.outcome, FixOutcome::Succeeded);

    let mut requested = false;
    while let Ok(event) = events.try_recv() {
        if let WatchdogEvent::RebootRequested { probe } = event {
            assert_eq!(probe, ProbeKind::Network);
            requested = true;
        }
    }
    assert!(requested);
}

#[tokio::test]
async fn reboot_is_skipped_when_window_is_full() {
    let config = test_config();
    assert_eq!(config.reboot_rate_limit_per_hour, 2);

    let clock = ManualClock::starting_now();
    let now = clock.now();
    let reboots = vec![now - ChronoDuration::minutes(55), now - ChronoDuration::minutes(50)];

    let network = FakeProbe::new(ProbeKind::Network, false);
    let executor = RecordingExecutor::new();
    let mut harness = Harness::with_reboots(
        &config,
        vec![network.clone() as SharedProbe],
        executor.clone(),
        reboots,
        clock,
    );
    let mut events = harness.monitor.subscribe();

    harness.cycles(6).await;

    assert!(!executor.calls().contains(&FixKind::FullReboot));
    let newest = &harness.history()[0];
    assert_eq!(newest.kind, FixKind::FullReboot);
    match &newest.outcome {
        FixOutcome::Skipped { reason } => assert!(reason.contains("rate-limited"), "{reason}"),
        other => panic!("expected a skipped reboot, got {other:?}"),
    }

    let mut skipped = false;
    while let Ok(event) = events.try_recv() {
        if let WatchdogEvent::RebootSkipped { recent, .. } = event {
            assert_eq!(recent, 2);
            skipped = true;
        }
    }
    assert!(skipped);
}

struct HotCpu;

#[async_trait]
impl ResourceSampler for HotCpu {
    async fn sample(&self) -> Result<ResourceSample> {
        Ok(ResourceSample {
            cpu_percent: 95.0,
            memory_percent: 40.0,
            disk_percent: 50.0,
            temperature_celsius: Some(55.0),
        })
    }
}

#[tokio::test]
async fn resource_pressure_only_warns() {
    let config = test_config();
    let resources: SharedProbe = Arc::new(ResourceProbe::new(
        Arc::new(HotCpu),
        ResourceThresholds::default(),
    ));
    let executor = RecordingExecutor::new();
    let mut harness = Harness::new(&config, vec![resources], executor.clone());

    let mut last = None;
    for _ in 0..7 {
        last = Some(harness.cycle().await);
    }
    let snapshot = last.unwrap();

    assert_eq!(snapshot.passed(ProbeKind::Resources), Some(false));
    assert!(executor.calls().is_empty());
    assert!(harness.history().is_empty());
    assert!(snapshot
        .warnings()
        .iter()
        .any(|w| w.contains("cpu usage critical")));

    let doc = harness.publisher.latest().to_json();
    assert_eq!(doc["health_checks"]["resources"], false);
    assert_eq!(doc["health_checks"]["current"]["cpu_percent"], 95.0);
}

#[tokio::test]
async fn transient_failure_resets_counter() {
    let config = test_config();
    let app = FakeProbe::new(ProbeKind::App, false);
    let executor = RecordingExecutor::new();
    let mut harness = Harness::new(&config, vec![app.clone() as SharedProbe], executor.clone());

    harness.cycle().await;
    assert_eq!(harness.monitor.failures().consecutive(ProbeKind::App), 1);

    app.set_passing(true);
    harness.cycle().await;
    assert_eq!(harness.monitor.failures().consecutive(ProbeKind::App), 0);

    // Two blips separated by a pass never reach the threshold
    for passing in [false, false, true, false, false, true] {
        app.set_passing(passing);
        harness.cycle().await;
    }
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn threshold_triggers_exactly_one_remediation() {
    let config = test_config();
    let app = FakeProbe::new(ProbeKind::App, false);
    let executor = RecordingExecutor::new();
    let mut harness = Harness::new(&config, vec![app.clone() as SharedProbe], executor.clone());

    harness.cycles(5).await;

    assert_eq!(executor.calls(), vec![FixKind::ServiceRestart]);
    let state = harness.monitor.failures().state(ProbeKind::App);
    assert_eq!(state.consecutive, 5);
    assert_eq!(state.exhausted_at, Some(3));
}

#[tokio::test]
async fn failing_fix_does_not_stop_ladder() {
    let config = test_config();
    let bluetooth = FakeProbe::new(ProbeKind::Bluetooth, false);
    let executor = RecordingExecutor::new();
    executor.fail_on(FixKind::BluetoothRestart);
    executor.heal_on(FixKind::BluetoothReconnect, bluetooth.clone());
    let mut harness = Harness::new(&config, vec![bluetooth.clone() as SharedProbe], executor.clone());

    harness.cycles(3).await;

    assert_eq!(
        executor.calls(),
        vec![FixKind::BluetoothRestart, FixKind::BluetoothReconnect]
    );
    let history = harness.history();
    assert!(matches!(history[1].outcome, FixOutcome::Failed { .. }));
    assert_eq!(history[0].verified, Some(true));
}

#[tokio::test]
async fn disabled_fix_family_is_never_applied() {
    let mut config = test_config();
    config.enable_network_fix = false;
    config.enable_system_reboot = false;
    let network = FakeProbe::new(ProbeKind::Network, false);
    let executor = RecordingExecutor::new();
    let mut harness = Harness::new(&config, vec![network as SharedProbe], executor.clone());

    harness.cycles(9).await;
    assert!(executor.calls().is_empty());
}

#[tokio::test]
async fn repeated_ladder_respects_fix_cooldown() {
    let mut config = test_config();
    config.max_failures = 1;
    config.enable_system_reboot = false;
    let network = FakeProbe::new(ProbeKind::Network, false);
    let executor = RecordingExecutor::new();
    let mut harness = Harness::new(&config, vec![network as SharedProbe], executor.clone());

    // Ladder at cycle 1, re-run at cycle 2 inside the 300s cooldown
    harness.cycles(2).await;

    assert_eq!(
        executor.calls(),
        vec![FixKind::NetworkRestart, FixKind::NetworkInterfaceBounce]
    );
    let history = harness.history();
    assert_eq!(history.len(), 4);
    for attempt in &history[..2] {
        match &attempt.outcome {
            FixOutcome::Skipped { reason } => assert!(reason.starts_with("cooldown"), "{reason}"),
            other => panic!("expected cooldown skip, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn post_reboot_check_repairs_bluetooth_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("watchdog-reboot");
    write_marker(&marker, "network unreachable").await.unwrap();

    let config = test_config();
    let bluetooth = FakeProbe::new(ProbeKind::Bluetooth, false);
    let service = FakeProbe::new(ProbeKind::Service, true);
    let executor = RecordingExecutor::new();
    executor.heal_on(FixKind::BluetoothReconnect, bluetooth.clone());
    let mut harness = Harness::new(
        &config,
        vec![service as SharedProbe, bluetooth.clone() as SharedProbe],
        executor.clone(),
    );

    assert!(harness.monitor.post_reboot_check(&marker).await.unwrap());
    assert!(!marker.exists());
    assert_eq!(
        executor.calls(),
        vec![FixKind::BluetoothRestart, FixKind::BluetoothReconnect]
    );
    assert_eq!(harness.monitor.failures().consecutive(ProbeKind::Bluetooth), 0);

    // Without a marker nothing runs
    assert!(!harness.monitor.post_reboot_check(&marker).await.unwrap());
    assert_eq!(executor.calls().len(), 2);
}
