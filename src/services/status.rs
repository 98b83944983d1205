//! Status query server
//!
//! Serves the last published snapshot and fix history. Handlers only read a
//! `watch` channel, so a slow or hung probe can never delay a response.

use crate::domain::{FixAttempt, HealthSnapshot, ProbeKind};
use crate::supervisor::FailureState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Watchdog liveness as reported by the monitor loop
#[derive(Debug, Clone, Serialize)]
pub struct WatchdogStatus {
    pub running: bool,
    pub started_at: DateTime<Utc>,
    pub last_cycle: Option<DateTime<Utc>>,
    pub cycles: u64,
    pub check_interval_secs: u64,
    pub max_failures: u32,
    pub failures: BTreeMap<ProbeKind, FailureState>,
}

/// Everything the monitor publishes after a cycle
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub service_unit: String,
    pub watchdog: WatchdogStatus,
    pub snapshot: Option<HealthSnapshot>,
    pub recent_fixes: Vec<FixAttempt>,
}

impl StatusReport {
    fn passed(&self, kind: ProbeKind) -> Option<bool> {
        self.snapshot.as_ref().and_then(|s| s.passed(kind))
    }

    fn detail(&self, kind: ProbeKind, key: &str) -> Value {
        self.snapshot
            .as_ref()
            .and_then(|s| s.get(kind))
            .and_then(|r| r.detail.get(key).cloned())
            .unwrap_or(Value::Null)
    }

    /// The external JSON document
    pub fn to_json(&self) -> Value {
        let reading = |kind: ProbeKind, key: &str| self.snapshot.as_ref().and_then(|s| s.reading(kind, key));
        let warnings = self
            .snapshot
            .as_ref()
            .map(HealthSnapshot::warnings)
            .unwrap_or_default();

        json!({
            "online": self.passed(ProbeKind::Service).unwrap_or(false),
            "timestamp": self.snapshot.as_ref().map(|s| s.timestamp),
            "service_status": {
                "unit": self.service_unit,
                "active": self.detail(ProbeKind::Service, "unit_active"),
                "http_ok": self.detail(ProbeKind::Service, "http_ok"),
                "healthy": self.passed(ProbeKind::Service),
            },
            "watchdog_status": self.watchdog,
            "health_checks": {
                "service": self.passed(ProbeKind::Service),
                "app": self.passed(ProbeKind::App),
                "network": self.passed(ProbeKind::Network),
                "camera": self.passed(ProbeKind::Camera),
                "bluetooth": self.passed(ProbeKind::Bluetooth),
                "resources": self.passed(ProbeKind::Resources),
                "current": {
                    "cpu_percent": reading(ProbeKind::Resources, "cpu_percent"),
                    "memory_percent": reading(ProbeKind::Resources, "memory_percent"),
                    "disk_percent": reading(ProbeKind::Resources, "disk_percent"),
                    "temperature_celsius": reading(ProbeKind::Resources, "temperature_celsius"),
                    "camera_frame_age": reading(ProbeKind::Camera, "frame_age"),
                    "bluetooth_connected": self.detail(ProbeKind::Bluetooth, "connected"),
                    "warnings": warnings,
                },
            },
            "recent_fixes": self.recent_fixes,
        })
    }
}

/// Single-writer, many-reader holder of the latest status
#[derive(Clone)]
pub struct StatusPublisher {
    tx: Arc<watch::Sender<StatusReport>>,
}

impl StatusPublisher {
    pub fn new(service_unit: impl Into<String>, check_interval_secs: u64, max_failures: u32) -> Self {
        let initial = StatusReport {
            service_unit: service_unit.into(),
            watchdog: WatchdogStatus {
                running: false,
                started_at: Utc::now(),
                last_cycle: None,
                cycles: 0,
                check_interval_secs,
                max_failures,
                failures: BTreeMap::new(),
            },
            snapshot: None,
            recent_fixes: Vec::new(),
        };
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Record a finished cycle
    pub fn publish(
        &self,
        snapshot: HealthSnapshot,
        recent_fixes: Vec<FixAttempt>,
        failures: BTreeMap<ProbeKind, FailureState>,
    ) {
        self.tx.send_modify(|report| {
            report.watchdog.last_cycle = Some(snapshot.timestamp);
            report.watchdog.cycles += 1;
            report.watchdog.failures = failures;
            report.snapshot = Some(snapshot);
            report.recent_fixes = recent_fixes;
        });
    }

    pub fn set_running(&self, running: bool) {
        self.tx.send_modify(|report| report.watchdog.running = running);
    }

    /// Last published report; never waits on the monitor
    pub fn latest(&self) -> StatusReport {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusReport> {
        self.tx.subscribe()
    }
}

/// Router for the status endpoints
pub fn status_router(publisher: StatusPublisher) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(status_handler))
        .route("/healthz", get(liveness_handler))
        .with_state(publisher)
        .layer(cors)
}

/// Status HTTP server
pub struct StatusServer {
    publisher: StatusPublisher,
    bind: SocketAddr,
}

impl StatusServer {
    pub fn new(publisher: StatusPublisher, bind: SocketAddr) -> Self {
        Self { publisher, bind }
    }

    /// Bind the listener and serve on a background task.
    ///
    /// The port is open once this returns, before any probe has run.
    pub async fn start(self) -> crate::Result<RunningStatusServer> {
        let listener = tokio::net::TcpListener::bind(self.bind).await?;
        let local_addr = listener.local_addr()?;
        info!("Starting status server on {}", local_addr);

        let app = status_router(self.publisher);
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "Status server stopped");
            }
        });
        Ok(RunningStatusServer { local_addr, task })
    }
}

/// Handle to a status server serving in the background
pub struct RunningStatusServer {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl RunningStatusServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown(self) {
        self.task.abort();
    }
}

/// GET /api/status
async fn status_handler(State(publisher): State<StatusPublisher>) -> impl IntoResponse {
    Json(publisher.latest().to_json())
}

/// Liveness of the watchdog process itself
async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProbeResult;

    fn snapshot() -> HealthSnapshot {
        HealthSnapshot::assemble(
            Utc::now(),
            &ProbeKind::ALL,
            vec![
                ProbeResult::pass(ProbeKind::Service, json!({ "unit_active": true, "http_ok": true })),
                ProbeResult::pass(ProbeKind::App, json!({})),
                ProbeResult::pass(ProbeKind::Network, json!({})),
                ProbeResult::fail(ProbeKind::Camera, json!({ "frame_age": 5.0 })),
                ProbeResult::pass(ProbeKind::Bluetooth, json!({ "connected": true })),
                ProbeResult::pass(
                    ProbeKind::Resources,
                    json!({ "cpu_percent": 12.5, "memory_percent": 40.0, "disk_percent": 83.0,
                            "warnings": ["disk usage high: 83.0%"] }),
                ),
            ],
        )
    }

    #[test]
    fn test_report_before_first_cycle() {
        let publisher = StatusPublisher::new("homepi.service", 30, 3);
        let doc = publisher.latest().to_json();
        assert_eq!(doc["online"], false);
        assert_eq!(doc["timestamp"], Value::Null);
        assert_eq!(doc["health_checks"]["service"], Value::Null);
        assert_eq!(doc["watchdog_status"]["cycles"], 0);
    }

    #[test]
    fn test_report_shape_after_publish() {
        let publisher = StatusPublisher::new("homepi.service", 30, 3);
        publisher.set_running(true);
        publisher.publish(snapshot(), Vec::new(), BTreeMap::new());

        let doc = publisher.latest().to_json();
        assert_eq!(doc["online"], true);
        assert_eq!(doc["service_status"]["active"], true);
        assert_eq!(doc["watchdog_status"]["running"], true);
        assert_eq!(doc["watchdog_status"]["cycles"], 1);
        assert_eq!(doc["health_checks"]["camera"], false);
        assert_eq!(doc["health_checks"]["current"]["cpu_percent"], 12.5);
        assert_eq!(doc["health_checks"]["current"]["camera_frame_age"], 5.0);
        assert_eq!(doc["health_checks"]["current"]["bluetooth_connected"], true);
        assert_eq!(
            doc["health_checks"]["current"]["warnings"],
            json!(["resources: disk usage high: 83.0%"])
        );
    }
}
