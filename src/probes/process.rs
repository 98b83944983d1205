use super::Probe;
use crate::domain::{ProbeKind, ProbeResult};
use crate::error::Result;
use crate::system::ServiceManager;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// GET against the supervised service's health endpoint
#[derive(Clone)]
pub struct HttpHealthCheck {
    client: reqwest::Client,
    url: String,
}

/// What one health GET observed
#[derive(Debug, Clone)]
pub struct HttpObservation {
    pub ok: bool,
    pub status: Option<u16>,
    pub response_ms: u64,
    pub error: Option<String>,
}

impl HttpHealthCheck {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn observe(&self) -> HttpObservation {
        let started = Instant::now();
        let response = self.client.get(&self.url).send().await;
        let response_ms = started.elapsed().as_millis() as u64;
        match response {
            Ok(resp) => HttpObservation {
                ok: resp.status().is_success(),
                status: Some(resp.status().as_u16()),
                response_ms,
                error: None,
            },
            Err(e) => HttpObservation {
                ok: false,
                status: None,
                response_ms,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Unit active in the init system and health endpoint answering
pub struct ProcessProbe {
    services: Arc<dyn ServiceManager>,
    unit: String,
    http: HttpHealthCheck,
}

impl ProcessProbe {
    pub fn new(services: Arc<dyn ServiceManager>, unit: impl Into<String>, http: HttpHealthCheck) -> Self {
        Self {
            services,
            unit: unit.into(),
            http,
        }
    }
}

#[async_trait]
impl Probe for ProcessProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Service
    }

    async fn check(&self) -> Result<ProbeResult> {
        let (unit_state, http) = tokio::join!(self.services.is_active(&self.unit), self.http.observe());

        let mut failed_checks = Vec::new();
        let (unit_active, unit_error) = match unit_state {
            Ok(active) => (active, None),
            Err(e) => (false, Some(e.to_string())),
        };
        if !unit_active {
            failed_checks.push("unit_active");
        }
        if !http.ok {
            failed_checks.push("http");
        }

        let detail = json!({
            "unit": self.unit,
            "unit_active": unit_active,
            "unit_error": unit_error,
            "url": self.http.url(),
            "http_ok": http.ok,
            "http_status": http.status,
            "http_error": http.error,
            "response_ms": http.response_ms,
            "failed_checks": failed_checks,
        });

        Ok(if failed_checks.is_empty() {
            ProbeResult::pass(ProbeKind::Service, detail)
        } else {
            ProbeResult::fail(ProbeKind::Service, detail)
        })
    }
}

/// HTTP responsiveness of the application, without the unit check
pub struct AppProbe {
    http: HttpHealthCheck,
}

impl AppProbe {
    pub fn new(http: HttpHealthCheck) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Probe for AppProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::App
    }

    async fn check(&self) -> Result<ProbeResult> {
        let http = self.http.observe().await;
        let detail = json!({
            "url": self.http.url(),
            "status": http.status,
            "response_ms": http.response_ms,
            "error": http.error,
        });
        Ok(if http.ok {
            ProbeResult::pass(ProbeKind::App, detail)
        } else {
            ProbeResult::fail(ProbeKind::App, detail)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WatchdogError;
    use axum::{http::StatusCode, routing::get, Router};

    struct Unit(Option<bool>);

    #[async_trait]
    impl ServiceManager for Unit {
        async fn is_active(&self, _unit: &str) -> Result<bool> {
            self.0
                .ok_or_else(|| WatchdogError::probe("service", "systemctl unavailable"))
        }
        async fn restart(&self, _unit: &str) -> Result<()> {
            Ok(())
        }
    }

    async fn serve(status: StatusCode) -> String {
        let app = Router::new().route("/api/health", get(move || async move { status }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/api/health")
    }

    #[tokio::test]
    async fn test_process_probe_passes_when_both_checks_pass() {
        let url = serve(StatusCode::OK).await;
        let http = HttpHealthCheck::new(url, Duration::from_secs(5)).unwrap();
        let probe = ProcessProbe::new(Arc::new(Unit(Some(true))), "homepi.service", http);

        let result = probe.check().await.unwrap();
        assert!(result.passed);
        assert_eq!(result.detail["failed_checks"], json!([]));
    }

    #[tokio::test]
    async fn test_process_probe_reports_failed_sub_checks() {
        let url = serve(StatusCode::INTERNAL_SERVER_ERROR).await;
        let http = HttpHealthCheck::new(url, Duration::from_secs(5)).unwrap();
        let probe = ProcessProbe::new(Arc::new(Unit(Some(false))), "homepi.service", http);

        let result = probe.check().await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.detail["failed_checks"], json!(["unit_active", "http"]));
        assert_eq!(result.detail["http_status"], 500);
    }

    #[tokio::test]
    async fn test_process_probe_treats_unit_error_as_inactive() {
        let url = serve(StatusCode::OK).await;
        let http = HttpHealthCheck::new(url, Duration::from_secs(5)).unwrap();
        let probe = ProcessProbe::new(Arc::new(Unit(None)), "homepi.service", http);

        let result = probe.check().await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.detail["failed_checks"], json!(["unit_active"]));
        assert!(result.detail["unit_error"].as_str().unwrap().contains("systemctl unavailable"));
    }

    #[tokio::test]
    async fn test_app_probe_fails_on_refused_connection() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let http = HttpHealthCheck::new(format!("http://{addr}/"), Duration::from_secs(2)).unwrap();
        let result = AppProbe::new(http).check().await.unwrap();
        assert!(!result.passed);
        assert!(result.detail["error"].is_string());
    }
}
