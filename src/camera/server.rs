use super::{CameraFreshnessGuard, RefreshReport, RefreshRequest};
use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// GET /api/camera/status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraStatus {
    pub enabled: bool,
    pub frame_age: Option<f64>,
    pub stale: bool,
    pub last_frame_timestamp: Option<DateTime<Utc>>,
    pub last_refresh: Option<DateTime<Utc>>,
    pub refresh_count: u64,
    pub cooldown_remaining: f64,
    pub last_error: Option<String>,
}

/// Router exposing the guard to the watchdog
pub fn camera_router(guard: Arc<CameraFreshnessGuard>) -> Router {
    Router::new()
        .route("/api/camera/status", get(camera_status))
        .route("/api/camera/refresh", post(camera_refresh))
        .with_state(guard)
}

/// Wrap stream routes so every request first runs the staleness check
pub fn gate_stream(router: Router, guard: Arc<CameraFreshnessGuard>) -> Router {
    router.route_layer(middleware::from_fn_with_state(guard, freshness_gate))
}

/// GET /api/camera/status
async fn camera_status(State(guard): State<Arc<CameraFreshnessGuard>>) -> Json<CameraStatus> {
    let state = guard.state();
    Json(CameraStatus {
        enabled: true,
        frame_age: guard.frame_age_secs(),
        stale: guard.is_stale(),
        last_frame_timestamp: state.last_frame_timestamp,
        last_refresh: state.last_refresh,
        refresh_count: state.refresh_count,
        cooldown_remaining: guard.cooldown_remaining().as_secs_f64(),
        last_error: state.last_error,
    })
}

/// POST /api/camera/refresh
async fn camera_refresh(
    State(guard): State<Arc<CameraFreshnessGuard>>,
    body: Option<Json<RefreshRequest>>,
) -> Json<RefreshReport> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    Json(guard.refresh(request).await)
}

/// Inline staleness check ahead of a stream request
pub async fn freshness_gate(
    State(guard): State<Arc<CameraFreshnessGuard>>,
    request: Request,
    next: Next,
) -> Response {
    let report = guard.check().await;
    if report.performed {
        debug!(path = %request.uri().path(), "Stream request triggered camera refresh");
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CapturePipeline, FreshnessConfig, SkipReason};
    use crate::clock::ManualClock;
    use crate::error::Result;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tower::ServiceExt;

    #[derive(Default)]
    struct Pipeline(AtomicU32);

    #[async_trait]
    impl CapturePipeline for Pipeline {
        async fn reinitialize(&self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn setup() -> (Arc<CameraFreshnessGuard>, ManualClock, Arc<Pipeline>) {
        let clock = ManualClock::starting_now();
        let pipeline = Arc::new(Pipeline::default());
        let guard = Arc::new(CameraFreshnessGuard::new(
            FreshnessConfig::default(),
            Arc::new(clock.clone()),
            pipeline.clone(),
        ));
        (guard, clock, pipeline)
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn refresh_request(body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/api/camera/refresh")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_status_reports_frame_age() {
        let (guard, clock, _) = setup();
        guard.record_frame();
        clock.advance_millis(250);

        let response = camera_router(guard)
            .oneshot(Request::get("/api/camera/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status: CameraStatus = body_json(response).await;
        assert_eq!(status.frame_age, Some(0.25));
        assert!(!status.stale);
        assert_eq!(status.refresh_count, 0);
    }

    #[tokio::test]
    async fn test_refresh_endpoint_honours_cooldown_and_force() {
        let (guard, _, pipeline) = setup();
        let app = camera_router(guard);

        let first: RefreshReport = body_json(app.clone().oneshot(refresh_request("{}")).await.unwrap()).await;
        assert!(first.performed);

        let second: RefreshReport =
            body_json(app.clone().oneshot(refresh_request(r#"{"reason":"again"}"#)).await.unwrap()).await;
        assert_eq!(second.skipped_reason, Some(SkipReason::Cooldown));

        let forced: RefreshReport =
            body_json(app.oneshot(refresh_request(r#"{"force":true}"#)).await.unwrap()).await;
        assert!(forced.performed);
        assert_eq!(pipeline.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stream_gate_refreshes_stale_camera() {
        let (guard, clock, pipeline) = setup();
        guard.record_frame();
        let stream = Router::new().route("/stream", get(|| async { "frames" }));
        let app = gate_stream(stream, guard.clone());

        let response = app
            .clone()
            .oneshot(Request::get("/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(pipeline.0.load(Ordering::SeqCst), 0);

        clock.advance_secs(3);
        app.oneshot(Request::get("/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(pipeline.0.load(Ordering::SeqCst), 1);
    }
}
