use super::Probe;
use crate::config::CameraConfig;
use crate::domain::{ProbeKind, ProbeResult};
use crate::error::{Result, WatchdogError};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Map, Value};
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::debug;

/// Address the host uses for outbound traffic.
///
/// Connecting a UDP socket sends nothing; it only asks the kernel for a route.
pub async fn external_address() -> Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect("8.8.8.8:80").await?;
    let ip = socket.local_addr()?.ip();
    if ip.is_loopback() || ip.is_unspecified() {
        return Err(WatchdogError::probe("camera", format!("no external address (got {ip})")));
    }
    Ok(ip)
}

struct EndpointReply {
    ok: bool,
    frame_age: Option<f64>,
    detail: Value,
}

/// Queries the stream the way an external viewer would, on the host's
/// externally visible address rather than loopback
pub struct CameraReachabilityProbe {
    client: reqwest::Client,
    host: Option<String>,
    port: u16,
    endpoints: Vec<String>,
    status_endpoint: String,
    max_frame_age: f64,
}

impl CameraReachabilityProbe {
    pub fn new(config: &CameraConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.test_timeout))
            .build()?;

        let mut endpoints = config.test_endpoints.clone();
        if !endpoints.contains(&config.status_endpoint) {
            endpoints.insert(0, config.status_endpoint.clone());
        }

        Ok(Self {
            client,
            host: config.host.clone(),
            port: config.port,
            endpoints,
            status_endpoint: config.status_endpoint.clone(),
            max_frame_age: config.max_frame_age,
        })
    }

    async fn query(&self, host: &str, path: &str) -> EndpointReply {
        let url = format!("http://{host}:{}{path}", self.port);
        debug!(%url, "Querying camera endpoint");
        // Only the headers are awaited; stream bodies never end
        match self.client.get(&url).send().await {
            Ok(resp) => {
                let status = resp.status();
                let mut frame_age = None;
                if status.is_success() && path == self.status_endpoint {
                    frame_age = resp
                        .json::<Value>()
                        .await
                        .ok()
                        .and_then(|body| body.get("frame_age").and_then(Value::as_f64));
                }
                EndpointReply {
                    ok: status.is_success(),
                    frame_age,
                    detail: json!({ "ok": status.is_success(), "status": status.as_u16() }),
                }
            }
            Err(e) => EndpointReply {
                ok: false,
                frame_age: None,
                detail: json!({ "ok": false, "error": e.to_string() }),
            },
        }
    }

    async fn host(&self) -> Result<String> {
        match &self.host {
            Some(host) => Ok(host.clone()),
            None => Ok(external_address().await?.to_string()),
        }
    }
}

#[async_trait]
impl Probe for CameraReachabilityProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Camera
    }

    async fn check(&self) -> Result<ProbeResult> {
        let host = self.host().await?;

        // Endpoints are queried together so each gets the full test timeout
        let queried = join_all(self.endpoints.iter().map(|path| self.query(&host, path))).await;

        let mut endpoints = Map::new();
        let mut failed = Vec::new();
        let mut frame_age: Option<f64> = None;
        for (path, reply) in self.endpoints.iter().zip(queried) {
            if !reply.ok {
                failed.push(path.clone());
            }
            if reply.frame_age.is_some() {
                frame_age = reply.frame_age;
            }
            endpoints.insert(path.clone(), reply.detail);
        }

        let stale = match frame_age {
            Some(age) => age > self.max_frame_age,
            None => true,
        };
        let detail = json!({
            "address": format!("{host}:{}", self.port),
            "endpoints": endpoints,
            "failed_endpoints": failed,
            "frame_age": frame_age,
            "max_frame_age": self.max_frame_age,
            "stale": stale,
        });

        Ok(if failed.is_empty() && !stale {
            ProbeResult::pass(ProbeKind::Camera, detail)
        } else {
            ProbeResult::fail(ProbeKind::Camera, detail)
        })
    }
}
