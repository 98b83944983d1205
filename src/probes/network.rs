use super::Probe;
use crate::domain::{ProbeKind, ProbeResult};
use crate::error::Result;
use crate::system::InterfaceState;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpStream;

/// Outbound reachability plus the primary interface's link state.
///
/// Targets are `ip:port` pairs so the check never depends on DNS.
pub struct NetworkProbe {
    targets: Vec<String>,
    connect_timeout: Duration,
    interface: String,
    links: InterfaceState,
}

impl NetworkProbe {
    pub fn new(
        targets: Vec<String>,
        connect_timeout: Duration,
        interface: impl Into<String>,
        links: InterfaceState,
    ) -> Self {
        Self {
            targets,
            connect_timeout,
            interface: interface.into(),
            links,
        }
    }

    async fn reach(&self, target: &str) -> std::result::Result<(), String> {
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(target)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("connect timed out after {}s", self.connect_timeout.as_secs())),
        }
    }
}

#[async_trait]
impl Probe for NetworkProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Network
    }

    async fn check(&self) -> Result<ProbeResult> {
        let attempts = join_all(self.targets.iter().map(|t| self.reach(t))).await;
        let reachable: Vec<&str> = self
            .targets
            .iter()
            .zip(&attempts)
            .filter(|(_, r)| r.is_ok())
            .map(|(t, _)| t.as_str())
            .collect();
        let errors: serde_json::Map<String, serde_json::Value> = self
            .targets
            .iter()
            .zip(attempts)
            .filter_map(|(t, r)| r.err().map(|e| (t.clone(), json!(e))))
            .collect();

        let (operstate, interface_up) = match self.links.operstate(&self.interface).await {
            Ok(state) => {
                let up = state == "up";
                (state, up)
            }
            Err(e) => (format!("unknown ({e})"), false),
        };

        let internet = !reachable.is_empty();
        let detail = json!({
            "internet": internet,
            "reachable": reachable,
            "errors": errors,
            "interface": self.interface,
            "interface_up": interface_up,
            "operstate": operstate,
        });

        Ok(if internet && interface_up {
            ProbeResult::pass(ProbeKind::Network, detail)
        } else {
            ProbeResult::fail(ProbeKind::Network, detail)
        })
    }
}
