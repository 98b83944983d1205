use super::Probe;
use crate::domain::{ProbeKind, ProbeResult};
use crate::error::Result;
use crate::system::BluetoothControl;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// The expected audio sink is present and not suspended
pub struct BluetoothProbe {
    bluetooth: Arc<dyn BluetoothControl>,
    sink_match: String,
}

impl BluetoothProbe {
    pub fn new(bluetooth: Arc<dyn BluetoothControl>, sink_match: impl Into<String>) -> Self {
        Self {
            bluetooth,
            sink_match: sink_match.into(),
        }
    }
}

#[async_trait]
impl Probe for BluetoothProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Bluetooth
    }

    async fn check(&self) -> Result<ProbeResult> {
        let sinks = self.bluetooth.sinks().await?;
        let Some(sink) = sinks.iter().find(|s| s.name.contains(&self.sink_match)) else {
            return Ok(ProbeResult::fail(
                ProbeKind::Bluetooth,
                json!({
                    "connected": false,
                    "reason": format!("no sink matching '{}'", self.sink_match),
                    "sinks": sinks.len(),
                }),
            ));
        };

        let detail = json!({
            "connected": !sink.is_suspended(),
            "sink": sink.name,
            "state": sink.state,
        });
        Ok(if sink.is_suspended() {
            ProbeResult::fail(ProbeKind::Bluetooth, detail)
        } else {
            ProbeResult::pass(ProbeKind::Bluetooth, detail)
        })
    }
}
