use crate::camera::{RefreshReport, RefreshRequest};
use crate::error::{Result, WatchdogError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Asks the supervised process to refresh its capture pipeline in place
#[async_trait]
pub trait CameraRefresher: Send + Sync {
    async fn request_refresh(&self, reason: &str) -> Result<RefreshReport>;
}

/// Calls the supervised process's refresh endpoint over HTTP
pub struct HttpCameraRefresher {
    client: reqwest::Client,
    url: String,
}

impl HttpCameraRefresher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl CameraRefresher for HttpCameraRefresher {
    async fn request_refresh(&self, reason: &str) -> Result<RefreshReport> {
        debug!(url = %self.url, reason, "Requesting in-process camera refresh");
        let response = self
            .client
            .post(&self.url)
            .json(&RefreshRequest {
                force: false,
                reason: Some(reason.to_string()),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(WatchdogError::HttpStatus {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        Ok(response.json::<RefreshReport>().await?)
    }
}
