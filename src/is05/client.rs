use async_trait::async_trait;
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::{debug, warn};

use super::{ConnectionApi, StagedPatch};
use crate::config::Is05Config;
use crate::error::{ControlError, ControlResult, RemoteCallError};

/// reqwest-backed IS-05 client; one shared connection pool, fixed timeout, no retries
#[derive(Clone)]
pub struct HttpConnectionApi {
    client: Client,
    timeout_ms: u64,
}

impl std::fmt::Debug for HttpConnectionApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnectionApi")
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl HttpConnectionApi {
    pub fn new(config: &Is05Config) -> ControlResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .connect_timeout(Duration::from_millis(config.request_timeout_ms))
            .user_agent(format!("nmos-control/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                ControlError::ConfigurationError(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            timeout_ms: config.request_timeout_ms,
        })
    }
}

#[async_trait]
impl ConnectionApi for HttpConnectionApi {
    async fn patch_staged(&self, url: &Url, body: &StagedPatch) -> Result<u16, RemoteCallError> {
        debug!(url = %url, "PATCH staged");

        let response = self
            .client
            .patch(url.clone())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RemoteCallError::Timeout(self.timeout_ms)
                } else {
                    RemoteCallError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(status.as_u16());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        warn!(url = %url, status = %status, error = %body, "IS-05 PATCH rejected");
        Err(RemoteCallError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
