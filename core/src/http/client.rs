use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use url::Url;

use super::{DeviceResponse, DeviceTransport, TransportError};

/// reqwest-backed transport for one embedded device.
///
/// POC bodies go out as form posts to the configuration endpoint; the
/// liveness probe is a GET against a benign path that the device serves even
/// with an empty configuration.
pub struct HttpTransport {
    inner: Client,
    endpoint: Url,
    probe_url: Url,
    probe_timeout: Duration,
}

impl HttpTransport {
    pub fn new(endpoint: Url, probe_path: &str, probe_timeout_secs: u64) -> Self {
        let inner = ClientBuilder::new()
            .danger_accept_invalid_certs(true)
            .build()
            .expect("failed to build reqwest client");

        let probe_url = endpoint
            .join(probe_path)
            .unwrap_or_else(|_| endpoint.clone());

        Self {
            inner,
            endpoint,
            probe_url,
            probe_timeout: Duration::from_secs(probe_timeout_secs),
        }
    }

    fn classify(e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Aborted(e.to_string())
        }
    }
}

#[async_trait]
impl DeviceTransport for HttpTransport {
    async fn send(&self, body: &str, timeout: Duration) -> Result<DeviceResponse, TransportError> {
        let response = self
            .inner
            .post(self.endpoint.as_str())
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body.to_string())
            .timeout(timeout)
            .send()
            .await
            .map_err(Self::classify)?;

        let status = response.status().as_u16();
        // Garbled bytes from a corrupted heap are still a signal; replace
        // rather than fail on invalid UTF-8.
        let bytes = response.bytes().await.map_err(Self::classify)?;
        let body = String::from_utf8_lossy(&bytes).into_owned();
        Ok(DeviceResponse { status, body })
    }

    async fn probe(&self) -> bool {
        self.inner
            .get(self.probe_url.as_str())
            .timeout(self.probe_timeout)
            .send()
            .await
            .is_ok()
    }

    async fn fetch(&self, path: &str) -> Option<DeviceResponse> {
        let url = self.endpoint.join(path).ok()?;
        let response = self
            .inner
            .get(url.as_str())
            .timeout(self.probe_timeout)
            .send()
            .await
            .ok()?;
        let status = response.status().as_u16();
        let body = response.text().await.ok()?;
        Some(DeviceResponse { status, body })
    }
}
