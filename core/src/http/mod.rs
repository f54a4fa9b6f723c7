pub mod client;

pub use client::HttpTransport;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Response from one device request.
#[derive(Debug, Clone)]
pub struct DeviceResponse {
    pub status: u16,
    pub body: String,
}

/// Transport-level failure classes.
///
/// Only `Connect` is transient (connection refused/reset before a response)
/// and gets retried by the scheduler; `Timeout` and `Aborted` are outcomes
/// in their own right and feed straight into verification.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    /// Connection died mid-exchange, e.g. reset while reading the response.
    #[error("connection aborted: {0}")]
    Aborted(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Connect(_))
    }
}

/// Abstract request/response channel to one target device.
///
/// The execution scheduler owns the transport exclusively for the duration
/// of a target's run; nothing else talks to the device.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Sends one serialized packet body, bounded by `timeout`.
    async fn send(&self, body: &str, timeout: Duration) -> Result<DeviceResponse, TransportError>;

    /// Benign known-good request; true when the device answered at all.
    async fn probe(&self) -> bool;

    /// Fetches an arbitrary relative path, used to pull back marker
    /// artifacts a command-injection probe dropped into the webroot.
    async fn fetch(&self, path: &str) -> Option<DeviceResponse>;
}
