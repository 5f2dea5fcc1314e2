//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::socket::DEFAULT_URL;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket endpoint to dial.
    pub endpoint: String,
    /// Reconnect automatically after an unexpected remote disconnect.
    pub enable_auto_reconnect: bool,
    /// Default timeout for [`send_iq`](crate::Client::send_iq).
    pub request_timeout: Duration,
    /// Interval between keepalive pings.
    pub keep_alive_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_URL.to_string(),
            enable_auto_reconnect: true,
            request_timeout: Duration::from_secs(75),
            keep_alive_interval: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}
