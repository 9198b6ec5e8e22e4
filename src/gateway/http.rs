//! Blocking HTTP transport for the gateway.

use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use serde_json::Value;

use super::{GatewayError, Transport};

/// `reqwest`-backed transport. The HTTP status is logged but not interpreted:
/// error replies are judged by their JSON body like any other.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport(format!("could not build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn post_json(&self, url: &str, bearer: &str, body: &Value) -> Result<String, GatewayError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(bearer)
            .header(ACCEPT, "application/json")
            .json(body)
            .send()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        debug!("Gateway responded with HTTP {}", response.status());

        response
            .text()
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }
}
