//! Client for the remote AI grading gateway.
//!
//! The gateway exposes a single `POST <base>/grade` endpoint. Callers name an
//! operation (`grade_text`, `semantic_similarity`, ...), pick a quality tier,
//! and pass an operation-specific payload. The client is stateless: every call
//! builds its request from the configuration and forgets it afterwards.
//!
//! # Configuration
//!
//! Gateway settings can be configured via:
//! - CLI arguments: `--gateway-key`, `--gateway-timeout`
//! - Environment variables: `RUBRIC_GRADER_GATEWAY_KEY`, `RUBRIC_GRADER_GATEWAY_TIMEOUT_SECS`
//!
//! CLI arguments take precedence over environment variables.

mod http;

pub use http::HttpTransport;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::text::{extract_json_object, is_empty_value, value_as_text};

/// Fixed gateway endpoint.
pub const DEFAULT_GATEWAY_URL: &str = "https://ai.human-logic.com/ai";

/// Identifier sent with every request so the gateway can attribute usage.
pub const PLUGIN_ID: &str = "local_hlai_grading";

const DEFAULT_PROVIDER: &str = "gateway";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Cost/latency/accuracy tier forwarded opaquely to the gateway.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Fast,
    #[default]
    Balanced,
    Best,
}

impl std::fmt::Display for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Balanced => write!(f, "balanced"),
            Self::Best => write!(f, "best"),
        }
    }
}

impl std::str::FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "balanced" => Ok(Self::Balanced),
            "best" => Ok(Self::Best),
            _ => Err(format!(
                "Unknown quality tier: '{}'. Valid options: fast, balanced, best",
                s
            )),
        }
    }
}

/// Configuration for the gateway client.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bearer key. Blank or missing means the client is not ready.
    pub api_key: Option<String>,
    /// Base URL; `/grade` is appended.
    pub base_url: String,
    /// Plugin identifier placed in the request body.
    pub plugin: String,
    /// Request timeout applied by the HTTP transport.
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_GATEWAY_URL.to_string(),
            plugin: PLUGIN_ID.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl GatewayConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create config from environment variables.
    ///
    /// Reads:
    /// - `RUBRIC_GRADER_GATEWAY_KEY` - bearer key for the gateway
    /// - `RUBRIC_GRADER_GATEWAY_TIMEOUT_SECS` - request timeout in seconds
    pub fn from_env() -> Self {
        let api_key = env::var("RUBRIC_GRADER_GATEWAY_KEY").ok();
        let timeout = env::var("RUBRIC_GRADER_GATEWAY_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));

        Self {
            api_key,
            timeout,
            ..Self::default()
        }
    }

    /// Set the bearer key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Point the client at a different base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Merge with CLI overrides. CLI values take precedence.
    pub fn with_overrides(mut self, api_key: Option<String>, timeout_secs: Option<u64>) -> Self {
        if let Some(key) = api_key {
            self.api_key = Some(key);
        }
        if let Some(secs) = timeout_secs {
            self.timeout = Duration::from_secs(secs);
        }
        self
    }

    /// The trimmed key, if one is configured.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    /// Whether a key is configured.
    pub fn is_ready(&self) -> bool {
        self.api_key().is_some()
    }

    /// Full URL of the grading endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}/grade", self.base_url.trim_end_matches('/'))
    }

    /// Create an HTTP-backed gateway client from this configuration.
    pub fn create_client(&self) -> Result<Arc<dyn GradingGateway>, GatewayError> {
        let transport = HttpTransport::new(self.timeout)?;
        Ok(Arc::new(GatewayClient::with_transport(self.clone(), transport)))
    }
}

/// Raw request transport. Returns the response body as text.
pub trait Transport: Send + Sync {
    fn post_json(&self, url: &str, bearer: &str, body: &Value) -> Result<String, GatewayError>;
}

/// Anything that can run a gateway operation.
pub trait GradingGateway: Send + Sync {
    /// Whether a credential is configured.
    fn is_ready(&self) -> bool;

    /// Run `operation` with `payload` at the given quality tier.
    fn grade(
        &self,
        operation: &str,
        payload: Value,
        quality: Quality,
    ) -> Result<GatewayResponse, GatewayError>;
}

/// Decoded gateway reply.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    /// Provider that served the call, `"gateway"` when unreported.
    pub provider: String,
    /// The `content` (or `result`, or whole body) exactly as returned.
    pub content: Value,
    /// `content` normalized into a JSON object, whether it arrived as an
    /// object or as a (possibly fenced) JSON string.
    pub document: Option<Map<String, Value>>,
}

impl GatewayResponse {
    /// Decode a raw response body.
    pub fn from_body(body: &str) -> Result<Self, GatewayError> {
        let decoded = match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(map)) => map,
            _ => {
                return Err(GatewayError::InvalidResponse(
                    "Gateway response was not valid JSON".to_string(),
                ))
            }
        };

        if let Some(error) = decoded.get("error").filter(|v| !is_empty_value(v)) {
            let detail = value_as_text(error).unwrap_or_else(|| error.to_string());
            return Err(GatewayError::InvalidResponse(format!(
                "Gateway rejected request: {}",
                detail
            )));
        }

        let provider = decoded
            .get("provider")
            .and_then(value_as_text)
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string());

        let content = ["content", "result"]
            .iter()
            .find_map(|key| decoded.get(*key).filter(|v| !v.is_null()).cloned())
            .unwrap_or_else(|| Value::Object(decoded.clone()));

        Ok(Self {
            provider,
            document: decode_document(&content),
            content,
        })
    }
}

/// Normalize gateway content into a JSON object.
pub fn decode_document(content: &Value) -> Option<Map<String, Value>> {
    match content {
        Value::Object(map) => Some(map.clone()),
        Value::String(text) => extract_json_object(text),
        _ => None,
    }
}

/// Gateway client over a pluggable transport.
pub struct GatewayClient<T: Transport = HttpTransport> {
    config: GatewayConfig,
    transport: T,
}

impl GatewayClient<HttpTransport> {
    /// Build a client that talks HTTP.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let transport = HttpTransport::new(config.timeout)?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: Transport> GatewayClient<T> {
    pub fn with_transport(config: GatewayConfig, transport: T) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

impl<T: Transport> GradingGateway for GatewayClient<T> {
    fn is_ready(&self) -> bool {
        self.config.is_ready()
    }

    fn grade(
        &self,
        operation: &str,
        payload: Value,
        quality: Quality,
    ) -> Result<GatewayResponse, GatewayError> {
        let Some(key) = self.config.api_key() else {
            return Err(GatewayError::NotReady);
        };

        let request = json!({
            "operation": operation,
            "quality": quality.to_string(),
            "payload": payload,
            "plugin": self.config.plugin,
        });

        debug!("Gateway call: operation={} quality={}", operation, quality);
        let body = self
            .transport
            .post_json(&self.config.endpoint(), key, &request)
            .map_err(|e| {
                warn!("Gateway request for '{}' failed: {}", operation, e);
                e
            })?;

        GatewayResponse::from_body(&body)
    }
}

/// Errors from gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("AI gateway is not configured (no gateway key)")]
    NotReady,

    #[error("Gateway request failed: {0}")]
    Transport(String),

    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Whether retrying the same request later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
