//! HTTP upstream client.
//!
//! Translates an opaque request key into one authenticated GET against the
//! configured provider endpoint and maps the provider's failure modes into
//! the scheduler's error taxonomy:
//!
//! - `429` -> `UpstreamRateLimited` (the dispatcher requeues)
//! - other non-success -> `Upstream` with the provider-reported detail
//! - request timeout -> `Timeout`
//! - other transport failures -> `Network`
//!
//! Credentials are validated at construction; a missing token with an auth
//! scheme configured is a fatal `Configuration` error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error};
use reqwest::Client;

use super::UpstreamClient;
use crate::errors::SchedulerError;
use crate::models::Payload;

/// Placeholder replaced with the URL-encoded request key.
const KEY_PLACEHOLDER: &str = "{key}";

/// Default HTTP request timeout.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default path template when none is configured.
const DEFAULT_PATH_TEMPLATE: &str = "/v1/data/{key}";

/// How the API credential is attached to each request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <token>`.
    Bearer,
    /// Token sent verbatim in the named header.
    Header(String),
    /// No credential required.
    None,
}

/// Configuration for the HTTP upstream client.
#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    /// Provider origin, e.g. `https://api.example.com`.
    pub base_url: String,
    /// Path template appended to `base_url`; `{key}` is replaced with the
    /// URL-encoded request key.
    pub path_template: String,
    /// Credential attachment scheme.
    pub auth: AuthScheme,
    /// Credential value; must be non-empty unless `auth` is `None`.
    pub auth_token: String,
    /// Per-call timeout enforced on the HTTP client.
    pub call_timeout: Duration,
}

impl UpstreamConfig {
    /// Create a config for a bearer-authenticated provider.
    pub fn new(base_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            path_template: DEFAULT_PATH_TEMPLATE.to_string(),
            auth: AuthScheme::Bearer,
            auth_token: auth_token.into(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Load configuration from `QW_UPSTREAM_*` environment variables.
    ///
    /// `QW_UPSTREAM_BASE_URL` is required; `QW_UPSTREAM_PATH_TEMPLATE`,
    /// `QW_UPSTREAM_API_KEY`, `QW_UPSTREAM_AUTH_HEADER` (empty means
    /// bearer, `none` disables auth) and `QW_CALL_TIMEOUT_MS` are
    /// optional.
    pub fn from_env() -> Result<Self, SchedulerError> {
        let base_url = std::env::var("QW_UPSTREAM_BASE_URL").map_err(|_| {
            SchedulerError::configuration("QW_UPSTREAM_BASE_URL is not set")
        })?;
        let path_template = std::env::var("QW_UPSTREAM_PATH_TEMPLATE")
            .unwrap_or_else(|_| DEFAULT_PATH_TEMPLATE.to_string());
        let auth_token = std::env::var("QW_UPSTREAM_API_KEY").unwrap_or_default();
        let auth = match std::env::var("QW_UPSTREAM_AUTH_HEADER") {
            Ok(name) if name.eq_ignore_ascii_case("none") => AuthScheme::None,
            Ok(name) if !name.is_empty() => AuthScheme::Header(name),
            _ => AuthScheme::Bearer,
        };
        let call_timeout = std::env::var("QW_CALL_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_CALL_TIMEOUT);

        Ok(Self {
            base_url,
            path_template,
            auth,
            auth_token,
            call_timeout,
        })
    }

    fn validate(&self) -> Result<(), SchedulerError> {
        if self.base_url.is_empty() {
            return Err(SchedulerError::configuration("upstream base URL is empty"));
        }
        if reqwest::Url::parse(&self.base_url).is_err() {
            return Err(SchedulerError::configuration(format!(
                "upstream base URL is not a valid URL: {}",
                self.base_url
            )));
        }
        if !self.path_template.contains(KEY_PLACEHOLDER) {
            return Err(SchedulerError::configuration(format!(
                "path template must contain '{}': {}",
                KEY_PLACEHOLDER, self.path_template
            )));
        }
        if self.auth != AuthScheme::None && self.auth_token.is_empty() {
            return Err(SchedulerError::configuration(
                "auth token is empty but an auth scheme is configured",
            ));
        }
        Ok(())
    }
}

/// Upstream client issuing one authenticated GET per dispatched key.
pub struct HttpUpstreamClient {
    client: Client,
    config: UpstreamConfig,
}

impl HttpUpstreamClient {
    /// Build the client, validating configuration and credentials.
    ///
    /// A configuration problem is fatal: it is logged once here and the
    /// scheduler built on top of this client never starts dispatching.
    pub fn new(config: UpstreamConfig) -> Result<Self, SchedulerError> {
        if let Err(err) = config.validate() {
            error!("Upstream client rejected: {}", err);
            return Err(err);
        }
        let client = Client::builder()
            .timeout(config.call_timeout)
            .build()
            .map_err(|e| {
                SchedulerError::configuration(format!("failed to build HTTP client: {}", e))
            })?;
        Ok(Self { client, config })
    }

    fn url_for(&self, key: &str) -> String {
        let encoded = urlencoding::encode(key);
        format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.path_template.replace(KEY_PLACEHOLDER, &encoded)
        )
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn fetch(&self, key: &str) -> Result<Payload, SchedulerError> {
        let url = self.url_for(key);
        debug!("Upstream GET {}", url);

        let mut request = self.client.get(&url);
        request = match &self.config.auth {
            AuthScheme::Bearer => request.bearer_auth(&self.config.auth_token),
            AuthScheme::Header(name) => request.header(name.as_str(), &self.config.auth_token),
            AuthScheme::None => request,
        };

        // Transport errors map through From<reqwest::Error>.
        let response = request.send().await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SchedulerError::UpstreamRateLimited);
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| String::new());
            return Err(SchedulerError::Upstream {
                status: status.as_u16(),
                message: if body.is_empty() {
                    status.to_string()
                } else {
                    body
                },
            });
        }

        let value: serde_json::Value = response.json().await.map_err(|e| {
            SchedulerError::Upstream {
                status: status.as_u16(),
                message: format!("malformed provider response: {}", e),
            }
        })?;
        Ok(Arc::new(value))
    }
}
