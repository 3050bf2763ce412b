//! Action handlers that delegate to HTTP endpoints.
//!
//! Each endpoint receives `POST {"type": ..., "actions": {...}}` and answers
//! with the handler outcome `{"success": bool, "results"?: {...}, "error"?: "..."}`.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "config")]
use clap::Args;
use conveyor_runtime::definition::StepType;
use conveyor_runtime::dispatch::{
    ActionConfig, ActionError, ActionHandler, ActionOutcome, ActionOutput, ActionRegistry,
};
use reqwest::Client;
use serde::Serialize;
use url::Url;

use crate::{Error, Result, TRACING_TARGET_HTTP};

/// Default timeout for HTTP action calls: 30 seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// A step type bound to the URL of its handler, written `type=url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionEndpoint {
    /// Step type served by the endpoint.
    pub step_type: StepType,
    /// Handler URL.
    pub url: Url,
}

impl FromStr for ActionEndpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (step_type, url) = s
            .split_once('=')
            .ok_or_else(|| Error::config(format!("expected 'type=url', got '{s}'")))?;
        let step_type = step_type.trim();
        if step_type.is_empty() {
            return Err(Error::config(format!("missing step type in '{s}'")));
        }

        let url = Url::parse(url.trim())
            .map_err(|e| Error::config(format!("invalid endpoint url '{url}'")).with_source(e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "endpoint url '{url}' must use http or https"
            )));
        }

        Ok(Self {
            step_type: StepType::from(step_type),
            url,
        })
    }
}

/// HTTP action handler configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Args))]
pub struct HttpConfig {
    /// HTTP action call timeout in seconds
    #[cfg_attr(
        feature = "config",
        arg(long = "http-timeout", env = "CONVEYOR_HTTP_TIMEOUT", default_value_t = DEFAULT_HTTP_TIMEOUT_SECS)
    )]
    pub http_timeout: u64,

    /// Action handler endpoints as `type=url`, repeatable or comma-separated
    #[cfg_attr(
        feature = "config",
        arg(long = "action-endpoint", env = "CONVEYOR_ACTION_ENDPOINTS", value_delimiter = ',')
    )]
    pub action_endpoints: Vec<ActionEndpoint>,
}

impl HttpConfig {
    /// Returns the effective timeout, using the default if zero.
    pub fn timeout(&self) -> Duration {
        match self.http_timeout {
            0 => Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            secs => Duration::from_secs(secs),
        }
    }

    /// Adds an endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: ActionEndpoint) -> Self {
        self.action_endpoints.push(endpoint);
        self
    }

    /// Sets the timeout in seconds.
    #[must_use]
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.http_timeout = timeout_secs;
        self
    }

    /// Registers one [`HttpActionHandler`] per endpoint, sharing a client.
    pub fn register(&self, registry: &mut ActionRegistry) -> Result<()> {
        if self.action_endpoints.is_empty() {
            return Ok(());
        }

        let http = Client::builder()
            .timeout(self.timeout())
            .user_agent(format!("conveyor/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::config("failed to create HTTP client").with_source(e))?;

        for endpoint in &self.action_endpoints {
            tracing::info!(
                target: TRACING_TARGET_HTTP,
                step_type = %endpoint.step_type,
                url = %endpoint.url,
                "Registering HTTP action handler"
            );
            let handler = HttpActionHandler::new(http.clone(), endpoint.clone(), self.timeout());
            registry.register(endpoint.step_type.clone(), handler);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct HttpActionHandlerInner {
    http: Client,
    endpoint: ActionEndpoint,
    timeout: Duration,
}

/// Executes a step by calling a remote handler.
#[derive(Debug, Clone)]
pub struct HttpActionHandler {
    inner: Arc<HttpActionHandlerInner>,
}

#[derive(Serialize)]
struct ActionRequest<'a> {
    #[serde(rename = "type")]
    step_type: &'a StepType,
    actions: &'a ActionConfig,
}

impl HttpActionHandler {
    /// Creates a handler for one endpoint.
    pub fn new(http: Client, endpoint: ActionEndpoint, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(HttpActionHandlerInner {
                http,
                endpoint,
                timeout,
            }),
        }
    }

    /// Returns the endpoint.
    #[inline]
    pub fn endpoint(&self) -> &ActionEndpoint {
        &self.inner.endpoint
    }
}

#[async_trait::async_trait]
impl ActionHandler for HttpActionHandler {
    async fn execute(&self, config: &ActionConfig) -> Result<ActionOutput, ActionError> {
        let endpoint = &self.inner.endpoint;
        let request = ActionRequest {
            step_type: &endpoint.step_type,
            actions: config,
        };

        tracing::debug!(
            target: TRACING_TARGET_HTTP,
            step_type = %endpoint.step_type,
            url = %endpoint.url,
            "Calling action endpoint"
        );

        let response = self
            .inner
            .http
            .post(endpoint.url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| ActionError::new(format!("request to {} failed: {e}", endpoint.url)))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                target: TRACING_TARGET_HTTP,
                step_type = %endpoint.step_type,
                status_code = status.as_u16(),
                "Action endpoint returned non-success status"
            );
            return Err(ActionError::new(format!(
                "action endpoint returned status {}",
                status.as_u16()
            )));
        }

        let outcome: ActionOutcome = response
            .json()
            .await
            .map_err(|e| ActionError::new(format!("invalid action response: {e}")))?;
        outcome.into_result()
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.inner.timeout)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_endpoint() {
        let endpoint: ActionEndpoint = "slack-alert=https://hooks.internal/slack".parse().unwrap();
        assert_eq!(endpoint.step_type, StepType::SlackAlert);
        assert_eq!(endpoint.url.host_str(), Some("hooks.internal"));

        let custom: ActionEndpoint = "crm-sync=http://localhost:8080/run".parse().unwrap();
        assert_eq!(custom.step_type, StepType::Custom("crm-sync".into()));
    }

    #[test]
    fn test_parse_endpoint_rejects_garbage() {
        assert!("slack-alert".parse::<ActionEndpoint>().is_err());
        assert!("=https://hooks.internal".parse::<ActionEndpoint>().is_err());
        assert!("enrich=ftp://files.internal".parse::<ActionEndpoint>().is_err());
        assert!("enrich=not a url".parse::<ActionEndpoint>().is_err());
    }

    #[test]
    fn test_request_body_shape() {
        let actions = json!({ "channel": "#sales" }).as_object().cloned().unwrap();
        let request = ActionRequest {
            step_type: &StepType::SlackAlert,
            actions: &actions,
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body, json!({ "type": "slack-alert", "actions": { "channel": "#sales" } }));
    }

    #[test]
    fn test_register_endpoints() {
        let config = HttpConfig::default()
            .with_timeout(5)
            .with_endpoint("enrich=http://127.0.0.1:9/enrich".parse().unwrap());

        let mut registry = ActionRegistry::with_builtins();
        config.register(&mut registry).unwrap();

        assert!(registry.contains(&StepType::Enrich));
        let handler = registry.get(&StepType::Enrich).unwrap();
        assert_eq!(handler.timeout(), Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_handler_failure() {
        let endpoint: ActionEndpoint = "enrich=http://127.0.0.1:9/enrich".parse().unwrap();
        let handler = HttpActionHandler::new(Client::new(), endpoint, Duration::from_secs(2));

        let err = handler.execute(&ActionConfig::new()).await.unwrap_err();
        assert!(err.message().contains("127.0.0.1:9"));
    }

    #[test]
    fn test_zero_timeout_uses_default() {
        let config = HttpConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS));
    }
}
