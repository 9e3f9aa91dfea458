use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::Value;
use thiserror::Error;

use crate::config::{self, ConfigError};
use crate::schemas::RequestContext;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Network request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Handler returned {status}: {body}")]
    UpstreamError { status: u16, body: String },

    #[error("Missing configuration: {0}")]
    ConfigError(#[from] ConfigError),
}

/// Seam between the tool loop and the gateway it calls back into.
///
/// The production implementation goes over HTTP with the shared scheduler
/// secret; tests substitute an in-process implementation so the
/// executor-gateway cycle stays a plain trait call.
#[async_trait]
pub trait InternalDispatcher: Send + Sync {
    /// Execute an authorized action and return the handler's JSON body.
    async fn dispatch(
        &self,
        ctx: &RequestContext,
        action: &str,
        params: Value,
    ) -> Result<Value, DispatchError>;
}

/// HTTP dispatcher: `POST <base>/functions/v1/<handler>` with the shared
/// secret and correlation headers.
pub struct HttpDispatcher {
    client: reqwest::Client,
    handler: String,
    base_url: Option<String>,
    scheduler_secret: Option<String>,
}

impl Default for HttpDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpDispatcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            handler: "api-gateway".to_string(),
            base_url: None,
            scheduler_secret: None,
        }
    }

    pub fn with_handler<S: Into<String>>(mut self, handler: S) -> Self {
        self.handler = handler.into();
        self
    }

    /// Override the base URL; configuration is consulted otherwise.
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_scheduler_secret<S: Into<String>>(mut self, secret: S) -> Self {
        self.scheduler_secret = Some(secret.into());
        self
    }
}

#[async_trait]
impl InternalDispatcher for HttpDispatcher {
    async fn dispatch(
        &self,
        ctx: &RequestContext,
        action: &str,
        params: Value,
    ) -> Result<Value, DispatchError> {
        let base = match &self.base_url {
            Some(base) => base.clone(),
            None => config::functions_base_url()?,
        };
        let secret = match &self.scheduler_secret {
            Some(secret) => secret.clone(),
            None => config::scheduler_secret()?.expose_secret().to_string(),
        };

        let response = self
            .client
            .post(format!("{base}/functions/v1/{}", self.handler))
            .header("x-scheduler-secret", secret)
            .header("x-correlation-id", &ctx.correlation_id)
            .json(&serde_json::json!({
                "action": action,
                "params": params,
                "correlation_id": &ctx.correlation_id,
            }))
            .timeout(ctx.deadline.remaining())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::UpstreamError {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<Value>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn posts_action_with_shared_secret() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/functions/v1/api-gateway")
            .match_header("x-scheduler-secret", "sched-secret")
            .match_header("x-correlation-id", "corr-1")
            .with_status(200)
            .with_body(r#"{"rows":[{"id":"c1"}]}"#)
            .create_async()
            .await;

        let dispatcher = HttpDispatcher::new()
            .with_base_url(server.url())
            .with_scheduler_secret("sched-secret");
        let ctx = RequestContext::new("corr-1");
        let body = dispatcher
            .dispatch(&ctx, "crm.search", serde_json::json!({"q": "Ada"}))
            .await
            .unwrap();

        assert_eq!(body["rows"][0]["id"], "c1");
        mock.assert_async().await;
    }
}
