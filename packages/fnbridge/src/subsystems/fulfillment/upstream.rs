use std::{sync::Arc, time::Duration};

use fnbridge_types::{FulfilledRequest, FunctionRequest};
use reqwest::{header, RequestBuilder};
use tracing::instrument;

use crate::config::{BasicAuthCredentials, Config};

use super::error::FulfillmentError;

/// Carries the request id to the function runtime.
pub const REQUEST_ID_HEADER: &str = "requestId";

/// Adds credentials to every outbound function call.
pub trait AuthInjector: Send + Sync {
    fn inject(&self, builder: RequestBuilder) -> RequestBuilder;
}

pub struct BasicAuthInjector {
    credentials: BasicAuthCredentials,
}

impl BasicAuthInjector {
    pub fn new(credentials: BasicAuthCredentials) -> Self {
        Self { credentials }
    }
}

impl AuthInjector for BasicAuthInjector {
    fn inject(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(&self.credentials.username, self.credentials.password.as_ref())
    }
}

/// The function runtime, reached over HTTP.
#[derive(Clone)]
pub struct Upstream {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    auth: Option<Arc<dyn AuthInjector>>,
}

impl Upstream {
    pub fn new(base_url: impl AsRef<str>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.as_ref().trim_end_matches('/').to_string(),
            timeout,
            auth: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let upstream = Self::new(&config.functions_provider_url, config.upstream_timeout());
        match &config.provider_basic_auth {
            Some(credentials) => {
                upstream.with_auth(Arc::new(BasicAuthInjector::new(credentials.clone())))
            }
            None => upstream,
        }
    }

    pub fn with_auth(mut self, auth: Arc<dyn AuthInjector>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The request path is appended verbatim, so callers pass it with its leading slash.
    pub fn url_for(&self, request_url: &str) -> String {
        format!("{}{}", self.base_url, request_url)
    }

    /// Always yields a fulfillment. Transport failures become `Err` text,
    /// any HTTP status with a readable body becomes `Resp`.
    #[instrument(skip(self, request), fields(subsys = "Fulfillment", request_id = %request.request_id))]
    pub async fn execute(&self, request: &FunctionRequest) -> FulfilledRequest {
        match self.call(request).await {
            Ok(body) => FulfilledRequest::success(request.request_id.clone(), body),
            Err(err) => {
                tracing::warn!("function call failed: {err}");
                FulfilledRequest::failure(request.request_id.clone(), err)
            }
        }
    }

    async fn call(&self, request: &FunctionRequest) -> Result<Vec<u8>, FulfillmentError> {
        let url = self.url_for(&request.request_url);
        let body = serde_json::to_vec(&request.body).map_err(FulfillmentError::EncodeBody)?;

        let mut builder = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header(header::CONTENT_TYPE, "application/json")
            .header(REQUEST_ID_HEADER, &request.request_id)
            .body(body);

        if let Some(auth) = &self.auth {
            builder = auth.inject(builder);
        }

        let response = builder.send().await.map_err(FulfillmentError::Upstream)?;
        let status = response.status();
        tracing::debug!("{url} answered {status}");

        let body = response
            .bytes()
            .await
            .map_err(|source| FulfillmentError::ReadBody { status, source })?;

        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn trailing_slash_is_dropped() {
        let upstream = Upstream::new("http://127.0.0.1:8080/", Duration::from_secs(1));
        assert_eq!(upstream.base_url(), "http://127.0.0.1:8080");
        assert_eq!(upstream.url_for("/echo"), "http://127.0.0.1:8080/echo");

        let upstream = Upstream::new("http://fn.local/base", Duration::from_secs(1));
        assert_eq!(upstream.url_for("/run"), "http://fn.local/base/run");
    }

    #[test]
    fn from_config_carries_timeout_and_auth() {
        let config = Config {
            functions_provider_url: "https://fn.local/".to_string(),
            upstream_timeout_secs: 7,
            provider_basic_auth: Some(BasicAuthCredentials {
                username: "user".to_string(),
                password: Some("pass".to_string()),
            }),
            ..Default::default()
        };

        let upstream = Upstream::from_config(&config);
        assert_eq!(upstream.base_url(), "https://fn.local");
        assert_eq!(upstream.timeout, Duration::from_secs(7));
        assert!(upstream.auth.is_some());
    }
}
