//! HTTP client for external collaborator services.
//!
//! Code-search ranking and managed-database access live behind one HTTP
//! API. Every request carries the bearer credential and the turn's request
//! id; any non-2xx answer becomes [`ToolError::ExternalService`] with the
//! response body attached.

use crate::{ToolError, ToolResult};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Client for the collaborator API.
#[derive(Clone)]
pub struct CollaboratorClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl CollaboratorClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// GET `path` and decode the JSON answer.
    pub async fn get_json<R: DeserializeOwned>(
        &self,
        service: &str,
        path: &str,
        request_id: &str,
    ) -> ToolResult<R> {
        let request = self.client.get(self.url(path));
        self.send(service, request, request_id).await
    }

    /// POST a JSON body to `path` and decode the JSON answer.
    pub async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        service: &str,
        path: &str,
        body: &B,
        request_id: &str,
    ) -> ToolResult<R> {
        let request = self.client.post(self.url(path)).json(body);
        self.send(service, request, request_id).await
    }

    async fn send<R: DeserializeOwned>(
        &self,
        service: &str,
        request: RequestBuilder,
        request_id: &str,
    ) -> ToolResult<R> {
        let mut request = request
            .header(REQUEST_ID_HEADER, request_id)
            .header("Accept", "application/json")
            .timeout(self.timeout);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        debug!(service, request_id, "Calling collaborator");
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ToolError::Timeout(self.timeout)
            } else {
                ToolError::external(service, None, format!("HTTP request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::external(service, Some(status.as_u16()), body));
        }

        let body = response.text().await.map_err(|e| {
            ToolError::external(service, Some(status.as_u16()), format!("Failed to read response body: {e}"))
        })?;
        serde_json::from_str(&body).map_err(|e| {
            ToolError::external(service, Some(status.as_u16()), format!("Invalid response: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_sends_credential_and_request_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/echo"))
            .and(header("authorization", "Bearer secret"))
            .and(header(REQUEST_ID_HEADER, "req_1"))
            .and(body_json(json!({"q": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = CollaboratorClient::new(format!("{}/", server.uri()), Some("secret".into()));
        let value: Value = client
            .post_json("echo", "/echo", &json!({"q": 1}), "req_1")
            .await
            .unwrap();
        assert_eq!(value, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_non_success_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance window"))
            .mount(&server)
            .await;

        let client = CollaboratorClient::new(server.uri(), None);
        let err = client
            .get_json::<Value>("schema lookup", "broken", "req_1")
            .await
            .unwrap_err();
        match err {
            ToolError::ExternalService {
                service,
                status,
                body,
            } => {
                assert_eq!(service, "schema lookup");
                assert_eq!(status, Some(503));
                assert_eq!(body, "maintenance window");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_json_is_an_external_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = CollaboratorClient::new(server.uri(), None);
        let err = client
            .get_json::<Value>("code search", "x", "req_1")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "external_service_failure");
    }
}
