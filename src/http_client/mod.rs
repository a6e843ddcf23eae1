//! Outbound HTTP exchange with the upstream API.

pub mod resilient;

pub use resilient::ResilientHttpClientGateway;

use crate::domain::{ForwardRequest, ForwardResponse};
use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Performs one HTTP exchange.
///
/// Any status code the backend answers with is a successful exchange; only
/// transport failures are errors.
#[async_trait]
pub trait HttpClientGateway: Send + Sync {
    async fn exchange(&self, request: ForwardRequest) -> Result<ForwardResponse>;
}

/// [`HttpClientGateway`] over a pooled `reqwest` client
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Build a client that never follows redirects, so the caller sees what the backend sent
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProxyError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClientGateway for ReqwestHttpClient {
    async fn exchange(&self, request: ForwardRequest) -> Result<ForwardResponse> {
        let ForwardRequest {
            target_uri,
            method,
            headers,
            body,
        } = request;

        debug!(method = %method, target = %target_uri, "Sending backend request");

        let response = self
            .client
            .request(method, target_uri)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(map_transport_error)?;

        Ok(ForwardResponse::new(status, headers, body))
    }
}

fn map_transport_error(e: reqwest::Error) -> ProxyError {
    if e.is_timeout() {
        ProxyError::UpstreamTimeout(format!("Backend request timed out: {}", e))
    } else if e.is_connect() {
        ProxyError::Transport(format!("Failed to connect to backend: {}", e))
    } else {
        ProxyError::Transport(format!("Backend request failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::{HeaderMap, Method};
    use wiremock::matchers::{body_bytes, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(server: &MockServer, target: &str, method: Method, body: &'static [u8]) -> ForwardRequest {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "req-1".parse().unwrap());

        ForwardRequest {
            target_uri: format!("{}{}", server.uri(), target).parse().unwrap(),
            method,
            headers,
            body: Bytes::from_static(body),
        }
    }

    #[tokio::test]
    async fn test_exchange_passes_through_request_and_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/items"))
            .and(query_param("q", "phone"))
            .and(header("x-request-id", "req-1"))
            .and(body_bytes(b"{\"a\":1}".to_vec()))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("x-backend", "yes")
                    .set_body_bytes(b"created".to_vec()),
            )
            .mount(&server)
            .await;

        let client = ReqwestHttpClient::new(Duration::from_secs(1)).unwrap();
        let response = client
            .exchange(request(&server, "/items?q=phone", Method::POST, b"{\"a\":1}"))
            .await
            .unwrap();

        assert_eq!(response.status, 201);
        assert_eq!(response.headers.get("x-backend").unwrap(), "yes");
        assert_eq!(response.body, Bytes::from_static(b"created"));
    }

    #[tokio::test]
    async fn test_backend_errors_are_responses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let client = ReqwestHttpClient::new(Duration::from_secs(1)).unwrap();
        let response = client
            .exchange(request(&server, "/items", Method::GET, b""))
            .await
            .unwrap();

        assert_eq!(response.status, 503);
    }

    #[tokio::test]
    async fn test_redirects_are_not_followed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/new"))
            .mount(&server)
            .await;

        let client = ReqwestHttpClient::new(Duration::from_secs(1)).unwrap();
        let response = client
            .exchange(request(&server, "/old", Method::GET, b""))
            .await
            .unwrap();

        assert_eq!(response.status, 302);
        assert_eq!(response.headers.get("location").unwrap(), "/new");
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let client = ReqwestHttpClient::new(Duration::from_secs(1)).unwrap();
        let request = ForwardRequest {
            target_uri: "http://127.0.0.1:1/items".parse().unwrap(),
            method: Method::GET,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };

        let result = client.exchange(request).await;
        assert!(matches!(result, Err(ProxyError::Transport(_))));
    }
}
