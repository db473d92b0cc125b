//! HTTP transport seam
//!
//! The executor only needs "GET this URL with these headers and tell me the
//! status once the body is read". [`Transport`] captures that so tests can
//! swap in an in-process fake; [`ReqwestTransport`] is the real client.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Url;

use crate::error::TransportError;

/// A fully-read response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// Body length in bytes
    pub body_bytes: usize,
}

/// Performs a single HTTP GET
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport identifier for logs
    fn name(&self) -> &str;

    /// Send a GET and read the whole response body
    ///
    /// Timeouts are enforced by the caller.
    async fn get(&self, url: &Url, headers: &HeaderMap)
        -> Result<TransportResponse, TransportError>;
}

/// [`Transport`] backed by a pooled `reqwest` client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a client with a loadramp user agent
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("loadramp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    fn name(&self) -> &str {
        "reqwest"
    }

    async fn get(
        &self,
        url: &Url,
        headers: &HeaderMap,
    ) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .headers(headers.clone())
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;

        Ok(TransportResponse {
            status,
            body_bytes: body.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn local_transport() -> ReqwestTransport {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        ReqwestTransport::with_client(client)
    }

    #[tokio::test]
    async fn test_get_sends_headers_and_reads_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("Authorization", "Bearer test-token"))
            .and(header("Content-Type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .expect(1)
            .mount(&server)
            .await;

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer test-token"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let transport = local_transport();
        let url = Url::parse(&server.uri()).unwrap();
        let response = transport.get(&url, &headers).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body_bytes, 5);
    }

    #[tokio::test]
    async fn test_error_status_is_a_response_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let transport = local_transport();
        let url = Url::parse(&format!("{}/users", server.uri())).unwrap();
        let response = transport.get(&url, &HeaderMap::new()).await.unwrap();

        assert_eq!(response.status, 500);
    }

    #[test]
    fn test_default_client_builds() {
        assert_eq!(ReqwestTransport::new().unwrap().name(), "reqwest");
    }

    #[tokio::test]
    async fn test_unreachable_target_is_connect_error() {
        // Bind then drop a listener to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = local_transport();
        let url = Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap();
        let err = transport.get(&url, &HeaderMap::new()).await.unwrap_err();

        assert!(matches!(err, TransportError::Connect(_)), "got {err:?}");
    }
}
