//! Outbound JSON-over-HTTP client with a fixed base URL.

use crate::error::HttpClientError;
use reqwest::{RequestBuilder, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpClient {
    base_url: Url,
    http: reqwest::Client,
}

impl HttpClient {
    pub fn new(base_url: &str) -> Result<Self, HttpClientError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, HttpClientError> {
        let base_url = Url::parse(base_url).map_err(|e| HttpClientError::Url(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(HttpClientError::Url(format!("{} cannot be a base url", base_url)));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base_url, http })
    }

    /// Appends percent-encoded path segments to the base URL.
    pub fn url(&self, segments: &[&str]) -> Result<Url, HttpClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| HttpClientError::Url(format!("{} cannot be a base url", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, HttpClientError> {
        let url = self.url(segments)?;
        self.execute(self.http.get(url)).await
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, HttpClientError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HttpClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};

    async fn spawn_upstream() -> String {
        let app = Router::new()
            .route("/api/items", get(|| async { Json(vec!["a", "b"]) }))
            .route("/api/broken", get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api/", addr)
    }

    #[test]
    fn test_url_segments_are_encoded() {
        let client = HttpClient::new("https://fakestoreapi.com").unwrap();
        let url = client.url(&["products", "category", "men's clothing"]).unwrap();
        assert_eq!(url.as_str(), "https://fakestoreapi.com/products/category/men's%20clothing");
    }

    #[test]
    fn test_url_keeps_base_path() {
        let client = HttpClient::new("https://example.test/api/").unwrap();
        let url = client.url(&["products", "7"]).unwrap();
        assert_eq!(url.as_str(), "https://example.test/api/products/7");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(HttpClient::new("not a url"), Err(HttpClientError::Url(_))));
        assert!(matches!(HttpClient::new("mailto:someone"), Err(HttpClientError::Url(_))));
    }

    #[tokio::test]
    async fn test_get_decodes_json() {
        let client = HttpClient::new(&spawn_upstream().await).unwrap();
        let items: Vec<String> = client.get(&["items"]).await.unwrap();
        assert_eq!(items, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let client = HttpClient::new(&spawn_upstream().await).unwrap();
        let result: Result<Vec<String>, _> = client.get(&["broken"]).await;

        match result {
            Err(HttpClientError::Status { status, body }) => {
                assert_eq!(status, 502);
                assert_eq!(body, "upstream down");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
