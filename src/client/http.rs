use crate::errors::{AppError, AppResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Thin JSON GET client for the dashboard API.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// Non-2xx maps to `AppError::Http`; an expired deadline to `AppError::Timeout`.
    pub async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> AppResult<T> {
        match tokio::time::timeout(self.timeout, self.fetch_json(endpoint)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    async fn fetch_json<T: DeserializeOwned>(&self, endpoint: &str) -> AppResult<T> {
        let response = self.http.get(self.url_for(endpoint)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Http(status.as_u16()));
        }
        let body = response.bytes().await?;
        serde_json::from_slice::<T>(&body)
            .map_err(|error| AppError::Transport(format!("invalid JSON from {}: {}", endpoint, error)))
    }
}

#[cfg(test)]
mod tests {
    use super::ApiClient;
    use std::time::Duration;

    #[test]
    fn joins_relative_endpoints_onto_base() {
        let client = ApiClient::new("http://127.0.0.1:8787/", Duration::from_secs(5));
        assert_eq!(client.url_for("/api/sales"), "http://127.0.0.1:8787/api/sales");
        assert_eq!(client.url_for("api/sales"), "http://127.0.0.1:8787/api/sales");
        assert_eq!(client.url_for("https://example.com/x"), "https://example.com/x");
    }

    #[tokio::test]
    async fn unreachable_host_surfaces_transport_error() {
        let client = ApiClient::new("http://127.0.0.1:1", Duration::from_secs(5));
        let err = client
            .get_json::<serde_json::Value>("/api/sales")
            .await
            .expect_err("nothing listens on port 1");
        assert!(err.to_string().starts_with("TRANSPORT"));
    }
}
