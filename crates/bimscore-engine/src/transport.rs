//! HTTP transport seam.
//!
//! The gateway speaks in [`BackendRequest`]/[`TransportResponse`]; the
//! transport only moves bytes. Tests substitute an in-process fake.

use crate::config::{BackendConfig, ConfigError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }
}

/// A fully described backend call. `segments` are raw path segments
/// relative to the base url; the transport encodes them.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendRequest {
    pub method: Method,
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl BackendRequest {
    pub fn get<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method: Method::Get,
            segments: segments.into_iter().map(Into::into).collect(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post<I, S>(segments: I, body: serde_json::Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method: Method::Post,
            body: Some(body),
            ..Self::get(segments)
        }
    }

    pub fn put<I, S>(segments: I, body: serde_json::Value) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method: Method::Put,
            body: Some(body),
            ..Self::get(segments)
        }
    }

    /// Unencoded `/a/b/c` form, for routing in tests and for logs.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// The request never produced an HTTP response (DNS, connect, timeout).
#[derive(Debug, Clone, thiserror::Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

#[async_trait]
pub trait BackendTransport: Send + Sync {
    async fn execute(&self, request: &BackendRequest) -> Result<TransportResponse, TransportError>;
}

// ============================================================================
// reqwest transport
// ============================================================================

pub struct HttpTransport {
    client: Client,
    base_url: url::Url,
}

impl HttpTransport {
    pub fn new(config: &BackendConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut base = config.base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = url::Url::parse(&base)
            .map_err(|e| ConfigError::Invalid(format!("backend url `{}`: {e}", config.base_url)))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?;
        Ok(Self { client, base_url })
    }

    fn url_for(&self, request: &BackendRequest) -> Result<url::Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError(format!("base url `{}` cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(request.segments.iter());
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }
}

#[async_trait]
impl BackendTransport for HttpTransport {
    async fn execute(&self, request: &BackendRequest) -> Result<TransportResponse, TransportError> {
        let url = self.url_for(request)?;
        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
        };
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_join_keeps_base_path() {
        let transport = HttpTransport::new(&BackendConfig::new("https://scoring.example.com/api/v1")).unwrap();
        let request = BackendRequest::get(["periods", "2024-Q1", "evidences"]).with_query("project_id", "P 1");
        let url = transport.url_for(&request).unwrap();
        assert_eq!(
            url.as_str(),
            "https://scoring.example.com/api/v1/periods/2024-Q1/evidences?project_id=P+1"
        );
    }

    #[test]
    fn test_segments_are_percent_encoded() {
        let transport = HttpTransport::new(&BackendConfig::new("https://scoring.example.com/api")).unwrap();
        let request = BackendRequest::post(["periods", "2024 Q1/a", "evidences", "E-1_x.y~"], serde_json::json!({}));
        assert_eq!(request.path(), "/periods/2024 Q1/a/evidences/E-1_x.y~");
        let url = transport.url_for(&request).unwrap();
        assert_eq!(
            url.as_str(),
            "https://scoring.example.com/api/periods/2024%20Q1%2Fa/evidences/E-1_x.y~"
        );
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let request = BackendRequest::get(["projects"]).with_header("X-Role", "MANAGER");
        assert_eq!(request.header("x-role"), Some("MANAGER"));
    }
}
