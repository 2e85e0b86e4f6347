use std::{collections::BTreeMap, future::Future, time::Duration};

use serde_json::{Map, Value};
use tracing::debug;

use crate::redact::redact_sensitive;

pub type Headers = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Route relative to the contract server base url, e.g. `/v1/resources`.
    pub path: String,
    pub headers: Headers,
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub body: Value,
    pub headers: Headers,
}

/// Transport failure: either a non-2xx response (`code` is set) or a
/// connection-level failure (`code` is `None`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkError {
    pub message: String,
    pub code: Option<u16>,
    pub url: String,
    pub headers: Headers,
    /// Raw response payload, empty for connection failures.
    pub body: String,
}

impl NetworkError {
    pub fn connection(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            url: url.into(),
            headers: Headers::new(),
            body: String::new(),
        }
    }

    pub fn http(
        url: impl Into<String>,
        code: u16,
        headers: Headers,
        body: impl Into<String>,
    ) -> Self {
        Self {
            message: "HTTP error".to_string(),
            code: Some(code),
            url: url.into(),
            headers,
            body: body.into(),
        }
    }
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{}: HTTP {code} from {}", self.message, self.url),
            None => write!(f, "{}: {}", self.message, self.url),
        }
    }
}

impl std::error::Error for NetworkError {}

/// Performs one authenticated call against the contract server.
pub trait RequestExecutor {
    fn execute(
        &self,
        request: ApiRequest,
    ) -> impl Future<Output = Result<ApiResponse, NetworkError>> + Send;
}

#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    base_url: String,
    client: reqwest::Client,
}

impl ReqwestExecutor {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}

impl RequestExecutor for ReqwestExecutor {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, NetworkError> {
        let url = self.url_for(&request.path);
        debug!(
            method = %request.method,
            url = %url,
            headers = %redact_sensitive(&format!("{:?}", request.headers)),
            data = %request
                .data
                .as_ref()
                .map(|d| redact_sensitive(&d.to_string()))
                .unwrap_or_default(),
            "contract request"
        );

        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(data) = &request.data {
            builder = builder.json(data);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| NetworkError::connection(&url, e.to_string()))?;

        let status = resp.status();
        let headers: Headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let text = resp
            .text()
            .await
            .map_err(|e| NetworkError::connection(&url, e.to_string()))?;

        debug!(
            status = status.as_u16(),
            url = %url,
            body = %redact_sensitive(&text),
            "contract response"
        );

        if !status.is_success() {
            let mut err = NetworkError::http(&url, status.as_u16(), headers, text);
            if let Some(reason) = status.canonical_reason() {
                err.message = reason.to_string();
            }
            return Err(err);
        }

        Ok(ApiResponse {
            body: parse_body(&text),
            headers,
        })
    }
}

/// Empty bodies become `{}`; non-JSON bodies are kept as a JSON string.
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Object(Map::new());
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
