//! HTTP client used for delivery.
//!
//! Headers, auth and timeout are fixed when the client is built; requests
//! can only add to them, never change the client's defaults.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, StatusCode};
use thiserror::Error;
use tracing::debug;

const USER_AGENT: &str = "permitsync/0.1 (permit dashboard sync)";

/// Errors from building or using the HTTP client.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error(transparent)]
    Request(#[from] reqwest::Error),
}

/// Client-wide settings, fixed at construction.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub timeout: Duration,
    /// Custom user agent; the permitsync agent when unset.
    pub user_agent: Option<String>,
    /// Headers sent with every request.
    pub default_headers: BTreeMap<String, String>,
    /// Bearer token sent as `Authorization`.
    pub auth_token: Option<String>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            default_headers: BTreeMap::new(),
            auth_token: None,
        }
    }
}

/// One field of a multipart body.
#[derive(Debug, Clone)]
pub enum MultipartField {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        filename: String,
        mime: String,
        bytes: Vec<u8>,
    },
}

/// Request body kinds.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    /// Pre-serialized JSON text.
    Json(String),
    /// `application/x-www-form-urlencoded` pairs.
    Form(Vec<(String, String)>),
    Multipart(Vec<MultipartField>),
}

/// A single request to send.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub body: RequestBody,
    pub headers: BTreeMap<String, String>,
    /// Overrides the client timeout for this request.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: Method, url: &str) -> Self {
        Self {
            method,
            url: url.to_string(),
            body: RequestBody::Empty,
            headers: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn post(url: &str) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Response with the body already read.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    /// Check if the response is successful.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Get the Content-Type header.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(|s| s.as_str())
    }
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, HttpError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let invalid = |reason: String| HttpError::InvalidHeader {
            name: name.clone(),
            reason,
        };
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// HTTP client with fixed defaults.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Build a client. Fails on header names or values that are not valid HTTP.
    pub fn new(options: &HttpOptions) -> Result<Self, HttpError> {
        let mut headers = header_map(&options.default_headers)?;
        if let Some(ref token) = options.auth_token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
                HttpError::InvalidHeader {
                    name: AUTHORIZATION.to_string(),
                    reason: e.to_string(),
                }
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let user_agent = options.user_agent.as_deref().unwrap_or(USER_AGENT);
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(options.timeout)
            .default_headers(headers)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self { client })
    }

    /// Send a request and read the whole response body.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(header_map(&request.headers)?);

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(text) => builder.header(CONTENT_TYPE, "application/json").body(text),
            RequestBody::Form(pairs) => builder.form(&pairs),
            RequestBody::Multipart(fields) => builder.multipart(multipart_form(fields)?),
        };

        let start = Instant::now();
        let response = builder.send().await?;
        let status = response.status();

        let mut headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.to_string(), v.to_string());
            }
        }
        let body = response.text().await?;

        debug!(
            "{} {} -> {} in {}ms",
            request.method,
            request.url,
            status.as_u16(),
            start.elapsed().as_millis()
        );

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn multipart_form(fields: Vec<MultipartField>) -> Result<Form, HttpError> {
    let mut form = Form::new();
    for field in fields {
        form = match field {
            MultipartField::Text { name, value } => form.text(name, value),
            MultipartField::File {
                name,
                filename,
                mime,
                bytes,
            } => {
                let part = Part::bytes(bytes).file_name(filename).mime_str(&mime)?;
                form.part(name, part)
            }
        };
    }
    Ok(form)
}

/// Render an error and its sources as one line.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_default_header_rejected() {
        let mut options = HttpOptions::default();
        options
            .default_headers
            .insert("bad header".to_string(), "x".to_string());

        match HttpClient::new(&options) {
            Err(HttpError::InvalidHeader { name, .. }) => assert_eq!(name, "bad header"),
            other => panic!("expected InvalidHeader, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_client_with_auth_token() {
        let options = HttpOptions {
            auth_token: Some("abc123".to_string()),
            ..Default::default()
        };
        assert!(HttpClient::new(&options).is_ok());
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let inner = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let outer = HttpError::InvalidHeader {
            name: "x".to_string(),
            reason: "bad".to_string(),
        };
        assert_eq!(error_chain(&inner), "refused");
        assert!(error_chain(&outer).contains("invalid header"));
    }
}
