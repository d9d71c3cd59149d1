use std::time::Duration;

use reqwest::blocking::{Client, ClientBuilder};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::Value;

pub mod cli;
pub mod error;
pub mod extract;
pub mod mapping;
pub mod resolver;
pub mod template;

pub use error::{Error, Result};
pub use extract::{extract, select_first};
pub use mapping::{load_env_file, load_req_file, parse_req_file, CommandDefinition, ReqFile, Settings};
pub use resolver::{execute_command, resolve_command, Invocation, Outcome, ResolvedCommand};
pub use template::{merge_variables, substitute_template, substitute_value, Variables};

// =====================
// Public API
// =====================

pub const DEFAULT_TIMEOUT_SECS: f64 = 300.0;
pub const DEFAULT_CONN_TIMEOUT_SECS: f64 = 30.0;

/// A fully resolved HTTP request, ready for a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    /// Value of the header named exactly `name`.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// What came back from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body_text: String,
}

impl HttpResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON. An empty body is `null`.
    pub fn json(&self) -> Result<Value> {
        if self.body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&self.body_text).map_err(|e| Error::ResponseParse(e.to_string()))
    }
}

/// Sends one request and waits for the answer.
pub trait Transport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Client settings for [`ReqwestTransport`].
#[derive(Debug, Clone)]
pub struct ExecutionConfig<'a> {
    pub conn_timeout_secs: Option<f64>,
    pub request_timeout_secs: Option<f64>,
    pub user_agent: &'a str,
}

impl<'a> ExecutionConfig<'a> {
    #[must_use]
    pub fn new(user_agent: &'a str) -> Self {
        Self {
            conn_timeout_secs: Some(DEFAULT_CONN_TIMEOUT_SECS),
            request_timeout_secs: Some(DEFAULT_TIMEOUT_SECS),
            user_agent,
        }
    }
}

/// Blocking HTTP transport backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a client. A timeout of zero (or none) means no limit.
    pub fn new(config: &ExecutionConfig<'_>) -> Result<Self> {
        let mut builder: ClientBuilder = Client::builder().user_agent(config.user_agent);
        if let Some(limit) = timeout_duration(config.conn_timeout_secs)? {
            builder = builder.connect_timeout(limit);
        }
        builder = builder.timeout(timeout_duration(config.request_timeout_secs)?);
        let client = builder
            .build()
            .map_err(|e| Error::Transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let method = parse_method(&request.method)?;
        let mut req = self
            .client
            .request(method, request.url.as_str())
            .headers(build_header_map(&request.headers)?);
        if let Some(body) = &request.body {
            req = req.body(body.clone());
        }

        let resp = req.send()?;
        let status = resp.status();
        let headers = resp
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        let body_text = resp.text()?;
        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body_text,
        })
    }
}

/// Build the request for a resolved command definition.
///
/// `method` defaults to `GET`, `Content-Type: application/json` is always
/// sent unless the definition overrides that exact header name, and a
/// non-null `body` is sent as JSON text.
pub fn build_request(command: &str, resolved: &Value) -> Result<HttpRequest> {
    let url = resolved
        .get("url")
        .map(mapping::value_to_var_string)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| Error::MissingRequiredField {
            command: command.to_string(),
            field: "url".to_string(),
        })?;

    let method = match resolved.get("method").map(mapping::value_to_var_string) {
        Some(m) if !m.is_empty() => parse_method(&m)?.to_string(),
        _ => "GET".to_string(),
    };

    let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
    if let Some(Value::Object(user_headers)) = resolved.get("headers") {
        for (name, value) in user_headers {
            let value = mapping::value_to_var_string(value);
            match headers.iter_mut().find(|(k, _)| k == name) {
                Some(existing) => existing.1 = value,
                None => headers.push((name.clone(), value)),
            }
        }
    }

    let body = match resolved.get("body") {
        Some(Value::Null) | None => None,
        Some(body) => Some(body.to_string()),
    };

    Ok(HttpRequest {
        method,
        url,
        headers,
        body,
    })
}

/// Snapshot of the process environment. Entries that are not valid UTF-8
/// are skipped.
#[must_use]
pub fn env_snapshot() -> Variables {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}

// =====================
// Internal helpers
// =====================

fn limited(secs: f64) -> bool {
    secs.is_finite() && secs > 0.0
}

/// `None` when there is no limit; an error when `secs` does not fit a `Duration`.
fn timeout_duration(secs: Option<f64>) -> Result<Option<Duration>> {
    secs.filter(|s| limited(*s))
        .map(|s| {
            Duration::try_from_secs_f64(s)
                .map_err(|e| Error::InvalidRequest(format!("Invalid timeout {s}: {e}")))
        })
        .transpose()
}

fn parse_method(method: &str) -> Result<Method> {
    let m = match method.to_uppercase().as_str() {
        "GET" => Method::GET,
        "POST" => Method::POST,
        "PUT" => Method::PUT,
        "PATCH" => Method::PATCH,
        "DELETE" => Method::DELETE,
        "HEAD" => Method::HEAD,
        "OPTIONS" => Method::OPTIONS,
        other => {
            return Err(Error::InvalidRequest(format!(
                "Unsupported HTTP method: {other}"
            )))
        }
    };
    Ok(m)
}

fn build_header_map(headers: &[(String, String)]) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::InvalidRequest(format!("Invalid header name: {name}")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|_| Error::InvalidRequest(format!("Invalid header value for {name}")))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

// Re-export useful types for consumers
pub use reqwest;
