//! HTTP client for the camera's CGI interface.
//!
//! One request per step.  Non-success statuses are not transport errors:
//! they come back as [`DeviceError::Status`] with whatever body the device
//! sent, so the executor can report them per step.

use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Bytes;
use reqwest::{header, Method, Url};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use camdeck_common::config::Config;
use camdeck_common::protocol::{Connection, Step};

/// User-Agent sent to devices.
const USER_AGENT: &str = "camdeck-gateway/0.1";

#[derive(Debug, Error)]
pub enum DeviceError {
    /// The step could not be turned into a request; nothing was sent.
    #[error("{0}")]
    InvalidStep(String),
    #[error("device responded with HTTP {status}")]
    Status { status: u16, body: Value },
    #[error("no response from device: {0}")]
    Unreachable(String),
}

/// A raw binary body plus the content type the device declared.
#[derive(Debug)]
pub struct BinaryResponse {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

#[derive(Clone)]
pub struct DeviceClient {
    http: reqwest::Client,
    timeout: Duration,
    binary_timeout: Duration,
    allow_any_path: bool,
}

impl DeviceClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Cannot build HTTP client")?;
        Ok(Self {
            http,
            timeout: config.device_timeout,
            binary_timeout: config.binary_timeout,
            allow_any_path: config.allow_any_path,
        })
    }

    /// Issue the step and return its body as structured data.
    pub async fn fetch_structured(&self, conn: &Connection, step: &Step) -> Result<Value, DeviceError> {
        let (bytes, content_type) = self.send(conn, step, self.timeout).await?;
        Ok(normalize_body(&bytes, content_type.as_deref()))
    }

    /// Issue the step and return its body untouched.
    pub async fn fetch_binary(
        &self,
        conn: &Connection,
        step: &Step,
    ) -> Result<BinaryResponse, DeviceError> {
        let (bytes, content_type) = self.send(conn, step, self.binary_timeout).await?;
        Ok(BinaryResponse {
            bytes,
            content_type,
        })
    }

    async fn send(
        &self,
        conn: &Connection,
        step: &Step,
        timeout: Duration,
    ) -> Result<(Bytes, Option<String>), DeviceError> {
        let url = self.build_url(conn, step)?;
        let method = parse_method(&step.method)?;
        debug!("{method} {url}");

        let mut request = self.http.request(method.clone(), url).timeout(timeout);
        if let Some((user, pass)) = conn.credentials() {
            request = request.basic_auth(user, Some(pass));
        }
        if let Some(body) = &step.body {
            if matches!(method, Method::POST | Method::PUT | Method::PATCH) {
                request = request.json(body);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| DeviceError::Unreachable(e.to_string()))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| DeviceError::Unreachable(format!("reading body: {e}")))?;

        if !status.is_success() {
            return Err(DeviceError::Status {
                status: status.as_u16(),
                body: normalize_body(&bytes, content_type.as_deref()),
            });
        }
        Ok((bytes, content_type))
    }

    /// `scheme://host[:port]/path?query`, with scalar query values only.
    pub fn build_url(&self, conn: &Connection, step: &Step) -> Result<Url, DeviceError> {
        if conn.host.trim().is_empty() {
            return Err(DeviceError::InvalidStep("device host is required".into()));
        }
        if !step.path.starts_with('/') {
            return Err(DeviceError::InvalidStep(format!(
                "path {:?} must start with /",
                step.path
            )));
        }
        if has_dot_segments(&step.path) {
            return Err(DeviceError::InvalidStep(format!(
                "path {:?} may not contain dot segments or encoded separators",
                step.path
            )));
        }

        let mut url = Url::parse(&format!("{}{}", conn.base_url(), step.path))
            .map_err(|e| DeviceError::InvalidStep(format!("invalid device URL: {e}")))?;
        // Checked on the parsed path, which is what goes on the wire.
        if !self.allow_any_path && !url.path().starts_with("/cgi-bin/") && url.path() != "/" {
            return Err(DeviceError::InvalidStep(format!(
                "invalid path {:?} (must start with /cgi-bin/ or be /)",
                step.path
            )));
        }

        let mut pairs = Vec::with_capacity(step.query.len());
        for (key, value) in &step.query {
            let value = match value {
                Value::Null => continue,
                Value::String(s) => s.clone(),
                Value::Bool(_) | Value::Number(_) => value.to_string(),
                Value::Array(_) | Value::Object(_) => {
                    return Err(DeviceError::InvalidStep(format!(
                        "query parameter {key:?} must be a scalar"
                    )));
                }
            };
            pairs.push((key.as_str(), value));
        }
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url)
    }
}

/// `.` or `..` segments, literal or percent-encoded, and encoded slashes.
fn has_dot_segments(path: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let lower = path.to_ascii_lowercase();
    lower.contains("%2e")
        || lower.contains("%2f")
        || lower.contains("%5c")
        || path.contains('\\')
        || path.split('/').any(|seg| seg == "." || seg == "..")
}

fn parse_method(raw: &str) -> Result<Method, DeviceError> {
    let method = raw.trim().to_ascii_uppercase();
    match method.as_str() {
        "GET" | "POST" | "PUT" | "PATCH" | "DELETE" | "HEAD" => Method::from_bytes(method.as_bytes())
            .map_err(|_| DeviceError::InvalidStep(format!("invalid HTTP method {raw:?}"))),
        _ => Err(DeviceError::InvalidStep(format!("unsupported HTTP method {raw:?}"))),
    }
}

/// Turn a response body into JSON: parsed if it is JSON, text if it is
/// UTF-8, otherwise a `{ contentType, size }` summary.
pub fn normalize_body(bytes: &[u8], content_type: Option<&str>) -> Value {
    if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
        return value;
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => Value::String(text.to_string()),
        Err(_) => json!({
            "contentType": content_type.unwrap_or("application/octet-stream"),
            "size": bytes.len(),
        }),
    }
}
