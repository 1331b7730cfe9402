//! Shared HTTP protocol types: what callers post to the gateway and what
//! the gateway answers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schedule::{Clip, ScheduleRequest};
use crate::storage::Category;

// ── connection ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// How to reach the device.  Supplied per call, never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Connection {
    #[serde(default)]
    pub protocol: Scheme,
    #[serde(alias = "ip")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl Connection {
    /// `scheme://host[:port]`, without a trailing slash.
    pub fn base_url(&self) -> String {
        match self.port {
            Some(port) if port != 0 => {
                format!("{}://{}:{port}", self.protocol.as_str(), self.host)
            }
            _ => format!("{}://{}", self.protocol.as_str(), self.host),
        }
    }

    /// Basic-auth credentials, only when both parts are present.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }
}

// ── steps ────────────────────────────────────────────────────────────────

/// Whether a step's response is persisted to the artifact store.
///
/// On the wire this is the optional `saveToStorage` boolean: absent or
/// `null` means [`SavePolicy::Auto`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum SavePolicy {
    /// Save if the catalog marks the operation as binary.
    #[default]
    Auto,
    ForceSave,
    ForceNoSave,
}

impl From<Option<bool>> for SavePolicy {
    fn from(flag: Option<bool>) -> Self {
        match flag {
            None => SavePolicy::Auto,
            Some(true) => SavePolicy::ForceSave,
            Some(false) => SavePolicy::ForceNoSave,
        }
    }
}

impl From<SavePolicy> for Option<bool> {
    fn from(policy: SavePolicy) -> Self {
        match policy {
            SavePolicy::Auto => None,
            SavePolicy::ForceSave => Some(true),
            SavePolicy::ForceNoSave => Some(false),
        }
    }
}

impl SavePolicy {
    /// Resolve against the catalog's artifact kind for the operation.
    ///
    /// Returns the storage category to persist under, or `None` when the
    /// response should be returned as structured data.
    pub fn resolve(self, catalog_kind: Option<Category>) -> Option<Category> {
        match self {
            SavePolicy::Auto => catalog_kind,
            SavePolicy::ForceSave => Some(catalog_kind.unwrap_or(Category::Other)),
            SavePolicy::ForceNoSave => None,
        }
    }
}

fn default_method() -> String {
    "GET".to_string()
}

/// One device operation.  Identity is positional within a bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    #[serde(default)]
    pub operation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "cgiPath", alias = "path")]
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    /// Scalar query parameters.  `null` values are omitted from the URL.
    #[serde(default)]
    pub query: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "is_auto")]
    pub save_to_storage: SavePolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_folder: Option<String>,
    /// Request body, sent only for POST/PUT/PATCH.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

fn is_auto(policy: &SavePolicy) -> bool {
    *policy == SavePolicy::Auto
}

impl Step {
    /// Label shown to the caller: explicit label, else the operation id.
    pub fn display_label(&self) -> &str {
        self.label
            .as_deref()
            .filter(|l| !l.is_empty())
            .unwrap_or(&self.operation_id)
    }
}

// ── results ──────────────────────────────────────────────────────────────

/// Why a step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The step itself was malformed; nothing was sent.
    InvalidStep,
    /// The device answered with a non-success status.
    UpstreamStatus,
    /// No response: timeout, refused connection, DNS, TLS.
    Unreachable,
    /// The response arrived but could not be persisted.
    Storage,
    /// The bundle was cancelled before this step ran.
    Cancelled,
}

/// Outcome of one step.  Created once, in step order, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub ok: bool,
    pub operation_id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    /// Upstream HTTP status, when the device answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl StepResult {
    pub fn success(operation_id: &str, label: &str, data: Value) -> Self {
        Self {
            ok: true,
            operation_id: operation_id.to_string(),
            label: label.to_string(),
            data: Some(data),
            error: None,
            error_kind: None,
            status: None,
        }
    }

    pub fn failure(
        operation_id: &str,
        label: &str,
        kind: FailureKind,
        error: String,
        status: Option<u16>,
        data: Option<Value>,
    ) -> Self {
        Self {
            ok: false,
            operation_id: operation_id.to_string(),
            label: label.to_string(),
            data,
            error: Some(error),
            error_kind: Some(kind),
            status,
        }
    }
}

/// Response to `POST /bundle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleResponse {
    pub success: bool,
    pub total_steps: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub results: Vec<StepResult>,
}

/// A clip as posted to `POST /recording-automation`, with an optional
/// per-clip folder that overrides the request-level one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipOrder {
    #[serde(flatten)]
    pub clip: Clip,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_folder: Option<String>,
}

/// Response to `POST /recording-automation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationResponse {
    pub success: bool,
    pub total_clips: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub storage_folder: Option<String>,
    pub results: Vec<StepResult>,
}

/// Response to `POST /schedule/preview`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePreview {
    pub total_clips: usize,
    pub clips: Vec<Clip>,
}

/// Request for `POST /schedule/steps`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExportRequest {
    #[serde(flatten)]
    pub schedule: ScheduleRequest,
    #[serde(default)]
    pub save_to_storage: Option<bool>,
    #[serde(default)]
    pub storage_folder: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExportMetadata {
    #[serde(flatten)]
    pub schedule: ScheduleRequest,
    pub total_clips: usize,
}

/// Replayable step document produced by `POST /schedule/steps`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExport {
    pub version: String,
    /// RFC 3339.
    pub exported_at: String,
    pub metadata: StepExportMetadata,
    pub steps: Vec<Step>,
}

// ── storage ──────────────────────────────────────────────────────────────

/// Metadata returned in place of a persisted binary payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredArtifact {
    pub category: Category,
    pub folder: Option<String>,
    pub filename: String,
    pub size: u64,
    pub content_type: String,
    /// `/{category}/{folder?}/{filename}`
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageRoot {
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFile {
    pub name: String,
    pub size: u64,
    /// RFC 3339 modification time.
    pub modified: String,
    /// Relative path under the storage root.
    pub path: String,
}

/// Response to `GET /storage/{category}/...` on a directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageListing {
    pub directory: String,
    pub files: Vec<StoredFile>,
    pub subdirectories: Vec<String>,
}

/// Response to `POST /firmware/upload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareUploadResponse {
    pub success: bool,
    pub filename: String,
    pub original_name: String,
    pub size: u64,
    pub checksum: String,
    pub message: String,
}

/// Health-check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
}
