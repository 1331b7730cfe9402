//! Step-bundle executor.
//!
//! Steps run strictly one after another against the same device, and the
//! shutdown flag is checked before each one.  A failed step never aborts
//! the bundle; it only contributes a failure result at its own position.

use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tracing::{info, warn};

use camdeck_common::catalog;
use camdeck_common::protocol::{Connection, FailureKind, Step, StepResult};

use crate::artifact::ArtifactStore;
use crate::device::{DeviceClient, DeviceError};

/// A step that failed validation before the bundle started.
#[derive(Debug, Clone)]
pub struct InvalidStep {
    pub operation_id: String,
    pub label: String,
    pub reason: String,
}

impl InvalidStep {
    /// Best-effort identity from a raw step that did not deserialize.
    pub fn from_raw(raw: &Value, reason: impl Into<String>) -> Self {
        let text = |key: &str| raw.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
        let operation_id = text("operationId");
        let label = Some(text("label"))
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| operation_id.clone());
        Self {
            operation_id,
            label,
            reason: reason.into(),
        }
    }
}

pub type StepInput = Result<Step, InvalidStep>;

/// Parse one raw step; failures stay in place as [`InvalidStep`].
pub fn parse_step(raw: Value) -> StepInput {
    match serde_json::from_value::<Step>(raw.clone()) {
        Ok(step) => Ok(step),
        Err(e) => Err(InvalidStep::from_raw(&raw, format!("invalid step: {e}"))),
    }
}

#[derive(Debug)]
pub struct BundleOutcome {
    pub results: Vec<StepResult>,
    pub success_count: usize,
    pub failure_count: usize,
}

impl BundleOutcome {
    fn new(results: Vec<StepResult>) -> Self {
        let success_count = results.iter().filter(|r| r.ok).count();
        let failure_count = results.len() - success_count;
        Self {
            results,
            success_count,
            failure_count,
        }
    }
}

pub struct Executor<'a> {
    device: &'a DeviceClient,
    store: &'a ArtifactStore,
    cancel: &'a AtomicBool,
}

impl<'a> Executor<'a> {
    pub fn new(device: &'a DeviceClient, store: &'a ArtifactStore, cancel: &'a AtomicBool) -> Self {
        Self {
            device,
            store,
            cancel,
        }
    }

    /// Run every step in order.  The result list has one entry per input.
    pub async fn run(&self, conn: &Connection, steps: Vec<StepInput>) -> BundleOutcome {
        let total = steps.len();
        let mut results = Vec::with_capacity(total);

        for (index, input) in steps.into_iter().enumerate() {
            let result = match input {
                Err(invalid) => StepResult::failure(
                    &invalid.operation_id,
                    &invalid.label,
                    FailureKind::InvalidStep,
                    invalid.reason,
                    None,
                    None,
                ),
                Ok(step) if self.cancel.load(Ordering::Relaxed) => StepResult::failure(
                    &step.operation_id,
                    step.display_label(),
                    FailureKind::Cancelled,
                    "cancelled before execution".into(),
                    None,
                    None,
                ),
                Ok(step) => self.run_step(conn, &step).await,
            };

            if result.ok {
                info!("[{}/{total}] {} ok", index + 1, result.operation_id);
            } else {
                warn!(
                    "[{}/{total}] {} failed: {}",
                    index + 1,
                    result.operation_id,
                    result.error.as_deref().unwrap_or_default()
                );
            }
            results.push(result);
        }

        let outcome = BundleOutcome::new(results);
        info!(
            "Bundle done: {} ok, {} failed",
            outcome.success_count, outcome.failure_count
        );
        outcome
    }

    async fn run_step(&self, conn: &Connection, step: &Step) -> StepResult {
        let op = step.operation_id.as_str();
        let label = step.display_label();
        let category = step
            .save_to_storage
            .resolve(catalog::artifact_kind(op));

        let Some(category) = category else {
            return match self.device.fetch_structured(conn, step).await {
                Ok(data) => StepResult::success(op, label, data),
                Err(e) => device_failure(op, label, e),
            };
        };

        let response = match self.device.fetch_binary(conn, step).await {
            Ok(response) => response,
            Err(e) => return device_failure(op, label, e),
        };
        let saved = self
            .store
            .save(
                &response.bytes,
                category,
                step.storage_folder.as_deref(),
                op,
                response.content_type.as_deref(),
            )
            .await;
        let data = saved
            .map_err(|e| e.to_string())
            .and_then(|artifact| serde_json::to_value(artifact).map_err(|e| e.to_string()));
        match data {
            Ok(data) => StepResult::success(op, label, data),
            Err(message) => StepResult::failure(op, label, FailureKind::Storage, message, None, None),
        }
    }
}

fn device_failure(op: &str, label: &str, err: DeviceError) -> StepResult {
    let message = err.to_string();
    match err {
        DeviceError::InvalidStep(_) => {
            StepResult::failure(op, label, FailureKind::InvalidStep, message, None, None)
        }
        DeviceError::Status { status, body } => StepResult::failure(
            op,
            label,
            FailureKind::UpstreamStatus,
            message,
            Some(status),
            Some(body),
        ),
        DeviceError::Unreachable(_) => {
            StepResult::failure(op, label, FailureKind::Unreachable, message, None, None)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::time::Duration;

    use axum::extract::Query;
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use camdeck_common::config::Config;
    use camdeck_common::protocol::SavePolicy;
    use serde_json::json;
    use tokio::net::TcpListener;

    pub(crate) const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];

    /// In-process stand-in for a camera's CGI endpoints.
    pub(crate) async fn spawn_device() -> SocketAddr {
        let app = Router::new()
            .route(
                "/cgi-bin/param.cgi",
                get(|Query(q): Query<HashMap<String, String>>| async move { Json(q) }),
            )
            .route(
                "/cgi-bin/fail.cgi",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            )
            .route(
                "/cgi-bin/image.cgi",
                get(|| async { ([(header::CONTENT_TYPE, "image/jpeg")], JPEG) }),
            )
            .route(
                "/cgi-bin/record.cgi",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    let body = format!("{}-{}", q["startTime"], q["endTime"]);
                    ([(header::CONTENT_TYPE, "video/h264")], body)
                }),
            )
            .route(
                "/cgi-bin/auth.cgi",
                get(|headers: HeaderMap| async move {
                    if headers.contains_key(header::AUTHORIZATION) {
                        (StatusCode::OK, "welcome")
                    } else {
                        (StatusCode::UNAUTHORIZED, "login required")
                    }
                }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    pub(crate) fn connection(addr: SocketAddr) -> Connection {
        Connection {
            host: addr.ip().to_string(),
            port: Some(addr.port()),
            ..Default::default()
        }
    }

    pub(crate) fn device() -> DeviceClient {
        let config = Config {
            device_timeout: Duration::from_secs(2),
            binary_timeout: Duration::from_secs(2),
            ..Config::default()
        };
        DeviceClient::new(&config).unwrap()
    }

    fn step(op: &str, path: &str, query: Value) -> Step {
        serde_json::from_value(json!({
            "operationId": op,
            "cgiPath": path,
            "query": query,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_failed_step_does_not_abort_bundle() {
        let addr = spawn_device().await;
        let dir = tempfile::tempdir().unwrap();
        let (device, store, cancel) = (device(), ArtifactStore::new(dir.path()), AtomicBool::new(false));
        let executor = Executor::new(&device, &store, &cancel);

        let steps = vec![
            Ok(step("param.get", "/cgi-bin/param.cgi", json!({"action": "get", "cameraID": 1}))),
            Ok(step("broken", "/cgi-bin/fail.cgi", json!({}))),
            Ok(step("param.again", "/cgi-bin/param.cgi", json!({"action": "again"}))),
        ];
        let outcome = executor.run(&connection(addr), steps).await;

        assert_eq!(outcome.results.len(), 3);
        assert_eq!((outcome.success_count, outcome.failure_count), (2, 1));

        let first = &outcome.results[0];
        assert!(first.ok);
        assert_eq!(first.data, Some(json!({"action": "get", "cameraID": "1"})));

        let second = &outcome.results[1];
        assert!(!second.ok);
        assert_eq!(second.status, Some(500));
        assert_eq!(second.error_kind, Some(FailureKind::UpstreamStatus));
        assert_eq!(second.data, Some(json!("boom")));

        assert!(outcome.results[2].ok);
        assert_eq!(outcome.results[2].operation_id, "param.again");
    }

    #[tokio::test]
    async fn test_binary_step_is_saved() {
        let addr = spawn_device().await;
        let dir = tempfile::tempdir().unwrap();
        let (device, store, cancel) = (device(), ArtifactStore::new(dir.path()), AtomicBool::new(false));
        let executor = Executor::new(&device, &store, &cancel);

        let mut snap = step("image.snapshot", "/cgi-bin/image.cgi", json!({"action": "snapshot"}));
        snap.storage_folder = Some("lobby".into());
        let outcome = executor.run(&connection(addr), vec![Ok(snap)]).await;

        let result = &outcome.results[0];
        assert!(result.ok, "{:?}", result.error);
        let data = result.data.as_ref().unwrap();
        assert_eq!(data["category"], "image");
        assert_eq!(data["folder"], "lobby");
        assert_eq!(data["size"], JPEG.len());
        assert_eq!(data["contentType"], "image/jpeg");

        let filename = data["filename"].as_str().unwrap();
        let stored = std::fs::read(dir.path().join("image/lobby").join(filename)).unwrap();
        assert_eq!(stored, JPEG);
    }

    #[tokio::test]
    async fn test_storage_failure_only_fails_that_step() {
        let addr = spawn_device().await;
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the store root should be.
        let root = dir.path().join("not-a-dir");
        std::fs::write(&root, b"x").unwrap();
        let (device, store, cancel) = (device(), ArtifactStore::new(&root), AtomicBool::new(false));
        let executor = Executor::new(&device, &store, &cancel);

        let steps = vec![
            Ok(step("image.snapshot", "/cgi-bin/image.cgi", json!({}))),
            Ok(step("param.get", "/cgi-bin/param.cgi", json!({"action": "get"}))),
        ];
        let outcome = executor.run(&connection(addr), steps).await;

        assert_eq!((outcome.success_count, outcome.failure_count), (1, 1));
        let saved = &outcome.results[0];
        assert!(!saved.ok);
        assert_eq!(saved.error_kind, Some(FailureKind::Storage));
        assert_eq!(saved.status, None);
        assert!(saved.error.as_deref().is_some_and(|e| !e.is_empty()));
        assert!(outcome.results[1].ok);
        assert!(root.is_file());
    }

    #[tokio::test]
    async fn test_force_no_save_summarizes_binary() {
        let addr = spawn_device().await;
        let dir = tempfile::tempdir().unwrap();
        let (device, store, cancel) = (device(), ArtifactStore::new(dir.path()), AtomicBool::new(false));
        let executor = Executor::new(&device, &store, &cancel);

        let mut snap = step("image.snapshot", "/cgi-bin/image.cgi", json!({}));
        snap.save_to_storage = SavePolicy::ForceNoSave;
        let outcome = executor.run(&connection(addr), vec![Ok(snap)]).await;

        assert!(outcome.results[0].ok);
        assert_eq!(
            outcome.results[0].data,
            Some(json!({"contentType": "image/jpeg", "size": JPEG.len()}))
        );
        assert!(!dir.path().join("image").exists());
    }

    #[tokio::test]
    async fn test_unreachable_device() {
        // Bind then drop to get a port nothing listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let dir = tempfile::tempdir().unwrap();
        let (device, store, cancel) = (device(), ArtifactStore::new(dir.path()), AtomicBool::new(false));
        let executor = Executor::new(&device, &store, &cancel);

        let outcome = executor
            .run(&connection(addr), vec![Ok(step("param.get", "/cgi-bin/param.cgi", json!({})))])
            .await;
        let result = &outcome.results[0];
        assert!(!result.ok);
        assert_eq!(result.error_kind, Some(FailureKind::Unreachable));
        assert_eq!(result.status, None);
    }

    #[tokio::test]
    async fn test_invalid_steps_keep_their_position() {
        let addr = spawn_device().await;
        let dir = tempfile::tempdir().unwrap();
        let (device, store, cancel) = (device(), ArtifactStore::new(dir.path()), AtomicBool::new(false));
        let executor = Executor::new(&device, &store, &cancel);

        let steps = vec![
            parse_step(json!({"operationId": "nopath", "label": "No path"})),
            Ok(step("escape", "/etc/passwd", json!({}))),
            Ok(step("nested", "/cgi-bin/param.cgi", json!({"a": {"b": 1}}))),
            Ok(step("param.get", "/cgi-bin/param.cgi", json!({}))),
        ];
        let outcome = executor.run(&connection(addr), steps).await;

        assert_eq!(outcome.results.len(), 4);
        assert_eq!(outcome.results[0].label, "No path");
        for result in &outcome.results[..3] {
            assert_eq!(result.error_kind, Some(FailureKind::InvalidStep));
        }
        assert!(outcome.results[3].ok);
    }

    #[tokio::test]
    async fn test_credentials_are_sent() {
        let addr = spawn_device().await;
        let dir = tempfile::tempdir().unwrap();
        let (device, store, cancel) = (device(), ArtifactStore::new(dir.path()), AtomicBool::new(false));
        let executor = Executor::new(&device, &store, &cancel);

        let anonymous = connection(addr);
        let authed = Connection {
            username: Some("admin".into()),
            password: Some("pw".into()),
            ..connection(addr)
        };
        let auth_step = || vec![Ok(step("auth", "/cgi-bin/auth.cgi", json!({})))];

        assert_eq!(executor.run(&anonymous, auth_step()).await.results[0].status, Some(401));
        assert!(executor.run(&authed, auth_step()).await.results[0].ok);
    }

    #[tokio::test]
    async fn test_cancelled_bundle_reports_every_step() {
        let addr = spawn_device().await;
        let dir = tempfile::tempdir().unwrap();
        let (device, store, cancel) = (device(), ArtifactStore::new(dir.path()), AtomicBool::new(true));
        let executor = Executor::new(&device, &store, &cancel);

        let steps = vec![
            Ok(step("a", "/cgi-bin/param.cgi", json!({}))),
            Ok(step("b", "/cgi-bin/param.cgi", json!({}))),
        ];
        let outcome = executor.run(&connection(addr), steps).await;
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.failure_count, 2);
        assert!(outcome
            .results
            .iter()
            .all(|r| r.error_kind == Some(FailureKind::Cancelled)));
    }
}
