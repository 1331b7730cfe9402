//! HTTP surface of the gateway.
//!
//! Routes:
//!   GET  /health                 → health check
//!   GET  /operations             → operation catalog
//!   POST /bundle                 → run an ordered list of device steps
//!   POST /recording-automation   → download a list of scheduled clips
//!   POST /schedule/preview       → plan clips without touching a device
//!   POST /schedule/steps         → plan clips and export them as steps
//!   POST /firmware/upload        → checksum-gated firmware upload
//!   GET  /storage                → category listing
//!   GET  /storage/{*path}        → directory listing or file download

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use camdeck_common::catalog::{self, Operation};
use camdeck_common::config::Config;
use camdeck_common::protocol::{
    AutomationResponse, BundleResponse, ClipOrder, Connection, FirmwareUploadResponse,
    HealthResponse, SavePolicy, SchedulePreview, StepExport, StepExportMetadata,
    StepExportRequest,
};
use camdeck_common::schedule::{self, ScheduleRequest};
use camdeck_common::storage;

use crate::artifact::ArtifactStore;
use crate::browse;
use crate::device::DeviceClient;
use crate::error::ApiError;
use crate::executor::{self, Executor};
use crate::firmware::{FirmwareGate, GateError};

/// Version tag of exported step documents.
const STEP_EXPORT_VERSION: &str = "1.0";

/// Shared state for route handlers.
#[derive(Clone)]
pub struct AppState {
    device: DeviceClient,
    store: ArtifactStore,
    firmware: FirmwareGate,
    start_time: Instant,
    shutdown: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(config: &Config, shutdown: Arc<AtomicBool>) -> anyhow::Result<Self> {
        Ok(Self {
            device: DeviceClient::new(config)?,
            store: ArtifactStore::new(&config.storage_dir),
            firmware: FirmwareGate::new(
                config.firmware_dir(),
                u64::try_from(config.max_firmware_bytes).unwrap_or(u64::MAX),
            ),
            start_time: Instant::now(),
            shutdown,
        })
    }

    fn executor(&self) -> Executor<'_> {
        Executor::new(&self.device, &self.store, &self.shutdown)
    }
}

pub fn router(state: AppState, max_firmware_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/operations", get(operations))
        .route("/bundle", post(run_bundle))
        .route("/recording-automation", post(recording_automation))
        .route("/schedule/preview", post(schedule_preview))
        .route("/schedule/steps", post(schedule_steps))
        .route(
            "/firmware/upload",
            // Multipart framing on top of the file itself.
            post(firmware_upload)
                .layer(DefaultBodyLimit::max(max_firmware_bytes.saturating_add(64 * 1024))),
        )
        .route("/storage", get(storage_root))
        .route("/storage/{*path}", get(storage_path))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server. Blocks until shutdown.
pub async fn run(config: &Config, shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    let state = AppState::new(config, shutdown.clone())?;
    state.store.init().await?;
    info!("Firmware uploads go to {}", state.firmware.dir().display());
    let app = router(state, config.max_firmware_bytes);

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("Gateway listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
            }
        })
        .await?;

    Ok(())
}

// ── route handlers ───────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn operations() -> Json<&'static [Operation]> {
    Json(catalog::OPERATIONS)
}

#[derive(Deserialize)]
struct BundleRequest {
    connection: Option<Connection>,
    steps: Option<Value>,
}

async fn run_bundle(
    State(state): State<AppState>,
    body: Result<Json<BundleRequest>, JsonRejection>,
) -> Result<Json<BundleResponse>, ApiError> {
    let Json(req) = body?;
    let connection = req
        .connection
        .ok_or_else(|| ApiError::bad_request("connection is required"))?;
    let Some(Value::Array(raw_steps)) = req.steps else {
        return Err(ApiError::bad_request("steps must be a list"));
    };

    info!("Bundle of {} steps for {}", raw_steps.len(), connection.base_url());
    let steps = raw_steps.into_iter().map(executor::parse_step).collect();
    let outcome = state.executor().run(&connection, steps).await;

    Ok(Json(BundleResponse {
        success: outcome.failure_count == 0,
        total_steps: outcome.results.len(),
        success_count: outcome.success_count,
        failure_count: outcome.failure_count,
        results: outcome.results,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AutomationRequest {
    connection: Option<Connection>,
    clips: Option<Value>,
    #[serde(default)]
    storage_folder: Option<String>,
}

async fn recording_automation(
    State(state): State<AppState>,
    body: Result<Json<AutomationRequest>, JsonRejection>,
) -> Result<Json<AutomationResponse>, ApiError> {
    let Json(req) = body?;
    let connection = req
        .connection
        .ok_or_else(|| ApiError::bad_request("connection is required"))?;
    let raw_clips = match req.clips {
        Some(Value::Array(clips)) if !clips.is_empty() => clips,
        _ => return Err(ApiError::bad_request("clips must be a non-empty list")),
    };

    let mut orders = Vec::with_capacity(raw_clips.len());
    for (i, raw) in raw_clips.into_iter().enumerate() {
        let order: ClipOrder = serde_json::from_value(raw)
            .map_err(|e| ApiError::bad_request(format!("clip {i}: {e}")))?;
        if order.clip.start_time >= order.clip.end_time {
            return Err(ApiError::bad_request(format!(
                "clip {i}: startTime must be before endTime"
            )));
        }
        orders.push(order);
    }

    let request_folder = req.storage_folder.as_deref().and_then(storage::sanitize_segment);
    let steps = orders
        .iter()
        .map(|order| {
            let folder = order
                .storage_folder
                .as_deref()
                .and_then(storage::sanitize_segment)
                .or_else(|| request_folder.clone());
            Ok(catalog::playback_step(&order.clip, SavePolicy::ForceSave, folder))
        })
        .collect();

    info!("Recording automation: {} clips", orders.len());
    let outcome = state.executor().run(&connection, steps).await;

    Ok(Json(AutomationResponse {
        success: outcome.failure_count == 0,
        total_clips: orders.len(),
        success_count: outcome.success_count,
        failure_count: outcome.failure_count,
        storage_folder: request_folder,
        results: outcome.results,
    }))
}

fn plan_clips(req: &ScheduleRequest) -> Result<Vec<schedule::Clip>, ApiError> {
    schedule::plan(req).map_err(|e| ApiError::bad_request(e.to_string()))
}

async fn schedule_preview(
    body: Result<Json<ScheduleRequest>, JsonRejection>,
) -> Result<Json<SchedulePreview>, ApiError> {
    let Json(req) = body?;
    let clips = plan_clips(&req)?;
    Ok(Json(SchedulePreview {
        total_clips: clips.len(),
        clips,
    }))
}

async fn schedule_steps(
    body: Result<Json<StepExportRequest>, JsonRejection>,
) -> Result<Json<StepExport>, ApiError> {
    let Json(req) = body?;
    let clips = plan_clips(&req.schedule)?;
    let save = SavePolicy::from(req.save_to_storage);
    let folder = req.storage_folder.as_deref().and_then(storage::sanitize_segment);
    let steps = clips
        .iter()
        .map(|clip| catalog::playback_step(clip, save, folder.clone()))
        .collect();

    Ok(Json(StepExport {
        version: STEP_EXPORT_VERSION.to_string(),
        exported_at: Utc::now().to_rfc3339(),
        metadata: StepExportMetadata {
            schedule: req.schedule,
            total_clips: clips.len(),
        },
        steps,
    }))
}

async fn firmware_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<FirmwareUploadResponse>, ApiError> {
    let mut pending = None;
    let mut expected: Option<String> = None;

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "firmware" => {
                let original = field
                    .file_name()
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or("firmware.bin")
                    .to_string();
                let mut upload = state.firmware.begin(&original).await.map_err(gate_error)?;
                while let Some(chunk) = field.chunk().await? {
                    upload.write(&chunk).await.map_err(gate_error)?;
                }
                pending = Some(upload);
            }
            "checksum" => expected = Some(field.text().await?),
            _ => {}
        }
    }

    let upload = pending.ok_or_else(|| ApiError::bad_request("no firmware file provided"))?;
    let accepted = upload
        .finish(expected.as_deref())
        .await
        .map_err(gate_error)?;
    info!("Firmware stored at {}", accepted.path.display());

    Ok(Json(FirmwareUploadResponse {
        success: true,
        filename: accepted.filename,
        original_name: accepted.original_name,
        size: accepted.size,
        checksum: accepted.checksum,
        message: "Firmware uploaded and verified".to_string(),
    }))
}

fn gate_error(err: GateError) -> ApiError {
    match err {
        GateError::Checksum(_) | GateError::Empty => ApiError::bad_request(err.to_string()),
        GateError::TooLarge(_) => ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, err.to_string()),
        GateError::Io(_) | GateError::Path(_) => ApiError::internal(err.to_string()),
    }
}

async fn storage_root(State(state): State<AppState>) -> Result<Response, ApiError> {
    let root = browse::list_categories(state.store.root()).await?;
    Ok(Json(root).into_response())
}

async fn storage_path(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    browse::open(state.store.root(), &path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use camdeck_common::checksum::sha256_hex;
    use serde_json::json;

    use crate::executor::tests::{connection, spawn_device};

    struct Gateway {
        base: String,
        http: reqwest::Client,
        _storage: tempfile::TempDir,
        storage: std::path::PathBuf,
    }

    async fn spawn_gateway() -> Gateway {
        let storage = tempfile::tempdir().unwrap();
        let config = Config {
            storage_dir: storage.path().to_path_buf(),
            ..Config::default()
        };
        let state = AppState::new(&config, Arc::new(AtomicBool::new(false))).unwrap();
        state.store.init().await.unwrap();
        let app = router(state, config.max_firmware_bytes);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Gateway {
            base: format!("http://{addr}"),
            http: reqwest::Client::new(),
            storage: storage.path().to_path_buf(),
            _storage: storage,
        }
    }

    impl Gateway {
        async fn post(&self, path: &str, body: Value) -> (u16, Value) {
            let resp = self
                .http
                .post(format!("{}{path}", self.base))
                .json(&body)
                .send()
                .await
                .unwrap();
            let status = resp.status().as_u16();
            (status, resp.json().await.unwrap())
        }

        async fn get(&self, path: &str) -> reqwest::Response {
            self.http
                .get(format!("{}{path}", self.base))
                .send()
                .await
                .unwrap()
        }
    }

    fn conn_json(addr: SocketAddr) -> Value {
        serde_json::to_value(connection(addr)).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_operations() {
        let gw = spawn_gateway().await;
        let health: Value = gw.get("/health").await.json().await.unwrap();
        assert_eq!(health["status"], "ok");

        let ops: Vec<Value> = gw.get("/operations").await.json().await.unwrap();
        assert!(ops.iter().any(|op| op["id"] == catalog::PLAYBACK));
    }

    #[tokio::test]
    async fn test_bundle_validation() {
        let gw = spawn_gateway().await;

        let (status, body) = gw.post("/bundle", json!({"steps": []})).await;
        assert_eq!(status, 400);
        assert_eq!(body["success"], false);

        let (status, _) = gw
            .post("/bundle", json!({"connection": {"host": "cam"}, "steps": "nope"}))
            .await;
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn test_bundle_runs_in_order() {
        let device = spawn_device().await;
        let gw = spawn_gateway().await;

        let (status, body) = gw
            .post(
                "/bundle",
                json!({
                    "connection": conn_json(device),
                    "steps": [
                        {"operationId": "param.get", "cgiPath": "/cgi-bin/param.cgi", "query": {"action": "get"}},
                        {"operationId": "broken", "cgiPath": "/cgi-bin/fail.cgi"},
                        {"operationId": "missing-path"},
                    ],
                }),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["totalSteps"], 3);
        assert_eq!(body["successCount"], 1);
        assert_eq!(body["failureCount"], 2);
        assert_eq!(body["success"], false);
        let results = body["results"].as_array().unwrap();
        assert_eq!(results[0]["data"]["action"], "get");
        assert_eq!(results[1]["status"], 500);
        assert_eq!(results[2]["errorKind"], "invalid_step");
    }

    #[tokio::test]
    async fn test_recording_automation_folders() {
        let device = spawn_device().await;
        let gw = spawn_gateway().await;

        let (status, body) = gw
            .post(
                "/recording-automation",
                json!({
                    "connection": conn_json(device),
                    "storageFolder": "night run",
                    "clips": [
                        {"date": "2025-11-19", "startTime": "20251119000000", "endTime": "20251119000500",
                         "cameraID": 1, "streamID": 1},
                        {"date": "2025-11-19", "startTime": "20251119120000", "endTime": "20251119120500",
                         "cameraID": 1, "streamID": 1, "storageFolder": "noon"},
                    ],
                }),
            )
            .await;
        assert_eq!(status, 200, "{body}");
        assert_eq!(body["totalClips"], 2);
        assert_eq!(body["successCount"], 2);
        assert_eq!(body["storageFolder"], "night_run");

        let first = &body["results"][0]["data"];
        assert_eq!(first["category"], "recording");
        assert_eq!(first["folder"], "night_run");
        let second = &body["results"][1]["data"];
        assert_eq!(second["folder"], "noon");

        let saved = std::fs::read_to_string(
            gw.storage
                .join("recording/noon")
                .join(second["filename"].as_str().unwrap()),
        )
        .unwrap();
        assert_eq!(saved, "20251119120000-20251119120500");
    }

    #[tokio::test]
    async fn test_recording_automation_rejects_bad_input() {
        let gw = spawn_gateway().await;
        let conn = json!({"host": "127.0.0.1"});

        let (status, _) = gw
            .post("/recording-automation", json!({"connection": conn, "clips": []}))
            .await;
        assert_eq!(status, 400);

        let (status, _) = gw
            .post(
                "/recording-automation",
                json!({"connection": conn, "clips": [
                    {"date": "2025-11-19", "startTime": "20251119000500", "endTime": "20251119000000"}
                ]}),
            )
            .await;
        assert_eq!(status, 400);
    }

    #[tokio::test]
    async fn test_schedule_preview_and_export() {
        let gw = spawn_gateway().await;
        let schedule = json!({
            "startDate": "2025-11-19",
            "endDate": "2025-11-20",
            "startTimeOfDay": "10:00",
            "endTimeOfDay": "18:00",
            "frequencyMode": "everyNHours",
            "frequencyValue": 3,
            "clipDuration": 5,
        });

        let (status, preview) = gw.post("/schedule/preview", schedule.clone()).await;
        assert_eq!(status, 200, "{preview}");
        assert_eq!(preview["totalClips"], 6);
        assert_eq!(preview["clips"][0]["startTime"], "20251119100000");

        let mut export_req = schedule.clone();
        export_req["storageFolder"] = json!("batch");
        let (status, export) = gw.post("/schedule/steps", export_req).await;
        assert_eq!(status, 200, "{export}");
        assert_eq!(export["version"], "1.0");
        assert_eq!(export["metadata"]["totalClips"], 6);
        assert_eq!(export["steps"].as_array().unwrap().len(), 6);
        assert_eq!(export["steps"][0]["operationId"], catalog::PLAYBACK);
        assert_eq!(export["steps"][0]["storageFolder"], "batch");

        let mut bad = schedule;
        bad["frequencyValue"] = json!(0);
        let (status, _) = gw.post("/schedule/preview", bad).await;
        assert_eq!(status, 400);

        let oversized = json!({
            "startDate": "2025-01-01",
            "endDate": "2025-01-02",
            "startTimeOfDay": "00:00",
            "endTimeOfDay": "23:59",
            "frequencyMode": "timesPerDay",
            "frequencyValue": 86_400,
            "clipDuration": 1,
        });
        let (status, body) = gw.post("/schedule/preview", oversized).await;
        assert_eq!(status, 400);
        assert!(body["error"].as_str().unwrap().contains("clips"), "{body}");
    }

    #[tokio::test]
    async fn test_router_with_unbounded_firmware_limit() {
        let storage = tempfile::tempdir().unwrap();
        let config = Config {
            storage_dir: storage.path().to_path_buf(),
            max_firmware_bytes: usize::MAX,
            ..Config::default()
        };
        let state = AppState::new(&config, Arc::new(AtomicBool::new(false))).unwrap();
        let _app = router(state, config.max_firmware_bytes);
    }

    fn multipart_body(image: &[u8], checksum: &str) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            b"--XBOUNDARY\r\nContent-Disposition: form-data; name=\"checksum\"\r\n\r\n",
        );
        body.extend_from_slice(checksum.as_bytes());
        body.extend_from_slice(
            b"\r\n--XBOUNDARY\r\nContent-Disposition: form-data; name=\"firmware\"; filename=\"cam.bin\"\r\n\
              Content-Type: application/octet-stream\r\n\r\n",
        );
        body.extend_from_slice(image);
        body.extend_from_slice(b"\r\n--XBOUNDARY--\r\n");
        body
    }

    async fn upload(gw: &Gateway, image: &[u8], checksum: &str) -> (u16, Value) {
        let resp = gw
            .http
            .post(format!("{}/firmware/upload", gw.base))
            .header("content-type", "multipart/form-data; boundary=XBOUNDARY")
            .body(multipart_body(image, checksum))
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    #[tokio::test]
    async fn test_firmware_upload_gate() {
        let gw = spawn_gateway().await;
        let image = b"\x7fFW\x00\x01image-bytes";

        let (status, body) = upload(&gw, image, "deadbeef").await;
        assert_eq!(status, 400);
        assert_eq!(body["success"], false);
        let firmware_dir = gw.storage.join("firmware");
        assert_eq!(std::fs::read_dir(&firmware_dir).unwrap().count(), 0);

        let (status, body) = upload(&gw, image, &sha256_hex(image)).await;
        assert_eq!(status, 200, "{body}");
        assert_eq!(body["originalName"], "cam.bin");
        assert_eq!(body["size"], image.len());
        let filename = body["filename"].as_str().unwrap();
        assert_eq!(std::fs::read(firmware_dir.join(filename)).unwrap(), image);
    }

    #[tokio::test]
    async fn test_storage_browsing() {
        let gw = spawn_gateway().await;
        std::fs::create_dir_all(gw.storage.join("image/lobby")).unwrap();
        std::fs::write(gw.storage.join("image/lobby/a.jpg"), b"jpeg").unwrap();

        let root: Value = gw.get("/storage").await.json().await.unwrap();
        assert_eq!(root["categories"], json!(["image", "recording", "other", "firmware"]));

        let listing: Value = gw.get("/storage/image").await.json().await.unwrap();
        assert_eq!(listing["subdirectories"], json!(["lobby"]));

        let file = gw.get("/storage/image/lobby/a.jpg").await;
        assert_eq!(file.status(), 200);
        assert_eq!(file.headers()["content-type"], "image/jpeg");
        assert_eq!(file.bytes().await.unwrap().as_ref(), b"jpeg");

        assert_eq!(gw.get("/storage/image/..%2F..%2Fetc").await.status(), 400);
        assert_eq!(gw.get("/storage/image/a%5Cb").await.status(), 400);
        assert_eq!(gw.get("/storage/nope").await.status(), 404);
    }
}
