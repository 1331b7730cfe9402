//! Static table of camera CGI operations.
//!
//! Each entry maps an operation id to its CGI path, HTTP method, fixed
//! query parameters and user-editable fields.  The `artifact` column is
//! what the executor consults to decide whether a response is binary.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::protocol::{SavePolicy, Step};
use crate::schedule::Clip;
use crate::storage::Category;

/// Operation id used for recording playback.
pub const PLAYBACK: &str = "record.playback";

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Number,
    Text,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(untagged)]
pub enum FieldDefault {
    Number(i64),
    Text(&'static str),
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub name: &'static str,
    pub label: &'static str,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<FieldDefault>,
}

impl Field {
    const fn number(name: &'static str, label: &'static str, default: Option<i64>) -> Self {
        let default_value = match default {
            Some(n) => Some(FieldDefault::Number(n)),
            None => None,
        };
        Self {
            name,
            label,
            kind: FieldKind::Number,
            required: true,
            default_value,
        }
    }

    const fn text(name: &'static str, label: &'static str, default: Option<&'static str>) -> Self {
        let default_value = match default {
            Some(s) => Some(FieldDefault::Text(s)),
            None => None,
        };
        Self {
            name,
            label,
            kind: FieldKind::Text,
            required: true,
            default_value,
        }
    }

    const fn optional(self) -> Self {
        Self {
            required: false,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: &'static str,
    pub group: &'static str,
    pub verb: &'static str,
    pub label: &'static str,
    pub cgi_path: &'static str,
    pub method: &'static str,
    #[serde(serialize_with = "params_as_map")]
    pub fixed_params: &'static [(&'static str, &'static str)],
    pub fields: &'static [Field],
    /// Storage category for operations that return a binary body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Category>,
}

fn params_as_map<S: Serializer>(
    params: &&'static [(&'static str, &'static str)],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(params.len()))?;
    for (k, v) in params.iter() {
        map.serialize_entry(k, v)?;
    }
    map.end()
}

const CAMERA_ID: Field = Field::number("cameraID", "Camera ID", Some(1));
const STREAM_ID: Field = Field::number("streamID", "Stream ID", Some(1));

const fn op(
    id: &'static str,
    group: &'static str,
    verb: &'static str,
    label: &'static str,
    cgi_path: &'static str,
    fixed_params: &'static [(&'static str, &'static str)],
    fields: &'static [Field],
) -> Operation {
    Operation {
        id,
        group,
        verb,
        label,
        cgi_path,
        method: "GET",
        fixed_params,
        fields,
        artifact: None,
    }
}

const fn binary(operation: Operation, category: Category) -> Operation {
    Operation {
        artifact: Some(category),
        ..operation
    }
}

const PARAM: &str = "/cgi-bin/param.cgi";
const PTZ: &str = "/cgi-bin/ptz.cgi";
const RECORD: &str = "/cgi-bin/record.cgi";
const IMAGE: &str = "/cgi-bin/image.cgi";
const VIDEO: &str = "/cgi-bin/video.cgi";
const ALARM: &str = "/cgi-bin/alarm.cgi";
const SENSOR: &str = "/cgi-bin/sensor.cgi";
const AUDIO: &str = "/cgi-bin/audio.cgi";
const UPGRADE: &str = "/cgi-bin/upgrade.cgi";
const SYSTEM: &str = "/cgi-bin/system.cgi";
const NETWORK: &str = "/cgi-bin/network.cgi";
const OPERATE: &str = "/cgi-bin/operate.cgi";

/// Playback by time range; the operation every scheduled clip becomes.
#[rustfmt::skip]
pub const PLAYBACK_OPERATION: Operation = binary(
    op(PLAYBACK, "Recording", "operate", "Playback Recording (by time)", RECORD,
        &[("action", "playBack")],
        &[
            CAMERA_ID.optional(),
            Field::text("startTime", "Start Time", None).optional(),
            Field::text("endTime", "End Time", None).optional(),
        ]),
    Category::Recording,
);

#[rustfmt::skip]
pub static OPERATIONS: &[Operation] = &[
    // ── param.cgi ────────────────────────────────────────────────────
    op("param.getDeviceInfo", "Config", "get", "Get Device Info", PARAM,
        &[("action", "get"), ("type", "deviceInfo")], &[]),
    op("param.setDeviceName", "Config", "set", "Set Device Name", PARAM,
        &[("action", "set"), ("type", "deviceInfo")],
        &[Field::text("deviceName", "Device Name", None)]),
    op("param.getLocalNetwork", "Config", "get", "Get Local Network", PARAM,
        &[("action", "get"), ("type", "localNetwork")],
        &[
            Field::number("IPProtoVer", "IP Protocol", Some(1)),
            Field::number("netCardId", "Network Card ID", Some(1)),
        ]),
    op("param.setLocalNetworkIPType", "Config", "set", "Set Local Network IP Type", PARAM,
        &[("action", "set"), ("type", "localNetwork")],
        &[Field::number("IPType", "IP Type", Some(0))]),
    op("param.getNTP", "Config", "get", "Get NTP Settings", PARAM,
        &[("action", "get"), ("type", "NTP")], &[]),
    op("param.setNTP", "Config", "set", "Set NTP Settings", PARAM,
        &[("action", "set"), ("type", "NTP")], &[]),
    // ── ptz.cgi ──────────────────────────────────────────────────────
    op("ptz.getCapabilities", "PTZ", "get", "Get PTZ Capabilities", PTZ,
        &[("action", "get"), ("type", "ptzCap")], &[CAMERA_ID]),
    op("ptz.up", "PTZ", "operate", "Move Up", PTZ, &[("action", "up")], &[CAMERA_ID]),
    op("ptz.down", "PTZ", "operate", "Move Down", PTZ, &[("action", "down")], &[CAMERA_ID]),
    op("ptz.left", "PTZ", "operate", "Move Left", PTZ, &[("action", "left")], &[CAMERA_ID]),
    op("ptz.right", "PTZ", "operate", "Move Right", PTZ, &[("action", "right")], &[CAMERA_ID]),
    op("ptz.stop", "PTZ", "operate", "Stop Movement", PTZ, &[("action", "stop")], &[CAMERA_ID]),
    op("ptz.zoomTele", "PTZ", "operate", "Zoom Tele", PTZ,
        &[("action", "zoomTele")], &[CAMERA_ID]),
    op("ptz.zoomWide", "PTZ", "operate", "Zoom Wide", PTZ,
        &[("action", "zoomWide")], &[CAMERA_ID]),
    op("ptz.rotate", "PTZ", "operate", "Rotate (pan/tilt/zoom)", PTZ,
        &[("action", "rotate")],
        &[
            CAMERA_ID,
            Field::number("pan", "Pan", None),
            Field::number("tilt", "Tilt", None),
            Field::number("z", "Zoom", None),
            Field::number("timeInterval", "Time Interval", None),
        ]),
    op("ptz.presetAdd", "PTZ", "operate", "Preset: Add", PTZ,
        &[("action", "presetAdd")],
        &[
            CAMERA_ID,
            Field::number("presetID", "Preset ID", None),
            Field::text("presetName", "Preset Name", None),
        ]),
    op("ptz.presetInvoke", "PTZ", "operate", "Preset: Invoke", PTZ,
        &[("action", "presetInvoke")],
        &[CAMERA_ID, Field::number("presetID", "Preset ID", None)]),
    op("ptz.listPreset", "PTZ", "get", "Preset: List", PTZ,
        &[("action", "listPreset")], &[CAMERA_ID]),
    // ── record.cgi ───────────────────────────────────────────────────
    op("record.queryByTime", "Recording", "get", "Query Recordings by Time", RECORD,
        &[("action", "query")],
        &[
            CAMERA_ID,
            Field::text("startTime", "Start Time", None),
            Field::text("endTime", "End Time", None),
        ]),
    PLAYBACK_OPERATION,
    // ── image.cgi ────────────────────────────────────────────────────
    binary(
        op("image.snapshot", "Snapshot", "get", "Snapshot (image.cgi)", IMAGE, &[],
            &[CAMERA_ID, Field::number("quality", "Quality (1-10)", Some(5))]),
        Category::Image,
    ),
    binary(
        op("image.snapStream", "Snapshot", "get", "Snapshot from Stream", IMAGE,
            &[("type", "snap")],
            &[CAMERA_ID, STREAM_ID, Field::number("quality", "Quality", Some(5))]),
        Category::Image,
    ),
    // ── video.cgi ────────────────────────────────────────────────────
    op("video.rtsp", "Video", "stream", "RTSP Stream URL", VIDEO,
        &[("type", "RTSP")], &[CAMERA_ID, STREAM_ID]),
    op("video.http", "Video", "stream", "HTTP Stream URL", VIDEO,
        &[("type", "HTTP")], &[CAMERA_ID, STREAM_ID]),
    // ── alarm.cgi ────────────────────────────────────────────────────
    op("alarm.getCurrentStatus", "Alarm", "get", "Get Current Alarm Status", ALARM,
        &[("action", "get"), ("type", "currentAlarmStatus")], &[]),
    op("alarm.attach", "Alarm", "operate", "Attach Alarm Stream", ALARM,
        &[("action", "attach")], &[]),
    op("alarm.manual", "Alarm", "operate", "Manual Alarm", ALARM,
        &[("action", "manual")],
        &[
            Field::number("alarmInID", "Alarm In ID", None),
            Field::number("alarmFlag", "Alarm Flag", None),
            Field::number("AlarmSourceType", "Alarm Source Type", None),
        ]),
    // ── sensor.cgi ───────────────────────────────────────────────────
    op("sensor.getZoomFocus", "Sensor", "get", "Get Zoom/Focus", SENSOR,
        &[("action", "get"), ("type", "zoomFocus")], &[CAMERA_ID]),
    op("sensor.setZoomFocus", "Sensor", "set", "Set Zoom/Focus", SENSOR,
        &[("action", "set"), ("type", "zoomFocus")],
        &[
            CAMERA_ID,
            Field::number("Zoom", "Zoom", None),
            Field::number("Focus", "Focus", None),
        ]),
    // ── audio.cgi ────────────────────────────────────────────────────
    op("audio.recv", "Audio", "stream", "Receive Audio", AUDIO,
        &[("action", "recv")],
        &[
            CAMERA_ID,
            STREAM_ID,
            Field::text("EncoderType", "Encoder Type", Some("G.711")).optional(),
        ]),
    op("audio.play", "Audio", "stream", "Play Audio", AUDIO,
        &[("action", "play")],
        &[CAMERA_ID, Field::text("EncoderType", "Encoder Type", Some("G.711")).optional()]),
    // ── upgrade.cgi ──────────────────────────────────────────────────
    op("upgrade.getUpdateStatus", "Upgrade", "get", "Get Update Status", UPGRADE,
        &[("action", "get"), ("type", "UpdateStatus")],
        &[Field::number("FlashSpace", "Flash Space", None).optional()]),
    op("upgrade.getUpdateOver", "Upgrade", "get", "Get Update Over", UPGRADE,
        &[("action", "get"), ("type", "UpdateOver")], &[]),
    // ── system.cgi ───────────────────────────────────────────────────
    op("system.testNTP", "System", "test", "Test NTP", SYSTEM,
        &[("action", "test"), ("type", "NTP")],
        &[
            Field::text("NtpServer", "NTP Server", Some("ntp.aliyun.com")).optional(),
            Field::number("NtpPort", "NTP Port", Some(123)).optional(),
            Field::number("NtpTimeDiff", "Time Diff", Some(60)).optional(),
            Field::number("NtpTimeOut", "Timeout", Some(5)).optional(),
        ]),
    // ── network.cgi ──────────────────────────────────────────────────
    op("network.getLocalNetwork", "Network", "get", "Get Local Network", NETWORK,
        &[("action", "get"), ("type", "localNetwork")], &[]),
    op("network.setLocalNetworkIPType", "Network", "set", "Set Local Network IP Type", NETWORK,
        &[("action", "set"), ("type", "localNetwork")],
        &[Field::number("IPType", "IP Type", Some(0))]),
    // ── operate.cgi ──────────────────────────────────────────────────
    op("operate.deviceReset", "Operate", "operate", "Device Reset", OPERATE,
        &[("action", "deviceReset")], &[]),
    op("operate.deviceRestart", "Operate", "operate", "Device Restart", OPERATE,
        &[("action", "deviceRestart")], &[]),
    op("operate.timingRestart", "Operate", "operate", "Timing Restart", OPERATE,
        &[("action", "timingRestart")],
        &[Field::text("timingRestartTime", "Restart Time (HH:MM:SS)", Some("03:00:00"))]),
    op("operate.formatDisk", "Operate", "operate", "Format Disk", OPERATE,
        &[("action", "format")], &[Field::number("diskID", "Disk ID", Some(1))]),
    op("operate.deviceDefault", "Operate", "operate", "Restore Default", OPERATE,
        &[("action", "default")], &[Field::number("defaultType", "Default Type", Some(0))]),
];

pub fn find(id: &str) -> Option<&'static Operation> {
    OPERATIONS.iter().find(|op| op.id == id)
}

/// Storage category of an operation's response, if it is binary.
pub fn artifact_kind(id: &str) -> Option<Category> {
    find(id).and_then(|op| op.artifact)
}

/// Wrap a scheduled clip into a playback step.
///
/// The query is the operation's fixed parameters plus the clip's camera,
/// start and end; any other field with a default gets that default.
pub fn playback_step(clip: &Clip, save: SavePolicy, storage_folder: Option<String>) -> Step {
    let op = &PLAYBACK_OPERATION;
    let mut query = BTreeMap::new();
    for (k, v) in op.fixed_params {
        query.insert((*k).to_string(), Value::from(*v));
    }
    for field in op.fields {
        let value = match field.name {
            "cameraID" => Value::from(clip.camera_id),
            "streamID" => Value::from(clip.stream_id),
            "startTime" => Value::from(clip.start_time.to_string()),
            "endTime" => Value::from(clip.end_time.to_string()),
            _ => match field.default_value {
                Some(FieldDefault::Number(n)) => Value::from(n),
                Some(FieldDefault::Text(s)) => Value::from(s),
                None => continue,
            },
        };
        query.insert(field.name.to_string(), value);
    }

    Step {
        operation_id: op.id.to_string(),
        label: Some(format!(
            "{} - {} to {}",
            op.label, clip.start_time, clip.end_time
        )),
        path: op.cgi_path.to_string(),
        method: op.method.to_string(),
        query,
        save_to_storage: save,
        storage_folder,
        body: None,
    }
}
