//! Configuration parsing – reads a KEY=VALUE file (`camdeck.conf`).
//!
//! Lines starting with `#` are comments, values may be double-quoted and
//! unknown keys are ignored, so one file can be shared across deployments.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // ── network ──────────────────────────────────────────────────────
    /// Address the gateway HTTP server listens on.
    pub listen_addr: String,

    // ── storage ──────────────────────────────────────────────────────
    /// Root of the artifact store; categories are subdirectories.
    pub storage_dir: PathBuf,
    /// Request body limit for firmware uploads, in bytes.
    pub max_firmware_bytes: usize,

    // ── device calls ─────────────────────────────────────────────────
    /// Timeout for structured (non-binary) device requests.
    pub device_timeout: Duration,
    /// Timeout for binary requests such as playback downloads.
    pub binary_timeout: Duration,
    /// Lift the `/cgi-bin/` restriction on step paths.
    pub allow_any_path: bool,
}

impl Config {
    /// Default config path.
    pub fn default_path() -> &'static str {
        "/etc/camdeck/camdeck.conf"
    }

    /// Where accepted firmware images are kept.
    pub fn firmware_dir(&self) -> PathBuf {
        self.storage_dir.join(crate::storage::Category::Firmware.dir_name())
    }
}

impl Default for Config {
    fn default() -> Self {
        from_map(&HashMap::new())
    }
}

/// Parse a `KEY=VALUE` configuration file.
pub fn load(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read config: {}", path.display()))?;

    let map = parse_conf(&text);
    info!("Loaded config from {}", path.display());
    Ok(from_map(&map))
}

fn from_map(map: &HashMap<String, String>) -> Config {
    let get = |key: &str| -> Option<String> { map.get(key).cloned() };
    let get_u64 = |key: &str, default: u64| -> u64 {
        get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    };

    Config {
        listen_addr: get("LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into()),
        storage_dir: PathBuf::from(get("STORAGE_DIR").unwrap_or_else(|| "storage".into())),
        max_firmware_bytes: usize::try_from(
            get_u64("MAX_FIRMWARE_MB", 256).saturating_mul(1024 * 1024),
        )
        .unwrap_or(usize::MAX),
        device_timeout: Duration::from_millis(get_u64("DEVICE_TIMEOUT_MS", 5000)),
        binary_timeout: Duration::from_secs(get_u64("BINARY_TIMEOUT_SECS", 120)),
        allow_any_path: get("ALLOW_ANY_PATH")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false),
    }
}

/// Parse `KEY=VALUE` lines into a map, stripping optional double-quotes.
fn parse_conf(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, val)) = line.split_once('=') {
            let key = key.trim();
            let val = val.trim().trim_matches('"');
            map.insert(key.to_string(), val.to_string());
        }
    }
    map
}

// ─── tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_conf() {
        let text = r#"
# comment
LISTEN_ADDR="127.0.0.1:9090"
STORAGE_DIR=/srv/camdeck
DEVICE_TIMEOUT_MS = 2500
"#;
        let map = parse_conf(text);
        assert_eq!(map["LISTEN_ADDR"], "127.0.0.1:9090");
        assert_eq!(map["STORAGE_DIR"], "/srv/camdeck");
        assert_eq!(map["DEVICE_TIMEOUT_MS"], "2500");
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.listen_addr, "0.0.0.0:3000");
        assert_eq!(config.device_timeout, Duration::from_millis(5000));
        assert_eq!(config.binary_timeout, Duration::from_secs(120));
        assert_eq!(config.max_firmware_bytes, 256 * 1024 * 1024);
        assert!(!config.allow_any_path);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camdeck.conf");
        std::fs::write(&path, "STORAGE_DIR=/tmp/camdeck\nALLOW_ANY_PATH=true\nMAX_FIRMWARE_MB=8\n")
            .unwrap();
        let config = load(&path).unwrap();
        assert_eq!(config.storage_dir, PathBuf::from("/tmp/camdeck"));
        assert_eq!(config.firmware_dir(), PathBuf::from("/tmp/camdeck/firmware"));
        assert_eq!(config.max_firmware_bytes, 8 * 1024 * 1024);
        assert!(config.allow_any_path);
    }

    #[test]
    fn test_huge_firmware_limit_saturates() {
        let map = HashMap::from([("MAX_FIRMWARE_MB".to_string(), u64::MAX.to_string())]);
        assert_eq!(from_map(&map).max_firmware_bytes, usize::MAX);

        let map = HashMap::from([("MAX_FIRMWARE_MB".to_string(), "not a number".to_string())]);
        assert_eq!(from_map(&map).max_firmware_bytes, 256 * 1024 * 1024);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(load(Path::new("/nonexistent/camdeck.conf")).is_err());
    }
}
