//! Firmware integrity gate.
//!
//! An upload is streamed into a hidden `.part` file while it is hashed.
//! Only when the caller's SHA-256 matches is the file linked into place
//! under a free name; every other outcome, including the request being
//! dropped mid-stream, removes the partial file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use camdeck_common::checksum::{self, ChecksumError, StreamingDigest};
use camdeck_common::storage;

use crate::artifact::file_stamp;

static UPLOAD_SEQ: AtomicU64 = AtomicU64::new(0);

/// Give up after this many `-N` suffixes for one name.
const MAX_SUFFIX: u32 = 1000;

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Checksum(#[from] ChecksumError),
    #[error("empty firmware file")]
    Empty,
    #[error("firmware too large: more than {0} bytes")]
    TooLarge(u64),
    #[error("firmware storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Path(#[from] storage::PathError),
}

/// A firmware image that passed verification.
#[derive(Debug, Clone)]
pub struct AcceptedFirmware {
    pub filename: String,
    pub original_name: String,
    pub size: u64,
    pub checksum: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FirmwareGate {
    dir: PathBuf,
    max_bytes: u64,
}

impl FirmwareGate {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Open a `.part` file for a new upload.
    pub async fn begin(&self, original_name: &str) -> Result<PendingUpload, GateError> {
        fs::create_dir_all(&self.dir).await?;
        let part_name = format!(
            ".upload-{}-{}.part",
            std::process::id(),
            UPLOAD_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let part_path = storage::resolve(&self.dir, &[part_name.as_str()])?;
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&part_path)
            .await?;

        Ok(PendingUpload {
            dir: self.dir.clone(),
            max_bytes: self.max_bytes,
            part_path,
            file: Some(file),
            digest: StreamingDigest::new(),
            original_name: original_name.to_string(),
            settled: false,
        })
    }
}

/// An upload in progress.  Dropping it without [`PendingUpload::finish`]
/// deletes the partial file.
pub struct PendingUpload {
    dir: PathBuf,
    max_bytes: u64,
    part_path: PathBuf,
    file: Option<File>,
    digest: StreamingDigest,
    original_name: String,
    settled: bool,
}

impl PendingUpload {
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), GateError> {
        if self.digest.len() + chunk.len() as u64 > self.max_bytes {
            return Err(GateError::TooLarge(self.max_bytes));
        }
        self.digest.update(chunk);
        if let Some(file) = self.file.as_mut() {
            file.write_all(chunk).await?;
        }
        Ok(())
    }

    /// Verify against `expected` and, on a match, move the file into place.
    pub async fn finish(mut self, expected: Option<&str>) -> Result<AcceptedFirmware, GateError> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        if self.digest.is_empty() {
            return Err(GateError::Empty);
        }

        let size = self.digest.len();
        let digest = std::mem::take(&mut self.digest);
        let actual = digest.finalize_hex();
        if let Err(e) = checksum::verify(expected, &actual) {
            warn!("Rejected firmware {:?}: {e}", self.original_name);
            return Err(e.into());
        }

        let stamp = storage::sanitize_segment(&file_stamp(Utc::now())).unwrap_or_default();
        let name = storage::sanitize_segment(&self.original_name)
            .unwrap_or_else(|| "firmware.bin".into());
        let (filename, path) =
            link_unique(&self.part_path, &self.dir, &format!("{stamp}_{name}")).await?;
        fs::remove_file(&self.part_path).await?;
        self.settled = true;

        info!("Accepted firmware {:?} ({size} bytes) as {filename}", self.original_name);
        Ok(AcceptedFirmware {
            filename,
            original_name: self.original_name.clone(),
            size,
            checksum: actual,
            path,
        })
    }
}

/// Hard-link `part` into `dir` under `filename`, or `stem-N.ext` when that
/// name is taken.  Linking fails on an existing target, unlike a rename.
async fn link_unique(part: &Path, dir: &Path, filename: &str) -> Result<(String, PathBuf), GateError> {
    for n in 0..MAX_SUFFIX {
        let candidate = match (n, filename.rsplit_once('.')) {
            (0, _) => filename.to_string(),
            (_, Some((stem, ext))) if !stem.is_empty() => format!("{stem}-{n}.{ext}"),
            _ => format!("{filename}-{n}"),
        };
        let path = storage::resolve(dir, &[candidate.as_str()])?;
        match fs::hard_link(part, &path).await {
            Ok(()) => return Ok((candidate, path)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("no free name for {filename}"),
    )
    .into())
}

impl Drop for PendingUpload {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.file.take();
        if let Err(e) = std::fs::remove_file(&self.part_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Cannot remove {}: {e}", self.part_path.display());
            }
        }
    }
}
