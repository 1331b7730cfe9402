//! Persists binary device responses under the storage root.
//!
//! Layout: `{root}/{category}/{folder?}/{operation}_{timestamp}.{ext}`.
//! Files are opened with `create_new`, so concurrent writers never
//! overwrite each other; a numeric suffix is added on collision.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use camdeck_common::protocol::StoredArtifact;
use camdeck_common::storage::{self, Category, PathError};

/// Collision suffixes tried before giving up.
const MAX_SUFFIX: u32 = 1000;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no free file name for {0}")]
    Exhausted(String),
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the category directories.
    pub async fn init(&self) -> std::io::Result<()> {
        for category in Category::ALL {
            fs::create_dir_all(self.root.join(category.dir_name())).await?;
        }
        Ok(())
    }

    /// Write `bytes` as a new artifact and describe where it went.
    pub async fn save(
        &self,
        bytes: &[u8],
        category: Category,
        folder: Option<&str>,
        operation_id: &str,
        content_type: Option<&str>,
    ) -> Result<StoredArtifact, StoreError> {
        let folder = folder.and_then(storage::sanitize_segment);
        let stem = format!(
            "{}_{}",
            storage::sanitize_segment(operation_id).unwrap_or_else(|| "artifact".into()),
            file_stamp(Utc::now())
        );

        let mut segments = vec![category.dir_name().to_string()];
        segments.extend(folder.clone());
        let dir = storage::resolve(&self.root, &segments)?;
        fs::create_dir_all(&dir).await?;

        let (filename, path, mut file) = create_unique(&dir, &stem, category.extension()).await?;
        if let Err(e) = write_all(&mut file, bytes).await {
            drop(file);
            if let Err(rm) = fs::remove_file(&path).await {
                warn!("Cannot remove partial artifact {}: {rm}", path.display());
            }
            return Err(e.into());
        }

        let content_type = content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or(category.fallback_content_type())
            .to_string();
        let public = storage::public_path(category, folder.as_deref(), &filename);
        info!("Stored {} bytes at {public}", bytes.len());

        Ok(StoredArtifact {
            category,
            folder,
            filename,
            size: bytes.len() as u64,
            content_type,
            path: public,
        })
    }
}

async fn write_all(file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

async fn create_unique(
    dir: &Path,
    stem: &str,
    ext: &str,
) -> Result<(String, PathBuf, File), StoreError> {
    for n in 0..MAX_SUFFIX {
        let filename = if n == 0 {
            format!("{stem}.{ext}")
        } else {
            format!("{stem}-{n}.{ext}")
        };
        let path = storage::resolve(dir, &[filename.as_str()])?;
        match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => return Ok((filename, path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(StoreError::Exhausted(stem.to_string()))
}

/// ISO-8601 instant with every non-alphanumeric character replaced by `-`,
/// e.g. `2025-11-19T10-20-30-123Z`.
pub fn file_stamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}
