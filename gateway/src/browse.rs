//! Read-only browsing of the artifact store: category listing, directory
//! listings and streamed file downloads.

use std::io::ErrorKind;
use std::path::Path;

use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio_util::io::ReaderStream;

use camdeck_common::protocol::{StorageListing, StorageRoot, StoredFile};
use camdeck_common::storage::{self, Category};

use crate::error::ApiError;

/// Category directories that exist under `root`.
pub async fn list_categories(root: &Path) -> Result<StorageRoot, ApiError> {
    let mut categories = Vec::new();
    for category in Category::ALL {
        let dir = root.join(category.dir_name());
        if fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false) {
            categories.push(category.dir_name().to_string());
        }
    }
    Ok(StorageRoot { categories })
}

/// List a directory or stream a file at `relative` (`category/...`).
pub async fn open(root: &Path, relative: &str) -> Result<Response, ApiError> {
    let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
    let Some(first) = segments.first() else {
        return list_categories(root).await.map(|r| Json(r).into_response());
    };
    first.parse::<Category>()?;
    let path = storage::resolve(root, &segments)?;
    // Hidden entries, such as in-flight `.part` uploads, are never listed
    // and never served.
    if segments.iter().any(|s| s.starts_with('.')) {
        return Err(ApiError::not_found(format!("{relative} not found")));
    }

    let meta = match fs::metadata(&path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ApiError::not_found(format!("{relative} not found")));
        }
        Err(e) => return Err(ApiError::internal(e.to_string())),
    };

    let display = segments.join("/");
    if meta.is_dir() {
        let listing = list_directory(&path, &display).await?;
        Ok(Json(listing).into_response())
    } else {
        stream_file(&path, meta.len()).await
    }
}

async fn list_directory(dir: &Path, display: &str) -> Result<StorageListing, ApiError> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    let mut files = Vec::new();
    let mut subdirectories = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if meta.is_dir() {
            subdirectories.push(name);
        } else if meta.is_file() {
            let modified = meta
                .modified()
                .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
                .unwrap_or_default();
            files.push(StoredFile {
                path: format!("/{display}/{name}"),
                name,
                size: meta.len(),
                modified,
            });
        }
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    subdirectories.sort();
    Ok(StorageListing {
        directory: format!("/{display}"),
        files,
        subdirectories,
    })
}

async fn stream_file(path: &Path, len: u64) -> Result<Response, ApiError> {
    let file = fs::File::open(path)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok((
        [
            (header::CONTENT_TYPE, storage::content_type_for(path).to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn seed() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("image/lobby")).unwrap();
        std::fs::create_dir_all(dir.path().join("recording")).unwrap();
        std::fs::write(dir.path().join("image/lobby/snap.jpg"), b"jpeg").unwrap();
        std::fs::write(dir.path().join("image/top.jpg"), b"jpg").unwrap();
        std::fs::write(dir.path().join("image/.upload-1-0.part"), b"x").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_list_categories_only_existing() {
        let dir = seed();
        let root = list_categories(dir.path()).await.unwrap();
        assert_eq!(root.categories, vec!["image", "recording"]);
    }

    #[tokio::test]
    async fn test_list_directory() {
        let dir = seed();
        let listing = list_directory(&dir.path().join("image"), "image").await.unwrap();
        assert_eq!(listing.directory, "/image");
        assert_eq!(listing.subdirectories, vec!["lobby"]);
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].name, "top.jpg");
        assert_eq!(listing.files[0].path, "/image/top.jpg");
        assert_eq!(listing.files[0].size, 3);
    }

    #[tokio::test]
    async fn test_open_file_sets_headers() {
        let dir = seed();
        let response = open(dir.path(), "image/lobby/snap.jpg").await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "image/jpeg");
        assert_eq!(headers[header::CONTENT_LENGTH], "4");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"snap.jpg\""
        );
    }

    #[tokio::test]
    async fn test_open_rejects_escapes() {
        let dir = seed();
        let err = open(dir.path(), "image/../../etc/passwd").await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        let err = open(dir.path(), "image/a\\b").await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        let err = open(dir.path(), "secrets/x").await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        let err = open(dir.path(), "image/missing.jpg").await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_open_hides_dotfiles() {
        let dir = seed();
        std::fs::create_dir_all(dir.path().join("image/.cache")).unwrap();
        std::fs::write(dir.path().join("image/.cache/x.jpg"), b"x").unwrap();

        for relative in ["image/.upload-1-0.part", "image/.cache", "image/.cache/x.jpg"] {
            let err = open(dir.path(), relative).await.unwrap_err();
            assert_eq!(err.status, StatusCode::NOT_FOUND, "{relative}");
        }
        let listing = list_directory(&dir.path().join("image"), "image").await.unwrap();
        assert_eq!(listing.subdirectories, vec!["lobby"]);
    }
}
