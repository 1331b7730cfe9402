//! Storage layout and the single path-validation gate.
//!
//! Every filesystem path built from caller input, whether for writing an
//! artifact or reading one back, goes through [`resolve`].

use std::fmt;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level storage directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Image,
    Recording,
    Other,
    Firmware,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Image,
        Category::Recording,
        Category::Other,
        Category::Firmware,
    ];

    /// Directory name under the storage root; also the URL segment.
    pub fn dir_name(self) -> &'static str {
        match self {
            Category::Image => "image",
            Category::Recording => "recording",
            Category::Other => "other",
            Category::Firmware => "firmware",
        }
    }

    /// File extension (without dot) for artifacts of this category.
    pub fn extension(self) -> &'static str {
        match self {
            Category::Image => "jpg",
            Category::Recording => "h264",
            Category::Other | Category::Firmware => "bin",
        }
    }

    /// Content type used when the device does not send one.
    pub fn fallback_content_type(self) -> &'static str {
        match self {
            Category::Image => "image/jpeg",
            Category::Recording => "video/h264",
            Category::Other | Category::Firmware => "application/octet-stream",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for Category {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.dir_name() == s)
            .ok_or_else(|| PathError::UnknownCategory(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("empty path segment")]
    Empty,
    #[error("invalid path segment {0:?}")]
    Traversal(String),
    #[error("unknown storage category {0:?}")]
    UnknownCategory(String),
}

fn allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Sanitise a caller-supplied name into a single safe path segment.
///
/// Characters outside `[A-Za-z0-9._-]` become `_`, and a dot directly after
/// another dot becomes `_` so the result never contains `..`.  Empty or
/// whitespace-only input means "no folder" and yields `None`.
///
/// The function is idempotent: sanitising its own output is a no-op.
pub fn sanitize_segment(raw: &str) -> Option<String> {
    if raw.trim().is_empty() {
        return None;
    }
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = if !allowed(c) || (c == '.' && out.ends_with('.')) {
            '_'
        } else {
            c
        };
        out.push(c);
    }
    if out == "." {
        out = "_".to_string();
    }
    Some(out)
}

/// Reject any segment that could escape its parent directory.
pub fn validate_segment(segment: &str) -> Result<&str, PathError> {
    if segment.is_empty() {
        return Err(PathError::Empty);
    }
    if segment == "."
        || segment.contains("..")
        || segment.contains('/')
        || segment.contains('\\')
        || segment.contains(MAIN_SEPARATOR)
        || segment.contains('\0')
    {
        return Err(PathError::Traversal(segment.to_string()));
    }
    Ok(segment)
}

/// Join validated segments onto `root`.
///
/// This is the only place caller-controlled strings become paths.
pub fn resolve<S: AsRef<str>>(root: &Path, segments: &[S]) -> Result<PathBuf, PathError> {
    let mut path = root.to_path_buf();
    for segment in segments {
        path.push(validate_segment(segment.as_ref())?);
    }
    Ok(path)
}

/// Caller-facing relative path: `/{category}/{folder?}/{filename}`.
pub fn public_path(category: Category, folder: Option<&str>, filename: &str) -> String {
    match folder {
        Some(folder) => format!("/{}/{folder}/{filename}", category.dir_name()),
        None => format!("/{}/{filename}", category.dir_name()),
    }
}

/// Content type for a stored file, derived from its extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "h264" | "mp4" => "video/h264",
        _ => "application/octet-stream",
    }
}
