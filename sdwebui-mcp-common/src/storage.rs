//! Artifact storage for generated images.
//!
//! Generated images are written once under a date-partitioned directory and
//! served back over a restricted read path. Write-side file names are
//! generated (uuid v4), so collisions are not a concern; read-side paths are
//! caller supplied and must pass traversal validation before any filesystem
//! access happens.

use crate::error::StorageError;
use axum::Router;
use axum::extract::{Path as RoutePath, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// File extension for stored artifacts.
const ARTIFACT_EXT: &str = "png";

/// MIME type served by the read route.
const ARTIFACT_MIME: &str = "image/png";

/// Store for generated image artifacts.
///
/// Artifacts live under `{root}/{YYYY-MM-DD}/{uuid}.png` and are exposed as
/// `{public_url}/read/file/{YYYY-MM-DD}/{uuid}.png`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    public_url: String,
}

impl ArtifactStore {
    /// Create a new store rooted at `root`, building artifact links against
    /// `public_url`.
    pub fn new(root: impl Into<PathBuf>, public_url: impl Into<String>) -> Self {
        let public_url = public_url.into().trim_end_matches('/').to_string();
        Self {
            root: root.into(),
            public_url,
        }
    }

    /// Persist raw image bytes and return an externally resolvable URL.
    ///
    /// The artifact is named by a freshly generated uuid and placed under a
    /// date partition directory to bound directory size. The URL is returned
    /// only after the write has completed.
    ///
    /// # Errors
    /// Returns `StorageError::Write` if the partition directory cannot be
    /// created or the write fails.
    pub async fn save(&self, bytes: &[u8]) -> Result<String, StorageError> {
        let file_name = format!("{}.{ARTIFACT_EXT}", Uuid::new_v4());
        let partition = chrono::Local::now().format("%Y-%m-%d").to_string();

        let dir = self.root.join(&partition);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::write(dir.display().to_string(), e.to_string()))?;

        let path = dir.join(&file_name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StorageError::write(path.display().to_string(), e.to_string()))?;

        let url = format!("{}/read/file/{partition}/{file_name}", self.public_url);
        tracing::info!(path = %path.display(), url = %url, "Saved artifact");
        Ok(url)
    }

    /// Validate a caller-supplied relative path and resolve it against the
    /// store root.
    ///
    /// Validation order: strip one leading separator, reject raw `..`
    /// occurrences, lexically normalize, reject `..` components again (a
    /// normalization can surface segments hidden by redundant separators),
    /// reject absolute paths. The two traversal checks are deliberately
    /// separate; no filesystem access happens here.
    ///
    /// # Errors
    /// Returns `StorageError::InvalidPath` if any check fails.
    pub fn resolve(&self, requested: &str) -> Result<PathBuf, StorageError> {
        let requested = requested.strip_prefix('/').unwrap_or(requested);

        if requested.contains("..") {
            return Err(StorageError::invalid_path(requested));
        }

        let cleaned = normalize(requested);
        if cleaned
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(StorageError::invalid_path(requested));
        }
        if cleaned.is_absolute() {
            return Err(StorageError::invalid_path(requested));
        }

        Ok(self.root.join(cleaned))
    }

    /// Read a stored artifact by its caller-supplied relative path.
    ///
    /// # Errors
    /// - `StorageError::InvalidPath` if the path fails validation
    /// - `StorageError::NotFound` if no artifact exists at the path
    /// - `StorageError::Read` for any other I/O failure
    pub async fn read(&self, requested: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(requested)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(requested))
            }
            Err(e) => Err(StorageError::read(path.display().to_string(), e.to_string())),
        }
    }
}

/// Lexically normalize a path without touching the filesystem.
///
/// `.` components are dropped and `..` pops the previous component; a `..`
/// that cannot be popped is kept so callers can detect it.
fn normalize(path: &str) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !cleaned.pop() {
                    cleaned.push("..");
                }
            }
            other => cleaned.push(other.as_os_str()),
        }
    }
    cleaned
}

/// Build the axum router serving the artifact read path.
///
/// Mounts `GET /read/file/{*path}`; outcomes map to 400 (invalid path),
/// 404 (missing artifact), 500 (read failure).
pub fn read_router(store: Arc<ArtifactStore>) -> Router {
    Router::new()
        .route("/read/file/{*path}", get(read_file))
        .with_state(store)
}

async fn read_file(
    State(store): State<Arc<ArtifactStore>>,
    RoutePath(path): RoutePath<String>,
) -> Response {
    tracing::debug!(path = %path, "Artifact read request");
    match store.read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, ARTIFACT_MIME)], bytes).into_response(),
        Err(err @ StorageError::InvalidPath(_)) => {
            (StatusCode::BAD_REQUEST, err.to_string()).into_response()
        }
        Err(err @ StorageError::NotFound(_)) => {
            (StatusCode::NOT_FOUND, err.to_string()).into_response()
        }
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}
