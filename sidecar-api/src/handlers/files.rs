use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use axum::body::{Body, Bytes};
use axum::extract::multipart::Field;
use axum::extract::{Multipart, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::paths::check_upload_name;
use crate::router::AppState;

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(default)]
    pub path: String,
    /// Only the exact value `true` replaces an existing file.
    #[serde(default)]
    pub overwrite: Option<String>,
}

impl UploadQuery {
    pub fn overwrite(&self) -> bool {
        self.overwrite.as_deref() == Some("true")
    }
}

static UPLOAD_SEQUENCE: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Deserialize)]
pub struct PathRequest {
    pub path: String,
}

/// One directory entry, as returned by the listing endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub modified: DateTime<Utc>,
}

/// Map `NotFound` to a 404 naming `what`, anything else to a 500.
fn lookup_error(what: &'static str, action: &'static str) -> impl FnOnce(io::Error) -> ApiError {
    move |source| {
        if source.kind() == io::ErrorKind::NotFound {
            ApiError::NotFound(what)
        } else {
            ApiError::Io { action, source }
        }
    }
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Json<Vec<FileEntry>>, ApiError> {
    let dir = state.root.resolve(&query.path)?;

    let metadata = fs::metadata(&dir)
        .await
        .map_err(lookup_error("directory", "read directory"))?;
    if !metadata.is_dir() {
        return Err(ApiError::NotADirectory);
    }

    let mut entries = fs::read_dir(&dir)
        .await
        .map_err(ApiError::io("read directory"))?;
    let mut files = Vec::new();

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(ApiError::io("read directory"))?
    {
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(error) => {
                warn!(entry = ?entry.file_name(), error = %error, "could not stat entry, skipping");
                continue;
            }
        };

        files.push(FileEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            size: metadata.len(),
            is_dir: metadata.is_dir(),
            modified: metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_default(),
        });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Json(files))
}

pub async fn download(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Response, ApiError> {
    let path = state.root.resolve(&query.path)?;

    let metadata = fs::metadata(&path)
        .await
        .map_err(lookup_error("file", "access file"))?;
    if metadata.is_dir() {
        return Err(ApiError::IsDirectory);
    }

    let file = fs::File::open(&path)
        .await
        .map_err(lookup_error("file", "open file"))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().replace('"', ""))
        .unwrap_or_default();

    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_owned()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", name),
        ),
        (header::CONTENT_LENGTH, metadata.len().to_string()),
    ];

    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

pub async fn upload(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<(StatusCode, &'static str), ApiError> {
    let dir = state.root.resolve(&query.path)?;

    match fs::metadata(&dir).await {
        Ok(metadata) if metadata.is_dir() => {}
        Ok(_) => return Err(ApiError::NotADirectory),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            return Err(ApiError::MissingDestination)
        }
        Err(source) => {
            return Err(ApiError::Io {
                action: "access destination directory",
                source,
            })
        }
    }

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        let name = check_upload_name(field.file_name().unwrap_or_default())?.to_owned();
        let destination = dir.join(&name);

        let overwrite = query.overwrite();
        let exists = fs::try_exists(&destination)
            .await
            .map_err(ApiError::io("check destination"))?;
        if exists && !overwrite {
            return Err(ApiError::AlreadyExists);
        }

        let staging = staging_path(&dir, &name);
        let saved = match save_field(field, &staging).await {
            Ok(written) => commit(&staging, &destination, overwrite)
                .await
                .map(|()| written),
            Err(error) => Err(error),
        };
        let written = match saved {
            Ok(written) => written,
            Err(error) => {
                drop(fs::remove_file(&staging).await);
                return Err(error);
            }
        };

        info!(
            filename = %name,
            size = written,
            destination = %destination.display(),
            "file upload completed"
        );
        return Ok((StatusCode::CREATED, "File uploaded successfully"));
    }

    Err(ApiError::MissingFile)
}

/// Hidden file next to the destination, so the final rename stays on one filesystem.
fn staging_path(dir: &Path, name: &str) -> PathBuf {
    let sequence = UPLOAD_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    dir.join(format!(".{name}.{}-{sequence}.part", std::process::id()))
}

/// Move a fully written upload into place. Without `overwrite` an existing destination
/// is never replaced, even one created while the upload was in progress.
async fn commit(staging: &Path, destination: &Path, overwrite: bool) -> Result<(), ApiError> {
    if overwrite {
        return fs::rename(staging, destination)
            .await
            .map_err(ApiError::io("save file"));
    }

    match fs::hard_link(staging, destination).await {
        Ok(()) => {
            drop(fs::remove_file(staging).await);
            Ok(())
        }
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists => Err(ApiError::AlreadyExists),
        Err(source) => Err(ApiError::Io {
            action: "save file",
            source,
        }),
    }
}

async fn save_field(mut field: Field<'_>, destination: &Path) -> Result<u64, ApiError> {
    let mut file = fs::File::create(destination)
        .await
        .map_err(ApiError::io("save file"))?;
    let mut written: u64 = 0;

    while let Some(chunk) = field.chunk().await? {
        file.write_all(&chunk)
            .await
            .map_err(ApiError::io("save file"))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(ApiError::io("save file"))?;

    Ok(written)
}

pub async fn delete(State(state): State<AppState>, body: Bytes) -> Result<&'static str, ApiError> {
    let request: PathRequest = serde_json::from_slice(&body).map_err(ApiError::InvalidBody)?;
    let path = state.root.resolve(&request.path)?;

    if state.root.is_root(&path) {
        return Err(ApiError::DeleteRoot);
    }

    let removed = match fs::symlink_metadata(&path).await {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(&path).await,
        Ok(_) => fs::remove_file(&path).await,
        // Already gone.
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    };
    removed.map_err(ApiError::io("delete item"))?;

    info!(path = %path.display(), "deleted item");
    Ok("Item deleted successfully")
}

pub async fn create_dir(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, &'static str), ApiError> {
    let request: PathRequest = serde_json::from_slice(&body).map_err(ApiError::InvalidBody)?;
    let path = state.root.resolve(&request.path)?;

    fs::create_dir_all(&path)
        .await
        .map_err(ApiError::io("create directory"))?;

    info!(path = %path.display(), "created directory");
    Ok((StatusCode::CREATED, "Directory created successfully"))
}
