//! File manager endpoint
//!
//! Every operation goes through `/api`. `?path=` is always resolved through
//! the sandbox root before any service sees it, and every failure is turned
//! into the `{error, code}` envelope by [`FileError`].

use axum::body::{to_bytes, Body};
use axum::extract::rejection::QueryRejection;
use axum::extract::{FromRequest, Multipart, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::TryStreamExt;
use serde::Deserialize;
use shared_types::{FileAction, SuccessResponse};
use tokio::fs;
use tokio_util::io::StreamReader;

use crate::api::ApiState;
use crate::files::content::{ContentFlags, Delivery};
use crate::files::mutation::DeletedKind;
use crate::files::thumbnail::THUMBNAIL_CACHE_CONTROL;
use crate::files::FileError;

/// JSON bodies are tiny; uploads go through multipart instead (1MB)
const MAX_JSON_BODY: usize = 1_048_576;

/// Multipart field that carries the uploaded file
const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Default, Deserialize)]
pub struct FileQuery {
    #[serde(default)]
    pub path: String,
    pub search: Option<String>,
    /// Present-or-absent flag, any value counts
    pub thumbnail: Option<String>,
    pub content: Option<String>,
}

fn invalid_request() -> FileError {
    FileError::BadRequest("Invalid request".to_string())
}

// ============================================================================
// GET / HEAD
// ============================================================================

/// Search, list a directory, or deliver a file
pub async fn get_entry(
    State(state): State<ApiState>,
    query: Result<Query<FileQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Response, FileError> {
    let Query(query) = query?;
    let app = &state.app_state;

    if let Some(search) = query.search.as_deref() {
        let root = app.root().resolve("")?;
        let results = app.tree().search_tree(&root, search).await?;
        return Ok(Json(results).into_response());
    }

    let target = app.root().resolve(&query.path)?;
    let metadata = match fs::metadata(target.full()).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(FileError::not_found()),
        Err(e) => return Err(FileError::io("Failed to read metadata", e)),
    };

    if metadata.is_dir() {
        let entries = app.tree().list_directory(&target).await?;
        return Ok(Json(entries).into_response());
    }
    if !metadata.is_file() {
        return Err(FileError::not_found());
    }

    let flags = ContentFlags {
        thumbnail: query.thumbnail.is_some(),
        content: query.content.is_some(),
        accept: headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string),
    };
    let delivery = app.content().negotiate(&target, &flags).await?;
    delivery_response(delivery)
}

fn delivery_response(delivery: Delivery) -> Result<Response, FileError> {
    let mut headers = HeaderMap::new();

    let body = match delivery {
        Delivery::Base64(envelope) => return Ok(Json(envelope).into_response()),
        Delivery::Thumbnail(thumbnail) => {
            headers.insert(header::CONTENT_TYPE, header_value(&thumbnail.content_type)?);
            headers.insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static(THUMBNAIL_CACHE_CONTROL),
            );
            thumbnail.body
        }
        Delivery::InlineText { content_type, body } => {
            headers.insert(header::CONTENT_TYPE, header_value(&content_type)?);
            body
        }
        Delivery::Attachment {
            content_type,
            file_name,
            length,
            body,
        } => {
            headers.insert(header::CONTENT_TYPE, header_value(&content_type)?);
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            let disposition = format!(
                "inline; filename=\"{}\"",
                file_name.replace('\\', "\\\\").replace('"', "\\\"")
            );
            headers.insert(
                header::CONTENT_DISPOSITION,
                HeaderValue::from_bytes(disposition.as_bytes())
                    .map_err(|e| FileError::Server(format!("Invalid file name header: {e}")))?,
            );
            body
        }
    };

    Ok((StatusCode::OK, headers, body.into_body()).into_response())
}

fn header_value(value: &str) -> Result<HeaderValue, FileError> {
    HeaderValue::from_str(value).map_err(|e| FileError::Server(format!("Invalid header: {e}")))
}

// ============================================================================
// POST
// ============================================================================

/// Multipart upload of field `file`, or a JSON `createFolder` action
pub async fn create_entry(
    State(state): State<ApiState>,
    query: Result<Query<FileQuery>, QueryRejection>,
    request: Request,
) -> Result<Json<SuccessResponse>, FileError> {
    let Query(query) = query?;
    let app = state.app_state.clone();
    let parent = app.root().resolve(&query.path)?;

    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    if is_multipart {
        let mut multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| FileError::BadRequest(e.body_text()))?;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| FileError::BadRequest(e.body_text()))?
        {
            if field.name() != Some(UPLOAD_FIELD) {
                continue;
            }
            let file_name = field
                .file_name()
                .map(ToString::to_string)
                .ok_or_else(|| FileError::BadRequest("Upload has no file name".to_string()))?;

            let reader = StreamReader::new(field.map_err(|e| std::io::Error::other(e.to_string())));
            app.mutations().upload(&parent, &file_name, reader).await?;
            return Ok(Json(SuccessResponse::new("File uploaded successfully")));
        }
        return Err(invalid_request());
    }

    let bytes = to_bytes(request.into_body(), MAX_JSON_BODY)
        .await
        .map_err(|_| invalid_request())?;
    match serde_json::from_slice::<FileAction>(&bytes) {
        Ok(FileAction::CreateFolder { name }) => {
            app.mutations().create_directory(&parent, &name).await?;
            Ok(Json(SuccessResponse::new("Folder created successfully")))
        }
        _ => Err(invalid_request()),
    }
}

// ============================================================================
// PUT
// ============================================================================

/// Rename or move the entry at `?path=`
pub async fn update_entry(
    State(state): State<ApiState>,
    query: Result<Query<FileQuery>, QueryRejection>,
    body: Body,
) -> Result<Json<SuccessResponse>, FileError> {
    let Query(query) = query?;
    let app = &state.app_state;
    let entry = app.root().resolve(&query.path)?;

    let bytes = to_bytes(body, MAX_JSON_BODY)
        .await
        .map_err(|_| invalid_request())?;
    match serde_json::from_slice::<FileAction>(&bytes) {
        Ok(FileAction::Rename { new_name }) => {
            app.mutations().rename(&entry, &new_name).await?;
            Ok(Json(SuccessResponse::new("Renamed successfully")))
        }
        Ok(FileAction::Move { target_path }) => {
            app.mutations().move_entry(&entry, &target_path).await?;
            Ok(Json(SuccessResponse::new("Moved successfully")))
        }
        _ => Err(invalid_request()),
    }
}

// ============================================================================
// DELETE / OPTIONS / everything else
// ============================================================================

pub async fn delete_entry(
    State(state): State<ApiState>,
    query: Result<Query<FileQuery>, QueryRejection>,
) -> Result<Json<SuccessResponse>, FileError> {
    let Query(query) = query?;
    let app = &state.app_state;
    let entry = app.root().resolve(&query.path)?;

    let message = match app.mutations().delete(&entry).await? {
        DeletedKind::File => "File deleted successfully",
        DeletedKind::Directory => "Directory deleted successfully",
    };
    Ok(Json(SuccessResponse::new(message)))
}

/// Pre-flight acknowledgment; CORS headers come from the layer
pub async fn preflight() -> StatusCode {
    StatusCode::OK
}

pub async fn method_not_allowed(method: Method) -> FileError {
    tracing::debug!(%method, "Rejected unsupported method");
    FileError::MethodNotAllowed(method.to_string())
}
