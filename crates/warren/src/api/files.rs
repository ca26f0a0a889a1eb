//! File manager endpoints. Every path addresses the caller's own container.

use axum::{
    Json,
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use super::error::{ApiError, ApiResult};
use super::handlers::OkResponse;
use super::state::AppState;
use crate::auth::CurrentUser;
use crate::files::{
    ContainerPath, DirectoryListing, FileContent, OpenedFile, sanitize_filename,
};

const DEFAULT_LIST_PATH: &str = "/root";
const DEFAULT_UPLOAD_DIR: &str = "/tmp";

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WriteRequest {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct MkdirRequest {
    pub path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    pub old_path: String,
    pub new_path: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub ok: bool,
    pub path: String,
}

fn container_of(user: &CurrentUser) -> ApiResult<&str> {
    user.user
        .container()
        .ok_or_else(|| ApiError::bad_request("no container assigned"))
}

fn required(path: Option<&str>) -> ApiResult<ContainerPath> {
    match path.map(str::trim) {
        Some(raw) if !raw.is_empty() => Ok(ContainerPath::parse(raw)?),
        _ => Err(ApiError::bad_request("path required")),
    }
}

/// Directory listing, defaulting to `/root`.
pub async fn list_files(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<DirectoryListing>> {
    let container = container_of(&user)?;
    let path = ContainerPath::parse(query.path.as_deref().unwrap_or(DEFAULT_LIST_PATH))?;
    Ok(Json(state.files.list(container, &path).await?))
}

pub async fn read_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<FileContent>> {
    let container = container_of(&user)?;
    let path = required(query.path.as_deref())?;
    Ok(Json(state.files.read(container, &path).await?))
}

pub async fn write_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<WriteRequest>,
) -> ApiResult<Json<OkResponse>> {
    let container = container_of(&user)?;
    let path = required(Some(request.path.as_str()))?;
    state
        .files
        .write(container, &path, request.content.as_bytes())
        .await?;
    Ok(Json(OkResponse { ok: true }))
}

pub async fn make_directory(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<MkdirRequest>,
) -> ApiResult<Json<OkResponse>> {
    let container = container_of(&user)?;
    let path = required(Some(request.path.as_str()))?;
    state.files.mkdir(container, &path).await?;
    Ok(Json(OkResponse { ok: true }))
}

pub async fn delete_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PathQuery>,
) -> ApiResult<Json<OkResponse>> {
    let container = container_of(&user)?;
    let path = required(query.path.as_deref())?;
    state.files.delete(container, &path).await?;
    Ok(Json(OkResponse { ok: true }))
}

pub async fn rename_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(request): Json<RenameRequest>,
) -> ApiResult<Json<OkResponse>> {
    let container = container_of(&user)?;
    let from = required(Some(request.old_path.as_str()))?;
    let to = required(Some(request.new_path.as_str()))?;
    state.files.rename(container, &from, &to).await?;
    Ok(Json(OkResponse { ok: true }))
}

/// Stream a file as an attachment.
pub async fn download_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PathQuery>,
) -> ApiResult<Response> {
    let container = container_of(&user)?;
    let path = required(query.path.as_deref())?;
    let opened = state.files.open(container, &path).await?;

    let mime = mime_guess::from_path(&opened.name)
        .first_or_octet_stream()
        .to_string();
    let disposition = format!("attachment; filename=\"{}\"", quoted_name(&opened.name));
    Ok(stream_file(opened, mime, disposition, HeaderMap::new()))
}

/// Serve a file inline for previews. Only images keep their type.
pub async fn raw_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PathQuery>,
) -> ApiResult<Response> {
    let container = container_of(&user)?;
    let path = required(query.path.as_deref())?;
    let opened = state.files.open(container, &path).await?;

    let guessed = mime_guess::from_path(&opened.name).first_or_octet_stream();
    let mime = if guessed.type_() == mime_guess::mime::IMAGE {
        guessed.to_string()
    } else {
        mime_guess::mime::APPLICATION_OCTET_STREAM.to_string()
    };

    let mut extra = HeaderMap::new();
    extra.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        header::HeaderValue::from_static("nosniff"),
    );
    extra.insert(
        header::CONTENT_SECURITY_POLICY,
        header::HeaderValue::from_static("sandbox"),
    );
    let disposition = format!("inline; filename=\"{}\"", quoted_name(&opened.name));
    Ok(stream_file(opened, mime, disposition, extra))
}

/// Stream the request body into `?path=` (default `/tmp`), named by `X-Filename`.
pub async fn upload_file(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<PathQuery>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let container = container_of(&user)?;
    let dir = ContainerPath::parse(query.path.as_deref().unwrap_or(DEFAULT_UPLOAD_DIR))?;

    let filename = headers
        .get("x-filename")
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| match urlencoding::decode(raw) {
            Ok(decoded) => sanitize_filename(&decoded),
            Err(_) => sanitize_filename(raw),
        })
        .unwrap_or_else(|| format!("upload_{}", chrono::Utc::now().timestamp_millis()));

    let stored = state
        .files
        .upload(container, &dir, &filename, body.into_data_stream())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            ok: true,
            path: stored.to_string(),
        }),
    ))
}

/// Header-safe rendition of a file name.
fn quoted_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '"' => '\'',
            ' ' => ' ',
            c if c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect()
}

fn stream_file(opened: OpenedFile, mime: String, disposition: String, extra: HeaderMap) -> Response {
    let body = Body::from_stream(ReaderStream::new(opened.file));
    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime),
            (header::CONTENT_LENGTH, opened.len.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response();
    response.headers_mut().extend(extra);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_names_are_header_safe() {
        assert_eq!(quoted_name("report \"final\".pdf"), "report 'final'.pdf");
        assert_eq!(quoted_name("café\n.txt"), "caf__.txt");
    }
}
