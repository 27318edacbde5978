use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    Extension, Json,
};

use crate::error::{ApiResponse, AppError, Result};
use crate::middleware::auth::require;
use crate::models::{CurrentUser, FileContent, FileDescriptor, FileFilter, Page, PageQuery, Permission};
use crate::AppState;

/// List the caller's files
/// GET /api/v1/files
pub async fn list_files(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<Vec<FileDescriptor>>>> {
    require(&current_user, Permission::FileDownload)?;
    let files = state.files.list(&current_user).await?;
    Ok(Json(ApiResponse::success(files)))
}

/// Search the caller's files by name, type, size and upload date
/// GET /api/v1/files/search
pub async fn search_files(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Query(filter): Query<FileFilter>,
    Query(paging): Query<PageQuery>,
) -> Result<Json<ApiResponse<Page<FileDescriptor>>>> {
    require(&current_user, Permission::FileSearch)?;
    let found = state
        .files
        .search(&current_user, &filter, paging.page, paging.per_page)
        .await?;
    Ok(Json(ApiResponse::success(found)))
}

/// Upload a file (multipart field `file`)
/// POST /api/v1/files/upload
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<FileDescriptor>>> {
    require(&current_user, Permission::FileUpload)?;

    let mut upload: Option<(String, String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        AppError::BadRequest(format!("Failed to process multipart: {}", e))
    })? {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        let data = field.bytes().await.map_err(|e| {
            AppError::BadRequest(format!("Failed to read file: {}", e))
        })?;

        upload = Some((file_name, content_type, data.to_vec()));
        break;
    }

    let (file_name, content_type, data) =
        upload.ok_or_else(|| AppError::BadRequest("No file provided".to_string()))?;

    let file = state
        .files
        .upload(&current_user, &file_name, &content_type, &data)
        .await?;
    Ok(Json(ApiResponse::success(file)))
}

/// Download one of the caller's files
/// GET /api/v1/files/:id/download
pub async fn download_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Response> {
    require(&current_user, Permission::FileDownload)?;
    let content = state.files.download(&current_user, &id).await?;
    attachment(content)
}

/// Delete a file together with its shares
/// DELETE /api/v1/files/:id
pub async fn delete_file(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>> {
    require(&current_user, Permission::FileDelete)?;
    state.files.delete(&current_user, &id).await?;
    Ok(Json(ApiResponse::<()>::success_message("File deleted")))
}

/// Raw bytes with the stored content type and an attachment disposition
pub(crate) fn attachment(content: FileContent) -> Result<Response> {
    let FileContent { file, data } = content;

    let content_type = if file.content_type.is_empty() {
        "application/octet-stream".to_string()
    } else {
        file.content_type
    };

    let fallback_name = file
        .original_filename
        .replace(|c: char| c == '"' || c == '\\' || !c.is_ascii() || c.is_ascii_control(), "_");
    let encoded_name = urlencoding::encode(&file.original_filename);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, data.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"; filename*=UTF-8''{}",
                fallback_name, encoded_name
            ),
        )
        .body(Body::from(data))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}
