use axum::{
    extract::{Path, Query, State},
    response::Response,
    Extension, Json,
};
use chrono::Duration;

use crate::error::{ApiResponse, AppError, Result};
use crate::handlers::file::attachment;
use crate::middleware::auth::require;
use crate::models::{
    AccessShareRequest, CreateShareRequest, CurrentUser, Page, PageQuery, Permission,
    ShareDescriptor, ShareInfo,
};
use crate::AppState;

/// Create a new share for one of the caller's files
/// POST /api/v1/shares/:file_id
pub async fn create_share(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(file_id): Path<String>,
    Json(req): Json<CreateShareRequest>,
) -> Result<Json<ApiResponse<ShareDescriptor>>> {
    require(&current_user, Permission::FileShare)?;

    let expires_in = req
        .expiry_minutes
        .map(|minutes| {
            Duration::try_minutes(minutes)
                .ok_or_else(|| AppError::BadRequest("Expiry is out of range".to_string()))
        })
        .transpose()?;

    let share = state
        .shares
        .create_share(&file_id, req.password.as_deref(), expires_in, &current_user)
        .await?;
    Ok(Json(ApiResponse::success(share)))
}

/// List shares issued by the caller
/// GET /api/v1/shares?page=
pub async fn list_my_shares(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ApiResponse<Page<ShareDescriptor>>>> {
    require(&current_user, Permission::FileShare)?;
    let shares = state
        .shares
        .list_shares(&current_user, query.page, query.per_page)
        .await?;
    Ok(Json(ApiResponse::success(shares)))
}

/// Revoke a share
/// DELETE /api/v1/shares/:token
pub async fn revoke_share(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(token): Path<String>,
) -> Result<Json<ApiResponse<()>>> {
    require(&current_user, Permission::FileShare)?;
    state.shares.revoke(&token, &current_user).await?;
    Ok(Json(ApiResponse::<()>::success_message("Share revoked")))
}

/// Get public share info
/// GET /api/v1/public/share/:token/info
pub async fn get_public_share(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ApiResponse<ShareInfo>>> {
    let info = state.shares.share_info(&token).await?;
    Ok(Json(ApiResponse::success(info)))
}

/// Check the password (if any) and download the shared file
/// POST /api/v1/public/share/:token/access
pub async fn access_share(
    State(state): State<AppState>,
    Path(token): Path<String>,
    req: Option<Json<AccessShareRequest>>,
) -> Result<Response> {
    let password = req.and_then(|Json(req)| req.password);
    let content = state.shares.open(&token, password.as_deref()).await?;
    attachment(content)
}
