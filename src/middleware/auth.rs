use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};

use crate::error::{AppError, Result};
use crate::models::{Claims, CurrentUser, Permission, UserRole};
use crate::AppState;

/// Authentication middleware
/// Extracts and validates JWT from Authorization header
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok());

    let token = match auth_header.and_then(|h| h.strip_prefix("Bearer ")) {
        Some(token) => token,
        None => {
            return Err(AppError::Unauthorized(
                "Missing or invalid Authorization header".to_string(),
            ));
        }
    };

    let current_user = validate_token(token, &state.config.jwt.secret)?;
    request.extensions_mut().insert(current_user);

    Ok(next.run(request).await)
}

/// Verify an HS256 bearer token and turn its claims into a principal
pub fn validate_token(token: &str, secret: &str) -> Result<CurrentUser> {
    let mut validation = Validation::default();
    validation.validate_exp = true;

    let claims =
        decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?.claims;

    if claims.sub.trim().is_empty() {
        return Err(AppError::Unauthorized("Invalid token".to_string()));
    }

    Ok(CurrentUser {
        id: claims.sub,
        role: UserRole::from_str(&claims.role),
    })
}

/// Capability check run by handlers before a core operation
pub fn require(user: &CurrentUser, permission: Permission) -> Result<()> {
    if user.can(permission) {
        Ok(())
    } else {
        tracing::warn!(
            "Principal {} lacks permission {}",
            user.id,
            permission.as_str()
        );
        Err(AppError::Forbidden("Access denied".to_string()))
    }
}
