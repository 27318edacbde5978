use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Argon2, PasswordHash, PasswordVerifier,
};
use chrono::Duration;
use std::collections::hash_map::{Entry, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::ShareConfig;
use crate::db::RecordStore;
use crate::error::{AppError, RejectReason, Result};
use crate::models::{
    CurrentUser, FileContent, FileRecord, Page, ShareDescriptor, ShareInfo, ShareRecord,
};
use crate::services::clock::Clock;
use crate::services::file_store::FileStore;
use crate::services::token::ShareTokenIssuer;

const TOKEN_ATTEMPTS: usize = 10;
const FALLBACK_EXPIRY_MINUTES: i64 = 24 * 60;

/// Creates, validates, lists and revokes share links
pub struct ShareService {
    store: Arc<dyn RecordStore>,
    files: Arc<FileStore>,
    clock: Arc<dyn Clock>,
    base_url: String,
    default_expiry: Duration,
    per_page: u32,
}

impl ShareService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        files: Arc<FileStore>,
        clock: Arc<dyn Clock>,
        base_url: impl Into<String>,
        config: &ShareConfig,
    ) -> Self {
        let default_expiry = config.default_expiry().unwrap_or_else(|| {
            tracing::warn!(
                "Ignoring unusable default share expiry of {} minutes",
                config.default_expiry_minutes
            );
            Duration::minutes(FALLBACK_EXPIRY_MINUTES)
        });

        Self {
            store,
            files,
            clock,
            base_url: base_url.into(),
            default_expiry,
            per_page: config.per_page.max(1),
        }
    }

    /// Create a new share link for `file_id`
    ///
    /// `expires_in` falls back to the configured window; an explicit value must be positive.
    /// An empty password is the same as no password.
    pub async fn create_share(
        &self,
        file_id: &str,
        password: Option<&str>,
        expires_in: Option<Duration>,
        issuer: &CurrentUser,
    ) -> Result<ShareDescriptor> {
        let expires_in = expires_in.unwrap_or(self.default_expiry);
        if expires_in <= Duration::zero() {
            return Err(AppError::BadRequest(
                "Expiry must be a positive duration".to_string(),
            ));
        }

        let file = self
            .store
            .find_file(file_id)
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

        if file.owner_id != issuer.id {
            return Err(AppError::Forbidden("Access denied".to_string()));
        }

        let password_hash = match password {
            Some(password) if !password.is_empty() => Some(hash_password(password)?),
            _ => None,
        };

        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(expires_in)
            .ok_or_else(|| AppError::BadRequest("Expiry is out of range".to_string()))?;

        let mut share = ShareRecord {
            id: Uuid::new_v4().to_string(),
            token: String::new(),
            file_id: file.id.clone(),
            issued_by: issuer.id.clone(),
            password_hash,
            expires_at,
            is_active: true,
            created_at: now,
        };

        let mut last_error: Option<sqlx::Error> = None;
        let mut saved = false;
        for _ in 0..TOKEN_ATTEMPTS {
            share.token = ShareTokenIssuer::issue();
            match self.store.save_share(&share).await {
                Ok(()) => {
                    saved = true;
                    break;
                }
                Err(AppError::Database(e)) if is_token_conflict(&e) => {
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        if !saved {
            return Err(AppError::Internal(format!(
                "Failed to generate unique share token: {}",
                last_error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            )));
        }

        tracing::info!(
            target: "audit",
            action = "share.create",
            share_id = %share.id,
            file_id = %share.file_id,
            principal = %issuer.id,
            has_password = share.has_password(),
            expires_at = %share.expires_at,
            "Share created"
        );

        Ok(ShareDescriptor::from_record(&share, &file, &self.base_url))
    }

    /// Resolve the file behind a token, or reject
    ///
    /// Every failure comes back as [`AppError::ShareRejected`]; the reason is only logged.
    pub async fn validate_access(&self, token: &str, password: Option<&str>) -> Result<FileRecord> {
        let share = self.live_share(token).await?;

        if share.has_password() {
            let verified = match (password, share.password_hash.as_deref()) {
                (Some(password), Some(hash)) => verify_password(password, hash)?,
                _ => false,
            };
            if !verified {
                return Err(reject(token, RejectReason::BadPassword));
            }
        }

        self.store
            .find_file(&share.file_id)
            .await?
            .ok_or_else(|| reject(token, RejectReason::NotFound))
    }

    /// Validate a token and return the decrypted file behind it
    pub async fn open(&self, token: &str, password: Option<&str>) -> Result<FileContent> {
        let file = self.validate_access(token, password).await?;
        let data = self.files.read(&file.stored_name).await?;

        tracing::info!(
            target: "audit",
            action = "share.download",
            file_id = %file.id,
            token = %token_hint(token),
            size = data.len(),
            "File downloaded through share"
        );

        Ok(FileContent { file, data })
    }

    /// Public details of a live share, no password required
    pub async fn share_info(&self, token: &str) -> Result<ShareInfo> {
        let share = self.live_share(token).await?;
        let file = self
            .store
            .find_file(&share.file_id)
            .await?
            .ok_or_else(|| reject(token, RejectReason::NotFound))?;

        Ok(ShareInfo {
            filename: file.original_filename,
            has_password: share.has_password(),
            expires_at: share.expires_at,
        })
    }

    /// Deactivate a share; only its issuer may do this
    pub async fn revoke(&self, token: &str, requester: &CurrentUser) -> Result<()> {
        let share = self
            .store
            .find_share_by_token(token)
            .await?
            .ok_or_else(|| AppError::NotFound("Share not found".to_string()))?;

        if share.issued_by != requester.id {
            tracing::warn!(
                "Principal {} tried to revoke share {} issued by {}",
                requester.id,
                share.id,
                share.issued_by
            );
            return Err(AppError::Forbidden("Access denied".to_string()));
        }

        if share.is_active {
            self.store.deactivate_share(&share.id).await?;
        }

        tracing::info!(
            target: "audit",
            action = "share.revoke",
            share_id = %share.id,
            file_id = %share.file_id,
            principal = %requester.id,
            "Share revoked"
        );
        Ok(())
    }

    /// Shares issued by `owner`, newest first
    pub async fn list_shares(
        &self,
        owner: &CurrentUser,
        page: u32,
        per_page: Option<u32>,
    ) -> Result<Page<ShareDescriptor>> {
        let per_page = per_page.unwrap_or(self.per_page).clamp(1, 100);
        let shares = self
            .store
            .find_shares_by_issuer(&owner.id, page, per_page)
            .await?;

        let mut files: HashMap<String, FileRecord> = HashMap::new();
        let mut items = Vec::with_capacity(shares.items.len());
        for share in &shares.items {
            let file = match files.entry(share.file_id.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => match self.store.find_file(&share.file_id).await? {
                    Some(file) => entry.insert(file),
                    None => {
                        tracing::warn!("Share {} refers to missing file {}", share.id, share.file_id);
                        continue;
                    }
                },
            };
            items.push(ShareDescriptor::from_record(share, file, &self.base_url));
        }

        Ok(Page {
            items,
            page: shares.page,
            per_page: shares.per_page,
            total: shares.total,
        })
    }

    /// Well-formed, known, active and unexpired, in that order
    async fn live_share(&self, token: &str) -> Result<ShareRecord> {
        if !ShareTokenIssuer::is_well_formed(token) {
            return Err(reject(token, RejectReason::Malformed));
        }

        let share = self
            .store
            .find_share_by_token(token)
            .await?
            .ok_or_else(|| reject(token, RejectReason::NotFound))?;

        if !share.is_active {
            return Err(reject(token, RejectReason::Inactive));
        }
        if share.is_expired_at(self.clock.now()) {
            return Err(reject(token, RejectReason::Expired));
        }
        Ok(share)
    }
}

fn reject(token: &str, reason: RejectReason) -> AppError {
    tracing::warn!(
        token = %token_hint(token),
        reason = reason.as_str(),
        "Share access rejected"
    );
    AppError::ShareRejected(reason)
}

/// First few characters of a token, enough to correlate log lines
fn token_hint(token: &str) -> String {
    token.chars().take(6).collect()
}

fn is_token_conflict(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Password hash error: {}", e)))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}
