use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::file::FileRecord;

/// Share model
#[derive(Debug, Clone, FromRow)]
pub struct ShareRecord {
    pub id: String,
    pub token: String,
    pub file_id: String,
    pub issued_by: String,
    /// Argon2 PHC string, never the raw password
    pub password_hash: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ShareRecord {
    pub fn has_password(&self) -> bool {
        self.password_hash
            .as_deref()
            .is_some_and(|hash| !hash.trim().is_empty())
    }

    /// Expired once `now` reaches the expiry instant
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// What a share creator or lister gets back
#[derive(Debug, Clone, Serialize)]
pub struct ShareDescriptor {
    pub token: String,
    pub file_id: String,
    pub filename: String,
    pub file_content_type: String,
    pub file_size: i64,
    pub expires_at: DateTime<Utc>,
    pub has_password: bool,
    pub is_active: bool,
    pub share_url: String,
    pub created_at: DateTime<Utc>,
}

impl ShareDescriptor {
    pub fn from_record(share: &ShareRecord, file: &FileRecord, base_url: &str) -> Self {
        Self {
            token: share.token.clone(),
            file_id: share.file_id.clone(),
            filename: file.original_filename.clone(),
            file_content_type: file.content_type.clone(),
            file_size: file.size,
            expires_at: share.expires_at,
            has_password: share.has_password(),
            is_active: share.is_active,
            share_url: format!("{}/{}", base_url.trim_end_matches('/'), share.token),
            created_at: share.created_at,
        }
    }
}

/// Request to create a share
#[derive(Debug, Default, Deserialize)]
pub struct CreateShareRequest {
    pub password: Option<String>,
    pub expiry_minutes: Option<i64>,
}

/// Request to open a share
#[derive(Debug, Default, Deserialize)]
pub struct AccessShareRequest {
    pub password: Option<String>,
}

/// Public share info (safe to return to anyone with the token)
#[derive(Debug, Serialize)]
pub struct ShareInfo {
    pub filename: String,
    pub has_password: bool,
    pub expires_at: DateTime<Utc>,
}

/// Page query parameters, `page` is zero based
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub page: u32,
    pub per_page: Option<u32>,
}

/// One page of results
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            per_page: self.per_page,
            total: self.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(expires_at: DateTime<Utc>, password_hash: Option<&str>) -> ShareRecord {
        ShareRecord {
            id: "s1".into(),
            token: "tok".into(),
            file_id: "f1".into(),
            issued_by: "alice".into(),
            password_hash: password_hash.map(str::to_string),
            expires_at,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let now = Utc::now();
        let share = record(now, None);
        assert!(share.is_expired_at(now));
        assert!(!share.is_expired_at(now - Duration::seconds(1)));
    }

    #[test]
    fn test_descriptor_hides_verifier() {
        let share = record(Utc::now(), Some("$argon2id$v=19$..."));
        let file = FileRecord {
            id: "f1".into(),
            owner_id: "alice".into(),
            original_filename: "report.pdf".into(),
            stored_name: "0f3a_1700000000000_report.pdf".into(),
            content_type: "application/pdf".into(),
            size: 1200,
            created_at: Utc::now(),
            share_ids: vec!["s1".into()],
        };
        let desc = ShareDescriptor::from_record(&share, &file, "https://example.com/s/");
        assert!(desc.has_password);
        assert_eq!(desc.share_url, "https://example.com/s/tok");
        assert_eq!(desc.filename, "report.pdf");
        assert_eq!(desc.file_content_type, "application/pdf");
        assert_eq!(desc.file_size, 1200);

        let json = serde_json::to_string(&desc).unwrap();
        assert!(!json.contains("argon2"));
        assert!(!json.contains("0f3a_"));
    }

    #[test]
    fn test_blank_hash_is_open() {
        assert!(!record(Utc::now(), Some("  ")).has_password());
    }
}
