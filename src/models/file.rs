use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Stored file metadata
#[derive(Debug, Clone, FromRow)]
pub struct FileRecord {
    pub id: String,
    pub owner_id: String,
    pub original_filename: String,
    /// Name of the encrypted blob on the backing store, never user supplied
    pub stored_name: String,
    pub content_type: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
    /// Ids of the shares this file owns, filled in by the record store
    #[sqlx(skip)]
    pub share_ids: Vec<String>,
}

/// File response (without the stored blob name)
#[derive(Debug, Clone, Serialize)]
pub struct FileDescriptor {
    pub id: String,
    pub original_filename: String,
    pub content_type: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
    pub share_ids: Vec<String>,
}

impl From<FileRecord> for FileDescriptor {
    fn from(file: FileRecord) -> Self {
        Self {
            id: file.id,
            original_filename: file.original_filename,
            content_type: file.content_type,
            size: file.size,
            created_at: file.created_at,
            share_ids: file.share_ids,
        }
    }
}

/// Decrypted file ready to hand back to a caller
#[derive(Debug)]
pub struct FileContent {
    pub file: FileRecord,
    pub data: Vec<u8>,
}

/// Search criteria over the caller's files; every bound is inclusive
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileFilter {
    /// Case-insensitive substring of the original filename
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl FileFilter {
    /// LIKE pattern for the filename term, with wildcards in the term escaped
    pub fn filename_pattern(&self) -> Option<String> {
        let term = self.filename.as_deref()?.trim();
        if term.is_empty() {
            return None;
        }

        let mut pattern = String::with_capacity(term.len() + 2);
        pattern.push('%');
        for c in term.to_lowercase().chars() {
            if matches!(c, '%' | '_' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('%');
        Some(pattern)
    }
}
