use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, QueryBuilder, Sqlite, SqlitePool};

use crate::error::Result;
use crate::models::{FileFilter, FileRecord, Page, ShareRecord};

/// Persistence seen by the file and share services
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn save_file(&self, file: &FileRecord) -> Result<()>;

    async fn find_file(&self, id: &str) -> Result<Option<FileRecord>>;

    async fn find_files_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>>;

    /// Owner's files matching every criterion set in the filter, newest first
    async fn search_files(
        &self,
        owner_id: &str,
        filter: &FileFilter,
        page: u32,
        per_page: u32,
    ) -> Result<Page<FileRecord>>;

    /// Remove the file record and every share it owns in one transaction
    async fn delete_file_with_shares(&self, id: &str) -> Result<()>;

    async fn save_share(&self, share: &ShareRecord) -> Result<()>;

    async fn find_share_by_token(&self, token: &str) -> Result<Option<ShareRecord>>;

    async fn find_shares_by_issuer(
        &self,
        issuer: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Page<ShareRecord>>;

    /// One-way: there is no way back to active
    async fn deactivate_share(&self, id: &str) -> Result<()>;
}

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(path: &str) -> Result<Self> {
        let url = format!("sqlite:{}?mode=rwc", path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        Ok(Self { pool })
    }

    /// Private in-memory database, single connection so every query sees the same data
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                original_filename TEXT NOT NULL,
                stored_name TEXT UNIQUE NOT NULL,
                content_type TEXT NOT NULL,
                size INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS shares (
                id TEXT PRIMARY KEY,
                token TEXT UNIQUE NOT NULL,
                file_id TEXT NOT NULL,
                issued_by TEXT NOT NULL,
                password_hash TEXT,
                expires_at TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                FOREIGN KEY (file_id) REFERENCES files(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_owner_id ON files(owner_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_shares_file_id ON shares(file_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_shares_issued_by ON shares(issued_by)")
            .execute(&self.pool)
            .await?;

        tracing::info!("Database migrations completed");
        Ok(())
    }

    fn filtered_files<'a>(
        select: &str,
        owner_id: &'a str,
        filter: &'a FileFilter,
    ) -> QueryBuilder<'a, Sqlite> {
        let mut query = QueryBuilder::new(select);
        query.push(" WHERE owner_id = ").push_bind(owner_id);

        if let Some(pattern) = filter.filename_pattern() {
            query
                .push(" AND LOWER(original_filename) LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\'");
        }
        if let Some(content_type) = &filter.content_type {
            query.push(" AND content_type = ").push_bind(content_type.as_str());
        }
        if let Some(min) = filter.min_size {
            query.push(" AND size >= ").push_bind(min);
        }
        if let Some(max) = filter.max_size {
            query.push(" AND size <= ").push_bind(max);
        }
        if let Some(start) = filter.start_date {
            query.push(" AND created_at >= ").push_bind(start);
        }
        if let Some(end) = filter.end_date {
            query.push(" AND created_at <= ").push_bind(end);
        }
        query
    }

    async fn share_ids_of(&self, file_id: &str) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar("SELECT id FROM shares WHERE file_id = ? ORDER BY created_at")
            .bind(file_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }
}

#[async_trait]
impl RecordStore for Database {
    async fn save_file(&self, file: &FileRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO files (id, owner_id, original_filename, stored_name, content_type, size, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file.id)
        .bind(&file.owner_id)
        .bind(&file.original_filename)
        .bind(&file.stored_name)
        .bind(&file.content_type)
        .bind(file.size)
        .bind(file.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_file(&self, id: &str) -> Result<Option<FileRecord>> {
        let file: Option<FileRecord> = sqlx::query_as("SELECT * FROM files WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match file {
            Some(mut file) => {
                file.share_ids = self.share_ids_of(&file.id).await?;
                Ok(Some(file))
            }
            None => Ok(None),
        }
    }

    async fn find_files_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>> {
        let mut files: Vec<FileRecord> =
            sqlx::query_as("SELECT * FROM files WHERE owner_id = ? ORDER BY created_at DESC")
                .bind(owner_id)
                .fetch_all(&self.pool)
                .await?;

        for file in &mut files {
            file.share_ids = self.share_ids_of(&file.id).await?;
        }
        Ok(files)
    }

    async fn search_files(
        &self,
        owner_id: &str,
        filter: &FileFilter,
        page: u32,
        per_page: u32,
    ) -> Result<Page<FileRecord>> {
        let total: i64 = Self::filtered_files("SELECT COUNT(*) FROM files", owner_id, filter)
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut query = Self::filtered_files("SELECT * FROM files", owner_id, filter);
        query
            .push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(i64::from(per_page))
            .push(" OFFSET ")
            .push_bind(i64::from(page) * i64::from(per_page));

        let mut items: Vec<FileRecord> = query.build_query_as().fetch_all(&self.pool).await?;
        for file in &mut items {
            file.share_ids = self.share_ids_of(&file.id).await?;
        }

        Ok(Page {
            items,
            page,
            per_page,
            total,
        })
    }

    async fn delete_file_with_shares(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM shares WHERE file_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn save_share(&self, share: &ShareRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO shares (id, token, file_id, issued_by, password_hash, expires_at, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&share.id)
        .bind(&share.token)
        .bind(&share.file_id)
        .bind(&share.issued_by)
        .bind(&share.password_hash)
        .bind(share.expires_at)
        .bind(share.is_active)
        .bind(share.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_share_by_token(&self, token: &str) -> Result<Option<ShareRecord>> {
        let share = sqlx::query_as("SELECT * FROM shares WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(share)
    }

    async fn find_shares_by_issuer(
        &self,
        issuer: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Page<ShareRecord>> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM shares WHERE issued_by = ?")
            .bind(issuer)
            .fetch_one(&self.pool)
            .await?;

        let items = sqlx::query_as(
            "SELECT * FROM shares WHERE issued_by = ? ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
        )
        .bind(issuer)
        .bind(i64::from(per_page))
        .bind(i64::from(page) * i64::from(per_page))
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items,
            page,
            per_page,
            total,
        })
    }

    async fn deactivate_share(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE shares SET is_active = 0 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn file(id: &str, owner: &str) -> FileRecord {
        FileRecord {
            id: id.to_string(),
            owner_id: owner.to_string(),
            original_filename: "report.pdf".to_string(),
            stored_name: format!("{id}_blob"),
            content_type: "application/pdf".to_string(),
            size: 1200,
            created_at: Utc::now(),
            share_ids: Vec::new(),
        }
    }

    fn share(id: &str, file_id: &str, issuer: &str) -> ShareRecord {
        ShareRecord {
            id: id.to_string(),
            token: format!("token-{id}"),
            file_id: file_id.to_string(),
            issued_by: issuer.to_string(),
            password_hash: None,
            expires_at: Utc::now() + Duration::hours(1),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_file_owns_share_ids() {
        let db = Database::in_memory().await.unwrap();
        db.save_file(&file("f1", "alice")).await.unwrap();
        db.save_share(&share("s1", "f1", "alice")).await.unwrap();
        db.save_share(&share("s2", "f1", "alice")).await.unwrap();

        let loaded = db.find_file("f1").await.unwrap().unwrap();
        assert_eq!(loaded.share_ids.len(), 2);
        assert!(loaded.share_ids.contains(&"s1".to_string()));
        assert!(db.find_file("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_token_rejected() {
        let db = Database::in_memory().await.unwrap();
        db.save_file(&file("f1", "alice")).await.unwrap();
        db.save_share(&share("s1", "f1", "alice")).await.unwrap();

        let mut dup = share("s2", "f1", "alice");
        dup.token = "token-s1".to_string();
        assert!(db.save_share(&dup).await.is_err());
    }

    #[tokio::test]
    async fn test_deactivate_and_cascade_delete() {
        let db = Database::in_memory().await.unwrap();
        db.save_file(&file("f1", "alice")).await.unwrap();
        db.save_share(&share("s1", "f1", "alice")).await.unwrap();

        db.deactivate_share("s1").await.unwrap();
        let stored = db.find_share_by_token("token-s1").await.unwrap().unwrap();
        assert!(!stored.is_active);

        db.delete_file_with_shares("f1").await.unwrap();
        assert!(db.find_file("f1").await.unwrap().is_none());
        assert!(db.find_share_by_token("token-s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shares_paginated_by_issuer() {
        let db = Database::in_memory().await.unwrap();
        db.save_file(&file("f1", "alice")).await.unwrap();
        for i in 0..5 {
            db.save_share(&share(&format!("a{i}"), "f1", "alice")).await.unwrap();
        }
        db.save_share(&share("b0", "f1", "bob")).await.unwrap();

        let first = db.find_shares_by_issuer("alice", 0, 2).await.unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.items.len(), 2);

        let last = db.find_shares_by_issuer("alice", 2, 2).await.unwrap();
        assert_eq!(last.items.len(), 1);
        assert!(last.items.iter().all(|s| s.issued_by == "alice"));
    }

    #[tokio::test]
    async fn test_search_files() {
        let db = Database::in_memory().await.unwrap();
        let base = Utc::now() - Duration::days(10);
        let specs = [
            ("f1", "Quarterly_Report.pdf", "application/pdf", 1200, 0),
            ("f2", "report-draft.txt", "text/plain", 300, 3),
            ("f3", "holiday.png", "image/png", 5000, 6),
            ("f4", "100%_done.txt", "text/plain", 10, 9),
        ];
        for (id, name, content_type, size, day) in specs {
            let mut f = file(id, "alice");
            f.original_filename = name.to_string();
            f.content_type = content_type.to_string();
            f.size = size;
            f.created_at = base + Duration::days(day);
            db.save_file(&f).await.unwrap();
        }
        db.save_file(&file("other", "bob")).await.unwrap();
        db.save_share(&share("s1", "f2", "alice")).await.unwrap();

        let ids = |page: &Page<FileRecord>| {
            page.items.iter().map(|f| f.id.as_str()).collect::<Vec<_>>().join(",")
        };

        let by_name = FileFilter {
            filename: Some("REPORT".to_string()),
            ..Default::default()
        };
        let found = db.search_files("alice", &by_name, 0, 20).await.unwrap();
        assert_eq!(found.total, 2);
        assert_eq!(ids(&found), "f2,f1");
        assert_eq!(found.items[0].share_ids, vec!["s1".to_string()]);

        let literal = FileFilter {
            filename: Some("%_".to_string()),
            ..Default::default()
        };
        assert_eq!(ids(&db.search_files("alice", &literal, 0, 20).await.unwrap()), "f4");

        let bounded = FileFilter {
            content_type: Some("text/plain".to_string()),
            min_size: Some(10),
            max_size: Some(300),
            start_date: Some(base + Duration::days(3)),
            end_date: Some(base + Duration::days(9)),
            ..Default::default()
        };
        assert_eq!(ids(&db.search_files("alice", &bounded, 0, 20).await.unwrap()), "f4,f2");

        let everything = db
            .search_files("alice", &FileFilter::default(), 1, 3)
            .await
            .unwrap();
        assert_eq!(everything.total, 4);
        assert_eq!(ids(&everything), "f1");

        let foreign = db.search_files("bob", &by_name, 0, 20).await.unwrap();
        assert_eq!(foreign.total, 1);
        assert_eq!(ids(&foreign), "other");
    }
}
