use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::RecordStore;
use crate::error::{AppError, Result};
use crate::models::{CurrentUser, FileContent, FileDescriptor, FileFilter, FileRecord, Page};
use crate::services::file_store::FileStore;
use crate::services::validator::{sanitize_filename, UploadCandidate, UploadValidator};

const SEARCH_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;

/// Upload, download, list and delete for a principal's own files
pub struct FileService {
    store: Arc<dyn RecordStore>,
    files: Arc<FileStore>,
    validator: Arc<UploadValidator>,
}

impl FileService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        files: Arc<FileStore>,
        validator: Arc<UploadValidator>,
    ) -> Self {
        Self {
            store,
            files,
            validator,
        }
    }

    /// Validate, encrypt and store an upload, then record it
    pub async fn upload(
        &self,
        owner: &CurrentUser,
        filename: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<FileDescriptor> {
        self.validator.validate(&UploadCandidate {
            data,
            filename,
            content_type,
            declared_size: data.len() as u64,
        })?;

        let stored_name = self.files.write(data, filename).await?;

        let file = FileRecord {
            id: Uuid::new_v4().to_string(),
            owner_id: owner.id.clone(),
            original_filename: sanitize_filename(filename).unwrap_or_else(|| filename.to_string()),
            stored_name,
            content_type: content_type.to_string(),
            size: data.len() as i64,
            created_at: Utc::now(),
            share_ids: Vec::new(),
        };

        if let Err(e) = self.store.save_file(&file).await {
            // Don't leave an unreferenced blob behind
            if let Err(cleanup) = self.files.delete(&file.stored_name).await {
                tracing::error!(
                    "Failed to remove blob {} after record save failed: {}",
                    file.stored_name,
                    cleanup
                );
            }
            return Err(e);
        }

        tracing::info!(
            target: "audit",
            action = "file.upload",
            file_id = %file.id,
            principal = %owner.id,
            size = file.size,
            "File uploaded"
        );

        Ok(FileDescriptor::from(file))
    }

    /// Decrypted content of one of the caller's files
    pub async fn download(&self, owner: &CurrentUser, file_id: &str) -> Result<FileContent> {
        let file = self.owned_file(owner, file_id).await?;
        let data = self.files.read(&file.stored_name).await?;

        tracing::info!(
            target: "audit",
            action = "file.download",
            file_id = %file.id,
            principal = %owner.id,
            "File downloaded by owner"
        );

        Ok(FileContent { file, data })
    }

    /// The caller's files, newest first
    pub async fn list(&self, owner: &CurrentUser) -> Result<Vec<FileDescriptor>> {
        let files = self.store.find_files_by_owner(&owner.id).await?;
        Ok(files.into_iter().map(FileDescriptor::from).collect())
    }

    /// One page of the caller's files matching the filter
    pub async fn search(
        &self,
        owner: &CurrentUser,
        filter: &FileFilter,
        page: u32,
        per_page: Option<u32>,
    ) -> Result<Page<FileDescriptor>> {
        let per_page = per_page.unwrap_or(SEARCH_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let found = self
            .store
            .search_files(&owner.id, filter, page, per_page)
            .await?;

        tracing::debug!(
            "Search by {} matched {} files (page {})",
            owner.id,
            found.total,
            page
        );
        Ok(found.map(FileDescriptor::from))
    }

    /// Remove the blob, then the record together with its shares
    ///
    /// If the blob can't be removed the record is kept so the blob is never orphaned.
    pub async fn delete(&self, owner: &CurrentUser, file_id: &str) -> Result<()> {
        let file = self.owned_file(owner, file_id).await?;

        self.files.delete(&file.stored_name).await.map_err(|e| {
            tracing::error!(
                "Failed to delete blob {} for file {}: {}",
                file.stored_name,
                file.id,
                e
            );
            e
        })?;

        self.store.delete_file_with_shares(&file.id).await?;

        tracing::info!(
            target: "audit",
            action = "file.delete",
            file_id = %file.id,
            principal = %owner.id,
            shares_removed = file.share_ids.len(),
            "File deleted"
        );
        Ok(())
    }

    async fn owned_file(&self, owner: &CurrentUser, file_id: &str) -> Result<FileRecord> {
        let file = self
            .store
            .find_file(file_id)
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

        if file.owner_id != owner.id {
            return Err(AppError::Forbidden("Access denied".to_string()));
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UploadConfig;
    use crate::db::Database;
    use crate::models::{ShareRecord, UserRole};
    use crate::services::encryption::EncryptionEngine;
    use crate::services::validator::codes;
    use crate::storage::{LocalStorage, StorageProvider};
    use async_trait::async_trait;
    use axum::{http::StatusCode, response::IntoResponse};
    use bytes::Bytes;
    use std::time::Duration;
    use tempfile::TempDir;

    fn user(id: &str) -> CurrentUser {
        CurrentUser {
            id: id.to_string(),
            role: UserRole::User,
        }
    }

    fn pdf_bytes() -> Vec<u8> {
        let mut data = b"%PDF-1.4\n".to_vec();
        data.resize(1200, b'a');
        data
    }

    fn service_with(provider: Arc<dyn StorageProvider>, store: Arc<dyn RecordStore>) -> FileService {
        let files = Arc::new(FileStore::new(
            provider,
            EncryptionEngine::new(&[3u8; 32]),
            0,
            Duration::ZERO,
        ));
        let validator = Arc::new(UploadValidator::new(UploadConfig::default()));
        FileService::new(store, files, validator)
    }

    async fn service(dir: &TempDir) -> (FileService, Arc<Database>) {
        let provider = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let db = Arc::new(Database::in_memory().await.unwrap());
        (service_with(provider, db.clone()), db)
    }

    fn blob_count(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    #[tokio::test]
    async fn test_upload_download_list() {
        let dir = TempDir::new().unwrap();
        let (service, _db) = service(&dir).await;
        let alice = user("alice");

        let desc = service
            .upload(&alice, "report.pdf", "application/pdf", &pdf_bytes())
            .await
            .unwrap();
        assert_eq!(desc.original_filename, "report.pdf");
        assert_eq!(desc.size, 1200);

        let content = service.download(&alice, &desc.id).await.unwrap();
        assert_eq!(content.data, pdf_bytes());

        let listed = service.list(&alice).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(service.list(&user("bob")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_is_scoped_and_paged() {
        let dir = TempDir::new().unwrap();
        let (service, _db) = service(&dir).await;
        let alice = user("alice");
        for name in ["a-notes.txt", "b-notes.txt", "c-notes.txt"] {
            service
                .upload(&alice, name, "text/plain", b"hello notes")
                .await
                .unwrap();
        }
        service
            .upload(&user("bob"), "bob-notes.txt", "text/plain", b"hello notes")
            .await
            .unwrap();

        let filter = FileFilter {
            filename: Some("NOTES".to_string()),
            ..Default::default()
        };
        let first = service.search(&alice, &filter, 0, Some(2)).await.unwrap();
        assert_eq!(first.total, 3);
        assert_eq!(first.items.len(), 2);
        assert!(first.items.iter().all(|f| f.original_filename != "bob-notes.txt"));

        let defaulted = service.search(&alice, &filter, 0, None).await.unwrap();
        assert_eq!(defaulted.per_page, SEARCH_PAGE_SIZE);
        assert_eq!(defaulted.items.len(), 3);

        let clamped = service.search(&alice, &filter, 0, Some(0)).await.unwrap();
        assert_eq!(clamped.per_page, 1);
        assert_eq!(clamped.items.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_upload_stores_nothing() {
        let dir = TempDir::new().unwrap();
        let (service, _db) = service(&dir).await;

        let err = service
            .upload(&user("alice"), "virus.exe", "application/pdf", b"MZ\x90\x00 payload")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(codes::DANGEROUS_EXTENSION));
        assert_eq!(blob_count(&dir), 0);
    }

    #[tokio::test]
    async fn test_foreign_file_access_denied() {
        let dir = TempDir::new().unwrap();
        let (service, _db) = service(&dir).await;
        let desc = service
            .upload(&user("alice"), "notes.txt", "text/plain", b"hello notes")
            .await
            .unwrap();

        let bob = user("bob");
        assert!(matches!(
            service.download(&bob, &desc.id).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            service.delete(&bob, &desc.id).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            service.download(&bob, "missing").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_blob_record_and_shares() {
        let dir = TempDir::new().unwrap();
        let (service, db) = service(&dir).await;
        let alice = user("alice");
        let desc = service
            .upload(&alice, "notes.txt", "text/plain", b"hello notes")
            .await
            .unwrap();

        db.save_share(&ShareRecord {
            id: "s1".to_string(),
            token: "t".repeat(43),
            file_id: desc.id.clone(),
            issued_by: "alice".to_string(),
            password_hash: None,
            expires_at: Utc::now() + chrono::Duration::hours(1),
            is_active: true,
            created_at: Utc::now(),
        })
        .await
        .unwrap();

        service.delete(&alice, &desc.id).await.unwrap();
        assert_eq!(blob_count(&dir), 0);
        assert!(db.find_file(&desc.id).await.unwrap().is_none());
        assert!(db.find_share_by_token(&"t".repeat(43)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_download_with_missing_blob_is_opaque() {
        let dir = TempDir::new().unwrap();
        let (service, db) = service(&dir).await;
        let alice = user("alice");
        let desc = service
            .upload(&alice, "notes.txt", "text/plain", b"hello notes")
            .await
            .unwrap();
        let stored_name = db.find_file(&desc.id).await.unwrap().unwrap().stored_name;
        std::fs::remove_file(dir.path().join(&stored_name)).unwrap();

        let err = match service.download(&alice, &desc.id).await {
            Err(e) => e,
            Ok(_) => panic!("downloaded a file whose blob is gone"),
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(!String::from_utf8_lossy(&body).contains(&stored_name));
    }

    /// Storage whose deletes always fail
    struct StuckStorage(LocalStorage);

    #[async_trait]
    impl StorageProvider for StuckStorage {
        async fn put(&self, name: &str, data: Bytes) -> Result<()> {
            self.0.put(name, data).await
        }

        async fn get(&self, name: &str) -> Result<Bytes> {
            self.0.get(name).await
        }

        async fn delete(&self, _name: &str) -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only").into())
        }

        fn storage_type(&self) -> &'static str {
            "stuck"
        }
    }

    #[tokio::test]
    async fn test_failed_blob_delete_keeps_record() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(StuckStorage(LocalStorage::new(dir.path()).await.unwrap()));
        let db = Arc::new(Database::in_memory().await.unwrap());
        let service = service_with(provider, db.clone());
        let alice = user("alice");

        let desc = service
            .upload(&alice, "notes.txt", "text/plain", b"hello notes")
            .await
            .unwrap();
        assert!(matches!(
            service.delete(&alice, &desc.id).await,
            Err(AppError::Storage(_))
        ));
        assert!(db.find_file(&desc.id).await.unwrap().is_some());
    }

    /// Record store that refuses to save files
    struct BrokenRecords;

    #[async_trait]
    impl RecordStore for BrokenRecords {
        async fn save_file(&self, _file: &FileRecord) -> Result<()> {
            Err(AppError::Internal("disk full".to_string()))
        }

        async fn find_file(&self, _id: &str) -> Result<Option<FileRecord>> {
            Ok(None)
        }

        async fn find_files_by_owner(&self, _owner_id: &str) -> Result<Vec<FileRecord>> {
            Ok(Vec::new())
        }

        async fn search_files(
            &self,
            _owner_id: &str,
            _filter: &FileFilter,
            page: u32,
            per_page: u32,
        ) -> Result<Page<FileRecord>> {
            Ok(Page {
                items: Vec::new(),
                page,
                per_page,
                total: 0,
            })
        }

        async fn delete_file_with_shares(&self, _id: &str) -> Result<()> {
            Ok(())
        }

        async fn save_share(&self, _share: &ShareRecord) -> Result<()> {
            Ok(())
        }

        async fn find_share_by_token(&self, _token: &str) -> Result<Option<ShareRecord>> {
            Ok(None)
        }

        async fn find_shares_by_issuer(
            &self,
            _issuer: &str,
            page: u32,
            per_page: u32,
        ) -> Result<Page<ShareRecord>> {
            Ok(Page {
                items: Vec::new(),
                page,
                per_page,
                total: 0,
            })
        }

        async fn deactivate_share(&self, _id: &str) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_record_save_removes_blob() {
        let dir = TempDir::new().unwrap();
        let provider = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let service = service_with(provider, Arc::new(BrokenRecords));

        let result = service
            .upload(&user("alice"), "notes.txt", "text/plain", b"hello notes")
            .await;
        assert!(matches!(result, Err(AppError::Internal(_))));
        assert_eq!(blob_count(&dir), 0);
    }
}
