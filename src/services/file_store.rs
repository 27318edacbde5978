use bytes::Bytes;
use chrono::Utc;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::services::encryption::EncryptionEngine;
use crate::services::validator::sanitize_filename;
use crate::storage::StorageProvider;

/// Longest slice of the original name kept in a stored name
const MAX_NAME_HINT: usize = 64;

/// Ceiling for a single retry delay
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Maps logical files to encrypted blobs on a storage provider
pub struct FileStore {
    provider: Arc<dyn StorageProvider>,
    engine: EncryptionEngine,
    write_retries: u32,
    retry_backoff: Duration,
}

impl FileStore {
    pub fn new(
        provider: Arc<dyn StorageProvider>,
        engine: EncryptionEngine,
        write_retries: u32,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            provider,
            engine,
            write_retries,
            retry_backoff,
        }
    }

    /// Encrypt and store `plaintext`, returning the generated blob name
    pub async fn write(&self, plaintext: &[u8], original_name: &str) -> Result<String> {
        let stored_name = stored_name_for(original_name);
        let blob = Bytes::from(self.engine.encrypt(plaintext)?);

        let mut attempt = 0;
        loop {
            match self.provider.put(&stored_name, blob.clone()).await {
                Ok(()) => break,
                Err(AppError::Storage(e)) if is_transient(e.kind()) && attempt < self.write_retries => {
                    let delay = backoff_delay(self.retry_backoff, attempt);
                    attempt += 1;
                    tracing::warn!(
                        "Transient error writing {} (attempt {}/{}), retrying in {:?}: {}",
                        stored_name,
                        attempt,
                        self.write_retries,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }

        tracing::debug!(
            "Stored {} bytes as {} on {} storage",
            plaintext.len(),
            stored_name,
            self.provider.storage_type()
        );
        Ok(stored_name)
    }

    /// Read and decrypt a stored blob
    ///
    /// A missing blob is reported as a storage fault.
    pub async fn read(&self, stored_name: &str) -> Result<Vec<u8>> {
        let blob = self.provider.get(stored_name).await.map_err(|e| match e {
            AppError::NotFound(_) => {
                tracing::error!("Blob {} is missing from storage", stored_name);
                AppError::Storage(std::io::Error::new(
                    ErrorKind::NotFound,
                    "stored blob is missing",
                ))
            }
            e => e,
        })?;
        self.engine.decrypt(&blob).map_err(|e| {
            tracing::error!("Integrity check failed for blob {}: {}", stored_name, e);
            e
        })
    }

    /// Remove a stored blob; already-missing blobs count as removed
    pub async fn delete(&self, stored_name: &str) -> Result<()> {
        self.provider.delete(stored_name).await
    }
}

fn is_transient(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
    )
}

/// `base * 2^attempt`, saturating at [`MAX_BACKOFF`]
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(MAX_BACKOFF)
}

/// `<uuid>_<millis>_<safe base name>`, unique regardless of what the client sent
fn stored_name_for(original_name: &str) -> String {
    let base = sanitize_filename(original_name).unwrap_or_default();
    let hint: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_HINT)
        .collect();
    let hint = hint.trim_start_matches('.');
    let hint = if hint.is_empty() { "file" } else { hint };

    format!(
        "{}_{}_{}",
        Uuid::new_v4().simple(),
        Utc::now().timestamp_millis(),
        hint
    )
}
