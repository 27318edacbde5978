use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::storage::StorageProvider;

/// Local file system storage provider
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Open (and create if needed) the blob directory, restricted to the current user
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&base_path, std::fs::Permissions::from_mode(0o700)).await?;
        }

        tracing::info!("Local storage ready at {:?}", base_path);
        Ok(Self { base_path })
    }

    fn get_full_path(&self, name: &str) -> Result<PathBuf> {
        let flat = !name.is_empty()
            && !name.contains(['/', '\\'])
            && name != "."
            && name != ".."
            && !name.starts_with('.');
        if !flat {
            return Err(AppError::Internal(format!("Invalid blob name: {:?}", name)));
        }
        Ok(self.base_path.join(name))
    }

    async fn write_temp(temp_path: &Path, data: &[u8]) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(temp_path)
            .await?;
        file.write_all(data).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl StorageProvider for LocalStorage {
    async fn put(&self, name: &str, data: Bytes) -> Result<()> {
        let full_path = self.get_full_path(name)?;
        // Hidden temp file in the same directory so the rename stays atomic
        let temp_path = self
            .base_path
            .join(format!(".{}.{}.partial", name, Uuid::new_v4()));

        let written = match Self::write_temp(&temp_path, &data).await {
            Ok(()) => fs::rename(&temp_path, &full_path).await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&temp_path).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    tracing::error!("Failed to remove partial blob {:?}: {}", temp_path, cleanup);
                }
            }
            return Err(e.into());
        }

        tracing::debug!("Saved blob to {:?}", full_path);
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Bytes> {
        let full_path = self.get_full_path(name)?;

        let data = fs::read(&full_path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                AppError::NotFound("Blob not found".to_string())
            } else {
                AppError::Storage(e)
            }
        })?;

        Ok(Bytes::from(data))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let full_path = self.get_full_path(name)?;

        match fs::remove_file(&full_path).await {
            Ok(()) => {
                tracing::debug!("Deleted blob {:?}", full_path);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("Blob {:?} already absent", full_path);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn storage_type(&self) -> &'static str {
        "local"
    }
}
