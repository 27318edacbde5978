use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub share: ShareConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Prefix for links handed out to share recipients
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_local_path")]
    pub local_path: String,
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EncryptionConfig {
    /// Base64 encoded 256-bit key
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_max_filename_length")]
    pub max_filename_length: usize,
    /// extension -> accepted content types
    #[serde(default = "default_allowed_types")]
    pub allowed_types: BTreeMap<String, Vec<String>>,
    /// extension -> accepted leading byte sequences
    #[serde(default = "default_signatures")]
    pub signatures: BTreeMap<String, Vec<Vec<u8>>>,
    /// SHA-256 hex digests of known-bad content
    #[serde(default = "default_blocked_digests")]
    pub blocked_digests: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShareConfig {
    #[serde(default = "default_expiry_minutes")]
    pub default_expiry_minutes: i64,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct JwtConfig {
    #[serde(default)]
    pub secret: String,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_public_base_url() -> String {
    "http://localhost:5173/share/access".to_string()
}

fn default_db_path() -> String {
    "data/secure-share.db".to_string()
}

fn default_local_path() -> String {
    "data/uploads".to_string()
}

fn default_write_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    50
}

fn default_max_file_size() -> u64 {
    50 * 1024 * 1024
}

fn default_max_filename_length() -> usize {
    255
}

fn default_allowed_types() -> BTreeMap<String, Vec<String>> {
    let entries: [(&str, &[&str]); 10] = [
        ("jpg", &["image/jpeg"]),
        ("jpeg", &["image/jpeg"]),
        ("png", &["image/png"]),
        ("pdf", &["application/pdf"]),
        ("txt", &["text/plain"]),
        ("doc", &["application/msword"]),
        (
            "docx",
            &["application/vnd.openxmlformats-officedocument.wordprocessingml.document"],
        ),
        ("xls", &["application/vnd.ms-excel"]),
        (
            "xlsx",
            &["application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"],
        ),
        (
            "enc",
            &[
                "application/octet-stream",
                "application/x-encrypted",
                "application/encrypted",
            ],
        ),
    ];
    entries
        .iter()
        .map(|(ext, types)| {
            (
                ext.to_string(),
                types.iter().map(|t| t.to_string()).collect(),
            )
        })
        .collect()
}

fn default_signatures() -> BTreeMap<String, Vec<Vec<u8>>> {
    let mut map = BTreeMap::new();
    map.insert("pdf".to_string(), vec![b"%PDF".to_vec()]);
    map.insert("jpg".to_string(), vec![vec![0xFF, 0xD8, 0xFF]]);
    map.insert("jpeg".to_string(), vec![vec![0xFF, 0xD8, 0xFF]]);
    map.insert(
        "png".to_string(),
        vec![vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]],
    );
    map
}

fn default_blocked_digests() -> Vec<String> {
    // SHA-256 of the empty input, placeholder for a real feed
    vec!["e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855".to_string()]
}

fn default_expiry_minutes() -> i64 {
    24 * 60
}

fn default_per_page() -> u32 {
    20
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_base_url: default_public_base_url(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_path: default_local_path(),
            write_retries: default_write_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            max_filename_length: default_max_filename_length(),
            allowed_types: default_allowed_types(),
            signatures: default_signatures(),
            blocked_digests: default_blocked_digests(),
        }
    }
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            default_expiry_minutes: default_expiry_minutes(),
            per_page: default_per_page(),
        }
    }
}

impl ShareConfig {
    /// Default share window, `None` unless positive and representable
    pub fn default_expiry(&self) -> Option<chrono::Duration> {
        chrono::Duration::try_minutes(self.default_expiry_minutes)
            .filter(|window| *window > chrono::Duration::zero())
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.validate()?;
        config.ensure_directories()?;
        config.ensure_encryption_key()?;
        config.ensure_jwt_secret()?;
        Ok(config)
    }

    /// Reject values that would only fail once a request hits them
    fn validate(&self) -> anyhow::Result<()> {
        if self.share.default_expiry().is_none() {
            anyhow::bail!(
                "share.default_expiry_minutes must be a positive number of minutes, got {}",
                self.share.default_expiry_minutes
            );
        }
        if self.share.per_page == 0 {
            anyhow::bail!("share.per_page must be at least 1");
        }
        Ok(())
    }

    /// Decode the configured AES-256 key
    pub fn encryption_key(&self) -> anyhow::Result<[u8; 32]> {
        let raw = STANDARD
            .decode(self.encryption.key.trim())
            .map_err(|e| anyhow::anyhow!("encryption key is not valid base64: {e}"))?;
        raw.as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("encryption key must be 32 bytes, got {}", raw.len()))
    }

    /// Generate and persist a key on first start so stored blobs stay readable
    fn ensure_encryption_key(&mut self) -> anyhow::Result<()> {
        if self.encryption.key.trim().is_empty() {
            let key_path = Path::new("data/.encryption_key");
            if key_path.exists() {
                self.encryption.key = fs::read_to_string(key_path)?.trim().to_string();
                tracing::info!("Loaded persisted encryption key from data/.encryption_key");
            } else {
                let mut key = [0u8; 32];
                OsRng.fill_bytes(&mut key);
                let encoded = STANDARD.encode(key);
                write_secret(key_path, &encoded)?;
                self.encryption.key = encoded;
                tracing::info!("Generated and persisted new encryption key to data/.encryption_key");
            }
        }
        // Fail at startup rather than on the first upload
        self.encryption_key()?;
        Ok(())
    }

    fn ensure_jwt_secret(&mut self) -> anyhow::Result<()> {
        if self.jwt.secret.trim().is_empty() {
            let secret_path = Path::new("data/.jwt_secret");
            if secret_path.exists() {
                self.jwt.secret = fs::read_to_string(secret_path)?.trim().to_string();
                tracing::info!("Loaded persisted JWT secret from data/.jwt_secret");
            } else {
                let mut secret = [0u8; 32];
                OsRng.fill_bytes(&mut secret);
                let encoded = STANDARD.encode(secret);
                write_secret(secret_path, &encoded)?;
                self.jwt.secret = encoded;
                tracing::info!("Generated and persisted new JWT secret to data/.jwt_secret");
            }
        }
        Ok(())
    }

    /// Load configuration from conf.toml or config.toml
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["conf.toml", "config.toml", "data/conf.toml", "data/config.toml"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config: Config = toml::from_str(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Apply environment variable overrides
    /// Format: SS_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("SS_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = env::var("SS_CONF_SERVER_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }
        if let Ok(val) = env::var("SS_CONF_SERVER_PUBLIC_BASE_URL") {
            self.server.public_base_url = val;
        }

        if let Ok(val) = env::var("SS_CONF_DATABASE_PATH") {
            self.database.path = val;
        }

        if let Ok(val) = env::var("SS_CONF_STORAGE_LOCAL_PATH") {
            self.storage.local_path = val;
        }
        if let Ok(val) = env::var("SS_CONF_STORAGE_WRITE_RETRIES") {
            if let Ok(retries) = val.parse() {
                self.storage.write_retries = retries;
            }
        }
        if let Ok(val) = env::var("SS_CONF_STORAGE_RETRY_BACKOFF_MS") {
            if let Ok(ms) = val.parse() {
                self.storage.retry_backoff_ms = ms;
            }
        }

        if let Ok(val) = env::var("SS_CONF_ENCRYPTION_KEY") {
            self.encryption.key = val;
        }

        if let Ok(val) = env::var("SS_CONF_UPLOAD_MAX_FILE_SIZE") {
            if let Ok(size) = val.parse() {
                self.upload.max_file_size = size;
            }
        }
        if let Ok(val) = env::var("SS_CONF_UPLOAD_MAX_FILENAME_LENGTH") {
            if let Ok(len) = val.parse() {
                self.upload.max_filename_length = len;
            }
        }

        if let Ok(val) = env::var("SS_CONF_SHARE_DEFAULT_EXPIRY_MINUTES") {
            if let Ok(minutes) = val.parse() {
                self.share.default_expiry_minutes = minutes;
            }
        }
        if let Ok(val) = env::var("SS_CONF_SHARE_PER_PAGE") {
            if let Ok(per_page) = val.parse() {
                self.share.per_page = per_page;
            }
        }

        if let Ok(val) = env::var("SS_CONF_JWT_SECRET") {
            self.jwt.secret = val;
        }
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        if let Some(parent) = Path::new(&self.database.path).parent() {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir_all("data")?;
        Ok(())
    }
}

/// Write a secret file readable only by the current user
fn write_secret(path: &Path, contents: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.upload.max_file_size, 52_428_800);
        assert_eq!(config.upload.max_filename_length, 255);
        assert_eq!(config.share.default_expiry_minutes, 1440);
        assert!(config.upload.allowed_types["enc"].contains(&"application/x-encrypted".to_string()));
        assert_eq!(config.upload.signatures["pdf"], vec![b"%PDF".to_vec()]);
    }

    #[test]
    fn test_parse_toml_sections() {
        let config: Config = toml::from_str(
            r#"
            [upload]
            max_file_size = 1024
            [upload.allowed_types]
            csv = ["text/csv"]
            [upload.signatures]
            gif = [[71, 73, 70]]
            [share]
            default_expiry_minutes = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.upload.max_file_size, 1024);
        assert_eq!(config.upload.allowed_types.len(), 1);
        assert_eq!(config.upload.signatures["gif"], vec![b"GIF".to_vec()]);
        assert_eq!(config.upload.max_filename_length, 255);
        assert_eq!(config.share.default_expiry_minutes, 5);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_encryption_key_decoding() {
        let mut config = Config::default();
        config.encryption.key = STANDARD.encode([7u8; 32]);
        assert_eq!(config.encryption_key().unwrap(), [7u8; 32]);

        config.encryption.key = STANDARD.encode([7u8; 16]);
        assert!(config.encryption_key().is_err());

        config.encryption.key = "not base64!".to_string();
        assert!(config.encryption_key().is_err());
    }

    #[test]
    fn test_validate_share_expiry() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        for minutes in [0, -5, i64::MAX] {
            config.share.default_expiry_minutes = minutes;
            assert!(config.validate().is_err(), "{minutes} accepted");
        }

        config.share.default_expiry_minutes = 5;
        config.share.per_page = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides_for_backoff_and_page_size() {
        env::set_var("SS_CONF_STORAGE_RETRY_BACKOFF_MS", "250");
        env::set_var("SS_CONF_SHARE_PER_PAGE", "7");

        let mut config = Config::default();
        config.apply_env_overrides();

        env::remove_var("SS_CONF_STORAGE_RETRY_BACKOFF_MS");
        env::remove_var("SS_CONF_SHARE_PER_PAGE");

        assert_eq!(config.storage.retry_backoff_ms, 250);
        assert_eq!(config.share.per_page, 7);
    }
}
