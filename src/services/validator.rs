//! Upload admission checks
//!
//! Stages run in order and the first failure wins. The digest blocklist runs
//! last and only ever rejects on an actual match.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use crate::config::UploadConfig;
use crate::error::{AppError, Result};

/// Rejection codes reported to the uploader
pub mod codes {
    pub const EMPTY_FILE: &str = "EMPTY_FILE";
    pub const ZERO_SIZE_FILE: &str = "ZERO_SIZE_FILE";
    pub const FILE_TOO_LARGE: &str = "FILE_TOO_LARGE";
    pub const INVALID_FILENAME: &str = "INVALID_FILENAME";
    pub const FILENAME_TOO_LONG: &str = "FILENAME_TOO_LONG";
    pub const INVALID_PATH: &str = "INVALID_PATH";
    pub const MALICIOUS_FILENAME: &str = "MALICIOUS_FILENAME";
    pub const RESERVED_FILENAME: &str = "RESERVED_FILENAME";
    pub const NO_EXTENSION: &str = "NO_EXTENSION";
    pub const EMPTY_EXTENSION: &str = "EMPTY_EXTENSION";
    pub const DANGEROUS_EXTENSION: &str = "DANGEROUS_EXTENSION";
    pub const EXTENSION_NOT_ALLOWED: &str = "EXTENSION_NOT_ALLOWED";
    pub const UNKNOWN_CONTENT_TYPE: &str = "UNKNOWN_CONTENT_TYPE";
    pub const MIME_TYPE_MISMATCH: &str = "MIME_TYPE_MISMATCH";
    pub const EXECUTABLE_CONTENT: &str = "EXECUTABLE_CONTENT";
    pub const INVALID_FILE_SIGNATURE: &str = "INVALID_FILE_SIGNATURE";
    pub const MALICIOUS_CONTENT: &str = "MALICIOUS_CONTENT";
    pub const SUSPICIOUS_CONTENT: &str = "SUSPICIOUS_CONTENT";
    pub const KNOWN_MALWARE: &str = "KNOWN_MALWARE";
}

/// Pseudo-extension for client-side encrypted uploads, exempt from content heuristics
pub const ENCRYPTED_EXTENSION: &str = "enc";

/// Below this length the magic number check is skipped
const MIN_SIGNATURE_LEN: usize = 8;

const DANGEROUS_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "com", "pif", "scr", "vbs", "js", "jar", "app", "deb", "pkg", "dmg",
    "sh", "ps1", "msi", "dll",
];

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

const SUSPICIOUS_PATTERNS: &[&str] = &[
    "<script",
    "javascript:",
    "vbscript:",
    "onload=",
    "onerror=",
    "<?php",
    "<%",
    "exec(",
    "system(",
    "shell_exec",
    "rm -rf",
    "format c:",
    "del /",
    "rundll32",
];

static MALICIOUS_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(\.\.|[/\\<>:*?"|\x00-\x1f\x7f]|%00|%2e|%2f|%5c)"#).unwrap()
});

/// An inbound upload as declared by the client
#[derive(Debug, Clone, Copy)]
pub struct UploadCandidate<'a> {
    pub data: &'a [u8],
    pub filename: &'a str,
    pub content_type: &'a str,
    pub declared_size: u64,
}

/// Ordered admission pipeline for uploads
pub struct UploadValidator {
    config: UploadConfig,
    blocked_digests: HashSet<String>,
}

impl UploadValidator {
    pub fn new(config: UploadConfig) -> Self {
        let blocked_digests = config
            .blocked_digests
            .iter()
            .map(|d| d.trim().to_ascii_lowercase())
            .collect();
        Self {
            config,
            blocked_digests,
        }
    }

    pub fn validate(&self, upload: &UploadCandidate<'_>) -> Result<()> {
        tracing::debug!("Starting validation for file: {}", upload.filename);

        let result = self.run_stages(upload);
        match &result {
            Ok(()) => tracing::info!("File validation successful: {}", upload.filename),
            Err(e) => tracing::warn!(
                code = e.code().unwrap_or("UNKNOWN"),
                "File validation failed for {}: {}",
                upload.filename,
                e
            ),
        }
        result
    }

    fn run_stages(&self, upload: &UploadCandidate<'_>) -> Result<()> {
        self.check_basic_properties(upload)?;
        self.check_filename(upload.filename)?;
        let extension = self.check_extension(upload.filename)?;
        self.check_content_type(upload.content_type, &extension)?;
        self.check_signature(upload.data, &extension)?;
        if extension != ENCRYPTED_EXTENSION {
            check_content(upload.data)?;
        }
        self.check_digest(upload.data)
    }

    fn check_basic_properties(&self, upload: &UploadCandidate<'_>) -> Result<()> {
        if upload.data.is_empty() {
            return Err(AppError::validation(codes::EMPTY_FILE, "File cannot be empty"));
        }
        if upload.declared_size == 0 {
            return Err(AppError::validation(codes::ZERO_SIZE_FILE, "File has zero bytes"));
        }

        let size = upload.declared_size.max(upload.data.len() as u64);
        if size > self.config.max_file_size {
            return Err(AppError::validation(
                codes::FILE_TOO_LARGE,
                format!(
                    "File size ({} bytes) exceeds maximum limit ({} bytes)",
                    size, self.config.max_file_size
                ),
            ));
        }
        Ok(())
    }

    fn check_filename(&self, filename: &str) -> Result<()> {
        if filename.trim().is_empty() {
            return Err(AppError::validation(
                codes::INVALID_FILENAME,
                "Filename cannot be empty",
            ));
        }

        let length = filename.chars().count();
        if length > self.config.max_filename_length {
            return Err(AppError::validation(
                codes::FILENAME_TOO_LONG,
                format!(
                    "Filename too long ({} chars), maximum allowed: {}",
                    length, self.config.max_filename_length
                ),
            ));
        }

        if sanitize_filename(filename).as_deref() != Some(filename) {
            return Err(AppError::validation(
                codes::INVALID_PATH,
                "Filename contains invalid path characters",
            ));
        }

        if MALICIOUS_FILENAME.is_match(filename) {
            return Err(AppError::validation(
                codes::MALICIOUS_FILENAME,
                "Filename contains prohibited characters",
            ));
        }

        let stem = filename
            .rsplit_once('.')
            .map_or(filename, |(stem, _)| stem);
        if RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(stem)) {
            return Err(AppError::validation(
                codes::RESERVED_FILENAME,
                "Filename uses reserved system name",
            ));
        }
        Ok(())
    }

    /// Returns the lowercased extension once it is known to be allowed
    fn check_extension(&self, filename: &str) -> Result<String> {
        let extension = extension_of(filename).ok_or_else(|| {
            AppError::validation(codes::NO_EXTENSION, "File must have an extension")
        })?;

        if extension.is_empty() {
            return Err(AppError::validation(
                codes::EMPTY_EXTENSION,
                "File extension cannot be empty",
            ));
        }

        if DANGEROUS_EXTENSIONS.contains(&extension.as_str()) {
            return Err(AppError::validation(
                codes::DANGEROUS_EXTENSION,
                "File extension is not allowed for security reasons",
            ));
        }

        if !self.config.allowed_types.contains_key(&extension) {
            let allowed: Vec<&str> = self.config.allowed_types.keys().map(String::as_str).collect();
            return Err(AppError::validation(
                codes::EXTENSION_NOT_ALLOWED,
                format!(
                    "File extension '{}' is not allowed. Allowed extensions: {}",
                    extension,
                    allowed.join(", ")
                ),
            ));
        }
        Ok(extension)
    }

    fn check_content_type(&self, content_type: &str, extension: &str) -> Result<()> {
        let essence = media_type_essence(content_type);
        if essence.is_empty() {
            return Err(AppError::validation(
                codes::UNKNOWN_CONTENT_TYPE,
                "File content type cannot be determined",
            ));
        }

        let allowed = self
            .config
            .allowed_types
            .get(extension)
            .is_some_and(|types| types.iter().any(|t| t.eq_ignore_ascii_case(&essence)));
        if !allowed {
            return Err(AppError::validation(
                codes::MIME_TYPE_MISMATCH,
                format!(
                    "Content type '{}' doesn't match file extension '{}'",
                    essence, extension
                ),
            ));
        }

        if essence.contains("script") || essence.contains("executable") {
            return Err(AppError::validation(
                codes::EXECUTABLE_CONTENT,
                "Executable content type not allowed",
            ));
        }
        Ok(())
    }

    fn check_signature(&self, data: &[u8], extension: &str) -> Result<()> {
        if data.len() < MIN_SIGNATURE_LEN {
            return Ok(());
        }
        let Some(signatures) = self.config.signatures.get(extension) else {
            return Ok(());
        };
        if signatures.is_empty() {
            return Ok(());
        }

        if !signatures.iter().any(|sig| data.starts_with(sig)) {
            return Err(AppError::validation(
                codes::INVALID_FILE_SIGNATURE,
                format!(
                    "File signature doesn't match expected format for {} files",
                    extension
                ),
            ));
        }
        Ok(())
    }

    fn check_digest(&self, data: &[u8]) -> Result<()> {
        if self.blocked_digests.is_empty() {
            return Ok(());
        }
        if self.blocked_digests.contains(&content_digest(data)) {
            return Err(AppError::validation(
                codes::KNOWN_MALWARE,
                "File matches known malicious file signature",
            ));
        }
        Ok(())
    }
}

fn check_content(data: &[u8]) -> Result<()> {
    let text = String::from_utf8_lossy(data).to_lowercase();
    if SUSPICIOUS_PATTERNS.iter().any(|p| text.contains(p)) {
        return Err(AppError::validation(
            codes::MALICIOUS_CONTENT,
            "File contains potentially malicious content",
        ));
    }

    let zeros = data.iter().filter(|&&b| b == 0).count();
    // more than 30% NUL bytes
    if zeros * 10 > data.len() * 3 {
        return Err(AppError::validation(
            codes::SUSPICIOUS_CONTENT,
            "File contains suspicious amount of null bytes",
        ));
    }
    Ok(())
}

/// SHA-256 hex digest
fn content_digest(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Last path component of a client supplied name
pub fn sanitize_filename(filename: &str) -> Option<String> {
    Path::new(filename)
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

/// Lowercased text after the last dot, `None` when there is no dot
pub fn extension_of(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
}

/// `text/plain; charset=utf-8` -> `text/plain`
fn media_type_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
