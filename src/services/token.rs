use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use regex::Regex;
use std::sync::LazyLock;

/// 256 bits of entropy per token
const TOKEN_BYTES: usize = 32;

static TOKEN_FORMAT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{32,64}$").unwrap());

/// Issues and pre-checks opaque share tokens
pub struct ShareTokenIssuer;

impl ShareTokenIssuer {
    /// New URL-safe token (43 characters, no padding)
    pub fn issue() -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Cheap shape check done before any store lookup
    pub fn is_well_formed(token: &str) -> bool {
        TOKEN_FORMAT.is_match(token)
    }
}
