use serde::{Deserialize, Serialize};

/// Principal role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    User,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::User => "user",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "admin" => UserRole::Admin,
            _ => UserRole::User,
        }
    }

    /// Capabilities granted to this role
    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            UserRole::User => &[
                Permission::FileUpload,
                Permission::FileDownload,
                Permission::FileDelete,
                Permission::FileShare,
            ],
            UserRole::Admin => &[
                Permission::FileUpload,
                Permission::FileDownload,
                Permission::FileDelete,
                Permission::FileShare,
                Permission::FileSearch,
            ],
        }
    }
}

/// Capability checked before a core operation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    FileUpload,
    FileDownload,
    FileDelete,
    FileShare,
    FileSearch,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::FileUpload => "file:upload",
            Permission::FileDownload => "file:download",
            Permission::FileDelete => "file:delete",
            Permission::FileShare => "file:share",
            Permission::FileSearch => "file:search",
        }
    }
}

/// Current authenticated principal (extracted from JWT)
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub role: UserRole,
}

impl CurrentUser {
    pub fn can(&self, permission: Permission) -> bool {
        self.role.permissions().contains(&permission)
    }
}

/// JWT Claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // principal id
    #[serde(default = "default_role")]
    pub role: String,
    pub exp: usize, // expiration time
}

fn default_role() -> String {
    UserRole::User.as_str().to_string()
}
