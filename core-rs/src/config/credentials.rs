//! Control-plane credentials
//!
//! Read from the JSON auth file the cluster tooling writes:
//!
//! ```json
//! {"User": "admin", "Password": "secret"}
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::KvisError;

/// Default location of the auth file
pub const DEFAULT_CREDENTIALS_FILE: &str = "~/.kubernetes_auth";

/// Basic-auth credentials for the control plane
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "User")]
    pub user: String,
    #[serde(rename = "Password")]
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Load credentials from an auth file (`~` is expanded)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, KvisError> {
        let path = expand_home(&path.as_ref().to_string_lossy());

        if !path.exists() {
            return Err(KvisError::FileNotFound(path.to_string_lossy().to_string()));
        }

        let content = fs::read_to_string(&path)?;
        let credentials: Credentials = serde_json::from_str(&content)?;

        if credentials.user.is_empty() {
            return Err(KvisError::ValidationError(format!(
                "No user in credentials file {}",
                path.display()
            )));
        }

        Ok(credentials)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Expand a leading `~/` to $HOME
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}
