//! Session credential storage for the pull client.
//!
//! The external auth collaborator captures the browser session and writes
//! it to `~/.pullwire/session.json`; this module reads it back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::traits::CredentialsError;

/// The credentials directory name.
const CREDENTIALS_DIR: &str = ".pullwire";

/// The session file name.
const SESSION_FILE: &str = "session.json";

/// Session data used to authenticate the WebSocket handshake.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionCredentials {
    /// Browser cookies, sent verbatim in the `Cookie` header.
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    /// When the session was captured (Unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<i64>,
    /// When the session stops being valid (Unix seconds), if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl SessionCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn has_cookies(&self) -> bool {
        !self.cookies.is_empty()
    }

    /// `name=value; name2=value2`, or `None` without cookies.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Unlike access tokens, a session without an expiry is assumed valid.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => chrono::Utc::now().timestamp() >= expires_at,
            None => false,
        }
    }
}

/// Reads and writes the session file.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Store at the default location.
    ///
    /// Returns `None` if the home directory cannot be determined.
    pub fn new() -> Option<Self> {
        let home = dirs::home_dir()?;
        Some(Self {
            path: home.join(CREDENTIALS_DIR).join(SESSION_FILE),
        })
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the session file.
    ///
    /// A missing file is `NotFound`; unreadable or malformed files are errors
    /// rather than silently empty sessions.
    pub fn load(&self) -> Result<SessionCredentials, CredentialsError> {
        if !self.path.exists() {
            return Err(CredentialsError::NotFound);
        }
        let file = File::open(&self.path).map_err(|e| CredentialsError::Io(e.to_string()))?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| CredentialsError::Serialization(e.to_string()))
    }

    /// Save the session file, creating the parent directory if needed.
    pub fn save(&self, credentials: &SessionCredentials) -> Result<(), CredentialsError> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| CredentialsError::Io(e.to_string()))?;
            }
        }

        let file = File::create(&self.path).map_err(|e| CredentialsError::Io(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, credentials)
            .map_err(|e| CredentialsError::Serialization(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| CredentialsError::Io(e.to_string()))
    }
}
