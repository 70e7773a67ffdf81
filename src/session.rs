use crate::error_utils::{parse_json_with_context, serialize_to_json_with_context};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Authentication state of a logged-in client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Value of the `Authorization` header issued at login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,

    #[serde(default)]
    pub cookies: BTreeMap<String, String>,

    /// Numeric id of the logged-in account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Stable device identifier presented to the API
    pub device_id: String,

    pub created_at: DateTime<Utc>,
}

/// Best-effort persistence of a single [`Session`] as a JSON file
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
    enabled: bool,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            path: path.into(),
            enabled,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved session, if there is a readable one.
    ///
    /// A file that cannot be read or parsed is deleted so the next login
    /// starts from credentials. This never fails.
    pub fn load(&self) -> Option<Session> {
        if !self.enabled || !self.path.exists() {
            return None;
        }

        match self.read() {
            Ok(session) => {
                info!("Loaded saved session from {path}", path = self.path.display());
                Some(session)
            }
            Err(e) => {
                error!("Failed to load session: {e:#}");
                match fs::remove_file(&self.path) {
                    Ok(()) => info!(
                        "Deleted corrupted session file {path}",
                        path = self.path.display()
                    ),
                    Err(e) => warn!(
                        "Failed to delete corrupted session file {path}: {e}",
                        path = self.path.display()
                    ),
                }
                None
            }
        }
    }

    /// Overwrite the session file. Failures are logged and swallowed.
    pub fn save(&self, session: &Session) {
        if !self.enabled {
            debug!("Session persistence disabled, not saving");
            return;
        }

        match self.write(session) {
            Ok(()) => info!("Saved session to {path}", path = self.path.display()),
            Err(e) => error!("Failed to save session: {e:#}"),
        }
    }

    fn read(&self) -> Result<Session> {
        let json = fs::read_to_string(&self.path).with_context(|| {
            format!(
                "Failed to read session file {path}",
                path = self.path.display()
            )
        })?;
        parse_json_with_context(&json, "session")
    }

    fn write(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create session directory {path}",
                        path = parent.display()
                    )
                })?;
            }
        }

        let json = serialize_to_json_with_context(session, "session")?;
        fs::write(&self.path, json).with_context(|| {
            format!(
                "Failed to write session file {path}",
                path = self.path.display()
            )
        })
    }
}
