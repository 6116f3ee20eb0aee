// SPDX-License-Identifier: MIT

//! The client-held authenticated identity and where it is kept.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A user's effective role in the portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Employee,
    Supervisor,
    #[serde(alias = "administrator")]
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Employee => "employee",
            Role::Supervisor => "supervisor",
            Role::Admin => "admin",
        }
    }

    /// Parse a role label, accepting the legacy `administrator` spelling.
    ///
    /// Unknown labels map to [`Role::Employee`]: an unrecognized role from
    /// the backend must not grant elevated access, and failing the whole
    /// login over it would lock the user out.
    pub fn parse_lenient(label: &str) -> Self {
        match label {
            "admin" | "administrator" => Role::Admin,
            "supervisor" => Role::Supervisor,
            "employee" => Role::Employee,
            other => {
                tracing::warn!(role = other, "Unknown role label; treating as employee");
                Role::Employee
            }
        }
    }
}

impl FromStr for Role {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Role::parse_lenient(s))
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Determine the effective role from the stored session and the freshly
/// fetched profile.
///
/// The role established at login wins, with the legacy `administrator`
/// label normalized to `admin`. Only when no role exists yet is one derived
/// from the profile's `is_superuser` flag. A profile refresh therefore
/// never downgrades a role the login already established.
pub fn reconcile_role(stored: Option<&str>, is_superuser: Option<bool>) -> Role {
    match stored {
        Some(label) => Role::parse_lenient(label),
        None if is_superuser == Some(true) => Role::Admin,
        None => Role::Employee,
    }
}

/// The client-held authenticated identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub role: Role,
    #[serde(default)]
    pub is_new_user: bool,
    /// Profile fields as the backend sent them; the contract is open-ended.
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

/// Persistent storage for the session.
///
/// Modeled as an external key-value store with load/save/clear; the portal
/// shell decides where the session actually lives.
pub trait SessionStore: Send + Sync {
    fn load(&self) -> anyhow::Result<Option<Session>>;
    fn save(&self, session: &Session) -> anyhow::Result<()>;
    fn clear(&self) -> anyhow::Result<()>;
}

/// In-memory store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    inner: std::sync::Mutex<Option<Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> anyhow::Result<Option<Session>> {
        Ok(self.inner.lock().expect("session lock poisoned").clone())
    }

    fn save(&self, session: &Session) -> anyhow::Result<()> {
        *self.inner.lock().expect("session lock poisoned") = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        self.inner.lock().expect("session lock poisoned").take();
        Ok(())
    }
}

/// JSON-file-backed store.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> anyhow::Result<Option<Session>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to read {}", self.path.display()));
            }
        };
        let session = serde_json::from_str(&raw)
            .with_context(|| format!("session file {} is invalid", self.path.display()))?;
        Ok(Some(session))
    }

    fn save(&self, session: &Session) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let raw = serde_json::to_string(session)?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }

    fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => {
                Err(error).with_context(|| format!("failed to remove {}", self.path.display()))
            }
        }
    }
}
