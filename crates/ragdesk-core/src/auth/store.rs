//! Durable storage for the session token.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{Config, TokenStoreKind};

use super::KeyringTokenStore;

/// Session file name in the data directory
const SESSION_FILE: &str = "session.json";

/// Load/save/clear for the one persisted value: the access token.
pub trait TokenStore: Send {
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, token: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;

    /// When the stored token was written, if the backend records it
    fn saved_at(&self) -> Option<DateTime<Utc>> {
        None
    }

    /// Human-readable location, for status output
    fn describe(&self) -> String;
}

/// Build the store selected in configuration
pub fn open_token_store(config: &Config) -> Result<Box<dyn TokenStore>> {
    let store: Box<dyn TokenStore> = match config.token_store {
        TokenStoreKind::File => Box::new(FileTokenStore::new(config.data_dir()?)),
        TokenStoreKind::Keyring => Box::new(KeyringTokenStore::new()?),
        TokenStoreKind::Memory => Box::new(MemoryTokenStore::new()),
    };
    debug!(store = %store.describe(), "Token store opened");
    Ok(store)
}

/// An empty token is no token
pub(crate) fn non_blank(token: String) -> Option<String> {
    (!token.trim().is_empty()).then_some(token)
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedSession {
    access_token: String,
    saved_at: DateTime<Utc>,
}

/// Token kept as JSON (`{"access_token": ..., "saved_at": ...}`) on disk.
pub struct FileTokenStore {
    data_dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn path(&self) -> PathBuf {
        self.data_dir.join(SESSION_FILE)
    }

    fn read(&self) -> Result<Option<PersistedSession>> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read session file")?;
        let session = serde_json::from_str(&contents).context("Failed to parse session file")?;
        Ok(Some(session))
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.read()?.and_then(|s| non_blank(s.access_token)))
    }

    fn save(&self, token: &str) -> Result<()> {
        let path = self.path();
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("Failed to create {}", self.data_dir.display()))?;

        let contents = serde_json::to_string_pretty(&PersistedSession {
            access_token: token.to_string(),
            saved_at: Utc::now(),
        })?;

        // Write-then-rename so a crash never leaves a half-written file
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).context("Failed to write session file")?;
        restrict_permissions(&tmp)?;
        std::fs::rename(&tmp, &path).context("Failed to move session file into place")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.path();
        if path.exists() {
            std::fs::remove_file(&path).context("Failed to remove session file")?;
        }
        Ok(())
    }

    fn saved_at(&self) -> Option<DateTime<Utc>> {
        self.read().ok().flatten().map(|s| s.saved_at)
    }

    fn describe(&self) -> String {
        format!("file {}", self.path().display())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .context("Failed to restrict session file permissions")
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Process-local store. Clones share the same slot.
#[derive(Clone, Default)]
pub struct MemoryTokenStore {
    slot: Arc<Mutex<Option<(String, DateTime<Utc>)>>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with a token, as if left by an earlier run
    pub fn with_token(token: &str) -> Self {
        let store = Self::new();
        *store.lock() = Some((token.to_string(), Utc::now()));
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<(String, DateTime<Utc>)>> {
        // A poisoned slot still holds a consistent Option
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.lock().as_ref().and_then(|(token, _)| non_blank(token.clone())))
    }

    fn save(&self, token: &str) -> Result<()> {
        *self.lock() = Some((token.to_string(), Utc::now()));
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.lock() = None;
        Ok(())
    }

    fn saved_at(&self) -> Option<DateTime<Utc>> {
        self.lock().as_ref().map(|(_, at)| *at)
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Render how long ago a token was saved, e.g. "5m ago" or "2d ago"
pub fn format_age(saved_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let minutes = (now - saved_at).num_minutes();
    if minutes < 1 {
        // Also covers clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        format!("{}h ago", minutes / 60)
    } else {
        format!("{}d ago", minutes / 1440)
    }
}
