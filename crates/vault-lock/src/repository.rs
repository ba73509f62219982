//! Settings persistence backends
//!
//! The service only talks to the [`SettingsRepository`] trait. Two backends
//! ship with the crate: an in-memory map for embedding and tests, and a JSON
//! file store with one document per account.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::PersistenceError;
use crate::settings::{AccountId, SecuritySettings};

/// Durable store for [`SecuritySettings`], keyed by account
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// Load the settings for an account; `None` if never saved
    async fn load(&self, account: &AccountId) -> Result<Option<SecuritySettings>, PersistenceError>;

    /// Persist the settings for an account, replacing any previous value
    async fn save(&self, account: &AccountId, settings: &SecuritySettings) -> Result<(), PersistenceError>;
}

/// Process-local settings store
#[derive(Debug, Default)]
pub struct InMemorySettingsRepository {
    entries: RwLock<HashMap<AccountId, SecuritySettings>>,
}

impl InMemorySettingsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with one account's settings
    pub fn with_settings(account: AccountId, settings: SecuritySettings) -> Self {
        let mut entries = HashMap::new();
        entries.insert(account, settings);
        Self {
            entries: RwLock::new(entries),
        }
    }
}

#[async_trait]
impl SettingsRepository for InMemorySettingsRepository {
    async fn load(&self, account: &AccountId) -> Result<Option<SecuritySettings>, PersistenceError> {
        Ok(self.entries.read().await.get(account).cloned())
    }

    async fn save(&self, account: &AccountId, settings: &SecuritySettings) -> Result<(), PersistenceError> {
        self.entries
            .write()
            .await
            .insert(account.clone(), settings.clone());
        Ok(())
    }
}

/// JSON file store: `<dir>/<hex account id>.json`
#[derive(Debug, Clone)]
pub struct JsonFileSettingsRepository {
    dir: PathBuf,
}

impl JsonFileSettingsRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the settings documents
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the document for an account
    ///
    /// The file stem is the hex encoding of the account id, so distinct ids
    /// never share a document.
    pub fn path_for(&self, account: &AccountId) -> PathBuf {
        self.dir
            .join(format!("{}.json", hex::encode(account.as_str().as_bytes())))
    }
}

/// Write `contents` to a file that is owner-only from the moment it exists
async fn write_private(path: &Path, contents: &[u8]) -> Result<(), PersistenceError> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;

    // A stale file keeps its old mode; tighten it before writing
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .await?;
    }

    file.write_all(contents).await?;
    file.sync_all().await?;
    Ok(())
}

#[async_trait]
impl SettingsRepository for JsonFileSettingsRepository {
    async fn load(&self, account: &AccountId) -> Result<Option<SecuritySettings>, PersistenceError> {
        let path = self.path_for(account);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let settings = serde_json::from_str(&contents)?;
        debug!("Loaded security settings from {:?}", path);
        Ok(Some(settings))
    }

    async fn save(&self, account: &AccountId, settings: &SecuritySettings) -> Result<(), PersistenceError> {
        let contents = serde_json::to_string_pretty(settings)?;

        fs::create_dir_all(&self.dir).await?;

        // Write atomically
        let path = self.path_for(account);
        let temp_path = path.with_extension("json.tmp");
        write_private(&temp_path, contents.as_bytes()).await?;
        fs::rename(&temp_path, &path).await?;

        debug!("Saved security settings to {:?}", path);
        Ok(())
    }
}
