//! Persisted migration records.
//!
//! Two keys, mirroring what a browser session would keep in local storage:
//! `migration_details` (who is moving where) and `migration_progress` (how far
//! they got). Neither record has a password field.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use super::types::MigrationStatus;
use crate::services::errors::StorageError;

pub const DETAILS_KEY: &str = "migration_details";
pub const PROGRESS_KEY: &str = "migration_progress";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationDetails {
    pub source_server: String,
    pub target_server: String,
    pub did: String,
    #[serde(default)]
    pub invite_code: Option<String>,
    pub new_handle: String,
    pub new_email: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationProgress {
    pub status: MigrationStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub resume_from: Option<MigrationStatus>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersistedMigration {
    pub details: MigrationDetails,
    pub progress: Option<MigrationProgress>,
}

impl PersistedMigration {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.details.expires_at
    }

    pub fn status(&self) -> MigrationStatus {
        self.progress
            .as_ref()
            .map(|progress| progress.status)
            .unwrap_or(MigrationStatus::NotStarted)
    }
}

/// Load/save/clear of the single in-flight migration
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> Result<Option<PersistedMigration>, StorageError>;
    async fn save(&self, record: &PersistedMigration) -> Result<(), StorageError>;
    async fn clear(&self) -> Result<(), StorageError>;
}

/// String key/value backend a [`SessionStore`] is built on
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(|e| StorageError::Corrupt {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

fn encode<T: Serialize>(key: &str, value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::OperationFailed {
        operation: format!("serialize {}", key),
        reason: e.to_string(),
    })
}

#[async_trait]
impl<B: KeyValueBackend> SessionStore for B {
    async fn load(&self) -> Result<Option<PersistedMigration>, StorageError> {
        let Some(raw_details) = self.get(DETAILS_KEY).await? else {
            return Ok(None);
        };
        let details: MigrationDetails = decode(DETAILS_KEY, &raw_details)?;
        let progress = match self.get(PROGRESS_KEY).await? {
            Some(raw) => Some(decode(PROGRESS_KEY, &raw)?),
            None => None,
        };
        Ok(Some(PersistedMigration { details, progress }))
    }

    async fn save(&self, record: &PersistedMigration) -> Result<(), StorageError> {
        let details = encode(DETAILS_KEY, &record.details)?;
        self.set(DETAILS_KEY, &details).await?;
        match &record.progress {
            Some(progress) => {
                let progress = encode(PROGRESS_KEY, progress)?;
                self.set(PROGRESS_KEY, &progress).await
            }
            None => self.delete(PROGRESS_KEY).await,
        }
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.delete(PROGRESS_KEY).await?;
        self.delete(DETAILS_KEY).await
    }
}

/// Process-local store, lost on exit
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl KeyValueBackend for MemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries().remove(key);
        Ok(())
    }
}

/// One JSON file per key under a state directory
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

fn io_failure(operation: &str, path: &Path, error: std::io::Error) -> StorageError {
    StorageError::OperationFailed {
        operation: format!("{} {}", operation, path.display()),
        reason: error.to_string(),
    }
}

#[async_trait]
impl KeyValueBackend for FileSessionStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path(key);
        match fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_failure("read", &path, e)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_failure("create", &self.dir, e))?;

        // Write-then-rename so a crash never leaves half a record behind
        let path = self.path(key);
        let tmp = self.dir.join(format!(".{}.json.tmp", key));
        fs::write(&tmp, value)
            .await
            .map_err(|e| io_failure("write", &tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_failure("rename", &path, e))?;
        debug!("Persisted {} to {}", key, path.display());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_failure("remove", &path, e)),
        }
    }
}
