//! Storage configuration (§6 "Storage options").
//!
//! A bundle's storage backend is selected by a small enumerated config,
//! persisted as TOML at the platform config directory so host applications
//! can remember a user's choice of persistent location across runs.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::crdt::StorageBackend;
use crate::error::Result;

/// Which [`StorageBackend`] a repository should be built over.
///
/// Defaults to [`StorageOptions::InMemory`] when unspecified, per §6.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageOptions {
    /// Volatile, process-lifetime storage. Nothing survives restart.
    InMemory,
    /// Durable storage at a platform path (or logical name, on platforms
    /// where the backend resolves its own location).
    Persistent {
        /// Where the backend should persist document bytes.
        location: PathBuf,
    },
}

impl Default for StorageOptions {
    fn default() -> Self {
        StorageOptions::InMemory
    }
}

impl StorageOptions {
    /// Construct the storage backend this option describes.
    ///
    /// `Persistent` requires the `crdt-sqlite` feature; without it, this
    /// falls back to in-memory storage rather than failing the caller.
    pub fn build(&self) -> Result<Arc<dyn StorageBackend>> {
        match self {
            StorageOptions::InMemory => Ok(Arc::new(crate::crdt::MemoryStorage::new())),
            #[cfg(feature = "crdt-sqlite")]
            StorageOptions::Persistent { location } => {
                Ok(Arc::new(crate::crdt::SqliteStorage::open(location)?))
            }
            #[cfg(not(feature = "crdt-sqlite"))]
            StorageOptions::Persistent { .. } => {
                log::warn!("persistent storage requested without the crdt-sqlite feature; using in-memory storage");
                Ok(Arc::new(crate::crdt::MemoryStorage::new()))
            }
        }
    }
}

/// Host-facing configuration: which storage to mount and where relay
/// connections should default to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage backend selection.
    #[serde(default)]
    pub storage: StorageOptions,

    /// Relay URIs to try, in preference order, absent an explicit dial target.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_relays: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageOptions::default(),
            default_relays: Vec::new(),
        }
    }
}

impl Config {
    /// The config file path (`~/.config/tonk/config.toml` on Unix).
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tonk").join("config.toml"))
    }

    /// Load config from the default location, falling back to defaults if
    /// the file is absent.
    pub fn load() -> Result<Self> {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                let contents = std::fs::read_to_string(&path)?;
                let config: Config = toml::from_str(&contents)
                    .map_err(|e| crate::error::TonkError::Internal(format!("invalid config: {e}")))?;
                return Ok(config);
            }
        }
        Ok(Config::default())
    }

    /// Persist this config to the default location, creating parent
    /// directories as needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()
            .ok_or_else(|| crate::error::TonkError::Internal("no platform config directory".into()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| crate::error::TonkError::Internal(format!("config serialize failed: {e}")))?;
        std::fs::write(&path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_storage_is_in_memory() {
        assert_eq!(StorageOptions::default(), StorageOptions::InMemory);
    }

    #[test]
    fn in_memory_option_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let restored: Config = toml::from_str(&text).unwrap();
        assert_eq!(restored.storage, StorageOptions::InMemory);
    }

    #[test]
    fn persistent_option_serializes_with_location() {
        let options = StorageOptions::Persistent {
            location: PathBuf::from("/tmp/tonk-bundle.sqlite"),
        };
        let text = toml::to_string_pretty(&options).unwrap();
        assert!(text.contains("persistent"));
        let restored: StorageOptions = toml::from_str(&text).unwrap();
        assert_eq!(restored, options);
    }

    #[test]
    fn build_in_memory_backend_works() {
        let backend = StorageOptions::InMemory.build().unwrap();
        assert!(backend.list_ids().unwrap().is_empty());
    }
}
