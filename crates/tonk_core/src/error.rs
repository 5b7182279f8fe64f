use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Top-level error type for all `tonk_core` operations.
#[derive(Debug, Error)]
pub enum TonkError {
    /// Malformed bundle archive, manifest, or version mismatch.
    #[error(transparent)]
    Bundle(#[from] BundleError),

    /// Path-addressed VFS operation failure.
    #[error(transparent)]
    FileSystem(#[from] FileSystemError),

    /// Sync transport failure.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Storage backend failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A condition the CRDT algebra should make unreachable (merge panic,
    /// corrupt in-memory document). Treated as fatal and surfaced as-is.
    #[error("internal error: {0}")]
    Internal(String),

    /// General I/O error not otherwise classified above.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TonkError>;

/// Bundle codec errors.
#[derive(Debug, Error)]
pub enum BundleError {
    /// The archive is not a valid ZIP, or a required entry is unreadable.
    #[error("malformed bundle archive: {0}")]
    MalformedArchive(String),

    /// `manifest.json` is missing from the archive.
    #[error("bundle is missing manifest.json")]
    MissingManifest,

    /// `manifest.json` could not be parsed as the expected schema.
    #[error("invalid manifest JSON: {0}")]
    InvalidManifest(String),

    /// `manifestVersion` major does not match what this codec understands.
    #[error("unsupported bundle manifestVersion {found} (expected major {expected})")]
    UnsupportedVersion {
        /// The version found in the archive.
        found: u32,
        /// The major version this codec supports.
        expected: u32,
    },

    /// A document referenced by the PathIndex has no `documents/<id>` entry.
    #[error("missing referenced document bytes for '{0}'")]
    MissingDocument(String),
}

/// VFS path-operation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FileSystemError {
    /// No entry exists at the given path.
    #[error("not found: {0}")]
    NotFound(String),

    /// An entry already exists at the given path.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The path names a directory where a file was expected.
    #[error("is a directory: {0}")]
    IsDirectory(String),

    /// The path names a file where a directory was expected.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Deleting/renaming a non-empty directory without a recursive delete.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// The path fails normalization (missing leading slash, `.`/`..`, etc).
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// A structural ancestor of the path does not exist.
    #[error("parent missing for: {0}")]
    ParentMissing(String),

    /// A rename would move a directory into its own descendant.
    #[error("ancestor conflict: cannot move '{0}' into its own descendant '{1}'")]
    AncestorConflict(String, String),

    /// Rename source and destination normalize to the same path.
    #[error("source and destination are the same location: {0}")]
    SameLocation(String),
}

/// Sync transport errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The initial WebSocket dial failed.
    #[error("dial failed: {0}")]
    DialFailed(String),

    /// The WebSocket handshake completed at the TCP level but was rejected.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// An established connection dropped.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Reconnection attempts were exhausted without continuous-retry enabled.
    #[error("reconnection exhausted after {0} attempts")]
    ReconnectionExhausted(u32),
}

/// Storage backend errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying medium (disk, SQLite) rejected the operation.
    #[error("storage IO failed: {message}")]
    IoFailed {
        /// Description of the underlying failure.
        message: String,
    },

    /// Stored bytes failed to decode as the expected structure.
    #[error("storage corrupt: {0}")]
    Corrupt(String),

    /// The backend refused the write due to a quota.
    #[error("storage quota exceeded")]
    QuotaExceeded,
}

#[cfg(feature = "crdt-sqlite")]
impl From<rusqlite::Error> for TonkError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::IoFailed {
            message: err.to_string(),
        }
        .into()
    }
}

/// A serializable representation of [`TonkError`] for host-API boundaries
/// (CLI JSON output, FFI, IPC). Mirrors the variant name and carries an
/// optional path for filesystem errors.
#[derive(Debug, Clone, Serialize)]
pub struct SerializableError {
    /// Stable error code, e.g. `"NotFound"` or `"UnsupportedVersion"`.
    pub kind: String,
    /// Human-readable error message.
    pub message: String,
    /// Associated path (if applicable).
    pub path: Option<PathBuf>,
}

impl From<&TonkError> for SerializableError {
    fn from(err: &TonkError) -> Self {
        let path = match err {
            TonkError::FileSystem(fs_err) => match fs_err {
                FileSystemError::NotFound(p)
                | FileSystemError::AlreadyExists(p)
                | FileSystemError::IsDirectory(p)
                | FileSystemError::NotADirectory(p)
                | FileSystemError::DirectoryNotEmpty(p)
                | FileSystemError::InvalidPath(p)
                | FileSystemError::ParentMissing(p)
                | FileSystemError::SameLocation(p) => Some(PathBuf::from(p)),
                FileSystemError::AncestorConflict(p, _) => Some(PathBuf::from(p)),
            },
            _ => None,
        };

        Self {
            kind: err.kind(),
            message: err.to_string(),
            path,
        }
    }
}

impl From<TonkError> for SerializableError {
    fn from(err: TonkError) -> Self {
        SerializableError::from(&err)
    }
}

impl TonkError {
    /// Convert to a serializable representation for host-API boundaries.
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }

    /// Stable, machine-readable variant name.
    pub fn kind(&self) -> String {
        match self {
            TonkError::Bundle(e) => format!("Bundle::{}", bundle_kind(e)),
            TonkError::FileSystem(e) => format!("FileSystem::{}", fs_kind(e)),
            TonkError::Connection(e) => format!("Connection::{}", connection_kind(e)),
            TonkError::Storage(e) => format!("Storage::{}", storage_kind(e)),
            TonkError::Internal(_) => "Internal".to_string(),
            TonkError::Io(_) => "Io".to_string(),
        }
    }
}

fn bundle_kind(e: &BundleError) -> &'static str {
    match e {
        BundleError::MalformedArchive(_) => "MalformedArchive",
        BundleError::MissingManifest => "MissingManifest",
        BundleError::InvalidManifest(_) => "InvalidManifest",
        BundleError::UnsupportedVersion { .. } => "UnsupportedVersion",
        BundleError::MissingDocument(_) => "MissingDocument",
    }
}

fn fs_kind(e: &FileSystemError) -> &'static str {
    match e {
        FileSystemError::NotFound(_) => "NotFound",
        FileSystemError::AlreadyExists(_) => "AlreadyExists",
        FileSystemError::IsDirectory(_) => "IsDirectory",
        FileSystemError::NotADirectory(_) => "NotADirectory",
        FileSystemError::DirectoryNotEmpty(_) => "DirectoryNotEmpty",
        FileSystemError::InvalidPath(_) => "InvalidPath",
        FileSystemError::ParentMissing(_) => "ParentMissing",
        FileSystemError::AncestorConflict(_, _) => "AncestorConflict",
        FileSystemError::SameLocation(_) => "SameLocation",
    }
}

fn connection_kind(e: &ConnectionError) -> &'static str {
    match e {
        ConnectionError::DialFailed(_) => "DialFailed",
        ConnectionError::HandshakeFailed(_) => "HandshakeFailed",
        ConnectionError::ConnectionLost(_) => "ConnectionLost",
        ConnectionError::ReconnectionExhausted(_) => "ReconnectionExhausted",
    }
}

fn storage_kind(e: &StorageError) -> &'static str {
    match e {
        StorageError::IoFailed { .. } => "IoFailed",
        StorageError::Corrupt(_) => "Corrupt",
        StorageError::QuotaExceeded => "QuotaExceeded",
    }
}
