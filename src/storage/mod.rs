//! Contains the [`StorageBackend`] trait consumed by the connection core and
//! the storage providers shipped with the crate.
//!
//! A user's file tree is served by one backend for the home directory plus
//! one backend per [`VirtualFolder`]. Backends for local and encrypted-local
//! storage are built from a [`FilesystemConfig`]; anything else (object
//! stores, remote file transfer servers, HTTP fronted storage) is supplied by
//! the embedding application as a ready made trait object.

pub mod crypted;
mod error;
pub mod filesystem;
mod storage_backend;

pub use error::{Error, ErrorKind};
pub use storage_backend::{FileInfo, Permissions, Result, StorageBackend, WalkEntry, WalkStream};

use crypted::CryptFs;
use filesystem::Filesystem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A shared handle to a storage backend instance.
pub type FsHandle = Arc<dyn StorageBackend>;

/// Configuration for the backend serving a user home directory or a virtual
/// folder.
#[derive(Debug, Clone)]
pub enum FilesystemConfig {
    /// Files are served from a local directory. When `root` is `None` the
    /// owning home or mapped path is used.
    Local {
        /// Optional root override.
        root: Option<PathBuf>,
    },
    /// Files are stored encrypted on the local filesystem. Construction fails
    /// without a passphrase.
    CryptedLocal {
        /// Optional root override.
        root: Option<PathBuf>,
        /// The passphrase protecting the per-file keys.
        passphrase: String,
    },
    /// A backend instance supplied by the embedding application, typically an
    /// object store or a remote server client.
    Provided(FsHandle),
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        FilesystemConfig::Local { root: None }
    }
}

impl FilesystemConfig {
    /// Builds the backend described by this configuration. `default_root` is
    /// the home or mapped path of the owning scope and `mount_path` the
    /// virtual path the backend is mounted at.
    pub fn filesystem(&self, connection_id: &str, default_root: &Path, mount_path: &str) -> Result<FsHandle> {
        match self {
            FilesystemConfig::Local { root } => {
                let root = root.clone().unwrap_or_else(|| default_root.to_path_buf());
                Ok(Arc::new(Filesystem::new(connection_id, root, mount_path)))
            }
            FilesystemConfig::CryptedLocal { root, passphrase } => {
                let root = root.clone().unwrap_or_else(|| default_root.to_path_buf());
                let fs = CryptFs::new(connection_id, root, mount_path, passphrase)?;
                Ok(Arc::new(fs))
            }
            FilesystemConfig::Provided(fs) => Ok(fs.clone()),
        }
    }
}

/// A mount point in the user's virtual tree served by its own backend.
#[derive(Debug, Clone, Default)]
pub struct VirtualFolder {
    /// Unique folder name, the key for per-folder quota accounting.
    pub name: String,
    /// The virtual path the folder is mounted at. Absolute and normalized.
    pub virtual_path: String,
    /// The path on the folder backend the mount maps to.
    pub mapped_path: PathBuf,
    /// The backend configuration for this folder.
    pub fs_config: FilesystemConfig,
    /// Maximum total size in bytes. 0 means unrestricted, negative means the
    /// user quota applies.
    pub quota_size: i64,
    /// Maximum number of files. 0 means unrestricted, negative means the
    /// user quota applies.
    pub quota_files: i32,
}

impl VirtualFolder {
    /// True if operations inside this folder are charged against the user
    /// quota instead of the folder quota.
    pub fn is_included_in_user_quota(&self) -> bool {
        self.quota_files == -1 && self.quota_size == -1
    }

    /// Builds the backend serving this folder.
    pub fn filesystem(&self, connection_id: &str) -> Result<FsHandle> {
        self.fs_config.filesystem(connection_id, &self.mapped_path, &self.virtual_path)
    }
}

/// A snapshot of the quota state for a scope, as computed before a write.
#[derive(Debug, Clone, Default)]
pub struct QuotaCheckResult {
    /// True if the scope has room for more data.
    pub has_space: bool,
    /// Number of files that may still be created. Meaningless when the file
    /// quota is unrestricted.
    pub allowed_files: i32,
    /// Number of bytes that may still be written. Meaningless when the size
    /// quota is unrestricted.
    pub allowed_size: i64,
    /// Number of files currently used.
    pub used_files: i32,
    /// Number of bytes currently used.
    pub used_size: i64,
    /// The file quota of the scope. Values <= 0 mean unrestricted.
    pub quota_files: i32,
    /// The size quota of the scope in bytes. Values <= 0 mean unrestricted.
    pub quota_size: i64,
}

impl QuotaCheckResult {
    /// The number of bytes still writable before the size quota is reached,
    /// 0 when the size quota is unrestricted or already exhausted.
    pub fn remaining_size(&self) -> i64 {
        if self.quota_size > 0 {
            return (self.quota_size - self.used_size).max(0);
        }
        0
    }
}
