//! Defines the service provider interface for storage back-end implementors.

use super::error::{Error, ErrorKind};
use async_trait::async_trait;
use chrono::prelude::{DateTime, Utc};
use futures::channel::mpsc;
use futures::StreamExt;
use std::{
    fmt::{self, Debug, Formatter, Write},
    path::{Path, PathBuf},
    result,
    time::SystemTime,
};

/// Result type used by traits in this module.
pub type Result<T> = result::Result<T, Error>;

/// Represents the permission bits of an entry.
pub struct Permissions(pub u32);

const PERM_READ: u32 = 0b100100100;
const PERM_WRITE: u32 = 0b010010010;
const PERM_EXEC: u32 = 0b001001001;
const PERM_USER: u32 = 0b111000000;
const PERM_GROUP: u32 = 0b000111000;
const PERM_OTHERS: u32 = 0b000000111;

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_char(if self.0 & PERM_USER & PERM_READ > 0 { 'r' } else { '-' })?;
        f.write_char(if self.0 & PERM_USER & PERM_WRITE > 0 { 'w' } else { '-' })?;
        f.write_char(if self.0 & PERM_USER & PERM_EXEC > 0 { 'x' } else { '-' })?;
        f.write_char(if self.0 & PERM_GROUP & PERM_READ > 0 { 'r' } else { '-' })?;
        f.write_char(if self.0 & PERM_GROUP & PERM_WRITE > 0 { 'w' } else { '-' })?;
        f.write_char(if self.0 & PERM_GROUP & PERM_EXEC > 0 { 'x' } else { '-' })?;
        f.write_char(if self.0 & PERM_OTHERS & PERM_READ > 0 { 'r' } else { '-' })?;
        f.write_char(if self.0 & PERM_OTHERS & PERM_WRITE > 0 { 'w' } else { '-' })?;
        f.write_char(if self.0 & PERM_OTHERS & PERM_EXEC > 0 { 'x' } else { '-' })?;
        Ok(())
    }
}

/// Metadata for a single file, directory or symlink as reported by a storage
/// backend.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    name: String,
    size: i64,
    modified: SystemTime,
    is_dir: bool,
    is_symlink: bool,
    mode: u32,
}

impl FileInfo {
    /// Creates a new `FileInfo`.
    pub fn new<S: Into<String>>(name: S, is_dir: bool, size: i64, modified: SystemTime, is_symlink: bool) -> Self {
        FileInfo {
            name: name.into(),
            size,
            modified,
            is_dir,
            is_symlink,
            mode: if is_dir { 0o755 } else { 0o644 },
        }
    }

    /// Builds a `FileInfo` from standard library metadata.
    pub fn from_metadata<S: Into<String>>(name: S, metadata: &std::fs::Metadata) -> Self {
        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            metadata.permissions().mode() & 0o7777
        };
        #[cfg(not(unix))]
        let mode = if metadata.is_dir() { 0o755 } else { 0o644 };
        FileInfo {
            name: name.into(),
            size: metadata.len() as i64,
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            is_dir: metadata.is_dir(),
            is_symlink: metadata.file_type().is_symlink(),
            mode,
        }
    }

    /// The base name of the entry.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The length of the entry in bytes.
    pub fn size(&self) -> i64 {
        self.size
    }

    /// The last modification time of the entry.
    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    /// True if the entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// True if the entry is a regular file.
    pub fn is_file(&self) -> bool {
        !self.is_dir && !self.is_symlink
    }

    /// True if the entry is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.is_symlink
    }

    /// The permission bits of the entry.
    pub fn mode(&self) -> u32 {
        self.mode
    }
}

impl fmt::Display for FileInfo {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let modified = DateTime::<Utc>::from(self.modified).format("%b %d %H:%M").to_string();
        write!(
            f,
            "{filetype}{permissions} {size:#14} {modified:>12} {path}",
            filetype = if self.is_dir {
                "d"
            } else if self.is_symlink {
                "l"
            } else {
                "-"
            },
            permissions = Permissions(self.mode),
            size = self.size,
            modified = modified,
            path = self.name,
        )
    }
}

/// A single entry yielded by [`StorageBackend::walk`].
///
/// Exactly one of `info` and `error` is set. Receiving an entry with `error`
/// set means the walk could not continue past that point.
#[derive(Debug)]
pub struct WalkEntry {
    /// The backend path of the entry.
    pub path: PathBuf,
    /// The entry metadata, when it could be read.
    pub info: Option<FileInfo>,
    /// The failure that interrupted the walk, if any.
    pub error: Option<Error>,
}

impl WalkEntry {
    /// An entry for a successfully visited path.
    pub fn entry<P: Into<PathBuf>>(path: P, info: FileInfo) -> Self {
        WalkEntry {
            path: path.into(),
            info: Some(info),
            error: None,
        }
    }

    /// An entry reporting a walk failure at the given path.
    pub fn failure<P: Into<PathBuf>>(path: P, error: Error) -> Self {
        WalkEntry {
            path: path.into(),
            info: None,
            error: Some(error),
        }
    }
}

/// The stream of entries produced by [`StorageBackend::walk`].
///
/// Entries are consumed one at a time; dropping the stream stops the walker
/// at the next entry boundary.
pub type WalkStream = mpsc::Receiver<WalkEntry>;

/// The `StorageBackend` trait can be implemented to serve user homes and
/// virtual folders from custom storage. The shipped implementations are
/// [`Filesystem`] and [`CryptFs`]; object stores and remote servers plug in
/// through [`FilesystemConfig::Provided`].
///
/// [`Filesystem`]: ../filesystem/struct.Filesystem.html
/// [`CryptFs`]: ../crypted/struct.CryptFs.html
/// [`FilesystemConfig::Provided`]: ../enum.FilesystemConfig.html
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    /// The name of the storage back-end implementation.
    fn name(&self) -> &str;

    /// The identifier of the connection this backend instance was created for.
    fn connection_id(&self) -> &str;

    /// True if the backend only emulates directories, object store style.
    /// Such backends cannot walk arbitrary trees and treat path prefixes as
    /// synthetic.
    fn has_virtual_folders(&self) -> bool {
        false
    }

    /// True if uploads can be resumed from an arbitrary byte offset.
    fn is_upload_resume_supported(&self) -> bool {
        false
    }

    /// Maps a virtual path to the path used with this backend.
    fn resolve_path(&self, virtual_path: &str) -> Result<PathBuf>;

    /// Maps a backend path back to a virtual path. Paths outside the backend
    /// root map to the backend mount path.
    fn relative_path(&self, fs_path: &Path) -> String;

    /// Returns the metadata of the object at the given path, following
    /// symlinks.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;

    /// Returns the metadata of the object at the given path without following
    /// symlinks.
    async fn lstat(&self, path: &Path) -> Result<FileInfo>;

    /// Opens the file at the given path for sequential reading.
    async fn open(&self, path: &Path) -> Result<Box<dyn tokio::io::AsyncRead + Send + Sync + Unpin>>;

    /// Creates or truncates the file at the given path for sequential
    /// writing.
    async fn create(&self, path: &Path) -> Result<Box<dyn tokio::io::AsyncWrite + Send + Sync + Unpin>>;

    /// Renames `from` to `to` within this backend.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Removes the file or directory at the given path. `is_dir` tells which
    /// of the two the caller expects.
    async fn remove(&self, path: &Path, is_dir: bool) -> Result<()>;

    /// Creates the directory at the given path. The parent must exist unless
    /// the backend emulates directories.
    async fn mkdir(&self, path: &Path) -> Result<()>;

    /// Walks the tree rooted at `root`, yielding children before their
    /// parents. Failures are reported in-band as the final entry.
    fn walk(&self, root: &Path) -> WalkStream;

    /// Returns the number of files and their total size inside the given
    /// directory.
    #[tracing_attributes::instrument]
    async fn dir_size(&self, path: &Path) -> Result<(i32, i64)> {
        let mut files = 0;
        let mut size = 0;
        let mut entries = self.walk(path);
        while let Some(entry) = entries.next().await {
            if let Some(err) = entry.error {
                return Err(err);
            }
            if let Some(info) = entry.info {
                if info.is_file() {
                    files += 1;
                    size += info.size();
                }
            }
        }
        Ok((files, size))
    }

    /// Changes the permission bits of the object at the given path.
    async fn chmod(&self, path: &Path, mode: u32) -> Result<()>;

    /// Changes the owner and group of the object at the given path. Negative
    /// values leave the corresponding id unchanged.
    async fn chown(&self, path: &Path, uid: i32, gid: i32) -> Result<()>;

    /// Changes the access and modification times of the object at the given
    /// path. A `None` time is left unchanged. `is_uploading` tells whether an
    /// upload to this path is in progress; backends that cannot preserve
    /// times on uploads return [`ErrorKind::Unsupported`].
    ///
    /// [`ErrorKind::Unsupported`]: enum.ErrorKind.html
    async fn chtimes(&self, path: &Path, atime: Option<SystemTime>, mtime: Option<SystemTime>, is_uploading: bool) -> Result<()>;

    /// Checks the backend root for the given user, creating it if the backend
    /// supports that. Returns true if the root was created.
    async fn check_root_path(&self, username: &str, uid: i32, gid: i32) -> bool;

    /// Tells whether the given error means "the object does not exist" on
    /// this backend.
    fn is_not_exist(&self, err: &Error) -> bool {
        err.kind() == ErrorKind::NotFound
    }

    /// Tells whether the given error means "access denied" on this backend.
    fn is_permission(&self, err: &Error) -> bool {
        err.kind() == ErrorKind::PermissionDenied
    }
}
