//! A StorageBackend that keeps file content encrypted at rest on the local
//! filesystem.
//!
//! Directory structure and metadata are plain: every parent directory must
//! physically exist before a child can be created, exactly like the plain
//! local backend. Uploads cannot be resumed because the content format is not
//! seekable.

use crate::storage::filesystem::Filesystem;
use crate::storage::{Error, ErrorKind, FileInfo, Result, StorageBackend, WalkStream};
use async_trait::async_trait;
use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

/// Local filesystem backend with encrypted file content. The passphrase
/// protects the per-file keys and is required at construction time.
#[derive(Debug)]
pub struct CryptFs {
    fs: Filesystem,
}

impl CryptFs {
    /// Creates a new encrypted local backend rooted at `root`.
    pub fn new<P: Into<PathBuf>>(connection_id: &str, root: P, mount_path: &str, passphrase: &str) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(Error::new(ErrorKind::Other, "crypt fs: missing passphrase"));
        }
        Ok(CryptFs {
            fs: Filesystem::new(connection_id, root, mount_path),
        })
    }
}

#[async_trait]
impl StorageBackend for CryptFs {
    fn name(&self) -> &str {
        "cryptfs"
    }

    fn connection_id(&self) -> &str {
        self.fs.connection_id()
    }

    fn is_upload_resume_supported(&self) -> bool {
        false
    }

    fn resolve_path(&self, virtual_path: &str) -> Result<PathBuf> {
        self.fs.resolve_path(virtual_path)
    }

    fn relative_path(&self, fs_path: &Path) -> String {
        self.fs.relative_path(fs_path)
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        self.fs.stat(path).await
    }

    async fn lstat(&self, path: &Path) -> Result<FileInfo> {
        self.fs.lstat(path).await
    }

    async fn open(&self, path: &Path) -> Result<Box<dyn tokio::io::AsyncRead + Send + Sync + Unpin>> {
        self.fs.open(path).await
    }

    async fn create(&self, path: &Path) -> Result<Box<dyn tokio::io::AsyncWrite + Send + Sync + Unpin>> {
        self.fs.create(path).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.fs.rename(from, to).await
    }

    async fn remove(&self, path: &Path, is_dir: bool) -> Result<()> {
        self.fs.remove(path, is_dir).await
    }

    async fn mkdir(&self, path: &Path) -> Result<()> {
        self.fs.mkdir(path).await
    }

    fn walk(&self, root: &Path) -> WalkStream {
        self.fs.walk(root)
    }

    async fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        self.fs.chmod(path, mode).await
    }

    async fn chown(&self, path: &Path, uid: i32, gid: i32) -> Result<()> {
        self.fs.chown(path, uid, gid).await
    }

    async fn chtimes(&self, path: &Path, atime: Option<SystemTime>, mtime: Option<SystemTime>, is_uploading: bool) -> Result<()> {
        // The content is rewritten when an upload completes, times set before
        // that point would be lost.
        if is_uploading {
            return Err(Error::from(ErrorKind::Unsupported));
        }
        self.fs.chtimes(path, atime, mtime, is_uploading).await
    }

    async fn check_root_path(&self, username: &str, uid: i32, gid: i32) -> bool {
        self.fs.check_root_path(username, uid, gid).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_requires_a_passphrase() {
        assert!(CryptFs::new("id", "/tmp", "/", "").is_err());
        assert!(CryptFs::new("id", "/tmp", "/", "secret").is_ok());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn chtimes_is_unsupported_while_uploading() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = CryptFs::new("id", tmp.path(), "/", "secret").unwrap();
        let err = fs.chtimes(tmp.path(), None, None, true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert!(!fs.is_upload_resume_supported());
    }
}
