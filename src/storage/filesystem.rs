//! A StorageBackend that uses the local filesystem, like a traditional file
//! transfer server.

use crate::storage::{Error, ErrorKind, FileInfo, Result, StorageBackend, WalkEntry, WalkStream};
use crate::util;
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::SinkExt;
use log::warn;
use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};
use walkdir::WalkDir;

/// The `Filesystem` struct is an implementation of the `StorageBackend` trait
/// that keeps its files inside a specific root directory on local disk. The
/// `mount_path` is the virtual path the root is exposed at, `/` for a user
/// home directory or the folder prefix for a virtual folder.
#[derive(Debug)]
pub struct Filesystem {
    connection_id: String,
    root: PathBuf,
    mount_path: String,
}

impl Filesystem {
    /// Creates a new local filesystem backend with the given root.
    pub fn new<P: Into<PathBuf>>(connection_id: &str, root: P, mount_path: &str) -> Self {
        Filesystem {
            connection_id: connection_id.to_string(),
            root: root.into(),
            mount_path: if mount_path == "/" { String::new() } else { mount_path.to_string() },
        }
    }

    fn virtual_root(&self) -> &str {
        if self.mount_path.is_empty() {
            "/"
        } else {
            &self.mount_path
        }
    }

    fn file_name(path: &Path) -> String {
        path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
    }
}

#[async_trait]
impl StorageBackend for Filesystem {
    fn name(&self) -> &str {
        "osfs"
    }

    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn is_upload_resume_supported(&self) -> bool {
        true
    }

    fn resolve_path(&self, virtual_path: &str) -> Result<PathBuf> {
        let cleaned = util::clean_path(virtual_path);
        // strip the mount prefix on a path segment boundary only, a mount
        // named "/vdir" must not capture "/vdir2"
        let relative = if self.mount_path.is_empty() || cleaned == self.mount_path {
            cleaned.strip_prefix(&self.mount_path).unwrap_or_default()
        } else {
            cleaned
                .strip_prefix(&format!("{}/", self.mount_path))
                .unwrap_or(cleaned.as_str())
        };
        let relative = relative.trim_start_matches('/');
        if relative.is_empty() {
            return Ok(self.root.clone());
        }
        Ok(self.root.join(relative))
    }

    fn relative_path(&self, fs_path: &Path) -> String {
        match fs_path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => self.virtual_root().to_string(),
            Ok(rel) => {
                let rel = rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
                format!("{}/{}", self.mount_path, rel)
            }
            Err(_) => self.virtual_root().to_string(),
        }
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(FileInfo::from_metadata(Self::file_name(path), &metadata))
    }

    async fn lstat(&self, path: &Path) -> Result<FileInfo> {
        let metadata = tokio::fs::symlink_metadata(path).await?;
        Ok(FileInfo::from_metadata(Self::file_name(path), &metadata))
    }

    async fn open(&self, path: &Path) -> Result<Box<dyn tokio::io::AsyncRead + Send + Sync + Unpin>> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Box::new(file))
    }

    async fn create(&self, path: &Path) -> Result<Box<dyn tokio::io::AsyncWrite + Send + Sync + Unpin>> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Box::new(file))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        tokio::fs::rename(from, to).await?;
        Ok(())
    }

    async fn remove(&self, path: &Path, is_dir: bool) -> Result<()> {
        if is_dir {
            tokio::fs::remove_dir(path).await?;
        } else {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn mkdir(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir(path).await?;
        Ok(())
    }

    fn walk(&self, root: &Path) -> WalkStream {
        let (mut tx, rx) = mpsc::channel(64);
        let root = root.to_path_buf();
        let _walker = tokio::task::spawn_blocking(move || {
            for dir_entry in WalkDir::new(&root).contents_first(true) {
                let entry = match dir_entry {
                    Ok(e) => match e.metadata() {
                        Ok(metadata) => {
                            let info = FileInfo::from_metadata(Self::file_name(e.path()), &metadata);
                            WalkEntry::entry(e.path(), info)
                        }
                        Err(err) => {
                            let path = err.path().unwrap_or(&root).to_path_buf();
                            WalkEntry::failure(path, Error::from(std::io::Error::from(err)))
                        }
                    },
                    Err(err) => {
                        let path = err.path().unwrap_or(&root).to_path_buf();
                        WalkEntry::failure(path, Error::from(std::io::Error::from(err)))
                    }
                };
                let stop = entry.error.is_some();
                // The receiver going away means the consumer aborted the walk.
                if futures::executor::block_on(tx.send(entry)).is_err() || stop {
                    break;
                }
            }
        });
        rx
    }

    async fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
        }
        #[cfg(not(unix))]
        let _ = (path, mode);
        Ok(())
    }

    async fn chown(&self, path: &Path, uid: i32, gid: i32) -> Result<()> {
        #[cfg(unix)]
        {
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || {
                let uid = u32::try_from(uid).ok();
                let gid = u32::try_from(gid).ok();
                std::os::unix::fs::chown(path, uid, gid)
            })
            .await
            .map_err(|e| Error::new(ErrorKind::Other, e))??;
        }
        #[cfg(not(unix))]
        let _ = (path, uid, gid);
        Ok(())
    }

    async fn chtimes(&self, path: &Path, atime: Option<SystemTime>, mtime: Option<SystemTime>, _is_uploading: bool) -> Result<()> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut times = std::fs::FileTimes::new();
            if let Some(atime) = atime {
                times = times.set_accessed(atime);
            }
            if let Some(mtime) = mtime {
                times = times.set_modified(mtime);
            }
            let file = std::fs::File::open(&path)?;
            file.set_times(times)
        })
        .await
        .map_err(|e| Error::new(ErrorKind::Other, e))??;
        Ok(())
    }

    async fn check_root_path(&self, username: &str, uid: i32, gid: i32) -> bool {
        if tokio::fs::metadata(&self.root).await.is_ok() {
            return false;
        }
        if let Err(err) = tokio::fs::create_dir_all(&self.root).await {
            warn!("could not create root directory {:?} for user {}: {}", self.root, username, err);
            return false;
        }
        if uid > 0 || gid > 0 {
            if let Err(err) = self.chown(&self.root, uid, gid).await {
                warn!("could not chown root directory {:?} for user {}: {}", self.root, username, err);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn resolve_path_joins_below_the_root() {
        let fs = Filesystem::new("id", "/srv/data", "/");
        assert_eq!(fs.resolve_path("/").unwrap(), PathBuf::from("/srv/data"));
        assert_eq!(fs.resolve_path("/a/b").unwrap(), PathBuf::from("/srv/data/a/b"));
        assert_eq!(fs.resolve_path("/a/../../b").unwrap(), PathBuf::from("/srv/data/b"));
    }

    #[test]
    fn resolve_path_strips_the_mount_prefix() {
        let fs = Filesystem::new("id", "/srv/map", "/vdir");
        assert_eq!(fs.resolve_path("/vdir").unwrap(), PathBuf::from("/srv/map"));
        assert_eq!(fs.resolve_path("/vdir/sub").unwrap(), PathBuf::from("/srv/map/sub"));
    }

    #[test]
    fn resolve_path_matches_the_mount_on_segment_boundaries() {
        // an adjacent mount name sharing the prefix bytes is not inside the
        // mount
        let fs = Filesystem::new("id", "/srv/map", "/vdir");
        assert_eq!(fs.resolve_path("/vdir2/x").unwrap(), PathBuf::from("/srv/map/vdir2/x"));
        assert_eq!(fs.resolve_path("/vdirx").unwrap(), PathBuf::from("/srv/map/vdirx"));
    }

    #[test]
    fn relative_path_reverses_the_join() {
        let fs = Filesystem::new("id", "/srv/data", "/");
        assert_eq!(fs.relative_path(Path::new("/srv/data")), "/");
        assert_eq!(fs.relative_path(Path::new("/srv/data/a/b")), "/a/b");
        assert_eq!(fs.relative_path(Path::new("/elsewhere")), "/");

        let fs = Filesystem::new("id", "/srv/map", "/vdir");
        assert_eq!(fs.relative_path(Path::new("/srv/map/a")), "/vdir/a");
        assert_eq!(fs.relative_path(Path::new("/srv/map")), "/vdir");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn walk_yields_children_before_parents() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("tree");
        std::fs::create_dir_all(root.join("a/b")).unwrap();
        std::fs::write(root.join("a/b/file.txt"), b"content").unwrap();

        let fs = Filesystem::new("id", tmp.path(), "/");
        let mut seen = Vec::new();
        let mut entries = fs.walk(&root);
        while let Some(entry) = entries.next().await {
            assert!(entry.error.is_none());
            seen.push(entry.path);
        }
        let pos = |p: &Path| seen.iter().position(|s| s == p).unwrap();
        assert!(pos(&root.join("a/b/file.txt")) < pos(&root.join("a/b")));
        assert!(pos(&root.join("a/b")) < pos(&root.join("a")));
        assert!(pos(&root.join("a")) < pos(&root));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn walk_reports_a_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let fs = Filesystem::new("id", tmp.path(), "/");
        let mut entries = fs.walk(&tmp.path().join("missing"));
        let entry = entries.next().await.unwrap();
        let err = entry.error.expect("walk should fail");
        assert!(fs.is_not_exist(&err));
        assert!(entries.next().await.is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn dir_size_counts_files() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("sized");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("one"), vec![0_u8; 10]).unwrap();
        std::fs::write(root.join("sub/two"), vec![0_u8; 32]).unwrap();

        let fs = Filesystem::new("id", tmp.path(), "/");
        let (files, size) = fs.dir_size(&root).await.unwrap();
        assert_eq!(files, 2);
        assert_eq!(size, 42);
    }
}
