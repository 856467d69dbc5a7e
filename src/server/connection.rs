//! The protocol independent connection object.
//!
//! One [`Connection`] exists per authenticated client session. Protocol
//! handlers delegate every user visible filesystem action to it: it routes
//! virtual paths across the virtual folder overlay, checks per-path
//! permissions before touching any backend, keeps quota usage up to date and
//! translates backend failures to the error surface of the protocol in use.
//!
//! A connection may be invoked concurrently by its protocol handler (SFTP and
//! WebDAV multiplex requests on one session), so every operation works on an
//! immutable user snapshot taken at entry.

use crate::auth::{Permission, User};
use crate::provider::DataProvider;
use crate::server::config::{self, SetstatMode};
use crate::server::error::{self, ConnectionError};
use crate::server::Protocol;
use crate::storage::{self, FileInfo, FsHandle, QuotaCheckResult, StorageBackend};
use crate::util;
use futures::StreamExt;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

/// The attributes a setstat style request wants to apply. Absent fields are
/// left unchanged.
#[derive(Debug, Clone, Default)]
pub struct StatAttributes {
    /// Permission bits for chmod.
    pub mode: Option<u32>,
    /// Owner id for chown.
    pub uid: Option<i32>,
    /// Group id for chown.
    pub gid: Option<i32>,
    /// Access time for chtimes.
    pub atime: Option<SystemTime>,
    /// Modification time for chtimes.
    pub mtime: Option<SystemTime>,
    /// Truncation size, consumed by the transfer subsystem.
    pub size: Option<i64>,
}

#[derive(Debug)]
struct ObjectMapping {
    fs_path: PathBuf,
    virtual_path: String,
    info: FileInfo,
}

enum WalkAbort {
    Core(ConnectionError),
    Backend(storage::Error),
}

/// A logical connection between an authenticated client and the storage
/// backends serving its virtual tree.
pub struct Connection {
    id: String,
    protocol: RwLock<Protocol>,
    user: RwLock<Arc<User>>,
    local_addr: String,
    remote_addr: String,
    provider: Arc<dyn DataProvider>,
    logger: slog::Logger,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("protocol", &self.protocol())
            .field("username", &self.username())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates a connection for the given user. An empty `id` gets replaced
    /// by a generated one.
    pub fn new(
        id: &str,
        protocol: Protocol,
        local_addr: &str,
        remote_addr: &str,
        user: User,
        provider: Arc<dyn DataProvider>,
    ) -> Self {
        let id = if id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            id.to_string()
        };
        Connection {
            id,
            protocol: RwLock::new(protocol),
            user: RwLock::new(Arc::new(user)),
            local_addr: local_addr.to_string(),
            remote_addr: remote_addr.to_string(),
            provider,
            logger: slog::Logger::root(slog::Discard, slog::o!()),
        }
    }

    /// Attaches a structured logger; connection id and protocol are added as
    /// context.
    pub fn with_logger(mut self, logger: &slog::Logger) -> Self {
        self.logger = logger.new(slog::o!("connection_id" => self.id.clone(), "protocol" => self.protocol().to_string()));
        self
    }

    /// The stable identifier of this connection.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The name of the connected user.
    pub fn username(&self) -> String {
        self.user().username.clone()
    }

    /// The local address the client connected to.
    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    /// The remote address of the client.
    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// The protocol this connection currently serves.
    pub fn protocol(&self) -> Protocol {
        *self.protocol.read().expect("protocol lock poisoned")
    }

    /// Switches the protocol, e.g. when an HTTP connection is upgraded to a
    /// share download.
    pub fn set_protocol(&self, protocol: Protocol) {
        *self.protocol.write().expect("protocol lock poisoned") = protocol;
    }

    /// The current user snapshot. The returned reference stays consistent
    /// even if the user is replaced concurrently.
    pub fn user(&self) -> Arc<User> {
        self.user.read().expect("user lock poisoned").clone()
    }

    /// Atomically replaces the user snapshot, e.g. after an admin side
    /// update. Running operations keep the snapshot they started with.
    pub fn set_user(&self, user: User) {
        *self.user.write().expect("user lock poisoned") = Arc::new(user);
    }

    // ----- error surface -----

    /// Translates a backend error using the backend's own classification and
    /// the connection protocol.
    pub fn fs_error(&self, fs: &FsHandle, err: storage::Error) -> ConnectionError {
        let protocol = self.protocol();
        if fs.is_not_exist(&err) {
            return error::not_exist_error(protocol);
        }
        if fs.is_permission(&err) {
            return error::permission_denied_error(protocol);
        }
        self.translate_by_kind(protocol, err)
    }

    fn storage_error(&self, err: storage::Error) -> ConnectionError {
        let protocol = self.protocol();
        match err.kind() {
            storage::ErrorKind::NotFound => error::not_exist_error(protocol),
            storage::ErrorKind::PermissionDenied => error::permission_denied_error(protocol),
            _ => self.translate_by_kind(protocol, err),
        }
    }

    fn translate_by_kind(&self, protocol: Protocol, err: storage::Error) -> ConnectionError {
        match err.kind() {
            storage::ErrorKind::Unsupported => error::op_unsupported_error(protocol),
            storage::ErrorKind::StorageSizeUnavailable => match protocol {
                Protocol::Sftp => ConnectionError::Sftp {
                    code: crate::server::StatusCode::OpUnsupported,
                    source: Some(Box::new(ConnectionError::Storage(err))),
                },
                _ => ConnectionError::Storage(err),
            },
            _ => error::generic_error(protocol, Some(ConnectionError::Storage(err))),
        }
    }

    /// The protocol specific "no such file" error.
    pub fn not_exist_error(&self) -> ConnectionError {
        error::not_exist_error(self.protocol())
    }

    /// The protocol specific "permission denied" error.
    pub fn permission_denied_error(&self) -> ConnectionError {
        error::permission_denied_error(self.protocol())
    }

    /// The protocol specific "operation unsupported" error.
    pub fn op_unsupported_error(&self) -> ConnectionError {
        error::op_unsupported_error(self.protocol())
    }

    /// The protocol specific generic failure, optionally carrying the cause.
    pub fn generic_error(&self, source: Option<ConnectionError>) -> ConnectionError {
        error::generic_error(self.protocol(), source)
    }

    /// The protocol specific "quota exceeded" error.
    pub fn quota_exceeded_error(&self) -> ConnectionError {
        error::quota_exceeded_error(self.protocol())
    }

    /// The protocol specific "read quota exceeded" error.
    pub fn read_quota_exceeded_error(&self) -> ConnectionError {
        error::read_quota_exceeded_error(self.protocol())
    }

    /// True if the given error signals an exhausted write quota, on any
    /// protocol surface.
    pub fn is_quota_exceeded_error(&self, err: &ConnectionError) -> bool {
        err.is_quota_exceeded()
    }

    /// True if the given error signals a missing object, on any protocol
    /// surface.
    pub fn is_not_exist_error(&self, err: &ConnectionError) -> bool {
        err.is_not_exist()
    }

    // ----- path resolution -----

    /// Returns the backend serving the given virtual path together with the
    /// resolved backend path. Fails once the server is shutting down.
    pub fn fs_and_resolved_path(&self, virtual_path: &str) -> Result<(FsHandle, PathBuf), ConnectionError> {
        let user = self.user();
        let fs = user
            .filesystem_for_path(virtual_path, &self.id)
            .map_err(|err| self.storage_error(err))?;
        if config::is_shutting_down() {
            return Err(error::map_error(self.protocol(), ConnectionError::ShuttingDown));
        }
        let fs_path = fs.resolve_path(virtual_path).map_err(|err| self.fs_error(&fs, err))?;
        Ok((fs, fs_path))
    }

    /// Stats the object at the given virtual path. Mode 0 follows symlinks,
    /// mode 1 does not.
    pub async fn do_stat(&self, virtual_path: &str, mode: u32) -> Result<FileInfo, ConnectionError> {
        let (fs, fs_path) = self.fs_and_resolved_path(virtual_path)?;
        let result = if mode == 1 {
            fs.lstat(&fs_path).await
        } else {
            fs.stat(&fs_path).await
        };
        result.map_err(|err| self.fs_error(&fs, err))
    }

    // ----- quota -----

    /// Computes the quota snapshot for the scope governing `request_path`.
    /// With `get_usage` the usage numbers are filled in even when the scope
    /// has no quota restrictions.
    pub async fn has_space(&self, check_files: bool, get_usage: bool, request_path: &str) -> QuotaCheckResult {
        let user = self.user();
        let mut result = QuotaCheckResult {
            has_space: true,
            ..Default::default()
        };

        let folder = user
            .virtual_folder_for_path(&util::dir_path(request_path))
            .filter(|folder| !folder.is_included_in_user_quota());
        let usage = if let Some(folder) = folder {
            if folder.quota_size == 0 && (!check_files || folder.quota_files == 0) && !get_usage {
                return result;
            }
            result.quota_size = folder.quota_size;
            result.quota_files = folder.quota_files;
            self.provider.used_folder_quota(&folder.name).await
        } else {
            if user.quota_size == 0 && (!check_files || user.quota_files == 0) && !get_usage {
                return result;
            }
            result.quota_size = user.quota_size;
            result.quota_files = user.quota_files;
            self.provider.used_quota(&user.username).await
        };
        match usage {
            Ok((files, size)) => {
                result.used_files = files;
                result.used_size = size;
            }
            Err(err) => {
                slog::warn!(self.logger, "could not read used quota for {:?}: {}", request_path, err);
                result.has_space = false;
                return result;
            }
        }
        result.allowed_files = result.quota_files - result.used_files;
        result.allowed_size = result.quota_size - result.used_size;
        if (check_files && result.quota_files > 0 && result.used_files >= result.quota_files)
            || (result.quota_size > 0 && result.used_size >= result.quota_size)
        {
            result.has_space = false;
        }
        result
    }

    /// Returns the maximum number of bytes an upload may write, 0 meaning
    /// unlimited. `file_size` is the current size of the target file: the
    /// resume offset for resumed uploads, the size of the file being
    /// replaced otherwise.
    pub fn max_write_size(
        &self,
        quota: &QuotaCheckResult,
        is_resume: bool,
        file_size: i64,
        is_upload_resume_supported: bool,
    ) -> Result<i64, ConnectionError> {
        if !quota.has_space && !is_resume {
            return Err(self.quota_exceeded_error());
        }
        let user = self.user();
        let mut max_write_size = quota.remaining_size();

        if is_resume {
            if !is_upload_resume_supported {
                return Err(self.op_unsupported_error());
            }
            let max_upload = user.filters.max_upload_file_size;
            if max_upload > 0 && max_upload <= file_size {
                return Err(self.quota_exceeded_error());
            }
            if max_upload > 0 {
                let remaining_upload = max_upload - file_size;
                if remaining_upload < max_write_size || max_write_size == 0 {
                    max_write_size = remaining_upload;
                }
            }
        } else {
            if max_write_size > 0 {
                // replacing a file frees its bytes within the quota
                max_write_size += file_size;
            }
            let max_upload = user.filters.max_upload_file_size;
            if max_upload > 0 && (max_upload < max_write_size || max_write_size == 0) {
                max_write_size = max_upload;
            }
        }
        Ok(max_write_size)
    }

    async fn try_update_user_quota(&self, username: &str, files: i32, size: i64) {
        if let Err(err) = self.provider.update_user_quota(username, files, size, false).await {
            slog::warn!(self.logger, "could not update quota for user {}: {}", username, err);
        }
    }

    async fn try_update_folder_quota(&self, name: &str, files: i32, size: i64) {
        if let Err(err) = self.provider.update_folder_quota(name, files, size, false).await {
            slog::warn!(self.logger, "could not update quota for folder {}: {}", name, err);
        }
    }

    // ----- remove -----

    /// Checks whether the user may delete the file at the given virtual path.
    pub fn is_remove_file_allowed(&self, virtual_path: &str) -> Result<(), ConnectionError> {
        if !self
            .user()
            .has_any_perm(&[Permission::Delete, Permission::DeleteFiles], &util::dir_path(virtual_path))
        {
            return Err(self.permission_denied_error());
        }
        Ok(())
    }

    /// Removes a file, charging the governing quota scope.
    pub async fn remove_file(
        &self,
        fs: &FsHandle,
        fs_path: &Path,
        virtual_path: &str,
        info: &FileInfo,
    ) -> Result<(), ConnectionError> {
        self.is_remove_file_allowed(virtual_path)?;

        let size = info.size();
        fs.remove(fs_path, false).await.map_err(|err| self.fs_error(fs, err))?;

        if !info.is_symlink() {
            let user = self.user();
            if let Some(folder) = user.virtual_folder_for_path(&util::dir_path(virtual_path)) {
                self.try_update_folder_quota(&folder.name, -1, -size).await;
                if folder.is_included_in_user_quota() {
                    self.try_update_user_quota(&user.username, -1, -size).await;
                }
            } else {
                self.try_update_user_quota(&user.username, -1, -size).await;
            }
        }
        Ok(())
    }

    /// Checks whether the user may remove the directory at the given virtual
    /// path. The root, virtual folder mount points, directories with mounts
    /// inside and mapped paths are always refused.
    pub fn is_remove_dir_allowed(&self, fs: &FsHandle, fs_path: &Path, virtual_path: &str) -> Result<(), ConnectionError> {
        let user = self.user();
        if fs.relative_path(fs_path) == "/" {
            slog::warn!(self.logger, "removing root dir is not allowed");
            return Err(self.permission_denied_error());
        }
        if user.is_virtual_folder(virtual_path) {
            slog::warn!(self.logger, "removing a virtual folder is not allowed: {:?}", virtual_path);
            return Err(self.permission_denied_error());
        }
        if user.has_virtual_folders_inside(virtual_path) {
            slog::warn!(
                self.logger,
                "removing a directory with a virtual folder inside is not allowed: {:?}",
                virtual_path
            );
            return Err(self.op_unsupported_error());
        }
        if user.is_mapped_path(fs_path) {
            slog::warn!(
                self.logger,
                "removing a directory mapped as virtual folder is not allowed: {:?}",
                fs_path
            );
            return Err(self.permission_denied_error());
        }
        if !user.has_any_perm(&[Permission::Delete, Permission::DeleteDirs], &util::dir_path(virtual_path)) {
            return Err(self.permission_denied_error());
        }
        Ok(())
    }

    /// Removes an empty directory.
    pub async fn remove_dir(&self, fs: &FsHandle, fs_path: &Path, virtual_path: &str) -> Result<(), ConnectionError> {
        self.is_remove_dir_allowed(fs, fs_path, virtual_path)?;

        let info = match fs.lstat(fs_path).await {
            Ok(info) => info,
            Err(err) => {
                // on backends with emulated directories a missing prefix is
                // already gone
                if fs.is_not_exist(&err) && fs.has_virtual_folders() {
                    return Ok(());
                }
                return Err(self.fs_error(fs, err));
            }
        };
        if !info.is_dir() || info.is_symlink() {
            slog::warn!(self.logger, "cannot remove {:?}, it is not a directory", fs_path);
            return Err(self.generic_error(None));
        }
        fs.remove(fs_path, true).await.map_err(|err| self.fs_error(fs, err))?;
        Ok(())
    }

    /// Recursively removes a directory tree: the tree is walked first to
    /// verify permissions entry by entry, then files and directories are
    /// removed children before parents.
    pub async fn remove_dir_tree(&self, fs: &FsHandle, fs_path: &Path, virtual_path: &str) -> Result<(), ConnectionError> {
        let mut dirs_to_remove: Vec<ObjectMapping> = Vec::new();
        let mut files_to_remove: Vec<ObjectMapping> = Vec::new();
        let mut abort: Option<WalkAbort> = None;

        let mut entries = fs.walk(fs_path);
        while let Some(entry) = entries.next().await {
            if let Some(err) = entry.error {
                abort = Some(WalkAbort::Backend(err));
                break;
            }
            let Some(info) = entry.info else {
                continue;
            };
            let obj = ObjectMapping {
                virtual_path: fs.relative_path(&entry.path),
                fs_path: entry.path,
                info,
            };
            if obj.info.is_dir() {
                if let Err(err) = self.is_remove_dir_allowed(fs, &obj.fs_path, &obj.virtual_path) {
                    slog::warn!(
                        self.logger,
                        "unable to remove dir tree, object {:?} cannot be removed: {}",
                        obj.virtual_path,
                        err
                    );
                    abort = Some(WalkAbort::Core(err));
                    break;
                }
                // object store walkers may report a prefix more than once
                if !dirs_to_remove.iter().any(|d| d.fs_path == obj.fs_path) {
                    dirs_to_remove.push(obj);
                }
            } else {
                if let Err(err) = self.is_remove_file_allowed(&obj.virtual_path) {
                    slog::warn!(
                        self.logger,
                        "unable to remove dir tree, object {:?} cannot be removed: {}",
                        obj.virtual_path,
                        err
                    );
                    abort = Some(WalkAbort::Core(err));
                    break;
                }
                files_to_remove.push(obj);
            }
        }
        drop(entries);

        if let Some(abort) = abort {
            return Err(match abort {
                WalkAbort::Core(err) => err,
                WalkAbort::Backend(err) => {
                    if fs.has_virtual_folders() {
                        // object store backends cannot recursively remove
                        // non-empty trees through this path
                        self.permission_denied_error()
                    } else if fs.is_not_exist(&err) {
                        self.fs_error(fs, err)
                    } else {
                        self.generic_error(Some(ConnectionError::Storage(err)))
                    }
                }
            });
        }

        for file in &files_to_remove {
            self.remove_file(fs, &file.fs_path, &file.virtual_path, &file.info).await?;
        }
        for dir in order_dirs_to_remove(dirs_to_remove) {
            self.remove_dir(fs, &dir.fs_path, &dir.virtual_path).await?;
        }
        Ok(())
    }

    // ----- rename -----

    /// Tells whether the user's permissions allow renaming `virtual_source_path`
    /// to `virtual_target_path`. With unknown object type (`info` is `None`)
    /// the union rename atom is required on both endpoints.
    pub fn has_rename_perms(&self, virtual_source_path: &str, virtual_target_path: &str, info: Option<&FileInfo>) -> bool {
        let user = self.user();
        let source_dir = util::dir_path(virtual_source_path);
        let target_dir = util::dir_path(virtual_target_path);
        if user.has_perms_rename_all(&source_dir) && user.has_perms_rename_all(&target_dir) {
            return true;
        }
        let Some(info) = info else {
            // we don't know the object type here, only the generic rename
            // permission can decide
            return user.has_perm(Permission::Rename, &source_dir) && user.has_perm(Permission::Rename, &target_dir);
        };
        let perms: &[Permission] = if info.is_dir() {
            &[Permission::RenameDirs, Permission::Rename]
        } else {
            &[Permission::RenameFiles, Permission::Rename]
        };
        user.has_any_perm(perms, &source_dir) && user.has_any_perm(perms, &target_dir)
    }

    fn is_rename_permitted(
        &self,
        fs_src: &FsHandle,
        _fs_dst: &FsHandle,
        fs_source_path: &Path,
        virtual_source_path: &str,
        virtual_target_path: &str,
        info: Option<&FileInfo>,
    ) -> bool {
        let user = self.user();
        if util::is_dir_overlapped(virtual_source_path, virtual_target_path) {
            slog::warn!(
                self.logger,
                "renaming the overlapping paths {:?} -> {:?} is not allowed",
                virtual_source_path,
                virtual_target_path
            );
            return false;
        }
        if fs_src.relative_path(fs_source_path) == "/" {
            slog::warn!(self.logger, "renaming root dir is not allowed");
            return false;
        }
        if user.is_virtual_folder(virtual_source_path) || user.is_virtual_folder(virtual_target_path) {
            slog::warn!(self.logger, "renaming a virtual folder is not allowed");
            return false;
        }
        if user.has_virtual_folders_inside(virtual_source_path) || user.has_virtual_folders_inside(virtual_target_path) {
            slog::warn!(
                self.logger,
                "renaming a directory with a virtual folder inside is not allowed"
            );
            return false;
        }
        if !user.is_same_resource(virtual_source_path, virtual_target_path) {
            // emulated cross backend rename: upload on the target side,
            // delete on the source side
            let delete_perms: &[Permission] = if info.map(|i| i.is_dir()).unwrap_or(false) {
                &[Permission::Delete, Permission::DeleteDirs]
            } else {
                &[Permission::Delete, Permission::DeleteFiles]
            };
            return user.has_perm(Permission::Upload, &util::dir_path(virtual_target_path))
                && user.has_any_perm(delete_perms, &util::dir_path(virtual_source_path));
        }
        self.has_rename_perms(virtual_source_path, virtual_target_path, info)
    }

    /// Verifies that every entry under a directory about to be renamed may be
    /// renamed by the user. The walk is skipped when the union rename atom
    /// governs both endpoints and no permission override exists below them.
    pub async fn check_recursive_rename_dir_permissions(
        &self,
        fs_src: &FsHandle,
        fs_dst: &FsHandle,
        source_path: &Path,
        target_path: &Path,
        virtual_source_path: &str,
        virtual_target_path: &str,
        info: &FileInfo,
    ) -> Result<(), ConnectionError> {
        let user = self.user();
        if !user.has_permissions_inside(virtual_source_path) && !user.has_permissions_inside(virtual_target_path) {
            if !self.is_rename_permitted(fs_src, fs_dst, source_path, virtual_source_path, virtual_target_path, Some(info)) {
                slog::info!(
                    self.logger,
                    "rename {:?} -> {:?} is not allowed",
                    virtual_source_path,
                    virtual_target_path
                );
                return Err(self.permission_denied_error());
            }
            if user.has_perms_rename_all(&util::dir_path(virtual_source_path))
                && user.has_perms_rename_all(&util::dir_path(virtual_target_path))
            {
                // all rename permissions are granted at the endpoints, no
                // entry below can be denied
                return Ok(());
            }
        }

        let mut entries = fs_src.walk(source_path);
        while let Some(entry) = entries.next().await {
            if let Some(err) = entry.error {
                if fs_src.has_virtual_folders() || fs_dst.has_virtual_folders() {
                    return Err(self.op_unsupported_error());
                }
                return Err(self.fs_error(fs_src, err));
            }
            let Some(entry_info) = entry.info else {
                continue;
            };
            let walked = entry.path;
            let dst_path = match walked.strip_prefix(source_path) {
                Ok(rel) => target_path.join(rel),
                Err(_) => target_path.to_path_buf(),
            };
            let virtual_src = fs_src.relative_path(&walked);
            let virtual_dst = fs_dst.relative_path(&dst_path);
            if !self.is_rename_permitted(fs_src, fs_dst, &walked, &virtual_src, &virtual_dst, Some(&entry_info)) {
                slog::info!(
                    self.logger,
                    "rename {:?} -> {:?} is not allowed",
                    virtual_src,
                    virtual_dst
                );
                return Err(self.permission_denied_error());
            }
        }
        Ok(())
    }

    /// Tells whether the target quota scope has room for an emulated cross
    /// backend rename of `source_path`.
    pub async fn has_space_for_cross_rename(
        &self,
        fs: &FsHandle,
        quota: &QuotaCheckResult,
        initial_size: i64,
        source_path: &Path,
    ) -> bool {
        if !quota.has_space && initial_size == -1 {
            // over quota and not a file overwrite
            return false;
        }
        let info = match fs.lstat(source_path).await {
            Ok(info) => info,
            Err(err) => {
                slog::warn!(self.logger, "cross rename denied, lstat {:?} failed: {}", source_path, err);
                return false;
            }
        };
        let (files_diff, size_diff) = if info.is_file() {
            if initial_size != -1 {
                (0, info.size() - initial_size)
            } else {
                (1, info.size())
            }
        } else if info.is_dir() {
            match fs.dir_size(source_path).await {
                Ok((files, size)) => (files, size),
                Err(err) => {
                    slog::warn!(self.logger, "cross rename denied, cannot size {:?}: {}", source_path, err);
                    return false;
                }
            }
        } else {
            // symlinks carry no quota weight
            (0, 0)
        };
        if quota.quota_size > 0 && quota.used_size + size_diff > quota.quota_size {
            return false;
        }
        if quota.quota_files > 0 && quota.used_files + files_diff > quota.quota_files {
            return false;
        }
        true
    }

    async fn update_quota_after_rename(
        &self,
        fs: &FsHandle,
        virtual_source_path: &str,
        virtual_target_path: &str,
        target_fs_path: &Path,
        initial_size: i64,
    ) -> Result<(), ConnectionError> {
        let user = self.user();
        let source_folder = user.virtual_folder_for_path(&util::dir_path(virtual_source_path));
        let target_folder = user.virtual_folder_for_path(&util::dir_path(virtual_target_path));

        if source_folder.is_none() && target_folder.is_none() {
            if initial_size != -1 {
                // a file overwrite inside the home dir releases the replaced
                // bytes only
                self.try_update_user_quota(&user.username, -1, -initial_size).await;
            }
            return Ok(());
        }

        let info = fs.stat(target_fs_path).await.map_err(|err| self.fs_error(fs, err))?;
        let (num_files, files_size) = if info.is_dir() {
            fs.dir_size(target_fs_path).await.map_err(|err| self.fs_error(fs, err))?
        } else {
            (1, info.size())
        };

        match (source_folder, target_folder) {
            (Some(source), Some(target)) => {
                if source.name == target.name {
                    if initial_size != -1 {
                        self.try_update_folder_quota(&target.name, -num_files, -initial_size).await;
                        if target.is_included_in_user_quota() {
                            self.try_update_user_quota(&user.username, -num_files, -initial_size).await;
                        }
                    }
                    return Ok(());
                }
                self.try_update_folder_quota(&source.name, -num_files, -files_size).await;
                if source.is_included_in_user_quota() {
                    self.try_update_user_quota(&user.username, -num_files, -files_size).await;
                }
                self.try_update_folder_quota(&target.name, num_files, files_size).await;
                if target.is_included_in_user_quota() {
                    self.try_update_user_quota(&user.username, num_files, files_size).await;
                }
                if initial_size != -1 {
                    self.try_update_folder_quota(&target.name, -1, -initial_size).await;
                    if target.is_included_in_user_quota() {
                        self.try_update_user_quota(&user.username, -1, -initial_size).await;
                    }
                }
            }
            (None, Some(target)) => {
                self.try_update_user_quota(&user.username, -num_files, -files_size).await;
                self.try_update_folder_quota(&target.name, num_files, files_size).await;
                if target.is_included_in_user_quota() {
                    self.try_update_user_quota(&user.username, num_files, files_size).await;
                }
                if initial_size != -1 {
                    self.try_update_folder_quota(&target.name, -1, -initial_size).await;
                    if target.is_included_in_user_quota() {
                        self.try_update_user_quota(&user.username, -1, -initial_size).await;
                    }
                }
            }
            (Some(source), None) => {
                self.try_update_folder_quota(&source.name, -num_files, -files_size).await;
                if source.is_included_in_user_quota() {
                    self.try_update_user_quota(&user.username, -num_files, -files_size).await;
                }
                self.try_update_user_quota(&user.username, num_files, files_size).await;
                if initial_size != -1 {
                    self.try_update_user_quota(&user.username, -1, -initial_size).await;
                }
            }
            (None, None) => unreachable!("handled above"),
        }
        Ok(())
    }

    /// Renames `virtual_source_path` to `virtual_target_path`. Renames across
    /// backends are emulated for files by copying and deleting; directories
    /// cannot cross backends.
    #[allow(clippy::too_many_arguments)]
    pub async fn rename(
        &self,
        fs_src: &FsHandle,
        fs_dst: &FsHandle,
        fs_source_path: &Path,
        fs_target_path: &Path,
        virtual_source_path: &str,
        virtual_target_path: &str,
    ) -> Result<(), ConnectionError> {
        let user = self.user();
        let src_info = fs_src.lstat(fs_source_path).await.map_err(|err| self.fs_error(fs_src, err))?;
        if !self.is_rename_permitted(
            fs_src,
            fs_dst,
            fs_source_path,
            virtual_source_path,
            virtual_target_path,
            Some(&src_info),
        ) {
            return Err(self.permission_denied_error());
        }

        let mut initial_size: i64 = -1;
        if let Ok(dst_info) = fs_dst.lstat(fs_target_path).await {
            if dst_info.is_dir() {
                slog::warn!(
                    self.logger,
                    "renaming over the existing directory {:?} is not allowed",
                    virtual_target_path
                );
                return Err(self.op_unsupported_error());
            }
            if dst_info.is_file() {
                initial_size = dst_info.size();
            }
            if !user.has_perm(Permission::Overwrite, &util::dir_path(virtual_target_path)) {
                return Err(self.permission_denied_error());
            }
        }

        if src_info.is_dir() {
            self.check_recursive_rename_dir_permissions(
                fs_src,
                fs_dst,
                fs_source_path,
                fs_target_path,
                virtual_source_path,
                virtual_target_path,
                &src_info,
            )
            .await?;
        }

        if user.is_same_resource(virtual_source_path, virtual_target_path) {
            fs_src
                .rename(fs_source_path, fs_target_path)
                .await
                .map_err(|err| self.fs_error(fs_src, err))?;
        } else {
            if !src_info.is_file() {
                slog::warn!(
                    self.logger,
                    "renaming the directory {:?} across storage backends is not supported",
                    virtual_source_path
                );
                return Err(self.op_unsupported_error());
            }
            let quota = self.has_space(true, false, virtual_target_path).await;
            if !self.has_space_for_cross_rename(fs_src, &quota, initial_size, fs_source_path).await {
                return Err(self.quota_exceeded_error());
            }
            let mut reader = fs_src.open(fs_source_path).await.map_err(|err| self.fs_error(fs_src, err))?;
            let mut writer = fs_dst.create(fs_target_path).await.map_err(|err| self.fs_error(fs_dst, err))?;
            tokio::io::copy(&mut reader, &mut writer)
                .await
                .map_err(|err| self.fs_error(fs_dst, storage::Error::from(err)))?;
            tokio::io::AsyncWriteExt::shutdown(&mut writer)
                .await
                .map_err(|err| self.fs_error(fs_dst, storage::Error::from(err)))?;
            fs_src
                .remove(fs_source_path, false)
                .await
                .map_err(|err| self.fs_error(fs_src, err))?;
        }

        if let Err(err) = self
            .update_quota_after_rename(fs_dst, virtual_source_path, virtual_target_path, fs_target_path, initial_size)
            .await
        {
            slog::warn!(
                self.logger,
                "failed to update quota after renaming {:?} -> {:?}: {}",
                virtual_source_path,
                virtual_target_path,
                err
            );
        }
        Ok(())
    }

    // ----- parent dirs -----

    /// Makes sure every directory leading to the given virtual path exists,
    /// creating missing segments on their governing backends. Backends with
    /// emulated directories need no parents.
    pub async fn check_parent_dirs(&self, virtual_path: &str) -> Result<(), ConnectionError> {
        let user = self.user();
        let fs = user
            .filesystem_for_path(virtual_path, &self.id)
            .map_err(|err| self.storage_error(err))?;
        if fs.has_virtual_folders() {
            return Ok(());
        }
        match self.do_stat(virtual_path, 0).await {
            Ok(_) => return Ok(()),
            Err(err) if err.is_not_exist() => {}
            Err(err) => return Err(err),
        }

        for dir in util::dirs_for_virtual_path(virtual_path).into_iter().rev() {
            let fs = user
                .filesystem_for_path(&dir, &self.id)
                .map_err(|err| self.storage_error(err))?;
            if fs.has_virtual_folders() {
                continue;
            }
            let fs_path = fs.resolve_path(&dir).map_err(|err| self.fs_error(&fs, err))?;
            match fs.stat(&fs_path).await {
                Ok(_) => {}
                Err(err) if fs.is_not_exist(&err) => {
                    fs.mkdir(&fs_path).await.map_err(|err| self.fs_error(&fs, err))?;
                }
                Err(err) => return Err(self.fs_error(&fs, err)),
            }
        }
        Ok(())
    }

    // ----- setstat -----

    /// Applies a chmod request according to the configured setstat mode.
    pub async fn handle_chmod(
        &self,
        fs: &FsHandle,
        fs_path: &Path,
        path_for_perms: &str,
        attributes: &StatAttributes,
    ) -> Result<(), ConnectionError> {
        if !self.user().has_perm(Permission::Chmod, path_for_perms) {
            return Err(self.permission_denied_error());
        }
        let mode = config::setstat_mode();
        if mode == SetstatMode::Ignore || (mode == SetstatMode::IgnoreErrors && fs.has_virtual_folders()) {
            return Ok(());
        }
        let Some(perm_bits) = attributes.mode else {
            return Err(self.generic_error(None));
        };
        fs.chmod(fs_path, perm_bits).await.map_err(|err| self.fs_error(fs, err))?;
        Ok(())
    }

    /// Applies a chown request according to the configured setstat mode.
    pub async fn handle_chown(
        &self,
        fs: &FsHandle,
        fs_path: &Path,
        path_for_perms: &str,
        attributes: &StatAttributes,
    ) -> Result<(), ConnectionError> {
        if !self.user().has_perm(Permission::Chown, path_for_perms) {
            return Err(self.permission_denied_error());
        }
        let mode = config::setstat_mode();
        if mode == SetstatMode::Ignore || (mode == SetstatMode::IgnoreErrors && fs.has_virtual_folders()) {
            return Ok(());
        }
        let uid = attributes.uid.unwrap_or(-1);
        let gid = attributes.gid.unwrap_or(-1);
        fs.chown(fs_path, uid, gid).await.map_err(|err| self.fs_error(fs, err))?;
        Ok(())
    }

    /// Applies a chtimes request according to the configured setstat mode.
    /// Backends unable to change times report unsupported, which mode 2
    /// converts to success.
    pub async fn handle_chtimes(
        &self,
        fs: &FsHandle,
        fs_path: &Path,
        path_for_perms: &str,
        attributes: &StatAttributes,
    ) -> Result<(), ConnectionError> {
        if !self.user().has_perm(Permission::Chtimes, path_for_perms) {
            return Err(self.permission_denied_error());
        }
        let mode = config::setstat_mode();
        if mode == SetstatMode::Ignore {
            return Ok(());
        }
        if let Err(err) = fs.chtimes(fs_path, attributes.atime, attributes.mtime, false).await {
            if err.kind() == storage::ErrorKind::Unsupported && mode == SetstatMode::IgnoreErrors {
                return Ok(());
            }
            return Err(self.fs_error(fs, err));
        }
        Ok(())
    }
}

/// Orders directories children before parents, siblings depth first, so that
/// no directory is removed while one of its descendants remains.
fn order_dirs_to_remove(dirs_to_remove: Vec<ObjectMapping>) -> Vec<ObjectMapping> {
    let mut ordered: Vec<ObjectMapping> = Vec::with_capacity(dirs_to_remove.len());
    let mut remaining = dirs_to_remove;

    while !remaining.is_empty() {
        let mut progressed = false;
        let mut idx = 0;
        while idx < remaining.len() {
            let has_descendant = remaining
                .iter()
                .enumerate()
                .any(|(other_idx, other)| other_idx != idx && other.fs_path.starts_with(&remaining[idx].fs_path));
            if has_descendant {
                idx += 1;
            } else {
                ordered.push(remaining.remove(idx));
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    ordered
}
