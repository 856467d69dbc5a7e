use crate::auth::Permission;
use crate::storage::{FilesystemConfig, FsHandle, Result, VirtualFolder};
use crate::util;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Per-user upload restrictions.
#[derive(Debug, Clone, Default)]
pub struct UserFilters {
    /// Maximum size of a single uploaded file in bytes, 0 for no limit.
    pub max_upload_file_size: i64,
}

/// A server user as resolved at authentication time.
///
/// The record is snapshot-immutable for the lifetime of a connection: admin
/// side changes replace the connection's user reference as a whole instead of
/// mutating it in place.
#[derive(Debug, Clone, Default)]
pub struct User {
    /// The unique username.
    pub username: String,
    /// The home directory on the primary backend.
    pub home_dir: PathBuf,
    /// Numeric user id applied to files on backends that support ownership,
    /// 0 to keep the daemon identity.
    pub uid: i32,
    /// Numeric group id, 0 to keep the daemon identity.
    pub gid: i32,
    /// Maximum total size of the user's files in bytes, 0 for no limit.
    pub quota_size: i64,
    /// Maximum number of files, 0 for no limit.
    pub quota_files: i32,
    /// Per-directory permission map. The key `/` must always be present.
    pub permissions: HashMap<String, Vec<Permission>>,
    /// Upload restrictions.
    pub filters: UserFilters,
    /// Backend configuration for the home directory.
    pub fs_config: FilesystemConfig,
    /// Additional mount points, each served by its own backend.
    pub virtual_folders: Vec<VirtualFolder>,
}

impl User {
    /// Creates a user with the given name and home directory and no granted
    /// permissions.
    pub fn new<P: Into<PathBuf>>(username: &str, home_dir: P) -> Self {
        User {
            username: username.to_string(),
            home_dir: home_dir.into(),
            ..Default::default()
        }
    }

    /// Returns the permission set governing the given virtual path: the one
    /// stored at its longest ancestor key, the path itself included.
    pub fn permissions_for_path(&self, virtual_path: &str) -> &[Permission] {
        for dir in util::dirs_for_virtual_path(virtual_path) {
            if let Some(perms) = self.permissions.get(&dir) {
                return perms;
            }
        }
        &[]
    }

    /// Tells whether the user is granted `permission` on the given virtual
    /// path.
    pub fn has_perm(&self, permission: Permission, virtual_path: &str) -> bool {
        let perms = self.permissions_for_path(virtual_path);
        perms.contains(&Permission::Any) || perms.contains(&permission)
    }

    /// Tells whether the user is granted at least one of `permissions` on the
    /// given virtual path.
    pub fn has_any_perm(&self, permissions: &[Permission], virtual_path: &str) -> bool {
        let perms = self.permissions_for_path(virtual_path);
        if perms.contains(&Permission::Any) {
            return true;
        }
        permissions.iter().any(|p| perms.contains(p))
    }

    /// Tells whether the union rename atom governs the given virtual path,
    /// granting renames regardless of the object type.
    pub fn has_perms_rename_all(&self, virtual_path: &str) -> bool {
        let perms = self.permissions_for_path(virtual_path);
        perms.contains(&Permission::Any) || perms.contains(&Permission::Rename)
    }

    /// Tells whether the permission map has keys strictly inside the given
    /// virtual path, overriding the permissions at its root.
    pub fn has_permissions_inside(&self, virtual_path: &str) -> bool {
        let prefix = if virtual_path == "/" {
            "/".to_string()
        } else {
            format!("{}/", virtual_path)
        };
        self.permissions.keys().any(|dir| dir != virtual_path && dir != "/" && dir.starts_with(&prefix))
    }

    /// Returns the virtual folder serving the given path, longest mount
    /// prefix wins. `None` means the path is served by the primary backend.
    pub fn virtual_folder_for_path(&self, virtual_path: &str) -> Option<&VirtualFolder> {
        self.virtual_folders
            .iter()
            .filter(|folder| {
                virtual_path == folder.virtual_path || virtual_path.starts_with(&format!("{}/", folder.virtual_path))
            })
            .max_by_key(|folder| folder.virtual_path.len())
    }

    /// True if the given virtual path is exactly a virtual folder mount
    /// point.
    pub fn is_virtual_folder(&self, virtual_path: &str) -> bool {
        self.virtual_folders.iter().any(|folder| folder.virtual_path == virtual_path)
    }

    /// True if one or more virtual folders are mounted strictly inside the
    /// given virtual path.
    pub fn has_virtual_folders_inside(&self, virtual_path: &str) -> bool {
        if virtual_path == "/" && !self.virtual_folders.is_empty() {
            return true;
        }
        self.virtual_folders.iter().any(|folder| {
            folder.virtual_path.len() > virtual_path.len() && folder.virtual_path.starts_with(&format!("{}/", virtual_path))
        })
    }

    /// True if the given backend path is the mapped path of one of the
    /// virtual folders. Such directories may not be removed.
    pub fn is_mapped_path(&self, fs_path: &Path) -> bool {
        self.virtual_folders.iter().any(|folder| folder.mapped_path == fs_path)
    }

    /// Tells whether two virtual paths live on the same backend resource, so
    /// that a plain backend rename can move between them.
    pub fn is_same_resource(&self, virtual_source_path: &str, virtual_target_path: &str) -> bool {
        let source = self.virtual_folder_for_path(virtual_source_path);
        let target = self.virtual_folder_for_path(virtual_target_path);
        match (source, target) {
            (None, None) => true,
            (Some(source), Some(target)) => source.name == target.name,
            _ => false,
        }
    }

    /// Builds the backend serving the home directory.
    pub fn filesystem(&self, connection_id: &str) -> Result<FsHandle> {
        self.fs_config.filesystem(connection_id, &self.home_dir, "/")
    }

    /// Builds the backend serving the given virtual path, routing through the
    /// virtual folder overlay.
    pub fn filesystem_for_path(&self, virtual_path: &str, connection_id: &str) -> Result<FsHandle> {
        let cleaned = util::clean_path(virtual_path);
        if let Some(folder) = self.virtual_folder_for_path(&cleaned) {
            return folder.filesystem(connection_id);
        }
        self.filesystem(connection_id)
    }
}
