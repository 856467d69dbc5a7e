use derive_more::Display;
use serde::{Deserialize, Serialize};

/// The closed set of per-path capability tokens a user can be granted.
///
/// Atoms are stored in the user permission map keyed by virtual directory;
/// the entry governing a path is the one at its longest ancestor key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Grants every other atom.
    #[display(fmt = "*")]
    #[serde(rename = "*")]
    Any,
    /// List directory contents.
    #[display(fmt = "list")]
    #[serde(rename = "list")]
    ListItems,
    /// Download files.
    #[display(fmt = "download")]
    Download,
    /// Upload new files.
    #[display(fmt = "upload")]
    Upload,
    /// Overwrite existing files.
    #[display(fmt = "overwrite")]
    Overwrite,
    /// Delete files and directories. Legacy union of the two specialized
    /// delete atoms.
    #[display(fmt = "delete")]
    Delete,
    /// Delete files.
    #[display(fmt = "delete_files")]
    DeleteFiles,
    /// Delete directories.
    #[display(fmt = "delete_dirs")]
    DeleteDirs,
    /// Rename files and directories. Union of the two specialized rename
    /// atoms.
    #[display(fmt = "rename")]
    Rename,
    /// Rename files.
    #[display(fmt = "rename_files")]
    RenameFiles,
    /// Rename directories.
    #[display(fmt = "rename_dirs")]
    RenameDirs,
    /// Create directories.
    #[display(fmt = "create_dirs")]
    CreateDirs,
    /// Create symbolic links.
    #[display(fmt = "create_symlinks")]
    CreateSymlinks,
    /// Change permission bits.
    #[display(fmt = "chmod")]
    Chmod,
    /// Change owner and group.
    #[display(fmt = "chown")]
    Chown,
    /// Change access and modification times.
    #[display(fmt = "chtimes")]
    Chtimes,
}

impl Permission {
    /// All atoms except `Any`.
    pub const VALUES: [Permission; 15] = [
        Permission::ListItems,
        Permission::Download,
        Permission::Upload,
        Permission::Overwrite,
        Permission::Delete,
        Permission::DeleteFiles,
        Permission::DeleteDirs,
        Permission::Rename,
        Permission::RenameFiles,
        Permission::RenameDirs,
        Permission::CreateDirs,
        Permission::CreateSymlinks,
        Permission::Chmod,
        Permission::Chown,
        Permission::Chtimes,
    ];
}
