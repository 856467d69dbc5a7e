//! Contains the [`DataProvider`] trait the connection core charges quota
//! usage against, plus the in-memory implementation shipped with the crate.
//!
//! User and folder persistence is deliberately out of the core: a production
//! server backs this trait with its database while tests and small
//! deployments use [`MemoryProvider`].

mod memory;
pub use memory::MemoryProvider;

use crate::auth::User;
use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;

/// The error returned by data providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested user or folder does not exist.
    #[error("object not found")]
    NotFound,
    /// The object violates a provider invariant.
    #[error("validation error: {0}")]
    Validation(String),
    /// The provider backend failed.
    #[error("provider error: {0}")]
    Backend(String),
}

/// Result type used by the [`DataProvider`] trait.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Persistence of users, virtual folders and their quota usage.
///
/// Quota mutation is atomic per (user or folder) scope: concurrent updates
/// for the same scope are serialized by the implementation, so simultaneous
/// operations on the same object produce at most one accounting update each.
#[async_trait]
pub trait DataProvider: Send + Sync + Debug {
    /// Returns all users.
    async fn get_users(&self) -> Result<Vec<User>>;

    /// Tells whether a user with the given name exists.
    async fn user_exists(&self, username: &str) -> Result<bool>;

    /// Adds a new user. The permission map must contain the root key.
    async fn add_user(&self, user: User) -> Result<()>;

    /// Replaces an existing user.
    async fn update_user(&self, user: User) -> Result<()>;

    /// Deletes a user and its quota usage.
    async fn delete_user(&self, username: &str) -> Result<()>;

    /// Adjusts the quota usage of a user. With `reset` the given values
    /// replace the stored ones, otherwise they are added.
    async fn update_user_quota(&self, username: &str, files: i32, size: i64, reset: bool) -> Result<()>;

    /// Adjusts the quota usage of a virtual folder. With `reset` the given
    /// values replace the stored ones, otherwise they are added.
    async fn update_folder_quota(&self, name: &str, files: i32, size: i64, reset: bool) -> Result<()>;

    /// Returns the (files, size) usage of a user.
    async fn used_quota(&self, username: &str) -> Result<(i32, i64)>;

    /// Returns the (files, size) usage of a virtual folder.
    async fn used_folder_quota(&self, name: &str) -> Result<(i32, i64)>;
}
