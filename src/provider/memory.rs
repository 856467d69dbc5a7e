use super::{DataProvider, ProviderError, Result};
use crate::auth::User;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    users: HashMap<String, User>,
    user_quotas: HashMap<String, (i32, i64)>,
    folder_quotas: HashMap<String, (i32, i64)>,
}

/// An in-memory [`DataProvider`].
///
/// All state lives behind a single lock, which makes quota mutation atomic
/// per scope. Nothing is persisted across restarts.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    state: RwLock<State>,
}

impl MemoryProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    fn validate(user: &User) -> Result<()> {
        if user.username.is_empty() {
            return Err(ProviderError::Validation("username is mandatory".to_string()));
        }
        if !user.permissions.contains_key("/") {
            return Err(ProviderError::Validation(format!(
                "permissions for the root dir \"/\" must be set for user {}",
                user.username
            )));
        }
        Ok(())
    }

    fn apply(entry: &mut (i32, i64), files: i32, size: i64, reset: bool) {
        if reset {
            *entry = (files, size);
        } else {
            entry.0 += files;
            entry.1 += size;
        }
    }
}

#[async_trait]
impl DataProvider for MemoryProvider {
    async fn get_users(&self) -> Result<Vec<User>> {
        let state = self.state.read().expect("provider lock poisoned");
        Ok(state.users.values().cloned().collect())
    }

    async fn user_exists(&self, username: &str) -> Result<bool> {
        let state = self.state.read().expect("provider lock poisoned");
        Ok(state.users.contains_key(username))
    }

    async fn add_user(&self, user: User) -> Result<()> {
        Self::validate(&user)?;
        let mut state = self.state.write().expect("provider lock poisoned");
        if state.users.contains_key(&user.username) {
            return Err(ProviderError::Validation(format!("user {} already exists", user.username)));
        }
        state.users.insert(user.username.clone(), user);
        Ok(())
    }

    async fn update_user(&self, user: User) -> Result<()> {
        Self::validate(&user)?;
        let mut state = self.state.write().expect("provider lock poisoned");
        if !state.users.contains_key(&user.username) {
            return Err(ProviderError::NotFound);
        }
        state.users.insert(user.username.clone(), user);
        Ok(())
    }

    async fn delete_user(&self, username: &str) -> Result<()> {
        let mut state = self.state.write().expect("provider lock poisoned");
        if state.users.remove(username).is_none() {
            return Err(ProviderError::NotFound);
        }
        state.user_quotas.remove(username);
        Ok(())
    }

    async fn update_user_quota(&self, username: &str, files: i32, size: i64, reset: bool) -> Result<()> {
        let mut state = self.state.write().expect("provider lock poisoned");
        if !state.users.contains_key(username) {
            return Err(ProviderError::NotFound);
        }
        let entry = state.user_quotas.entry(username.to_string()).or_default();
        Self::apply(entry, files, size, reset);
        Ok(())
    }

    async fn update_folder_quota(&self, name: &str, files: i32, size: i64, reset: bool) -> Result<()> {
        let mut state = self.state.write().expect("provider lock poisoned");
        let entry = state.folder_quotas.entry(name.to_string()).or_default();
        Self::apply(entry, files, size, reset);
        Ok(())
    }

    async fn used_quota(&self, username: &str) -> Result<(i32, i64)> {
        let state = self.state.read().expect("provider lock poisoned");
        Ok(state.user_quotas.get(username).copied().unwrap_or_default())
    }

    async fn used_folder_quota(&self, name: &str) -> Result<(i32, i64)> {
        let state = self.state.read().expect("provider lock poisoned");
        Ok(state.folder_quotas.get(name).copied().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Permission;

    fn test_user(name: &str) -> User {
        let mut user = User::new(name, "/srv/home");
        user.permissions.insert("/".to_string(), vec![Permission::Any]);
        user
    }

    #[tokio::test(flavor = "current_thread")]
    async fn add_user_requires_root_permissions() {
        let provider = MemoryProvider::new();
        let user = User::new("nobody", "/srv/home");
        assert!(matches!(provider.add_user(user).await, Err(ProviderError::Validation(_))));
        assert!(provider.add_user(test_user("alice")).await.is_ok());
        assert!(provider.user_exists("alice").await.unwrap());
        assert!(matches!(provider.add_user(test_user("alice")).await, Err(ProviderError::Validation(_))));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn quota_updates_accumulate_and_reset() {
        let provider = MemoryProvider::new();
        provider.add_user(test_user("alice")).await.unwrap();

        provider.update_user_quota("alice", 1, 100, false).await.unwrap();
        provider.update_user_quota("alice", 2, 50, false).await.unwrap();
        assert_eq!(provider.used_quota("alice").await.unwrap(), (3, 150));

        provider.update_user_quota("alice", 1, 10, true).await.unwrap();
        assert_eq!(provider.used_quota("alice").await.unwrap(), (1, 10));

        provider.update_folder_quota("vdir", 1, 30, false).await.unwrap();
        provider.update_folder_quota("vdir", -1, -30, false).await.unwrap();
        assert_eq!(provider.used_folder_quota("vdir").await.unwrap(), (0, 0));

        assert!(matches!(
            provider.update_user_quota("missing", 1, 1, false).await,
            Err(ProviderError::NotFound)
        ));
    }
}
