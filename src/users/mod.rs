//! Accounts the session layer authenticates against.
//!
//! Persistence of users is out of scope here: [`UserDirectory`] is the seam a
//! real user store plugs into, and [`MemoryUserDirectory`] backs tests and
//! single-process setups.

pub mod password;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

pub use password::{Argon2Hasher, CredentialHasher, HashError};

use crate::session::SessionIdentity;

/// Provider name of password accounts
pub const LOCAL_PROVIDER: &str = "local";
/// Role given to self-registered accounts
pub const DEFAULT_ROLE: &str = "user";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("User already exists")]
    AlreadyExists,
    #[error("User not found")]
    NotFound,
    #[error("User directory unavailable: {0}")]
    Unavailable(String),
}

/// A user joined with the identity they log in through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    pub email: Option<String>,
    pub image_url: Option<String>,
    pub name: String,
    /// PHC string; `None` for accounts that only log in through a provider
    pub password_hash: Option<String>,
    pub phone: Option<String>,
    pub provider: String,
    pub provider_id: String,
    pub role: String,
    pub user_id: String,
    pub verified: bool,
}

impl UserAccount {
    /// The identity snapshot stored in each session of this account
    pub fn session_identity(&self) -> SessionIdentity {
        SessionIdentity {
            display_name: self.name.clone(),
            email: self.email.clone().unwrap_or_default(),
            image_url: self.image_url.clone(),
            phone: self.phone.clone(),
            provider: self.provider.clone(),
            provider_id: self.provider_id.clone(),
            role: self.role.clone(),
            user_id: self.user_id.clone(),
            verified: self.verified,
        }
    }
}

/// A password account about to be created
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: String,
    pub user_id: String,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<UserAccount, DirectoryError>;

    /// Create a local account. Fails with `AlreadyExists` if the email is taken.
    async fn register(&self, user: NewUser) -> Result<UserAccount, DirectoryError>;
}

/// In-process directory keyed by email
#[derive(Default)]
pub struct MemoryUserDirectory {
    accounts: RwLock<HashMap<String, UserAccount>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an account as-is, e.g. one that came from a provider.
    pub async fn insert(&self, account: UserAccount) {
        let key = account.email.clone().unwrap_or_default();
        self.accounts.write().await.insert(key, account);
    }

    pub async fn len(&self) -> usize {
        self.accounts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.accounts.read().await.is_empty()
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_by_email(&self, email: &str) -> Result<UserAccount, DirectoryError> {
        self.accounts
            .read()
            .await
            .get(email)
            .cloned()
            .ok_or(DirectoryError::NotFound)
    }

    async fn register(&self, user: NewUser) -> Result<UserAccount, DirectoryError> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&user.email) {
            return Err(DirectoryError::AlreadyExists);
        }

        let account = UserAccount {
            email: Some(user.email.clone()),
            image_url: None,
            name: user.name,
            password_hash: Some(user.password_hash),
            phone: None,
            provider: LOCAL_PROVIDER.to_string(),
            provider_id: user.email.clone(),
            role: user.role,
            user_id: user.user_id,
            verified: false,
        };
        accounts.insert(user.email, account.clone());
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            name: "Ada".to_string(),
            password_hash: "$argon2id$stub".to_string(),
            role: DEFAULT_ROLE.to_string(),
            user_id: "user-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_and_find() {
        let directory = MemoryUserDirectory::new();
        let account = directory.register(new_user("a@x.com")).await.unwrap();

        assert_eq!(account.provider, "local");
        assert_eq!(account.provider_id, "a@x.com");
        assert!(!account.verified);
        assert_eq!(directory.find_by_email("a@x.com").await.unwrap(), account);
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let directory = MemoryUserDirectory::new();
        directory.register(new_user("a@x.com")).await.unwrap();
        assert_eq!(
            directory.register(new_user("a@x.com")).await.unwrap_err(),
            DirectoryError::AlreadyExists
        );
        assert_eq!(directory.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_email() {
        let directory = MemoryUserDirectory::new();
        assert_eq!(
            directory.find_by_email("nobody@x.com").await.unwrap_err(),
            DirectoryError::NotFound
        );
    }

    #[test]
    fn test_session_identity_flattens_missing_email() {
        let account = UserAccount {
            email: None,
            image_url: Some("https://img".to_string()),
            name: "Ada".to_string(),
            password_hash: None,
            phone: None,
            provider: "google".to_string(),
            provider_id: "g-123".to_string(),
            role: "admin".to_string(),
            user_id: "user-1".to_string(),
            verified: true,
        };
        let identity = account.session_identity();
        assert_eq!(identity.email, "");
        assert_eq!(identity.display_name, "Ada");
        assert_eq!(identity.image_url.as_deref(), Some("https://img"));
        assert!(identity.verified);
    }
}
