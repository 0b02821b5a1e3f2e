//! The session lifecycle as the edge sees it: register, log in, resolve a
//! cookie, log out.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{Config, SessionConfig};
use crate::error::AuthError;
use crate::limiter::LoginAttemptLimiter;
use crate::session::{
    ActiveSession, ClientInfo, SessionDirectory, SessionIdentity, SessionRecord, SessionStore,
};
use crate::storage::KeyValueEngine;
use crate::users::{CredentialHasher, DirectoryError, NewUser, UserAccount, UserDirectory, DEFAULT_ROLE};

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "session_id";

/// Attributes the edge should put on the session cookie
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookiePolicy {
    pub http_only: bool,
    pub max_age: Duration,
    pub name: &'static str,
    pub secure: bool,
}

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub client: ClientInfo,
    pub email: String,
    pub password: String,
}

/// A fresh login
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub cookie: CookiePolicy,
    pub identity: SessionIdentity,
    pub token: String,
}

/// A request's session, plus the cookie to re-send when it was renewed
#[derive(Debug, Clone)]
pub struct ResolvedSession {
    pub record: SessionRecord,
    pub refreshed_cookie: Option<CookiePolicy>,
}

/// Lower-cased, trimmed email; the form used for lookups and limiter keys.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub struct SessionLifecycle {
    directory: Arc<dyn UserDirectory>,
    hasher: Arc<dyn CredentialHasher>,
    limiter: LoginAttemptLimiter,
    secure_cookies: bool,
    sessions: SessionDirectory,
    store: SessionStore,
}

impl SessionLifecycle {
    pub fn new(
        engine: Arc<dyn KeyValueEngine>,
        clock: Arc<dyn Clock>,
        directory: Arc<dyn UserDirectory>,
        hasher: Arc<dyn CredentialHasher>,
        config: &Config,
    ) -> Self {
        Self {
            directory,
            hasher,
            limiter: LoginAttemptLimiter::new(engine.clone(), config.limiter),
            secure_cookies: config.secure_cookies,
            sessions: SessionDirectory::new(engine.clone(), clock.clone()),
            store: SessionStore::new(engine, clock, config.sessions),
        }
    }

    pub fn limiter(&self) -> &LoginAttemptLimiter {
        &self.limiter
    }

    pub fn session_config(&self) -> &SessionConfig {
        self.store.config()
    }

    /// Cookie attributes for a session token: HTTP-only, living as long as
    /// one session, `Secure` in production.
    pub fn cookie_policy(&self) -> CookiePolicy {
        CookiePolicy {
            http_only: true,
            max_age: self.store.config().session_ttl,
            name: SESSION_COOKIE,
            secure: self.secure_cookies,
        }
    }

    /// Create a local password account.
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<UserAccount, AuthError> {
        let email = normalize_email(email);
        let password_hash = self.hash_password(password.to_string()).await?;

        let user = NewUser {
            email: email.clone(),
            name: name.to_string(),
            password_hash,
            role: DEFAULT_ROLE.to_string(),
            user_id: Uuid::now_v7().to_string(),
        };

        match self.directory.register(user).await {
            Ok(account) => {
                info!(user_id = %account.user_id, %email, "User registered");
                Ok(account)
            }
            Err(DirectoryError::AlreadyExists) => Err(AuthError::UserAlreadyExists),
            Err(e) => {
                error!(error = %e, %email, "Failed to register user");
                Err(AuthError::StoreUnavailable)
            }
        }
    }

    /// Check credentials and open a session.
    ///
    /// A banned identity is refused before its password is looked at. Unknown
    /// identities and wrong passwords fail the same way and both count
    /// against the limiter.
    pub async fn authenticate(&self, request: LoginRequest) -> Result<IssuedSession, AuthError> {
        let email = normalize_email(&request.email);

        let remaining = self.limiter.check_ban(&email).await?;
        if !remaining.is_zero() {
            warn!(%email, remaining_seconds = remaining.as_secs(), "Login refused while banned");
            return Err(AuthError::BanActive { remaining });
        }

        let account = match self.directory.find_by_email(&email).await {
            Ok(account) => Some(account),
            Err(DirectoryError::NotFound) => None,
            Err(e) => {
                error!(error = %e, %email, "User lookup failed");
                return Err(AuthError::StoreUnavailable);
            }
        };

        let stored_hash = account.as_ref().and_then(|a| a.password_hash.clone());
        let verified = self.verify_password(request.password, stored_hash).await?;

        let account = match account {
            Some(account) if verified => account,
            _ => {
                let ban = self.limiter.record_failure(&email).await?;
                info!(%email, "Login failed");
                if ban.is_zero() {
                    return Err(AuthError::InvalidCredentials);
                }
                return Err(AuthError::BanActive { remaining: ban });
            }
        };

        self.limiter.reset(&email).await?;

        let identity = account.session_identity();
        let token = self.store.create(&identity, request.client).await?;
        info!(user_id = %identity.user_id, "User logged in");

        Ok(IssuedSession {
            cookie: self.cookie_policy(),
            identity,
            token,
        })
    }

    /// Resolve the session behind a cookie, renewing it when due.
    pub async fn resolve(&self, token: &str) -> Result<ResolvedSession, AuthError> {
        let resolution = self.store.resolve(token).await?;
        Ok(ResolvedSession {
            record: resolution.record,
            refreshed_cookie: resolution.renewed.then(|| self.cookie_policy()),
        })
    }

    pub async fn logout(&self, user_id: &str, token: &str) -> Result<(), AuthError> {
        self.store.destroy(user_id, token).await
    }

    /// Log the user out everywhere. Returns the number of sessions ended.
    pub async fn logout_all(&self, user_id: &str) -> Result<usize, AuthError> {
        let removed = self.store.destroy_all(user_id).await?;
        info!(%user_id, removed, "Logged out of all sessions");
        Ok(removed)
    }

    /// Log the user out everywhere but `current`.
    pub async fn logout_others(&self, user_id: &str, current: &str) -> Result<usize, AuthError> {
        self.store.destroy_others(user_id, current).await
    }

    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<ActiveSession>, AuthError> {
        self.sessions.list_active(user_id).await
    }

    async fn hash_password(&self, password: String) -> Result<String, AuthError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| {
                error!(error = %e, "Password hashing task failed");
                AuthError::StoreUnavailable
            })?
            .map_err(|e| {
                error!(error = %e, "Failed to hash password");
                AuthError::StoreUnavailable
            })
    }

    /// Verify against `stored`, or burn the same time against the dummy hash
    /// when there is nothing to verify against.
    async fn verify_password(
        &self,
        password: String,
        stored: Option<String>,
    ) -> Result<bool, AuthError> {
        let hasher = self.hasher.clone();
        let outcome = tokio::task::spawn_blocking(move || match stored {
            Some(hash) => hasher.verify(&password, &hash),
            None => {
                let _ = hasher.verify(&password, hasher.dummy_hash());
                Ok(false)
            }
        })
        .await
        .map_err(|e| {
            error!(error = %e, "Password verification task failed");
            AuthError::StoreUnavailable
        })?;

        outcome.map_err(|e| {
            error!(error = %e, "Stored password hash is unusable");
            AuthError::StoreUnavailable
        })
    }
}
