//! Argon2id password hashing and verification.
//!
//! Hashes are stored as PHC strings, so parameters and salt travel with the
//! hash and verification never needs the hasher's own settings.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};

pub use argon2::password_hash::Error as HashError;

/// Hashes and checks login passwords.
pub trait CredentialHasher: Send + Sync {
    /// Hash `password` with a fresh random salt, returning a PHC string.
    fn hash(&self, password: &str) -> Result<String, HashError>;

    /// `Ok(false)` on mismatch; `Err` only when `hash` is unusable.
    fn verify(&self, password: &str, hash: &str) -> Result<bool, HashError>;

    /// A well-formed hash that matches no password. Verifying against it
    /// costs as much as a real check, for logins with no account behind them.
    fn dummy_hash(&self) -> &str;
}

pub struct Argon2Hasher {
    dummy: String,
    params: Params,
}

impl Argon2Hasher {
    pub fn new() -> Self {
        Self::with_params(Params::default())
    }

    pub fn with_params(params: Params) -> Self {
        let dummy = format!(
            "$argon2id$v=19$m={},t={},p={}$c29tZXNhbHRzb21lc2FsdA${}",
            params.m_cost(),
            params.t_cost(),
            params.p_cost(),
            "A".repeat(43)
        );
        Self { dummy, params }
    }

    /// Cheapest parameters argon2 accepts. Tests only.
    pub fn insecure_fast() -> Self {
        let params = Params::new(Params::MIN_M_COST, Params::MIN_T_COST, Params::MIN_P_COST, None)
            .unwrap_or_default();
        Self::with_params(params)
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self.argon2().hash_password(password.as_bytes(), &salt)?;
        Ok(hash.to_string())
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool, HashError> {
        let parsed_hash = PasswordHash::new(hash)?;
        match self.argon2().verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(HashError::Password) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn dummy_hash(&self) -> &str {
        &self.dummy
    }
}
