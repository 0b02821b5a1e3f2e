//! Failed-login throttling per identity.
//!
//! Each identity has an attempt counter (`login_attempts:<email>`) that lives
//! for the attempt window from its first failure, and an optional ban flag
//! (`login_ban:<email>`) whose TTL is the ban itself. Nothing here is locked:
//! concurrent failures race on `INCR`, which the engine serialises.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::LimiterConfig;
use crate::error::{store_unavailable, AuthError};
use crate::storage::{expect_replies, Batch, Command, EngineError, KeyTtl, KeyValueEngine};
use crate::tokens::{login_attempts_key, login_ban_key};

/// Ban length after `attempts` consecutive failures: zero while within the
/// free attempts, then `ban_base × 2^(attempts − free)` capped at `ban_max`.
pub fn ban_delay(config: &LimiterConfig, attempts: u64) -> Duration {
    let free = u64::from(config.free_attempts);
    if attempts <= free {
        return Duration::ZERO;
    }
    let exponent = attempts - free;
    let delay = u32::try_from(exponent)
        .ok()
        .and_then(|e| 2u32.checked_pow(e))
        .and_then(|factor| config.ban_base.checked_mul(factor))
        .unwrap_or(config.ban_max);
    delay.min(config.ban_max)
}

#[derive(Clone)]
pub struct LoginAttemptLimiter {
    config: LimiterConfig,
    engine: Arc<dyn KeyValueEngine>,
}

impl LoginAttemptLimiter {
    pub fn new(engine: Arc<dyn KeyValueEngine>, config: LimiterConfig) -> Self {
        Self { config, engine }
    }

    /// Remaining ban for `email`, zero when none is active.
    pub async fn check_ban(&self, email: &str) -> Result<Duration, AuthError> {
        let ttl = self
            .engine
            .query(Command::PTtl {
                key: login_ban_key(email),
            })
            .await
            .and_then(|reply| reply.into_ttl())
            .map_err(store_unavailable("check_login_ban"))?;

        Ok(match ttl {
            KeyTtl::Expires(remaining) => remaining,
            KeyTtl::Persistent => {
                warn!(%email, "Login ban flag has no expiry; ignoring it");
                Duration::ZERO
            }
            KeyTtl::Missing => Duration::ZERO,
        })
    }

    /// Count a failed login and apply a ban once the free attempts are used
    /// up. Returns the ban just applied, zero if none.
    pub async fn record_failure(&self, email: &str) -> Result<Duration, AuthError> {
        let attempts_key = login_attempts_key(email);
        let (attempts, ttl) = async {
            let batch = Batch::new()
                .with(Command::Incr {
                    key: attempts_key.clone(),
                })
                .with(Command::PTtl {
                    key: attempts_key.clone(),
                });
            let [count, ttl] = expect_replies::<2>(self.engine.execute(batch).await?)?;
            Ok::<_, EngineError>((count.into_integer()?, ttl.into_ttl()?))
        }
        .await
        .map_err(store_unavailable("record_login_failure"))?;

        // A counter without expiry is either brand new or was stranded by a
        // failed EXPIRE earlier; either way it gets the window now.
        if ttl == KeyTtl::Persistent {
            let expire = self
                .engine
                .query(Command::Expire {
                    key: attempts_key,
                    ttl: self.config.attempt_window,
                })
                .await;
            if let Err(e) = expire {
                warn!(error = %e, %email, "Failed to set expiry on login attempt counter");
            }
        }

        let attempts = u64::try_from(attempts).unwrap_or(0);
        let delay = ban_delay(&self.config, attempts);
        if delay.is_zero() {
            debug!(%email, attempts, "Failed login recorded");
            return Ok(Duration::ZERO);
        }

        self.engine
            .query(Command::SetEx {
                key: login_ban_key(email),
                value: "1".to_string(),
                ttl: delay,
            })
            .await
            .map_err(store_unavailable("apply_login_ban"))?;

        warn!(%email, attempts, ban_seconds = delay.as_secs(), "Login ban applied");
        Ok(delay)
    }

    /// Forget all failures of `email` and lift any ban.
    pub async fn reset(&self, email: &str) -> Result<(), AuthError> {
        self.engine
            .query(Command::Del {
                keys: vec![login_attempts_key(email), login_ban_key(email)],
            })
            .await
            .map_err(store_unavailable("reset_login_attempts"))?;
        Ok(())
    }
}
