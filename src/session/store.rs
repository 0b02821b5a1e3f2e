use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::record::{ClientInfo, SessionIdentity, SessionRecord};
use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::error::{store_unavailable, AuthError};
use crate::storage::{expect_replies, Batch, Command, EngineError, KeyTtl, KeyValueEngine, Reply};
use crate::tokens::{generate_token, session_key, token_hint, user_index_key};

/// A resolved session and whether this lookup pushed its expiry out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub record: SessionRecord,
    pub renewed: bool,
}

/// Creates, resolves and destroys session records together with the
/// per-user token index.
#[derive(Clone)]
pub struct SessionStore {
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    engine: Arc<dyn KeyValueEngine>,
}

impl SessionStore {
    pub fn new(engine: Arc<dyn KeyValueEngine>, clock: Arc<dyn Clock>, config: SessionConfig) -> Self {
        Self {
            clock,
            config,
            engine,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Index score for a session that expires `ttl` from now: epoch seconds.
    fn expiry_score(&self, ttl: Duration) -> f64 {
        let now = self.clock.now().timestamp();
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        now.saturating_add(ttl) as f64
    }

    /// Store a new session for `identity` and return its token.
    pub async fn create(
        &self,
        identity: &SessionIdentity,
        client: ClientInfo,
    ) -> Result<String, AuthError> {
        let token = generate_token().map_err(|e| {
            error!(error = %e, "Failed to draw session token from the OS random source");
            AuthError::RandomSourceUnavailable
        })?;

        let record = SessionRecord::new(identity.clone(), client);
        let record_key = session_key(&token);
        let index_key = user_index_key(&identity.user_id);
        let ttl = self.config.session_ttl;

        // Index entry first: if the batch is ever cut short the leftover is a
        // zombie index entry, which listing reconciles, never an unindexed record.
        let batch = Batch::atomic()
            .with(Command::ZAdd {
                key: index_key.clone(),
                member: token.clone(),
                score: self.expiry_score(ttl),
            })
            .with(Command::Expire {
                key: index_key,
                ttl: self.config.index_ttl,
            })
            .with(Command::HSet {
                key: record_key.clone(),
                fields: record.to_fields(),
            })
            .with(Command::Expire {
                key: record_key,
                ttl,
            });

        self.engine
            .execute(batch)
            .await
            .map_err(store_unavailable("create_session"))?;

        debug!(
            user_id = %identity.user_id,
            token = token_hint(&token),
            "Session created"
        );
        Ok(token)
    }

    /// Look a token up, renewing it when its remaining lifetime has dropped
    /// below the extend threshold.
    pub async fn resolve(&self, token: &str) -> Result<Resolution, AuthError> {
        let key = session_key(token);
        let batch = Batch::new()
            .with(Command::HGetAll { key: key.clone() })
            .with(Command::PTtl { key });

        let (fields, ttl) = async {
            let [fields, ttl] = expect_replies::<2>(self.engine.execute(batch).await?)?;
            Ok::<_, EngineError>((fields.into_map()?, ttl.into_ttl()?))
        }
        .await
        .map_err(store_unavailable("resolve_session"))?;

        if fields.is_empty() {
            debug!(token = token_hint(token), "Session not found");
            return Err(AuthError::SessionNotFound);
        }

        let record = SessionRecord::from_fields(fields).map_err(|e| {
            error!(error = %e, token = token_hint(token), "Stored session record is corrupt");
            AuthError::StoreUnavailable
        })?;

        let renewed = match ttl {
            KeyTtl::Expires(remaining)
                if !remaining.is_zero() && remaining < self.config.extend_threshold =>
            {
                self.renew(token, record.user_id()).await
            }
            KeyTtl::Persistent => {
                warn!(token = token_hint(token), "Session record has no expiry");
                false
            }
            _ => false,
        };

        Ok(Resolution { record, renewed })
    }

    /// Push a session's expiry out by a full lifetime. A failed renewal does
    /// not fail the lookup; the session simply keeps its old deadline.
    async fn renew(&self, token: &str, user_id: &str) -> bool {
        let ttl = self.config.session_ttl;
        let index_key = user_index_key(user_id);
        let batch = Batch::atomic()
            .with(Command::Expire {
                key: session_key(token),
                ttl,
            })
            .with(Command::ZAdd {
                key: index_key.clone(),
                member: token.to_string(),
                score: self.expiry_score(ttl),
            })
            .with(Command::Expire {
                key: index_key,
                ttl: self.config.index_ttl,
            });

        let outcome = async {
            let [extended, _, _] = expect_replies::<3>(self.engine.execute(batch).await?)?;
            Ok::<_, EngineError>(extended)
        }
        .await;

        match outcome {
            // The record can expire between the read and the renewal; the
            // index entry written here is then a zombie for listing to drop.
            Ok(Reply::Bool(extended)) => {
                if extended {
                    debug!(%user_id, token = token_hint(token), "Session renewed");
                }
                extended
            }
            Ok(other) => {
                warn!(reply = ?other, "Unexpected reply to session renewal");
                false
            }
            Err(e) => {
                warn!(error = %e, %user_id, token = token_hint(token), "Failed to renew session");
                false
            }
        }
    }

    /// Remove one session. Absent sessions are not an error.
    pub async fn destroy(&self, user_id: &str, token: &str) -> Result<(), AuthError> {
        let batch = Batch::new()
            .with(Command::Del {
                keys: vec![session_key(token)],
            })
            .with(Command::ZRem {
                key: user_index_key(user_id),
                members: vec![token.to_string()],
            });

        self.engine
            .execute(batch)
            .await
            .map_err(store_unavailable("destroy_session"))?;

        debug!(%user_id, token = token_hint(token), "Session destroyed");
        Ok(())
    }

    /// Remove every session the user's index knows about, then the index.
    /// Returns how many records were deleted.
    ///
    /// A session created concurrently with this call can lose its index entry
    /// while its record survives until its own TTL lapses.
    pub async fn destroy_all(&self, user_id: &str) -> Result<usize, AuthError> {
        let index_key = user_index_key(user_id);
        let tokens = self.indexed_tokens(&index_key).await?;

        let mut batch = Batch::new();
        if !tokens.is_empty() {
            batch.push(Command::Del {
                keys: tokens.iter().map(|t| session_key(t)).collect(),
            });
        }
        batch.push(Command::Del {
            keys: vec![index_key],
        });

        let removed = async {
            let replies = self.engine.execute(batch).await?;
            match (tokens.is_empty(), replies.into_iter().next()) {
                (false, Some(reply)) => reply.into_integer(),
                _ => Ok(0),
            }
        }
        .await
        .map_err(store_unavailable("destroy_all_sessions"))?;

        let removed = usize::try_from(removed).unwrap_or(0);
        debug!(%user_id, removed, "All sessions destroyed");
        Ok(removed)
    }

    /// Remove every session of the user except `keep`. Returns how many
    /// index entries were dropped.
    pub async fn destroy_others(&self, user_id: &str, keep: &str) -> Result<usize, AuthError> {
        let index_key = user_index_key(user_id);
        let others: Vec<String> = self
            .indexed_tokens(&index_key)
            .await?
            .into_iter()
            .filter(|t| t != keep)
            .collect();

        if others.is_empty() {
            return Ok(0);
        }

        let batch = Batch::new()
            .with(Command::Del {
                keys: others.iter().map(|t| session_key(t)).collect(),
            })
            .with(Command::ZRem {
                key: index_key,
                members: others.clone(),
            });

        self.engine
            .execute(batch)
            .await
            .map_err(store_unavailable("destroy_other_sessions"))?;

        debug!(%user_id, removed = others.len(), "Other sessions destroyed");
        Ok(others.len())
    }

    async fn indexed_tokens(&self, index_key: &str) -> Result<Vec<String>, AuthError> {
        self.engine
            .query(Command::ZRangeAll {
                key: index_key.to_string(),
            })
            .await
            .and_then(|reply| reply.into_members())
            .map_err(store_unavailable("read_session_index"))
    }
}
