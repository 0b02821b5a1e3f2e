use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use tracing::{error, info};

use super::record::SessionRecord;
use crate::clock::Clock;
use crate::error::{store_unavailable, AuthError};
use crate::storage::{expect_replies, Batch, Command, KeyValueEngine};
use crate::tokens::{session_key, token_hint, user_index_key};

/// A live session as shown on a "your devices" page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveSession {
    pub expires_at: DateTime<Utc>,
    pub record: SessionRecord,
    pub token: String,
}

/// Lists a user's sessions, reconciling the index against the records.
#[derive(Clone)]
pub struct SessionDirectory {
    clock: Arc<dyn Clock>,
    engine: Arc<dyn KeyValueEngine>,
}

impl SessionDirectory {
    pub fn new(engine: Arc<dyn KeyValueEngine>, clock: Arc<dyn Clock>) -> Self {
        Self { clock, engine }
    }

    /// Live sessions of `user_id`, ordered by expiry.
    ///
    /// Index entries whose score has passed are pruned first. Entries whose
    /// record has vanished (zombies) are dropped from the result and then
    /// from the index; if that removal fails the listing fails with it. A
    /// record that fails to decode is left in place.
    pub async fn list_active(&self, user_id: &str) -> Result<Vec<ActiveSession>, AuthError> {
        let index_key = user_index_key(user_id);
        let now = self.clock.now().timestamp() as f64;

        let candidates = async {
            let batch = Batch::new()
                .with(Command::ZRemRangeByScore {
                    key: index_key.clone(),
                    max: now,
                })
                .with(Command::ZRangeByScoreWithScores {
                    key: index_key.clone(),
                    min: now,
                });
            let [_, scored] = expect_replies::<2>(self.engine.execute(batch).await?)?;
            scored.into_scored()
        }
        .await
        .map_err(store_unavailable("read_session_index"))?;

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut lookups = Batch::new();
        for (token, _) in &candidates {
            lookups.push(Command::HGetAll {
                key: session_key(token),
            });
        }
        let records = self
            .engine
            .execute(lookups)
            .await
            .map_err(store_unavailable("read_session_records"))?;
        if records.len() != candidates.len() {
            error!(
                expected = candidates.len(),
                got = records.len(),
                "Session record lookup returned the wrong number of replies"
            );
            return Err(AuthError::StoreUnavailable);
        }

        let mut sessions = Vec::with_capacity(candidates.len());
        let mut zombies = Vec::new();
        for ((token, score), reply) in candidates.into_iter().zip(records) {
            let fields = reply
                .into_map()
                .map_err(store_unavailable("read_session_records"))?;
            if fields.is_empty() {
                zombies.push(token);
                continue;
            }

            match SessionRecord::from_fields(fields) {
                Ok(record) => sessions.push(ActiveSession {
                    expires_at: score_to_time(score),
                    record,
                    token,
                }),
                Err(e) => {
                    error!(error = %e, %user_id, token = token_hint(&token), "Skipping corrupt session record");
                }
            }
        }

        if !zombies.is_empty() {
            self.remove_zombies(user_id, index_key, zombies).await?;
        }

        Ok(sessions)
    }

    /// Drop index entries with no record behind them.
    async fn remove_zombies(
        &self,
        user_id: &str,
        index_key: String,
        zombies: Vec<String>,
    ) -> Result<(), AuthError> {
        let count = zombies.len();
        self.engine
            .query(Command::ZRem {
                key: index_key,
                members: zombies,
            })
            .await
            .map_err(store_unavailable("remove_zombie_sessions"))?;

        info!(%user_id, zombies = count, "Removed zombie session index entries");
        Ok(())
    }
}

fn score_to_time(score: f64) -> DateTime<Utc> {
    Utc.timestamp_opt(score as i64, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
