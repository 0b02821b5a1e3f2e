use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redb::{Database as RedbDatabase, ReadableTable, ReadableTableMetadata, Table};

use super::engine::{check_reply_count, Batch, Command, EngineError, KeyTtl, KeyValueEngine, Reply};
use super::models::{ScoredMember, StoredEntry, StoredValue};
use super::tables::ENTRIES;
use crate::clock::Clock;

const DB_FILE_NAME: &str = "session-guard.redb";

type EntryTable<'txn> = Table<'txn, &'static str, &'static [u8]>;

/// Embedded single-node engine on redb.
///
/// Emulates the Redis data types the session core needs. Every batch runs in
/// one write transaction, so batches here are always applied as a unit.
/// Expired keys are invisible to commands and removed when touched or by
/// [`RedbEngine::purge_expired`].
#[derive(Clone)]
pub struct RedbEngine {
    clock: Arc<dyn Clock>,
    db: Arc<RedbDatabase>,
}

impl RedbEngine {
    /// Open or create the engine file inside `data_dir`
    pub fn open<P: AsRef<Path>>(data_dir: P, clock: Arc<dyn Clock>) -> Result<Self, EngineError> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        let db = RedbDatabase::create(data_dir.as_ref().join(DB_FILE_NAME))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ENTRIES)?;
        }
        write_txn.commit()?;

        Ok(Self {
            clock,
            db: Arc::new(db),
        })
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }

    /// Apply a batch synchronously inside a single write transaction
    pub fn apply(&self, commands: &[Command]) -> Result<Vec<Reply>, EngineError> {
        let now_ms = self.now_ms();
        let write_txn = self.db.begin_write()?;
        let replies = {
            let mut table = write_txn.open_table(ENTRIES)?;
            let mut replies = Vec::with_capacity(commands.len());
            for command in commands {
                replies.push(apply_command(&mut table, command, now_ms)?);
            }
            replies
        };
        write_txn.commit()?;
        Ok(replies)
    }

    /// Remove every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, EngineError> {
        let now_ms = self.now_ms();

        let expired: Vec<String> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(ENTRIES)?;
            let mut keys = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                let stored: StoredEntry = rmp_serde::from_slice(value.value())?;
                if stored.is_expired_at(now_ms) {
                    keys.push(key.value().to_string());
                }
            }
            keys
        };

        if expired.is_empty() {
            return Ok(0);
        }

        // Re-check under the write lock: a key may have been rewritten since.
        let write_txn = self.db.begin_write()?;
        let mut removed = 0;
        {
            let mut table = write_txn.open_table(ENTRIES)?;
            for key in &expired {
                if load(&mut table, key, now_ms)?.is_none() {
                    removed += 1;
                }
            }
        }
        write_txn.commit()?;
        Ok(removed)
    }

    /// Number of keys physically present, expired or not
    pub fn stored_key_count(&self) -> Result<u64, EngineError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENTRIES)?;
        Ok(table.len()?)
    }
}

#[async_trait]
impl KeyValueEngine for RedbEngine {
    async fn execute(&self, batch: Batch) -> Result<Vec<Reply>, EngineError> {
        let engine = self.clone();
        let expected = batch.len();
        let replies =
            tokio::task::spawn_blocking(move || engine.apply(batch.commands())).await??;
        check_reply_count(expected, &replies)?;
        Ok(replies)
    }
}

/// Read a live entry, dropping it if its deadline has passed.
fn load(table: &mut EntryTable<'_>, key: &str, now_ms: i64) -> Result<Option<StoredEntry>, EngineError> {
    let entry: Option<StoredEntry> = match table.get(key)? {
        Some(data) => Some(rmp_serde::from_slice(data.value())?),
        None => None,
    };

    match entry {
        Some(entry) if entry.is_expired_at(now_ms) => {
            table.remove(key)?;
            Ok(None)
        }
        other => Ok(other),
    }
}

fn store(table: &mut EntryTable<'_>, key: &str, entry: &StoredEntry) -> Result<(), EngineError> {
    let data = rmp_serde::to_vec_named(entry)?;
    table.insert(key, data.as_slice())?;
    Ok(())
}

fn remove(table: &mut EntryTable<'_>, key: &str) -> Result<(), EngineError> {
    table.remove(key)?;
    Ok(())
}

fn deadline(now_ms: i64, ttl: &Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now_ms.saturating_add(ttl_ms)
}

fn load_sorted_set(
    table: &mut EntryTable<'_>,
    key: &str,
    now_ms: i64,
) -> Result<Option<(Option<i64>, Vec<ScoredMember>)>, EngineError> {
    match load(table, key, now_ms)? {
        None => Ok(None),
        Some(StoredEntry {
            expires_at_ms,
            value: StoredValue::SortedSet(members),
        }) => Ok(Some((expires_at_ms, members))),
        Some(_) => Err(EngineError::WrongType(key.to_string())),
    }
}

/// Write a sorted set back, deleting the key when it has no members left.
fn store_sorted_set(
    table: &mut EntryTable<'_>,
    key: &str,
    expires_at_ms: Option<i64>,
    members: Vec<ScoredMember>,
) -> Result<(), EngineError> {
    if members.is_empty() {
        return remove(table, key);
    }
    store(
        table,
        key,
        &StoredEntry {
            expires_at_ms,
            value: StoredValue::SortedSet(members),
        },
    )
}

fn apply_command(table: &mut EntryTable<'_>, command: &Command, now_ms: i64) -> Result<Reply, EngineError> {
    match command {
        Command::HSet { key, fields } => {
            let (expires_at_ms, mut hash) = match load(table, key, now_ms)? {
                None => (None, BTreeMap::new()),
                Some(StoredEntry {
                    expires_at_ms,
                    value: StoredValue::Hash(hash),
                }) => (expires_at_ms, hash),
                Some(_) => return Err(EngineError::WrongType(key.clone())),
            };
            let mut added = 0;
            for (field, value) in fields {
                if hash.insert(field.clone(), value.clone()).is_none() {
                    added += 1;
                }
            }
            store(
                table,
                key,
                &StoredEntry {
                    expires_at_ms,
                    value: StoredValue::Hash(hash),
                },
            )?;
            Ok(Reply::Integer(added))
        }
        Command::HGetAll { key } => match load(table, key, now_ms)? {
            None => Ok(Reply::Map(Vec::new())),
            Some(StoredEntry {
                value: StoredValue::Hash(hash),
                ..
            }) => Ok(Reply::Map(hash.into_iter().collect())),
            Some(_) => Err(EngineError::WrongType(key.clone())),
        },
        Command::Expire { key, ttl } => match load(table, key, now_ms)? {
            None => Ok(Reply::Bool(false)),
            Some(mut entry) => {
                entry.expires_at_ms = Some(deadline(now_ms, ttl));
                if entry.is_expired_at(now_ms) {
                    remove(table, key)?;
                } else {
                    store(table, key, &entry)?;
                }
                Ok(Reply::Bool(true))
            }
        },
        Command::PTtl { key } => {
            let ttl = match load(table, key, now_ms)? {
                None => KeyTtl::Missing,
                Some(StoredEntry {
                    expires_at_ms: None,
                    ..
                }) => KeyTtl::Persistent,
                Some(StoredEntry {
                    expires_at_ms: Some(at),
                    ..
                }) => KeyTtl::Expires(Duration::from_millis((at - now_ms).max(0) as u64)),
            };
            Ok(Reply::Ttl(ttl))
        }
        Command::Del { keys } => {
            let mut deleted = 0;
            for key in keys {
                if load(table, key, now_ms)?.is_some() {
                    remove(table, key)?;
                    deleted += 1;
                }
            }
            Ok(Reply::Integer(deleted))
        }
        Command::ZAdd { key, member, score } => {
            let (expires_at_ms, mut members) =
                load_sorted_set(table, key, now_ms)?.unwrap_or((None, Vec::new()));
            let added = match members.iter_mut().find(|m| &m.member == member) {
                Some(existing) => {
                    existing.score = *score;
                    0
                }
                None => {
                    members.push(ScoredMember {
                        member: member.clone(),
                        score: *score,
                    });
                    1
                }
            };
            ScoredMember::sort(&mut members);
            store_sorted_set(table, key, expires_at_ms, members)?;
            Ok(Reply::Integer(added))
        }
        Command::ZRem { key, members: to_remove } => {
            let Some((expires_at_ms, mut members)) = load_sorted_set(table, key, now_ms)? else {
                return Ok(Reply::Integer(0));
            };
            let before = members.len();
            members.retain(|m| !to_remove.contains(&m.member));
            let removed = (before - members.len()) as i64;
            store_sorted_set(table, key, expires_at_ms, members)?;
            Ok(Reply::Integer(removed))
        }
        Command::ZRangeAll { key } => {
            let members = load_sorted_set(table, key, now_ms)?
                .map(|(_, members)| members.into_iter().map(|m| m.member).collect())
                .unwrap_or_default();
            Ok(Reply::Members(members))
        }
        Command::ZRemRangeByScore { key, max } => {
            let Some((expires_at_ms, mut members)) = load_sorted_set(table, key, now_ms)? else {
                return Ok(Reply::Integer(0));
            };
            let before = members.len();
            members.retain(|m| m.score > *max);
            let removed = (before - members.len()) as i64;
            store_sorted_set(table, key, expires_at_ms, members)?;
            Ok(Reply::Integer(removed))
        }
        Command::ZRangeByScoreWithScores { key, min } => {
            let entries = load_sorted_set(table, key, now_ms)?
                .map(|(_, members)| {
                    members
                        .into_iter()
                        .filter(|m| m.score >= *min)
                        .map(|m| (m.member, m.score))
                        .collect()
                })
                .unwrap_or_default();
            Ok(Reply::Scored(entries))
        }
        Command::Incr { key } => {
            let (expires_at_ms, current) = match load(table, key, now_ms)? {
                None => (None, 0i64),
                Some(StoredEntry {
                    expires_at_ms,
                    value: StoredValue::Text(text),
                }) => {
                    let n = text
                        .parse::<i64>()
                        .map_err(|_| EngineError::NotAnInteger(key.clone()))?;
                    (expires_at_ms, n)
                }
                Some(_) => return Err(EngineError::WrongType(key.clone())),
            };
            let next = current
                .checked_add(1)
                .ok_or_else(|| EngineError::NotAnInteger(key.clone()))?;
            store(
                table,
                key,
                &StoredEntry {
                    expires_at_ms,
                    value: StoredValue::Text(next.to_string()),
                },
            )?;
            Ok(Reply::Integer(next))
        }
        Command::SetEx { key, value, ttl } => {
            store(
                table,
                key,
                &StoredEntry {
                    expires_at_ms: Some(deadline(now_ms, ttl)),
                    value: StoredValue::Text(value.clone()),
                },
            )?;
            Ok(Reply::Ok)
        }
    }
}
