use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("Decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("Encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Value at {0} is not an integer or out of range")]
    NotAnInteger(String),
    #[error("Database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Engine returned {got} replies for a batch of {expected} commands")]
    ReplyCount { expected: usize, got: usize },
    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("Engine task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("Unexpected reply: expected {expected}, got {got}")]
    UnexpectedReply { expected: &'static str, got: String },
    #[error("Operation against {0} holding the wrong kind of value")]
    WrongType(String),
}

/// A single engine command. Names follow the Redis command each one maps to.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `DEL key [key ...]`
    Del { keys: Vec<String> },
    /// `PEXPIRE key ttl`
    Expire { key: String, ttl: Duration },
    /// `HGETALL key`
    HGetAll { key: String },
    /// `HSET key field value [field value ...]`
    HSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    /// `INCR key`
    Incr { key: String },
    /// `PTTL key`
    PTtl { key: String },
    /// `SET key value PX ttl`
    SetEx {
        key: String,
        value: String,
        ttl: Duration,
    },
    /// `ZADD key score member`
    ZAdd {
        key: String,
        member: String,
        score: f64,
    },
    /// `ZRANGE key 0 -1`
    ZRangeAll { key: String },
    /// `ZRANGEBYSCORE key min +inf WITHSCORES`
    ZRangeByScoreWithScores { key: String, min: f64 },
    /// `ZREM key member [member ...]`
    ZRem { key: String, members: Vec<String> },
    /// `ZREMRANGEBYSCORE key -inf max`
    ZRemRangeByScore { key: String, max: f64 },
}

/// Remaining lifetime of a key as reported by `PTTL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    Missing,
    Persistent,
    Expires(Duration),
}

impl KeyTtl {
    /// Interpret a raw `PTTL` reply (`-2` missing, `-1` no expiry).
    pub fn from_pttl(millis: i64) -> Self {
        match millis {
            -2 => KeyTtl::Missing,
            m if m < 0 => KeyTtl::Persistent,
            m => KeyTtl::Expires(Duration::from_millis(m as u64)),
        }
    }

    /// Positive remaining lifetime, if the key has one.
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            KeyTtl::Expires(d) if !d.is_zero() => Some(*d),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Bool(bool),
    Integer(i64),
    Map(Vec<(String, String)>),
    Members(Vec<String>),
    Ok,
    Scored(Vec<(String, f64)>),
    Ttl(KeyTtl),
}

impl Reply {
    fn unexpected(&self, expected: &'static str) -> EngineError {
        EngineError::UnexpectedReply {
            expected,
            got: format!("{self:?}"),
        }
    }

    pub fn into_integer(self) -> Result<i64, EngineError> {
        match self {
            Reply::Integer(n) => Ok(n),
            other => Err(other.unexpected("integer")),
        }
    }

    pub fn into_map(self) -> Result<Vec<(String, String)>, EngineError> {
        match self {
            Reply::Map(fields) => Ok(fields),
            other => Err(other.unexpected("field map")),
        }
    }

    pub fn into_members(self) -> Result<Vec<String>, EngineError> {
        match self {
            Reply::Members(members) => Ok(members),
            other => Err(other.unexpected("member list")),
        }
    }

    pub fn into_scored(self) -> Result<Vec<(String, f64)>, EngineError> {
        match self {
            Reply::Scored(entries) => Ok(entries),
            other => Err(other.unexpected("scored member list")),
        }
    }

    pub fn into_ttl(self) -> Result<KeyTtl, EngineError> {
        match self {
            Reply::Ttl(ttl) => Ok(ttl),
            other => Err(other.unexpected("ttl")),
        }
    }
}

/// Commands sent to the engine in one round trip.
///
/// A batch is pipelined, not transactional, unless built with [`Batch::atomic`].
/// Even an atomic batch says nothing about ordering relative to other batches.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    atomic: bool,
    commands: Vec<Command>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// A batch the engine should apply as a unit (`MULTI`/`EXEC` on Redis).
    pub fn atomic() -> Self {
        Self {
            atomic: true,
            commands: Vec::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn is_atomic(&self) -> bool {
        self.atomic
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

/// A TTL-capable key-value engine holding strings, hashes and sorted sets.
#[async_trait]
pub trait KeyValueEngine: Send + Sync {
    /// Run every command of `batch` and return one reply per command, in order.
    async fn execute(&self, batch: Batch) -> Result<Vec<Reply>, EngineError>;

    async fn query(&self, command: Command) -> Result<Reply, EngineError> {
        let mut replies = self.execute(Batch::new().with(command)).await?;
        match replies.pop() {
            Some(reply) if replies.is_empty() => Ok(reply),
            _ => Err(EngineError::ReplyCount {
                expected: 1,
                got: replies.len() + 1,
            }),
        }
    }
}

/// Split a batch's replies into a fixed-size array.
pub fn expect_replies<const N: usize>(replies: Vec<Reply>) -> Result<[Reply; N], EngineError> {
    replies
        .try_into()
        .map_err(|replies: Vec<Reply>| EngineError::ReplyCount {
            expected: N,
            got: replies.len(),
        })
}

pub(crate) fn check_reply_count(expected: usize, replies: &[Reply]) -> Result<(), EngineError> {
    if replies.len() == expected {
        Ok(())
    } else {
        Err(EngineError::ReplyCount {
            expected,
            got: replies.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ttl_from_pttl() {
        assert_eq!(KeyTtl::from_pttl(-2), KeyTtl::Missing);
        assert_eq!(KeyTtl::from_pttl(-1), KeyTtl::Persistent);
        assert_eq!(
            KeyTtl::from_pttl(1500),
            KeyTtl::Expires(Duration::from_millis(1500))
        );
        assert_eq!(KeyTtl::from_pttl(0).remaining(), None);
        assert_eq!(KeyTtl::Persistent.remaining(), None);
    }

    #[test]
    fn test_reply_extractors_reject_wrong_kind() {
        assert_eq!(Reply::Integer(3).into_integer().unwrap(), 3);
        assert!(matches!(
            Reply::Ok.into_map(),
            Err(EngineError::UnexpectedReply { expected: "field map", .. })
        ));
        assert!(Reply::Members(vec![]).into_ttl().is_err());
    }

    #[test]
    fn test_expect_replies() {
        let [a, b] = expect_replies::<2>(vec![Reply::Ok, Reply::Integer(1)]).unwrap();
        assert_eq!(a, Reply::Ok);
        assert_eq!(b, Reply::Integer(1));
        assert!(matches!(
            expect_replies::<2>(vec![Reply::Ok]),
            Err(EngineError::ReplyCount {
                expected: 2,
                got: 1
            })
        ));
    }

    #[test]
    fn test_batch_builder() {
        let batch = Batch::atomic()
            .with(Command::Incr {
                key: "a".to_string(),
            })
            .with(Command::PTtl {
                key: "a".to_string(),
            });
        assert!(batch.is_atomic());
        assert_eq!(batch.len(), 2);
        assert!(!Batch::new().is_atomic());
        assert!(Batch::new().is_empty());
    }
}
