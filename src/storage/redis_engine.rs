use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{from_redis_value, Client, Pipeline, Value};

use super::engine::{Batch, Command, EngineError, KeyTtl, KeyValueEngine, Reply};

/// Redis-backed engine. Cheap to clone; clones share one multiplexed connection.
#[derive(Clone)]
pub struct RedisEngine {
    conn: ConnectionManager,
}

impl RedisEngine {
    /// Connect to `url` (e.g. `redis://localhost:6379`), reconnecting on failure
    pub async fn connect(url: &str) -> Result<Self, EngineError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("Connected to Redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl KeyValueEngine for RedisEngine {
    async fn execute(&self, batch: Batch) -> Result<Vec<Reply>, EngineError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        if batch.is_atomic() {
            pipe.atomic();
        }
        for command in batch.commands() {
            append(&mut pipe, command);
        }

        let mut conn = self.conn.clone();
        let values: Vec<Value> = pipe.query_async(&mut conn).await?;
        if values.len() != batch.len() {
            return Err(EngineError::ReplyCount {
                expected: batch.len(),
                got: values.len(),
            });
        }

        let replies = batch
            .commands()
            .iter()
            .zip(values.iter())
            .map(|(command, value)| convert(command, value))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(replies)
    }
}

fn millis(ttl: &std::time::Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

fn append(pipe: &mut Pipeline, command: &Command) {
    match command {
        Command::Del { keys } => {
            pipe.cmd("DEL").arg(keys);
        }
        Command::Expire { key, ttl } => {
            pipe.cmd("PEXPIRE").arg(key).arg(millis(ttl));
        }
        Command::HGetAll { key } => {
            pipe.cmd("HGETALL").arg(key);
        }
        Command::HSet { key, fields } => {
            pipe.cmd("HSET").arg(key);
            for (field, value) in fields {
                pipe.arg(field).arg(value);
            }
        }
        Command::Incr { key } => {
            pipe.cmd("INCR").arg(key);
        }
        Command::PTtl { key } => {
            pipe.cmd("PTTL").arg(key);
        }
        Command::SetEx { key, value, ttl } => {
            pipe.cmd("SET").arg(key).arg(value).arg("PX").arg(millis(ttl));
        }
        Command::ZAdd { key, member, score } => {
            pipe.cmd("ZADD").arg(key).arg(*score).arg(member);
        }
        Command::ZRangeAll { key } => {
            pipe.cmd("ZRANGE").arg(key).arg(0).arg(-1);
        }
        Command::ZRangeByScoreWithScores { key, min } => {
            pipe.cmd("ZRANGEBYSCORE")
                .arg(key)
                .arg(*min)
                .arg("+inf")
                .arg("WITHSCORES");
        }
        Command::ZRem { key, members } => {
            pipe.cmd("ZREM").arg(key).arg(members);
        }
        Command::ZRemRangeByScore { key, max } => {
            pipe.cmd("ZREMRANGEBYSCORE").arg(key).arg("-inf").arg(*max);
        }
    }
}

fn convert(command: &Command, value: &Value) -> Result<Reply, EngineError> {
    let reply = match command {
        Command::Del { .. }
        | Command::HSet { .. }
        | Command::Incr { .. }
        | Command::ZAdd { .. }
        | Command::ZRem { .. }
        | Command::ZRemRangeByScore { .. } => Reply::Integer(from_redis_value(value)?),
        Command::Expire { .. } => Reply::Bool(from_redis_value(value)?),
        Command::HGetAll { .. } => {
            let fields: HashMap<String, String> = from_redis_value(value)?;
            Reply::Map(fields.into_iter().collect())
        }
        Command::PTtl { .. } => Reply::Ttl(KeyTtl::from_pttl(from_redis_value(value)?)),
        Command::SetEx { .. } => match value {
            Value::Okay => Reply::Ok,
            other => {
                return Err(EngineError::UnexpectedReply {
                    expected: "OK",
                    got: format!("{other:?}"),
                })
            }
        },
        Command::ZRangeAll { .. } => Reply::Members(from_redis_value(value)?),
        Command::ZRangeByScoreWithScores { .. } => Reply::Scored(from_redis_value(value)?),
    };
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn packed(command: Command) -> Vec<u8> {
        let mut pipe = redis::pipe();
        append(&mut pipe, &command);
        pipe.get_packed_pipeline()
    }

    fn resp(args: &[&str]) -> Vec<u8> {
        let mut out = format!("*{}\r\n", args.len());
        for arg in args {
            out.push_str(&format!("${}\r\n{}\r\n", arg.len(), arg));
        }
        out.into_bytes()
    }

    #[test]
    fn test_append_sorted_set_commands() {
        assert_eq!(
            packed(Command::ZAdd {
                key: "idx".to_string(),
                member: "tok".to_string(),
                score: 1.5,
            }),
            resp(&["ZADD", "idx", "1.5", "tok"])
        );
        assert_eq!(
            packed(Command::ZRangeByScoreWithScores {
                key: "idx".to_string(),
                min: 2.5,
            }),
            resp(&["ZRANGEBYSCORE", "idx", "2.5", "+inf", "WITHSCORES"])
        );
        assert_eq!(
            packed(Command::ZRemRangeByScore {
                key: "idx".to_string(),
                max: 2.5,
            }),
            resp(&["ZREMRANGEBYSCORE", "idx", "-inf", "2.5"])
        );
        assert_eq!(
            packed(Command::ZRangeAll {
                key: "idx".to_string(),
            }),
            resp(&["ZRANGE", "idx", "0", "-1"])
        );
        assert_eq!(
            packed(Command::ZRem {
                key: "idx".to_string(),
                members: vec!["a".to_string(), "b".to_string()],
            }),
            resp(&["ZREM", "idx", "a", "b"])
        );
    }

    #[test]
    fn test_append_string_and_hash_commands() {
        assert_eq!(
            packed(Command::SetEx {
                key: "ban".to_string(),
                value: "1".to_string(),
                ttl: Duration::from_millis(1500),
            }),
            resp(&["SET", "ban", "1", "PX", "1500"])
        );
        assert_eq!(
            packed(Command::Expire {
                key: "s".to_string(),
                ttl: Duration::from_secs(2),
            }),
            resp(&["PEXPIRE", "s", "2000"])
        );
        assert_eq!(
            packed(Command::HSet {
                key: "s".to_string(),
                fields: vec![
                    ("role".to_string(), "user".to_string()),
                    ("verified".to_string(), "0".to_string()),
                ],
            }),
            resp(&["HSET", "s", "role", "user", "verified", "0"])
        );
        assert_eq!(
            packed(Command::Del {
                keys: vec!["a".to_string(), "b".to_string()],
            }),
            resp(&["DEL", "a", "b"])
        );
        assert_eq!(
            packed(Command::Incr {
                key: "n".to_string(),
            }),
            resp(&["INCR", "n"])
        );
        assert_eq!(
            packed(Command::PTtl {
                key: "n".to_string(),
            }),
            resp(&["PTTL", "n"])
        );
        assert_eq!(
            packed(Command::HGetAll {
                key: "s".to_string(),
            }),
            resp(&["HGETALL", "s"])
        );
    }

    #[test]
    fn test_convert_pttl_and_hash() {
        let ttl = convert(
            &Command::PTtl {
                key: "k".to_string(),
            },
            &Value::Int(-2),
        )
        .unwrap();
        assert_eq!(ttl, Reply::Ttl(KeyTtl::Missing));

        let map = convert(
            &Command::HGetAll {
                key: "k".to_string(),
            },
            &Value::Array(vec![
                Value::BulkString(b"role".to_vec()),
                Value::BulkString(b"user".to_vec()),
            ]),
        )
        .unwrap();
        assert_eq!(
            map,
            Reply::Map(vec![("role".to_string(), "user".to_string())])
        );
    }

    #[test]
    fn test_convert_set_requires_ok() {
        let command = Command::SetEx {
            key: "k".to_string(),
            value: "1".to_string(),
            ttl: Duration::from_secs(1),
        };
        assert_eq!(convert(&command, &Value::Okay).unwrap(), Reply::Ok);
        assert!(convert(&command, &Value::Nil).is_err());
    }

    #[test]
    fn test_convert_scored_members() {
        let scored = convert(
            &Command::ZRangeByScoreWithScores {
                key: "k".to_string(),
                min: 0.0,
            },
            &Value::Array(vec![
                Value::BulkString(b"tok".to_vec()),
                Value::BulkString(b"1700000000".to_vec()),
            ]),
        )
        .unwrap();
        assert_eq!(scored, Reply::Scored(vec![("tok".to_string(), 1.7e9)]));
    }
}
