//! Redis mirror backend.
//!
//! Every command runs under the configured operation timeout so a stalled
//! Redis surfaces as [`MirrorError::Timeout`] instead of hanging requests.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::RedisResult;
use redis::aio::ConnectionManager;
use tracing::debug;

use super::error::MirrorError;
use super::store::{MirrorOp, MirrorStore};

const SCAN_COUNT: usize = 500;
const DELETE_CHUNK: usize = 500;

// KEYS[1] guard, KEYS[2] target; ARGV expected, value, ttl seconds.
const PUT_IF_EQUAL: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('SET', KEYS[2], ARGV[2], 'EX', ARGV[3])
  return 1
end
return 0
"#;

#[derive(Clone)]
pub struct RedisMirror {
    manager: ConnectionManager,
    timeout: Duration,
}

impl fmt::Debug for RedisMirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisMirror")
            .field("manager", &"<ConnectionManager>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RedisMirror {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, MirrorError> {
        let client =
            redis::Client::open(url).map_err(|err| MirrorError::unavailable("connect", err.to_string()))?;
        let manager = match tokio::time::timeout(timeout, ConnectionManager::new(client)).await {
            Ok(Ok(manager)) => manager,
            Ok(Err(err)) => return Err(MirrorError::unavailable("connect", err.to_string())),
            Err(_) => return Err(MirrorError::Timeout { op: "connect" }),
        };
        Ok(Self { manager, timeout })
    }

    fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    async fn run<T, F>(&self, op: &'static str, fut: F) -> Result<T, MirrorError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) if err.kind() == redis::ErrorKind::TypeError => {
                Err(MirrorError::unavailable(op, format!("unexpected reply: {err}")))
            }
            Ok(Err(err)) if err.code() == Some("WRONGTYPE") => Err(MirrorError::WrongType {
                key: format!("<{op}>"),
            }),
            Ok(Err(err)) => Err(MirrorError::unavailable(op, err.to_string())),
            Err(_) => Err(MirrorError::Timeout { op }),
        }
    }

    async fn scan_pattern(&self, pattern: &str) -> Result<Vec<String>, MirrorError> {
        let mut conn = self.connection();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = self
                .run(
                    "scan",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_COUNT)
                        .query_async(&mut conn),
                )
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }
}

fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl MirrorStore for RedisMirror {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> Result<(), MirrorError> {
        let mut conn = self.connection();
        let _pong: String = self
            .run("ping", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, MirrorError> {
        let mut conn = self.connection();
        self.run("exists", redis::cmd("EXISTS").arg(key).query_async(&mut conn))
            .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, MirrorError> {
        let mut conn = self.connection();
        self.run("get", redis::cmd("GET").arg(key).query_async(&mut conn))
            .await
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), MirrorError> {
        let mut conn = self.connection();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl_seconds(ttl));
        }
        let (): () = self.run("put", cmd.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn put_if_equal(
        &self,
        guard_key: &str,
        expected: &str,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, MirrorError> {
        let mut conn = self.connection();
        let script = redis::Script::new(PUT_IF_EQUAL);
        let mut invocation = script.key(guard_key);
        invocation
            .key(key)
            .arg(expected)
            .arg(value)
            .arg(ttl_seconds(ttl));
        let written: i64 = self
            .run("put_if_equal", invocation.invoke_async(&mut conn))
            .await?;
        Ok(written == 1)
    }

    async fn members(&self, key: &str) -> Result<Vec<String>, MirrorError> {
        let mut conn = self.connection();
        self.run(
            "members",
            redis::cmd("SMEMBERS").arg(key).query_async(&mut conn),
        )
        .await
    }

    async fn members_many(&self, keys: &[String]) -> Result<Vec<Vec<String>>, MirrorError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("SMEMBERS").arg(key);
        }
        self.run("members_many", pipe.query_async(&mut conn)).await
    }

    async fn cardinalities(&self, keys: &[String]) -> Result<Vec<u64>, MirrorError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("SCARD").arg(key);
        }
        self.run("cardinalities", pipe.query_async(&mut conn)).await
    }

    // SINTERCARD needs Redis 7.0 or newer.
    async fn intersect_cardinalities(
        &self,
        base: &str,
        keys: &[String],
    ) -> Result<Vec<u64>, MirrorError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("SINTERCARD").arg(2).arg(base).arg(key);
        }
        self.run("intersect_cardinalities", pipe.query_async(&mut conn))
            .await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, MirrorError> {
        let mut conn = self.connection();
        self.run(
            "hash_get_all",
            redis::cmd("HGETALL").arg(key).query_async(&mut conn),
        )
        .await
    }

    async fn union_store(
        &self,
        dest: &str,
        keys: &[String],
        ttl: Duration,
    ) -> Result<u64, MirrorError> {
        let mut conn = self.connection();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SUNIONSTORE")
            .arg(dest)
            .arg(keys)
            .cmd("EXPIRE")
            .arg(dest)
            .arg(ttl_seconds(ttl))
            .ignore();
        let (size,): (u64,) = self.run("union_store", pipe.query_async(&mut conn)).await?;
        Ok(size)
    }

    async fn intersect_store(
        &self,
        dest: &str,
        keys: &[String],
        ttl: Duration,
    ) -> Result<u64, MirrorError> {
        let mut conn = self.connection();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SINTERSTORE")
            .arg(dest)
            .arg(keys)
            .cmd("EXPIRE")
            .arg(dest)
            .arg(ttl_seconds(ttl))
            .ignore();
        let (size,): (u64,) = self
            .run("intersect_store", pipe.query_async(&mut conn))
            .await?;
        Ok(size)
    }

    async fn delete(&self, keys: &[String]) -> Result<(), MirrorError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection();
        let _removed: u64 = self
            .run("delete", redis::cmd("DEL").arg(keys).query_async(&mut conn))
            .await?;
        Ok(())
    }

    async fn apply(&self, ops: Vec<MirrorOp>) -> Result<(), MirrorError> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            match op {
                MirrorOp::Delete(key) => {
                    pipe.cmd("DEL").arg(key).ignore();
                }
                MirrorOp::SetAdd { key, members } => {
                    if !members.is_empty() {
                        pipe.cmd("SADD").arg(key).arg(members).ignore();
                    }
                }
                MirrorOp::HashSet { key, fields } => {
                    if !fields.is_empty() {
                        pipe.cmd("HSET").arg(key).arg(fields).ignore();
                    }
                }
                MirrorOp::Put { key, value } => {
                    pipe.cmd("SET").arg(key).arg(value).ignore();
                }
                MirrorOp::Expire { key, ttl } => {
                    pipe.cmd("EXPIRE").arg(key).arg(ttl_seconds(ttl)).ignore();
                }
            }
        }
        let (): () = self.run("apply", pipe.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn clear(&self, patterns: &[&str]) -> Result<u64, MirrorError> {
        let mut keys = Vec::new();
        for pattern in patterns {
            if pattern.contains(['*', '?', '[']) {
                keys.extend(self.scan_pattern(pattern).await?);
            } else {
                keys.push((*pattern).to_string());
            }
        }
        keys.sort();
        keys.dedup();
        debug!(
            target = "catalog::cache::redis",
            keys = keys.len(),
            "Clearing mirror keys"
        );
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for chunk in keys.chunks(DELETE_CHUNK) {
            pipe.cmd("DEL").arg(chunk);
        }
        let removed: Vec<u64> = self.run("clear", pipe.query_async(&mut conn)).await?;
        Ok(removed.into_iter().sum())
    }
}
