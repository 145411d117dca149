//! Key-value operations the catalog needs from its mirror backend.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use super::error::MirrorError;

/// One write inside an atomic [`MirrorStore::apply`] batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorOp {
    Delete(String),
    SetAdd {
        key: String,
        members: Vec<String>,
    },
    HashSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    Put {
        key: String,
        value: String,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
}

#[async_trait]
pub trait MirrorStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<(), MirrorError>;

    async fn exists(&self, key: &str) -> Result<bool, MirrorError>;

    async fn get(&self, key: &str) -> Result<Option<String>, MirrorError>;

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), MirrorError>;

    /// Write `key` only while `guard_key` still holds `expected`, checked and
    /// written in one atomic step. Returns whether the write happened.
    async fn put_if_equal(
        &self,
        guard_key: &str,
        expected: &str,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, MirrorError>;

    async fn members(&self, key: &str) -> Result<Vec<String>, MirrorError>;

    /// Members of several sets in one round trip, in key order.
    async fn members_many(&self, keys: &[String]) -> Result<Vec<Vec<String>>, MirrorError>;

    /// Size of each set, in key order. Missing keys count as empty.
    async fn cardinalities(&self, keys: &[String]) -> Result<Vec<u64>, MirrorError>;

    /// Size of the intersection of `base` with each of `keys`, in key order,
    /// without materializing any of them.
    async fn intersect_cardinalities(
        &self,
        base: &str,
        keys: &[String],
    ) -> Result<Vec<u64>, MirrorError>;

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, MirrorError>;

    /// Store the union of `keys` at `dest` with an expiry; returns its size.
    async fn union_store(
        &self,
        dest: &str,
        keys: &[String],
        ttl: Duration,
    ) -> Result<u64, MirrorError>;

    /// Store the intersection of `keys` at `dest` with an expiry; returns its size.
    async fn intersect_store(
        &self,
        dest: &str,
        keys: &[String],
        ttl: Duration,
    ) -> Result<u64, MirrorError>;

    async fn delete(&self, keys: &[String]) -> Result<(), MirrorError>;

    /// Apply every op or none of them.
    async fn apply(&self, ops: Vec<MirrorOp>) -> Result<(), MirrorError>;

    /// Delete every key matching any of the glob `patterns` in one atomic
    /// step. Patterns without wildcards name keys directly.
    async fn clear(&self, patterns: &[&str]) -> Result<u64, MirrorError>;
}
