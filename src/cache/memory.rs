//! In-process mirror backend.
//!
//! Single-node deployments and tests use this instead of Redis. Semantics
//! follow the Redis commands the catalog relies on: type errors on mismatched
//! keys, expiry, and empty set results deleting the destination key.
//!
//! Expired slots are freed, not just hidden: every write sweeps the expiry
//! queue, and a read that notices an overdue deadline sweeps before it answers.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{trace, warn};

use super::error::MirrorError;
use super::store::{MirrorOp, MirrorStore};

const TARGET: &str = "catalog::cache::memory";

/// Stored value without its expiry; returned by [`MemoryMirror::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorValue {
    Text(String),
    Set(BTreeSet<String>),
    Hash(BTreeMap<String, String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: MirrorValue,
    expires_at: Option<Instant>,
}

impl Slot {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

/// Keyed slots plus a queue of expiry deadlines. A queued deadline may be
/// stale (the key was rewritten or removed since); sweeping checks the slot
/// before dropping it.
#[derive(Debug, Default)]
struct Slots {
    entries: HashMap<String, Slot>,
    deadlines: BTreeSet<(Instant, String)>,
}

impl Slots {
    fn live(&self, key: &str, now: Instant) -> Option<&Slot> {
        self.entries.get(key).filter(|slot| slot.live(now))
    }

    fn insert(&mut self, key: String, slot: Slot) {
        if let Some(deadline) = slot.expires_at {
            self.deadlines.insert((deadline, key.clone()));
        }
        self.entries.insert(key, slot);
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    fn expire(&mut self, key: &str, deadline: Instant, now: Instant) {
        if let Some(slot) = self.entries.get_mut(key).filter(|slot| slot.live(now)) {
            slot.expires_at = Some(deadline);
            self.deadlines.insert((deadline, key.to_string()));
        }
    }

    fn overdue(&self, now: Instant) -> bool {
        self.deadlines
            .first()
            .is_some_and(|(deadline, _)| *deadline <= now)
    }

    /// Drop every slot whose deadline has passed; returns how many went.
    fn sweep(&mut self, now: Instant) -> usize {
        let mut freed = 0;
        while let Some((deadline, key)) = self.deadlines.pop_first() {
            if deadline > now {
                self.deadlines.insert((deadline, key));
                break;
            }
            if self
                .entries
                .get(&key)
                .is_some_and(|slot| slot.expires_at.is_some_and(|at| at <= now))
            {
                self.entries.remove(&key);
                freed += 1;
            }
        }
        freed
    }

    /// Existing live slot for `key`, or a fresh persistent one.
    fn live_entry(&mut self, key: &str, now: Instant, empty: impl FnOnce() -> MirrorValue) -> &mut Slot {
        if self.entries.get(key).is_some_and(|slot| !slot.live(now)) {
            self.entries.remove(key);
        }
        self.entries.entry(key.to_string()).or_insert_with(|| Slot {
            value: empty(),
            expires_at: None,
        })
    }
}

#[derive(Debug)]
pub struct MemoryMirror {
    slots: RwLock<Slots>,
    available: AtomicBool,
}

impl Default for MemoryMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(Slots::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: every operation fails until availability returns.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Live keys and their values, ignoring expiry deadlines.
    pub fn snapshot(&self) -> BTreeMap<String, MirrorValue> {
        let now = Instant::now();
        let slots = self.read_slots("snapshot");
        slots
            .entries
            .iter()
            .filter(|(_, slot)| slot.live(now))
            .map(|(key, slot)| (key.clone(), slot.value.clone()))
            .collect()
    }

    /// Keys matching a glob pattern, for assertions on scratch cleanup.
    pub fn keys(&self, pattern: &str) -> Vec<String> {
        let now = Instant::now();
        let slots = self.read_slots("keys");
        let mut keys: Vec<String> = slots
            .entries
            .iter()
            .filter(|(key, slot)| slot.live(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Slots held in memory, expired or not.
    pub fn slot_count(&self) -> usize {
        self.read_slots("slot_count").entries.len()
    }

    // A panic while holding the lock leaves the map itself intact; the worst
    // case is a half-applied batch, which the next rebuild overwrites.
    fn read_slots(&self, op: &'static str) -> RwLockReadGuard<'_, Slots> {
        self.slots.read().unwrap_or_else(|poisoned| {
            warn!(target = TARGET, op, "Mirror lock poisoned; continuing");
            poisoned.into_inner()
        })
    }

    fn write_slots(&self, op: &'static str) -> RwLockWriteGuard<'_, Slots> {
        let mut slots = self.slots.write().unwrap_or_else(|poisoned| {
            warn!(target = TARGET, op, "Mirror lock poisoned; continuing");
            poisoned.into_inner()
        });
        let freed = slots.sweep(Instant::now());
        if freed > 0 {
            trace!(target = TARGET, op, freed, "Expired slots freed");
        }
        slots
    }

    /// Read guard for `op`, sweeping first when a deadline has passed.
    fn fresh_slots(&self, op: &'static str) -> RwLockReadGuard<'_, Slots> {
        let overdue = self.read_slots(op).overdue(Instant::now());
        if overdue {
            drop(self.write_slots(op));
        }
        self.read_slots(op)
    }

    fn ensure_available(&self, op: &'static str) -> Result<(), MirrorError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MirrorError::unavailable(op, "in-process mirror marked unavailable"))
        }
    }

    fn read_set(slots: &Slots, key: &str, now: Instant) -> Result<BTreeSet<String>, MirrorError> {
        match slots.live(key, now) {
            None => Ok(BTreeSet::new()),
            Some(Slot {
                value: MirrorValue::Set(members),
                ..
            }) => Ok(members.clone()),
            Some(_) => Err(MirrorError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    fn set_len(slots: &Slots, key: &str, now: Instant) -> Result<u64, MirrorError> {
        match slots.live(key, now) {
            None => Ok(0),
            Some(Slot {
                value: MirrorValue::Set(members),
                ..
            }) => Ok(members.len() as u64),
            Some(_) => Err(MirrorError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    fn store_set(slots: &mut Slots, dest: &str, members: BTreeSet<String>, ttl: Duration) -> u64 {
        let size = members.len() as u64;
        if members.is_empty() {
            slots.remove(dest);
        } else {
            slots.insert(
                dest.to_string(),
                Slot {
                    value: MirrorValue::Set(members),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
        }
        size
    }

    /// Reject the batch up front if any op would hit a key of another type,
    /// so applying it afterwards cannot fail halfway.
    fn validate(slots: &Slots, ops: &[MirrorOp], now: Instant) -> Result<(), MirrorError> {
        let mut overlay: HashMap<&str, Option<Kind>> = HashMap::new();
        for op in ops {
            let (key, kind) = match op {
                MirrorOp::Delete(key) => {
                    overlay.insert(key.as_str(), None);
                    continue;
                }
                MirrorOp::Put { key, .. } => {
                    overlay.insert(key.as_str(), Some(Kind::Text));
                    continue;
                }
                MirrorOp::Expire { .. } => continue,
                MirrorOp::SetAdd { key, .. } => (key.as_str(), Kind::Set),
                MirrorOp::HashSet { key, .. } => (key.as_str(), Kind::Hash),
            };
            let current = match overlay.get(key) {
                Some(staged) => *staged,
                None => slots.live(key, now).map(|slot| Kind::of(&slot.value)),
            };
            if current.is_some_and(|existing| existing != kind) {
                return Err(MirrorError::WrongType {
                    key: key.to_string(),
                });
            }
            overlay.insert(key, Some(kind));
        }
        Ok(())
    }

    fn apply_op(slots: &mut Slots, op: MirrorOp, now: Instant) {
        match op {
            MirrorOp::Delete(key) => slots.remove(&key),
            MirrorOp::SetAdd { members, .. } if members.is_empty() => {}
            MirrorOp::HashSet { fields, .. } if fields.is_empty() => {}
            MirrorOp::SetAdd { key, members } => {
                let slot = slots.live_entry(&key, now, || MirrorValue::Set(BTreeSet::new()));
                if let MirrorValue::Set(existing) = &mut slot.value {
                    existing.extend(members);
                }
            }
            MirrorOp::HashSet { key, fields } => {
                let slot = slots.live_entry(&key, now, || MirrorValue::Hash(BTreeMap::new()));
                if let MirrorValue::Hash(existing) = &mut slot.value {
                    existing.extend(fields);
                }
            }
            MirrorOp::Put { key, value } => slots.insert(
                key,
                Slot {
                    value: MirrorValue::Text(value),
                    expires_at: None,
                },
            ),
            MirrorOp::Expire { key, ttl } => slots.expire(&key, now + ttl, now),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Text,
    Set,
    Hash,
}

impl Kind {
    fn of(value: &MirrorValue) -> Self {
        match value {
            MirrorValue::Text(_) => Kind::Text,
            MirrorValue::Set(_) => Kind::Set,
            MirrorValue::Hash(_) => Kind::Hash,
        }
    }
}

fn text_value<'a>(slots: &'a Slots, key: &str, now: Instant) -> Result<Option<&'a str>, MirrorError> {
    match slots.live(key, now) {
        None => Ok(None),
        Some(Slot {
            value: MirrorValue::Text(text),
            ..
        }) => Ok(Some(text.as_str())),
        Some(_) => Err(MirrorError::WrongType {
            key: key.to_string(),
        }),
    }
}

#[async_trait]
impl MirrorStore for MemoryMirror {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), MirrorError> {
        self.ensure_available("ping")
    }

    async fn exists(&self, key: &str) -> Result<bool, MirrorError> {
        self.ensure_available("exists")?;
        let slots = self.fresh_slots("exists");
        Ok(slots.live(key, Instant::now()).is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, MirrorError> {
        self.ensure_available("get")?;
        let slots = self.fresh_slots("get");
        Ok(text_value(&slots, key, Instant::now())?.map(str::to_string))
    }

    async fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), MirrorError> {
        self.ensure_available("put")?;
        let mut slots = self.write_slots("put");
        slots.insert(
            key.to_string(),
            Slot {
                value: MirrorValue::Text(value.to_string()),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
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
        self.ensure_available("put_if_equal")?;
        let now = Instant::now();
        let mut slots = self.write_slots("put_if_equal");
        if text_value(&slots, guard_key, now)? != Some(expected) {
            return Ok(false);
        }
        slots.insert(
            key.to_string(),
            Slot {
                value: MirrorValue::Text(value.to_string()),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn members(&self, key: &str) -> Result<Vec<String>, MirrorError> {
        self.ensure_available("members")?;
        let slots = self.fresh_slots("members");
        Ok(Self::read_set(&slots, key, Instant::now())?
            .into_iter()
            .collect())
    }

    async fn members_many(&self, keys: &[String]) -> Result<Vec<Vec<String>>, MirrorError> {
        self.ensure_available("members_many")?;
        let now = Instant::now();
        let slots = self.fresh_slots("members_many");
        keys.iter()
            .map(|key| Ok(Self::read_set(&slots, key, now)?.into_iter().collect()))
            .collect()
    }

    async fn cardinalities(&self, keys: &[String]) -> Result<Vec<u64>, MirrorError> {
        self.ensure_available("cardinalities")?;
        let now = Instant::now();
        let slots = self.fresh_slots("cardinalities");
        keys.iter().map(|key| Self::set_len(&slots, key, now)).collect()
    }

    async fn intersect_cardinalities(
        &self,
        base: &str,
        keys: &[String],
    ) -> Result<Vec<u64>, MirrorError> {
        self.ensure_available("intersect_cardinalities")?;
        let now = Instant::now();
        let slots = self.fresh_slots("intersect_cardinalities");
        let base = Self::read_set(&slots, base, now)?;
        keys.iter()
            .map(|key| {
                let members = Self::read_set(&slots, key, now)?;
                Ok(members.intersection(&base).count() as u64)
            })
            .collect()
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, MirrorError> {
        self.ensure_available("hash_get_all")?;
        let slots = self.fresh_slots("hash_get_all");
        match slots.live(key, Instant::now()) {
            None => Ok(HashMap::new()),
            Some(Slot {
                value: MirrorValue::Hash(fields),
                ..
            }) => Ok(fields
                .iter()
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect()),
            Some(_) => Err(MirrorError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn union_store(
        &self,
        dest: &str,
        keys: &[String],
        ttl: Duration,
    ) -> Result<u64, MirrorError> {
        self.ensure_available("union_store")?;
        let now = Instant::now();
        let mut slots = self.write_slots("union_store");
        let mut union = BTreeSet::new();
        for key in keys {
            union.extend(Self::read_set(&slots, key, now)?);
        }
        Ok(Self::store_set(&mut slots, dest, union, ttl))
    }

    async fn intersect_store(
        &self,
        dest: &str,
        keys: &[String],
        ttl: Duration,
    ) -> Result<u64, MirrorError> {
        self.ensure_available("intersect_store")?;
        let now = Instant::now();
        let mut slots = self.write_slots("intersect_store");
        let mut result: Option<BTreeSet<String>> = None;
        for key in keys {
            let members = Self::read_set(&slots, key, now)?;
            result = Some(match result {
                None => members,
                Some(acc) => acc.intersection(&members).cloned().collect(),
            });
        }
        Ok(Self::store_set(
            &mut slots,
            dest,
            result.unwrap_or_default(),
            ttl,
        ))
    }

    async fn delete(&self, keys: &[String]) -> Result<(), MirrorError> {
        self.ensure_available("delete")?;
        let mut slots = self.write_slots("delete");
        for key in keys {
            slots.remove(key);
        }
        Ok(())
    }

    async fn apply(&self, ops: Vec<MirrorOp>) -> Result<(), MirrorError> {
        self.ensure_available("apply")?;
        let now = Instant::now();
        let mut slots = self.write_slots("apply");
        Self::validate(&slots, &ops, now)?;
        for op in ops {
            Self::apply_op(&mut slots, op, now);
        }
        Ok(())
    }

    async fn clear(&self, patterns: &[&str]) -> Result<u64, MirrorError> {
        self.ensure_available("clear")?;
        let mut slots = self.write_slots("clear");
        let before = slots.entries.len();
        slots
            .entries
            .retain(|key, _| !patterns.iter().any(|pattern| glob_match(pattern, key)));
        Ok((before - slots.entries.len()) as u64)
    }
}

/// Redis-style glob supporting `*` and `?`.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|ch| *ch == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn glob_matches_redis_patterns() {
        assert!(glob_match("products:param:*", "products:param:brend:acme"));
        assert!(glob_match("all_products", "all_products"));
        assert!(!glob_match("all_products", "all_products:x"));
        assert!(glob_match("temp:?nion:*", "temp:union:1"));
        assert!(!glob_match("param:values:*", "param:stats:x"));
    }

    #[tokio::test]
    async fn union_and_intersection_store_with_expiry() {
        let mirror = MemoryMirror::new();
        mirror
            .apply(vec![
                MirrorOp::SetAdd {
                    key: "a".into(),
                    members: keys(&["1", "2"]),
                },
                MirrorOp::SetAdd {
                    key: "b".into(),
                    members: keys(&["2", "3"]),
                },
            ])
            .await
            .expect("seed");

        let union = mirror
            .union_store("u", &keys(&["a", "b"]), Duration::from_secs(60))
            .await
            .expect("union");
        assert_eq!(union, 3);

        let both = mirror
            .intersect_store("i", &keys(&["a", "b"]), Duration::from_secs(60))
            .await
            .expect("intersection");
        assert_eq!(both, 1);
        assert_eq!(mirror.members("i").await.expect("members"), keys(&["2"]));

        let none = mirror
            .intersect_store("n", &keys(&["a", "missing"]), Duration::from_secs(60))
            .await
            .expect("empty intersection");
        assert_eq!(none, 0);
        assert!(!mirror.exists("n").await.expect("exists"));
    }

    #[tokio::test]
    async fn failed_batch_leaves_no_partial_writes() {
        let mirror = MemoryMirror::new();
        mirror.put("text", "1", None).await.expect("put");

        let result = mirror
            .apply(vec![
                MirrorOp::SetAdd {
                    key: "fresh".into(),
                    members: keys(&["1"]),
                },
                MirrorOp::SetAdd {
                    key: "text".into(),
                    members: keys(&["2"]),
                },
            ])
            .await;

        assert!(matches!(result, Err(MirrorError::WrongType { .. })));
        assert!(!mirror.exists("fresh").await.expect("exists"));
    }

    #[tokio::test]
    async fn clear_removes_matching_keys_only() {
        let mirror = MemoryMirror::new();
        mirror
            .apply(vec![
                MirrorOp::SetAdd {
                    key: "products:param:brend:acme".into(),
                    members: keys(&["1"]),
                },
                MirrorOp::Put {
                    key: "all_products".into(),
                    value: "x".into(),
                },
                MirrorOp::Put {
                    key: "unrelated".into(),
                    value: "y".into(),
                },
            ])
            .await
            .expect("seed");

        let removed = mirror
            .clear(&["products:param:*", "all_products"])
            .await
            .expect("clear");

        assert_eq!(removed, 2);
        assert_eq!(mirror.keys("*"), keys(&["unrelated"]));
    }

    #[tokio::test]
    async fn expired_values_are_invisible() {
        let mirror = MemoryMirror::new();
        mirror
            .put("short", "1", Some(Duration::from_millis(1)))
            .await
            .expect("put");
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(mirror.get("short").await.expect("get"), None);
        assert!(!mirror.exists("short").await.expect("exists"));
    }

    #[tokio::test]
    async fn expired_slots_are_freed() {
        let mirror = MemoryMirror::new();
        for n in 0..500 {
            mirror
                .put(&format!("products:filtered:{n}"), "[]", Some(Duration::from_millis(1)))
                .await
                .expect("put");
        }
        mirror.put("kept", "1", None).await.expect("put");
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(mirror.get("products:filtered:0").await.expect("get"), None);
        assert_eq!(mirror.slot_count(), 1);
    }

    #[tokio::test]
    async fn rewritten_keys_survive_their_old_deadline() {
        let mirror = MemoryMirror::new();
        mirror
            .put("page", "old", Some(Duration::from_millis(1)))
            .await
            .expect("put");
        mirror.put("page", "new", None).await.expect("put");
        tokio::time::sleep(Duration::from_millis(5)).await;

        mirror.put("other", "x", None).await.expect("sweep");
        assert_eq!(mirror.get("page").await.expect("get").as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn guarded_put_requires_matching_guard() {
        let mirror = MemoryMirror::new();
        let ttl = Duration::from_secs(60);
        assert!(
            !mirror
                .put_if_equal("marker", "g1", "page", "a", ttl)
                .await
                .expect("no guard")
        );

        mirror.put("marker", "g1", None).await.expect("put");
        assert!(
            mirror
                .put_if_equal("marker", "g1", "page", "a", ttl)
                .await
                .expect("matching guard")
        );
        assert!(
            !mirror
                .put_if_equal("marker", "g0", "page", "b", ttl)
                .await
                .expect("stale guard")
        );
        assert_eq!(mirror.get("page").await.expect("get").as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn cardinalities_count_without_copying_sets() {
        let mirror = MemoryMirror::new();
        mirror
            .apply(vec![
                MirrorOp::SetAdd {
                    key: "a".into(),
                    members: keys(&["1", "2", "3"]),
                },
                MirrorOp::SetAdd {
                    key: "b".into(),
                    members: keys(&["3", "4"]),
                },
            ])
            .await
            .expect("seed");

        assert_eq!(
            mirror
                .cardinalities(&keys(&["a", "b", "missing"]))
                .await
                .expect("scard"),
            vec![3, 2, 0]
        );
        assert_eq!(
            mirror
                .intersect_cardinalities("a", &keys(&["b", "missing"]))
                .await
                .expect("sintercard"),
            vec![1, 0]
        );
    }

    #[tokio::test]
    async fn unavailable_mirror_rejects_operations() {
        let mirror = MemoryMirror::new();
        mirror.set_available(false);

        let err = mirror.ping().await.expect_err("down");
        assert!(matches!(err, MirrorError::Unavailable { op: "ping", .. }));

        mirror.set_available(true);
        mirror.ping().await.expect("up again");
    }
}
