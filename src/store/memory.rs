//! In-memory state store for tests and single-process deployments
//!
//! Implements the same primitives as the Redis store behind one mutex, so the
//! composite operations get the same atomicity guarantees. TTLs are honored
//! lazily on read, matching Redis expiry semantics closely enough for tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{IndexedWrite, StateStore};
use crate::error::Result;

#[derive(Default)]
struct Inner {
    kv: HashMap<String, (String, Option<Instant>)>,
    zsets: HashMap<String, BTreeMap<String, f64>>,
    hashes: HashMap<String, HashMap<String, i64>>,
}

impl Inner {
    fn live_value(&mut self, key: &str) -> Option<&String> {
        if let Some((_, Some(expires))) = self.kv.get(key) {
            if *expires <= Instant::now() {
                self.kv.remove(key);
                return None;
            }
        }
        self.kv.get(key).map(|(v, _)| v)
    }

    fn sorted_members(&self, key: &str) -> Vec<(String, f64)> {
        let mut members: Vec<(String, f64)> = self
            .zsets
            .get(key)
            .map(|set| set.iter().map(|(m, s)| (m.clone(), *s)).collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then_with(|| a.0.cmp(&b.0)));
        members
    }
}

/// Mutex-guarded in-memory store
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn rank_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let resolve = |idx: isize| -> isize {
        if idx < 0 {
            len as isize + idx
        } else {
            idx
        }
    };
    let start = resolve(start).max(0) as usize;
    let stop = resolve(stop);
    if stop < 0 || start >= len {
        return None;
    }
    let stop = (stop as usize).min(len.saturating_sub(1));
    if start > stop {
        return None;
    }
    Some((start, stop))
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.live_value(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let expires = ttl.map(|t| Instant::now() + t);
        inner.kv.insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.kv.remove(key).is_some())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zadd_capped(
        &self,
        key: &str,
        member: &str,
        score: f64,
        max: u64,
        evict_below: f64,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let set = inner.zsets.entry(key.to_string()).or_default();
        set.retain(|_, s| *s > evict_below);
        if max > 0 && set.len() as u64 >= max {
            return Ok(false);
        }
        set.insert(member.to_string(), score);
        Ok(true)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner
            .zsets
            .get_mut(key)
            .map(|set| set.remove(member).is_some())
            .unwrap_or(false))
    }

    async fn zremrangebyscore(&self, key: &str, below: f64) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let Some(set) = inner.zsets.get_mut(key) else {
            return Ok(0);
        };
        let before = set.len();
        set.retain(|_, s| *s > below);
        Ok((before - set.len()) as u64)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.zsets.get(key).map(|set| set.len() as u64).unwrap_or(0))
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        let members = inner.sorted_members(key);
        let Some((start, stop)) = rank_range(members.len(), start, stop) else {
            return Ok(Vec::new());
        };
        Ok(members[start..=stop].iter().map(|(m, _)| m.clone()).collect())
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .hashes
            .entry(key.to_string())
            .or_default()
            .entry(field.to_string())
            .or_insert(0);
        *entry += delta;
        Ok(*entry)
    }

    async fn put_indexed(&self, write: IndexedWrite<'_>) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if write.create_only && inner.live_value(write.record_key).is_some() {
            return Ok(false);
        }
        let expires = write.ttl.map(|t| Instant::now() + t);
        inner.kv.insert(
            write.record_key.to_string(),
            (write.value.to_string(), expires),
        );
        if let Some(remove) = write.remove_index {
            if let Some(set) = inner.zsets.get_mut(remove) {
                set.remove(write.member);
            }
        }
        for index in &write.add_indexes {
            inner
                .zsets
                .entry(index.to_string())
                .or_default()
                .insert(write.member.to_string(), write.score);
        }
        Ok(true)
    }
}
