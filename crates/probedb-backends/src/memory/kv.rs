//! In-memory key-value store.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::MemoryError;
use crate::kv::KeyValueBackend;

#[derive(Debug, Clone)]
enum Value {
    Str(Vec<u8>),
    Hash(HashMap<String, Vec<u8>>),
    List(VecDeque<Vec<u8>>),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn persistent(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Redis-like store held in process memory.
///
/// Expired keys are removed lazily when touched.
#[derive(Debug, Default)]
pub struct MemoryKeyValue {
    data: Mutex<HashMap<String, Slot>>,
}

impl MemoryKeyValue {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.data
            .lock()
            .values()
            .filter(|slot| !slot.is_expired(now))
            .count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drop `key` if it has expired, then return its slot.
fn live<'a>(data: &'a mut HashMap<String, Slot>, key: &str) -> Option<&'a mut Slot> {
    if data
        .get(key)
        .map(|slot| slot.is_expired(Instant::now()))
        .unwrap_or(false)
    {
        data.remove(key);
        tracing::debug!(key, "evicted expired key");
    }
    data.get_mut(key)
}

/// Deadline `ttl` from now, rejecting TTLs that overflow the clock.
fn deadline(ttl: Duration) -> Result<Instant, MemoryError> {
    Instant::now()
        .checked_add(ttl)
        .ok_or(MemoryError::InvalidExpireTime)
}

/// Fetch or create a value, starting from `empty` when absent.
fn collection<'a>(
    data: &'a mut HashMap<String, Slot>,
    key: &str,
    empty: fn() -> Value,
) -> &'a mut Value {
    live(data, key);
    &mut data
        .entry(key.to_string())
        .or_insert_with(|| Slot::persistent(empty()))
        .value
}

/// Resolve Redis-style inclusive range indexes against a length.
fn range_bounds(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl KeyValueBackend for MemoryKeyValue {
    type Error = MemoryError;

    async fn ping(&self) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, MemoryError> {
        let mut data = self.data.lock();
        match live(&mut data, key) {
            None => Ok(None),
            Some(Slot {
                value: Value::Str(bytes),
                ..
            }) => Ok(Some(bytes.clone())),
            Some(_) => Err(MemoryError::WrongType),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), MemoryError> {
        self.data
            .lock()
            .insert(key.to_string(), Slot::persistent(Value::Str(value.to_vec())));
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), MemoryError> {
        let expires_at = deadline(ttl)?;
        self.data.lock().insert(
            key.to_string(),
            Slot {
                value: Value::Str(value.to_vec()),
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[&str]) -> Result<u64, MemoryError> {
        let mut data = self.data.lock();
        let mut removed = 0;
        for key in keys {
            if live(&mut data, key).is_some() {
                data.remove(*key);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, keys: &[&str]) -> Result<u64, MemoryError> {
        let mut data = self.data.lock();
        Ok(keys
            .iter()
            .filter(|key| live(&mut data, key).is_some())
            .count() as u64)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, MemoryError> {
        let mut data = self.data.lock();
        let Value::Str(bytes) = collection(&mut data, key, || Value::Str(b"0".to_vec())) else {
            return Err(MemoryError::WrongType);
        };
        let current: i64 = std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(MemoryError::NotAnInteger)?;
        let next = current
            .checked_add(delta)
            .ok_or(MemoryError::NotAnInteger)?;
        *bytes = next.to_string().into_bytes();
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, MemoryError> {
        let expires_at = deadline(ttl)?;
        let mut data = self.data.lock();
        match live(&mut data, key) {
            Some(slot) => {
                slot.expires_at = Some(expires_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, MemoryError> {
        let mut data = self.data.lock();
        Ok(live(&mut data, key)
            .and_then(|slot| slot.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now())))
    }

    async fn hset(&self, key: &str, field: &str, value: &[u8]) -> Result<bool, MemoryError> {
        let mut data = self.data.lock();
        match collection(&mut data, key, || Value::Hash(HashMap::new())) {
            Value::Hash(fields) => Ok(fields
                .insert(field.to_string(), value.to_vec())
                .is_none()),
            _ => Err(MemoryError::WrongType),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, MemoryError> {
        let mut data = self.data.lock();
        match live(&mut data, key).map(|slot| &slot.value) {
            None => Ok(None),
            Some(Value::Hash(fields)) => Ok(fields.get(field).cloned()),
            Some(_) => Err(MemoryError::WrongType),
        }
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, Vec<u8>>, MemoryError> {
        let mut data = self.data.lock();
        match live(&mut data, key).map(|slot| &slot.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(fields)) => Ok(fields.clone()),
            Some(_) => Err(MemoryError::WrongType),
        }
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<u64, MemoryError> {
        let mut data = self.data.lock();
        let (removed, now_empty) = match live(&mut data, key).map(|slot| &mut slot.value) {
            None => return Ok(0),
            Some(Value::Hash(map)) => {
                let removed = fields.iter().filter(|f| map.remove(**f).is_some()).count();
                (removed as u64, map.is_empty())
            }
            Some(_) => return Err(MemoryError::WrongType),
        };
        if now_empty {
            data.remove(key);
        }
        Ok(removed)
    }

    async fn lpush(&self, key: &str, values: &[&[u8]]) -> Result<u64, MemoryError> {
        let mut data = self.data.lock();
        match collection(&mut data, key, || Value::List(VecDeque::new())) {
            Value::List(list) => {
                for value in values {
                    list.push_front(value.to_vec());
                }
                Ok(list.len() as u64)
            }
            _ => Err(MemoryError::WrongType),
        }
    }

    async fn rpush(&self, key: &str, values: &[&[u8]]) -> Result<u64, MemoryError> {
        let mut data = self.data.lock();
        match collection(&mut data, key, || Value::List(VecDeque::new())) {
            Value::List(list) => {
                for value in values {
                    list.push_back(value.to_vec());
                }
                Ok(list.len() as u64)
            }
            _ => Err(MemoryError::WrongType),
        }
    }

    async fn lpop(&self, key: &str) -> Result<Option<Vec<u8>>, MemoryError> {
        let mut data = self.data.lock();
        let (popped, now_empty) = match live(&mut data, key).map(|slot| &mut slot.value) {
            None => return Ok(None),
            Some(Value::List(list)) => (list.pop_front(), list.is_empty()),
            Some(_) => return Err(MemoryError::WrongType),
        };
        if now_empty {
            data.remove(key);
        }
        Ok(popped)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>, MemoryError> {
        let mut data = self.data.lock();
        match live(&mut data, key).map(|slot| &slot.value) {
            None => Ok(Vec::new()),
            Some(Value::List(list)) => Ok(match range_bounds(list.len(), start, stop) {
                Some((from, to)) => list.range(from..=to).cloned().collect(),
                None => Vec::new(),
            }),
            Some(_) => Err(MemoryError::WrongType),
        }
    }

    async fn sadd(&self, key: &str, members: &[&str]) -> Result<u64, MemoryError> {
        let mut data = self.data.lock();
        match collection(&mut data, key, || Value::Set(BTreeSet::new())) {
            Value::Set(set) => Ok(members
                .iter()
                .filter(|m| set.insert((**m).to_string()))
                .count() as u64),
            _ => Err(MemoryError::WrongType),
        }
    }

    async fn srem(&self, key: &str, members: &[&str]) -> Result<u64, MemoryError> {
        let mut data = self.data.lock();
        let (removed, now_empty) = match live(&mut data, key).map(|slot| &mut slot.value) {
            None => return Ok(0),
            Some(Value::Set(set)) => {
                let removed = members.iter().filter(|m| set.remove(**m)).count();
                (removed as u64, set.is_empty())
            }
            Some(_) => return Err(MemoryError::WrongType),
        };
        if now_empty {
            data.remove(key);
        }
        Ok(removed)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, MemoryError> {
        let mut data = self.data.lock();
        match live(&mut data, key).map(|slot| &slot.value) {
            None => Ok(Vec::new()),
            Some(Value::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(MemoryError::WrongType),
        }
    }

    async fn flushdb(&self) -> Result<(), MemoryError> {
        self.data.lock().clear();
        Ok(())
    }
}
