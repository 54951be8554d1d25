//! Key-value (Redis-like) capability.
//!
//! Command names recorded by the proxy are the upper-case Redis command
//! names (`GET`, `HSET`, ...).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use probedb_core::{
    Category, Classifier, InstrumentConfig, Instrumented, Operation, Payload,
    SharedMetricsRegistry, TableClassifier,
};

/// Commands that only read.
pub const READ_COMMANDS: &[&str] = &[
    "GET", "EXISTS", "TTL", "HGET", "HGETALL", "LRANGE", "SMEMBERS",
];

/// Commands that modify data.
pub const WRITE_COMMANDS: &[&str] = &[
    "SET", "SETEX", "DEL", "INCRBY", "EXPIRE", "HSET", "HDEL", "LPUSH", "RPUSH", "LPOP", "SADD",
    "SREM",
];

/// Commands that reset the keyspace.
pub const ADMIN_COMMANDS: &[&str] = &["FLUSHDB"];

/// Operations a Redis-like client exposes.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    /// Backend error, surfaced unchanged by proxies.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Check connectivity.
    async fn ping(&self) -> Result<(), Self::Error>;

    /// Get a string value.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Set a string value, clearing any expiry.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), Self::Error>;

    /// Set a string value that expires after `ttl`.
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), Self::Error>;

    /// Delete keys, returning how many existed.
    async fn del(&self, keys: &[&str]) -> Result<u64, Self::Error>;

    /// Count how many of `keys` exist.
    async fn exists(&self, keys: &[&str]) -> Result<u64, Self::Error>;

    /// Add `delta` to an integer value, returning the new value.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, Self::Error>;

    /// Set an expiry. Returns false if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, Self::Error>;

    /// Remaining time to live; `None` for missing or persistent keys.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, Self::Error>;

    /// Set a hash field. Returns true if the field is new.
    async fn hset(&self, key: &str, field: &str, value: &[u8]) -> Result<bool, Self::Error>;

    /// Get a hash field.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Get all fields of a hash.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, Vec<u8>>, Self::Error>;

    /// Delete hash fields, returning how many existed.
    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<u64, Self::Error>;

    /// Prepend values to a list, returning its new length.
    async fn lpush(&self, key: &str, values: &[&[u8]]) -> Result<u64, Self::Error>;

    /// Append values to a list, returning its new length.
    async fn rpush(&self, key: &str, values: &[&[u8]]) -> Result<u64, Self::Error>;

    /// Remove and return the first element of a list.
    async fn lpop(&self, key: &str) -> Result<Option<Vec<u8>>, Self::Error>;

    /// List elements between `start` and `stop` inclusive; negative indexes
    /// count from the end.
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>, Self::Error>;

    /// Add set members, returning how many were new.
    async fn sadd(&self, key: &str, members: &[&str]) -> Result<u64, Self::Error>;

    /// Remove set members, returning how many existed.
    async fn srem(&self, key: &str, members: &[&str]) -> Result<u64, Self::Error>;

    /// All set members.
    async fn smembers(&self, key: &str) -> Result<Vec<String>, Self::Error>;

    /// Remove every key.
    async fn flushdb(&self) -> Result<(), Self::Error>;
}

/// Default command table: reads are DQL, writes DML, `FLUSHDB` DDL.
pub fn default_classifier() -> TableClassifier {
    TableClassifier::new()
        .with_all(READ_COMMANDS, Category::DQL)
        .with_all(WRITE_COMMANDS, Category::DML)
        .with_all(ADMIN_COMMANDS, Category::DDL)
}

/// Wrap a key-value backend with the default command table.
pub fn instrument<B: KeyValueBackend>(
    backend: B,
    registry: SharedMetricsRegistry,
) -> Instrumented<B, TableClassifier> {
    Instrumented::new(backend, registry, default_classifier())
        .with_config(InstrumentConfig::new("redis"))
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[async_trait]
impl<B, C> KeyValueBackend for Instrumented<B, C>
where
    B: KeyValueBackend,
    C: Classifier,
{
    type Error = B::Error;

    async fn ping(&self) -> Result<(), Self::Error> {
        self.observe(
            Operation::named("PING"),
            Payload::new,
            self.inner().ping(),
            |_| Payload::new(),
        )
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        self.observe(
            Operation::named("GET"),
            || Payload::new().arg("key", key),
            self.inner().get(key),
            |value| Payload::new().arg("value", &value.as_deref().map(text)),
        )
        .await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), Self::Error> {
        self.observe(
            Operation::named("SET"),
            || Payload::new().arg("key", key).arg("value", &text(value)),
            self.inner().set(key, value),
            |_| Payload::new(),
        )
        .await
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), Self::Error> {
        self.observe(
            Operation::named("SETEX"),
            || {
                Payload::new()
                    .arg("key", key)
                    .arg("value", &text(value))
                    .arg("ttl_ms", &(ttl.as_millis() as u64))
            },
            self.inner().set_ex(key, value, ttl),
            |_| Payload::new(),
        )
        .await
    }

    async fn del(&self, keys: &[&str]) -> Result<u64, Self::Error> {
        self.observe(
            Operation::named("DEL"),
            || Payload::new().arg("keys", keys),
            self.inner().del(keys),
            |n| Payload::new().arg("deleted", n),
        )
        .await
    }

    async fn exists(&self, keys: &[&str]) -> Result<u64, Self::Error> {
        self.observe(
            Operation::named("EXISTS"),
            || Payload::new().arg("keys", keys),
            self.inner().exists(keys),
            |n| Payload::new().arg("count", n),
        )
        .await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, Self::Error> {
        self.observe(
            Operation::named("INCRBY"),
            || Payload::new().arg("key", key).arg("delta", &delta),
            self.inner().incr_by(key, delta),
            |v| Payload::new().arg("value", v),
        )
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, Self::Error> {
        self.observe(
            Operation::named("EXPIRE"),
            || {
                Payload::new()
                    .arg("key", key)
                    .arg("ttl_ms", &(ttl.as_millis() as u64))
            },
            self.inner().expire(key, ttl),
            |set| Payload::new().arg("set", set),
        )
        .await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, Self::Error> {
        self.observe(
            Operation::named("TTL"),
            || Payload::new().arg("key", key),
            self.inner().ttl(key),
            |ttl| Payload::new().arg("ttl_ms", &ttl.map(|d| d.as_millis() as u64)),
        )
        .await
    }

    async fn hset(&self, key: &str, field: &str, value: &[u8]) -> Result<bool, Self::Error> {
        self.observe(
            Operation::named("HSET"),
            || {
                Payload::new()
                    .arg("key", key)
                    .arg("field", field)
                    .arg("value", &text(value))
            },
            self.inner().hset(key, field, value),
            |created| Payload::new().arg("created", created),
        )
        .await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        self.observe(
            Operation::named("HGET"),
            || Payload::new().arg("key", key).arg("field", field),
            self.inner().hget(key, field),
            |value| Payload::new().arg("value", &value.as_deref().map(text)),
        )
        .await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, Vec<u8>>, Self::Error> {
        self.observe(
            Operation::named("HGETALL"),
            || Payload::new().arg("key", key),
            self.inner().hgetall(key),
            |fields| {
                let fields: HashMap<&str, String> = fields
                    .iter()
                    .map(|(k, v)| (k.as_str(), text(v)))
                    .collect();
                Payload::new().arg("fields", &fields)
            },
        )
        .await
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<u64, Self::Error> {
        self.observe(
            Operation::named("HDEL"),
            || Payload::new().arg("key", key).arg("fields", fields),
            self.inner().hdel(key, fields),
            |n| Payload::new().arg("deleted", n),
        )
        .await
    }

    async fn lpush(&self, key: &str, values: &[&[u8]]) -> Result<u64, Self::Error> {
        self.observe(
            Operation::named("LPUSH"),
            || list_request(key, values),
            self.inner().lpush(key, values),
            |len| Payload::new().arg("length", len),
        )
        .await
    }

    async fn rpush(&self, key: &str, values: &[&[u8]]) -> Result<u64, Self::Error> {
        self.observe(
            Operation::named("RPUSH"),
            || list_request(key, values),
            self.inner().rpush(key, values),
            |len| Payload::new().arg("length", len),
        )
        .await
    }

    async fn lpop(&self, key: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        self.observe(
            Operation::named("LPOP"),
            || Payload::new().arg("key", key),
            self.inner().lpop(key),
            |value| Payload::new().arg("value", &value.as_deref().map(text)),
        )
        .await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>, Self::Error> {
        self.observe(
            Operation::named("LRANGE"),
            || {
                Payload::new()
                    .arg("key", key)
                    .arg("start", &start)
                    .arg("stop", &stop)
            },
            self.inner().lrange(key, start, stop),
            |values| {
                let values: Vec<String> = values.iter().map(|v| text(v)).collect();
                Payload::new().arg("values", &values)
            },
        )
        .await
    }

    async fn sadd(&self, key: &str, members: &[&str]) -> Result<u64, Self::Error> {
        self.observe(
            Operation::named("SADD"),
            || Payload::new().arg("key", key).arg("members", members),
            self.inner().sadd(key, members),
            |n| Payload::new().arg("added", n),
        )
        .await
    }

    async fn srem(&self, key: &str, members: &[&str]) -> Result<u64, Self::Error> {
        self.observe(
            Operation::named("SREM"),
            || Payload::new().arg("key", key).arg("members", members),
            self.inner().srem(key, members),
            |n| Payload::new().arg("removed", n),
        )
        .await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, Self::Error> {
        self.observe(
            Operation::named("SMEMBERS"),
            || Payload::new().arg("key", key),
            self.inner().smembers(key),
            |members| Payload::new().arg("members", members),
        )
        .await
    }

    async fn flushdb(&self) -> Result<(), Self::Error> {
        self.observe(
            Operation::named("FLUSHDB"),
            Payload::new,
            self.inner().flushdb(),
            |_| Payload::new(),
        )
        .await
    }
}

fn list_request(key: &str, values: &[&[u8]]) -> Payload {
    let values: Vec<String> = values.iter().map(|v| text(v)).collect();
    Payload::new().arg("key", key).arg("values", &values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_classifier() {
        let classifier = default_classifier();
        assert_eq!(classifier.classify(&Operation::named("GET")), Category::DQL);
        assert_eq!(classifier.classify(&Operation::named("HSET")), Category::DML);
        assert_eq!(classifier.classify(&Operation::named("FLUSHDB")), Category::DDL);
        assert_eq!(classifier.classify(&Operation::named("PING")), Category::OTHER);
    }

    #[test]
    fn test_command_tables_disjoint() {
        for read in READ_COMMANDS {
            assert!(!WRITE_COMMANDS.contains(read), "{} listed twice", read);
        }
    }
}
