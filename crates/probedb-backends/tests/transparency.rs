//! Proxied calls must behave exactly like direct calls, and be counted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use probedb_backends::{
    document, kv, relational, wide_column, AttributeValue, Document, DocumentBackend,
    FindOptions, KeySchema, KeyValueBackend, MemoryDocumentStore, MemoryError, MemoryKeyValue,
    MemoryWideColumn, RelationalBackend, SqlValue, SqliteBackend, WideColumnBackend,
};
use probedb_core::new_shared_registry;
use serde_json::json;

#[derive(Debug, thiserror::Error, PartialEq)]
enum MockError {
    #[error("key not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] MemoryError),
}

/// Key-value store whose `get` fails for absent keys.
#[derive(Default)]
struct StrictKeyValue {
    store: MemoryKeyValue,
}

#[async_trait]
impl KeyValueBackend for StrictKeyValue {
    type Error = MockError;

    async fn ping(&self) -> Result<(), MockError> {
        Ok(self.store.ping().await?)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, MockError> {
        match self.store.get(key).await? {
            Some(value) => Ok(Some(value)),
            None => Err(MockError::NotFound(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), MockError> {
        Ok(self.store.set(key, value).await?)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), MockError> {
        Ok(self.store.set_ex(key, value, ttl).await?)
    }

    async fn del(&self, keys: &[&str]) -> Result<u64, MockError> {
        Ok(self.store.del(keys).await?)
    }

    async fn exists(&self, keys: &[&str]) -> Result<u64, MockError> {
        Ok(self.store.exists(keys).await?)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, MockError> {
        Ok(self.store.incr_by(key, delta).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, MockError> {
        Ok(self.store.expire(key, ttl).await?)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, MockError> {
        Ok(self.store.ttl(key).await?)
    }

    async fn hset(&self, key: &str, field: &str, value: &[u8]) -> Result<bool, MockError> {
        Ok(self.store.hset(key, field, value).await?)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, MockError> {
        Ok(self.store.hget(key, field).await?)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, Vec<u8>>, MockError> {
        Ok(self.store.hgetall(key).await?)
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> Result<u64, MockError> {
        Ok(self.store.hdel(key, fields).await?)
    }

    async fn lpush(&self, key: &str, values: &[&[u8]]) -> Result<u64, MockError> {
        Ok(self.store.lpush(key, values).await?)
    }

    async fn rpush(&self, key: &str, values: &[&[u8]]) -> Result<u64, MockError> {
        Ok(self.store.rpush(key, values).await?)
    }

    async fn lpop(&self, key: &str) -> Result<Option<Vec<u8>>, MockError> {
        Ok(self.store.lpop(key).await?)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>, MockError> {
        Ok(self.store.lrange(key, start, stop).await?)
    }

    async fn sadd(&self, key: &str, members: &[&str]) -> Result<u64, MockError> {
        Ok(self.store.sadd(key, members).await?)
    }

    async fn srem(&self, key: &str, members: &[&str]) -> Result<u64, MockError> {
        Ok(self.store.srem(key, members).await?)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, MockError> {
        Ok(self.store.smembers(key).await?)
    }

    async fn flushdb(&self) -> Result<(), MockError> {
        Ok(self.store.flushdb().await?)
    }
}

fn doc(value: serde_json::Value) -> Document {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("not an object: {}", other),
    }
}

#[tokio::test]
async fn missing_key_error_passes_through_and_is_counted() {
    let registry = new_shared_registry();
    let proxy = kv::instrument(StrictKeyValue::default(), Arc::clone(&registry));

    let result = proxy.get("missing").await;

    assert_eq!(result, Err(MockError::NotFound("missing".into())));
    for category in ["ALL", "DQL"] {
        let snapshot = registry.get(category).unwrap().snapshot();
        assert_eq!((snapshot.call_count, snapshot.error_count), (1, 1), "{}", category);
    }
}

#[tokio::test]
async fn key_value_results_match_direct_calls() {
    let direct = MemoryKeyValue::new();
    let registry = new_shared_registry();
    let proxy = kv::instrument(MemoryKeyValue::new(), Arc::clone(&registry));

    assert_eq!(proxy.set("n", b"1").await, direct.set("n", b"1").await);
    assert_eq!(proxy.incr_by("n", 4).await, direct.incr_by("n", 4).await);
    assert_eq!(proxy.get("n").await, direct.get("n").await);
    assert_eq!(proxy.sadd("s", &["a", "b"]).await, direct.sadd("s", &["a", "b"]).await);
    assert_eq!(proxy.get("s").await, direct.get("s").await);
    assert_eq!(proxy.get("s").await, Err(MemoryError::WrongType));
    assert_eq!(proxy.smembers("s").await, direct.smembers("s").await);
    assert_eq!(proxy.ping().await, direct.ping().await);

    let all = registry.get("ALL").unwrap().snapshot();
    assert_eq!(all.call_count, 8);
    assert_eq!(all.error_count, 2);
    assert_eq!(registry.get("DML").unwrap().call_count(), 3);
    assert_eq!(registry.get("DQL").unwrap().call_count(), 4);
    assert_eq!(registry.get("DQL").unwrap().error_count(), 2);
    assert_eq!(registry.get("OTHER").unwrap().call_count(), 1);
}

#[tokio::test]
async fn document_results_match_direct_calls() {
    let direct = MemoryDocumentStore::new();
    let registry = new_shared_registry();
    let proxy = document::instrument(MemoryDocumentStore::new(), Arc::clone(&registry));

    let users = [
        doc(json!({"_id": 1, "name": "ada"})),
        doc(json!({"_id": 2, "name": "bob"})),
    ];
    assert_eq!(
        proxy.insert_many("users", &users).await,
        direct.insert_many("users", &users).await
    );
    assert_eq!(
        proxy.insert_one("users", &users[0]).await,
        direct.insert_one("users", &users[0]).await
    );
    let filter = doc(json!({"name": "bob"}));
    assert_eq!(
        proxy.find("users", &filter, FindOptions::default()).await,
        direct.find("users", &filter, FindOptions::default()).await
    );
    assert_eq!(
        proxy.create_index("users", &["name"], false).await,
        direct.create_index("users", &["name"], false).await
    );

    assert_eq!(registry.get("ALL").unwrap().call_count(), 4);
    assert_eq!(registry.get("DML").unwrap().snapshot().error_count, 1);
    assert_eq!(registry.get("DQL").unwrap().call_count(), 1);
    assert_eq!(registry.get("DDL").unwrap().call_count(), 1);
}

#[tokio::test]
async fn wide_column_actions_and_partiql_are_classified() {
    let registry = new_shared_registry();
    let proxy = wide_column::instrument(MemoryWideColumn::new(), Arc::clone(&registry));

    proxy
        .create_table("events", &KeySchema::partition("id"))
        .await
        .unwrap();
    let item: wide_column::Item =
        HashMap::from([("id".to_string(), AttributeValue::s("e1"))]);
    proxy.put_item("events", &item).await.unwrap();
    proxy.describe_table("events").await.unwrap();

    let rows = proxy
        .execute_statement("SELECT * FROM \"events\"")
        .await
        .unwrap();
    assert_eq!(rows, vec![item]);
    assert!(proxy.execute_statement("DELETE FROM \"events\"").await.is_err());

    let names: Vec<_> = registry.all().into_keys().collect();
    assert_eq!(names, vec!["ALL", "DDL", "DML", "DQL", "OTHER"]);
    assert_eq!(registry.get("DML").unwrap().snapshot().error_count, 1);
    assert_eq!(registry.get("DQL").unwrap().call_count(), 1);
}

#[tokio::test]
async fn sqlite_statements_are_classified_by_keyword() {
    let registry = new_shared_registry();
    let db = relational::instrument(SqliteBackend::open_in_memory().unwrap(), Arc::clone(&registry));

    db.execute_batch("CREATE TABLE t (a INTEGER)").await.unwrap();
    db.execute("INSERT INTO t VALUES (?1)", &[SqlValue::Integer(7)])
        .await
        .unwrap();
    let rows = db.query("SELECT a FROM t", &[]).await.unwrap();
    assert_eq!(rows.get(0, "a"), Some(&SqlValue::Integer(7)));

    let err = db.query("SELECT * FROM missing", &[]).await.unwrap_err();
    assert!(err.to_string().contains("no such table"));
    db.execute("VACUUM", &[]).await.unwrap();

    let all = registry.get("ALL").unwrap().snapshot();
    assert_eq!((all.call_count, all.error_count), (5, 1));
    assert_eq!(registry.get("DDL").unwrap().call_count(), 1);
    assert_eq!(registry.get("DML").unwrap().call_count(), 1);
    assert_eq!(registry.get("DQL").unwrap().snapshot().error_count, 1);
    assert_eq!(registry.get("OTHER").unwrap().call_count(), 1);
}
