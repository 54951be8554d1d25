//! Synthetic workload driven through instrumented backends.
//!
//! Each backend gets its own registry, as each would be a separate client
//! connection in an application. A fixed share of the generated calls
//! fails on purpose so error counters are exercised too.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use probedb_backends::{
    document, kv, relational, wide_column, AttributeValue, Document, DocumentBackend,
    FindOptions, Item, KeySchema, KeyValueBackend, MemoryDocumentStore, MemoryKeyValue,
    MemoryWideColumn, RelationalBackend, SqlValue, SqliteBackend, WideColumnBackend,
};
use probedb_core::{
    new_shared_registry, Category, Instrumented, KeywordClassifier, SharedMetricsRegistry,
    TableClassifier,
};
use serde_json::json;

use crate::config::RunConfig;
use crate::error::{Error, Result};

/// Metrics collected for one backend.
#[derive(Clone)]
pub struct BackendReport {
    /// Backend label.
    pub backend: &'static str,
    /// Registry the backend's proxy recorded into.
    pub registry: SharedMetricsRegistry,
}

/// Run the workload against every backend concurrently.
pub async fn run(config: &RunConfig) -> Result<Vec<BackendReport>> {
    let (kv, document, sql, wide_column) = tokio::try_join!(
        run_key_value(config),
        run_document(config),
        run_relational(config),
        run_wide_column(config),
    )?;
    Ok(vec![kv, document, sql, wide_column])
}

/// Spread `config.iterations` steps over `config.concurrency` tasks.
async fn drive<P, F, Fut>(
    backend: &'static str,
    proxy: Arc<P>,
    registry: &SharedMetricsRegistry,
    config: &RunConfig,
    step: F,
) -> Result<()>
where
    P: Send + Sync + 'static,
    F: Fn(Arc<P>, usize) -> Fut + Copy + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let started = Instant::now();
    let workers = config.concurrency.clamp(1, config.iterations.max(1));
    let iterations = config.iterations;

    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let proxy = Arc::clone(&proxy);
            tokio::spawn(async move {
                for i in (worker..iterations).step_by(workers) {
                    step(Arc::clone(&proxy), i).await;
                }
            })
        })
        .collect();
    for handle in join_all(handles).await {
        handle?;
    }

    let all = registry
        .get(Category::ALL.as_str())
        .map(|aggregate| aggregate.snapshot())
        .unwrap_or_default();
    tracing::info!(
        backend,
        calls = all.call_count,
        errors = all.error_count,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "workload finished"
    );
    Ok(())
}

type KeyValueProxy = Instrumented<MemoryKeyValue, TableClassifier>;

async fn run_key_value(config: &RunConfig) -> Result<BackendReport> {
    const BACKEND: &str = "redis";
    let registry = new_shared_registry();
    let proxy = Arc::new(
        kv::instrument(MemoryKeyValue::new(), Arc::clone(&registry))
            .with_config(config.instrument_config(BACKEND)),
    );
    proxy.ping().await.map_err(|e| Error::setup(BACKEND, e))?;

    drive(BACKEND, proxy, &registry, config, key_value_step).await?;
    Ok(BackendReport {
        backend: BACKEND,
        registry,
    })
}

async fn key_value_step(proxy: Arc<KeyValueProxy>, i: usize) {
    let key = format!("user:{}", i % 64);
    let _ = match i % 8 {
        0 => proxy.set(&key, format!("session-{}", i).as_bytes()).await.map(drop),
        1 => proxy.get(&key).await.map(drop),
        2 => proxy.incr_by("hits", 1).await.map(drop),
        3 => proxy.hset(&key, "last_seen", i.to_string().as_bytes()).await.map(drop),
        4 => proxy.hgetall(&key).await.map(drop),
        5 => proxy.lpush("queue", &[key.as_bytes()]).await.map(drop),
        6 => proxy.lrange("queue", 0, 9).await.map(drop),
        // "queue" holds a list, so this fails with WRONGTYPE.
        _ => proxy.get("queue").await.map(drop),
    };
}

type DocumentProxy = Instrumented<MemoryDocumentStore, TableClassifier>;

async fn run_document(config: &RunConfig) -> Result<BackendReport> {
    const BACKEND: &str = "mongodb";
    let registry = new_shared_registry();
    let proxy = Arc::new(
        document::instrument(MemoryDocumentStore::new(), Arc::clone(&registry))
            .with_config(config.instrument_config(BACKEND)),
    );
    proxy
        .create_collection("orders")
        .await
        .map_err(|e| Error::setup(BACKEND, e))?;
    proxy
        .create_index("orders", &["customer"], false)
        .await
        .map_err(|e| Error::setup(BACKEND, e))?;

    drive(BACKEND, proxy, &registry, config, document_step).await?;
    Ok(BackendReport {
        backend: BACKEND,
        registry,
    })
}

fn object(value: serde_json::Value) -> Document {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Document::new(),
    }
}

async fn document_step(proxy: Arc<DocumentProxy>, i: usize) {
    let customer = format!("customer-{}", i % 16);
    let _ = match i % 7 {
        0 => proxy
            .insert_one(
                "orders",
                &object(json!({"_id": i, "customer": customer, "total": i % 100})),
            )
            .await
            .map(drop),
        1 => proxy
            .find_one("orders", &object(json!({"customer": customer})))
            .await
            .map(drop),
        2 => proxy
            .update_many(
                "orders",
                &object(json!({"customer": customer})),
                &object(json!({"status": "shipped"})),
            )
            .await
            .map(drop),
        3 => proxy
            .count_documents("orders", &object(json!({"status": "shipped"})))
            .await
            .map(drop),
        // Collides with the order inserted at i = 0.
        4 => proxy
            .insert_one("orders", &object(json!({"_id": 0, "customer": customer})))
            .await
            .map(drop),
        5 => proxy
            .find("orders", &Document::new(), FindOptions::limit(10))
            .await
            .map(drop),
        _ => proxy
            .delete_one("orders", &object(json!({"_id": i - 6})))
            .await
            .map(drop),
    };
}

type SqlProxy = Instrumented<SqliteBackend, KeywordClassifier>;

const EVENTS_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY,
    kind TEXT NOT NULL,
    payload TEXT
)";

async fn run_relational(config: &RunConfig) -> Result<BackendReport> {
    const BACKEND: &str = "sql";
    let backend = match &config.sqlite_path {
        Some(path) => SqliteBackend::open(path),
        None => SqliteBackend::open_in_memory(),
    }
    .map_err(|e| Error::setup(BACKEND, e))?;

    let registry = new_shared_registry();
    let proxy = Arc::new(
        relational::instrument(backend, Arc::clone(&registry))
            .with_config(config.instrument_config(BACKEND)),
    );
    proxy
        .execute_batch(EVENTS_SCHEMA)
        .await
        .map_err(|e| Error::setup(BACKEND, e))?;

    drive(BACKEND, proxy, &registry, config, relational_step).await?;
    Ok(BackendReport {
        backend: BACKEND,
        registry,
    })
}

async fn relational_step(proxy: Arc<SqlProxy>, i: usize) {
    let kind = SqlValue::from(["click", "view", "purchase"][i % 3]);
    let id = SqlValue::Integer(i as i64 / 6);
    let _ = match i % 6 {
        0 | 1 => proxy
            .execute(
                "INSERT INTO events (kind, payload) VALUES (?1, ?2)",
                &[kind, SqlValue::from(format!("event {}", i))],
            )
            .await
            .map(drop),
        2 => proxy
            .query("SELECT id, payload FROM events WHERE kind = ?1 LIMIT 10", &[kind])
            .await
            .map(drop),
        3 => proxy
            .execute("UPDATE events SET payload = ?1 WHERE id = ?2", &[SqlValue::Null, id])
            .await
            .map(drop),
        4 => proxy
            .execute("DELETE FROM events WHERE id = ?1", &[id])
            .await
            .map(drop),
        // Violates the NOT NULL constraint on `kind`.
        _ => proxy
            .execute("INSERT INTO events (kind) VALUES (NULL)", &[])
            .await
            .map(drop),
    };
}

type WideColumnProxy = Instrumented<MemoryWideColumn, TableClassifier>;

async fn run_wide_column(config: &RunConfig) -> Result<BackendReport> {
    const BACKEND: &str = "dynamodb";
    let registry = new_shared_registry();
    let proxy = Arc::new(
        wide_column::instrument(MemoryWideColumn::new(), Arc::clone(&registry))
            .with_config(config.instrument_config(BACKEND)),
    );
    proxy
        .create_table(
            "sessions",
            &KeySchema::partition("user").with_sort_key("started"),
        )
        .await
        .map_err(|e| Error::setup(BACKEND, e))?;

    drive(BACKEND, proxy, &registry, config, wide_column_step).await?;
    Ok(BackendReport {
        backend: BACKEND,
        registry,
    })
}

async fn wide_column_step(proxy: Arc<WideColumnProxy>, i: usize) {
    let user = AttributeValue::s(format!("user-{}", i % 32));
    let key: Item = [
        ("user".to_string(), user.clone()),
        ("started".to_string(), AttributeValue::n(i / 6)),
    ]
    .into_iter()
    .collect();

    let _ = match i % 6 {
        0 => {
            let mut item = key;
            item.insert("device".into(), AttributeValue::s("mobile"));
            proxy.put_item("sessions", &item).await.map(drop)
        }
        1 => proxy.get_item("sessions", &key).await.map(drop),
        2 => proxy
            .query_partition("sessions", &user, Some(5))
            .await
            .map(drop),
        3 => {
            let updates: Item =
                [("ended".to_string(), AttributeValue::Bool(true))].into_iter().collect();
            proxy.update_item("sessions", &key, &updates).await.map(drop)
        }
        4 => proxy
            .execute_statement("SELECT * FROM \"sessions\"")
            .await
            .map(drop),
        // Missing the sort key attribute.
        _ => {
            let partial: Item = [("user".to_string(), user)].into_iter().collect();
            proxy.get_item("sessions", &partial).await.map(drop)
        }
    };
}
