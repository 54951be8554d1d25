//! Concurrent workloads through instrumented backends.

use std::sync::Arc;

use futures::future::join_all;
use probedb_backends::{
    document, kv, relational, Document, DocumentBackend, KeyValueBackend, MemoryDocumentStore,
    MemoryKeyValue, RelationalBackend, SqlValue, SqliteBackend,
};
use probedb_core::testing::{CapturingSink, FailingSink};
use probedb_core::{new_shared_registry, Category, Instrumented, MetricsRegistry};
use serde_json::json;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_key_value_calls_are_all_counted() {
    const N: usize = 1000;

    let registry = new_shared_registry();
    let proxy = Arc::new(kv::instrument(MemoryKeyValue::new(), Arc::clone(&registry)));

    let handles: Vec<_> = (0..N)
        .map(|i| {
            let proxy = Arc::clone(&proxy);
            tokio::spawn(async move { proxy.incr_by(&format!("counter:{}", i % 10), 1).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let total: i64 = join_all((0..10).map(|i| {
        let proxy = Arc::clone(&proxy);
        async move { proxy.incr_by(&format!("counter:{}", i), 0).await.unwrap() }
    }))
    .await
    .into_iter()
    .sum();

    assert_eq!(total, N as i64);
    let dml = registry.get("DML").unwrap().snapshot();
    assert_eq!(dml.call_count, N as u64 + 10);
    assert_eq!(dml.error_count, 0);
    assert_eq!(dml.latency.count(), dml.call_count);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_document_inserts_with_duplicates() {
    let registry = new_shared_registry();
    let proxy = Arc::new(document::instrument(
        MemoryDocumentStore::new(),
        Arc::clone(&registry),
    ));

    let handles: Vec<_> = (0..200)
        .map(|i| {
            let proxy = Arc::clone(&proxy);
            tokio::spawn(async move {
                let mut user = Document::new();
                user.insert("_id".into(), json!(i % 100));
                proxy.insert_one("users", &user).await
            })
        })
        .collect();

    let failures = join_all(handles)
        .await
        .into_iter()
        .filter(|result| result.as_ref().unwrap().is_err())
        .count();

    assert_eq!(failures, 100);
    let dml = registry.get("DML").unwrap().snapshot();
    assert_eq!((dml.call_count, dml.error_count), (200, 100));
    assert_eq!(
        proxy.count_documents("users", &Document::new()).await.unwrap(),
        100
    );
}

#[tokio::test]
async fn failing_sink_leaves_sqlite_results_untouched() {
    let direct = SqliteBackend::open_in_memory().unwrap();
    let proxy = Instrumented::with_sink(
        SqliteBackend::open_in_memory().unwrap(),
        Arc::new(FailingSink),
        probedb_core::KeywordClassifier::new(),
    );

    let schema = "CREATE TABLE t (a INTEGER NOT NULL)";
    assert_eq!(
        proxy.execute_batch(schema).await.is_ok(),
        direct.execute_batch(schema).await.is_ok()
    );
    let params = [SqlValue::Integer(1)];
    assert_eq!(
        proxy.execute("INSERT INTO t VALUES (?1)", &params).await.unwrap(),
        direct.execute("INSERT INTO t VALUES (?1)", &params).await.unwrap()
    );
    assert_eq!(
        proxy.query("SELECT a FROM t", &[]).await.unwrap(),
        direct.query("SELECT a FROM t", &[]).await.unwrap()
    );
    assert_eq!(
        proxy
            .execute("INSERT INTO t VALUES (NULL)", &[])
            .await
            .unwrap_err()
            .to_string(),
        direct
            .execute("INSERT INTO t VALUES (NULL)", &[])
            .await
            .unwrap_err()
            .to_string()
    );
}

#[tokio::test]
async fn captured_sql_records_carry_statement_and_rows() {
    let sink = Arc::new(CapturingSink::new());
    let db = Instrumented::with_sink(
        SqliteBackend::open_in_memory().unwrap(),
        sink.clone(),
        probedb_core::KeywordClassifier::new(),
    );

    db.execute_batch("CREATE TABLE t (a TEXT)").await.unwrap();
    db.execute("INSERT INTO t VALUES (?1)", &[SqlValue::from("x")])
        .await
        .unwrap();
    db.query("select a from t", &[]).await.unwrap();

    assert_eq!(sink.names(), vec!["BATCH:CREATE", "EXEC:INSERT", "QUERY:SELECT"]);
    let records = sink.records();
    let (categories, insert) = &records[1];
    assert_eq!(categories, &vec![Category::ALL, Category::DML]);
    assert_eq!(
        insert.request().unwrap().get("params"),
        Some(&json!(["x"]))
    );
    let query = &records[2].1;
    assert_eq!(
        query.response().unwrap().get("rows"),
        Some(&json!([["x"]]))
    );
}

#[tokio::test]
async fn prometheus_export_after_workload() {
    let registry = Arc::new(MetricsRegistry::new());
    let db = relational::instrument(SqliteBackend::open_in_memory().unwrap(), Arc::clone(&registry));

    db.execute_batch("CREATE TABLE t (a INTEGER)").await.unwrap();
    for i in 0..3 {
        db.execute("INSERT INTO t VALUES (?1)", &[SqlValue::Integer(i)])
            .await
            .unwrap();
    }
    let _ = db.query("SELECT * FROM nope", &[]).await;

    let text = registry.to_prometheus();
    assert!(text.contains("probedb_commands_total{category=\"DML\"} 3"));
    assert!(text.contains("probedb_commands_total{category=\"ALL\"} 5"));
    assert!(text.contains("probedb_command_errors_total{category=\"DQL\"} 1"));

    registry.close();
    db.execute("INSERT INTO t VALUES (9)", &[]).await.unwrap();
    assert_eq!(registry.get("DML").unwrap().call_count(), 3);
}
