//! Wide-column (DynamoDB-like) capability.
//!
//! Command names are DynamoDB's API action names (`PutItem`, `Query`, ...).
//! PartiQL statements are recorded as `PARTIQL:<KW>` and classified by
//! their leading keyword.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use probedb_core::{
    Category, Classifier, InstrumentConfig, Instrumented, KeywordClassifier, Operation, Payload,
    SharedMetricsRegistry, TableClassifier,
};
use serde::{Deserialize, Serialize};

/// A DynamoDB attribute value, serialized in DynamoDB's JSON shape
/// (`{"S": "text"}`, `{"N": "42"}`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    S(String),
    /// Number, kept in its decimal string form.
    N(String),
    B(Vec<u8>),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    L(Vec<AttributeValue>),
    M(HashMap<String, AttributeValue>),
    #[serde(rename = "SS")]
    Ss(BTreeSet<String>),
    #[serde(rename = "NS")]
    Ns(BTreeSet<String>),
}

impl AttributeValue {
    /// A string value.
    pub fn s(value: impl Into<String>) -> Self {
        AttributeValue::S(value.into())
    }

    /// A numeric value.
    pub fn n(value: impl ToString) -> Self {
        AttributeValue::N(value.to_string())
    }

    pub fn as_s(&self) -> Option<&str> {
        match self {
            AttributeValue::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_n(&self) -> Option<&str> {
        match self {
            AttributeValue::N(n) => Some(n),
            _ => None,
        }
    }
}

/// One item: attribute name to value.
pub type Item = HashMap<String, AttributeValue>;

/// Primary key layout of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySchema {
    pub partition_key: String,
    pub sort_key: Option<String>,
}

impl KeySchema {
    /// A partition key with no sort key.
    pub fn partition(name: impl Into<String>) -> Self {
        Self {
            partition_key: name.into(),
            sort_key: None,
        }
    }

    /// Add a sort key.
    pub fn with_sort_key(mut self, name: impl Into<String>) -> Self {
        self.sort_key = Some(name.into());
        self
    }

    /// Names of the key attributes.
    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.partition_key.as_str()).chain(self.sort_key.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescription {
    pub name: String,
    pub key_schema: KeySchema,
    pub item_count: u64,
}

/// Actions that only read items.
pub const READ_ACTIONS: &[&str] = &["GetItem", "Query", "Scan", "BatchGetItem"];

/// Actions that modify items.
pub const WRITE_ACTIONS: &[&str] = &["PutItem", "UpdateItem", "DeleteItem", "BatchWriteItem"];

/// Table lifecycle actions.
pub const TABLE_ACTIONS: &[&str] = &["CreateTable", "DeleteTable"];

/// Table metadata actions.
pub const METADATA_ACTIONS: &[&str] = &["DescribeTable", "ListTables"];

/// Operations a DynamoDB-like client exposes.
#[async_trait]
pub trait WideColumnBackend: Send + Sync {
    /// Backend error, surfaced unchanged by proxies.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create a table.
    async fn create_table(
        &self,
        name: &str,
        key_schema: &KeySchema,
    ) -> Result<TableDescription, Self::Error>;

    /// Delete a table, returning its final description.
    async fn delete_table(&self, name: &str) -> Result<TableDescription, Self::Error>;

    async fn describe_table(&self, name: &str) -> Result<TableDescription, Self::Error>;

    /// Table names, sorted.
    async fn list_tables(&self) -> Result<Vec<String>, Self::Error>;

    /// Write an item, returning the one it replaced.
    async fn put_item(&self, table: &str, item: &Item) -> Result<Option<Item>, Self::Error>;

    /// Fetch an item by its key attributes.
    async fn get_item(&self, table: &str, key: &Item) -> Result<Option<Item>, Self::Error>;

    /// Set non-key attributes on an item, creating it if needed. Returns
    /// the updated item.
    async fn update_item(
        &self,
        table: &str,
        key: &Item,
        updates: &Item,
    ) -> Result<Item, Self::Error>;

    /// Delete an item, returning it if it existed.
    async fn delete_item(&self, table: &str, key: &Item) -> Result<Option<Item>, Self::Error>;

    /// Items of one partition in sort-key order (the `Query` action).
    async fn query_partition(
        &self,
        table: &str,
        partition: &AttributeValue,
        limit: Option<usize>,
    ) -> Result<Vec<Item>, Self::Error>;

    /// All items in key order.
    async fn scan(&self, table: &str, limit: Option<usize>) -> Result<Vec<Item>, Self::Error>;

    /// Fetch several items; missing keys are skipped.
    async fn batch_get_item(&self, table: &str, keys: &[Item]) -> Result<Vec<Item>, Self::Error>;

    /// Apply puts then deletes.
    async fn batch_write_item(
        &self,
        table: &str,
        puts: &[Item],
        deletes: &[Item],
    ) -> Result<(), Self::Error>;

    /// Run a PartiQL statement.
    async fn execute_statement(&self, statement: &str) -> Result<Vec<Item>, Self::Error>;
}

/// Default action table. PartiQL statements fall through to keyword
/// classification.
pub fn default_classifier() -> TableClassifier {
    TableClassifier::new()
        .with_all(READ_ACTIONS, Category::DQL)
        .with_all(WRITE_ACTIONS, Category::DML)
        .with_all(TABLE_ACTIONS, Category::DDL)
        .with_all(METADATA_ACTIONS, Category::OTHER)
        .with_statements(KeywordClassifier::new())
}

/// Wrap a wide-column backend with the default action table.
pub fn instrument<B: WideColumnBackend>(
    backend: B,
    registry: SharedMetricsRegistry,
) -> Instrumented<B, TableClassifier> {
    Instrumented::new(backend, registry, default_classifier())
        .with_config(InstrumentConfig::new("dynamodb"))
}

fn keyed(table: &str, key: &Item) -> Payload {
    Payload::new().arg("table", table).arg("key", key)
}

fn items(items: &[Item]) -> Payload {
    Payload::new()
        .arg("count", &items.len())
        .arg("items", items)
}

#[async_trait]
impl<B, C> WideColumnBackend for Instrumented<B, C>
where
    B: WideColumnBackend,
    C: Classifier,
{
    type Error = B::Error;

    async fn create_table(
        &self,
        name: &str,
        key_schema: &KeySchema,
    ) -> Result<TableDescription, Self::Error> {
        self.observe(
            Operation::named("CreateTable"),
            || Payload::new().arg("table", name).arg("key_schema", key_schema),
            self.inner().create_table(name, key_schema),
            Payload::of,
        )
        .await
    }

    async fn delete_table(&self, name: &str) -> Result<TableDescription, Self::Error> {
        self.observe(
            Operation::named("DeleteTable"),
            || Payload::new().arg("table", name),
            self.inner().delete_table(name),
            Payload::of,
        )
        .await
    }

    async fn describe_table(&self, name: &str) -> Result<TableDescription, Self::Error> {
        self.observe(
            Operation::named("DescribeTable"),
            || Payload::new().arg("table", name),
            self.inner().describe_table(name),
            Payload::of,
        )
        .await
    }

    async fn list_tables(&self) -> Result<Vec<String>, Self::Error> {
        self.observe(
            Operation::named("ListTables"),
            Payload::new,
            self.inner().list_tables(),
            |names| Payload::new().arg("tables", names),
        )
        .await
    }

    async fn put_item(&self, table: &str, item: &Item) -> Result<Option<Item>, Self::Error> {
        self.observe(
            Operation::named("PutItem"),
            || Payload::new().arg("table", table).arg("item", item),
            self.inner().put_item(table, item),
            |old| Payload::new().arg("attributes", old),
        )
        .await
    }

    async fn get_item(&self, table: &str, key: &Item) -> Result<Option<Item>, Self::Error> {
        self.observe(
            Operation::named("GetItem"),
            || keyed(table, key),
            self.inner().get_item(table, key),
            |item| Payload::new().arg("item", item),
        )
        .await
    }

    async fn update_item(
        &self,
        table: &str,
        key: &Item,
        updates: &Item,
    ) -> Result<Item, Self::Error> {
        self.observe(
            Operation::named("UpdateItem"),
            || keyed(table, key).arg("updates", updates),
            self.inner().update_item(table, key, updates),
            |item| Payload::new().arg("attributes", item),
        )
        .await
    }

    async fn delete_item(&self, table: &str, key: &Item) -> Result<Option<Item>, Self::Error> {
        self.observe(
            Operation::named("DeleteItem"),
            || keyed(table, key),
            self.inner().delete_item(table, key),
            |old| Payload::new().arg("attributes", old),
        )
        .await
    }

    async fn query_partition(
        &self,
        table: &str,
        partition: &AttributeValue,
        limit: Option<usize>,
    ) -> Result<Vec<Item>, Self::Error> {
        self.observe(
            Operation::named("Query"),
            || {
                Payload::new()
                    .arg("table", table)
                    .arg("partition", partition)
                    .arg("limit", &limit)
            },
            self.inner().query_partition(table, partition, limit),
            |found| items(found),
        )
        .await
    }

    async fn scan(&self, table: &str, limit: Option<usize>) -> Result<Vec<Item>, Self::Error> {
        self.observe(
            Operation::named("Scan"),
            || Payload::new().arg("table", table).arg("limit", &limit),
            self.inner().scan(table, limit),
            |found| items(found),
        )
        .await
    }

    async fn batch_get_item(&self, table: &str, keys: &[Item]) -> Result<Vec<Item>, Self::Error> {
        self.observe(
            Operation::named("BatchGetItem"),
            || Payload::new().arg("table", table).arg("keys", keys),
            self.inner().batch_get_item(table, keys),
            |found| items(found),
        )
        .await
    }

    async fn batch_write_item(
        &self,
        table: &str,
        puts: &[Item],
        deletes: &[Item],
    ) -> Result<(), Self::Error> {
        self.observe(
            Operation::named("BatchWriteItem"),
            || {
                Payload::new()
                    .arg("table", table)
                    .arg("puts", puts)
                    .arg("deletes", deletes)
            },
            self.inner().batch_write_item(table, puts, deletes),
            |_| Payload::new(),
        )
        .await
    }

    async fn execute_statement(&self, statement: &str) -> Result<Vec<Item>, Self::Error> {
        self.observe(
            Operation::statement("PARTIQL", statement),
            || Payload::new().arg("statement", statement),
            self.inner().execute_statement(statement),
            |found| items(found),
        )
        .await
    }
}
