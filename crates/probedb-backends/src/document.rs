//! Document (MongoDB-like) capability.
//!
//! Command names recorded by the proxy are MongoDB's camelCase command
//! names (`find`, `insertOne`, `createIndex`, ...).

use async_trait::async_trait;
use probedb_core::{
    Category, Classifier, InstrumentConfig, Instrumented, Operation, Payload,
    SharedMetricsRegistry, TableClassifier,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A document: a JSON object.
pub type Document = Map<String, Value>;

/// Field holding a document's primary key.
pub const ID_FIELD: &str = "_id";

/// Commands that only read.
pub const READ_COMMANDS: &[&str] = &["find", "findOne", "countDocuments", "distinct"];

/// Commands that modify documents.
pub const WRITE_COMMANDS: &[&str] = &[
    "insertOne",
    "insertMany",
    "updateOne",
    "updateMany",
    "replaceOne",
    "deleteOne",
    "deleteMany",
];

/// Collection and index management commands.
pub const ADMIN_COMMANDS: &[&str] = &[
    "createCollection",
    "dropCollection",
    "createIndex",
    "dropIndex",
];

/// Paging for [`DocumentBackend::find`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindOptions {
    /// Documents to skip.
    pub skip: u64,
    /// Maximum documents to return.
    pub limit: Option<u64>,
}

impl FindOptions {
    /// Return at most `limit` documents.
    pub fn limit(limit: u64) -> Self {
        Self {
            skip: 0,
            limit: Some(limit),
        }
    }

    /// Skip the first `skip` matches.
    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertOneResult {
    pub inserted_id: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// Whether `document` matches a top-level equality `filter`.
///
/// An empty filter matches every document.
pub fn matches(document: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(field, expected)| document.get(field) == Some(expected))
}

/// Operations a MongoDB-like client exposes.
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// Backend error, surfaced unchanged by proxies.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Documents in `collection` matching `filter`.
    async fn find(
        &self,
        collection: &str,
        filter: &Document,
        options: FindOptions,
    ) -> Result<Vec<Document>, Self::Error>;

    /// First document matching `filter`.
    async fn find_one(
        &self,
        collection: &str,
        filter: &Document,
    ) -> Result<Option<Document>, Self::Error>;

    /// Number of documents matching `filter`.
    async fn count_documents(&self, collection: &str, filter: &Document)
        -> Result<u64, Self::Error>;

    /// Distinct values of `field` among matching documents.
    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: &Document,
    ) -> Result<Vec<Value>, Self::Error>;

    /// Insert one document; an `_id` is assigned when absent.
    async fn insert_one(
        &self,
        collection: &str,
        document: &Document,
    ) -> Result<InsertOneResult, Self::Error>;

    /// Insert several documents.
    async fn insert_many(
        &self,
        collection: &str,
        documents: &[Document],
    ) -> Result<InsertManyResult, Self::Error>;

    /// Set fields on the first matching document.
    async fn update_one(
        &self,
        collection: &str,
        filter: &Document,
        set: &Document,
    ) -> Result<UpdateResult, Self::Error>;

    /// Set fields on every matching document.
    async fn update_many(
        &self,
        collection: &str,
        filter: &Document,
        set: &Document,
    ) -> Result<UpdateResult, Self::Error>;

    /// Replace the first matching document, keeping its `_id`.
    async fn replace_one(
        &self,
        collection: &str,
        filter: &Document,
        replacement: &Document,
    ) -> Result<UpdateResult, Self::Error>;

    /// Delete the first matching document.
    async fn delete_one(&self, collection: &str, filter: &Document)
        -> Result<DeleteResult, Self::Error>;

    /// Delete every matching document.
    async fn delete_many(
        &self,
        collection: &str,
        filter: &Document,
    ) -> Result<DeleteResult, Self::Error>;

    /// Create an empty collection.
    async fn create_collection(&self, name: &str) -> Result<(), Self::Error>;

    /// Drop a collection. Returns false if it did not exist.
    async fn drop_collection(&self, name: &str) -> Result<bool, Self::Error>;

    /// Names of all collections, sorted.
    async fn list_collections(&self) -> Result<Vec<String>, Self::Error>;

    /// Create an index on `keys`, returning its name.
    async fn create_index(
        &self,
        collection: &str,
        keys: &[&str],
        unique: bool,
    ) -> Result<String, Self::Error>;

    /// Drop an index by name.
    async fn drop_index(&self, collection: &str, name: &str) -> Result<(), Self::Error>;
}

/// Default command table: reads are DQL, writes DML, collection and index
/// management DDL.
pub fn default_classifier() -> TableClassifier {
    TableClassifier::new()
        .with_all(READ_COMMANDS, Category::DQL)
        .with_all(WRITE_COMMANDS, Category::DML)
        .with_all(ADMIN_COMMANDS, Category::DDL)
}

/// Wrap a document backend with the default command table.
pub fn instrument<B: DocumentBackend>(
    backend: B,
    registry: SharedMetricsRegistry,
) -> Instrumented<B, TableClassifier> {
    Instrumented::new(backend, registry, default_classifier())
        .with_config(InstrumentConfig::new("mongodb"))
}

fn filtered(collection: &str, filter: &Document) -> Payload {
    Payload::new()
        .arg("collection", collection)
        .arg("filter", filter)
}

#[async_trait]
impl<B, C> DocumentBackend for Instrumented<B, C>
where
    B: DocumentBackend,
    C: Classifier,
{
    type Error = B::Error;

    async fn find(
        &self,
        collection: &str,
        filter: &Document,
        options: FindOptions,
    ) -> Result<Vec<Document>, Self::Error> {
        self.observe(
            Operation::named("find"),
            || filtered(collection, filter).arg("options", &options),
            self.inner().find(collection, filter, options),
            |documents| Payload::new().arg("documents", documents),
        )
        .await
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Document,
    ) -> Result<Option<Document>, Self::Error> {
        self.observe(
            Operation::named("findOne"),
            || filtered(collection, filter),
            self.inner().find_one(collection, filter),
            |document| Payload::new().arg("document", document),
        )
        .await
    }

    async fn count_documents(
        &self,
        collection: &str,
        filter: &Document,
    ) -> Result<u64, Self::Error> {
        self.observe(
            Operation::named("countDocuments"),
            || filtered(collection, filter),
            self.inner().count_documents(collection, filter),
            |n| Payload::new().arg("count", n),
        )
        .await
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: &Document,
    ) -> Result<Vec<Value>, Self::Error> {
        self.observe(
            Operation::named("distinct"),
            || filtered(collection, filter).arg("field", field),
            self.inner().distinct(collection, field, filter),
            |values| Payload::new().arg("values", values),
        )
        .await
    }

    async fn insert_one(
        &self,
        collection: &str,
        document: &Document,
    ) -> Result<InsertOneResult, Self::Error> {
        self.observe(
            Operation::named("insertOne"),
            || {
                Payload::new()
                    .arg("collection", collection)
                    .arg("document", document)
            },
            self.inner().insert_one(collection, document),
            Payload::of,
        )
        .await
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: &[Document],
    ) -> Result<InsertManyResult, Self::Error> {
        self.observe(
            Operation::named("insertMany"),
            || {
                Payload::new()
                    .arg("collection", collection)
                    .arg("documents", documents)
            },
            self.inner().insert_many(collection, documents),
            Payload::of,
        )
        .await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Document,
        set: &Document,
    ) -> Result<UpdateResult, Self::Error> {
        self.observe(
            Operation::named("updateOne"),
            || filtered(collection, filter).arg("set", set),
            self.inner().update_one(collection, filter, set),
            Payload::of,
        )
        .await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Document,
        set: &Document,
    ) -> Result<UpdateResult, Self::Error> {
        self.observe(
            Operation::named("updateMany"),
            || filtered(collection, filter).arg("set", set),
            self.inner().update_many(collection, filter, set),
            Payload::of,
        )
        .await
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: &Document,
        replacement: &Document,
    ) -> Result<UpdateResult, Self::Error> {
        self.observe(
            Operation::named("replaceOne"),
            || filtered(collection, filter).arg("replacement", replacement),
            self.inner().replace_one(collection, filter, replacement),
            Payload::of,
        )
        .await
    }

    async fn delete_one(
        &self,
        collection: &str,
        filter: &Document,
    ) -> Result<DeleteResult, Self::Error> {
        self.observe(
            Operation::named("deleteOne"),
            || filtered(collection, filter),
            self.inner().delete_one(collection, filter),
            Payload::of,
        )
        .await
    }

    async fn delete_many(
        &self,
        collection: &str,
        filter: &Document,
    ) -> Result<DeleteResult, Self::Error> {
        self.observe(
            Operation::named("deleteMany"),
            || filtered(collection, filter),
            self.inner().delete_many(collection, filter),
            Payload::of,
        )
        .await
    }

    async fn create_collection(&self, name: &str) -> Result<(), Self::Error> {
        self.observe(
            Operation::named("createCollection"),
            || Payload::new().arg("collection", name),
            self.inner().create_collection(name),
            |_| Payload::new(),
        )
        .await
    }

    async fn drop_collection(&self, name: &str) -> Result<bool, Self::Error> {
        self.observe(
            Operation::named("dropCollection"),
            || Payload::new().arg("collection", name),
            self.inner().drop_collection(name),
            |dropped| Payload::new().arg("dropped", dropped),
        )
        .await
    }

    async fn list_collections(&self) -> Result<Vec<String>, Self::Error> {
        self.observe(
            Operation::named("listCollections"),
            Payload::new,
            self.inner().list_collections(),
            |names| Payload::new().arg("collections", names),
        )
        .await
    }

    async fn create_index(
        &self,
        collection: &str,
        keys: &[&str],
        unique: bool,
    ) -> Result<String, Self::Error> {
        self.observe(
            Operation::named("createIndex"),
            || {
                Payload::new()
                    .arg("collection", collection)
                    .arg("keys", keys)
                    .arg("unique", &unique)
            },
            self.inner().create_index(collection, keys, unique),
            |name| Payload::new().arg("name", name),
        )
        .await
    }

    async fn drop_index(&self, collection: &str, name: &str) -> Result<(), Self::Error> {
        self.observe(
            Operation::named("dropIndex"),
            || Payload::new().arg("collection", collection).arg("name", name),
            self.inner().drop_index(collection, name),
            |_| Payload::new(),
        )
        .await
    }
}
