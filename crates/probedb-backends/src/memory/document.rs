//! In-memory document store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::document::{
    matches, DeleteResult, Document, DocumentBackend, FindOptions, InsertManyResult,
    InsertOneResult, UpdateResult, ID_FIELD,
};
use crate::error::MemoryError;

#[derive(Debug, Clone)]
struct Index {
    keys: Vec<String>,
    unique: bool,
}

#[derive(Debug, Default)]
struct Collection {
    documents: Vec<Document>,
    indexes: BTreeMap<String, Index>,
}

impl Collection {
    fn key_of<'a>(document: &'a Document, keys: &[String]) -> Vec<Option<&'a Value>> {
        keys.iter().map(|key| document.get(key)).collect()
    }

    /// Describe the first unique constraint `candidate` would violate,
    /// ignoring the document at `position`.
    fn conflict(&self, candidate: &Document, position: Option<usize>) -> Option<String> {
        let others = || {
            self.documents
                .iter()
                .enumerate()
                .filter(move |(i, _)| Some(*i) != position)
                .map(|(_, d)| d)
        };

        let id = candidate.get(ID_FIELD);
        if others().any(|d| d.get(ID_FIELD) == id) {
            return Some(format!("{}: {}", ID_FIELD, id.unwrap_or(&Value::Null)));
        }

        for (name, index) in self.indexes.iter().filter(|(_, index)| index.unique) {
            let key = Self::key_of(candidate, &index.keys);
            if others().any(|d| Self::key_of(d, &index.keys) == key) {
                return Some(format!("index {}", name));
            }
        }
        None
    }

    fn matching(&self, filter: &Document) -> impl Iterator<Item = usize> + '_ {
        let filter = filter.clone();
        self.documents
            .iter()
            .enumerate()
            .filter(move |(_, d)| matches(d, &filter))
            .map(|(i, _)| i)
    }
}

/// MongoDB-like store held in process memory.
///
/// Reads against a missing collection behave as if it were empty; the
/// first insert creates it.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<BTreeMap<String, Collection>>,
    next_id: AtomicU64,
}

impl MemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn generate_id(&self) -> Value {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        Value::String(format!("{:024x}", n))
    }

    fn read<T>(&self, collection: &str, f: impl FnOnce(&Collection) -> T) -> T {
        let collections = self.collections.read();
        match collections.get(collection) {
            Some(c) => f(c),
            None => f(&Collection::default()),
        }
    }

    fn insert_into(
        &self,
        collection: &mut Collection,
        document: &Document,
    ) -> Result<Value, MemoryError> {
        let mut document = document.clone();
        let id = match document.get(ID_FIELD) {
            Some(id) => id.clone(),
            None => {
                let id = self.generate_id();
                document.insert(ID_FIELD.to_string(), id.clone());
                id
            }
        };
        if let Some(conflict) = collection.conflict(&document, None) {
            return Err(MemoryError::DuplicateKey(conflict));
        }
        collection.documents.push(document);
        Ok(id)
    }

    fn update(
        &self,
        collection: &str,
        filter: &Document,
        set: &Document,
        many: bool,
    ) -> Result<UpdateResult, MemoryError> {
        let mut collections = self.collections.write();
        let Some(collection) = collections.get_mut(collection) else {
            return Ok(UpdateResult::default());
        };

        let positions: Vec<usize> = collection.matching(filter).collect();
        let positions = if many { &positions[..] } else { &positions[..positions.len().min(1)] };

        let mut result = UpdateResult::default();
        for &i in positions {
            result.matched_count += 1;
            let current = &collection.documents[i];
            if let Some(id) = set.get(ID_FIELD) {
                if current.get(ID_FIELD) != Some(id) {
                    return Err(MemoryError::ImmutableField(ID_FIELD.to_string()));
                }
            }

            let mut updated = current.clone();
            for (field, value) in set {
                updated.insert(field.clone(), value.clone());
            }
            if &updated == current {
                continue;
            }
            if let Some(conflict) = collection.conflict(&updated, Some(i)) {
                return Err(MemoryError::DuplicateKey(conflict));
            }
            collection.documents[i] = updated;
            result.modified_count += 1;
        }
        Ok(result)
    }

    fn delete(
        &self,
        collection: &str,
        filter: &Document,
        many: bool,
    ) -> Result<DeleteResult, MemoryError> {
        let mut collections = self.collections.write();
        let Some(collection) = collections.get_mut(collection) else {
            return Ok(DeleteResult::default());
        };

        let mut positions: Vec<usize> = collection.matching(filter).collect();
        if !many {
            positions.truncate(1);
        }
        for &i in positions.iter().rev() {
            collection.documents.remove(i);
        }
        Ok(DeleteResult {
            deleted_count: positions.len() as u64,
        })
    }
}

#[async_trait]
impl DocumentBackend for MemoryDocumentStore {
    type Error = MemoryError;

    async fn find(
        &self,
        collection: &str,
        filter: &Document,
        options: FindOptions,
    ) -> Result<Vec<Document>, MemoryError> {
        Ok(self.read(collection, |c| {
            let limit = options.limit.unwrap_or(u64::MAX) as usize;
            c.matching(filter)
                .skip(options.skip as usize)
                .take(limit)
                .map(|i| c.documents[i].clone())
                .collect()
        }))
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Document,
    ) -> Result<Option<Document>, MemoryError> {
        Ok(self.read(collection, |c| {
            c.matching(filter).next().map(|i| c.documents[i].clone())
        }))
    }

    async fn count_documents(
        &self,
        collection: &str,
        filter: &Document,
    ) -> Result<u64, MemoryError> {
        Ok(self.read(collection, |c| c.matching(filter).count() as u64))
    }

    async fn distinct(
        &self,
        collection: &str,
        field: &str,
        filter: &Document,
    ) -> Result<Vec<Value>, MemoryError> {
        Ok(self.read(collection, |c| {
            let mut seen = BTreeSet::new();
            c.matching(filter)
                .filter_map(|i| c.documents[i].get(field))
                .filter(|value| seen.insert(value.to_string()))
                .cloned()
                .collect()
        }))
    }

    async fn insert_one(
        &self,
        collection: &str,
        document: &Document,
    ) -> Result<InsertOneResult, MemoryError> {
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        let inserted_id = self.insert_into(target, document)?;
        Ok(InsertOneResult { inserted_id })
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: &[Document],
    ) -> Result<InsertManyResult, MemoryError> {
        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        let inserted_ids = documents
            .iter()
            .map(|document| self.insert_into(target, document))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(InsertManyResult { inserted_ids })
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Document,
        set: &Document,
    ) -> Result<UpdateResult, MemoryError> {
        self.update(collection, filter, set, false)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Document,
        set: &Document,
    ) -> Result<UpdateResult, MemoryError> {
        self.update(collection, filter, set, true)
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: &Document,
        replacement: &Document,
    ) -> Result<UpdateResult, MemoryError> {
        let mut collections = self.collections.write();
        let Some(collection) = collections.get_mut(collection) else {
            return Ok(UpdateResult::default());
        };
        let Some(i) = collection.matching(filter).next() else {
            return Ok(UpdateResult::default());
        };

        let current = &collection.documents[i];
        let id = current.get(ID_FIELD).cloned().unwrap_or(Value::Null);
        if replacement.get(ID_FIELD).is_some_and(|new_id| *new_id != id) {
            return Err(MemoryError::ImmutableField(ID_FIELD.to_string()));
        }

        let mut replaced = replacement.clone();
        replaced.insert(ID_FIELD.to_string(), id);
        let modified = &replaced != current;
        if let Some(conflict) = collection.conflict(&replaced, Some(i)) {
            return Err(MemoryError::DuplicateKey(conflict));
        }
        collection.documents[i] = replaced;
        Ok(UpdateResult {
            matched_count: 1,
            modified_count: modified as u64,
        })
    }

    async fn delete_one(
        &self,
        collection: &str,
        filter: &Document,
    ) -> Result<DeleteResult, MemoryError> {
        self.delete(collection, filter, false)
    }

    async fn delete_many(
        &self,
        collection: &str,
        filter: &Document,
    ) -> Result<DeleteResult, MemoryError> {
        self.delete(collection, filter, true)
    }

    async fn create_collection(&self, name: &str) -> Result<(), MemoryError> {
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Err(MemoryError::CollectionExists(name.to_string()));
        }
        collections.insert(name.to_string(), Collection::default());
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<bool, MemoryError> {
        Ok(self.collections.write().remove(name).is_some())
    }

    async fn list_collections(&self) -> Result<Vec<String>, MemoryError> {
        Ok(self.collections.read().keys().cloned().collect())
    }

    async fn create_index(
        &self,
        collection: &str,
        keys: &[&str],
        unique: bool,
    ) -> Result<String, MemoryError> {
        let name = keys
            .iter()
            .map(|key| format!("{}_1", key))
            .collect::<Vec<_>>()
            .join("_");
        let index = Index {
            keys: keys.iter().map(|key| key.to_string()).collect(),
            unique,
        };

        let mut collections = self.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        if unique {
            for (i, document) in target.documents.iter().enumerate() {
                let key = Collection::key_of(document, &index.keys);
                if target.documents[i + 1..]
                    .iter()
                    .any(|other| Collection::key_of(other, &index.keys) == key)
                {
                    return Err(MemoryError::DuplicateKey(format!("index {}", name)));
                }
            }
        }
        target.indexes.insert(name.clone(), index);
        Ok(name)
    }

    async fn drop_index(&self, collection: &str, name: &str) -> Result<(), MemoryError> {
        self.collections
            .write()
            .get_mut(collection)
            .and_then(|c| c.indexes.remove(name))
            .map(|_| ())
            .ok_or_else(|| MemoryError::IndexNotFound(name.to_string()))
    }
}
