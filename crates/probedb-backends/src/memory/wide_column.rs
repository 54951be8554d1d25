//! In-memory wide-column store.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::MemoryError;
use crate::wide_column::{
    AttributeValue, Item, KeySchema, TableDescription, WideColumnBackend,
};

/// Scalar key attribute, ordered the way DynamoDB orders sort keys.
#[derive(Debug, Clone)]
enum KeyPart {
    Number(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl KeyPart {
    fn rank(&self) -> u8 {
        match self {
            KeyPart::Number(_) => 0,
            KeyPart::Text(_) => 1,
            KeyPart::Bytes(_) => 2,
        }
    }
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyPart::Number(a), KeyPart::Number(b)) => a.total_cmp(b),
            (KeyPart::Text(a), KeyPart::Text(b)) => a.cmp(b),
            (KeyPart::Bytes(a), KeyPart::Bytes(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for KeyPart {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyPart {}

impl TryFrom<&AttributeValue> for KeyPart {
    type Error = ();

    fn try_from(value: &AttributeValue) -> Result<Self, ()> {
        match value {
            AttributeValue::S(s) => Ok(KeyPart::Text(s.clone())),
            AttributeValue::N(n) => n.trim().parse().map(KeyPart::Number).map_err(|_| ()),
            AttributeValue::B(b) => Ok(KeyPart::Bytes(b.clone())),
            _ => Err(()),
        }
    }
}

type PrimaryKey = (KeyPart, Option<KeyPart>);

#[derive(Debug)]
struct Table {
    schema: KeySchema,
    items: BTreeMap<PrimaryKey, Item>,
}

impl Table {
    fn key_part(item: &Item, attribute: &str) -> Result<KeyPart, MemoryError> {
        item.get(attribute)
            .and_then(|value| KeyPart::try_from(value).ok())
            .ok_or_else(|| MemoryError::MissingKey(attribute.to_string()))
    }

    fn primary_key(&self, item: &Item) -> Result<PrimaryKey, MemoryError> {
        let partition = Self::key_part(item, &self.schema.partition_key)?;
        let sort = match &self.schema.sort_key {
            Some(attribute) => Some(Self::key_part(item, attribute)?),
            None => None,
        };
        Ok((partition, sort))
    }

    fn describe(&self, name: &str) -> TableDescription {
        TableDescription {
            name: name.to_string(),
            key_schema: self.schema.clone(),
            item_count: self.items.len() as u64,
        }
    }
}

/// DynamoDB-like store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryWideColumn {
    tables: RwLock<BTreeMap<String, Table>>,
}

impl MemoryWideColumn {
    /// Create a store with no tables.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_table<T>(
        &self,
        name: &str,
        f: impl FnOnce(&Table) -> Result<T, MemoryError>,
    ) -> Result<T, MemoryError> {
        let tables = self.tables.read();
        let table = tables
            .get(name)
            .ok_or_else(|| MemoryError::TableNotFound(name.to_string()))?;
        f(table)
    }

    fn with_table_mut<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Table) -> Result<T, MemoryError>,
    ) -> Result<T, MemoryError> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(name)
            .ok_or_else(|| MemoryError::TableNotFound(name.to_string()))?;
        f(table)
    }
}

/// Table named by a `SELECT * FROM "table"` statement.
fn select_all_target(statement: &str) -> Option<&str> {
    let mut words = statement.trim().trim_end_matches(';').split_whitespace();
    let select = words.next()?;
    let star = words.next()?;
    let from = words.next()?;
    let table = words.next()?;
    if words.next().is_some()
        || !select.eq_ignore_ascii_case("SELECT")
        || star != "*"
        || !from.eq_ignore_ascii_case("FROM")
    {
        return None;
    }
    let table = table
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(table);
    (!table.is_empty()).then_some(table)
}

fn limited(items: impl Iterator<Item = Item>, limit: Option<usize>) -> Vec<Item> {
    items.take(limit.unwrap_or(usize::MAX)).collect()
}

#[async_trait]
impl WideColumnBackend for MemoryWideColumn {
    type Error = MemoryError;

    async fn create_table(
        &self,
        name: &str,
        key_schema: &KeySchema,
    ) -> Result<TableDescription, MemoryError> {
        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            return Err(MemoryError::TableExists(name.to_string()));
        }
        let table = Table {
            schema: key_schema.clone(),
            items: BTreeMap::new(),
        };
        let description = table.describe(name);
        tables.insert(name.to_string(), table);
        Ok(description)
    }

    async fn delete_table(&self, name: &str) -> Result<TableDescription, MemoryError> {
        self.tables
            .write()
            .remove(name)
            .map(|table| table.describe(name))
            .ok_or_else(|| MemoryError::TableNotFound(name.to_string()))
    }

    async fn describe_table(&self, name: &str) -> Result<TableDescription, MemoryError> {
        self.with_table(name, |table| Ok(table.describe(name)))
    }

    async fn list_tables(&self) -> Result<Vec<String>, MemoryError> {
        Ok(self.tables.read().keys().cloned().collect())
    }

    async fn put_item(&self, table: &str, item: &Item) -> Result<Option<Item>, MemoryError> {
        self.with_table_mut(table, |table| {
            let key = table.primary_key(item)?;
            Ok(table.items.insert(key, item.clone()))
        })
    }

    async fn get_item(&self, table: &str, key: &Item) -> Result<Option<Item>, MemoryError> {
        self.with_table(table, |table| {
            let key = table.primary_key(key)?;
            Ok(table.items.get(&key).cloned())
        })
    }

    async fn update_item(
        &self,
        table: &str,
        key: &Item,
        updates: &Item,
    ) -> Result<Item, MemoryError> {
        self.with_table_mut(table, |table| {
            if let Some(attribute) = table
                .schema
                .attributes()
                .find(|attribute| updates.contains_key(*attribute))
            {
                return Err(MemoryError::ImmutableField(attribute.to_string()));
            }

            let primary = table.primary_key(key)?;
            let item = table.items.entry(primary).or_insert_with(|| {
                table_key_attributes(&table.schema, key)
            });
            for (attribute, value) in updates {
                item.insert(attribute.clone(), value.clone());
            }
            Ok(item.clone())
        })
    }

    async fn delete_item(&self, table: &str, key: &Item) -> Result<Option<Item>, MemoryError> {
        self.with_table_mut(table, |table| {
            let key = table.primary_key(key)?;
            Ok(table.items.remove(&key))
        })
    }

    async fn query_partition(
        &self,
        table: &str,
        partition: &AttributeValue,
        limit: Option<usize>,
    ) -> Result<Vec<Item>, MemoryError> {
        self.with_table(table, |table| {
            let partition = KeyPart::try_from(partition)
                .map_err(|_| MemoryError::MissingKey(table.schema.partition_key.clone()))?;
            let found = table
                .items
                .iter()
                .filter(|((pk, _), _)| *pk == partition)
                .map(|(_, item)| item.clone());
            Ok(limited(found, limit))
        })
    }

    async fn scan(&self, table: &str, limit: Option<usize>) -> Result<Vec<Item>, MemoryError> {
        self.with_table(table, |table| {
            Ok(limited(table.items.values().cloned(), limit))
        })
    }

    async fn batch_get_item(&self, table: &str, keys: &[Item]) -> Result<Vec<Item>, MemoryError> {
        self.with_table(table, |table| {
            let mut found = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(item) = table.items.get(&table.primary_key(key)?) {
                    found.push(item.clone());
                }
            }
            Ok(found)
        })
    }

    async fn batch_write_item(
        &self,
        table: &str,
        puts: &[Item],
        deletes: &[Item],
    ) -> Result<(), MemoryError> {
        self.with_table_mut(table, |table| {
            let puts = puts
                .iter()
                .map(|item| Ok((table.primary_key(item)?, item.clone())))
                .collect::<Result<Vec<_>, MemoryError>>()?;
            let deletes = deletes
                .iter()
                .map(|key| table.primary_key(key))
                .collect::<Result<Vec<_>, _>>()?;

            table.items.extend(puts);
            for key in deletes {
                table.items.remove(&key);
            }
            Ok(())
        })
    }

    async fn execute_statement(&self, statement: &str) -> Result<Vec<Item>, MemoryError> {
        let target = select_all_target(statement)
            .ok_or_else(|| MemoryError::Unsupported(statement.to_string()))?;
        self.with_table(target, |table| Ok(table.items.values().cloned().collect()))
    }
}

/// The key attributes of `key`, as the seed of a new item.
fn table_key_attributes(schema: &KeySchema, key: &Item) -> Item {
    schema
        .attributes()
        .filter_map(|attribute| {
            key.get(attribute)
                .map(|value| (attribute.to_string(), value.clone()))
        })
        .collect()
}
