//! Request and response snapshots.
//!
//! A [`Payload`] is a string-keyed JSON map describing the arguments or the
//! result of a proxied call. Building one is best-effort: fields that fail to
//! serialize are dropped and reported through `tracing`, never as an error.

use serde::Serialize;
use serde_json::{Map, Value};

/// Structured snapshot attached to a [`CommandRecord`](crate::CommandRecord).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    /// Create an empty payload.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Add a field. Values that cannot be serialized are skipped.
    pub fn arg<T: Serialize + ?Sized>(mut self, key: &str, value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.0.insert(key.to_string(), value);
            }
            Err(e) => {
                tracing::debug!(field = key, error = %e, "dropping unserializable payload field");
            }
        }
        self
    }

    /// Snapshot a whole value.
    ///
    /// Objects become the payload's fields; any other JSON value is stored
    /// under `"value"`.
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(Value::Object(map)) => Self(map),
            Ok(other) => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                Self(map)
            }
            Err(e) => {
                tracing::debug!(error = %e, "dropping unserializable payload");
                Self::new()
            }
        }
    }

    /// Get a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the payload has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Convert into a JSON object value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Replace the payload with a marker if its serialized form exceeds `max_bytes`.
    pub(crate) fn limit(self, max_bytes: Option<usize>) -> Self {
        let Some(max_bytes) = max_bytes else {
            return self;
        };
        let size = match serde_json::to_vec(&self.0) {
            Ok(bytes) => bytes.len(),
            Err(_) => return Self::new(),
        };
        if size <= max_bytes {
            return self;
        }
        Self::new().arg("truncated", &true).arg("bytes", &size)
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::Error as _;
    use serde_json::json;

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("refusing to serialize"))
        }
    }

    #[test]
    fn test_arg_builds_map() {
        let payload = Payload::new().arg("key", "user:1").arg("ttl", &30u64);
        assert_eq!(payload.len(), 2);
        assert_eq!(payload.get("key"), Some(&json!("user:1")));
        assert_eq!(payload.get("ttl"), Some(&json!(30)));
    }

    #[test]
    fn test_unserializable_field_is_skipped() {
        let payload = Payload::new()
            .arg("bad", &Unserializable)
            .arg("good", &1);
        assert_eq!(payload.len(), 1);
        assert!(payload.get("bad").is_none());
    }

    #[test]
    fn test_of_object_and_scalar() {
        let object = Payload::of(&json!({"a": 1, "b": [1, 2]}));
        assert_eq!(object.get("a"), Some(&json!(1)));

        let scalar = Payload::of(&42);
        assert_eq!(scalar.get("value"), Some(&json!(42)));

        assert!(Payload::of(&Unserializable).is_empty());
    }

    #[test]
    fn test_limit() {
        let payload = Payload::new().arg("blob", &"x".repeat(100));
        assert_eq!(payload.clone().limit(None), payload);
        assert_eq!(payload.clone().limit(Some(1024)), payload);

        let truncated = payload.limit(Some(16));
        assert_eq!(truncated.get("truncated"), Some(&json!(true)));
        assert!(truncated.get("blob").is_none());
    }
}
