use super::{MirrorError, Result, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A row of an entity table: the remote id plus named field values.
///
/// Incoming records may be partial; the store merges them field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(flatten)]
    fields: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Field lookup. `"id"` resolves to the record id.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn value(&self, field: &str) -> Value {
        if field == "id" {
            return Value::Text(self.id.clone());
        }
        self.fields.get(field).cloned().unwrap_or(Value::Null)
    }

    pub fn get_i64(&self, field: &str) -> Option<i64> {
        self.get(field).and_then(Value::as_i64)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    pub fn get_bool(&self, field: &str) -> bool {
        self.get(field).map(Value::as_bool).unwrap_or(false)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("id".into(), serde_json::Value::String(self.id.clone()));
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.to_json());
        }
        serde_json::Value::Object(map)
    }

    /// Build a record from a JSON object carrying a string `id`.
    pub fn from_json(json: &serde_json::Value) -> Result<Self> {
        let obj = json.as_object().ok_or_else(|| {
            MirrorError::Serialization(format!("Expected a JSON object, got {}", json))
        })?;
        let id = obj
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| MirrorError::Serialization("Record is missing a string 'id'".into()))?;

        let mut record = Record::new(id);
        for (name, value) in obj {
            if name != "id" {
                record.set(name.clone(), Value::from_json(value));
            }
        }
        Ok(record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Float,
    Text,
    Boolean,
}

impl FieldType {
    pub fn is_compatible(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::Integer, Value::Integer(_)) => true,
            (Self::Float, Value::Float(_)) => true,
            (Self::Float, Value::Integer(_)) => true,
            (Self::Text, Value::Text(_)) => true,
            (Self::Boolean, Value::Boolean(_)) => true,
            _ => false,
        }
    }

    /// Zero value used to complete new rows when a field has no explicit default.
    pub fn zero(&self) -> Value {
        match self {
            Self::Integer => Value::Integer(0),
            Self::Float => Value::Float(0.0),
            Self::Text => Value::Text(String::new()),
            Self::Boolean => Value::Boolean(false),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "INTEGER"),
            Self::Float => write!(f, "FLOAT"),
            Self::Text => write!(f, "TEXT"),
            Self::Boolean => write!(f, "BOOLEAN"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_json_round_trip_keeps_id_out_of_fields() {
        let json = serde_json::json!({"id": "c1", "name": "town-square", "delete_at": 0});
        let record = Record::from_json(&json).unwrap();
        assert_eq!(record.id, "c1");
        assert!(!record.contains("id"));
        assert_eq!(record.get_i64("delete_at"), Some(0));
        assert_eq!(record.value("id"), Value::Text("c1".into()));
        assert_eq!(record.to_json(), json);
    }

    #[test]
    fn test_record_serde_is_flat() {
        let record: Record =
            serde_json::from_str(r#"{"id":"p1","message":"hi","create_at":10}"#).unwrap();
        assert_eq!(record.get_str("message"), Some("hi"));
        assert_eq!(record.get_i64("create_at"), Some(10));
    }

    #[test]
    fn test_type_compatibility() {
        assert!(FieldType::Integer.is_compatible(&Value::Integer(42)));
        assert!(FieldType::Integer.is_compatible(&Value::Null));
        assert!(FieldType::Float.is_compatible(&Value::Integer(1)));
        assert!(!FieldType::Integer.is_compatible(&Value::Text("hello".into())));
    }
}
