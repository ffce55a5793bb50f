use super::pattern::eval_like;
use crate::core::{MirrorError, Record, Result, Value};
use crate::schema::EntitySchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Row filter evaluated against a single record.
///
/// Comparisons between incompatible types never match; they do not error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    All,
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    In(String, Vec<Value>),
    IsNull(String),
    Like {
        field: String,
        pattern: String,
        case_sensitive: bool,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Self::Ne(field.into(), value.into())
    }

    pub fn gt(field: &str, value: impl Into<Value>) -> Self {
        Self::Gt(field.into(), value.into())
    }

    pub fn gte(field: &str, value: impl Into<Value>) -> Self {
        Self::Gte(field.into(), value.into())
    }

    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Self::Lt(field.into(), value.into())
    }

    pub fn lte(field: &str, value: impl Into<Value>) -> Self {
        Self::Lte(field.into(), value.into())
    }

    pub fn is_in<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Self::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn like(field: &str, pattern: &str) -> Self {
        Self::Like {
            field: field.into(),
            pattern: pattern.into(),
            case_sensitive: false,
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Self::All => other,
            Self::And(mut parts) => {
                parts.push(other);
                Self::And(parts)
            }
            this => Self::And(vec![this, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Self::Or(mut parts) => {
                parts.push(other);
                Self::Or(parts)
            }
            this => Self::Or(vec![this, other]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::All => true,
            Self::Eq(field, value) => record.value(field) == *value,
            Self::Ne(field, value) => record.value(field) != *value,
            Self::Gt(field, value) => compare(record, field, value) == Some(Ordering::Greater),
            Self::Gte(field, value) => matches!(
                compare(record, field, value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Lt(field, value) => compare(record, field, value) == Some(Ordering::Less),
            Self::Lte(field, value) => matches!(
                compare(record, field, value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::In(field, values) => {
                let actual = record.value(field);
                values.contains(&actual)
            }
            Self::IsNull(field) => record.value(field).is_null(),
            Self::Like {
                field,
                pattern,
                case_sensitive,
            } => match record.value(field) {
                Value::Text(text) => eval_like(&text, pattern, *case_sensitive).unwrap_or(false),
                _ => false,
            },
            Self::And(parts) => parts.iter().all(|p| p.matches(record)),
            Self::Or(parts) => parts.iter().any(|p| p.matches(record)),
            Self::Not(inner) => !inner.matches(record),
        }
    }

    /// Every field the predicate reads.
    pub fn fields(&self) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::All => {}
            Self::Eq(field, _)
            | Self::Ne(field, _)
            | Self::Gt(field, _)
            | Self::Gte(field, _)
            | Self::Lt(field, _)
            | Self::Lte(field, _)
            | Self::In(field, _)
            | Self::IsNull(field)
            | Self::Like { field, .. } => {
                out.insert(field.clone());
            }
            Self::And(parts) | Self::Or(parts) => {
                for part in parts {
                    part.collect_fields(out);
                }
            }
            Self::Not(inner) => inner.collect_fields(out),
        }
    }

    /// An equality the planner can answer from an index: a top-level `Eq`
    /// or one conjunct of a top-level `And`.
    pub fn equality_terms(&self) -> Vec<(&str, &Value)> {
        match self {
            Self::Eq(field, value) => vec![(field.as_str(), value)],
            Self::And(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    Self::Eq(field, value) => Some((field.as_str(), value)),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn validate(&self, schema: &EntitySchema) -> Result<()> {
        for field in self.fields() {
            if !schema.has_field(&field) {
                return Err(MirrorError::UnknownField {
                    entity_type: schema.name().to_string(),
                    field,
                });
            }
        }
        Ok(())
    }
}

impl Default for Predicate {
    fn default() -> Self {
        Self::All
    }
}

fn compare(record: &Record, field: &str, value: &Value) -> Option<Ordering> {
    let actual = record.value(field);
    if actual.is_null() || value.is_null() {
        return None;
    }
    actual.compare(value).ok()
}
