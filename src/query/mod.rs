pub mod pattern;
pub mod predicate;

pub use predicate::Predicate;

use crate::core::{Record, Result};
use crate::schema::EntitySchema;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

/// Filter, ordering and limit for a collection read or observation.
///
/// Rows are always tie-broken by id, so results are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    #[serde(default)]
    pub predicate: Predicate,
    #[serde(default)]
    pub order_by: Vec<SortKey>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl QuerySpec {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filter(predicate: Predicate) -> Self {
        Self {
            predicate,
            ..Self::default()
        }
    }

    pub fn order_by(mut self, field: &str) -> Self {
        self.order_by.push(SortKey {
            field: field.into(),
            descending: false,
        });
        self
    }

    pub fn order_by_desc(mut self, field: &str) -> Self {
        self.order_by.push(SortKey {
            field: field.into(),
            descending: true,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Fields whose change can alter membership or order of the result.
    pub fn fields(&self) -> BTreeSet<String> {
        let mut fields = self.predicate.fields();
        fields.extend(self.order_by.iter().map(|k| k.field.clone()));
        fields
    }

    pub fn validate(&self, schema: &EntitySchema) -> Result<()> {
        self.predicate.validate(schema)?;
        for key in &self.order_by {
            Predicate::IsNull(key.field.clone()).validate(schema)?;
        }
        Ok(())
    }

    /// Sort and truncate already-filtered rows.
    pub fn finish(&self, mut rows: Vec<Record>) -> Vec<Record> {
        rows.sort_by(|a, b| self.compare(a, b));
        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }
        rows
    }

    fn compare(&self, a: &Record, b: &Record) -> Ordering {
        for key in &self.order_by {
            let ordering = a.value(&key.field).cmp(&b.value(&key.field));
            let ordering = if key.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.id.cmp(&b.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_orders_and_limits() {
        let rows = vec![
            Record::new("p3").with("create_at", 30),
            Record::new("p1").with("create_at", 10),
            Record::new("p2").with("create_at", 30),
        ];
        let spec = QuerySpec::all().order_by_desc("create_at").limit(2);
        let ids: Vec<String> = spec.finish(rows).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["p2", "p3"]);
    }

    #[test]
    fn test_fields_include_order_keys() {
        let spec = QuerySpec::filter(Predicate::eq("delete_at", 0)).order_by("display_name");
        assert_eq!(
            spec.fields().into_iter().collect::<Vec<_>>(),
            vec!["delete_at", "display_name"]
        );
    }
}
