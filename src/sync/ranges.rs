//! Coalescing of loaded-history windows.
//!
//! A window is an inclusive `[earliest, latest]` span of `create_at` values
//! for one owner (a channel or a thread root). Stored windows of one owner
//! never overlap or touch; a new window swallows every stored window it
//! overlaps or touches.

use crate::core::{MirrorError, Result};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub earliest: i64,
    pub latest: i64,
}

impl Span {
    pub fn new(earliest: i64, latest: i64) -> Result<Self> {
        if earliest > latest {
            return Err(MirrorError::ConstraintViolation(format!(
                "Range earliest {} is after latest {}",
                earliest, latest
            )));
        }
        Ok(Self { earliest, latest })
    }

    /// Overlapping or sharing an endpoint.
    pub fn touches(&self, other: &Span) -> bool {
        self.earliest <= other.latest && other.earliest <= self.latest
    }

    pub fn contains(&self, other: &Span) -> bool {
        self.earliest <= other.earliest && other.latest <= self.latest
    }

    pub fn union(&self, other: &Span) -> Span {
        Span {
            earliest: self.earliest.min(other.earliest),
            latest: self.latest.max(other.latest),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRange {
    pub id: String,
    pub span: Span,
}

/// What to do with the stored windows of one owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeMerge {
    /// Already inside a stored window.
    Covered { id: String },
    /// No stored window overlaps; store a new one.
    Insert { id: String, span: Span },
    /// Widen `keep` to `span` and remove the swallowed windows.
    Merge {
        keep: String,
        span: Span,
        removed: Vec<String>,
    },
}

/// Deterministic id for a window that starts a new run of history.
pub fn range_id(entity_type: &str, owner: &str, span: Span) -> String {
    let name = format!("{}:{}:{}:{}", entity_type, owner, span.earliest, span.latest);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

pub fn coalesce(stored: &[StoredRange], incoming: Span, new_id: impl FnOnce() -> String) -> RangeMerge {
    if let Some(covering) = stored.iter().find(|r| r.span.contains(&incoming)) {
        return RangeMerge::Covered {
            id: covering.id.clone(),
        };
    }

    let mut touching: Vec<&StoredRange> = stored
        .iter()
        .filter(|r| r.span.touches(&incoming))
        .collect();
    if touching.is_empty() {
        return RangeMerge::Insert {
            id: new_id(),
            span: incoming,
        };
    }

    touching.sort_by(|a, b| {
        a.span
            .earliest
            .cmp(&b.span.earliest)
            .then_with(|| a.id.cmp(&b.id))
    });
    let span = touching
        .iter()
        .fold(incoming, |acc, r| acc.union(&r.span));
    let keep = touching[0].id.clone();
    let removed = touching[1..].iter().map(|r| r.id.clone()).collect();
    RangeMerge::Merge {
        keep,
        span,
        removed,
    }
}
