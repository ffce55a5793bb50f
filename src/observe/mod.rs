// ============================================================================
// Observation Layer
// ============================================================================
//
// Record and collection subscriptions over committed state. Every
// subscription emits its current value on registration, then again after
// each relevant commit whose result differs from the previous emission.
//
// ============================================================================

pub mod hub;
pub mod query;
pub mod subscription;

pub use hub::{ObservationHub, SubscriptionId};
pub use query::{
    CollectionOptions, CollectionQuery, Observable, RecordQuery, RecordState, RelatedRecordQuery,
};
pub use subscription::{Event, Subscription};
