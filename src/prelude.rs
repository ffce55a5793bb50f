//! Everything an application embedding the cache usually needs.
//!
//! ```ignore
//! use mirrordb::prelude::*;
//!
//! let store = MirrorStore::open(StoreConfig::persistent("./cache")).await?;
//! let channels = store.observe_active(names::CHANNEL, "display_name", CollectionOptions::default())?;
//! Reconciler::new(store.clone()).apply(batch).await?;
//! ```

pub use crate::core::{MirrorError, Record, Result, Value};
pub use crate::facade::{MirrorStore, StoreConfig};
pub use crate::models::{
    Channel, ChannelInfo, ChannelMembership, ChannelType, Draft, Entity, MyChannel, Post,
    PostsInChannel, PostsInThread, Team, Thread, User,
};
pub use crate::observe::{CollectionOptions, Event, RecordState, Subscription};
pub use crate::query::{Predicate, QuerySpec};
pub use crate::schema::names;
pub use crate::storage::{DurabilityMode, ForeignKeyPolicy, WriteOutcome};
pub use crate::sync::{BatchItem, BatchReport, Reconciler, SyncBatch};
