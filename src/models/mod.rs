//! Typed views of the built-in chat entities.
//!
//! Each model converts to and from a `Record` through serde, so field names
//! follow the registry's snake_case names exactly.

pub mod channel;
pub mod post;
pub mod team;

pub use channel::{Channel, ChannelInfo, ChannelMembership, ChannelType, MyChannel};
pub use post::{Draft, Post, PostsInChannel, PostsInThread, Thread};
pub use team::{Team, TeamType, User};

use crate::core::{Record, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub trait Entity: Serialize + DeserializeOwned {
    /// Registry name of the entity type.
    const ENTITY_TYPE: &'static str;

    fn id(&self) -> &str;

    fn to_record(&self) -> Result<Record> {
        Record::from_json(&serde_json::to_value(self)?)
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(serde_json::from_value(record.to_json())?)
    }
}
