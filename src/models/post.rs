use super::Entity;
use crate::schema::names;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Post {
    pub id: String,
    pub channel_id: String,
    pub create_at: i64,
    pub update_at: i64,
    pub edit_at: i64,
    pub delete_at: i64,
    pub message: String,
    /// Empty unless the post is a reply.
    pub root_id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub post_type: String,
    pub pending_post_id: String,
}

impl Post {
    pub fn new(id: &str, channel_id: &str, create_at: i64, message: &str) -> Self {
        Self {
            id: id.to_string(),
            channel_id: channel_id.to_string(),
            create_at,
            update_at: create_at,
            message: message.to_string(),
            ..Self::default()
        }
    }

    pub fn reply_to(mut self, root_id: &str) -> Self {
        self.root_id = root_id.to_string();
        self
    }

    pub fn is_reply(&self) -> bool {
        !self.root_id.is_empty()
    }
}

impl Entity for Post {
    const ENTITY_TYPE: &'static str = names::POST;

    fn id(&self) -> &str {
        &self.id
    }
}

/// A contiguous window of a channel's history known to be fully loaded.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PostsInChannel {
    pub id: String,
    pub channel_id: String,
    pub earliest: i64,
    pub latest: i64,
}

impl Entity for PostsInChannel {
    const ENTITY_TYPE: &'static str = names::POSTS_IN_CHANNEL;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Loaded window of a thread's replies.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PostsInThread {
    pub id: String,
    pub root_id: String,
    pub earliest: i64,
    pub latest: i64,
}

impl Entity for PostsInThread {
    const ENTITY_TYPE: &'static str = names::POSTS_IN_THREAD;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Draft {
    pub id: String,
    pub channel_id: String,
    pub root_id: String,
    pub message: String,
    /// JSON-encoded attachment list.
    pub files: String,
    pub update_at: i64,
}

impl Draft {
    pub fn new(id: &str, channel_id: &str, message: &str) -> Self {
        Self {
            id: id.to_string(),
            channel_id: channel_id.to_string(),
            message: message.to_string(),
            files: "[]".to_string(),
            ..Self::default()
        }
    }

    pub fn reply_to(mut self, root_id: &str) -> Self {
        self.root_id = root_id.to_string();
        self
    }
}

impl Entity for Draft {
    const ENTITY_TYPE: &'static str = names::DRAFT;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Thread state keyed by its root post id.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Thread {
    pub id: String,
    pub last_reply_at: i64,
    pub last_viewed_at: i64,
    pub reply_count: i64,
    pub unread_replies: i64,
    pub unread_mentions: i64,
    pub is_following: bool,
}

impl Entity for Thread {
    const ENTITY_TYPE: &'static str = names::THREAD;

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_round_trip_through_record() {
        let post = Post::new("p2", "c1", 100, "hello").reply_to("p1");
        assert!(post.is_reply());
        let record = post.to_record().unwrap();
        assert_eq!(record.get_str("type"), Some(""));
        assert_eq!(record.get_i64("create_at"), Some(100));
        assert_eq!(Post::from_record(&record).unwrap(), post);
    }

    #[test]
    fn test_partial_record_fills_defaults() {
        let record = crate::core::Record::new("d1").with("channel_id", "c1");
        let draft = Draft::from_record(&record).unwrap();
        assert_eq!(draft.root_id, "");
        assert_eq!(draft.update_at, 0);
    }
}
