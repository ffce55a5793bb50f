//! Built-in schemas for the team-chat cache.

use super::{EntitySchema, FieldDef, SchemaRegistry};
use crate::core::Result;

pub mod names {
    pub const TEAM: &str = "team";
    pub const USER: &str = "user";
    pub const CHANNEL: &str = "channel";
    pub const MY_CHANNEL: &str = "my_channel";
    pub const CHANNEL_MEMBERSHIP: &str = "channel_membership";
    pub const CHANNEL_INFO: &str = "channel_info";
    pub const POST: &str = "post";
    pub const POSTS_IN_CHANNEL: &str = "posts_in_channel";
    pub const POSTS_IN_THREAD: &str = "posts_in_thread";
    pub const DRAFT: &str = "draft";
    pub const THREAD: &str = "thread";
}

use names::*;

fn team() -> EntitySchema {
    EntitySchema::new(TEAM)
        .field(FieldDef::integer("create_at"))
        .field(FieldDef::integer("update_at"))
        .field(FieldDef::integer("delete_at"))
        .field(FieldDef::text("display_name"))
        .field(FieldDef::text("name"))
        .field(FieldDef::text("description"))
        .field(FieldDef::text("type").default_value("O").one_of(&["O", "I"]))
        .field(FieldDef::text("allowed_domains"))
        .field(FieldDef::boolean("is_group_constrained"))
        .has_many("channels", CHANNEL, "team_id")
        .versioned_by("update_at")
        .archived_by("delete_at")
}

fn user() -> EntitySchema {
    EntitySchema::new(USER)
        .field(FieldDef::integer("create_at"))
        .field(FieldDef::integer("update_at"))
        .field(FieldDef::integer("delete_at"))
        .field(FieldDef::text("username"))
        .field(FieldDef::text("first_name"))
        .field(FieldDef::text("last_name"))
        .field(FieldDef::text("nickname"))
        .field(FieldDef::text("email"))
        .field(FieldDef::text("locale").default_value("en"))
        .field(FieldDef::text("roles"))
        .field(FieldDef::boolean("is_bot"))
        .has_many("posts", POST, "user_id")
        .has_many("channel_memberships", CHANNEL_MEMBERSHIP, "user_id")
        .versioned_by("update_at")
        .archived_by("delete_at")
}

fn channel() -> EntitySchema {
    EntitySchema::new(CHANNEL)
        .field(FieldDef::integer("create_at"))
        .field(FieldDef::integer("update_at"))
        .field(FieldDef::integer("delete_at"))
        .field(FieldDef::text("display_name"))
        .field(FieldDef::text("name"))
        .field(FieldDef::text("type").default_value("O").one_of(&["O", "P", "D", "G"]))
        .field(FieldDef::text("team_id").nullable())
        .field(FieldDef::text("creator_id"))
        .field(FieldDef::boolean("is_group_constrained"))
        .field(FieldDef::boolean("shared"))
        .belongs_to("team", TEAM, "team_id")
        .belongs_to("creator", USER, "creator_id")
        .has_many("posts", POST, "channel_id")
        .has_many("posts_in_channel", POSTS_IN_CHANNEL, "channel_id")
        .has_many("drafts", DRAFT, "channel_id")
        .has_many("members", CHANNEL_MEMBERSHIP, "channel_id")
        .one_to_one("membership", MY_CHANNEL)
        .one_to_one("info", CHANNEL_INFO)
        .versioned_by("update_at")
        .archived_by("delete_at")
}

fn my_channel() -> EntitySchema {
    EntitySchema::new(MY_CHANNEL)
        .field(FieldDef::integer("last_post_at"))
        .field(FieldDef::integer("last_viewed_at"))
        .field(FieldDef::boolean("manually_unread"))
        .field(FieldDef::boolean("is_unread"))
        .field(FieldDef::integer("mentions_count"))
        .field(FieldDef::integer("message_count"))
        .field(FieldDef::text("roles"))
        .field(FieldDef::integer("viewed_at"))
        .belongs_to("channel", CHANNEL, "id")
        .shared_identity()
}

fn channel_membership() -> EntitySchema {
    EntitySchema::new(CHANNEL_MEMBERSHIP)
        .field(FieldDef::text("channel_id"))
        .field(FieldDef::text("user_id"))
        .field(FieldDef::boolean("scheme_admin"))
        .belongs_to("channel", CHANNEL, "channel_id")
        .belongs_to("user", USER, "user_id")
        .natural_key(&["channel_id", "user_id"])
        .shared_identity()
}

fn channel_info() -> EntitySchema {
    EntitySchema::new(CHANNEL_INFO)
        .field(FieldDef::text("header"))
        .field(FieldDef::text("purpose"))
        .field(FieldDef::integer("member_count"))
        .field(FieldDef::integer("guest_count"))
        .field(FieldDef::integer("pinned_post_count"))
        .belongs_to("channel", CHANNEL, "id")
        .shared_identity()
}

fn post() -> EntitySchema {
    EntitySchema::new(POST)
        .field(FieldDef::text("channel_id"))
        .field(FieldDef::integer("create_at"))
        .field(FieldDef::integer("update_at"))
        .field(FieldDef::integer("edit_at"))
        .field(FieldDef::integer("delete_at"))
        .field(FieldDef::text("message"))
        .field(FieldDef::text("root_id"))
        .field(FieldDef::text("user_id"))
        .field(FieldDef::text("type"))
        .field(FieldDef::text("pending_post_id"))
        .belongs_to("channel", CHANNEL, "channel_id")
        .belongs_to("author", USER, "user_id")
        .has_many("replies", POST, "root_id")
        .one_to_one("thread", THREAD)
        .versioned_by("update_at")
        .archived_by("delete_at")
}

fn posts_in_channel() -> EntitySchema {
    EntitySchema::new(POSTS_IN_CHANNEL)
        .field(FieldDef::text("channel_id"))
        .field(FieldDef::integer("earliest"))
        .field(FieldDef::integer("latest"))
        .belongs_to("channel", CHANNEL, "channel_id")
}

fn posts_in_thread() -> EntitySchema {
    EntitySchema::new(POSTS_IN_THREAD)
        .field(FieldDef::text("root_id"))
        .field(FieldDef::integer("earliest"))
        .field(FieldDef::integer("latest"))
        .belongs_to("root", POST, "root_id")
}

fn draft() -> EntitySchema {
    EntitySchema::new(DRAFT)
        .field(FieldDef::text("channel_id"))
        .field(FieldDef::text("root_id"))
        .field(FieldDef::text("message"))
        .field(FieldDef::text("files").default_value("[]"))
        .field(FieldDef::integer("update_at"))
        .belongs_to("channel", CHANNEL, "channel_id")
        .natural_key(&["channel_id", "root_id"])
}

fn thread() -> EntitySchema {
    EntitySchema::new(THREAD)
        .field(FieldDef::integer("last_reply_at"))
        .field(FieldDef::integer("last_viewed_at"))
        .field(FieldDef::integer("reply_count"))
        .field(FieldDef::integer("unread_replies"))
        .field(FieldDef::integer("unread_mentions"))
        .field(FieldDef::boolean("is_following"))
        .belongs_to("root", POST, "id")
        .has_many("loaded_ranges", POSTS_IN_THREAD, "root_id")
        .shared_identity()
}

/// Registry with every built-in chat entity type.
pub fn chat_registry() -> Result<SchemaRegistry> {
    let registry = [
        team(),
        user(),
        channel(),
        my_channel(),
        channel_membership(),
        channel_info(),
        post(),
        posts_in_channel(),
        posts_in_thread(),
        draft(),
        thread(),
    ]
    .into_iter()
    .try_fold(SchemaRegistry::new(), |registry, schema| {
        registry.with_schema(schema)
    })?;
    registry.validate()?;
    Ok(registry)
}

impl SchemaRegistry {
    pub fn chat() -> Result<Self> {
        chat_registry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DeletePolicy, IdentityScope, RelationKind};

    #[test]
    fn test_chat_registry_is_consistent() {
        let registry = chat_registry().unwrap();
        assert_eq!(registry.list().len(), 11);

        let channel = registry.get(CHANNEL).unwrap();
        assert_eq!(channel.version_field(), Some("update_at"));
        assert_eq!(channel.archive_field(), Some("delete_at"));
        assert_eq!(
            registry.relation(CHANNEL, "membership").unwrap().kind,
            RelationKind::OneToOne
        );
    }

    #[test]
    fn test_drafts_and_ranges_are_removed_not_archived() {
        let registry = chat_registry().unwrap();
        for name in [DRAFT, POSTS_IN_CHANNEL, POSTS_IN_THREAD] {
            assert_eq!(registry.get(name).unwrap().delete_policy(), &DeletePolicy::Remove);
        }
    }

    #[test]
    fn test_membership_borrows_channel_id() {
        let registry = chat_registry().unwrap();
        assert_eq!(registry.get(MY_CHANNEL).unwrap().identity(), IdentityScope::Shared);
        assert_eq!(registry.get(CHANNEL).unwrap().identity(), IdentityScope::Global);
    }

    #[test]
    fn test_post_indexes() {
        let registry = chat_registry().unwrap();
        assert_eq!(
            registry.indexed_fields(POST).unwrap(),
            vec!["channel_id", "root_id", "user_id"]
        );
        assert_eq!(
            registry.indexed_fields(DRAFT).unwrap(),
            vec!["channel_id"]
        );
    }
}
