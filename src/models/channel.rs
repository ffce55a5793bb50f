use super::Entity;
use crate::schema::names;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChannelType {
    #[default]
    #[serde(rename = "O")]
    Open,
    #[serde(rename = "P")]
    Private,
    #[serde(rename = "D")]
    Direct,
    #[serde(rename = "G")]
    Group,
}

impl ChannelType {
    /// Direct and group messages do not belong to a team.
    pub fn is_team_scoped(&self) -> bool {
        matches!(self, ChannelType::Open | ChannelType::Private)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Channel {
    pub id: String,
    pub create_at: i64,
    pub update_at: i64,
    pub delete_at: i64,
    pub display_name: String,
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub team_id: Option<String>,
    pub creator_id: String,
    pub is_group_constrained: bool,
    pub shared: bool,
}

impl Channel {
    pub fn new(id: &str, display_name: &str, channel_type: ChannelType) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            name: display_name.to_lowercase().replace(' ', "-"),
            channel_type,
            ..Self::default()
        }
    }

    pub fn in_team(mut self, team_id: &str) -> Self {
        self.team_id = Some(team_id.to_string());
        self
    }

    pub fn is_active(&self) -> bool {
        self.delete_at == 0
    }
}

impl Entity for Channel {
    const ENTITY_TYPE: &'static str = names::CHANNEL;

    fn id(&self) -> &str {
        &self.id
    }
}

/// The current user's membership in a channel; shares the channel's id.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MyChannel {
    #[serde(rename = "id")]
    pub channel_id: String,
    pub last_post_at: i64,
    pub last_viewed_at: i64,
    pub manually_unread: bool,
    pub is_unread: bool,
    pub mentions_count: i64,
    pub message_count: i64,
    pub roles: String,
    pub viewed_at: i64,
}

impl MyChannel {
    pub fn new(channel_id: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            ..Self::default()
        }
    }
}

impl Entity for MyChannel {
    const ENTITY_TYPE: &'static str = names::MY_CHANNEL;

    fn id(&self) -> &str {
        &self.channel_id
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelMembership {
    pub id: String,
    pub channel_id: String,
    pub user_id: String,
    pub scheme_admin: bool,
}

impl ChannelMembership {
    /// Membership ids are derived from the pair they join.
    pub fn new(channel_id: &str, user_id: &str) -> Self {
        Self {
            id: format!("{}-{}", channel_id, user_id),
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
            scheme_admin: false,
        }
    }
}

impl Entity for ChannelMembership {
    const ENTITY_TYPE: &'static str = names::CHANNEL_MEMBERSHIP;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelInfo {
    pub id: String,
    pub header: String,
    pub purpose: String,
    pub member_count: i64,
    pub guest_count: i64,
    pub pinned_post_count: i64,
}

impl Entity for ChannelInfo {
    const ENTITY_TYPE: &'static str = names::CHANNEL_INFO;

    fn id(&self) -> &str {
        &self.id
    }
}
