use super::Entity;
use crate::schema::names;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TeamType {
    #[default]
    #[serde(rename = "O")]
    Open,
    #[serde(rename = "I")]
    InviteOnly,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Team {
    pub id: String,
    pub create_at: i64,
    pub update_at: i64,
    pub delete_at: i64,
    pub display_name: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub team_type: TeamType,
    pub allowed_domains: String,
    pub is_group_constrained: bool,
}

impl Entity for Team {
    const ENTITY_TYPE: &'static str = names::TEAM;

    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: String,
    pub create_at: i64,
    pub update_at: i64,
    pub delete_at: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub nickname: String,
    pub email: String,
    pub locale: String,
    pub roles: String,
    pub is_bot: bool,
}

impl User {
    /// "First Last", falling back to the username.
    pub fn full_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.username.clone()
        } else {
            full.to_string()
        }
    }
}

impl Entity for User {
    const ENTITY_TYPE: &'static str = names::USER;

    fn id(&self) -> &str {
        &self.id
    }
}
