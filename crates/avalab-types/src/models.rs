use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::members::MemberSet;

/// The part of a profile the messaging core cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRef {
    pub internal_id: Uuid,
    pub app_id: String,
    pub display_name: Option<String>,
    pub avatar_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub internal_id: Uuid,
    pub app_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    /// Open to team offers.
    pub do_search: bool,
    pub stack: Option<String>,
    pub links: Vec<String>,
    pub avatar_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn to_ref(&self) -> ProfileRef {
        ProfileRef {
            internal_id: self.internal_id,
            app_id: self.app_id.clone(),
            display_name: self.display_name.clone(),
            avatar_path: self.avatar_path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub app_id: String,
    pub owner_app_id: String,
    pub title: String,
    pub description: Option<String>,
    pub members: MemberSet,
    pub missing_roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: Uuid,
    pub is_group: bool,
    pub team_app_id: Option<String>,
    pub members: MemberSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_app_id: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub is_invite: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Rejected,
}

impl InviteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invite {
    pub id: Uuid,
    pub message_id: Uuid,
    pub chat_id: Uuid,
    pub sender_app_id: String,
    pub receiver_app_id: String,
    pub team_app_id: String,
    pub status: InviteStatus,
}

/// A chat together with its most recent message, for chat lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSummary {
    pub chat: Chat,
    pub latest: Option<Message>,
}
