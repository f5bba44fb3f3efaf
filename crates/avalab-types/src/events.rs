use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events pushed to live chat sessions over the WebSocket gateway.
///
/// Serialized flat, e.g. `{"type":"join","chat_id":"…","user_id":"alice"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Another member opened a session on this chat
    Join { chat_id: Uuid, user_id: String },

    /// A member's session on this chat closed
    Leave { chat_id: Uuid, user_id: String },

    /// A message was persisted to this chat
    Message {
        id: Uuid,
        chat_id: Uuid,
        sender_id: String,
        sent_at: DateTime<Utc>,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_invite: bool,
    },
}

impl From<&Message> for ChatEvent {
    fn from(msg: &Message) -> Self {
        Self::Message {
            id: msg.id,
            chat_id: msg.chat_id,
            sender_id: msg.sender_app_id.clone(),
            sent_at: msg.sent_at,
            content: msg.content.clone(),
            is_invite: msg.is_invite,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_serialized_flat() {
        let chat_id = Uuid::nil();
        let json = serde_json::to_value(ChatEvent::Join {
            chat_id,
            user_id: "alice".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "join");
        assert_eq!(json["user_id"], "alice");
        assert_eq!(json["chat_id"], chat_id.to_string());
    }

    #[test]
    fn plain_message_omits_invite_flag() {
        let msg = Message {
            id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
            sender_app_id: "bob".into(),
            content: "yo".into(),
            sent_at: Utc::now(),
            is_invite: false,
        };
        let json = serde_json::to_value(ChatEvent::from(&msg)).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["sender_id"], "bob");
        assert_eq!(json["content"], "yo");
        assert!(json.get("is_invite").is_none());
    }
}
