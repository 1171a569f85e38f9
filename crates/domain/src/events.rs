//! 推送事件
//!
//! 事件是封闭的和类型：线上格式为 `{"type": "...", "data": {...}}`，
//! 经由事件总线按分片路由到持有用户长连接的网关实例。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::Chat;
use feedline_errors::{FeedError, FeedResult};

/// 好友发布新动态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostNotice {
    pub user_from: String,
    pub title: String,
    pub message: String,
}

/// 客户端展示用的聊天消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: i64,
    pub user_from: String,
    pub date: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessageNotice {
    pub chat: Chat,
    pub message: MessageView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInviteNotice {
    pub chat: Chat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    #[serde(rename = "post")]
    Post(PostNotice),
    #[serde(rename = "message")]
    ChatMessage(ChatMessageNotice),
    #[serde(rename = "invite")]
    ChatInvite(ChatInviteNotice),
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::Post(_) => "post",
            Event::ChatMessage(_) => "message",
            Event::ChatInvite(_) => "invite",
        }
    }

    pub fn to_json(&self) -> FeedResult<String> {
        serde_json::to_string(self)
            .map_err(|e| FeedError::Serialization(format!("序列化事件失败: {e}")))
    }

    pub fn from_json(data: &str) -> FeedResult<Self> {
        serde_json::from_str(data).map_err(|e| FeedError::malformed(format!("事件: {e}")))
    }
}

/// 事件总线边界上的信封，路由分片决定投递到哪个分区
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    pub target_user_id: i64,
    pub routing_shard: String,
    pub event: Event,
}

impl OutboundEnvelope {
    pub fn new(target_user_id: i64, routing_shard: impl Into<String>, event: Event) -> Self {
        Self {
            target_user_id,
            routing_shard: routing_shard.into(),
            event,
        }
    }

    pub fn to_bytes(&self) -> FeedResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| FeedError::Serialization(format!("序列化事件信封失败: {e}")))
    }

    pub fn from_bytes(bytes: &[u8]) -> FeedResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| FeedError::malformed(format!("事件信封: {e}")))
    }

    /// 转换为网关投递给客户端的消息
    pub fn into_user_event(self) -> FeedResult<UserEvent> {
        let message = self.event.to_json()?;
        Ok(UserEvent {
            user_id: self.target_user_id,
            event_type: self.event.event_type(),
            message,
        })
    }
}

/// 网关层面的投递单元：目标用户 + 已序列化的事件文本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEvent {
    pub user_id: i64,
    pub event_type: &'static str,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn post_event() -> Event {
        Event::Post(PostNotice {
            user_from: "Alice".to_string(),
            title: "t".to_string(),
            message: "m".to_string(),
        })
    }

    #[test]
    fn test_event_wire_format() {
        let value: serde_json::Value = serde_json::from_str(&post_event().to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "post", "data": {"user_from": "Alice", "title": "t", "message": "m"}})
        );
    }

    #[test]
    fn test_event_type_matches_tag() {
        let chat = Chat {
            id: 3,
            title: "team".to_string(),
            created_at: Utc::now(),
            closed: false,
        };
        let invite = Event::ChatInvite(ChatInviteNotice { chat: chat.clone() });
        let value: serde_json::Value = serde_json::from_str(&invite.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], invite.event_type());

        let message = Event::ChatMessage(ChatMessageNotice {
            chat,
            message: MessageView {
                id: 1,
                user_from: "Bob".to_string(),
                date: Utc::now(),
                message: "hi".to_string(),
            },
        });
        assert_eq!(message.event_type(), "message");
        assert_eq!(Event::from_json(&message.to_json().unwrap()).unwrap(), message);
    }

    #[test]
    fn test_envelope_into_user_event() {
        let envelope = OutboundEnvelope::new(11, "00001", post_event());
        let bytes = envelope.to_bytes().unwrap();
        let user_event = OutboundEnvelope::from_bytes(&bytes)
            .unwrap()
            .into_user_event()
            .unwrap();
        assert_eq!(user_event.user_id, 11);
        assert_eq!(user_event.event_type, "post");
        assert_eq!(Event::from_json(&user_event.message).unwrap(), post_event());
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        assert!(Event::from_json(r#"{"type":"poke","data":{}}"#).is_err());
    }
}
