use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use feedline_errors::{FeedError, FeedResult};

/// 用户发布的动态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted: bool,
}

impl Post {
    pub fn new(id: i64, user_id: i64, title: impl Into<String>, message: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            title: title.into(),
            message: message.into(),
            created_at: now,
            updated_at: now,
            deleted: false,
        }
    }
}

/// 用户资料中与推送路由相关的部分
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: i64,
    pub display_name: String,
    /// 用户长连接所在网关实例的分片标识
    pub shard_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub closed: bool,
}

/// 已持久化的聊天消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub chat_id: i64,
    pub user_from: i64,
    pub send_at: DateTime<Utc>,
    pub message: String,
}

/// 缓存的好友动态列表，按创建时间倒序
///
/// 序列化结果只取决于列表内容，同样的数据重复编码得到完全相同的字节。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CachedFeed {
    pub posts: Vec<Post>,
}

impl CachedFeed {
    pub fn new(posts: Vec<Post>) -> Self {
        Self { posts }
    }

    pub fn encode(&self) -> FeedResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| FeedError::Serialization(format!("序列化动态缓存失败: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> FeedResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| FeedError::Serialization(format!("反序列化动态缓存失败: {e}")))
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cached_feed_encoding_is_stable() {
        let feed = CachedFeed::new(vec![Post::new(2, 7, "b", "second"), Post::new(1, 7, "a", "first")]);
        let first = feed.encode().unwrap();
        let second = feed.encode().unwrap();
        assert_eq!(first, second);

        let decoded = CachedFeed::decode(&first).unwrap();
        assert_eq!(decoded, feed);
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn test_cached_feed_is_a_plain_list_on_the_wire() {
        let bytes = CachedFeed::default().encode().unwrap();
        assert_eq!(bytes, b"[]");
    }
}
