use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{ChatMessage, Post, UserProfile};
use feedline_errors::FeedResult;

/// 社交关系与内容存储
#[async_trait]
pub trait SocialStorage: Send + Sync {
    /// 关注该用户的人
    async fn followers(&self, user_id: i64) -> FeedResult<Vec<i64>>;

    async fn friend_ids(&self, user_id: i64) -> FeedResult<Vec<i64>>;

    /// 一组作者的最新动态，按创建时间倒序，最多 `limit` 条
    async fn recent_posts_by_authors(&self, authors: &[i64], limit: usize) -> FeedResult<Vec<Post>>;

    async fn profile(&self, user_id: i64) -> FeedResult<UserProfile>;

    async fn display_name(&self, user_id: i64) -> FeedResult<String>;

    async fn create_post(&self, user_id: i64, title: &str, message: &str) -> FeedResult<Post>;

    async fn add_friend(&self, user_id: i64, friend_id: i64) -> FeedResult<()>;

    async fn remove_friend(&self, user_id: i64, friend_id: i64) -> FeedResult<()>;

    async fn save_chat_message(
        &self,
        chat_id: i64,
        from_id: i64,
        sent_at: DateTime<Utc>,
        text: &str,
    ) -> FeedResult<ChatMessage>;
}

/// 按用户存放预计算动态的缓存，值为不透明字节
#[async_trait]
pub trait FeedCache: Send + Sync {
    async fn store(&self, user_id: i64, feed: &[u8]) -> FeedResult<()>;

    async fn load(&self, user_id: i64) -> FeedResult<Option<Vec<u8>>>;
}
