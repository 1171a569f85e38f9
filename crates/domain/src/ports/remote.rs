use async_trait::async_trait;

use feedline_errors::FeedResult;

/// 远程未读计数服务
#[async_trait]
pub trait CounterService: Send + Sync {
    async fn increment_unread(&self, user_id: i64, message_id: i64, chat_id: i64) -> FeedResult<()>;

    /// 撤销一次 `increment_unread`
    async fn compensate_increment(&self, user_id: i64, message_id: i64, chat_id: i64) -> FeedResult<()>;
}
