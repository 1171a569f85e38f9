use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use feedline_domain::{ChatMessage, CounterService, SocialStorage};
use feedline_errors::{FeedError, FeedResult};

use crate::saga::{Saga, SagaStep};

pub const MESSAGE_SAGA: &str = "new_message";

/// 一次消息发送的执行上下文
#[derive(Debug, Clone)]
pub struct MessageSagaContext {
    pub chat_id: i64,
    pub user_from_id: i64,
    pub sent_at: DateTime<Utc>,
    pub text: String,
    /// 保存步骤成功后填入
    pub saved: Option<ChatMessage>,
    pub display_name: Option<String>,
}

impl MessageSagaContext {
    pub fn new(chat_id: i64, user_from_id: i64, sent_at: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            user_from_id,
            sent_at,
            text: text.into(),
            saved: None,
            display_name: None,
        }
    }

    fn saved_message_id(&self) -> FeedResult<i64> {
        self.saved
            .as_ref()
            .map(|m| m.id)
            .ok_or_else(|| FeedError::Internal("消息尚未保存".to_string()))
    }
}

/// 保存消息并解析发送者昵称
pub struct SaveMessageStep {
    storage: Arc<dyn SocialStorage>,
}

impl SaveMessageStep {
    pub fn new(storage: Arc<dyn SocialStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl SagaStep<MessageSagaContext> for SaveMessageStep {
    fn name(&self) -> &str {
        "save_message"
    }

    async fn execute(&self, ctx: &mut MessageSagaContext) -> FeedResult<()> {
        let saved = self
            .storage
            .save_chat_message(ctx.chat_id, ctx.user_from_id, ctx.sent_at, &ctx.text)
            .await?;
        let display_name = self.storage.display_name(saved.user_from).await?;

        ctx.saved = Some(saved);
        ctx.display_name = Some(display_name);
        Ok(())
    }

    /// 已保存的消息不会被撤回
    async fn compensate(&self, ctx: &mut MessageSagaContext) -> FeedResult<()> {
        if let Some(saved) = &ctx.saved {
            info!(
                chat_id = ctx.chat_id,
                message_id = saved.id,
                "消息保留, 不执行撤回"
            );
        }
        Ok(())
    }
}

/// 递增未读计数
pub struct IncrementUnreadStep {
    counter: Arc<dyn CounterService>,
}

impl IncrementUnreadStep {
    pub fn new(counter: Arc<dyn CounterService>) -> Self {
        Self { counter }
    }
}

#[async_trait]
impl SagaStep<MessageSagaContext> for IncrementUnreadStep {
    fn name(&self) -> &str {
        "increment_unread"
    }

    async fn execute(&self, ctx: &mut MessageSagaContext) -> FeedResult<()> {
        if ctx.display_name.is_none() {
            return Err(FeedError::Internal("发送者昵称未解析".to_string()));
        }
        let message_id = ctx.saved_message_id()?;
        self.counter
            .increment_unread(ctx.user_from_id, message_id, ctx.chat_id)
            .await
    }

    async fn compensate(&self, ctx: &mut MessageSagaContext) -> FeedResult<()> {
        let Ok(message_id) = ctx.saved_message_id() else {
            warn!(chat_id = ctx.chat_id, "消息未保存, 跳过计数补偿");
            return Ok(());
        };
        self.counter
            .compensate_increment(ctx.user_from_id, message_id, ctx.chat_id)
            .await
    }
}

/// 构建“保存消息, 递增未读”两步Saga
pub fn message_saga(
    storage: Arc<dyn SocialStorage>,
    counter: Arc<dyn CounterService>,
) -> Saga<MessageSagaContext> {
    Saga::new(MESSAGE_SAGA)
        .with_step(SaveMessageStep::new(storage))
        .with_step(IncrementUnreadStep::new(counter))
}
