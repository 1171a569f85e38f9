use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use feedline_config::ChatConfig;
use feedline_domain::{ChatMessage, CounterService, SocialStorage};
use feedline_errors::{FeedError, FeedResult};
use feedline_infrastructure::{HttpCounterService, InMemoryCounterService};

use crate::message_saga::{message_saga, MessageSagaContext};
use crate::saga::Saga;

/// 发送成功的消息及发送者昵称
#[derive(Debug, Clone, PartialEq)]
pub struct PostedMessage {
    pub message: ChatMessage,
    pub display_name: String,
}

pub struct ChatService {
    saga: Saga<MessageSagaContext>,
}

impl ChatService {
    pub fn new(storage: Arc<dyn SocialStorage>, counter: Arc<dyn CounterService>) -> Self {
        Self {
            saga: message_saga(storage, counter),
        }
    }

    /// 配置了 `counter_url` 时使用HTTP计数服务，否则使用进程内计数
    pub fn from_config(config: &ChatConfig, storage: Arc<dyn SocialStorage>) -> FeedResult<Self> {
        let counter: Arc<dyn CounterService> = match &config.counter_url {
            Some(url) => Arc::new(HttpCounterService::new(url.clone(), config.request_timeout())?),
            None => {
                info!("未配置计数服务地址, 使用进程内计数");
                Arc::new(InMemoryCounterService::new())
            }
        };
        Ok(Self::new(storage, counter))
    }

    /// 保存消息并递增未读计数
    ///
    /// 计数失败时会调用计数补偿，已保存的消息保留；
    /// 返回的错误携带失败步骤名。
    pub async fn post_message(
        &self,
        chat_id: i64,
        user_from_id: i64,
        sent_at: DateTime<Utc>,
        text: &str,
    ) -> FeedResult<PostedMessage> {
        let mut ctx = MessageSagaContext::new(chat_id, user_from_id, sent_at, text);

        if let Err(e) = self.saga.run(&mut ctx).await {
            warn!(chat_id, user_id = user_from_id, step = ?e.failed_step(), "消息发送失败: {}", e);
            return Err(e);
        }

        let (Some(message), Some(display_name)) = (ctx.saved, ctx.display_name) else {
            return Err(FeedError::Internal("Saga完成但上下文不完整".to_string()));
        };
        info!(chat_id, user_id = user_from_id, message_id = message.id, "消息已发送");
        Ok(PostedMessage {
            message,
            display_name,
        })
    }

    /// 以 `(消息, 昵称)` 形式返回结果
    pub async fn run_message_saga(
        &self,
        chat_id: i64,
        user_from_id: i64,
        sent_at: DateTime<Utc>,
        text: &str,
    ) -> FeedResult<(ChatMessage, String)> {
        let posted = self.post_message(chat_id, user_from_id, sent_at, text).await?;
        Ok((posted.message, posted.display_name))
    }
}
