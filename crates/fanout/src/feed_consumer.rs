use async_trait::async_trait;
use tracing::warn;

use crate::feed_service::FeedService;
use feedline_domain::{Delivery, DeliveryHandler, DeliveryOutcome, TaskPayload};
use feedline_errors::FeedResult;

/// `feed` 队列的处理器，重建单个用户的动态缓存
pub struct FeedConsumer {
    feeds: FeedService,
}

impl FeedConsumer {
    pub fn new(feeds: FeedService) -> Self {
        Self { feeds }
    }
}

#[async_trait]
impl DeliveryHandler for FeedConsumer {
    fn name(&self) -> &str {
        "feed-consumer"
    }

    async fn handle(&self, delivery: Delivery) -> FeedResult<DeliveryOutcome> {
        let user_id = match TaskPayload::decode(delivery.payload()) {
            Ok(TaskPayload::FeedRefresh(task)) => task.user_id,
            Ok(other) => {
                warn!("feed队列收到 {} 任务, 拒绝", other.kind());
                return delivery.reject().await;
            }
            Err(e) => {
                warn!("拒绝无法解析的缓存重建任务: {}", e);
                return delivery.reject().await;
            }
        };

        match self.feeds.refresh_feed(user_id).await {
            Ok(_) => delivery.ack().await,
            Err(e) if e.is_retryable() => {
                warn!(user_id, "重建动态缓存失败, 任务放回队列: {}", e);
                delivery.requeue().await
            }
            Err(e) => {
                warn!(user_id, "重建动态缓存失败, 拒绝任务: {}", e);
                delivery.reject().await
            }
        }
    }
}
