use std::sync::Arc;

use tracing::{error, info};

use crate::{FeedConsumer, FeedService, PostConsumer};
use feedline_config::TaskQueueConfig;
use feedline_domain::{EventPublisher, QueueStats, TaskBroker, FEED_QUEUE, POST_QUEUE};
use feedline_errors::FeedResult;
use feedline_infrastructure::{ConsumerPool, ConsumerPoolConfig, QueueCleaner};

/// 任务队列层的生命周期：两个队列的消费者池和孤儿任务清理器
pub struct QueueService {
    broker: Arc<dyn TaskBroker>,
    pools: Vec<ConsumerPool>,
    cleaner: QueueCleaner,
}

impl QueueService {
    pub fn new(
        config: &TaskQueueConfig,
        feeds: FeedService,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let broker = feeds.broker().clone();
        let pool_config = ConsumerPoolConfig::from(config);

        let pools = vec![
            ConsumerPool::new(
                POST_QUEUE,
                broker.clone(),
                Arc::new(PostConsumer::new(feeds.clone(), publisher)),
                pool_config.clone(),
            ),
            ConsumerPool::new(
                FEED_QUEUE,
                broker.clone(),
                Arc::new(FeedConsumer::new(feeds)),
                pool_config,
            ),
        ];

        let cleaner = QueueCleaner::new(
            broker.clone(),
            vec![POST_QUEUE.to_string(), FEED_QUEUE.to_string()],
            config.cleanup_interval(),
        );

        Self {
            broker,
            pools,
            cleaner,
        }
    }

    pub async fn start(&mut self) -> FeedResult<()> {
        self.cleaner.start().await?;
        for pool in &mut self.pools {
            pool.start().await?;
        }
        info!("任务队列服务已启动");
        Ok(())
    }

    /// 等待所有消费者处理完当前任务后停止
    pub async fn shutdown(&mut self) -> FeedResult<()> {
        for pool in &mut self.pools {
            if let Err(e) = pool.stop().await {
                error!("停止队列 {} 的消费者池失败: {}", pool.queue(), e);
            }
        }
        self.cleaner.stop().await?;
        info!("任务队列服务已停止");
        Ok(())
    }

    pub async fn stats(&self) -> FeedResult<Vec<(String, QueueStats)>> {
        let mut stats = Vec::with_capacity(self.pools.len());
        for pool in &self.pools {
            stats.push((pool.queue().to_string(), self.broker.stats(pool.queue()).await?));
        }
        Ok(stats)
    }
}
