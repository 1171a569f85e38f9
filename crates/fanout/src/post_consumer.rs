use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tracing::{debug, info, warn};

use crate::feed_service::FeedService;
use feedline_domain::{
    Delivery, DeliveryHandler, DeliveryOutcome, Event, EventPublisher, PostNotice, PostTask,
    SocialStorage, TaskPayload,
};
use feedline_errors::FeedResult;

/// 一次扇出的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub followers: usize,
    pub refreshes_enqueued: usize,
    pub notified: usize,
    pub failed: Vec<i64>,
}

/// `post` 队列的处理器
pub struct PostConsumer {
    feeds: FeedService,
    storage: Arc<dyn SocialStorage>,
    publisher: Arc<dyn EventPublisher>,
}

impl PostConsumer {
    pub fn new(feeds: FeedService, publisher: Arc<dyn EventPublisher>) -> Self {
        let storage = feeds.storage().clone();
        Self {
            feeds,
            storage,
            publisher,
        }
    }

    /// 对每个关注者独立执行：排入缓存重建任务、解析资料并推送通知
    ///
    /// 只有获取关注者列表失败会返回错误；单个关注者的失败记入报告后继续。
    pub async fn fan_out(&self, task: &PostTask) -> FeedResult<FanoutReport> {
        let post = &task.post;
        let followers = self.storage.followers(post.user_id).await?;

        let user_from = match self.storage.display_name(post.user_id).await {
            Ok(name) => name,
            Err(e) => {
                warn!(user_id = post.user_id, "解析作者名称失败: {}", e);
                String::new()
            }
        };
        let event = Event::Post(PostNotice {
            user_from,
            title: post.title.clone(),
            message: post.message.clone(),
        });

        let mut report = FanoutReport {
            followers: followers.len(),
            ..Default::default()
        };

        for follower in followers {
            let mut follower_ok = true;

            match self.feeds.enqueue_feed_refresh(follower).await {
                Ok(()) => report.refreshes_enqueued += 1,
                Err(e) => {
                    warn!(user_id = follower, "排入缓存重建任务失败: {}", e);
                    follower_ok = false;
                }
            }

            match self.storage.profile(follower).await {
                Ok(profile) => {
                    match self
                        .publisher
                        .publish_event(follower, &profile.shard_id, &event)
                        .await
                    {
                        Ok(()) => report.notified += 1,
                        Err(e) => {
                            warn!(user_id = follower, "推送动态通知失败: {}", e);
                            follower_ok = false;
                        }
                    }
                }
                Err(e) => {
                    warn!(user_id = follower, "获取关注者资料失败: {}", e);
                    follower_ok = false;
                }
            }

            if !follower_ok {
                report.failed.push(follower);
            }
        }

        counter!("feedline_fanout_followers_total").increment(report.followers as u64);
        counter!("feedline_fanout_failures_total").increment(report.failed.len() as u64);
        Ok(report)
    }
}

#[async_trait]
impl DeliveryHandler for PostConsumer {
    fn name(&self) -> &str {
        "post-consumer"
    }

    async fn handle(&self, delivery: Delivery) -> FeedResult<DeliveryOutcome> {
        let task = match TaskPayload::decode(delivery.payload()) {
            Ok(TaskPayload::Post(task)) => task,
            Ok(other) => {
                warn!("post队列收到 {} 任务, 拒绝", other.kind());
                return delivery.reject().await;
            }
            Err(e) => {
                warn!("拒绝无法解析的动态任务: {}", e);
                return delivery.reject().await;
            }
        };

        match self.fan_out(&task).await {
            Ok(report) => {
                if report.failed.is_empty() {
                    debug!(post_id = task.post.id, followers = report.followers, "扇出完成");
                } else {
                    info!(
                        post_id = task.post.id,
                        followers = report.followers,
                        failed = report.failed.len(),
                        "扇出完成, 部分关注者处理失败"
                    );
                }
                delivery.ack().await
            }
            Err(e) => {
                // 关注者列表无法获取时整条任务稍后重新投递
                warn!(post_id = task.post.id, "获取关注者失败, 任务放回队列: {}", e);
                delivery.requeue().await
            }
        }
    }
}
