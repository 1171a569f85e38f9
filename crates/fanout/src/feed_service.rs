use std::sync::Arc;

use tracing::{debug, info, warn};

use feedline_domain::{
    CachedFeed, FeedCache, Post, SocialStorage, TaskBroker, TaskPayload, FEED_QUEUE, POST_QUEUE,
};
use feedline_errors::FeedResult;

/// 请求处理层调用的动态相关操作
#[derive(Clone)]
pub struct FeedService {
    broker: Arc<dyn TaskBroker>,
    storage: Arc<dyn SocialStorage>,
    cache: Arc<dyn FeedCache>,
    posts_limit: usize,
}

impl FeedService {
    pub fn new(
        broker: Arc<dyn TaskBroker>,
        storage: Arc<dyn SocialStorage>,
        cache: Arc<dyn FeedCache>,
        posts_limit: usize,
    ) -> Self {
        Self {
            broker,
            storage,
            cache,
            posts_limit,
        }
    }

    pub fn storage(&self) -> &Arc<dyn SocialStorage> {
        &self.storage
    }

    pub fn broker(&self) -> &Arc<dyn TaskBroker> {
        &self.broker
    }

    /// 将新动态排入扇出队列
    pub async fn enqueue_post_fanout(&self, post: &Post) -> FeedResult<()> {
        let payload = TaskPayload::post(post.clone()).encode()?;
        self.broker.publish(POST_QUEUE, &payload).await?;
        debug!(post_id = post.id, user_id = post.user_id, "动态已排入扇出队列");
        Ok(())
    }

    /// 将用户的动态缓存重建任务排入队列
    pub async fn enqueue_feed_refresh(&self, user_id: i64) -> FeedResult<()> {
        let payload = TaskPayload::feed_refresh(user_id).encode()?;
        self.broker.publish(FEED_QUEUE, &payload).await
    }

    /// 保存动态并排入扇出队列，排队失败返回给调用方
    pub async fn publish_post(&self, user_id: i64, title: &str, message: &str) -> FeedResult<Post> {
        let post = self.storage.create_post(user_id, title, message).await?;
        self.enqueue_post_fanout(&post).await?;
        info!(post_id = post.id, user_id, "动态已发布");
        Ok(post)
    }

    /// 从存储计算好友动态并覆盖缓存
    pub async fn refresh_feed(&self, user_id: i64) -> FeedResult<CachedFeed> {
        let friends = self.storage.friend_ids(user_id).await?;
        let posts = self
            .storage
            .recent_posts_by_authors(&friends, self.posts_limit)
            .await?;
        let feed = CachedFeed::new(posts);
        self.cache.store(user_id, &feed.encode()?).await?;
        debug!(user_id, posts = feed.len(), "动态缓存已重建");
        Ok(feed)
    }

    /// 读取用户的好友动态，缓存缺失或损坏时从存储计算并回填
    pub async fn read_feed(&self, user_id: i64) -> FeedResult<CachedFeed> {
        match self.cache.load(user_id).await {
            Ok(Some(bytes)) => match CachedFeed::decode(&bytes) {
                Ok(feed) => return Ok(feed),
                Err(e) => warn!(user_id, "动态缓存无法解析, 重新计算: {}", e),
            },
            Ok(None) => debug!(user_id, "动态缓存未命中"),
            Err(e) => warn!(user_id, "读取动态缓存失败, 回退到存储: {}", e),
        }
        self.refresh_feed(user_id).await
    }

    pub async fn add_friend(&self, user_id: i64, friend_id: i64) -> FeedResult<()> {
        self.storage.add_friend(user_id, friend_id).await?;
        self.schedule_refresh_after_graph_change(user_id).await;
        Ok(())
    }

    pub async fn remove_friend(&self, user_id: i64, friend_id: i64) -> FeedResult<()> {
        self.storage.remove_friend(user_id, friend_id).await?;
        self.schedule_refresh_after_graph_change(user_id).await;
        Ok(())
    }

    async fn schedule_refresh_after_graph_change(&self, user_id: i64) {
        // 关系已经写入，缓存会在下一次刷新时追上
        if let Err(e) = self.enqueue_feed_refresh(user_id).await {
            warn!(user_id, "好友关系变更后排入缓存重建任务失败: {}", e);
        }
    }
}
