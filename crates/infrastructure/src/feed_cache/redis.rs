use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{debug, info};

use feedline_config::FeedConfig;
use feedline_domain::FeedCache;
use feedline_errors::{FeedError, FeedResult};

/// 以 `{prefix}{user_id}` 为键存放预计算动态，不设置过期时间
pub struct RedisFeedCache {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisFeedCache {
    pub async fn new(config: &FeedConfig) -> FeedResult<Self> {
        let client = Client::open(config.cache_url.as_str())
            .map_err(|e| FeedError::cache(format!("创建Redis客户端失败: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| FeedError::cache(format!("连接Redis失败: {e}")))?;
        info!("动态缓存已连接到Redis: {}", config.cache_url);
        Ok(Self {
            conn,
            key_prefix: config.cache_key_prefix.clone(),
        })
    }

    fn key(&self, user_id: i64) -> String {
        format!("{}{}", self.key_prefix, user_id)
    }
}

#[async_trait]
impl FeedCache for RedisFeedCache {
    async fn store(&self, user_id: i64, feed: &[u8]) -> FeedResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(self.key(user_id))
            .arg(feed)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| FeedError::cache(format!("写入用户 {user_id} 的动态缓存失败: {e}")))?;
        debug!("用户 {} 的动态缓存已更新, {} 字节", user_id, feed.len());
        Ok(())
    }

    async fn load(&self, user_id: i64) -> FeedResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(self.key(user_id))
            .query_async(&mut conn)
            .await
            .map_err(|e| FeedError::cache(format!("读取用户 {user_id} 的动态缓存失败: {e}")))
    }
}
