use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use feedline_domain::FeedCache;
use feedline_errors::FeedResult;

#[derive(Debug, Default)]
pub struct InMemoryFeedCache {
    entries: RwLock<HashMap<i64, Vec<u8>>>,
}

impl InMemoryFeedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl FeedCache for InMemoryFeedCache {
    async fn store(&self, user_id: i64, feed: &[u8]) -> FeedResult<()> {
        self.entries.write().await.insert(user_id, feed.to_vec());
        Ok(())
    }

    async fn load(&self, user_id: i64) -> FeedResult<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(&user_id).cloned())
    }
}
