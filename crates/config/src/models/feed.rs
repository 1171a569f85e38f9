use serde::{Deserialize, Serialize};

use crate::validation::{require_non_empty, require_positive, require_scheme, ConfigValidator};
use crate::ConfigResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeedCacheBackend {
    #[default]
    Redis,
    InMemory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub cache_backend: FeedCacheBackend,
    pub cache_url: String,
    pub cache_key_prefix: String,
    /// 单个用户动态缓存的最大条数
    pub posts_limit: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            cache_backend: FeedCacheBackend::Redis,
            cache_url: "redis://localhost:6379/0".to_string(),
            cache_key_prefix: "user_feed".to_string(),
            posts_limit: 1000,
        }
    }
}

impl FeedConfig {
    pub fn cache_key(&self, user_id: i64) -> String {
        format!("{}{}", self.cache_key_prefix, user_id)
    }
}

impl ConfigValidator for FeedConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.cache_backend == FeedCacheBackend::Redis {
            require_scheme("feed.cache_url", &self.cache_url, &["redis", "rediss"])?;
        }
        require_non_empty("feed.cache_key_prefix", &self.cache_key_prefix)?;
        require_positive("feed.posts_limit", self.posts_limit as u64)?;
        Ok(())
    }
}
