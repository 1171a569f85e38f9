use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::validation::{require_non_empty, require_positive, require_scheme, ConfigValidator};
use crate::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskQueueBackend {
    #[default]
    Redis,
    InMemory,
}

/// 持久化任务队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskQueueConfig {
    pub backend: TaskQueueBackend,
    pub redis_url: String,
    pub redis_db: i64,
    pub pool_size: u32,
    /// Redis键前缀，同一前缀下的进程共享队列
    pub tag: String,
    pub consumers_per_queue: usize,
    pub prefetch_limit: usize,
    pub poll_interval_ms: u64,
    pub cleanup_interval_seconds: u64,
    /// 心跳过期时间，也是未确认任务的可见性窗口
    pub heartbeat_ttl_seconds: u64,
    pub heartbeat_interval_seconds: u64,
    pub report_batch_size: u64,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            backend: TaskQueueBackend::Redis,
            redis_url: "redis://localhost:6379".to_string(),
            redis_db: 0,
            pool_size: 5,
            tag: "timeline-update".to_string(),
            consumers_per_queue: 5,
            prefetch_limit: 10,
            poll_interval_ms: 1000,
            cleanup_interval_seconds: 300,
            heartbeat_ttl_seconds: 60,
            heartbeat_interval_seconds: 10,
            report_batch_size: 100,
        }
    }
}

impl TaskQueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }

    pub fn heartbeat_ttl(&self) -> Duration {
        Duration::from_secs(self.heartbeat_ttl_seconds)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    /// 带数据库编号的连接地址
    pub fn redis_connection_url(&self) -> String {
        format!("{}/{}", self.redis_url.trim_end_matches('/'), self.redis_db)
    }
}

impl ConfigValidator for TaskQueueConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.backend == TaskQueueBackend::Redis {
            require_scheme("task_queue.redis_url", &self.redis_url, &["redis", "rediss"])?;
            require_positive("task_queue.pool_size", self.pool_size as u64)?;
        }
        require_non_empty("task_queue.tag", &self.tag)?;
        require_positive("task_queue.consumers_per_queue", self.consumers_per_queue as u64)?;
        require_positive("task_queue.prefetch_limit", self.prefetch_limit as u64)?;
        require_positive("task_queue.poll_interval_ms", self.poll_interval_ms)?;
        require_positive("task_queue.cleanup_interval_seconds", self.cleanup_interval_seconds)?;
        require_positive("task_queue.report_batch_size", self.report_batch_size)?;
        if self.heartbeat_interval_seconds == 0
            || self.heartbeat_interval_seconds >= self.heartbeat_ttl_seconds
        {
            return Err(ConfigError::Validation(format!(
                "task_queue.heartbeat_interval_seconds ({}) 必须大于0且小于 heartbeat_ttl_seconds ({})",
                self.heartbeat_interval_seconds, self.heartbeat_ttl_seconds
            )));
        }
        if self.redis_db < 0 {
            return Err(ConfigError::Validation("task_queue.redis_db 不能为负数".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TaskQueueConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.redis_connection_url(), "redis://localhost:6379/0");
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_heartbeat_must_fit_in_ttl() {
        let config = TaskQueueConfig {
            heartbeat_interval_seconds: 60,
            heartbeat_ttl_seconds: 60,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_in_memory_skips_redis_checks() {
        let config = TaskQueueConfig {
            backend: TaskQueueBackend::InMemory,
            redis_url: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
