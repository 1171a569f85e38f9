use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    chat::ChatConfig, event_bus::EventBusConfig, feed::FeedConfig, gateway::GatewayConfig,
    logging::LogConfig, storage::StorageConfig, task_queue::TaskQueueConfig,
};
use crate::validation::ConfigValidator;
use crate::ConfigResult;

const ENV_PREFIX: &str = "FEEDLINE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub task_queue: TaskQueueConfig,
    pub event_bus: EventBusConfig,
    pub gateway: GatewayConfig,
    pub feed: FeedConfig,
    pub chat: ChatConfig,
    pub storage: StorageConfig,
    pub logging: LogConfig,
}

impl AppConfig {
    /// 从配置文件和 `FEEDLINE_` 前缀的环境变量加载配置
    ///
    /// 未指定路径时依次尝试默认位置，都不存在则只使用内置默认值。
    /// 环境变量用 `__` 分隔层级，例如 `FEEDLINE_TASK_QUEUE__PREFETCH_LIMIT=20`。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        Self::load_with_env(config_path, None)
    }

    /// 与 [`AppConfig::load`] 相同，但可以显式提供环境变量集合
    pub fn load_with_env(
        config_path: Option<&str>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = [
                "config/feedline.toml",
                "feedline.toml",
                "/etc/feedline/config.toml",
            ];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .source(env),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate().context("配置验证失败")?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate().context("配置验证失败")?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.task_queue.validate()?;
        self.event_bus.validate()?;
        self.gateway.validate()?;
        self.feed.validate()?;
        self.chat.validate()?;
        self.storage.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventBusBackend, TaskQueueBackend};
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.task_queue.consumers_per_queue, 5);
        assert_eq!(config.task_queue.prefetch_limit, 10);
        assert_eq!(config.task_queue.cleanup_interval_seconds, 300);
        assert_eq!(config.event_bus.exchange, "Events");
        assert_eq!(config.event_bus.routing_key, "00000");
        assert_eq!(config.feed.posts_limit, 1000);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [task_queue]
            backend = "in_memory"
            prefetch_limit = 3

            [event_bus]
            backend = "in_memory"
            routing_key = "00007"
            "#,
        )
        .unwrap();

        assert_eq!(config.task_queue.backend, TaskQueueBackend::InMemory);
        assert_eq!(config.task_queue.prefetch_limit, 3);
        assert_eq!(config.task_queue.consumers_per_queue, 5);
        assert_eq!(config.event_bus.backend, EventBusBackend::InMemory);
        assert_eq!(config.event_bus.partition_queue(), "Events_00007");
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        let result = AppConfig::from_toml(
            r#"
            [feed]
            posts_limit = 0
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_toml_roundtrip_through_file() {
        let mut original = AppConfig::default();
        original.gateway.bind_address = "127.0.0.1:9000".to_string();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(original.to_toml().unwrap().as_bytes()).unwrap();

        let loaded = AppConfig::load_with_env(file.path().to_str(), Some(HashMap::new())).unwrap();
        assert_eq!(loaded.gateway.bind_address, "127.0.0.1:9000");
        assert_eq!(loaded.feed.cache_key_prefix, "user_feed");
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[task_queue]\nprefetch_limit = 4").unwrap();

        let env = HashMap::from([
            ("FEEDLINE_TASK_QUEUE__PREFETCH_LIMIT".to_string(), "25".to_string()),
            ("FEEDLINE_EVENT_BUS__ROUTING_KEY".to_string(), "00003".to_string()),
        ]);
        let loaded = AppConfig::load_with_env(file.path().to_str(), Some(env)).unwrap();
        assert_eq!(loaded.task_queue.prefetch_limit, 25);
        assert_eq!(loaded.event_bus.routing_key, "00003");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = AppConfig::load_with_env(Some("/nonexistent/feedline.toml"), None);
        assert!(result.is_err());
    }
}
