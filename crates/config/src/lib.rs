pub mod models;
pub mod validation;

pub use models::{
    AppConfig, ChatConfig, EventBusBackend, EventBusConfig, FeedCacheBackend, FeedConfig,
    GatewayConfig, LogConfig, LogFormat, StorageBackend, StorageConfig, TaskQueueBackend,
    TaskQueueConfig,
};
pub use validation::ConfigValidator;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("解析错误: {0}")]
    Parse(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Configuration(err.to_string())
    }
}
