pub mod app_config;
pub mod chat;
pub mod event_bus;
pub mod feed;
pub mod gateway;
pub mod logging;
pub mod storage;
pub mod task_queue;

pub use app_config::AppConfig;
pub use chat::ChatConfig;
pub use event_bus::{EventBusBackend, EventBusConfig};
pub use feed::{FeedCacheBackend, FeedConfig};
pub use gateway::GatewayConfig;
pub use logging::{LogConfig, LogFormat};
pub use storage::{StorageBackend, StorageConfig};
pub use task_queue::{TaskQueueBackend, TaskQueueConfig};
