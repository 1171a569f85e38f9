pub mod counter;
pub mod event_bus;
pub mod feed_cache;
pub mod metrics;
pub mod storage;
pub mod task_queue;

pub use counter::{HttpCounterService, InMemoryCounterService};
pub use event_bus::{InMemoryEventBus, RabbitMqEventConsumer, RabbitMqEventPublisher};
pub use feed_cache::{InMemoryFeedCache, RedisFeedCache};
pub use self::metrics::{QueueMetrics, QueueMetricsSnapshot};
pub use storage::{InMemorySocialStorage, PostgresSocialStorage};
pub use task_queue::{
    ConsumerPool, ConsumerPoolConfig, InMemoryTaskBroker, QueueCleaner, RedisTaskBroker,
};
